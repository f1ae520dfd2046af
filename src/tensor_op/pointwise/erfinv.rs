use std::{borrow::Cow, hash::Hasher};

use log::warn;
use ndarray::{ArrayD, Zip};
use statrs::function::erf;

use crate::{
    map_float,
    tensor_grad::{
        error::{OpError, Result},
        tensor::FloatElement,
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        arith::binary::{mul, scale},
        graph::{Graph, NodeId},
        operation::{check_arity, check_float, TensorOperation},
    },
};

use super::erf::{check_pair, float_pair, same_shape_pair};

/// `sqrt(pi) / 2`
const SQRT_PI_OVER_TWO: f64 = 0.886_226_925_452_758;

/// How [`Erfinv`] treats inputs outside `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErfinvDomain {
    /// `NaN` outside the domain, `-inf`/`inf` at `-1`/`1`.
    Propagate,
    /// Fail the evaluation with [`OpError::DomainError`].
    Reject,
}

impl Default for ErfinvDomain {
    fn default() -> Self {
        ErfinvDomain::Propagate
    }
}

pub(crate) fn erfinv_f64(x: f64) -> f64 {
    if x.is_nan() || x.abs() > 1.0 {
        f64::NAN
    } else if x == 1.0 {
        f64::INFINITY
    } else if x == -1.0 {
        f64::NEG_INFINITY
    } else {
        erf::erf_inv(x)
    }
}

fn erfinv_array<F: FloatElement>(array: &ArrayD<F>) -> ArrayD<F> {
    array.mapv(|v| F::from_f64(erfinv_f64(v.to_f64().unwrap_or(f64::NAN))))
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Erfinv {
    domain: ErfinvDomain,
}

impl TensorOperation for Erfinv {
    fn to_string(&self) -> String {
        match self.domain {
            ErfinvDomain::Propagate => "Erfinv".to_string(),
            ErfinvDomain::Reject => "Erfinv{strict}".to_string(),
        }
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Erfinv");
        state.write_u8(self.domain as u8);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        Ok(input_shapes[0].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        check_float(self, input_dtypes[0])?;
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        check_float(self, inputs[0].dtype())?;
        let outside = inputs[0]
            .to_f64_vec()
            .into_iter()
            .find(|v| v.is_nan() || v.abs() > 1.0);
        if let Some(value) = outside {
            match self.domain {
                ErfinvDomain::Reject => {
                    return Err(OpError::DomainError {
                        op: self.to_string(),
                        value,
                    })
                }
                ErfinvDomain::Propagate => {
                    warn!("Erfinv received {} outside [-1, 1]; producing NaN", value)
                }
            }
        }
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        map_float!(inputs[0].as_ref(), self.to_string(), |a| erfinv_array(a))
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 0
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let grad = graph.apply(ErfinvGrad, &[inputs[0], upstream])?;
        Ok(vec![Some(grad)])
    }
}

fn erfinv_grad_array<F: FloatElement>(x: &ArrayD<F>, g: &ArrayD<F>) -> ArrayD<F> {
    Zip::from(x).and(g).map_collect(|&x, &g| {
        let y = erfinv_f64(x.to_f64().unwrap_or(f64::NAN));
        g * F::from_f64(SQRT_PI_OVER_TWO * (y * y).exp())
    })
}

/// `g * sqrt(pi)/2 * exp(erfinv(x)^2)` for inputs `(x, g)`.
#[derive(Clone, Debug, Default)]
pub(crate) struct ErfinvGrad;

impl TensorOperation for ErfinvGrad {
    fn to_string(&self) -> String {
        "ErfinvGrad".to_string()
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"ErfinvGrad");
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        same_shape_pair(self, input_shapes)
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        float_pair(self, input_dtypes)
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_pair(self, inputs)
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        match (inputs[0].as_ref(), inputs[1].as_ref()) {
            (TensorValue::F32(x), TensorValue::F32(g)) => {
                Ok(TensorValue::F32(erfinv_grad_array(x, g)))
            }
            (TensorValue::F64(x), TensorValue::F64(g)) => {
                Ok(TensorValue::F64(erfinv_grad_array(x, g)))
            }
            (x, g) => Err(OpError::DtypeMismatch {
                expected: x.dtype(),
                got: g.dtype(),
            }),
        }
    }

    fn diff_wrt(&self, _input: usize) -> bool {
        true
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let x = inputs[0];
        // d/dx = output * 2 erfinv(x) * erfinv'(x)
        let y = erfinv(graph, x)?;
        let ones = graph.ones_like(x)?;
        let slope = graph.apply(ErfinvGrad, &[x, ones])?;
        let twice_y = scale(graph, y, 2.0)?;
        let factor = mul(graph, twice_y, slope)?;
        let scaled = mul(graph, upstream, output)?;
        let d_x = mul(graph, scaled, factor)?;
        let d_g = graph.apply(ErfinvGrad, &[x, upstream])?;
        Ok(vec![Some(d_x), Some(d_g)])
    }
}

pub fn erfinv(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    erfinv_with_domain(graph, x, ErfinvDomain::Propagate)
}

pub fn erfinv_with_domain(graph: &mut Graph, x: NodeId, domain: ErfinvDomain) -> Result<NodeId> {
    graph.apply(Erfinv { domain }, &[x])
}
