use std::{borrow::Cow, hash::Hasher};

use ndarray::{ArrayD, Zip};

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        tensor::FloatElement,
        Dtype, Scalar, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, TensorOperation},
    },
};

use super::erf::{check_pair, float_pair, same_shape_pair};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bounds {
    min: Scalar,
    max: Scalar,
}

impl Bounds {
    fn new(min: Scalar, max: Scalar) -> Result<Self> {
        if !(min.as_f64() <= max.as_f64()) {
            return Err(OpError::InvalidParameter(format!(
                "clamp bounds must satisfy min <= max, got [{}, {}]",
                min, max
            )));
        }
        Ok(Bounds { min, max })
    }

    fn check_dtype(&self, op: &str, dtype: Dtype) -> Result<()> {
        let both_int = matches!((self.min, self.max), (Scalar::Int(_), Scalar::Int(_)));
        if dtype == Dtype::Int && !both_int {
            return Err(OpError::type_error(op, dtype));
        }
        Ok(())
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write_u64(self.min.hash_bits());
        state.write_u64(self.max.hash_bits());
    }
}

fn clamp_float<F: FloatElement>(array: &ArrayD<F>, bounds: Bounds) -> ArrayD<F> {
    let (lo, hi) = (F::from_f64(bounds.min.as_f64()), F::from_f64(bounds.max.as_f64()));
    array.mapv(|v| {
        if v < lo {
            lo
        } else if v > hi {
            hi
        } else {
            v
        }
    })
}

/// Limit every element to `[min, max]`.
#[derive(Clone, Debug)]
pub(crate) struct Clamp {
    bounds: Bounds,
    pass_gradient: bool,
}

impl TensorOperation for Clamp {
    fn to_string(&self) -> String {
        format!("Clamp{{{}, {}}}", self.bounds.min, self.bounds.max)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Clamp");
        self.bounds.write_hash(state);
        state.write_u8(self.pass_gradient as u8);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        Ok(input_shapes[0].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        self.bounds.check_dtype(&self.to_string(), input_dtypes[0])?;
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.bounds.check_dtype(&self.to_string(), inputs[0].dtype())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let bounds = self.bounds;
        Ok(match inputs[0].as_ref() {
            TensorValue::F32(a) => TensorValue::F32(clamp_float(a, bounds)),
            TensorValue::F64(a) => TensorValue::F64(clamp_float(a, bounds)),
            TensorValue::Int(a) => {
                let (lo, hi) = match (bounds.min, bounds.max) {
                    (Scalar::Int(lo), Scalar::Int(hi)) => (lo, hi),
                    _ => return Err(OpError::type_error(self.to_string(), Dtype::Int)),
                };
                TensorValue::Int(a.mapv(|v| v.max(lo).min(hi)))
            }
        })
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
        let dtype = graph.dtype(inputs[0])?;
        if !dtype.is_float() {
            return Err(OpError::type_error(self.to_string(), dtype));
        }
        let grad = graph.apply(
            ClampGrad {
                bounds: self.bounds,
                pass_gradient: self.pass_gradient,
            },
            &[inputs[0], upstream],
        )?;
        Ok(vec![Some(grad)])
    }
}

fn clamp_grad_array<F: FloatElement>(x: &ArrayD<F>, g: &ArrayD<F>, bounds: Bounds) -> ArrayD<F> {
    let (lo, hi) = (F::from_f64(bounds.min.as_f64()), F::from_f64(bounds.max.as_f64()));
    Zip::from(x).and(g).map_collect(|&x, &g| {
        if x >= lo && x <= hi {
            g
        } else {
            F::zero()
        }
    })
}

/// Gradient of [`Clamp`] for inputs `(x, g)`: `g` inside the bounds and zero
/// outside, or `g` everywhere when `pass_gradient` is set.
#[derive(Clone, Debug)]
pub(crate) struct ClampGrad {
    bounds: Bounds,
    pass_gradient: bool,
}

impl TensorOperation for ClampGrad {
    fn to_string(&self) -> String {
        if self.pass_gradient {
            "ClampGrad{pass}".to_string()
        } else {
            format!("ClampGrad{{{}, {}}}", self.bounds.min, self.bounds.max)
        }
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"ClampGrad");
        self.bounds.write_hash(state);
        state.write_u8(self.pass_gradient as u8);
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
        if self.pass_gradient {
            return Ok(inputs[1].as_ref().clone());
        }
        let bounds = self.bounds;
        match (inputs[0].as_ref(), inputs[1].as_ref()) {
            (TensorValue::F32(x), TensorValue::F32(g)) => {
                Ok(TensorValue::F32(clamp_grad_array(x, g, bounds)))
            }
            (TensorValue::F64(x), TensorValue::F64(g)) => {
                Ok(TensorValue::F64(clamp_grad_array(x, g, bounds)))
            }
            (x, g) => Err(OpError::DtypeMismatch {
                expected: x.dtype(),
                got: g.dtype(),
            }),
        }
    }

    /// Piecewise constant in `x`, linear in `g`.
    fn diff_wrt(&self, input: usize) -> bool {
        input == 1
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let grad = graph.apply(self.clone(), &[inputs[0], upstream])?;
        Ok(vec![None, Some(grad)])
    }
}

/// Clamp `x` into `[min, max]`. With `pass_gradient` the gradient ignores
/// the bounds (straight-through); otherwise it is zero where `x` was clipped.
pub fn clamp(
    graph: &mut Graph,
    x: NodeId,
    min: impl Into<Scalar>,
    max: impl Into<Scalar>,
    pass_gradient: bool,
) -> Result<NodeId> {
    let bounds = Bounds::new(min.into(), max.into())?;
    graph.apply(
        Clamp {
            bounds,
            pass_gradient,
        },
        &[x],
    )
}
