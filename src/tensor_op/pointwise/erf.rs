use std::{borrow::Cow, hash::Hasher};

use ndarray::{ArrayD, Zip};
use statrs::function::erf;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        tensor::FloatElement,
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        arith::binary::{mul, scale, sub},
        graph::{Graph, NodeId},
        operation::{check_arity, check_float, check_same_dtype, TensorOperation},
    },
};

/// `2 / sqrt(pi)`
pub(crate) const TWO_OVER_SQRT_PI: f64 = 1.128_379_167_095_512_6;

fn erf_in_place<F: FloatElement>(array: &mut ArrayD<F>) {
    array.mapv_inplace(|v| match v.to_f64() {
        Some(x) => F::from_f64(erf::erf(x)),
        None => F::nan(),
    });
}

/// Elementwise error function. Reuses its input buffer when the graph hands
/// it ownership.
#[derive(Clone, Debug, Default)]
pub(crate) struct Erf;

impl TensorOperation for Erf {
    fn to_string(&self) -> String {
        "Erf".to_string()
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Erf");
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
        check_float(self, inputs[0].dtype())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let input = inputs
            .into_iter()
            .next()
            .ok_or_else(|| OpError::Arity {
                op: self.to_string(),
                expected: 1,
                got: 0,
            })?;
        match input.into_owned() {
            TensorValue::F32(mut a) => {
                erf_in_place(&mut a);
                Ok(TensorValue::F32(a))
            }
            TensorValue::F64(mut a) => {
                erf_in_place(&mut a);
                Ok(TensorValue::F64(a))
            }
            TensorValue::Int(_) => Err(OpError::type_error(self.to_string(), Dtype::Int)),
        }
    }

    fn overwrites_input(&self) -> Option<usize> {
        Some(0)
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
        let grad = graph.apply(ErfGrad, &[inputs[0], upstream])?;
        Ok(vec![Some(grad)])
    }
}

fn erf_grad_array<F: FloatElement>(x: &ArrayD<F>, g: &ArrayD<F>) -> ArrayD<F> {
    let c = F::from_f64(TWO_OVER_SQRT_PI);
    Zip::from(x)
        .and(g)
        .map_collect(|&x, &g| g * c * (-(x * x)).exp())
}

/// `g * 2/sqrt(pi) * exp(-x^2)` for inputs `(x, g)`.
#[derive(Clone, Debug, Default)]
pub(crate) struct ErfGrad;

impl TensorOperation for ErfGrad {
    fn to_string(&self) -> String {
        "ErfGrad".to_string()
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"ErfGrad");
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
            (TensorValue::F32(x), TensorValue::F32(g)) => Ok(TensorValue::F32(erf_grad_array(x, g))),
            (TensorValue::F64(x), TensorValue::F64(g)) => Ok(TensorValue::F64(erf_grad_array(x, g))),
            (x, g) => Err(OpError::DtypeMismatch {
                expected: x.dtype(),
                got: g.dtype(),
            }),
        }
    }

    fn diff_wrt(&self, _input: usize) -> bool {
        true
    }

    /// The kernel is linear in `g`; its `x` derivative is `-2x` times itself.
    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let (x, _) = (inputs[0], inputs[1]);
        let scaled = mul(graph, upstream, output)?;
        let factor = scale(graph, x, -2.0)?;
        let d_x = mul(graph, scaled, factor)?;
        let d_g = graph.apply(ErfGrad, &[x, upstream])?;
        Ok(vec![Some(d_x), Some(d_g)])
    }
}

pub(crate) fn same_shape_pair<O: TensorOperation + ?Sized>(op: &O, shapes: &[&Shape]) -> Result<Shape> {
    check_arity(op, shapes.len())?;
    if shapes[0] != shapes[1] {
        return Err(OpError::ShapeMismatch {
            expected: shapes[0].to_vec(),
            got: shapes[1].to_vec(),
        });
    }
    Ok(shapes[0].clone())
}

pub(crate) fn float_pair<O: TensorOperation + ?Sized>(op: &O, dtypes: &[Dtype]) -> Result<Dtype> {
    check_arity(op, dtypes.len())?;
    check_float(op, dtypes[0])?;
    check_same_dtype(dtypes[0], dtypes[1])?;
    Ok(dtypes[0])
}

pub(crate) fn check_pair<O: TensorOperation + ?Sized>(op: &O, inputs: &[&TensorValue]) -> Result<()> {
    check_arity(op, inputs.len())?;
    float_pair(op, &[inputs[0].dtype(), inputs[1].dtype()])?;
    same_shape_pair(op, &[&inputs[0].shape(), &inputs[1].shape()])?;
    Ok(())
}

pub fn erf(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    graph.apply(Erf, &[x])
}

/// `1 - erf(x)`
pub fn erfc(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    let e = erf(graph, x)?;
    let one = graph.scalar_like(x, 1.0)?;
    sub(graph, one, e)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utility::finite_diff_grad;
    use std::f64::consts::PI;

    #[test]
    fn constant_matches_pi() {
        assert!((TWO_OVER_SQRT_PI - 2.0 / PI.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn erf_values() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([3], vec![0.0, 0.5, -1.0]).unwrap(), "x");
        let y = erf(&mut graph, x).unwrap();
        let c = erfc(&mut graph, x).unwrap();
        let out = graph.evaluate(&[y, c]).unwrap();
        let y = out[0].to_f64_vec();
        assert!(y[0].abs() < 1e-15);
        assert!((y[1] - 0.520_499_877_813_046_5).abs() < 1e-9);
        assert!((y[2] + 0.842_700_792_949_714_9).abs() < 1e-9);
        let c = out[1].to_f64_vec();
        assert!((c[1] - 0.479_500_122_186_953_5).abs() < 1e-9);
    }

    #[test]
    fn erf_rejects_ints() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_ints([1], vec![1]).unwrap(), "x");
        assert!(matches!(erf(&mut graph, x), Err(OpError::TypeError { .. })));
        assert!(matches!(
            Erf.evaluate(vec![Cow::Owned(TensorValue::from_ints([1], vec![1]).unwrap())]),
            Err(OpError::TypeError { .. })
        ));
    }

    #[test]
    fn erf_gradient_matches_finite_difference() {
        let cases = vec![
            (Shape::scalar(), vec![0.3]),
            (Shape::from([4]), vec![-1.2, 0.0, 0.7, 2.0]),
        ];
        for (shape, data) in cases {
            let mut graph = Graph::new();
            let x = graph.variable(TensorValue::from_f64(shape.clone(), data).unwrap(), "x");
            let y = erf(&mut graph, x).unwrap();
            let g = graph.grad(y, &[x]).unwrap();
            assert_eq!(graph.shape(g[0]).unwrap(), shape);
            let symbolic = graph.evaluate(&g).unwrap()[0].to_f64_vec();
            let numeric = finite_diff_grad(&mut graph, y, x, 1e-6).unwrap();
            for (s, n) in symbolic.iter().zip(numeric.iter()) {
                assert!((s - n).abs() < 1e-4, "{} vs {}", s, n);
            }
        }
    }

    #[test]
    fn second_derivative() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([1], vec![0.5]).unwrap(), "x");
        let y = erf(&mut graph, x).unwrap();
        let g = graph.grad(y, &[x]).unwrap()[0];
        let h = graph.grad(g, &[x]).unwrap()[0];
        let out = graph.evaluate(&[h]).unwrap()[0].to_f64_vec();
        let expected = -2.0 * 0.5 * TWO_OVER_SQRT_PI * (-0.25f64).exp();
        assert!((out[0] - expected).abs() < 1e-12);
    }
}
