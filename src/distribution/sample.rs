use std::{borrow::Cow, hash::Hasher, sync::Arc};

use crossbeam::sync::ShardedLock;
use ndarray::{ArrayD, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        tensor::FloatElement,
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, check_same_dtype, TensorOperation},
    },
    ArcLock,
};

/// Draws `n` samples per element of `(mean, stddev)`, producing
/// `[n, shape...]`. Every evaluation advances the generator.
#[derive(Clone)]
pub(crate) struct NormalSample {
    shape: Shape,
    n: usize,
    seed: u64,
    rng: ArcLock<StdRng>,
}

impl NormalSample {
    pub(crate) fn new(shape: Shape, n: usize, seed: u64) -> Result<Self> {
        if n == 0 {
            return Err(OpError::InvalidParameter(
                "sample count must be at least 1".to_string(),
            ));
        }
        Ok(NormalSample {
            shape,
            n,
            seed,
            rng: Arc::new(ShardedLock::new(StdRng::seed_from_u64(seed))),
        })
    }

    fn draw<F: FloatElement>(&self, mean: &ArrayD<F>, stddev: &ArrayD<F>) -> Result<ArrayD<F>> {
        let mut rng = self.rng.write().map_err(|_| OpError::LockPoisoned)?;
        let params: Vec<(f64, f64)> = mean
            .iter()
            .zip(stddev.iter())
            .map(|(m, s)| (m.to_f64().unwrap_or(f64::NAN), s.to_f64().unwrap_or(f64::NAN)))
            .collect();
        let mut data = Vec::with_capacity(self.n * params.len());
        for _ in 0..self.n {
            for &(mu, sigma) in &params {
                let z: f64 = rng.sample(StandardNormal);
                data.push(F::from_f64(mu + sigma * z));
            }
        }
        let out = self.shape.batched(self.n);
        ArrayD::from_shape_vec(IxDyn(out.as_slice()), data).map_err(|_| OpError::ShapeMismatch {
            expected: out.to_vec(),
            got: mean.shape().to_vec(),
        })
    }
}

impl TensorOperation for NormalSample {
    fn to_string(&self) -> String {
        format!("NormalRand{{shape={}, n={}}}", self.shape, self.n)
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"NormalRand");
        self.shape.as_slice().iter().for_each(|&d| state.write_usize(d));
        state.write_usize(self.n);
        state.write_u64(self.seed);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        for &shape in input_shapes {
            if *shape != self.shape {
                return Err(OpError::ShapeMismatch {
                    expected: self.shape.to_vec(),
                    got: shape.to_vec(),
                });
            }
        }
        Ok(self.shape.batched(self.n))
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        check_same_dtype(input_dtypes[0], input_dtypes[1])?;
        if !input_dtypes[0].is_float() {
            return Err(OpError::type_error(self.to_string(), input_dtypes[0]));
        }
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype(), inputs[1].dtype()])?;
        self.output_shape(&[&inputs[0].shape(), &inputs[1].shape()])?;
        let bad = inputs[1]
            .to_f64_vec()
            .into_iter()
            .find(|s| !s.is_finite() || *s < 0.0);
        if let Some(sigma) = bad {
            return Err(OpError::InvalidParameter(format!(
                "standard deviation must be finite and non-negative, got {}",
                sigma
            )));
        }
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        match (inputs[0].as_ref(), inputs[1].as_ref()) {
            (TensorValue::F32(m), TensorValue::F32(s)) => Ok(TensorValue::F32(self.draw(m, s)?)),
            (TensorValue::F64(m), TensorValue::F64(s)) => Ok(TensorValue::F64(self.draw(m, s)?)),
            (m, s) => Err(OpError::DtypeMismatch {
                expected: m.dtype(),
                got: s.dtype(),
            }),
        }
    }

    fn is_pure(&self) -> bool {
        false
    }

    fn build_gradient(
        &self,
        _graph: &mut Graph,
        _inputs: &[NodeId],
        _output: NodeId,
        _upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        Err(OpError::unsupported(
            self.to_string(),
            "sampling is not differentiable; use rsample",
        ))
    }
}

/// `n` draws from N(mean, stddev), shaped `[n, shape(mean)...]`.
pub fn normal_sample(
    graph: &mut Graph,
    mean: NodeId,
    stddev: NodeId,
    n: usize,
    seed: u64,
) -> Result<NodeId> {
    let shape = graph.shape(mean)?;
    graph.apply(NormalSample::new(shape, n, seed)?, &[mean, stddev])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seeded_draws_are_reproducible() {
        let draw = || {
            let mut graph = Graph::new();
            let m = graph.constant(TensorValue::from_f64([2], vec![0., 10.]).unwrap());
            let s = graph.constant(TensorValue::from_f64([2], vec![1., 0.]).unwrap());
            let x = normal_sample(&mut graph, m, s, 3, 42).unwrap();
            assert_eq!(graph.shape(x).unwrap(), Shape::from([3, 2]));
            graph.evaluate(&[x]).unwrap().remove(0).to_f64_vec()
        };
        let first = draw();
        assert_eq!(first, draw());
        assert_eq!(first[1], 10.0);
        assert_eq!(first[5], 10.0);
    }

    #[test]
    fn samples_are_never_memoized() {
        let mut graph = Graph::new();
        let m = graph.constant(TensorValue::from_f32([1], vec![0.]).unwrap());
        let s = graph.constant(TensorValue::from_f32([1], vec![1.]).unwrap());
        let a = normal_sample(&mut graph, m, s, 1, 7).unwrap();
        let b = normal_sample(&mut graph, m, s, 1, 7).unwrap();
        assert_ne!(a, b);
        let first = graph.evaluate(&[a]).unwrap();
        let second = graph.evaluate(&[a]).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut graph = Graph::new();
        let m = graph.constant(TensorValue::from_f64([1], vec![0.]).unwrap());
        let s = graph.constant(TensorValue::from_f64([1], vec![-1.]).unwrap());
        assert!(matches!(
            normal_sample(&mut graph, m, s, 0, 1),
            Err(OpError::InvalidParameter(_))
        ));
        let x = normal_sample(&mut graph, m, s, 2, 1).unwrap();
        assert!(matches!(
            graph.evaluate(&[x]),
            Err(OpError::InvalidParameter(_))
        ));
    }

    #[test]
    fn empirical_moments() {
        let mut graph = Graph::new();
        let m = graph.constant(TensorValue::from_f64([1], vec![3.0]).unwrap());
        let s = graph.constant(TensorValue::from_f64([1], vec![1.5]).unwrap());
        let x = normal_sample(&mut graph, m, s, 20_000, 3).unwrap();
        let draws = graph.evaluate(&[x]).unwrap().remove(0).to_f64_vec();
        let n = draws.len() as f64;
        let mean = draws.iter().sum::<f64>() / n;
        let var = draws.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!((mean - 3.0).abs() < 0.05);
        assert!((var.sqrt() - 1.5).abs() < 0.05);
    }
}
