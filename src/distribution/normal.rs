use std::{
    f64::consts::{PI, SQRT_2},
    sync::atomic::{AtomicU64, Ordering},
};

use log::debug;

use crate::{
    bail,
    tensor_grad::{
        error::{OpError, Result},
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        arith::{
            binary::{add, broadcast_binary, mul, scale, shift, BinaryKind},
            broadcast::BroadcastAxes,
            unary::{exp, log, square},
        },
        graph::{Graph, NodeId},
        pointwise::{erf::erf, erfinv::erfinv},
        util::reshape::reshape,
    },
};

use super::{sample::normal_sample, Distribution};

/// `ln(sqrt(2 pi))`
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// A batch of independent univariate normals, one per element of `mean`.
///
/// A query `x` either has exactly the declared shape or the declared shape
/// behind one leading batch axis; in the batched case `mean` and `stddev`
/// are broadcast over axis 0.
pub struct Normal {
    mean: NodeId,
    stddev: NodeId,
    shape: Shape,
    dtype: Dtype,
    seed: u64,
    draws: AtomicU64,
    zero_mean: NodeId,
    unit_stddev: NodeId,
}

impl Normal {
    pub fn new(graph: &mut Graph, mean: NodeId, stddev: NodeId, seed: u64) -> Result<Self> {
        let (mean_shape, stddev_shape) = (graph.shape(mean)?, graph.shape(stddev)?);
        if mean_shape != stddev_shape {
            return Err(OpError::ShapeMismatch {
                expected: mean_shape.to_vec(),
                got: stddev_shape.to_vec(),
            });
        }
        let (dtype, stddev_dtype) = (graph.dtype(mean)?, graph.dtype(stddev)?);
        if dtype != stddev_dtype {
            return Err(OpError::DtypeMismatch {
                expected: dtype,
                got: stddev_dtype,
            });
        }
        if !dtype.is_float() {
            bail!(OpError::type_error("Normal", dtype));
        }

        let (mean, stddev) = if mean_shape.is_scalar() {
            (
                reshape(graph, mean, Shape::from([1]))?,
                reshape(graph, stddev, Shape::from([1]))?,
            )
        } else {
            (mean, stddev)
        };
        let shape = graph.shape(mean)?;

        let zero_mean = graph.named_constant(TensorValue::zeros(dtype, &shape), "zero_mean");
        let unit_stddev = graph.named_constant(TensorValue::ones(dtype, &shape), "unit_stddev");
        debug!("Normal over {} {}", shape, dtype);

        Ok(Normal {
            mean,
            stddev,
            shape,
            dtype,
            seed,
            draws: AtomicU64::new(0),
            zero_mean,
            unit_stddev,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Map a query onto the declared shape. Returns the (possibly
    /// reshaped) query and whether axis 0 is a batch axis.
    pub fn fix_shape(&self, graph: &mut Graph, x: NodeId) -> Result<(NodeId, bool)> {
        let x_shape = graph.shape(x)?;
        if x_shape == self.shape {
            return Ok((x, false));
        }
        if self.shape.size() == 1 {
            if x_shape.is_scalar() {
                return Ok((reshape(graph, x, self.shape.clone())?, false));
            }
            if x_shape.dims() == 1 {
                let batched = self.shape.batched(x_shape[0]);
                return Ok((reshape(graph, x, batched)?, true));
            }
        }
        if x_shape.dims() == self.shape.dims() + 1 && x_shape.as_slice()[1..] == *self.shape.as_slice() {
            return Ok((x, true));
        }
        Err(OpError::ShapeMismatch {
            expected: self.shape.to_vec(),
            got: x_shape.to_vec(),
        })
    }

    /// `x (op) param`, broadcasting `param` over axis 0 of a batch.
    fn against(
        &self,
        graph: &mut Graph,
        kind: BinaryKind,
        x: NodeId,
        param: NodeId,
        batched: bool,
    ) -> Result<NodeId> {
        let axes = if batched {
            BroadcastAxes::batch_right()
        } else {
            BroadcastAxes::none()
        };
        broadcast_binary(graph, kind, x, param, axes)
    }

    /// `(x - mean) / stddev`
    fn standardize(&self, graph: &mut Graph, x: NodeId, batched: bool) -> Result<NodeId> {
        let centered = self.against(graph, BinaryKind::Sub, x, self.mean, batched)?;
        self.against(graph, BinaryKind::Div, centered, self.stddev, batched)
    }

    fn next_seed(&self) -> u64 {
        self.seed
            .wrapping_add(self.draws.fetch_add(1, Ordering::Relaxed))
    }
}

impl Distribution for Normal {
    fn event_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn prob(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId> {
        let (x, batched) = self.fix_shape(graph, x)?;
        let z = self.standardize(graph, x, batched)?;
        let z2 = square(graph, z)?;
        let exponent = scale(graph, z2, -0.5)?;
        let kernel = exp(graph, exponent)?;
        let density = self.against(graph, BinaryKind::Div, kernel, self.stddev, batched)?;
        scale(graph, density, 1.0 / (2.0 * PI).sqrt())
    }

    fn log_prob(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId> {
        let (x, batched) = self.fix_shape(graph, x)?;
        let z = self.standardize(graph, x, batched)?;
        let z2 = square(graph, z)?;
        let quadratic = scale(graph, z2, -0.5)?;
        let ln_stddev = log(graph, self.stddev)?;
        let out = self.against(graph, BinaryKind::Sub, quadratic, ln_stddev, batched)?;
        shift(graph, out, -LN_SQRT_2PI)
    }

    fn cdf(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId> {
        let (x, batched) = self.fix_shape(graph, x)?;
        let centered = self.against(graph, BinaryKind::Sub, x, self.mean, batched)?;
        let scaled = scale(graph, centered, 1.0 / SQRT_2)?;
        let arg = self.against(graph, BinaryKind::Div, scaled, self.stddev, batched)?;
        let e = erf(graph, arg)?;
        let lifted = shift(graph, e, 1.0)?;
        scale(graph, lifted, 0.5)
    }

    fn cdfinv(&self, graph: &mut Graph, p: NodeId) -> Result<NodeId> {
        let (p, batched) = self.fix_shape(graph, p)?;
        let doubled = scale(graph, p, 2.0)?;
        let centered = shift(graph, doubled, -1.0)?;
        let y = erfinv(graph, centered)?;
        let y = scale(graph, y, SQRT_2)?;
        let spread = self.against(graph, BinaryKind::Mul, y, self.stddev, batched)?;
        self.against(graph, BinaryKind::Add, spread, self.mean, batched)
    }

    /// `0.5 ln(2 pi sigma^2) + 0.5` per element.
    fn entropy(&self, graph: &mut Graph) -> Result<NodeId> {
        let variance = square(graph, self.stddev)?;
        let scaled = scale(graph, variance, 2.0 * PI)?;
        let ln = log(graph, scaled)?;
        let half = scale(graph, ln, 0.5)?;
        shift(graph, half, 0.5)
    }

    fn mean(&self, _graph: &mut Graph) -> Result<NodeId> {
        Ok(self.mean)
    }

    fn stddev(&self, _graph: &mut Graph) -> Result<NodeId> {
        Ok(self.stddev)
    }

    fn variance(&self, graph: &mut Graph) -> Result<NodeId> {
        square(graph, self.stddev)
    }

    fn sample(&self, graph: &mut Graph, n: usize) -> Result<NodeId> {
        normal_sample(graph, self.mean, self.stddev, n, self.next_seed())
    }

    /// `mean + stddev * z` with `z` drawn from the standard normal, so the
    /// result is differentiable in `mean` and `stddev`.
    fn rsample(&self, graph: &mut Graph, n: usize) -> Result<NodeId> {
        let z = normal_sample(graph, self.zero_mean, self.unit_stddev, n, self.next_seed())?;
        if n > 1 {
            let spread = self.against(graph, BinaryKind::Mul, z, self.stddev, true)?;
            return self.against(graph, BinaryKind::Add, spread, self.mean, true);
        }
        let z = reshape(graph, z, self.shape.clone())?;
        let spread = mul(graph, z, self.stddev)?;
        add(graph, spread, self.mean)
    }

    fn has_rsample(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use statrs::distribution::{Continuous, ContinuousCDF, Normal as Reference};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn normal(graph: &mut Graph, mean: Vec<f64>, stddev: Vec<f64>) -> Normal {
        let shape = [mean.len()];
        let m = graph.variable(TensorValue::from_f64(shape, mean).unwrap(), "mean");
        let s = graph.variable(TensorValue::from_f64(shape, stddev).unwrap(), "stddev");
        Normal::new(graph, m, s, 1).unwrap()
    }

    #[test]
    fn shape_resolution() {
        init();
        let mut graph = Graph::new();
        let n = normal(&mut graph, vec![0., 1., 2.], vec![1., 1., 1.]);
        let plain = graph.variable(TensorValue::zeros(Dtype::F64, &Shape::from([3])), "x");
        let batch = graph.variable(TensorValue::zeros(Dtype::F64, &Shape::from([5, 3])), "x");
        let wrong = graph.variable(TensorValue::zeros(Dtype::F64, &Shape::from([5, 4])), "x");
        assert_eq!(n.fix_shape(&mut graph, plain).unwrap(), (plain, false));
        assert_eq!(n.fix_shape(&mut graph, batch).unwrap(), (batch, true));
        assert_eq!(
            n.fix_shape(&mut graph, wrong),
            Err(OpError::ShapeMismatch {
                expected: vec![3],
                got: vec![5, 4]
            })
        );
    }

    #[test]
    fn scalar_parameters_are_lifted() {
        let mut graph = Graph::new();
        let m = graph.variable(TensorValue::from_f64(Vec::<usize>::new(), vec![0.]).unwrap(), "m");
        let s = graph.variable(TensorValue::from_f64(Vec::<usize>::new(), vec![1.]).unwrap(), "s");
        let n = Normal::new(&mut graph, m, s, 0).unwrap();
        assert_eq!(n.shape(), &Shape::from([1]));

        let scalar = graph.variable(TensorValue::from_f64(Vec::<usize>::new(), vec![0.]).unwrap(), "x");
        let (fixed, batched) = n.fix_shape(&mut graph, scalar).unwrap();
        assert_eq!((graph.shape(fixed).unwrap(), batched), (Shape::from([1]), false));

        let vector = graph.variable(TensorValue::from_f64([4], vec![0.; 4]).unwrap(), "x");
        let (fixed, batched) = n.fix_shape(&mut graph, vector).unwrap();
        assert_eq!((graph.shape(fixed).unwrap(), batched), (Shape::from([4, 1]), true));
    }

    #[test]
    fn construction_checks() {
        let mut graph = Graph::new();
        let m = graph.variable(TensorValue::from_f64([2], vec![0., 0.]).unwrap(), "m");
        let s3 = graph.variable(TensorValue::from_f64([3], vec![1.; 3]).unwrap(), "s");
        let s32 = graph.variable(TensorValue::from_f32([2], vec![1.; 2]).unwrap(), "s");
        let mi = graph.variable(TensorValue::from_ints([2], vec![0, 0]).unwrap(), "m");
        let si = graph.variable(TensorValue::from_ints([2], vec![1, 1]).unwrap(), "s");
        assert!(matches!(Normal::new(&mut graph, m, s3, 0), Err(OpError::ShapeMismatch { .. })));
        assert!(matches!(Normal::new(&mut graph, m, s32, 0), Err(OpError::DtypeMismatch { .. })));
        assert!(matches!(Normal::new(&mut graph, mi, si, 0), Err(OpError::TypeError { .. })));
    }

    #[test]
    fn densities_match_reference() {
        let mut graph = Graph::new();
        let (means, stds) = (vec![0., 1.5, -2.0], vec![1., 0.5, 3.0]);
        let n = normal(&mut graph, means.clone(), stds.clone());
        let xs = vec![0.3, 1.0, -7.0, -1.0, 2.2, 0.0];
        let x = graph.variable(TensorValue::from_f64([2, 3], xs.clone()).unwrap(), "x");
        let p = n.prob(&mut graph, x).unwrap();
        let lp = n.log_prob(&mut graph, x).unwrap();
        let c = n.cdf(&mut graph, x).unwrap();
        let out = graph.evaluate(&[p, lp, c]).unwrap();
        for (i, &xv) in xs.iter().enumerate() {
            let reference = Reference::new(means[i % 3], stds[i % 3]).unwrap();
            assert!((out[0].to_f64_vec()[i] - reference.pdf(xv)).abs() < 1e-10);
            assert!((out[1].to_f64_vec()[i] - reference.ln_pdf(xv)).abs() < 1e-10);
            assert!((out[2].to_f64_vec()[i] - reference.cdf(xv)).abs() < 1e-5);
            let via_erf = 0.5 * (1.0 + statrs::function::erf::erf((xv - means[i % 3]) / SQRT_2 / stds[i % 3]));
            assert!((out[2].to_f64_vec()[i] - via_erf).abs() < 1e-5);
        }
    }

    #[test]
    fn cdfinv_inverts_cdf() {
        let mut graph = Graph::new();
        let n = normal(&mut graph, vec![3.0, -1.0], vec![1.5, 0.25]);
        let x = graph.variable(TensorValue::from_f64([2], vec![2.0, -0.9]).unwrap(), "x");
        let c = n.cdf(&mut graph, x).unwrap();
        let back = n.cdfinv(&mut graph, c).unwrap();
        let out = graph.evaluate(&[back]).unwrap()[0].to_f64_vec();
        assert!((out[0] - 2.0).abs() < 1e-8);
        assert!((out[1] + 0.9).abs() < 1e-8);
    }

    #[test]
    fn entropy_closed_form() {
        let mut graph = Graph::new();
        let n = normal(&mut graph, vec![3.0], vec![1.5]);
        let h = n.entropy(&mut graph).unwrap();
        let v = n.variance(&mut graph).unwrap();
        let out = graph.evaluate(&[h, v]).unwrap();
        assert!((out[0].to_f64_vec()[0] - 1.824_403_641_312_837).abs() < 1e-5);
        assert_eq!(out[1].to_f64_vec(), vec![2.25]);
    }

    #[test]
    fn sample_shapes() {
        let mut graph = Graph::new();
        let n = normal(&mut graph, vec![0., 1., 2.], vec![1., 1., 1.]);
        let s = n.sample(&mut graph, 4).unwrap();
        let r = n.rsample(&mut graph, 4).unwrap();
        let r1 = n.rsample(&mut graph, 1).unwrap();
        assert_eq!(graph.shape(s).unwrap(), Shape::from([4, 3]));
        assert_eq!(graph.shape(r).unwrap(), Shape::from([4, 3]));
        assert_eq!(graph.shape(r1).unwrap(), Shape::from([3]));
        assert!(n.has_rsample());
    }

    #[test]
    fn rsample_is_differentiable() {
        let mut graph = Graph::new();
        let m = graph.variable(TensorValue::from_f64([2], vec![0., 5.]).unwrap(), "m");
        let s = graph.variable(TensorValue::from_f64([2], vec![1., 2.]).unwrap(), "s");
        let n = Normal::new(&mut graph, m, s, 9).unwrap();
        let draws = n.rsample(&mut graph, 6).unwrap();
        let grads = graph.grad(draws, &[m, s]).unwrap();
        let out = graph.evaluate(&grads).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![6., 6.]);

        let plain = n.sample(&mut graph, 2).unwrap();
        assert!(matches!(
            graph.grad(plain, &[m]),
            Err(OpError::UnsupportedOperation { .. })
        ));
    }
}
