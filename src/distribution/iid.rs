use crate::{
    bail,
    tensor_grad::{
        error::{OpError, Result},
        Shape,
    },
    tensor_op::{
        arith::reduce::{reduce_add, reduce_prod},
        graph::{Graph, NodeId},
    },
};

use super::Distribution;

/// Treats the trailing `event_dims` axes of an inner distribution as one
/// joint event of independent components. Densities multiply over those
/// axes and log densities add.
pub struct Iid<D: Distribution> {
    inner: D,
    event_dims: usize,
}

impl<D: Distribution> Iid<D> {
    pub fn new(inner: D, event_dims: usize) -> Result<Self> {
        let dims = inner.event_shape().dims();
        if event_dims > dims {
            bail!(OpError::InvalidParameter(format!(
                "cannot treat {} axes as one event of a {}-dimensional distribution",
                event_dims, dims
            )));
        }
        Ok(Iid { inner, event_dims })
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn fold(
        &self,
        graph: &mut Graph,
        mut x: NodeId,
        reduce: fn(&mut Graph, NodeId, usize, bool) -> Result<NodeId>,
    ) -> Result<NodeId> {
        let dims = graph.shape(x)?.dims();
        if dims < self.event_dims {
            return Err(OpError::InvalidParameter(format!(
                "expected at least {} axes, got {}",
                self.event_dims, dims
            )));
        }
        for _ in 0..self.event_dims {
            let last = graph.shape(x)?.dims() - 1;
            x = reduce(graph, x, last, true)?;
        }
        Ok(x)
    }
}

impl<D: Distribution> Distribution for Iid<D> {
    fn event_shape(&self) -> Shape {
        let shape = self.inner.event_shape();
        Shape::from(&shape.as_slice()[shape.dims() - self.event_dims..])
    }

    fn prob(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId> {
        let p = self.inner.prob(graph, x)?;
        self.fold(graph, p, reduce_prod)
    }

    fn log_prob(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId> {
        let lp = self.inner.log_prob(graph, x)?;
        self.fold(graph, lp, reduce_add)
    }

    fn cdf(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId> {
        let c = self.inner.cdf(graph, x)?;
        self.fold(graph, c, reduce_prod)
    }

    fn cdfinv(&self, graph: &mut Graph, p: NodeId) -> Result<NodeId> {
        self.inner.cdfinv(graph, p)
    }

    fn entropy(&self, graph: &mut Graph) -> Result<NodeId> {
        let h = self.inner.entropy(graph)?;
        self.fold(graph, h, reduce_add)
    }

    fn mean(&self, graph: &mut Graph) -> Result<NodeId> {
        self.inner.mean(graph)
    }

    fn stddev(&self, graph: &mut Graph) -> Result<NodeId> {
        self.inner.stddev(graph)
    }

    fn variance(&self, graph: &mut Graph) -> Result<NodeId> {
        self.inner.variance(graph)
    }

    fn sample(&self, graph: &mut Graph, n: usize) -> Result<NodeId> {
        self.inner.sample(graph, n)
    }

    fn rsample(&self, graph: &mut Graph, n: usize) -> Result<NodeId> {
        self.inner.rsample(graph, n)
    }

    fn has_rsample(&self) -> bool {
        self.inner.has_rsample()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{distribution::Normal, tensor_grad::TensorValue};

    fn standard(graph: &mut Graph, width: usize) -> Normal {
        let m = graph.constant(TensorValue::from_f64([width], vec![0.; width]).unwrap());
        let s = graph.constant(TensorValue::from_f64([width], vec![1.; width]).unwrap());
        Normal::new(graph, m, s, 5).unwrap()
    }

    #[test]
    fn joint_density_over_last_axis() {
        let mut graph = Graph::new();
        let iid = Iid::new(standard(&mut graph, 3), 1).unwrap();
        assert_eq!(iid.event_shape(), Shape::from([3]));

        let xs = vec![0., 1., -1., 0.5, 0.5, 0.5];
        let x = graph.variable(TensorValue::from_f64([2, 3], xs.clone()).unwrap(), "x");
        let p = iid.prob(&mut graph, x).unwrap();
        let lp = iid.log_prob(&mut graph, x).unwrap();
        assert_eq!(graph.shape(p).unwrap(), Shape::from([2]));
        let out = graph.evaluate(&[p, lp]).unwrap();

        let ln_pdf = |v: f64| -0.5 * v * v - 0.918_938_533_204_672_7;
        for row in 0..2 {
            let expected: f64 = xs[row * 3..row * 3 + 3].iter().map(|&v| ln_pdf(v)).sum();
            assert!((out[1].to_f64_vec()[row] - expected).abs() < 1e-10);
            assert!((out[0].to_f64_vec()[row] - expected.exp()).abs() < 1e-10);
        }
    }

    #[test]
    fn entropy_adds_over_components() {
        let mut graph = Graph::new();
        let iid = Iid::new(standard(&mut graph, 4), 1).unwrap();
        let h = iid.entropy(&mut graph).unwrap();
        assert!(graph.shape(h).unwrap().is_scalar());
        let out = graph.evaluate(&[h]).unwrap()[0].to_f64_vec();
        let single = 0.5 * (2.0 * std::f64::consts::PI).ln() + 0.5;
        assert!((out[0] - 4.0 * single).abs() < 1e-10);
    }

    #[test]
    fn rejects_too_many_event_axes() {
        let mut graph = Graph::new();
        assert!(matches!(
            Iid::new(standard(&mut graph, 2), 2),
            Err(OpError::InvalidParameter(_))
        ));
    }

    #[test]
    fn delegates_sampling() {
        let mut graph = Graph::new();
        let iid = Iid::new(standard(&mut graph, 2), 1).unwrap();
        assert!(iid.has_rsample());
        let r = iid.rsample(&mut graph, 3).unwrap();
        assert_eq!(graph.shape(r).unwrap(), Shape::from([3, 2]));
    }
}
