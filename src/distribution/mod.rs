//! Probability distributions expressed as graph builders.

use crate::{
    tensor_grad::{error::Result, Shape},
    tensor_op::graph::{Graph, NodeId},
};

pub mod iid;
pub mod normal;
pub mod sample;

pub use iid::Iid;
pub use normal::Normal;

/// Queries return new graph nodes; nothing is evaluated until the graph is.
pub trait Distribution {
    /// Shape of one event, without any batch axis.
    fn event_shape(&self) -> Shape;

    fn prob(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId>;

    fn log_prob(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId>;

    fn cdf(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId>;

    /// Inverse of [`Distribution::cdf`].
    fn cdfinv(&self, graph: &mut Graph, p: NodeId) -> Result<NodeId>;

    fn entropy(&self, graph: &mut Graph) -> Result<NodeId>;

    fn mean(&self, graph: &mut Graph) -> Result<NodeId>;

    fn stddev(&self, graph: &mut Graph) -> Result<NodeId>;

    fn variance(&self, graph: &mut Graph) -> Result<NodeId>;

    /// `n` draws, shaped `[n, event...]`; not differentiable.
    fn sample(&self, graph: &mut Graph, n: usize) -> Result<NodeId>;

    /// Reparameterised draws that gradients flow through.
    fn rsample(&self, graph: &mut Graph, n: usize) -> Result<NodeId>;

    fn has_rsample(&self) -> bool {
        false
    }
}
