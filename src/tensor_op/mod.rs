//! Operators and the graph they are applied to.

pub mod arith;
pub mod graph;
pub mod index;
pub mod operation;
pub mod pointwise;
pub mod util;

pub use graph::{Graph, GraphOptions, GraphViz, NodeId, ValueArena};
pub use operation::{check_arity, TensorOperation};
