extern crate ndarray;
extern crate num_traits;
extern crate rand;
extern crate thiserror;

use std::sync::Arc;

use crossbeam::sync::ShardedLock;

pub mod distribution;
pub mod prelude;
#[macro_use]
pub mod tensor_grad;
pub mod tensor_op;
mod tests;
pub mod utility;

pub(crate) type ArcLock<T> = Arc<ShardedLock<T>>;

pub use tensor_grad::{Dtype, OpError, Result, Scalar, Shape, TensorValue};
pub use tensor_op::{Graph, GraphOptions, NodeId, TensorOperation};
