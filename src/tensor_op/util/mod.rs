pub mod repeat;
pub mod reshape;
pub mod slice;

pub use repeat::repeat;
pub use reshape::{reshape, squeeze, squeeze_all, squeeze_all_but, unsqueeze};
pub use slice::slice;
