pub mod dtype;
pub mod error;
pub mod shape;
pub mod tensor;

pub use dtype::{Dtype, Scalar};
pub use error::{OpError, Result};
pub use shape::Shape;
pub use tensor::{FloatElement, TensorValue};
