pub mod argsort;
pub mod gather;

pub use argsort::argsort;
pub use gather::gather;
