use thiserror::Error;

use super::dtype::Dtype;

pub type Result<T> = std::result::Result<T, OpError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error("{op} expects {expected} inputs, got {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("axis {axis} is out of range for a tensor of {dims} dimensions")]
    AxisOutOfRange { axis: usize, dims: usize },

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{op} received incompatible shapes {lhs:?} and {rhs:?}")]
    IncompatibleShapes {
        op: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("{op} does not support dtype {dtype}")]
    TypeError { op: String, dtype: Dtype },

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: Dtype, got: Dtype },

    #[error("{op} received an empty tensor")]
    EmptyInput { op: String },

    #[error("{op} is not supported: {reason}")]
    UnsupportedOperation { op: String, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("index {index} along axis {axis} is out of range for extent {extent}")]
    IndexOutOfRange {
        index: i64,
        axis: usize,
        extent: usize,
    },

    #[error("{op} received {value}, which is outside its domain")]
    DomainError { op: String, value: f64 },

    #[error("node belongs to a different graph")]
    ForeignNode,

    #[error("no value available for node {0}")]
    MissingValue(usize),

    #[error("value arena lock was poisoned")]
    LockPoisoned,
}

impl OpError {
    pub(crate) fn unsupported(op: impl Into<String>, reason: impl Into<String>) -> Self {
        OpError::UnsupportedOperation {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_error(op: impl Into<String>, dtype: Dtype) -> Self {
        OpError::TypeError {
            op: op.into(),
            dtype,
        }
    }
}

/// Return early with the given [`OpError`].
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}
