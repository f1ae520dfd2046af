use std::fmt;

/// Element type of a [`TensorValue`](super::tensor::TensorValue).
///
/// `Int` is the single integer representation; every integer width is
/// widened to `i64` when a value is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    F64,
    Int,
}

impl Dtype {
    pub fn is_float(&self) -> bool {
        matches!(self, Dtype::F32 | Dtype::F64)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
            Dtype::Int => "int",
        };
        write!(f, "{}", name)
    }
}

/// A dtype-tagged scalar, used for operator parameters such as clamp bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Float(f64),
    Int(i64),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Float(v) => v,
            Scalar::Int(v) => v as f64,
        }
    }

    pub(crate) fn hash_bits(&self) -> u64 {
        match *self {
            Scalar::Float(v) => v.to_bits(),
            Scalar::Int(v) => v as u64,
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v as f64)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
        }
    }
}
