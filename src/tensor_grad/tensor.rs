use std::fmt;

use ndarray::{ArrayD, IxDyn, ScalarOperand};
use num_traits::{Float, NumCast, PrimInt};

use super::{
    dtype::Dtype,
    error::{OpError, Result},
    shape::Shape,
};

/// A dense, row-major tensor tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Int(ArrayD<i64>),
}

/// Floating element types a [`TensorValue`] can hold.
pub trait FloatElement:
    Float + ScalarOperand + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn from_f64(v: f64) -> Self {
        <Self as NumCast>::from(v).unwrap_or_else(Self::nan)
    }
}

impl FloatElement for f32 {}

impl FloatElement for f64 {}

/// Rebuild `array` with a new shape, reading elements in logical order.
pub(crate) fn reshape_array<A: Clone>(array: &ArrayD<A>, shape: &Shape) -> Result<ArrayD<A>> {
    if array.len() != shape.size() {
        return Err(OpError::ShapeMismatch {
            expected: shape.to_vec(),
            got: array.shape().to_vec(),
        });
    }
    let data: Vec<A> = array.iter().cloned().collect();
    ArrayD::from_shape_vec(IxDyn(shape.as_slice()), data).map_err(|_| OpError::ShapeMismatch {
        expected: shape.to_vec(),
        got: array.shape().to_vec(),
    })
}

impl TensorValue {
    pub fn from_f32(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        Ok(TensorValue::F32(from_vec(shape.into(), data)?))
    }

    pub fn from_f64(shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        Ok(TensorValue::F64(from_vec(shape.into(), data)?))
    }

    /// Integers of any primitive width are widened to the canonical `Int`.
    pub fn from_ints<I: PrimInt>(shape: impl Into<Shape>, data: Vec<I>) -> Result<Self> {
        let mut widened = Vec::with_capacity(data.len());
        for v in data {
            match v.to_i64() {
                Some(v) => widened.push(v),
                None => {
                    return Err(OpError::InvalidParameter(
                        "integer value does not fit in i64".to_string(),
                    ))
                }
            }
        }
        Ok(TensorValue::Int(from_vec(shape.into(), widened)?))
    }

    /// Every element set to `value`, cast to `dtype`.
    pub fn filled(dtype: Dtype, shape: &Shape, value: f64) -> Self {
        let dim = IxDyn(shape.as_slice());
        match dtype {
            Dtype::F32 => TensorValue::F32(ArrayD::from_elem(dim, value as f32)),
            Dtype::F64 => TensorValue::F64(ArrayD::from_elem(dim, value)),
            Dtype::Int => TensorValue::Int(ArrayD::from_elem(dim, value as i64)),
        }
    }

    pub fn zeros(dtype: Dtype, shape: &Shape) -> Self {
        TensorValue::filled(dtype, shape, 0.0)
    }

    pub fn ones(dtype: Dtype, shape: &Shape) -> Self {
        TensorValue::filled(dtype, shape, 1.0)
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            TensorValue::F32(_) => Dtype::F32,
            TensorValue::F64(_) => Dtype::F64,
            TensorValue::Int(_) => Dtype::Int,
        }
    }

    pub fn shape(&self) -> Shape {
        let dims = match self {
            TensorValue::F32(a) => a.shape(),
            TensorValue::F64(a) => a.shape(),
            TensorValue::Int(a) => a.shape(),
        };
        Shape::from(dims)
    }

    pub fn len(&self) -> usize {
        match self {
            TensorValue::F32(a) => a.len(),
            TensorValue::F64(a) => a.len(),
            TensorValue::Int(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reshape(&self, shape: &Shape) -> Result<TensorValue> {
        Ok(match self {
            TensorValue::F32(a) => TensorValue::F32(reshape_array(a, shape)?),
            TensorValue::F64(a) => TensorValue::F64(reshape_array(a, shape)?),
            TensorValue::Int(a) => TensorValue::Int(reshape_array(a, shape)?),
        })
    }

    /// Elements in row-major order, widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TensorValue::F32(a) => a.iter().map(|&v| v as f64).collect(),
            TensorValue::F64(a) => a.iter().cloned().collect(),
            TensorValue::Int(a) => a.iter().map(|&v| v as f64).collect(),
        }
    }

    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            TensorValue::Int(a) => Some(a.iter().cloned().collect()),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            TensorValue::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            TensorValue::F64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&ArrayD<i64>> {
        match self {
            TensorValue::Int(a) => Some(a),
            _ => None,
        }
    }
}

fn from_vec<A>(shape: Shape, data: Vec<A>) -> Result<ArrayD<A>> {
    let got = vec![data.len()];
    ArrayD::from_shape_vec(IxDyn(shape.as_slice()), data).map_err(|_| OpError::ShapeMismatch {
        expected: shape.to_vec(),
        got,
    })
}

/// Apply a float kernel to either float variant, rejecting `Int`.
#[macro_export]
macro_rules! map_float {
    ($value:expr, $op:expr, |$array:ident| $body:expr) => {
        match $value {
            $crate::tensor_grad::tensor::TensorValue::F32($array) => {
                Ok($crate::tensor_grad::tensor::TensorValue::F32($body))
            }
            $crate::tensor_grad::tensor::TensorValue::F64($array) => {
                Ok($crate::tensor_grad::tensor::TensorValue::F64($body))
            }
            $crate::tensor_grad::tensor::TensorValue::Int(_) => Err(
                $crate::tensor_grad::error::OpError::TypeError {
                    op: $op.to_string(),
                    dtype: $crate::tensor_grad::dtype::Dtype::Int,
                },
            ),
        }
    };
}

/// Apply a kernel written once for every variant.
#[macro_export]
macro_rules! map_any {
    ($value:expr, |$array:ident| $body:expr) => {
        match $value {
            $crate::tensor_grad::tensor::TensorValue::F32($array) => {
                $crate::tensor_grad::tensor::TensorValue::F32($body)
            }
            $crate::tensor_grad::tensor::TensorValue::F64($array) => {
                $crate::tensor_grad::tensor::TensorValue::F64($body)
            }
            $crate::tensor_grad::tensor::TensorValue::Int($array) => {
                $crate::tensor_grad::tensor::TensorValue::Int($body)
            }
        }
    };
}

fn padding(depth: usize) -> String {
    std::iter::repeat(" ").take(depth).collect()
}

fn write_nested<A: fmt::Display>(f: &mut fmt::Formatter<'_>, array: &ArrayD<A>) -> fmt::Result {
    let dims = array.shape().to_vec();
    if dims.is_empty() {
        return match array.iter().next() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "[]"),
        };
    }
    let depth = dims.len();
    let mut index = vec![0usize; depth];
    for _ in 0..depth - 1 {
        write!(f, "[")?;
    }
    let mut first_in_row = true;
    for element in array.iter() {
        if first_in_row {
            write!(f, "[")?;
            first_in_row = false;
        } else {
            write!(f, ", ")?;
        }
        write!(f, "{}", element)?;
        let mut axis = depth;
        let mut closes = 0;
        while axis > 0 {
            axis -= 1;
            index[axis] += 1;
            if index[axis] < dims[axis] {
                break;
            }
            index[axis] = 0;
            closes += 1;
        }
        if closes > 0 {
            write!(f, "{}", "]".repeat(closes))?;
            if closes < depth {
                write!(f, ",\n{}{}", padding(depth - closes), "[".repeat(closes - 1))?;
                first_in_row = true;
            }
        }
    }
    Ok(())
}

impl fmt::Display for TensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorValue::F32(a) => write_nested(f, a),
            TensorValue::F64(a) => write_nested(f, a),
            TensorValue::Int(a) => write_nested(f, a),
        }
    }
}
