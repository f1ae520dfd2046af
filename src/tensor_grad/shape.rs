use std::{fmt, ops::Index};

use itertools::Itertools;

use super::error::{OpError, Result};

/// Ordered list of axis extents. An empty shape is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// Number of elements; 1 for a scalar.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.clone()
    }

    pub(crate) fn check_axis(&self, axis: usize) -> Result<()> {
        if axis >= self.dims() {
            return Err(OpError::AxisOutOfRange {
                axis,
                dims: self.dims(),
            });
        }
        Ok(())
    }

    /// Shape with `axis` removed, regardless of its extent.
    pub fn remove_axis(&self, axis: usize) -> Result<Shape> {
        self.check_axis(axis)?;
        let mut dims = self.0.clone();
        dims.remove(axis);
        Ok(Shape(dims))
    }

    /// Insert a size-1 axis at each position in `axes`, lowest first.
    pub fn insert_axes(&self, axes: &[usize]) -> Result<Shape> {
        let mut dims = self.0.clone();
        for &axis in axes.iter().sorted() {
            if axis > dims.len() {
                return Err(OpError::AxisOutOfRange {
                    axis,
                    dims: dims.len(),
                });
            }
            dims.insert(axis, 1);
        }
        Ok(Shape(dims))
    }

    /// `[n, self...]`
    pub fn batched(&self, n: usize) -> Shape {
        let mut dims = Vec::with_capacity(self.dims() + 1);
        dims.push(n);
        dims.extend_from_slice(&self.0);
        Shape(dims)
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.0[axis]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.iter().join(", "))
    }
}

/// Remove `axis` if its extent is 1, otherwise return the shape unchanged.
pub fn squeeze(shape: &Shape, axis: usize) -> Result<Shape> {
    shape.check_axis(axis)?;
    if shape[axis] != 1 {
        return Ok(shape.clone());
    }
    shape.remove_axis(axis)
}

pub fn unsqueeze(shape: &Shape, axis: usize) -> Result<Shape> {
    shape.insert_axes(&[axis])
}

/// Number of size-1 axes strictly before `axis`.
pub fn count_ones_before(shape: &Shape, axis: usize) -> usize {
    shape.as_slice().iter().take(axis).filter(|&&d| d == 1).count()
}

/// Drop every size-1 axis except `keep`, returning the new shape together
/// with the position `keep` ends up at.
pub fn squeeze_all_but(shape: &Shape, keep: Option<usize>) -> Result<(Shape, Option<usize>)> {
    if let Some(axis) = keep {
        shape.check_axis(axis)?;
    }
    let dims = shape
        .as_slice()
        .iter()
        .enumerate()
        .filter(|&(i, &d)| Some(i) == keep || d != 1)
        .map(|(_, &d)| d)
        .collect();
    let renumbered = keep.map(|axis| axis - count_ones_before(shape, axis));
    Ok((Shape(dims), renumbered))
}

/// Trailing-aligned broadcast of two shapes.
pub fn broadcast_shapes(op: &str, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let dims = lhs.dims().max(rhs.dims());
    let extent = |shape: &Shape, i: usize| {
        let offset = dims - shape.dims();
        if i < offset {
            1
        } else {
            shape[i - offset]
        }
    };
    let mut out = Vec::with_capacity(dims);
    for i in 0..dims {
        let (l, r) = (extent(lhs, i), extent(rhs, i));
        let d = match (l, r) {
            (l, r) if l == r => l,
            (1, r) => r,
            (l, 1) => l,
            _ => {
                return Err(OpError::IncompatibleShapes {
                    op: op.to_string(),
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                })
            }
        };
        out.push(d);
    }
    Ok(Shape(out))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn squeeze_only_removes_unit_axes() {
        let shape = Shape::from([3, 1, 4]);
        assert_eq!(squeeze(&shape, 1).unwrap(), Shape::from([3, 4]));
        assert_eq!(squeeze(&shape, 0).unwrap(), shape);
        assert_eq!(
            squeeze(&shape, 3),
            Err(OpError::AxisOutOfRange { axis: 3, dims: 3 })
        );
    }

    #[test]
    fn unsqueeze_allows_trailing_axis() {
        let shape = Shape::from([3, 4]);
        assert_eq!(unsqueeze(&shape, 2).unwrap(), Shape::from([3, 4, 1]));
        assert_eq!(unsqueeze(&shape, 0).unwrap(), Shape::from([1, 3, 4]));
        assert!(unsqueeze(&shape, 3).is_err());
    }

    #[test]
    fn squeeze_all_but_renumbers_kept_axis() {
        let shape = Shape::from([1, 4, 1, 1, 5, 1]);
        let (squeezed, axis) = squeeze_all_but(&shape, Some(3)).unwrap();
        assert_eq!(squeezed, Shape::from([4, 1, 5]));
        assert_eq!(axis, Some(1));

        let (squeezed, axis) = squeeze_all_but(&shape, None).unwrap();
        assert_eq!(squeezed, Shape::from([4, 5]));
        assert_eq!(axis, None);

        let (squeezed, axis) = squeeze_all_but(&Shape::from([1, 1]), Some(0)).unwrap();
        assert_eq!(squeezed, Shape::from([1]));
        assert_eq!(axis, Some(0));
    }

    #[test]
    fn count_ones() {
        let shape = Shape::from([1, 2, 1, 3]);
        assert_eq!(count_ones_before(&shape, 0), 0);
        assert_eq!(count_ones_before(&shape, 3), 2);
    }

    #[test]
    fn broadcast_rules() {
        let out = broadcast_shapes("Add", &Shape::from([5, 1, 3]), &Shape::from([4, 1])).unwrap();
        assert_eq!(out, Shape::from([5, 4, 3]));
        assert!(broadcast_shapes("Add", &Shape::from([2, 3]), &Shape::from([4])).is_err());
        assert_eq!(
            broadcast_shapes("Add", &Shape::scalar(), &Shape::from([2])).unwrap(),
            Shape::from([2])
        );
    }

    #[test]
    fn insert_axes_in_order() {
        let shape = Shape::from([3, 4]);
        assert_eq!(shape.insert_axes(&[2, 0]).unwrap(), Shape::from([1, 3, 1, 4]));
        assert_eq!(shape.batched(7), Shape::from([7, 3, 4]));
        assert_eq!(Shape::scalar().size(), 1);
    }
}
