use std::{borrow::Cow, hash::Hasher, ops::Add};

use itertools::Itertools;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use num::Zero;

use crate::{
    map_any,
    tensor_grad::{
        error::{OpError, Result},
        shape::broadcast_shapes,
        tensor::reshape_array,
        Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, TensorOperation},
    },
};

/// Axes inserted into each operand of a binary operator before the usual
/// trailing-aligned broadcasting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BroadcastAxes {
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

impl BroadcastAxes {
    pub fn none() -> Self {
        BroadcastAxes::default()
    }

    /// Broadcast the right operand over leading axis 0, as a batch.
    pub fn batch_right() -> Self {
        BroadcastAxes {
            left: Vec::new(),
            right: vec![0],
        }
    }

    pub(crate) fn write_hash(&self, state: &mut dyn Hasher) {
        state.write_usize(self.left.len());
        self.left.iter().for_each(|&a| state.write_usize(a));
        state.write_usize(self.right.len());
        self.right.iter().for_each(|&a| state.write_usize(a));
    }
}

pub(crate) fn insert_axes_view<'a, A>(mut view: ArrayViewD<'a, A>, axes: &[usize]) -> ArrayViewD<'a, A> {
    for &axis in axes.iter().sorted() {
        view = view.insert_axis(Axis(axis));
    }
    view
}

fn sum_to_array<A>(array: &ArrayD<A>, target: &Shape, axes: &[usize]) -> Result<ArrayD<A>>
where
    A: Clone + Zero + Add<Output = A>,
{
    let expanded = target.insert_axes(axes)?;
    let from = Shape::from(array.shape());
    if broadcast_shapes("SumTo", &expanded, &from)? != from {
        return Err(OpError::IncompatibleShapes {
            op: "SumTo".to_string(),
            lhs: from.to_vec(),
            rhs: target.to_vec(),
        });
    }
    let mut out = array.to_owned();
    for _ in 0..from.dims() - expanded.dims() {
        out = out.sum_axis(Axis(0));
    }
    for (axis, &extent) in expanded.as_slice().iter().enumerate() {
        if extent == 1 && out.shape()[axis] != 1 {
            out = out.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    reshape_array(&out, target)
}

fn broadcast_to_array<A: Clone>(array: &ArrayD<A>, target: &Shape, axes: &[usize]) -> Result<ArrayD<A>> {
    let view = insert_axes_view(array.view(), axes);
    let broadcast = view
        .broadcast(IxDyn(target.as_slice()))
        .ok_or_else(|| OpError::IncompatibleShapes {
            op: "BroadcastTo".to_string(),
            lhs: array.shape().to_vec(),
            rhs: target.to_vec(),
        })?;
    Ok(broadcast.to_owned())
}

/// Sum a broadcast result back down to `target`. `axes` are the axes that
/// were inserted into the original operand.
#[derive(Clone, Debug)]
pub(crate) struct SumTo {
    target: Shape,
    axes: Vec<usize>,
}

/// Inverse of [`SumTo`]: insert `axes`, then broadcast up to `target`.
#[derive(Clone, Debug)]
pub(crate) struct BroadcastTo {
    target: Shape,
    axes: Vec<usize>,
}

impl TensorOperation for SumTo {
    fn to_string(&self) -> String {
        format!("SumTo{{shape={}, axes={:?}}}", self.target, self.axes)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"SumTo");
        self.target.as_slice().iter().for_each(|&d| state.write_usize(d));
        state.write_u8(0xff);
        self.axes.iter().for_each(|&a| state.write_usize(a));
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        let expanded = self.target.insert_axes(&self.axes)?;
        if broadcast_shapes("SumTo", &expanded, input_shapes[0])? != *input_shapes[0] {
            return Err(OpError::IncompatibleShapes {
                op: self.to_string(),
                lhs: input_shapes[0].to_vec(),
                rhs: self.target.to_vec(),
            });
        }
        Ok(self.target.clone())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        Ok(match inputs[0].as_ref() {
            TensorValue::F32(a) => TensorValue::F32(sum_to_array(a, &self.target, &self.axes)?),
            TensorValue::F64(a) => TensorValue::F64(sum_to_array(a, &self.target, &self.axes)?),
            TensorValue::Int(a) => TensorValue::Int(sum_to_array(a, &self.target, &self.axes)?),
        })
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 0
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let from = graph.shape(inputs[0])?;
        Ok(vec![Some(broadcast_to(graph, upstream, from, &self.axes)?)])
    }
}

impl TensorOperation for BroadcastTo {
    fn to_string(&self) -> String {
        format!("BroadcastTo{{shape={}, axes={:?}}}", self.target, self.axes)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"BroadcastTo");
        self.target.as_slice().iter().for_each(|&d| state.write_usize(d));
        state.write_u8(0xff);
        self.axes.iter().for_each(|&a| state.write_usize(a));
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        let expanded = input_shapes[0].insert_axes(&self.axes)?;
        if broadcast_shapes("BroadcastTo", &expanded, &self.target)? != self.target {
            return Err(OpError::IncompatibleShapes {
                op: self.to_string(),
                lhs: input_shapes[0].to_vec(),
                rhs: self.target.to_vec(),
            });
        }
        Ok(self.target.clone())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let (target, axes) = (&self.target, &self.axes);
        let value = inputs[0].as_ref();
        Ok(map_any!(value, |a| broadcast_to_array(a, target, axes)?))
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 0
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let from = graph.shape(inputs[0])?;
        Ok(vec![Some(sum_to(graph, upstream, from, &self.axes)?)])
    }
}

/// Reduce `x` to `target`; returns `x` itself when nothing needs summing.
pub fn sum_to(graph: &mut Graph, x: NodeId, target: Shape, axes: &[usize]) -> Result<NodeId> {
    if axes.is_empty() && graph.shape(x)? == target {
        return Ok(x);
    }
    graph.apply(
        SumTo {
            target,
            axes: axes.to_vec(),
        },
        &[x],
    )
}

pub fn broadcast_to(graph: &mut Graph, x: NodeId, target: Shape, axes: &[usize]) -> Result<NodeId> {
    if axes.is_empty() && graph.shape(x)? == target {
        return Ok(x);
    }
    graph.apply(
        BroadcastTo {
            target,
            axes: axes.to_vec(),
        },
        &[x],
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sum_to_collapses_broadcast_axes() {
        let mut graph = Graph::new();
        let x = graph.variable(
            TensorValue::from_f64([2, 3], vec![1., 2., 3., 4., 5., 6.]).unwrap(),
            "x",
        );
        let rows = sum_to(&mut graph, x, Shape::from([3]), &[]).unwrap();
        let cols = sum_to(&mut graph, x, Shape::from([2]), &[1]).unwrap();
        let out = graph.evaluate(&[rows, cols]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![5., 7., 9.]);
        assert_eq!(out[1].to_f64_vec(), vec![6., 15.]);
    }

    #[test]
    fn broadcast_to_repeats_operand() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([2], vec![1., 2.]).unwrap(), "x");
        let y = broadcast_to(&mut graph, x, Shape::from([2, 3]), &[1]).unwrap();
        let out = graph.evaluate(&[y]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![1., 1., 1., 2., 2., 2.]);
        assert!(broadcast_to(&mut graph, x, Shape::from([3, 3]), &[1]).is_err());
    }
}
