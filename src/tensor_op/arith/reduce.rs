//! Axis folds built from slice and arithmetic nodes.
//!
//! A fold takes slice 0 along the axis as the accumulator and combines each
//! following slice into it from the left, so non-commutative combinations
//! (subtraction, division) read `((x0 - x1) - x2) - ...`. Gradients come for
//! free from the nodes the fold is made of.

use log::debug;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        shape::{count_ones_before, squeeze_all_but},
        Shape,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        util::{
            reshape::{reshape, squeeze},
            slice::slice,
        },
    },
};

use super::binary::{add, broadcast_binary, div, BinaryKind};
use super::extremum::{max, min};
use super::unary::{exp, log};
use super::broadcast::BroadcastAxes;

/// Fold `x` along `axis` with `combine`.
///
/// With `keepdims` every other axis is kept as it was, including size-1
/// axes; without it the result has all size-1 axes removed.
pub fn reduce_along(
    graph: &mut Graph,
    x: NodeId,
    axis: usize,
    keepdims: bool,
    combine: BinaryKind,
) -> Result<NodeId> {
    fold_along(graph, x, axis, keepdims, combine.name(), |graph, acc, next| {
        broadcast_binary(graph, combine, acc, next, BroadcastAxes::none())
    })
}

fn fold_along<F>(
    graph: &mut Graph,
    x: NodeId,
    axis: usize,
    keepdims: bool,
    label: &str,
    mut combine: F,
) -> Result<NodeId>
where
    F: FnMut(&mut Graph, NodeId, NodeId) -> Result<NodeId>,
{
    let input_shape = graph.shape(x)?;
    if input_shape.is_scalar() {
        return Ok(x);
    }
    input_shape.check_axis(axis)?;

    let target = input_shape.remove_axis(axis)?;
    if keepdims && input_shape[axis] == 1 {
        return reshape(graph, x, target);
    }

    let (squeezed_shape, renumbered) = squeeze_all_but(&input_shape, Some(axis))?;
    let renumbered = renumbered.unwrap_or(axis - count_ones_before(&input_shape, axis));
    let squeezed = reshape(graph, x, squeezed_shape.clone())?;

    let extent = squeezed_shape[renumbered];
    if extent == 1 {
        return squeeze(graph, squeezed, renumbered);
    }

    debug!(
        "{} fold over axis {} of {} ({} slices)",
        label, axis, input_shape, extent
    );
    let mut acc = slice(graph, squeezed, renumbered, 0)?;
    for i in 1..extent {
        let next = slice(graph, squeezed, renumbered, i)?;
        acc = combine(graph, acc, next)?;
    }

    if keepdims {
        reshape(graph, acc, target)
    } else {
        Ok(acc)
    }
}

pub fn reduce_add(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    reduce_along(graph, x, axis, keepdims, BinaryKind::Add)
}

pub fn reduce_sub(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    reduce_along(graph, x, axis, keepdims, BinaryKind::Sub)
}

pub fn reduce_prod(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    reduce_along(graph, x, axis, keepdims, BinaryKind::Mul)
}

pub fn reduce_div(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    reduce_along(graph, x, axis, keepdims, BinaryKind::Div)
}

/// Largest element along `axis`; ties keep the earlier slice.
pub fn reduce_max(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    fold_along(graph, x, axis, keepdims, "Max", max)
}

pub fn reduce_min(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    fold_along(graph, x, axis, keepdims, "Min", min)
}

/// `log(sum(exp(x)))` along `axis`, shifted by the maximum so large
/// logits do not overflow. Keeps every other axis.
pub fn log_sum_exp(graph: &mut Graph, x: NodeId, axis: usize) -> Result<NodeId> {
    let dtype = graph.dtype(x)?;
    if !dtype.is_float() {
        return Err(OpError::type_error("LogSumExp", dtype));
    }
    let shape = graph.shape(x)?;
    if shape.is_scalar() {
        return Ok(x);
    }
    shape.check_axis(axis)?;
    let peak = reduce_max(graph, x, axis, true)?;
    let axes = BroadcastAxes {
        left: Vec::new(),
        right: vec![axis],
    };
    let shifted = broadcast_binary(graph, BinaryKind::Sub, x, peak, axes)?;
    let exponent = exp(graph, shifted)?;
    let total = reduce_add(graph, exponent, axis, true)?;
    let ln = log(graph, total)?;
    add(graph, peak, ln)
}

/// Sum along `axis` divided by that axis' extent in the input.
pub fn reduce_mean(graph: &mut Graph, x: NodeId, axis: usize, keepdims: bool) -> Result<NodeId> {
    let dtype = graph.dtype(x)?;
    if !dtype.is_float() {
        return Err(OpError::type_error("ReduceMean", dtype));
    }
    let input_shape = graph.shape(x)?;
    if input_shape.is_scalar() {
        return Ok(x);
    }
    input_shape.check_axis(axis)?;
    let extent = input_shape[axis] as f64;

    let sum = reduce_add(graph, x, axis, keepdims)?;
    let sum_shape = graph.shape(sum)?;
    let count = graph.scalar_like(sum, extent)?;
    if sum_shape.is_scalar() {
        let lifted = reshape(graph, sum, Shape::from([1]))?;
        let mean = div(graph, lifted, count)?;
        return reshape(graph, mean, Shape::scalar());
    }
    div(graph, sum, count)
}
