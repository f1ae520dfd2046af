use std::{borrow::Cow, hash::Hasher, ops::Add};

use ndarray::{ArrayD, Axis, Slice};
use num::Zero;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, TensorOperation},
    },
};

fn check_repeats(repeats: usize) -> Result<()> {
    if repeats == 0 {
        return Err(OpError::InvalidParameter(
            "repeats must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn repeat_array<A: Clone>(array: &ArrayD<A>, axis: usize, repeats: usize) -> ArrayD<A> {
    let indices: Vec<usize> = (0..array.shape()[axis])
        .flat_map(|i| std::iter::repeat(i).take(repeats))
        .collect();
    array.select(Axis(axis), &indices)
}

fn repeat_grad_array<A>(array: &ArrayD<A>, axis: usize, repeats: usize) -> Result<ArrayD<A>>
where
    A: Clone + Zero + Add<Output = A>,
{
    if repeats == 1 {
        return Ok(array.to_owned());
    }
    let blocks = array.shape()[axis] / repeats;
    let sums: Vec<ArrayD<A>> = (0..blocks)
        .map(|b| {
            array
                .slice_axis(Axis(axis), Slice::from(b * repeats..(b + 1) * repeats))
                .sum_axis(Axis(axis))
        })
        .collect();
    if let [single] = sums.as_slice() {
        return Ok(single.clone().insert_axis(Axis(axis)));
    }
    let views: Vec<_> = sums.iter().map(|s| s.view()).collect();
    ndarray::stack(Axis(axis), &views).map_err(|_| OpError::ShapeMismatch {
        expected: vec![blocks],
        got: array.shape().to_vec(),
    })
}

/// Duplicate each slice along `axis` `repeats` times in place, so
/// `[a, b]` becomes `[a, a, b, b]` for two repeats.
#[derive(Clone, Debug)]
pub(crate) struct Repeat {
    axis: usize,
    repeats: usize,
}

/// Sum each run of `repeats` consecutive slices along `axis`.
#[derive(Clone, Debug)]
pub(crate) struct RepeatGrad {
    axis: usize,
    repeats: usize,
}

impl TensorOperation for Repeat {
    fn to_string(&self) -> String {
        format!("Repeat{{axis={}, repeats={}}}", self.axis, self.repeats)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Repeat");
        state.write_usize(self.axis);
        state.write_usize(self.repeats);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        check_repeats(self.repeats)?;
        let shape = input_shapes[0];
        if shape.is_scalar() {
            return Err(OpError::unsupported(
                self.to_string(),
                "cannot repeat a scalar along an axis",
            ));
        }
        shape.check_axis(self.axis)?;
        let mut dims = shape.to_vec();
        dims[self.axis] *= self.repeats;
        Ok(Shape::from(dims))
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_shape(&[&inputs[0].shape()])?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let (axis, repeats) = (self.axis, self.repeats);
        Ok(match inputs[0].as_ref() {
            TensorValue::F32(a) => TensorValue::F32(repeat_array(a, axis, repeats)),
            TensorValue::F64(a) => TensorValue::F64(repeat_array(a, axis, repeats)),
            TensorValue::Int(a) => TensorValue::Int(repeat_array(a, axis, repeats)),
        })
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 0
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        _inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let grad = graph.apply(
            RepeatGrad {
                axis: self.axis,
                repeats: self.repeats,
            },
            &[upstream],
        )?;
        Ok(vec![Some(grad)])
    }
}

impl TensorOperation for RepeatGrad {
    fn to_string(&self) -> String {
        format!("RepeatGrad{{axis={}, repeats={}}}", self.axis, self.repeats)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"RepeatGrad");
        state.write_usize(self.axis);
        state.write_usize(self.repeats);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        check_repeats(self.repeats)?;
        let shape = input_shapes[0];
        shape.check_axis(self.axis)?;
        if shape[self.axis] % self.repeats != 0 {
            return Err(OpError::InvalidParameter(format!(
                "extent {} along axis {} is not a multiple of {}",
                shape[self.axis], self.axis, self.repeats
            )));
        }
        let mut dims = shape.to_vec();
        dims[self.axis] /= self.repeats;
        Ok(Shape::from(dims))
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_shape(&[&inputs[0].shape()])?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let (axis, repeats) = (self.axis, self.repeats);
        Ok(match inputs[0].as_ref() {
            TensorValue::F32(a) => TensorValue::F32(repeat_grad_array(a, axis, repeats)?),
            TensorValue::F64(a) => TensorValue::F64(repeat_grad_array(a, axis, repeats)?),
            TensorValue::Int(a) => TensorValue::Int(repeat_grad_array(a, axis, repeats)?),
        })
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 0
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        _inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        Ok(vec![Some(repeat(graph, upstream, self.axis, self.repeats)?)])
    }
}

/// Repeat each slice of `x` along `axis` `repeats` times.
pub fn repeat(graph: &mut Graph, x: NodeId, axis: usize, repeats: usize) -> Result<NodeId> {
    check_repeats(repeats)?;
    graph.apply(Repeat { axis, repeats }, &[x])
}
