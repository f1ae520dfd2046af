use std::{borrow::Cow, hash::Hasher};

use ndarray::{ArrayD, Axis, IxDyn};
use num::Zero;

use crate::{
    map_any,
    tensor_grad::{
        error::{OpError, Result},
        Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, TensorOperation},
    },
};

/// Select position `index` along `axis`, removing that axis.
#[derive(Clone, Debug)]
pub(crate) struct Slice {
    axis: usize,
    index: usize,
}

/// Write the input into zeros at `index` along a new `axis` of `extent`.
#[derive(Clone, Debug)]
pub(crate) struct Unslice {
    axis: usize,
    index: usize,
    extent: usize,
}

impl TensorOperation for Slice {
    fn to_string(&self) -> String {
        format!("Slice{{axis={}, index={}}}", self.axis, self.index)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Slice");
        state.write_usize(self.axis);
        state.write_usize(self.index);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        let shape = input_shapes[0];
        shape.check_axis(self.axis)?;
        if self.index >= shape[self.axis] {
            return Err(OpError::IndexOutOfRange {
                index: self.index as i64,
                axis: self.axis,
                extent: shape[self.axis],
            });
        }
        shape.remove_axis(self.axis)
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_shape(&[&inputs[0].shape()])?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let (axis, index) = (Axis(self.axis), self.index);
        Ok(map_any!(inputs[0].as_ref(), |a| a.index_axis(axis, index).to_owned()))
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
        let extent = graph.shape(inputs[0])?[self.axis];
        let grad = graph.apply(
            Unslice {
                axis: self.axis,
                index: self.index,
                extent,
            },
            &[upstream],
        )?;
        Ok(vec![Some(grad)])
    }
}

fn unslice_array<A: Clone + Zero>(array: &ArrayD<A>, out: &Shape, axis: usize, index: usize) -> ArrayD<A> {
    let mut result = ArrayD::zeros(IxDyn(out.as_slice()));
    result.index_axis_mut(Axis(axis), index).assign(array);
    result
}

impl TensorOperation for Unslice {
    fn to_string(&self) -> String {
        format!(
            "Unslice{{axis={}, index={}, extent={}}}",
            self.axis, self.index, self.extent
        )
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Unslice");
        state.write_usize(self.axis);
        state.write_usize(self.index);
        state.write_usize(self.extent);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        if self.index >= self.extent {
            return Err(OpError::IndexOutOfRange {
                index: self.index as i64,
                axis: self.axis,
                extent: self.extent,
            });
        }
        let mut dims = input_shapes[0].insert_axes(&[self.axis])?.to_vec();
        dims[self.axis] = self.extent;
        Ok(Shape::from(dims))
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let value = inputs[0].as_ref();
        let out = self.output_shape(&[&value.shape()])?;
        let (axis, index) = (self.axis, self.index);
        Ok(map_any!(value, |a| unslice_array(a, &out, axis, index)))
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
        Ok(vec![Some(slice(graph, upstream, self.axis, self.index)?)])
    }
}

pub fn slice(graph: &mut Graph, x: NodeId, axis: usize, index: usize) -> Result<NodeId> {
    graph.apply(Slice { axis, index }, &[x])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slice_and_gradient() {
        let mut graph = Graph::new();
        let x = graph.variable(
            TensorValue::from_f64([2, 3], vec![1., 2., 3., 4., 5., 6.]).unwrap(),
            "x",
        );
        let col = slice(&mut graph, x, 1, 2).unwrap();
        assert_eq!(graph.shape(col).unwrap(), Shape::from([2]));
        let g = graph.grad(col, &[x]).unwrap();
        let out = graph.evaluate(&[col, g[0]]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![3., 6.]);
        assert_eq!(out[1].to_f64_vec(), vec![0., 0., 1., 0., 0., 1.]);
        assert!(matches!(
            slice(&mut graph, x, 0, 2),
            Err(OpError::IndexOutOfRange { .. })
        ));
    }
}
