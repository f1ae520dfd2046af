use std::{borrow::Cow, cmp::Ordering, hash::Hasher};

use ndarray::{ArrayD, Axis, Zip};

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, check_non_empty, TensorOperation},
    },
};

/// Indices that would sort `x` ascending along `axis`. Equal elements keep
/// their original order; floats use IEEE total ordering.
#[derive(Clone, Debug)]
pub(crate) struct Argsort {
    axis: usize,
}

fn argsort_lanes<A, C>(array: &ArrayD<A>, axis: usize, cmp: C) -> ArrayD<i64>
where
    A: Copy,
    C: Fn(&A, &A) -> Ordering,
{
    let mut out = ArrayD::<i64>::zeros(array.raw_dim());
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(array.lanes(Axis(axis)))
        .for_each(|mut out_lane, lane| {
            let mut order: Vec<usize> = (0..lane.len()).collect();
            order.sort_by(|&a, &b| cmp(&lane[a], &lane[b]));
            for (slot, index) in out_lane.iter_mut().zip(order) {
                *slot = index as i64;
            }
        });
    out
}

impl TensorOperation for Argsort {
    fn to_string(&self) -> String {
        format!("Argsort{{axis={}}}", self.axis)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Argsort");
        state.write_usize(self.axis);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        input_shapes[0].check_axis(self.axis)?;
        Ok(input_shapes[0].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        Ok(Dtype::Int)
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        inputs[0].shape().check_axis(self.axis)?;
        check_non_empty(self, inputs[0])
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let axis = self.axis;
        let order = match inputs[0].as_ref() {
            TensorValue::F32(a) => argsort_lanes(a, axis, |x, y| x.total_cmp(y)),
            TensorValue::F64(a) => argsort_lanes(a, axis, |x, y| x.total_cmp(y)),
            TensorValue::Int(a) => argsort_lanes(a, axis, |x, y| x.cmp(y)),
        };
        Ok(TensorValue::Int(order))
    }

    fn build_gradient(
        &self,
        _graph: &mut Graph,
        _inputs: &[NodeId],
        _output: NodeId,
        _upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        Err(OpError::unsupported(
            self.to_string(),
            "sort permutations are not differentiable",
        ))
    }
}

pub fn argsort(graph: &mut Graph, x: NodeId, axis: usize) -> Result<NodeId> {
    graph.apply(Argsort { axis }, &[x])
}
