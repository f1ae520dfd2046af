use std::{borrow::Cow, hash::Hasher, ops::AddAssign};

use ndarray::{ArrayD, Dimension, IxDyn};
use num::Zero;

use crate::{
    map_any,
    tensor_grad::{
        error::{OpError, Result},
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, check_same_dtype, TensorOperation},
    },
};

/// `out[i][j][k] = x[i][indices[i][j][k]][k]` for `axis = 1`, and likewise
/// for any other axis.
#[derive(Clone, Debug)]
pub(crate) struct Gather {
    axis: usize,
}

fn shape_mismatch(expected: &Shape, got: &Shape) -> OpError {
    OpError::ShapeMismatch {
        expected: expected.to_vec(),
        got: got.to_vec(),
    }
}

fn check_gather_shapes(axis: usize, x: &Shape, indices: &Shape) -> Result<()> {
    x.check_axis(axis)?;
    if x.dims() != indices.dims() {
        return Err(shape_mismatch(x, indices));
    }
    for d in 0..x.dims() {
        if d != axis && x[d] != indices[d] {
            return Err(shape_mismatch(x, indices));
        }
    }
    Ok(())
}

fn check_indices(indices: &ArrayD<i64>, axis: usize, extent: usize) -> Result<()> {
    match indices.iter().find(|&&i| i < 0 || i as usize >= extent) {
        Some(&index) => Err(OpError::IndexOutOfRange {
            index,
            axis,
            extent,
        }),
        None => Ok(()),
    }
}

fn gather_array<A: Clone>(x: &ArrayD<A>, indices: &ArrayD<i64>, axis: usize) -> ArrayD<A> {
    ArrayD::from_shape_fn(indices.raw_dim(), |position: IxDyn| {
        let mut source = position.slice().to_vec();
        source[axis] = indices[position.slice()] as usize;
        x[source.as_slice()].clone()
    })
}

fn scatter_add<A>(shape: &Shape, indices: &ArrayD<i64>, g: &ArrayD<A>, axis: usize) -> ArrayD<A>
where
    A: Clone + Zero + AddAssign,
{
    let mut out = ArrayD::<A>::zeros(IxDyn(shape.as_slice()));
    for ((position, &index), value) in indices.indexed_iter().zip(g.iter()) {
        let mut target = position.slice().to_vec();
        target[axis] = index as usize;
        out[target.as_slice()] += value.clone();
    }
    out
}

impl TensorOperation for Gather {
    fn to_string(&self) -> String {
        format!("Gather{{axis={}}}", self.axis)
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Gather");
        state.write_usize(self.axis);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        check_gather_shapes(self.axis, input_shapes[0], input_shapes[1])?;
        Ok(input_shapes[1].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        if input_dtypes[1] != Dtype::Int {
            return Err(OpError::type_error(self.to_string(), input_dtypes[1]));
        }
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype(), inputs[1].dtype()])?;
        let x_shape = inputs[0].shape();
        check_gather_shapes(self.axis, &x_shape, &inputs[1].shape())?;
        let indices = inputs[1]
            .as_int()
            .ok_or_else(|| OpError::type_error(self.to_string(), inputs[1].dtype()))?;
        check_indices(indices, self.axis, x_shape[self.axis])
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let indices = inputs[1]
            .as_int()
            .ok_or_else(|| OpError::type_error(self.to_string(), inputs[1].dtype()))?;
        let axis = self.axis;
        Ok(map_any!(inputs[0].as_ref(), |a| gather_array(a, indices, axis)))
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
        let grad = graph.apply(GatherGrad { axis: self.axis }, &[inputs[0], inputs[1], upstream])?;
        Ok(vec![Some(grad), None])
    }
}

/// Scatter-add of `g` into zeros shaped like `x`, for inputs
/// `(x, indices, g)`.
#[derive(Clone, Debug)]
pub(crate) struct GatherGrad {
    axis: usize,
}

impl TensorOperation for GatherGrad {
    fn to_string(&self) -> String {
        format!("GatherGrad{{axis={}}}", self.axis)
    }

    fn arity(&self) -> usize {
        3
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"GatherGrad");
        state.write_usize(self.axis);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        check_gather_shapes(self.axis, input_shapes[0], input_shapes[1])?;
        if input_shapes[1] != input_shapes[2] {
            return Err(shape_mismatch(input_shapes[1], input_shapes[2]));
        }
        Ok(input_shapes[0].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        if input_dtypes[1] != Dtype::Int {
            return Err(OpError::type_error(self.to_string(), input_dtypes[1]));
        }
        check_same_dtype(input_dtypes[0], input_dtypes[2])?;
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype(), inputs[1].dtype(), inputs[2].dtype()])?;
        let shapes = [inputs[0].shape(), inputs[1].shape(), inputs[2].shape()];
        self.output_shape(&[&shapes[0], &shapes[1], &shapes[2]])?;
        let indices = inputs[1]
            .as_int()
            .ok_or_else(|| OpError::type_error(self.to_string(), inputs[1].dtype()))?;
        check_indices(indices, self.axis, shapes[0][self.axis])
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let shape = inputs[0].shape();
        let indices = inputs[1]
            .as_int()
            .ok_or_else(|| OpError::type_error(self.to_string(), inputs[1].dtype()))?;
        let axis = self.axis;
        Ok(map_any!(inputs[2].as_ref(), |g| scatter_add(&shape, indices, g, axis)))
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 2
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let grad = gather(graph, upstream, self.axis, inputs[1])?;
        Ok(vec![None, None, Some(grad)])
    }
}

pub fn gather(graph: &mut Graph, x: NodeId, axis: usize, indices: NodeId) -> Result<NodeId> {
    graph.apply(Gather { axis }, &[x, indices])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor_op::{arith::binary::mul, index::argsort::argsort};

    #[test]
    fn gathers_along_axis() {
        let mut graph = Graph::new();
        let x = graph.variable(
            TensorValue::from_f64([2, 3], vec![10., 20., 30., 40., 50., 60.]).unwrap(),
            "x",
        );
        let idx = graph.constant(TensorValue::from_ints([2, 2], vec![2, 0, 1, 1]).unwrap());
        let y = gather(&mut graph, x, 1, idx).unwrap();
        assert_eq!(graph.shape(y).unwrap(), Shape::from([2, 2]));
        let out = graph.evaluate(&[y]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![30., 10., 50., 50.]);
    }

    #[test]
    fn gradient_scatters_back() {
        let mut graph = Graph::new();
        let x = graph.variable(
            TensorValue::from_f64([2, 3], vec![10., 20., 30., 40., 50., 60.]).unwrap(),
            "x",
        );
        let idx = graph.constant(TensorValue::from_ints([2, 2], vec![2, 0, 1, 1]).unwrap());
        let y = gather(&mut graph, x, 1, idx).unwrap();
        let w = graph.constant(TensorValue::from_f64([2, 2], vec![1., 2., 3., 4.]).unwrap());
        let cost = mul(&mut graph, y, w).unwrap();
        let g = graph.grad(cost, &[x]).unwrap();
        let out = graph.evaluate(&g).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![2., 0., 1., 0., 7., 0.]);
    }

    #[test]
    fn repeated_indices_accumulate_in_three_dims() {
        let indices = ArrayD::from_shape_vec(IxDyn(&[3, 1, 2]), vec![1, 1, 0, 1, 1, 1]).unwrap();
        let g = ArrayD::from_shape_vec(IxDyn(&[3, 1, 2]), vec![1., 2., 3., 4., 5., 6.]).unwrap();
        let out = scatter_add(&Shape::from([2, 1, 2]), &indices, &g, 0);
        assert_eq!(out.shape(), &[2, 1, 2]);
        assert_eq!(out.iter().cloned().collect::<Vec<f64>>(), vec![3., 0., 6., 12.]);

        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([2, 1, 2], vec![1., 2., 3., 4.]).unwrap(), "x");
        let idx = graph.constant(TensorValue::from_ints([3, 1, 2], vec![1, 1, 0, 1, 1, 1]).unwrap());
        let y = gather(&mut graph, x, 0, idx).unwrap();
        let g = graph.grad(y, &[x]).unwrap();
        let out = graph.evaluate(&[y, g[0]]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![3., 4., 1., 4., 3., 4.]);
        assert_eq!(out[1].to_f64_vec(), vec![1., 0., 2., 3.]);
    }

    #[test]
    fn sorted_gather_is_differentiable_through_values() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([3], vec![3., 1., 2.]).unwrap(), "x");
        let order = argsort(&mut graph, x, 0).unwrap();
        let sorted = gather(&mut graph, x, 0, order).unwrap();
        let g = graph.grad(sorted, &[x]).unwrap();
        let out = graph.evaluate(&[sorted, g[0]]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![1., 2., 3.]);
        assert_eq!(out[1].to_f64_vec(), vec![1., 1., 1.]);
    }

    #[test]
    fn index_and_shape_validation() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([2, 3], vec![0.; 6]).unwrap(), "x");
        let bad_rank = graph.constant(TensorValue::from_ints([2], vec![0, 1]).unwrap());
        assert!(matches!(
            gather(&mut graph, x, 1, bad_rank),
            Err(OpError::ShapeMismatch { .. })
        ));
        let floats = graph.constant(TensorValue::from_f64([2, 1], vec![0., 1.]).unwrap());
        assert!(matches!(
            gather(&mut graph, x, 1, floats),
            Err(OpError::TypeError { .. })
        ));
        let out_of_range = graph.constant(TensorValue::from_ints([2, 1], vec![0, 3]).unwrap());
        let y = gather(&mut graph, x, 1, out_of_range).unwrap();
        assert_eq!(
            graph.evaluate(&[y]),
            Err(OpError::IndexOutOfRange {
                index: 3,
                axis: 1,
                extent: 3
            })
        );
    }
}
