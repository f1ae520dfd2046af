use std::{borrow::Cow, hash::Hasher};

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        shape, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, TensorOperation},
    },
};

#[derive(Clone, Debug)]
pub(crate) struct Reshape {
    to: Shape,
}

impl TensorOperation for Reshape {
    fn to_string(&self) -> String {
        format!("Reshape{}", self.to)
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(b"Reshape");
        self.to.as_slice().iter().for_each(|&d| state.write_usize(d));
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        if input_shapes[0].size() != self.to.size() {
            return Err(OpError::ShapeMismatch {
                expected: self.to.to_vec(),
                got: input_shapes[0].to_vec(),
            });
        }
        Ok(self.to.clone())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        inputs[0].reshape(&self.to)
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
        let original = graph.shape(inputs[0])?;
        Ok(vec![Some(reshape(graph, upstream, original)?)])
    }
}

/// Returns `x` unchanged when it already has the requested shape.
pub fn reshape(graph: &mut Graph, x: NodeId, to: Shape) -> Result<NodeId> {
    if graph.shape(x)? == to {
        return Ok(x);
    }
    graph.apply(Reshape { to }, &[x])
}

/// Remove `axis` if it has extent 1.
pub fn squeeze(graph: &mut Graph, x: NodeId, axis: usize) -> Result<NodeId> {
    let to = shape::squeeze(&graph.shape(x)?, axis)?;
    reshape(graph, x, to)
}

pub fn unsqueeze(graph: &mut Graph, x: NodeId, axis: usize) -> Result<NodeId> {
    let to = shape::unsqueeze(&graph.shape(x)?, axis)?;
    reshape(graph, x, to)
}

/// Remove every size-1 axis other than `axis`.
pub fn squeeze_all_but(graph: &mut Graph, x: NodeId, axis: usize) -> Result<NodeId> {
    let (to, _) = shape::squeeze_all_but(&graph.shape(x)?, Some(axis))?;
    reshape(graph, x, to)
}

pub fn squeeze_all(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    let (to, _) = shape::squeeze_all_but(&graph.shape(x)?, None)?;
    reshape(graph, x, to)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn squeeze_builders() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::zeros(crate::Dtype::F64, &Shape::from([1, 3, 1])), "x");
        let a = squeeze(&mut graph, x, 0).unwrap();
        assert_eq!(graph.shape(a).unwrap(), Shape::from([3, 1]));
        assert_eq!(squeeze(&mut graph, x, 1).unwrap(), x);
        let b = squeeze_all_but(&mut graph, x, 2).unwrap();
        assert_eq!(graph.shape(b).unwrap(), Shape::from([3, 1]));
        let c = squeeze_all(&mut graph, x).unwrap();
        assert_eq!(graph.shape(c).unwrap(), Shape::from([3]));
        let d = unsqueeze(&mut graph, c, 1).unwrap();
        assert_eq!(graph.shape(d).unwrap(), Shape::from([3, 1]));
        assert!(matches!(
            squeeze(&mut graph, x, 3),
            Err(OpError::AxisOutOfRange { axis: 3, dims: 3 })
        ));
    }

    #[test]
    fn reshape_size_must_match() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::zeros(crate::Dtype::F32, &Shape::from([2, 3])), "x");
        assert!(reshape(&mut graph, x, Shape::from([5])).is_err());
    }
}
