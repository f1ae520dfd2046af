use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        Dtype, Shape, TensorValue,
    },
    utility::NameAllocator,
};

use super::operation::TensorOperation;

pub(crate) mod arena;
pub(crate) mod backward;
pub(crate) mod viz;

pub use arena::ValueArena;
pub use viz::GraphViz;

/// Handle to a node, tied to the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    graph: Uuid,
    index: usize,
}

impl NodeId {
    pub fn index(&self) -> usize {
        self.index
    }
}

pub(crate) enum NodeKind {
    /// A leaf whose value can be replaced between evaluations.
    Variable(TensorValue),
    Constant(TensorValue),
    Op {
        op: Box<dyn TensorOperation>,
        inputs: Vec<NodeId>,
    },
}

pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) shape: Shape,
    pub(crate) dtype: Dtype,
    pub(crate) name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
    /// Reuse an existing node when a pure operator with the same identity
    /// hash is applied to the same inputs.
    pub memoize: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions { memoize: true }
    }
}

/// Append-only computation graph. Inputs of a node always precede it, so
/// node order is a valid evaluation order.
pub struct Graph {
    id: Uuid,
    pub(crate) nodes: Vec<Node>,
    names: NameAllocator,
    options: GraphOptions,
    memo: HashMap<(u64, String, Vec<usize>), usize>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph::with_options(GraphOptions::default())
    }

    pub fn with_options(options: GraphOptions) -> Self {
        Graph {
            id: Uuid::new_v4(),
            nodes: Vec::new(),
            names: NameAllocator::new(),
            options,
            memo: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reserve a graph-unique name built from `base`.
    pub fn unique_name(&mut self, base: &str) -> String {
        self.names.unique(base)
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId {
            graph: self.id,
            index: self.nodes.len() - 1,
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        if id.graph != self.id {
            return Err(OpError::ForeignNode);
        }
        self.nodes.get(id.index).ok_or(OpError::ForeignNode)
    }

    pub(crate) fn id_at(&self, index: usize) -> NodeId {
        NodeId {
            graph: self.id,
            index,
        }
    }

    /// A named leaf whose value may be swapped with [`Graph::set_value`].
    pub fn variable(&mut self, value: TensorValue, name: &str) -> NodeId {
        let name = self.unique_name(name);
        debug!("Variable {} {} {}", name, value.shape(), value.dtype());
        let node = Node {
            shape: value.shape(),
            dtype: value.dtype(),
            kind: NodeKind::Variable(value),
            name: Some(name),
        };
        self.push(node)
    }

    pub fn constant(&mut self, value: TensorValue) -> NodeId {
        let node = Node {
            shape: value.shape(),
            dtype: value.dtype(),
            kind: NodeKind::Constant(value),
            name: None,
        };
        self.push(node)
    }

    pub fn named_constant(&mut self, value: TensorValue, name: &str) -> NodeId {
        let name = self.unique_name(name);
        let id = self.constant(value);
        self.nodes[id.index].name = Some(name);
        id
    }

    /// A 0-d constant with the dtype of `like`.
    pub fn scalar_like(&mut self, like: NodeId, value: f64) -> Result<NodeId> {
        let dtype = self.dtype(like)?;
        Ok(self.constant(TensorValue::filled(dtype, &Shape::scalar(), value)))
    }

    pub fn ones_like(&mut self, like: NodeId) -> Result<NodeId> {
        let (dtype, shape) = (self.dtype(like)?, self.shape(like)?);
        Ok(self.constant(TensorValue::ones(dtype, &shape)))
    }

    pub fn zeros_like(&mut self, like: NodeId) -> Result<NodeId> {
        let (dtype, shape) = (self.dtype(like)?, self.shape(like)?);
        Ok(self.constant(TensorValue::zeros(dtype, &shape)))
    }

    pub fn set_value(&mut self, id: NodeId, value: TensorValue) -> Result<()> {
        let node = self.node(id)?;
        if node.shape != value.shape() {
            return Err(OpError::ShapeMismatch {
                expected: node.shape.to_vec(),
                got: value.shape().to_vec(),
            });
        }
        if node.dtype != value.dtype() {
            return Err(OpError::DtypeMismatch {
                expected: node.dtype,
                got: value.dtype(),
            });
        }
        match &mut self.nodes[id.index].kind {
            NodeKind::Variable(current) => {
                *current = value;
                Ok(())
            }
            _ => Err(OpError::InvalidParameter(
                "only variables can be assigned".to_string(),
            )),
        }
    }

    /// Current value of a leaf node.
    pub fn value(&self, id: NodeId) -> Result<&TensorValue> {
        match &self.node(id)?.kind {
            NodeKind::Variable(v) | NodeKind::Constant(v) => Ok(v),
            NodeKind::Op { .. } => Err(OpError::MissingValue(id.index)),
        }
    }

    pub fn shape(&self, id: NodeId) -> Result<Shape> {
        Ok(self.node(id)?.shape.clone())
    }

    pub fn dtype(&self, id: NodeId) -> Result<Dtype> {
        Ok(self.node(id)?.dtype)
    }

    pub fn name(&self, id: NodeId) -> Result<Option<&str>> {
        Ok(self.node(id)?.name.as_deref())
    }

    pub fn inputs(&self, id: NodeId) -> Result<&[NodeId]> {
        match &self.node(id)?.kind {
            NodeKind::Op { inputs, .. } => Ok(inputs),
            _ => Ok(&[]),
        }
    }

    /// Add `op` applied to `inputs`, inferring the output shape and dtype.
    pub fn apply<O>(&mut self, op: O, inputs: &[NodeId]) -> Result<NodeId>
    where
        O: TensorOperation + 'static,
    {
        self.apply_boxed(Box::new(op), inputs)
    }

    pub fn apply_boxed(
        &mut self,
        op: Box<dyn TensorOperation>,
        inputs: &[NodeId],
    ) -> Result<NodeId> {
        super::operation::check_arity(op.as_ref(), inputs.len())?;
        let mut shapes = Vec::with_capacity(inputs.len());
        let mut dtypes = Vec::with_capacity(inputs.len());
        for &input in inputs {
            let node = self.node(input)?;
            shapes.push(&node.shape);
            dtypes.push(node.dtype);
        }
        let dtype = op.output_dtype(&dtypes)?;
        let shape = op.output_shape(&shapes)?;

        let key = if self.options.memoize && op.is_pure() {
            let key = (
                op.identity_hash(),
                op.to_string(),
                inputs.iter().map(|id| id.index).collect::<Vec<_>>(),
            );
            if let Some(&index) = self.memo.get(&key) {
                return Ok(self.id_at(index));
            }
            Some(key)
        } else {
            None
        };

        debug!("{} -> {} {}", op.to_string(), shape, dtype);
        let id = self.push(Node {
            kind: NodeKind::Op {
                op,
                inputs: inputs.to_vec(),
            },
            shape,
            dtype,
            name: None,
        });
        if let Some(key) = key {
            self.memo.insert(key, id.index);
        }
        Ok(id)
    }

    /// Evaluate `targets` and return their values in order.
    pub fn evaluate(&self, targets: &[NodeId]) -> Result<Vec<TensorValue>> {
        let arena = self.execute(targets)?;
        targets.iter().map(|&id| arena.get(id)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor_op::arith::binary::add;

    #[test]
    fn pure_ops_are_memoized() {
        let mut graph = Graph::new();
        let a = graph.variable(TensorValue::from_f64([2], vec![1., 2.]).unwrap(), "a");
        let b = graph.variable(TensorValue::from_f64([2], vec![3., 4.]).unwrap(), "b");
        let first = add(&mut graph, a, b).unwrap();
        let second = add(&mut graph, a, b).unwrap();
        assert_eq!(first, second);

        let mut graph = Graph::with_options(GraphOptions { memoize: false });
        let a = graph.variable(TensorValue::from_f64([2], vec![1., 2.]).unwrap(), "a");
        let first = add(&mut graph, a, a).unwrap();
        let second = add(&mut graph, a, a).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn foreign_nodes_are_rejected() {
        let mut left = Graph::new();
        let mut right = Graph::new();
        let a = left.variable(TensorValue::from_f64([1], vec![1.]).unwrap(), "a");
        let b = right.variable(TensorValue::from_f64([1], vec![1.]).unwrap(), "b");
        assert_eq!(add(&mut right, a, b), Err(OpError::ForeignNode));
    }

    #[test]
    fn variables_get_unique_names() {
        let mut graph = Graph::new();
        let a = graph.variable(TensorValue::from_f64([1], vec![1.]).unwrap(), "x");
        let b = graph.variable(TensorValue::from_f64([1], vec![1.]).unwrap(), "x");
        assert_eq!(graph.name(a).unwrap(), Some("x"));
        assert_eq!(graph.name(b).unwrap(), Some("x_1"));
    }

    #[test]
    fn set_value_checks_shape() {
        let mut graph = Graph::new();
        let a = graph.variable(TensorValue::from_f64([2], vec![1., 2.]).unwrap(), "a");
        let err = graph
            .set_value(a, TensorValue::from_f64([3], vec![1., 2., 3.]).unwrap())
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
        graph
            .set_value(a, TensorValue::from_f64([2], vec![5., 6.]).unwrap())
            .unwrap();
        let out = graph.evaluate(&[a]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![5., 6.]);
    }
}
