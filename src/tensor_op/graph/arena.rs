use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crossbeam::sync::ShardedLock;
use log::trace;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        TensorValue,
    },
    ArcLock,
};

use super::{Graph, NodeId, NodeKind};

/// Values produced during one evaluation pass, keyed by node index.
#[derive(Clone)]
pub struct ValueArena {
    values: ArcLock<HashMap<usize, TensorValue>>,
}

impl ValueArena {
    fn new() -> Self {
        ValueArena {
            values: Arc::new(ShardedLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, id: NodeId) -> Result<TensorValue> {
        let values = self.values.read().map_err(|_| OpError::LockPoisoned)?;
        values
            .get(&id.index())
            .cloned()
            .ok_or_else(|| OpError::MissingValue(id.index()))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        match self.values.read() {
            Ok(values) => values.contains_key(&id.index()),
            Err(_) => false,
        }
    }

    fn insert(&self, index: usize, value: TensorValue) -> Result<()> {
        let mut values = self.values.write().map_err(|_| OpError::LockPoisoned)?;
        values.insert(index, value);
        Ok(())
    }

    /// Move a value out; later reads of `index` fail.
    fn take(&self, index: usize) -> Result<TensorValue> {
        let mut values = self.values.write().map_err(|_| OpError::LockPoisoned)?;
        values.remove(&index).ok_or(OpError::MissingValue(index))
    }
}

impl Graph {
    /// Indices of every node `targets` depend on, including the targets.
    pub(crate) fn ancestors(&self, targets: &[NodeId]) -> Result<Vec<bool>> {
        let mut needed = vec![false; self.nodes.len()];
        let mut stack = Vec::with_capacity(targets.len());
        for &target in targets {
            self.node(target)?;
            stack.push(target.index());
        }
        while let Some(index) = stack.pop() {
            if needed[index] {
                continue;
            }
            needed[index] = true;
            if let NodeKind::Op { inputs, .. } = &self.nodes[index].kind {
                stack.extend(inputs.iter().map(|id| id.index()));
            }
        }
        Ok(needed)
    }

    /// Run the tape in node order over the ancestors of `targets`.
    ///
    /// An operator that declares `overwrites_input` receives that input by
    /// value when it is an intermediate with no other consumer and is not
    /// itself a target; the arena then no longer holds it.
    pub fn execute(&self, targets: &[NodeId]) -> Result<ValueArena> {
        let needed = self.ancestors(targets)?;
        let target_set: HashSet<usize> = targets.iter().map(|id| id.index()).collect();

        let mut consumers = vec![0usize; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            if !needed[index] {
                continue;
            }
            if let NodeKind::Op { inputs, .. } = &node.kind {
                for input in inputs {
                    consumers[input.index()] += 1;
                }
            }
        }

        let arena = ValueArena::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if !needed[index] {
                continue;
            }
            let value = match &node.kind {
                NodeKind::Variable(value) | NodeKind::Constant(value) => value.clone(),
                NodeKind::Op { op, inputs } => {
                    let owned_position = op.overwrites_input().filter(|&position| {
                        inputs.get(position).map_or(false, |input| {
                            let source = input.index();
                            consumers[source] == 1
                                && !target_set.contains(&source)
                                && matches!(self.nodes[source].kind, NodeKind::Op { .. })
                        })
                    });
                    let mut owned = match owned_position {
                        Some(position) => Some(arena.take(inputs[position].index())?),
                        None => None,
                    };

                    trace!("evaluating %{} = {}", index, op.to_string());
                    let guard = arena.values.read().map_err(|_| OpError::LockPoisoned)?;
                    let mut args: Vec<Cow<'_, TensorValue>> = Vec::with_capacity(inputs.len());
                    for (position, input) in inputs.iter().enumerate() {
                        if Some(position) == owned_position {
                            let value = owned
                                .take()
                                .ok_or_else(|| OpError::MissingValue(input.index()))?;
                            args.push(Cow::Owned(value));
                        } else {
                            let value = guard
                                .get(&input.index())
                                .ok_or_else(|| OpError::MissingValue(input.index()))?;
                            args.push(Cow::Borrowed(value));
                        }
                    }
                    let value = op.evaluate(args)?;
                    drop(guard);
                    value
                }
            };
            arena.insert(index, value)?;
        }
        Ok(arena)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor_op::{arith::unary::exp, pointwise::erf::erf};

    #[test]
    fn sole_consumer_is_moved_into_erf() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([2], vec![0.0, 1.0]).unwrap(), "x");
        let e = exp(&mut graph, x).unwrap();
        let y = erf(&mut graph, e).unwrap();
        let arena = graph.execute(&[y]).unwrap();
        assert!(!arena.contains(e));
        assert!(arena.contains(x));
        let out = arena.get(y).unwrap().to_f64_vec();
        assert!((out[0] - statrs::function::erf::erf(1.0)).abs() < 1e-12);
    }

    #[test]
    fn shared_input_is_borrowed() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([1], vec![0.5]).unwrap(), "x");
        let e = exp(&mut graph, x).unwrap();
        let y = erf(&mut graph, e).unwrap();
        let values = graph.evaluate(&[y, e]).unwrap();
        assert!((values[1].to_f64_vec()[0] - 0.5f64.exp()).abs() < 1e-12);
    }
}
