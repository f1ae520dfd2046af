use std::collections::HashMap;

use log::debug;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        TensorValue,
    },
    tensor_op::arith::binary::add,
};

use super::{Graph, NodeId, NodeKind};

impl Graph {
    /// Build nodes computing the gradient of `cost` with respect to each of
    /// `wrt`. The seed is a ones tensor shaped like `cost`, so a non-scalar
    /// cost is differentiated as the sum of its elements.
    pub fn grad(&mut self, cost: NodeId, wrt: &[NodeId]) -> Result<Vec<NodeId>> {
        self.node(cost)?;
        for &w in wrt {
            self.node(w)?;
        }

        let last = cost.index();
        let mut depends = vec![false; last + 1];
        for &w in wrt {
            if w.index() <= last {
                depends[w.index()] = true;
            }
        }
        for index in 0..=last {
            if let NodeKind::Op { inputs, .. } = &self.nodes[index].kind {
                if inputs.iter().any(|input| depends[input.index()]) {
                    depends[index] = true;
                }
            }
        }
        let ancestors = self.ancestors(&[cost])?;
        let on_path: Vec<bool> = (0..=last).map(|i| depends[i] && ancestors[i]).collect();

        // A cost reached only through inputs its operator cannot
        // differentiate has no gradient at all.
        if let NodeKind::Op { op, inputs } = &self.nodes[last].kind {
            let reached = inputs.iter().any(|input| on_path[input.index()]);
            let differentiable = inputs
                .iter()
                .enumerate()
                .any(|(position, input)| on_path[input.index()] && op.diff_wrt(position));
            if reached && !differentiable {
                return Err(OpError::unsupported(
                    op.to_string(),
                    "output is not differentiable with respect to its inputs",
                ));
            }
        }
        let cost_dtype = self.nodes[last].dtype;
        if !cost_dtype.is_float() {
            return Err(OpError::type_error("Grad", cost_dtype));
        }

        let seed = self.ones_like(cost)?;
        let mut grads: HashMap<usize, NodeId> = HashMap::new();
        grads.insert(last, seed);

        for index in (0..=last).rev() {
            if !on_path[index] {
                continue;
            }
            let upstream = match grads.get(&index) {
                Some(&upstream) => upstream,
                None => continue,
            };
            let (op, inputs) = match &self.nodes[index].kind {
                NodeKind::Op { op, inputs } => (op.clone(), inputs.clone()),
                _ => continue,
            };
            if !inputs.iter().any(|input| on_path[input.index()]) {
                continue;
            }
            debug!("gradient of %{} = {}", index, op.to_string());
            let output = self.id_at(index);
            let partials = op.build_gradient(self, &inputs, output, upstream)?;
            for (position, input) in inputs.iter().enumerate() {
                if !on_path[input.index()] || !op.diff_wrt(position) {
                    continue;
                }
                let partial = match partials.get(position).copied().flatten() {
                    Some(partial) => partial,
                    None => continue,
                };
                let total = match grads.get(&input.index()) {
                    Some(&existing) => add(self, existing, partial)?,
                    None => partial,
                };
                grads.insert(input.index(), total);
            }
        }

        let mut out = Vec::with_capacity(wrt.len());
        for &w in wrt {
            let g = match grads.get(&w.index()) {
                Some(&g) => g,
                None => {
                    let (dtype, shape) = (self.dtype(w)?, self.shape(w)?);
                    self.constant(TensorValue::zeros(dtype, &shape))
                }
            };
            out.push(g);
        }
        Ok(out)
    }
}
