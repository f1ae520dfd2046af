use std::fmt;

use itertools::Itertools;

use super::{Graph, NodeKind};

/// Line-per-node listing of a graph, in evaluation order.
pub struct GraphViz<'a> {
    graph: &'a Graph,
}

impl Graph {
    pub fn viz(&self) -> GraphViz<'_> {
        GraphViz { graph: self }
    }
}

impl<'a> fmt::Display for GraphViz<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, node) in self.graph.nodes.iter().enumerate() {
            let label = match &node.kind {
                NodeKind::Variable(_) => "Variable".to_string(),
                NodeKind::Constant(_) => "Constant".to_string(),
                NodeKind::Op { op, inputs } => format!(
                    "{}({})",
                    op.to_string(),
                    inputs.iter().map(|id| format!("%{}", id.index())).join(", ")
                ),
            };
            match &node.name {
                Some(name) => write!(f, "%{} [{}] = {}", index, name, label)?,
                None => write!(f, "%{} = {}", index, label)?,
            }
            writeln!(f, " :: {} {}", node.shape, node.dtype)?;
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.viz())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        tensor_grad::TensorValue,
        tensor_op::{graph::Graph, pointwise::erf::erf},
    };

    #[test]
    fn lists_nodes_in_order() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f32([2, 3], vec![0.; 6]).unwrap(), "x");
        erf(&mut graph, x).unwrap();
        let listing = format!("{}", graph);
        print!("Graph Output: \n{}", listing);
        assert_eq!(
            listing,
            "%0 [x] = Variable :: (2, 3) f32\n%1 = Erf(%0) :: (2, 3) f32\n"
        );
    }
}
