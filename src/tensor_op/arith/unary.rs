use std::{borrow::Cow, hash::Hasher};

use crate::{
    map_float,
    tensor_grad::{
        error::{OpError, Result},
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, check_float, TensorOperation},
    },
};

use super::binary::{div, mul, scale};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryKind {
    Neg,
    Exp,
    Log,
    Square,
    Sqrt,
}

impl UnaryKind {
    fn name(&self) -> &'static str {
        match self {
            UnaryKind::Neg => "Neg",
            UnaryKind::Exp => "Exp",
            UnaryKind::Log => "Log",
            UnaryKind::Square => "Square",
            UnaryKind::Sqrt => "Sqrt",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Unary {
    kind: UnaryKind,
}

impl TensorOperation for Unary {
    fn to_string(&self) -> String {
        self.kind.name().to_string()
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(self.kind.name().as_bytes());
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        Ok(input_shapes[0].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        if self.kind != UnaryKind::Neg {
            check_float(self, input_dtypes[0])?;
        }
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype()])?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let value = inputs[0].as_ref();
        match self.kind {
            UnaryKind::Neg => match value {
                TensorValue::Int(a) => Ok(TensorValue::Int(a.mapv(|v| -v))),
                _ => map_float!(value, self.to_string(), |a| a.mapv(|v| -v)),
            },
            UnaryKind::Exp => map_float!(value, self.to_string(), |a| a.mapv(|v| v.exp())),
            UnaryKind::Log => map_float!(value, self.to_string(), |a| a.mapv(|v| v.ln())),
            UnaryKind::Square => map_float!(value, self.to_string(), |a| a.mapv(|v| v * v)),
            UnaryKind::Sqrt => map_float!(value, self.to_string(), |a| a.mapv(|v| v.sqrt())),
        }
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 0
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let x = inputs[0];
        let dtype = graph.dtype(x)?;
        if !dtype.is_float() {
            return Err(OpError::type_error(self.to_string(), dtype));
        }
        let grad = match self.kind {
            UnaryKind::Neg => neg(graph, upstream)?,
            UnaryKind::Exp => mul(graph, upstream, output)?,
            UnaryKind::Log => div(graph, upstream, x)?,
            UnaryKind::Square => {
                let twice = scale(graph, x, 2.0)?;
                mul(graph, upstream, twice)?
            }
            UnaryKind::Sqrt => {
                let twice = scale(graph, output, 2.0)?;
                div(graph, upstream, twice)?
            }
        };
        Ok(vec![Some(grad)])
    }
}

fn unary(graph: &mut Graph, kind: UnaryKind, x: NodeId) -> Result<NodeId> {
    graph.apply(Unary { kind }, &[x])
}

pub fn neg(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    unary(graph, UnaryKind::Neg, x)
}

pub fn exp(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    unary(graph, UnaryKind::Exp, x)
}

pub fn log(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    unary(graph, UnaryKind::Log, x)
}

pub fn square(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    unary(graph, UnaryKind::Square, x)
}

pub fn sqrt(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
    unary(graph, UnaryKind::Sqrt, x)
}
