use std::{
    borrow::Cow,
    hash::Hasher,
    ops::{Add, Div, Mul, Sub},
};

use ndarray::{ArrayD, IxDyn, Zip};

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        shape::broadcast_shapes,
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, check_same_dtype, TensorOperation},
    },
};

use super::{
    broadcast::{insert_axes_view, sum_to, BroadcastAxes},
    unary::neg,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            BinaryKind::Add => "Add",
            BinaryKind::Sub => "Sub",
            BinaryKind::Mul => "Mul",
            BinaryKind::Div => "Div",
        }
    }

    pub(crate) fn apply<A>(&self, a: A, b: A) -> A
    where
        A: Add<Output = A> + Sub<Output = A> + Mul<Output = A> + Div<Output = A>,
    {
        match self {
            BinaryKind::Add => a + b,
            BinaryKind::Sub => a - b,
            BinaryKind::Mul => a * b,
            BinaryKind::Div => a / b,
        }
    }
}

/// Elementwise arithmetic with broadcasting.
#[derive(Clone, Debug)]
pub(crate) struct Binary {
    kind: BinaryKind,
    axes: BroadcastAxes,
}

impl Binary {
    pub(crate) fn new(kind: BinaryKind, axes: BroadcastAxes) -> Self {
        Binary { kind, axes }
    }

    fn broadcast_shape(&self, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let lhs = lhs.insert_axes(&self.axes.left)?;
        let rhs = rhs.insert_axes(&self.axes.right)?;
        broadcast_shapes(self.kind.name(), &lhs, &rhs)
    }
}

fn zip_broadcast<A>(
    kind: BinaryKind,
    lhs: &ArrayD<A>,
    rhs: &ArrayD<A>,
    axes: &BroadcastAxes,
    out: &Shape,
) -> Result<ArrayD<A>>
where
    A: Copy + Add<Output = A> + Sub<Output = A> + Mul<Output = A> + Div<Output = A>,
{
    let incompatible = || OpError::IncompatibleShapes {
        op: kind.name().to_string(),
        lhs: lhs.shape().to_vec(),
        rhs: rhs.shape().to_vec(),
    };
    let l = insert_axes_view(lhs.view(), &axes.left);
    let r = insert_axes_view(rhs.view(), &axes.right);
    let l = l.broadcast(IxDyn(out.as_slice())).ok_or_else(incompatible)?;
    let r = r.broadcast(IxDyn(out.as_slice())).ok_or_else(incompatible)?;
    Ok(Zip::from(&l).and(&r).map_collect(|&a, &b| kind.apply(a, b)))
}

impl TensorOperation for Binary {
    fn to_string(&self) -> String {
        if self.axes == BroadcastAxes::none() {
            self.kind.name().to_string()
        } else {
            format!(
                "{}{{left={:?}, right={:?}}}",
                self.kind.name(),
                self.axes.left,
                self.axes.right
            )
        }
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(self.kind.name().as_bytes());
        self.axes.write_hash(state);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        self.broadcast_shape(input_shapes[0], input_shapes[1])
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        check_same_dtype(input_dtypes[0], input_dtypes[1])?;
        if self.kind == BinaryKind::Div && input_dtypes[0] == Dtype::Int {
            return Err(OpError::type_error(self.to_string(), Dtype::Int));
        }
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype(), inputs[1].dtype()])?;
        self.broadcast_shape(&inputs[0].shape(), &inputs[1].shape())?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let out = self.broadcast_shape(&inputs[0].shape(), &inputs[1].shape())?;
        let (kind, axes) = (self.kind, &self.axes);
        match (inputs[0].as_ref(), inputs[1].as_ref()) {
            (TensorValue::F32(l), TensorValue::F32(r)) => {
                Ok(TensorValue::F32(zip_broadcast(kind, l, r, axes, &out)?))
            }
            (TensorValue::F64(l), TensorValue::F64(r)) => {
                Ok(TensorValue::F64(zip_broadcast(kind, l, r, axes, &out)?))
            }
            (TensorValue::Int(l), TensorValue::Int(r)) => {
                Ok(TensorValue::Int(zip_broadcast(kind, l, r, axes, &out)?))
            }
            (l, r) => Err(OpError::DtypeMismatch {
                expected: l.dtype(),
                got: r.dtype(),
            }),
        }
    }

    fn diff_wrt(&self, _input: usize) -> bool {
        true
    }

    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let (lhs, rhs) = (inputs[0], inputs[1]);
        let dtype = graph.dtype(output)?;
        if !dtype.is_float() {
            return Err(OpError::type_error(self.to_string(), dtype));
        }
        let against_right = BroadcastAxes {
            left: Vec::new(),
            right: self.axes.right.clone(),
        };
        let against_left = BroadcastAxes {
            left: Vec::new(),
            right: self.axes.left.clone(),
        };
        let (d_lhs, d_rhs) = match self.kind {
            BinaryKind::Add => (upstream, upstream),
            BinaryKind::Sub => (upstream, neg(graph, upstream)?),
            BinaryKind::Mul => (
                broadcast_binary(graph, BinaryKind::Mul, upstream, rhs, against_right)?,
                broadcast_binary(graph, BinaryKind::Mul, upstream, lhs, against_left)?,
            ),
            BinaryKind::Div => {
                let d_lhs = broadcast_binary(graph, BinaryKind::Div, upstream, rhs, against_right.clone())?;
                let scaled = mul(graph, upstream, output)?;
                let quotient = broadcast_binary(graph, BinaryKind::Div, scaled, rhs, against_right)?;
                (d_lhs, neg(graph, quotient)?)
            }
        };
        let lhs_shape = graph.shape(lhs)?;
        let rhs_shape = graph.shape(rhs)?;
        Ok(vec![
            Some(sum_to(graph, d_lhs, lhs_shape, &self.axes.left)?),
            Some(sum_to(graph, d_rhs, rhs_shape, &self.axes.right)?),
        ])
    }
}

pub fn broadcast_binary(
    graph: &mut Graph,
    kind: BinaryKind,
    lhs: NodeId,
    rhs: NodeId,
    axes: BroadcastAxes,
) -> Result<NodeId> {
    graph.apply(Binary::new(kind, axes), &[lhs, rhs])
}

pub fn add(graph: &mut Graph, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
    broadcast_binary(graph, BinaryKind::Add, lhs, rhs, BroadcastAxes::none())
}

pub fn sub(graph: &mut Graph, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
    broadcast_binary(graph, BinaryKind::Sub, lhs, rhs, BroadcastAxes::none())
}

pub fn mul(graph: &mut Graph, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
    broadcast_binary(graph, BinaryKind::Mul, lhs, rhs, BroadcastAxes::none())
}

pub fn div(graph: &mut Graph, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
    broadcast_binary(graph, BinaryKind::Div, lhs, rhs, BroadcastAxes::none())
}

/// `x * value` with a 0-d constant of `x`'s dtype.
pub fn scale(graph: &mut Graph, x: NodeId, value: f64) -> Result<NodeId> {
    let factor = graph.scalar_like(x, value)?;
    mul(graph, x, factor)
}

/// `x + value` with a 0-d constant of `x`'s dtype.
pub fn shift(graph: &mut Graph, x: NodeId, value: f64) -> Result<NodeId> {
    let offset = graph.scalar_like(x, value)?;
    add(graph, x, offset)
}
