use std::{borrow::Cow, hash::Hasher};

use ndarray::{ArrayD, Zip};

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        tensor::FloatElement,
        Dtype, Shape, TensorValue,
    },
    tensor_op::{
        graph::{Graph, NodeId},
        operation::{check_arity, check_float, check_same_dtype, TensorOperation},
        pointwise::erf::same_shape_pair,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ExtremumKind {
    Min,
    Max,
}

impl ExtremumKind {
    fn name(&self) -> &'static str {
        match self {
            ExtremumKind::Min => "Min",
            ExtremumKind::Max => "Max",
        }
    }

    /// Ties go to the first operand.
    fn picks_first<A: PartialOrd>(&self, a: &A, b: &A) -> bool {
        match self {
            ExtremumKind::Min => a <= b,
            ExtremumKind::Max => a >= b,
        }
    }
}

fn pick<A: PartialOrd + Copy>(kind: ExtremumKind, a: &ArrayD<A>, b: &ArrayD<A>) -> ArrayD<A> {
    Zip::from(a)
        .and(b)
        .map_collect(|x, y| if kind.picks_first(x, y) { *x } else { *y })
}

fn route<F: FloatElement>(
    kind: ExtremumKind,
    first: bool,
    a: &ArrayD<F>,
    b: &ArrayD<F>,
    g: &ArrayD<F>,
) -> ArrayD<F> {
    Zip::from(a).and(b).and(g).map_collect(|x, y, &g| {
        if kind.picks_first(x, y) == first {
            g
        } else {
            F::zero()
        }
    })
}

/// Elementwise minimum or maximum of two same-shaped tensors.
#[derive(Clone, Debug)]
pub(crate) struct Extremum {
    kind: ExtremumKind,
}

impl TensorOperation for Extremum {
    fn to_string(&self) -> String {
        self.kind.name().to_string()
    }

    fn arity(&self) -> usize {
        2
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(self.kind.name().as_bytes());
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        same_shape_pair(self, input_shapes)
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        check_same_dtype(input_dtypes[0], input_dtypes[1])?;
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype(), inputs[1].dtype()])?;
        same_shape_pair(self, &[&inputs[0].shape(), &inputs[1].shape()])?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let kind = self.kind;
        match (inputs[0].as_ref(), inputs[1].as_ref()) {
            (TensorValue::F32(a), TensorValue::F32(b)) => Ok(TensorValue::F32(pick(kind, a, b))),
            (TensorValue::F64(a), TensorValue::F64(b)) => Ok(TensorValue::F64(pick(kind, a, b))),
            (TensorValue::Int(a), TensorValue::Int(b)) => Ok(TensorValue::Int(pick(kind, a, b))),
            (a, b) => Err(OpError::DtypeMismatch {
                expected: a.dtype(),
                got: b.dtype(),
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
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let operands = [inputs[0], inputs[1], upstream];
        let d_a = graph.apply(ExtremumGrad { kind: self.kind, first: true }, &operands)?;
        let d_b = graph.apply(ExtremumGrad { kind: self.kind, first: false }, &operands)?;
        Ok(vec![Some(d_a), Some(d_b)])
    }
}

/// Routes `g` to the operand the extremum picked, for inputs `(a, b, g)`.
#[derive(Clone, Debug)]
pub(crate) struct ExtremumGrad {
    kind: ExtremumKind,
    first: bool,
}

impl TensorOperation for ExtremumGrad {
    fn to_string(&self) -> String {
        let side = if self.first { "first" } else { "second" };
        format!("{}Grad{{{}}}", self.kind.name(), side)
    }

    fn arity(&self) -> usize {
        3
    }

    fn write_hash(&self, state: &mut dyn Hasher) {
        state.write(self.kind.name().as_bytes());
        state.write(b"Grad");
        state.write_u8(self.first as u8);
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape> {
        check_arity(self, input_shapes.len())?;
        for pair in input_shapes.windows(2) {
            if pair[0] != pair[1] {
                return Err(OpError::ShapeMismatch {
                    expected: pair[0].to_vec(),
                    got: pair[1].to_vec(),
                });
            }
        }
        Ok(input_shapes[0].clone())
    }

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        check_float(self, input_dtypes[2])?;
        check_same_dtype(input_dtypes[0], input_dtypes[1])?;
        check_same_dtype(input_dtypes[0], input_dtypes[2])?;
        Ok(input_dtypes[2])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())?;
        self.output_dtype(&[inputs[0].dtype(), inputs[1].dtype(), inputs[2].dtype()])?;
        let shapes = [inputs[0].shape(), inputs[1].shape(), inputs[2].shape()];
        self.output_shape(&[&shapes[0], &shapes[1], &shapes[2]])?;
        Ok(())
    }

    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        let (kind, first) = (self.kind, self.first);
        match (inputs[0].as_ref(), inputs[1].as_ref(), inputs[2].as_ref()) {
            (TensorValue::F32(a), TensorValue::F32(b), TensorValue::F32(g)) => {
                Ok(TensorValue::F32(route(kind, first, a, b, g)))
            }
            (TensorValue::F64(a), TensorValue::F64(b), TensorValue::F64(g)) => {
                Ok(TensorValue::F64(route(kind, first, a, b, g)))
            }
            (a, _, g) => Err(OpError::DtypeMismatch {
                expected: a.dtype(),
                got: g.dtype(),
            }),
        }
    }

    fn diff_wrt(&self, input: usize) -> bool {
        input == 2
    }

    /// Linear in `g`, with a piecewise-constant mask in `a` and `b`.
    fn build_gradient(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        _output: NodeId,
        upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        let grad = graph.apply(self.clone(), &[inputs[0], inputs[1], upstream])?;
        Ok(vec![None, None, Some(grad)])
    }
}

/// Elementwise minimum; where `a == b` the result comes from `a`.
pub fn min(graph: &mut Graph, a: NodeId, b: NodeId) -> Result<NodeId> {
    graph.apply(Extremum { kind: ExtremumKind::Min }, &[a, b])
}

/// Elementwise maximum; where `a == b` the result comes from `a`.
pub fn max(graph: &mut Graph, a: NodeId, b: NodeId) -> Result<NodeId> {
    graph.apply(Extremum { kind: ExtremumKind::Max }, &[a, b])
}
