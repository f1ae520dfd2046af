use std::{
    borrow::Cow,
    collections::hash_map::DefaultHasher,
    hash::Hasher,
};

use crate::tensor_grad::{
    error::{OpError, Result},
    Dtype, Shape, TensorValue,
};

use super::graph::{Graph, NodeId};

/// The contract every node in a [`Graph`] implements.
///
/// Build-time methods (`output_shape`, `output_dtype`) must not look at data;
/// `evaluate` validates its inputs with `check_inputs` before computing
/// anything, so a failed evaluation never produces a partial result.
pub trait TensorOperation: CloneableOps + Send + Sync {
    fn to_string(&self) -> String;

    fn arity(&self) -> usize;

    /// Feed the operator kind and its parameters to `state`.
    fn write_hash(&self, state: &mut dyn Hasher);

    /// Equal for any two instances with the same kind and parameters.
    fn identity_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.write_hash(&mut hasher);
        hasher.finish()
    }

    fn output_shape(&self, input_shapes: &[&Shape]) -> Result<Shape>;

    fn output_dtype(&self, input_dtypes: &[Dtype]) -> Result<Dtype> {
        check_arity(self, input_dtypes.len())?;
        Ok(input_dtypes[0])
    }

    fn check_inputs(&self, inputs: &[&TensorValue]) -> Result<()> {
        check_arity(self, inputs.len())
    }

    /// Compute the output from already validated inputs.
    fn compute(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue>;

    fn evaluate(&self, inputs: Vec<Cow<'_, TensorValue>>) -> Result<TensorValue> {
        {
            let refs: Vec<&TensorValue> = inputs.iter().map(|v| v.as_ref()).collect();
            self.check_inputs(&refs)?;
        }
        self.compute(inputs)
    }

    /// Position of an input this operator can reuse as its output buffer.
    fn overwrites_input(&self) -> Option<usize> {
        None
    }

    /// `false` for operators whose output differs between evaluations.
    fn is_pure(&self) -> bool {
        true
    }

    fn diff_wrt(&self, _input: usize) -> bool {
        false
    }

    /// Build the gradient of the output with respect to each input, given
    /// the gradient flowing into `output`. Entries for inputs that are not
    /// differentiable are `None`.
    fn build_gradient(
        &self,
        _graph: &mut Graph,
        _inputs: &[NodeId],
        _output: NodeId,
        _upstream: NodeId,
    ) -> Result<Vec<Option<NodeId>>> {
        Err(OpError::unsupported(
            self.to_string(),
            "operator has no gradient",
        ))
    }
}

pub fn check_arity<O: TensorOperation + ?Sized>(op: &O, got: usize) -> Result<()> {
    if got != op.arity() {
        return Err(OpError::Arity {
            op: op.to_string(),
            expected: op.arity(),
            got,
        });
    }
    Ok(())
}

/// Reject `Int` inputs for float-only kernels.
pub(crate) fn check_float<O: TensorOperation + ?Sized>(op: &O, dtype: Dtype) -> Result<()> {
    if !dtype.is_float() {
        return Err(OpError::type_error(op.to_string(), dtype));
    }
    Ok(())
}

pub(crate) fn check_same_dtype(expected: Dtype, got: Dtype) -> Result<()> {
    if expected != got {
        return Err(OpError::DtypeMismatch { expected, got });
    }
    Ok(())
}

pub(crate) fn check_non_empty<O: TensorOperation + ?Sized>(
    op: &O,
    value: &TensorValue,
) -> Result<()> {
    if value.is_empty() {
        return Err(OpError::EmptyInput {
            op: op.to_string(),
        });
    }
    Ok(())
}

pub trait CloneableOps {
    fn internal_clone(&self) -> Box<dyn TensorOperation>;
}

impl<G> CloneableOps for G
where
    G: TensorOperation + Clone + 'static,
{
    fn internal_clone(&self) -> Box<dyn TensorOperation> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn TensorOperation> {
    fn clone(&self) -> Self {
        self.internal_clone()
    }
}
