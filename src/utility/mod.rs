use std::collections::HashMap;

use env_logger::Env;

use crate::{
    tensor_grad::{
        error::{OpError, Result},
        TensorValue,
    },
    tensor_op::graph::{Graph, NodeId},
};

/// Hands out `base`, `base_1`, `base_2`, ... so no two requests share a name.
#[derive(Debug, Default, Clone)]
pub struct NameAllocator {
    issued: HashMap<String, usize>,
}

impl NameAllocator {
    pub fn new() -> Self {
        NameAllocator::default()
    }

    pub fn unique(&mut self, base: &str) -> String {
        let mut count = self.issued.get(base).copied().unwrap_or(0);
        loop {
            let candidate = if count == 0 {
                base.to_string()
            } else {
                format!("{}_{}", base, count)
            };
            count += 1;
            if !self.issued.contains_key(&candidate) {
                self.issued.insert(base.to_string(), count);
                if candidate != base {
                    self.issued.insert(candidate.clone(), 1);
                }
                return candidate;
            }
        }
    }
}

/// Log to stderr at `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
}

/// Central-difference derivative of `sum(cost)` with respect to each
/// element of the variable `wrt`. The variable is restored afterwards,
/// also when an evaluation fails.
pub fn finite_diff_grad(graph: &mut Graph, cost: NodeId, wrt: NodeId, eps: f64) -> Result<Vec<f64>> {
    let original = graph.value(wrt)?.clone();
    let grads = central_differences(graph, cost, wrt, eps, &original);
    graph.set_value(wrt, original)?;
    grads
}

fn central_differences(
    graph: &mut Graph,
    cost: NodeId,
    wrt: NodeId,
    eps: f64,
    original: &TensorValue,
) -> Result<Vec<f64>> {
    let shape = original.shape();
    let point = original.to_f64_vec();
    let rebuild = |data: Vec<f64>| -> Result<TensorValue> {
        match original {
            TensorValue::F32(_) => {
                TensorValue::from_f32(shape.clone(), data.into_iter().map(|v| v as f32).collect())
            }
            TensorValue::F64(_) => TensorValue::from_f64(shape.clone(), data),
            TensorValue::Int(_) => Err(OpError::type_error("finite_diff_grad", original.dtype())),
        }
    };

    let mut grads = Vec::with_capacity(point.len());
    let mut perturbed = point.clone();
    for i in 0..point.len() {
        perturbed[i] = point[i] + eps;
        graph.set_value(wrt, rebuild(perturbed.clone())?)?;
        let plus: f64 = graph.evaluate(&[cost])?[0].to_f64_vec().iter().sum();

        perturbed[i] = point[i] - eps;
        graph.set_value(wrt, rebuild(perturbed.clone())?)?;
        let minus: f64 = graph.evaluate(&[cost])?[0].to_f64_vec().iter().sum();

        perturbed[i] = point[i];
        grads.push((plus - minus) / (2.0 * eps));
    }
    Ok(grads)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor_op::{
        arith::unary::square,
        pointwise::erfinv::{erfinv_with_domain, ErfinvDomain},
    };

    #[test]
    fn names_never_collide() {
        let mut names = NameAllocator::new();
        assert_eq!(names.unique("hi"), "hi");
        assert_eq!(names.unique("hi"), "hi_1");
        assert_eq!(names.unique("hi_2"), "hi_2");
        assert_eq!(names.unique("hi"), "hi_3");
        assert_eq!(names.unique("x"), "x");
    }

    #[test]
    fn finite_difference_of_square() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([3], vec![1., -2., 0.5]).unwrap(), "x");
        let y = square(&mut graph, x).unwrap();
        let grads = finite_diff_grad(&mut graph, y, x, 1e-6).unwrap();
        for (g, expected) in grads.iter().zip(&[2., -4., 1.]) {
            assert!((g - expected).abs() < 1e-6);
        }
        assert_eq!(graph.value(x).unwrap().to_f64_vec(), vec![1., -2., 0.5]);
    }

    #[test]
    fn failed_evaluation_restores_variable() {
        let mut graph = Graph::new();
        let x = graph.variable(TensorValue::from_f64([2], vec![0.5, 0.999_999_5]).unwrap(), "x");
        let y = erfinv_with_domain(&mut graph, x, ErfinvDomain::Reject).unwrap();
        assert!(matches!(
            finite_diff_grad(&mut graph, y, x, 1e-6),
            Err(OpError::DomainError { .. })
        ));
        assert_eq!(graph.value(x).unwrap().to_f64_vec(), vec![0.5, 0.999_999_5]);
        assert!(graph.evaluate(&[y]).is_ok());
    }
}
