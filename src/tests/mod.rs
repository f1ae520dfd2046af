#![cfg(test)]

use crate::{prelude::*, utility::init_logging};

fn init() {
    init_logging();
}

/// Fit the mean of a normal to data by gradient descent on the mean
/// negative log-likelihood.
#[test]
fn normal_mean_converges() {
    init();
    let mut graph = Graph::new();
    let data: Vec<f64> = vec![2.1, 1.9, 2.4, 1.6, 2.0, 2.0];
    let x = graph.constant(TensorValue::from_f64([6, 1], data.clone()).unwrap());
    let mean = graph.variable(TensorValue::from_f64([1], vec![0.0]).unwrap(), "mean");
    let stddev = graph.constant(TensorValue::from_f64([1], vec![1.0]).unwrap());
    let normal = Normal::new(&mut graph, mean, stddev, 3).unwrap();

    let lp = normal.log_prob(&mut graph, x).unwrap();
    let avg = reduce_mean(&mut graph, lp, 0, false).unwrap();
    let cost = neg(&mut graph, avg).unwrap();
    let grad = graph.grad(cost, &[mean]).unwrap()[0];

    let mut mu = 0.0;
    for _ in 0..200 {
        let step = graph.evaluate(&[grad]).unwrap()[0].to_f64_vec()[0];
        mu -= 0.1 * step;
        graph
            .set_value(mean, TensorValue::from_f64([1], vec![mu]).unwrap())
            .unwrap();
    }
    let target = data.iter().sum::<f64>() / data.len() as f64;
    assert!((mu - target).abs() < 1e-6);
    print!("Graph Output: \n{}", graph.viz());
}

#[test]
fn iid_log_prob_matches_sum_of_marginals() {
    init();
    let mut graph = Graph::new();
    let mean = graph.constant(TensorValue::from_f32([2, 2], vec![0., 1., -1., 0.5]).unwrap());
    let stddev = graph.constant(TensorValue::from_f32([2, 2], vec![1., 2., 0.5, 1.]).unwrap());
    let marginal = Normal::new(&mut graph, mean, stddev, 0).unwrap();
    let joint = Iid::new(Normal::new(&mut graph, mean, stddev, 0).unwrap(), 2).unwrap();
    assert_eq!(joint.event_shape(), Shape::from([2, 2]));

    let x = graph.variable(TensorValue::from_f32([3, 2, 2], vec![0.25; 12]).unwrap(), "x");
    let per_element = marginal.log_prob(&mut graph, x).unwrap();
    let total = joint.log_prob(&mut graph, x).unwrap();
    assert_eq!(graph.shape(total).unwrap(), Shape::from([3]));
    assert_eq!(graph.dtype(total).unwrap(), Dtype::F32);

    let out = graph.evaluate(&[per_element, total]).unwrap();
    let marginals = out[0].to_f64_vec();
    for (row, &value) in out[1].to_f64_vec().iter().enumerate() {
        let expected: f64 = marginals[row * 4..row * 4 + 4].iter().sum();
        assert!((value - expected).abs() < 1e-4);
    }
}

/// Sort, gather and clamp chained together; gradients flow through the
/// gathered values but not through the permutation.
#[test]
fn sorted_clamped_sum() {
    init();
    let mut graph = Graph::new();
    let x = graph.variable(
        TensorValue::from_f64([2, 3], vec![0.9, -2.0, 0.1, 3.0, 0.2, -0.4]).unwrap(),
        "x",
    );
    let order = argsort(&mut graph, x, 1).unwrap();
    let sorted = gather(&mut graph, x, 1, order).unwrap();
    let clipped = clamp(&mut graph, sorted, -1.0, 1.0, false).unwrap();
    let cost = reduce_add(&mut graph, clipped, 1, true).unwrap();

    let grads = graph.grad(cost, &[x]).unwrap();
    let out = graph.evaluate(&[sorted, cost, grads[0]]).unwrap();
    assert_eq!(out[0].to_f64_vec(), vec![-2.0, 0.1, 0.9, -0.4, 0.2, 3.0]);
    let sums = out[1].to_f64_vec();
    assert!((sums[0] - 0.0).abs() < 1e-12);
    assert!((sums[1] - 0.8).abs() < 1e-12);
    assert_eq!(out[2].to_f64_vec(), vec![1., 0., 1., 0., 1., 1.]);

    assert!(matches!(
        graph.grad(order, &[x]),
        Err(OpError::UnsupportedOperation { .. })
    ));
}

/// `erfinv(erf(x))` recovers `x` and has unit derivative.
#[test]
fn erf_erfinv_round_trip() {
    init();
    let mut graph = Graph::new();
    let x = graph.variable(TensorValue::from_f64([4], vec![-1.5, -0.2, 0.0, 0.7]).unwrap(), "x");
    let e = erf(&mut graph, x).unwrap();
    let back = erfinv(&mut graph, e).unwrap();
    let g = graph.grad(back, &[x]).unwrap()[0];
    let out = graph.evaluate(&[back, g]).unwrap();
    for (v, expected) in out[0].to_f64_vec().iter().zip(&[-1.5, -0.2, 0.0, 0.7]) {
        assert!((v - expected).abs() < 1e-8);
    }
    assert!(out[1].to_f64_vec().iter().all(|d| (d - 1.0).abs() < 1e-6));
}

#[test]
fn repeat_then_reduce_mean_is_identity() {
    init();
    let mut graph = Graph::new();
    let x = graph.variable(TensorValue::from_f64([2, 1], vec![3.0, -1.0]).unwrap(), "x");
    let wide = repeat(&mut graph, x, 1, 4).unwrap();
    let back = reduce_mean(&mut graph, wide, 1, true).unwrap();
    let back = unsqueeze(&mut graph, back, 1).unwrap();
    assert_eq!(graph.shape(back).unwrap(), Shape::from([2, 1]));
    let g = graph.grad(back, &[x]).unwrap()[0];
    let out = graph.evaluate(&[back, g]).unwrap();
    assert_eq!(out[0].to_f64_vec(), vec![3.0, -1.0]);
    assert_eq!(out[1].to_f64_vec(), vec![1.0, 1.0]);
}
