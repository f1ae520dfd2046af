pub use crate::{
    distribution::{Distribution, Iid, Normal},
    tensor_grad::{Dtype, OpError, Result, Scalar, Shape, TensorValue},
    tensor_op::{
        arith::{
            add, div, exp, log, log_sum_exp, max, min, mul, neg, reduce_add, reduce_div,
            reduce_max, reduce_mean, reduce_min, reduce_prod, reduce_sub, scale, shift, sqrt,
            square, sub,
        },
        index::{argsort, gather},
        pointwise::{clamp, erf, erfc, erfinv, erfinv_with_domain, ErfinvDomain},
        util::{repeat, reshape, slice, squeeze, squeeze_all, unsqueeze},
        Graph, GraphOptions, NodeId, TensorOperation,
    },
};
