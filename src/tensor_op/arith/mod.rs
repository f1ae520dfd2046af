pub mod binary;
pub mod broadcast;
pub mod extremum;
pub mod reduce;
pub mod unary;

pub use binary::{add, broadcast_binary, div, mul, scale, shift, sub, BinaryKind};
pub use broadcast::{broadcast_to, sum_to, BroadcastAxes};
pub use extremum::{max, min};
pub use reduce::{
    log_sum_exp, reduce_add, reduce_along, reduce_div, reduce_max, reduce_mean, reduce_min,
    reduce_prod, reduce_sub,
};
pub use unary::{exp, log, neg, sqrt, square};
