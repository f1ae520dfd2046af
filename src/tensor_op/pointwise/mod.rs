//! Element-wise special functions.

pub mod clamp;
pub mod erf;
pub mod erfinv;

pub use clamp::clamp;
pub use erf::{erf, erfc};
pub use erfinv::{erfinv, erfinv_with_domain, ErfinvDomain};
