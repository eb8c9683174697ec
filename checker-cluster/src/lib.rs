pub mod election;
pub mod error;
pub mod ingress;

pub use election::{LeaderElector, RunFn};
pub use error::{Error, Result};
