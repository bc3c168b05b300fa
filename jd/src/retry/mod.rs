//! Retry policy and failure classification

mod controller;
mod policy;

pub use controller::{RetryController, RetryDecision};
pub use policy::RetryPolicy;
