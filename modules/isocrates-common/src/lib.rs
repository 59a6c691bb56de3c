pub mod breaker;
pub mod config;
pub mod error;
pub mod types;

pub use breaker::{
    get_breaker, reset_all, run_with_timeout, Breaker, BreakerState, CircuitBreakerOpen, RunError,
};
pub use config::{Config, TierEndpoint};
pub use error::Error;
pub use types::*;
