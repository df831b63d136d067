//! Risk protection for the execution path.

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerConfig, BreakerState, CircuitBreaker, OPEN_REJECT_REASON,
};
