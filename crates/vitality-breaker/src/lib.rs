//! Circuit-breaker fabric: a registry of named breakers with a uniform
//! three-state machine, shared by every outbound dependency.

mod breaker;
mod registry;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use registry::BreakerRegistry;
