//! Custom Resource Definitions for the WebApp operator

mod types;
mod webapp;

pub use types::{Condition, ConditionStatus, WebAppPhase};
pub use webapp::{WebApp, WebAppSpec, WebAppStatus, DEFAULT_PORT};
