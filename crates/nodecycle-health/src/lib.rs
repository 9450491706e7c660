//! Cluster health validation.
//!
//! Nothing destructive happens to a group until [`HealthValidator`] has
//! confirmed that the fleet group and the orchestrator agree.

pub mod validator;

pub use validator::HealthValidator;
