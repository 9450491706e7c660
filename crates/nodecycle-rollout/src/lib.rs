//! nodecycle rolling replacement engine.
//!
//! Replaces outdated fleet members with fresh ones while the cluster keeps
//! running, persisting enough state on each group to survive a restart.
//!
//! # Components
//!
//! - **`planner`**: classify members as current or outdated
//! - **`checkpoint`**: resumable state stored as group tags
//! - **`scaler`**: checkpointed, health-gated scale-up
//! - **`drain`**: cordon/taint and pod eviction
//! - **`retirement`**: per-member retirement, in order or in sweeps
//! - **`scale_down`**: restore original capacity and clear the checkpoint
//! - **`strategy`**: run-mode timing of scaling and cordoning
//! - **`engine`**: the run loop tying it together

pub mod checkpoint;
pub mod context;
pub mod drain;
pub mod engine;
pub mod error;
pub mod planner;
pub mod retirement;
pub mod scale_down;
pub mod scaler;
pub mod strategy;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use context::Context;
pub use engine::{Engine, GroupFailure, RunReport};
pub use error::CycleError;
pub use planner::{FleetPlanner, GroupPlan, PlanBasis, UpdatePlan};
pub use scaler::ScaleController;
pub use strategy::{CordonTiming, RunModeStrategy};
