//! Grow a group by its outdated count before anything is retired.
//!
//! The checkpoint is written before the first capacity change, so a crash
//! at any later point resumes against the same target. Capacity is raised
//! in one step or in `scale.batch_size` increments, with a settle pause
//! and a full health validation after every increment.

use tracing::info;

use nodecycle_core::Result;
use nodecycle_core::types::FleetGroup;

use crate::checkpoint::Checkpoint;
use crate::context::Context;

pub struct ScaleController<'a> {
    ctx: Context<'a>,
}

impl<'a> ScaleController<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Raise `group` by `outdated` members and wait until the cluster is
    /// healthy at the new size. Returns the checkpoint in effect.
    pub async fn scale_up(&self, group: &FleetGroup, outdated: u32) -> Result<Checkpoint> {
        let name = group.name.as_str();
        let health = self.ctx.health();

        // A crashed run may have left the group's own processes suspended.
        self.ctx.fleet.resume_processes(name).await?;

        if let Some(checkpoint) = self.ctx.checkpoints().load(group)? {
            info!(
                group = name,
                target = checkpoint.target,
                current = group.desired_capacity,
                "found checkpoint from a previous run, keeping its target"
            );
            let expected = health.expected_node_count().await?;
            health.validate(name, checkpoint.target, expected).await?;
            return Ok(checkpoint);
        }

        let checkpoint = Checkpoint {
            target: group.desired_capacity + outdated,
            original_desired: group.desired_capacity,
            original_max: group.max_size,
        };
        self.ctx.checkpoints().save(name, &checkpoint).await?;

        let max = checkpoint.original_max.max(checkpoint.target);
        let steps = capacity_steps(
            checkpoint.original_desired,
            checkpoint.target,
            self.ctx.config.scale.batch_size,
        );
        let total = steps.len();
        for (i, desired) in steps.into_iter().enumerate() {
            info!(
                group = name,
                desired,
                max,
                step = i + 1,
                total,
                "scaling group up"
            );
            self.ctx.fleet.set_capacity(name, desired, max).await?;
            self.ctx
                .pause("group scale-up settling", self.ctx.config.health.settle_wait)
                .await;
            let expected = health.expected_node_count().await?;
            health.validate(name, desired, expected).await?;
        }

        Ok(checkpoint)
    }
}

/// Intermediate desired capacities from `from` up to `to`, each step at most
/// `batch` larger than the previous one. A zero batch means one step.
pub fn capacity_steps(from: u32, to: u32, batch: u32) -> Vec<u32> {
    if to <= from {
        return Vec::new();
    }
    if batch == 0 {
        return vec![to];
    }
    let mut steps = Vec::new();
    let mut current = from;
    while current < to {
        current = (current + batch).min(to);
        steps.push(current);
    }
    steps
}
