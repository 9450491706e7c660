//! Restore a group to its pre-run shape once its outdated members are gone.

use tracing::info;

use nodecycle_core::Result;

use crate::checkpoint::Checkpoint;
use crate::context::Context;

pub struct ScaleDownController<'a> {
    ctx: Context<'a>,
}

impl<'a> ScaleDownController<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Restore desired and max capacity, resume suspended processes, and
    /// clear the checkpoint. Only after this does a group count as done.
    pub async fn scale_down(&self, group: &str, checkpoint: &Checkpoint) -> Result<()> {
        info!(
            group,
            desired = checkpoint.original_desired,
            max = checkpoint.original_max,
            "restoring original capacity"
        );
        self.ctx
            .fleet
            .set_capacity(group, checkpoint.original_desired, checkpoint.original_max)
            .await?;
        if self.ctx.config.removal.suspend_processes {
            self.ctx.fleet.resume_processes(group).await?;
        }
        self.ctx.checkpoints().clear(group).await?;
        info!(group, "rolling update of group complete");
        Ok(())
    }
}
