//! Resumable run state stored as tags on the fleet group itself.
//!
//! A present target tag is authoritative: a restarted run reuses it and
//! never computes a fresh target, so repeated restarts cannot keep
//! growing the group.

use serde::Serialize;
use tracing::{debug, info};

use nodecycle_core::config::CheckpointKeys;
use nodecycle_core::types::FleetGroup;
use nodecycle_core::{Error, FleetApi, Result};

/// The capacity triple recorded before a group is first scaled up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    /// Desired capacity the run is driving toward. Decremented as members retire.
    pub target: u32,
    pub original_desired: u32,
    pub original_max: u32,
}

pub struct CheckpointStore<'a> {
    fleet: &'a dyn FleetApi,
    keys: &'a CheckpointKeys,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(fleet: &'a dyn FleetApi, keys: &'a CheckpointKeys) -> Self {
        Self { fleet, keys }
    }

    /// Read the checkpoint from a group snapshot.
    ///
    /// `None` when no target tag is present. A target tag without readable
    /// original values cannot be resumed safely and is an error.
    pub fn load(&self, group: &FleetGroup) -> Result<Option<Checkpoint>> {
        let Some(target) = group.tag(&self.keys.desired_key) else {
            return Ok(None);
        };
        let read = |key: &str, value: Option<&str>| -> Result<u32> {
            let value = value.ok_or_else(|| Error::Checkpoint {
                group: group.name.clone(),
                reason: format!("tag {key} is missing"),
            })?;
            value.trim().parse().map_err(|_| Error::Checkpoint {
                group: group.name.clone(),
                reason: format!("tag {key} has non-numeric value {value:?}"),
            })
        };

        let checkpoint = Checkpoint {
            target: read(&self.keys.desired_key, Some(target))?,
            original_desired: read(
                &self.keys.original_key,
                group.tag(&self.keys.original_key),
            )?,
            original_max: read(
                &self.keys.original_max_key,
                group.tag(&self.keys.original_max_key),
            )?,
        };
        debug!(group = %group.name, ?checkpoint, "loaded checkpoint");
        Ok(Some(checkpoint))
    }

    /// Write all three tags. The target goes last: its presence is what
    /// marks a checkpoint, so an interrupted save leaves no partial one.
    pub async fn save(&self, group: &str, checkpoint: &Checkpoint) -> Result<()> {
        info!(group, ?checkpoint, "writing checkpoint tags");
        self.fleet
            .put_tag(
                group,
                &self.keys.original_key,
                &checkpoint.original_desired.to_string(),
            )
            .await?;
        self.fleet
            .put_tag(
                group,
                &self.keys.original_max_key,
                &checkpoint.original_max.to_string(),
            )
            .await?;
        self.fleet
            .put_tag(group, &self.keys.desired_key, &checkpoint.target.to_string())
            .await
    }

    /// Persist a new running target after a member is retired.
    pub async fn record_target(&self, group: &str, target: u32) -> Result<()> {
        debug!(group, target, "recording checkpoint target");
        self.fleet
            .put_tag(group, &self.keys.desired_key, &target.to_string())
            .await
    }

    /// Delete all three tags. The group's run is complete.
    pub async fn clear(&self, group: &str) -> Result<()> {
        info!(group, "clearing checkpoint tags");
        for key in [
            &self.keys.desired_key,
            &self.keys.original_key,
            &self.keys.original_max_key,
        ] {
            self.fleet.delete_tag(group, key).await?;
        }
        Ok(())
    }
}
