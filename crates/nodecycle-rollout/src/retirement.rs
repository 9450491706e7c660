//! Retire outdated members one at a time.
//!
//! Per member: cordon (unless already done), drain, delete the node,
//! persist the decremented target, remove the member from its group, and
//! wait for the removal to converge. No step is skipped.

use tracing::{info, warn};

use nodecycle_core::config::RemovalPolicy;
use nodecycle_core::nodes::node_for_member;
use nodecycle_core::types::{FleetMember, OrchestratorNode};
use nodecycle_core::{Error, Result};

use crate::context::Context;
use crate::drain::NodeDrainer;

/// Where a single node is in its retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetirementStep {
    Cordoned,
    Drained,
    NodeRemoved,
    MemberRemoved,
    Retired,
}

pub struct MemberRetirement<'a> {
    ctx: Context<'a>,
    drainer: NodeDrainer<'a>,
}

impl<'a> MemberRetirement<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self {
            ctx,
            drainer: NodeDrainer::new(ctx),
        }
    }

    pub fn drainer(&self) -> &NodeDrainer<'a> {
        &self.drainer
    }

    /// Retire `members` in list order. `target` is the running checkpoint
    /// target and is decremented once per retired member.
    pub async fn retire_in_order(
        &self,
        group: &str,
        members: &[FleetMember],
        nodes: &[OrchestratorNode],
        cordon_each: bool,
        target: &mut u32,
    ) -> Result<()> {
        for (i, member) in members.iter().enumerate() {
            if i > 0 {
                self.between_members().await;
            }
            let node = node_for_member(nodes, member)?;
            self.retire(group, member, node, cordon_each, target).await?;
        }
        Ok(())
    }

    /// Retire `members` in repeated sweeps, skipping any node that still
    /// runs a pod matching `workload.label_selector`. Sleeps
    /// `workload.wait` between sweeps until every member is gone.
    pub async fn retire_in_sweeps(
        &self,
        group: &str,
        members: &[FleetMember],
        nodes: &[OrchestratorNode],
        target: &mut u32,
    ) -> Result<()> {
        let selector = self.ctx.config.workload.label_selector.as_str();
        let mut pending: Vec<&FleetMember> = members.iter().collect();
        let mut sweep = 0u32;
        let mut retired_any = false;

        while !pending.is_empty() {
            sweep += 1;
            let mut waiting = Vec::new();
            for member in pending {
                let node = node_for_member(nodes, member)?;
                let busy = self
                    .ctx
                    .orchestrator
                    .list_pods(&node.name, Some(selector), true)
                    .await?;
                if !busy.is_empty() && !self.ctx.config.dry_run {
                    info!(
                        group,
                        node = %node.name,
                        running = busy.len(),
                        sweep,
                        "workload still running, revisiting later"
                    );
                    waiting.push(member);
                    continue;
                }
                if retired_any {
                    self.between_members().await;
                }
                self.retire(group, member, node, false, target).await?;
                retired_any = true;
            }
            pending = waiting;
            if !pending.is_empty() {
                info!(group, waiting = pending.len(), sweep, "sweep finished with busy nodes");
                self.ctx
                    .pause("workload sweep", self.ctx.config.workload.wait)
                    .await;
            }
        }
        Ok(())
    }

    /// Walk one member through every retirement step.
    pub async fn retire(
        &self,
        group: &str,
        member: &FleetMember,
        node: &OrchestratorNode,
        cordon: bool,
        target: &mut u32,
    ) -> Result<()> {
        let instance = member.instance_id.as_str();
        info!(group, instance, node = %node.name, "retiring member");

        if cordon {
            self.drainer.make_unschedulable(&node.name).await?;
            trace_step(instance, RetirementStep::Cordoned);
        }

        self.drainer.drain(&node.name).await?;
        trace_step(instance, RetirementStep::Drained);
        self.ctx
            .pause("post-drain", self.ctx.config.removal.post_drain_wait)
            .await;

        self.ctx.orchestrator.delete_node(&node.name).await?;
        trace_step(instance, RetirementStep::NodeRemoved);

        *target = target.saturating_sub(1);
        self.ctx.checkpoints().record_target(group, *target).await?;

        let removal = &self.ctx.config.removal;
        match removal.policy {
            RemovalPolicy::Terminate => {
                self.ctx
                    .fleet
                    .terminate_member(instance, removal.decrement_capacity)
                    .await?;
                trace_step(instance, RetirementStep::MemberRemoved);
                self.await_terminated(instance).await?;
            }
            RemovalPolicy::Detach => {
                self.ctx
                    .fleet
                    .detach_member(group, instance, removal.decrement_capacity)
                    .await?;
                trace_step(instance, RetirementStep::MemberRemoved);
                self.await_detached(instance).await?;
            }
        }

        trace_step(instance, RetirementStep::Retired);
        info!(group, instance, remaining_target = *target, "member retired");
        Ok(())
    }

    async fn await_terminated(&self, instance: &str) -> Result<()> {
        if self.ctx.config.dry_run {
            info!(instance, "skipping termination wait (dry run)");
            return Ok(());
        }
        let accept_stopping = self.ctx.config.removal.accept_stopping;
        self.ctx
            .config
            .health_retry()
            .poll(&format!("instance {instance} to stop"), |attempt| async move {
                let state = self.ctx.fleet.member_lifecycle(instance).await?;
                info!(instance, ?state, attempt, "checking instance state");
                Ok(state.is_stopped() || (accept_stopping && state.is_stopping()))
            })
            .await
            .map_err(|e| removal_timeout(e, instance, "terminate"))?;
        Ok(())
    }

    async fn await_detached(&self, instance: &str) -> Result<()> {
        if self.ctx.config.dry_run {
            info!(instance, "skipping detachment wait (dry run)");
            return Ok(());
        }
        self.ctx
            .config
            .health_retry()
            .poll(&format!("instance {instance} to detach"), |_| async move {
                Ok(self.ctx.fleet.member_group(instance).await?.is_none())
            })
            .await
            .map_err(|e| removal_timeout(e, instance, "detach"))?;
        Ok(())
    }

    async fn between_members(&self) {
        self.ctx
            .pause("between members", self.ctx.config.removal.between_members_wait)
            .await;
    }
}

fn trace_step(instance: &str, step: RetirementStep) {
    tracing::debug!(instance, ?step, "retirement step reached");
}

fn removal_timeout(err: Error, instance: &str, action: &str) -> Error {
    if let Error::Timeout { attempts, .. } = &err {
        warn!(instance, attempts, "instance failed to {action}");
    }
    err
}
