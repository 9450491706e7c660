//! Top-level run loop.
//!
//! Plans once, pauses the cluster autoscaler for the whole run, processes
//! each group according to the run mode, and resumes the autoscaler on
//! every exit path. A recoverable group failure rolls that group back and
//! the run continues; a fatal one stops the run.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use nodecycle_core::dry_run::{DryRunFleet, DryRunOrchestrator};
use nodecycle_core::nodes::node_for_member;
use nodecycle_core::types::OrchestratorNode;
use nodecycle_core::{CycleConfig, Error, FleetApi, OrchestratorApi, Result};

use crate::checkpoint::Checkpoint;
use crate::context::Context;
use crate::error::CycleError;
use crate::planner::{FleetPlanner, GroupPlan, UpdatePlan};
use crate::retirement::MemberRetirement;
use crate::scale_down::ScaleDownController;
use crate::scaler::ScaleController;
use crate::strategy::{CordonTiming, RunModeStrategy};

/// A group that was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    pub group: String,
    pub reason: String,
}

/// What happened to each planned group.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<GroupFailure>,
}

impl RunReport {
    fn has_failed(&self, group: &str) -> bool {
        self.failed.iter().any(|f| f.group == group)
    }
}

pub struct Engine {
    fleet: Box<dyn FleetApi>,
    orchestrator: Box<dyn OrchestratorApi>,
    config: CycleConfig,
}

impl Engine {
    /// Build an engine. With `config.dry_run` set both clients are wrapped
    /// so that no mutation reaches either control plane.
    pub fn new<F, O>(fleet: F, orchestrator: O, config: CycleConfig) -> Self
    where
        F: FleetApi + 'static,
        O: OrchestratorApi + 'static,
    {
        let (fleet, orchestrator): (Box<dyn FleetApi>, Box<dyn OrchestratorApi>) =
            if config.dry_run {
                info!("dry run: mutating calls will be logged and skipped");
                (
                    Box::new(DryRunFleet::new(fleet)),
                    Box::new(DryRunOrchestrator::new(orchestrator)),
                )
            } else {
                (Box::new(fleet), Box::new(orchestrator))
            };
        Self {
            fleet,
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    fn ctx(&self) -> Context<'_> {
        Context::new(&*self.fleet, &*self.orchestrator, &self.config)
    }

    /// Classify every owned group without mutating anything.
    pub async fn plan(&self) -> Result<UpdatePlan> {
        let strategy = RunModeStrategy::from_config(&self.config);
        FleetPlanner::new(self.ctx())
            .plan(strategy.plan_basis(), Utc::now())
            .await
    }

    /// Execute a full rolling update.
    pub async fn run(&self) -> std::result::Result<RunReport, CycleError> {
        let plan = self.plan().await.map_err(CycleError::Fatal)?;
        info!(
            groups = plan.groups.len(),
            outdated = plan.outdated_total(),
            mode = ?self.config.run_mode,
            "starting rolling update"
        );

        let mut report = RunReport {
            skipped: plan.skipped.iter().map(|s| s.name.clone()).collect(),
            ..RunReport::default()
        };

        let outcome = match self.pause_autoscaler().await {
            Ok(()) => self.update_groups(&plan, &mut report).await,
            Err(e) => Err(CycleError::Fatal(e)),
        };
        let resumed = self.resume_autoscaler().await;

        if let Err(e) = outcome {
            if let Err(resume_err) = resumed {
                error!(error = %resume_err, "cluster autoscaler needs resuming manually");
            }
            error!(error = %e, "rolling update failed");
            return Err(e);
        }
        resumed.map_err(CycleError::Fatal)?;

        if !report.failed.is_empty() {
            let groups: Vec<String> = report.failed.iter().map(|f| f.group.clone()).collect();
            for failure in &report.failed {
                error!(group = %failure.group, reason = %failure.reason, "group rolled back");
            }
            return Err(CycleError::Fatal(Error::RunFailed { groups }));
        }

        info!(completed = report.completed.len(), "rolling update of all groups complete");
        Ok(report)
    }

    async fn update_groups(
        &self,
        plan: &UpdatePlan,
        report: &mut RunReport,
    ) -> std::result::Result<(), CycleError> {
        let ctx = self.ctx();
        let strategy = RunModeStrategy::from_config(&self.config);

        let mut active: Vec<&GroupPlan> = Vec::new();
        for g in &plan.groups {
            if !g.outdated.is_empty() {
                active.push(g);
                continue;
            }
            // Every member retired but the group never reached scale-down.
            match ctx.checkpoints().load(&g.group) {
                Ok(Some(checkpoint)) => {
                    info!(
                        group = g.name(),
                        target = checkpoint.target,
                        "no outdated members left, finishing interrupted run"
                    );
                    active.push(g);
                }
                Ok(None) => {
                    info!(group = g.name(), "no outdated members, skipping group");
                    report.skipped.push(g.name().to_string());
                }
                Err(e) => self.fail_group(g.name(), e, report).await?,
            }
        }

        let mut checkpoints: HashMap<String, Checkpoint> = HashMap::new();
        if strategy.scales_all_first() {
            let scaler = ScaleController::new(ctx);
            for g in &active {
                match scaler.scale_up(&g.group, g.outdated.len() as u32).await {
                    Ok(checkpoint) => {
                        checkpoints.insert(g.name().to_string(), checkpoint);
                    }
                    Err(e) => self.fail_group(g.name(), e, report).await?,
                }
            }
        }

        if strategy.cordon_timing() == CordonTiming::AllGroupsUpFront {
            let nodes = ctx.managed_nodes().await.map_err(CycleError::Fatal)?;
            for g in &active {
                if report.has_failed(g.name()) {
                    continue;
                }
                if let Err(e) = self.cordon_outdated(g, &nodes).await {
                    self.fail_group(g.name(), e, report).await?;
                }
            }
        }

        for g in &active {
            if report.has_failed(g.name()) {
                continue;
            }
            let existing = checkpoints.get(g.name()).copied();
            match self.update_group(g, existing, &strategy).await {
                Ok(()) => report.completed.push(g.name().to_string()),
                Err(e) => self.fail_group(g.name(), e, report).await?,
            }
        }
        Ok(())
    }

    /// Scale (unless already done), cordon per the run mode, retire every
    /// outdated member, and restore the group.
    async fn update_group(
        &self,
        g: &GroupPlan,
        existing: Option<Checkpoint>,
        strategy: &RunModeStrategy,
    ) -> Result<()> {
        let ctx = self.ctx();
        let name = g.name();
        info!(group = name, outdated = g.outdated.len(), "updating group");

        let checkpoint = match existing {
            Some(checkpoint) => checkpoint,
            None => {
                ScaleController::new(ctx)
                    .scale_up(&g.group, g.outdated.len() as u32)
                    .await?
            }
        };

        let nodes = ctx.managed_nodes().await?;
        if strategy.cordon_timing() == CordonTiming::GroupUpFront {
            self.cordon_outdated(g, &nodes).await?;
        }

        if self.config.removal.suspend_processes {
            info!(group = name, "suspending group launch and replace-unhealthy processes");
            self.fleet.suspend_processes(name).await?;
        }

        let retirement = MemberRetirement::new(ctx);
        let mut target = checkpoint.target;
        if strategy.workload_gated() {
            retirement
                .retire_in_sweeps(name, &g.outdated, &nodes, &mut target)
                .await?;
        } else {
            let cordon_each = strategy.cordon_timing() == CordonTiming::BeforeDrain;
            retirement
                .retire_in_order(name, &g.outdated, &nodes, cordon_each, &mut target)
                .await?;
        }

        ScaleDownController::new(ctx)
            .scale_down(name, &checkpoint)
            .await
    }

    async fn cordon_outdated(&self, g: &GroupPlan, nodes: &[OrchestratorNode]) -> Result<()> {
        let retirement = MemberRetirement::new(self.ctx());
        for member in &g.outdated {
            let node = node_for_member(nodes, member)?;
            retirement.drainer().make_unschedulable(&node.name).await?;
        }
        Ok(())
    }

    /// Roll `group` back and record it, or escalate when the error is fatal.
    async fn fail_group(
        &self,
        group: &str,
        err: Error,
        report: &mut RunReport,
    ) -> std::result::Result<(), CycleError> {
        let err = CycleError::in_group(group, err);
        error!(group, error = %err, "group failed, rolling back");
        self.rollback(group).await;
        match err {
            CycleError::Recoverable { group, reason } => {
                report.failed.push(GroupFailure {
                    group,
                    reason: reason.to_string(),
                });
                Ok(())
            }
            fatal @ CycleError::Fatal(_) => Err(fatal),
        }
    }

    async fn rollback(&self, group: &str) {
        if let Err(e) = self.fleet.resume_processes(group).await {
            warn!(group, error = %e, "could not resume group processes, resume them manually");
        }
    }

    async fn pause_autoscaler(&self) -> Result<()> {
        let autoscaler = &self.config.autoscaler;
        if !autoscaler.enabled {
            return Ok(());
        }
        info!(deployment = %autoscaler.deployment, "pausing cluster autoscaler");
        self.orchestrator
            .scale_deployment(&autoscaler.namespace, &autoscaler.deployment, 0)
            .await
    }

    async fn resume_autoscaler(&self) -> Result<()> {
        let autoscaler = &self.config.autoscaler;
        if !autoscaler.enabled {
            return Ok(());
        }
        info!(
            deployment = %autoscaler.deployment,
            replicas = autoscaler.replicas,
            "resuming cluster autoscaler"
        );
        self.orchestrator
            .scale_deployment(
                &autoscaler.namespace,
                &autoscaler.deployment,
                autoscaler.replicas,
            )
            .await
    }
}
