//! Run modes: when scaling and cordoning happen relative to draining.

use nodecycle_core::RunMode;
use nodecycle_core::config::CycleConfig;

use crate::planner::PlanBasis;

/// When outdated nodes are made unschedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CordonTiming {
    /// Every group's outdated nodes, after every group has scaled.
    AllGroupsUpFront,
    /// A group's outdated nodes, right after that group scales.
    GroupUpFront,
    /// Each node immediately before its own drain.
    BeforeDrain,
}

/// The behaviour selected by `run_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunModeStrategy {
    pub mode: RunMode,
    max_age_days: u32,
}

impl RunModeStrategy {
    pub fn from_config(config: &CycleConfig) -> Self {
        Self {
            mode: config.run_mode,
            max_age_days: config.workload.max_age_days,
        }
    }

    pub fn plan_basis(&self) -> PlanBasis {
        match self.mode {
            RunMode::WorkloadGated => PlanBasis::Age {
                max_age_days: self.max_age_days,
            },
            _ => PlanBasis::Descriptor,
        }
    }

    /// Whether every group scales up before any cordoning or draining.
    pub fn scales_all_first(&self) -> bool {
        self.mode == RunMode::ScaleAllFirst
    }

    pub fn cordon_timing(&self) -> CordonTiming {
        match self.mode {
            RunMode::Sequential | RunMode::WorkloadGated => CordonTiming::GroupUpFront,
            RunMode::ScaleAllFirst => CordonTiming::AllGroupsUpFront,
            RunMode::CordonBeforeDrain => CordonTiming::BeforeDrain,
        }
    }

    /// Whether drains wait for labeled workloads to finish.
    pub fn workload_gated(&self) -> bool {
        self.mode == RunMode::WorkloadGated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(mode: RunMode) -> RunModeStrategy {
        RunModeStrategy::from_config(&CycleConfig {
            run_mode: mode,
            ..CycleConfig::default()
        })
    }

    #[test]
    fn modes_differ_only_in_timing() {
        let one = strategy(RunMode::Sequential);
        assert_eq!(one.cordon_timing(), CordonTiming::GroupUpFront);
        assert!(!one.scales_all_first());
        assert_eq!(one.plan_basis(), PlanBasis::Descriptor);

        let two = strategy(RunMode::ScaleAllFirst);
        assert!(two.scales_all_first());
        assert_eq!(two.cordon_timing(), CordonTiming::AllGroupsUpFront);

        let three = strategy(RunMode::CordonBeforeDrain);
        assert_eq!(three.cordon_timing(), CordonTiming::BeforeDrain);
        assert!(!three.workload_gated());

        let four = strategy(RunMode::WorkloadGated);
        assert!(four.workload_gated());
        assert_eq!(four.plan_basis(), PlanBasis::Age { max_age_days: 30 });
    }
}
