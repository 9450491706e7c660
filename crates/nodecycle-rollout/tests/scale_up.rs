use std::time::Duration;

use nodecycle_core::config::CycleConfig;
use nodecycle_core::fake::{Call, FakeCloud, TEST_CLUSTER, group, member};
use nodecycle_core::Error;
use nodecycle_rollout::{Checkpoint, Context, ScaleController};

fn config() -> CycleConfig {
    let mut config = CycleConfig {
        cluster_name: TEST_CLUSTER.to_string(),
        ..CycleConfig::default()
    };
    config.health.max_attempts = 2;
    config.health.interval = Duration::ZERO;
    config.health.settle_wait = Duration::ZERO;
    config
}

fn members(n: usize) -> Vec<nodecycle_core::types::FleetMember> {
    (1..=n).map(|i| member(&format!("i-{i}"))).collect()
}

fn capacity_calls(cloud: &FakeCloud) -> Vec<(u32, u32)> {
    cloud
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::SetCapacity { desired, max, .. } => Some((desired, max)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn existing_checkpoint_is_authoritative() {
    let mut g = group("ng-1", 5, 6, members(5));
    for (k, v) in [
        ("nodecycle:desired_capacity", "5"),
        ("nodecycle:original_capacity", "3"),
        ("nodecycle:original_max_capacity", "6"),
    ] {
        g.tags.insert(k.into(), v.into());
    }
    let cloud = FakeCloud::new(vec![g.clone()]);
    let config = config();
    let ctx = Context::new(&cloud, &cloud, &config);

    // Asked for 2 more; the tag wins and nothing is scaled.
    let checkpoint = ScaleController::new(ctx).scale_up(&g, 2).await.unwrap();
    assert_eq!(
        checkpoint,
        Checkpoint {
            target: 5,
            original_desired: 3,
            original_max: 6
        }
    );
    assert!(capacity_calls(&cloud).is_empty());
    assert_eq!(cloud.calls(), vec![Call::Resume("ng-1".into())]);
}

#[tokio::test]
async fn fresh_run_writes_one_checkpoint_before_scaling() {
    let g = group("ng-1", 3, 6, members(3));
    let cloud = FakeCloud::new(vec![g.clone()]);
    let config = config();
    let ctx = Context::new(&cloud, &cloud, &config);

    let checkpoint = ScaleController::new(ctx).scale_up(&g, 1).await.unwrap();
    assert_eq!(
        checkpoint,
        Checkpoint {
            target: 4,
            original_desired: 3,
            original_max: 6
        }
    );

    let calls = cloud.calls();
    let first_scale = calls
        .iter()
        .position(|c| matches!(c, Call::SetCapacity { .. }))
        .unwrap();
    let tag_writes = calls[..first_scale]
        .iter()
        .filter(|c| matches!(c, Call::PutTag { .. }))
        .count();
    assert_eq!(tag_writes, 3);
    assert_eq!(capacity_calls(&cloud), vec![(4, 6)]);

    let after = cloud.group("ng-1");
    assert_eq!(after.tag("nodecycle:desired_capacity"), Some("4"));
    assert_eq!(after.tag("nodecycle:original_capacity"), Some("3"));
    assert_eq!(after.tag("nodecycle:original_max_capacity"), Some("6"));
}

#[tokio::test]
async fn max_size_is_raised_when_target_exceeds_it() {
    let g = group("ng-1", 3, 3, members(3));
    let cloud = FakeCloud::new(vec![g.clone()]);
    let config = config();
    let ctx = Context::new(&cloud, &cloud, &config);

    let checkpoint = ScaleController::new(ctx).scale_up(&g, 2).await.unwrap();
    assert_eq!(checkpoint.original_max, 3);
    assert_eq!(capacity_calls(&cloud), vec![(5, 5)]);
}

#[tokio::test]
async fn batches_are_validated_one_by_one() {
    let g = group("ng-1", 3, 10, members(3));
    let cloud = FakeCloud::new(vec![g.clone()]);
    let mut config = config();
    config.scale.batch_size = 2;
    let ctx = Context::new(&cloud, &cloud, &config);

    ScaleController::new(ctx).scale_up(&g, 5).await.unwrap();

    let steps = capacity_calls(&cloud);
    assert_eq!(steps, vec![(5, 10), (7, 10), (8, 10)]);
    let increments: Vec<u32> = std::iter::once(3)
        .chain(steps.iter().map(|(d, _)| *d))
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect();
    assert_eq!(increments.iter().sum::<u32>(), 5);
    assert!(increments.iter().all(|i| *i <= 2));
    // Every validation passes on its first attempt: one describe per increment.
    assert_eq!(cloud.with_state(|s| s.describes), 3);
}

#[tokio::test]
async fn unhealthy_scale_up_fails_after_attempts() {
    let g = group("ng-1", 3, 6, members(3));
    let cloud = FakeCloud::new(vec![g.clone()]);
    cloud.with_state(|s| s.auto_provision = false);
    let config = config();
    let ctx = Context::new(&cloud, &cloud, &config);

    let err = ScaleController::new(ctx).scale_up(&g, 1).await.unwrap_err();
    assert!(matches!(err, Error::HealthCheckFailed { attempts: 2, .. }));
    assert!(!err.is_fatal());
    // The checkpoint stays behind for the next run.
    assert_eq!(
        cloud.group("ng-1").tag("nodecycle:desired_capacity"),
        Some("4")
    );
}
