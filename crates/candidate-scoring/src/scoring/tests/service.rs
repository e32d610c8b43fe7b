use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::scoring::config::ScoringConfig;
use crate::scoring::domain::{ApplicantId, ComponentKey, ComponentUpdate, StatusFlag, ValidationError};
use crate::scoring::lock::LockWait;
use crate::scoring::repository::{
    ComponentStore, CompositeSnapshotStore, InMemoryComponentStore, InMemorySnapshotStore,
};
use crate::scoring::service::{BatchItem, ScoringError};

#[tokio::test]
async fn update_stores_component_and_persists_snapshot() {
    let (service, components, snapshots) = build_service();

    service
        .update_component_and_recompute(
            APPLICANT,
            "psymetrics",
            ComponentUpdate::scored(90.0)
                .with_raw(132.0)
                .with_meta("session_id", "psy-88"),
            LockWait::Request,
        )
        .await
        .expect("psymetrics accepted");
    let result = service
        .update_component_and_recompute(
            APPLICANT,
            "autoproctor",
            ComponentUpdate::scored(80.0).with_flag(" Camera_Glitch "),
            LockWait::Request,
        )
        .await
        .expect("autoproctor accepted");

    assert_close(result.composite, 86.67);
    assert_eq!(result.status_flag, StatusFlag::Provisional);

    let stored = components.get_all(APPLICANT).expect("components readable");
    let proctor = &stored[&ComponentKey::Autoproctor];
    assert!(proctor.flags.contains("camera_glitch"));
    assert_eq!(proctor.updated_at, stamp());
    assert_eq!(stored[&ComponentKey::Psymetrics].raw, Some(132.0));

    let snapshot = snapshots
        .get(APPLICANT)
        .expect("snapshot readable")
        .expect("snapshot present");
    assert_eq!(snapshot, result);
}

#[tokio::test]
async fn unknown_component_is_rejected_without_side_effects() {
    let (service, components, snapshots) = build_service();

    let err = service
        .update_component_and_recompute(
            APPLICANT,
            "psychometrics",
            ComponentUpdate::scored(50.0),
            LockWait::Request,
        )
        .await
        .expect_err("typo rejected");

    assert!(!err.is_retryable());
    match err {
        ScoringError::Validation(ValidationError::UnknownComponent(key)) => {
            assert_eq!(key, "psychometrics")
        }
        other => panic!("expected unknown component, got {other:?}"),
    }
    assert!(components.get_all(APPLICANT).expect("readable").is_empty());
    assert!(snapshots.get(APPLICANT).expect("readable").is_none());
}

#[tokio::test]
async fn malformed_norms_are_rejected() {
    let (service, components, _) = build_service();

    for update in [
        ComponentUpdate::scored(100.5),
        ComponentUpdate::scored(-1.0),
        ComponentUpdate::scored(f64::NAN),
        ComponentUpdate::default().with_raw(f64::INFINITY),
        ComponentUpdate::scored(50.0).with_flag("   "),
    ] {
        let result = service
            .update_component_and_recompute(APPLICANT, "skills", update, LockWait::Request)
            .await;
        assert!(
            matches!(result, Err(ScoringError::Validation(_))),
            "expected validation error, got {result:?}"
        );
    }
    assert!(components.get_all(APPLICANT).expect("readable").is_empty());
}

#[tokio::test]
async fn repeating_an_update_is_idempotent() {
    let (service, _, _) = build_service();
    let update = ComponentUpdate::scored(77.0).with_flag("late_submission");

    let first = service
        .update_component_and_recompute(APPLICANT, "physical", update.clone(), LockWait::Request)
        .await
        .expect("first apply");
    let second = service
        .update_component_and_recompute(APPLICANT, "physical", update, LockWait::Request)
        .await
        .expect("second apply");

    assert_eq!(first, second);
}

#[tokio::test]
async fn later_update_replaces_the_previous_value_for_a_key() {
    let (service, components, _) = build_service();

    for norm in [40.0, 95.0] {
        service
            .update_component_and_recompute(
                APPLICANT,
                "skills",
                ComponentUpdate::scored(norm),
                LockWait::Request,
            )
            .await
            .expect("skills accepted");
    }

    let stored = components.get_all(APPLICANT).expect("readable");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[&ComponentKey::Skills].norm, Some(95.0));
}

#[tokio::test]
async fn disqualification_is_recomputed_from_current_flags() {
    let (service, _, _) = build_service();
    for key in ["psymetrics", "autoproctor", "skills"] {
        service
            .update_component_and_recompute(
                APPLICANT,
                key,
                ComponentUpdate::scored(90.0),
                LockWait::Request,
            )
            .await
            .expect("clean component");
    }

    let flagged = service
        .update_component_and_recompute(
            APPLICANT,
            "physical",
            ComponentUpdate::scored(95.0).with_flag("not_cleared"),
            LockWait::Request,
        )
        .await
        .expect("flagged physical");
    assert_eq!(flagged.status_flag, StatusFlag::Disqualified);

    let unrelated = service
        .update_component_and_recompute(
            APPLICANT,
            "skills",
            ComponentUpdate::scored(91.0),
            LockWait::Request,
        )
        .await
        .expect("skills refresh");
    assert_eq!(unrelated.status_flag, StatusFlag::Disqualified);

    let cleared = service
        .update_component_and_recompute(
            APPLICANT,
            "physical",
            ComponentUpdate::scored(95.0),
            LockWait::Request,
        )
        .await
        .expect("cleared physical");
    assert_eq!(cleared.status_flag, StatusFlag::Final);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_for_one_applicant_are_all_reflected() {
    for round in 0..25u64 {
        let (service, _, snapshots) = build_service();
        let applicant = ApplicantId(9_000 + round);

        let mut handles = Vec::new();
        for (offset, key) in ComponentKey::ALL.into_iter().enumerate() {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service
                    .update_component_and_recompute(
                        applicant,
                        key.as_str(),
                        ComponentUpdate::scored(60.0 + offset as f64),
                        LockWait::Batch,
                    )
                    .await
            }));
        }
        for handle in handles {
            handle
                .await
                .expect("task joined")
                .expect("update accepted");
        }

        let snapshot = snapshots
            .get(applicant)
            .expect("readable")
            .expect("snapshot present");
        assert_eq!(snapshot.components.len(), ComponentKey::ALL.len());
        assert_eq!(snapshot.present, ComponentKey::ALL.to_vec());
        assert_eq!(snapshot.status_flag, StatusFlag::Final);
    }
}

#[tokio::test]
async fn recompute_now_applies_new_weights_without_component_writes() {
    let (service, components, snapshots) = build_service();
    service
        .update_component_and_recompute(
            APPLICANT,
            "psymetrics",
            ComponentUpdate::scored(90.0),
            LockWait::Request,
        )
        .await
        .expect("psymetrics");
    let before = service
        .update_component_and_recompute(
            APPLICANT,
            "autoproctor",
            ComponentUpdate::scored(80.0),
            LockWait::Request,
        )
        .await
        .expect("autoproctor");

    let mut config = ScoringConfig::default();
    config.weights.insert(ComponentKey::Psymetrics, 20.0);
    config.weights.insert(ComponentKey::Autoproctor, 40.0);
    service.set_config(config.clone()).expect("config accepted");

    let untouched = snapshots.get(APPLICANT).expect("readable").expect("present");
    assert_eq!(untouched, before);

    let components_before = components.get_all(APPLICANT).expect("readable");
    let after = service
        .recompute_now(APPLICANT, LockWait::Request)
        .await
        .expect("recompute");

    assert_close(after.composite, 83.33);
    assert_eq!(after.weights, config.weights);
    assert_eq!(
        components.get_all(APPLICANT).expect("readable"),
        components_before
    );
}

#[tokio::test]
async fn recompute_now_without_components_is_pending() {
    let (service, _, snapshots) = build_service();

    let result = service
        .recompute_now(APPLICANT, LockWait::Request)
        .await
        .expect("recompute");

    assert_eq!(result.status_flag, StatusFlag::Pending);
    assert!(snapshots.get(APPLICANT).expect("readable").is_some());
}

#[tokio::test]
async fn failed_snapshot_write_is_reported_and_reconciled_later() {
    let components = Arc::new(InMemoryComponentStore::default());
    let snapshots = Arc::new(FlakySnapshotStore::default());
    let service = build_service_with(components.clone(), snapshots.clone());

    snapshots.fail(true);
    let err = service
        .update_component_and_recompute(
            APPLICANT,
            "skills",
            ComponentUpdate::scored(64.0),
            LockWait::Request,
        )
        .await
        .expect_err("snapshot outage surfaces");

    match &err {
        ScoringError::Snapshot {
            component_written, ..
        } => assert!(component_written),
        other => panic!("expected snapshot error, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(components
        .get_all(APPLICANT)
        .expect("readable")
        .contains_key(&ComponentKey::Skills));
    assert!(snapshots.get(APPLICANT).expect("readable").is_none());

    snapshots.fail(false);
    let repaired = service
        .recompute_now(APPLICANT, LockWait::Request)
        .await
        .expect("recompute succeeds");
    assert_eq!(repaired.present, vec![ComponentKey::Skills]);
    assert_eq!(
        snapshots.get(APPLICANT).expect("readable"),
        Some(repaired)
    );
}

#[tokio::test]
async fn component_store_outage_leaves_snapshot_untouched() {
    let snapshots = Arc::new(InMemorySnapshotStore::default());
    let service = build_service_with(Arc::new(UnavailableComponentStore), snapshots.clone());

    let err = service
        .update_component_and_recompute(
            APPLICANT,
            "medical",
            ComponentUpdate::scored(100.0),
            LockWait::Request,
        )
        .await
        .expect_err("store offline");

    assert!(matches!(err, ScoringError::ComponentStore(_)));
    assert!(err.is_retryable());
    assert!(snapshots.get(APPLICANT).expect("readable").is_none());
}

#[tokio::test]
async fn lock_timeout_is_retryable_and_writes_nothing() {
    let (service, components, _) = build_service();
    let held = service
        .lock()
        .acquire(APPLICANT, Duration::from_millis(50))
        .await
        .expect("lock free");

    let err = service
        .update_component_and_recompute(
            APPLICANT,
            "skills",
            ComponentUpdate::scored(70.0),
            LockWait::Within(Duration::from_millis(20)),
        )
        .await
        .expect_err("lock busy");

    assert!(matches!(err, ScoringError::LockTimeout(_)));
    assert!(err.is_retryable());
    assert!(components.get_all(APPLICANT).expect("readable").is_empty());
    drop(held);

    service
        .update_component_and_recompute(
            APPLICANT,
            "skills",
            ComponentUpdate::scored(70.0),
            LockWait::Request,
        )
        .await
        .expect("retry succeeds");
}

#[tokio::test]
async fn cancelled_waiter_does_not_apply_its_update() {
    let (service, components, snapshots) = build_service();
    let held = service
        .lock()
        .acquire(APPLICANT, Duration::from_millis(50))
        .await
        .expect("lock free");

    let pending = service.update_component_and_recompute(
        APPLICANT,
        "physical",
        ComponentUpdate::scored(88.0),
        LockWait::Within(Duration::from_secs(5)),
    );
    let outcome = tokio::time::timeout(Duration::from_millis(20), pending).await;
    assert!(outcome.is_err(), "caller gave up while waiting");
    drop(held);

    assert!(components.get_all(APPLICANT).expect("readable").is_empty());
    assert!(snapshots.get(APPLICANT).expect("readable").is_none());
}

#[tokio::test]
async fn invalid_config_is_rejected_and_previous_config_kept() {
    let (service, _, _) = build_service();
    let mut config = ScoringConfig::default();
    config.weights.insert(ComponentKey::Skills, -5.0);

    let err = service.set_config(config).expect_err("negative weight");

    assert!(matches!(err, ScoringError::Config(_)));
    assert_eq!(service.get_config(), ScoringConfig::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_reports_each_item_and_keeps_going() {
    let (service, _, snapshots) = build_service();
    let other = ApplicantId(77);
    let items = vec![
        BatchItem {
            applicant: APPLICANT,
            key: "psymetrics".to_string(),
            update: ComponentUpdate::scored(90.0),
        },
        BatchItem {
            applicant: other,
            key: "autoprocter".to_string(),
            update: ComponentUpdate::scored(50.0),
        },
        BatchItem {
            applicant: other,
            key: "skills".to_string(),
            update: ComponentUpdate::scored(65.0),
        },
        BatchItem {
            applicant: APPLICANT,
            key: "autoproctor".to_string(),
            update: ComponentUpdate::scored(80.0),
        },
    ];

    let outcomes = service.apply_batch(items).await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(
        outcomes.iter().map(|outcome| outcome.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert!(matches!(
        outcomes[1].result,
        Err(ScoringError::Validation(ValidationError::UnknownComponent(_)))
    ));
    assert!(outcomes[2].result.is_ok());

    let primary = snapshots.get(APPLICANT).expect("readable").expect("present");
    assert_close(primary.composite, 86.67);
    let secondary = snapshots.get(other).expect("readable").expect("present");
    assert_eq!(secondary.present, vec![ComponentKey::Skills]);
}
