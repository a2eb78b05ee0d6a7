use super::*;
use crate::controller::store::memory::{FailMode, MemoryStore, WriteOp};
use crate::crd::machine_deployment::{
    MachineDeployment, MachineDeploymentSpec, MachineDeploymentStatus, MachineDeploymentStrategy,
    MachineDeploymentStrategyType, MachineRollingUpdateDeployment,
};
use crate::crd::machine_set::{MachineSet, MachineSetSpec, MachineSetStatus, MachineSpec, MachineTemplateSpec};
use chrono::{TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

fn app_labels() -> BTreeMap<String, String> {
    [("app".to_string(), "web".to_string())].into_iter().collect()
}

/// A machine template parameterised by machine class, so tests can express
/// "revision v1" versus "revision v2" as different classes.
fn template(class: &str) -> MachineTemplateSpec {
    MachineTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(app_labels()),
            ..Default::default()
        }),
        spec: Some(MachineSpec {
            machine_class: Some(class.to_string()),
            ..Default::default()
        }),
    }
}

fn deployment(replicas: i32, surge: IntOrString, unavailable: IntOrString, class: &str) -> MachineDeployment {
    let mut md = MachineDeployment::new(
        "web",
        MachineDeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            template: template(class),
            strategy: MachineDeploymentStrategy {
                strategy_type: Some(MachineDeploymentStrategyType::RollingUpdate),
                rolling_update: Some(MachineRollingUpdateDeployment {
                    max_unavailable: Some(unavailable),
                    max_surge: Some(surge),
                }),
            },
            min_ready_seconds: Some(0),
            revision_history_limit: Some(1),
            progress_deadline_seconds: Some(600),
        },
    );
    md.metadata.namespace = Some("default".to_string());
    md.metadata.uid = Some("md-uid-1".to_string());
    md.metadata.generation = Some(1);
    md
}

/// A machine set whose observed status has caught up with its spec, except
/// that only `available` of its machines are available.
fn machine_set(
    name: &str,
    created_secs: i64,
    revision: i64,
    replicas: i32,
    available: i32,
    class: &str,
) -> MachineSet {
    let mut ms = MachineSet::new(
        name,
        MachineSetSpec {
            replicas: Some(replicas),
            min_ready_seconds: Some(0),
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            template: template(class),
        },
    );
    ms.metadata.namespace = Some("default".to_string());
    ms.metadata.creation_timestamp = Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap()));
    ms.metadata.annotations = Some(
        [(REVISION_ANNOTATION.to_string(), revision.to_string())]
            .into_iter()
            .collect(),
    );
    ms.status = Some(MachineSetStatus {
        replicas,
        ready_replicas: available,
        available_replicas: available,
        observed_generation: None,
    });
    ms
}

fn context_with(sets: Vec<MachineSet>) -> (Arc<MemoryStore>, Arc<Context>) {
    let store = Arc::new(MemoryStore::with_sets(sets));
    let ctx = Arc::new(Context::new(store.clone(), None));
    (store, ctx)
}

// --- arithmetic primitives ---

#[test]
fn test_resolve_int_or_percent() {
    assert_eq!(resolve_int_or_percent(&IntOrString::Int(5), 10, true), 5);
    assert_eq!(resolve_int_or_percent(&IntOrString::Int(0), 10, false), 0);
    // 25% of 10: surge rounds up to 3, unavailability rounds down to 2
    assert_eq!(
        resolve_int_or_percent(&IntOrString::String("25%".to_string()), 10, true),
        3
    );
    assert_eq!(
        resolve_int_or_percent(&IntOrString::String("25%".to_string()), 10, false),
        2
    );
    assert_eq!(
        resolve_int_or_percent(&IntOrString::String("110%".to_string()), 10, true),
        11
    );
    // Malformed strings resolve to 0; the validator rejects them upstream
    assert_eq!(
        resolve_int_or_percent(&IntOrString::String("abc".to_string()), 10, true),
        0
    );
    assert_eq!(
        resolve_int_or_percent(&IntOrString::String("-5%".to_string()), 10, true),
        0
    );
}

#[test]
fn test_max_surge_and_unavailable_resolution() {
    let md = deployment(
        10,
        IntOrString::String("25%".to_string()),
        IntOrString::String("25%".to_string()),
        "v1",
    );
    assert_eq!(max_surge(&md), 3);
    assert_eq!(max_unavailable(&md), 2);

    // maxUnavailable is capped at the desired count
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(5), "v1");
    assert_eq!(max_unavailable(&md), 3);
}

#[test]
fn test_replica_totals() {
    let sets = vec![
        machine_set("a", 100, 1, 3, 2, "v1"),
        machine_set("b", 200, 2, 1, 0, "v2"),
    ];
    assert_eq!(total_replicas(&sets), 4);
    assert_eq!(total_available_replicas(&sets), 2);
}

// --- template hashing and matching ---

#[test]
fn test_template_hash_is_stable_and_discriminating() {
    let hash1 = compute_machine_template_hash(&template("v1")).unwrap();
    let hash2 = compute_machine_template_hash(&template("v1")).unwrap();
    assert_eq!(hash1, hash2);
    assert_eq!(hash1.len(), 10);

    let hash3 = compute_machine_template_hash(&template("v2")).unwrap();
    assert_ne!(hash1, hash3);
}

#[test]
fn test_template_matches_ignores_hash_label() {
    let plain = template("v1");
    let mut hashed = template("v1");
    hashed
        .metadata
        .as_mut()
        .unwrap()
        .labels
        .as_mut()
        .unwrap()
        .insert(TEMPLATE_HASH_LABEL.to_string(), "abc123".to_string());

    assert!(template_matches(&plain, &hashed));
    assert!(!template_matches(&plain, &template("v2")));
}

// --- revision selection ---

#[test]
fn test_machine_set_revision_parses_annotation() {
    let ms = machine_set("a", 100, 7, 1, 1, "v1");
    assert_eq!(machine_set_revision(&ms), 7);

    let mut garbage = machine_set("b", 100, 1, 1, 1, "v1");
    garbage
        .metadata
        .annotations
        .as_mut()
        .unwrap()
        .insert(REVISION_ANNOTATION.to_string(), "not-a-number".to_string());
    assert_eq!(machine_set_revision(&garbage), 0);
}

#[test]
fn test_find_new_machine_set_prefers_highest_revision() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    let sets = vec![
        machine_set("old-dup", 100, 1, 0, 0, "v1"),
        machine_set("rollforward", 200, 3, 3, 3, "v1"),
        machine_set("other", 150, 2, 2, 2, "v2"),
    ];

    let found = find_new_machine_set(&md, &sets).unwrap();
    assert_eq!(found.name_any(), "rollforward");
}

#[test]
fn test_find_new_machine_set_tie_breaks_by_creation() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    let sets = vec![
        machine_set("younger", 200, 2, 1, 1, "v1"),
        machine_set("older", 100, 2, 1, 1, "v1"),
    ];

    let found = find_new_machine_set(&md, &sets).unwrap();
    assert_eq!(found.name_any(), "older");
}

#[tokio::test]
async fn test_select_machine_sets_creates_fresh_set() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let existing = machine_set("web-old", 100, 1, 3, 3, "v1");
    let (store, ctx) = context_with(vec![existing]);

    let (new_set, old_sets) = select_machine_sets(&ctx, &md, &store.sets()).await.unwrap();

    // Fresh set: zero replicas, next revision, hash in name and labels
    assert_eq!(new_set.spec.replicas, Some(0));
    assert_eq!(machine_set_revision(&new_set), 2);
    let hash = compute_machine_template_hash(&md.spec.template).unwrap();
    assert_eq!(new_set.name_any(), format!("web-{hash}"));
    assert_eq!(
        new_set.metadata.labels.as_ref().unwrap().get(TEMPLATE_HASH_LABEL),
        Some(&hash)
    );
    assert!(store.get(&new_set.name_any()).is_some());
    assert_eq!(old_sets.len(), 1);
    assert_eq!(old_sets[0].name_any(), "web-old");
}

// --- scale-up planner ---

#[test]
fn test_new_machine_set_replicas_consumes_surge_headroom() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("a", 100, 1, 3, 3, "v1");
    let new = machine_set("b", 200, 2, 0, 0, "v2");
    let all = vec![old, new.clone()];

    // ceiling 4, fleet 3: one replica of headroom
    assert_eq!(new_machine_set_replicas(&md, &all, &new).unwrap(), 1);
}

#[test]
fn test_new_machine_set_replicas_never_drops_below_current() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("a", 100, 1, 4, 4, "v1");
    let new = machine_set("b", 200, 2, 1, 0, "v2");
    let all = vec![old, new.clone()];

    // Fleet is over the ceiling (5 > 4); headroom clamps to 0, not negative
    assert_eq!(new_machine_set_replicas(&md, &all, &new).unwrap(), 1);
}

#[test]
fn test_new_machine_set_replicas_caps_at_target() {
    let md = deployment(3, IntOrString::Int(3), IntOrString::Int(0), "v2");
    let new = machine_set("b", 200, 1, 2, 2, "v2");
    let all = vec![new.clone()];

    // Headroom (4) would overshoot; the target caps it
    assert_eq!(new_machine_set_replicas(&md, &all, &new).unwrap(), 3);
}

#[tokio::test]
async fn test_scale_machine_set_is_a_noop_at_equal_count() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    let ms = machine_set("a", 100, 1, 3, 3, "v1");
    let (store, ctx) = context_with(vec![ms.clone()]);

    let result = scale_machine_set(&ctx, &ms, 3, &md).await.unwrap();

    assert_eq!(result.spec.replicas, Some(3));
    assert!(store.writes().is_empty());
}

// --- steady state ---

#[tokio::test]
async fn test_steady_state_issues_zero_writes() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    let current = machine_set("web-abc", 100, 1, 3, 3, "v1");
    let (store, ctx) = context_with(vec![current]);

    // Status already reflects the converged fleet
    let mut md = md;
    md.status = Some(MachineDeploymentStatus {
        observed_generation: Some(1),
        replicas: 3,
        updated_replicas: 3,
        ready_replicas: 3,
        available_replicas: 3,
        unavailable_replicas: 0,
    });

    let result = reconcile(Arc::new(md), ctx).await;

    assert!(result.is_ok());
    assert!(store.writes().is_empty(), "writes: {:?}", store.writes());
}

// --- fresh rollout ---

#[tokio::test]
async fn test_fresh_rollout_creates_new_set_and_claims_surge() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("web-old", 100, 1, 3, 3, "v1");
    let (store, ctx) = context_with(vec![old]);

    reconcile(Arc::new(md.clone()), ctx).await.unwrap();

    let hash = compute_machine_template_hash(&md.spec.template).unwrap();
    let new_name = format!("web-{hash}");

    // Created at 0, then scaled to the surge budget of 1
    let set_writes = store.set_writes();
    assert_eq!(
        set_writes,
        vec![
            WriteOp::CreateSet { name: new_name.clone(), replicas: Some(0) },
            WriteOp::UpdateSet { name: new_name.clone(), replicas: Some(1) },
        ]
    );

    // The old set is untouched: draining it would breach the floor
    assert_eq!(store.get("web-old").unwrap().spec.replicas, Some(3));
    assert_eq!(store.get(&new_name).unwrap().spec.replicas, Some(1));
}

// --- mid-rollout progress ---

#[tokio::test]
async fn test_mid_rollout_drains_old_within_availability_quota() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("web-old", 100, 1, 3, 3, "v1");
    let new = machine_set("web-new", 200, 2, 1, 1, "v2");
    let (store, ctx) = context_with(vec![old, new]);

    reconcile(Arc::new(md), ctx).await.unwrap();

    // available 4, floor 3: quota of exactly one replica, taken from the old set
    assert_eq!(
        store.set_writes(),
        vec![WriteOp::UpdateSet { name: "web-old".to_string(), replicas: Some(2) }]
    );
    assert_eq!(store.get("web-new").unwrap().spec.replicas, Some(1));
}

#[tokio::test]
async fn test_surge_claimed_this_tick_does_not_widen_the_drain_budget() {
    let md = deployment(10, IntOrString::Int(2), IntOrString::Int(2), "v2");
    let old = machine_set("web-old", 100, 1, 10, 10, "v1");
    let (store, ctx) = context_with(vec![old]);

    reconcile(Arc::new(md.clone()), ctx).await.unwrap();

    let hash = compute_machine_template_hash(&md.spec.template).unwrap();
    let new_name = format!("web-{hash}");

    // The new set claims the full surge budget...
    assert_eq!(store.get(&new_name).unwrap().spec.replicas, Some(2));
    // ...but the drain gate still sees the fleet as observed at the top of
    // the tick (10 - 8 - 2 = 0), so the old set holds until the new machines
    // actually become available.
    assert_eq!(store.get("web-old").unwrap().spec.replicas, Some(10));
}

// --- unhealthy new set, then rollback ---

#[tokio::test]
async fn test_stalled_rollout_with_crashlooping_new_set_holds_position() {
    let md = deployment(10, IntOrString::Int(3), IntOrString::Int(2), "v2");
    let old = machine_set("web-old", 100, 1, 8, 6, "v1");
    let new = machine_set("web-new", 200, 2, 5, 0, "v2");
    let (store, ctx) = context_with(vec![old, new]);

    reconcile(Arc::new(md), ctx).await.unwrap();

    // budget = 13 - 8 - 5 = 0: nothing moves, despite unhealthy old replicas
    assert!(store.set_writes().is_empty(), "writes: {:?}", store.set_writes());
}

#[tokio::test]
async fn test_rollback_cleans_up_crashlooping_set() {
    // The user rolled back: the deployment template matches the old healthy
    // set again, so the crashlooping set becomes old.
    let md = deployment(10, IntOrString::Int(3), IntOrString::Int(2), "v1");
    let good = machine_set("web-old", 100, 1, 8, 8, "v1");
    let crashlooping = machine_set("web-new", 200, 2, 5, 0, "v2");
    let (store, ctx) = context_with(vec![good, crashlooping]);

    reconcile(Arc::new(md), ctx).await.unwrap();

    // The reselected new set gets its revision re-stamped past the duplicate
    let good = store.get("web-old").unwrap();
    assert_eq!(machine_set_revision(&good), 3);
    assert_eq!(good.spec.replicas, Some(8));

    // budget = 13 - 8 - 0 = 5: unhealthy cleanup drains the crashloopers
    assert_eq!(store.get("web-new").unwrap().spec.replicas, Some(0));
}

// --- user-initiated shrink ---

#[tokio::test]
async fn test_shrink_scales_new_set_down_to_target() {
    let md = deployment(2, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let new = machine_set("web-new", 100, 1, 3, 3, "v2");
    let (store, ctx) = context_with(vec![new]);

    reconcile(Arc::new(md), ctx).await.unwrap();

    assert_eq!(
        store.set_writes(),
        vec![WriteOp::UpdateSet { name: "web-new".to_string(), replicas: Some(2) }]
    );
}

// --- both tolerances zero ---

#[test]
fn test_validation_rejects_both_tolerances_zero() {
    let md = deployment(3, IntOrString::Int(0), IntOrString::Int(0), "v1");
    let err = validate_machine_deployment(&md).unwrap_err();
    assert!(err.contains("maxUnavailable"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_reconcile_fails_fast_on_invalid_spec() {
    let md = deployment(3, IntOrString::Int(0), IntOrString::Int(0), "v1");
    let (store, ctx) = context_with(vec![]);

    let result = reconcile(Arc::new(md), ctx).await;

    assert!(matches!(result, Err(ReconcileError::ValidationError(_))));
    assert!(store.writes().is_empty());
}

// --- error propagation ---

#[tokio::test]
async fn test_store_conflict_surfaces_for_requeue() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("web-old", 100, 1, 3, 3, "v1");
    let new = machine_set("web-new", 200, 2, 1, 1, "v2");
    let (store, ctx) = context_with(vec![old, new]);
    store.fail_next_update("web-old", FailMode::Conflict);

    let result = reconcile(Arc::new(md), ctx).await;

    // Transient errors inside scale-down surface instead of being swallowed;
    // the partially-applied plan is safe because the next tick re-plans.
    match result {
        Err(ReconcileError::Store(e)) => assert!(e.is_conflict()),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_object_vanishing_mid_tick_ends_quietly() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("web-old", 100, 1, 3, 3, "v1");
    let new = machine_set("web-new", 200, 2, 1, 1, "v2");
    let (store, ctx) = context_with(vec![old, new]);
    store.fail_next_update("web-old", FailMode::NotFound);

    let result = reconcile(Arc::new(md), ctx).await;

    assert!(result.is_ok(), "not-found should end the tick: {result:?}");
}

// --- status aggregation and completion ---

#[test]
fn test_calculate_status_sums_children() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("web-old", 100, 1, 2, 2, "v1");
    let new = machine_set("web-new", 200, 2, 1, 1, "v2");
    let all = vec![old, new.clone()];

    let status = calculate_status(&md, &new, &all);

    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.replicas, 3);
    assert_eq!(status.updated_replicas, 1);
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.available_replicas, 3);
    assert_eq!(status.unavailable_replicas, 0);
}

#[test]
fn test_calculate_status_treats_missing_child_status_as_zero() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let mut new = machine_set("web-new", 200, 1, 1, 1, "v2");
    new.status = None;
    let all = vec![new.clone()];

    let status = calculate_status(&md, &new, &all);

    assert_eq!(status.replicas, 0);
    assert_eq!(status.updated_replicas, 0);
    assert_eq!(status.unavailable_replicas, 3);
}

#[test]
fn test_deployment_complete_requires_drained_old_sets() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let status = MachineDeploymentStatus {
        observed_generation: Some(1),
        replicas: 3,
        updated_replicas: 3,
        ready_replicas: 3,
        available_replicas: 3,
        unavailable_replicas: 0,
    };

    let drained = machine_set("web-old", 100, 1, 0, 0, "v1");
    assert!(deployment_complete(&md, &status, &[drained]));

    let still_scaling = machine_set("web-old", 100, 1, 1, 1, "v1");
    assert!(!deployment_complete(&md, &status, &[still_scaling]));

    let stale = MachineDeploymentStatus {
        observed_generation: Some(0),
        ..status.clone()
    };
    assert!(!deployment_complete(&md, &stale, &[]));

    let short = MachineDeploymentStatus {
        available_replicas: 2,
        ..status
    };
    assert!(!deployment_complete(&md, &short, &[]));
}

// --- cleanup hook ---

#[tokio::test]
async fn test_cleanup_deletes_drained_sets_beyond_history_limit() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v9");
    let r1 = machine_set("web-r1", 100, 1, 0, 0, "v1");
    let r2 = machine_set("web-r2", 200, 2, 0, 0, "v2");
    let r3 = machine_set("web-r3", 300, 3, 0, 0, "v3");
    let winding_down = machine_set("web-r4", 400, 4, 2, 2, "v4");
    let old_sets = vec![r1.clone(), r2.clone(), r3.clone(), winding_down.clone()];
    let (store, ctx) = context_with(old_sets.clone());

    cleanup_deployment(&ctx, &old_sets, &md).await.unwrap();

    // limit 1: the two oldest drained revisions go, the newest drained stays
    assert!(store.get("web-r1").is_none());
    assert!(store.get("web-r2").is_none());
    assert!(store.get("web-r3").is_some());
    // An undrained set is never deleted, whatever its revision
    assert!(store.get("web-r4").is_some());
}

// --- defaulting ---

#[test]
fn test_defaulted_fills_unset_fields() {
    let mut md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    md.spec.replicas = None;
    md.spec.min_ready_seconds = None;
    md.spec.revision_history_limit = None;
    md.spec.progress_deadline_seconds = None;
    md.spec.strategy = MachineDeploymentStrategy::default();

    let md = defaulted(&md);

    assert_eq!(md.spec.replicas, Some(1));
    assert_eq!(md.spec.min_ready_seconds, Some(0));
    assert_eq!(md.spec.revision_history_limit, Some(1));
    assert_eq!(md.spec.progress_deadline_seconds, Some(600));
    assert_eq!(
        md.spec.strategy.strategy_type,
        Some(MachineDeploymentStrategyType::RollingUpdate)
    );
    let rolling_update = md.spec.strategy.rolling_update.unwrap();
    assert_eq!(rolling_update.max_surge, Some(IntOrString::Int(1)));
    assert_eq!(rolling_update.max_unavailable, Some(IntOrString::Int(0)));
}

#[test]
fn test_defaulted_preserves_explicit_values() {
    let md = deployment(
        7,
        IntOrString::String("25%".to_string()),
        IntOrString::Int(2),
        "v1",
    );
    let md = defaulted(&md);
    assert_eq!(md.spec.replicas, Some(7));
    let rolling_update = md.spec.strategy.rolling_update.unwrap();
    assert_eq!(
        rolling_update.max_surge,
        Some(IntOrString::String("25%".to_string()))
    );
    assert_eq!(rolling_update.max_unavailable, Some(IntOrString::Int(2)));
}

// --- validation ---

#[test]
fn test_validation_rejects_empty_selector() {
    let mut md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    md.spec.selector = LabelSelector::default();
    let err = validate_machine_deployment(&md).unwrap_err();
    assert!(err.contains("selector"), "unexpected error: {err}");
}

#[test]
fn test_validation_rejects_selector_template_mismatch() {
    let mut md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v1");
    md.spec
        .selector
        .match_labels
        .as_mut()
        .unwrap()
        .insert("tier".to_string(), "backend".to_string());
    let err = validate_machine_deployment(&md).unwrap_err();
    assert!(err.contains("does not match"), "unexpected error: {err}");
}

#[test]
fn test_validation_rejects_malformed_percent() {
    let md = deployment(
        3,
        IntOrString::String("abc%".to_string()),
        IntOrString::Int(0),
        "v1",
    );
    let err = validate_machine_deployment(&md).unwrap_err();
    assert!(err.contains("maxSurge"), "unexpected error: {err}");
}

#[test]
fn test_validation_rejects_unavailable_above_hundred_percent() {
    let md = deployment(
        3,
        IntOrString::Int(1),
        IntOrString::String("150%".to_string()),
        "v1",
    );
    let err = validate_machine_deployment(&md).unwrap_err();
    assert!(err.contains("100%"), "unexpected error: {err}");
}

#[test]
fn test_validation_rejects_negative_replicas() {
    let md = deployment(-1, IntOrString::Int(1), IntOrString::Int(0), "v1");
    let err = validate_machine_deployment(&md).unwrap_err();
    assert!(err.contains("replicas"), "unexpected error: {err}");
}

#[test]
fn test_validation_accepts_sound_spec() {
    let md = deployment(
        3,
        IntOrString::String("25%".to_string()),
        IntOrString::Int(0),
        "v1",
    );
    assert!(validate_machine_deployment(&md).is_ok());
}

// --- convergence over repeated ticks ---

/// Availability removed by this tick's writes, at most: each set can lose no
/// more available machines than replicas it was scaled down by.
fn floor_after_writes(store: &MemoryStore, before: &[MachineSet]) -> i32 {
    store
        .sets()
        .iter()
        .map(|after| {
            let was_available = before
                .iter()
                .find(|b| b.name_any() == after.name_any())
                .map(available_replicas)
                .unwrap_or(0);
            was_available.min(after.spec.replicas.unwrap_or(0))
        })
        .sum()
}

#[tokio::test]
async fn test_repeated_ticks_converge_without_breaching_budgets() {
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(0), "v2");
    let old = machine_set("web-old", 100, 1, 3, 3, "v1");
    let (store, ctx) = context_with(vec![old]);

    let hash = compute_machine_template_hash(&md.spec.template).unwrap();
    let new_name = format!("web-{hash}");

    let mut converged = false;
    for _tick in 0..20 {
        let before = store.sets();
        reconcile(Arc::new(md.clone()), ctx.clone()).await.unwrap();

        // Surge ceiling: fleet-wide desired count never exceeds target + surge
        assert!(total_replicas(&store.sets()) <= 4, "surge ceiling breached");
        // Availability floor: this tick's writes never removed availability
        // below target - maxUnavailable
        assert!(floor_after_writes(&store, &before) >= 3, "availability floor breached");
        // Old capacity only ever shrinks
        let old_before: i32 = before
            .iter()
            .filter(|ms| ms.name_any() == "web-old")
            .map(|ms| ms.spec.replicas.unwrap_or(0))
            .sum();
        let old_after = store
            .get("web-old")
            .map(|ms| ms.spec.replicas.unwrap_or(0))
            .unwrap_or(0);
        assert!(old_after <= old_before, "old set scaled up");

        if store.get(&new_name).and_then(|ms| ms.spec.replicas) == Some(3)
            && old_after == 0
        {
            converged = true;
            break;
        }

        // Simulate the machine-set controller: every desired machine comes up
        // and becomes available before the next tick
        let enacted = store
            .sets()
            .into_iter()
            .map(|mut ms| {
                let desired = ms.spec.replicas.unwrap_or(0);
                ms.status = Some(MachineSetStatus {
                    replicas: desired,
                    ready_replicas: desired,
                    available_replicas: desired,
                    observed_generation: None,
                });
                ms
            })
            .collect();
        store.replace_all(enacted);
    }

    assert!(converged, "rollout did not converge: {:?}", store.sets());
}

// --- determinism ---

#[tokio::test]
async fn test_plan_is_deterministic_for_equal_observations() {
    let build = || {
        vec![
            machine_set("web-a", 100, 1, 2, 2, "v1"),
            machine_set("web-b", 100, 1, 2, 2, "v0"),
            machine_set("web-new", 200, 2, 1, 1, "v2"),
        ]
    };
    let md = deployment(3, IntOrString::Int(1), IntOrString::Int(1), "v2");

    let (store1, ctx1) = context_with(build());
    reconcile(Arc::new(md.clone()), ctx1).await.unwrap();
    let (store2, ctx2) = context_with(build());
    reconcile(Arc::new(md), ctx2).await.unwrap();

    assert_eq!(store1.writes(), store2.writes());
}
