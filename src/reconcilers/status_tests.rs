// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

use super::*;

#[test]
fn test_create_condition() {
    let condition = create_condition("Ready", "True", "Reconciled", "all records synced");
    assert_eq!(condition.r#type, "Ready");
    assert_eq!(condition.status, "True");
    assert_eq!(condition.reason.as_deref(), Some("Reconciled"));
    assert!(condition.last_transition_time.is_some());
}

#[test]
fn test_set_condition_inserts_and_upserts() {
    let mut conditions = Vec::new();

    set_condition(
        &mut conditions,
        create_condition("Ready", "False", "Pending", "waiting for tunnel"),
    );
    assert_eq!(conditions.len(), 1);

    set_condition(
        &mut conditions,
        create_condition("ZonesResolved", "True", "ZonesResolved", "2 zones"),
    );
    assert_eq!(conditions.len(), 2);

    // Upserting Ready does not duplicate it.
    set_condition(
        &mut conditions,
        create_condition("Ready", "True", "Reconciled", "operational"),
    );
    assert_eq!(conditions.len(), 2);
    assert_eq!(find_condition(&conditions, "Ready").unwrap().status, "True");
}

#[test]
fn test_set_condition_preserves_transition_time_when_unchanged() {
    let mut conditions = Vec::new();
    let mut first = create_condition("Ready", "True", "Reconciled", "ok");
    first.last_transition_time = Some("2025-01-01T00:00:00Z".to_string());
    set_condition(&mut conditions, first);

    // Same status, new message: the original transition time survives.
    set_condition(
        &mut conditions,
        create_condition("Ready", "True", "Reconciled", "still ok"),
    );
    assert_eq!(
        conditions[0].last_transition_time.as_deref(),
        Some("2025-01-01T00:00:00Z")
    );
    assert_eq!(conditions[0].message.as_deref(), Some("still ok"));

    // Status flip takes the new transition time.
    set_condition(
        &mut conditions,
        create_condition("Ready", "False", "SyncFailed", "zone lookup failed"),
    );
    assert_ne!(
        conditions[0].last_transition_time.as_deref(),
        Some("2025-01-01T00:00:00Z")
    );
}

#[test]
fn test_condition_changed() {
    let existing = Some(create_condition("Ready", "False", "Pending", "waiting"));

    let same = create_condition("Ready", "False", "OtherReason", "waiting");
    assert!(!condition_changed(&existing, &same));

    let flipped = create_condition("Ready", "True", "Reconciled", "waiting");
    assert!(condition_changed(&existing, &flipped));

    assert!(condition_changed(&None, &same));
}

#[test]
fn test_is_ready() {
    let mut conditions = vec![create_condition("ZonesResolved", "True", "Ok", "")];
    assert!(!is_ready(&conditions));

    conditions.push(create_condition("Ready", "True", "Reconciled", ""));
    assert!(is_ready(&conditions));

    conditions[1].status = "False".to_string();
    assert!(!is_ready(&conditions));
}

#[test]
fn test_conditions_equal_ignores_transition_times() {
    let mut a = vec![create_condition("Ready", "True", "Reconciled", "ok")];
    let mut b = vec![create_condition("Ready", "True", "Reconciled", "ok")];
    a[0].last_transition_time = Some("2025-01-01T00:00:00Z".to_string());
    b[0].last_transition_time = Some("2025-06-01T00:00:00Z".to_string());

    assert!(conditions_equal(&a, &b));

    b[0].message = Some("different".to_string());
    assert!(!conditions_equal(&a, &b));
}
