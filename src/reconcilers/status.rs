// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for Kubernetes resources.
//!
//! Conditions follow the standard Kubernetes conventions: `type`, `status`
//! (True/False/Unknown), CamelCase `reason`, human-readable `message`, and an
//! RFC3339 `lastTransitionTime` that is preserved when only the message
//! changes. [`set_condition`] upserts by type so each condition appears once.

use crate::crd::Condition;
use chrono::Utc;

/// Create a new condition with the current timestamp.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Upsert a condition into a condition list by type.
///
/// The `lastTransitionTime` of an existing condition is preserved when its
/// status did not change, so transition times reflect real transitions.
pub fn set_condition(conditions: &mut Vec<Condition>, new_condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == new_condition.r#type)
    {
        let preserved_time = if existing.status == new_condition.status {
            existing.last_transition_time.clone()
        } else {
            new_condition.last_transition_time.clone()
        };
        *existing = new_condition;
        existing.last_transition_time = preserved_time;
    } else {
        conditions.push(new_condition);
    }
}

/// Check if a condition differs from the existing one.
///
/// `reason` and `lastTransitionTime` are not compared; they change with the
/// condition itself.
#[must_use]
pub fn condition_changed(existing: &Option<Condition>, new_condition: &Condition) -> bool {
    if let Some(current) = existing {
        current.r#type != new_condition.r#type
            || current.status != new_condition.status
            || current.message != new_condition.message
    } else {
        true
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// True when the `Ready` condition is `True`.
#[must_use]
pub fn is_ready(conditions: &[Condition]) -> bool {
    find_condition(conditions, "Ready").is_some_and(|c| c.status == "True")
}

/// Compare two condition lists ignoring transition times.
#[must_use]
pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| {
        x.r#type == y.r#type
            && x.status == y.status
            && x.reason == y.reason
            && x.message == y.message
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
