// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for Kubernetes resources.
//!
//! Finalizers are added and removed with merge patches rather than full
//! updates to minimize write conflicts with other controllers touching the
//! same object. The flow per reconciliation:
//!
//! 1. On first observation, [`ensure_finalizer`] adds the finalizer and the
//!    caller requeues.
//! 2. On deletion (non-zero deletion timestamp), the reconciler runs its
//!    cleanup and then calls [`remove_finalizer`].

use anyhow::Result;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// Add a finalizer to a resource if not already present.
///
/// Returns `true` when the finalizer was added (the caller should requeue so
/// the next pass observes its own patch), `false` when it was already there.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn ensure_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<bool>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    if resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.contains(&finalizer.to_string()))
    {
        return Ok(false);
    }

    info!(
        "Adding finalizer {} to {}/{} {}",
        finalizer,
        namespace,
        name,
        T::kind(&())
    );

    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());

    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(true)
}

/// Remove a finalizer from a resource.
///
/// Idempotent: removing an absent finalizer is a no-op.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn remove_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    if resource
        .meta()
        .finalizers
        .as_ref()
        .is_none_or(|f| !f.contains(&finalizer.to_string()))
    {
        return Ok(());
    }

    info!(
        "Removing finalizer {} from {}/{} {}",
        finalizer,
        namespace,
        name,
        T::kind(&())
    );

    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|f| f != finalizer);

    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(())
}

/// True when the resource carries the finalizer.
#[must_use]
pub fn has_finalizer<T>(resource: &T, finalizer: &str) -> bool
where
    T: Resource<DynamicType = ()> + ResourceExt,
{
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.contains(&finalizer.to_string()))
}

/// True when the resource is marked for deletion.
#[must_use]
pub fn is_deleting<T>(resource: &T) -> bool
where
    T: Resource<DynamicType = ()> + ResourceExt,
{
    resource.meta().deletion_timestamp.is_some()
}
