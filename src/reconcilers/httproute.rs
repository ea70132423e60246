// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTPRoute reconciliation logic.
//!
//! Validates each route against its parent gateways (gateway exists, its
//! class is ours, it carries a tunnel binding, the addressed listener admits
//! the route's namespace), resolves backend Service references, and stamps
//! one `RouteParentStatus` per parent. Entries written by foreign controllers
//! are preserved verbatim; only our own entries are replaced.

use crate::constants::GATEWAY_CONTROLLER_NAME;
use crate::context::Context;
use crate::labels::ANNOTATION_TUNNEL_REF;
use anyhow::Result;
use chrono::Utc;
use k8s_gateway_api::{
    Gateway, GatewayClass, HttpRoute, HttpRouteStatus, ParentReference, RouteParentStatus,
    RouteStatus,
};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

/// Outcome of validating one parent reference.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentValidation {
    pub accepted: bool,
    pub reason: String,
    pub message: String,
}

impl ParentValidation {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: "Accepted".to_string(),
            message: "Route accepted by Gateway".to_string(),
        }
    }

    fn rejected(reason: &str, message: String) -> Self {
        Self {
            accepted: false,
            reason: reason.to_string(),
            message,
        }
    }
}

/// Reconcile an `HTTPRoute` resource.
///
/// # Errors
///
/// Kubernetes API failures propagate for backoff.
pub async fn reconcile_http_route(ctx: &Context, route: &HttpRoute) -> Result<()> {
    let namespace = route.namespace().unwrap_or_default();
    let name = route.name_any();

    info!("Reconciling HTTPRoute: {}/{}", namespace, name);

    let parent_refs: Vec<ParentReference> = route
        .spec
        .inner
        .parent_refs
        .clone()
        .unwrap_or_default();

    if parent_refs.is_empty() {
        debug!(route = %name, "route has no parent refs; nothing to stamp");
        return Ok(());
    }

    let backends_ok = resolve_backends(&ctx.client, route).await;

    let mut ours = Vec::new();
    for parent in &parent_refs {
        let validation = validate_parent_ref(&ctx.client, route, parent).await;
        ours.push(build_parent_status(
            route,
            parent,
            &validation,
            backends_ok.as_ref().err().map(String::as_str),
        ));
    }

    let existing = route
        .status
        .as_ref()
        .map(|s| s.inner.parents.clone())
        .unwrap_or_default();
    let merged = merge_parent_statuses(existing, ours);

    let api: Api<HttpRoute> = Api::namespaced(ctx.client.clone(), &namespace);
    let status = HttpRouteStatus {
        inner: RouteStatus { parents: merged },
    };
    let patch = json!({ "status": status });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(())
}

/// Validate one parent reference end to end.
async fn validate_parent_ref(
    client: &Client,
    route: &HttpRoute,
    parent: &ParentReference,
) -> ParentValidation {
    let route_namespace = route.namespace().unwrap_or_default();
    let gateway_namespace = parent
        .namespace
        .clone()
        .unwrap_or_else(|| route_namespace.clone());

    let gateway = match Api::<Gateway>::namespaced(client.clone(), &gateway_namespace)
        .get_opt(&parent.name)
        .await
    {
        Ok(Some(gateway)) => gateway,
        Ok(None) => {
            return ParentValidation::rejected(
                "NoMatchingParent",
                format!("gateway {gateway_namespace}/{} not found", parent.name),
            )
        }
        Err(error) => return ParentValidation::rejected("Error", error.to_string()),
    };

    let class_name = gateway.spec.gateway_class_name.clone();
    match Api::<GatewayClass>::all(client.clone())
        .get_opt(&class_name)
        .await
    {
        Ok(Some(class)) => {
            if class.spec.controller_name != GATEWAY_CONTROLLER_NAME {
                return ParentValidation::rejected(
                    "NoMatchingParent",
                    "gateway is not managed by cfgate".to_string(),
                );
            }
        }
        Ok(None) => {
            return ParentValidation::rejected(
                "NoMatchingParent",
                format!("gateway class {class_name} not found"),
            )
        }
        Err(error) => return ParentValidation::rejected("Error", error.to_string()),
    }

    if !gateway.annotations().contains_key(ANNOTATION_TUNNEL_REF) {
        return ParentValidation::rejected(
            "NoTunnelRef",
            "gateway has no tunnel reference".to_string(),
        );
    }

    if let Some(section_name) = &parent.section_name {
        if let Err(validation) = listener_check(&gateway, section_name, &route_namespace) {
            return validation;
        }
    }

    ParentValidation::accepted()
}

/// Pure listener validation: the named listener must exist, and its allowed
/// namespaces must admit the route. `Same` is enforced strictly; `All` and an
/// absent stanza are permissive; `Selector` is admitted with a warning since
/// the selector itself is evaluated by the gateway.
pub fn listener_check(
    gateway: &Gateway,
    section_name: &str,
    route_namespace: &str,
) -> Result<(), ParentValidation> {
    let gateway_namespace = gateway.namespace().unwrap_or_default();

    let Some(listener) = gateway
        .spec
        .listeners
        .iter()
        .find(|l| l.name == section_name)
    else {
        return Err(ParentValidation::rejected(
            "NoMatchingListenerHostname",
            format!("listener {section_name} not found"),
        ));
    };

    let Some(from) = listener
        .allowed_routes
        .as_ref()
        .and_then(|ar| ar.namespaces.as_ref())
        .and_then(|ns| ns.from.as_deref())
    else {
        return Ok(());
    };

    match from {
        "Same" if route_namespace != gateway_namespace => Err(ParentValidation::rejected(
            "NotAllowedByListeners",
            "route namespace not allowed by listener".to_string(),
        )),
        "Selector" => {
            warn!(
                listener = section_name,
                "listener restricts namespaces by selector; admitting and deferring to the gateway"
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Resolve backend Service references. Non-Service backends are skipped.
async fn resolve_backends(client: &Client, route: &HttpRoute) -> Result<(), String> {
    let route_namespace = route.namespace().unwrap_or_default();

    for rule in route.spec.rules.iter().flatten() {
        for backend in rule.backend_refs.iter().flatten() {
            let Some(backend_ref) = backend.backend_ref.as_ref() else {
                continue;
            };
            if backend_ref
                .inner
                .kind
                .as_deref()
                .is_some_and(|kind| kind != "Service")
            {
                continue;
            }

            let namespace = backend_ref
                .inner
                .namespace
                .clone()
                .unwrap_or_else(|| route_namespace.clone());

            match Api::<Service>::namespaced(client.clone(), &namespace)
                .get_opt(&backend_ref.inner.name)
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(format!(
                        "service {namespace}/{} not found",
                        backend_ref.inner.name
                    ))
                }
                Err(error) => return Err(format!("failed to get service: {error}")),
            }
        }
    }

    Ok(())
}

/// Build our parent status entry for one parent reference.
#[must_use]
pub fn build_parent_status(
    route: &HttpRoute,
    parent: &ParentReference,
    validation: &ParentValidation,
    backend_error: Option<&str>,
) -> RouteParentStatus {
    let route_namespace = route.namespace().unwrap_or_default();
    let generation = route.metadata.generation;

    let accepted = Condition {
        type_: "Accepted".to_string(),
        status: if validation.accepted { "True" } else { "False" }.to_string(),
        reason: validation.reason.clone(),
        message: validation.message.clone(),
        last_transition_time: Time(Utc::now()),
        observed_generation: generation,
    };

    let resolved_refs = match backend_error {
        None => Condition {
            type_: "ResolvedRefs".to_string(),
            status: "True".to_string(),
            reason: "ResolvedRefs".to_string(),
            message: "All references resolved".to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: generation,
        },
        Some(error) => Condition {
            type_: "ResolvedRefs".to_string(),
            status: "False".to_string(),
            reason: "BackendNotFound".to_string(),
            message: error.to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: generation,
        },
    };

    RouteParentStatus {
        parent_ref: ParentReference {
            group: parent.group.clone(),
            kind: parent.kind.clone(),
            namespace: Some(
                parent
                    .namespace
                    .clone()
                    .unwrap_or_else(|| route_namespace.clone()),
            ),
            name: parent.name.clone(),
            section_name: parent.section_name.clone(),
            port: parent.port,
        },
        controller_name: GATEWAY_CONTROLLER_NAME.to_string(),
        conditions: vec![accepted, resolved_refs],
    }
}

/// Merge our freshly built entries into the existing parent statuses,
/// preserving entries stamped by foreign controllers.
#[must_use]
pub fn merge_parent_statuses(
    existing: Vec<RouteParentStatus>,
    ours: Vec<RouteParentStatus>,
) -> Vec<RouteParentStatus> {
    let mut merged: Vec<RouteParentStatus> = existing
        .into_iter()
        .filter(|status| status.controller_name != GATEWAY_CONTROLLER_NAME)
        .collect();
    merged.extend(ours);
    merged
}

#[cfg(test)]
#[path = "httproute_tests.rs"]
mod httproute_tests;
