// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CloudflareTunnel reconciliation logic.
//!
//! Converges `(account, tunnel name)` to exactly one external tunnel, emits
//! the connector token secret and cloudflared deployment, and reflects
//! readiness on status. Pre-existing external tunnels with a matching name are
//! adopted rather than duplicated, which is what lets tunnels survive
//! operator restarts.

use crate::cf_errors::CloudflareError;
use crate::cloudflare::tunnels::{tunnel_domain, TunnelService};
use crate::cloudflared::{build_origin_config, IngressRule, TunnelConfig};
use crate::cloudflared_resources::{
    build_config_map, build_deployment, build_token_secret, deployment_name,
};
use crate::constants::KIND_TUNNEL;
use crate::context::{gateway_bound_to_tunnel, route_references_gateway, Context};
use crate::crd::{CloudflareTunnel, CloudflareTunnelStatus};
use crate::labels::{ANNOTATION_DELETION_POLICY, DELETION_POLICY_ORPHAN, FINALIZER_TUNNEL};
use crate::metrics;
use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::status::{create_condition, set_condition};
use anyhow::Result;
use k8s_gateway_api::{Gateway, HttpRoute};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

/// Deletion behavior selected via the `cfgate.io/deletion-policy` annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete the external tunnel on resource deletion (default).
    Delete,
    /// Leave external state untouched.
    Orphan,
}

/// Read the deletion policy annotation, defaulting to `Delete`.
#[must_use]
pub fn deletion_policy(tunnel: &CloudflareTunnel) -> DeletionPolicy {
    match tunnel
        .annotations()
        .get(ANNOTATION_DELETION_POLICY)
        .map(String::as_str)
    {
        Some(DELETION_POLICY_ORPHAN) => DeletionPolicy::Orphan,
        _ => DeletionPolicy::Delete,
    }
}

/// Reconcile a `CloudflareTunnel` resource.
///
/// # Errors
///
/// Transient failures propagate so the controller backs off and retries;
/// terminal failures are recorded as conditions and return `Ok` so the
/// regular not-ready requeue interval applies.
pub async fn reconcile_tunnel(ctx: &Context, tunnel: &CloudflareTunnel) -> Result<()> {
    let namespace = tunnel.namespace().unwrap_or_default();
    let name = tunnel.name_any();

    info!("Reconciling CloudflareTunnel: {}/{}", namespace, name);

    if is_deleting(tunnel) {
        return delete_tunnel(ctx, tunnel).await;
    }

    if ensure_finalizer(&ctx.client, tunnel, FINALIZER_TUNNEL).await? {
        // Observe our own patch on the next pass.
        return Ok(());
    }

    let mut status = tunnel.status.clone().unwrap_or_default();

    // 1. Resolve credentials.
    let (api, account_id) = match ctx.credentials_for_tunnel(tunnel).await {
        Ok(resolved) => {
            set_condition(
                &mut status.conditions,
                create_condition(
                    "CredentialsValid",
                    "True",
                    "TokenValidated",
                    "API token validated",
                ),
            );
            resolved
        }
        Err(error) => {
            warn!(tunnel = %name, %error, "credential resolution failed");
            set_condition(
                &mut status.conditions,
                create_condition("CredentialsValid", "False", "InvalidCredentials", &error.to_string()),
            );
            set_condition(
                &mut status.conditions,
                create_condition("Ready", "False", "InvalidCredentials", "credentials unavailable"),
            );
            update_status(&ctx.client, tunnel, &status).await?;
            return if error.downcast_ref::<CloudflareError>().is_some_and(CloudflareError::is_transient) {
                Err(error)
            } else {
                Ok(())
            };
        }
    };

    // 2. Adopt or create the external tunnel.
    let service = TunnelService::new(api);
    let (external, adopted) = service.adopt_or_create(&account_id, &name).await?;
    if !adopted {
        metrics::record_resource_created(KIND_TUNNEL);
    }

    status.tunnel_id = Some(external.id.clone());
    status.tunnel_name = Some(external.name.clone());
    status.tunnel_domain = Some(tunnel_domain(&external.id));

    // 3. Connector token into the child secret.
    let token = service.connector_token(&account_id, &external.id).await?;
    apply_secret(&ctx.client, &namespace, build_token_secret(tunnel, &token)).await?;

    // 4. Child cloudflared deployment.
    apply_deployment(&ctx.client, &namespace, build_deployment(tunnel)).await?;

    // 5. Config-file mode mirrors the rendered document into a ConfigMap.
    let route_count = if tunnel.spec.remote_config == Some(false) {
        let (config, route_count) = render_tunnel_config(&ctx.client, tunnel, &external.id).await?;
        config.validate()?;
        apply_config_map(&ctx.client, &namespace, build_config_map(tunnel, &config)?).await?;
        route_count
    } else {
        count_connected_routes(&ctx.client, tunnel).await?
    };

    set_condition(
        &mut status.conditions,
        create_condition(
            "TunnelConfigured",
            "True",
            "Configured",
            "external tunnel and workload configured",
        ),
    );

    // 6. Reflect workload readiness.
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    let child_name = deployment_name(&name);
    let ready_replicas = retry_api_call(
        || async { deployments.get_opt(&child_name).await },
        "get cloudflared deployment",
    )
    .await?
    .and_then(|d| d.status)
    .and_then(|s| s.ready_replicas)
    .unwrap_or(0);

    status.ready_replicas = Some(ready_replicas);
    status.connected_route_count = Some(route_count);
    status.observed_generation = tunnel.metadata.generation;

    if ready_replicas > 0 {
        set_condition(
            &mut status.conditions,
            create_condition(
                "Ready",
                "True",
                "Reconciled",
                &format!("{ready_replicas} cloudflared replicas ready"),
            ),
        );
    } else {
        set_condition(
            &mut status.conditions,
            create_condition(
                "Ready",
                "False",
                "WorkloadNotReady",
                "cloudflared deployment has no ready replicas",
            ),
        );
    }

    update_status(&ctx.client, tunnel, &status).await?;

    Ok(())
}

/// Handle tunnel deletion under the configured policy.
///
/// # Errors
///
/// `DeletionBlocked` (propagated) while the external tunnel still has live
/// connections; other API failures from cleanup.
pub async fn delete_tunnel(ctx: &Context, tunnel: &CloudflareTunnel) -> Result<()> {
    let name = tunnel.name_any();

    if !has_finalizer(tunnel, FINALIZER_TUNNEL) {
        return Ok(());
    }

    if deletion_policy(tunnel) == DeletionPolicy::Orphan {
        info!(tunnel = %name, "deletion policy is orphan; leaving external tunnel in place");
        remove_finalizer(&ctx.client, tunnel, FINALIZER_TUNNEL).await?;
        return Ok(());
    }

    let tunnel_id = tunnel
        .status
        .as_ref()
        .and_then(|s| s.tunnel_id.clone());

    if let Some(tunnel_id) = tunnel_id {
        let (api, account_id) = ctx.credentials_for_tunnel(tunnel).await?;
        let service = TunnelService::new(api);

        if let Err(error) = service.delete(&account_id, &tunnel_id, &name).await {
            if let CloudflareError::DeletionBlocked { .. } = error {
                let mut status = tunnel.status.clone().unwrap_or_default();
                set_condition(
                    &mut status.conditions,
                    create_condition("DeletionBlocked", "True", "ActiveConnections", &error.to_string()),
                );
                update_status(&ctx.client, tunnel, &status).await?;
            }
            return Err(error.into());
        }
        metrics::record_resource_deleted(KIND_TUNNEL);
    }

    // Child workload, secret and config map are owned by the tunnel and are
    // garbage collected with it.
    remove_finalizer(&ctx.client, tunnel, FINALIZER_TUNNEL).await?;
    Ok(())
}

/// Build the config-file document including route-derived ingress rules.
/// Returns the document and the number of routes it covers.
async fn render_tunnel_config(
    client: &Client,
    tunnel: &CloudflareTunnel,
    tunnel_id: &str,
) -> Result<(TunnelConfig, i32)> {
    let gateways = Api::<Gateway>::all(client.clone())
        .list(&ListParams::default())
        .await?
        .items;
    let routes = Api::<HttpRoute>::all(client.clone())
        .list(&ListParams::default())
        .await?
        .items;

    let mut config = TunnelConfig::new(tunnel, tunnel_id);
    let (rules, route_count) = ingress_rules_for_routes(tunnel, &gateways, &routes);
    for rule in rules {
        config.add_rule(rule);
    }

    Ok((config, route_count))
}

/// Count routes bound to this tunnel via their parent gateways.
async fn count_connected_routes(client: &Client, tunnel: &CloudflareTunnel) -> Result<i32> {
    let gateways = Api::<Gateway>::all(client.clone())
        .list(&ListParams::default())
        .await?
        .items;
    let routes = Api::<HttpRoute>::all(client.clone())
        .list(&ListParams::default())
        .await?
        .items;

    let (_, count) = ingress_rules_for_routes(tunnel, &gateways, &routes);
    Ok(count)
}

/// Derive ingress rules from the routes bound to this tunnel's gateways.
///
/// One rule per `(hostname, route rule)` pair, in route order; the first
/// backend wins (no weighted splitting). Returns the rules plus the number of
/// distinct routes they came from.
#[must_use]
pub fn ingress_rules_for_routes(
    tunnel: &CloudflareTunnel,
    gateways: &[Gateway],
    routes: &[HttpRoute],
) -> (Vec<IngressRule>, i32) {
    let tunnel_namespace = tunnel.namespace().unwrap_or_default();
    let tunnel_name = tunnel.name_any();

    let bound_gateways: Vec<&Gateway> = gateways
        .iter()
        .filter(|gw| gateway_bound_to_tunnel(gw, &tunnel_namespace, &tunnel_name))
        .collect();

    let mut rules = Vec::new();
    let mut route_count = 0;

    for route in routes {
        if !bound_gateways
            .iter()
            .any(|gw| route_references_gateway(route, gw))
        {
            continue;
        }
        route_count += 1;

        let route_namespace = route.namespace().unwrap_or_default();
        let annotations = route.annotations();
        let origin_request =
            build_origin_config(tunnel.spec.origin_defaults.as_ref(), annotations);

        let hostnames = route.spec.hostnames.clone().unwrap_or_default();

        for route_rule in route.spec.rules.iter().flatten() {
            let Some(backend) = route_rule
                .backend_refs
                .iter()
                .flatten()
                .filter_map(|b| b.backend_ref.as_ref())
                .next()
            else {
                continue;
            };

            let backend_namespace = backend
                .inner
                .namespace
                .clone()
                .unwrap_or_else(|| route_namespace.clone());
            let port = backend.inner.port.unwrap_or(80);
            let service = format!(
                "http://{}.{}.svc.cluster.local:{}",
                backend.inner.name, backend_namespace, port
            );

            let path = route_rule.matches.iter().flatten().find_map(|m| {
                m.path.as_ref().map(|p| match p {
                    k8s_gateway_api::HttpPathMatch::Exact { value }
                    | k8s_gateway_api::HttpPathMatch::PathPrefix { value }
                    | k8s_gateway_api::HttpPathMatch::RegularExpression { value } => value.clone(),
                })
            });

            if hostnames.is_empty() {
                rules.push(IngressRule {
                    hostname: None,
                    path: path.clone(),
                    service: service.clone(),
                    origin_request: origin_request.clone(),
                });
            } else {
                for hostname in &hostnames {
                    rules.push(IngressRule {
                        hostname: Some(hostname.clone()),
                        path: path.clone(),
                        service: service.clone(),
                        origin_request: origin_request.clone(),
                    });
                }
            }
        }
    }

    (rules, route_count)
}

async fn apply_secret(client: &Client, namespace: &str, secret: Secret) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = secret.metadata.name.clone().unwrap_or_default();
    api.patch(
        &name,
        &PatchParams::apply("cfgate").force(),
        &Patch::Apply(&secret),
    )
    .await?;
    Ok(())
}

async fn apply_deployment(client: &Client, namespace: &str, deployment: Deployment) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let name = deployment.metadata.name.clone().unwrap_or_default();
    api.patch(
        &name,
        &PatchParams::apply("cfgate").force(),
        &Patch::Apply(&deployment),
    )
    .await?;
    Ok(())
}

async fn apply_config_map(client: &Client, namespace: &str, config_map: ConfigMap) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let name = config_map.metadata.name.clone().unwrap_or_default();
    api.patch(
        &name,
        &PatchParams::apply("cfgate").force(),
        &Patch::Apply(&config_map),
    )
    .await?;
    Ok(())
}

/// Update status only when it changed, comparing everything except condition
/// transition times.
async fn update_status(
    client: &Client,
    tunnel: &CloudflareTunnel,
    status: &CloudflareTunnelStatus,
) -> Result<()> {
    let namespace = tunnel.namespace().unwrap_or_default();
    let api: Api<CloudflareTunnel> = Api::namespaced(client.clone(), &namespace);

    if let Some(current) = &tunnel.status {
        if tunnel_status_equal(current, status) {
            return Ok(());
        }
    }

    let patch = json!({ "status": status });
    api.patch_status(
        &tunnel.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

fn tunnel_status_equal(a: &CloudflareTunnelStatus, b: &CloudflareTunnelStatus) -> bool {
    a.tunnel_id == b.tunnel_id
        && a.tunnel_name == b.tunnel_name
        && a.tunnel_domain == b.tunnel_domain
        && a.ready_replicas == b.ready_replicas
        && a.connected_route_count == b.connected_route_count
        && a.observed_generation == b.observed_generation
        && crate::reconcilers::status::conditions_equal(&a.conditions, &b.conditions)
}

/// Condition helper reused by the wrapper in `main` to pick a requeue interval.
#[must_use]
pub fn tunnel_is_ready(status: Option<&CloudflareTunnelStatus>) -> bool {
    status.is_some_and(|s| crate::reconcilers::status::is_ready(&s.conditions))
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tunnel_tests;
