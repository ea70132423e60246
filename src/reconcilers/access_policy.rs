// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CloudflareAccessPolicy reconciliation logic.
//!
//! Creates and maintains one Access application per policy, attaches its rules
//! in precedence order, provisions service tokens and the mTLS certificate,
//! and publishes per-target attachment state following the Gateway API
//! policy-ancestor-status pattern. Target resolution is partial: a missing
//! gateway or absent ReferenceGrant fails that ancestor entry without
//! aborting the rest.
//!
//! Credentials come from the policy's own `cloudflareRef` when set, otherwise
//! they are inherited from the first tunnel reachable through a targeted
//! route's parent gateway. Only the credential secret has to exist; the
//! tunnel does not need to be Ready, so applications can be provisioned ahead
//! of tunnel readiness.

use crate::cloudflare::access::{convert_policy_rules, is_app_owned, AccessService};
use crate::cloudflare::{AccessApp, CloudflareApi};
use crate::constants::{
    DEFAULT_API_TOKEN_KEY, GATEWAY_CONTROLLER_NAME, KIND_ACCESS_POLICY, OWNERSHIP_SENTINEL,
};
use crate::context::{extract_hostnames_from_target, resolve_targets, Context, TargetInfo};
use crate::crd::{
    CloudflareAccessPolicy, CloudflareAccessPolicyStatus, CloudflareTunnel, PolicyAncestorStatus,
    ServiceTokenConfig,
};
use crate::labels::{ANNOTATION_ACCESS_POLICY, ANNOTATION_TUNNEL_REF, FINALIZER_ACCESS_POLICY};
use crate::metrics;
use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::reconcilers::status::{conditions_equal, create_condition, set_condition};
use anyhow::{anyhow, bail, Result};
use k8s_gateway_api::{Gateway, HttpRoute};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconcile a `CloudflareAccessPolicy` resource.
///
/// # Errors
///
/// Transient failures propagate for backoff; terminal states are recorded as
/// conditions and return `Ok`.
pub async fn reconcile_access_policy(ctx: &Context, policy: &CloudflareAccessPolicy) -> Result<()> {
    let namespace = policy.namespace().unwrap_or_default();
    let name = policy.name_any();

    info!("Reconciling CloudflareAccessPolicy: {}/{}", namespace, name);

    if is_deleting(policy) {
        return delete_access_policy(ctx, policy).await;
    }

    if ensure_finalizer(&ctx.client, policy, FINALIZER_ACCESS_POLICY).await? {
        return Ok(());
    }

    let mut status = policy.status.clone().unwrap_or_default();

    // Spec sanity re-checks behind CRD admission.
    if policy.spec.target_ref.is_some() && !policy.spec.target_refs.is_empty() {
        set_condition(
            &mut status.conditions,
            create_condition(
                "Ready",
                "False",
                "InvalidConfiguration",
                "targetRef and targetRefs are mutually exclusive",
            ),
        );
        update_status(&ctx.client, policy, status).await?;
        return Ok(());
    }
    if let Some(invalid) = first_invalid_rule(policy) {
        set_condition(
            &mut status.conditions,
            create_condition(
                "Ready",
                "False",
                "InvalidConfiguration",
                &format!("rule {invalid:?} has no identity variant"),
            ),
        );
        update_status(&ctx.client, policy, status).await?;
        return Ok(());
    }

    // 1. Resolve targets; failures are per-target. Routes opting in via the
    // access-policy annotation join the declared targets.
    let mut targets = resolve_targets(&ctx.client, policy).await;
    match annotated_route_targets(&ctx.client, policy).await {
        Ok(annotated) => {
            for target in annotated {
                if !targets
                    .iter()
                    .any(|t| t.kind == target.kind && t.namespace == target.namespace && t.name == target.name)
                {
                    targets.push(target);
                }
            }
        }
        Err(error) => debug!(%error, "failed to list annotation-attached routes"),
    }
    status.ancestors = targets.iter().map(ancestor_for_target).collect();
    status.attached_targets =
        i32::try_from(targets.iter().filter(|t| t.resolved).count()).unwrap_or(i32::MAX);

    // 2. Resolve credentials.
    let (api, account_id) = match resolve_credentials(ctx, policy, &targets).await {
        Ok(resolved) => resolved,
        Err(error) => {
            warn!(%error, "credential resolution failed for policy");
            set_condition(
                &mut status.conditions,
                create_condition("Ready", "False", "CredentialsUnavailable", &error.to_string()),
            );
            update_status(&ctx.client, policy, status).await?;
            return Ok(());
        }
    };

    // 3. Derive the protected domain.
    let domain = match derive_domain(ctx, policy, &targets).await {
        Ok(domain) => domain,
        Err(error) => {
            set_condition(
                &mut status.conditions,
                create_condition("Ready", "False", "DomainUnresolved", &error.to_string()),
            );
            update_status(&ctx.client, policy, status).await?;
            return Ok(());
        }
    };

    // 4. Adopt or create the external application.
    let service = AccessService::new(api.clone());
    let desired = build_desired_app(policy, &domain);
    let (app, modified) = service.adopt_or_create_app(&account_id, &desired).await?;

    if !is_app_owned(&app) {
        warn!(domain = %domain, "Access application for domain is foreign; refusing to manage");
        set_condition(
            &mut status.conditions,
            create_condition(
                "Ready",
                "False",
                "OwnershipViolation",
                &format!("application for {domain} exists but is not managed by cfgate"),
            ),
        );
        update_status(&ctx.client, policy, status).await?;
        return Ok(());
    }
    if modified {
        metrics::record_resource_updated(KIND_ACCESS_POLICY);
    }

    status.application_id = Some(app.id.clone());
    status.application_aud = Some(app.aud.clone());

    // 5. Rules in precedence order.
    let rules = convert_policy_rules(&policy.spec.policies);
    service.sync_rules(&account_id, &app.id, &rules).await?;

    // 6. Service tokens, stored back into child secrets.
    let mut token_ids = status.service_token_ids.clone().unwrap_or_default();
    for config in &policy.spec.service_tokens {
        if let Some(token) = service
            .ensure_service_token(
                &account_id,
                &config.name,
                config.duration.as_deref().unwrap_or("365d"),
            )
            .await?
        {
            apply_token_secret(
                &ctx.client,
                &namespace,
                build_service_token_secret(policy, config, &token.client_id, &token.client_secret),
            )
            .await?;
            token_ids.insert(config.name.clone(), token.id);
        }
    }
    if !token_ids.is_empty() {
        status.service_token_ids = Some(token_ids);
    }

    // 7. mTLS certificate.
    if let Some(mtls) = policy.spec.mtls.as_ref().filter(|m| m.enabled) {
        if let Some(ca_ref) = &mtls.root_ca_secret_ref {
            let certificate = read_ca_certificate(&ctx.client, &namespace, ca_ref).await?;
            let rule_name = mtls.rule_name.clone().unwrap_or_else(|| name.clone());
            let hostnames = if mtls.associated_hostnames.is_empty() {
                vec![domain.clone()]
            } else {
                mtls.associated_hostnames.clone()
            };
            let certificate_id = service
                .ensure_mtls_certificate(&account_id, &rule_name, &certificate, &hostnames)
                .await?;
            status.mtls_rule_id = Some(certificate_id);
        }
    }

    status.observed_generation = policy.metadata.generation;
    set_condition(
        &mut status.conditions,
        create_condition(
            "Ready",
            "True",
            "Reconciled",
            &format!("application attached to {} targets", status.attached_targets),
        ),
    );

    update_status(&ctx.client, policy, status).await?;
    Ok(())
}

/// Handle policy deletion: remove the owned external application, then the
/// finalizer. Cleanup failures are logged but never block deletion.
///
/// # Errors
///
/// Only finalizer patch failures propagate.
pub async fn delete_access_policy(ctx: &Context, policy: &CloudflareAccessPolicy) -> Result<()> {
    let name = policy.name_any();
    info!("handling CloudflareAccessPolicy deletion: {}", name);

    if !has_finalizer(policy, FINALIZER_ACCESS_POLICY) {
        return Ok(());
    }

    let application_id = policy
        .status
        .as_ref()
        .and_then(|s| s.application_id.clone());

    if let Some(application_id) = application_id {
        match cleanup_application(ctx, policy, &application_id).await {
            Ok(()) => metrics::record_resource_deleted(KIND_ACCESS_POLICY),
            Err(error) => {
                warn!(%error, "failed to delete Access application, it may be orphaned");
            }
        }
    }

    remove_finalizer(&ctx.client, policy, FINALIZER_ACCESS_POLICY).await?;
    Ok(())
}

async fn cleanup_application(
    ctx: &Context,
    policy: &CloudflareAccessPolicy,
    application_id: &str,
) -> Result<()> {
    let targets = resolve_targets(&ctx.client, policy).await;
    let (api, account_id) = resolve_credentials(ctx, policy, &targets).await?;

    // Double-check ownership against the live application before deleting.
    let apps = api.list_access_apps(&account_id).await?;
    let Some(app) = apps.into_iter().find(|a| a.id == application_id) else {
        return Ok(());
    };
    if !is_app_owned(&app) {
        debug!(app_id = %application_id, "application lost its ownership tag; leaving in place");
        return Ok(());
    }

    api.delete_access_app(&account_id, application_id).await?;
    info!(app_id = %application_id, "deleted Access application");
    Ok(())
}

/// Resolve the provider client: policy credentials when set, otherwise
/// inherited from the first tunnel reachable through a targeted route.
async fn resolve_credentials(
    ctx: &Context,
    policy: &CloudflareAccessPolicy,
    targets: &[TargetInfo],
) -> Result<(Arc<dyn CloudflareApi>, String)> {
    let namespace = policy.namespace().unwrap_or_default();

    if let Some(cloudflare_ref) = &policy.spec.cloudflare_ref {
        let secret = ctx
            .fetch_secret(
                &crate::crd::SecretReference {
                    name: cloudflare_ref.name.clone(),
                    namespace: cloudflare_ref.namespace.clone(),
                },
                &namespace,
            )
            .await?;
        let api = ctx.client_from_secret(&secret, DEFAULT_API_TOKEN_KEY).await?;

        let account_id = match (&cloudflare_ref.account_id, &cloudflare_ref.account_name) {
            (Some(id), _) if !id.is_empty() => id.clone(),
            (_, Some(account_name)) if !account_name.is_empty() => {
                api.account_id_by_name(account_name).await?
            }
            _ => bail!("cloudflareRef specifies neither accountId nor accountName"),
        };

        return Ok((api, account_id));
    }

    // Inherit from the first tunnel referenced transitively by a target.
    for target in targets.iter().filter(|t| t.resolved) {
        if let Some(tunnel) = find_tunnel_for_target(&ctx.client, target).await? {
            return ctx.credentials_for_tunnel(&tunnel).await;
        }
    }

    Err(anyhow!(
        "no cloudflareRef set and no tunnel found via targeted routes"
    ))
}

/// Routes in the policy's namespace that attach themselves via the
/// `cfgate.io/access-policy` annotation become additional resolved targets.
async fn annotated_route_targets(
    client: &Client,
    policy: &CloudflareAccessPolicy,
) -> Result<Vec<TargetInfo>> {
    let namespace = policy.namespace().unwrap_or_default();
    let name = policy.name_any();

    let routes = Api::<HttpRoute>::namespaced(client.clone(), &namespace)
        .list(&Default::default())
        .await?;

    Ok(routes
        .items
        .into_iter()
        .filter(|route| route.annotations().get(ANNOTATION_ACCESS_POLICY) == Some(&name))
        .map(|route| TargetInfo {
            kind: "HTTPRoute".to_string(),
            namespace: namespace.clone(),
            name: route.name_any(),
            section_name: None,
            resolved: true,
            error: None,
        })
        .collect())
}

/// Walk target -> parent gateway -> `tunnel-ref` annotation -> tunnel.
async fn find_tunnel_for_target(
    client: &Client,
    target: &TargetInfo,
) -> Result<Option<CloudflareTunnel>> {
    let gateway_refs: Vec<(String, String)> = match target.kind.as_str() {
        "Gateway" => vec![(target.namespace.clone(), target.name.clone())],
        "HTTPRoute" => {
            let Some(route) = Api::<HttpRoute>::namespaced(client.clone(), &target.namespace)
                .get_opt(&target.name)
                .await?
            else {
                return Ok(None);
            };
            route
                .spec
                .inner
                .parent_refs
                .iter()
                .flatten()
                .map(|parent| {
                    (
                        parent
                            .namespace
                            .clone()
                            .unwrap_or_else(|| target.namespace.clone()),
                        parent.name.clone(),
                    )
                })
                .collect()
        }
        _ => return Ok(None),
    };

    for (gateway_namespace, gateway_name) in gateway_refs {
        let Some(gateway) = Api::<Gateway>::namespaced(client.clone(), &gateway_namespace)
            .get_opt(&gateway_name)
            .await?
        else {
            continue;
        };

        let Some(tunnel_ref) = gateway.annotations().get(ANNOTATION_TUNNEL_REF) else {
            continue;
        };
        let Some((tunnel_namespace, tunnel_name)) = tunnel_ref.split_once('/') else {
            continue;
        };

        if let Some(tunnel) =
            Api::<CloudflareTunnel>::namespaced(client.clone(), tunnel_namespace)
                .get_opt(tunnel_name)
                .await?
        {
            return Ok(Some(tunnel));
        }
    }

    Ok(None)
}

/// Derive the protected domain: explicit spec value, otherwise the single
/// hostname shared by all resolved targets. Ambiguity is terminal.
async fn derive_domain(
    ctx: &Context,
    policy: &CloudflareAccessPolicy,
    targets: &[TargetInfo],
) -> Result<String> {
    if let Some(domain) = policy
        .spec
        .application
        .domain
        .as_ref()
        .filter(|d| !d.is_empty())
    {
        return Ok(domain.clone());
    }

    let mut hostnames = Vec::new();
    for target in targets.iter().filter(|t| t.resolved) {
        match extract_hostnames_from_target(&ctx.client, target).await {
            Ok(found) => hostnames.extend(found),
            Err(error) => {
                debug!(target = %target.name, %error, "failed to extract hostnames");
            }
        }
    }

    hostnames.sort();
    hostnames.dedup();

    match hostnames.len() {
        0 => bail!("no application domain set and no hostnames found on targets"),
        1 => Ok(hostnames.remove(0)),
        _ => bail!(
            "ambiguous application domain: targets expose {} distinct hostnames; set spec.application.domain",
            hostnames.len()
        ),
    }
}

/// First rule (by policy name and position) missing an identity variant, if any.
#[must_use]
pub fn first_invalid_rule(policy: &CloudflareAccessPolicy) -> Option<String> {
    for rule in &policy.spec.policies {
        for access_rule in rule
            .include
            .iter()
            .chain(rule.exclude.iter())
            .chain(rule.require.iter())
        {
            if !access_rule.has_variant() {
                return Some(rule.name.clone());
            }
        }
    }
    None
}

/// Build the desired external application for a policy, ownership tag included.
#[must_use]
pub fn build_desired_app(policy: &CloudflareAccessPolicy, domain: &str) -> AccessApp {
    let app = &policy.spec.application;
    let name = app.name.clone().unwrap_or_else(|| policy.name_any());

    AccessApp {
        id: String::new(),
        name,
        domain: domain.to_string(),
        r#type: app.r#type.clone().unwrap_or_else(|| "self_hosted".to_string()),
        session_duration: app
            .session_duration
            .clone()
            .unwrap_or_else(|| "24h".to_string()),
        aud: String::new(),
        custom_deny_message: app.custom_deny_message.clone().unwrap_or_default(),
        custom_deny_url: app.custom_deny_url.clone(),
        skip_interstitial: app.skip_interstitial,
        enable_binding_cookie: app.enable_binding_cookie,
        http_only_cookie_attribute: app.http_only_cookie_attribute,
        same_site_cookie_attribute: Some(
            app.same_site_cookie_attribute
                .clone()
                .unwrap_or_else(|| "lax".to_string()),
        ),
        logo_url: app.logo_url.clone(),
        path: Some(app.path.clone().unwrap_or_else(|| "/".to_string())),
        tags: vec![format!(
            "{OWNERSHIP_SENTINEL}, policy={}/{}",
            policy.namespace().unwrap_or_default(),
            policy.name_any()
        )],
    }
}

/// Ancestor status entry for one target, with `Accepted` and `ResolvedRefs`
/// stamped with this operator's controller name.
#[must_use]
pub fn ancestor_for_target(target: &TargetInfo) -> PolicyAncestorStatus {
    let (accepted, resolved_refs) = if target.resolved {
        (
            create_condition("Accepted", "True", "Accepted", "policy attached to target"),
            create_condition("ResolvedRefs", "True", "ResolvedRefs", "target reference resolved"),
        )
    } else {
        let message = target
            .error
            .clone()
            .unwrap_or_else(|| "target resolution failed".to_string());
        let reason = if message.contains("ReferenceGrant") {
            "RefNotPermitted"
        } else {
            "TargetNotFound"
        };
        (
            create_condition("Accepted", "False", reason, &message),
            create_condition("ResolvedRefs", "False", reason, &message),
        )
    };

    PolicyAncestorStatus {
        ancestor_ref: target.to_reference(),
        controller_name: GATEWAY_CONTROLLER_NAME.to_string(),
        conditions: vec![accepted, resolved_refs],
    }
}

/// Child secret receiving a freshly issued service token.
#[must_use]
pub fn build_service_token_secret(
    policy: &CloudflareAccessPolicy,
    config: &ServiceTokenConfig,
    client_id: &str,
    client_secret: &str,
) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert("CF_ACCESS_CLIENT_ID".to_string(), client_id.to_string());
    string_data.insert(
        "CF_ACCESS_CLIENT_SECRET".to_string(),
        client_secret.to_string(),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(config.secret_ref.name.clone()),
            namespace: policy.namespace(),
            owner_references: policy.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

async fn apply_token_secret(client: &Client, namespace: &str, secret: Secret) -> Result<()> {
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

async fn read_ca_certificate(
    client: &Client,
    namespace: &str,
    ca_ref: &crate::crd::CaSecretRef,
) -> Result<String> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get(&ca_ref.name).await?;
    let key = ca_ref.key.as_deref().unwrap_or("ca.crt");

    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string())
        .ok_or_else(|| anyhow!("key {key:?} not found in CA secret {}", ca_ref.name))
}

/// Status equality ignoring condition transition times.
#[must_use]
pub fn access_status_equal(
    a: &CloudflareAccessPolicyStatus,
    b: &CloudflareAccessPolicyStatus,
) -> bool {
    a.application_id == b.application_id
        && a.application_aud == b.application_aud
        && a.attached_targets == b.attached_targets
        && a.service_token_ids == b.service_token_ids
        && a.mtls_rule_id == b.mtls_rule_id
        && a.observed_generation == b.observed_generation
        && conditions_equal(&a.conditions, &b.conditions)
        && a.ancestors.len() == b.ancestors.len()
        && a.ancestors.iter().zip(b.ancestors.iter()).all(|(x, y)| {
            x.ancestor_ref == y.ancestor_ref
                && x.controller_name == y.controller_name
                && conditions_equal(&x.conditions, &y.conditions)
        })
}

async fn update_status(
    client: &Client,
    policy: &CloudflareAccessPolicy,
    status: CloudflareAccessPolicyStatus,
) -> Result<()> {
    if let Some(current) = &policy.status {
        if access_status_equal(current, &status) {
            return Ok(());
        }
    }

    let namespace = policy.namespace().unwrap_or_default();
    let api: Api<CloudflareAccessPolicy> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({ "status": status });
    api.patch_status(
        &policy.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "access_policy_tests.rs"]
mod access_policy_tests;
