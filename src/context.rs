// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers plus policy target resolution.
//!
//! The [`Context`] carries the Kubernetes client, the process-wide credential
//! cache and an optional injected provider client (used by tests to exercise
//! reconcilers against a mock). [`Stores`] holds reflector stores used by the
//! synchronous watch mappers in `main.rs`: a route or gateway event must fan
//! out to the primaries whose desired state could depend on it, and a store
//! lookup is the only way to do that without an async API call inside the
//! mapper.
//!
//! Target resolution implements the Gateway API policy-attachment rules:
//! per-target existence checks, `ReferenceGrant` verification for
//! cross-namespace references, and hostname extraction per target kind.
//! Resolution is partial by design; a missing gateway must not block
//! unrelated attachments.

use crate::cf_errors::CloudflareError;
use crate::cloudflare::cache::{CredentialCache, SharedClientCache};
use crate::cloudflare::{CloudflareApi, RestClient};
use crate::constants::{DEFAULT_API_TOKEN_KEY, GATEWAY_API_GROUP, KIND_ACCESS_POLICY};
use crate::crd::{
    CloudflareAccessPolicy, CloudflareDNSSync, CloudflareTunnel, PolicyTargetReference,
    SecretReference,
};
use crate::labels::ANNOTATION_HOSTNAME;
use anyhow::{anyhow, Context as _, Result};
use k8s_gateway_api::{
    Gateway, GrpcRoute, HttpRoute, ReferenceGrant, TcpRoute, UdpRoute,
};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::Store;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::debug;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Cache of validated Cloudflare clients keyed by secret identity+version
    pub credentials: SharedClientCache,

    /// Injected provider client; set by tests, `None` in production
    pub cloudflare_override: Option<Arc<dyn CloudflareApi>>,
}

impl Context {
    /// Production context.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            credentials: Arc::new(CredentialCache::default()),
            cloudflare_override: None,
        }
    }

    /// Context with an injected provider client, bypassing secret resolution.
    #[must_use]
    pub fn with_override(client: Client, api: Arc<dyn CloudflareApi>) -> Self {
        Self {
            client,
            credentials: Arc::new(CredentialCache::default()),
            cloudflare_override: Some(api),
        }
    }

    /// Read a credential secret and return a validated client for it.
    ///
    /// Cache hits skip both construction and token validation; the cache key
    /// includes the secret's `resourceVersion`, so rotating the secret
    /// invalidates naturally.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when the key is missing or the token fails
    /// validation; transport errors from the validation call.
    pub async fn client_from_secret(
        &self,
        secret: &Secret,
        token_key: &str,
    ) -> Result<Arc<dyn CloudflareApi>, CloudflareError> {
        if let Some(api) = &self.cloudflare_override {
            return Ok(api.clone());
        }

        if let Some(cached) = self.credentials.get(secret) {
            return Ok(cached);
        }

        let token = secret
            .data
            .as_ref()
            .and_then(|data| data.get(token_key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string())
            .ok_or_else(|| CloudflareError::InvalidCredentials {
                reason: format!("key {token_key:?} not found in secret"),
            })?;

        let client: Arc<dyn CloudflareApi> = Arc::new(RestClient::new(token.trim())?);
        client.verify_token().await?;
        self.credentials.set(secret, client.clone());

        debug!(
            secret = %secret.name_any(),
            "validated Cloudflare credentials and cached client"
        );
        Ok(client)
    }

    /// Fetch a secret by reference, defaulting the namespace.
    ///
    /// # Errors
    ///
    /// Kubernetes API errors, including not-found.
    pub async fn fetch_secret(
        &self,
        reference: &SecretReference,
        default_namespace: &str,
    ) -> Result<Secret> {
        let namespace = reference.namespace.as_deref().unwrap_or(default_namespace);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(&reference.name).await.with_context(|| {
            format!(
                "failed to get credentials secret {namespace}/{}",
                reference.name
            )
        })
    }

    /// Resolve the provider client and account id for a tunnel.
    ///
    /// # Errors
    ///
    /// Secret lookup failures, credential validation failures, or a spec with
    /// neither `accountId` nor `accountName`.
    pub async fn credentials_for_tunnel(
        &self,
        tunnel: &CloudflareTunnel,
    ) -> Result<(Arc<dyn CloudflareApi>, String)> {
        let namespace = tunnel.namespace().unwrap_or_default();
        let secret = self
            .fetch_secret(&tunnel.spec.cloudflare.secret_ref, &namespace)
            .await?;

        let token_key = tunnel
            .spec
            .cloudflare
            .secret_keys
            .api_token
            .as_deref()
            .unwrap_or(DEFAULT_API_TOKEN_KEY);

        let api = self.client_from_secret(&secret, token_key).await?;

        let account_id = match (
            &tunnel.spec.cloudflare.account_id,
            &tunnel.spec.cloudflare.account_name,
        ) {
            (Some(id), _) if !id.is_empty() => id.clone(),
            (_, Some(name)) if !name.is_empty() => api.account_id_by_name(name).await?,
            _ => {
                return Err(anyhow!(
                    "tunnel {}/{} specifies neither accountId nor accountName",
                    namespace,
                    tunnel.name_any()
                ))
            }
        };

        Ok((api, account_id))
    }
}

/// Collection of reflector stores for cross-controller queries.
///
/// Each store is populated by a dedicated reflector task spawned in `main`.
#[derive(Clone)]
pub struct Stores {
    pub dns_syncs: Store<CloudflareDNSSync>,
    pub access_policies: Store<CloudflareAccessPolicy>,
}

impl Stores {
    /// DNSSyncs that collect hostnames from gateway routes; a route or
    /// gateway event re-enqueues all of them. Over-enqueuing is fine because
    /// reconciliation is idempotent.
    #[must_use]
    pub fn dns_syncs_watching_routes(&self) -> Vec<(String, String)> {
        self.dns_syncs
            .state()
            .iter()
            .filter(|sync| sync.spec.source.gateway_routes.enabled)
            .map(|sync| (sync.name_any(), sync.namespace().unwrap_or_default()))
            .collect()
    }

    /// All access policies; route and gateway events re-enqueue every policy
    /// since any of them may target the changed object.
    #[must_use]
    pub fn all_access_policies(&self) -> Vec<(String, String)> {
        self.access_policies
            .state()
            .iter()
            .map(|policy| (policy.name_any(), policy.namespace().unwrap_or_default()))
            .collect()
    }
}

// ============================================================================
// Policy target resolution
// ============================================================================

/// A resolved (or failed) policy target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetInfo {
    /// Kind of the target resource (HTTPRoute, Gateway, ...)
    pub kind: String,

    /// Namespace of the target resource
    pub namespace: String,

    /// Name of the target resource
    pub name: String,

    /// Listener or rule the policy binds to
    pub section_name: Option<String>,

    /// Whether the target exists and the reference is permitted
    pub resolved: bool,

    /// Resolution error (`None` when resolved)
    pub error: Option<String>,
}

impl TargetInfo {
    /// The original reference this target was resolved from, for status
    /// ancestor entries.
    #[must_use]
    pub fn to_reference(&self) -> PolicyTargetReference {
        PolicyTargetReference {
            group: GATEWAY_API_GROUP.to_string(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            namespace: Some(self.namespace.clone()),
            section_name: self.section_name.clone(),
        }
    }
}

/// Merge `targetRef` and `targetRefs` into one list.
#[must_use]
pub fn merged_target_refs(policy: &CloudflareAccessPolicy) -> Vec<PolicyTargetReference> {
    let mut refs = Vec::new();
    if let Some(single) = &policy.spec.target_ref {
        refs.push(single.clone());
    }
    refs.extend(policy.spec.target_refs.iter().cloned());
    refs
}

/// Resolve every target of a policy. Failures are recorded per target and do
/// not abort resolution of the rest.
pub async fn resolve_targets(
    client: &Client,
    policy: &CloudflareAccessPolicy,
) -> Vec<TargetInfo> {
    let policy_namespace = policy.namespace().unwrap_or_default();
    let mut targets = Vec::new();

    for reference in merged_target_refs(policy) {
        targets.push(resolve_target(client, &reference, &policy_namespace).await);
    }

    targets
}

/// Resolve a single target reference.
pub async fn resolve_target(
    client: &Client,
    reference: &PolicyTargetReference,
    policy_namespace: &str,
) -> TargetInfo {
    let namespace = reference
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| policy_namespace.to_string());

    let mut info = TargetInfo {
        kind: reference.kind.clone(),
        namespace: namespace.clone(),
        name: reference.name.clone(),
        section_name: reference.section_name.clone(),
        resolved: false,
        error: None,
    };

    let exists = match target_exists(client, &reference.kind, &namespace, &reference.name).await {
        Ok(exists) => exists,
        Err(error) => {
            info.error = Some(error.to_string());
            return info;
        }
    };

    if !exists {
        info.error = Some(format!("target {namespace}/{} not found", reference.name));
        return info;
    }

    if namespace != policy_namespace {
        match check_reference_grant(client, policy_namespace, &namespace, &reference.kind).await {
            Ok(true) => {}
            Ok(false) => {
                info.error = Some(format!(
                    "cross-namespace reference to {namespace}/{} not permitted: ReferenceGrant missing",
                    reference.name
                ));
                return info;
            }
            Err(error) => {
                info.error = Some(format!("checking ReferenceGrant: {error}"));
                return info;
            }
        }
    }

    info.resolved = true;
    info
}

/// Check whether a target resource exists.
///
/// # Errors
///
/// Unsupported kinds and Kubernetes API errors other than not-found.
pub async fn target_exists(
    client: &Client,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    let result = match kind {
        "Gateway" => Api::<Gateway>::namespaced(client.clone(), namespace)
            .get_opt(name)
            .await
            .map(|o| o.is_some()),
        "HTTPRoute" => Api::<HttpRoute>::namespaced(client.clone(), namespace)
            .get_opt(name)
            .await
            .map(|o| o.is_some()),
        "GRPCRoute" => Api::<GrpcRoute>::namespaced(client.clone(), namespace)
            .get_opt(name)
            .await
            .map(|o| o.is_some()),
        "TCPRoute" => Api::<TcpRoute>::namespaced(client.clone(), namespace)
            .get_opt(name)
            .await
            .map(|o| o.is_some()),
        "UDPRoute" => Api::<UdpRoute>::namespaced(client.clone(), namespace)
            .get_opt(name)
            .await
            .map(|o| o.is_some()),
        other => return Err(anyhow!("unsupported target kind: {other}")),
    };

    result.map_err(Into::into)
}

/// Pure ReferenceGrant evaluation: does any grant permit
/// `CloudflareAccessPolicy` objects in `from_namespace` to reference
/// `target_kind` objects in the grant's namespace?
#[must_use]
pub fn grant_permits(grants: &[ReferenceGrant], from_namespace: &str, target_kind: &str) -> bool {
    grants.iter().any(|grant| {
        let from_ok = grant.spec.from.iter().any(|from| {
            from.group == crate::constants::API_GROUP
                && from.kind == KIND_ACCESS_POLICY
                && from.namespace == from_namespace
        });
        let to_ok = grant
            .spec
            .to
            .iter()
            .any(|to| to.group == GATEWAY_API_GROUP && to.kind == target_kind);
        from_ok && to_ok
    })
}

/// List grants in the target namespace and evaluate them.
///
/// # Errors
///
/// Kubernetes API errors from the list call.
pub async fn check_reference_grant(
    client: &Client,
    from_namespace: &str,
    to_namespace: &str,
    target_kind: &str,
) -> Result<bool> {
    let api: Api<ReferenceGrant> = Api::namespaced(client.clone(), to_namespace);
    let grants = api.list(&Default::default()).await?;
    Ok(grant_permits(&grants.items, from_namespace, target_kind))
}

/// Extract the hostnames a target serves: spec hostnames for HTTP/GRPC
/// routes, listener hostnames for gateways, the hostname annotation for
/// TCP/UDP routes.
///
/// # Errors
///
/// Kubernetes API errors fetching the target.
pub async fn extract_hostnames_from_target(
    client: &Client,
    target: &TargetInfo,
) -> Result<Vec<String>> {
    match target.kind.as_str() {
        "HTTPRoute" => {
            let route = Api::<HttpRoute>::namespaced(client.clone(), &target.namespace)
                .get(&target.name)
                .await?;
            Ok(route.spec.hostnames.unwrap_or_default())
        }
        "GRPCRoute" => {
            let route = Api::<GrpcRoute>::namespaced(client.clone(), &target.namespace)
                .get(&target.name)
                .await?;
            Ok(route.spec.hostnames.unwrap_or_default())
        }
        "Gateway" => {
            let gateway = Api::<Gateway>::namespaced(client.clone(), &target.namespace)
                .get(&target.name)
                .await?;
            Ok(gateway
                .spec
                .listeners
                .iter()
                .filter_map(|listener| listener.hostname.clone())
                .collect())
        }
        "TCPRoute" => {
            let route = Api::<TcpRoute>::namespaced(client.clone(), &target.namespace)
                .get(&target.name)
                .await?;
            Ok(annotation_hostname(route.annotations()))
        }
        "UDPRoute" => {
            let route = Api::<UdpRoute>::namespaced(client.clone(), &target.namespace)
                .get(&target.name)
                .await?;
            Ok(annotation_hostname(route.annotations()))
        }
        _ => Ok(Vec::new()),
    }
}

fn annotation_hostname(
    annotations: &std::collections::BTreeMap<String, String>,
) -> Vec<String> {
    annotations
        .get(ANNOTATION_HOSTNAME)
        .map(|h| vec![h.clone()])
        .unwrap_or_default()
}

// ============================================================================
// Gateway binding helpers
// ============================================================================

/// True when the gateway's `cfgate.io/tunnel-ref` annotation names this tunnel.
#[must_use]
pub fn gateway_bound_to_tunnel(
    gateway: &Gateway,
    tunnel_namespace: &str,
    tunnel_name: &str,
) -> bool {
    gateway
        .annotations()
        .get(crate::labels::ANNOTATION_TUNNEL_REF)
        .is_some_and(|value| value == &format!("{tunnel_namespace}/{tunnel_name}"))
}

/// True when the gateway opts into DNS sync.
#[must_use]
pub fn gateway_dns_sync_enabled(gateway: &Gateway) -> bool {
    gateway
        .annotations()
        .get(crate::labels::ANNOTATION_DNS_SYNC)
        .is_some_and(|value| value == crate::labels::DNS_SYNC_ENABLED)
}

/// True when any parent ref of the route points at the gateway.
#[must_use]
pub fn route_references_gateway(route: &HttpRoute, gateway: &Gateway) -> bool {
    let gateway_name = gateway.name_any();
    let gateway_namespace = gateway.namespace().unwrap_or_default();
    let route_namespace = route.namespace().unwrap_or_default();

    route
        .spec
        .inner
        .parent_refs
        .iter()
        .flatten()
        .any(|parent| {
            let parent_namespace = parent
                .namespace
                .clone()
                .unwrap_or_else(|| route_namespace.clone());
            parent.name == gateway_name && parent_namespace == gateway_namespace
        })
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
