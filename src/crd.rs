// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Cloudflare tunnel management.
//!
//! This module defines all Kubernetes Custom Resource Definitions used by cfgate
//! to project declarative desired state onto the Cloudflare control plane.
//!
//! # Resource Types
//!
//! - [`CloudflareTunnel`] - An external tunnel plus the in-cluster cloudflared
//!   workload that serves it
//! - [`CloudflareDNSSync`] - A binding from a tunnel to a set of hostnames whose
//!   CNAMEs converge onto the tunnel domain
//! - [`CloudflareAccessPolicy`] - A zero-trust Access application attached to
//!   Gateway API targets
//!
//! # Example: Declaring a Tunnel
//!
//! ```rust,no_run
//! use cfgate::crd::{CloudflareTunnelSpec, CloudflareDetails, SecretReference};
//!
//! let spec = CloudflareTunnelSpec {
//!     cloudflare: CloudflareDetails {
//!         account_id: Some("0123456789abcdef".to_string()),
//!         account_name: None,
//!         secret_ref: SecretReference {
//!             name: "cloudflare-credentials".to_string(),
//!             namespace: None,
//!         },
//!         secret_keys: Default::default(),
//!     },
//!     ..Default::default()
//! };
//! ```

use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. Ready, CredentialsValid, ZonesResolved.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Reference to a Secret, defaulting to the resource's own namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the secret.
    pub name: String,

    /// Namespace of the secret. Defaults to the referencing resource's namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to a `CloudflareTunnel` resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRef {
    /// Name of the `CloudflareTunnel`.
    pub name: String,

    /// Namespace of the `CloudflareTunnel`. Defaults to the referencing
    /// resource's namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ============================================================================
// CloudflareTunnel
// ============================================================================

/// Keys within the credential secret.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeys {
    /// Key holding the API token. Defaults to `CLOUDFLARE_API_TOKEN`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Cloudflare account and credential configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareDetails {
    /// Cloudflare account ID that owns the tunnel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Cloudflare account name; resolved to an id via the API when
    /// `accountId` is not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,

    /// Secret holding the API token.
    pub secret_ref: SecretReference,

    /// Overrides for the keys inside the credential secret.
    #[serde(default)]
    pub secret_keys: SecretKeys,
}

/// Metrics endpoint configuration for the cloudflared agent.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflaredMetrics {
    /// Port on which cloudflared serves metrics and `/ready`. Defaults to 2000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// cloudflared agent deployment configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflaredConfig {
    /// Container image. Defaults to the pinned cloudflared release.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy. Defaults to `IfNotPresent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Number of agent replicas. Defaults to 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Node selector for agent pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Tolerations for agent pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Resource requests and limits for the agent container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Extra command line arguments appended before `run`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,

    /// Tunnel transport protocol (`auto`, `quic`, `http2`). `auto` omits the flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Metrics endpoint configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CloudflaredMetrics>,

    /// Annotations merged onto agent pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,
}

/// Default origin connection settings applied to every ingress rule.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OriginDefaults {
    /// Timeout for establishing connections to the origin (e.g. `30s`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,

    /// Disable TLS verification towards the origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_tls_verify: Option<bool>,

    /// Use HTTP/2 towards the origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http2_origin: Option<bool>,

    /// Host header override towards the origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_host_header: Option<String>,

    /// SNI override towards the origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_server_name: Option<String>,

    /// CA bundle path for validating origin certificates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_pool: Option<String>,
}

/// Per-tunnel DNS configuration, mirrored by `CloudflareDNSSync` for
/// standalone bindings.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelDnsConfig {
    /// Enables DNS management for this tunnel.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Zones this tunnel may create records in.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    /// Record defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<RecordDefaults>,

    /// Ownership marker configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership: Option<OwnershipConfig>,

    /// Record cleanup behavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_policy: Option<CleanupPolicy>,
}

/// `CloudflareTunnel` declares one external tunnel with identity
/// `(account, name)` plus the in-cluster cloudflared deployment serving it.
///
/// The reconciler adopts a pre-existing external tunnel with a matching name
/// rather than creating a duplicate; this makes tunnels survive operator
/// restarts and lets users pre-create them. The deletion policy annotation
/// `cfgate.io/deletion-policy` selects between `delete` (default) and
/// `orphan`.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cfgate.io",
    version = "v1alpha1",
    kind = "CloudflareTunnel",
    namespaced,
    status = "CloudflareTunnelStatus",
    shortname = "cftunnel",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"TunnelID","type":"string","jsonPath":".status.tunnelId"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareTunnelSpec {
    /// Account and credential configuration.
    pub cloudflare: CloudflareDetails,

    /// cloudflared agent deployment configuration.
    #[serde(default)]
    pub cloudflared: CloudflaredConfig,

    /// Default origin connection settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_defaults: Option<OriginDefaults>,

    /// Catch-all origin service for unmatched requests.
    /// Defaults to `http_status:404`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_target: Option<String>,

    /// When false, the agent runs from a rendered config file mirrored into a
    /// child ConfigMap instead of Cloudflare-hosted remote configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_config: Option<bool>,

    /// Optional tunnel-scoped DNS configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<TunnelDnsConfig>,
}

/// `CloudflareTunnel` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareTunnelStatus {
    /// External tunnel id (UUID assigned by Cloudflare).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,

    /// External tunnel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_name: Option<String>,

    /// `<tunnel-id>.cfargotunnel.com`, the CNAME target for all routed hostnames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_domain: Option<String>,

    /// Ready replicas of the cloudflared deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    /// Number of HTTPRoutes currently routed through this tunnel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_route_count: Option<i32>,

    /// Spec generation most recently reconciled to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// CloudflareDNSSync
// ============================================================================

/// A DNS zone to manage.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    /// Zone name, e.g. `example.com`.
    pub name: String,

    /// Explicit zone id; skips the API lookup and bypasses the last-two-labels
    /// heuristic for multi-label TLDs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Configures collecting hostnames from Gateway API routes.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRoutesSource {
    /// Enables watching Gateway API routes.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Only routes carrying this annotation are synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_filter: Option<String>,
}

impl Default for GatewayRoutesSource {
    fn default() -> Self {
        Self {
            enabled: true,
            annotation_filter: None,
        }
    }
}

/// An explicit hostname to sync, independent of any route.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExplicitHostname {
    /// DNS hostname to create.
    pub hostname: String,

    /// CNAME target. The template variable `{{ .TunnelDomain }}` expands to
    /// the tunnel's domain.
    pub target: String,

    /// Proxy this record through Cloudflare.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,

    /// Record TTL in seconds, or `auto`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Sources of hostnames to sync.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostnameSource {
    /// Collect hostnames from Gateway API routes.
    #[serde(default)]
    pub gateway_routes: GatewayRoutesSource,

    /// Explicit hostnames to sync.
    #[serde(default)]
    pub explicit: Vec<ExplicitHostname>,
}

/// Default settings for created DNS records.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordDefaults {
    /// Proxy records through Cloudflare by default.
    #[serde(default = "default_true")]
    pub proxied: bool,

    /// Default TTL, or `auto`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        Self {
            proxied: true,
            ttl: None,
        }
    }
}

/// TXT record based ownership tracking.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TxtRecordOwnership {
    /// Create a companion `<prefix>.<hostname>` TXT record per managed hostname.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name prefix of the companion record. Defaults to `_cfgate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Default for TxtRecordOwnership {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: None,
        }
    }
}

/// Comment based ownership tracking.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentOwnership {
    /// Enables comment-based ownership tracking.
    #[serde(default)]
    pub enabled: bool,

    /// Comment template. `{{ .TunnelName }}` expands to the tunnel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// How record ownership is tracked.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipConfig {
    /// TXT record ownership.
    #[serde(default)]
    pub txt_record: TxtRecordOwnership,

    /// Comment ownership.
    #[serde(default)]
    pub comment: CommentOwnership,
}

/// What to do with records that are no longer wanted.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPolicy {
    /// Delete records when their source route disappears.
    #[serde(default = "default_true")]
    pub delete_on_route_removal: bool,

    /// Delete records when the DNSSync resource is deleted.
    #[serde(default = "default_true")]
    pub delete_on_resource_removal: bool,

    /// Only delete records carrying the cfgate ownership marker.
    #[serde(default = "default_true")]
    pub only_managed: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            delete_on_route_removal: true,
            delete_on_resource_removal: true,
            only_managed: true,
        }
    }
}

/// `CloudflareDNSSync` binds a tunnel to a set of hostnames across zones and
/// converges each hostname to a CNAME pointing at the tunnel domain.
///
/// Records not carrying the cfgate ownership marker are never modified or
/// deleted; they are surfaced in status with their existing content instead.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cfgate.io",
    version = "v1alpha1",
    kind = "CloudflareDNSSync",
    namespaced,
    status = "CloudflareDNSSyncStatus",
    shortname = "cfdns",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced","type":"integer","jsonPath":".status.syncedRecords"}"#,
    printcolumn = r#"{"name":"Failed","type":"integer","jsonPath":".status.failedRecords"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareDNSSyncSpec {
    /// Tunnel whose domain the records point at.
    pub tunnel_ref: TunnelRef,

    /// Zones the sync may manage records in.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    /// Where hostnames come from.
    #[serde(default)]
    pub source: HostnameSource,

    /// Record defaults.
    #[serde(default)]
    pub defaults: RecordDefaults,

    /// Ownership marker configuration.
    #[serde(default)]
    pub ownership: OwnershipConfig,

    /// Cleanup behavior.
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,

    /// Fallback credentials used during deletion when the tunnel or its secret
    /// is already gone. The secret must contain a `CLOUDFLARE_API_TOKEN` key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_credentials_ref: Option<SecretReference>,
}

/// Status of a single managed DNS record.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordStatus {
    /// DNS hostname.
    pub hostname: String,

    /// Record type (CNAME).
    pub r#type: String,

    /// Record target/content.
    #[serde(default)]
    pub target: String,

    /// Whether the Cloudflare proxy is enabled.
    #[serde(default)]
    pub proxied: bool,

    /// Sync status: Synced, Pending, or Failed.
    pub status: String,

    /// Cloudflare record id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Error message when status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `CloudflareDNSSync` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareDNSSyncStatus {
    /// Number of successfully synced records.
    #[serde(default)]
    pub synced_records: i32,

    /// Number of records pending sync.
    #[serde(default)]
    pub pending_records: i32,

    /// Number of records that failed to sync.
    #[serde(default)]
    pub failed_records: i32,

    /// Per-record status entries.
    #[serde(default)]
    pub records: Vec<DnsRecordStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time records were synced (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// CloudflareAccessPolicy
// ============================================================================

/// Identifies a Gateway API target for policy attachment.
///
/// Group is fixed to `gateway.networking.k8s.io`; kind must be one of
/// Gateway, HTTPRoute, GRPCRoute, TCPRoute, UDPRoute. Cross-namespace targets
/// require a `ReferenceGrant` in the target namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    /// API group of the target resource.
    #[serde(default)]
    pub group: String,

    /// Kind of the target resource.
    pub kind: String,

    /// Name of the target resource.
    pub name: String,

    /// Namespace of the target resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Targets a specific listener (Gateway) or rule (Route).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

/// References Cloudflare credentials for a policy, overriding tunnel inheritance.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareSecretRef {
    /// Name of the secret containing credentials.
    pub name: String,

    /// Namespace of the secret (defaults to the policy namespace).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Cloudflare account id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Cloudflare account name (resolved via the API).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
}

/// Access Application settings.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessApplication {
    /// Display name in the Cloudflare dashboard. Defaults to the CR name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Protected domain. Derived from the union of target hostnames when
    /// omitted; ambiguity across targets is a terminal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Path prefix to protect. Defaults to `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Session cookie lifetime, e.g. `24h`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,

    /// Application type: self_hosted, saas, ssh, vnc, browser_isolation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// Application logo URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,

    /// Bypass the Access login page for API requests.
    #[serde(default)]
    pub skip_interstitial: bool,

    /// Enable binding cookies for sticky sessions.
    #[serde(default)]
    pub enable_binding_cookie: bool,

    /// Add HttpOnly to session cookies.
    #[serde(default = "default_true")]
    pub http_only_cookie_attribute: bool,

    /// SameSite cookie attribute: strict, lax, or none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site_cookie_attribute: Option<String>,

    /// Message shown when access is denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_deny_message: Option<String>,

    /// Redirect URL when access is denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_deny_url: Option<String>,
}

/// Matches specific email addresses.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailRule {
    /// Addresses to match.
    pub addresses: Vec<String>,
}

/// Matches an email domain suffix.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailDomainRule {
    /// Domain suffix, e.g. `example.com`.
    pub domain: String,
}

/// References a Cloudflare Access list by id or name.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessListRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Matches source IP CIDR ranges.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpRangeRule {
    /// CIDR blocks.
    pub ranges: Vec<String>,
}

/// Matches source country codes (ISO 3166-1 alpha-2).
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CountryRule {
    /// Country codes.
    pub codes: Vec<String>,
}

/// Matches a certificate common name.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonNameRule {
    /// Expected common name.
    pub value: String,
}

/// References an AccessGroup CR or a Cloudflare group id.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessGroupRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Cloudflare group id (bypasses CR lookup).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudflare_id: Option<String>,
}

/// Matches Google Workspace groups.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GsuiteRule {
    pub identity_provider_id: String,

    #[serde(default)]
    pub groups: Vec<String>,
}

/// Matches GitHub organization membership.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GithubRule {
    pub identity_provider_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    #[serde(default)]
    pub teams: Vec<String>,
}

/// Matches Azure AD groups.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureRule {
    pub identity_provider_id: String,

    #[serde(default)]
    pub groups: Vec<String>,
}

/// Matches Okta groups.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OktaRule {
    pub identity_provider_id: String,

    #[serde(default)]
    pub groups: Vec<String>,
}

/// Matches SAML assertion attributes.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamlRule {
    pub identity_provider_id: String,

    pub attribute_name: String,

    pub attribute_value: String,
}

/// Identity matching criteria. At least one variant must be present
/// (enforced by CRD admission; re-checked at reconcile time).
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_domain: Option<EmailDomainRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_list_ref: Option<AccessListRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_range: Option<IpRangeRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<CountryRule>,

    /// Matches all users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub everyone: Option<bool>,

    /// Requires a valid mTLS certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<CommonNameRule>,

    /// Requires a valid service token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_token: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<AccessGroupRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gsuite: Option<GsuiteRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub okta: Option<OktaRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub saml: Option<SamlRule>,
}

impl AccessRule {
    /// True when at least one identity variant is set.
    #[must_use]
    pub fn has_variant(&self) -> bool {
        self.email.is_some()
            || self.email_domain.is_some()
            || self.email_list_ref.is_some()
            || self.ip_range.is_some()
            || self.country.is_some()
            || self.everyone.is_some()
            || self.certificate.is_some()
            || self.common_name.is_some()
            || self.service_token.is_some()
            || self.group_ref.is_some()
            || self.gsuite.is_some()
            || self.github.is_some()
            || self.azure.is_some()
            || self.okta.is_some()
            || self.saml.is_some()
    }
}

/// Who can approve access requests.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGroup {
    #[serde(default)]
    pub emails: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_domain: Option<String>,

    /// Number of approvals required. Defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvals_needed: Option<i32>,
}

/// One access rule attached to the application.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyRule {
    /// Human-readable identifier.
    pub name: String,

    /// Policy action: allow, deny, bypass, or non_identity. Defaults to allow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Evaluation order (lower evaluates first).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precedence: Option<i32>,

    /// ANY must match for the rule to apply.
    #[serde(default)]
    pub include: Vec<AccessRule>,

    /// If ANY match, the rule does not apply.
    #[serde(default)]
    pub exclude: Vec<AccessRule>,

    /// ALL must match for the rule to apply.
    #[serde(default)]
    pub require: Vec<AccessRule>,

    /// Overrides the application session duration for this rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,

    /// Require the user to provide a justification.
    #[serde(default)]
    pub purpose_justification_required: bool,

    /// Prompt shown when justification is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose_justification_prompt: Option<String>,

    /// Require approval before granting access.
    #[serde(default)]
    pub approval_required: bool,

    /// Who can approve.
    #[serde(default)]
    pub approval_groups: Vec<ApprovalGroup>,
}

/// Machine-to-machine authentication token.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenConfig {
    /// Token display name.
    pub name: String,

    /// Token validity period, e.g. `365d`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Secret receiving the generated client id and secret.
    pub secret_ref: ServiceTokenSecretRef,
}

/// Secret receiving the generated service token credentials.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenSecretRef {
    /// Name of the secret.
    pub name: String,
}

/// References a CA certificate secret for mTLS.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaSecretRef {
    /// Name of the secret.
    pub name: String,

    /// Key within the secret. Defaults to `ca.crt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Certificate-based authentication.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MtlsConfig {
    /// Activates the mTLS requirement.
    #[serde(default)]
    pub enabled: bool,

    /// CA certificates used for validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_ca_secret_ref: Option<CaSecretRef>,

    /// Limits mTLS to specific hostnames.
    #[serde(default)]
    pub associated_hostnames: Vec<String>,

    /// Name of the certificate in Cloudflare. Defaults to the CR name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
}

/// `CloudflareAccessPolicy` attaches a zero-trust Access application and its
/// rules to Gateway API targets.
///
/// Exactly one of `targetRef` / `targetRefs` must be set (CRD-enforced,
/// re-checked at reconcile time). Per-target attachment state is published
/// under `status.ancestors` following the Gateway API policy-ancestor-status
/// pattern.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cfgate.io",
    version = "v1alpha1",
    kind = "CloudflareAccessPolicy",
    namespaced,
    status = "CloudflareAccessPolicyStatus",
    shortname = "cfaccess",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Application","type":"string","jsonPath":".status.applicationId"}"#,
    printcolumn = r#"{"name":"Targets","type":"integer","jsonPath":".status.attachedTargets"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareAccessPolicySpec {
    /// Single attachment target. Mutually exclusive with `targetRefs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<PolicyTargetReference>,

    /// Multiple attachment targets. Mutually exclusive with `targetRef`.
    #[serde(default)]
    pub target_refs: Vec<PolicyTargetReference>,

    /// Credential override; inherits from the first targeted route's tunnel
    /// when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudflare_ref: Option<CloudflareSecretRef>,

    /// Access Application settings.
    #[serde(default)]
    pub application: AccessApplication,

    /// Access rules, evaluated in precedence order.
    #[serde(default)]
    pub policies: Vec<AccessPolicyRule>,

    /// Service tokens for machine-to-machine authentication.
    #[serde(default)]
    pub service_tokens: Vec<ServiceTokenConfig>,

    /// Certificate-based authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtls: Option<MtlsConfig>,
}

/// Attachment status for one target, following the Gateway API
/// PolicyAncestorStatus pattern.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    /// The target this entry describes.
    pub ancestor_ref: PolicyTargetReference,

    /// Controller managing this attachment.
    pub controller_name: String,

    /// Conditions for this target (`Accepted`, `ResolvedRefs`).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// `CloudflareAccessPolicy` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareAccessPolicyStatus {
    /// Cloudflare Access Application id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,

    /// Application audience tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_aud: Option<String>,

    /// Count of successfully attached targets.
    #[serde(default)]
    pub attached_targets: i32,

    /// Token name to Cloudflare id mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_token_ids: Option<BTreeMap<String, String>>,

    /// Cloudflare mTLS certificate id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtls_rule_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-target attachment status.
    #[serde(default)]
    pub ancestors: Vec<PolicyAncestorStatus>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
