// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloudflare API client, services and credential cache.
//!
//! This module wraps the Cloudflare v4 REST API behind the [`CloudflareApi`]
//! trait so that reconcilers can be exercised against a mock in tests. The
//! service layers ([`dns::DnsService`], [`tunnels::TunnelService`],
//! [`access::AccessService`]) add cfgate-specific convergence logic, most
//! importantly the ownership protocol: every object cfgate creates carries a
//! comment starting with `managed by cfgate`, and objects without that marker
//! are never mutated or deleted.

pub mod access;
pub mod cache;
pub mod dns;
pub mod http;
#[cfg(test)]
pub mod testing;
pub mod tunnels;

pub use cache::CredentialCache;
pub use http::RestClient;

use crate::cf_errors::CloudflareError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A DNS zone as returned by the API.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// An external DNS record.
///
/// TTL `1` denotes Cloudflare-automatic.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct DnsRecord {
    #[serde(default)]
    pub id: String,
    pub r#type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub comment: String,
}

/// An external tunnel.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Tunnel {
    pub id: String,
    pub name: String,
    /// RFC3339 creation timestamp; used as the tie break when several tunnels
    /// share a name.
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

/// A live connector registered against a tunnel.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct TunnelConnection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub origin_ip: String,
    #[serde(default)]
    pub is_pending_reconnect: bool,
}

/// An external Access application.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct AccessApp {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub session_duration: String,
    #[serde(default)]
    pub aud: String,
    /// Carries the cfgate ownership marker, mirroring DNS record comments.
    #[serde(default)]
    pub custom_deny_message: String,
    #[serde(default)]
    pub custom_deny_url: Option<String>,
    #[serde(default)]
    pub skip_interstitial: bool,
    #[serde(default)]
    pub enable_binding_cookie: bool,
    #[serde(default)]
    pub http_only_cookie_attribute: bool,
    #[serde(default)]
    pub same_site_cookie_attribute: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Free-form tag list; cfgate stores its ownership marker here because
    /// Access applications have no comment field.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// An identity predicate inside an external Access policy rule.
///
/// Serialized exactly as the API expects (`{"email":{"email":"a@b.c"}}` etc.),
/// so the payload type doubles as the wire format.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AccessRulePayload {
    Email {
        email: String,
    },
    EmailDomain {
        domain: String,
    },
    EmailList {
        id: String,
    },
    Ip {
        ip: String,
    },
    Geo {
        country_code: String,
    },
    Everyone {},
    Certificate {},
    CommonName {
        common_name: String,
    },
    AnyValidServiceToken {},
    Group {
        id: String,
    },
    Gsuite {
        identity_provider_id: String,
        email: String,
    },
    Github {
        identity_provider_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        team: Option<String>,
    },
    AzureAd {
        identity_provider_id: String,
        id: String,
    },
    Okta {
        identity_provider_id: String,
        name: String,
    },
    Saml {
        identity_provider_id: String,
        attribute_name: String,
        attribute_value: String,
    },
}

/// An external Access policy rule attached to an application.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct AccessPolicyPayload {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub decision: String,
    pub precedence: i32,
    #[serde(default)]
    pub include: Vec<AccessRulePayload>,
    #[serde(default)]
    pub exclude: Vec<AccessRulePayload>,
    #[serde(default)]
    pub require: Vec<AccessRulePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
    #[serde(default)]
    pub purpose_justification_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose_justification_prompt: Option<String>,
    #[serde(default)]
    pub approval_required: bool,
}

/// A generated service token. `client_secret` is only returned at creation.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ServiceToken {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// An uploaded mTLS CA certificate.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct MtlsCertificate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub associated_hostnames: Vec<String>,
}

/// The provider API surface cfgate depends on.
///
/// Implemented by [`RestClient`] for production and by mocks in tests; the Go
/// implementation calls this seam `cloudflare.Client`.
#[async_trait]
pub trait CloudflareApi: Send + Sync {
    /// Validate the bearer token. Called once per cache fill so the validation
    /// cost is amortized across reconciliations.
    async fn verify_token(&self) -> Result<(), CloudflareError>;

    /// Resolve an account name to its id.
    async fn account_id_by_name(&self, name: &str) -> Result<String, CloudflareError>;

    async fn zone_by_name(&self, name: &str) -> Result<Option<Zone>, CloudflareError>;

    async fn list_dns_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>, CloudflareError>;

    async fn create_dns_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, CloudflareError>;

    async fn update_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, CloudflareError>;

    async fn delete_dns_record(&self, zone_id: &str, record_id: &str)
        -> Result<(), CloudflareError>;

    async fn list_tunnels(&self, account_id: &str) -> Result<Vec<Tunnel>, CloudflareError>;

    async fn create_tunnel(&self, account_id: &str, name: &str)
        -> Result<Tunnel, CloudflareError>;

    async fn delete_tunnel(&self, account_id: &str, tunnel_id: &str)
        -> Result<(), CloudflareError>;

    async fn tunnel_token(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<String, CloudflareError>;

    async fn tunnel_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Vec<TunnelConnection>, CloudflareError>;

    async fn list_access_apps(&self, account_id: &str)
        -> Result<Vec<AccessApp>, CloudflareError>;

    async fn create_access_app(
        &self,
        account_id: &str,
        app: &AccessApp,
    ) -> Result<AccessApp, CloudflareError>;

    async fn update_access_app(
        &self,
        account_id: &str,
        app_id: &str,
        app: &AccessApp,
    ) -> Result<AccessApp, CloudflareError>;

    async fn delete_access_app(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<(), CloudflareError>;

    async fn list_access_policies(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<Vec<AccessPolicyPayload>, CloudflareError>;

    async fn create_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy: &AccessPolicyPayload,
    ) -> Result<AccessPolicyPayload, CloudflareError>;

    async fn update_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
        policy: &AccessPolicyPayload,
    ) -> Result<AccessPolicyPayload, CloudflareError>;

    async fn delete_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
    ) -> Result<(), CloudflareError>;

    async fn list_service_tokens(
        &self,
        account_id: &str,
    ) -> Result<Vec<ServiceToken>, CloudflareError>;

    async fn create_service_token(
        &self,
        account_id: &str,
        name: &str,
        duration: &str,
    ) -> Result<ServiceToken, CloudflareError>;

    async fn upsert_mtls_certificate(
        &self,
        account_id: &str,
        name: &str,
        certificate: &str,
        hostnames: &[String],
    ) -> Result<MtlsCertificate, CloudflareError>;
}
