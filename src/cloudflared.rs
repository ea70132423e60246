// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! cloudflared configuration document rendering.
//!
//! Used in config-file mode (the alternative to Cloudflare-hosted remote
//! configuration): the rendered YAML is mirrored into a child ConfigMap and
//! mounted by the agent. The ingress list must end in a catch-all rule (no
//! hostname, no path); [`TunnelConfig::validate`] enforces this before
//! anything is written.

use crate::constants::{DEFAULT_CLOUDFLARED_METRICS_PORT, DEFAULT_FALLBACK_TARGET};
use crate::crd::{CloudflareTunnel, OriginDefaults};
use crate::labels;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Origin connection settings for the whole tunnel or a single rule.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct OriginRequestConfig {
    #[serde(rename = "connectTimeout", skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,

    #[serde(rename = "noTLSVerify", skip_serializing_if = "std::ops::Not::not", default)]
    pub no_tls_verify: bool,

    #[serde(rename = "httpHostHeader", skip_serializing_if = "Option::is_none")]
    pub http_host_header: Option<String>,

    #[serde(rename = "originServerName", skip_serializing_if = "Option::is_none")]
    pub origin_server_name: Option<String>,

    #[serde(rename = "caPool", skip_serializing_if = "Option::is_none")]
    pub ca_pool: Option<String>,

    #[serde(rename = "http2Origin", skip_serializing_if = "std::ops::Not::not", default)]
    pub http2_origin: bool,

    #[serde(rename = "matchSNItoHost", skip_serializing_if = "std::ops::Not::not", default)]
    pub match_sni_to_host: bool,
}

impl OriginRequestConfig {
    /// True when no setting is configured; empty configs are omitted from the
    /// rendered document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connect_timeout.is_none()
            && !self.no_tls_verify
            && self.http_host_header.is_none()
            && self.origin_server_name.is_none()
            && self.ca_pool.is_none()
            && !self.http2_origin
            && !self.match_sni_to_host
    }
}

/// A single ingress rule in the config document.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct IngressRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub service: String,

    #[serde(rename = "originRequest", skip_serializing_if = "Option::is_none")]
    pub origin_request: Option<OriginRequestConfig>,
}

impl IngressRule {
    /// True for the terminal rule matching everything.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_none() && self.path.is_none()
    }
}

/// WARP routing stanza.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct WarpRoutingConfig {
    pub enabled: bool,
}

/// The cloudflared configuration file.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct TunnelConfig {
    #[serde(rename = "tunnel")]
    pub tunnel_id: String,

    #[serde(rename = "credentials-file", skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,

    pub ingress: Vec<IngressRule>,

    #[serde(rename = "originRequest", skip_serializing_if = "Option::is_none")]
    pub origin_request: Option<OriginRequestConfig>,

    #[serde(rename = "warp-routing", skip_serializing_if = "Option::is_none")]
    pub warp_routing: Option<WarpRoutingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(rename = "no-autoupdate")]
    pub no_autoupdate: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<String>,
}

impl TunnelConfig {
    /// Build the base configuration for a tunnel, with defaults applied and a
    /// catch-all appended.
    #[must_use]
    pub fn new(tunnel: &CloudflareTunnel, tunnel_id: &str) -> Self {
        let protocol = tunnel
            .spec
            .cloudflared
            .protocol
            .as_deref()
            .filter(|p| *p != "auto")
            .map(ToString::to_string);

        let origin_request = tunnel
            .spec
            .origin_defaults
            .as_ref()
            .map(origin_request_from_defaults)
            .filter(|c| !c.is_empty());

        let fallback = tunnel
            .spec
            .fallback_target
            .clone()
            .unwrap_or_else(|| DEFAULT_FALLBACK_TARGET.to_string());

        Self {
            tunnel_id: tunnel_id.to_string(),
            credentials_file: None,
            ingress: vec![IngressRule {
                hostname: None,
                path: None,
                service: fallback,
                origin_request: None,
            }],
            origin_request,
            warp_routing: None,
            protocol,
            no_autoupdate: true,
            metrics: Some(format!("0.0.0.0:{}", metrics_port(tunnel))),
        }
    }

    /// Insert a rule before the trailing catch-all.
    pub fn add_rule(&mut self, rule: IngressRule) {
        match self.ingress.last() {
            Some(last) if last.is_catch_all() => {
                let index = self.ingress.len() - 1;
                self.ingress.insert(index, rule);
            }
            _ => self.ingress.push(rule),
        }
    }

    /// Replace the trailing catch-all service.
    pub fn set_catch_all(&mut self, service: &str) {
        if self.ingress.last().is_some_and(IngressRule::is_catch_all) {
            self.ingress.pop();
        }
        self.ingress.push(IngressRule {
            hostname: None,
            path: None,
            service: service.to_string(),
            origin_request: None,
        });
    }

    /// Validate the document: a tunnel id, at least one rule, a catch-all
    /// last, and a service on every rule.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.tunnel_id.is_empty() {
            bail!("tunnel id is required");
        }
        if self.ingress.is_empty() {
            bail!("at least one ingress rule is required");
        }
        if let Some(last) = self.ingress.last() {
            if !last.is_catch_all() {
                bail!("last ingress rule must be a catch-all (no hostname or path)");
            }
        }
        for (index, rule) in self.ingress.iter().enumerate() {
            if rule.service.is_empty() {
                bail!("ingress rule {index}: service is required");
            }
        }
        Ok(())
    }

    /// Render the document as YAML.
    ///
    /// # Errors
    ///
    /// Returns serialization errors.
    pub fn render(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Metrics port for a tunnel, defaulted.
#[must_use]
pub fn metrics_port(tunnel: &CloudflareTunnel) -> i32 {
    tunnel
        .spec
        .cloudflared
        .metrics
        .as_ref()
        .and_then(|m| m.port)
        .unwrap_or(DEFAULT_CLOUDFLARED_METRICS_PORT)
}

fn origin_request_from_defaults(defaults: &OriginDefaults) -> OriginRequestConfig {
    OriginRequestConfig {
        connect_timeout: defaults.connect_timeout.clone(),
        no_tls_verify: defaults.no_tls_verify.unwrap_or(false),
        http_host_header: defaults.http_host_header.clone(),
        origin_server_name: defaults.origin_server_name.clone(),
        ca_pool: defaults.ca_pool.clone(),
        http2_origin: defaults.http2_origin.unwrap_or(false),
        match_sni_to_host: false,
    }
}

/// Assemble per-rule origin settings from tunnel defaults overridden by route
/// annotations. Returns `None` when nothing is configured so the rendered rule
/// stays minimal.
#[must_use]
pub fn build_origin_config(
    defaults: Option<&OriginDefaults>,
    annotations: &BTreeMap<String, String>,
) -> Option<OriginRequestConfig> {
    let mut config = defaults
        .map(origin_request_from_defaults)
        .unwrap_or_default();

    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_CONNECT_TIMEOUT) {
        config.connect_timeout = Some(value.clone());
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_NO_TLS_VERIFY) {
        config.no_tls_verify = value.eq_ignore_ascii_case("true");
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_SSL_VERIFY) {
        if value.eq_ignore_ascii_case("true") {
            config.no_tls_verify = false;
        }
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_HTTP_HOST_HEADER) {
        config.http_host_header = Some(value.clone());
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_SERVER_NAME) {
        config.origin_server_name = Some(value.clone());
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_CA_POOL) {
        config.ca_pool = Some(value.clone());
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_HTTP2) {
        if value.eq_ignore_ascii_case("true") {
            config.http2_origin = true;
        }
    }
    if let Some(value) = annotations.get(labels::ANNOTATION_ORIGIN_MATCH_SNI_TO_HOST) {
        if value.eq_ignore_ascii_case("true") {
            config.match_sni_to_host = true;
        }
    }

    if config.is_empty() {
        None
    } else {
        Some(config)
    }
}

#[cfg(test)]
#[path = "cloudflared_tests.rs"]
mod cloudflared_tests;
