// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cloudflared.rs`

use super::*;
use crate::crd::{
    CloudflareDetails, CloudflareTunnel, CloudflareTunnelSpec, CloudflaredConfig,
    CloudflaredMetrics, SecretReference,
};
use kube::api::ObjectMeta;

fn make_tunnel(spec: CloudflareTunnelSpec) -> CloudflareTunnel {
    CloudflareTunnel {
        metadata: ObjectMeta {
            name: Some("edge".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn minimal_spec() -> CloudflareTunnelSpec {
    CloudflareTunnelSpec {
        cloudflare: CloudflareDetails {
            account_id: Some("acc".to_string()),
            secret_ref: SecretReference {
                name: "creds".to_string(),
                namespace: None,
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_new_config_has_catch_all() {
    let tunnel = make_tunnel(minimal_spec());
    let config = TunnelConfig::new(&tunnel, "abc123");

    assert_eq!(config.tunnel_id, "abc123");
    assert!(config.no_autoupdate);
    assert_eq!(config.metrics.as_deref(), Some("0.0.0.0:2000"));
    assert_eq!(config.ingress.len(), 1);
    assert!(config.ingress[0].is_catch_all());
    assert_eq!(config.ingress[0].service, "http_status:404");
    config.validate().unwrap();
}

#[test]
fn test_custom_fallback_and_metrics_port() {
    let mut spec = minimal_spec();
    spec.fallback_target = Some("http_status:503".to_string());
    spec.cloudflared = CloudflaredConfig {
        metrics: Some(CloudflaredMetrics { port: Some(9100) }),
        ..Default::default()
    };
    let tunnel = make_tunnel(spec);

    let config = TunnelConfig::new(&tunnel, "abc123");
    assert_eq!(config.ingress[0].service, "http_status:503");
    assert_eq!(config.metrics.as_deref(), Some("0.0.0.0:9100"));
}

#[test]
fn test_protocol_auto_is_omitted() {
    let mut spec = minimal_spec();
    spec.cloudflared.protocol = Some("auto".to_string());
    let config = TunnelConfig::new(&make_tunnel(spec), "abc123");
    assert!(config.protocol.is_none());

    let mut spec = minimal_spec();
    spec.cloudflared.protocol = Some("quic".to_string());
    let config = TunnelConfig::new(&make_tunnel(spec), "abc123");
    assert_eq!(config.protocol.as_deref(), Some("quic"));
}

#[test]
fn test_add_rule_keeps_catch_all_last() {
    let tunnel = make_tunnel(minimal_spec());
    let mut config = TunnelConfig::new(&tunnel, "abc123");

    config.add_rule(IngressRule {
        hostname: Some("app.example.com".to_string()),
        path: None,
        service: "http://app.default.svc.cluster.local:80".to_string(),
        origin_request: None,
    });
    config.add_rule(IngressRule {
        hostname: Some("api.example.com".to_string()),
        path: Some("/v1".to_string()),
        service: "http://api.default.svc.cluster.local:8080".to_string(),
        origin_request: None,
    });

    assert_eq!(config.ingress.len(), 3);
    assert_eq!(
        config.ingress[0].hostname.as_deref(),
        Some("app.example.com")
    );
    assert!(config.ingress[2].is_catch_all());
    config.validate().unwrap();
}

#[test]
fn test_set_catch_all_replaces_existing() {
    let tunnel = make_tunnel(minimal_spec());
    let mut config = TunnelConfig::new(&tunnel, "abc123");

    config.set_catch_all("http_status:418");
    assert_eq!(config.ingress.len(), 1);
    assert_eq!(config.ingress[0].service, "http_status:418");
}

#[test]
fn test_validate_rejects_missing_catch_all() {
    let config = TunnelConfig {
        tunnel_id: "abc123".to_string(),
        ingress: vec![IngressRule {
            hostname: Some("app.example.com".to_string()),
            path: None,
            service: "http://app:80".to_string(),
            origin_request: None,
        }],
        no_autoupdate: true,
        ..Default::default()
    };

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("catch-all"));
}

#[test]
fn test_validate_rejects_empty_tunnel_id() {
    let config = TunnelConfig {
        ingress: vec![IngressRule {
            service: "http_status:404".to_string(),
            ..Default::default()
        }],
        no_autoupdate: true,
        ..Default::default()
    };

    assert!(config.validate().is_err());
}

#[test]
fn test_render_yaml_shape() {
    let tunnel = make_tunnel(minimal_spec());
    let mut config = TunnelConfig::new(&tunnel, "abc123");
    config.add_rule(IngressRule {
        hostname: Some("app.example.com".to_string()),
        path: None,
        service: "http://app:80".to_string(),
        origin_request: Some(OriginRequestConfig {
            no_tls_verify: true,
            ..Default::default()
        }),
    });

    let yaml = config.render().unwrap();
    assert!(yaml.contains("tunnel: abc123"));
    assert!(yaml.contains("no-autoupdate: true"));
    assert!(yaml.contains("hostname: app.example.com"));
    assert!(yaml.contains("noTLSVerify: true"));
    // The catch-all renders without a hostname key.
    assert!(yaml.contains("service: http_status:404"));

    let parsed: TunnelConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_build_origin_config_annotation_overrides() {
    let defaults = crate::crd::OriginDefaults {
        connect_timeout: Some("30s".to_string()),
        no_tls_verify: Some(false),
        ..Default::default()
    };

    let mut annotations = BTreeMap::new();
    annotations.insert(
        labels::ANNOTATION_ORIGIN_CONNECT_TIMEOUT.to_string(),
        "10s".to_string(),
    );
    annotations.insert(
        labels::ANNOTATION_ORIGIN_NO_TLS_VERIFY.to_string(),
        "true".to_string(),
    );
    annotations.insert(
        labels::ANNOTATION_ORIGIN_HTTP_HOST_HEADER.to_string(),
        "internal.example.com".to_string(),
    );

    let config = build_origin_config(Some(&defaults), &annotations).unwrap();
    assert_eq!(config.connect_timeout.as_deref(), Some("10s"));
    assert!(config.no_tls_verify);
    assert_eq!(
        config.http_host_header.as_deref(),
        Some("internal.example.com")
    );
}

#[test]
fn test_build_origin_config_ssl_verify_wins() {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        labels::ANNOTATION_ORIGIN_NO_TLS_VERIFY.to_string(),
        "true".to_string(),
    );
    annotations.insert(
        labels::ANNOTATION_ORIGIN_SSL_VERIFY.to_string(),
        "true".to_string(),
    );
    annotations.insert(
        labels::ANNOTATION_ORIGIN_HTTP2.to_string(),
        "true".to_string(),
    );

    let config = build_origin_config(None, &annotations).unwrap();
    assert!(!config.no_tls_verify);
    assert!(config.http2_origin);
}

#[test]
fn test_build_origin_config_empty_returns_none() {
    let annotations = BTreeMap::new();
    assert!(build_origin_config(None, &annotations).is_none());
}
