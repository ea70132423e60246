// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

use super::*;

#[test]
fn test_tunnel_spec_defaults() {
    // A minimal manifest must deserialize with all optional stanzas defaulted.
    let spec: CloudflareTunnelSpec = serde_json::from_value(serde_json::json!({
        "cloudflare": {
            "accountId": "0123456789abcdef",
            "secretRef": { "name": "cloudflare-credentials" }
        }
    }))
    .unwrap();

    assert_eq!(
        spec.cloudflare.account_id.as_deref(),
        Some("0123456789abcdef")
    );
    assert_eq!(spec.cloudflare.secret_ref.name, "cloudflare-credentials");
    assert!(spec.cloudflare.secret_keys.api_token.is_none());
    assert!(spec.cloudflared.replicas.is_none());
    assert!(spec.origin_defaults.is_none());
    assert!(spec.dns.is_none());
}

#[test]
fn test_tunnel_spec_round_trip() {
    let spec = CloudflareTunnelSpec {
        cloudflare: CloudflareDetails {
            account_id: Some("acc".to_string()),
            account_name: None,
            secret_ref: SecretReference {
                name: "creds".to_string(),
                namespace: Some("infra".to_string()),
            },
            secret_keys: SecretKeys {
                api_token: Some("TOKEN".to_string()),
            },
        },
        cloudflared: CloudflaredConfig {
            replicas: Some(3),
            protocol: Some("quic".to_string()),
            ..Default::default()
        },
        fallback_target: Some("http_status:503".to_string()),
        ..Default::default()
    };

    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["cloudflare"]["secretKeys"]["apiToken"], "TOKEN");
    assert_eq!(json["cloudflared"]["replicas"], 3);
    assert_eq!(json["fallbackTarget"], "http_status:503");

    let back: CloudflareTunnelSpec = serde_json::from_value(json).unwrap();
    assert_eq!(back.cloudflared.replicas, Some(3));
    assert_eq!(back.cloudflared.protocol.as_deref(), Some("quic"));
}

#[test]
fn test_dns_sync_spec_defaults() {
    let spec: CloudflareDNSSyncSpec = serde_json::from_value(serde_json::json!({
        "tunnelRef": { "name": "edge" },
        "zones": [{ "name": "example.com" }]
    }))
    .unwrap();

    assert_eq!(spec.tunnel_ref.name, "edge");
    assert!(spec.tunnel_ref.namespace.is_none());
    // Gateway route collection defaults on.
    assert!(spec.source.gateway_routes.enabled);
    assert!(spec.source.explicit.is_empty());
    // Records proxied by default, TXT ownership on, cleanup fully enabled.
    assert!(spec.defaults.proxied);
    assert!(spec.ownership.txt_record.enabled);
    assert!(!spec.ownership.comment.enabled);
    assert!(spec.cleanup_policy.delete_on_route_removal);
    assert!(spec.cleanup_policy.delete_on_resource_removal);
    assert!(spec.cleanup_policy.only_managed);
    assert!(spec.fallback_credentials_ref.is_none());
}

#[test]
fn test_dns_sync_explicit_hostnames() {
    let spec: CloudflareDNSSyncSpec = serde_json::from_value(serde_json::json!({
        "tunnelRef": { "name": "edge" },
        "source": {
            "gatewayRoutes": { "enabled": false },
            "explicit": [
                { "hostname": "static.example.com", "target": "{{ .TunnelDomain }}", "proxied": false }
            ]
        }
    }))
    .unwrap();

    assert!(!spec.source.gateway_routes.enabled);
    assert_eq!(spec.source.explicit.len(), 1);
    assert_eq!(spec.source.explicit[0].hostname, "static.example.com");
    assert_eq!(spec.source.explicit[0].target, "{{ .TunnelDomain }}");
    assert_eq!(spec.source.explicit[0].proxied, Some(false));
}

#[test]
fn test_access_policy_spec_target_refs() {
    let spec: CloudflareAccessPolicySpec = serde_json::from_value(serde_json::json!({
        "targetRefs": [
            { "group": "gateway.networking.k8s.io", "kind": "HTTPRoute", "name": "a" },
            { "group": "gateway.networking.k8s.io", "kind": "HTTPRoute", "name": "b", "namespace": "other" }
        ],
        "application": { "domain": "app.example.com" },
        "policies": [
            {
                "name": "engineers",
                "decision": "allow",
                "include": [ { "emailDomain": { "domain": "example.com" } } ]
            }
        ]
    }))
    .unwrap();

    assert!(spec.target_ref.is_none());
    assert_eq!(spec.target_refs.len(), 2);
    assert_eq!(spec.target_refs[1].namespace.as_deref(), Some("other"));
    assert_eq!(spec.application.domain.as_deref(), Some("app.example.com"));
    assert_eq!(spec.policies.len(), 1);
    assert!(spec.policies[0].include[0].has_variant());
}

#[test]
fn test_access_rule_has_variant() {
    let empty = AccessRule::default();
    assert!(!empty.has_variant());

    let everyone = AccessRule {
        everyone: Some(true),
        ..Default::default()
    };
    assert!(everyone.has_variant());

    let saml = AccessRule {
        saml: Some(SamlRule {
            identity_provider_id: "idp".to_string(),
            attribute_name: "role".to_string(),
            attribute_value: "admin".to_string(),
        }),
        ..Default::default()
    };
    assert!(saml.has_variant());
}

#[test]
fn test_record_status_serialization() {
    let status = DnsRecordStatus {
        hostname: "app.example.com".to_string(),
        r#type: "CNAME".to_string(),
        target: "abc123.cfargotunnel.com".to_string(),
        proxied: true,
        status: "Synced".to_string(),
        record_id: Some("rec1".to_string()),
        error: None,
    };

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["hostname"], "app.example.com");
    assert_eq!(json["type"], "CNAME");
    assert_eq!(json["recordId"], "rec1");
    assert!(json.get("error").is_none());
}

#[test]
fn test_condition_camel_case() {
    let condition = Condition {
        r#type: "Ready".to_string(),
        status: "True".to_string(),
        reason: Some("Reconciled".to_string()),
        message: Some("tunnel operational".to_string()),
        last_transition_time: Some("2025-06-01T00:00:00Z".to_string()),
    };

    let json = serde_json::to_value(&condition).unwrap();
    assert_eq!(json["type"], "Ready");
    assert!(json.get("lastTransitionTime").is_some());
}

#[test]
fn test_service_token_config() {
    let spec: ServiceTokenConfig = serde_json::from_value(serde_json::json!({
        "name": "ci",
        "duration": "90d",
        "secretRef": { "name": "ci-token" }
    }))
    .unwrap();

    assert_eq!(spec.name, "ci");
    assert_eq!(spec.duration.as_deref(), Some("90d"));
    assert_eq!(spec.secret_ref.name, "ci-token");
}
