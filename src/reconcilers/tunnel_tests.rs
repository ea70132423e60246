// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `tunnel.rs`

use super::*;
use crate::crd::{CloudflareDetails, CloudflareTunnelSpec, OriginDefaults, SecretReference};
use k8s_gateway_api::{
    BackendObjectReference, BackendRef, CommonRouteSpec, HttpBackendRef, HttpPathMatch,
    HttpRouteMatch, HttpRouteRule, HttpRouteSpec,
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn make_tunnel(annotations: BTreeMap<String, String>) -> CloudflareTunnel {
    CloudflareTunnel {
        metadata: ObjectMeta {
            name: Some("edge".to_string()),
            namespace: Some("infra".to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: CloudflareTunnelSpec {
            cloudflare: CloudflareDetails {
                account_id: Some("acc".to_string()),
                secret_ref: SecretReference {
                    name: "creds".to_string(),
                    namespace: None,
                },
                ..Default::default()
            },
            origin_defaults: Some(OriginDefaults {
                connect_timeout: Some("30s".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        status: None,
    }
}

fn make_gateway(name: &str, annotations: BTreeMap<String, String>) -> Gateway {
    Gateway {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: k8s_gateway_api::GatewaySpec {
            gateway_class_name: "cfgate".to_string(),
            listeners: vec![],
            addresses: None,
        },
        status: None,
    }
}

fn bound_gateway(name: &str) -> Gateway {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        crate::labels::ANNOTATION_TUNNEL_REF.to_string(),
        "infra/edge".to_string(),
    );
    make_gateway(name, annotations)
}

fn make_route(name: &str, gateway: &str, hostnames: Vec<String>) -> HttpRoute {
    HttpRoute {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: HttpRouteSpec {
            inner: CommonRouteSpec {
                parent_refs: Some(vec![k8s_gateway_api::ParentReference {
                    group: None,
                    kind: None,
                    namespace: Some("default".to_string()),
                    name: gateway.to_string(),
                    section_name: None,
                    port: None,
                }]),
            },
            hostnames: Some(hostnames),
            rules: Some(vec![HttpRouteRule {
                matches: Some(vec![HttpRouteMatch {
                    path: Some(HttpPathMatch::PathPrefix {
                        value: "/api".to_string(),
                    }),
                    headers: None,
                    query_params: None,
                    method: None,
                }]),
                filters: None,
                backend_refs: Some(vec![HttpBackendRef {
                    backend_ref: Some(BackendRef {
                        weight: None,
                        inner: BackendObjectReference {
                            group: None,
                            kind: None,
                            name: "app".to_string(),
                            namespace: None,
                            port: Some(8080),
                        },
                    }),
                    filters: None,
                }]),
                timeouts: None,
            }]),
        },
        status: None,
    }
}

#[test]
fn test_deletion_policy_default_is_delete() {
    let tunnel = make_tunnel(BTreeMap::new());
    assert_eq!(deletion_policy(&tunnel), DeletionPolicy::Delete);
}

#[test]
fn test_deletion_policy_orphan() {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        ANNOTATION_DELETION_POLICY.to_string(),
        "orphan".to_string(),
    );
    let tunnel = make_tunnel(annotations);
    assert_eq!(deletion_policy(&tunnel), DeletionPolicy::Orphan);
}

#[test]
fn test_deletion_policy_unknown_value_is_delete() {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        ANNOTATION_DELETION_POLICY.to_string(),
        "keep".to_string(),
    );
    let tunnel = make_tunnel(annotations);
    assert_eq!(deletion_policy(&tunnel), DeletionPolicy::Delete);
}

#[test]
fn test_ingress_rules_for_bound_routes() {
    let tunnel = make_tunnel(BTreeMap::new());
    let gateways = vec![bound_gateway("gw")];
    let routes = vec![make_route(
        "app",
        "gw",
        vec!["app.example.com".to_string()],
    )];

    let (rules, route_count) = ingress_rules_for_routes(&tunnel, &gateways, &routes);
    assert_eq!(route_count, 1);
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].hostname.as_deref(), Some("app.example.com"));
    assert_eq!(rules[0].path.as_deref(), Some("/api"));
    assert_eq!(
        rules[0].service,
        "http://app.default.svc.cluster.local:8080"
    );
    // Tunnel-level origin defaults flow into the rule.
    assert_eq!(
        rules[0]
            .origin_request
            .as_ref()
            .unwrap()
            .connect_timeout
            .as_deref(),
        Some("30s")
    );
}

#[test]
fn test_ingress_rules_fan_out_per_hostname() {
    let tunnel = make_tunnel(BTreeMap::new());
    let gateways = vec![bound_gateway("gw")];
    let routes = vec![make_route(
        "app",
        "gw",
        vec!["a.example.com".to_string(), "b.example.com".to_string()],
    )];

    let (rules, route_count) = ingress_rules_for_routes(&tunnel, &gateways, &routes);
    assert_eq!(route_count, 1);
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1].hostname.as_deref(), Some("b.example.com"));
}

#[test]
fn test_ingress_rules_skip_unbound_routes() {
    let tunnel = make_tunnel(BTreeMap::new());
    // Gateway exists but is not annotated for this tunnel.
    let gateways = vec![make_gateway("gw", BTreeMap::new())];
    let routes = vec![make_route(
        "app",
        "gw",
        vec!["app.example.com".to_string()],
    )];

    let (rules, route_count) = ingress_rules_for_routes(&tunnel, &gateways, &routes);
    assert_eq!(route_count, 0);
    assert!(rules.is_empty());
}

#[test]
fn test_ingress_rules_skip_routes_on_other_gateways() {
    let tunnel = make_tunnel(BTreeMap::new());
    let gateways = vec![bound_gateway("gw")];
    let routes = vec![make_route(
        "app",
        "some-other-gw",
        vec!["app.example.com".to_string()],
    )];

    let (_, route_count) = ingress_rules_for_routes(&tunnel, &gateways, &routes);
    assert_eq!(route_count, 0);
}

#[test]
fn test_tunnel_is_ready() {
    assert!(!tunnel_is_ready(None));

    let mut status = CloudflareTunnelStatus::default();
    assert!(!tunnel_is_ready(Some(&status)));

    status.conditions.push(create_condition(
        "Ready",
        "True",
        "Reconciled",
        "2 cloudflared replicas ready",
    ));
    assert!(tunnel_is_ready(Some(&status)));
}
