// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `dns_sync.rs`

use super::*;
use crate::crd::{
    CloudflareDNSSyncSpec, CloudflareTunnelSpec, CommentOwnership, ExplicitHostname,
    GatewayRoutesSource, HostnameSource, OwnershipConfig, TunnelRef, TxtRecordOwnership,
};
use k8s_gateway_api::{CommonRouteSpec, GatewaySpec, HttpRouteSpec, ParentReference};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn make_sync(spec: CloudflareDNSSyncSpec) -> CloudflareDNSSync {
    CloudflareDNSSync {
        metadata: ObjectMeta {
            name: Some("sync".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn default_sync_spec() -> CloudflareDNSSyncSpec {
    CloudflareDNSSyncSpec {
        tunnel_ref: TunnelRef {
            name: "edge".to_string(),
            namespace: Some("infra".to_string()),
        },
        ..Default::default()
    }
}

fn make_tunnel() -> CloudflareTunnel {
    CloudflareTunnel {
        metadata: ObjectMeta {
            name: Some("edge".to_string()),
            namespace: Some("infra".to_string()),
            ..Default::default()
        },
        spec: CloudflareTunnelSpec::default(),
        status: None,
    }
}

fn make_gateway(name: &str, dns_sync: bool) -> Gateway {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        crate::labels::ANNOTATION_TUNNEL_REF.to_string(),
        "infra/edge".to_string(),
    );
    if dns_sync {
        annotations.insert(
            crate::labels::ANNOTATION_DNS_SYNC.to_string(),
            "enabled".to_string(),
        );
    }

    Gateway {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: GatewaySpec {
            gateway_class_name: "cfgate".to_string(),
            listeners: vec![],
            addresses: None,
        },
        status: None,
    }
}

fn make_route(
    name: &str,
    gateway: &str,
    hostnames: Vec<&str>,
    annotations: BTreeMap<String, String>,
) -> HttpRoute {
    HttpRoute {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: HttpRouteSpec {
            inner: CommonRouteSpec {
                parent_refs: Some(vec![ParentReference {
                    group: None,
                    kind: None,
                    namespace: Some("default".to_string()),
                    name: gateway.to_string(),
                    section_name: None,
                    port: None,
                }]),
            },
            hostnames: Some(hostnames.into_iter().map(String::from).collect()),
            rules: None,
        },
        status: None,
    }
}

#[test]
fn test_render_target_template() {
    assert_eq!(
        render_target_template("{{ .TunnelDomain }}", "abc.cfargotunnel.com"),
        "abc.cfargotunnel.com"
    );
    assert_eq!(
        render_target_template("{{.TunnelDomain}}", "abc.cfargotunnel.com"),
        "abc.cfargotunnel.com"
    );
    assert_eq!(
        render_target_template("static.example.net", "abc.cfargotunnel.com"),
        "static.example.net"
    );
}

#[test]
fn test_parse_ttl() {
    assert_eq!(parse_ttl(None), 1);
    assert_eq!(parse_ttl(Some("auto")), 1);
    assert_eq!(parse_ttl(Some("Auto")), 1);
    assert_eq!(parse_ttl(Some("300")), 300);
    assert_eq!(parse_ttl(Some("garbage")), 1);
}

#[test]
fn test_record_comment_default() {
    let sync = make_sync(default_sync_spec());
    assert_eq!(
        record_comment(&sync, "edge"),
        "managed by cfgate, tunnel=edge"
    );
}

#[test]
fn test_record_comment_template() {
    let mut spec = default_sync_spec();
    spec.ownership = OwnershipConfig {
        comment: CommentOwnership {
            enabled: true,
            template: Some("managed by cfgate, tunnel={{ .TunnelName }}, env=prod".to_string()),
        },
        ..Default::default()
    };
    let sync = make_sync(spec);
    assert_eq!(
        record_comment(&sync, "edge"),
        "managed by cfgate, tunnel=edge, env=prod"
    );
}

#[test]
fn test_ownership_prefix_default_and_override() {
    let sync = make_sync(default_sync_spec());
    assert_eq!(ownership_prefix(&sync), "_cfgate");

    let mut spec = default_sync_spec();
    spec.ownership = OwnershipConfig {
        txt_record: TxtRecordOwnership {
            enabled: true,
            prefix: Some("_owner".to_string()),
        },
        ..Default::default()
    };
    assert_eq!(ownership_prefix(&make_sync(spec)), "_owner");
}

#[test]
fn test_desired_records_from_explicit() {
    let mut spec = default_sync_spec();
    spec.source = HostnameSource {
        gateway_routes: GatewayRoutesSource {
            enabled: false,
            annotation_filter: None,
        },
        explicit: vec![ExplicitHostname {
            hostname: "static.example.com".to_string(),
            target: "{{ .TunnelDomain }}".to_string(),
            proxied: Some(false),
            ttl: Some("120".to_string()),
        }],
    };
    let sync = make_sync(spec);

    let records = desired_records(&sync, &make_tunnel(), "abc.cfargotunnel.com", &[], &[]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hostname, "static.example.com");
    assert_eq!(records[0].target, "abc.cfargotunnel.com");
    assert!(!records[0].proxied);
    assert_eq!(records[0].ttl, 120);
}

#[test]
fn test_desired_records_from_routes() {
    let sync = make_sync(default_sync_spec());
    let gateways = vec![make_gateway("gw", true)];
    let routes = vec![make_route(
        "app",
        "gw",
        vec!["app.example.com"],
        BTreeMap::new(),
    )];

    let records = desired_records(
        &sync,
        &make_tunnel(),
        "abc.cfargotunnel.com",
        &gateways,
        &routes,
    );
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hostname, "app.example.com");
    assert_eq!(records[0].target, "abc.cfargotunnel.com");
    // Record defaults: proxied, auto TTL.
    assert!(records[0].proxied);
    assert_eq!(records[0].ttl, 1);
}

#[test]
fn test_desired_records_requires_dns_sync_annotation() {
    let sync = make_sync(default_sync_spec());
    // Gateway bound to the tunnel but without dns-sync=enabled.
    let gateways = vec![make_gateway("gw", false)];
    let routes = vec![make_route(
        "app",
        "gw",
        vec!["app.example.com"],
        BTreeMap::new(),
    )];

    let records = desired_records(
        &sync,
        &make_tunnel(),
        "abc.cfargotunnel.com",
        &gateways,
        &routes,
    );
    assert!(records.is_empty());
}

#[test]
fn test_desired_records_annotation_filter() {
    let mut spec = default_sync_spec();
    spec.source.gateway_routes.annotation_filter = Some("cfgate.io/sync-me".to_string());
    let sync = make_sync(spec);

    let gateways = vec![make_gateway("gw", true)];
    let mut matching = BTreeMap::new();
    matching.insert("cfgate.io/sync-me".to_string(), "yes".to_string());

    let routes = vec![
        make_route("app", "gw", vec!["app.example.com"], matching),
        make_route("other", "gw", vec!["other.example.com"], BTreeMap::new()),
    ];

    let records = desired_records(
        &sync,
        &make_tunnel(),
        "abc.cfargotunnel.com",
        &gateways,
        &routes,
    );
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hostname, "app.example.com");
}

#[test]
fn test_desired_records_dedupes_preserving_order() {
    let mut spec = default_sync_spec();
    spec.source.explicit = vec![ExplicitHostname {
        hostname: "app.example.com".to_string(),
        target: "custom.example.net".to_string(),
        proxied: None,
        ttl: None,
    }];
    let sync = make_sync(spec);

    let gateways = vec![make_gateway("gw", true)];
    let routes = vec![make_route(
        "app",
        "gw",
        vec!["app.example.com", "api.example.com"],
        BTreeMap::new(),
    )];

    let records = desired_records(
        &sync,
        &make_tunnel(),
        "abc.cfargotunnel.com",
        &gateways,
        &routes,
    );
    // The explicit entry wins for the duplicated hostname.
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].hostname, "app.example.com");
    assert_eq!(records[0].target, "custom.example.net");
    assert_eq!(records[1].hostname, "api.example.com");
}

#[test]
fn test_orphaned_records() {
    let previous = vec![
        DnsRecordStatus {
            hostname: "keep.example.com".to_string(),
            r#type: "CNAME".to_string(),
            record_id: Some("rec-1".to_string()),
            status: "Synced".to_string(),
            ..Default::default()
        },
        DnsRecordStatus {
            hostname: "gone.example.com".to_string(),
            r#type: "CNAME".to_string(),
            record_id: Some("rec-2".to_string()),
            status: "Synced".to_string(),
            ..Default::default()
        },
        DnsRecordStatus {
            hostname: "never-synced.example.com".to_string(),
            r#type: "CNAME".to_string(),
            record_id: None,
            status: "Failed".to_string(),
            ..Default::default()
        },
    ];

    let desired: HashSet<&str> = ["keep.example.com"].into_iter().collect();
    let orphans = orphaned_records(&previous, &desired);

    // Entries without a record id were never created and are not orphans.
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].hostname, "gone.example.com");
}

#[test]
fn test_dns_status_equal_ignores_last_sync_time() {
    let mut a = CloudflareDNSSyncStatus {
        synced_records: 2,
        last_sync_time: Some("2025-01-01T00:00:00Z".to_string()),
        ..Default::default()
    };
    let mut b = CloudflareDNSSyncStatus {
        synced_records: 2,
        last_sync_time: Some("2025-06-01T00:00:00Z".to_string()),
        ..Default::default()
    };
    assert!(dns_status_equal(&a, &b));

    b.failed_records = 1;
    assert!(!dns_status_equal(&a, &b));

    b.failed_records = 0;
    a.records.push(DnsRecordStatus {
        hostname: "app.example.com".to_string(),
        r#type: "CNAME".to_string(),
        status: "Synced".to_string(),
        ..Default::default()
    });
    assert!(!dns_status_equal(&a, &b));
}
