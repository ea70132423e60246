// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CloudflareDNSSync reconciliation logic.
//!
//! For each `(DNSSync, tunnel)` pair this module computes the desired hostname
//! set (explicit entries plus Gateway API routes), resolves zones, and
//! converges every hostname to a CNAME pointing at the tunnel domain. The
//! ownership protocol is absolute: records without the cfgate marker are
//! surfaced in status but never modified or deleted.
//!
//! Orphan handling works off the previous status: hostnames that were synced
//! before but are no longer desired get their records deleted (after an
//! ownership check). External records that never appeared in status are left
//! for the deletion path, which sweeps by ownership marker.

use crate::cloudflare::dns::{
    build_cname_record, extract_zone_from_hostname, is_owned_by_cfgate, ownership_comment,
    DnsService,
};
use crate::constants::{AUTO_TTL, DEFAULT_OWNERSHIP_PREFIX, KIND_DNS_SYNC};
use crate::context::{gateway_bound_to_tunnel, gateway_dns_sync_enabled, route_references_gateway, Context};
use crate::crd::{
    CloudflareDNSSync, CloudflareDNSSyncStatus, CloudflareTunnel, DnsRecordStatus,
};
use crate::labels::FINALIZER_DNS_SYNC;
use crate::metrics;
use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::reconcilers::status::{conditions_equal, create_condition, set_condition};
use anyhow::{Context as _, Result};
use chrono::Utc;
use k8s_gateway_api::{Gateway, HttpRoute};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A hostname the sync wants to exist, with its resolved record settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredRecord {
    pub hostname: String,
    pub target: String,
    pub proxied: bool,
    pub ttl: u32,
}

/// Reconcile a `CloudflareDNSSync` resource.
///
/// # Errors
///
/// Transient failures propagate for backoff; terminal states are recorded as
/// conditions and return `Ok` so the regular requeue interval applies.
pub async fn reconcile_dns_sync(ctx: &Context, sync: &CloudflareDNSSync) -> Result<()> {
    let namespace = sync.namespace().unwrap_or_default();
    let name = sync.name_any();

    info!("Reconciling CloudflareDNSSync: {}/{}", namespace, name);

    if is_deleting(sync) {
        return delete_dns_sync(ctx, sync).await;
    }

    if ensure_finalizer(&ctx.client, sync, FINALIZER_DNS_SYNC).await? {
        return Ok(());
    }

    let mut status = sync.status.clone().unwrap_or_default();

    // Resolve the referenced tunnel.
    let tunnel = match resolve_tunnel(&ctx.client, sync).await? {
        Some(tunnel) => tunnel,
        None => {
            set_condition(
                &mut status.conditions,
                create_condition(
                    "Ready",
                    "False",
                    "TunnelNotFound",
                    &format!("referenced tunnel {} not found", sync.spec.tunnel_ref.name),
                ),
            );
            update_status(&ctx.client, sync, status).await?;
            return Ok(());
        }
    };

    let tunnel_status = tunnel.status.clone().unwrap_or_default();
    let (Some(_tunnel_id), Some(tunnel_domain)) =
        (tunnel_status.tunnel_id, tunnel_status.tunnel_domain)
    else {
        debug!(tunnel = %tunnel.name_any(), "tunnel has not published its id yet");
        set_condition(
            &mut status.conditions,
            create_condition(
                "Ready",
                "False",
                "TunnelNotReady",
                "referenced tunnel has not published a tunnel id",
            ),
        );
        update_status(&ctx.client, sync, status).await?;
        return Ok(());
    };

    // Collect the desired hostname set.
    let desired = collect_desired_records(ctx, sync, &tunnel, &tunnel_domain).await?;

    // Resolve zones; nothing is synced until every configured zone resolves.
    let (api, _) = ctx.credentials_for_tunnel(&tunnel).await?;
    let dns = DnsService::new(api);

    let zones = match resolve_zones(&dns, sync).await {
        Ok(zones) => {
            set_condition(
                &mut status.conditions,
                create_condition(
                    "ZonesResolved",
                    "True",
                    "ZonesResolved",
                    "all zones resolved successfully",
                ),
            );
            zones
        }
        Err(error) => {
            warn!(%error, "zone resolution failed");
            set_condition(
                &mut status.conditions,
                create_condition("ZonesResolved", "False", "ZoneResolutionFailed", &error.to_string()),
            );
            set_condition(
                &mut status.conditions,
                create_condition("Ready", "False", "ZoneResolutionFailed", "zones unresolved"),
            );
            update_status(&ctx.client, sync, status).await?;
            return Ok(());
        }
    };

    // Converge each hostname.
    let tunnel_name = tunnel.name_any();
    let comment = record_comment(sync, &tunnel_name);
    let prefix = ownership_prefix(sync);

    let mut records = Vec::new();
    let mut synced = 0;
    let mut failed = 0;

    for want in &desired {
        let zone_name = extract_zone_from_hostname(&want.hostname);
        let Some(zone_id) = zones.get(&zone_name) else {
            debug!(hostname = %want.hostname, zone = %zone_name, "zone not configured for hostname");
            records.push(DnsRecordStatus {
                hostname: want.hostname.clone(),
                r#type: "CNAME".to_string(),
                target: String::new(),
                proxied: false,
                status: "Failed".to_string(),
                record_id: None,
                error: Some(format!("zone {zone_name} not configured")),
            });
            failed += 1;
            continue;
        };

        let mut record = build_cname_record(&want.hostname, &want.target, want.proxied, &comment);
        record.ttl = want.ttl;

        match dns.sync_record(zone_id, &record).await {
            Ok((synced_record, modified)) => {
                if modified {
                    info!(hostname = %want.hostname, record_id = %synced_record.id, "DNS record synced");
                    metrics::record_resource_updated(KIND_DNS_SYNC);
                    publish_event(
                        &ctx.client,
                        sync,
                        EventType::Normal,
                        "RecordSynced",
                        &format!("DNS record synced: {}", want.hostname),
                    )
                    .await;
                }

                // Companion TXT ownership record; failures are non-fatal.
                if sync.spec.ownership.txt_record.enabled {
                    if let Err(error) = dns
                        .create_ownership_record(zone_id, &want.hostname, &tunnel_name, &prefix)
                        .await
                    {
                        debug!(hostname = %want.hostname, %error, "ownership record sync issue");
                    }
                }

                records.push(DnsRecordStatus {
                    hostname: want.hostname.clone(),
                    r#type: synced_record.r#type.clone(),
                    target: synced_record.content.clone(),
                    proxied: synced_record.proxied,
                    status: "Synced".to_string(),
                    record_id: Some(synced_record.id.clone()),
                    error: None,
                });
                synced += 1;
            }
            Err(error) => {
                error!(hostname = %want.hostname, %error, "failed to sync DNS record");
                records.push(DnsRecordStatus {
                    hostname: want.hostname.clone(),
                    r#type: "CNAME".to_string(),
                    target: String::new(),
                    proxied: false,
                    status: "Failed".to_string(),
                    record_id: None,
                    error: Some(error.to_string()),
                });
                failed += 1;
            }
        }
    }

    // Delete records that were previously synced but are no longer desired.
    if sync.spec.cleanup_policy.delete_on_route_removal {
        let desired_hostnames: HashSet<&str> =
            desired.iter().map(|d| d.hostname.as_str()).collect();
        let previous = sync
            .status
            .as_ref()
            .map(|s| s.records.as_slice())
            .unwrap_or_default();

        for orphan in orphaned_records(previous, &desired_hostnames) {
            delete_orphan(ctx, sync, &dns, &zones, orphan, &prefix).await;
        }
    }

    // Publish status with drift avoidance: skip the write when only the
    // timestamp would change, to keep secondary watches quiet.
    status.records = records;
    status.synced_records = synced;
    status.pending_records = 0;
    status.failed_records = failed;
    status.observed_generation = sync.metadata.generation;
    status.last_sync_time = Some(Utc::now().to_rfc3339());

    if failed == 0 {
        set_condition(
            &mut status.conditions,
            create_condition("DNSSynced", "True", "RecordsSynced", "DNS records synced successfully"),
        );
        set_condition(
            &mut status.conditions,
            create_condition("Ready", "True", "Reconciled", "DNS sync is operational"),
        );
    } else {
        set_condition(
            &mut status.conditions,
            create_condition(
                "DNSSynced",
                "False",
                "SyncFailed",
                &format!("{failed} records failed to sync"),
            ),
        );
        set_condition(
            &mut status.conditions,
            create_condition("Ready", "False", "SyncFailed", "some records failed to sync"),
        );
    }

    update_status(&ctx.client, sync, status).await?;
    Ok(())
}

/// Delete one orphaned record (and its TXT companion) after re-checking
/// ownership against the live record.
async fn delete_orphan(
    ctx: &Context,
    sync: &CloudflareDNSSync,
    dns: &DnsService,
    zones: &HashMap<String, String>,
    orphan: &DnsRecordStatus,
    prefix: &str,
) {
    let zone_name = extract_zone_from_hostname(&orphan.hostname);
    let Some(zone_id) = zones.get(&zone_name) else {
        return;
    };

    let existing = match dns
        .find_record_by_name(zone_id, &orphan.hostname, &orphan.r#type)
        .await
    {
        Ok(existing) => existing,
        Err(error) => {
            error!(hostname = %orphan.hostname, %error, "failed to look up orphaned record");
            return;
        }
    };

    let Some(existing) = existing else {
        return;
    };

    if !is_owned_by_cfgate(&existing, None) {
        // A foreign record at a previously managed hostname stays untouched.
        return;
    }

    if let Err(error) = dns.delete_record(zone_id, &existing.id).await {
        error!(hostname = %orphan.hostname, %error, "failed to delete orphaned DNS record");
        return;
    }

    info!(hostname = %orphan.hostname, "deleted orphaned DNS record");
    publish_event(
        &ctx.client,
        sync,
        EventType::Normal,
        "RecordDeleted",
        &format!("DNS record deleted: {}", orphan.hostname),
    )
    .await;

    if sync.spec.ownership.txt_record.enabled {
        if let Err(error) = dns
            .delete_ownership_record(zone_id, &orphan.hostname, prefix)
            .await
        {
            error!(hostname = %orphan.hostname, %error, "failed to delete ownership record");
        }
    }
}

/// Handle DNSSync deletion. Cleanup failures never block finalizer removal;
/// progress beats completeness once the resource is going away.
///
/// # Errors
///
/// Only finalizer patch failures propagate.
pub async fn delete_dns_sync(ctx: &Context, sync: &CloudflareDNSSync) -> Result<()> {
    let name = sync.name_any();
    info!("handling DNSSync deletion: {}", name);

    if !has_finalizer(sync, FINALIZER_DNS_SYNC) {
        return Ok(());
    }

    if sync.spec.cleanup_policy.delete_on_resource_removal {
        if let Err(error) = cleanup_records_with_fallback(ctx, sync).await {
            error!(%error, "failed to cleanup DNS records, records may be orphaned");
            publish_event(
                &ctx.client,
                sync,
                EventType::Warning,
                "DNSCleanupFailed",
                &format!("DNS cleanup failed, records may be orphaned: {error}"),
            )
            .await;
        }
    }

    remove_finalizer(&ctx.client, sync, FINALIZER_DNS_SYNC).await?;
    metrics::record_resource_deleted(KIND_DNS_SYNC);
    Ok(())
}

/// Sweep every configured zone for records carrying the ownership marker and
/// delete them, using fallback credentials when the tunnel is already gone.
async fn cleanup_records_with_fallback(ctx: &Context, sync: &CloudflareDNSSync) -> Result<()> {
    let api = client_with_fallback(ctx, sync).await?;
    let dns = DnsService::new(api);

    // The tunnel may already be gone; ownership checks then match any tunnel.
    let tunnel_name = resolve_tunnel(&ctx.client, sync)
        .await
        .ok()
        .flatten()
        .map(|t| t.name_any())
        .unwrap_or_default();

    let prefix = ownership_prefix(sync);

    for zone_config in &sync.spec.zones {
        let zone_id = match &zone_config.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => match dns.resolve_zone(&zone_config.name).await {
                Ok(Some(zone)) => zone.id,
                Ok(None) => {
                    error!(zone = %zone_config.name, "failed to resolve zone for cleanup");
                    continue;
                }
                Err(error) => {
                    error!(zone = %zone_config.name, %error, "failed to resolve zone for cleanup");
                    continue;
                }
            },
        };

        let managed = match dns.list_managed_records(&zone_id, &prefix).await {
            Ok(managed) => managed,
            Err(error) => {
                error!(zone = %zone_config.name, %error, "failed to list managed records");
                continue;
            }
        };

        for record in managed {
            let deletable = is_owned_by_cfgate(&record, Some(&tunnel_name))
                || !sync.spec.cleanup_policy.only_managed;
            if !deletable {
                continue;
            }
            match dns.delete_record(&zone_id, &record.id).await {
                Ok(()) => info!(record = %record.name, "deleted DNS record"),
                Err(error) => error!(record = %record.name, %error, "failed to delete DNS record"),
            }
        }
    }

    Ok(())
}

/// Tunnel credentials first, then `fallbackCredentialsRef`.
async fn client_with_fallback(
    ctx: &Context,
    sync: &CloudflareDNSSync,
) -> Result<Arc<dyn crate::cloudflare::CloudflareApi>> {
    match resolve_tunnel(&ctx.client, sync).await {
        Ok(Some(tunnel)) => match ctx.credentials_for_tunnel(&tunnel).await {
            Ok((api, _)) => return Ok(api),
            Err(error) => debug!(%error, "tunnel credentials unavailable"),
        },
        Ok(None) => debug!("tunnel not found"),
        Err(error) => debug!(%error, "tunnel lookup failed"),
    }

    let Some(fallback) = &sync.spec.fallback_credentials_ref else {
        anyhow::bail!("tunnel credentials unavailable and no fallback configured");
    };

    info!(
        fallback_secret = %fallback.name,
        "using fallback credentials for DNS cleanup"
    );

    let namespace = sync.namespace().unwrap_or_default();
    let secret = ctx.fetch_secret(fallback, &namespace).await?;
    let api = ctx
        .client_from_secret(&secret, crate::constants::DEFAULT_API_TOKEN_KEY)
        .await?;
    Ok(api)
}

/// Fetch the referenced tunnel, defaulting its namespace to the sync's.
async fn resolve_tunnel(
    client: &Client,
    sync: &CloudflareDNSSync,
) -> Result<Option<CloudflareTunnel>> {
    let namespace = sync
        .spec
        .tunnel_ref
        .namespace
        .clone()
        .unwrap_or_else(|| sync.namespace().unwrap_or_default());

    let api: Api<CloudflareTunnel> = Api::namespaced(client.clone(), &namespace);
    api.get_opt(&sync.spec.tunnel_ref.name)
        .await
        .with_context(|| {
            format!(
                "failed to get tunnel {namespace}/{}",
                sync.spec.tunnel_ref.name
            )
        })
}

/// List gateways and routes, then compute the desired record set.
async fn collect_desired_records(
    ctx: &Context,
    sync: &CloudflareDNSSync,
    tunnel: &CloudflareTunnel,
    tunnel_domain: &str,
) -> Result<Vec<DesiredRecord>> {
    let (gateways, routes) = if sync.spec.source.gateway_routes.enabled {
        let gateways = Api::<Gateway>::all(ctx.client.clone())
            .list(&ListParams::default())
            .await?
            .items;
        let routes = Api::<HttpRoute>::all(ctx.client.clone())
            .list(&ListParams::default())
            .await?
            .items;
        (gateways, routes)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(desired_records(sync, tunnel, tunnel_domain, &gateways, &routes))
}

/// Pure hostname derivation: explicit entries first (with their target
/// templates rendered), then route hostnames from gateways bound to the
/// tunnel with DNS sync enabled, deduplicated preserving first-seen order.
#[must_use]
pub fn desired_records(
    sync: &CloudflareDNSSync,
    tunnel: &CloudflareTunnel,
    tunnel_domain: &str,
    gateways: &[Gateway],
    routes: &[HttpRoute],
) -> Vec<DesiredRecord> {
    let mut seen = HashSet::new();
    let mut desired = Vec::new();

    for explicit in &sync.spec.source.explicit {
        if !seen.insert(explicit.hostname.clone()) {
            continue;
        }
        desired.push(DesiredRecord {
            hostname: explicit.hostname.clone(),
            target: render_target_template(&explicit.target, tunnel_domain),
            proxied: explicit.proxied.unwrap_or(sync.spec.defaults.proxied),
            ttl: parse_ttl(explicit.ttl.as_deref().or(sync.spec.defaults.ttl.as_deref())),
        });
    }

    if sync.spec.source.gateway_routes.enabled {
        let tunnel_namespace = tunnel.namespace().unwrap_or_default();
        let tunnel_name = tunnel.name_any();

        let relevant: Vec<&Gateway> = gateways
            .iter()
            .filter(|gw| {
                gateway_bound_to_tunnel(gw, &tunnel_namespace, &tunnel_name)
                    && gateway_dns_sync_enabled(gw)
            })
            .collect();

        for gateway in relevant {
            for route in routes {
                if let Some(filter) = &sync.spec.source.gateway_routes.annotation_filter {
                    if !route.annotations().contains_key(filter) {
                        continue;
                    }
                }
                if !route_references_gateway(route, gateway) {
                    continue;
                }
                for hostname in route.spec.hostnames.iter().flatten() {
                    if !seen.insert(hostname.clone()) {
                        continue;
                    }
                    desired.push(DesiredRecord {
                        hostname: hostname.clone(),
                        target: tunnel_domain.to_string(),
                        proxied: sync.spec.defaults.proxied,
                        ttl: parse_ttl(sync.spec.defaults.ttl.as_deref()),
                    });
                }
            }
        }
    }

    desired
}

/// Resolve every configured zone to an id, using explicit ids when present.
async fn resolve_zones(
    dns: &DnsService,
    sync: &CloudflareDNSSync,
) -> Result<HashMap<String, String>> {
    let mut zones = HashMap::new();

    for zone_config in &sync.spec.zones {
        match &zone_config.id {
            Some(id) if !id.is_empty() => {
                zones.insert(zone_config.name.clone(), id.clone());
            }
            _ => {
                let zone = dns
                    .resolve_zone(&zone_config.name)
                    .await
                    .with_context(|| format!("failed to resolve zone {}", zone_config.name))?
                    .with_context(|| format!("zone {} not found", zone_config.name))?;
                zones.insert(zone_config.name.clone(), zone.id);
            }
        }
    }

    Ok(zones)
}

/// Records present in the previous status but absent from the desired set.
#[must_use]
pub fn orphaned_records<'a>(
    previous: &'a [DnsRecordStatus],
    desired_hostnames: &HashSet<&str>,
) -> Vec<&'a DnsRecordStatus> {
    previous
        .iter()
        .filter(|record| {
            record.record_id.is_some() && !desired_hostnames.contains(record.hostname.as_str())
        })
        .collect()
}

/// Expand `{{ .TunnelDomain }}` in an explicit hostname target.
#[must_use]
pub fn render_target_template(template: &str, tunnel_domain: &str) -> String {
    template
        .replace("{{ .TunnelDomain }}", tunnel_domain)
        .replace("{{.TunnelDomain}}", tunnel_domain)
}

/// Parse a TTL spec: `auto` (or unset, or garbage) means Cloudflare-automatic.
#[must_use]
pub fn parse_ttl(ttl: Option<&str>) -> u32 {
    match ttl {
        None => AUTO_TTL,
        Some(value) if value.eq_ignore_ascii_case("auto") => AUTO_TTL,
        Some(value) => value.parse().unwrap_or(AUTO_TTL),
    }
}

/// The ownership comment for records of this sync, honoring the comment
/// template when enabled.
#[must_use]
pub fn record_comment(sync: &CloudflareDNSSync, tunnel_name: &str) -> String {
    if sync.spec.ownership.comment.enabled {
        if let Some(template) = &sync.spec.ownership.comment.template {
            return template
                .replace("{{ .TunnelName }}", tunnel_name)
                .replace("{{.TunnelName}}", tunnel_name);
        }
    }
    ownership_comment(tunnel_name)
}

/// The TXT ownership prefix, defaulted.
#[must_use]
pub fn ownership_prefix(sync: &CloudflareDNSSync) -> String {
    sync.spec
        .ownership
        .txt_record
        .prefix
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_OWNERSHIP_PREFIX.to_string())
}

/// Status equality ignoring `lastSyncTime` and condition transition times.
/// Skipping timestamp-only writes breaks the feedback loop where every
/// reconciliation would re-enqueue through secondary watches.
#[must_use]
pub fn dns_status_equal(a: &CloudflareDNSSyncStatus, b: &CloudflareDNSSyncStatus) -> bool {
    a.observed_generation == b.observed_generation
        && a.synced_records == b.synced_records
        && a.pending_records == b.pending_records
        && a.failed_records == b.failed_records
        && a.records == b.records
        && conditions_equal(&a.conditions, &b.conditions)
}

async fn update_status(
    client: &Client,
    sync: &CloudflareDNSSync,
    status: CloudflareDNSSyncStatus,
) -> Result<()> {
    if let Some(current) = &sync.status {
        if dns_status_equal(current, &status) {
            return Ok(());
        }
    }

    let namespace = sync.namespace().unwrap_or_default();
    let api: Api<CloudflareDNSSync> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({ "status": status });
    api.patch_status(
        &sync.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Best-effort event emission; failures only get a debug log.
async fn publish_event(
    client: &Client,
    sync: &CloudflareDNSSync,
    event_type: EventType,
    reason: &str,
    note: &str,
) {
    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: "cfgate".to_string(),
            instance: None,
        },
        sync.object_ref(&()),
    );

    if let Err(error) = recorder
        .publish(Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: "Sync".to_string(),
            secondary: None,
        })
        .await
    {
        debug!(%error, "failed to publish event");
    }
}

#[cfg(test)]
#[path = "dns_sync_tests.rs"]
mod dns_sync_tests;
