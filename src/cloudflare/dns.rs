// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS convergence on top of the raw API client.
//!
//! [`DnsService`] owns the cfgate side of the ownership protocol: records are
//! only created with the `managed by cfgate` comment, and existing records
//! without that marker are returned untouched. The comment *is* the ownership
//! claim; a user adding it adopts the record, a user stripping it orphans the
//! record (both intentional).

use super::{CloudflareApi, DnsRecord, Zone};
use crate::cf_errors::CloudflareError;
use crate::constants::{AUTO_TTL, OWNERSHIP_SENTINEL};
use std::sync::Arc;

/// DNS operations scoped to one API client.
pub struct DnsService {
    client: Arc<dyn CloudflareApi>,
}

impl DnsService {
    /// Create a service over the given client.
    #[must_use]
    pub fn new(client: Arc<dyn CloudflareApi>) -> Self {
        Self { client }
    }

    /// Ensure a record exists with the desired configuration.
    ///
    /// Creates the record if absent, updates it if owned and different,
    /// returns it untouched if foreign. The boolean reports whether an
    /// external write happened.
    ///
    /// # Errors
    ///
    /// Returns API errors from lookup, create or update.
    pub async fn sync_record(
        &self,
        zone_id: &str,
        desired: &DnsRecord,
    ) -> Result<(DnsRecord, bool), CloudflareError> {
        let existing = self
            .find_record_by_name(zone_id, &desired.name, &desired.r#type)
            .await?;

        let Some(existing) = existing else {
            let record = self.client.create_dns_record(zone_id, desired).await?;
            return Ok((record, true));
        };

        // Never touch a record that does not carry our marker.
        if !is_owned_by_cfgate(&existing, None) {
            return Ok((existing, false));
        }

        if records_match(&existing, desired) {
            return Ok((existing, false));
        }

        let record = self
            .client
            .update_dns_record(zone_id, &existing.id, desired)
            .await?;
        Ok((record, true))
    }

    /// Delete a record by id.
    ///
    /// # Errors
    ///
    /// Returns API errors from the delete call.
    pub async fn delete_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudflareError> {
        self.client.delete_dns_record(zone_id, record_id).await
    }

    /// Find a record by name and type. Returns `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns API errors from the list call.
    pub async fn find_record_by_name(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<Option<DnsRecord>, CloudflareError> {
        let records = self.client.list_dns_records(zone_id).await?;
        Ok(records
            .into_iter()
            .find(|r| r.name == name && r.r#type == record_type))
    }

    /// List all records in a zone carrying the cfgate ownership marker,
    /// either via comment or via the companion TXT prefix.
    ///
    /// # Errors
    ///
    /// Returns API errors from the list call.
    pub async fn list_managed_records(
        &self,
        zone_id: &str,
        ownership_prefix: &str,
    ) -> Result<Vec<DnsRecord>, CloudflareError> {
        let records = self.client.list_dns_records(zone_id).await?;

        Ok(records
            .into_iter()
            .filter(|record| {
                record.comment.contains(OWNERSHIP_SENTINEL)
                    || (record.r#type == "TXT"
                        && record.name.starts_with(&format!("{ownership_prefix}.")))
            })
            .collect())
    }

    /// Upsert the companion TXT ownership record for a hostname.
    ///
    /// # Errors
    ///
    /// Returns API errors; callers treat these as non-fatal since ownership
    /// records are supplementary.
    pub async fn create_ownership_record(
        &self,
        zone_id: &str,
        hostname: &str,
        tunnel_name: &str,
        prefix: &str,
    ) -> Result<(), CloudflareError> {
        let record = build_ownership_txt_record(hostname, tunnel_name, prefix);

        let existing = self
            .find_record_by_name(zone_id, &record.name, &record.r#type)
            .await?;

        if let Some(existing) = existing {
            if existing.content == record.content && existing.comment == record.comment {
                return Ok(());
            }
            self.client
                .update_dns_record(zone_id, &existing.id, &record)
                .await?;
            return Ok(());
        }

        self.client.create_dns_record(zone_id, &record).await?;
        Ok(())
    }

    /// Delete the companion TXT ownership record for a hostname, if present.
    ///
    /// # Errors
    ///
    /// Returns API errors from lookup or delete.
    pub async fn delete_ownership_record(
        &self,
        zone_id: &str,
        hostname: &str,
        prefix: &str,
    ) -> Result<(), CloudflareError> {
        let txt_name = format!("{prefix}.{hostname}");
        let record = self.find_record_by_name(zone_id, &txt_name, "TXT").await?;

        match record {
            Some(record) => self.delete_record(zone_id, &record.id).await,
            None => Ok(()),
        }
    }

    /// Resolve a zone name via the API. Returns `None` when the zone does not
    /// exist or the token cannot see it.
    ///
    /// # Errors
    ///
    /// Returns API errors from the lookup.
    pub async fn resolve_zone(&self, zone_name: &str) -> Result<Option<Zone>, CloudflareError> {
        self.client.zone_by_name(zone_name).await
    }
}

/// Extract the zone name from a hostname by taking the last two labels,
/// e.g. `app.example.com` → `example.com`.
///
/// Multi-label TLDs (`co.uk`) break this heuristic; the documented workaround
/// is an explicit `zone.id` in the spec.
#[must_use]
pub fn extract_zone_from_hostname(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.split('.').collect();
    if parts.len() < 2 {
        return hostname.to_string();
    }
    parts[parts.len() - 2..].join(".")
}

/// Build the ownership comment for a tunnel.
#[must_use]
pub fn ownership_comment(tunnel_name: &str) -> String {
    format!("{OWNERSHIP_SENTINEL}, tunnel={tunnel_name}")
}

/// Build the desired CNAME for a hostname pointing at the tunnel domain.
#[must_use]
pub fn build_cname_record(
    hostname: &str,
    tunnel_domain: &str,
    proxied: bool,
    comment: &str,
) -> DnsRecord {
    DnsRecord {
        id: String::new(),
        r#type: "CNAME".to_string(),
        name: hostname.to_string(),
        content: tunnel_domain.to_string(),
        ttl: AUTO_TTL,
        proxied,
        comment: comment.to_string(),
    }
}

/// Build the companion TXT ownership record for a hostname.
#[must_use]
pub fn build_ownership_txt_record(hostname: &str, tunnel_name: &str, prefix: &str) -> DnsRecord {
    DnsRecord {
        id: String::new(),
        r#type: "TXT".to_string(),
        name: format!("{prefix}.{hostname}"),
        content: ownership_comment(tunnel_name),
        ttl: AUTO_TTL,
        proxied: false,
        comment: "cfgate ownership record".to_string(),
    }
}

/// Check whether a record is managed by cfgate, optionally requiring a
/// specific tunnel claim.
#[must_use]
pub fn is_owned_by_cfgate(record: &DnsRecord, tunnel_name: Option<&str>) -> bool {
    if !record.comment.contains(OWNERSHIP_SENTINEL) {
        return false;
    }

    match tunnel_name {
        None | Some("") => true,
        Some(name) => record.comment.contains(&format!("tunnel={name}")),
    }
}

/// Two records are in sync when content, proxy flag, TTL and comment agree.
#[must_use]
pub fn records_match(a: &DnsRecord, b: &DnsRecord) -> bool {
    a.content == b.content && a.proxied == b.proxied && a.ttl == b.ttl && a.comment == b.comment
}

#[cfg(test)]
#[path = "dns_tests.rs"]
mod dns_tests;
