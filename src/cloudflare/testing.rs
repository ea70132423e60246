// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`CloudflareApi`] implementation backing unit tests.
//!
//! The mock tracks every mutating call in `writes` so tests can assert
//! idempotence (a second reconciliation without drift must not issue writes).

use super::{
    AccessApp, AccessPolicyPayload, CloudflareApi, DnsRecord, MtlsCertificate, ServiceToken,
    Tunnel, TunnelConnection, Zone,
};
use crate::cf_errors::CloudflareError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockApi {
    pub zones: Mutex<Vec<Zone>>,
    pub records: Mutex<HashMap<String, Vec<DnsRecord>>>,
    pub tunnels: Mutex<Vec<Tunnel>>,
    pub connections: Mutex<HashMap<String, Vec<TunnelConnection>>>,
    pub apps: Mutex<Vec<AccessApp>>,
    pub policies: Mutex<HashMap<String, Vec<AccessPolicyPayload>>>,
    pub tokens: Mutex<Vec<ServiceToken>>,
    pub certificates: Mutex<Vec<MtlsCertificate>>,
    /// Count of mutating API calls issued.
    pub writes: AtomicUsize,
    /// When true, `verify_token` fails with `InvalidCredentials`.
    pub reject_token: bool,
    next_id: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone(self, id: &str, name: &str) -> Self {
        self.zones.lock().unwrap().push(Zone {
            id: id.to_string(),
            name: name.to_string(),
        });
        self.records
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default();
        self
    }

    pub fn with_record(self, zone_id: &str, record: DnsRecord) -> Self {
        self.records
            .lock()
            .unwrap()
            .entry(zone_id.to_string())
            .or_default()
            .push(record);
        self
    }

    pub fn with_tunnel(self, id: &str, name: &str, created_at: &str) -> Self {
        self.tunnels.lock().unwrap().push(Tunnel {
            id: id.to_string(),
            name: name.to_string(),
            created_at: created_at.to_string(),
            deleted_at: None,
        });
        self
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudflareApi for MockApi {
    async fn verify_token(&self) -> Result<(), CloudflareError> {
        if self.reject_token {
            return Err(CloudflareError::InvalidCredentials {
                reason: "Invalid API Token".to_string(),
            });
        }
        Ok(())
    }

    async fn account_id_by_name(&self, name: &str) -> Result<String, CloudflareError> {
        Ok(format!("account-{name}"))
    }

    async fn zone_by_name(&self, name: &str) -> Result<Option<Zone>, CloudflareError> {
        Ok(self
            .zones
            .lock()
            .unwrap()
            .iter()
            .find(|z| z.name == name)
            .cloned())
    }

    async fn list_dns_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>, CloudflareError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(zone_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_dns_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, CloudflareError> {
        self.record_write();
        let mut created = record.clone();
        created.id = self.next_id();
        self.records
            .lock()
            .unwrap()
            .entry(zone_id.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, CloudflareError> {
        self.record_write();
        let mut records = self.records.lock().unwrap();
        let zone_records = records
            .get_mut(zone_id)
            .ok_or(CloudflareError::NotFound {
                kind: "zone",
                name: zone_id.to_string(),
            })?;
        let existing = zone_records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| CloudflareError::NotFound {
                kind: "record",
                name: record_id.to_string(),
            })?;
        let id = existing.id.clone();
        *existing = record.clone();
        existing.id = id;
        Ok(existing.clone())
    }

    async fn delete_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudflareError> {
        self.record_write();
        let mut records = self.records.lock().unwrap();
        if let Some(zone_records) = records.get_mut(zone_id) {
            zone_records.retain(|r| r.id != record_id);
        }
        Ok(())
    }

    async fn list_tunnels(&self, _account_id: &str) -> Result<Vec<Tunnel>, CloudflareError> {
        Ok(self.tunnels.lock().unwrap().clone())
    }

    async fn create_tunnel(
        &self,
        _account_id: &str,
        name: &str,
    ) -> Result<Tunnel, CloudflareError> {
        self.record_write();
        let tunnel = Tunnel {
            id: self.next_id(),
            name: name.to_string(),
            created_at: format!(
                "2025-01-01T00:00:{:02}Z",
                self.next_id.load(Ordering::SeqCst) % 60
            ),
            deleted_at: None,
        };
        self.tunnels.lock().unwrap().push(tunnel.clone());
        Ok(tunnel)
    }

    async fn delete_tunnel(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        self.record_write();
        self.tunnels.lock().unwrap().retain(|t| t.id != tunnel_id);
        Ok(())
    }

    async fn tunnel_token(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<String, CloudflareError> {
        Ok(format!("token-for-{tunnel_id}"))
    }

    async fn tunnel_connections(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<Vec<TunnelConnection>, CloudflareError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .get(tunnel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_access_apps(&self, _account_id: &str) -> Result<Vec<AccessApp>, CloudflareError> {
        Ok(self.apps.lock().unwrap().clone())
    }

    async fn create_access_app(
        &self,
        _account_id: &str,
        app: &AccessApp,
    ) -> Result<AccessApp, CloudflareError> {
        self.record_write();
        let mut created = app.clone();
        created.id = self.next_id();
        created.aud = format!("aud-{}", created.id);
        self.apps.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_access_app(
        &self,
        _account_id: &str,
        app_id: &str,
        app: &AccessApp,
    ) -> Result<AccessApp, CloudflareError> {
        self.record_write();
        let mut apps = self.apps.lock().unwrap();
        let existing = apps
            .iter_mut()
            .find(|a| a.id == app_id)
            .ok_or_else(|| CloudflareError::NotFound {
                kind: "application",
                name: app_id.to_string(),
            })?;
        let (id, aud) = (existing.id.clone(), existing.aud.clone());
        *existing = app.clone();
        existing.id = id;
        existing.aud = aud;
        Ok(existing.clone())
    }

    async fn delete_access_app(
        &self,
        _account_id: &str,
        app_id: &str,
    ) -> Result<(), CloudflareError> {
        self.record_write();
        self.apps.lock().unwrap().retain(|a| a.id != app_id);
        Ok(())
    }

    async fn list_access_policies(
        &self,
        _account_id: &str,
        app_id: &str,
    ) -> Result<Vec<AccessPolicyPayload>, CloudflareError> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .get(app_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_access_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy: &AccessPolicyPayload,
    ) -> Result<AccessPolicyPayload, CloudflareError> {
        self.record_write();
        let mut created = policy.clone();
        created.id = self.next_id();
        self.policies
            .lock()
            .unwrap()
            .entry(app_id.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_access_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy_id: &str,
        policy: &AccessPolicyPayload,
    ) -> Result<AccessPolicyPayload, CloudflareError> {
        self.record_write();
        let mut policies = self.policies.lock().unwrap();
        let app_policies =
            policies
                .get_mut(app_id)
                .ok_or_else(|| CloudflareError::NotFound {
                    kind: "application",
                    name: app_id.to_string(),
                })?;
        let existing = app_policies
            .iter_mut()
            .find(|p| p.id == policy_id)
            .ok_or_else(|| CloudflareError::NotFound {
                kind: "policy",
                name: policy_id.to_string(),
            })?;
        let id = existing.id.clone();
        *existing = policy.clone();
        existing.id = id;
        Ok(existing.clone())
    }

    async fn delete_access_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy_id: &str,
    ) -> Result<(), CloudflareError> {
        self.record_write();
        if let Some(app_policies) = self.policies.lock().unwrap().get_mut(app_id) {
            app_policies.retain(|p| p.id != policy_id);
        }
        Ok(())
    }

    async fn list_service_tokens(
        &self,
        _account_id: &str,
    ) -> Result<Vec<ServiceToken>, CloudflareError> {
        Ok(self.tokens.lock().unwrap().clone())
    }

    async fn create_service_token(
        &self,
        _account_id: &str,
        name: &str,
        _duration: &str,
    ) -> Result<ServiceToken, CloudflareError> {
        self.record_write();
        let id = self.next_id();
        let token = ServiceToken {
            client_id: format!("{id}.access"),
            client_secret: format!("secret-{id}"),
            id,
            name: name.to_string(),
        };
        self.tokens.lock().unwrap().push(token.clone());
        Ok(token)
    }

    async fn upsert_mtls_certificate(
        &self,
        _account_id: &str,
        name: &str,
        _certificate: &str,
        hostnames: &[String],
    ) -> Result<MtlsCertificate, CloudflareError> {
        self.record_write();
        let mut certificates = self.certificates.lock().unwrap();
        if let Some(existing) = certificates.iter_mut().find(|c| c.name == name) {
            existing.associated_hostnames = hostnames.to_vec();
            return Ok(existing.clone());
        }
        let certificate = MtlsCertificate {
            id: self.next_id(),
            name: name.to_string(),
            associated_hostnames: hostnames.to_vec(),
        };
        certificates.push(certificate.clone());
        Ok(certificate)
    }
}
