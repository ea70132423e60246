// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tunnel lifecycle on top of the raw API client.
//!
//! Adoption is the central behavior: an external tunnel whose name matches the
//! desired name is bound to the custom resource instead of creating a
//! duplicate. This makes tunnels survive operator restarts and lets users
//! pre-create them out of band.

use super::{CloudflareApi, Tunnel};
use crate::cf_errors::CloudflareError;
use std::sync::Arc;
use tracing::{info, warn};

/// Tunnel operations scoped to one API client.
pub struct TunnelService {
    client: Arc<dyn CloudflareApi>,
}

impl TunnelService {
    /// Create a service over the given client.
    #[must_use]
    pub fn new(client: Arc<dyn CloudflareApi>) -> Self {
        Self { client }
    }

    /// Adopt the external tunnel with the desired name, or create a new one.
    ///
    /// Concurrent creation can leave several tunnels with the same name; the
    /// oldest by creation timestamp wins and siblings are left alone.
    /// Returns the tunnel and whether it was adopted (vs. freshly created).
    ///
    /// # Errors
    ///
    /// Returns API errors from list or create.
    pub async fn adopt_or_create(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<(Tunnel, bool), CloudflareError> {
        let tunnels = self.client.list_tunnels(account_id).await?;

        let mut matching: Vec<Tunnel> = tunnels
            .into_iter()
            .filter(|t| t.name == name && t.deleted_at.is_none())
            .collect();

        if matching.len() > 1 {
            warn!(
                tunnel = name,
                count = matching.len(),
                "multiple external tunnels share this name; adopting the oldest"
            );
        }

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if let Some(existing) = matching.into_iter().next() {
            info!(tunnel = name, tunnel_id = %existing.id, "adopted existing tunnel");
            return Ok((existing, true));
        }

        let created = self.client.create_tunnel(account_id, name).await?;
        info!(tunnel = name, tunnel_id = %created.id, "created tunnel");
        Ok((created, false))
    }

    /// Fetch the connector token for a tunnel.
    ///
    /// # Errors
    ///
    /// Returns API errors from the token endpoint.
    pub async fn connector_token(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<String, CloudflareError> {
        self.client.tunnel_token(account_id, tunnel_id).await
    }

    /// Number of live connectors registered against a tunnel.
    ///
    /// # Errors
    ///
    /// Returns API errors from the connections endpoint.
    pub async fn active_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<usize, CloudflareError> {
        let connections = self.client.tunnel_connections(account_id, tunnel_id).await?;
        Ok(connections
            .iter()
            .filter(|c| !c.is_pending_reconnect)
            .count())
    }

    /// Delete a tunnel. The tunnel must be disconnected; live connections
    /// surface as [`CloudflareError::DeletionBlocked`] so the reconciler can
    /// report and retry.
    ///
    /// # Errors
    ///
    /// `DeletionBlocked` when connections remain, otherwise API errors from
    /// the delete call.
    pub async fn delete(
        &self,
        account_id: &str,
        tunnel_id: &str,
        name: &str,
    ) -> Result<(), CloudflareError> {
        let active = self.active_connections(account_id, tunnel_id).await?;
        if active > 0 {
            return Err(CloudflareError::DeletionBlocked {
                name: name.to_string(),
                reason: format!("{active} active connections"),
            });
        }

        self.client.delete_tunnel(account_id, tunnel_id).await?;
        info!(tunnel = name, tunnel_id, "deleted tunnel");
        Ok(())
    }
}

/// Derive the tunnel domain from a tunnel id.
#[must_use]
pub fn tunnel_domain(tunnel_id: &str) -> String {
    format!("{tunnel_id}.{}", crate::constants::TUNNEL_DOMAIN_SUFFIX)
}

#[cfg(test)]
#[path = "tunnels_tests.rs"]
mod tunnels_tests;
