// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `tunnels.rs`

use super::*;
use crate::cloudflare::testing::MockApi;
use crate::cloudflare::TunnelConnection;
use std::sync::Arc;

#[test]
fn test_tunnel_domain() {
    assert_eq!(tunnel_domain("abc123"), "abc123.cfargotunnel.com");
}

#[tokio::test]
async fn test_adopt_or_create_creates_when_absent() {
    let api = Arc::new(MockApi::new());
    let service = TunnelService::new(api.clone());

    let (tunnel, adopted) = service.adopt_or_create("acc", "edge").await.unwrap();
    assert!(!adopted);
    assert_eq!(tunnel.name, "edge");
    assert!(!tunnel.id.is_empty());
    assert_eq!(api.write_count(), 1);
}

#[tokio::test]
async fn test_adopt_or_create_adopts_existing() {
    let api = Arc::new(MockApi::new().with_tunnel("pre-existing", "edge", "2024-01-01T00:00:00Z"));
    let service = TunnelService::new(api.clone());

    let (tunnel, adopted) = service.adopt_or_create("acc", "edge").await.unwrap();
    assert!(adopted);
    assert_eq!(tunnel.id, "pre-existing");
    // Adoption must not create a duplicate.
    assert_eq!(api.write_count(), 0);
    assert_eq!(api.tunnels.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_adopt_or_create_prefers_oldest_duplicate() {
    let api = Arc::new(
        MockApi::new()
            .with_tunnel("newer", "edge", "2025-03-01T00:00:00Z")
            .with_tunnel("older", "edge", "2024-01-01T00:00:00Z"),
    );
    let service = TunnelService::new(api.clone());

    let (tunnel, adopted) = service.adopt_or_create("acc", "edge").await.unwrap();
    assert!(adopted);
    assert_eq!(tunnel.id, "older");
    // Siblings are never deleted automatically.
    assert_eq!(api.tunnels.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_connector_token() {
    let api = Arc::new(MockApi::new().with_tunnel("t1", "edge", "2024-01-01T00:00:00Z"));
    let service = TunnelService::new(api);

    let token = service.connector_token("acc", "t1").await.unwrap();
    assert_eq!(token, "token-for-t1");
}

#[tokio::test]
async fn test_delete_blocked_while_connected() {
    let api = Arc::new(MockApi::new().with_tunnel("t1", "edge", "2024-01-01T00:00:00Z"));
    api.connections.lock().unwrap().insert(
        "t1".to_string(),
        vec![TunnelConnection {
            id: "conn-1".to_string(),
            origin_ip: "10.0.0.1".to_string(),
            is_pending_reconnect: false,
        }],
    );
    let service = TunnelService::new(api.clone());

    let err = service.delete("acc", "t1", "edge").await.unwrap_err();
    assert_eq!(err.status_reason(), "DeletionBlocked");
    assert!(err.is_transient());
    // The tunnel still exists.
    assert_eq!(api.tunnels.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_succeeds_when_disconnected() {
    let api = Arc::new(MockApi::new().with_tunnel("t1", "edge", "2024-01-01T00:00:00Z"));
    api.connections.lock().unwrap().insert(
        "t1".to_string(),
        vec![TunnelConnection {
            id: "conn-1".to_string(),
            origin_ip: "10.0.0.1".to_string(),
            is_pending_reconnect: true,
        }],
    );
    let service = TunnelService::new(api.clone());

    service.delete("acc", "t1", "edge").await.unwrap();
    assert!(api.tunnels.lock().unwrap().is_empty());
}
