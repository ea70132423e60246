// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cf_errors.rs`

use super::*;

#[test]
fn test_rate_limited_is_transient() {
    let err = CloudflareError::RateLimited {
        message: "1200 requests per 5 minutes exceeded".to_string(),
    };
    assert!(err.is_transient());
    assert_eq!(err.status_reason(), "RateLimited");
}

#[test]
fn test_transport_is_transient() {
    let err = CloudflareError::Transport {
        reason: "connection reset by peer".to_string(),
    };
    assert!(err.is_transient());
    assert_eq!(err.status_reason(), "TransportError");
}

#[test]
fn test_conflict_is_transient() {
    let err = CloudflareError::Conflict {
        kind: "CloudflareTunnel",
        name: "edge".to_string(),
    };
    assert!(err.is_transient());
    assert_eq!(err.status_reason(), "Conflict");
}

#[test]
fn test_deletion_blocked_is_transient() {
    // A blocked deletion retries until connections drain.
    let err = CloudflareError::DeletionBlocked {
        name: "edge".to_string(),
        reason: "2 active connections".to_string(),
    };
    assert!(err.is_transient());
    assert_eq!(err.status_reason(), "DeletionBlocked");
}

#[test]
fn test_invalid_credentials_is_permanent() {
    let err = CloudflareError::InvalidCredentials {
        reason: "Invalid API Token".to_string(),
    };
    assert!(!err.is_transient());
    assert_eq!(err.status_reason(), "InvalidCredentials");
}

#[test]
fn test_not_found_is_permanent() {
    let err = CloudflareError::NotFound {
        kind: "zone",
        name: "example.com".to_string(),
    };
    assert!(!err.is_transient());
    assert_eq!(err.status_reason(), "NotFound");
}

#[test]
fn test_ownership_violation_is_permanent() {
    let err = CloudflareError::OwnershipViolation {
        name: "x.example.com".to_string(),
    };
    assert!(!err.is_transient());
    assert_eq!(err.status_reason(), "OwnershipViolation");
}

#[test]
fn test_validation_is_permanent() {
    let err = CloudflareError::Validation {
        reason: "ambiguous application domain".to_string(),
    };
    assert!(!err.is_transient());
    assert_eq!(err.status_reason(), "InvalidConfiguration");
}

#[test]
fn test_error_messages_include_context() {
    let err = CloudflareError::NotFound {
        kind: "tunnel",
        name: "edge".to_string(),
    };
    assert_eq!(err.to_string(), "tunnel 'edge' not found");

    let err = CloudflareError::OwnershipViolation {
        name: "x.example.com".to_string(),
    };
    assert!(err.to_string().contains("x.example.com"));
    assert!(err.to_string().contains("ownership marker"));
}
