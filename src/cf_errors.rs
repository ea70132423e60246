// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloudflare API and reconciliation error types for cfgate.
//!
//! This module provides the error taxonomy shared by the provider client and
//! the reconcilers:
//! - Credential failures (invalid or expired API tokens)
//! - Missing external or cluster objects
//! - Rate limiting and transient transport failures
//! - Ownership violations (refusing to touch foreign records)
//! - Blocked deletions (tunnel still has live connections)
//!
//! These errors map onto status conditions via [`CloudflareError::status_reason`]
//! and drive requeue behavior via [`CloudflareError::is_transient`].

use thiserror::Error;

/// Errors surfaced by Cloudflare API calls and the convergence logic built on them.
#[derive(Error, Debug, Clone)]
pub enum CloudflareError {
    /// The API token was rejected or lacks the required scopes.
    ///
    /// Maps to `CredentialsValid=False`. The reconciler backs off aggressively
    /// since retrying with the same token cannot succeed until the secret changes.
    #[error("Cloudflare credentials rejected: {reason}")]
    InvalidCredentials {
        /// Why the token was rejected (API error message)
        reason: String,
    },

    /// A referenced external object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of object (zone, tunnel, application, record)
        kind: &'static str,
        /// Name or id that was looked up
        name: String,
    },

    /// The API rejected the request payload.
    #[error("Cloudflare rejected request: {message} (code {code})")]
    Api {
        /// Cloudflare error code
        code: i64,
        /// Cloudflare error message
        message: String,
    },

    /// Rate limited by the API (HTTP 429).
    #[error("Cloudflare rate limit hit: {message}")]
    RateLimited {
        /// Response detail
        message: String,
    },

    /// Transport-level failure (connect, timeout, 5xx).
    #[error("Cloudflare API transport failure: {reason}")]
    Transport {
        /// Underlying failure description
        reason: String,
    },

    /// The operator refused to mutate or delete an object it does not own.
    ///
    /// Reported non-fatally: the record stays untouched and status records the
    /// existing content.
    #[error("refusing to modify '{name}': missing cfgate ownership marker")]
    OwnershipViolation {
        /// Name of the foreign object
        name: String,
    },

    /// External state prevents deletion from making progress.
    #[error("deletion blocked for '{name}': {reason}")]
    DeletionBlocked {
        /// Name of the object whose deletion is blocked
        name: String,
        /// Why deletion cannot proceed yet
        reason: String,
    },

    /// Desired state failed validation before any API call was made.
    #[error("invalid configuration: {reason}")]
    Validation {
        /// What is invalid
        reason: String,
    },

    /// Cluster write race; the caller should re-fetch and retry.
    #[error("conflict updating {kind} '{name}'")]
    Conflict {
        /// Kind of cluster object
        kind: &'static str,
        /// Object name
        name: String,
    },
}

impl CloudflareError {
    /// Returns true if this error is transient and the operation should be retried
    /// on the short backoff schedule.
    ///
    /// Credential and validation failures are permanent until the spec or secret
    /// changes; ownership violations are never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Transport { .. }
            | Self::Conflict { .. }
            | Self::DeletionBlocked { .. } => true,

            Self::InvalidCredentials { .. }
            | Self::NotFound { .. }
            | Self::Api { .. }
            | Self::OwnershipViolation { .. }
            | Self::Validation { .. } => false,
        }
    }

    /// Returns the CamelCase reason code used in status conditions.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials { .. } => "InvalidCredentials",
            Self::NotFound { .. } => "NotFound",
            Self::Api { .. } => "ApiError",
            Self::RateLimited { .. } => "RateLimited",
            Self::Transport { .. } => "TransportError",
            Self::OwnershipViolation { .. } => "OwnershipViolation",
            Self::DeletionBlocked { .. } => "DeletionBlocked",
            Self::Validation { .. } => "InvalidConfiguration",
            Self::Conflict { .. } => "Conflict",
        }
    }
}

impl From<reqwest::Error> for CloudflareError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "cf_errors_tests.rs"]
mod cf_errors_tests;
