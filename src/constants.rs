// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the cfgate operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all cfgate CRDs
pub const API_GROUP: &str = "cfgate.io";

/// API version for all cfgate CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "cfgate.io/v1alpha1";

/// Kind name for `CloudflareTunnel` resource
pub const KIND_TUNNEL: &str = "CloudflareTunnel";

/// Kind name for `CloudflareDNSSync` resource
pub const KIND_DNS_SYNC: &str = "CloudflareDNSSync";

/// Kind name for `CloudflareAccessPolicy` resource
pub const KIND_ACCESS_POLICY: &str = "CloudflareAccessPolicy";

/// Kind name for the Gateway API `HTTPRoute` resource (status stamping)
pub const KIND_HTTP_ROUTE: &str = "HTTPRoute";

/// Gateway API group consumed by target references and parent refs
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Controller name stamped on GatewayClass matches and route parent statuses
pub const GATEWAY_CONTROLLER_NAME: &str = "cfgate.io/gateway-controller";

// ============================================================================
// Cloudflare Constants
// ============================================================================

/// Base URL of the Cloudflare v4 REST API
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// DNS suffix under which every tunnel is addressable (`<tunnel-id>.<suffix>`)
pub const TUNNEL_DOMAIN_SUFFIX: &str = "cfargotunnel.com";

/// Sentinel embedded in record/application comments claiming cfgate ownership.
/// An external object without this marker is never mutated or deleted.
pub const OWNERSHIP_SENTINEL: &str = "managed by cfgate";

/// Default name prefix for companion TXT ownership records
pub const DEFAULT_OWNERSHIP_PREFIX: &str = "_cfgate";

/// Default key holding the API token in credential secrets
pub const DEFAULT_API_TOKEN_KEY: &str = "CLOUDFLARE_API_TOKEN";

/// TTL value Cloudflare interprets as "automatic"
pub const AUTO_TTL: u32 = 1;

// ============================================================================
// cloudflared Agent Constants
// ============================================================================

/// Default cloudflared container image
pub const DEFAULT_CLOUDFLARED_IMAGE: &str = "cloudflare/cloudflared:2025.6.1";

/// Default replica count for the cloudflared deployment
pub const DEFAULT_CLOUDFLARED_REPLICAS: i32 = 2;

/// Default port on which cloudflared exposes metrics and `/ready`
pub const DEFAULT_CLOUDFLARED_METRICS_PORT: i32 = 2000;

/// Environment variable cloudflared reads the connector token from
pub const TUNNEL_TOKEN_ENV_VAR: &str = "TUNNEL_TOKEN";

/// Key in the child secret holding the connector token
pub const TUNNEL_TOKEN_SECRET_KEY: &str = "token";

/// Catch-all origin service used when no fallback target is configured
pub const DEFAULT_FALLBACK_TARGET: &str = "http_status:404";

// ============================================================================
// Kubernetes Health Check Constants
// ============================================================================

/// Liveness probe initial delay (wait for cloudflared to connect)
pub const LIVENESS_INITIAL_DELAY_SECS: i32 = 10;

/// Liveness probe period
pub const LIVENESS_PERIOD_SECS: i32 = 10;

/// Liveness probe timeout
pub const LIVENESS_TIMEOUT_SECS: i32 = 5;

/// Liveness probe failure threshold
pub const LIVENESS_FAILURE_THRESHOLD: i32 = 3;

/// Readiness probe initial delay
pub const READINESS_INITIAL_DELAY_SECS: i32 = 5;

/// Readiness probe period
pub const READINESS_PERIOD_SECS: i32 = 5;

/// Readiness probe timeout
pub const READINESS_TIMEOUT_SECS: i32 = 5;

/// Readiness probe failure threshold
pub const READINESS_FAILURE_THRESHOLD: i32 = 3;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue interval for resources that are ready (5 minutes)
pub const REQUEUE_WHEN_READY_SECS: u64 = 300;

/// Requeue interval for resources that are not ready (30 seconds)
pub const REQUEUE_WHEN_NOT_READY_SECS: u64 = 30;

// ============================================================================
// Credential Cache Constants
// ============================================================================

/// Default TTL for cached, validated Cloudflare clients (30 seconds)
pub const CREDENTIAL_CACHE_TTL_SECS: u64 = 30;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election renew period (5 seconds)
pub const DEFAULT_LEASE_RENEW_PERIOD_SECS: u64 = 5;

/// Default leader election retry period while another holder is active (2 seconds)
pub const DEFAULT_LEASE_RETRY_PERIOD_SECS: u64 = 2;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for the Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for the Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for the metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
