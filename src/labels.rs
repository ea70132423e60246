// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and cfgate-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Application name for cloudflared agent pods
pub const APP_NAME_CLOUDFLARED: &str = "cloudflared";

/// Component value for tunnel agent workloads
pub const COMPONENT_TUNNEL: &str = "tunnel";

/// Value for `app.kubernetes.io/managed-by` on all child resources
pub const MANAGED_BY_CFGATE: &str = "cfgate";

// ============================================================================
// cfgate Annotations: Gateway
// ============================================================================

/// Binds a Gateway to a tunnel; value is `<namespace>/<tunnel-name>`
pub const ANNOTATION_TUNNEL_REF: &str = "cfgate.io/tunnel-ref";

/// Enables DNS sync for a Gateway when set to `enabled`
pub const ANNOTATION_DNS_SYNC: &str = "cfgate.io/dns-sync";

/// Value of [`ANNOTATION_DNS_SYNC`] that turns hostname collection on
pub const DNS_SYNC_ENABLED: &str = "enabled";

// ============================================================================
// cfgate Annotations: Tunnel
// ============================================================================

/// Deletion policy for the external tunnel: `delete` (default) or `orphan`
pub const ANNOTATION_DELETION_POLICY: &str = "cfgate.io/deletion-policy";

/// [`ANNOTATION_DELETION_POLICY`] value that leaves external state untouched
pub const DELETION_POLICY_ORPHAN: &str = "orphan";

// ============================================================================
// cfgate Annotations: Routes
// ============================================================================

/// Override the origin connect timeout for a route
pub const ANNOTATION_ORIGIN_CONNECT_TIMEOUT: &str = "cfgate.io/origin-connect-timeout";

/// Disable origin TLS certificate verification for a route
pub const ANNOTATION_ORIGIN_NO_TLS_VERIFY: &str = "cfgate.io/origin-no-tls-verify";

/// Rewrite the Host header sent to the origin
pub const ANNOTATION_ORIGIN_HTTP_HOST_HEADER: &str = "cfgate.io/origin-http-host-header";

/// SNI server name presented to the origin during TLS
pub const ANNOTATION_ORIGIN_SERVER_NAME: &str = "cfgate.io/origin-server-name";

/// Path to a CA bundle used to validate the origin certificate
pub const ANNOTATION_ORIGIN_CA_POOL: &str = "cfgate.io/origin-ca-pool";

/// Use HTTP/2 when talking to the origin
pub const ANNOTATION_ORIGIN_HTTP2: &str = "cfgate.io/origin-http2";

/// Enable origin certificate verification (counterpart of no-tls-verify)
pub const ANNOTATION_ORIGIN_SSL_VERIFY: &str = "cfgate.io/origin-ssl-verify";

/// Match the SNI presented to the origin to the request Host header
pub const ANNOTATION_ORIGIN_MATCH_SNI_TO_HOST: &str = "cfgate.io/origin-match-sni-to-host";

/// Hostname for TCP/UDP routes whose spec carries none
pub const ANNOTATION_HOSTNAME: &str = "cfgate.io/hostname";

/// Attaches a named `CloudflareAccessPolicy` to a route
pub const ANNOTATION_ACCESS_POLICY: &str = "cfgate.io/access-policy";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `CloudflareTunnel` resources
pub const FINALIZER_TUNNEL: &str = "cfgate.io/tunnel-cleanup";

/// Finalizer for `CloudflareDNSSync` resources
pub const FINALIZER_DNS_SYNC: &str = "cfgate.io/dns-cleanup";

/// Finalizer for `CloudflareAccessPolicy` resources
pub const FINALIZER_ACCESS_POLICY: &str = "cfgate.io/access-cleanup";
