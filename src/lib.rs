// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # cfgate - Cloudflare Gateway Operator for Kubernetes
//!
//! cfgate is a Kubernetes operator written in Rust that projects declarative
//! desired state - secure tunnels, DNS records, and zero-trust access
//! policies - onto the Cloudflare control plane while observing Gateway API
//! route declarations.
//!
//! ## Overview
//!
//! This library provides the core functionality for the cfgate operator,
//! including:
//!
//! - Custom Resource Definitions for tunnels, DNS sync bindings and access
//!   policies
//! - Reconciliation logic converging cluster state onto external Cloudflare
//!   objects, with an ownership protocol that never touches foreign records
//! - cloudflared workload and configuration rendering
//! - A credential cache keyed by secret identity and version
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`cloudflare`] - Cloudflare API client, services and credential cache
//! - [`cloudflared`] - Tunnel agent configuration document rendering
//! - [`cloudflared_resources`] - Child workload builders
//! - [`context`] - Shared controller context and policy target resolution
//!
//! ## Example
//!
//! ```rust,no_run
//! use cfgate::crd::{CloudflareDNSSyncSpec, TunnelRef, ZoneConfig};
//!
//! let spec = CloudflareDNSSyncSpec {
//!     tunnel_ref: TunnelRef {
//!         name: "edge".to_string(),
//!         namespace: None,
//!     },
//!     zones: vec![ZoneConfig {
//!         name: "example.com".to_string(),
//!         id: None,
//!     }],
//!     ..Default::default()
//! };
//! ```
//!
//! ## Guarantees
//!
//! - **Ownership** - every external object cfgate creates carries a marker
//!   comment; objects without it are never mutated or deleted
//! - **Adoption** - pre-existing tunnels and applications with matching
//!   identity are adopted, not duplicated
//! - **Idempotence** - reconciling unchanged state issues no external writes

pub mod cf_errors;
pub mod cloudflare;
pub mod cloudflared;
pub mod cloudflared_resources;
pub mod constants;
pub mod context;
pub mod crd;
pub mod labels;
pub mod leader;
pub mod metrics;
pub mod reconcilers;
