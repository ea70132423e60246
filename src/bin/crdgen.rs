// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generate CRD manifests for all cfgate resource types.
//!
//! Usage: `cargo run --bin crdgen > deploy/crds.yaml`

use cfgate::crd::{CloudflareAccessPolicy, CloudflareDNSSync, CloudflareTunnel};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&CloudflareTunnel::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&CloudflareDNSSync::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&CloudflareAccessPolicy::crd())?);
    Ok(())
}
