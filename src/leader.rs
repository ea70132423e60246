// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lease-based leader election.
//!
//! Exactly one process in the fleet may reconcile at a time, because external
//! control-plane mutations must be linearized. This module claims a
//! `coordination.k8s.io/Lease` and exposes leadership as a
//! `tokio::sync::watch::Receiver<bool>`: standbys watch but do not act, and a
//! flip to `false` tells the main loop to step down.
//!
//! A lease is taken over when its previous holder stops renewing for longer
//! than the lease duration. Conflicting writes (another standby racing for
//! the same takeover) simply retry on the next tick.

use crate::metrics;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Leader election configuration.
#[derive(Clone)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub lease_namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_period: Duration,
    pub retry_period: Duration,
}

/// Spawn the lease claim loop. The returned receiver flips to `true` when
/// leadership is acquired and back to `false` when it is lost.
pub fn spawn(
    client: Client,
    config: LeaderElectionConfig,
) -> (watch::Receiver<bool>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        run_claim_loop(client, config, tx).await;
    });

    (rx, handle)
}

async fn run_claim_loop(client: Client, config: LeaderElectionConfig, tx: watch::Sender<bool>) {
    let api: Api<Lease> = Api::namespaced(client, &config.lease_namespace);
    let mut is_leader = false;

    loop {
        let outcome = try_claim(&api, &config).await;

        match outcome {
            Ok(true) => {
                if !is_leader {
                    info!(identity = %config.identity, "leadership acquired");
                    metrics::record_leader_elected(&config.identity);
                    is_leader = true;
                    let _ = tx.send(true);
                }
                tokio::time::sleep(config.renew_period).await;
            }
            Ok(false) => {
                if is_leader {
                    warn!(identity = %config.identity, "leadership lost");
                    metrics::record_leader_lost(&config.identity);
                    is_leader = false;
                    let _ = tx.send(false);
                }
                tokio::time::sleep(config.retry_period).await;
            }
            Err(error) => {
                debug!(%error, "lease claim attempt failed; retrying");
                if is_leader {
                    // Failing to renew long enough forfeits the lease; report
                    // loss conservatively so reconcilers stop early.
                    metrics::record_leader_lost(&config.identity);
                    is_leader = false;
                    let _ = tx.send(false);
                }
                tokio::time::sleep(config.retry_period).await;
            }
        }
    }
}

/// One claim/renew attempt. Returns whether we currently hold the lease.
async fn try_claim(api: &Api<Lease>, config: &LeaderElectionConfig) -> Result<bool> {
    let now = Utc::now();

    let Some(existing) = api.get_opt(&config.lease_name).await? else {
        let lease = build_lease(config, None, 0);
        return match api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            // Someone else created it first; observe it on the next tick.
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        };
    };

    let spec = existing.spec.clone().unwrap_or_default();
    let holder = spec.holder_identity.clone().unwrap_or_default();
    let transitions = spec.lease_transitions.unwrap_or(0);

    let expired = spec
        .renew_time
        .as_ref()
        .map(|renew| {
            let duration = i64::from(spec.lease_duration_seconds.unwrap_or(0));
            renew.0 + ChronoDuration::seconds(duration) < now
        })
        .unwrap_or(true);

    if holder == config.identity {
        // Renew our claim.
        let lease = build_lease(config, spec.acquire_time.clone(), transitions);
        patch_lease(api, config, &lease).await?;
        return Ok(true);
    }

    if !expired {
        return Ok(false);
    }

    info!(
        previous_holder = %holder,
        "lease expired; attempting takeover"
    );
    let lease = build_lease(config, None, transitions + 1);
    patch_lease(api, config, &lease).await?;
    Ok(true)
}

async fn patch_lease(
    api: &Api<Lease>,
    config: &LeaderElectionConfig,
    lease: &Lease,
) -> Result<()> {
    api.patch(
        &config.lease_name,
        &PatchParams::apply("cfgate-leader").force(),
        &Patch::Apply(lease),
    )
    .await?;
    Ok(())
}

fn build_lease(
    config: &LeaderElectionConfig,
    acquire_time: Option<MicroTime>,
    transitions: i32,
) -> Lease {
    let now = MicroTime(Utc::now());

    Lease {
        metadata: ObjectMeta {
            name: Some(config.lease_name.clone()),
            namespace: Some(config.lease_namespace.clone()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(config.identity.clone()),
            lease_duration_seconds: Some(
                i32::try_from(config.lease_duration.as_secs()).unwrap_or(15),
            ),
            acquire_time: Some(acquire_time.unwrap_or_else(|| now.clone())),
            renew_time: Some(now),
            lease_transitions: Some(transitions),
        }),
    }
}
