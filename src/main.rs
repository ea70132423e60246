// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{routing::get, Router};
use cfgate::{
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RENEW_PERIOD_SECS,
        DEFAULT_LEASE_RETRY_PERIOD_SECS, ERROR_REQUEUE_DURATION_SECS, KIND_ACCESS_POLICY,
        KIND_DNS_SYNC, KIND_HTTP_ROUTE, KIND_TUNNEL, METRICS_SERVER_BIND_ADDRESS,
        METRICS_SERVER_PATH, METRICS_SERVER_PORT, REQUEUE_WHEN_NOT_READY_SECS,
        REQUEUE_WHEN_READY_SECS, TOKIO_WORKER_THREADS,
    },
    context::{Context, Stores},
    crd::{CloudflareAccessPolicy, CloudflareDNSSync, CloudflareTunnel},
    leader::{self, LeaderElectionConfig},
    metrics,
    reconcilers::{
        reconcile_access_policy, reconcile_dns_sync, reconcile_http_route, reconcile_tunnel,
        status::is_ready,
    },
};
use futures::StreamExt;
use k8s_gateway_api::{Gateway, HttpRoute};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    runtime::{
        controller::Action,
        reflector::{self, ObjectRef},
        watcher::{watcher, Config},
        Controller, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("cfgate-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting cfgate operator");
}

/// Start the Prometheus metrics HTTP server
///
/// Serves metrics on the configured port and path (default: 0.0.0.0:8080/metrics)
fn start_metrics_server() -> tokio::task::JoinHandle<()> {
    info!(
        bind_address = METRICS_SERVER_BIND_ADDRESS,
        port = METRICS_SERVER_PORT,
        path = METRICS_SERVER_PATH,
        "Starting Prometheus metrics HTTP server"
    );

    tokio::spawn(async move {
        async fn metrics_handler() -> String {
            match metrics::gather_metrics() {
                Ok(metrics_text) => metrics_text,
                Err(e) => {
                    error!("Failed to gather metrics: {}", e);
                    String::from("# Error gathering metrics\n")
                }
            }
        }

        let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));

        let bind_addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{METRICS_SERVER_PORT}");
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {bind_addr}: {e}");
                return;
            }
        };

        info!("Metrics server listening on http://{bind_addr}{METRICS_SERVER_PATH}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {e}");
        }
    })
}

/// Load leader election configuration from environment variables
fn load_leader_election_config() -> (bool, LeaderElectionConfig) {
    let enabled = std::env::var("CFGATE_ENABLE_LEADER_ELECTION")
        .unwrap_or_else(|_| "true".to_string())
        .parse::<bool>()
        .unwrap_or(true);

    let lease_name =
        std::env::var("CFGATE_LEASE_NAME").unwrap_or_else(|_| "cfgate-leader".to_string());

    let lease_namespace = std::env::var("CFGATE_LEASE_NAMESPACE")
        .or_else(|_| std::env::var("POD_NAMESPACE"))
        .unwrap_or_else(|_| "cfgate-system".to_string());

    let lease_duration = std::env::var("CFGATE_LEASE_DURATION_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_DURATION_SECS);

    let renew_period = std::env::var("CFGATE_LEASE_RENEW_PERIOD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_RENEW_PERIOD_SECS);

    let retry_period = std::env::var("CFGATE_LEASE_RETRY_PERIOD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_RETRY_PERIOD_SECS);

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("cfgate-{}", rand::random::<u32>()));

    (
        enabled,
        LeaderElectionConfig {
            lease_name,
            lease_namespace,
            identity,
            lease_duration: Duration::from_secs(lease_duration),
            renew_period: Duration::from_secs(renew_period),
            retry_period: Duration::from_secs(retry_period),
        },
    )
}

/// Create a semantic watcher configuration.
///
/// Only triggers on semantic changes (spec modifications), ignoring
/// status-only updates. This prevents reconciliation loops when controllers
/// update status fields.
#[inline]
fn semantic_watcher_config() -> Config {
    Config::default().any_semantic()
}

/// Create a default watcher configuration.
#[inline]
fn default_watcher_config() -> Config {
    Config::default()
}

async fn async_main() -> Result<()> {
    initialize_logging();

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let _metrics_handle = start_metrics_server();

    let (leader_election_enabled, leader_config) = load_leader_election_config();

    if leader_election_enabled {
        info!(
            lease_name = %leader_config.lease_name,
            lease_namespace = %leader_config.lease_namespace,
            identity = %leader_config.identity,
            "Leader election enabled"
        );
        info!("Starting leader election, waiting to acquire leadership...");

        let (mut leader_rx, _lease_handle) = leader::spawn(client.clone(), leader_config);

        while !*leader_rx.borrow_and_update() {
            leader_rx.changed().await?;
        }

        info!("Leadership acquired! Starting controllers...");
        run_controllers_with_leader_election(client, leader_rx).await?;
    } else {
        warn!("Leader election DISABLED - running without high availability");
        run_controllers_without_leader_election(client).await?;
    }

    Ok(())
}

/// Monitor leadership status - returns when leadership is lost or an error occurs
async fn monitor_leadership(
    mut leader_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        leader_rx.changed().await?;
        if !*leader_rx.borrow() {
            return Ok(());
        }
    }
}

/// Wait for SIGTERM (Kubernetes sends this when deleting pods)
async fn wait_for_sigterm() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        sigterm.recv().await;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Run controllers with leadership monitoring and signal handling.
async fn run_controllers_with_leader_election(
    client: Client,
    leader_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }

        result = wait_for_sigterm() => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }

        result = monitor_leadership(leader_rx) => {
            match result {
                Ok(()) => {
                    warn!("Leadership lost! Stopping all controllers...");
                    anyhow::bail!("Leadership lost - stepping down")
                }
                Err(e) => {
                    error!("Leadership monitor error: {:?}", e);
                    anyhow::bail!("Leadership monitoring failed: {e}")
                }
            }
        }

        result = run_all_controllers(client) => {
            result
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Run controllers with signal handling only.
async fn run_controllers_without_leader_election(client: Client) -> Result<()> {
    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }

        result = wait_for_sigterm() => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }

        result = run_all_controllers(client) => {
            result
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Build the shared reflector stores and spawn their population tasks.
///
/// The stores feed the synchronous watch mappers: route and gateway events
/// must fan out to the primaries whose desired state depends on them, and a
/// store lookup is the only way to do that without an async call inside the
/// mapper.
fn spawn_stores(client: &Client) -> Stores {
    let (dns_syncs, dns_sync_writer) = reflector::store::<CloudflareDNSSync>();
    let dns_sync_api = Api::<CloudflareDNSSync>::all(client.clone());
    tokio::spawn(async move {
        let mut stream = reflector::reflector(
            dns_sync_writer,
            watcher(dns_sync_api, Config::default()),
        )
        .applied_objects()
        .boxed();
        while let Some(next) = stream.next().await {
            if let Err(error) = next {
                warn!(%error, "DNSSync reflector stream error");
            }
        }
    });

    let (access_policies, policy_writer) = reflector::store::<CloudflareAccessPolicy>();
    let policy_api = Api::<CloudflareAccessPolicy>::all(client.clone());
    tokio::spawn(async move {
        let mut stream = reflector::reflector(
            policy_writer,
            watcher(policy_api, Config::default()),
        )
        .applied_objects()
        .boxed();
        while let Some(next) = stream.next().await {
            if let Err(error) = next {
                warn!(%error, "AccessPolicy reflector stream error");
            }
        }
    });

    Stores {
        dns_syncs,
        access_policies,
    }
}

/// Run all controllers. Controllers should never exit; if one does, the main
/// process exits so the pod restarts cleanly.
async fn run_all_controllers(client: Client) -> Result<()> {
    let ctx = Arc::new(Context::new(client.clone()));
    let stores = spawn_stores(&client);

    tokio::select! {
        result = run_tunnel_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: CloudflareTunnel controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("CloudflareTunnel controller exited unexpectedly without error")
        }
        result = run_dns_sync_controller(client.clone(), ctx.clone(), stores.clone()) => {
            error!("CRITICAL: CloudflareDNSSync controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("CloudflareDNSSync controller exited unexpectedly without error")
        }
        result = run_access_policy_controller(client.clone(), ctx.clone(), stores.clone()) => {
            error!("CRITICAL: CloudflareAccessPolicy controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("CloudflareAccessPolicy controller exited unexpectedly without error")
        }
        result = run_httproute_controller(client.clone(), ctx) => {
            error!("CRITICAL: HTTPRoute controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("HTTPRoute controller exited unexpectedly without error")
        }
    }
}

/// Run the `CloudflareTunnel` controller
async fn run_tunnel_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting CloudflareTunnel controller");

    let api = Api::<CloudflareTunnel>::all(client.clone());
    let deployment_api = Api::<Deployment>::all(client);

    Controller::new(api, semantic_watcher_config())
        .owns(deployment_api, default_watcher_config())
        .run(reconcile_tunnel_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `CloudflareDNSSync` controller with route and gateway watches
async fn run_dns_sync_controller(client: Client, ctx: Arc<Context>, stores: Stores) -> Result<()> {
    info!("Starting CloudflareDNSSync controller with route and gateway watches");

    let api = Api::<CloudflareDNSSync>::all(client.clone());
    let route_api = Api::<HttpRoute>::all(client.clone());
    let gateway_api = Api::<Gateway>::all(client);

    let route_stores = stores.clone();
    let gateway_stores = stores;

    Controller::new(api, semantic_watcher_config())
        .watches(route_api, semantic_watcher_config(), move |route| {
            let affected = route_stores.dns_syncs_watching_routes();
            if !affected.is_empty() {
                debug!(
                    route = %route.name_any(),
                    affected = affected.len(),
                    "HTTPRoute change triggering DNSSync reconciliation"
                );
            }
            affected
                .into_iter()
                .map(|(name, namespace)| ObjectRef::new(&name).within(&namespace))
        })
        .watches(gateway_api, semantic_watcher_config(), move |gateway| {
            let affected = gateway_stores.dns_syncs_watching_routes();
            if !affected.is_empty() {
                debug!(
                    gateway = %gateway.name_any(),
                    affected = affected.len(),
                    "Gateway change triggering DNSSync reconciliation"
                );
            }
            affected
                .into_iter()
                .map(|(name, namespace)| ObjectRef::new(&name).within(&namespace))
        })
        .run(reconcile_dns_sync_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `CloudflareAccessPolicy` controller with route and gateway watches
async fn run_access_policy_controller(
    client: Client,
    ctx: Arc<Context>,
    stores: Stores,
) -> Result<()> {
    info!("Starting CloudflareAccessPolicy controller");

    let api = Api::<CloudflareAccessPolicy>::all(client.clone());
    let route_api = Api::<HttpRoute>::all(client.clone());
    let gateway_api = Api::<Gateway>::all(client);

    let route_stores = stores.clone();
    let gateway_stores = stores;

    Controller::new(api, semantic_watcher_config())
        .watches(route_api, semantic_watcher_config(), move |_route| {
            route_stores
                .all_access_policies()
                .into_iter()
                .map(|(name, namespace)| ObjectRef::new(&name).within(&namespace))
        })
        .watches(gateway_api, semantic_watcher_config(), move |_gateway| {
            gateway_stores
                .all_access_policies()
                .into_iter()
                .map(|(name, namespace)| ObjectRef::new(&name).within(&namespace))
        })
        .run(reconcile_access_policy_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `HTTPRoute` controller
async fn run_httproute_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting HTTPRoute controller");

    let api = Api::<HttpRoute>::all(client);

    Controller::new(api, semantic_watcher_config())
        .run(reconcile_http_route_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `CloudflareTunnel`
async fn reconcile_tunnel_wrapper(
    tunnel: Arc<CloudflareTunnel>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    let result = reconcile_tunnel(&ctx, &tunnel).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!(
                "Successfully reconciled CloudflareTunnel: {}",
                tunnel.name_any()
            );
            metrics::record_reconciliation_success(KIND_TUNNEL, duration);

            let ready = fetch_ready::<CloudflareTunnel>(&ctx.client, &tunnel, |t| {
                t.status.as_ref().map(|s| is_ready(&s.conditions))
            })
            .await;
            Ok(requeue_for(ready))
        }
        Err(e) => {
            error!("Failed to reconcile CloudflareTunnel: {}", e);
            metrics::record_reconciliation_error(KIND_TUNNEL, duration);
            metrics::record_error(KIND_TUNNEL, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `CloudflareDNSSync`
async fn reconcile_dns_sync_wrapper(
    sync: Arc<CloudflareDNSSync>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    let result = reconcile_dns_sync(&ctx, &sync).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!(
                "Successfully reconciled CloudflareDNSSync: {}",
                sync.name_any()
            );
            metrics::record_reconciliation_success(KIND_DNS_SYNC, duration);

            let ready = fetch_ready::<CloudflareDNSSync>(&ctx.client, &sync, |s| {
                s.status.as_ref().map(|s| is_ready(&s.conditions))
            })
            .await;
            Ok(requeue_for(ready))
        }
        Err(e) => {
            error!("Failed to reconcile CloudflareDNSSync: {}", e);
            metrics::record_reconciliation_error(KIND_DNS_SYNC, duration);
            metrics::record_error(KIND_DNS_SYNC, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `CloudflareAccessPolicy`
async fn reconcile_access_policy_wrapper(
    policy: Arc<CloudflareAccessPolicy>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    let result = reconcile_access_policy(&ctx, &policy).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!(
                "Successfully reconciled CloudflareAccessPolicy: {}",
                policy.name_any()
            );
            metrics::record_reconciliation_success(KIND_ACCESS_POLICY, duration);

            let ready = fetch_ready::<CloudflareAccessPolicy>(&ctx.client, &policy, |p| {
                p.status.as_ref().map(|s| is_ready(&s.conditions))
            })
            .await;
            Ok(requeue_for(ready))
        }
        Err(e) => {
            error!("Failed to reconcile CloudflareAccessPolicy: {}", e);
            metrics::record_reconciliation_error(KIND_ACCESS_POLICY, duration);
            metrics::record_error(KIND_ACCESS_POLICY, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `HTTPRoute`
async fn reconcile_http_route_wrapper(
    route: Arc<HttpRoute>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    let result = reconcile_http_route(&ctx, &route).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            metrics::record_reconciliation_success(KIND_HTTP_ROUTE, duration);
            Ok(Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)))
        }
        Err(e) => {
            error!("Failed to reconcile HTTPRoute: {}", e);
            metrics::record_reconciliation_error(KIND_HTTP_ROUTE, duration);
            metrics::record_error(KIND_HTTP_ROUTE, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Re-fetch a resource and evaluate its readiness; the in-hand copy is stale
/// after the reconciler patched status.
async fn fetch_ready<T>(
    client: &Client,
    resource: &T,
    readiness: impl Fn(&T) -> Option<bool>,
) -> bool
where
    T: kube::Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + ResourceExt,
{
    let namespace = resource.namespace().unwrap_or_default();
    let api: Api<T> = Api::namespaced(client.clone(), &namespace);

    match api.get_opt(&resource.name_any()).await {
        Ok(Some(updated)) => readiness(&updated).unwrap_or(false),
        _ => false,
    }
}

/// Requeue quickly while not ready, lazily once ready.
fn requeue_for(ready: bool) -> Action {
    if ready {
        Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS))
    } else {
        Action::requeue(Duration::from_secs(REQUEUE_WHEN_NOT_READY_SECS))
    }
}

/// Generic error policy: requeue after a fixed delay.
fn error_policy<T>(_resource: Arc<T>, _err: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    T: std::fmt::Debug,
{
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
