// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! cloudflared Kubernetes resource builders
//!
//! This module provides functions to build the child resources of a
//! `CloudflareTunnel` (`Deployment`, token `Secret`, `ConfigMap`). All
//! functions are pure and easily testable; the reconciler applies the results.

use crate::cloudflared::{metrics_port, TunnelConfig};
use crate::constants::{
    DEFAULT_CLOUDFLARED_IMAGE, DEFAULT_CLOUDFLARED_REPLICAS, LIVENESS_FAILURE_THRESHOLD,
    LIVENESS_INITIAL_DELAY_SECS, LIVENESS_PERIOD_SECS, LIVENESS_TIMEOUT_SECS,
    READINESS_FAILURE_THRESHOLD, READINESS_INITIAL_DELAY_SECS, READINESS_PERIOD_SECS,
    READINESS_TIMEOUT_SECS, TUNNEL_TOKEN_ENV_VAR, TUNNEL_TOKEN_SECRET_KEY,
};
use crate::crd::CloudflareTunnel;
use crate::labels::{
    APP_NAME_CLOUDFLARED, COMPONENT_TUNNEL, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_NAME,
    MANAGED_BY_CFGATE,
};
use anyhow::Result;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Secret, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Name of the cloudflared Deployment for a tunnel.
#[must_use]
pub fn deployment_name(tunnel_name: &str) -> String {
    format!("{tunnel_name}-cloudflared")
}

/// Name of the cloudflared ConfigMap for a tunnel (config-file mode).
#[must_use]
pub fn config_map_name(tunnel_name: &str) -> String {
    format!("{tunnel_name}-cloudflared-config")
}

/// Name of the connector token Secret for a tunnel.
#[must_use]
pub fn token_secret_name(tunnel_name: &str) -> String {
    format!("{tunnel_name}-tunnel-token")
}

/// Standard labels for all child resources of a tunnel.
#[must_use]
pub fn build_labels(tunnel_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), APP_NAME_CLOUDFLARED.into());
    labels.insert(K8S_INSTANCE.into(), tunnel_name.into());
    labels.insert(K8S_COMPONENT.into(), COMPONENT_TUNNEL.into());
    labels.insert(K8S_MANAGED_BY.into(), MANAGED_BY_CFGATE.into());
    labels
}

/// Pod selector labels (a stable subset of [`build_labels`]).
#[must_use]
pub fn build_selector(tunnel_name: &str) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(K8S_NAME.into(), APP_NAME_CLOUDFLARED.into());
    selector.insert(K8S_INSTANCE.into(), tunnel_name.into());
    selector
}

/// Controller owner reference pointing at the tunnel, when its uid is known.
#[must_use]
pub fn owner_reference(tunnel: &CloudflareTunnel) -> Option<OwnerReference> {
    tunnel.controller_owner_ref(&())
}

/// Build the `Opaque` Secret carrying the connector token.
#[must_use]
pub fn build_token_secret(tunnel: &CloudflareTunnel, token: &str) -> Secret {
    let name = tunnel.name_any();
    let mut string_data = BTreeMap::new();
    string_data.insert(TUNNEL_TOKEN_SECRET_KEY.to_string(), token.to_string());

    Secret {
        metadata: ObjectMeta {
            name: Some(token_secret_name(&name)),
            namespace: tunnel.namespace(),
            labels: Some(build_labels(&name)),
            owner_references: owner_reference(tunnel).map(|r| vec![r]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Build the ConfigMap mirroring the rendered config document
/// (config-file mode only).
///
/// # Errors
///
/// Returns rendering errors from the config document.
pub fn build_config_map(tunnel: &CloudflareTunnel, config: &TunnelConfig) -> Result<ConfigMap> {
    let name = tunnel.name_any();
    let mut data = BTreeMap::new();
    data.insert("config.yaml".to_string(), config.render()?);

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(&name)),
            namespace: tunnel.namespace(),
            labels: Some(build_labels(&name)),
            owner_references: owner_reference(tunnel).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Build the cloudflared Deployment for a tunnel.
///
/// The agent authenticates via `TUNNEL_TOKEN` drawn from the token secret and
/// exposes `/ready` on the metrics port for both probes.
#[must_use]
pub fn build_deployment(tunnel: &CloudflareTunnel) -> Deployment {
    let name = tunnel.name_any();
    let labels = build_labels(&name);
    let selector = build_selector(&name);

    let replicas = tunnel
        .spec
        .cloudflared
        .replicas
        .unwrap_or(DEFAULT_CLOUDFLARED_REPLICAS);

    let container = build_container(tunnel);

    let pod_annotations = tunnel.spec.cloudflared.pod_annotations.clone();

    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(&name)),
            namespace: tunnel.namespace(),
            labels: Some(labels.clone()),
            owner_references: owner_reference(tunnel).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: pod_annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: tunnel.spec.cloudflared.node_selector.clone(),
                    tolerations: tunnel.spec.cloudflared.tolerations.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the cloudflared container spec.
fn build_container(tunnel: &CloudflareTunnel) -> Container {
    let name = tunnel.name_any();
    let port = metrics_port(tunnel);
    let (liveness, readiness) = build_probes(port);

    let image = tunnel
        .spec
        .cloudflared
        .image
        .clone()
        .unwrap_or_else(|| DEFAULT_CLOUDFLARED_IMAGE.to_string());

    let pull_policy = tunnel
        .spec
        .cloudflared
        .image_pull_policy
        .clone()
        .unwrap_or_else(|| "IfNotPresent".to_string());

    Container {
        name: APP_NAME_CLOUDFLARED.to_string(),
        image: Some(image),
        image_pull_policy: Some(pull_policy),
        args: Some(build_args(tunnel)),
        env: Some(vec![EnvVar {
            name: TUNNEL_TOKEN_ENV_VAR.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(token_secret_name(&name)),
                    key: TUNNEL_TOKEN_SECRET_KEY.to_string(),
                    optional: None,
                }),
                ..Default::default()
            }),
        }]),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        liveness_probe: Some(liveness),
        readiness_probe: Some(readiness),
        resources: Some(build_resources(tunnel)),
        ..Default::default()
    }
}

/// Resource requirements, with conservative defaults when unspecified.
fn build_resources(tunnel: &CloudflareTunnel) -> ResourceRequirements {
    if let Some(resources) = &tunnel.spec.cloudflared.resources {
        return resources.clone();
    }

    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity("100m".to_string()));
    requests.insert("memory".to_string(), Quantity("128Mi".to_string()));

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity("500m".to_string()));
    limits.insert("memory".to_string(), Quantity("256Mi".to_string()));

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

/// Liveness and readiness probes hitting `/ready` on the metrics port.
#[must_use]
pub fn build_probes(port: i32) -> (Probe, Probe) {
    let liveness = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/ready".to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(LIVENESS_INITIAL_DELAY_SECS),
        period_seconds: Some(LIVENESS_PERIOD_SECS),
        timeout_seconds: Some(LIVENESS_TIMEOUT_SECS),
        failure_threshold: Some(LIVENESS_FAILURE_THRESHOLD),
        ..Default::default()
    };

    let readiness = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/ready".to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(READINESS_INITIAL_DELAY_SECS),
        period_seconds: Some(READINESS_PERIOD_SECS),
        timeout_seconds: Some(READINESS_TIMEOUT_SECS),
        failure_threshold: Some(READINESS_FAILURE_THRESHOLD),
        ..Default::default()
    };

    (liveness, readiness)
}

/// Command line arguments for the agent. The protocol flag is omitted when
/// `auto`; the token is read from the environment rather than the command line.
#[must_use]
pub fn build_args(tunnel: &CloudflareTunnel) -> Vec<String> {
    let mut args = vec!["tunnel".to_string(), "--no-autoupdate".to_string()];

    args.push("--metrics".to_string());
    args.push(format!("0.0.0.0:{}", metrics_port(tunnel)));

    if let Some(protocol) = tunnel
        .spec
        .cloudflared
        .protocol
        .as_deref()
        .filter(|p| *p != "auto")
    {
        args.push("--protocol".to_string());
        args.push(protocol.to_string());
    }

    if let Some(extra) = &tunnel.spec.cloudflared.extra_args {
        args.extend(extra.iter().cloned());
    }

    args.push("run".to_string());
    args.push("--token".to_string());
    args.push(format!("$({TUNNEL_TOKEN_ENV_VAR})"));

    args
}

#[cfg(test)]
#[path = "cloudflared_resources_tests.rs"]
mod cloudflared_resources_tests;
