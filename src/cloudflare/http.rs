// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! reqwest-backed implementation of [`CloudflareApi`] against the v4 REST API.
//!
//! Every response is wrapped in the standard Cloudflare envelope
//! (`{"success": bool, "errors": [...], "result": ...}`); this module unwraps
//! it and maps failures into the [`CloudflareError`] taxonomy so reconcilers
//! can classify transient vs. terminal errors uniformly.

use super::{
    AccessApp, AccessPolicyPayload, CloudflareApi, DnsRecord, MtlsCertificate, ServiceToken,
    Tunnel, TunnelConnection, Zone,
};
use crate::cf_errors::CloudflareError;
use crate::constants::CLOUDFLARE_API_BASE;
use crate::metrics;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request timeout for all Cloudflare API calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiErrorBody>,
    result: Option<T>,
}

/// Production Cloudflare API client.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    /// Create a client for the given bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(token: &str) -> Result<Self, CloudflareError> {
        Self::with_base_url(token, CLOUDFLARE_API_BASE)
    }

    /// Create a client against a non-default endpoint (used by tests).
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, CloudflareError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CloudflareError::Transport {
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, CloudflareError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "Cloudflare API request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                metrics::record_cloudflare_request("error");
                return Err(error.into());
            }
        };
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                metrics::record_cloudflare_request("error");
                let text = response.text().await.unwrap_or_default();
                return Err(CloudflareError::InvalidCredentials { reason: text });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                metrics::record_cloudflare_request("rate_limited");
                let text = response.text().await.unwrap_or_default();
                return Err(CloudflareError::RateLimited { message: text });
            }
            s if s.is_server_error() => {
                metrics::record_cloudflare_request("error");
                return Err(CloudflareError::Transport {
                    reason: format!("HTTP {s} from Cloudflare API"),
                });
            }
            _ => metrics::record_cloudflare_request("success"),
        }

        let envelope: Envelope<T> =
            response
                .json()
                .await
                .map_err(|e| CloudflareError::Transport {
                    reason: format!("decoding response: {e}"),
                })?;

        if !envelope.success {
            let first = envelope.errors.first();
            return Err(CloudflareError::Api {
                code: first.map_or(0, |e| e.code),
                message: first.map_or_else(
                    || "unknown Cloudflare API error".to_string(),
                    |e| e.message.clone(),
                ),
            });
        }

        envelope.result.ok_or(CloudflareError::Api {
            code: 0,
            message: "missing result in Cloudflare API response".to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CloudflareError> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    async fn delete(&self, path: &str) -> Result<(), CloudflareError> {
        // DELETE responses carry an id-only result we discard.
        let _: serde_json::Value = self.request::<_, ()>(Method::DELETE, path, None).await?;
        Ok(())
    }
}

#[async_trait]
impl CloudflareApi for RestClient {
    async fn verify_token(&self) -> Result<(), CloudflareError> {
        let _: serde_json::Value = self.get("/user/tokens/verify").await?;
        Ok(())
    }

    async fn account_id_by_name(&self, name: &str) -> Result<String, CloudflareError> {
        #[derive(Deserialize)]
        struct Account {
            id: String,
            name: String,
        }

        let accounts: Vec<Account> = self.get(&format!("/accounts?name={name}")).await?;
        accounts
            .into_iter()
            .find(|a| a.name == name)
            .map(|a| a.id)
            .ok_or_else(|| CloudflareError::NotFound {
                kind: "account",
                name: name.to_string(),
            })
    }

    async fn zone_by_name(&self, name: &str) -> Result<Option<Zone>, CloudflareError> {
        let zones: Vec<Zone> = self.get(&format!("/zones?name={name}")).await?;
        Ok(zones.into_iter().find(|z| z.name == name))
    }

    async fn list_dns_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>, CloudflareError> {
        self.get(&format!("/zones/{zone_id}/dns_records?per_page=5000"))
            .await
    }

    async fn create_dns_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, CloudflareError> {
        self.request(
            Method::POST,
            &format!("/zones/{zone_id}/dns_records"),
            Some(record),
        )
        .await
    }

    async fn update_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, CloudflareError> {
        self.request(
            Method::PUT,
            &format!("/zones/{zone_id}/dns_records/{record_id}"),
            Some(record),
        )
        .await
    }

    async fn delete_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete(&format!("/zones/{zone_id}/dns_records/{record_id}"))
            .await
    }

    async fn list_tunnels(&self, account_id: &str) -> Result<Vec<Tunnel>, CloudflareError> {
        self.get(&format!(
            "/accounts/{account_id}/cfd_tunnel?is_deleted=false"
        ))
        .await
    }

    async fn create_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Tunnel, CloudflareError> {
        #[derive(Serialize)]
        struct CreateTunnel<'a> {
            name: &'a str,
            config_src: &'a str,
        }

        self.request(
            Method::POST,
            &format!("/accounts/{account_id}/cfd_tunnel"),
            Some(&CreateTunnel {
                name,
                config_src: "cloudflare",
            }),
        )
        .await
    }

    async fn delete_tunnel(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete(&format!("/accounts/{account_id}/cfd_tunnel/{tunnel_id}"))
            .await
    }

    async fn tunnel_token(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<String, CloudflareError> {
        self.get(&format!(
            "/accounts/{account_id}/cfd_tunnel/{tunnel_id}/token"
        ))
        .await
    }

    async fn tunnel_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Vec<TunnelConnection>, CloudflareError> {
        self.get(&format!(
            "/accounts/{account_id}/cfd_tunnel/{tunnel_id}/connections"
        ))
        .await
    }

    async fn list_access_apps(&self, account_id: &str) -> Result<Vec<AccessApp>, CloudflareError> {
        self.get(&format!("/accounts/{account_id}/access/apps"))
            .await
    }

    async fn create_access_app(
        &self,
        account_id: &str,
        app: &AccessApp,
    ) -> Result<AccessApp, CloudflareError> {
        self.request(
            Method::POST,
            &format!("/accounts/{account_id}/access/apps"),
            Some(app),
        )
        .await
    }

    async fn update_access_app(
        &self,
        account_id: &str,
        app_id: &str,
        app: &AccessApp,
    ) -> Result<AccessApp, CloudflareError> {
        self.request(
            Method::PUT,
            &format!("/accounts/{account_id}/access/apps/{app_id}"),
            Some(app),
        )
        .await
    }

    async fn delete_access_app(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete(&format!("/accounts/{account_id}/access/apps/{app_id}"))
            .await
    }

    async fn list_access_policies(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<Vec<AccessPolicyPayload>, CloudflareError> {
        self.get(&format!(
            "/accounts/{account_id}/access/apps/{app_id}/policies"
        ))
        .await
    }

    async fn create_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy: &AccessPolicyPayload,
    ) -> Result<AccessPolicyPayload, CloudflareError> {
        self.request(
            Method::POST,
            &format!("/accounts/{account_id}/access/apps/{app_id}/policies"),
            Some(policy),
        )
        .await
    }

    async fn update_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
        policy: &AccessPolicyPayload,
    ) -> Result<AccessPolicyPayload, CloudflareError> {
        self.request(
            Method::PUT,
            &format!("/accounts/{account_id}/access/apps/{app_id}/policies/{policy_id}"),
            Some(policy),
        )
        .await
    }

    async fn delete_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete(&format!(
            "/accounts/{account_id}/access/apps/{app_id}/policies/{policy_id}"
        ))
        .await
    }

    async fn list_service_tokens(
        &self,
        account_id: &str,
    ) -> Result<Vec<ServiceToken>, CloudflareError> {
        self.get(&format!("/accounts/{account_id}/access/service_tokens"))
            .await
    }

    async fn create_service_token(
        &self,
        account_id: &str,
        name: &str,
        duration: &str,
    ) -> Result<ServiceToken, CloudflareError> {
        #[derive(Serialize)]
        struct CreateToken<'a> {
            name: &'a str,
            duration: &'a str,
        }

        self.request(
            Method::POST,
            &format!("/accounts/{account_id}/access/service_tokens"),
            Some(&CreateToken { name, duration }),
        )
        .await
    }

    async fn upsert_mtls_certificate(
        &self,
        account_id: &str,
        name: &str,
        certificate: &str,
        hostnames: &[String],
    ) -> Result<MtlsCertificate, CloudflareError> {
        #[derive(Serialize)]
        struct UploadCertificate<'a> {
            name: &'a str,
            certificate: &'a str,
            associated_hostnames: &'a [String],
        }

        let existing: Vec<MtlsCertificate> = self
            .get(&format!("/accounts/{account_id}/access/certificates"))
            .await?;

        let payload = UploadCertificate {
            name,
            certificate,
            associated_hostnames: hostnames,
        };

        if let Some(current) = existing.into_iter().find(|c| c.name == name) {
            self.request(
                Method::PUT,
                &format!("/accounts/{account_id}/access/certificates/{}", current.id),
                Some(&payload),
            )
            .await
        } else {
            self.request(
                Method::POST,
                &format!("/accounts/{account_id}/access/certificates"),
                Some(&payload),
            )
            .await
        }
    }
}
