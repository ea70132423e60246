// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access application and rule convergence on top of the raw API client.
//!
//! Applications follow the same ownership protocol as DNS records: cfgate tags
//! every application it creates with the ownership sentinel and refuses to
//! touch applications without it. Rules attached to an owned application are
//! considered wholly managed; they are upserted in declared precedence order
//! and stale ones are removed.

use super::{AccessApp, AccessPolicyPayload, AccessRulePayload, CloudflareApi, ServiceToken};
use crate::cf_errors::CloudflareError;
use crate::constants::OWNERSHIP_SENTINEL;
use crate::crd;
use std::sync::Arc;
use tracing::{debug, info};

/// Access operations scoped to one API client.
pub struct AccessService {
    client: Arc<dyn CloudflareApi>,
}

impl AccessService {
    /// Create a service over the given client.
    #[must_use]
    pub fn new(client: Arc<dyn CloudflareApi>) -> Self {
        Self { client }
    }

    /// Adopt the application protecting `domain`, or create a new one.
    ///
    /// A foreign application (no ownership tag) is returned untouched with
    /// `modified = false`; owned applications are updated when drifted.
    ///
    /// # Errors
    ///
    /// Returns API errors from list, create or update.
    pub async fn adopt_or_create_app(
        &self,
        account_id: &str,
        desired: &AccessApp,
    ) -> Result<(AccessApp, bool), CloudflareError> {
        let apps = self.client.list_access_apps(account_id).await?;

        let existing = apps.into_iter().find(|a| a.domain == desired.domain);

        let Some(existing) = existing else {
            let created = self.client.create_access_app(account_id, desired).await?;
            info!(app = %created.name, app_id = %created.id, "created Access application");
            return Ok((created, true));
        };

        if !is_app_owned(&existing) {
            debug!(app = %existing.name, "existing Access application is foreign; leaving untouched");
            return Ok((existing, false));
        }

        if apps_match(&existing, desired) {
            return Ok((existing, false));
        }

        let updated = self
            .client
            .update_access_app(account_id, &existing.id, desired)
            .await?;
        info!(app = %updated.name, app_id = %updated.id, "updated Access application");
        Ok((updated, true))
    }

    /// Converge the rules of an owned application onto the desired set.
    ///
    /// Rules are matched by name: missing ones are created, drifted ones
    /// updated, stale ones deleted. Desired rules must already be sorted by
    /// precedence.
    ///
    /// # Errors
    ///
    /// Returns API errors from any rule operation.
    pub async fn sync_rules(
        &self,
        account_id: &str,
        app_id: &str,
        desired: &[AccessPolicyPayload],
    ) -> Result<(), CloudflareError> {
        let existing = self.client.list_access_policies(account_id, app_id).await?;

        for rule in desired {
            match existing.iter().find(|e| e.name == rule.name) {
                None => {
                    self.client
                        .create_access_policy(account_id, app_id, rule)
                        .await?;
                    debug!(rule = %rule.name, "created Access rule");
                }
                Some(current) if !rules_match(current, rule) => {
                    self.client
                        .update_access_policy(account_id, app_id, &current.id, rule)
                        .await?;
                    debug!(rule = %rule.name, "updated Access rule");
                }
                Some(_) => {}
            }
        }

        for stale in existing
            .iter()
            .filter(|e| !desired.iter().any(|d| d.name == e.name))
        {
            self.client
                .delete_access_policy(account_id, app_id, &stale.id)
                .await?;
            debug!(rule = %stale.name, "deleted stale Access rule");
        }

        Ok(())
    }

    /// Ensure a service token with the given name exists, creating it when
    /// missing. Returns the freshly created token (with its secret) or `None`
    /// when it already existed; secrets are only returned at creation time.
    ///
    /// # Errors
    ///
    /// Returns API errors from list or create.
    pub async fn ensure_service_token(
        &self,
        account_id: &str,
        name: &str,
        duration: &str,
    ) -> Result<Option<ServiceToken>, CloudflareError> {
        let tokens = self.client.list_service_tokens(account_id).await?;
        if tokens.iter().any(|t| t.name == name) {
            return Ok(None);
        }

        let token = self
            .client
            .create_service_token(account_id, name, duration)
            .await?;
        info!(token = %token.name, token_id = %token.id, "created Access service token");
        Ok(Some(token))
    }

    /// Upload or refresh the mTLS CA certificate for the application.
    ///
    /// # Errors
    ///
    /// Returns API errors from the upsert.
    pub async fn ensure_mtls_certificate(
        &self,
        account_id: &str,
        name: &str,
        certificate: &str,
        hostnames: &[String],
    ) -> Result<String, CloudflareError> {
        let cert = self
            .client
            .upsert_mtls_certificate(account_id, name, certificate, hostnames)
            .await?;
        Ok(cert.id)
    }
}

/// True when the application carries the cfgate ownership tag.
#[must_use]
pub fn is_app_owned(app: &AccessApp) -> bool {
    app.tags.iter().any(|t| t.contains(OWNERSHIP_SENTINEL))
}

/// Applications agree when every spec-controlled field matches.
#[must_use]
pub fn apps_match(a: &AccessApp, b: &AccessApp) -> bool {
    a.name == b.name
        && a.domain == b.domain
        && a.r#type == b.r#type
        && a.session_duration == b.session_duration
        && a.path == b.path
        && a.skip_interstitial == b.skip_interstitial
        && a.enable_binding_cookie == b.enable_binding_cookie
        && a.http_only_cookie_attribute == b.http_only_cookie_attribute
        && a.same_site_cookie_attribute == b.same_site_cookie_attribute
        && a.custom_deny_message == b.custom_deny_message
        && a.custom_deny_url == b.custom_deny_url
        && a.logo_url == b.logo_url
}

/// Rules agree when everything except the server-assigned id matches.
#[must_use]
pub fn rules_match(a: &AccessPolicyPayload, b: &AccessPolicyPayload) -> bool {
    a.name == b.name
        && a.decision == b.decision
        && a.precedence == b.precedence
        && a.include == b.include
        && a.exclude == b.exclude
        && a.require == b.require
        && a.session_duration == b.session_duration
        && a.purpose_justification_required == b.purpose_justification_required
        && a.approval_required == b.approval_required
}

/// Expand one CRD identity rule into its API payloads.
///
/// List-valued variants fan out to one payload per element, matching how the
/// Access API represents them.
#[must_use]
pub fn convert_rule(rule: &crd::AccessRule) -> Vec<AccessRulePayload> {
    let mut payloads = Vec::new();

    if let Some(email) = &rule.email {
        for address in &email.addresses {
            payloads.push(AccessRulePayload::Email {
                email: address.clone(),
            });
        }
    }
    if let Some(domain) = &rule.email_domain {
        payloads.push(AccessRulePayload::EmailDomain {
            domain: domain.domain.clone(),
        });
    }
    if let Some(list) = &rule.email_list_ref {
        if let Some(id) = &list.id {
            payloads.push(AccessRulePayload::EmailList { id: id.clone() });
        }
    }
    if let Some(ip_range) = &rule.ip_range {
        for range in &ip_range.ranges {
            payloads.push(AccessRulePayload::Ip { ip: range.clone() });
        }
    }
    if let Some(country) = &rule.country {
        for code in &country.codes {
            payloads.push(AccessRulePayload::Geo {
                country_code: code.clone(),
            });
        }
    }
    if rule.everyone == Some(true) {
        payloads.push(AccessRulePayload::Everyone {});
    }
    if rule.certificate == Some(true) {
        payloads.push(AccessRulePayload::Certificate {});
    }
    if let Some(common_name) = &rule.common_name {
        payloads.push(AccessRulePayload::CommonName {
            common_name: common_name.value.clone(),
        });
    }
    if rule.service_token == Some(true) {
        payloads.push(AccessRulePayload::AnyValidServiceToken {});
    }
    if let Some(group) = &rule.group_ref {
        if let Some(id) = &group.cloudflare_id {
            payloads.push(AccessRulePayload::Group { id: id.clone() });
        }
    }
    if let Some(gsuite) = &rule.gsuite {
        for group in &gsuite.groups {
            payloads.push(AccessRulePayload::Gsuite {
                identity_provider_id: gsuite.identity_provider_id.clone(),
                email: group.clone(),
            });
        }
    }
    if let Some(github) = &rule.github {
        let organization = github.organization.clone().unwrap_or_default();
        if github.teams.is_empty() {
            payloads.push(AccessRulePayload::Github {
                identity_provider_id: github.identity_provider_id.clone(),
                name: organization,
                team: None,
            });
        } else {
            for team in &github.teams {
                payloads.push(AccessRulePayload::Github {
                    identity_provider_id: github.identity_provider_id.clone(),
                    name: organization.clone(),
                    team: Some(team.clone()),
                });
            }
        }
    }
    if let Some(azure) = &rule.azure {
        for group in &azure.groups {
            payloads.push(AccessRulePayload::AzureAd {
                identity_provider_id: azure.identity_provider_id.clone(),
                id: group.clone(),
            });
        }
    }
    if let Some(okta) = &rule.okta {
        for group in &okta.groups {
            payloads.push(AccessRulePayload::Okta {
                identity_provider_id: okta.identity_provider_id.clone(),
                name: group.clone(),
            });
        }
    }
    if let Some(saml) = &rule.saml {
        payloads.push(AccessRulePayload::Saml {
            identity_provider_id: saml.identity_provider_id.clone(),
            attribute_name: saml.attribute_name.clone(),
            attribute_value: saml.attribute_value.clone(),
        });
    }

    payloads
}

/// Convert the CRD rule list into API payloads ordered by precedence.
///
/// Missing precedences fall back to declaration order after all explicit
/// values.
#[must_use]
pub fn convert_policy_rules(rules: &[crd::AccessPolicyRule]) -> Vec<AccessPolicyPayload> {
    let mut payloads: Vec<AccessPolicyPayload> = rules
        .iter()
        .enumerate()
        .map(|(index, rule)| AccessPolicyPayload {
            id: String::new(),
            name: rule.name.clone(),
            decision: rule
                .decision
                .clone()
                .unwrap_or_else(|| "allow".to_string()),
            precedence: rule
                .precedence
                .unwrap_or_else(|| i32::try_from(index).unwrap_or(i32::MAX - 10_000) + 10_000),
            include: rule.include.iter().flat_map(convert_rule).collect(),
            exclude: rule.exclude.iter().flat_map(convert_rule).collect(),
            require: rule.require.iter().flat_map(convert_rule).collect(),
            session_duration: rule.session_duration.clone(),
            purpose_justification_required: rule.purpose_justification_required,
            purpose_justification_prompt: rule.purpose_justification_prompt.clone(),
            approval_required: rule.approval_required,
        })
        .collect();

    payloads.sort_by_key(|p| p.precedence);
    payloads
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod access_tests;
