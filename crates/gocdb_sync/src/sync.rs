// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provisioning loop: registry endpoints in, AMS users, AUTHN bindings
//! and topic ACLs out.

use tracing::{debug, error, info, warn};

use dn_normalizer::Normalizer;
use http_client::{BaseApiClient, ClientOptions, HttpError};

use crate::ams::{union_acl, AmsClient, AmsError, TopicOutcome, UserOutcome};
use crate::authn::{AuthnClient, AuthnError, Binding, BindingOutcome};
use crate::config::{Config, TopicMode};
use crate::registry::{RegistryClient, RegistryError, ServiceEndpoint};
use crate::report::{AclChange, InvalidDn, PlannedEndpoint, ServiceTypeReport, SyncReport};
use crate::site_cache::SiteContactCache;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("building AMS/AUTHN client: {0}")]
    Http(#[from] HttpError),
}

#[derive(Debug, thiserror::Error)]
enum EndpointError {
    #[error(transparent)]
    Ams(#[from] AmsError),
    #[error(transparent)]
    Authn(#[from] AuthnError),
}

impl EndpointError {
    fn status(&self) -> Option<u16> {
        match self {
            EndpointError::Ams(err) => err.status(),
            EndpointError::Authn(err) => err.status(),
        }
    }
}

/// Choices made per invocation rather than per config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// TLS verification for AMS and AUTHN.
    pub verify: bool,
    pub topic_mode: TopicMode,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub topic_mode: TopicMode,
    pub users_role: String,
    pub default_email: String,
    pub service_uuid: String,
    pub service_host: String,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct Syncer {
    registry: RegistryClient,
    ams: AmsClient,
    authn: AuthnClient,
    normalizer: Normalizer,
    settings: SyncSettings,
}

/// `<service type>---<hostname>---<site>`, dots replaced by dashes.
pub fn user_name(endpoint: &ServiceEndpoint) -> String {
    [&endpoint.service_type, &endpoint.hostname, &endpoint.sitename]
        .map(|part| part.replace('.', "-"))
        .join("---")
}

pub fn endpoint_topic(endpoint: &ServiceEndpoint) -> String {
    format!(
        "SITE_{}_ENDPOINT_{}",
        endpoint.sitename.replace('.', "-"),
        endpoint.primary_key.replace(' ', "")
    )
}

pub fn service_type_topic(service_type: &str) -> String {
    service_type.replace('.', "-")
}

impl Syncer {
    pub fn new(
        registry: RegistryClient,
        ams: AmsClient,
        authn: AuthnClient,
        normalizer: Normalizer,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            ams,
            authn,
            normalizer,
            settings,
        }
    }

    pub fn from_config(config: &Config, options: &RunOptions) -> Result<Self, SetupError> {
        let registry = RegistryClient::from_config(&config.registry)?;
        let http = BaseApiClient::new(&ClientOptions {
            verify_tls: options.verify,
            identity: None,
        })?;
        let ams = AmsClient::new(
            http.clone(),
            &config.ams.host,
            &config.ams.project,
            &config.ams.token,
        );
        let authn = AuthnClient::new(http, &config.authn.host, &config.authn.token);
        let settings = SyncSettings {
            topic_mode: options.topic_mode,
            users_role: config.ams.users_role.clone(),
            default_email: config.ams.default_email.clone(),
            service_uuid: config.authn.service_uuid.clone(),
            service_host: config.authn.service_host.clone(),
            dry_run: options.dry_run,
        };
        Ok(Self::new(
            registry,
            ams,
            authn,
            Normalizer::new(config.sync.rdn_profile),
            settings,
        ))
    }

    /// Provisions every endpoint of every service type, in order. Failures
    /// are logged and recorded in the report; they never stop the run.
    pub async fn run(&self, service_types: &[String]) -> SyncReport {
        let mut cache = SiteContactCache::new(self.settings.default_email.clone());
        let mut report = SyncReport {
            dry_run: self.settings.dry_run,
            service_types: Vec::with_capacity(service_types.len()),
        };
        for service_type in service_types {
            let type_report = self.sync_service_type(service_type, &mut cache).await;
            type_report.log_summary();
            report.service_types.push(type_report);
        }
        debug!(sites = cache.len(), "site contact emails cached");
        report
    }

    async fn sync_service_type(
        &self,
        service_type: &str,
        cache: &mut SiteContactCache,
    ) -> ServiceTypeReport {
        let mut report = ServiceTypeReport::new(service_type);
        info!(%service_type, "syncing service type");

        let endpoints = match self.registry.endpoints(service_type).await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                error!(%service_type, error = %err, "couldn't fetch endpoints");
                report.fetch_error = Some(err.to_string());
                return report;
            }
        };
        report.endpoints = endpoints.len();

        let mut topic_users = vec![];
        for endpoint in &endpoints {
            match self.sync_endpoint(endpoint, cache, &mut report).await {
                Ok(Some(user)) => topic_users.push(user),
                Ok(None) => {}
                Err(err) => {
                    error!(
                        %service_type,
                        endpoint = %endpoint.hostname,
                        status = ?err.status(),
                        error = %err,
                        "endpoint failed"
                    );
                    report.failed.push(user_name(endpoint));
                }
            }
        }

        if self.settings.topic_mode == TopicMode::ServiceType && !self.settings.dry_run {
            let topic = service_type_topic(service_type);
            if let Err(err) = self.grant_service_type_topic(&topic, &topic_users, &mut report).await {
                error!(%service_type, %topic, error = %err, "couldn't update topic ACL");
            }
        }
        report
    }

    /// Returns the user name once the endpoint's user and binding are in place.
    async fn sync_endpoint(
        &self,
        endpoint: &ServiceEndpoint,
        cache: &mut SiteContactCache,
        report: &mut ServiceTypeReport,
    ) -> Result<Option<String>, EndpointError> {
        let Some(raw_dn) = endpoint.host_dn() else {
            debug!(endpoint = %endpoint.hostname, "no DN registered");
            report.missing_dns.push(endpoint.hostname.clone());
            return Ok(None);
        };

        let user = user_name(endpoint);
        let dn = match self.normalizer.normalize_registry(raw_dn) {
            Ok(dn) => dn,
            Err(err) => {
                error!(endpoint = %endpoint.hostname, dn = %raw_dn, error = %err, "invalid DN");
                report.invalid_dns.push(InvalidDn {
                    hostname: endpoint.hostname.clone(),
                    dn: raw_dn.to_owned(),
                    reason: err.to_string(),
                });
                return Ok(None);
            }
        };
        let email = cache.contact_email(&self.registry, &endpoint.sitename).await;

        if self.settings.dry_run {
            let topic = match self.settings.topic_mode {
                TopicMode::Endpoint => endpoint_topic(endpoint),
                TopicMode::ServiceType => service_type_topic(&endpoint.service_type),
            };
            info!(%user, %dn, %email, %topic, "would provision");
            report.planned.push(PlannedEndpoint {
                user,
                email,
                dn,
                topic,
            });
            return Ok(None);
        }

        let (ams_user, user_outcome) = self
            .ams
            .ensure_user(&user, &email, &self.settings.users_role)
            .await?;
        if user_outcome == UserOutcome::Created {
            report.users_created.push(user.clone());
        }

        let binding = Binding::x509(
            &user,
            &self.settings.service_uuid,
            &self.settings.service_host,
            &dn,
            &ams_user.uuid,
        );
        match self.authn.ensure_binding(&binding).await {
            Ok(BindingOutcome::Created) => report.bindings_created.push(user.clone()),
            Ok(BindingOutcome::Updated) => report.bindings_updated.push(user.clone()),
            Ok(BindingOutcome::Unchanged) => {}
            Err(err) => {
                if user_outcome == UserOutcome::Created {
                    self.roll_back_user(&user).await;
                    report.users_created.retain(|u| u != &user);
                }
                return Err(err.into());
            }
        }

        if self.settings.topic_mode == TopicMode::Endpoint {
            let topic = endpoint_topic(endpoint);
            let existing = match self.ams.ensure_topic(&topic).await? {
                TopicOutcome::Created => vec![],
                TopicOutcome::Existing => self.ams.topic_acl(&topic).await?,
            };
            self.grant(&topic, &existing, &[user.clone()], report).await?;
        }
        Ok(Some(user))
    }

    async fn roll_back_user(&self, user: &str) {
        match self.ams.delete_user(user).await {
            Ok(()) => warn!(%user, "deleted AMS user after binding failure"),
            Err(err) => error!(%user, error = %err, "couldn't delete AMS user after binding failure"),
        }
    }

    async fn grant_service_type_topic(
        &self,
        topic: &str,
        users: &[String],
        report: &mut ServiceTypeReport,
    ) -> Result<(), AmsError> {
        let existing = match self.ams.topic_acl(topic).await {
            Ok(existing) => existing,
            Err(err) if err.is_not_found() => vec![],
            Err(err) => return Err(err),
        };
        self.grant(topic, &existing, users, report).await
    }

    /// Adds `users` to the topic ACL unless they are all there already.
    async fn grant(
        &self,
        topic: &str,
        existing: &[String],
        users: &[String],
        report: &mut ServiceTypeReport,
    ) -> Result<(), AmsError> {
        let added: Vec<String> = union_acl(&[], users)
            .into_iter()
            .filter(|u| !existing.contains(u))
            .collect();
        if added.is_empty() {
            debug!(%topic, "topic ACL up to date");
            return Ok(());
        }
        let merged = union_acl(existing, users);
        self.ams.modify_topic_acl(topic, &merged).await?;
        info!(%topic, ?added, "modified topic ACL");
        report.acl_changes.push(AclChange {
            topic: topic.to_owned(),
            added,
        });
        Ok(())
    }
}
