// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use http_client::{BaseApiClient, HttpError};

#[derive(Debug, thiserror::Error)]
pub enum AuthnError {
    #[error("creating binding {name}: {source}")]
    Create { name: String, source: HttpError },
    #[error("fetching binding {name}: {source}")]
    Fetch { name: String, source: HttpError },
    #[error("updating binding {name}: {source}")]
    Update { name: String, source: HttpError },
    /// AUTHN refused the binding as a duplicate, yet holds no binding by this
    /// name: the DN is bound under a different name.
    #[error("binding {name}: DN {dn:?} is already bound under another name")]
    DnAlreadyBound { name: String, dn: String },
}

impl AuthnError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthnError::Create { source, .. }
            | AuthnError::Fetch { source, .. }
            | AuthnError::Update { source, .. } => source.status(),
            AuthnError::DnAlreadyBound { .. } => Some(409),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "x509")]
    X509,
}

/// Links a certificate DN to an AMS user for one service host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub service_uuid: String,
    pub host: String,
    /// Canonical DN the AUTHN service matches client certificates against.
    pub auth_identifier: String,
    /// The AMS user's uuid.
    pub unique_key: String,
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_auth: Option<String>,
}

impl Binding {
    pub fn x509(
        name: impl Into<String>,
        service_uuid: impl Into<String>,
        host: impl Into<String>,
        auth_identifier: impl Into<String>,
        unique_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_uuid: service_uuid.into(),
            host: host.into(),
            auth_identifier: auth_identifier.into(),
            unique_key: unique_key.into(),
            auth_type: AuthType::X509,
            uuid: None,
            created_on: None,
            last_auth: None,
        }
    }

    /// Whether `self` points the same DN at the same user as `other`.
    pub fn same_target(&self, other: &Binding) -> bool {
        self.auth_identifier == other.auth_identifier && self.unique_key == other.unique_key
    }
}

/// The fields AUTHN lets an update change.
#[derive(Debug, Serialize)]
struct BindingUpdate<'a> {
    name: &'a str,
    service_uuid: &'a str,
    host: &'a str,
    auth_identifier: &'a str,
    unique_key: &'a str,
    auth_type: AuthType,
}

impl<'a> From<&'a Binding> for BindingUpdate<'a> {
    fn from(b: &'a Binding) -> Self {
        Self {
            name: &b.name,
            service_uuid: &b.service_uuid,
            host: &b.host,
            auth_identifier: &b.auth_identifier,
            unique_key: &b.unique_key,
            auth_type: b.auth_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOutcome {
    Created,
    Unchanged,
    Updated,
}

#[derive(Debug, Clone)]
pub struct AuthnClient {
    http: BaseApiClient,
    host: String,
    token: String,
}

impl AuthnClient {
    pub fn new(http: BaseApiClient, host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            host: host.into(),
            token: token.into(),
        }
    }

    fn binding_url(&self, name: &str) -> String {
        format!("https://{}/v1/bindings/{name}?key={}", self.host, self.token)
    }

    pub async fn create_binding(&self, binding: &Binding) -> Result<(), HttpError> {
        self.http
            .json_empty_post(&self.binding_url(&binding.name), binding)
            .await
    }

    pub async fn get_binding(&self, name: &str) -> Result<Binding, AuthnError> {
        self.http
            .json_get(&self.binding_url(name))
            .await
            .map_err(|source| AuthnError::Fetch {
                name: name.to_owned(),
                source,
            })
    }

    pub async fn update_binding(&self, binding: &Binding) -> Result<(), AuthnError> {
        self.http
            .json_json_put::<_, serde_json::Value>(
                &self.binding_url(&binding.name),
                &BindingUpdate::from(binding),
            )
            .await
            .map(|_| ())
            .map_err(|source| AuthnError::Update {
                name: binding.name.clone(),
                source,
            })
    }

    /// Creates `binding`. If one with the same name exists, it is updated when
    /// it points at a different DN or user. A conflict with no binding of that
    /// name means another binding already owns the DN.
    pub async fn ensure_binding(&self, binding: &Binding) -> Result<BindingOutcome, AuthnError> {
        let name = &binding.name;
        match self.create_binding(binding).await {
            Ok(()) => {
                info!(binding = %name, dn = %binding.auth_identifier, "created binding");
                Ok(BindingOutcome::Created)
            }
            Err(err) if err.is_conflict() => {
                let existing = match self.get_binding(name).await {
                    Ok(existing) => existing,
                    Err(AuthnError::Fetch { source, .. }) if source.is_not_found() => {
                        return Err(AuthnError::DnAlreadyBound {
                            name: name.clone(),
                            dn: binding.auth_identifier.clone(),
                        })
                    }
                    Err(err) => return Err(err),
                };
                if existing.same_target(binding) {
                    debug!(binding = %name, "binding up to date");
                    Ok(BindingOutcome::Unchanged)
                } else {
                    self.update_binding(binding).await?;
                    info!(
                        binding = %name,
                        old_dn = %existing.auth_identifier,
                        dn = %binding.auth_identifier,
                        "updated binding"
                    );
                    Ok(BindingOutcome::Updated)
                }
            }
            Err(source) => Err(AuthnError::Create {
                name: name.clone(),
                source,
            }),
        }
    }
}
