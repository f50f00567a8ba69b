// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dn_normalizer::RdnProfile;

pub const SERVICE_TYPE_PLACEHOLDER: &str = "{{service-type}}";
pub const SITENAME_PLACEHOLDER: &str = "{{sitename}}";

/// Where packaged installs keep their configuration.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/argo-api-authn/conf.d";
/// Fallback for running from a source checkout.
pub const LOCAL_CONFIG_DIR: &str = "../conf";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("couldn't parse config {path:?} as TOML: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How users are grouped onto AMS topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicMode {
    /// One topic per endpoint, `SITE_<site>_ENDPOINT_<primary key>`.
    Endpoint,
    /// One topic per service type, named after the type.
    ServiceType,
}

serde_plain::derive_fromstr_from_deserialize!(TopicMode);
serde_plain::derive_display_from_serialize!(TopicMode);

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub registry: RegistryConfig,
    pub ams: AmsConfig,
    pub authn: AuthnConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Service endpoint listing URL, containing `{{service-type}}`.
    pub endpoints_url: String,
    /// Site lookup URL, containing `{{sitename}}`. Without it every user gets
    /// the default AMS email.
    #[serde(default)]
    pub site_url: Option<String>,
    pub service_types: Vec<String>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default)]
    pub verify_tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmsConfig {
    pub host: String,
    pub project: String,
    pub token: String,
    pub default_email: String,
    pub users_role: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthnConfig {
    pub host: String,
    pub token: String,
    pub service_uuid: String,
    pub service_host: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Overrides the binary's default when set.
    #[serde(default)]
    pub topic_mode: Option<TopicMode>,
    #[serde(default)]
    pub rdn_profile: RdnProfile,
}

impl Config {
    /// Picks the config file: the explicit path if given, else the system
    /// location if it exists, else the source checkout location.
    pub fn resolve_path(explicit: Option<&Path>, tool_name: &str) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_owned();
        }
        let file_name = format!("{tool_name}.toml");
        let system = Path::new(SYSTEM_CONFIG_DIR).join(&file_name);
        if system.is_file() {
            system
        } else {
            Path::new(LOCAL_CONFIG_DIR).join(file_name)
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        let parent_path = path.parent().unwrap_or(".".as_ref());
        let config = config.relative_to(parent_path);
        config.validate()?;
        Ok(config)
    }

    /// Resolves relative certificate paths against the config file's directory.
    fn relative_to(mut self, base: &Path) -> Self {
        let rebase = |p: Option<PathBuf>| p.map(|p| base.join(p));
        self.registry.client_cert = rebase(self.registry.client_cert.take());
        self.registry.client_key = rebase(self.registry.client_key.take());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("registry.endpoints_url", &self.registry.endpoints_url),
            ("ams.host", &self.ams.host),
            ("ams.project", &self.ams.project),
            ("ams.token", &self.ams.token),
            ("ams.default_email", &self.ams.default_email),
            ("ams.users_role", &self.ams.users_role),
            ("authn.host", &self.authn.host),
            ("authn.token", &self.authn.token),
            ("authn.service_uuid", &self.authn.service_uuid),
            ("authn.service_host", &self.authn.service_host),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if !self.registry.endpoints_url.contains(SERVICE_TYPE_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "registry.endpoints_url must contain {SERVICE_TYPE_PLACEHOLDER}"
            )));
        }
        if let Some(site_url) = &self.registry.site_url {
            if !site_url.contains(SITENAME_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "registry.site_url must contain {SITENAME_PLACEHOLDER}"
                )));
            }
        }
        if self.registry.client_cert.is_some() != self.registry.client_key.is_some() {
            return Err(ConfigError::Invalid(
                "registry.client_cert and registry.client_key must be set together".into(),
            ));
        }
        if self.service_types().is_empty() {
            return Err(ConfigError::Invalid(
                "registry.service_types must list at least one service type".into(),
            ));
        }
        Ok(())
    }

    /// Configured service types with whitespace removed, skipping blanks.
    pub fn service_types(&self) -> Vec<String> {
        self.registry
            .service_types
            .iter()
            .map(|s| s.split_whitespace().collect::<String>())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
