// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only access to the GOCDB public API: service endpoint listings and
//! site records, both served as XML.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use http_client::{BaseApiClient, ClientOptions, HttpError};

use crate::config::{RegistryConfig, SERVICE_TYPE_PLACEHOLDER, SITENAME_PLACEHOLDER};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("fetching {what}: {source}")]
    Http {
        what: String,
        #[source]
        source: HttpError,
    },
    #[error("parsing {what}: {source}")]
    Xml {
        what: String,
        #[source]
        source: quick_xml::de::DeError,
    },
    #[error("reading client certificate {path:?}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("building registry client: {0}")]
    Client(#[source] HttpError),
    #[error("site {0} not found in registry")]
    SiteNotFound(String),
}

/// One `SERVICE_ENDPOINT` row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(rename = "SERVICE_TYPE")]
    pub service_type: String,
    #[serde(rename = "HOSTNAME")]
    pub hostname: String,
    #[serde(rename = "SITENAME")]
    pub sitename: String,
    #[serde(rename = "PRIMARY_KEY", default)]
    pub primary_key: String,
    #[serde(rename = "HOSTDN", default)]
    host_dn: Option<String>,
}

impl ServiceEndpoint {
    /// The registered host DN. Blank values count as missing.
    pub fn host_dn(&self) -> Option<&str> {
        self.host_dn.as_deref().filter(|dn| !dn.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct EndpointList {
    #[serde(rename = "SERVICE_ENDPOINT", default)]
    endpoints: Vec<ServiceEndpoint>,
}

/// The parts of a `SITE` row used to decide whether its contact email can be
/// trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SiteInfo {
    #[serde(rename = "PRODUCTION_INFRASTRUCTURE", default)]
    pub production_infrastructure: Option<String>,
    #[serde(rename = "CERTIFICATION_STATUS", default)]
    pub certification_status: Option<String>,
    #[serde(rename = "CONTACT_EMAIL", default)]
    pub contact_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SiteList {
    #[serde(rename = "SITE", default)]
    sites: Vec<SiteInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UntrustedSite {
    #[error("site is not in production (infrastructure: {0:?})")]
    NotProduction(Option<String>),
    #[error("site is neither certified nor uncertified (status: {0:?})")]
    NotCertified(Option<String>),
    #[error("site has no contact email")]
    NoContactEmail,
}

impl SiteInfo {
    /// The site's contact email, if the site is a production site that is
    /// either certified or uncertified.
    pub fn trusted_contact_email(&self) -> Result<&str, UntrustedSite> {
        if self.production_infrastructure.as_deref() != Some("Production") {
            return Err(UntrustedSite::NotProduction(
                self.production_infrastructure.clone(),
            ));
        }
        match self.certification_status.as_deref() {
            Some("Certified" | "Uncertified") => {}
            _ => {
                return Err(UntrustedSite::NotCertified(
                    self.certification_status.clone(),
                ))
            }
        }
        self.contact_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(UntrustedSite::NoContactEmail)
    }
}

pub fn parse_endpoints(xml: &str) -> Result<Vec<ServiceEndpoint>, quick_xml::de::DeError> {
    let list: EndpointList = quick_xml::de::from_str(xml)?;
    Ok(list.endpoints)
}

/// Returns the first `SITE` of a `get_site` response, if any.
pub fn parse_site(xml: &str) -> Result<Option<SiteInfo>, quick_xml::de::DeError> {
    let list: SiteList = quick_xml::de::from_str(xml)?;
    Ok(list.sites.into_iter().next())
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: BaseApiClient,
    endpoints_url: String,
    site_url: Option<String>,
}

impl RegistryClient {
    pub fn new(http: BaseApiClient, endpoints_url: String, site_url: Option<String>) -> Self {
        Self {
            http,
            endpoints_url,
            site_url,
        }
    }

    /// Builds a client presenting the configured certificate, if any.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let identity = match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
            _ => None,
        };
        let options = ClientOptions {
            verify_tls: config.verify_tls,
            identity,
        };
        let http = BaseApiClient::new(&options).map_err(RegistryError::Client)?;
        Ok(Self::new(
            http,
            config.endpoints_url.clone(),
            config.site_url.clone(),
        ))
    }

    /// Whether site records can be looked up at all.
    pub fn has_site_lookup(&self) -> bool {
        self.site_url.is_some()
    }

    pub async fn endpoints(&self, service_type: &str) -> Result<Vec<ServiceEndpoint>, RegistryError> {
        let url = self
            .endpoints_url
            .replace(SERVICE_TYPE_PLACEHOLDER, service_type);
        debug!(%service_type, %url, "fetching service endpoints");
        let what = || format!("service endpoints of type {service_type}");
        let xml = self
            .http
            .text_get(&url)
            .await
            .map_err(|source| RegistryError::Http {
                what: what(),
                source,
            })?;
        parse_endpoints(&xml).map_err(|source| RegistryError::Xml {
            what: what(),
            source,
        })
    }

    /// Looks up one site. Returns `Ok(None)` when no site URL is configured.
    pub async fn site(&self, sitename: &str) -> Result<Option<SiteInfo>, RegistryError> {
        let Some(template) = &self.site_url else {
            return Ok(None);
        };
        let url = template.replace(SITENAME_PLACEHOLDER, sitename);
        debug!(site = %sitename, %url, "fetching site");
        let what = || format!("site {sitename}");
        let xml = self
            .http
            .text_get(&url)
            .await
            .map_err(|source| RegistryError::Http {
                what: what(),
                source,
            })?;
        match parse_site(&xml) {
            Ok(Some(site)) => Ok(Some(site)),
            Ok(None) => Err(RegistryError::SiteNotFound(sitename.to_owned())),
            Err(source) => Err(RegistryError::Xml {
                what: what(),
                source,
            }),
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, RegistryError> {
    std::fs::read(path).map_err(|source| RegistryError::Certificate {
        path: path.to_owned(),
        source,
    })
}
