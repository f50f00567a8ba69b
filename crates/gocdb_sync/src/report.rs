// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclChange {
    pub topic: String,
    pub added: Vec<String>,
}

/// What a dry run would have provisioned for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedEndpoint {
    pub user: String,
    pub email: String,
    pub dn: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidDn {
    pub hostname: String,
    pub dn: String,
    pub reason: String,
}

/// What happened to one service type during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceTypeReport {
    pub service_type: String,
    /// Set when the endpoint list couldn't be fetched; nothing else was done.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    pub endpoints: usize,
    /// Hostnames of endpoints without a registered DN.
    pub missing_dns: Vec<String>,
    pub invalid_dns: Vec<InvalidDn>,
    pub users_created: Vec<String>,
    pub bindings_created: Vec<String>,
    pub bindings_updated: Vec<String>,
    /// Users whose endpoint failed at AMS or AUTHN.
    pub failed: Vec<String>,
    pub acl_changes: Vec<AclChange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<PlannedEndpoint>,
}

impl ServiceTypeReport {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            ..Default::default()
        }
    }

    pub fn log_summary(&self) {
        let service_type = &self.service_type;
        if let Some(error) = &self.fetch_error {
            warn!(%service_type, %error, "service type skipped, endpoints unavailable");
            return;
        }
        let invalid: Vec<&str> = self.invalid_dns.iter().map(|i| i.hostname.as_str()).collect();
        let acl_topics: Vec<&str> = self.acl_changes.iter().map(|c| c.topic.as_str()).collect();
        warn!(
            %service_type,
            endpoints = self.endpoints,
            missing_dns = ?self.missing_dns,
            invalid_dns = ?invalid,
            users_created = self.users_created.len(),
            bindings_created = self.bindings_created.len(),
            bindings_updated = self.bindings_updated.len(),
            failed = ?self.failed,
            acl_changes = ?acl_topics,
            "service type done"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub service_types: Vec<ServiceTypeReport>,
}

impl SyncReport {
    /// Whether any service type was skipped because its endpoints couldn't be
    /// fetched.
    pub fn has_fetch_errors(&self) -> bool {
        self.service_types.iter().any(|r| r.fetch_error.is_some())
    }

    pub fn users_created(&self) -> usize {
        self.service_types.iter().map(|r| r.users_created.len()).sum()
    }

    pub fn failures(&self) -> usize {
        self.service_types.iter().map(|r| r.failed.len()).sum()
    }
}
