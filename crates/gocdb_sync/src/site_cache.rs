// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::registry::RegistryClient;

/// Per-run memo of site name to trusted contact email.
///
/// Only trusted lookups are remembered: a site whose lookup failed, or whose
/// record isn't trusted, is asked again for its next endpoint.
#[derive(Debug)]
pub struct SiteContactCache {
    default_email: String,
    emails: HashMap<String, String>,
}

impl SiteContactCache {
    pub fn new(default_email: impl Into<String>) -> Self {
        Self {
            default_email: default_email.into(),
            emails: HashMap::new(),
        }
    }

    /// Number of sites with a remembered email.
    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// The email AMS users of `sitename` should be registered with.
    pub async fn contact_email(&mut self, registry: &RegistryClient, sitename: &str) -> String {
        if let Some(email) = self.emails.get(sitename) {
            return email.clone();
        }
        if !registry.has_site_lookup() {
            return self.default_email.clone();
        }

        match registry.site(sitename).await {
            Ok(Some(site)) => match site.trusted_contact_email() {
                Ok(email) => {
                    debug!(site = %sitename, %email, "using site contact email");
                    self.emails.insert(sitename.to_owned(), email.to_owned());
                    email.to_owned()
                }
                Err(reason) => {
                    warn!(site = %sitename, %reason, "using default email");
                    self.default_email.clone()
                }
            },
            Ok(None) => self.default_email.clone(),
            Err(err) => {
                warn!(site = %sitename, error = %err, "site lookup failed, using default email");
                self.default_email.clone()
            }
        }
    }
}
