// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnError {
    #[error("invalid RDN {segment:?}: no '=' separator")]
    MalformedRdn { segment: String },
    #[error("RDN type {rdn_type:?} is not accepted")]
    UnsupportedRdnType { rdn_type: String },
    /// A fragment without `=` follows a CN, but not in one of the two shapes
    /// (`CN=a/b` at the end, or `CN=a/b/emailAddress=...`) that are known to
    /// be a slash inside the CN value.
    #[error("CN {common_name:?} is followed by {fragment:?}, which is not a supported embedded slash")]
    UnsupportedEmbeddedSlash {
        common_name: String,
        fragment: String,
    },
    #[error("DN syntax error at position {position}: {reason}")]
    DnSyntaxError {
        position: usize,
        reason: &'static str,
    },
}

impl DnError {
    pub(crate) fn syntax(position: usize, reason: &'static str) -> Self {
        Self::DnSyntaxError { position, reason }
    }
}
