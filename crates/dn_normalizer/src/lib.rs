// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalization of X.509 distinguished names as published by GOCDB into the
//! canonical string form that the AUTHN service compares against.
//!
//! GOCDB publishes host DNs in the OpenSSL "slash" style
//! (`/DC=org/DC=terena/DC=tcs/C=PL/CN=host.example.org`), while AUTHN stores
//! them the way it extracts them from client certificates: comma separated,
//! in a fixed attribute order, with repeated attributes merged into one
//! multi-valued RDN (`CN=host.example.org,C=PL,DC=org+DC=terena+DC=tcs`).

pub mod error;
mod rdn;
mod rfc4514;
mod slash;

pub use error::DnError;
pub use rdn::{Category, Normalizer, RdnProfile, RdnSequence};

/// Parses a DN using the extended profile. See [`Normalizer::parse`].
pub fn parse(raw: &str) -> Result<RdnSequence, DnError> {
    Normalizer::default().parse(raw)
}

/// Renders a parsed DN into its canonical string form.
pub fn render(seq: &RdnSequence) -> String {
    seq.render()
}

/// Parses and renders in one step, using the extended profile.
pub fn normalize(raw: &str) -> Result<String, DnError> {
    Normalizer::default().normalize(raw)
}
