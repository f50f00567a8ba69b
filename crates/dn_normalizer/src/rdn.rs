// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DnError;
use crate::rfc4514::{self, Rdn};
use crate::slash;

/// The attribute categories a DN may carry, declared in canonical output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    EmailAddress,
    CommonName,
    OrganizationalUnit,
    Organization,
    PostalCode,
    Street,
    Locality,
    Province,
    Country,
    DomainComponent,
}

impl Category {
    /// Order in which categories are rendered. AUTHN compares DNs as plain
    /// strings, so this must match the order it builds from certificates.
    pub const RENDER_ORDER: [Category; 10] = [
        Category::EmailAddress,
        Category::CommonName,
        Category::OrganizationalUnit,
        Category::Organization,
        Category::PostalCode,
        Category::Street,
        Category::Locality,
        Category::Province,
        Category::Country,
        Category::DomainComponent,
    ];

    /// Label used when rendering, independent of how the input spelled the type.
    pub fn label(self) -> &'static str {
        match self {
            Category::EmailAddress => "E",
            Category::CommonName => "CN",
            Category::OrganizationalUnit => "OU",
            Category::Organization => "O",
            Category::PostalCode => "POSTALCODE",
            Category::Street => "STREET",
            Category::Locality => "L",
            Category::Province => "ST",
            Category::Country => "C",
            Category::DomainComponent => "DC",
        }
    }

    /// Looks up an attribute type code, ignoring ASCII case.
    pub fn from_type_code(code: &str, profile: RdnProfile) -> Option<Self> {
        let category = match code.to_ascii_uppercase().as_str() {
            "E" | "EMAILADDRESS" => Category::EmailAddress,
            "CN" => Category::CommonName,
            "OU" => Category::OrganizationalUnit,
            "O" => Category::Organization,
            "POSTALCODE" => Category::PostalCode,
            "STREET" => Category::Street,
            "L" => Category::Locality,
            "ST" => Category::Province,
            "C" => Category::Country,
            "DC" => Category::DomainComponent,
            _ => return None,
        };
        profile.accepts(category).then_some(category)
    }
}

/// Which attribute types a [`Normalizer`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RdnProfile {
    /// `E`/`emailAddress`, `CN`, `OU`, `O`, `postalCode`, `street`, `L`, `ST`, `C`, `DC`
    #[default]
    Extended,
    /// `CN`, `OU`, `O`, `L`, `ST`, `C`, `DC` only, as accepted by older
    /// provisioning runs.
    Legacy,
}

serde_plain::derive_fromstr_from_deserialize!(RdnProfile);
serde_plain::derive_display_from_serialize!(RdnProfile);

impl RdnProfile {
    pub fn accepts(self, category: Category) -> bool {
        match self {
            RdnProfile::Extended => true,
            RdnProfile::Legacy => !matches!(
                category,
                Category::EmailAddress | Category::PostalCode | Category::Street
            ),
        }
    }
}

/// A parsed DN: for every category, its values in order.
///
/// Built once from an input string (or from an iterator of
/// `(Category, value)` pairs) and not modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RdnSequence {
    values: BTreeMap<Category, Vec<String>>,
}

impl RdnSequence {
    /// Values recorded for `category`, in order. Empty if there are none.
    pub fn values(&self, category: Category) -> &[String] {
        self.values.get(&category).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Renders the canonical form: categories in [`Category::RENDER_ORDER`],
    /// joined with `,`; repeated values of one category joined with `+`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for category in Category::RENDER_ORDER {
            let values = self.values(category);
            if values.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(',');
            }
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push('+');
                }
                out.push_str(category.label());
                out.push('=');
                rfc4514::escape_value_into(value, &mut out);
            }
        }
        out
    }

    fn push(&mut self, category: Category, value: String) {
        self.values.entry(category).or_default().push(value);
    }

    /// Collects RDNs given in comma (LDAP) order.
    ///
    /// LDAP order lists the most specific RDN first, the reverse of the
    /// registry's slash order, so the RDN list is walked backwards once. AVAs
    /// inside a multi-valued RDN keep their written order.
    fn from_ldap_order(rdns: Vec<Rdn>, profile: RdnProfile) -> Result<Self, DnError> {
        let mut seq = Self::default();
        for rdn in rdns.into_iter().rev() {
            for ava in rdn {
                let category = Category::from_type_code(&ava.attr_type, profile).ok_or(
                    DnError::UnsupportedRdnType {
                        rdn_type: ava.attr_type,
                    },
                )?;
                seq.push(category, ava.value);
            }
        }
        Ok(seq)
    }
}

impl FromIterator<(Category, String)> for RdnSequence {
    fn from_iter<I: IntoIterator<Item = (Category, String)>>(iter: I) -> Self {
        let mut seq = Self::default();
        for (category, value) in iter {
            seq.push(category, value);
        }
        seq
    }
}

impl fmt::Display for RdnSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for RdnSequence {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parse(s)
    }
}

/// Parses DNs under a fixed [`RdnProfile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    profile: RdnProfile,
}

impl Normalizer {
    pub fn new(profile: RdnProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> RdnProfile {
        self.profile
    }

    /// Parses either a registry slash-form DN (leading `/`) or a comma-form
    /// DN such as the output of [`RdnSequence::render`].
    ///
    /// Slash input is tokenized (joining a CN with an embedded slash), then
    /// bridged into comma form by reversing the segment list, and finally
    /// parsed the same way as comma input.
    pub fn parse(&self, raw: &str) -> Result<RdnSequence, DnError> {
        if raw.starts_with('/') {
            return self.parse_registry(raw);
        }
        let rdns = rfc4514::parse_dn(raw)?;
        RdnSequence::from_ldap_order(rdns, self.profile)
    }

    /// Parses a DN that must be in registry slash form. Text without the
    /// leading `/` is an error rather than being read as comma form.
    pub fn parse_registry(&self, raw: &str) -> Result<RdnSequence, DnError> {
        let segments = slash::tokenize(raw, self.profile)?;
        let bridged = slash::to_ldap_order(&segments)?;
        let rdns = rfc4514::parse_dn(&bridged)?;
        RdnSequence::from_ldap_order(rdns, self.profile)
    }

    pub fn normalize(&self, raw: &str) -> Result<String, DnError> {
        self.parse(raw).map(|seq| seq.render())
    }

    /// [`Normalizer::parse_registry`] followed by rendering. This is what a
    /// registry `HOSTDN` goes through.
    pub fn normalize_registry(&self, raw: &str) -> Result<String, DnError> {
        self.parse_registry(raw).map(|seq| seq.render())
    }
}
