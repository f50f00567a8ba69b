// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry ("OpenSSL one-line") DNs: `/C=PL/O=GRID/CN=host.example.org`.

use crate::error::DnError;
use crate::rdn::{Category, RdnProfile};
use crate::rfc4514;

/// One `type=value` segment of a slash-form DN, borrowed from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment<'a> {
    pub category: Category,
    pub attr_type: &'a str,
    pub value: &'a str,
    /// Byte offset of `value` in the original input.
    pub offset: usize,
}

/// A `/`-delimited piece of the input and where it starts.
#[derive(Debug, Clone, Copy)]
struct Piece<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> Piece<'a> {
    fn type_and_value(self) -> Option<(&'a str, &'a str)> {
        self.text.split_once('=')
    }

    fn end(self) -> usize {
        self.offset + self.text.len()
    }
}

/// Splits a slash-form DN into segments in input order.
///
/// GOCDB host DNs may carry a service prefix in the CN (`CN=service/host`),
/// which a plain split would turn into a bogus `=`-less segment. The CN
/// keeps its slash when the `=`-less fragment after it is either the last
/// piece, or is followed only by an email segment. Any other `=`-less
/// fragment is an error.
///
/// Input without the leading `/` is still split and checked segment by
/// segment, so a stray fragment is reported as such; if every segment is
/// well formed the missing `/` itself is the error.
pub(crate) fn tokenize(raw: &str, profile: RdnProfile) -> Result<Vec<Segment<'_>>, DnError> {
    let (body, start) = match raw.strip_prefix('/') {
        Some(body) => (body, 1),
        None => (raw, 0),
    };

    let mut offset = start;
    let pieces: Vec<Piece<'_>> = body
        .split('/')
        .map(|text| {
            let piece = Piece { text, offset };
            offset += text.len() + 1;
            piece
        })
        .collect();

    let mut segments: Vec<Segment<'_>> = Vec::with_capacity(pieces.len());
    let mut i = 0;
    while i < pieces.len() {
        let piece = pieces[i];
        let Some((attr_type, _)) = piece.type_and_value() else {
            return Err(stray_fragment(piece, segments.last()));
        };
        let category = Category::from_type_code(attr_type, profile).ok_or_else(|| {
            DnError::UnsupportedRdnType {
                rdn_type: attr_type.to_owned(),
            }
        })?;

        let value_start = piece.offset + attr_type.len() + 1;
        let mut value_end = piece.end();
        if category == Category::CommonName && embedded_slash_follows(&pieces[i + 1..]) {
            value_end = pieces[i + 1].end();
            i += 1;
        }
        segments.push(Segment {
            category,
            attr_type,
            value: &raw[value_start..value_end],
            offset: value_start,
        });
        i += 1;
    }
    if start == 0 {
        return Err(DnError::syntax(0, "slash-form DN must start with '/'"));
    }
    Ok(segments)
}

/// Whether the pieces after a CN are the tail of the CN value itself.
fn embedded_slash_follows(rest: &[Piece<'_>]) -> bool {
    match rest {
        [fragment] => is_fragment(*fragment),
        [fragment, email] => is_fragment(*fragment) && is_email(*email),
        _ => false,
    }
}

fn is_fragment(piece: Piece<'_>) -> bool {
    !piece.text.is_empty() && !piece.text.contains('=')
}

// Checked without the profile, so a legacy run reports the email type
// rather than a confusing slash error.
fn is_email(piece: Piece<'_>) -> bool {
    piece.type_and_value().is_some_and(|(attr_type, _)| {
        attr_type.eq_ignore_ascii_case("emailAddress") || attr_type.eq_ignore_ascii_case("E")
    })
}

fn stray_fragment(piece: Piece<'_>, previous: Option<&Segment<'_>>) -> DnError {
    match previous {
        Some(cn) if cn.category == Category::CommonName && !piece.text.is_empty() => {
            DnError::UnsupportedEmbeddedSlash {
                common_name: cn.value.to_owned(),
                fragment: piece.text.to_owned(),
            }
        }
        _ => DnError::MalformedRdn {
            segment: piece.text.to_owned(),
        },
    }
}

/// Joins segments into a comma-form DN in LDAP order (last segment first),
/// which is how the registry's slash order maps onto certificate order.
///
/// Values are written verbatim, so any value the comma grammar would read
/// differently is rejected here instead of being silently re-split. The one
/// exception is `+`: a compound segment `DC=org+DC=terena` becomes a single
/// multi-valued RDN whose AVAs keep their written order.
pub(crate) fn to_ldap_order(segments: &[Segment<'_>]) -> Result<String, DnError> {
    let mut out = String::new();
    for segment in segments.iter().rev() {
        if let Some(reason) = rfc4514::unescaped_value_problem(segment.value) {
            return Err(DnError::syntax(segment.offset, reason));
        }
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(segment.attr_type);
        out.push('=');
        out.push_str(segment.value);
    }
    Ok(out)
}
