// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Comma-form DN grammar (RFC 4514, with the usual leniency about spaces
//! around separators).

use crate::error::DnError;

/// One `type=value` pair of an RDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ava {
    pub attr_type: String,
    pub value: String,
}

/// A possibly multi-valued RDN, AVAs in written order.
pub(crate) type Rdn = Vec<Ava>;

/// Characters that need a backslash when they appear anywhere in a value.
const ALWAYS_ESCAPED: &[char] = &[',', '+', '"', '\\', '<', '>', ';'];

/// [`ALWAYS_ESCAPED`] minus `+`, which a slash segment may use to join the
/// AVAs of one multi-valued RDN (`DC=org+DC=terena`).
const RESERVED_IN_SEGMENT: &[char] = &[',', '"', '\\', '<', '>', ';'];

/// Characters that may follow a backslash to stand for themselves.
const ESCAPABLE: &[u8] = b",+\"\\<>;=# ";

/// Writes `value` to `out`, escaped so [`parse_dn`] reads it back unchanged.
pub(crate) fn escape_value_into(value: &str, out: &mut String) {
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = ALWAYS_ESCAPED.contains(&c)
            || (c == ' ' && (i == 0 || i == last))
            || (c == '#' && i == 0);
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Returns the reason `value` can't be placed verbatim into a comma-form DN,
/// if any. An unescaped `+` is allowed and splits the RDN.
pub(crate) fn unescaped_value_problem(value: &str) -> Option<&'static str> {
    if value.contains(RESERVED_IN_SEGMENT) {
        Some("value contains a character reserved by the DN grammar")
    } else if value.starts_with('#') {
        Some("value starts with '#'")
    } else if value.starts_with(' ') || value.ends_with(' ') {
        Some("value has leading or trailing spaces")
    } else {
        None
    }
}

/// Parses a comma-form DN into its RDNs, in the order written.
///
/// An empty (or all-space) input is the empty DN.
pub(crate) fn parse_dn(input: &str) -> Result<Vec<Rdn>, DnError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    let mut rdns = Vec::new();
    parser.skip_spaces();
    if parser.peek().is_none() {
        return Ok(rdns);
    }

    let mut rdn = Vec::new();
    loop {
        rdn.push(parser.ava()?);
        match parser.peek() {
            Some(b'+') => parser.pos += 1,
            Some(b',' | b';') => {
                parser.pos += 1;
                rdns.push(std::mem::take(&mut rdn));
            }
            None => {
                rdns.push(rdn);
                return Ok(rdns);
            }
            Some(_) => return Err(DnError::syntax(parser.pos, "unexpected character")),
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn ava(&mut self) -> Result<Ava, DnError> {
        self.skip_spaces();
        let type_start = self.pos;
        loop {
            match self.peek() {
                Some(b'=') => break,
                Some(b',' | b'+' | b';') | None => {
                    return Err(DnError::syntax(type_start, "attribute has no '='"))
                }
                Some(_) => self.pos += 1,
            }
        }
        let attr_type = std::str::from_utf8(&self.input[type_start..self.pos])
            .map_err(|_| DnError::syntax(type_start, "attribute type is not UTF-8"))?
            .trim_end_matches(' ');
        if !is_attribute_type(attr_type) {
            return Err(DnError::syntax(type_start, "invalid attribute type"));
        }
        let attr_type = attr_type.to_owned();
        self.pos += 1;

        self.skip_spaces();
        let value_start = self.pos;
        let bytes = match self.peek() {
            Some(b'"') => self.quoted_value()?,
            Some(b'#') => {
                return Err(DnError::syntax(
                    value_start,
                    "BER-encoded values are not supported",
                ))
            }
            _ => self.string_value()?,
        };
        let value = String::from_utf8(bytes)
            .map_err(|_| DnError::syntax(value_start, "value is not UTF-8"))?;
        Ok(Ava { attr_type, value })
    }

    /// Reads up to the next unescaped separator. Unescaped trailing spaces are
    /// dropped; leading ones were skipped by the caller.
    fn string_value(&mut self) -> Result<Vec<u8>, DnError> {
        let mut bytes = Vec::new();
        let mut pending_spaces = 0;
        while let Some(b) = self.peek() {
            match b {
                b',' | b'+' | b';' => break,
                b'"' => return Err(DnError::syntax(self.pos, "unescaped '\"' in value")),
                b' ' => {
                    pending_spaces += 1;
                    self.pos += 1;
                }
                b'\\' => {
                    bytes.extend(std::iter::repeat(b' ').take(pending_spaces));
                    pending_spaces = 0;
                    bytes.push(self.escape()?);
                }
                _ => {
                    bytes.extend(std::iter::repeat(b' ').take(pending_spaces));
                    pending_spaces = 0;
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(bytes)
    }

    fn quoted_value(&mut self) -> Result<Vec<u8>, DnError> {
        let open = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return Err(DnError::syntax(open, "unterminated quoted value")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => bytes.push(self.escape()?),
                Some(b) => {
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
        self.skip_spaces();
        match self.peek() {
            None | Some(b',' | b'+' | b';') => Ok(bytes),
            Some(_) => Err(DnError::syntax(
                self.pos,
                "unexpected character after quoted value",
            )),
        }
    }

    /// Decodes `\c` or `\hh` at the current position.
    fn escape(&mut self) -> Result<u8, DnError> {
        let at = self.pos;
        match self.input.get(at + 1).copied() {
            None => Err(DnError::syntax(at, "dangling escape")),
            Some(c) if ESCAPABLE.contains(&c) => {
                self.pos += 2;
                Ok(c)
            }
            Some(hi) => {
                let lo = self.input.get(at + 2).copied();
                match (hex_digit(hi), lo.and_then(hex_digit)) {
                    (Some(hi), Some(lo)) => {
                        self.pos += 3;
                        Ok((hi << 4) | lo)
                    }
                    _ => Err(DnError::syntax(at, "invalid escape sequence")),
                }
            }
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// A descriptor (`CN`, `emailAddress`) or a numeric OID (`2.5.4.3`).
fn is_attribute_type(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        Some(c) if c.is_ascii_digit() => s
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())),
        _ => false,
    }
}
