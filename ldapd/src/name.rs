//! Distinguished names.
//!
//! RFC 4514 parsing and schema-driven normalization of DNs and RDNs. Every
//! name keeps two renderings: the user-provided form (case and spacing
//! preserved) and the normalized form (attribute types resolved to their
//! canonical name, values passed through the equality normalizer). Equality,
//! hashing and ordering all use the normalized form.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::entry::Value;
use crate::error::{DirectoryError, Result};
use crate::schema::SchemaRegistry;

// ---------------------------------------------------------------------------
// Ava -- a single attribute-value atom
// ---------------------------------------------------------------------------

/// One `type=value` atom of an RDN.
#[derive(Debug, Clone)]
pub struct Ava {
    /// Attribute identifier as the user wrote it.
    pub attr: String,
    /// Canonical OID of the attribute type.
    pub oid: String,
    /// Canonical primary name, lowercased (used in the normalized form).
    pub canonical: String,
    /// The value as supplied.
    pub value: Value,
    /// The value under the attribute's equality normalizer.
    pub norm_value: String,
}

impl Ava {
    pub fn new(registry: &SchemaRegistry, attr: &str, value: Value) -> Result<Ava> {
        let at = registry.require_attribute_type(attr)?;
        let norm_value = registry.normalize_value(at, &value)?;
        Ok(Ava {
            attr: attr.to_string(),
            oid: at.oid.clone(),
            canonical: at.name().to_lowercase(),
            value,
            norm_value,
        })
    }

    fn norm_fragment(&self) -> String {
        format!("{}={}", self.canonical, escape_value(&self.norm_value))
    }

    fn user_fragment(&self) -> String {
        match &self.value {
            Value::Text(s) => format!("{}={}", self.attr, escape_value(s)),
            Value::Binary(_) => format!("{}={}", self.attr, escape_value(&self.norm_value)),
        }
    }
}

// ---------------------------------------------------------------------------
// Rdn
// ---------------------------------------------------------------------------

/// A relative distinguished name: one or more AVAs joined by `+`.
#[derive(Debug, Clone)]
pub struct Rdn {
    avas: Vec<Ava>,
    user: String,
    norm: String,
}

impl Rdn {
    /// Build a single-AVA RDN.
    pub fn new(registry: &SchemaRegistry, attr: &str, value: impl Into<Value>) -> Result<Rdn> {
        let ava = Ava::new(registry, attr, value.into())?;
        Ok(Rdn::from_avas(vec![ava]))
    }

    /// Parse an RDN in RFC 4514 textual form (`cn=alice` or `cn=a+sn=b`).
    pub fn parse(registry: &SchemaRegistry, s: &str) -> Result<Rdn> {
        let avas = parse_rdn_avas(registry, s)?;
        Ok(Rdn::from_avas(avas))
    }

    fn from_avas(mut avas: Vec<Ava>) -> Rdn {
        let user = avas
            .iter()
            .map(Ava::user_fragment)
            .collect::<Vec<_>>()
            .join("+");
        // The normalized form orders atoms by attribute name so the same
        // multi-valued RDN always renders identically.
        avas.sort_by(|a, b| a.canonical.cmp(&b.canonical).then(a.norm_value.cmp(&b.norm_value)));
        let norm = avas
            .iter()
            .map(Ava::norm_fragment)
            .collect::<Vec<_>>()
            .join("+");
        Rdn { avas, user, norm }
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// The first (for single-AVA RDNs, the only) atom.
    pub fn ava(&self) -> &Ava {
        &self.avas[0]
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn norm(&self) -> &str {
        &self.norm
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Rdn {}

impl Hash for Rdn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)
    }
}

// ---------------------------------------------------------------------------
// Dn
// ---------------------------------------------------------------------------

/// A distinguished name: a sequence of RDNs, most specific first.
/// The empty DN names the root DSE.
#[derive(Debug, Clone)]
pub struct Dn {
    rdns: Vec<Rdn>,
    user: String,
    norm: String,
}

impl Dn {
    /// The empty DN (root DSE).
    pub fn empty() -> Dn {
        Dn {
            rdns: Vec::new(),
            user: String::new(),
            norm: String::new(),
        }
    }

    /// Parse an RFC 4514 textual DN, resolving and normalizing every atom
    /// against the schema.
    pub fn parse(registry: &SchemaRegistry, s: &str) -> Result<Dn> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Dn::empty());
        }
        let mut rdns = Vec::new();
        for part in split_unescaped(trimmed, b',') {
            let avas = parse_rdn_avas(registry, part)?;
            rdns.push(Rdn::from_avas(avas));
        }
        Ok(Dn::from_rdns(rdns))
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Dn {
        let user = rdns.iter().map(|r| r.user.clone()).collect::<Vec<_>>().join(",");
        let norm = rdns.iter().map(|r| r.norm.clone()).collect::<Vec<_>>().join(",");
        Dn { rdns, user, norm }
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDNs.
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn norm(&self) -> &str {
        &self.norm
    }

    /// The leftmost (most specific) RDN, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// RDN at `index`, 0 being the most specific.
    pub fn rdn_at(&self, index: usize) -> Option<&Rdn> {
        self.rdns.get(index)
    }

    /// The DN with the leftmost RDN removed. `None` for the empty DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn::from_rdns(self.rdns[1..].to_vec()))
        }
    }

    /// The DN one level below this one, formed by appending `rdn`.
    pub fn append(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn::from_rdns(rdns)
    }

    /// True if `self` is a proper ancestor of `other`.
    pub fn ancestor_of(&self, other: &Dn) -> bool {
        other.len() > self.len() && dn_suffix_matches(self, other)
    }

    /// True if `self` is a proper descendant of `other`.
    pub fn descendant_of(&self, other: &Dn) -> bool {
        other.ancestor_of(self)
    }

    /// True if `self` equals `other` or lies under it.
    pub fn at_or_under(&self, other: &Dn) -> bool {
        self == other || self.descendant_of(other)
    }
}

fn dn_suffix_matches(suffix: &Dn, dn: &Dn) -> bool {
    let offset = dn.len() - suffix.len();
    suffix
        .rdns
        .iter()
        .enumerate()
        .all(|(i, r)| dn.rdns[offset + i].norm == r.norm)
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    /// Length-first, then lexicographic on the normalized rendering.
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.norm.cmp(&other.norm))
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)
    }
}

// ---------------------------------------------------------------------------
// RFC 4514 lexing
// ---------------------------------------------------------------------------

/// Split on an unescaped separator byte, honoring backslash escapes.
fn split_unescaped(s: &str, sep: u8) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            i += 2;
        } else if bytes[i] == sep {
            parts.push(&s[start..i]);
            start = i + 1;
            i += 1;
        } else {
            i += 1;
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_rdn_avas(registry: &SchemaRegistry, s: &str) -> Result<Vec<Ava>> {
    let mut avas = Vec::new();
    for atom in split_unescaped(s, b'+') {
        avas.push(parse_ava(registry, atom)?);
    }
    if avas.is_empty() {
        return Err(DirectoryError::invalid_dn_syntax(s, "empty RDN"));
    }
    Ok(avas)
}

fn parse_ava(registry: &SchemaRegistry, s: &str) -> Result<Ava> {
    let eq = find_unescaped(s, b'=')
        .ok_or_else(|| DirectoryError::invalid_dn_syntax(s, "missing '='"))?;
    let attr = s[..eq].trim();
    if attr.is_empty() {
        return Err(DirectoryError::invalid_dn_syntax(s, "empty attribute type"));
    }
    if !attr
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';')
    {
        return Err(DirectoryError::invalid_dn_syntax(s, "bad attribute type"));
    }
    let value = unescape_value(&s[eq + 1..])?;
    Ava::new(registry, attr, value)
}

fn find_unescaped(s: &str, target: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            i += 2;
        } else if bytes[i] == target {
            return Some(i);
        } else {
            i += 1;
        }
    }
    None
}

/// Decode an RFC 4514 attribute value: backslash escapes, `\HH` hex pairs,
/// `#`-prefixed hex strings, and the leading/trailing space rule.
fn unescape_value(raw: &str) -> Result<Value> {
    let trimmed = raw.trim_matches(' ');
    if let Some(hex) = trimmed.strip_prefix('#') {
        let bytes = decode_hex(hex)
            .ok_or_else(|| DirectoryError::invalid_dn_syntax(raw, "bad hex value"))?;
        return Ok(Value::Binary(bytes));
    }

    // (byte, escaped) pairs so that only unescaped edge spaces are trimmed.
    let bytes = raw.as_bytes();
    let mut out: Vec<(u8, bool)> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            if i + 1 >= bytes.len() {
                return Err(DirectoryError::invalid_dn_syntax(raw, "dangling backslash"));
            }
            let next = bytes[i + 1];
            if next.is_ascii_hexdigit() && i + 2 < bytes.len() && bytes[i + 2].is_ascii_hexdigit()
            {
                let hi = hex_digit(next);
                let lo = hex_digit(bytes[i + 2]);
                out.push((hi * 16 + lo, true));
                i += 3;
            } else {
                out.push((next, true));
                i += 2;
            }
        } else {
            out.push((b, false));
            i += 1;
        }
    }
    // Trim unescaped spaces at both ends.
    let start = out.iter().position(|&(b, esc)| b != b' ' || esc).unwrap_or(out.len());
    let end = out
        .iter()
        .rposition(|&(b, esc)| b != b' ' || esc)
        .map(|p| p + 1)
        .unwrap_or(start);
    let decoded: Vec<u8> = out[start..end].iter().map(|&(b, _)| b).collect();

    match String::from_utf8(decoded) {
        Ok(s) => Ok(Value::Text(s)),
        Err(e) => Ok(Value::Binary(e.into_bytes())),
    }
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() % 2 != 0 || !bytes.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    Some(
        bytes
            .chunks(2)
            .map(|pair| hex_digit(pair[0]) * 16 + hex_digit(pair[1]))
            .collect(),
    )
}

/// Escape a value for textual DN rendering per RFC 4514.
fn escape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let needs_escape = match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => true,
            '#' | ' ' if i == 0 => true,
            ' ' if i == chars.len() - 1 => true,
            _ => false,
        };
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
