//! Directory entries.
//!
//! An entry is a DN plus a list of attributes, each holding a duplicate-free
//! set of typed values. Value equality is schema-driven: membership checks
//! go through the attribute's equality normalizer, so `CN: Alice` and
//! `cn: alice` are the same value.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{DirectoryError, Result};
use crate::name::Dn;
use crate::schema::{ids, SchemaRegistry};

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// An attribute value: directory string or raw octets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    pub fn binary(b: impl Into<Vec<u8>>) -> Value {
        Value::Binary(b.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Binary(_) => None,
        }
    }

    /// The raw octets of the value.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Value::Text(s) => s.as_bytes(),
            Value::Binary(b) => b,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Value {
        Value::Binary(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// An attribute: the identifier as supplied, its canonical OID, and the
/// value set (insertion-ordered, duplicate-free under equality matching).
#[derive(Debug, Clone)]
pub struct Attribute {
    pub id: String,
    pub oid: String,
    values: Vec<Value>,
}

impl Attribute {
    fn new(id: String, oid: String) -> Attribute {
        Attribute {
            id,
            oid,
            values: Vec::new(),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A directory entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub dn: Dn,
    attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: Dn) -> Entry {
        Entry {
            dn,
            attributes: Vec::new(),
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Find an attribute by any of its names or its OID.
    pub fn get(&self, registry: &SchemaRegistry, id: &str) -> Option<&Attribute> {
        let oid = registry.attribute_type(id)?.oid.clone();
        self.attributes.iter().find(|a| a.oid == oid)
    }

    fn get_mut(&mut self, oid: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.oid == oid)
    }

    /// First value of the attribute as text, if any.
    pub fn first_text(&self, registry: &SchemaRegistry, id: &str) -> Option<&str> {
        self.get(registry, id)?.first()?.as_text()
    }

    /// Add one value, failing if an equal value is already present.
    pub fn add(
        &mut self,
        registry: &SchemaRegistry,
        id: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let at = registry.require_attribute_type(id)?;
        let norm = registry.normalize_value(at, &value)?;
        let oid = at.oid.clone();
        if self.contains_norm(registry, &oid, &norm)? {
            return Err(DirectoryError::attribute_or_value_exists(id));
        }
        match self.get_mut(&oid) {
            Some(attr) => attr.values.push(value),
            None => {
                let mut attr = Attribute::new(id.to_string(), oid);
                attr.values.push(value);
                self.attributes.push(attr);
            }
        }
        Ok(())
    }

    /// Replace the whole value set, deduplicating silently. An empty value
    /// list removes the attribute.
    pub fn put(
        &mut self,
        registry: &SchemaRegistry,
        id: &str,
        values: Vec<Value>,
    ) -> Result<()> {
        let at = registry.require_attribute_type(id)?;
        let oid = at.oid.clone();
        self.attributes.retain(|a| a.oid != oid);
        if values.is_empty() {
            return Ok(());
        }
        let mut attr = Attribute::new(id.to_string(), oid);
        let mut seen: Vec<String> = Vec::new();
        for value in values {
            let norm = registry.normalize_value(at, &value)?;
            if !seen.contains(&norm) {
                seen.push(norm);
                attr.values.push(value);
            }
        }
        self.attributes.push(attr);
        Ok(())
    }

    /// Remove one value by equality. Returns an error if the value (or the
    /// whole attribute) is not present.
    pub fn remove_value(
        &mut self,
        registry: &SchemaRegistry,
        id: &str,
        value: &Value,
    ) -> Result<()> {
        let at = registry.require_attribute_type(id)?;
        let norm = registry.normalize_value(at, value)?;
        let oid = at.oid.clone();
        let attr = self
            .get_mut(&oid)
            .ok_or_else(|| DirectoryError::no_such_attribute(id))?;
        let mut found = None;
        for (i, v) in attr.values.iter().enumerate() {
            if registry.normalize_value(at, v)? == norm {
                found = Some(i);
                break;
            }
        }
        match found {
            Some(i) => {
                attr.values.remove(i);
                if attr.values.is_empty() {
                    self.attributes.retain(|a| a.oid != oid);
                }
                Ok(())
            }
            None => Err(DirectoryError::no_such_attribute(id)),
        }
    }

    /// Remove the attribute entirely. Returns whether it was present.
    pub fn remove_attribute(&mut self, registry: &SchemaRegistry, id: &str) -> Result<bool> {
        let oid = registry.require_attribute_type(id)?.oid.clone();
        let before = self.attributes.len();
        self.attributes.retain(|a| a.oid != oid);
        Ok(self.attributes.len() != before)
    }

    /// Is this exact value present (under equality matching)?
    pub fn has_value(&self, registry: &SchemaRegistry, id: &str, value: &Value) -> Result<bool> {
        let at = match registry.attribute_type(id) {
            Some(at) => at,
            None => return Ok(false),
        };
        let norm = registry.normalize_value(at, value)?;
        self.contains_norm(registry, &at.oid.clone(), &norm)
    }

    fn contains_norm(&self, registry: &SchemaRegistry, oid: &str, norm: &str) -> Result<bool> {
        let attr = match self.attributes.iter().find(|a| a.oid == oid) {
            Some(a) => a,
            None => return Ok(false),
        };
        let at = registry.require_attribute_type(oid)?;
        for v in &attr.values {
            if registry.normalize_value(at, v)? == *norm {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -- object class helpers ----------------------------------------------

    /// The entry's objectClass values as text.
    pub fn object_classes(&self, registry: &SchemaRegistry) -> Vec<String> {
        self.get(registry, ids::OBJECT_CLASS)
            .map(|a| {
                a.values
                    .iter()
                    .filter_map(|v| v.as_text().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Does the entry carry the named object class (by name or OID)?
    pub fn has_object_class(&self, registry: &SchemaRegistry, name: &str) -> bool {
        let wanted = match registry.object_class(name) {
            Some(oc) => oc.oid.clone(),
            None => return false,
        };
        self.object_classes(registry)
            .iter()
            .any(|v| registry.object_class(v).map(|oc| oc.oid == wanted).unwrap_or(false))
    }

    pub fn is_alias(&self, registry: &SchemaRegistry) -> bool {
        self.has_object_class(registry, ids::OC_ALIAS)
    }

    pub fn is_referral(&self, registry: &SchemaRegistry) -> bool {
        self.has_object_class(registry, ids::OC_REFERRAL)
    }

    pub fn is_subentry(&self, registry: &SchemaRegistry) -> bool {
        self.has_object_class(registry, ids::OC_SUBENTRY)
    }

    // -- modifications ------------------------------------------------------

    /// Apply a modification list all-or-nothing: mutate a clone, and only
    /// return it if every modification succeeds.
    pub fn apply_modifications(
        &self,
        registry: &SchemaRegistry,
        mods: &[Modification],
    ) -> Result<Entry> {
        let mut next = self.clone();
        for m in mods {
            next.apply_one(registry, m)?;
        }
        Ok(next)
    }

    fn apply_one(&mut self, registry: &SchemaRegistry, m: &Modification) -> Result<()> {
        let at = registry.require_attribute_type(&m.attr)?;
        match m.op {
            ModOp::Add => {
                if m.values.is_empty() {
                    return Err(DirectoryError::constraint_violation(format!(
                        "add of {} with no values",
                        m.attr
                    )));
                }
                for v in &m.values {
                    self.add(registry, &m.attr, v.clone())?;
                }
                let count = self.get(registry, &m.attr).map(Attribute::len).unwrap_or(0);
                if at.single_value && count > 1 {
                    return Err(DirectoryError::constraint_violation(format!(
                        "{} is single-valued",
                        m.attr
                    )));
                }
            }
            ModOp::Remove => {
                if m.values.is_empty() {
                    if !self.remove_attribute(registry, &m.attr)? {
                        return Err(DirectoryError::no_such_attribute(&m.attr));
                    }
                } else {
                    for v in &m.values {
                        self.remove_value(registry, &m.attr, v)?;
                    }
                }
            }
            ModOp::Replace => {
                if at.single_value && m.values.len() > 1 {
                    return Err(DirectoryError::constraint_violation(format!(
                        "{} is single-valued",
                        m.attr
                    )));
                }
                self.put(registry, &m.attr, m.values.clone())?;
            }
        }
        Ok(())
    }

    /// Content comparison under normalization (DN included).
    pub fn same_content(&self, registry: &SchemaRegistry, other: &Entry) -> bool {
        if self.dn != other.dn || self.attributes.len() != other.attributes.len() {
            return false;
        }
        self.attributes.iter().all(|a| {
            let Some(at) = registry.attribute_type(&a.oid) else {
                return false;
            };
            let Some(b) = other.attributes.iter().find(|b| b.oid == a.oid) else {
                return false;
            };
            if a.values.len() != b.values.len() {
                return false;
            }
            let norms = |attr: &Attribute| -> Option<Vec<String>> {
                let mut ns = attr
                    .values
                    .iter()
                    .map(|v| registry.normalize_value(at, v).ok())
                    .collect::<Option<Vec<_>>>()?;
                ns.sort();
                Some(ns)
            };
            norms(a) == norms(b)
        })
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.dn == other.dn
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dn.cmp(&other.dn)
    }
}

// ---------------------------------------------------------------------------
// Modification
// ---------------------------------------------------------------------------

/// LDAP modification operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Remove,
    Replace,
}

/// One element of a modify request.
#[derive(Debug, Clone)]
pub struct Modification {
    pub op: ModOp,
    pub attr: String,
    pub values: Vec<Value>,
}

impl Modification {
    pub fn add(attr: impl Into<String>, values: Vec<Value>) -> Modification {
        Modification {
            op: ModOp::Add,
            attr: attr.into(),
            values,
        }
    }

    pub fn remove(attr: impl Into<String>, values: Vec<Value>) -> Modification {
        Modification {
            op: ModOp::Remove,
            attr: attr.into(),
            values,
        }
    }

    pub fn replace(attr: impl Into<String>, values: Vec<Value>) -> Modification {
        Modification {
            op: ModOp::Replace,
            attr: attr.into(),
            values,
        }
    }
}
