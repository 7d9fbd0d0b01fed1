//! Schema registry.
//!
//! Catalog of attribute types, object classes, syntaxes and matching rules.
//! Resolves user-supplied identifiers (names or OIDs, case-insensitive) to
//! canonical definitions, and provides per-attribute normalization and
//! comparison semantics for the name model, indexes and search evaluator.
//!
//! The registry is immutable once built; schema edits clone it and swap the
//! `Arc` held by the service, so readers never block.

mod builtin;
mod parse;

pub use builtin::bootstrap_registry;
pub use parse::{parse_attribute_type, parse_object_class};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::entry::Value;
use crate::error::{DirectoryError, Result};
use crate::name::Dn;

// ---------------------------------------------------------------------------
// CaseFold -- case-insensitive string key for HashMap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CaseFold(String);

impl CaseFold {
    fn new(s: &str) -> Self {
        CaseFold(s.to_string())
    }
}

impl PartialEq for CaseFold {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CaseFold {}

impl Hash for CaseFold {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

// ---------------------------------------------------------------------------
// Well-known identifiers
// ---------------------------------------------------------------------------

/// Attribute names the core itself depends on.
pub mod ids {
    pub const OBJECT_CLASS: &str = "objectClass";
    pub const ENTRY_UUID: &str = "entryUUID";
    pub const ENTRY_CSN: &str = "entryCSN";
    pub const CREATORS_NAME: &str = "creatorsName";
    pub const CREATE_TIMESTAMP: &str = "createTimestamp";
    pub const MODIFIERS_NAME: &str = "modifiersName";
    pub const MODIFY_TIMESTAMP: &str = "modifyTimestamp";
    pub const ALIASED_OBJECT_NAME: &str = "aliasedObjectName";
    pub const REF: &str = "ref";
    pub const USER_PASSWORD: &str = "userPassword";
    pub const SUBTREE_SPECIFICATION: &str = "subtreeSpecification";
    pub const COLLECTIVE_EXCLUSIONS: &str = "collectiveExclusions";
    pub const ADMINISTRATIVE_ROLE: &str = "administrativeRole";
    pub const ACI: &str = "prescriptiveACI";

    pub const OC_TOP: &str = "top";
    pub const OC_ALIAS: &str = "alias";
    pub const OC_REFERRAL: &str = "referral";
    pub const OC_SUBENTRY: &str = "subentry";
    pub const OC_COLLECTIVE_SUBENTRY: &str = "collectiveAttributeSubentry";
    pub const OC_ACCESS_CONTROL_SUBENTRY: &str = "accessControlSubentry";
    pub const OC_EXTENSIBLE: &str = "extensibleObject";
}

// ---------------------------------------------------------------------------
// Syntaxes and matching rules
// ---------------------------------------------------------------------------

/// LDAP syntax OIDs the core understands; everything else falls back to
/// octet-string treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    DirectoryString,
    Ia5String,
    PrintableString,
    Integer,
    Boolean,
    Dn,
    Oid,
    GeneralizedTime,
    TelephoneNumber,
    NumericString,
    OctetString,
    Uuid,
}

impl SyntaxKind {
    pub fn from_oid(oid: &str) -> SyntaxKind {
        match oid {
            "1.3.6.1.4.1.1466.115.121.1.15" => SyntaxKind::DirectoryString,
            "1.3.6.1.4.1.1466.115.121.1.26" => SyntaxKind::Ia5String,
            "1.3.6.1.4.1.1466.115.121.1.44" => SyntaxKind::PrintableString,
            "1.3.6.1.4.1.1466.115.121.1.27" => SyntaxKind::Integer,
            "1.3.6.1.4.1.1466.115.121.1.7" => SyntaxKind::Boolean,
            "1.3.6.1.4.1.1466.115.121.1.12" => SyntaxKind::Dn,
            "1.3.6.1.4.1.1466.115.121.1.38" => SyntaxKind::Oid,
            "1.3.6.1.4.1.1466.115.121.1.24" => SyntaxKind::GeneralizedTime,
            "1.3.6.1.4.1.1466.115.121.1.50" => SyntaxKind::TelephoneNumber,
            "1.3.6.1.4.1.1466.115.121.1.36" => SyntaxKind::NumericString,
            "1.3.6.1.1.16.1" => SyntaxKind::Uuid,
            _ => SyntaxKind::OctetString,
        }
    }

    /// Cheap structural validation of a text value against the syntax.
    pub fn accepts(self, s: &str) -> bool {
        match self {
            SyntaxKind::DirectoryString => !s.is_empty(),
            SyntaxKind::Ia5String => s.is_ascii(),
            SyntaxKind::PrintableString => s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || " '()+,-./:=?".contains(c)),
            SyntaxKind::Integer => {
                let digits = s.strip_prefix('-').unwrap_or(s);
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            }
            SyntaxKind::Boolean => s == "TRUE" || s == "FALSE",
            SyntaxKind::Oid => {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            }
            SyntaxKind::GeneralizedTime => {
                s.len() >= 11 && s.ends_with('Z') && s[..10].bytes().all(|b| b.is_ascii_digit())
            }
            SyntaxKind::TelephoneNumber => !s.is_empty(),
            SyntaxKind::NumericString => s.bytes().all(|b| b.is_ascii_digit() || b == b' '),
            SyntaxKind::Dn => true, // checked via full DN parse by the caller
            SyntaxKind::Uuid => {
                s.len() == 36 && s.bytes().filter(|&b| b == b'-').count() == 4
            }
            SyntaxKind::OctetString => true,
        }
    }
}

/// Equality/ordering behavior classes. Named matching rules map onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingRuleKind {
    CaseIgnore,
    CaseExact,
    OctetString,
    Integer,
    Numeric,
    Telephone,
    DistinguishedName,
    GeneralizedTime,
    Boolean,
    Oid,
    Uuid,
}

impl MatchingRuleKind {
    pub fn from_rule_name(name: &str) -> Option<MatchingRuleKind> {
        let base = name
            .strip_suffix("SubstringsMatch")
            .or_else(|| name.strip_suffix("OrderingMatch"))
            .or_else(|| name.strip_suffix("Match"))
            .unwrap_or(name);
        match base {
            "caseIgnore" | "caseIgnoreIA5" | "caseIgnoreList" => Some(MatchingRuleKind::CaseIgnore),
            "caseExact" | "caseExactIA5" => Some(MatchingRuleKind::CaseExact),
            "octetString" => Some(MatchingRuleKind::OctetString),
            "integer" => Some(MatchingRuleKind::Integer),
            "numericString" => Some(MatchingRuleKind::Numeric),
            "telephoneNumber" => Some(MatchingRuleKind::Telephone),
            "distinguishedName" | "uniqueMember" => Some(MatchingRuleKind::DistinguishedName),
            "generalizedTime" => Some(MatchingRuleKind::GeneralizedTime),
            "booleanMatch" | "boolean" => Some(MatchingRuleKind::Boolean),
            "objectIdentifier" | "objectIdentifierFirstComponent" => Some(MatchingRuleKind::Oid),
            "uuid" | "UUID" => Some(MatchingRuleKind::Uuid),
            _ => None,
        }
    }

    fn default_for_syntax(syntax: SyntaxKind) -> MatchingRuleKind {
        match syntax {
            SyntaxKind::Integer => MatchingRuleKind::Integer,
            SyntaxKind::Dn => MatchingRuleKind::DistinguishedName,
            SyntaxKind::Boolean => MatchingRuleKind::Boolean,
            SyntaxKind::Oid => MatchingRuleKind::Oid,
            SyntaxKind::GeneralizedTime => MatchingRuleKind::GeneralizedTime,
            SyntaxKind::TelephoneNumber => MatchingRuleKind::Telephone,
            SyntaxKind::NumericString => MatchingRuleKind::Numeric,
            SyntaxKind::Uuid => MatchingRuleKind::Uuid,
            SyntaxKind::OctetString => MatchingRuleKind::OctetString,
            _ => MatchingRuleKind::CaseIgnore,
        }
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// AttributeType, ObjectClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    UserApplications,
    DirectoryOperation,
    DistributedOperation,
    DsaOperation,
}

#[derive(Debug, Clone)]
pub struct AttributeType {
    pub oid: String,
    pub names: Vec<String>,
    pub description: Option<String>,
    pub superior: Option<String>,
    pub equality: Option<String>,
    pub ordering: Option<String>,
    pub substring: Option<String>,
    pub syntax: Option<String>,
    pub single_value: bool,
    pub collective: bool,
    pub no_user_modification: bool,
    pub usage: Usage,
    pub obsolete: bool,
}

impl AttributeType {
    pub fn name(&self) -> &str {
        self.names.first().map(|s| s.as_str()).unwrap_or(&self.oid)
    }

    pub fn is_operational(&self) -> bool {
        self.usage != Usage::UserApplications
    }
}

impl fmt::Display for AttributeType {
    /// Renders the RFC 4512 description (for the subschema subentry).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( {}", self.oid)?;
        match self.names.len() {
            0 => {}
            1 => write!(f, " NAME '{}'", self.names[0])?,
            _ => {
                write!(f, " NAME (")?;
                for n in &self.names {
                    write!(f, " '{}'", n)?;
                }
                write!(f, " )")?;
            }
        }
        if let Some(sup) = &self.superior {
            write!(f, " SUP {}", sup)?;
        }
        if let Some(eq) = &self.equality {
            write!(f, " EQUALITY {}", eq)?;
        }
        if let Some(ord) = &self.ordering {
            write!(f, " ORDERING {}", ord)?;
        }
        if let Some(sub) = &self.substring {
            write!(f, " SUBSTR {}", sub)?;
        }
        if let Some(syn) = &self.syntax {
            write!(f, " SYNTAX {}", syn)?;
        }
        if self.single_value {
            write!(f, " SINGLE-VALUE")?;
        }
        if self.collective {
            write!(f, " COLLECTIVE")?;
        }
        if self.no_user_modification {
            write!(f, " NO-USER-MODIFICATION")?;
        }
        match self.usage {
            Usage::UserApplications => {}
            Usage::DirectoryOperation => write!(f, " USAGE directoryOperation")?,
            Usage::DistributedOperation => write!(f, " USAGE distributedOperation")?,
            Usage::DsaOperation => write!(f, " USAGE dSAOperation")?,
        }
        write!(f, " )")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClassKind {
    Abstract,
    Structural,
    Auxiliary,
}

#[derive(Debug, Clone)]
pub struct ObjectClass {
    pub oid: String,
    pub names: Vec<String>,
    pub description: Option<String>,
    pub superiors: Vec<String>,
    pub kind: ObjectClassKind,
    pub must: Vec<String>,
    pub may: Vec<String>,
    pub obsolete: bool,
}

impl ObjectClass {
    pub fn name(&self) -> &str {
        self.names.first().map(|s| s.as_str()).unwrap_or(&self.oid)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( {}", self.oid)?;
        match self.names.len() {
            0 => {}
            1 => write!(f, " NAME '{}'", self.names[0])?,
            _ => {
                write!(f, " NAME (")?;
                for n in &self.names {
                    write!(f, " '{}'", n)?;
                }
                write!(f, " )")?;
            }
        }
        if !self.superiors.is_empty() {
            if self.superiors.len() == 1 {
                write!(f, " SUP {}", self.superiors[0])?;
            } else {
                write!(f, " SUP ( {} )", self.superiors.join(" $ "))?;
            }
        }
        match self.kind {
            ObjectClassKind::Abstract => write!(f, " ABSTRACT")?,
            ObjectClassKind::Structural => write!(f, " STRUCTURAL")?,
            ObjectClassKind::Auxiliary => write!(f, " AUXILIARY")?,
        }
        let write_list = |f: &mut fmt::Formatter<'_>, kw: &str, list: &[String]| match list.len() {
            0 => Ok(()),
            1 => write!(f, " {} {}", kw, list[0]),
            _ => write!(f, " {} ( {} )", kw, list.join(" $ ")),
        };
        write_list(f, "MUST", &self.must)?;
        write_list(f, "MAY", &self.may)?;
        write!(f, " )")
    }
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    attribute_types: Vec<AttributeType>,
    attribute_index: HashMap<CaseFold, usize>,
    object_classes: Vec<ObjectClass>,
    class_index: HashMap<CaseFold, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    // -- registration -------------------------------------------------------

    pub fn add_attribute_type(&mut self, at: AttributeType) {
        let idx = self.attribute_types.len();
        self.attribute_index.insert(CaseFold::new(&at.oid), idx);
        for name in &at.names {
            self.attribute_index.insert(CaseFold::new(name), idx);
        }
        self.attribute_types.push(at);
    }

    pub fn add_object_class(&mut self, oc: ObjectClass) {
        let idx = self.object_classes.len();
        self.class_index.insert(CaseFold::new(&oc.oid), idx);
        for name in &oc.names {
            self.class_index.insert(CaseFold::new(name), idx);
        }
        self.object_classes.push(oc);
    }

    // -- lookup -------------------------------------------------------------

    pub fn attribute_type(&self, id: &str) -> Option<&AttributeType> {
        let base = id.split(';').next().unwrap_or(id); // strip ;binary options
        self.attribute_index
            .get(&CaseFold::new(base))
            .map(|&i| &self.attribute_types[i])
    }

    /// Like `attribute_type` but failing with `undefinedAttributeType`.
    pub fn require_attribute_type(&self, id: &str) -> Result<&AttributeType> {
        self.attribute_type(id)
            .ok_or_else(|| DirectoryError::undefined_attribute_type(id))
    }

    pub fn object_class(&self, id: &str) -> Option<&ObjectClass> {
        self.class_index
            .get(&CaseFold::new(id))
            .map(|&i| &self.object_classes[i])
    }

    pub fn attribute_types(&self) -> impl Iterator<Item = &AttributeType> {
        self.attribute_types.iter()
    }

    pub fn object_classes(&self) -> impl Iterator<Item = &ObjectClass> {
        self.object_classes.iter()
    }

    /// Resolve a user-supplied attribute identifier to its canonical OID.
    pub fn resolve_oid(&self, id: &str) -> Result<String> {
        Ok(self.require_attribute_type(id)?.oid.clone())
    }

    // -- matching semantics -------------------------------------------------

    pub fn syntax_of(&self, at: &AttributeType) -> SyntaxKind {
        let mut current = Some(at);
        while let Some(a) = current {
            if let Some(syn) = &a.syntax {
                return SyntaxKind::from_oid(syn);
            }
            current = a.superior.as_deref().and_then(|s| self.attribute_type(s));
        }
        SyntaxKind::DirectoryString
    }

    /// Effective equality rule: the attribute's own, inherited from its
    /// superior chain, or defaulted from the syntax.
    pub fn equality_rule(&self, at: &AttributeType) -> MatchingRuleKind {
        let mut current = Some(at);
        while let Some(a) = current {
            if let Some(eq) = &a.equality {
                if let Some(kind) = MatchingRuleKind::from_rule_name(eq) {
                    return kind;
                }
            }
            current = a.superior.as_deref().and_then(|s| self.attribute_type(s));
        }
        MatchingRuleKind::default_for_syntax(self.syntax_of(at))
    }

    pub fn ordering_rule(&self, at: &AttributeType) -> MatchingRuleKind {
        let mut current = Some(at);
        while let Some(a) = current {
            if let Some(ord) = &a.ordering {
                if let Some(kind) = MatchingRuleKind::from_rule_name(ord) {
                    return kind;
                }
            }
            current = a.superior.as_deref().and_then(|s| self.attribute_type(s));
        }
        self.equality_rule(at)
    }

    /// Normalize a value under the attribute's equality matching rule.
    /// Binary values keep their octets, rendered as a `#`-prefixed hex string
    /// so they sort and compare bytewise.
    pub fn normalize_value(&self, at: &AttributeType, value: &Value) -> Result<String> {
        match value {
            Value::Binary(b) => Ok(hex_norm(b)),
            Value::Text(s) => self.normalize_text(at, s),
        }
    }

    fn normalize_text(&self, at: &AttributeType, s: &str) -> Result<String> {
        let rule = self.equality_rule(at);
        let normalized = match rule {
            MatchingRuleKind::CaseIgnore => collapse_spaces(s).to_lowercase(),
            MatchingRuleKind::CaseExact => collapse_spaces(s),
            MatchingRuleKind::OctetString => s.to_string(),
            MatchingRuleKind::Integer => {
                let t = s.trim();
                let (sign, digits) = match t.strip_prefix('-') {
                    Some(d) => ("-", d),
                    None => ("", t),
                };
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(DirectoryError::invalid_attribute_syntax(
                        at.name(),
                        "not an integer",
                    ));
                }
                let stripped = digits.trim_start_matches('0');
                let canon = if stripped.is_empty() { "0" } else { stripped };
                if canon == "0" {
                    canon.to_string()
                } else {
                    format!("{}{}", sign, canon)
                }
            }
            MatchingRuleKind::Numeric => s.chars().filter(|c| !c.is_whitespace()).collect(),
            MatchingRuleKind::Telephone => s
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect(),
            MatchingRuleKind::DistinguishedName => {
                let dn = Dn::parse(self, s)?;
                dn.norm().to_string()
            }
            MatchingRuleKind::GeneralizedTime => s.trim().to_uppercase(),
            MatchingRuleKind::Boolean => {
                let t = s.trim().to_uppercase();
                if t != "TRUE" && t != "FALSE" {
                    return Err(DirectoryError::invalid_attribute_syntax(
                        at.name(),
                        "not a boolean",
                    ));
                }
                t
            }
            MatchingRuleKind::Oid => s.trim().to_lowercase(),
            MatchingRuleKind::Uuid => s.trim().to_lowercase(),
        };
        Ok(normalized)
    }

    /// Validate a value against the attribute's syntax.
    pub fn check_syntax(&self, at: &AttributeType, value: &Value) -> Result<()> {
        match value {
            Value::Binary(_) => Ok(()),
            Value::Text(s) => {
                let syntax = self.syntax_of(at);
                if syntax == SyntaxKind::Dn {
                    Dn::parse(self, s).map(|_| ()).map_err(|e| {
                        DirectoryError::invalid_attribute_syntax(at.name(), &e.message)
                    })
                } else if syntax.accepts(s) {
                    Ok(())
                } else {
                    Err(DirectoryError::invalid_attribute_syntax(
                        at.name(),
                        "value does not conform to syntax",
                    ))
                }
            }
        }
    }

    /// Ordering comparison of two already-normalized values.
    pub fn compare_normalized(&self, at: &AttributeType, a: &str, b: &str) -> Ordering {
        match self.ordering_rule(at) {
            MatchingRuleKind::Integer => {
                match (a.parse::<i128>(), b.parse::<i128>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => a.cmp(b),
                }
            }
            _ => a.cmp(b),
        }
    }

    // -- object class closure -----------------------------------------------

    /// Compute the transitive closure of the given object classes:
    /// superclasses, the MUST/MAY attribute sets, and the structural class.
    pub fn object_class_closure(&self, names: &[String]) -> Result<ObjectClassClosure<'_>> {
        let mut closure = ObjectClassClosure {
            classes: Vec::new(),
            must: Vec::new(),
            may: Vec::new(),
            structural: None,
        };
        for name in names {
            let oc = self.object_class(name).ok_or_else(|| {
                DirectoryError::object_class_violation(format!("unknown objectClass: {}", name))
            })?;
            closure.push_class(oc);
        }

        // Iterate by index: walking one class can append its superclasses.
        let mut i = 0;
        while i < closure.classes.len() {
            let oc = closure.classes[i];
            for sup in &oc.superiors {
                let sup_oc = self.object_class(sup).ok_or_else(|| {
                    DirectoryError::object_class_violation(format!(
                        "superclass not found: {}",
                        sup
                    ))
                })?;
                closure.push_class(sup_oc);
            }
            if oc.kind == ObjectClassKind::Structural && closure.structural.is_none() {
                closure.structural = Some(oc);
            }
            for attr in &oc.must {
                let at = self.require_attribute_type(attr)?;
                closure.push_must(at);
            }
            for attr in &oc.may {
                let at = self.require_attribute_type(attr)?;
                closure.push_may(at);
            }
            i += 1;
        }
        Ok(closure)
    }
}

/// MUST/MAY closure of a set of object classes.
#[derive(Debug)]
pub struct ObjectClassClosure<'a> {
    pub classes: Vec<&'a ObjectClass>,
    pub must: Vec<&'a AttributeType>,
    pub may: Vec<&'a AttributeType>,
    pub structural: Option<&'a ObjectClass>,
}

impl<'a> ObjectClassClosure<'a> {
    fn push_class(&mut self, oc: &'a ObjectClass) {
        if !self.classes.iter().any(|c| std::ptr::eq(*c, oc)) {
            self.classes.push(oc);
        }
    }

    fn push_must(&mut self, at: &'a AttributeType) {
        self.may.retain(|m| !std::ptr::eq(*m, at));
        if !self.must.iter().any(|m| std::ptr::eq(*m, at)) {
            self.must.push(at);
        }
    }

    fn push_may(&mut self, at: &'a AttributeType) {
        if !self.must.iter().any(|m| std::ptr::eq(*m, at))
            && !self.may.iter().any(|m| std::ptr::eq(*m, at))
        {
            self.may.push(at);
        }
    }

    /// Is the attribute allowed (MUST or MAY) for this class set?
    pub fn allows(&self, at: &AttributeType) -> bool {
        self.must.iter().any(|m| m.oid == at.oid) || self.may.iter().any(|m| m.oid == at.oid)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes
            .iter()
            .any(|c| c.oid == name || c.names.iter().any(|n| n.eq_ignore_ascii_case(name)))
    }
}

fn hex_norm(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2 + 1);
    s.push('#');
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        bootstrap_registry()
    }

    // -- Group 1: lookup and resolution --

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = registry();
        assert!(reg.attribute_type("CN").is_some());
        assert!(reg.attribute_type("commonname").is_some());
        assert_eq!(reg.attribute_type("cn").unwrap().oid, "2.5.4.3");
    }

    #[test]
    fn lookup_by_oid() {
        let reg = registry();
        assert_eq!(reg.attribute_type("2.5.4.3").unwrap().name(), "cn");
    }

    #[test]
    fn attribute_options_are_stripped() {
        let reg = registry();
        assert!(reg.attribute_type("cn;binary").is_some());
    }

    #[test]
    fn unknown_attribute_errors() {
        let reg = registry();
        let err = reg.require_attribute_type("frobnitz").unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::UndefinedAttributeType);
    }

    // -- Group 2: normalization --

    #[test]
    fn case_ignore_normalization() {
        let reg = registry();
        let cn = reg.attribute_type("cn").unwrap();
        let norm = reg
            .normalize_value(cn, &Value::text("  Alice   SMITH "))
            .unwrap();
        assert_eq!(norm, "alice smith");
    }

    #[test]
    fn integer_normalization() {
        let reg = registry();
        let uid = reg.attribute_type("uidNumber").unwrap();
        assert_eq!(reg.normalize_value(uid, &Value::text("007")).unwrap(), "7");
        assert_eq!(reg.normalize_value(uid, &Value::text("-0")).unwrap(), "0");
        assert!(reg.normalize_value(uid, &Value::text("x1")).is_err());
    }

    #[test]
    fn binary_normalization_is_hex() {
        let reg = registry();
        let photo = reg.attribute_type("jpegPhoto").unwrap();
        let norm = reg
            .normalize_value(photo, &Value::binary(vec![0xde, 0xad]))
            .unwrap();
        assert_eq!(norm, "#dead");
    }

    #[test]
    fn dn_valued_attribute_normalizes_via_dn_parser() {
        let reg = registry();
        let see = reg.attribute_type("seeAlso").unwrap();
        let norm = reg
            .normalize_value(see, &Value::text("CN=Some One, O=Example"))
            .unwrap();
        assert_eq!(norm, "cn=some one,o=example");
    }

    // -- Group 3: ordering --

    #[test]
    fn integer_ordering_is_numeric() {
        let reg = registry();
        let uid = reg.attribute_type("uidNumber").unwrap();
        assert_eq!(reg.compare_normalized(uid, "9", "10"), Ordering::Less);
    }

    #[test]
    fn string_ordering_is_lexicographic() {
        let reg = registry();
        let cn = reg.attribute_type("cn").unwrap();
        assert_eq!(reg.compare_normalized(cn, "abc", "abd"), Ordering::Less);
    }

    // -- Group 4: object class closure --

    #[test]
    fn person_closure_includes_top() {
        let reg = registry();
        let closure = reg
            .object_class_closure(&["person".to_string()])
            .unwrap();
        assert!(closure.has_class("top"));
        assert_eq!(closure.structural.unwrap().name(), "person");
        let must: Vec<&str> = closure.must.iter().map(|a| a.name()).collect();
        assert!(must.contains(&"cn"));
        assert!(must.contains(&"sn"));
        assert!(must.contains(&"objectClass"));
    }

    #[test]
    fn closure_rejects_unknown_class() {
        let reg = registry();
        let err = reg
            .object_class_closure(&["noSuchClass".to_string()])
            .unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::ObjectClassViolation);
    }

    #[test]
    fn may_does_not_duplicate_must() {
        let reg = registry();
        let closure = reg
            .object_class_closure(&["person".to_string(), "organizationalPerson".to_string()])
            .unwrap();
        let cn = reg.attribute_type("cn").unwrap();
        assert!(closure.must.iter().any(|a| a.oid == cn.oid));
        assert!(!closure.may.iter().any(|a| a.oid == cn.oid));
    }

    // -- Group 5: rendering --

    #[test]
    fn attribute_type_roundtrips_through_display() {
        let reg = registry();
        let cn = reg.attribute_type("cn").unwrap();
        let rendered = cn.to_string();
        let reparsed = parse_attribute_type(&rendered).unwrap();
        assert_eq!(reparsed.oid, cn.oid);
        assert_eq!(reparsed.names, cn.names);
        assert_eq!(reparsed.equality, cn.equality);
    }
}
