//! Search filters (RFC 4515).
//!
//! Textual filter parsing into a node tree, plus the schema normalization
//! visitor: attribute identifiers resolve to their canonical form, assertion
//! values pass through the matching-rule normalizer, and leaves naming
//! unknown attributes collapse to `Undefined` (which matches nothing).

use std::fmt;

use crate::entry::Value;
use crate::error::{DirectoryError, Result, ResultCode};
use crate::schema::{MatchingRuleKind, SchemaRegistry};

// ---------------------------------------------------------------------------
// Filter tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality {
        attr: String,
        value: String,
    },
    Presence {
        attr: String,
    },
    GreaterOrEqual {
        attr: String,
        value: String,
    },
    LessOrEqual {
        attr: String,
        value: String,
    },
    Approx {
        attr: String,
        value: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        final_part: Option<String>,
    },
    Extensible {
        attr: Option<String>,
        rule: Option<String>,
        value: String,
        dn_attributes: bool,
    },
    /// A leaf over an unknown attribute type: yields the empty set.
    Undefined,
}

impl Filter {
    /// Parse an RFC 4515 textual filter.
    pub fn parse(s: &str) -> Result<Filter> {
        let mut p = FilterParser {
            bytes: s.trim().as_bytes(),
            pos: 0,
        };
        let filter = p.parse_filter()?;
        p.skip_ws();
        if p.pos != p.bytes.len() {
            return Err(p.error("trailing characters"));
        }
        Ok(filter)
    }

    /// Resolve attributes and normalize assertion values against the schema.
    /// Unknown-attribute leaves become `Undefined`.
    pub fn normalize(&self, registry: &SchemaRegistry) -> Filter {
        match self {
            Filter::And(children) => {
                Filter::And(children.iter().map(|c| c.normalize(registry)).collect())
            }
            Filter::Or(children) => {
                Filter::Or(children.iter().map(|c| c.normalize(registry)).collect())
            }
            Filter::Not(child) => Filter::Not(Box::new(child.normalize(registry))),
            Filter::Equality { attr, value } => match norm_pair(registry, attr, value) {
                Some((attr, value)) => Filter::Equality { attr, value },
                None => Filter::Undefined,
            },
            Filter::Approx { attr, value } => match norm_pair(registry, attr, value) {
                Some((attr, value)) => Filter::Approx { attr, value },
                None => Filter::Undefined,
            },
            Filter::GreaterOrEqual { attr, value } => match norm_pair(registry, attr, value) {
                Some((attr, value)) => Filter::GreaterOrEqual { attr, value },
                None => Filter::Undefined,
            },
            Filter::LessOrEqual { attr, value } => match norm_pair(registry, attr, value) {
                Some((attr, value)) => Filter::LessOrEqual { attr, value },
                None => Filter::Undefined,
            },
            Filter::Presence { attr } => match registry.attribute_type(attr) {
                Some(at) => Filter::Presence {
                    attr: at.name().to_string(),
                },
                None => Filter::Undefined,
            },
            Filter::Substring {
                attr,
                initial,
                any,
                final_part,
            } => {
                let Some(at) = registry.attribute_type(attr) else {
                    return Filter::Undefined;
                };
                let fold = matches!(
                    registry.equality_rule(at),
                    MatchingRuleKind::CaseIgnore | MatchingRuleKind::Telephone
                );
                let norm_part = |p: &String| {
                    if fold {
                        p.to_lowercase()
                    } else {
                        p.clone()
                    }
                };
                Filter::Substring {
                    attr: at.name().to_string(),
                    initial: initial.as_ref().map(norm_part),
                    any: any.iter().map(norm_part).collect(),
                    final_part: final_part.as_ref().map(norm_part),
                }
            }
            Filter::Extensible {
                attr,
                rule,
                value,
                dn_attributes,
            } => {
                if let Some(a) = attr {
                    match norm_pair(registry, a, value) {
                        Some((attr, value)) => Filter::Extensible {
                            attr: Some(attr),
                            rule: rule.clone(),
                            value,
                            dn_attributes: *dn_attributes,
                        },
                        None => Filter::Undefined,
                    }
                } else {
                    self.clone()
                }
            }
            Filter::Undefined => Filter::Undefined,
        }
    }
}

fn norm_pair(registry: &SchemaRegistry, attr: &str, value: &str) -> Option<(String, String)> {
    let at = registry.attribute_type(attr)?;
    let norm = registry
        .normalize_value(at, &Value::text(value))
        .unwrap_or_else(|_| value.to_string());
    Some((at.name().to_string(), norm))
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(cs) => {
                write!(f, "(&")?;
                for c in cs {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Or(cs) => {
                write!(f, "(|")?;
                for c in cs {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Not(c) => write!(f, "(!{})", c),
            Filter::Equality { attr, value } => write!(f, "({}={})", attr, escape(value)),
            Filter::Presence { attr } => write!(f, "({}=*)", attr),
            Filter::GreaterOrEqual { attr, value } => write!(f, "({}>={})", attr, escape(value)),
            Filter::LessOrEqual { attr, value } => write!(f, "({}<={})", attr, escape(value)),
            Filter::Approx { attr, value } => write!(f, "({}~={})", attr, escape(value)),
            Filter::Substring {
                attr,
                initial,
                any,
                final_part,
            } => {
                write!(f, "({}=", attr)?;
                if let Some(i) = initial {
                    write!(f, "{}", escape(i))?;
                }
                write!(f, "*")?;
                for a in any {
                    write!(f, "{}*", escape(a))?;
                }
                if let Some(fin) = final_part {
                    write!(f, "{}", escape(fin))?;
                }
                write!(f, ")")
            }
            Filter::Extensible {
                attr, rule, value, ..
            } => {
                write!(f, "(")?;
                if let Some(a) = attr {
                    write!(f, "{}", a)?;
                }
                if let Some(r) = rule {
                    write!(f, ":{}", r)?;
                }
                write!(f, ":={})", escape(value))
            }
            Filter::Undefined => write!(f, "(undefined)"),
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct FilterParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FilterParser<'a> {
    fn error(&self, msg: &str) -> DirectoryError {
        DirectoryError::new(
            ResultCode::OperationsError,
            format!("invalid filter at byte {}: {}", self.pos, msg),
        )
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        self.skip_ws();
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_leaf()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut children = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'(') => children.push(self.parse_filter()?),
                _ => break,
            }
        }
        if children.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(children)
    }

    fn parse_leaf(&mut self) -> Result<Filter> {
        // attribute description up to an operator character
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'=' || b == b'>' || b == b'<' || b == b'~' || b == b':' || b == b')' {
                break;
            }
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("attribute is not UTF-8"))?
            .trim()
            .to_string();

        match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                if attr.is_empty() {
                    return Err(self.error("missing attribute"));
                }
                self.parse_equality_rhs(attr)
            }
            Some(b'>') | Some(b'<') | Some(b'~') => {
                let op = self.bytes[self.pos];
                self.pos += 1;
                self.expect(b'=')?;
                if attr.is_empty() {
                    return Err(self.error("missing attribute"));
                }
                let value = self.parse_value()?;
                Ok(match op {
                    b'>' => Filter::GreaterOrEqual { attr, value },
                    b'<' => Filter::LessOrEqual { attr, value },
                    _ => Filter::Approx { attr, value },
                })
            }
            Some(b':') => self.parse_extensible(attr),
            _ => Err(self.error("expected operator")),
        }
    }

    /// After `attr=`: plain equality, presence (`*`), or substring.
    fn parse_equality_rhs(&mut self, attr: String) -> Result<Filter> {
        let mut done: Vec<String> = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unexpected end")),
                Some(b')') => break,
                Some(b'*') => {
                    self.pos += 1;
                    done.push(std::mem::take(&mut current));
                }
                Some(b'\\') => {
                    // Raw escaped bytes are folded in as latin-1; assertion
                    // values are re-normalized by the schema pass anyway.
                    current.push(self.parse_escape()? as char);
                }
                Some(b) => {
                    self.pos += 1;
                    current.push(b as char);
                }
            }
        }
        if done.is_empty() {
            return Ok(Filter::Equality {
                attr,
                value: current,
            });
        }
        let mut iter = done.into_iter();
        let initial_raw = iter.next().unwrap_or_default();
        let any: Vec<String> = iter.filter(|p| !p.is_empty()).collect();
        if initial_raw.is_empty() && any.is_empty() && current.is_empty() {
            return Ok(Filter::Presence { attr });
        }
        Ok(Filter::Substring {
            attr,
            initial: (!initial_raw.is_empty()).then_some(initial_raw),
            any,
            final_part: (!current.is_empty()).then_some(current),
        })
    }

    /// `attr:dn:rule:=value`, every prefix component optional except `:=`.
    fn parse_extensible(&mut self, attr: String) -> Result<Filter> {
        let mut dn_attributes = false;
        let mut rule: Option<String> = None;
        loop {
            self.expect(b':')?;
            if self.peek() == Some(b'=') {
                self.pos += 1;
                break;
            }
            let start = self.pos;
            while let Some(b) = self.peek() {
                if b == b':' || b == b')' {
                    break;
                }
                self.pos += 1;
            }
            let word = std::str::from_utf8(&self.bytes[start..self.pos])
                .map_err(|_| self.error("rule is not UTF-8"))?
                .to_string();
            if word.eq_ignore_ascii_case("dn") {
                dn_attributes = true;
            } else if rule.is_none() {
                rule = Some(word);
            } else {
                return Err(self.error("too many matching-rule components"));
            }
        }
        let value = self.parse_value()?;
        if attr.is_empty() && rule.is_none() {
            return Err(self.error("extensible match needs an attribute or a rule"));
        }
        Ok(Filter::Extensible {
            attr: (!attr.is_empty()).then_some(attr),
            rule,
            value,
            dn_attributes,
        })
    }

    fn parse_value(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unexpected end")),
                Some(b')') => return Ok(out),
                Some(b'*') => return Err(self.error("'*' not allowed here")),
                Some(b'\\') => out.push(self.parse_escape()? as char),
                Some(b) => {
                    self.pos += 1;
                    out.push(b as char);
                }
            }
        }
    }

    fn parse_escape(&mut self) -> Result<u8> {
        // self.bytes[self.pos] == b'\\'
        if self.pos + 2 >= self.bytes.len() {
            return Err(self.error("truncated escape"));
        }
        let hi = self.bytes[self.pos + 1];
        let lo = self.bytes[self.pos + 2];
        if !hi.is_ascii_hexdigit() || !lo.is_ascii_hexdigit() {
            return Err(self.error("escape must be two hex digits"));
        }
        self.pos += 3;
        let digit = |b: u8| match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            _ => b - b'A' + 10,
        };
        Ok(digit(hi) * 16 + digit(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;

    // -- Group 1: parsing --

    #[test]
    fn parse_equality() {
        let f = Filter::parse("(cn=alice)").unwrap();
        assert_eq!(
            f,
            Filter::Equality {
                attr: "cn".into(),
                value: "alice".into()
            }
        );
    }

    #[test]
    fn parse_presence() {
        let f = Filter::parse("(objectClass=*)").unwrap();
        assert_eq!(
            f,
            Filter::Presence {
                attr: "objectClass".into()
            }
        );
    }

    #[test]
    fn parse_substring() {
        let f = Filter::parse("(cn=pre*mid*post)").unwrap();
        match f {
            Filter::Substring {
                attr,
                initial,
                any,
                final_part,
            } => {
                assert_eq!(attr, "cn");
                assert_eq!(initial.as_deref(), Some("pre"));
                assert_eq!(any, vec!["mid".to_string()]);
                assert_eq!(final_part.as_deref(), Some("post"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_substring_edges() {
        match Filter::parse("(cn=*tail)").unwrap() {
            Filter::Substring {
                initial, final_part, ..
            } => {
                assert!(initial.is_none());
                assert_eq!(final_part.as_deref(), Some("tail"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match Filter::parse("(cn=head*)").unwrap() {
            Filter::Substring {
                initial, final_part, ..
            } => {
                assert_eq!(initial.as_deref(), Some("head"));
                assert!(final_part.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_composite() {
        let f = Filter::parse("(&(objectClass=person)(|(cn=a*)(!(sn=smith))))").unwrap();
        match f {
            Filter::And(children) => {
                assert_eq!(children.len(), 2);
                match &children[1] {
                    Filter::Or(grand) => assert_eq!(grand.len(), 2),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_ordering_and_approx() {
        assert!(matches!(
            Filter::parse("(uidNumber>=100)").unwrap(),
            Filter::GreaterOrEqual { .. }
        ));
        assert!(matches!(
            Filter::parse("(uidNumber<=100)").unwrap(),
            Filter::LessOrEqual { .. }
        ));
        assert!(matches!(
            Filter::parse("(cn~=alise)").unwrap(),
            Filter::Approx { .. }
        ));
    }

    #[test]
    fn parse_extensible() {
        let f = Filter::parse("(cn:caseExactMatch:=Alice)").unwrap();
        match f {
            Filter::Extensible {
                attr,
                rule,
                value,
                dn_attributes,
            } => {
                assert_eq!(attr.as_deref(), Some("cn"));
                assert_eq!(rule.as_deref(), Some("caseExactMatch"));
                assert_eq!(value, "Alice");
                assert!(!dn_attributes);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_escapes() {
        let f = Filter::parse(r"(cn=a\2ab)").unwrap();
        assert_eq!(
            f,
            Filter::Equality {
                attr: "cn".into(),
                value: "a*b".into()
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Filter::parse("cn=alice").is_err());
        assert!(Filter::parse("(cn=alice").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(=x)").is_err());
    }

    // -- Group 2: normalization --

    #[test]
    fn normalize_folds_case() {
        let reg = bootstrap_registry();
        let f = Filter::parse("(CN=Alice  Smith)").unwrap().normalize(&reg);
        assert_eq!(
            f,
            Filter::Equality {
                attr: "cn".into(),
                value: "alice smith".into()
            }
        );
    }

    #[test]
    fn normalize_unknown_attribute_is_undefined() {
        let reg = bootstrap_registry();
        let f = Filter::parse("(frobnitz=1)").unwrap().normalize(&reg);
        assert_eq!(f, Filter::Undefined);
    }

    #[test]
    fn normalize_recurses() {
        let reg = bootstrap_registry();
        let f = Filter::parse("(&(cn=X)(frobnitz=1))").unwrap().normalize(&reg);
        match f {
            Filter::And(children) => {
                assert_eq!(
                    children[0],
                    Filter::Equality {
                        attr: "cn".into(),
                        value: "x".into()
                    }
                );
                assert_eq!(children[1], Filter::Undefined);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    // -- Group 3: rendering --

    #[test]
    fn display_round_trips() {
        for text in [
            "(cn=alice)",
            "(objectClass=*)",
            "(&(cn=a)(sn=b))",
            "(!(cn=x))",
            "(cn=a*b*c)",
        ] {
            let f = Filter::parse(text).unwrap();
            let again = Filter::parse(&f.to_string()).unwrap();
            assert_eq!(f, again);
        }
    }
}
