//! RFC 4512 schema definition parsers.
//!
//! Parses AttributeTypeDescription and ObjectClassDescription values as they
//! appear in schema LDIF (`attributeTypes: ( 2.5.4.3 NAME 'cn' ... )`).

use crate::error::{DirectoryError, Result, ResultCode};
use crate::schema::{AttributeType, ObjectClass, ObjectClassKind, Usage};

// ---------------------------------------------------------------------------
// SchemaTokenizer
// ---------------------------------------------------------------------------

/// Tokenizer for RFC 4512 schema definitions.
/// Tokens: '(', ')', '$', quoted strings 'name', or bare words.
struct SchemaTokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> SchemaTokenizer<'a> {
    fn new(input: &'a str) -> Self {
        SchemaTokenizer { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input.as_bytes()[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return None;
        }
        let b = self.input.as_bytes()[self.pos];
        match b {
            b'(' | b')' | b'$' => {
                self.pos += 1;
                Some((b as char).to_string())
            }
            b'\'' => {
                self.pos += 1;
                let start = self.pos;
                while self.pos < self.input.len() && self.input.as_bytes()[self.pos] != b'\'' {
                    self.pos += 1;
                }
                let s = self.input[start..self.pos].to_string();
                if self.pos < self.input.len() {
                    self.pos += 1;
                }
                Some(s)
            }
            _ => {
                let start = self.pos;
                while self.pos < self.input.len() {
                    let c = self.input.as_bytes()[self.pos];
                    if c.is_ascii_whitespace() || c == b'(' || c == b')' || c == b'\'' || c == b'$'
                    {
                        break;
                    }
                    self.pos += 1;
                }
                Some(self.input[start..self.pos].to_string())
            }
        }
    }

    /// Read a list of names/OIDs: either a single value or ( v1 $ v2 ... ).
    fn read_oid_list(&mut self) -> Vec<String> {
        self.skip_whitespace();
        if self.pos < self.input.len() && self.input.as_bytes()[self.pos] == b'(' {
            self.next_token();
            let mut result = Vec::new();
            while let Some(tok) = self.next_token() {
                if tok == ")" {
                    break;
                }
                if tok == "$" {
                    continue;
                }
                result.push(tok);
            }
            result
        } else {
            match self.next_token() {
                Some(v) if v != ")" => vec![v],
                _ => vec![],
            }
        }
    }

    /// Skip the next token or parenthesized group (unrecognized keywords).
    fn skip_value(&mut self) {
        self.skip_whitespace();
        if self.pos < self.input.len() && self.input.as_bytes()[self.pos] == b'(' {
            self.next_token();
            let mut depth = 1;
            while depth > 0 {
                match self.next_token() {
                    Some(t) if t == "(" => depth += 1,
                    Some(t) if t == ")" => depth -= 1,
                    None => break,
                    _ => {}
                }
            }
        } else if self.pos < self.input.len() && self.input.as_bytes()[self.pos] == b'\'' {
            self.next_token();
        } else {
            // Peek -- keywords (all uppercase) and ')' stay in the stream.
            let saved_pos = self.pos;
            if let Some(tok) = self.next_token() {
                if tok == ")" || tok.chars().all(|c| c.is_ascii_uppercase() || c == '-') {
                    self.pos = saved_pos;
                }
            }
        }
    }
}

fn parse_err(what: &str, detail: &str) -> DirectoryError {
    DirectoryError::new(
        ResultCode::InvalidAttributeSyntax,
        format!("bad {} description: {}", what, detail),
    )
}

// ---------------------------------------------------------------------------
// AttributeTypeDescription
// ---------------------------------------------------------------------------

/// Parse an RFC 4512 AttributeTypeDescription.
pub fn parse_attribute_type(s: &str) -> Result<AttributeType> {
    let mut tok = SchemaTokenizer::new(s);

    match tok.next_token() {
        Some(t) if t == "(" => {}
        _ => return Err(parse_err("attributeType", "expected '('")),
    }

    let oid = tok
        .next_token()
        .ok_or_else(|| parse_err("attributeType", "expected OID"))?;

    let mut at = AttributeType {
        oid,
        names: Vec::new(),
        description: None,
        superior: None,
        equality: None,
        ordering: None,
        substring: None,
        syntax: None,
        single_value: false,
        collective: false,
        no_user_modification: false,
        usage: Usage::UserApplications,
        obsolete: false,
    };

    loop {
        let keyword = match tok.next_token() {
            Some(t) if t == ")" => break,
            Some(t) => t,
            None => break,
        };
        match keyword.as_str() {
            "NAME" => at.names = tok.read_oid_list(),
            "DESC" => at.description = tok.next_token(),
            "SUP" => at.superior = tok.next_token(),
            "EQUALITY" => at.equality = tok.next_token(),
            "ORDERING" => at.ordering = tok.next_token(),
            "SUBSTR" | "SUBSTRINGS" => at.substring = tok.next_token(),
            "SYNTAX" => {
                // A syntax OID may carry a length bound: 1.3.6.1...15{64}.
                at.syntax = tok.next_token().map(|s| match s.find('{') {
                    Some(brace) => s[..brace].to_string(),
                    None => s,
                })
            }
            "SINGLE-VALUE" => at.single_value = true,
            "COLLECTIVE" => at.collective = true,
            "NO-USER-MODIFICATION" => at.no_user_modification = true,
            "OBSOLETE" => at.obsolete = true,
            "USAGE" => {
                let usage = tok
                    .next_token()
                    .ok_or_else(|| parse_err("attributeType", "USAGE without value"))?;
                at.usage = match usage.as_str() {
                    "userApplications" => Usage::UserApplications,
                    "directoryOperation" => Usage::DirectoryOperation,
                    "distributedOperation" => Usage::DistributedOperation,
                    "dSAOperation" => Usage::DsaOperation,
                    other => return Err(parse_err("attributeType", other)),
                };
            }
            _ => tok.skip_value(),
        }
    }

    Ok(at)
}

// ---------------------------------------------------------------------------
// ObjectClassDescription
// ---------------------------------------------------------------------------

/// Parse an RFC 4512 ObjectClassDescription.
pub fn parse_object_class(s: &str) -> Result<ObjectClass> {
    let mut tok = SchemaTokenizer::new(s);

    match tok.next_token() {
        Some(t) if t == "(" => {}
        _ => return Err(parse_err("objectClass", "expected '('")),
    }

    let oid = tok
        .next_token()
        .ok_or_else(|| parse_err("objectClass", "expected OID"))?;

    let mut oc = ObjectClass {
        oid,
        names: Vec::new(),
        description: None,
        superiors: Vec::new(),
        kind: ObjectClassKind::Structural,
        must: Vec::new(),
        may: Vec::new(),
        obsolete: false,
    };

    loop {
        let keyword = match tok.next_token() {
            Some(t) if t == ")" => break,
            Some(t) => t,
            None => break,
        };
        match keyword.as_str() {
            "NAME" => oc.names = tok.read_oid_list(),
            "DESC" => oc.description = tok.next_token(),
            "SUP" => oc.superiors = tok.read_oid_list(),
            "ABSTRACT" => oc.kind = ObjectClassKind::Abstract,
            "STRUCTURAL" => oc.kind = ObjectClassKind::Structural,
            "AUXILIARY" => oc.kind = ObjectClassKind::Auxiliary,
            "MUST" => oc.must = tok.read_oid_list(),
            "MAY" => oc.may = tok.read_oid_list(),
            "OBSOLETE" => oc.obsolete = true,
            _ => tok.skip_value(),
        }
    }

    Ok(oc)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Group 1: attribute types --

    #[test]
    fn attribute_type_full() {
        let at = parse_attribute_type(
            "( 2.5.4.3 NAME ( 'cn' 'commonName' ) DESC 'RFC4519: common name' \
             SUP name EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch \
             SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{32768} )",
        )
        .unwrap();
        assert_eq!(at.oid, "2.5.4.3");
        assert_eq!(at.names, vec!["cn", "commonName"]);
        assert_eq!(at.superior.as_deref(), Some("name"));
        assert_eq!(at.equality.as_deref(), Some("caseIgnoreMatch"));
        assert_eq!(at.substring.as_deref(), Some("caseIgnoreSubstringsMatch"));
        // The length bound is stripped from the syntax OID.
        assert_eq!(at.syntax.as_deref(), Some("1.3.6.1.4.1.1466.115.121.1.15"));
        assert!(!at.single_value);
    }

    #[test]
    fn attribute_type_flags() {
        let at = parse_attribute_type(
            "( 1.3.6.1.1.16.4 NAME 'entryUUID' EQUALITY uuidMatch \
             SYNTAX 1.3.6.1.1.16.1 SINGLE-VALUE NO-USER-MODIFICATION \
             USAGE directoryOperation )",
        )
        .unwrap();
        assert!(at.single_value);
        assert!(at.no_user_modification);
        assert_eq!(at.usage, Usage::DirectoryOperation);
        assert!(at.is_operational());
    }

    #[test]
    fn attribute_type_minimal() {
        let at = parse_attribute_type("( 9.9.9 )").unwrap();
        assert_eq!(at.oid, "9.9.9");
        assert!(at.names.is_empty());
        assert_eq!(at.usage, Usage::UserApplications);
    }

    #[test]
    fn attribute_type_malformed() {
        assert!(parse_attribute_type("garbage").is_err());
    }

    // -- Group 2: object classes --

    #[test]
    fn object_class_full() {
        let oc = parse_object_class(
            "( 2.5.6.6 NAME 'person' DESC 'RFC2256: a person' SUP top STRUCTURAL \
             MUST ( sn $ cn ) MAY ( userPassword $ telephoneNumber ) )",
        )
        .unwrap();
        assert_eq!(oc.oid, "2.5.6.6");
        assert_eq!(oc.names, vec!["person"]);
        assert_eq!(oc.superiors, vec!["top"]);
        assert_eq!(oc.kind, ObjectClassKind::Structural);
        assert_eq!(oc.must, vec!["sn", "cn"]);
        assert_eq!(oc.may, vec!["userPassword", "telephoneNumber"]);
    }

    #[test]
    fn object_class_kinds() {
        let abs = parse_object_class("( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )").unwrap();
        assert_eq!(abs.kind, ObjectClassKind::Abstract);
        let aux =
            parse_object_class("( 1.3.6.1.4.1.4203.1.4.1 NAME 'ldapSubEntry' AUXILIARY )").unwrap();
        assert_eq!(aux.kind, ObjectClassKind::Auxiliary);
    }

    #[test]
    fn object_class_unknown_keywords_skipped() {
        let oc = parse_object_class(
            "( 1.2.3 NAME 'test' X-ORIGIN 'RFC 1234' X-SCHEMA-FILE '00core.ldif' MUST cn )",
        )
        .unwrap();
        assert_eq!(oc.names, vec!["test"]);
        assert_eq!(oc.must, vec!["cn"]);
    }

    #[test]
    fn object_class_multiple_superiors() {
        let oc = parse_object_class("( 1.2.3 NAME 'multi' SUP ( top $ person ) )").unwrap();
        assert_eq!(oc.superiors, vec!["top", "person"]);
    }
}
