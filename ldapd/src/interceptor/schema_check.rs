//! Schema interceptor.
//!
//! Enforces object class and attribute rules on mutations: a structural
//! class must be present, MUST attributes must exist, every attribute must
//! be allowed by the class closure (or the entry is extensible), values must
//! conform to their syntax, and single-valued types hold one value. For
//! modify, the rules run against the would-be result, so a violating list
//! fails before anything persists.

use std::sync::Arc;

use crate::context::OperationContext;
use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::interceptor::{
    names, AddRequest, Interceptor, ModifyRequest, Next, RenameRequest,
};
use crate::nexus::PartitionNexus;
use crate::schema::{ids, SchemaRegistry};

pub struct SchemaInterceptor {
    nexus: Arc<PartitionNexus>,
}

impl SchemaInterceptor {
    pub fn new(nexus: Arc<PartitionNexus>) -> Self {
        SchemaInterceptor { nexus }
    }
}

/// Validate a whole entry against the registry.
pub fn validate_entry(registry: &SchemaRegistry, entry: &Entry) -> Result<()> {
    let classes = entry.object_classes(registry);
    if classes.is_empty() {
        return Err(DirectoryError::object_class_violation(format!(
            "{}: no objectClass attribute",
            entry.dn.user()
        )));
    }
    let closure = registry.object_class_closure(&classes)?;
    if closure.structural.is_none() {
        return Err(DirectoryError::object_class_violation(format!(
            "{}: no structural object class",
            entry.dn.user()
        )));
    }
    let extensible = closure.has_class(ids::OC_EXTENSIBLE);

    for must in &closure.must {
        if entry.get(registry, &must.oid).is_none() {
            return Err(DirectoryError::object_class_violation(format!(
                "{}: missing required attribute {}",
                entry.dn.user(),
                must.name()
            )));
        }
    }

    for attr in entry.attributes() {
        let at = registry.require_attribute_type(&attr.oid)?;
        if at.single_value && attr.len() > 1 {
            return Err(DirectoryError::constraint_violation(format!(
                "{} is single-valued",
                at.name()
            )));
        }
        for value in attr.values() {
            registry.check_syntax(at, value)?;
        }
        // Operational attributes are stamped by the server; collective ones
        // live on subentries. Neither is listed in MUST/MAY.
        if at.is_operational() || at.collective {
            continue;
        }
        if !extensible && !closure.allows(at) {
            return Err(DirectoryError::object_class_violation(format!(
                "{}: attribute {} not allowed by object classes",
                entry.dn.user(),
                at.name()
            )));
        }
    }
    Ok(())
}

impl Interceptor for SchemaInterceptor {
    fn name(&self) -> &'static str {
        names::SCHEMA
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        validate_entry(&ctx.registry, &req.entry)?;
        next.add(ctx, req)
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let current = self.nexus.lookup(ctx, &req.dn)?;
        let outcome = current.apply_modifications(&ctx.registry, &req.mods)?;
        validate_entry(&ctx.registry, &outcome)?;
        next.modify(ctx, req)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        if let Some(new_rdn) = &req.new_rdn {
            let current = self.nexus.lookup(ctx, &req.dn)?;
            let classes = current.object_classes(&ctx.registry);
            let closure = ctx.registry.object_class_closure(&classes)?;
            let extensible = closure.has_class(ids::OC_EXTENSIBLE);
            for ava in new_rdn.avas() {
                let at = ctx.registry.require_attribute_type(&ava.oid)?;
                if !extensible && !closure.allows(at) && !at.is_operational() {
                    return Err(DirectoryError::naming_violation(format!(
                        "RDN attribute {} not allowed by object classes",
                        at.name()
                    )));
                }
            }
        }
        next.rename(ctx, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Dn;
    use crate::schema::bootstrap_registry;

    fn entry_with(
        registry: &SchemaRegistry,
        classes: &[&str],
        attrs: &[(&str, &str)],
    ) -> Entry {
        let dn = Dn::parse(registry, "cn=test,o=example").unwrap();
        let mut e = Entry::new(dn);
        for c in classes {
            e.add(registry, "objectClass", *c).unwrap();
        }
        for (a, v) in attrs {
            e.add(registry, *a, *v).unwrap();
        }
        e
    }

    #[test]
    fn valid_person_passes() {
        let reg = bootstrap_registry();
        let e = entry_with(&reg, &["top", "person"], &[("cn", "test"), ("sn", "t")]);
        assert!(validate_entry(&reg, &e).is_ok());
    }

    #[test]
    fn missing_must_fails() {
        let reg = bootstrap_registry();
        let e = entry_with(&reg, &["top", "person"], &[("cn", "test")]);
        let err = validate_entry(&reg, &e).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::ObjectClassViolation);
        assert!(err.message.contains("sn"));
    }

    #[test]
    fn no_structural_class_fails() {
        let reg = bootstrap_registry();
        let e = entry_with(&reg, &["top"], &[("cn", "test")]);
        let err = validate_entry(&reg, &e).unwrap_err();
        assert!(err.message.contains("structural"));
    }

    #[test]
    fn disallowed_attribute_fails() {
        let reg = bootstrap_registry();
        let e = entry_with(
            &reg,
            &["top", "person"],
            &[("cn", "test"), ("sn", "t"), ("mail", "t@example.com")],
        );
        let err = validate_entry(&reg, &e).unwrap_err();
        assert!(err.message.contains("mail"));
    }

    #[test]
    fn extensible_object_allows_anything() {
        let reg = bootstrap_registry();
        let e = entry_with(
            &reg,
            &["top", "person", "extensibleObject"],
            &[("cn", "test"), ("sn", "t"), ("mail", "t@example.com")],
        );
        assert!(validate_entry(&reg, &e).is_ok());
    }

    #[test]
    fn bad_syntax_fails() {
        let reg = bootstrap_registry();
        let e = entry_with(
            &reg,
            &["top", "inetOrgPerson"],
            &[("cn", "test"), ("sn", "t"), ("uidNumber", "not-a-number")],
        );
        let err = validate_entry(&reg, &e).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::InvalidAttributeSyntax);
    }

    #[test]
    fn unknown_object_class_fails() {
        let reg = bootstrap_registry();
        let e = entry_with(&reg, &["top", "starship"], &[("cn", "test")]);
        assert!(validate_entry(&reg, &e).is_err());
    }
}
