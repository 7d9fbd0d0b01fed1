//! Subentry interceptor.
//!
//! Maintains the cache of administrative subentries (`objectClass:
//! subentry`): their subtree specifications, the collective attributes they
//! carry, and their access-control directives. Subentries are invisible to
//! ordinary one-level/subtree searches unless the subentries control is set;
//! an OBJECT-scope search at the subentry itself always sees it (RFC 3672).

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::context::OperationContext;
use crate::entry::{Entry, Value};
use crate::error::{DirectoryError, Result};
use crate::interceptor::aci::AciDirective;
use crate::interceptor::{
    names, AddRequest, DeleteRequest, Interceptor, ListRequest, ModifyRequest, Next,
    RenameRequest,
};
use crate::name::Dn;
use crate::schema::{ids, SchemaRegistry};
use crate::search::{SearchCursor, SearchRequest, SearchScope};

// ---------------------------------------------------------------------------
// SubtreeSpec
// ---------------------------------------------------------------------------

/// RFC 3672 subtree specification, absolutized against the administrative
/// point at cache-build time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtreeSpec {
    /// Base DN of the covered subtree, relative to the administrative point.
    pub base: Option<String>,
    pub minimum: usize,
    /// 0 means unbounded.
    pub maximum: usize,
    pub chop_before: Vec<String>,
    pub chop_after: Vec<String>,
}

impl SubtreeSpec {
    /// Parse `{ base "ou=people", minimum 1, maximum 2,
    /// specificExclusions { chopBefore:"cn=x", chopAfter:"cn=y" } }`.
    pub fn parse(s: &str) -> Result<SubtreeSpec> {
        let inner = s.trim();
        let inner = inner
            .strip_prefix('{')
            .and_then(|r| r.strip_suffix('}'))
            .ok_or_else(|| {
                DirectoryError::invalid_attribute_syntax("subtreeSpecification", "missing braces")
            })?;
        let mut spec = SubtreeSpec::default();
        let mut rest = inner.trim();
        while !rest.is_empty() {
            if let Some(r) = rest.strip_prefix("base") {
                let (value, r) = take_quoted(r)?;
                spec.base = Some(value);
                rest = skip_comma(r);
            } else if let Some(r) = rest.strip_prefix("minimum") {
                let (n, r) = take_number(r)?;
                spec.minimum = n;
                rest = skip_comma(r);
            } else if let Some(r) = rest.strip_prefix("maximum") {
                let (n, r) = take_number(r)?;
                spec.maximum = n;
                rest = skip_comma(r);
            } else if let Some(r) = rest.strip_prefix("specificExclusions") {
                let r = r.trim_start();
                let end = r.find('}').ok_or_else(|| {
                    DirectoryError::invalid_attribute_syntax(
                        "subtreeSpecification",
                        "unterminated exclusions",
                    )
                })?;
                let body = r[..end].trim_start_matches('{');
                for item in body.split(',') {
                    let item = item.trim();
                    if let Some(v) = item.strip_prefix("chopBefore:") {
                        spec.chop_before.push(unquote(v)?);
                    } else if let Some(v) = item.strip_prefix("chopAfter:") {
                        spec.chop_after.push(unquote(v)?);
                    }
                }
                rest = skip_comma(&r[end + 1..]);
            } else {
                return Err(DirectoryError::invalid_attribute_syntax(
                    "subtreeSpecification",
                    rest,
                ));
            }
        }
        Ok(spec)
    }
}

fn take_quoted(s: &str) -> Result<(String, &str)> {
    let s = s.trim_start();
    let rest = s.strip_prefix('"').ok_or_else(|| {
        DirectoryError::invalid_attribute_syntax("subtreeSpecification", "expected quote")
    })?;
    let end = rest.find('"').ok_or_else(|| {
        DirectoryError::invalid_attribute_syntax("subtreeSpecification", "unterminated string")
    })?;
    Ok((rest[..end].to_string(), &rest[end + 1..]))
}

fn unquote(s: &str) -> Result<String> {
    let (value, _) = take_quoted(s)?;
    Ok(value)
}

fn take_number(s: &str) -> Result<(usize, &str)> {
    let s = s.trim_start();
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let n = s[..end].parse::<usize>().map_err(|_| {
        DirectoryError::invalid_attribute_syntax("subtreeSpecification", "expected number")
    })?;
    Ok((n, &s[end..]))
}

fn skip_comma(s: &str) -> &str {
    s.trim_start().trim_start_matches(',').trim_start()
}

// ---------------------------------------------------------------------------
// SubentryCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CachedSubentry {
    pub dn: Dn,
    /// Absolute base of the covered subtree.
    pub base: Dn,
    pub minimum: usize,
    pub maximum: usize,
    pub chop_before: Vec<Dn>,
    pub chop_after: Vec<Dn>,
    /// (attribute id, values) of collective attributes carried here.
    pub collective: Vec<(String, Vec<Value>)>,
    pub aci: Vec<AciDirective>,
}

impl CachedSubentry {
    pub fn covers(&self, target: &Dn) -> bool {
        if !target.at_or_under(&self.base) {
            return false;
        }
        let depth = target.len() - self.base.len();
        if depth < self.minimum {
            return false;
        }
        if self.maximum != 0 && depth > self.maximum {
            return false;
        }
        if self.chop_before.iter().any(|c| target.at_or_under(c)) {
            return false;
        }
        if self.chop_after.iter().any(|c| target.descendant_of(c)) {
            return false;
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct SubentryCache {
    entries: RwLock<Vec<CachedSubentry>>,
}

impl SubentryCache {
    pub fn new() -> SubentryCache {
        SubentryCache::default()
    }

    /// Parse and cache a subentry. The administrative point is the
    /// subentry's parent; the spec base is relative to it.
    pub fn insert(&self, registry: &SchemaRegistry, entry: &Entry) -> Result<()> {
        let admin_point = entry.dn.parent().unwrap_or_else(Dn::empty);
        let spec_text = entry
            .first_text(registry, ids::SUBTREE_SPECIFICATION)
            .unwrap_or("{}");
        let spec = SubtreeSpec::parse(spec_text)?;
        let base = match &spec.base {
            Some(rel) => {
                let rel_dn = Dn::parse(registry, rel)?;
                let mut rdns: Vec<crate::name::Rdn> = Vec::new();
                for i in 0..rel_dn.len() {
                    if let Some(r) = rel_dn.rdn_at(i) {
                        rdns.push(r.clone());
                    }
                }
                let mut dn = admin_point.clone();
                for rdn in rdns.into_iter().rev() {
                    dn = dn.append(rdn);
                }
                dn
            }
            None => admin_point.clone(),
        };
        let abs = |names: &[String]| -> Result<Vec<Dn>> {
            names
                .iter()
                .map(|n| {
                    let rel = Dn::parse(registry, n)?;
                    let mut dn = base.clone();
                    for i in (0..rel.len()).rev() {
                        if let Some(r) = rel.rdn_at(i) {
                            dn = dn.append(r.clone());
                        }
                    }
                    Ok(dn)
                })
                .collect()
        };
        let chop_before = abs(&spec.chop_before)?;
        let chop_after = abs(&spec.chop_after)?;

        let mut collective = Vec::new();
        for attr in entry.attributes() {
            if let Some(at) = registry.attribute_type(&attr.oid) {
                if at.collective {
                    collective.push((attr.id.clone(), attr.values().to_vec()));
                }
            }
        }
        let mut aci = Vec::new();
        if let Some(attr) = entry.get(registry, ids::ACI) {
            for v in attr.values() {
                if let Some(text) = v.as_text() {
                    aci.push(AciDirective::parse(registry, text)?);
                }
            }
        }

        let cached = CachedSubentry {
            dn: entry.dn.clone(),
            base,
            minimum: spec.minimum,
            maximum: spec.maximum,
            chop_before,
            chop_after,
            collective,
            aci,
        };
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.retain(|e| e.dn != cached.dn);
        debug!(subentry = %cached.dn, base = %cached.base, "cached subentry");
        entries.push(cached);
        Ok(())
    }

    pub fn remove(&self, dn: &Dn) {
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|e| e.dn != *dn);
    }

    pub fn is_cached(&self, dn: &Dn) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .any(|e| e.dn == *dn)
    }

    /// Cached subentries whose subtree covers `target`.
    pub fn covering(&self, target: &Dn) -> Vec<CachedSubentry> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|e| e.covers(target))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SubentryInterceptor
// ---------------------------------------------------------------------------

pub struct SubentryInterceptor {
    cache: Arc<SubentryCache>,
}

impl SubentryInterceptor {
    pub fn new(cache: Arc<SubentryCache>) -> Self {
        SubentryInterceptor { cache }
    }
}

impl Interceptor for SubentryInterceptor {
    fn name(&self) -> &'static str {
        names::SUBENTRY
    }

    fn add(&self, ctx: &OperationContext, req: &mut AddRequest, next: Next<'_>) -> Result<()> {
        let is_subentry = req.entry.is_subentry(&ctx.registry);
        if is_subentry {
            // Validate the specification before anything persists.
            let spec = req
                .entry
                .first_text(&ctx.registry, ids::SUBTREE_SPECIFICATION)
                .unwrap_or("{}");
            SubtreeSpec::parse(spec)?;
        }
        next.add(ctx, req)?;
        if is_subentry {
            self.cache.insert(&ctx.registry, &req.entry)?;
        }
        Ok(())
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        req: &mut DeleteRequest,
        next: Next<'_>,
    ) -> Result<()> {
        next.delete(ctx, req)?;
        self.cache.remove(&req.dn);
        Ok(())
    }

    fn modify(
        &self,
        ctx: &OperationContext,
        req: &mut ModifyRequest,
        next: Next<'_>,
    ) -> Result<Entry> {
        let result = next.modify(ctx, req)?;
        if result.is_subentry(&ctx.registry) {
            self.cache.insert(&ctx.registry, &result)?;
        } else {
            self.cache.remove(&req.dn);
        }
        Ok(result)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        req: &mut RenameRequest,
        next: Next<'_>,
    ) -> Result<()> {
        // Re-keying a subentry's whole administrative scope on rename is not
        // supported; drop and re-add instead.
        if self.cache.is_cached(&req.dn) {
            return Err(DirectoryError::unwilling_to_perform(
                "subentries cannot be renamed",
            ));
        }
        next.rename(ctx, req)
    }

    fn list(
        &self,
        ctx: &OperationContext,
        req: &mut ListRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        let cursor = next.list(ctx, req)?;
        if ctx.controls.subentries {
            return Ok(cursor);
        }
        let registry = Arc::clone(&ctx.registry);
        Ok(cursor.map_entries(move |e| {
            if e.is_subentry(&registry) {
                None
            } else {
                Some(e)
            }
        }))
    }

    fn search(
        &self,
        ctx: &OperationContext,
        req: &mut SearchRequest,
        next: Next<'_>,
    ) -> Result<SearchCursor> {
        let cursor = next.search(ctx, req)?;
        // Subentries stay visible to OBJECT-scope reads and when the
        // subentries control is present.
        if ctx.controls.subentries || req.scope == SearchScope::Object {
            return Ok(cursor);
        }
        let registry = Arc::clone(&ctx.registry);
        Ok(cursor.map_entries(move |e| {
            if e.is_subentry(&registry) {
                None
            } else {
                Some(e)
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;

    // -- Group 1: subtree specification parsing --

    #[test]
    fn parse_empty_spec() {
        let spec = SubtreeSpec::parse("{}").unwrap();
        assert_eq!(spec, SubtreeSpec::default());
    }

    #[test]
    fn parse_full_spec() {
        let spec = SubtreeSpec::parse(
            "{ base \"ou=people\", minimum 1, maximum 3, \
             specificExclusions { chopBefore:\"cn=x\", chopAfter:\"cn=y\" } }",
        )
        .unwrap();
        assert_eq!(spec.base.as_deref(), Some("ou=people"));
        assert_eq!(spec.minimum, 1);
        assert_eq!(spec.maximum, 3);
        assert_eq!(spec.chop_before, vec!["cn=x"]);
        assert_eq!(spec.chop_after, vec!["cn=y"]);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SubtreeSpec::parse("no braces").is_err());
        assert!(SubtreeSpec::parse("{ bogus 1 }").is_err());
    }

    // -- Group 2: coverage --

    fn cached(registry: &SchemaRegistry, subentry_dn: &str, spec: &str) -> CachedSubentry {
        let dn = Dn::parse(registry, subentry_dn).unwrap();
        let mut e = Entry::new(dn);
        e.add(registry, "objectClass", "top").unwrap();
        e.add(registry, "objectClass", "subentry").unwrap();
        e.add(registry, "cn", "test").unwrap();
        e.add(registry, "subtreeSpecification", spec).unwrap();
        let cache = SubentryCache::new();
        cache.insert(registry, &e).unwrap();
        let entries = cache.entries.read().unwrap();
        entries.first().cloned().expect("cached subentry")
    }

    #[test]
    fn coverage_respects_base_and_minimum() {
        let reg = bootstrap_registry();
        let sub = cached(&reg, "cn=sub,o=example", "{ minimum 1 }");
        let admin = Dn::parse(&reg, "o=example").unwrap();
        let child = Dn::parse(&reg, "cn=a,o=example").unwrap();
        let outside = Dn::parse(&reg, "o=other").unwrap();
        assert!(!sub.covers(&admin), "minimum 1 excludes the base itself");
        assert!(sub.covers(&child));
        assert!(!sub.covers(&outside));
    }

    #[test]
    fn coverage_respects_chop() {
        let reg = bootstrap_registry();
        let sub = cached(
            &reg,
            "cn=sub,o=example",
            "{ specificExclusions { chopBefore:\"ou=private\" } }",
        );
        let inside = Dn::parse(&reg, "ou=public,o=example").unwrap();
        let chopped = Dn::parse(&reg, "cn=a,ou=private,o=example").unwrap();
        assert!(sub.covers(&inside));
        assert!(!sub.covers(&chopped));
    }

    #[test]
    fn relative_base_is_absolutized() {
        let reg = bootstrap_registry();
        let sub = cached(&reg, "cn=sub,o=example", "{ base \"ou=people\" }");
        assert_eq!(sub.base.norm(), "ou=people,o=example");
        let covered = Dn::parse(&reg, "cn=a,ou=people,o=example").unwrap();
        let uncovered = Dn::parse(&reg, "cn=a,ou=groups,o=example").unwrap();
        assert!(sub.covers(&covered));
        assert!(!sub.covers(&uncovered));
    }
}
