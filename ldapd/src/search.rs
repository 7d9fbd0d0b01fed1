//! Search engine.
//!
//! Turns a normalized filter into a candidate enumeration: the optimizer
//! annotates nodes with index-derived estimates and picks the most selective
//! driving index, the evaluator validates every candidate against the full
//! filter and scope, so index choice can never change a result set. Alias
//! dereferencing rides on the one-alias/sub-alias indexes; size and time
//! limits and the abandon flag are checked on every candidate step.

use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;

use crate::context::OperationContext;
use crate::entry::{Entry, Value};
use crate::error::{DirectoryError, Result};
use crate::filter::Filter;
use crate::name::Dn;
use crate::partition::PartitionState;
use crate::schema::{MatchingRuleKind, SchemaRegistry};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Object,
    OneLevel,
    Subtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasDerefMode {
    Never,
    FindingBase,
    InSearch,
    Always,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base: Dn,
    pub scope: SearchScope,
    pub deref: AliasDerefMode,
    pub filter: Filter,
    /// Entries; 0 means unbounded.
    pub size_limit: usize,
    /// Seconds; 0 means unbounded.
    pub time_limit: u64,
    /// Requested attributes: names, or the sentinels `*`, `+`, `1.1`.
    pub attrs: Vec<String>,
}

impl SearchRequest {
    pub fn new(base: Dn, scope: SearchScope, filter: Filter) -> SearchRequest {
        SearchRequest {
            base,
            scope,
            deref: AliasDerefMode::Never,
            filter,
            size_limit: 0,
            time_limit: 0,
            attrs: Vec::new(),
        }
    }

    pub fn with_deref(mut self, deref: AliasDerefMode) -> SearchRequest {
        self.deref = deref;
        self
    }

    pub fn with_limits(mut self, size_limit: usize, time_limit: u64) -> SearchRequest {
        self.size_limit = size_limit;
        self.time_limit = time_limit;
        self
    }

    pub fn with_attrs(mut self, attrs: &[&str]) -> SearchRequest {
        self.attrs = attrs.iter().map(|s| s.to_string()).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// SearchCursor
// ---------------------------------------------------------------------------

/// Result cursor over a consistent snapshot taken under the partition's
/// reader lock. Exceeding a limit surfaces as an error on the advance that
/// would cross it, after which the cursor is closed.
#[derive(Debug)]
pub struct SearchCursor {
    entries: VecDeque<Entry>,
    overflow: Option<DirectoryError>,
    closed: bool,
}

impl SearchCursor {
    pub fn from_entries(entries: Vec<Entry>) -> SearchCursor {
        SearchCursor {
            entries: entries.into(),
            overflow: None,
            closed: false,
        }
    }

    pub fn with_overflow(entries: Vec<Entry>, overflow: DirectoryError) -> SearchCursor {
        SearchCursor {
            entries: entries.into(),
            overflow: Some(overflow),
            closed: false,
        }
    }

    /// Advance. `Ok(None)` when exhausted; the limit error exactly once if
    /// the search overran a limit.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.closed {
            return Ok(None);
        }
        match self.entries.pop_front() {
            Some(e) => Ok(Some(e)),
            None => match self.overflow.take() {
                Some(err) => {
                    self.close();
                    Err(err)
                }
                None => Ok(None),
            },
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.entries.clear();
        self.overflow = None;
    }

    /// Entries still queued (overflow not included).
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    /// Drain every entry; a pending limit error is returned after the
    /// last entry has been consumed.
    pub fn collect_entries(mut self) -> Result<Vec<Entry>> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(e) = self.next_entry()? {
            out.push(e);
        }
        Ok(out)
    }

    /// Transform or drop queued entries, keeping overflow state (used by
    /// the read-path interceptors).
    pub fn map_entries<F>(mut self, mut f: F) -> SearchCursor
    where
        F: FnMut(Entry) -> Option<Entry>,
    {
        self.entries = self.entries.drain(..).filter_map(&mut f).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn execute_search(
    state: &PartitionState,
    ctx: &OperationContext,
    request: &SearchRequest,
) -> Result<SearchCursor> {
    let registry = &ctx.registry;
    let started = Instant::now();
    let filter = request.filter.normalize(registry);

    // Eager base resolution; FINDING_BASE/ALWAYS substitute an alias base
    // with its target before any scope expansion.
    let mut base_id = state.require_id(&request.base)?;
    if matches!(
        request.deref,
        AliasDerefMode::FindingBase | AliasDerefMode::Always
    ) {
        base_id = deref_alias_chain(state, base_id)?;
    }

    let scope_candidates = scope_ids(state, base_id, request.scope);
    let driven = build_candidates(state, registry, &filter);
    let candidates: Vec<u64> = match &driven {
        Some(set) => set
            .iter()
            .copied()
            .filter(|id| scope_candidates.contains(id))
            .collect(),
        None => scope_candidates.iter().copied().collect(),
    };

    let deref_in_search = matches!(
        request.deref,
        AliasDerefMode::InSearch | AliasDerefMode::Always
    );

    let size_limit = request.size_limit;
    let time_limit = request.time_limit;
    let mut results: Vec<Entry> = Vec::new();
    let mut seen: BTreeSet<u64> = BTreeSet::new();
    let mut overflow: Option<DirectoryError> = None;

    let mut admit = |id: u64,
                     results: &mut Vec<Entry>,
                     seen: &mut BTreeSet<u64>|
     -> Result<bool> {
        ctx.check_abandoned()?;
        if time_limit > 0 && started.elapsed().as_secs() >= time_limit {
            return Err(DirectoryError::time_limit_exceeded());
        }
        if !seen.insert(id) {
            return Ok(false);
        }
        let Some(entry) = state.entry(id) else {
            return Ok(false);
        };
        if !evaluate(registry, entry, &filter)? {
            return Ok(false);
        }
        if size_limit > 0 && results.len() >= size_limit {
            return Err(DirectoryError::size_limit_exceeded());
        }
        results.push(entry.clone());
        Ok(true)
    };

    let mut walk = || -> Result<()> {
        if deref_in_search {
            // Aliases within scope drop out; their targets come in when they
            // match the filter.
            let aliases = alias_ids_in_scope(state, base_id, request.scope);
            for id in candidates {
                if aliases.contains(&id) {
                    continue;
                }
                admit(id, &mut results, &mut seen)?;
            }
            for alias_id in aliases {
                let target = deref_alias_chain(state, alias_id)?;
                admit(target, &mut results, &mut seen)?;
            }
        } else {
            for id in candidates {
                admit(id, &mut results, &mut seen)?;
            }
        }
        Ok(())
    };

    if let Err(e) = walk() {
        match e.code {
            crate::error::ResultCode::SizeLimitExceeded
            | crate::error::ResultCode::TimeLimitExceeded => overflow = Some(e),
            _ => return Err(e),
        }
    }

    Ok(match overflow {
        Some(err) => SearchCursor::with_overflow(results, err),
        None => SearchCursor::from_entries(results),
    })
}

fn scope_ids(state: &PartitionState, base_id: u64, scope: SearchScope) -> BTreeSet<u64> {
    match scope {
        SearchScope::Object => [base_id].into_iter().collect(),
        SearchScope::OneLevel => state.one_level.get_dups(&base_id).iter().copied().collect(),
        SearchScope::Subtree => {
            let mut set: BTreeSet<u64> =
                state.sub_level.get_dups(&base_id).iter().copied().collect();
            set.insert(base_id);
            set
        }
    }
}

fn alias_ids_in_scope(state: &PartitionState, base_id: u64, scope: SearchScope) -> BTreeSet<u64> {
    match scope {
        // derefInSearching applies below the base, not to it.
        SearchScope::Object => BTreeSet::new(),
        SearchScope::OneLevel => state.one_alias.get_dups(&base_id).iter().copied().collect(),
        SearchScope::Subtree => state.sub_alias.get_dups(&base_id).iter().copied().collect(),
    }
}

/// Follow an alias chain to a real entry id. Bounded to catch loops.
fn deref_alias_chain(state: &PartitionState, mut id: u64) -> Result<u64> {
    for _ in 0..16 {
        let Some(target_norm) = state.alias.get(&id) else {
            return Ok(id);
        };
        id = resolve_norm_dn(state, target_norm).ok_or_else(|| {
            DirectoryError::alias_deref_problem(format!(
                "alias target does not exist: {}",
                target_norm
            ))
        })?;
    }
    Err(DirectoryError::alias_deref_problem("alias loop detected"))
}

/// Resolve a normalized DN string against the RDN index.
fn resolve_norm_dn(state: &PartitionState, norm: &str) -> Option<u64> {
    let suffix_norm = state.suffix.norm();
    if norm == suffix_norm {
        return state.suffix_id();
    }
    let rel = norm.strip_suffix(suffix_norm)?.strip_suffix(',')?;
    let mut id = state.suffix_id()?;
    for rdn in split_norm_rdns(rel).into_iter().rev() {
        id = *state
            .rdn_fwd
            .get(&crate::partition::RdnKey::new(id, rdn))?;
    }
    Some(id)
}

fn split_norm_rdns(s: &str) -> Vec<String> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            i += 2;
        } else if bytes[i] == b',' {
            parts.push(s[start..i].to_string());
            start = i + 1;
            i += 1;
        } else {
            i += 1;
        }
    }
    parts.push(s[start..].to_string());
    parts
}

// ---------------------------------------------------------------------------
// Optimizer: candidate sets from indexes
// ---------------------------------------------------------------------------

/// Estimated candidate count for a node; `universe` for unindexed leaves.
fn estimate(state: &PartitionState, registry: &SchemaRegistry, filter: &Filter) -> usize {
    let universe = state.master.len();
    match filter {
        Filter::Undefined => 0,
        Filter::Equality { attr, value } => match index_of(state, registry, attr) {
            Some(index) => index.fwd.count(value),
            None => universe,
        },
        Filter::Presence { attr } => match registry.attribute_type(attr) {
            Some(at) => state.presence.count(&at.oid),
            None => 0,
        },
        Filter::And(children) => children
            .iter()
            .map(|c| estimate(state, registry, c))
            .min()
            .unwrap_or(universe),
        Filter::Or(children) => children
            .iter()
            .map(|c| estimate(state, registry, c))
            .sum::<usize>()
            .min(universe),
        Filter::Not(child) => universe.saturating_sub(estimate(state, registry, child)),
        _ => universe,
    }
}

fn index_of<'a>(
    state: &'a PartitionState,
    registry: &SchemaRegistry,
    attr: &str,
) -> Option<&'a crate::partition::UserIndex> {
    let at = registry.attribute_type(attr)?;
    state.user_indexes.get(&at.oid)
}

/// Build a candidate id set from indexes, or `None` when the node needs a
/// full scope scan. The evaluator re-checks every candidate, so this only
/// has to be a superset of the true result within the node.
fn build_candidates(
    state: &PartitionState,
    registry: &SchemaRegistry,
    filter: &Filter,
) -> Option<BTreeSet<u64>> {
    match filter {
        Filter::Undefined => Some(BTreeSet::new()),
        Filter::Equality { attr, value } => {
            let index = index_of(state, registry, attr)?;
            Some(index.fwd.get_dups(value).iter().copied().collect())
        }
        Filter::Presence { attr } => {
            let at = registry.attribute_type(attr)?;
            Some(state.presence.get_dups(&at.oid).iter().copied().collect())
        }
        Filter::Substring { attr, initial, .. } => {
            let index = index_of(state, registry, attr)?;
            let prefix = initial.as_deref()?;
            let mut set = BTreeSet::new();
            for (key, id) in index.fwd.cursor_from(&prefix.to_string()) {
                if !key.starts_with(prefix) {
                    break;
                }
                set.insert(*id);
            }
            Some(set)
        }
        Filter::GreaterOrEqual { attr, value } | Filter::LessOrEqual { attr, value } => {
            let at = registry.attribute_type(attr)?;
            let index = state.user_indexes.get(&at.oid)?;
            let ge = matches!(filter, Filter::GreaterOrEqual { .. });
            let mut set = BTreeSet::new();
            match registry.ordering_rule(at) {
                // Integer order disagrees with byte order; walk the whole
                // index with the real comparator.
                MatchingRuleKind::Integer => {
                    for (key, id) in index.fwd.cursor() {
                        let ord = registry.compare_normalized(at, key, value);
                        let keep = if ge { ord != std::cmp::Ordering::Less } else { ord != std::cmp::Ordering::Greater };
                        if keep {
                            set.insert(*id);
                        }
                    }
                }
                _ => {
                    if ge {
                        for (_, id) in index.fwd.cursor_from(&value.clone()) {
                            set.insert(*id);
                        }
                    } else {
                        for (_, id) in index.fwd.cursor_to(&value.clone()) {
                            set.insert(*id);
                        }
                    }
                }
            }
            Some(set)
        }
        Filter::And(children) => {
            // Drive from the most selective indexed child.
            let mut ordered: Vec<&Filter> = children.iter().collect();
            ordered.sort_by_key(|c| estimate(state, registry, c));
            ordered
                .into_iter()
                .find_map(|c| build_candidates(state, registry, c))
        }
        Filter::Or(children) => {
            let mut set = BTreeSet::new();
            for child in children {
                set.extend(build_candidates(state, registry, child)?);
            }
            Some(set)
        }
        // NOT and the remaining leaves need the scope scan.
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Does `entry` satisfy the (normalized) filter?
pub fn evaluate(registry: &SchemaRegistry, entry: &Entry, filter: &Filter) -> Result<bool> {
    match filter {
        Filter::Undefined => Ok(false),
        Filter::And(children) => {
            for c in children {
                if !evaluate(registry, entry, c)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Filter::Or(children) => {
            for c in children {
                if evaluate(registry, entry, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Filter::Not(child) => Ok(!evaluate(registry, entry, child)?),
        Filter::Presence { attr } => Ok(entry.get(registry, attr).is_some()),
        Filter::Equality { attr, value } => {
            each_norm_value(registry, entry, attr, |norm| norm == value)
        }
        Filter::Approx { attr, value } => {
            let want = fold_approx(value);
            each_norm_value(registry, entry, attr, |norm| fold_approx(norm) == want)
        }
        Filter::GreaterOrEqual { attr, value } => {
            let Some(at) = registry.attribute_type(attr) else {
                return Ok(false);
            };
            each_norm_value(registry, entry, attr, |norm| {
                registry.compare_normalized(at, norm, value) != std::cmp::Ordering::Less
            })
        }
        Filter::LessOrEqual { attr, value } => {
            let Some(at) = registry.attribute_type(attr) else {
                return Ok(false);
            };
            each_norm_value(registry, entry, attr, |norm| {
                registry.compare_normalized(at, norm, value) != std::cmp::Ordering::Greater
            })
        }
        Filter::Substring {
            attr,
            initial,
            any,
            final_part,
        } => each_norm_value(registry, entry, attr, |norm| {
            match_substring(norm, initial.as_deref(), any, final_part.as_deref())
        }),
        Filter::Extensible {
            attr,
            rule,
            value,
            dn_attributes,
        } => evaluate_extensible(registry, entry, attr.as_deref(), rule.as_deref(), value, *dn_attributes),
    }
    .or_else(|e: DirectoryError| {
        // Normalization failures on stored values mean "does not match",
        // not a failed search.
        if e.code == crate::error::ResultCode::InvalidAttributeSyntax {
            Ok(false)
        } else {
            Err(e)
        }
    })
}

fn each_norm_value<F>(
    registry: &SchemaRegistry,
    entry: &Entry,
    attr: &str,
    mut pred: F,
) -> Result<bool>
where
    F: FnMut(&str) -> bool,
{
    let Some(at) = registry.attribute_type(attr) else {
        return Ok(false);
    };
    let Some(attribute) = entry.get(registry, attr) else {
        return Ok(false);
    };
    for value in attribute.values() {
        let norm = registry.normalize_value(at, value)?;
        if pred(&norm) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn match_substring(
    value: &str,
    initial: Option<&str>,
    any: &[String],
    final_part: Option<&str>,
) -> bool {
    let mut rest = value;
    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    if let Some(suffix) = final_part {
        return rest.ends_with(suffix);
    }
    true
}

fn fold_approx(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn evaluate_extensible(
    registry: &SchemaRegistry,
    entry: &Entry,
    attr: Option<&str>,
    rule: Option<&str>,
    value: &str,
    dn_attributes: bool,
) -> Result<bool> {
    let kind = match rule {
        Some(name) => MatchingRuleKind::from_rule_name(name).ok_or_else(|| {
            DirectoryError::inappropriate_matching(format!("unknown matching rule: {}", name))
        })?,
        None => MatchingRuleKind::CaseIgnore,
    };
    let fold = |s: &str| -> String {
        match kind {
            MatchingRuleKind::CaseExact | MatchingRuleKind::OctetString => s.to_string(),
            _ => s.to_lowercase(),
        }
    };
    let want = fold(value);

    if let Some(attr) = attr {
        if let Some(attribute) = entry.get(registry, attr) {
            for v in attribute.values() {
                if let Value::Text(s) = v {
                    if fold(s) == want {
                        return Ok(true);
                    }
                }
            }
        }
        if dn_attributes {
            for i in 0..entry.dn.len() {
                if let Some(rdn) = entry.dn.rdn_at(i) {
                    for ava in rdn.avas() {
                        if registry
                            .attribute_type(attr)
                            .map(|at| at.oid == ava.oid)
                            .unwrap_or(false)
                            && fold(&ava.norm_value) == want
                        {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        return Ok(false);
    }

    // Rule-only match: try every attribute.
    for attribute in entry.attributes() {
        for v in attribute.values() {
            if let Value::Text(s) = v {
                if fold(s) == want {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionState, ROOT_ID};
    use crate::schema::bootstrap_registry;
    use crate::session::Session;
    use std::sync::Arc;

    fn ctx(registry: &SchemaRegistry) -> OperationContext {
        OperationContext::new(Arc::new(registry.clone()), Arc::new(Session::anonymous()))
    }

    fn populated(registry: &SchemaRegistry) -> PartitionState {
        let suffix = Dn::parse(registry, "o=example").unwrap();
        let cn = registry.attribute_type("cn").unwrap().oid.clone();
        let oc = registry.attribute_type("objectClass").unwrap().oid.clone();
        let uidn = registry.attribute_type("uidNumber").unwrap().oid.clone();
        let mut st = PartitionState::new(suffix.clone(), &[cn, oc, uidn]);

        let mut add = |st: &mut PartitionState, dn: &str, classes: &[&str], extra: &[(&str, &str)]| {
            let dn = Dn::parse(registry, dn).unwrap();
            let mut e = Entry::new(dn.clone());
            for c in classes {
                e.add(registry, "objectClass", *c).unwrap();
            }
            for (a, v) in extra {
                e.add(registry, *a, *v).unwrap();
            }
            let parent = if dn == st.suffix {
                ROOT_ID
            } else {
                st.resolve(&dn.parent().unwrap()).unwrap()
            };
            let plan = st.index_plan(registry, &e).unwrap();
            let id = st.allocate_id();
            st.insert_entry(id, parent, e, &plan);
            id
        };

        add(&mut st, "o=example", &["top", "organization"], &[("o", "example")]);
        add(&mut st, "ou=people,o=example", &["top", "organizationalUnit"], &[("ou", "people")]);
        for i in 0..5 {
            add(
                &mut st,
                &format!("cn=user{:03},ou=people,o=example", i),
                &["top", "inetOrgPerson"],
                &[
                    ("cn", &format!("user{:03}", i)),
                    ("sn", "lname"),
                    ("uidNumber", &format!("{}", 100 + i)),
                ],
            );
        }
        add(
            &mut st,
            "cn=target,ou=people,o=example",
            &["top", "person"],
            &[("cn", "target"), ("sn", "t")],
        );
        add(
            &mut st,
            "cn=link,o=example",
            &["top", "alias", "extensibleObject"],
            &[("cn", "link"), ("aliasedObjectName", "cn=target,ou=people,o=example")],
        );
        st
    }

    fn run(
        st: &PartitionState,
        registry: &SchemaRegistry,
        base: &str,
        scope: SearchScope,
        filter: &str,
    ) -> Vec<String> {
        let req = SearchRequest::new(
            Dn::parse(registry, base).unwrap(),
            scope,
            Filter::parse(filter).unwrap(),
        );
        let cursor = execute_search(st, &ctx(registry), &req).unwrap();
        let mut dns: Vec<String> = cursor
            .collect_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.dn.norm().to_string())
            .collect();
        dns.sort();
        dns
    }

    // -- Group 1: scope --

    #[test]
    fn object_scope_returns_the_base() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Object, "(objectClass=*)");
        assert_eq!(dns, vec!["o=example"]);
    }

    #[test]
    fn one_level_scope_returns_children_only() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::OneLevel, "(objectClass=*)");
        assert_eq!(dns, vec!["cn=link,o=example", "ou=people,o=example"]);
    }

    #[test]
    fn subtree_scope_returns_everything() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(objectClass=*)");
        assert_eq!(dns.len(), 9);
        assert!(dns.contains(&"o=example".to_string()));
    }

    #[test]
    fn missing_base_is_no_such_object() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let req = SearchRequest::new(
            Dn::parse(&reg, "ou=nowhere,o=example").unwrap(),
            SearchScope::Subtree,
            Filter::parse("(objectClass=*)").unwrap(),
        );
        let err = execute_search(&st, &ctx(&reg), &req).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::NoSuchObject);
    }

    // -- Group 2: filters --

    #[test]
    fn indexed_equality() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(cn=user002)");
        assert_eq!(dns, vec!["cn=user002,ou=people,o=example"]);
    }

    #[test]
    fn unindexed_equality_still_works() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(sn=lname)");
        assert_eq!(dns.len(), 5);
    }

    #[test]
    fn and_or_not() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(
            &st,
            &reg,
            "o=example",
            SearchScope::Subtree,
            "(&(objectClass=person)(!(cn=target)))",
        );
        assert_eq!(dns.len(), 5);
        let dns = run(
            &st,
            &reg,
            "o=example",
            SearchScope::Subtree,
            "(|(cn=user000)(cn=user001))",
        );
        assert_eq!(dns.len(), 2);
    }

    #[test]
    fn substring_filter() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(cn=user00*)");
        assert_eq!(dns.len(), 5);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(cn=*002)");
        assert_eq!(dns, vec!["cn=user002,ou=people,o=example"]);
    }

    #[test]
    fn integer_ordering_filters() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(uidNumber>=103)");
        assert_eq!(dns.len(), 2);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(uidNumber<=100)");
        assert_eq!(dns.len(), 1);
    }

    #[test]
    fn undefined_attribute_matches_nothing() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(frobnitz=x)");
        assert!(dns.is_empty());
        // ... but OR with a defined leaf still finds that leaf.
        let dns = run(
            &st,
            &reg,
            "o=example",
            SearchScope::Subtree,
            "(|(frobnitz=x)(cn=target))",
        );
        assert_eq!(dns.len(), 1);
    }

    // -- Group 3: optimizer equivalence --

    #[test]
    fn indexed_and_unindexed_agree() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        // cn is indexed, sn is not; both paths must produce the same ids.
        let a = run(&st, &reg, "o=example", SearchScope::Subtree, "(&(cn=user003)(sn=lname))");
        let b = run(&st, &reg, "o=example", SearchScope::Subtree, "(&(sn=lname)(cn=user003))");
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    // -- Group 4: aliases --

    #[test]
    fn finding_base_substitutes_the_alias_target() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let req = SearchRequest::new(
            Dn::parse(&reg, "cn=link,o=example").unwrap(),
            SearchScope::Object,
            Filter::parse("(objectClass=*)").unwrap(),
        )
        .with_deref(AliasDerefMode::FindingBase);
        let entries = execute_search(&st, &ctx(&reg), &req)
            .unwrap()
            .collect_entries()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dn.norm(), "cn=target,ou=people,o=example");
    }

    #[test]
    fn never_mode_returns_the_alias_itself() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let dns = run(&st, &reg, "o=example", SearchScope::Subtree, "(objectClass=alias)");
        assert_eq!(dns, vec!["cn=link,o=example"]);
    }

    #[test]
    fn in_search_mode_swaps_aliases_for_targets() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let req = SearchRequest::new(
            Dn::parse(&reg, "o=example").unwrap(),
            SearchScope::OneLevel,
            Filter::parse("(objectClass=*)").unwrap(),
        )
        .with_deref(AliasDerefMode::InSearch);
        let entries = execute_search(&st, &ctx(&reg), &req)
            .unwrap()
            .collect_entries()
            .unwrap();
        let dns: Vec<&str> = entries.iter().map(|e| e.dn.norm()).collect();
        assert!(!dns.contains(&"cn=link,o=example"));
        assert!(dns.contains(&"cn=target,ou=people,o=example"));
    }

    // -- Group 5: limits --

    #[test]
    fn size_limit_overflows_after_the_cap() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let req = SearchRequest::new(
            Dn::parse(&reg, "o=example").unwrap(),
            SearchScope::Subtree,
            Filter::parse("(objectClass=*)").unwrap(),
        )
        .with_limits(3, 0);
        let mut cursor = execute_search(&st, &ctx(&reg), &req).unwrap();
        let mut count = 0;
        loop {
            match cursor.next_entry() {
                Ok(Some(_)) => count += 1,
                Ok(None) => panic!("expected sizeLimitExceeded"),
                Err(e) => {
                    assert_eq!(e.code, crate::error::ResultCode::SizeLimitExceeded);
                    break;
                }
            }
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn abandoned_search_is_canceled() {
        let reg = bootstrap_registry();
        let st = populated(&reg);
        let c = ctx(&reg);
        c.abandon();
        let req = SearchRequest::new(
            Dn::parse(&reg, "o=example").unwrap(),
            SearchScope::Subtree,
            Filter::parse("(objectClass=*)").unwrap(),
        );
        let err = execute_search(&st, &c, &req).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::Canceled);
    }
}
