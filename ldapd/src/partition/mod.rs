//! Partition engine.
//!
//! A partition owns the subtree rooted at its suffix DN: the master table
//! and the index family, behind one readers-writer lock. Mutations take the
//! writer lock and keep every index invariant in step; reads take the reader
//! lock and hand back defensive clones.

mod indexes;
mod persist;

pub use indexes::{IndexPlan, PartitionState, RdnKey, UserIndex, ROOT_ID};

use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::entry::{Entry, Modification};
use crate::error::{DirectoryError, Result};
use crate::name::{Dn, Rdn};
use crate::schema::{ids, SchemaRegistry};
use crate::search::{execute_search, SearchCursor, SearchRequest};

// ---------------------------------------------------------------------------
// Partition trait
// ---------------------------------------------------------------------------

/// The storage contract the nexus routes operations to.
pub trait Partition: Send + Sync {
    fn id(&self) -> &str;
    fn suffix(&self) -> &Dn;

    fn add(&self, ctx: &OperationContext, entry: Entry) -> Result<()>;
    fn delete(&self, ctx: &OperationContext, dn: &Dn) -> Result<()>;
    fn modify(&self, ctx: &OperationContext, dn: &Dn, mods: &[Modification]) -> Result<Entry>;
    fn rename(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()>;
    fn move_entry(&self, ctx: &OperationContext, dn: &Dn, new_parent: &Dn) -> Result<()>;
    fn move_and_rename(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        new_parent: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()>;

    fn lookup(&self, ctx: &OperationContext, dn: &Dn) -> Result<Entry>;
    fn has_entry(&self, ctx: &OperationContext, dn: &Dn) -> Result<bool>;
    fn list(&self, ctx: &OperationContext, dn: &Dn) -> Result<SearchCursor>;
    fn search(&self, ctx: &OperationContext, request: &SearchRequest) -> Result<SearchCursor>;

    /// Write dirty tables to the partition directory, if one is configured.
    fn flush(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition").field("id", &self.id()).finish()
    }
}

// ---------------------------------------------------------------------------
// BTreePartition
// ---------------------------------------------------------------------------

pub struct BTreePartition {
    id: String,
    suffix: Dn,
    state: RwLock<PartitionState>,
    directory: Option<PathBuf>,
}

impl BTreePartition {
    /// An in-memory partition.
    pub fn new(id: impl Into<String>, suffix: Dn, indexed_oids: &[String]) -> BTreePartition {
        BTreePartition {
            id: id.into(),
            suffix: suffix.clone(),
            state: RwLock::new(PartitionState::new(suffix, indexed_oids)),
            directory: None,
        }
    }

    /// A partition backed by a directory of table files. Missing files yield
    /// an empty partition; a master without indexes triggers a rebuild.
    pub fn open(
        id: impl Into<String>,
        suffix: Dn,
        indexed_oids: &[String],
        directory: PathBuf,
        registry: &SchemaRegistry,
    ) -> Result<BTreePartition> {
        let state = persist::open(registry, suffix.clone(), indexed_oids, &directory)?;
        Ok(BTreePartition {
            id: id.into(),
            suffix,
            state: RwLock::new(state),
            directory: Some(directory),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, PartitionState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PartitionState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Total number of entries.
    pub fn entry_count(&self) -> usize {
        self.read().master.len()
    }

    // -- shared pieces of move/rename ---------------------------------------

    /// Rebuild the DNs of `id` and all descendants after the entry's DN
    /// changed from `old_dn` to `new_dn`.
    fn rewrite_subtree_dns(state: &mut PartitionState, id: u64, old_dn: &Dn, new_dn: &Dn) {
        for member in state.subtree_ids(id) {
            let Some(entry) = state.master.get(&member) else {
                continue;
            };
            let mut entry = entry.clone();
            if member == id {
                entry.dn = new_dn.clone();
            } else {
                // Keep the relative part, splice on the new base.
                let keep = entry.dn.len() - old_dn.len();
                let mut rdns: Vec<Rdn> = (0..keep)
                    .filter_map(|i| entry.dn.rdn_at(i).cloned())
                    .collect();
                for i in 0..new_dn.len() {
                    if let Some(r) = new_dn.rdn_at(i) {
                        rdns.push(r.clone());
                    }
                }
                entry.dn = Dn::from_rdns(rdns);
            }
            state.master.put(member, entry);
        }
    }

    /// Move `id` (with its subtree) under `new_parent_id`, updating the
    /// level and alias closures. Value indexes are untouched.
    fn reparent(
        state: &mut PartitionState,
        id: u64,
        old_parent: u64,
        new_parent: u64,
        old_rdn: &str,
        new_rdn: &str,
    ) {
        let old_chain: Vec<u64> = if old_parent == ROOT_ID {
            Vec::new()
        } else {
            let mut c = vec![old_parent];
            c.extend(state.ancestor_ids(old_parent));
            c
        };

        state.one_level.remove_pair(&old_parent, &id);
        state.rdn_fwd.remove(&RdnKey::new(old_parent, old_rdn));
        if state.alias.has(&id) {
            state.one_alias.remove_pair(&old_parent, &id);
        }

        let new_chain: Vec<u64> = if new_parent == ROOT_ID {
            Vec::new()
        } else {
            let mut c = vec![new_parent];
            c.extend(state.ancestor_ids(new_parent));
            c
        };

        let members = state.subtree_ids(id);
        for &m in &members {
            for &a in &old_chain {
                state.sub_level.remove_pair(&a, &m);
                state.sub_alias.remove_pair(&a, &m);
            }
            for &a in &new_chain {
                state.sub_level.put(a, m);
                if state.alias.has(&m) {
                    state.sub_alias.put(a, m);
                }
            }
        }

        state.one_level.put(new_parent, id);
        state.rdn_fwd.put(RdnKey::new(new_parent, new_rdn.to_string()), id);
        state.rdn_rev.put(id, RdnKey::new(new_parent, new_rdn.to_string()));
        if state.alias.has(&id) {
            state.one_alias.put(new_parent, id);
        }
    }

    /// Apply the RDN attribute rules of rename to a cloned entry.
    ///
    /// With `delete_old_rdn` the old RDN's values leave the entry; without
    /// it, a single-valued RDN attribute whose new value differs is rejected
    /// rather than silently replaced.
    fn apply_rdn_values(
        registry: &SchemaRegistry,
        entry: &mut Entry,
        old_rdn: &Rdn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()> {
        if delete_old_rdn {
            for ava in old_rdn.avas() {
                let in_new = new_rdn
                    .avas()
                    .iter()
                    .any(|n| n.oid == ava.oid && n.norm_value == ava.norm_value);
                if in_new {
                    continue;
                }
                if entry.has_value(registry, &ava.oid, &ava.value)? {
                    entry.remove_value(registry, &ava.oid, &ava.value)?;
                }
            }
        }
        for ava in new_rdn.avas() {
            if entry.has_value(registry, &ava.oid, &ava.value)? {
                continue;
            }
            let at = registry.require_attribute_type(&ava.oid)?;
            if at.single_value && entry.get(registry, &ava.oid).is_some() {
                return Err(DirectoryError::constraint_violation(format!(
                    "{} is single-valued; cannot keep old value and add {}",
                    at.name(),
                    ava.norm_value
                )));
            }
            entry.add(registry, &ava.oid, ava.value.clone())?;
        }
        Ok(())
    }

    /// The shared implementation of rename, move, and moveAndRename.
    fn relocate(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        new_parent: Option<&Dn>,
        new_rdn: Option<&Rdn>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let registry = &ctx.registry;
        ctx.check_abandoned()?;
        let mut state = self.write();

        let id = state.require_id(dn)?;
        if *dn == state.suffix {
            return Err(DirectoryError::unwilling_to_perform(
                "cannot rename or move the partition suffix",
            ));
        }
        let old_parent_dn = dn
            .parent()
            .ok_or_else(|| DirectoryError::unwilling_to_perform("entry has no parent"))?;
        let old_parent_id = state
            .parent_id(id)
            .ok_or_else(|| DirectoryError::operations_error("missing RDN row"))?;
        let old_rdn = dn
            .rdn()
            .ok_or_else(|| DirectoryError::invalid_dn_syntax(dn.user(), "no RDN"))?
            .clone();

        let (target_parent_dn, target_parent_id) = match new_parent {
            Some(p) => {
                if p == dn || p.descendant_of(dn) {
                    return Err(DirectoryError::naming_violation(
                        "cannot move an entry under itself",
                    ));
                }
                let pid = state.require_id(p)?;
                let parent_entry = state
                    .entry(pid)
                    .ok_or_else(|| DirectoryError::operations_error("missing master row"))?;
                if parent_entry.is_alias(registry) {
                    return Err(DirectoryError::alias_problem(
                        "new superior is an alias entry",
                    ));
                }
                (p.clone(), pid)
            }
            None => (old_parent_dn.clone(), old_parent_id),
        };

        let target_rdn = new_rdn.cloned().unwrap_or_else(|| old_rdn.clone());
        let new_dn = target_parent_dn.append(target_rdn.clone());
        if new_dn != *dn && state.resolve(&new_dn).is_some() {
            return Err(DirectoryError::entry_already_exists(new_dn.user()));
        }

        // Fallible work first: new entry content and both index plans.
        let old_entry = state
            .entry(id)
            .ok_or_else(|| DirectoryError::operations_error("missing master row"))?
            .clone();
        let old_plan = state.index_plan(registry, &old_entry)?;
        let mut new_entry = old_entry.clone();
        new_entry.dn = new_dn.clone();
        if new_rdn.is_some() {
            Self::apply_rdn_values(registry, &mut new_entry, &old_rdn, &target_rdn, delete_old_rdn)?;
        }
        let new_plan = state.index_plan(registry, &new_entry)?;

        // Infallible from here on.
        state.reindex_values(id, new_entry, &old_plan, &new_plan);
        Self::reparent(
            &mut state,
            id,
            old_parent_id,
            target_parent_id,
            &old_plan.rdn,
            &new_plan.rdn,
        );
        Self::rewrite_subtree_dns(&mut state, id, dn, &new_dn);
        debug!(partition = %self.id, from = %dn, to = %new_dn, "relocated entry");
        Ok(())
    }
}

impl Partition for BTreePartition {
    fn id(&self) -> &str {
        &self.id
    }

    fn suffix(&self) -> &Dn {
        &self.suffix
    }

    fn add(&self, ctx: &OperationContext, mut entry: Entry) -> Result<()> {
        let registry = &ctx.registry;
        ctx.check_abandoned()?;
        let mut state = self.write();

        if !entry.dn.at_or_under(&state.suffix) {
            return Err(DirectoryError::no_such_object(entry.dn.user()));
        }
        let parent_id = if entry.dn == state.suffix {
            if state.suffix_id().is_some() {
                return Err(DirectoryError::entry_already_exists(entry.dn.user()));
            }
            ROOT_ID
        } else {
            let parent_dn = entry
                .dn
                .parent()
                .ok_or_else(|| DirectoryError::invalid_dn_syntax(entry.dn.user(), "no parent"))?;
            let pid = state.require_id(&parent_dn)?;
            let parent = state
                .entry(pid)
                .ok_or_else(|| DirectoryError::operations_error("missing master row"))?;
            if parent.is_alias(registry) {
                return Err(DirectoryError::alias_problem(
                    "cannot add an entry under an alias",
                ));
            }
            if state.resolve(&entry.dn).is_some() {
                return Err(DirectoryError::entry_already_exists(entry.dn.user()));
            }
            pid
        };

        // A UUID is normally stamped by the operational-attribute stage;
        // internal bypassed writes still get one.
        if entry.first_text(registry, ids::ENTRY_UUID).is_none() {
            entry.add(registry, ids::ENTRY_UUID, Uuid::new_v4().to_string())?;
        }

        let plan = state.index_plan(registry, &entry)?;
        let id = state.allocate_id();
        state.insert_entry(id, parent_id, entry, &plan);
        Ok(())
    }

    fn delete(&self, ctx: &OperationContext, dn: &Dn) -> Result<()> {
        let registry = &ctx.registry;
        ctx.check_abandoned()?;
        let mut state = self.write();
        let id = state.require_id(dn)?;
        if state.has_children(id) {
            return Err(DirectoryError::not_allowed_on_non_leaf(dn.user()));
        }
        let entry = state
            .entry(id)
            .ok_or_else(|| DirectoryError::operations_error("missing master row"))?
            .clone();
        let plan = state.index_plan(registry, &entry)?;
        state.remove_entry(id, &plan);
        Ok(())
    }

    fn modify(&self, ctx: &OperationContext, dn: &Dn, mods: &[Modification]) -> Result<Entry> {
        let registry = &ctx.registry;
        ctx.check_abandoned()?;
        let mut state = self.write();
        let id = state.require_id(dn)?;
        let old_entry = state
            .entry(id)
            .ok_or_else(|| DirectoryError::operations_error("missing master row"))?
            .clone();
        let new_entry = old_entry.apply_modifications(registry, mods)?;
        let old_plan = state.index_plan(registry, &old_entry)?;
        let new_plan = state.index_plan(registry, &new_entry)?;
        state.reindex_values(id, new_entry.clone(), &old_plan, &new_plan);
        Ok(new_entry)
    }

    fn rename(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.relocate(ctx, dn, None, Some(new_rdn), delete_old_rdn)
    }

    fn move_entry(&self, ctx: &OperationContext, dn: &Dn, new_parent: &Dn) -> Result<()> {
        self.relocate(ctx, dn, Some(new_parent), None, false)
    }

    fn move_and_rename(
        &self,
        ctx: &OperationContext,
        dn: &Dn,
        new_parent: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.relocate(ctx, dn, Some(new_parent), Some(new_rdn), delete_old_rdn)
    }

    fn lookup(&self, ctx: &OperationContext, dn: &Dn) -> Result<Entry> {
        ctx.check_abandoned()?;
        let state = self.read();
        let id = state.require_id(dn)?;
        state
            .entry(id)
            .cloned()
            .ok_or_else(|| DirectoryError::operations_error("missing master row"))
    }

    fn has_entry(&self, _ctx: &OperationContext, dn: &Dn) -> Result<bool> {
        Ok(self.read().resolve(dn).is_some())
    }

    fn list(&self, ctx: &OperationContext, dn: &Dn) -> Result<SearchCursor> {
        ctx.check_abandoned()?;
        let state = self.read();
        let id = state.require_id(dn)?;
        let children: Vec<Entry> = state
            .one_level
            .get_dups(&id)
            .iter()
            .filter_map(|cid| state.entry(*cid).cloned())
            .collect();
        Ok(SearchCursor::from_entries(children))
    }

    fn search(&self, ctx: &OperationContext, request: &SearchRequest) -> Result<SearchCursor> {
        ctx.check_abandoned()?;
        let state = self.read();
        execute_search(&state, ctx, request)
    }

    fn flush(&self) -> Result<()> {
        let Some(dir) = &self.directory else {
            return Ok(());
        };
        let mut state = self.write();
        persist::flush(&mut state, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;
    use crate::session::Session;
    use std::sync::Arc;

    fn setup() -> (Arc<SchemaRegistry>, BTreePartition, OperationContext) {
        let registry = Arc::new(bootstrap_registry());
        let suffix = Dn::parse(&registry, "o=example").unwrap();
        let cn = registry.attribute_type("cn").unwrap().oid.clone();
        let oc = registry.attribute_type("objectClass").unwrap().oid.clone();
        let partition = BTreePartition::new("example", suffix, &[cn, oc]);
        let ctx = OperationContext::new(Arc::clone(&registry), Arc::new(Session::anonymous()));
        (registry, partition, ctx)
    }

    fn make_entry(
        registry: &SchemaRegistry,
        dn: &str,
        classes: &[&str],
        attrs: &[(&str, &str)],
    ) -> Entry {
        let dn = Dn::parse(registry, dn).unwrap();
        let mut e = Entry::new(dn);
        for c in classes {
            e.add(registry, "objectClass", *c).unwrap();
        }
        for (a, v) in attrs {
            e.add(registry, *a, *v).unwrap();
        }
        e
    }

    fn seed(registry: &SchemaRegistry, partition: &BTreePartition, ctx: &OperationContext) {
        partition
            .add(
                ctx,
                make_entry(
                    registry,
                    "o=example",
                    &["top", "organization"],
                    &[("o", "example")],
                ),
            )
            .unwrap();
    }

    // -- Group 1: add --

    #[test]
    fn add_and_lookup() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=alice,o=example",
                    &["top", "person"],
                    &[("cn", "alice"), ("sn", "smith")],
                ),
            )
            .unwrap();
        let dn = Dn::parse(&registry, "CN=Alice, O=Example").unwrap();
        let e = partition.lookup(&ctx, &dn).unwrap();
        assert_eq!(e.first_text(&registry, "sn"), Some("smith"));
        assert!(partition.has_entry(&ctx, &dn).unwrap());
        // A UUID is assigned even without the operational stage.
        assert!(e.first_text(&registry, ids::ENTRY_UUID).is_some());
    }

    #[test]
    fn add_duplicate_fails() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        let entry = make_entry(
            &registry,
            "cn=dup,o=example",
            &["top", "person"],
            &[("cn", "dup"), ("sn", "d")],
        );
        partition.add(&ctx, entry.clone()).unwrap();
        let err = partition.add(&ctx, entry).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::EntryAlreadyExists);
    }

    #[test]
    fn add_orphan_reports_matched_dn() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        let err = partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=deep,ou=missing,o=example",
                    &["top", "person"],
                    &[("cn", "deep"), ("sn", "d")],
                ),
            )
            .unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::NoSuchObject);
        assert_eq!(err.matched_dn.as_deref(), Some("o=example"));
    }

    #[test]
    fn add_under_alias_fails() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=target,o=example",
                    &["top", "person"],
                    &[("cn", "target"), ("sn", "t")],
                ),
            )
            .unwrap();
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=link,o=example",
                    &["top", "alias", "extensibleObject"],
                    &[("cn", "link"), ("aliasedObjectName", "cn=target,o=example")],
                ),
            )
            .unwrap();
        let err = partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=below,cn=link,o=example",
                    &["top", "person"],
                    &[("cn", "below"), ("sn", "b")],
                ),
            )
            .unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::AliasProblem);
    }

    // -- Group 2: delete --

    #[test]
    fn delete_non_leaf_fails() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=child,o=example",
                    &["top", "person"],
                    &[("cn", "child"), ("sn", "c")],
                ),
            )
            .unwrap();
        let suffix = Dn::parse(&registry, "o=example").unwrap();
        let err = partition.delete(&ctx, &suffix).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::NotAllowedOnNonLeaf);

        let child = Dn::parse(&registry, "cn=child,o=example").unwrap();
        partition.delete(&ctx, &child).unwrap();
        partition.delete(&ctx, &suffix).unwrap();
        assert_eq!(partition.entry_count(), 0);
    }

    // -- Group 3: modify --

    #[test]
    fn modify_rewrites_value_indexes() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=mod,o=example",
                    &["top", "person"],
                    &[("cn", "mod"), ("sn", "before")],
                ),
            )
            .unwrap();
        let dn = Dn::parse(&registry, "cn=mod,o=example").unwrap();
        let mods = vec![Modification::replace(
            "sn",
            vec![crate::entry::Value::text("after")],
        )];
        let result = partition.modify(&ctx, &dn, &mods).unwrap();
        assert_eq!(result.first_text(&registry, "sn"), Some("after"));

        let request = SearchRequest::new(
            Dn::parse(&registry, "o=example").unwrap(),
            crate::search::SearchScope::Subtree,
            crate::filter::Filter::parse("(sn=after)").unwrap(),
        );
        let hits = partition
            .search(&ctx, &request)
            .unwrap()
            .collect_entries()
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    // -- Group 4: rename and move --

    #[test]
    fn rename_into_existing_dn_fails() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        for name in ["one", "two"] {
            partition
                .add(
                    &ctx,
                    make_entry(
                        &registry,
                        &format!("cn={},o=example", name),
                        &["top", "person"],
                        &[("cn", name), ("sn", "s")],
                    ),
                )
                .unwrap();
        }
        let dn = Dn::parse(&registry, "cn=one,o=example").unwrap();
        let rdn = Rdn::new(&registry, "cn", "two").unwrap();
        let err = partition.rename(&ctx, &dn, &rdn, true).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::EntryAlreadyExists);
    }

    #[test]
    fn rename_keeping_old_value_of_single_valued_rdn_attr_fails() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "displayName=solo,o=example",
                    &["top", "person", "extensibleObject"],
                    &[("displayName", "solo"), ("cn", "solo"), ("sn", "s")],
                ),
            )
            .unwrap();
        let dn = Dn::parse(&registry, "displayName=solo,o=example").unwrap();
        let rdn = Rdn::new(&registry, "displayName", "duo").unwrap();
        // Keeping the old single value while introducing a new one is refused.
        let err = partition.rename(&ctx, &dn, &rdn, false).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::ConstraintViolation);
        // Dropping the old value is fine.
        partition.rename(&ctx, &dn, &rdn, true).unwrap();
        let new_dn = Dn::parse(&registry, "displayName=duo,o=example").unwrap();
        assert!(partition.has_entry(&ctx, &new_dn).unwrap());
    }

    #[test]
    fn move_under_itself_fails() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "ou=branch,o=example",
                    &["top", "organizationalUnit"],
                    &[("ou", "branch")],
                ),
            )
            .unwrap();
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "ou=twig,ou=branch,o=example",
                    &["top", "organizationalUnit"],
                    &[("ou", "twig")],
                ),
            )
            .unwrap();
        let branch = Dn::parse(&registry, "ou=branch,o=example").unwrap();
        let twig = Dn::parse(&registry, "ou=twig,ou=branch,o=example").unwrap();
        let err = partition.move_entry(&ctx, &branch, &twig).unwrap_err();
        assert_eq!(err.code, crate::error::ResultCode::NamingViolation);
    }

    #[test]
    fn move_rewrites_descendant_dns() {
        let (registry, partition, ctx) = setup();
        seed(&registry, &partition, &ctx);
        for ou in ["src", "dst"] {
            partition
                .add(
                    &ctx,
                    make_entry(
                        &registry,
                        &format!("ou={},o=example", ou),
                        &["top", "organizationalUnit"],
                        &[("ou", ou)],
                    ),
                )
                .unwrap();
        }
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "ou=team,ou=src,o=example",
                    &["top", "organizationalUnit"],
                    &[("ou", "team")],
                ),
            )
            .unwrap();
        partition
            .add(
                &ctx,
                make_entry(
                    &registry,
                    "cn=leaf,ou=team,ou=src,o=example",
                    &["top", "person"],
                    &[("cn", "leaf"), ("sn", "l")],
                ),
            )
            .unwrap();

        let team = Dn::parse(&registry, "ou=team,ou=src,o=example").unwrap();
        let dst = Dn::parse(&registry, "ou=dst,o=example").unwrap();
        partition.move_entry(&ctx, &team, &dst).unwrap();

        let moved_leaf = Dn::parse(&registry, "cn=leaf,ou=team,ou=dst,o=example").unwrap();
        let e = partition.lookup(&ctx, &moved_leaf).unwrap();
        assert_eq!(e.dn.norm(), "cn=leaf,ou=team,ou=dst,o=example");
        let old_leaf = Dn::parse(&registry, "cn=leaf,ou=team,ou=src,o=example").unwrap();
        assert!(!partition.has_entry(&ctx, &old_leaf).unwrap());
    }
}
