//! Partition tables and index maintenance.
//!
//! The master table plus the index family: RDN (forward and reverse),
//! one-level, sub-level, alias/one-alias/sub-alias, presence, entryUUID and
//! the per-attribute user indexes. All fallible work (normalization, plan
//! computation) happens before the first table write, so a failed operation
//! never leaves the tables half-updated.

use std::collections::BTreeMap;
use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::entry::Entry;
use crate::error::{DirectoryError, Result};
use crate::name::Dn;
use crate::schema::{ids, SchemaRegistry};
use crate::table::{Storable, Table};

// ---------------------------------------------------------------------------
// RdnKey
// ---------------------------------------------------------------------------

/// Key of the forward RDN index: (parent id, normalized RDN). The suffix
/// entry hangs off the fictitious parent id 0 under its full normalized DN.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RdnKey {
    pub parent: u64,
    pub rdn: String,
}

impl RdnKey {
    pub fn new(parent: u64, rdn: impl Into<String>) -> RdnKey {
        RdnKey {
            parent,
            rdn: rdn.into(),
        }
    }
}

impl Storable for RdnKey {
    fn encode(&self, buf: &mut Vec<u8>) {
        let _ = buf.write_u64::<BigEndian>(self.parent);
        self.rdn.encode(buf);
    }

    fn decode(r: &mut dyn Read) -> Result<RdnKey> {
        let parent = r.read_u64::<BigEndian>()?;
        let rdn = String::decode(r)?;
        Ok(RdnKey { parent, rdn })
    }
}

/// The fictitious parent of the suffix entry.
pub const ROOT_ID: u64 = 0;

// ---------------------------------------------------------------------------
// UserIndex
// ---------------------------------------------------------------------------

/// Per-attribute user index: normalized value -> ids, and the reverse.
#[derive(Debug, Clone)]
pub struct UserIndex {
    pub fwd: Table<String, u64>,
    pub rev: Table<u64, String>,
}

impl UserIndex {
    fn new(oid: &str) -> UserIndex {
        UserIndex {
            fwd: Table::new(format!("idx_{}_fwd", oid), true),
            rev: Table::new(format!("idx_{}_rev", oid), true),
        }
    }
}

// ---------------------------------------------------------------------------
// IndexPlan
// ---------------------------------------------------------------------------

/// Precomputed index rows for one entry; applying a plan cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPlan {
    /// Normalized RDN under the parent (full normalized DN for the suffix).
    pub rdn: String,
    /// OIDs present on the entry.
    pub presence: Vec<String>,
    /// (oid, normalized value) rows for attributes with a user index.
    pub user: Vec<(String, String)>,
    /// Normalized target DN if the entry is an alias.
    pub alias_target: Option<String>,
    /// entryUUID value, if stamped.
    pub uuid: Option<String>,
}

// ---------------------------------------------------------------------------
// PartitionState
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PartitionState {
    pub suffix: Dn,
    pub next_id: u64,
    pub master: Table<u64, Entry>,
    pub rdn_fwd: Table<RdnKey, u64>,
    pub rdn_rev: Table<u64, RdnKey>,
    pub one_level: Table<u64, u64>,
    pub sub_level: Table<u64, u64>,
    pub alias: Table<u64, String>,
    pub one_alias: Table<u64, u64>,
    pub sub_alias: Table<u64, u64>,
    pub presence: Table<String, u64>,
    pub uuid_idx: Table<String, u64>,
    /// Keyed by attribute OID.
    pub user_indexes: BTreeMap<String, UserIndex>,
}

impl PartitionState {
    pub fn new(suffix: Dn, indexed_oids: &[String]) -> PartitionState {
        let mut user_indexes = BTreeMap::new();
        for oid in indexed_oids {
            user_indexes.insert(oid.clone(), UserIndex::new(oid));
        }
        PartitionState {
            suffix,
            next_id: 1,
            master: Table::new("master", false),
            rdn_fwd: Table::new("rdn_fwd", false),
            rdn_rev: Table::new("rdn_rev", false),
            one_level: Table::new("onelevel", true),
            sub_level: Table::new("sublevel", true),
            alias: Table::new("alias", false),
            one_alias: Table::new("onealias", true),
            sub_alias: Table::new("subalias", true),
            presence: Table::new("presence", true),
            uuid_idx: Table::new("uuid", false),
            user_indexes,
        }
    }

    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn entry(&self, id: u64) -> Option<&Entry> {
        self.master.get(&id)
    }

    // -- DN <-> ID resolution ----------------------------------------------

    pub fn suffix_id(&self) -> Option<u64> {
        self.rdn_fwd
            .get(&RdnKey::new(ROOT_ID, self.suffix.norm()))
            .copied()
    }

    /// Resolve a DN (which must be at or under the suffix) to its entry id.
    pub fn resolve(&self, dn: &Dn) -> Option<u64> {
        if !dn.at_or_under(&self.suffix) {
            return None;
        }
        let mut id = self.suffix_id()?;
        if dn == &self.suffix {
            return Some(id);
        }
        let depth = dn.len() - self.suffix.len();
        for i in (0..depth).rev() {
            let rdn = dn.rdn_at(i)?;
            id = *self.rdn_fwd.get(&RdnKey::new(id, rdn.norm()))?;
        }
        Some(id)
    }

    /// Resolve or fail with `noSuchObject` carrying the matched DN.
    pub fn require_id(&self, dn: &Dn) -> Result<u64> {
        self.resolve(dn).ok_or_else(|| {
            let mut err = DirectoryError::no_such_object(dn.user());
            if let Some(matched) = self.matched_dn(dn) {
                err = err.with_matched_dn(matched.user());
            }
            err
        })
    }

    /// Deepest existing ancestor of `dn` within this partition.
    pub fn matched_dn(&self, dn: &Dn) -> Option<Dn> {
        let mut current = dn.parent();
        while let Some(d) = current {
            if !d.at_or_under(&self.suffix) {
                return None;
            }
            if let Some(id) = self.resolve(&d) {
                return self.entry(id).map(|e| e.dn.clone());
            }
            current = d.parent();
        }
        None
    }

    pub fn parent_id(&self, id: u64) -> Option<u64> {
        self.rdn_rev.get(&id).map(|k| k.parent)
    }

    /// Ancestor ids of `id` inside the partition, nearest first, suffix last.
    /// The fictitious root is not included.
    pub fn ancestor_ids(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut current = self.parent_id(id);
        while let Some(pid) = current {
            if pid == ROOT_ID {
                break;
            }
            out.push(pid);
            current = self.parent_id(pid);
        }
        out
    }

    /// The entry plus every descendant (via the sub-level closure).
    pub fn subtree_ids(&self, id: u64) -> Vec<u64> {
        let mut out = vec![id];
        out.extend(self.sub_level.get_dups(&id).iter().copied());
        out
    }

    pub fn has_children(&self, id: u64) -> bool {
        self.one_level.has(&id)
    }

    // -- index plans --------------------------------------------------------

    /// Compute every index row for `entry`. Pure; performs all fallible
    /// normalization up front.
    pub fn index_plan(&self, registry: &SchemaRegistry, entry: &Entry) -> Result<IndexPlan> {
        let rdn = if entry.dn == self.suffix {
            self.suffix.norm().to_string()
        } else {
            entry
                .dn
                .rdn()
                .ok_or_else(|| DirectoryError::invalid_dn_syntax("", "entry with empty DN"))?
                .norm()
                .to_string()
        };
        let mut presence = Vec::new();
        let mut user = Vec::new();
        for attr in entry.attributes() {
            presence.push(attr.oid.clone());
            if self.user_indexes.contains_key(&attr.oid) {
                let at = registry.require_attribute_type(&attr.oid)?;
                for value in attr.values() {
                    user.push((attr.oid.clone(), registry.normalize_value(at, value)?));
                }
            }
        }
        let alias_target = if entry.is_alias(registry) {
            let target = entry
                .first_text(registry, ids::ALIASED_OBJECT_NAME)
                .ok_or_else(|| {
                    DirectoryError::alias_problem("alias entry without aliasedObjectName")
                })?;
            Some(Dn::parse(registry, target)?.norm().to_string())
        } else {
            None
        };
        let uuid = entry
            .first_text(registry, ids::ENTRY_UUID)
            .map(|s| s.to_lowercase());
        Ok(IndexPlan {
            rdn,
            presence,
            user,
            alias_target,
            uuid,
        })
    }

    /// Insert an entry and all of its index rows. Infallible by design:
    /// the plan was computed up front.
    pub fn insert_entry(&mut self, id: u64, parent_id: u64, entry: Entry, plan: &IndexPlan) {
        let ancestors: Vec<u64> = if parent_id == ROOT_ID {
            Vec::new()
        } else {
            let mut a = vec![parent_id];
            a.extend(self.ancestor_ids(parent_id));
            a
        };

        self.master.put(id, entry);
        self.rdn_fwd.put(RdnKey::new(parent_id, plan.rdn.clone()), id);
        self.rdn_rev.put(id, RdnKey::new(parent_id, plan.rdn.clone()));
        self.one_level.put(parent_id, id);
        for &a in &ancestors {
            self.sub_level.put(a, id);
        }
        self.apply_value_rows(id, parent_id, &ancestors, plan);
    }

    /// Remove an entry and all of its index rows; returns the entry.
    pub fn remove_entry(&mut self, id: u64, plan: &IndexPlan) -> Option<Entry> {
        let parent_id = self.parent_id(id)?;
        let ancestors: Vec<u64> = if parent_id == ROOT_ID {
            Vec::new()
        } else {
            let mut a = vec![parent_id];
            a.extend(self.ancestor_ids(parent_id));
            a
        };

        self.revert_value_rows(id, parent_id, &ancestors, plan);
        for &a in &ancestors {
            self.sub_level.remove_pair(&a, &id);
        }
        self.one_level.remove_pair(&parent_id, &id);
        self.rdn_fwd.remove(&RdnKey::new(parent_id, plan.rdn.clone()));
        self.rdn_rev.remove(&id);
        self.master.remove(&id).and_then(|mut vs| vs.pop())
    }

    fn apply_value_rows(
        &mut self,
        id: u64,
        parent_id: u64,
        ancestors: &[u64],
        plan: &IndexPlan,
    ) {
        for oid in &plan.presence {
            self.presence.put(oid.clone(), id);
        }
        for (oid, norm) in &plan.user {
            if let Some(index) = self.user_indexes.get_mut(oid) {
                index.fwd.put(norm.clone(), id);
                index.rev.put(id, norm.clone());
            }
        }
        if let Some(target) = &plan.alias_target {
            self.alias.put(id, target.clone());
            self.one_alias.put(parent_id, id);
            for &a in ancestors {
                self.sub_alias.put(a, id);
            }
        }
        if let Some(uuid) = &plan.uuid {
            self.uuid_idx.put(uuid.clone(), id);
        }
    }

    fn revert_value_rows(
        &mut self,
        id: u64,
        parent_id: u64,
        ancestors: &[u64],
        plan: &IndexPlan,
    ) {
        for oid in &plan.presence {
            self.presence.remove_pair(oid, &id);
        }
        for (oid, norm) in &plan.user {
            if let Some(index) = self.user_indexes.get_mut(oid) {
                index.fwd.remove_pair(norm, &id);
                index.rev.remove_pair(&id, norm);
            }
        }
        if plan.alias_target.is_some() {
            self.alias.remove(&id);
            self.one_alias.remove_pair(&parent_id, &id);
            for &a in ancestors {
                self.sub_alias.remove_pair(&a, &id);
            }
        }
        if let Some(uuid) = &plan.uuid {
            self.uuid_idx.remove(uuid);
        }
    }

    /// Swap the value-derived index rows of `id` from `old_plan` to
    /// `new_plan` and rewrite the master record (modify).
    pub fn reindex_values(
        &mut self,
        id: u64,
        entry: Entry,
        old_plan: &IndexPlan,
        new_plan: &IndexPlan,
    ) {
        let parent_id = self.parent_id(id).unwrap_or(ROOT_ID);
        let ancestors: Vec<u64> = if parent_id == ROOT_ID {
            Vec::new()
        } else {
            let mut a = vec![parent_id];
            a.extend(self.ancestor_ids(parent_id));
            a
        };
        self.revert_value_rows(id, parent_id, &ancestors, old_plan);
        self.apply_value_rows(id, parent_id, &ancestors, new_plan);
        self.master.put(id, entry);
    }
}
