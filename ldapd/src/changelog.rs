//! Change log.
//!
//! A monotonically numbered log of reversible change records. Each committed
//! mutation appends a forward record and the records that undo it; tags name
//! revisions so a whole span can be reverted by replaying the reverse
//! records newest-first. Appending happens after the partition writer lock
//! is released, under the log's own lock.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::entry::{ModOp, Modification};
use crate::ldif::ChangeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Delete,
    Modify,
    ModDn,
}

#[derive(Debug, Clone)]
pub struct ChangeLogEvent {
    pub revision: u64,
    pub change_type: ChangeType,
    /// Principal that issued the change (user form DN).
    pub principal: String,
    pub csn: String,
    pub forward: ChangeRecord,
    /// Replayed newest-first to undo this event.
    pub reverse: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub revision: u64,
    pub description: String,
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<ChangeLogEvent>,
    tags: BTreeMap<u64, String>,
    current: u64,
}

#[derive(Debug, Default)]
pub struct ChangeLog {
    state: Mutex<LogState>,
}

impl ChangeLog {
    pub fn new() -> ChangeLog {
        ChangeLog::default()
    }

    pub fn current_revision(&self) -> u64 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).current
    }

    /// Append a committed change; returns its revision.
    pub fn append(
        &self,
        change_type: ChangeType,
        principal: String,
        csn: String,
        forward: ChangeRecord,
        reverse: Vec<ChangeRecord>,
    ) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.current += 1;
        let revision = state.current;
        state.events.push(ChangeLogEvent {
            revision,
            change_type,
            principal,
            csn,
            forward,
            reverse,
        });
        revision
    }

    /// Tag the current revision. A revision carries at most one tag; tagging
    /// it again returns the existing tag.
    pub fn tag(&self, description: impl Into<String>) -> Tag {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let revision = state.current;
        let description = state
            .tags
            .entry(revision)
            .or_insert_with(|| description.into())
            .clone();
        Tag {
            revision,
            description,
        }
    }

    pub fn tag_at(&self, revision: u64) -> Option<Tag> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.tags.get(&revision).map(|d| Tag {
            revision,
            description: d.clone(),
        })
    }

    /// Events newer than `revision`, oldest first.
    pub fn events_since(&self, revision: u64) -> Vec<ChangeLogEvent> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .events
            .iter()
            .filter(|e| e.revision > revision)
            .cloned()
            .collect()
    }

    /// Drop every event newer than `revision` (after a successful revert)
    /// and rewind the counter.
    pub fn truncate_to(&self, revision: u64) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.events.retain(|e| e.revision <= revision);
        state.tags.retain(|r, _| *r <= revision);
        state.current = revision;
    }
}

/// The modifications that undo `mods` applied to `before`, in undo order.
pub fn invert_modifications(
    registry: &crate::schema::SchemaRegistry,
    before: &crate::entry::Entry,
    mods: &[Modification],
) -> Vec<Modification> {
    let mut reverse: Vec<Modification> = Vec::with_capacity(mods.len());
    for m in mods.iter().rev() {
        let old_values: Vec<crate::entry::Value> = before
            .get(registry, &m.attr)
            .map(|a| a.values().to_vec())
            .unwrap_or_default();
        let inverted = match m.op {
            ModOp::Add => Modification::remove(m.attr.clone(), m.values.clone()),
            ModOp::Remove if m.values.is_empty() => {
                Modification::replace(m.attr.clone(), old_values)
            }
            ModOp::Remove => Modification::add(m.attr.clone(), m.values.clone()),
            ModOp::Replace => Modification::replace(m.attr.clone(), old_values),
        };
        reverse.push(inverted);
    }
    reverse
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, Value};
    use crate::name::Dn;
    use crate::schema::bootstrap_registry;

    fn record(dn: &str) -> ChangeRecord {
        let reg = bootstrap_registry();
        ChangeRecord::Delete(Dn::parse(&reg, dn).unwrap())
    }

    // -- Group 1: numbering and tags --

    #[test]
    fn revisions_are_monotonic() {
        let log = ChangeLog::new();
        assert_eq!(log.current_revision(), 0);
        let r1 = log.append(
            ChangeType::Delete,
            "uid=admin,ou=system".into(),
            "csn1".into(),
            record("cn=a,o=example"),
            vec![],
        );
        let r2 = log.append(
            ChangeType::Delete,
            "uid=admin,ou=system".into(),
            "csn2".into(),
            record("cn=b,o=example"),
            vec![],
        );
        assert_eq!((r1, r2), (1, 2));
        assert_eq!(log.current_revision(), 2);
    }

    #[test]
    fn one_tag_per_revision() {
        let log = ChangeLog::new();
        log.append(
            ChangeType::Delete,
            "".into(),
            "csn".into(),
            record("cn=a,o=example"),
            vec![],
        );
        let t1 = log.tag("before upgrade");
        let t2 = log.tag("something else");
        assert_eq!(t1, t2);
        assert_eq!(log.tag_at(1).unwrap().description, "before upgrade");
    }

    #[test]
    fn events_since_and_truncate() {
        let log = ChangeLog::new();
        for name in ["a", "b", "c"] {
            log.append(
                ChangeType::Delete,
                "".into(),
                "csn".into(),
                record(&format!("cn={},o=example", name)),
                vec![],
            );
        }
        assert_eq!(log.events_since(1).len(), 2);
        log.truncate_to(1);
        assert_eq!(log.current_revision(), 1);
        assert!(log.events_since(0).len() == 1);
    }

    // -- Group 2: inverse modifications --

    #[test]
    fn invert_add_remove_replace() {
        let reg = bootstrap_registry();
        let dn = Dn::parse(&reg, "cn=a,o=example").unwrap();
        let mut before = Entry::new(dn);
        before.add(&reg, "cn", "a").unwrap();
        before.add(&reg, "description", "old").unwrap();

        let mods = vec![
            Modification::add("telephoneNumber", vec![Value::text("1")]),
            Modification::replace("description", vec![Value::text("new")]),
            Modification::remove("cn", vec![Value::text("a")]),
        ];
        let reverse = invert_modifications(&reg, &before, &mods);
        assert_eq!(reverse.len(), 3);
        // Undo order: last modification first.
        assert_eq!(reverse[0].op, ModOp::Add);
        assert_eq!(reverse[0].attr, "cn");
        assert_eq!(reverse[1].op, ModOp::Replace);
        assert_eq!(
            reverse[1].values,
            vec![Value::text("old")],
        );
        assert_eq!(reverse[2].op, ModOp::Remove);
        assert_eq!(reverse[2].attr, "telephoneNumber");
    }
}
