//! Partition persistence.
//!
//! One file per table under the partition directory, plus a small admin file
//! carrying the format version and the ID sequence. The master file stores
//! full entries (DN and typed values); index files use the generic table
//! record format. Opening a directory whose indexes are missing rebuilds
//! them from the master.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use super::indexes::{PartitionState, ROOT_ID};
use crate::entry::{Entry, Value};
use crate::error::{DirectoryError, Result};
use crate::name::Dn;
use crate::schema::SchemaRegistry;
use crate::table::{Storable, Table};

const ADMIN_MAGIC: &[u8; 4] = b"LDA1";
const MASTER_MAGIC: &[u8; 4] = b"LDM1";
const FORMAT_VERSION: u32 = 1;

fn admin_path(dir: &Path) -> std::path::PathBuf {
    dir.join("admin.tbl")
}

fn master_path(dir: &Path) -> std::path::PathBuf {
    dir.join("master.tbl")
}

fn user_index_paths(dir: &Path, oid: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    (
        dir.join(format!("idx_{}_fwd.tbl", oid)),
        dir.join(format!("idx_{}_rev.tbl", oid)),
    )
}

// ---------------------------------------------------------------------------
// flush
// ---------------------------------------------------------------------------

pub fn flush(state: &mut PartitionState, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;

    // Admin file: version and the ID sequence.
    let mut admin = BufWriter::new(File::create(admin_path(dir))?);
    admin.write_all(ADMIN_MAGIC)?;
    admin.write_u32::<BigEndian>(FORMAT_VERSION)?;
    admin.write_u64::<BigEndian>(state.next_id)?;
    admin.flush()?;

    if state.master.is_dirty() {
        write_master(&state.master, &master_path(dir))?;
        state.master.mark_clean();
    }

    state.rdn_fwd.flush_if_dirty(&dir.join("rdn_fwd.tbl"))?;
    state.rdn_rev.flush_if_dirty(&dir.join("rdn_rev.tbl"))?;
    state.one_level.flush_if_dirty(&dir.join("onelevel.tbl"))?;
    state.sub_level.flush_if_dirty(&dir.join("sublevel.tbl"))?;
    state.alias.flush_if_dirty(&dir.join("alias.tbl"))?;
    state.one_alias.flush_if_dirty(&dir.join("onealias.tbl"))?;
    state.sub_alias.flush_if_dirty(&dir.join("subalias.tbl"))?;
    state.presence.flush_if_dirty(&dir.join("presence.tbl"))?;
    state.uuid_idx.flush_if_dirty(&dir.join("uuid.tbl"))?;
    for (oid, index) in state.user_indexes.iter_mut() {
        let (fwd, rev) = user_index_paths(dir, oid);
        // An untouched index still needs its (empty) file, or the next open
        // would see it as missing and rebuild.
        if index.fwd.is_dirty() || !fwd.exists() {
            index.fwd.flush(&fwd)?;
        }
        if index.rev.is_dirty() || !rev.exists() {
            index.rev.flush(&rev)?;
        }
    }
    debug!(dir = %dir.display(), "flushed partition");
    Ok(())
}

fn write_master(master: &Table<u64, Entry>, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(MASTER_MAGIC)?;
    w.write_u64::<BigEndian>(master.len() as u64)?;
    let mut buf = Vec::new();
    for (id, entry) in master.cursor() {
        buf.clear();
        let _ = buf.write_u64::<BigEndian>(*id);
        entry.dn.user().to_string().encode(&mut buf);
        let _ = buf.write_u32::<BigEndian>(entry.attributes().len() as u32);
        for attr in entry.attributes() {
            attr.id.encode(&mut buf);
            let _ = buf.write_u32::<BigEndian>(attr.values().len() as u32);
            for value in attr.values() {
                match value {
                    Value::Text(s) => {
                        buf.push(0);
                        s.encode(&mut buf);
                    }
                    Value::Binary(b) => {
                        buf.push(1);
                        b.encode(&mut buf);
                    }
                }
            }
        }
        w.write_all(&buf)?;
    }
    w.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// open
// ---------------------------------------------------------------------------

pub fn open(
    registry: &SchemaRegistry,
    suffix: Dn,
    indexed_oids: &[String],
    dir: &Path,
) -> Result<PartitionState> {
    let mut state = PartitionState::new(suffix, indexed_oids);
    let admin = match File::open(admin_path(dir)) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(e.into()),
    };
    let mut admin = BufReader::new(admin);
    let mut magic = [0u8; 4];
    admin.read_exact(&mut magic)?;
    if &magic != ADMIN_MAGIC {
        return Err(DirectoryError::operations_error("bad partition admin file"));
    }
    let version = admin.read_u32::<BigEndian>()?;
    if version != FORMAT_VERSION {
        return Err(DirectoryError::operations_error(format!(
            "unsupported partition format version {}",
            version
        )));
    }
    state.next_id = admin.read_u64::<BigEndian>()?;

    state.master = read_master(registry, &master_path(dir))?;

    let mut indexes_complete = true;
    state.rdn_fwd = Table::load("rdn_fwd", false, &dir.join("rdn_fwd.tbl"))?;
    state.rdn_rev = Table::load("rdn_rev", false, &dir.join("rdn_rev.tbl"))?;
    state.one_level = Table::load("onelevel", true, &dir.join("onelevel.tbl"))?;
    state.sub_level = Table::load("sublevel", true, &dir.join("sublevel.tbl"))?;
    state.alias = Table::load("alias", false, &dir.join("alias.tbl"))?;
    state.one_alias = Table::load("onealias", true, &dir.join("onealias.tbl"))?;
    state.sub_alias = Table::load("subalias", true, &dir.join("subalias.tbl"))?;
    state.presence = Table::load("presence", true, &dir.join("presence.tbl"))?;
    state.uuid_idx = Table::load("uuid", false, &dir.join("uuid.tbl"))?;
    for (oid, index) in state.user_indexes.iter_mut() {
        let (fwd_path, rev_path) = user_index_paths(dir, oid);
        if !fwd_path.exists() {
            indexes_complete = false;
        }
        index.fwd = Table::load(format!("idx_{}_fwd", oid), true, &fwd_path)?;
        index.rev = Table::load(format!("idx_{}_rev", oid), true, &rev_path)?;
    }
    if !state.master.is_empty() && state.rdn_fwd.is_empty() {
        indexes_complete = false;
    }

    if !indexes_complete && !state.master.is_empty() {
        warn!(dir = %dir.display(), "index files incomplete; rebuilding from master");
        rebuild_indexes(registry, &mut state)?;
    }
    Ok(state)
}

fn read_master(registry: &SchemaRegistry, path: &Path) -> Result<Table<u64, Entry>> {
    let mut master: Table<u64, Entry> = Table::new("master", false);
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(master),
        Err(e) => return Err(e.into()),
    };
    let mut r = BufReader::new(file);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MASTER_MAGIC {
        return Err(DirectoryError::operations_error("bad master file"));
    }
    let count = r.read_u64::<BigEndian>()?;
    for _ in 0..count {
        let id = r.read_u64::<BigEndian>()?;
        let dn_text = String::decode(&mut r)?;
        let dn = Dn::parse(registry, &dn_text)?;
        let mut entry = Entry::new(dn);
        let attr_count = r.read_u32::<BigEndian>()?;
        for _ in 0..attr_count {
            let attr_id = String::decode(&mut r)?;
            let value_count = r.read_u32::<BigEndian>()?;
            let mut values = Vec::with_capacity(value_count as usize);
            for _ in 0..value_count {
                let tag = r.read_u8()?;
                values.push(match tag {
                    0 => Value::Text(String::decode(&mut r)?),
                    1 => Value::Binary(Vec::<u8>::decode(&mut r)?),
                    other => {
                        return Err(DirectoryError::operations_error(format!(
                            "corrupt master record: value tag {}",
                            other
                        )))
                    }
                });
            }
            entry.put(registry, &attr_id, values)?;
        }
        master.put(id, entry);
    }
    master.mark_clean();
    Ok(master)
}

/// Re-derive every index from the master table: entries are replayed
/// shallow-to-deep so parents resolve before their children.
fn rebuild_indexes(registry: &SchemaRegistry, state: &mut PartitionState) -> Result<()> {
    let mut records: Vec<(u64, Entry)> = state
        .master
        .cursor()
        .map(|(id, e)| (*id, e.clone()))
        .collect();
    records.sort_by(|(_, a), (_, b)| a.dn.len().cmp(&b.dn.len()));

    let indexed: Vec<String> = state.user_indexes.keys().cloned().collect();
    let mut fresh = PartitionState::new(state.suffix.clone(), &indexed);
    fresh.next_id = state.next_id;
    for (id, entry) in records {
        let parent_id = if entry.dn == fresh.suffix {
            ROOT_ID
        } else {
            let parent_dn = entry.dn.parent().ok_or_else(|| {
                DirectoryError::operations_error("master entry with no parent DN")
            })?;
            fresh.resolve(&parent_dn).ok_or_else(|| {
                DirectoryError::operations_error(format!(
                    "orphan master entry: {}",
                    entry.dn.user()
                ))
            })?
        };
        let plan = fresh.index_plan(registry, &entry)?;
        fresh.insert_entry(id, parent_id, entry, &plan);
    }
    // Fresh tables must persist on the next flush.
    *state = fresh;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::bootstrap_registry;

    fn seed(registry: &SchemaRegistry) -> PartitionState {
        let suffix = Dn::parse(registry, "o=example").unwrap();
        let cn = registry.attribute_type("cn").unwrap().oid.clone();
        let mut state = PartitionState::new(suffix.clone(), &[cn]);

        let mut root = Entry::new(suffix);
        root.add(registry, "objectClass", "top").unwrap();
        root.add(registry, "objectClass", "organization").unwrap();
        root.add(registry, "o", "example").unwrap();
        let plan = state.index_plan(registry, &root).unwrap();
        let id = state.allocate_id();
        state.insert_entry(id, ROOT_ID, root, &plan);

        let dn = Dn::parse(registry, "cn=alice,o=example").unwrap();
        let mut alice = Entry::new(dn);
        alice.add(registry, "objectClass", "top").unwrap();
        alice.add(registry, "objectClass", "person").unwrap();
        alice.add(registry, "cn", "alice").unwrap();
        alice.add(registry, "sn", "smith").unwrap();
        let plan = state.index_plan(registry, &alice).unwrap();
        let aid = state.allocate_id();
        state.insert_entry(aid, id, alice, &plan);
        state
    }

    #[test]
    fn flush_open_round_trip() {
        let reg = bootstrap_registry();
        let dir = tempfile::tempdir().unwrap();
        let mut state = seed(&reg);
        let next_id = state.next_id;
        flush(&mut state, dir.path()).unwrap();

        let cn = reg.attribute_type("cn").unwrap().oid.clone();
        let suffix = Dn::parse(&reg, "o=example").unwrap();
        let loaded = open(&reg, suffix, &[cn.clone()], dir.path()).unwrap();
        assert_eq!(loaded.next_id, next_id);
        assert_eq!(loaded.master.len(), 2);
        let alice_dn = Dn::parse(&reg, "cn=alice,o=example").unwrap();
        let id = loaded.resolve(&alice_dn).unwrap();
        assert_eq!(
            loaded.entry(id).unwrap().first_text(&reg, "sn"),
            Some("smith")
        );
        assert!(loaded
            .user_indexes
            .get(&cn)
            .unwrap()
            .fwd
            .has(&"alice".to_string()));
    }

    #[test]
    fn open_missing_directory_is_empty() {
        let reg = bootstrap_registry();
        let dir = tempfile::tempdir().unwrap();
        let suffix = Dn::parse(&reg, "o=example").unwrap();
        let state = open(&reg, suffix, &[], dir.path().join("nope").as_path()).unwrap();
        assert!(state.master.is_empty());
        assert_eq!(state.next_id, 1);
    }

    #[test]
    fn missing_index_files_trigger_rebuild() {
        let reg = bootstrap_registry();
        let dir = tempfile::tempdir().unwrap();
        let mut state = seed(&reg);
        flush(&mut state, dir.path()).unwrap();
        // Drop the level and rdn indexes on disk.
        fs::remove_file(dir.path().join("rdn_fwd.tbl")).unwrap();
        fs::remove_file(dir.path().join("sublevel.tbl")).unwrap();

        let cn = reg.attribute_type("cn").unwrap().oid.clone();
        let suffix = Dn::parse(&reg, "o=example").unwrap();
        let loaded = open(&reg, suffix.clone(), &[cn], dir.path()).unwrap();
        let root = loaded.suffix_id().unwrap();
        assert_eq!(loaded.sub_level.count(&root), 1);
        let alice_dn = Dn::parse(&reg, "cn=alice,o=example").unwrap();
        assert!(loaded.resolve(&alice_dn).is_some());
    }
}
