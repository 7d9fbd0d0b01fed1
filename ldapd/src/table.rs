//! B-tree table primitive.
//!
//! An ordered key/value store with optional duplicate-key support, the
//! building block under the partition's master and index tables. Keys and
//! values serialize through `Storable` into big-endian record files; a
//! per-table dirty flag acts as the write barrier so a flush only touches
//! tables that changed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::error::{DirectoryError, Result};

// ---------------------------------------------------------------------------
// Storable
// ---------------------------------------------------------------------------

/// Fixed big-endian record encoding for table keys and values.
pub trait Storable: Sized {
    fn encode(&self, buf: &mut Vec<u8>);
    fn decode(r: &mut dyn Read) -> Result<Self>;
}

impl Storable for u64 {
    fn encode(&self, buf: &mut Vec<u8>) {
        // Writing to a Vec cannot fail.
        let _ = buf.write_u64::<BigEndian>(*self);
    }

    fn decode(r: &mut dyn Read) -> Result<u64> {
        Ok(r.read_u64::<BigEndian>()?)
    }
}

impl Storable for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        let _ = buf.write_u32::<BigEndian>(self.len() as u32);
        buf.extend_from_slice(self.as_bytes());
    }

    fn decode(r: &mut dyn Read) -> Result<String> {
        let len = r.read_u32::<BigEndian>()? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|_| DirectoryError::operations_error("corrupt table record: bad UTF-8"))
    }
}

impl Storable for Vec<u8> {
    fn encode(&self, buf: &mut Vec<u8>) {
        let _ = buf.write_u32::<BigEndian>(self.len() as u32);
        buf.extend_from_slice(self);
    }

    fn decode(r: &mut dyn Read) -> Result<Vec<u8>> {
        let len = r.read_u32::<BigEndian>()? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

const TABLE_MAGIC: &[u8; 4] = b"LDT1";

/// Ordered key/value table. With `allows_dups`, each key holds a sorted
/// duplicate-free set of values; without, a put replaces the existing value.
#[derive(Debug, Clone)]
pub struct Table<K, V> {
    name: String,
    allows_dups: bool,
    map: BTreeMap<K, Vec<V>>,
    pairs: usize,
    dirty: bool,
}

impl<K: Ord + Clone, V: Ord + Clone> Table<K, V> {
    pub fn new(name: impl Into<String>, allows_dups: bool) -> Table<K, V> {
        Table {
            name: name.into(),
            allows_dups,
            map: BTreeMap::new(),
            pairs: 0,
            dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allows_dups(&self) -> bool {
        self.allows_dups
    }

    /// Has the table been written to since the last flush/load?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Total number of (key, value) pairs.
    pub fn len(&self) -> usize {
        self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    /// Number of values stored under `key`.
    pub fn count(&self, key: &K) -> usize {
        self.map.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn has(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn has_pair(&self, key: &K, value: &V) -> bool {
        self.map
            .get(key)
            .map(|vs| vs.binary_search(value).is_ok())
            .unwrap_or(false)
    }

    /// First (for unique tables, the only) value under `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key).and_then(|vs| vs.first())
    }

    /// All values under `key`, ordered.
    pub fn get_dups(&self, key: &K) -> &[V] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Insert a pair. For unique tables an existing value is replaced; for
    /// duplicate tables the value set is kept sorted and duplicate inserts
    /// are no-ops.
    pub fn put(&mut self, key: K, value: V) {
        self.dirty = true;
        let slot = self.map.entry(key).or_default();
        if self.allows_dups {
            if let Err(pos) = slot.binary_search(&value) {
                slot.insert(pos, value);
                self.pairs += 1;
            }
        } else {
            if slot.is_empty() {
                self.pairs += 1;
            }
            slot.clear();
            slot.push(value);
        }
    }

    /// Remove every value under `key`.
    pub fn remove(&mut self, key: &K) -> Option<Vec<V>> {
        match self.map.remove(key) {
            Some(vs) => {
                self.dirty = true;
                self.pairs -= vs.len();
                Some(vs)
            }
            None => None,
        }
    }

    /// Remove one (key, value) pair. Returns whether it was present.
    pub fn remove_pair(&mut self, key: &K, value: &V) -> bool {
        let Some(vs) = self.map.get_mut(key) else {
            return false;
        };
        let Ok(pos) = vs.binary_search(value) else {
            return false;
        };
        vs.remove(pos);
        self.pairs -= 1;
        self.dirty = true;
        if vs.is_empty() {
            self.map.remove(key);
        }
        true
    }

    pub fn clear(&mut self) {
        if !self.map.is_empty() {
            self.dirty = true;
        }
        self.map.clear();
        self.pairs = 0;
    }

    /// Forward cursor over all pairs in key order.
    pub fn cursor(&self) -> TableCursor<'_, K, V> {
        TableCursor::new(self.map.range(..))
    }

    /// Forward cursor over pairs with key >= `from`.
    pub fn cursor_from(&self, from: &K) -> TableCursor<'_, K, V> {
        TableCursor::new(self.map.range(from.clone()..))
    }

    /// Forward cursor over pairs with key <= `to`.
    pub fn cursor_to(&self, to: &K) -> TableCursor<'_, K, V> {
        TableCursor::new(self.map.range(..=to.clone()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }
}

impl<K, V> Table<K, V>
where
    K: Ord + Clone + Storable,
    V: Ord + Clone + Storable,
{
    /// `flush` only when the write barrier says the table changed.
    pub fn flush_if_dirty(&mut self, path: &Path) -> Result<()> {
        if self.dirty {
            self.flush(path)?;
        }
        Ok(())
    }

    /// Write all records to `path` and clear the dirty flag.
    pub fn flush(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(TABLE_MAGIC)?;
        w.write_u8(if self.allows_dups { 1 } else { 0 })?;
        w.write_u64::<BigEndian>(self.map.len() as u64)?;
        let mut buf = Vec::new();
        for (key, values) in &self.map {
            buf.clear();
            key.encode(&mut buf);
            let _ = buf.write_u32::<BigEndian>(values.len() as u32);
            for v in values {
                v.encode(&mut buf);
            }
            w.write_all(&buf)?;
        }
        w.flush()?;
        self.dirty = false;
        debug!(table = %self.name, keys = self.map.len(), "flushed table");
        Ok(())
    }

    /// Load a table from `path`. A missing file yields an empty table.
    pub fn load(name: impl Into<String>, allows_dups: bool, path: &Path) -> Result<Table<K, V>> {
        let mut table = Table::new(name, allows_dups);
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(table),
            Err(e) => return Err(e.into()),
        };
        let mut r = BufReader::new(file);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != TABLE_MAGIC {
            return Err(DirectoryError::operations_error(format!(
                "{}: not a table file",
                table.name
            )));
        }
        let _dups_flag = r.read_u8()?;
        let key_count = r.read_u64::<BigEndian>()?;
        for _ in 0..key_count {
            let key = K::decode(&mut r)?;
            let value_count = r.read_u32::<BigEndian>()?;
            let mut values = Vec::with_capacity(value_count as usize);
            for _ in 0..value_count {
                values.push(V::decode(&mut r)?);
            }
            table.pairs += values.len();
            table.map.insert(key, values);
        }
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// TableCursor
// ---------------------------------------------------------------------------

/// Forward cursor over (key, value) pairs. Duplicate keys yield one pair per
/// value, in value order.
pub struct TableCursor<'a, K, V> {
    range: std::collections::btree_map::Range<'a, K, Vec<V>>,
    current: Option<(&'a K, std::slice::Iter<'a, V>)>,
    closed: bool,
}

impl<'a, K: Ord, V> TableCursor<'a, K, V> {
    fn new(range: std::collections::btree_map::Range<'a, K, Vec<V>>) -> Self {
        TableCursor {
            range,
            current: None,
            closed: false,
        }
    }

    /// Stop enumerating; subsequent calls to `next` return `None`.
    pub fn close(&mut self) {
        self.closed = true;
        self.current = None;
    }
}

impl<'a, K: Ord, V> Iterator for TableCursor<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        loop {
            if let Some((key, values)) = &mut self.current {
                if let Some(v) = values.next() {
                    return Some((key, v));
                }
                self.current = None;
            }
            match self.range.next() {
                Some((k, vs)) => self.current = Some((k, vs.iter())),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Group 1: unique tables --

    #[test]
    fn put_replaces_in_unique_table() {
        let mut t: Table<u64, String> = Table::new("master", false);
        t.put(1, "a".into());
        t.put(1, "b".into());
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(&1), Some(&"b".to_string()));
    }

    #[test]
    fn remove_whole_key() {
        let mut t: Table<u64, u64> = Table::new("t", false);
        t.put(1, 10);
        assert!(t.remove(&1).is_some());
        assert!(t.remove(&1).is_none());
        assert!(t.is_empty());
    }

    // -- Group 2: duplicate tables --

    #[test]
    fn dups_stay_sorted_and_unique() {
        let mut t: Table<u64, u64> = Table::new("onelevel", true);
        t.put(1, 30);
        t.put(1, 10);
        t.put(1, 20);
        t.put(1, 10); // duplicate insert is a no-op
        assert_eq!(t.count(&1), 3);
        assert_eq!(t.get_dups(&1), &[10, 20, 30]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn remove_pair_only_touches_one_value() {
        let mut t: Table<u64, u64> = Table::new("onelevel", true);
        t.put(1, 10);
        t.put(1, 20);
        assert!(t.remove_pair(&1, &10));
        assert!(!t.remove_pair(&1, &10));
        assert_eq!(t.get_dups(&1), &[20]);
        assert!(t.remove_pair(&1, &20));
        assert!(!t.has(&1));
    }

    // -- Group 3: cursors --

    #[test]
    fn cursor_walks_pairs_in_order() {
        let mut t: Table<String, u64> = Table::new("idx", true);
        t.put("b".into(), 2);
        t.put("a".into(), 1);
        t.put("a".into(), 3);
        let pairs: Vec<(String, u64)> = t.cursor().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(
            pairs,
            vec![("a".into(), 1), ("a".into(), 3), ("b".into(), 2)]
        );
    }

    #[test]
    fn range_cursors() {
        let mut t: Table<u64, u64> = Table::new("idx", false);
        for i in 1..=5 {
            t.put(i, i * 10);
        }
        let from: Vec<u64> = t.cursor_from(&3).map(|(k, _)| *k).collect();
        assert_eq!(from, vec![3, 4, 5]);
        let to: Vec<u64> = t.cursor_to(&3).map(|(k, _)| *k).collect();
        assert_eq!(to, vec![1, 2, 3]);
    }

    #[test]
    fn closed_cursor_yields_nothing() {
        let mut t: Table<u64, u64> = Table::new("idx", false);
        t.put(1, 1);
        t.put(2, 2);
        let mut c = t.cursor();
        assert!(c.next().is_some());
        c.close();
        assert!(c.next().is_none());
    }

    // -- Group 4: persistence and the write barrier --

    #[test]
    fn dirty_flag_tracks_writes() {
        let mut t: Table<u64, u64> = Table::new("idx", true);
        assert!(!t.is_dirty());
        t.put(1, 1);
        assert!(t.is_dirty());
    }

    #[test]
    fn flush_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.tbl");
        let mut t: Table<String, u64> = Table::new("idx", true);
        t.put("alpha".into(), 1);
        t.put("alpha".into(), 2);
        t.put("beta".into(), 3);
        t.flush(&path).unwrap();
        assert!(!t.is_dirty());

        let loaded: Table<String, u64> = Table::load("idx", true, &path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get_dups(&"alpha".to_string()), &[1, 2]);
        assert_eq!(loaded.get(&"beta".to_string()), Some(&3));
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let t: Table<u64, u64> =
            Table::load("idx", false, &dir.path().join("nope.tbl")).unwrap();
        assert!(t.is_empty());
    }
}
