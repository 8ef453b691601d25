//! Embedded structure store on sled.
//!
//! Each structure family lives in its own tree. Container members are keyed
//! `[container][0x00][member]` so one container is a contiguous key range.
//!
//! Scan cursors are handles onto the last key a round examined. The next round
//! resumes strictly after that key, so entries present for the whole scan are
//! returned even when other entries are removed or added between rounds.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use kvql_proto::Value;
use sled::{Db, IVec, Tree};

use super::pattern::{glob_match, literal_prefix};
use super::{ScanPage, StoreConfig, StoreError, StructureStore, WriteMode, CURSOR_START};

/// Tree name for top-level scalar keys.
const STRINGS_TREE: &str = "kv:strings";

/// Tree name for set members.
const SETS_TREE: &str = "kv:sets";

/// Tree name for hash fields.
const HASHES_TREE: &str = "kv:hashes";

/// Tree name for sorted-set members.
const ZSETS_TREE: &str = "kv:zsets";

/// Separates a container key from its member in composite keys.
const SEPARATOR: u8 = 0x00;

/// Open cursors kept before the oldest are evicted.
const MAX_OPEN_CURSORS: usize = 4096;

/// Resume positions of in-flight scans, keyed by cursor.
#[derive(Debug)]
struct CursorTable {
    next: AtomicU64,
    resume: DashMap<u64, IVec>,
}

impl CursorTable {
    fn new() -> Self {
        Self {
            // CURSOR_START is never issued
            next: AtomicU64::new(CURSOR_START + 1),
            resume: DashMap::new(),
        }
    }

    /// Issue a cursor resuming after `key`.
    fn open(&self, key: IVec) -> u64 {
        let cursor = self.next.fetch_add(1, Ordering::Relaxed);
        if self.resume.len() >= MAX_OPEN_CURSORS {
            // Abandoned scans never hand their cursor back
            let floor = cursor.saturating_sub(MAX_OPEN_CURSORS as u64);
            self.resume.retain(|open, _| *open > floor);
        }
        self.resume.insert(cursor, key);
        cursor
    }

    /// Consume a cursor, returning the key to resume after.
    fn take(&self, cursor: u64) -> Result<IVec, StoreError> {
        self.resume
            .remove(&cursor)
            .map(|(_, key)| key)
            .ok_or(StoreError::UnknownCursor(cursor))
    }
}

/// Structure store backed by sled.
///
/// Cloning is cheap and yields another handle onto the same database.
#[derive(Clone)]
pub struct SledStore {
    /// The underlying sled database.
    db: Db,
    strings: Tree,
    sets: Tree,
    hashes: Tree,
    zsets: Tree,
    cursors: Arc<CursorTable>,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let db = config.to_sled_config().open()?;
        Self::from_db(db)
    }

    /// Build a store on an already open database.
    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        let strings = db.open_tree(STRINGS_TREE)?;
        let sets = db.open_tree(SETS_TREE)?;
        let hashes = db.open_tree(HASHES_TREE)?;
        let zsets = db.open_tree(ZSETS_TREE)?;

        Ok(Self {
            db,
            strings,
            sets,
            hashes,
            zsets,
            cursors: Arc::new(CursorTable::new()),
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the underlying sled database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    fn container_prefix(container: &str) -> Result<Vec<u8>, StoreError> {
        if container.as_bytes().contains(&SEPARATOR) {
            return Err(StoreError::InvalidKey(container.to_string()));
        }
        let mut prefix = Vec::with_capacity(container.len() + 1);
        prefix.extend_from_slice(container.as_bytes());
        prefix.push(SEPARATOR);
        Ok(prefix)
    }

    fn member_key(container: &str, member: &str) -> Result<Vec<u8>, StoreError> {
        let mut key = Self::container_prefix(container)?;
        key.extend_from_slice(member.as_bytes());
        Ok(key)
    }

    /// One scan round over `tree`.
    ///
    /// Candidates are the keys under the container and the pattern's literal
    /// prefix, in key order. A round examines up to `count` of them starting
    /// after the key the cursor resumes from.
    fn scan_tree<T, F>(
        &self,
        tree: &Tree,
        container: Option<&str>,
        cursor: u64,
        pattern: &str,
        count: usize,
        mut decode: F,
    ) -> Result<ScanPage<T>, StoreError>
    where
        F: FnMut(String, &[u8]) -> Result<T, StoreError>,
    {
        let mut range = match container {
            Some(container) => Self::container_prefix(container)?,
            None => Vec::new(),
        };
        let strip = range.len();
        range.extend_from_slice(literal_prefix(pattern).as_bytes());

        let start = if cursor == CURSOR_START {
            Bound::Included(IVec::from(range.as_slice()))
        } else {
            Bound::Excluded(self.cursors.take(cursor)?)
        };

        let count = count.max(1);
        let mut items = Vec::new();
        let mut examined = 0usize;
        let mut last = None;

        for entry in tree.range::<IVec, _>((start, Bound::Unbounded)) {
            let (key, value) = entry?;
            if !key.starts_with(&range) {
                break;
            }
            examined += 1;

            let name = std::str::from_utf8(&key[strip..])
                .map_err(|_| StoreError::Corrupt(String::from_utf8_lossy(&key).into_owned()))?;
            if glob_match(pattern, name) {
                items.push(decode(name.to_string(), &value)?);
            }

            last = Some(key);
            if examined == count {
                break;
            }
        }

        let next = match last {
            Some(key) if examined == count => self.cursors.open(key),
            _ => CURSOR_START,
        };
        Ok(ScanPage::new(next, items))
    }

    fn conditional_insert(
        tree: &Tree,
        key: &[u8],
        value: &[u8],
        mode: WriteMode,
    ) -> Result<bool, StoreError> {
        let mut written = false;
        tree.fetch_and_update(key, |old| {
            written = mode.permits(old.is_some());
            if written {
                Some(value.to_vec())
            } else {
                old.map(|bytes| bytes.to_vec())
            }
        })?;
        Ok(written)
    }

    fn decode_score(key: &str, bytes: &[u8]) -> Result<f64, StoreError> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StoreError::Corrupt(key.to_string()))?;
        Ok(f64::from_be_bytes(raw))
    }
}

impl StructureStore for SledStore {
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage<String>, StoreError> {
        self.scan_tree(&self.strings, None, cursor, pattern, count, |name, _| Ok(name))
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.strings.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Value::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value, mode: WriteMode) -> Result<bool, StoreError> {
        let encoded = value.to_bytes()?;
        Self::conditional_insert(&self.strings, key.as_bytes(), &encoded, mode)
    }

    fn del(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.strings.remove(key.as_bytes())?.is_some())
    }

    fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage<String>, StoreError> {
        self.scan_tree(&self.sets, Some(key), cursor, pattern, count, |member, _| Ok(member))
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.sets.contains_key(Self::member_key(key, member)?)?)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let member_key = Self::member_key(key, member)?;
        Self::conditional_insert(&self.sets, &member_key, &[], WriteMode::IfAbsent)
    }

    fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.sets.remove(Self::member_key(key, member)?)?.is_some())
    }

    fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage<(String, Value)>, StoreError> {
        self.scan_tree(&self.hashes, Some(key), cursor, pattern, count, |field, bytes| {
            Ok((field, Value::from_bytes(bytes)?))
        })
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        match self.hashes.get(Self::member_key(key, field)?)? {
            Some(bytes) => Ok(Some(Value::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &Value, mode: WriteMode) -> Result<bool, StoreError> {
        let field_key = Self::member_key(key, field)?;
        let encoded = value.to_bytes()?;
        Self::conditional_insert(&self.hashes, &field_key, &encoded, mode)
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self.hashes.remove(Self::member_key(key, field)?)?.is_some())
    }

    fn zscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage<(String, f64)>, StoreError> {
        self.scan_tree(&self.zsets, Some(key), cursor, pattern, count, |member, bytes| {
            let score = Self::decode_score(&member, bytes)?;
            Ok((member, score))
        })
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        match self.zsets.get(Self::member_key(key, member)?)? {
            Some(bytes) => Ok(Some(Self::decode_score(member, &bytes)?)),
            None => Ok(None),
        }
    }

    fn zadd(&self, key: &str, member: &str, score: f64, mode: WriteMode) -> Result<bool, StoreError> {
        let member_key = Self::member_key(key, member)?;
        Self::conditional_insert(&self.zsets, &member_key, &score.to_be_bytes(), mode)
    }

    fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.zsets.remove(Self::member_key(key, member)?)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SledStore {
        SledStore::open(StoreConfig::temporary()).unwrap()
    }

    fn drain_keys(store: &SledStore, pattern: &str, count: usize) -> (Vec<String>, usize) {
        let mut cursor = CURSOR_START;
        let mut keys = Vec::new();
        let mut rounds = 0;
        loop {
            let page = store.scan(cursor, pattern, count).unwrap();
            rounds += 1;
            keys.extend(page.items);
            cursor = page.cursor;
            if cursor == CURSOR_START {
                break;
            }
        }
        (keys, rounds)
    }

    #[test]
    fn test_scalar_set_and_get() {
        let store = test_store();

        assert!(store.set("k", &Value::from("v1"), WriteMode::Always).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(Value::from("v1")));
        assert_eq!(store.get("missing").unwrap(), None);

        // IfAbsent leaves the existing value alone
        assert!(!store.set("k", &Value::from("v2"), WriteMode::IfAbsent).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(Value::from("v1")));

        // IfPresent only touches existing keys
        assert!(store.set("k", &Value::from("v3"), WriteMode::IfPresent).unwrap());
        assert!(!store.set("other", &Value::from("x"), WriteMode::IfPresent).unwrap());
        assert_eq!(store.get("other").unwrap(), None);

        assert!(store.del("k").unwrap());
        assert!(!store.del("k").unwrap());
    }

    #[test]
    fn test_scan_paginates_and_terminates() {
        let store = test_store();
        for i in 0..10 {
            store
                .set(&format!("orders:{}", i), &Value::Int64(i), WriteMode::Always)
                .unwrap();
        }
        store.set("users:1", &Value::from("u"), WriteMode::Always).unwrap();

        let (keys, rounds) = drain_keys(&store, "orders:*", 3);
        assert_eq!(keys.len(), 10);
        assert_eq!(rounds, 4);

        // Exactly one full page left: the final round is empty but still ends the scan
        let (keys, rounds) = drain_keys(&store, "orders:*", 5);
        assert_eq!(keys.len(), 10);
        assert_eq!(rounds, 3);

        let (keys, _) = drain_keys(&store, "*", 100);
        assert_eq!(keys.len(), 11);
    }

    #[test]
    fn test_scan_may_return_empty_pages() {
        let store = test_store();
        for name in ["a1", "a2", "b1", "b2", "b3", "c1"] {
            store.set(name, &Value::Null, WriteMode::Always).unwrap();
        }

        // No literal prefix, so every key is a candidate but few match
        let first = store.scan(CURSOR_START, "*1", 2).unwrap();
        assert_eq!(first.items, vec!["a1".to_string()]);
        assert_ne!(first.cursor, CURSOR_START);

        let second = store.scan(first.cursor, "*1", 2).unwrap();
        assert_eq!(second.items, vec!["b1".to_string()]);

        let third = store.scan(second.cursor, "*3", 2).unwrap();
        assert_eq!(third.items, vec!["b3".to_string()]);
    }

    #[test]
    fn test_scan_keeps_untouched_keys_across_deletes() {
        let store = test_store();
        for name in ["t:a", "t:b", "t:c", "t:d"] {
            store.set(name, &Value::Null, WriteMode::Always).unwrap();
        }

        let first = store.scan(CURSOR_START, "t:*", 2).unwrap();
        assert_eq!(first.items, vec!["t:a".to_string(), "t:b".to_string()]);

        // Removing an already returned key must not shift the rest out of reach
        assert!(store.del("t:a").unwrap());

        let mut seen = first.items;
        let mut cursor = first.cursor;
        while cursor != CURSOR_START {
            let page = store.scan(cursor, "t:*", 2).unwrap();
            seen.extend(page.items);
            cursor = page.cursor;
        }
        assert_eq!(seen, vec!["t:a", "t:b", "t:c", "t:d"]);
    }

    #[test]
    fn test_sscan_resumes_after_last_member() {
        let store = test_store();
        for id in 0..6 {
            store.sadd("orders", &format!("orders:{}", id)).unwrap();
        }

        let first = store.sscan("orders", CURSOR_START, "orders:*", 3).unwrap();
        assert_eq!(first.items.len(), 3);
        store.srem("orders", "orders:0").unwrap();
        store.srem("orders", "orders:1").unwrap();

        let second = store.sscan("orders", first.cursor, "orders:*", 3).unwrap();
        assert_eq!(second.items, vec!["orders:3", "orders:4", "orders:5"]);
    }

    #[test]
    fn test_cursor_is_consumed() {
        let store = test_store();
        for name in ["a", "b", "c"] {
            store.set(name, &Value::Null, WriteMode::Always).unwrap();
        }

        let first = store.scan(CURSOR_START, "*", 1).unwrap();
        store.scan(first.cursor, "*", 1).unwrap();
        let err = store.scan(first.cursor, "*", 1).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCursor(c) if c == first.cursor));
    }

    #[test]
    fn test_set_members() {
        let store = test_store();
        assert!(store.sadd("orders", "orders:1").unwrap());
        assert!(store.sadd("orders", "orders:2").unwrap());
        assert!(!store.sadd("orders", "orders:1").unwrap());
        assert!(store.sadd("ordersx", "orders:9").unwrap());

        assert!(store.sismember("orders", "orders:2").unwrap());
        assert!(!store.sismember("orders", "orders:9").unwrap());

        let page = store.sscan("orders", CURSOR_START, "orders:*", 100).unwrap();
        assert!(page.is_last());
        assert_eq!(page.items, vec!["orders:1".to_string(), "orders:2".to_string()]);

        assert!(store.srem("orders", "orders:1").unwrap());
        assert!(!store.sismember("orders", "orders:1").unwrap());
    }

    #[test]
    fn test_hash_fields() {
        let store = test_store();
        store
            .hset("users", "users:name", &Value::from("a"), WriteMode::Always)
            .unwrap();
        store
            .hset("users", "users:age", &Value::from("30"), WriteMode::Always)
            .unwrap();

        assert_eq!(store.hget("users", "users:name").unwrap(), Some(Value::from("a")));
        assert_eq!(store.hget("users", "users:missing").unwrap(), None);

        let page = store.hscan("users", CURSOR_START, "users:*", 100).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items.contains(&("users:age".to_string(), Value::from("30"))));

        assert!(store.hdel("users", "users:age").unwrap());
        assert_eq!(store.hget("users", "users:age").unwrap(), None);
    }

    #[test]
    fn test_sorted_set_members() {
        let store = test_store();
        store.zadd("board", "board:alice", 10.0, WriteMode::Always).unwrap();
        store.zadd("board", "board:bob", 7.5, WriteMode::Always).unwrap();
        assert!(!store.zadd("board", "board:bob", 1.0, WriteMode::IfAbsent).unwrap());

        assert_eq!(store.zscore("board", "board:bob").unwrap(), Some(7.5));
        assert_eq!(store.zscore("board", "board:carol").unwrap(), None);

        let page = store.zscan("board", CURSOR_START, "board:a*", 100).unwrap();
        assert_eq!(page.items, vec![("board:alice".to_string(), 10.0)]);

        assert!(store.zrem("board", "board:alice").unwrap());
    }

    #[test]
    fn test_invalid_container_key() {
        let store = test_store();
        let err = store.sadd("bad\0key", "m").unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = SledStore::open(StoreConfig::new(dir.path())).unwrap();
            store.set("k", &Value::Int64(1), WriteMode::Always).unwrap();
            store.sadd("s", "m").unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(StoreConfig::new(dir.path())).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Value::Int64(1)));
        assert!(store.sismember("s", "m").unwrap());
    }
}
