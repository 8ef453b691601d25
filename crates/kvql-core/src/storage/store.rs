//! The command surface the engine needs from a key-value store.

use kvql_proto::Value;

use super::StoreError;

/// Cursor value that both starts and ends a scan.
pub const CURSOR_START: u64 = 0;

/// One round of a cursor scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage<T> {
    /// Cursor to pass to the next round; [`CURSOR_START`] when the scan is done.
    pub cursor: u64,
    /// Matches found in this round. May be empty even when the scan is not done.
    pub items: Vec<T>,
}

impl<T> ScanPage<T> {
    /// Create a page.
    pub fn new(cursor: u64, items: Vec<T>) -> Self {
        Self { cursor, items }
    }

    /// Whether this was the last round.
    pub fn is_last(&self) -> bool {
        self.cursor == CURSOR_START
    }
}

/// Conditional write behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write unconditionally.
    Always,
    /// Write only when the entry does not exist yet.
    IfAbsent,
    /// Write only when the entry already exists.
    IfPresent,
}

impl WriteMode {
    /// Decide whether a write goes ahead given whether the entry exists.
    pub fn permits(&self, exists: bool) -> bool {
        match self {
            WriteMode::Always => true,
            WriteMode::IfAbsent => !exists,
            WriteMode::IfPresent => exists,
        }
    }
}

/// Key-value store commands, grouped by structure family.
///
/// Scans follow cursor semantics: start with [`CURSOR_START`], feed back the
/// returned cursor, stop when it comes back as [`CURSOR_START`]. `count` is a
/// hint for how many candidates one round examines. Write commands return
/// whether the entry was actually written or removed.
///
/// A handle is used by one logical operation at a time; concurrent callers
/// take separate handles from a [`StorePool`](super::StorePool).
pub trait StructureStore: Send + Sync {
    /// Scan top-level scalar key names.
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage<String>, StoreError>;
    /// Get a scalar key.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    /// Set a scalar key.
    fn set(&self, key: &str, value: &Value, mode: WriteMode) -> Result<bool, StoreError>;
    /// Delete a scalar key.
    fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Scan members of a set.
    fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage<String>, StoreError>;
    /// Check set membership.
    fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Add a set member.
    fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Remove a set member.
    fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Scan fields of a hash.
    fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage<(String, Value)>, StoreError>;
    /// Get a hash field.
    fn hget(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError>;
    /// Set a hash field.
    fn hset(&self, key: &str, field: &str, value: &Value, mode: WriteMode) -> Result<bool, StoreError>;
    /// Delete a hash field.
    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Scan members of a sorted set with their scores.
    fn zscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage<(String, f64)>, StoreError>;
    /// Get a sorted-set member's score.
    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;
    /// Add or rescore a sorted-set member.
    fn zadd(&self, key: &str, member: &str, score: f64, mode: WriteMode) -> Result<bool, StoreError>;
    /// Remove a sorted-set member.
    fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode() {
        assert!(WriteMode::Always.permits(true));
        assert!(WriteMode::Always.permits(false));
        assert!(WriteMode::IfAbsent.permits(false));
        assert!(!WriteMode::IfAbsent.permits(true));
        assert!(WriteMode::IfPresent.permits(true));
        assert!(!WriteMode::IfPresent.permits(false));
    }

    #[test]
    fn test_last_page() {
        assert!(ScanPage::<String>::new(CURSOR_START, vec![]).is_last());
        assert!(!ScanPage::new(7, vec!["a".to_string()]).is_last());
    }
}
