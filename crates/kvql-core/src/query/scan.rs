//! Cursor-driven enumeration of structure contents.
//!
//! A scan is a sequence of rounds. Each round hands the store a cursor and
//! gets back a (possibly empty) page plus the next cursor; the scan is over
//! when the store hands back [`CURSOR_START`] again.

use std::collections::HashSet;
use std::marker::PhantomData;

use kvql_proto::Value;
use tracing::debug;

use crate::storage::{ScanPage, StoreError, StructureStore, CURSOR_START};
use crate::structure::StructureType;

/// Progress of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCursor {
    /// No round issued yet.
    Start,
    /// Rounds remain; the value is the cursor for the next one.
    At(u64),
    /// The store returned the sentinel.
    Done,
}

impl ScanCursor {
    /// Transport cursor for the next round, or `None` when finished.
    pub fn position(&self) -> Option<u64> {
        match self {
            ScanCursor::Start => Some(CURSOR_START),
            ScanCursor::At(cursor) => Some(*cursor),
            ScanCursor::Done => None,
        }
    }

    /// State after a round that returned `cursor`.
    pub fn advance(self, cursor: u64) -> Self {
        if cursor == CURSOR_START {
            ScanCursor::Done
        } else {
            ScanCursor::At(cursor)
        }
    }

    /// Check if the scan finished.
    pub fn is_done(&self) -> bool {
        matches!(self, ScanCursor::Done)
    }
}

/// Lazy iterator over the pages of one scan.
///
/// Yields one item per round. After an error the iterator is exhausted;
/// [`ScanPages::restart`] rewinds it to the first round.
pub struct ScanPages<T, F> {
    fetch: F,
    cursor: ScanCursor,
    rounds: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> ScanPages<T, F>
where
    F: FnMut(u64) -> Result<ScanPage<T>, StoreError>,
{
    /// Create an iterator issuing rounds through `fetch`.
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            cursor: ScanCursor::Start,
            rounds: 0,
            _item: PhantomData,
        }
    }

    /// Current cursor state.
    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    /// Number of rounds issued since the last (re)start.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Rewind to the start sentinel.
    pub fn restart(&mut self) {
        self.cursor = ScanCursor::Start;
        self.rounds = 0;
    }
}

impl<T, F> Iterator for ScanPages<T, F>
where
    F: FnMut(u64) -> Result<ScanPage<T>, StoreError>,
{
    type Item = Result<Vec<T>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.cursor.position()?;
        self.rounds += 1;

        match (self.fetch)(position) {
            Ok(page) => {
                self.cursor = self.cursor.advance(page.cursor);
                Some(Ok(page.items))
            }
            Err(e) => {
                self.cursor = ScanCursor::Done;
                Some(Err(e))
            }
        }
    }
}

/// Records read from one structure, before assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecords {
    /// Scalar keys with their values.
    List(Vec<(String, Value)>),
    /// Set members.
    Members(Vec<String>),
    /// Hash fields with their values.
    Fields(Vec<(String, Value)>),
    /// Sorted-set members with their scores.
    Scores(Vec<(String, f64)>),
}

impl RawRecords {
    /// An empty record set for `structure`.
    pub fn empty(structure: StructureType) -> Self {
        match structure {
            StructureType::List => RawRecords::List(Vec::new()),
            StructureType::Set => RawRecords::Members(Vec::new()),
            StructureType::Hash => RawRecords::Fields(Vec::new()),
            StructureType::SortedSet => RawRecords::Scores(Vec::new()),
        }
    }

    /// The structure these records came from.
    pub fn structure(&self) -> StructureType {
        match self {
            RawRecords::List(_) => StructureType::List,
            RawRecords::Members(_) => StructureType::Set,
            RawRecords::Fields(_) => StructureType::Hash,
            RawRecords::Scores(_) => StructureType::SortedSet,
        }
    }

    /// Get the number of records.
    pub fn len(&self) -> usize {
        match self {
            RawRecords::List(r) | RawRecords::Fields(r) => r.len(),
            RawRecords::Members(r) => r.len(),
            RawRecords::Scores(r) => r.len(),
        }
    }

    /// Check if there are no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full (prefixed) record names, in order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            RawRecords::List(r) | RawRecords::Fields(r) => r.iter().map(|(n, _)| n.as_str()).collect(),
            RawRecords::Members(r) => r.iter().map(String::as_str).collect(),
            RawRecords::Scores(r) => r.iter().map(|(n, _)| n.as_str()).collect(),
        }
    }

    /// Append records from `other` whose names are not present yet.
    ///
    /// Records of a different structure are ignored.
    pub fn merge(&mut self, other: RawRecords) {
        let seen: HashSet<String> = self.names().into_iter().map(String::from).collect();
        match (self, other) {
            (RawRecords::List(a), RawRecords::List(b)) | (RawRecords::Fields(a), RawRecords::Fields(b)) => {
                a.extend(b.into_iter().filter(|(n, _)| !seen.contains(n)))
            }
            (RawRecords::Members(a), RawRecords::Members(b)) => {
                a.extend(b.into_iter().filter(|n| !seen.contains(n)))
            }
            (RawRecords::Scores(a), RawRecords::Scores(b)) => {
                a.extend(b.into_iter().filter(|(n, _)| !seen.contains(n)))
            }
            _ => {}
        }
    }
}

/// Structure-specific scanning over one store handle.
pub struct ScanEngine<'a, S: StructureStore + ?Sized> {
    store: &'a S,
    page_size: usize,
}

impl<'a, S: StructureStore + ?Sized> ScanEngine<'a, S> {
    /// Create a scan engine.
    pub fn new(store: &'a S, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Enumerate every record of `structure` matching `pattern`.
    ///
    /// `container` is ignored for lists, whose records are top-level keys.
    /// The cursor is drained completely; any failing round aborts the scan.
    pub fn scan(
        &self,
        structure: StructureType,
        container: &str,
        pattern: &str,
    ) -> Result<RawRecords, StoreError> {
        let (store, count) = (self.store, self.page_size);
        let (records, rounds) = match structure {
            StructureType::List => {
                let pages = ScanPages::new(|cursor| store.scan(cursor, pattern, count));
                let (keys, rounds) = drain(pages, |k| k.as_str())?;
                let mut entries = Vec::with_capacity(keys.len());
                for key in keys {
                    // Keys deleted since their round are skipped
                    if let Some(value) = store.get(&key)? {
                        entries.push((key, value));
                    }
                }
                (RawRecords::List(entries), rounds)
            }
            StructureType::Set => {
                let pages = ScanPages::new(|cursor| store.sscan(container, cursor, pattern, count));
                let (members, rounds) = drain(pages, |m| m.as_str())?;
                (RawRecords::Members(members), rounds)
            }
            StructureType::Hash => {
                let pages = ScanPages::new(|cursor| store.hscan(container, cursor, pattern, count));
                let (fields, rounds) = drain(pages, |(f, _)| f.as_str())?;
                (RawRecords::Fields(fields), rounds)
            }
            StructureType::SortedSet => {
                let pages = ScanPages::new(|cursor| store.zscan(container, cursor, pattern, count));
                let (scores, rounds) = drain(pages, |(m, _)| m.as_str())?;
                (RawRecords::Scores(scores), rounds)
            }
        };

        debug!(
            structure_type = %structure,
            pattern,
            rounds,
            records = records.len(),
            "Scan complete"
        );
        Ok(records)
    }
}

/// Collect every page, keeping the first occurrence of each name.
///
/// Returns the items and the number of rounds issued.
fn drain<T, F>(
    mut pages: ScanPages<T, F>,
    name: impl Fn(&T) -> &str,
) -> Result<(Vec<T>, usize), StoreError>
where
    F: FnMut(u64) -> Result<ScanPage<T>, StoreError>,
{
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for page in pages.by_ref() {
        for item in page? {
            if seen.insert(name(&item).to_string()) {
                items.push(item);
            }
        }
    }

    Ok((items, pages.rounds()))
}
