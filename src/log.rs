//! Append-only log primitive.
//!
//! A `StreamLog` is an ordered sequence of immutable entries keyed by
//! [`EntryId`]. Entries are only ever added at the tail and removed from the
//! head (trim); nothing is ever rewritten in place.
//!
//! # Design
//!
//! | Concern | Choice |
//! |---------|--------|
//! | Storage | `BTreeMap<EntryId, fields>` for ordered range scans |
//! | Identifiers | Issued by [`IdAllocator`], strictly increasing |
//! | Trim | Head-drop by retained count; ids stay valid as metadata |
//!
//! Trimming removes entry payloads but never renumbers: a consumer-group
//! ledger may keep referring to a trimmed id, and acknowledging or claiming
//! such an id still works (the operations touch ledger metadata, not entry
//! payloads). Range reads simply stop returning the trimmed entries.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::id::{EntryId, IdAllocator};

/// One immutable record in a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    /// Field-value pairs in insertion order.
    pub fields: Vec<(String, String)>,
}

/// An append-only sequence of entries with monotonic identifiers.
#[derive(Debug, Default)]
pub struct StreamLog {
    entries: BTreeMap<EntryId, Vec<(String, String)>>,
    allocator: IdAllocator,
}

impl StreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (untrimmed) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifier of the most recently appended entry, even if trimmed.
    /// `EntryId::MIN` for a log that never saw an append.
    pub fn last_id(&self) -> EntryId {
        self.allocator.last()
    }

    /// Identifier of the oldest live entry, if any.
    pub fn first_id(&self) -> Option<EntryId> {
        self.entries.keys().next().copied()
    }

    /// Append an entry, allocating the next identifier for `now_ms`.
    ///
    /// Field validation (non-empty, unique keys) happens at the broker
    /// boundary; the log itself accepts whatever it is handed.
    ///
    /// # Errors
    ///
    /// - `Error::IdentifierOverflow`: sequence exhausted for this millisecond.
    pub fn append(&mut self, now_ms: u64, fields: Vec<(String, String)>) -> Result<EntryId> {
        let id = self.allocator.next(now_ms)?;
        self.entries.insert(id, fields);
        Ok(id)
    }

    /// Fetch a single entry's fields by id. `None` if trimmed or never appended.
    pub fn get(&self, id: EntryId) -> Option<&[(String, String)]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    /// Entries with `from <= id <= to`, ascending, capped at `limit` if given.
    pub fn range(&self, from: EntryId, to: EntryId, limit: Option<usize>) -> Vec<Entry> {
        if from > to {
            return Vec::new();
        }
        let iter = self.entries.range(from..=to).map(|(id, fields)| Entry {
            id: *id,
            fields: fields.clone(),
        });
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// Drop oldest entries until at most `retain` remain. Returns the number removed.
    pub fn trim(&mut self, retain: usize) -> usize {
        let excess = self.entries.len().saturating_sub(retain);
        for _ in 0..excess {
            self.entries.pop_first();
        }
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let mut log = StreamLog::new();
        let a = log.append(10, fields(&[("k", "1")])).unwrap();
        let b = log.append(10, fields(&[("k", "2")])).unwrap();
        let c = log.append(12, fields(&[("k", "3")])).unwrap();
        assert!(a < b && b < c);
        assert_eq!(log.len(), 3);
        assert_eq!(log.last_id(), c);
    }

    #[test]
    fn test_range_inclusive_bounds_and_limit() {
        let mut log = StreamLog::new();
        let a = log.append(1, fields(&[("n", "a")])).unwrap();
        let b = log.append(2, fields(&[("n", "b")])).unwrap();
        let c = log.append(3, fields(&[("n", "c")])).unwrap();

        let all = log.range(EntryId::MIN, EntryId::MAX, None);
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b, c]);

        let mid = log.range(b, b, None);
        assert_eq!(mid.len(), 1);
        assert_eq!(mid[0].fields, fields(&[("n", "b")]));

        let capped = log.range(EntryId::MIN, EntryId::MAX, Some(2));
        assert_eq!(capped.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_range_inverted_bounds_is_empty() {
        let mut log = StreamLog::new();
        let a = log.append(1, fields(&[("n", "a")])).unwrap();
        let b = log.append(2, fields(&[("n", "b")])).unwrap();
        assert!(log.range(b, a, None).is_empty());
    }

    #[test]
    fn test_trim_drops_oldest_keeps_last_id() {
        let mut log = StreamLog::new();
        log.append(1, fields(&[("n", "a")])).unwrap();
        log.append(2, fields(&[("n", "b")])).unwrap();
        let c = log.append(3, fields(&[("n", "c")])).unwrap();

        assert_eq!(log.trim(1), 2);
        assert_eq!(log.len(), 1);
        assert_eq!(log.first_id(), Some(c));
        // Allocation state survives trim; new ids keep increasing.
        let d = log.append(3, fields(&[("n", "d")])).unwrap();
        assert!(d > c);
    }

    #[test]
    fn test_trim_to_zero_empties_log() {
        let mut log = StreamLog::new();
        let a = log.append(1, fields(&[("n", "a")])).unwrap();
        assert_eq!(log.trim(0), 1);
        assert!(log.is_empty());
        assert_eq!(log.get(a), None);
        assert_eq!(log.last_id(), a);
    }

    #[test]
    fn test_trim_with_room_is_noop() {
        let mut log = StreamLog::new();
        log.append(1, fields(&[("n", "a")])).unwrap();
        assert_eq!(log.trim(5), 0);
        assert_eq!(log.len(), 1);
    }
}
