//! Entry identifiers and allocation.
//!
//! Every entry in a log carries a composite `ms-seq` identifier: a millisecond
//! wall-clock component and a sequence component that disambiguates entries
//! appended within the same millisecond. Identifiers compare lexicographically
//! (time first, then sequence) and are strictly increasing within one log.

use std::fmt;

use crate::error::{Error, Result};

/// Composite entry identifier: `(milliseconds, sequence)`.
///
/// Serialized as `"<ms>-<seq>"`. A bare `"<ms>"` parses with `seq = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    /// Milliseconds timestamp.
    pub ms: u64,
    /// Sequence number within the millisecond.
    pub seq: u64,
}

impl EntryId {
    /// The smallest possible identifier (range sentinel `"-"`).
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };

    /// The largest possible identifier (range sentinel `"+"`).
    pub const MAX: EntryId = EntryId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse an identifier from its `"<ms>-<seq>"` form.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidId(raw.to_string());
        match raw.split_once('-') {
            Some((ms, seq)) => {
                let ms = ms.parse().map_err(|_| invalid())?;
                let seq = seq.parse().map_err(|_| invalid())?;
                Ok(Self { ms, seq })
            }
            None => {
                let ms = raw.parse().map_err(|_| invalid())?;
                Ok(Self { ms, seq: 0 })
            }
        }
    }

    /// The immediate successor identifier, used to turn an inclusive cursor
    /// into an exclusive range start. Saturates at `EntryId::MAX`.
    pub fn successor(&self) -> EntryId {
        match self.seq.checked_add(1) {
            Some(seq) => EntryId { ms: self.ms, seq },
            None => match self.ms.checked_add(1) {
                Some(ms) => EntryId { ms, seq: 0 },
                None => EntryId::MAX,
            },
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// Allocates strictly increasing identifiers for one log.
///
/// Allocation never moves backward even if the wall clock does: a stalled or
/// rewound clock keeps the time component and bumps the sequence instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdAllocator {
    last: EntryId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently issued identifier, or `EntryId::MIN` if none.
    pub fn last(&self) -> EntryId {
        self.last
    }

    /// Issue the next identifier for the given wall-clock reading.
    ///
    /// # Errors
    ///
    /// - `Error::IdentifierOverflow`: the sequence component is exhausted for
    ///   the current millisecond. The caller should yield and retry.
    pub fn next(&mut self, now_ms: u64) -> Result<EntryId> {
        let id = if now_ms > self.last.ms {
            EntryId::new(now_ms, 0)
        } else {
            let seq = self
                .last
                .seq
                .checked_add(1)
                .ok_or(Error::IdentifierOverflow)?;
            EntryId::new(self.last.ms, seq)
        };
        self.last = id;
        Ok(id)
    }
}
