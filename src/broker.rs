//! The broker: logs, groups, dispatch, and reclamation under one roof.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  append   ┌─────────────────────────────┐
//! │  Producer  ├──────────▶│ Broker                      │
//! └────────────┘           │  logs: name -> LogState     │
//! ┌────────────┐ read_group│   ├─ Mutex<LogInner>        │
//! │  Consumer  ├──────────▶│   │    ├─ StreamLog         │
//! └────────────┘  ack      │   │    └─ groups (PELs)     │
//! ┌────────────┐  claim    │   └─ WaitQueue (blocking)   │
//! │  Operator  ├──────────▶│                             │
//! └────────────┘           └─────────────────────────────┘
//! ```
//!
//! Every mutation of one log (appends, cursor advancement, ledger rows)
//! serializes behind that log's mutex, so a "new entries" read observes the
//! cursor, pulls entries, writes ledger rows, and advances the cursor as one
//! unit. Two concurrent new-entry reads of the same group can never be handed
//! the same entry. Different logs share nothing and proceed independently.
//!
//! # Example
//!
//! ```
//! use courier::{Block, Broker, ReadMode, StartPosition};
//!
//! let broker = Broker::new();
//! let id = broker.append("orders", vec![("item".into(), "A".into())])?;
//! broker.create_group("orders", "billing", StartPosition::Beginning)?;
//!
//! let batch = broker.read_group(
//!     "orders",
//!     "billing",
//!     "worker-1",
//!     ReadMode::New { count: Some(10), block: Block::None },
//! )?;
//! assert_eq!(batch[0].id, id);
//!
//! broker.ack("orders", "billing", &[id])?;
//! # Ok::<(), courier::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::group::{ConsumerGroup, PendingFilter, PendingSummary};
use crate::id::EntryId;
use crate::log::{Entry, StreamLog};
use crate::wait::{CancelToken, WaitOutcome, WaitQueue};

/// Where a newly created group's cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Deliver every entry the log holds, oldest first.
    Beginning,
    /// Deliver only entries appended after group creation.
    Tail,
    /// Deliver entries strictly after the given id.
    At(EntryId),
}

/// Blocking policy for new-entry reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    /// Return immediately, empty result if nothing is available.
    None,
    /// Park until data arrives or the read is canceled.
    Forever,
    /// Park up to the given duration.
    For(Duration),
}

/// What a group read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Entries past the group cursor, delivered to this consumer for the
    /// first time. Creates ledger rows and advances the cursor.
    New { count: Option<usize>, block: Block },
    /// The consumer's own pending entries with id `>= from`. Read-only:
    /// no ledger rows are created or touched, the cursor does not move.
    Backlog { from: EntryId },
}

/// Per-consumer slice of [`GroupInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: usize,
    pub idle_ms: u64,
}

/// Snapshot of one group's delivery state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub last_delivered_id: EntryId,
    pub pending: usize,
    pub consumers: Vec<ConsumerInfo>,
}

/// Snapshot of one log and its groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInfo {
    pub name: String,
    pub length: usize,
    pub first_id: Option<EntryId>,
    pub last_id: EntryId,
    pub groups: Vec<GroupInfo>,
}

struct LogInner {
    log: StreamLog,
    groups: HashMap<String, ConsumerGroup>,
}

struct LogState {
    inner: Mutex<LogInner>,
    waiters: Arc<WaitQueue>,
}

impl LogState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                log: StreamLog::new(),
                groups: HashMap::new(),
            }),
            waiters: Arc::new(WaitQueue::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("log lock poisoned"))
    }
}

/// All logs and groups of one process, behind a single owner value.
///
/// Multiple independent brokers can coexist (and do, in tests); nothing here
/// is global. The broker is generic over its clock so idle-time behavior can
/// be driven deterministically.
pub struct Broker<C: Clock = SystemClock> {
    logs: RwLock<HashMap<String, Arc<LogState>>>,
    clock: C,
}

impl Broker<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Broker<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Broker<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Append an entry, creating the log on first use.
    ///
    /// # Errors
    ///
    /// - `Error::Validation`: empty log name, empty field list, or duplicate
    ///   field keys within the entry.
    /// - `Error::IdentifierOverflow`: id sequence exhausted for the current
    ///   millisecond; yield and retry.
    pub fn append(&self, log: &str, fields: Vec<(String, String)>) -> Result<EntryId> {
        validate_name(log, "empty log name")?;
        if fields.is_empty() {
            return Err(Error::Validation("entry has no fields"));
        }
        for (i, (key, _)) in fields.iter().enumerate() {
            if fields[..i].iter().any(|(seen, _)| seen == key) {
                return Err(Error::Validation("duplicate field key in entry"));
            }
        }

        let state = self.log_state_or_create(log)?;
        let id = {
            let mut inner = state.lock()?;
            inner.log.append(self.clock.now_ms(), fields)?
        };
        // Wake blocked group reads after the entry is visible.
        state.waiters.notify_all()?;
        Ok(id)
    }

    /// Entries with `from <= id <= to`, ascending, capped at `limit`.
    pub fn range(
        &self,
        log: &str,
        from: EntryId,
        to: EntryId,
        limit: Option<usize>,
    ) -> Result<Vec<Entry>> {
        let state = self.log_state(log)?;
        let inner = state.lock()?;
        Ok(inner.log.range(from, to, limit))
    }

    /// Number of live entries in the log.
    pub fn len(&self, log: &str) -> Result<usize> {
        let state = self.log_state(log)?;
        let inner = state.lock()?;
        Ok(inner.log.len())
    }

    /// Identifier of the most recently appended entry.
    pub fn last_id(&self, log: &str) -> Result<EntryId> {
        let state = self.log_state(log)?;
        let inner = state.lock()?;
        Ok(inner.log.last_id())
    }

    /// Drop oldest entries beyond `retain`. Ledger rows pointing at trimmed
    /// ids survive as orphans: ack and claim still work on them, range reads
    /// no longer return the fields.
    pub fn trim(&self, log: &str, retain: usize) -> Result<usize> {
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let removed = inner.log.trim(retain);
        if removed > 0 {
            log::debug!("trimmed {removed} entries from log {log}");
        }
        Ok(removed)
    }

    /// Create a consumer group with its cursor at `start`.
    ///
    /// A `Tail` start on a missing log creates the (empty) log, so a group
    /// can be set up before the first producer appears. Any other start on a
    /// missing log is an error: there is nothing for the cursor to point at.
    ///
    /// # Errors
    ///
    /// - `Error::GroupExists`: the name is taken on this log.
    /// - `Error::NoSuchLog`: see above.
    pub fn create_group(&self, log: &str, group: &str, start: StartPosition) -> Result<()> {
        validate_name(log, "empty log name")?;
        validate_name(group, "empty group name")?;
        let state = match start {
            StartPosition::Tail => self.log_state_or_create(log)?,
            StartPosition::Beginning | StartPosition::At(_) => self.log_state(log)?,
        };
        let mut inner = state.lock()?;
        if inner.groups.contains_key(group) {
            return Err(Error::GroupExists(group.to_string()));
        }
        // Captured under the log lock, so a Tail start observes the exact
        // tail relative to concurrent appends.
        let cursor = match start {
            StartPosition::Beginning => EntryId::MIN,
            StartPosition::Tail => inner.log.last_id(),
            StartPosition::At(id) => id,
        };
        inner
            .groups
            .insert(group.to_string(), ConsumerGroup::new(cursor));
        log::debug!("created group {group} on log {log} at {cursor}");
        Ok(())
    }

    /// Remove a group and its entire ledger.
    pub fn delete_group(&self, log: &str, group: &str) -> Result<()> {
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        if inner.groups.remove(group).is_none() {
            return Err(Error::NoSuchGroup(group.to_string()));
        }
        log::debug!("deleted group {group} on log {log}");
        Ok(())
    }

    /// Register a consumer name in a group ahead of its first read.
    /// Returns `true` when the consumer was newly created.
    pub fn ensure_consumer(&self, log: &str, group: &str, consumer: &str) -> Result<bool> {
        validate_name(consumer, "empty consumer name")?;
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let now_ms = self.clock.now_ms();
        let group = known_group(&mut inner, group)?;
        Ok(group.ensure_consumer(consumer, now_ms))
    }

    /// Remove a consumer from a group, dropping its ledger rows. Returns how
    /// many rows were dropped.
    pub fn delete_consumer(&self, log: &str, group: &str, consumer: &str) -> Result<usize> {
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let group_name = group;
        let group = known_group(&mut inner, group)?;
        let dropped = group.delete_consumer(consumer).unwrap_or(0);
        if dropped > 0 {
            log::debug!("dropped {dropped} pending rows deleting consumer {consumer} from {group_name}");
        }
        Ok(dropped)
    }

    /// Serve a group read. See [`ReadMode`] for the two modes.
    ///
    /// In `New` mode with a blocking policy, the call parks when the cursor
    /// is at the tail and resumes on the next append, on timeout, or when
    /// the token passed via [`Broker::read_group_cancelable`] trips.
    pub fn read_group(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        mode: ReadMode,
    ) -> Result<Vec<Entry>> {
        self.read_group_cancelable(log, group, consumer, mode, None)
    }

    /// [`Broker::read_group`] with an abort handle for the blocking case.
    pub fn read_group_cancelable(
        &self,
        log: &str,
        group: &str,
        consumer: &str,
        mode: ReadMode,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<Entry>> {
        validate_name(consumer, "empty consumer name")?;
        let state = self.log_state(log)?;

        match mode {
            ReadMode::Backlog { from } => {
                let mut inner = state.lock()?;
                let now_ms = self.clock.now_ms();
                let group = known_group(&mut inner, group)?;
                group.ensure_consumer(consumer, now_ms);
                let ids = group.backlog(consumer, from);
                Ok(materialize(&inner.log, &ids))
            }
            ReadMode::New { count, block } => {
                let deadline = match block {
                    Block::For(duration) => Some(Instant::now() + duration),
                    Block::None | Block::Forever => None,
                };
                loop {
                    // Snapshot before checking: an append between the check
                    // and the park then moves the generation and the park
                    // returns immediately.
                    let observed = state.waiters.generation()?;
                    {
                        let mut inner = state.lock()?;
                        let now_ms = self.clock.now_ms();
                        let batch = dispatch_new(&mut inner, group, consumer, count, now_ms)?;
                        if !batch.is_empty() {
                            return Ok(batch);
                        }
                    }
                    if matches!(block, Block::None) {
                        return Ok(Vec::new());
                    }
                    match state.waiters.wait_past(observed, deadline, cancel)? {
                        WaitOutcome::Notified => continue,
                        WaitOutcome::TimedOut | WaitOutcome::Canceled => return Ok(Vec::new()),
                    }
                }
            }
        }
    }

    /// Remove acknowledged ids from a group's ledger. Unknown ids are not an
    /// error; the result counts only the rows actually removed.
    pub fn ack(&self, log: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let group = known_group(&mut inner, group)?;
        Ok(group.ack(ids))
    }

    /// Read-only ledger query for stale-work discovery.
    pub fn pending(
        &self,
        log: &str,
        group: &str,
        filter: &PendingFilter,
    ) -> Result<Vec<PendingSummary>> {
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let now_ms = self.clock.now_ms();
        let group = known_group(&mut inner, group)?;
        Ok(group.pending_summaries(filter, now_ms))
    }

    /// Transfer ownership of idle pending entries to `new_owner`.
    ///
    /// Ids that are not pending, or not idle for `min_idle_ms`, are skipped
    /// silently. A claimed id whose entry was trimmed still changes owner in
    /// the ledger but is omitted from the returned entries; the caller is
    /// expected to ack such an id without reconstructing it.
    pub fn claim(
        &self,
        log: &str,
        group: &str,
        new_owner: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>> {
        validate_name(new_owner, "empty consumer name")?;
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let now_ms = self.clock.now_ms();
        let group_name = group;
        let group = known_group(&mut inner, group)?;
        let claimed = group.claim(ids, new_owner, min_idle_ms, now_ms);
        if !claimed.is_empty() {
            log::debug!(
                "claimed {} entries for {new_owner} in group {group_name}",
                claimed.len()
            );
        }
        let entries = claimed
            .iter()
            .filter_map(|id| {
                inner.log.get(*id).map(|fields| Entry {
                    id: *id,
                    fields: fields.to_vec(),
                })
            })
            .collect();
        Ok(entries)
    }

    /// Operator reset of a group cursor. Entries past the new cursor become
    /// deliverable again as "new"; existing ledger rows for them are replaced
    /// on re-dispatch.
    pub fn set_group_cursor(&self, log: &str, group: &str, id: EntryId) -> Result<()> {
        let state = self.log_state(log)?;
        let mut inner = state.lock()?;
        let group = known_group(&mut inner, group)?;
        group.last_delivered_id = id;
        // Tail readers may now have deliverable entries again.
        drop(inner);
        state.waiters.notify_all()
    }

    /// Snapshot of a log and all its groups.
    pub fn info(&self, log: &str) -> Result<LogInfo> {
        let state = self.log_state(log)?;
        let inner = state.lock()?;
        let now_ms = self.clock.now_ms();
        let mut groups: Vec<GroupInfo> = inner
            .groups
            .iter()
            .map(|(name, group)| group_info(name, group, now_ms))
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(LogInfo {
            name: log.to_string(),
            length: inner.log.len(),
            first_id: inner.log.first_id(),
            last_id: inner.log.last_id(),
            groups,
        })
    }

    /// Snapshot of one group.
    pub fn group_info(&self, log: &str, group: &str) -> Result<GroupInfo> {
        let state = self.log_state(log)?;
        let inner = state.lock()?;
        let now_ms = self.clock.now_ms();
        let found = inner
            .groups
            .get(group)
            .ok_or_else(|| Error::NoSuchGroup(group.to_string()))?;
        Ok(group_info(group, found, now_ms))
    }

    /// Abort handle for a blocking read against `log`. Create the token,
    /// hand it to the reading thread, and `cancel()` from anywhere.
    pub fn cancel_token(&self, log: &str) -> Result<CancelToken> {
        let state = self.log_state(log)?;
        Ok(CancelToken::new(Arc::clone(&state.waiters)))
    }

    fn log_state(&self, log: &str) -> Result<Arc<LogState>> {
        let logs = self
            .logs
            .read()
            .map_err(|_| Error::Internal("broker registry lock poisoned"))?;
        logs.get(log)
            .cloned()
            .ok_or_else(|| Error::NoSuchLog(log.to_string()))
    }

    fn log_state_or_create(&self, log: &str) -> Result<Arc<LogState>> {
        if let Ok(state) = self.log_state(log) {
            return Ok(state);
        }
        let mut logs = self
            .logs
            .write()
            .map_err(|_| Error::Internal("broker registry lock poisoned"))?;
        Ok(Arc::clone(
            logs.entry(log.to_string())
                .or_insert_with(|| Arc::new(LogState::new())),
        ))
    }
}

/// Pull entries past the cursor, write ledger rows, advance the cursor.
/// Runs under the log lock; the three steps are one logical unit.
fn dispatch_new(
    inner: &mut LogInner,
    group: &str,
    consumer: &str,
    count: Option<usize>,
    now_ms: u64,
) -> Result<Vec<Entry>> {
    let cursor = known_group(inner, group)?.last_delivered_id;
    let batch = inner
        .log
        .range(cursor.successor(), EntryId::MAX, count);
    if batch.is_empty() {
        return Ok(batch);
    }
    let group = known_group(inner, group)?;
    for entry in &batch {
        group.record_delivery(entry.id, consumer, now_ms);
    }
    group.last_delivered_id = batch[batch.len() - 1].id;
    Ok(batch)
}

fn known_group<'a>(inner: &'a mut LogInner, group: &str) -> Result<&'a mut ConsumerGroup> {
    inner
        .groups
        .get_mut(group)
        .ok_or_else(|| Error::NoSuchGroup(group.to_string()))
}

/// Fetch ledger ids from the log; trimmed ids keep their place in the result
/// with an empty field list, so the caller can still ack them by id.
fn materialize(log: &StreamLog, ids: &[EntryId]) -> Vec<Entry> {
    ids.iter()
        .map(|id| Entry {
            id: *id,
            fields: log.get(*id).map(<[_]>::to_vec).unwrap_or_default(),
        })
        .collect()
}

fn group_info(name: &str, group: &ConsumerGroup, now_ms: u64) -> GroupInfo {
    let mut consumers: Vec<ConsumerInfo> = group
        .consumers()
        .map(|consumer| ConsumerInfo {
            name: consumer.name.clone(),
            pending: consumer.pending_count(),
            idle_ms: now_ms.saturating_sub(consumer.seen_ms),
        })
        .collect();
    consumers.sort_by(|a, b| a.name.cmp(&b.name));
    GroupInfo {
        name: name.to_string(),
        last_delivered_id: group.last_delivered_id,
        pending: group.pending_count(),
        consumers,
    }
}

fn validate_name(name: &str, msg: &'static str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(msg));
    }
    Ok(())
}
