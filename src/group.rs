//! Consumer groups and the pending-entry ledger (PEL).
//!
//! A consumer group owns a delivery cursor (`last_delivered_id`) and a ledger
//! of entries that were handed to some consumer but not yet acknowledged.
//! Exactly one ledger row exists per entry id at any time: an entry is never
//! pending to two consumers of the same group simultaneously.
//!
//! Ledger rows move through `PENDING(c1) -> PENDING(c2)* -> acked (removed)`;
//! ownership transfer (claim) is idle-time gated and may repeat indefinitely.
//! There is no automatic expiry.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::id::EntryId;

/// One delivered-but-unacknowledged entry in a group's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Consumer currently responsible for acknowledging the entry.
    pub owner: String,
    /// Number of deliveries so far (1 on first dispatch, +1 per claim).
    pub delivery_count: u64,
    /// Wall-clock time of the most recent (re)delivery.
    pub last_delivery_ms: u64,
}

/// Read-only view of a ledger row, as returned by pending queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub id: EntryId,
    pub owner: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Filter for pending queries. The default matches every ledger row.
#[derive(Debug, Clone)]
pub struct PendingFilter {
    pub from: EntryId,
    pub to: EntryId,
    pub limit: Option<usize>,
    pub min_idle_ms: u64,
    /// Restrict to rows owned by this consumer.
    pub owner: Option<String>,
}

impl Default for PendingFilter {
    fn default() -> Self {
        Self {
            from: EntryId::MIN,
            to: EntryId::MAX,
            limit: None,
            min_idle_ms: 0,
            owner: None,
        }
    }
}

/// A consumer known to a group. Created lazily on first read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub name: String,
    /// Ids from the group ledger currently owned by this consumer.
    pending: BTreeSet<EntryId>,
    /// Last time this consumer read or was assigned work.
    pub seen_ms: u64,
}

impl Consumer {
    fn new(name: String, now_ms: u64) -> Self {
        Self {
            name,
            pending: BTreeSet::new(),
            seen_ms: now_ms,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Delivery state for one group on one log.
#[derive(Debug, Default)]
pub struct ConsumerGroup {
    /// Cursor: entries at or below this id have been handed out as "new".
    pub last_delivered_id: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
    consumers: HashMap<String, Consumer>,
}

impl ConsumerGroup {
    pub fn new(start: EntryId) -> Self {
        Self {
            last_delivered_id: start,
            pending: BTreeMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// Register a consumer name if unknown. Returns `true` when newly created.
    pub fn ensure_consumer(&mut self, name: &str, now_ms: u64) -> bool {
        if let Some(consumer) = self.consumers.get_mut(name) {
            consumer.seen_ms = now_ms;
            return false;
        }
        self.consumers
            .insert(name.to_string(), Consumer::new(name.to_string(), now_ms));
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.values()
    }

    /// Record a first delivery: insert a ledger row owned by `consumer`.
    ///
    /// If a row for this id already exists (possible after an operator cursor
    /// reset), it is replaced as a fresh first delivery: ownership moves and
    /// the count restarts at 1.
    pub fn record_delivery(&mut self, id: EntryId, consumer: &str, now_ms: u64) {
        if let Some(old) = self.pending.insert(
            id,
            PendingEntry {
                owner: consumer.to_string(),
                delivery_count: 1,
                last_delivery_ms: now_ms,
            },
        ) {
            if old.owner != consumer {
                if let Some(previous) = self.consumers.get_mut(&old.owner) {
                    previous.pending.remove(&id);
                }
            }
        }
        self.ensure_consumer(consumer, now_ms);
        if let Some(consumer) = self.consumers.get_mut(consumer) {
            consumer.pending.insert(id);
        }
    }

    /// Remove acknowledged ids from the ledger. Unknown ids are skipped
    /// silently; the return value counts only the rows actually removed.
    pub fn ack(&mut self, ids: &[EntryId]) -> usize {
        let mut acked = 0;
        for id in ids {
            if let Some(row) = self.pending.remove(id) {
                if let Some(consumer) = self.consumers.get_mut(&row.owner) {
                    consumer.pending.remove(id);
                }
                acked += 1;
            }
        }
        acked
    }

    /// Transfer ownership of idle ledger rows to `new_owner`.
    ///
    /// A row is claimed only if it exists and has been idle for at least
    /// `min_idle_ms`; every other requested id is skipped silently. Claimed
    /// rows get `delivery_count + 1` and a fresh delivery timestamp. Returns
    /// the claimed ids in request order.
    pub fn claim(
        &mut self,
        ids: &[EntryId],
        new_owner: &str,
        min_idle_ms: u64,
        now_ms: u64,
    ) -> Vec<EntryId> {
        let mut claimed = Vec::new();
        for id in ids {
            let Some(row) = self.pending.get_mut(id) else {
                continue;
            };
            if now_ms.saturating_sub(row.last_delivery_ms) < min_idle_ms {
                continue;
            }
            if row.owner != new_owner {
                if let Some(previous) = self.consumers.get_mut(&row.owner) {
                    previous.pending.remove(id);
                }
                row.owner = new_owner.to_string();
            }
            row.delivery_count += 1;
            row.last_delivery_ms = now_ms;
            self.ensure_consumer(new_owner, now_ms);
            if let Some(consumer) = self.consumers.get_mut(new_owner) {
                consumer.pending.insert(*id);
            }
            claimed.push(*id);
        }
        claimed
    }

    /// Ledger rows matching `filter`, ascending by id.
    pub fn pending_summaries(&self, filter: &PendingFilter, now_ms: u64) -> Vec<PendingSummary> {
        if filter.from > filter.to {
            return Vec::new();
        }
        let iter = self
            .pending
            .range(filter.from..=filter.to)
            .filter(|(_, row)| {
                now_ms.saturating_sub(row.last_delivery_ms) >= filter.min_idle_ms
            })
            .filter(|(_, row)| {
                filter
                    .owner
                    .as_deref()
                    .map_or(true, |owner| row.owner == owner)
            })
            .map(|(id, row)| PendingSummary {
                id: *id,
                owner: row.owner.clone(),
                idle_ms: now_ms.saturating_sub(row.last_delivery_ms),
                delivery_count: row.delivery_count,
            });
        match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// Ids pending to `consumer` with id `>= from`, ascending.
    pub fn backlog(&self, consumer: &str, from: EntryId) -> Vec<EntryId> {
        self.consumers
            .get(consumer)
            .map(|c| c.pending.range(from..).copied().collect())
            .unwrap_or_default()
    }

    /// Look up a single ledger row.
    pub fn pending_entry(&self, id: EntryId) -> Option<&PendingEntry> {
        self.pending.get(&id)
    }

    /// Remove a consumer and drop its ledger rows. Returns the number of rows
    /// dropped, or `None` if the consumer was unknown.
    pub fn delete_consumer(&mut self, name: &str) -> Option<usize> {
        let consumer = self.consumers.remove(name)?;
        for id in &consumer.pending {
            self.pending.remove(id);
        }
        Some(consumer.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ms: u64) -> EntryId {
        EntryId::new(ms, 0)
    }

    #[test]
    fn test_delivery_creates_single_ledger_row() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);

        let row = group.pending_entry(id(1)).unwrap();
        assert_eq!(row.owner, "c1");
        assert_eq!(row.delivery_count, 1);
        assert_eq!(row.last_delivery_ms, 100);
        assert_eq!(group.pending_count(), 1);
    }

    #[test]
    fn test_ack_is_idempotent() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);

        assert_eq!(group.ack(&[id(1)]), 1);
        assert_eq!(group.ack(&[id(1)]), 0);
        assert_eq!(group.pending_entry(id(1)), None);
        assert!(group.backlog("c1", EntryId::MIN).is_empty());
    }

    #[test]
    fn test_ack_skips_unknown_ids() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);
        // One real id among two never-delivered ones.
        assert_eq!(group.ack(&[id(7), id(1), id(9)]), 1);
    }

    #[test]
    fn test_claim_moves_ownership_and_bumps_count() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);

        let claimed = group.claim(&[id(1)], "c2", 50, 200);
        assert_eq!(claimed, vec![id(1)]);

        let row = group.pending_entry(id(1)).unwrap();
        assert_eq!(row.owner, "c2");
        assert_eq!(row.delivery_count, 2);
        assert_eq!(row.last_delivery_ms, 200);
        assert!(group.backlog("c1", EntryId::MIN).is_empty());
        assert_eq!(group.backlog("c2", EntryId::MIN), vec![id(1)]);
    }

    #[test]
    fn test_claim_respects_idle_threshold() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);

        // Idle for 10ms, threshold 50ms: not claimable.
        assert!(group.claim(&[id(1)], "c2", 50, 110).is_empty());
        let row = group.pending_entry(id(1)).unwrap();
        assert_eq!(row.owner, "c1");
        assert_eq!(row.delivery_count, 1);
    }

    #[test]
    fn test_claim_skips_unknown_ids() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);
        let claimed = group.claim(&[id(1), id(99)], "c2", 0, 100);
        assert_eq!(claimed, vec![id(1)]);
    }

    #[test]
    fn test_repeated_claims_keep_counting() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 0);
        group.claim(&[id(1)], "c2", 0, 10);
        group.claim(&[id(1)], "c3", 0, 20);
        group.claim(&[id(1)], "c2", 0, 30);

        let row = group.pending_entry(id(1)).unwrap();
        assert_eq!(row.owner, "c2");
        assert_eq!(row.delivery_count, 4);
    }

    #[test]
    fn test_pending_summaries_filters() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);
        group.record_delivery(id(2), "c2", 150);
        group.record_delivery(id(3), "c1", 190);

        let all = group.pending_summaries(&PendingFilter::default(), 200);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, id(1));
        assert_eq!(all[0].idle_ms, 100);

        let idle = group.pending_summaries(
            &PendingFilter {
                min_idle_ms: 50,
                ..PendingFilter::default()
            },
            200,
        );
        assert_eq!(idle.iter().map(|s| s.id).collect::<Vec<_>>(), vec![id(1), id(2)]);

        let owned = group.pending_summaries(
            &PendingFilter {
                owner: Some("c1".to_string()),
                ..PendingFilter::default()
            },
            200,
        );
        assert_eq!(owned.iter().map(|s| s.id).collect::<Vec<_>>(), vec![id(1), id(3)]);

        let ranged = group.pending_summaries(
            &PendingFilter {
                from: id(2),
                to: id(3),
                limit: Some(1),
                ..PendingFilter::default()
            },
            200,
        );
        assert_eq!(ranged.iter().map(|s| s.id).collect::<Vec<_>>(), vec![id(2)]);
    }

    #[test]
    fn test_backlog_is_per_consumer_and_from_bounded() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);
        group.record_delivery(id(2), "c2", 100);
        group.record_delivery(id(3), "c1", 100);

        assert_eq!(group.backlog("c1", EntryId::MIN), vec![id(1), id(3)]);
        assert_eq!(group.backlog("c1", id(2)), vec![id(3)]);
        assert!(group.backlog("ghost", EntryId::MIN).is_empty());
    }

    #[test]
    fn test_delete_consumer_drops_rows() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);
        group.record_delivery(id(2), "c1", 100);
        group.record_delivery(id(3), "c2", 100);

        assert_eq!(group.delete_consumer("c1"), Some(2));
        assert_eq!(group.pending_count(), 1);
        assert_eq!(group.delete_consumer("c1"), None);
    }

    #[test]
    fn test_redelivery_after_cursor_reset_restarts_row() {
        let mut group = ConsumerGroup::new(EntryId::MIN);
        group.record_delivery(id(1), "c1", 100);
        group.claim(&[id(1)], "c2", 0, 150);

        // Operator reset the cursor; the id is dispatched again as new.
        group.record_delivery(id(1), "c3", 200);
        let row = group.pending_entry(id(1)).unwrap();
        assert_eq!(row.owner, "c3");
        assert_eq!(row.delivery_count, 1);
        assert!(group.backlog("c2", EntryId::MIN).is_empty());
        assert_eq!(group.backlog("c3", EntryId::MIN), vec![id(1)]);
    }
}
