//! In-memory append-only stream log with consumer-group message delivery.
//!
//! Producers append immutable field-list entries to named logs; each entry
//! gets a monotonic `ms-seq` identifier. Consumers read as named members of a
//! consumer group: the group tracks a delivery cursor and a pending-entry
//! ledger, so every entry is first delivered to exactly one consumer per
//! group, stays pending until acknowledged, and can be reclaimed by another
//! consumer once it has sat idle long enough. Delivery is at-least-once;
//! redeliveries carry a count so downstream logic can spot poison messages.

pub mod broker;
pub mod clock;
pub mod commands;
pub mod error;
pub mod group;
pub mod id;
pub mod log;
pub mod wait;

pub use broker::{
    Block, Broker, ConsumerInfo, GroupInfo, LogInfo, ReadMode, StartPosition,
};
pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use error::{Error, Result};
pub use group::{PendingEntry, PendingFilter, PendingSummary};
pub use id::{EntryId, IdAllocator};
pub use log::{Entry, StreamLog};
pub use wait::CancelToken;
