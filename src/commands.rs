//! Command-style interface for external collaborators.
//!
//! The surrounding system (protocol framing, auth, routing, all out of scope
//! here) talks to the broker through these handlers. This layer owns the
//! string conventions:
//!
//! - entry ids serialize as `"<ms>-<seq>"` (a bare `"<ms>"` reads as seq 0)
//! - range bounds accept the sentinels `"-"` (minimum) and `"+"` (maximum)
//! - group start positions accept `"0"` (beginning), `"$"` (tail / only
//!   future entries), or an explicit id
//! - entry fields arrive as a flat `key value key value ...` token list
//! - read mode arrives as `"new"` or `"backlog"` and is mapped onto the
//!   typed [`ReadMode`] before any dispatch happens
//! - `block_ms` maps as: absent or negative means don't block, `0` means
//!   block until data or cancellation, positive means block up to that
//!   many ms
//!
//! Structural failures (unknown log/group, validation, bad ids) surface as
//! errors; per-item misses inside `ack` and `claim` are aggregated into the
//! result instead, so batch calls treat independent ids independently and
//! "0 items affected" is an ordinary outcome.

use std::time::Duration;

use crate::broker::{Block, Broker, GroupInfo, LogInfo, ReadMode, StartPosition};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::group::{PendingFilter, PendingSummary};
use crate::id::EntryId;
use crate::log::Entry;

/// Parse a range bound, honoring the `"-"` / `"+"` sentinels.
pub fn parse_bound(raw: &str) -> Result<EntryId> {
    match raw {
        "-" => Ok(EntryId::MIN),
        "+" => Ok(EntryId::MAX),
        _ => EntryId::parse(raw),
    }
}

/// Parse a group start position: `"$"`, `"0"`, or an explicit id.
pub fn parse_start(raw: &str) -> Result<StartPosition> {
    match raw {
        "$" => Ok(StartPosition::Tail),
        "0" => Ok(StartPosition::Beginning),
        _ => Ok(StartPosition::At(EntryId::parse(raw)?)),
    }
}

fn parse_ids(raw: &[&str]) -> Result<Vec<EntryId>> {
    raw.iter().map(|id| EntryId::parse(id)).collect()
}

fn pair_tokens(tokens: &[&str]) -> Result<Vec<(String, String)>> {
    if tokens.len() % 2 != 0 {
        return Err(Error::Validation("odd number of field tokens"));
    }
    Ok(tokens
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

/// `Append log field value [field value ...]`; returns the new id, serialized.
pub fn append<C: Clock>(broker: &Broker<C>, log: &str, tokens: &[&str]) -> Result<String> {
    let fields = pair_tokens(tokens)?;
    Ok(broker.append(log, fields)?.to_string())
}

/// `Range log from to [limit]`.
pub fn range<C: Clock>(
    broker: &Broker<C>,
    log: &str,
    from: &str,
    to: &str,
    limit: Option<usize>,
) -> Result<Vec<Entry>> {
    broker.range(log, parse_bound(from)?, parse_bound(to)?, limit)
}

/// `Trim log retain_count`; returns the number of entries removed.
pub fn trim<C: Clock>(broker: &Broker<C>, log: &str, retain: usize) -> Result<usize> {
    broker.trim(log, retain)
}

/// `CreateGroup log group start`.
pub fn create_group<C: Clock>(
    broker: &Broker<C>,
    log: &str,
    group: &str,
    start: &str,
) -> Result<()> {
    broker.create_group(log, group, parse_start(start)?)
}

/// `DeleteGroup log group`.
pub fn delete_group<C: Clock>(broker: &Broker<C>, log: &str, group: &str) -> Result<()> {
    broker.delete_group(log, group)
}

/// `ReadGroup log group consumer mode [from] [count] [block_ms]`.
pub fn read_group<C: Clock>(
    broker: &Broker<C>,
    log: &str,
    group: &str,
    consumer: &str,
    mode: &str,
    from: Option<&str>,
    count: Option<usize>,
    block_ms: Option<i64>,
) -> Result<Vec<Entry>> {
    let mode = match mode {
        "new" => ReadMode::New {
            count,
            block: match block_ms {
                None => Block::None,
                Some(ms) if ms < 0 => Block::None,
                Some(0) => Block::Forever,
                Some(ms) => Block::For(Duration::from_millis(ms as u64)),
            },
        },
        "backlog" => ReadMode::Backlog {
            from: match from {
                Some(raw) => parse_bound(raw)?,
                None => EntryId::MIN,
            },
        },
        _ => return Err(Error::Validation("read mode must be \"new\" or \"backlog\"")),
    };
    broker.read_group(log, group, consumer, mode)
}

/// `Ack log group id [id ...]`; returns how many ids were actually acked.
pub fn ack<C: Clock>(broker: &Broker<C>, log: &str, group: &str, ids: &[&str]) -> Result<usize> {
    broker.ack(log, group, &parse_ids(ids)?)
}

/// `Pending log group [from to] [limit] [min_idle_ms] [consumer]`.
#[allow(clippy::too_many_arguments)]
pub fn pending<C: Clock>(
    broker: &Broker<C>,
    log: &str,
    group: &str,
    from: Option<&str>,
    to: Option<&str>,
    limit: Option<usize>,
    min_idle_ms: Option<u64>,
    consumer: Option<&str>,
) -> Result<Vec<PendingSummary>> {
    let filter = PendingFilter {
        from: from.map(parse_bound).transpose()?.unwrap_or(EntryId::MIN),
        to: to.map(parse_bound).transpose()?.unwrap_or(EntryId::MAX),
        limit,
        min_idle_ms: min_idle_ms.unwrap_or(0),
        owner: consumer.map(str::to_string),
    };
    broker.pending(log, group, &filter)
}

/// `Claim log group new_owner min_idle_ms id [id ...]`.
pub fn claim<C: Clock>(
    broker: &Broker<C>,
    log: &str,
    group: &str,
    new_owner: &str,
    min_idle_ms: u64,
    ids: &[&str],
) -> Result<Vec<Entry>> {
    broker.claim(log, group, new_owner, min_idle_ms, &parse_ids(ids)?)
}

/// `Info log [group]` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoReply {
    Log(LogInfo),
    Group(GroupInfo),
}

/// `Info log [group]`.
pub fn info<C: Clock>(broker: &Broker<C>, log: &str, group: Option<&str>) -> Result<InfoReply> {
    match group {
        Some(group) => Ok(InfoReply::Group(broker.group_info(log, group)?)),
        None => Ok(InfoReply::Log(broker.info(log)?)),
    }
}
