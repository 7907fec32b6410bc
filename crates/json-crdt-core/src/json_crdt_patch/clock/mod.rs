//! Clock types for the JSON CRDT Patch protocol.
//!
//! Every value ever created in a document is identified by a [`Ts`]
//! (session id + logical time). Replicas allocate ids from a
//! [`LogicalClock`]; a [`ClockVector`] additionally remembers what it has
//! seen from other sessions so that duplicate deliveries can be dropped.

use crate::json_crdt_patch::constants::SESSION;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Largest logical time that survives a round trip through an IEEE-754 double.
pub const MAX_SAFE_TIME: u64 = 9_007_199_254_740_991;

// ── Core structs ───────────────────────────────────────────────────────────

/// An immutable logical timestamp: `(session_id, logical_time)`.
///
/// The total order (see [`Ord`]) compares `time` first and `sid` second. It
/// is only ever used to break ties between concurrent writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ts {
    pub sid: u64,
    pub time: u64,
}

impl Ts {
    pub const fn new(sid: u64, time: u64) -> Self {
        Self { sid, time }
    }
}

impl Ord for Ts {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.sid.cmp(&other.sid))
    }
}

impl PartialOrd for Ts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_ts(*self))
    }
}

/// An immutable logical time-span: `(session_id, logical_time, span)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tss {
    pub sid: u64,
    pub time: u64,
    pub span: u64,
}

impl Tss {
    pub const fn new(sid: u64, time: u64, span: u64) -> Self {
        Self { sid, time, span }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.time)
    }
}

// ── Factory functions ──────────────────────────────────────────────────────

#[inline]
pub fn ts(sid: u64, time: u64) -> Ts {
    Ts::new(sid, time)
}

#[inline]
pub fn tss(sid: u64, time: u64, span: u64) -> Tss {
    Tss::new(sid, time, span)
}

/// Advance a timestamp by `cycles` within its own session.
#[inline]
pub fn tick(stamp: Ts, cycles: u64) -> Ts {
    Ts::new(stamp.sid, stamp.time + cycles)
}

/// Total-order comparison used for every LWW and RGA tie-break.
#[inline]
pub fn compare(a: Ts, b: Ts) -> Ordering {
    a.cmp(&b)
}

/// Returns `true` if the span `[start, start + span)` contains `id`.
pub fn contains_id(start: Ts, span: u64, id: Ts) -> bool {
    start.sid == id.sid && start.time <= id.time && id.time < start.time + span
}

/// Creates a timespan at offset `tick_offset` from `stamp` with length `span`.
pub fn interval(stamp: Ts, tick_offset: u64, span: u64) -> Tss {
    Tss::new(stamp.sid, stamp.time + tick_offset, span)
}

/// Human-readable representation of a timestamp.
pub fn print_ts(id: Ts) -> String {
    if id.sid == SESSION::SYSTEM {
        return format!(".{}", id.time);
    }
    let s = id.sid.to_string();
    let session = if s.len() > 4 {
        format!("..{}", &s[s.len() - 4..])
    } else {
        s
    };
    format!("{}.{}", session, id.time)
}

// ── Session ids ────────────────────────────────────────────────────────────

/// Returns `true` when `sid` may be used by a replica to author operations.
pub fn is_valid_session_id(sid: u64) -> bool {
    sid >= SESSION::MIN_USER
}

/// Generates a random user session id.
pub fn generate_session_id() -> u64 {
    rand::thread_rng().gen_range(SESSION::MIN_USER..=SESSION::MAX)
}

// ── Overflow ───────────────────────────────────────────────────────────────

/// The session ran out of logical time. A new session id must be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("logical clock overflow in session {sid} at time {time}")]
pub struct ClockOverflow {
    pub sid: u64,
    pub time: u64,
}

/// Tunables for a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Exclusive ceiling on logical time: every id carries `time < max_time`.
    pub max_time: u64,
}

impl ClockConfig {
    /// Ceiling compatible with peers that store time as a double.
    pub const fn safe_integer() -> Self {
        Self {
            max_time: MAX_SAFE_TIME,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { max_time: u64::MAX }
    }
}

/// Returns the last time of the range `[time, time + span)` if it stays below
/// `max_time`.
fn range_end(sid: u64, time: u64, span: u64, max_time: u64) -> Result<u64, ClockOverflow> {
    let last = time
        .checked_add(span.saturating_sub(1))
        .filter(|last| *last < max_time)
        .ok_or(ClockOverflow { sid, time })?;
    Ok(last)
}

// ── LogicalClock ───────────────────────────────────────────────────────────

/// A mutable logical clock that can be ticked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalClock {
    pub sid: u64,
    pub time: u64,
    pub max_time: u64,
}

impl LogicalClock {
    pub fn new(sid: u64, time: u64) -> Self {
        Self {
            sid,
            time,
            max_time: u64::MAX,
        }
    }

    pub fn with_config(sid: u64, time: u64, config: ClockConfig) -> Self {
        Self {
            sid,
            time,
            max_time: config.max_time,
        }
    }

    /// Reserves `cycles` consecutive ids and returns the first one.
    pub fn tick(&mut self, cycles: u64) -> Result<Ts, ClockOverflow> {
        let stamp = Ts::new(self.sid, self.time);
        if cycles > 0 {
            let last = range_end(self.sid, self.time, cycles, self.max_time)?;
            self.time = last + 1;
        }
        Ok(stamp)
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.time)
    }
}

// ── SpanLedger ─────────────────────────────────────────────────────────────

/// Per-session set of id ranges that have been applied, stored as sorted,
/// merged, inclusive `(first, last)` intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLedger {
    ranges: HashMap<u64, Vec<(u64, u64)>>,
}

impl SpanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `[time, time + span)` of session `sid` as applied.
    pub fn insert(&mut self, sid: u64, time: u64, span: u64) {
        if span == 0 {
            return;
        }
        let last = time.saturating_add(span - 1);
        let ranges = self.ranges.entry(sid).or_default();
        let at = ranges.partition_point(|(first, _)| *first < time);
        ranges.insert(at, (time, last));
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
        for (a, b) in ranges.iter().copied() {
            match merged.last_mut() {
                Some(prev) if a <= prev.1.saturating_add(1) => prev.1 = prev.1.max(b),
                _ => merged.push((a, b)),
            }
        }
        *ranges = merged;
    }

    /// Returns `true` if every id of `[time, time + span)` was applied.
    pub fn contains(&self, sid: u64, time: u64, span: u64) -> bool {
        if span == 0 {
            return true;
        }
        let last = time.saturating_add(span - 1);
        self.find(sid, time)
            .is_some_and(|(_, range_last)| last <= range_last)
    }

    /// Returns `true` if at least one id of `[time, time + span)` was applied.
    pub fn overlaps(&self, sid: u64, time: u64, span: u64) -> bool {
        if span == 0 {
            return false;
        }
        let last = time.saturating_add(span - 1);
        let Some(ranges) = self.ranges.get(&sid) else {
            return false;
        };
        ranges.iter().any(|(a, b)| *a <= last && time <= *b)
    }

    /// Sessions present in the ledger.
    pub fn sessions(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.keys().copied()
    }

    /// Applied ranges of one session.
    pub fn ranges(&self, sid: u64) -> &[(u64, u64)] {
        self.ranges.get(&sid).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find(&self, sid: u64, time: u64) -> Option<(u64, u64)> {
        let ranges = self.ranges.get(&sid)?;
        let at = ranges.partition_point(|(first, _)| *first <= time);
        let candidate = *ranges.get(at.checked_sub(1)?)?;
        (time <= candidate.1).then_some(candidate)
    }
}

// ── ClockVector ────────────────────────────────────────────────────────────

/// A vector clock: local logical clock plus what has been observed from
/// other sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockVector {
    pub sid: u64,
    pub time: u64,
    /// Highest stamp observed per foreign session.
    pub peers: HashMap<u64, Ts>,
    /// Every id range (local or foreign) applied to the owning document.
    pub seen: SpanLedger,
    pub max_time: u64,
}

impl ClockVector {
    pub fn new(sid: u64, time: u64) -> Self {
        Self::with_config(sid, time, ClockConfig::default())
    }

    pub fn with_config(sid: u64, time: u64, config: ClockConfig) -> Self {
        Self {
            sid,
            time,
            peers: HashMap::new(),
            seen: SpanLedger::new(),
            max_time: config.max_time,
        }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.time)
    }

    pub fn config(&self) -> ClockConfig {
        ClockConfig {
            max_time: self.max_time,
        }
    }

    /// Reserves `cycles` consecutive local ids and returns the first one.
    pub fn tick(&mut self, cycles: u64) -> Result<Ts, ClockOverflow> {
        let stamp = Ts::new(self.sid, self.time);
        if cycles > 0 {
            let last = range_end(self.sid, self.time, cycles, self.max_time)?;
            self.time = last + 1;
        }
        Ok(stamp)
    }

    /// A fresh [`LogicalClock`] positioned at this vector's next local id.
    pub fn logical(&self) -> LogicalClock {
        LogicalClock {
            sid: self.sid,
            time: self.time,
            max_time: self.max_time,
        }
    }

    /// Advance local time past `[id, id + span)` and remember foreign peers.
    /// Calling it repeatedly with the same range is harmless.
    pub fn observe(&mut self, id: Ts, span: u64) -> Result<(), ClockOverflow> {
        if span == 0 {
            return Ok(());
        }
        let edge = range_end(id.sid, id.time, span, self.max_time)?;
        let sid = id.sid;
        if sid != self.sid {
            self.peers
                .entry(sid)
                .and_modify(|e| {
                    if edge > e.time {
                        e.time = edge;
                    }
                })
                .or_insert_with(|| Ts::new(sid, edge));
        }
        if edge >= self.time {
            self.time = edge + 1;
        }
        Ok(())
    }

    /// Deep copy with a (potentially different) session ID.
    pub fn fork(&self, new_sid: u64) -> ClockVector {
        let mut clock = self.clone();
        clock.sid = new_sid;
        if new_sid != self.sid {
            clock.peers.remove(&new_sid);
            if self.time > 0 {
                clock
                    .peers
                    .insert(self.sid, Ts::new(self.sid, self.time - 1));
            }
        }
        clock
    }
}

impl fmt::Display for ClockVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock {}.{}", self.sid, self.time)?;
        let mut peers: Vec<_> = self.peers.values().collect();
        peers.sort_by_key(|p| p.sid);
        for (i, peer) in peers.iter().enumerate() {
            let is_last = i == peers.len() - 1;
            write!(
                f,
                "\n{} {}.{}",
                if is_last { "└─" } else { "├─" },
                peer.sid,
                peer.time
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_order_is_time_then_session() {
        assert_eq!(compare(ts(1, 10), ts(2, 9)), Ordering::Greater);
        assert_eq!(compare(ts(2, 9), ts(1, 10)), Ordering::Less);
        assert_eq!(compare(ts(1, 10), ts(2, 10)), Ordering::Less);
        assert_eq!(compare(ts(2, 10), ts(1, 10)), Ordering::Greater);
        assert_eq!(compare(ts(1, 10), ts(1, 10)), Ordering::Equal);
    }

    #[test]
    fn contains_id_point() {
        assert!(contains_id(ts(1, 5), 10, ts(1, 5)));
        assert!(contains_id(ts(1, 5), 10, ts(1, 14)));
        assert!(!contains_id(ts(1, 5), 10, ts(1, 15)));
        assert!(!contains_id(ts(1, 5), 10, ts(2, 5)));
    }

    #[test]
    fn logical_clock_tick() {
        let mut clock = LogicalClock::new(42, 100);
        assert_eq!(clock.tick(1).unwrap(), ts(42, 100));
        assert_eq!(clock.time, 101);
        assert_eq!(clock.tick(3).unwrap(), ts(42, 101));
        assert_eq!(clock.time, 104);
    }

    #[test]
    fn tick_refuses_to_wrap() {
        let mut clock =
            LogicalClock::with_config(70_000, MAX_SAFE_TIME - 2, ClockConfig::safe_integer());
        assert!(clock.tick(2).is_ok());
        assert_eq!(clock.time, MAX_SAFE_TIME);
        let err = clock.tick(1).unwrap_err();
        assert_eq!(err.sid, 70_000);

        let mut clock = LogicalClock::new(70_000, u64::MAX - 1);
        assert!(clock.tick(5).is_err());
        assert_eq!(clock.time, u64::MAX - 1);
    }

    #[test]
    fn clock_vector_observe() {
        let mut cv = ClockVector::new(1, 0);
        cv.observe(ts(2, 5), 1).unwrap();
        assert_eq!(cv.time, 6);
        assert_eq!(cv.peers[&2].time, 5);
        cv.observe(ts(2, 3), 1).unwrap();
        assert_eq!(cv.peers[&2].time, 5);
        assert_eq!(cv.time, 6);
    }

    #[test]
    fn observe_past_ceiling_overflows() {
        let mut cv = ClockVector::with_config(1, 0, ClockConfig { max_time: 100 });
        assert!(cv.observe(ts(2, 99), 1).is_ok());
        assert!(cv.observe(ts(2, 100), 5).is_err());
    }

    #[test]
    fn fork_records_parent_session() {
        let mut cv = ClockVector::new(100_000, 10);
        cv.observe(ts(200_000, 20), 1).unwrap();
        let forked = cv.fork(300_000);
        assert_eq!(forked.sid, 300_000);
        assert_eq!(forked.time, cv.time);
        assert_eq!(forked.peers[&100_000], ts(100_000, 20));
        assert_eq!(forked.peers[&200_000], ts(200_000, 20));
    }

    #[test]
    fn ledger_merges_adjacent_ranges() {
        let mut ledger = SpanLedger::new();
        ledger.insert(7, 10, 5);
        ledger.insert(7, 20, 5);
        assert!(ledger.contains(7, 10, 5));
        assert!(!ledger.contains(7, 14, 2));
        assert!(ledger.overlaps(7, 14, 2));
        ledger.insert(7, 15, 5);
        assert_eq!(ledger.ranges(7), &[(10, 24)]);
        assert!(ledger.contains(7, 12, 10));
        assert!(!ledger.overlaps(8, 12, 10));
    }

    #[test]
    fn ledger_out_of_order_inserts() {
        let mut ledger = SpanLedger::new();
        ledger.insert(1, 30, 1);
        ledger.insert(1, 1, 3);
        ledger.insert(1, 4, 26);
        assert_eq!(ledger.ranges(1), &[(1, 30)]);
    }

    #[test]
    fn print_ts_system_and_long_session() {
        assert_eq!(print_ts(ts(SESSION::SYSTEM, 42)), ".42");
        assert_eq!(print_ts(ts(123456789, 1)), "..6789.1");
        assert_eq!(ts(5, 6).to_string(), "5.6");
    }

    #[test]
    fn generated_sessions_are_valid() {
        for _ in 0..32 {
            assert!(is_valid_session_id(generate_session_id()));
        }
        assert!(!is_valid_session_id(SESSION::SERVER));
    }
}
