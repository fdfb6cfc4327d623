//! Allocator lifecycle telemetry.
//!
//! A fixed-capacity ring of structured lifecycle records plus a
//! serializable snapshot report. Records are only written on rare paths
//! (region transitions, policy rejections, out-of-memory); the allocation
//! fast paths touch nothing here. Recording is best-effort: the ring lock
//! is only tried, never waited on, so a record can never stall or
//! re-enter an allocation call.

use std::sync::atomic::{AtomicU64, Ordering};

use fleetalloc_layers::HeapStats;
use parking_lot::Mutex;
use serde::Serialize;

use crate::mode::ThreadMode;
use crate::policy::RegionDiscipline;

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured allocator lifecycle event.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LifecycleRecord {
    /// Monotonic event id.
    pub seq: u64,
    pub level: LogLevel,
    /// API symbol involved (`malloc`, `region_begin`, ...).
    pub symbol: &'static str,
    /// Event kind (`oom`, `begin`, `end`, `policy_rejected`, ...).
    pub event: &'static str,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Size or similar scalar involved in the event, if any.
    pub value: Option<usize>,
}

const RING_CAPACITY: usize = 64;

struct EventRing {
    slots: [Option<LifecycleRecord>; RING_CAPACITY],
    next: usize,
}

impl EventRing {
    const fn new() -> Self {
        Self {
            slots: [None; RING_CAPACITY],
            next: 0,
        }
    }

    fn push(&mut self, record: LifecycleRecord) {
        self.slots[self.next] = Some(record);
        self.next = (self.next + 1) % RING_CAPACITY;
    }
}

static EVENTS: Mutex<EventRing> = Mutex::new(EventRing::new());
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);
static DROPPED: AtomicU64 = AtomicU64::new(0);

/// Records a lifecycle event. Best-effort: dropped (and counted) if the
/// ring is contended at this instant.
pub fn record(
    level: LogLevel,
    symbol: &'static str,
    event: &'static str,
    outcome: &'static str,
    value: Option<usize>,
) {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    let record = LifecycleRecord {
        seq,
        level,
        symbol,
        event,
        outcome,
        value,
    };
    match EVENTS.try_lock() {
        Some(mut ring) => ring.push(record),
        None => {
            DROPPED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Snapshot of the most recent records, oldest first.
#[must_use]
pub fn recent() -> Vec<LifecycleRecord> {
    let ring = EVENTS.lock();
    let mut out = Vec::with_capacity(RING_CAPACITY);
    for i in 0..RING_CAPACITY {
        if let Some(record) = ring.slots[(ring.next + i) % RING_CAPACITY] {
            out.push(record);
        }
    }
    out
}

/// Records dropped because the ring was contended.
#[must_use]
pub fn dropped() -> u64 {
    DROPPED.load(Ordering::Relaxed)
}

/// Serializable snapshot of the shared heap's counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeneralHeapReport {
    pub allocs: u64,
    pub frees: u64,
    pub live_allocations: u64,
    pub class_hits: u64,
    pub class_refills: u64,
    pub large_maps: u64,
    pub large_unmaps: u64,
    pub oom_events: u64,
}

impl From<HeapStats> for GeneralHeapReport {
    fn from(stats: HeapStats) -> Self {
        Self {
            allocs: stats.allocs,
            frees: stats.frees,
            live_allocations: stats.live_allocations(),
            class_hits: stats.class_hits,
            class_refills: stats.class_refills,
            large_maps: stats.large_maps,
            large_unmaps: stats.large_unmaps,
            oom_events: stats.oom_events,
        }
    }
}

/// Serializable snapshot of the calling thread's region-mode state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegionModeReport {
    pub active: bool,
    pub discipline: &'static str,
    pub bytes_held: usize,
    pub arenas_mapped: u64,
    pub blocks_carved: u64,
    pub blocks_reused: u64,
}

impl RegionModeReport {
    #[must_use]
    pub fn gather(mode: &ThreadMode) -> Self {
        let (carved, reused) = mode.freelist_counters();
        Self {
            active: mode.is_active(),
            discipline: match mode.config().discipline {
                RegionDiscipline::Bump => "bump",
                RegionDiscipline::SameSizeFreelist => "same_size_freelist",
            },
            bytes_held: mode.bytes_held(),
            arenas_mapped: mode.arenas_mapped(),
            blocks_carved: carved,
            blocks_reused: reused,
        }
    }
}

/// Full allocator snapshot: shared-heap counters, the calling thread's
/// region state, and the recent lifecycle records.
#[derive(Debug, Clone, Serialize)]
pub struct HeapReport {
    pub general: GeneralHeapReport,
    pub region: RegionModeReport,
    pub recent_events: Vec<LifecycleRecord>,
    pub dropped_events: u64,
}

impl HeapReport {
    #[must_use]
    pub fn gather(stats: HeapStats, mode: &ThreadMode) -> Self {
        Self {
            general: stats.into(),
            region: RegionModeReport::gather(mode),
            recent_events: recent(),
            dropped_events: dropped(),
        }
    }
}
