/// Receive-side QoS accounting.
///
/// Every heartbeat the mesh hands up is decoded, checked against the
/// per-(destination, source) duplicate tracker and folded into the
/// destination's accumulator. The transport may deliver a frame more than
/// once; the tracker makes sure each sequence is counted at most once.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, warn};

use crate::device::DeviceId;
use crate::heartbeat::HeartbeatRecord;
use crate::time::VirtualTime;

// ── Accumulator ───────────────────────────────────────────────────────

/// Additive counters for one destination. Never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QosAccumulator {
    pub sent: u64,
    pub received: u64,
    /// Sum of end-to-end delays, seconds.
    pub cumulative_delay: f64,
    pub cumulative_lqi: u64,
}

// ── Duplicate tracker ─────────────────────────────────────────────────

/// Sequence numbers already counted, per (destination, source).
///
/// Entries are never evicted during a run.
#[derive(Debug, Clone, Default)]
pub struct DuplicateTracker {
    seen: BTreeMap<(DeviceId, DeviceId), BTreeSet<u32>>,
}

impl DuplicateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence`; `false` if it was already there.
    pub fn insert(&mut self, dst: DeviceId, src: DeviceId, sequence: u32) -> bool {
        self.seen.entry((dst, src)).or_default().insert(sequence)
    }

    pub fn contains(&self, dst: DeviceId, src: DeviceId, sequence: u32) -> bool {
        self.seen
            .get(&(dst, src))
            .is_some_and(|s| s.contains(&sequence))
    }

    pub fn len(&self, dst: DeviceId, src: DeviceId) -> usize {
        self.seen.get(&(dst, src)).map_or(0, BTreeSet::len)
    }
}

// ── Engine ────────────────────────────────────────────────────────────

/// What happened to one received payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReceiveOutcome {
    /// First copy of this sequence; counters updated.
    Counted { record: HeartbeatRecord, delay: f64 },
    /// Sequence already counted; nothing changed.
    Duplicate { record: HeartbeatRecord },
    /// Shorter than the header; nothing changed.
    Truncated { len: usize },
    /// Send timestamp lies in the future. The sequence is consumed but the
    /// sample is kept out of the statistics.
    ClockAnomaly { record: HeartbeatRecord, delay: f64 },
}

/// Transport anomalies seen on the receive path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AnomalyCounters {
    pub duplicates: u64,
    pub truncated: u64,
    pub clock_anomalies: u64,
}

/// One row of the QoS summary.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct QosRow {
    pub device: DeviceId,
    pub sent: u64,
    pub received: u64,
    pub pdr: f64,
    /// Seconds; 0 when nothing was received.
    pub avg_delay: f64,
    /// 0 when nothing was received.
    pub avg_lqi: f64,
}

impl std::fmt::Display for QosRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<6} {:>6} {:>8} {:>7.3} {:>13.3} {:>8.1}",
            self.device.to_string(),
            self.sent,
            self.received,
            self.pdr,
            self.avg_delay * 1_000.0,
            self.avg_lqi
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct QosEngine {
    accumulators: BTreeMap<DeviceId, QosAccumulator>,
    tracker: DuplicateTracker,
    anomalies: AnomalyCounters,
}

impl QosEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulator(&self, dst: DeviceId) -> QosAccumulator {
        self.accumulators.get(&dst).copied().unwrap_or_default()
    }

    pub fn anomalies(&self) -> AnomalyCounters {
        self.anomalies
    }

    pub fn tracker(&self) -> &DuplicateTracker {
        &self.tracker
    }

    pub fn record_sent(&mut self, dst: DeviceId) {
        self.accumulators.entry(dst).or_default().sent += 1;
    }

    /// Account for a payload delivered to `dst` at `now` with `lqi`.
    ///
    /// Transport anomalies are logged and reported in the outcome, never
    /// as errors.
    pub fn record_received(
        &mut self,
        now: VirtualTime,
        dst: DeviceId,
        payload: &[u8],
        lqi: u8,
    ) -> ReceiveOutcome {
        let record = match HeartbeatRecord::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                self.anomalies.truncated += 1;
                warn!(%dst, error = %e, "dropping undersized heartbeat");
                return ReceiveOutcome::Truncated { len: payload.len() };
            }
        };

        if !self.tracker.insert(dst, record.source, record.sequence) {
            self.anomalies.duplicates += 1;
            debug!(%dst, %record, "duplicate heartbeat dropped");
            return ReceiveOutcome::Duplicate { record };
        }

        let delay = now.as_secs_f64() - record.sent_at;
        if delay < 0.0 {
            self.anomalies.clock_anomalies += 1;
            error!(%dst, %record, delay, "heartbeat sent in the future");
            return ReceiveOutcome::ClockAnomaly { record, delay };
        }

        let acc = self.accumulators.entry(dst).or_default();
        acc.received += 1;
        acc.cumulative_delay += delay;
        acc.cumulative_lqi += u64::from(lqi);
        debug!(%dst, %record, delay, lqi, "heartbeat received");
        ReceiveOutcome::Counted { record, delay }
    }

    /// One row per destination with at least one sent heartbeat, in id
    /// order. Pure: calling it again without new events yields the same
    /// rows.
    pub fn summarize(&self) -> Vec<QosRow> {
        self.accumulators
            .iter()
            .filter(|(_, acc)| acc.sent > 0)
            .map(|(&device, acc)| {
                let pdr = if acc.sent > 0 {
                    acc.received as f64 / acc.sent as f64
                } else {
                    0.0
                };
                let (avg_delay, avg_lqi) = if acc.received > 0 {
                    (
                        acc.cumulative_delay / acc.received as f64,
                        acc.cumulative_lqi as f64 / acc.received as f64,
                    )
                } else {
                    (0.0, 0.0)
                };
                QosRow {
                    device,
                    sent: acc.sent,
                    received: acc.received,
                    pdr,
                    avg_delay,
                    avg_lqi,
                }
            })
            .collect()
    }
}
