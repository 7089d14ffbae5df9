/// Heartbeat traffic: the fixed wire record and the per-source sequence
/// generator.
///
/// Wire layout (little-endian):
///
/// | Offset | Size | Field |
/// |---|---|---|
/// | 0 | 4 | source device id (`u32`) |
/// | 4 | 4 | sequence number (`u32`) |
/// | 8 | 8 | send timestamp, seconds (`f64`) |
/// | 16 | N-16 | zero padding |

use std::collections::BTreeMap;

use crate::device::DeviceId;
use crate::error::{CoexError, CoexResult};
use crate::time::VirtualTime;

/// Size of the fixed header and the smallest legal payload.
pub const HEADER_LEN: usize = 16;

// ── Record ────────────────────────────────────────────────────────────

/// One heartbeat as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatRecord {
    pub source: DeviceId,
    pub sequence: u32,
    /// Virtual time at send, in seconds.
    pub sent_at: f64,
}

impl HeartbeatRecord {
    /// Encode into a zero-padded payload of `size` bytes.
    pub fn encode(&self, size: usize) -> CoexResult<Vec<u8>> {
        if size < HEADER_LEN {
            return Err(CoexError::PayloadTooSmall {
                size,
                min: HEADER_LEN,
            });
        }
        let mut buf = vec![0u8; size];
        buf[0..4].copy_from_slice(&self.source.raw().to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..16].copy_from_slice(&self.sent_at.to_le_bytes());
        Ok(buf)
    }

    /// Decode the fixed header; padding is ignored.
    pub fn decode(payload: &[u8]) -> CoexResult<Self> {
        let header: &[u8; HEADER_LEN] = payload
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(CoexError::PayloadTruncated {
                len: payload.len(),
                min: HEADER_LEN,
            })?;

        let mut source = [0u8; 4];
        let mut sequence = [0u8; 4];
        let mut sent_at = [0u8; 8];
        source.copy_from_slice(&header[0..4]);
        sequence.copy_from_slice(&header[4..8]);
        sent_at.copy_from_slice(&header[8..16]);

        Ok(HeartbeatRecord {
            source: DeviceId::new(u32::from_le_bytes(source)),
            sequence: u32::from_le_bytes(sequence),
            sent_at: f64::from_le_bytes(sent_at),
        })
    }
}

impl std::fmt::Display for HeartbeatRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HB({} #{} @{:.6}s)", self.source, self.sequence, self.sent_at)
    }
}

// ── Generator ────────────────────────────────────────────────────────

/// Builds heartbeat payloads and hands out sequence numbers.
///
/// Sequences are per source, start at 0 and are never reused, even if a
/// source sends to several destinations.
#[derive(Debug, Clone)]
pub struct HeartbeatEngine {
    payload_size: usize,
    next_sequence: BTreeMap<DeviceId, u64>,
}

impl HeartbeatEngine {
    /// Fails with `PayloadTooSmall` when `payload_size` cannot hold the header.
    pub fn new(payload_size: usize) -> CoexResult<Self> {
        if payload_size < HEADER_LEN {
            return Err(CoexError::PayloadTooSmall {
                size: payload_size,
                min: HEADER_LEN,
            });
        }
        Ok(HeartbeatEngine {
            payload_size,
            next_sequence: BTreeMap::new(),
        })
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Next sequence `src` would use, without consuming it.
    pub fn peek_sequence(&self, src: DeviceId) -> u64 {
        self.next_sequence.get(&src).copied().unwrap_or(0)
    }

    /// Allocate the next sequence for `src` and build its payload.
    pub fn next_heartbeat(
        &mut self,
        src: DeviceId,
        now: VirtualTime,
    ) -> CoexResult<(HeartbeatRecord, Vec<u8>)> {
        let counter = self.next_sequence.entry(src).or_insert(0);
        let sequence = u32::try_from(*counter).map_err(|_| CoexError::SequenceExhausted(src))?;
        *counter += 1;

        let record = HeartbeatRecord {
            source: src,
            sequence,
            sent_at: now.as_secs_f64(),
        };
        let payload = record.encode(self.payload_size)?;
        Ok((record, payload))
    }
}
