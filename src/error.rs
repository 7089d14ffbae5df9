//! Structured error types for meshcoex.
//!
//! All fallible public APIs return `Result<T, CoexError>`. Variants are
//! classified by [`CoexError::is_fatal`]: fatal errors abort the run,
//! everything else is logged where it is detected and the simulation
//! carries on with whatever state survived.

use std::path::PathBuf;

use thiserror::Error;

use crate::device::{DeviceId, JoinPhase, ShortAddress};
use crate::nwk::{NwkStatus, RequestId};

/// The top-level error type.
#[derive(Debug, Error)]
pub enum CoexError {
    // ── Configuration errors (fatal) ──────────────────────

    /// Heartbeat payload cannot hold the fixed header.
    #[error("heartbeat payload size {size} is smaller than the {min}-byte header")]
    PayloadTooSmall { size: usize, min: usize },

    /// A scenario value is out of range or inconsistent.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for a scenario.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // ── Protocol errors ───────────────────────────────────

    /// The coordinator could not form the network (fatal).
    #[error("device {device} failed to form the network: {status}")]
    NetworkFormationFailed { device: DeviceId, status: NwkStatus },

    /// Discovery found no network or the primitive failed.
    #[error("device {device} failed network discovery: {status}")]
    DiscoveryFailed { device: DeviceId, status: NwkStatus },

    /// The join confirmation reported failure.
    #[error("device {device} failed to join: {status}")]
    JoinFailed { device: DeviceId, status: NwkStatus },

    /// The network handed out a reserved or broadcast address.
    #[error("device {device} was assigned unusable address {address}")]
    InvalidAssignedAddress { device: DeviceId, address: ShortAddress },

    // ── Orchestration invariants (fatal) ──────────────────

    /// An orchestrator operation was invoked in the wrong phase.
    #[error("device {device} cannot {operation} while {phase}")]
    InvalidState {
        device: DeviceId,
        phase: JoinPhase,
        operation: &'static str,
    },

    /// A second request was issued while one is still outstanding.
    #[error("device {device} already has request {pending} outstanding")]
    RequestOutstanding { device: DeviceId, pending: RequestId },

    /// A short address was recorded twice in one join episode.
    #[error("device {device} already holds address {address}")]
    AddressAlreadyAssigned { device: DeviceId, address: ShortAddress },

    /// A device index was referenced that is not part of the simulation.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    // ── Scheduling errors (fatal) ─────────────────────────

    /// Attempted to schedule an event in the past.
    #[error("cannot schedule event at tick {requested} when current tick is {current}")]
    NonCausalEvent { requested: u64, current: u64 },

    /// Virtual time overflowed.
    #[error("virtual time overflow")]
    TimeOverflow,

    // ── Transport anomalies (non-fatal) ───────────────────

    /// A received payload is shorter than the heartbeat header.
    #[error("payload of {len} bytes is shorter than the {min}-byte header")]
    PayloadTruncated { len: usize, min: usize },

    /// A source used up its 32-bit sequence space.
    #[error("device {0} exhausted its heartbeat sequence numbers")]
    SequenceExhausted(DeviceId),

    // ── Output ────────────────────────────────────────────

    /// Report serialization failed.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CoexError {
    /// Whether this error must abort the simulation run.
    ///
    /// Discovery/join failures leave the device in `Failed` and the rest of
    /// the network keeps going; transport anomalies are dropped packets.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CoexError::DiscoveryFailed { .. }
                | CoexError::JoinFailed { .. }
                | CoexError::InvalidAssignedAddress { .. }
                | CoexError::PayloadTruncated { .. }
                | CoexError::SequenceExhausted(_)
        )
    }
}

/// Convenience alias for `Result<T, CoexError>`.
pub type CoexResult<T> = Result<T, CoexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_payload_too_small() {
        let e = CoexError::PayloadTooSmall { size: 8, min: 16 };
        assert_eq!(
            e.to_string(),
            "heartbeat payload size 8 is smaller than the 16-byte header"
        );
    }

    #[test]
    fn test_display_non_causal() {
        let e = CoexError::NonCausalEvent { requested: 3, current: 10 };
        assert!(e.to_string().contains("tick 3"));
        assert!(e.to_string().contains("tick 10"));
    }

    #[test]
    fn test_taxonomy() {
        let d = DeviceId::new(2);
        assert!(CoexError::PayloadTooSmall { size: 1, min: 16 }.is_fatal());
        assert!(CoexError::NetworkFormationFailed { device: d, status: NwkStatus::StartupFailure }
            .is_fatal());
        assert!(!CoexError::DiscoveryFailed { device: d, status: NwkStatus::NoNetworks }.is_fatal());
        assert!(!CoexError::JoinFailed { device: d, status: NwkStatus::NotPermitted }.is_fatal());
        assert!(!CoexError::PayloadTruncated { len: 15, min: 16 }.is_fatal());
    }

    #[test]
    fn test_error_is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(CoexError::TimeOverflow);
        assert!(!e.to_string().is_empty());
    }
}
