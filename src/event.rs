/// Event system for the coexistence simulation.
///
/// Every effect is modeled as an `Event`: primitive confirmations, frame
/// arrivals, heartbeat ticks and WLAN transmissions all sit on the same
/// priority queue and are dispatched in deterministic order.

use std::cmp::Ordering;

use crate::device::DeviceId;
use crate::nwk::{MeshFrame, NwkConfirm};
use crate::time::VirtualTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// A globally unique, strictly-increasing event identifier.
///
/// Two events scheduled at the same `VirtualTime` are ordered by their
/// `EventId`, which corresponds to creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event ID Generator ───────────────────────────────────────────────

/// Deterministic, strictly-increasing event-ID generator.
///
/// Each `Simulation` owns exactly one of these.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Event Type ────────────────────────────────────────────────────────

/// The payload of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    /// Does nothing; handy for tests and for pinning the clock.
    Noop,

    /// A generic log / trace marker.
    Log(String),

    /// The coordinator should start the network.
    FormNetwork { device: DeviceId },

    /// A router-to-be should scan for networks.
    DiscoverNetworks { device: DeviceId },

    /// A primitive request issued by `device` has completed.
    NwkConfirm { device: DeviceId, confirm: NwkConfirm },

    /// A mesh frame finished one radio hop and reached `device`.
    FrameArrival {
        device: DeviceId,
        frame: MeshFrame,
        lqi: u8,
    },

    /// Periodic heartbeat from `src` to `dst`, every `interval` ticks.
    HeartbeatTick {
        src: DeviceId,
        dst: DeviceId,
        interval: u64,
    },

    /// Walk the current route from `src` to `dst` and record it.
    TraceRoute { src: DeviceId, dst: DeviceId },

    /// The next frame of a WLAN flow is due.
    WlanTx { flow: u32 },

    /// A WLAN frame reached the access point.
    WlanRx {
        flow: u32,
        bytes: u32,
        sent_at: VirtualTime,
    },

    /// Bring a radio link up or down.
    SetLinkActive {
        a: DeviceId,
        b: DeviceId,
        active: bool,
    },
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Noop => write!(f, "Noop"),
            EventType::Log(msg) => write!(f, "Log({})", msg),
            EventType::FormNetwork { device } => write!(f, "FormNetwork({})", device),
            EventType::DiscoverNetworks { device } => write!(f, "DiscoverNetworks({})", device),
            EventType::NwkConfirm { device, confirm } => write!(f, "{}@{}", confirm, device),
            EventType::FrameArrival { device, frame, lqi } => {
                write!(f, "Frame({} at {}, lqi {})", frame, device, lqi)
            }
            EventType::HeartbeatTick { src, dst, .. } => write!(f, "Heartbeat({} → {})", src, dst),
            EventType::TraceRoute { src, dst } => write!(f, "TraceRoute({} → {})", src, dst),
            EventType::WlanTx { flow } => write!(f, "WlanTx(flow {})", flow),
            EventType::WlanRx { flow, bytes, .. } => write!(f, "WlanRx(flow {}, {}B)", flow, bytes),
            EventType::SetLinkActive { a, b, active } => {
                let verb = if *active { "Up" } else { "Down" };
                write!(f, "Link{}({} ↔ {})", verb, a, b)
            }
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single simulation event.
///
/// The scheduler orders events by `(scheduled_at, id)`. `context` names the
/// device on whose behalf the event runs; it only affects logging.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub scheduled_at: VirtualTime,
    pub context: Option<DeviceId>,
    pub payload: EventType,
}

impl Event {
    pub fn new(id: EventId, scheduled_at: VirtualTime, payload: EventType) -> Self {
        Event {
            id,
            scheduled_at,
            context: None,
            payload,
        }
    }

    pub fn with_context(
        id: EventId,
        scheduled_at: VirtualTime,
        device: DeviceId,
        payload: EventType,
    ) -> Self {
        Event {
            id,
            scheduled_at,
            context: Some(device),
            payload,
        }
    }
}

/// Ordering: smallest `(scheduled_at, id)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .scheduled_at
            .cmp(&self.scheduled_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
