/// Hop-by-hop route tracing.
///
/// Starting at the source, ask whichever device owns the current address
/// for its next hop toward the destination, until the answer is the
/// destination itself or the no-route sentinel. Routing tables are not
/// guaranteed to be acyclic, so the walk is also capped at a hop bound.

use crate::device::{DeviceId, ExtendedAddress, ShortAddress};
use crate::nwk::{MeshNwk, NextHop};
use crate::time::VirtualTime;

/// Read-only view of the distributed next-hop state.
pub trait NextHopResolver {
    /// The device currently holding `address`.
    fn device_by_address(&self, address: ShortAddress) -> Option<DeviceId>;

    /// `device`'s next hop toward `dst`.
    fn resolve_next_hop(&self, device: DeviceId, dst: ShortAddress) -> NextHop;

    fn extended_address(&self, device: DeviceId) -> Option<ExtendedAddress>;
}

impl NextHopResolver for MeshNwk {
    fn device_by_address(&self, address: ShortAddress) -> Option<DeviceId> {
        MeshNwk::device_by_address(self, address)
    }

    fn resolve_next_hop(&self, device: DeviceId, dst: ShortAddress) -> NextHop {
        MeshNwk::resolve_next_hop(self, device, dst)
    }

    fn extended_address(&self, device: DeviceId) -> Option<ExtendedAddress> {
        MeshNwk::extended_address(self, device)
    }
}

// ── Result types ──────────────────────────────────────────────────────

/// One step of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RouteHop {
    pub device: DeviceId,
    pub address: ShortAddress,
    pub ext_addr: Option<ExtendedAddress>,
    /// `ShortAddress::NO_ROUTE` when this device has no way forward.
    pub next_hop: ShortAddress,
    pub neighbor: bool,
}

impl RouteHop {
    pub fn is_unreachable(&self) -> bool {
        self.next_hop == ShortAddress::NO_ROUTE
    }
}

/// How a trace ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TraceOutcome {
    Reached,
    /// The last hop reported no route.
    Unreachable,
    /// The hop bound was hit before either natural end.
    HopLimitExceeded,
    /// An address along the way (or an endpoint) belongs to no device.
    UnknownAddress(ShortAddress),
}

impl std::fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceOutcome::Reached => write!(f, "reached"),
            TraceOutcome::Unreachable => write!(f, "unreachable"),
            TraceOutcome::HopLimitExceeded => write!(f, "hop limit exceeded"),
            TraceOutcome::UnknownAddress(a) => write!(f, "unknown address [{}]", a),
        }
    }
}

/// A complete trace.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RouteTrace {
    pub at: VirtualTime,
    pub src: DeviceId,
    pub dst: DeviceId,
    pub dst_addr: ShortAddress,
    pub hops: Vec<RouteHop>,
    pub outcome: TraceOutcome,
}

impl RouteTrace {
    /// Trace that could not start, e.g. because an endpoint is not joined.
    pub fn aborted(at: VirtualTime, src: DeviceId, dst: DeviceId, outcome: TraceOutcome) -> Self {
        RouteTrace {
            at,
            src,
            dst,
            dst_addr: ShortAddress::NO_ROUTE,
            hops: Vec::new(),
            outcome,
        }
    }

    /// Forwarding hops taken; an unreachable final entry is not a hop.
    pub fn hop_count(&self) -> usize {
        self.hops.iter().filter(|h| !h.is_unreachable()).count()
    }
}

impl std::fmt::Display for RouteTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Time {} | Traceroute {} → {} [{}]:",
            self.at, self.src, self.dst, self.dst_addr
        )?;
        for (i, hop) in self.hops.iter().enumerate() {
            write!(f, "{}. Node {} [{}", i + 1, hop.device, hop.address)?;
            if let Some(ext) = hop.ext_addr {
                write!(f, " | {}", ext)?;
            }
            write!(f, "]: ")?;
            if hop.is_unreachable() {
                writeln!(f, "Destination Unreachable")?;
            } else if hop.neighbor {
                writeln!(f, "NextHop [{}] (*Neighbor)", hop.next_hop)?;
            } else {
                writeln!(f, "NextHop [{}]", hop.next_hop)?;
            }
        }
        write!(f, "Result: {} after {} hop(s)", self.outcome, self.hop_count())
    }
}

// ── Tracer ────────────────────────────────────────────────────────────

/// Walk the route from `src_addr` to `dst_addr`, recording at most
/// `max_hops` steps.
pub fn trace_route(
    resolver: &dyn NextHopResolver,
    at: VirtualTime,
    (src, src_addr): (DeviceId, ShortAddress),
    (dst, dst_addr): (DeviceId, ShortAddress),
    max_hops: usize,
) -> RouteTrace {
    let mut hops = Vec::new();
    let mut target = src_addr;

    let outcome = loop {
        if target == dst_addr {
            break TraceOutcome::Reached;
        }
        if hops.len() >= max_hops {
            break TraceOutcome::HopLimitExceeded;
        }
        let Some(device) = resolver.device_by_address(target) else {
            break TraceOutcome::UnknownAddress(target);
        };

        let next = resolver.resolve_next_hop(device, dst_addr);
        hops.push(RouteHop {
            device,
            address: target,
            ext_addr: resolver.extended_address(device),
            next_hop: next.address,
            neighbor: next.neighbor,
        });
        if next.is_unreachable() {
            break TraceOutcome::Unreachable;
        }
        target = next.address;
    };

    RouteTrace {
        at,
        src,
        dst,
        dst_addr,
        hops,
        outcome,
    }
}
