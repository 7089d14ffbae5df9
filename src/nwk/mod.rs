//! Network primitive layer.
//!
//! A Zigbee-NWK-like simulation of the asynchronous primitives the join
//! orchestrator drives: formation, discovery, join, start-router, data and
//! next-hop resolution. Requests take effect immediately inside the NWK
//! state, except start-router, which only lets the device relay once its
//! confirmation is applied. Confirmations are delivered later as
//! [`EventType::NwkConfirm`] events on the issuing device's context.
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`primitives`] | request ids, statuses, channel masks, confirms, frames |
//! | [`tables`] | neighbor and routing table read-out |
//! | [`topology`] | radio links and their LQI |

pub mod primitives;
pub mod tables;
pub mod topology;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::device::{Device, DeviceId, ExtendedAddress, ShortAddress};
use crate::error::{CoexError, CoexResult};
use crate::event::EventType;
use crate::medium::{Medium, MediumDecision};
use crate::simulation::SimulationContext;

pub use primitives::{
    CapabilityInfo, ChannelMask, MeshFrame, NetworkDescriptor, NextHop, NwkConfirm, NwkStatus,
    RequestId,
};
pub use tables::{NeighborEntry, NwkTables, RouteEntry};
pub use topology::{Link, Topology};

/// Stack profile advertised in beacons (Zigbee PRO).
pub const STACK_PROFILE: u8 = 2;

/// Duration of one channel scan at `scan_duration = 0`, in µs
/// (960 symbols × 16 µs).
pub const BASE_SCAN_US: u64 = 15_360;

/// Address allocation attempts before falling back to a linear search.
const RANDOM_ALLOCATION_ATTEMPTS: usize = 64;

// ── Config ────────────────────────────────────────────────────────────

/// Primitive timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NwkConfig {
    /// Association handshake time (µs) before a join confirms.
    pub association_delay_us: u64,
    /// Random extra association time in `[0, association_jitter_us)`,
    /// drawn from the joining device's stream.
    pub association_jitter_us: u64,
    /// Time (µs) before a start-router request confirms.
    pub start_router_delay_us: u64,
}

impl Default for NwkConfig {
    fn default() -> Self {
        NwkConfig {
            association_delay_us: 50_000,
            association_jitter_us: 20_000,
            start_router_delay_us: 10_000,
        }
    }
}

/// One 802.15.4 channel scan: `15.36 ms × (2^n + 1)`.
pub fn channel_scan_time(scan_duration: u8) -> u64 {
    let exponent = u32::from(scan_duration.min(14));
    BASE_SCAN_US * ((1u64 << exponent) + 1)
}

/// Frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct NwkStats {
    pub frames_sent: u64,
    pub frames_forwarded: u64,
    pub frames_delivered: u64,
    pub no_route_drops: u64,
    pub hop_limit_drops: u64,
    pub medium_drops: u64,
    pub route_discoveries: u64,
}

// ── Per-device NWK state ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Membership {
    ext_pan_id: u64,
    pan_id: u16,
    channel: u8,
    short_addr: ShortAddress,
}

#[derive(Debug, Clone)]
struct NwkNode {
    ext_addr: ExtendedAddress,
    rng: ChaCha8Rng,
    membership: Option<Membership>,
    /// May relay frames and accept joins.
    router: bool,
    /// destination → next hop
    routing_table: BTreeMap<ShortAddress, ShortAddress>,
}

// ── MeshNwk ───────────────────────────────────────────────────────────

/// NWK state of every device in one simulation.
#[derive(Debug, Clone)]
pub struct MeshNwk {
    config: NwkConfig,
    topology: Topology,
    nodes: Vec<NwkNode>,
    next_request: u64,
    stats: NwkStats,
}

impl MeshNwk {
    /// One NWK node per device, each with its own stream seeded from
    /// the device.
    pub fn new(config: NwkConfig, topology: Topology, devices: &[Device]) -> Self {
        let nodes = devices
            .iter()
            .map(|d| NwkNode {
                ext_addr: d.ext_addr(),
                rng: ChaCha8Rng::seed_from_u64(d.stream_seed()),
                membership: None,
                router: false,
                routing_table: BTreeMap::new(),
            })
            .collect();
        MeshNwk {
            config,
            topology,
            nodes,
            next_request: 0,
            stats: NwkStats::default(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn stats(&self) -> &NwkStats {
        &self.stats
    }

    pub fn short_address(&self, device: DeviceId) -> Option<ShortAddress> {
        self.nodes
            .get(device.index())
            .and_then(|n| n.membership)
            .map(|m| m.short_addr)
    }

    pub fn extended_address(&self, device: DeviceId) -> Option<ExtendedAddress> {
        self.nodes.get(device.index()).map(|n| n.ext_addr)
    }

    pub fn is_router(&self, device: DeviceId) -> bool {
        self.nodes.get(device.index()).is_some_and(|n| n.router)
    }

    /// Number of routing-table entries held by `device`.
    pub fn route_count(&self, device: DeviceId) -> usize {
        self.nodes
            .get(device.index())
            .map_or(0, |n| n.routing_table.len())
    }

    pub fn set_link_active(&mut self, a: DeviceId, b: DeviceId, active: bool) -> bool {
        self.topology.set_active(a, b, active)
    }

    /// Write a routing-table entry directly.
    pub fn set_route(
        &mut self,
        device: DeviceId,
        dst: ShortAddress,
        next_hop: ShortAddress,
    ) -> CoexResult<()> {
        self.node_mut(device)?.routing_table.insert(dst, next_hop);
        Ok(())
    }

    // ── Management primitives ────────────────────────────────────

    /// NLME-NETWORK-FORMATION.request.
    pub fn form_network(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
        mask: ChannelMask,
        scan_duration: u8,
    ) -> CoexResult<RequestId> {
        let request = self.next_request_id();
        let delay = 2 * channel_scan_time(scan_duration) * u64::from(mask.channel_count());
        let node = self.node_mut(device)?;

        let status = match mask.channels().next() {
            Some(channel) if node.membership.is_none() => {
                let pan_id = node.rng.gen_range(0..0xFFFFu16);
                let ext_pan_id = node.ext_addr.raw();
                node.membership = Some(Membership {
                    ext_pan_id,
                    pan_id,
                    channel,
                    short_addr: ShortAddress::COORDINATOR,
                });
                node.router = true;
                debug!(%device, channel, pan_id = %format!("0x{:04x}", pan_id), "network started");
                NwkStatus::Success
            }
            _ => NwkStatus::StartupFailure,
        };

        self.confirm(ctx, device, delay, NwkConfirm::Formation { request, status })?;
        Ok(request)
    }

    /// NLME-NETWORK-DISCOVERY.request.
    pub fn discover_networks(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
        mask: ChannelMask,
        scan_duration: u8,
    ) -> CoexResult<RequestId> {
        self.node(device)?;
        let request = self.next_request_id();
        let delay = channel_scan_time(scan_duration) * u64::from(mask.channel_count());

        let mut heard: BTreeMap<(u8, u64), NetworkDescriptor> = BTreeMap::new();
        for neighbor in self.topology.neighbors(device) {
            let Some(n) = self.nodes.get(neighbor.index()) else {
                continue;
            };
            let Some(m) = n.membership else { continue };
            if n.router && mask.contains(m.channel) {
                heard
                    .entry((m.channel, m.ext_pan_id))
                    .or_insert(NetworkDescriptor {
                        ext_pan_id: m.ext_pan_id,
                        pan_id: m.pan_id,
                        logical_channel: m.channel,
                        stack_profile: STACK_PROFILE,
                        permit_joining: true,
                    });
            }
        }
        let networks: Vec<NetworkDescriptor> = heard.into_values().collect();
        let status = if networks.is_empty() {
            NwkStatus::NoNetworks
        } else {
            NwkStatus::Success
        };
        debug!(%device, found = networks.len(), "discovery scan complete");

        self.confirm(
            ctx,
            device,
            delay,
            NwkConfirm::Discovery {
                request,
                status,
                networks,
            },
        )?;
        Ok(request)
    }

    /// NLME-JOIN.request by association.
    pub fn join(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
        ext_pan_id: u64,
        capability: CapabilityInfo,
    ) -> CoexResult<RequestId> {
        let request = self.next_request_id();
        let jitter = match self.config.association_jitter_us {
            0 => 0,
            j => self.node_mut(device)?.rng.gen_range(0..j),
        };
        let delay = self.config.association_delay_us + jitter;

        let (status, address) = if self.node(device)?.membership.is_some() {
            (NwkStatus::InvalidRequest, ShortAddress::NO_ROUTE)
        } else {
            match self.pick_parent(device, ext_pan_id) {
                None => (NwkStatus::NotPermitted, ShortAddress::NO_ROUTE),
                Some(parent) => match self.allocate_address(parent, ext_pan_id) {
                    None => (NwkStatus::NotPermitted, ShortAddress::NO_ROUTE),
                    Some((membership, address)) => {
                        let node = self.node_mut(device)?;
                        node.membership = Some(membership);
                        node.router = false;
                        if capability.is_router() {
                            debug!(%device, %parent, %address, "associated as router-capable");
                        }
                        (NwkStatus::Success, address)
                    }
                },
            }
        };

        self.confirm(
            ctx,
            device,
            delay,
            NwkConfirm::Join {
                request,
                status,
                address,
                ext_pan_id,
            },
        )?;
        Ok(request)
    }

    /// NLME-START-ROUTER.request. Always confirms.
    ///
    /// The device does not relay or accept joins until
    /// [`complete_start_router`](Self::complete_start_router) is applied
    /// with the confirmation.
    pub fn start_router(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
    ) -> CoexResult<RequestId> {
        self.node(device)?;
        let request = self.next_request_id();
        let delay = self.config.start_router_delay_us;
        self.confirm(ctx, device, delay, NwkConfirm::StartRouter { request })?;
        Ok(request)
    }

    /// Apply a delivered start-router confirmation: from now on the device
    /// relays frames and accepts joins.
    pub fn complete_start_router(&mut self, device: DeviceId) -> CoexResult<()> {
        let node = self.node_mut(device)?;
        if node.membership.is_some() {
            node.router = true;
        }
        Ok(())
    }

    // ── Routing ──────────────────────────────────────────────────

    /// `(dst, true)` for an active neighbor in the same network, else the
    /// routing-table entry, else `NextHop::UNREACHABLE`.
    pub fn resolve_next_hop(&self, device: DeviceId, dst: ShortAddress) -> NextHop {
        let Some(node) = self.nodes.get(device.index()) else {
            return NextHop::UNREACHABLE;
        };
        let Some(own) = node.membership else {
            return NextHop::UNREACHABLE;
        };
        if let Some(peer) = self.member_by_address(own.ext_pan_id, dst) {
            if self.topology.is_connected(device, peer) {
                return NextHop {
                    address: dst,
                    neighbor: true,
                };
            }
        }
        match node.routing_table.get(&dst) {
            Some(&next) => NextHop {
                address: next,
                neighbor: false,
            },
            None => NextHop::UNREACHABLE,
        }
    }

    /// The device currently holding `address`, in any network.
    pub fn device_by_address(&self, address: ShortAddress) -> Option<DeviceId> {
        self.nodes
            .iter()
            .position(|n| n.membership.is_some_and(|m| m.short_addr == address))
            .map(|i| DeviceId::new(i as u32))
    }

    fn member_by_address(&self, ext_pan_id: u64, address: ShortAddress) -> Option<DeviceId> {
        self.nodes
            .iter()
            .position(|n| {
                n.membership
                    .is_some_and(|m| m.ext_pan_id == ext_pan_id && m.short_addr == address)
            })
            .map(|i| DeviceId::new(i as u32))
    }

    /// Breadth-first search over active links, relaying only through
    /// routers, then install next-hop entries both ways along the path.
    fn discover_route(&mut self, src: DeviceId, dst: ShortAddress) -> bool {
        let Some(own) = self.nodes.get(src.index()).and_then(|n| n.membership) else {
            return false;
        };
        let Some(target) = self.member_by_address(own.ext_pan_id, dst) else {
            return false;
        };

        let mut parent: BTreeMap<DeviceId, DeviceId> = BTreeMap::new();
        let mut visited: BTreeSet<DeviceId> = BTreeSet::from([src]);
        let mut queue = VecDeque::from([src]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                break;
            }
            if current != src && !self.is_router(current) {
                continue;
            }
            for next in self.topology.neighbors(current) {
                let same_network = self
                    .nodes
                    .get(next.index())
                    .and_then(|n| n.membership)
                    .is_some_and(|m| m.ext_pan_id == own.ext_pan_id);
                if same_network && visited.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        if !visited.contains(&target) {
            return false;
        }

        let mut path = vec![target];
        let mut cursor = target;
        while let Some(&p) = parent.get(&cursor) {
            path.push(p);
            cursor = p;
        }
        path.reverse();

        let addrs: Vec<ShortAddress> = path
            .iter()
            .filter_map(|d| self.short_address(*d))
            .collect();
        if addrs.len() != path.len() {
            return false;
        }
        for i in 0..path.len() - 1 {
            self.nodes[path[i].index()].routing_table.insert(dst, addrs[i + 1]);
        }
        for i in 1..path.len() {
            self.nodes[path[i].index()]
                .routing_table
                .insert(own.short_addr, addrs[i - 1]);
        }
        self.stats.route_discoveries += 1;
        debug!(%src, %dst, hops = path.len() - 1, "route discovered");
        true
    }

    // ── Data ─────────────────────────────────────────────────────

    /// NLDE-DATA.request. Frames with no route are dropped and counted.
    pub fn send_data(
        &mut self,
        ctx: &mut SimulationContext,
        medium: &mut Medium,
        device: DeviceId,
        dst: ShortAddress,
        payload: Vec<u8>,
        discover_route: bool,
    ) -> CoexResult<()> {
        let Some(src_addr) = self.short_address(device) else {
            self.stats.no_route_drops += 1;
            warn!(%device, "data request from a device outside any network");
            return Ok(());
        };
        self.stats.frames_sent += 1;
        let frame = MeshFrame::new(src_addr, dst, payload);

        if dst == src_addr {
            ctx.schedule_with_context(
                0,
                device,
                EventType::FrameArrival {
                    device,
                    frame,
                    lqi: u8::MAX,
                },
            )?;
            return Ok(());
        }

        let mut next = self.resolve_next_hop(device, dst);
        if next.is_unreachable() && discover_route && self.discover_route(device, dst) {
            next = self.resolve_next_hop(device, dst);
        }
        if next.is_unreachable() {
            self.stats.no_route_drops += 1;
            debug!(%device, %dst, "no route, frame dropped");
            return Ok(());
        }
        self.transmit(ctx, medium, device, next.address, frame)
    }

    /// A frame reached `device`. Returns it if `device` is the destination,
    /// otherwise relays it one hop further.
    pub fn on_frame_arrival(
        &mut self,
        ctx: &mut SimulationContext,
        medium: &mut Medium,
        device: DeviceId,
        mut frame: MeshFrame,
    ) -> CoexResult<Option<MeshFrame>> {
        let node = self.node(device)?;
        let Some(own) = node.membership else {
            return Ok(None);
        };
        if own.short_addr == frame.dst {
            self.stats.frames_delivered += 1;
            return Ok(Some(frame));
        }
        if !node.router {
            self.stats.no_route_drops += 1;
            return Ok(None);
        }

        frame.hops = frame.hops.saturating_add(1);
        if usize::from(frame.hops) >= self.nodes.len() {
            self.stats.hop_limit_drops += 1;
            warn!(%device, %frame, "hop limit reached, frame dropped");
            return Ok(None);
        }
        let next = self.resolve_next_hop(device, frame.dst);
        if next.is_unreachable() {
            self.stats.no_route_drops += 1;
            debug!(%device, %frame, "relay has no route");
            return Ok(None);
        }
        self.stats.frames_forwarded += 1;
        self.transmit(ctx, medium, device, next.address, frame)?;
        Ok(None)
    }

    fn transmit(
        &mut self,
        ctx: &mut SimulationContext,
        medium: &mut Medium,
        from: DeviceId,
        next_hop: ShortAddress,
        frame: MeshFrame,
    ) -> CoexResult<()> {
        let ext_pan_id = match self.nodes.get(from.index()).and_then(|n| n.membership) {
            Some(m) => m.ext_pan_id,
            None => return Ok(()),
        };
        let link = self
            .member_by_address(ext_pan_id, next_hop)
            .and_then(|to| self.topology.link(from, to).filter(|l| l.active).map(|l| (to, l.lqi)));
        let Some((to, lqi)) = link else {
            self.stats.no_route_drops += 1;
            debug!(%from, %next_hop, "next hop not reachable over the air");
            return Ok(());
        };

        match medium.transmit_mesh(ctx.now(), frame.len(), lqi) {
            MediumDecision::Delivered {
                latency,
                lqi,
                duplicate_after,
            } => {
                if let Some(extra) = duplicate_after {
                    ctx.schedule_with_context(
                        latency + extra,
                        to,
                        EventType::FrameArrival {
                            device: to,
                            frame: frame.clone(),
                            lqi,
                        },
                    )?;
                }
                ctx.schedule_with_context(
                    latency,
                    to,
                    EventType::FrameArrival {
                        device: to,
                        frame,
                        lqi,
                    },
                )?;
            }
            MediumDecision::DroppedByChance | MediumDecision::DroppedByInterference => {
                self.stats.medium_drops += 1;
            }
        }
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request);
        self.next_request += 1;
        id
    }

    fn confirm(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
        delay: u64,
        confirm: NwkConfirm,
    ) -> CoexResult<()> {
        ctx.schedule_with_context(delay, device, EventType::NwkConfirm { device, confirm })?;
        Ok(())
    }

    /// In-range router of the target network with the best LQI; ties go
    /// to the lowest id.
    fn pick_parent(&self, device: DeviceId, ext_pan_id: u64) -> Option<DeviceId> {
        let mut best: Option<(DeviceId, u8)> = None;
        for candidate in self.topology.neighbors(device) {
            let Some(n) = self.nodes.get(candidate.index()) else {
                continue;
            };
            if !n.router || !n.membership.is_some_and(|m| m.ext_pan_id == ext_pan_id) {
                continue;
            }
            let lqi = self.topology.link(device, candidate).map_or(0, |l| l.lqi);
            if best.map_or(true, |(_, b)| lqi > b) {
                best = Some((candidate, lqi));
            }
        }
        best.map(|(d, _)| d)
    }

    /// Draw a unicast address unique within the parent's network from the
    /// parent's stream.
    fn allocate_address(
        &mut self,
        parent: DeviceId,
        ext_pan_id: u64,
    ) -> Option<(Membership, ShortAddress)> {
        let taken: BTreeSet<ShortAddress> = self
            .nodes
            .iter()
            .filter_map(|n| n.membership)
            .filter(|m| m.ext_pan_id == ext_pan_id)
            .map(|m| m.short_addr)
            .collect();
        let parent_node = self.nodes.get_mut(parent.index())?;
        let base = parent_node.membership?;

        let mut address = None;
        for _ in 0..RANDOM_ALLOCATION_ATTEMPTS {
            let candidate =
                ShortAddress::new(parent_node.rng.gen_range(1..=ShortAddress::MAX_UNICAST.raw()));
            if !taken.contains(&candidate) {
                address = Some(candidate);
                break;
            }
        }
        let address = address.or_else(|| {
            (1..=ShortAddress::MAX_UNICAST.raw())
                .map(ShortAddress::new)
                .find(|a| !taken.contains(a))
        })?;
        Some((
            Membership {
                short_addr: address,
                ..base
            },
            address,
        ))
    }

    fn node(&self, device: DeviceId) -> CoexResult<&NwkNode> {
        self.nodes
            .get(device.index())
            .ok_or(CoexError::DeviceNotFound(device))
    }

    fn node_mut(&mut self, device: DeviceId) -> CoexResult<&mut NwkNode> {
        self.nodes
            .get_mut(device.index())
            .ok_or(CoexError::DeviceNotFound(device))
    }
}

#[cfg(test)]
mod tests;
