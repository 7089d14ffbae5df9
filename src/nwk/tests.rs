//! Tests for the NWK primitive simulation, driven through a real
//! `Simulation` so confirmation timing is exercised end to end.

use super::*;
use crate::event::Event;
use crate::simulation::Simulation;
use crate::time::VirtualTime;

fn d(i: u32) -> DeviceId {
    DeviceId::new(i)
}

fn devices(n: u32) -> Vec<Device> {
    (0..n)
        .map(|i| {
            if i == 0 {
                Device::coordinator(d(0), ExtendedAddress::COORDINATOR, 0)
            } else {
                Device::router(d(i), ExtendedAddress::new(0x1000 + u64::from(i)), u64::from(i) * 10)
            }
        })
        .collect()
}

/// Minimal driver: formation and discovery are triggered by events, a
/// successful discovery joins the first network, a successful join starts
/// the router. `HeartbeatTick { src, dst }` sends one 16-byte frame.
struct Bench {
    sim: Simulation,
    nwk: MeshNwk,
    medium: Medium,
    formation_mask: ChannelMask,
    join_target: Option<u64>,
    confirms: Vec<(VirtualTime, DeviceId, NwkConfirm)>,
    delivered: Vec<(VirtualTime, DeviceId, MeshFrame, u8)>,
}

impl Bench {
    fn new(topology: Topology) -> Self {
        let n = topology.device_count() as u32;
        Bench {
            sim: Simulation::new(),
            nwk: MeshNwk::new(NwkConfig::default(), topology, &devices(n)),
            medium: Medium::reliable(1),
            formation_mask: ChannelMask::ALL_CHANNELS,
            join_target: None,
            confirms: Vec::new(),
            delivered: Vec::new(),
        }
    }

    fn form_at(&mut self, secs: f64) {
        self.sim.schedule_with_context(
            VirtualTime::from_secs_f64(secs),
            d(0),
            EventType::FormNetwork { device: d(0) },
        );
    }

    fn discover_at(&mut self, device: u32, secs: f64) {
        self.sim.schedule_with_context(
            VirtualTime::from_secs_f64(secs),
            d(device),
            EventType::DiscoverNetworks { device: d(device) },
        );
    }

    fn send_at(&mut self, src: u32, dst: u32, secs: f64) {
        self.sim.schedule(
            VirtualTime::from_secs_f64(secs),
            EventType::HeartbeatTick {
                src: d(src),
                dst: d(dst),
                interval: 0,
            },
        );
    }

    fn run(&mut self) {
        let Bench {
            sim,
            nwk,
            medium,
            formation_mask,
            join_target,
            confirms,
            delivered,
        } = self;
        sim.run(&mut |ctx: &mut SimulationContext, e: &Event| -> CoexResult<()> {
            match &e.payload {
                EventType::FormNetwork { device } => {
                    nwk.form_network(ctx, *device, *formation_mask, 0)?;
                }
                EventType::DiscoverNetworks { device } => {
                    nwk.discover_networks(ctx, *device, ChannelMask::LOW_CHANNELS, 2)?;
                }
                EventType::NwkConfirm { device, confirm } => {
                    match confirm {
                        NwkConfirm::Discovery {
                            status: NwkStatus::Success,
                            networks,
                            ..
                        } => {
                            let target = join_target.unwrap_or(networks[0].ext_pan_id);
                            nwk.join(ctx, *device, target, CapabilityInfo::router_allocating())?;
                        }
                        NwkConfirm::Join {
                            status: NwkStatus::Success,
                            ..
                        } => {
                            nwk.start_router(ctx, *device)?;
                        }
                        NwkConfirm::StartRouter { .. } => {
                            nwk.complete_start_router(*device)?;
                        }
                        _ => {}
                    }
                    confirms.push((ctx.now(), *device, confirm.clone()));
                }
                EventType::HeartbeatTick { src, dst, .. } => {
                    let addr = nwk.short_address(*dst).unwrap_or(ShortAddress::NO_ROUTE);
                    nwk.send_data(ctx, medium, *src, addr, vec![0u8; 16], true)?;
                }
                EventType::FrameArrival { device, frame, lqi } => {
                    if let Some(f) = nwk.on_frame_arrival(ctx, medium, *device, frame.clone())? {
                        delivered.push((ctx.now(), *device, f, *lqi));
                    }
                }
                _ => {}
            }
            Ok(())
        })
        .unwrap();
    }

    fn confirms_for(&self, device: u32) -> Vec<&NwkConfirm> {
        self.confirms
            .iter()
            .filter(|(_, dev, _)| *dev == d(device))
            .map(|(_, _, c)| c)
            .collect()
    }

    /// Form at 1 s, then discover device i at 2 + i seconds.
    fn join_all(&mut self) {
        self.form_at(1.0);
        for i in 1..self.nwk.topology().device_count() as u32 {
            self.discover_at(i, 2.0 + f64::from(i));
        }
        self.run();
    }
}

#[test]
fn test_scan_time() {
    assert_eq!(channel_scan_time(0), 30_720);
    assert_eq!(channel_scan_time(2), 76_800);
}

#[test]
fn test_formation_confirms_after_full_scan() {
    let mut b = Bench::new(Topology::chain(2, 200));
    b.form_at(1.0);
    b.run();

    let (at, dev, confirm) = &b.confirms[0];
    assert_eq!(*dev, d(0));
    // Energy + active scan over 16 channels at 30.72 ms each.
    assert_eq!(at.ticks(), 1_000_000 + 2 * 16 * 30_720);
    assert!(matches!(
        confirm,
        NwkConfirm::Formation { status: NwkStatus::Success, .. }
    ));
    assert_eq!(b.nwk.short_address(d(0)), Some(ShortAddress::COORDINATOR));
    assert!(b.nwk.is_router(d(0)));
}

#[test]
fn test_formation_fails_on_empty_mask_and_when_already_formed() {
    let mut b = Bench::new(Topology::chain(2, 200));
    b.formation_mask = ChannelMask::new(0);
    b.form_at(1.0);
    b.run();
    assert!(matches!(
        b.confirms[0].2,
        NwkConfirm::Formation { status: NwkStatus::StartupFailure, .. }
    ));
    assert_eq!(b.nwk.short_address(d(0)), None);

    let mut b = Bench::new(Topology::chain(2, 200));
    b.form_at(1.0);
    b.form_at(5.0);
    b.run();
    assert!(matches!(
        b.confirms_for(0)[1],
        NwkConfirm::Formation { status: NwkStatus::StartupFailure, .. }
    ));
}

#[test]
fn test_discovery_reports_network_descriptor() {
    let mut b = Bench::new(Topology::chain(2, 200));
    b.form_at(1.0);
    b.discover_at(1, 3.0);
    b.run();

    let confirms = b.confirms_for(1);
    match confirms[0] {
        NwkConfirm::Discovery {
            status, networks, ..
        } => {
            assert_eq!(*status, NwkStatus::Success);
            assert_eq!(networks.len(), 1);
            assert_eq!(networks[0].ext_pan_id, ExtendedAddress::COORDINATOR.raw());
            assert_eq!(networks[0].logical_channel, 11);
            assert_eq!(networks[0].stack_profile, STACK_PROFILE);
        }
        other => panic!("unexpected confirm {}", other),
    }
    let discovery_at = b
        .confirms
        .iter()
        .find(|(_, dev, c)| *dev == d(1) && matches!(c, NwkConfirm::Discovery { .. }))
        .map(|(t, _, _)| t.ticks());
    assert_eq!(discovery_at, Some(3_000_000 + 4 * 76_800));
}

#[test]
fn test_discovery_without_neighbors_finds_nothing() {
    let mut b = Bench::new(Topology::empty(2));
    b.form_at(1.0);
    b.discover_at(1, 3.0);
    b.run();
    assert!(matches!(
        b.confirms_for(1)[0],
        NwkConfirm::Discovery { status: NwkStatus::NoNetworks, .. }
    ));
}

#[test]
fn test_join_assigns_unique_unicast_addresses() {
    let mut b = Bench::new(Topology::fully_connected(5, 200));
    b.join_all();

    let mut seen = BTreeSet::new();
    for i in 1..5 {
        let addr = b.nwk.short_address(d(i)).unwrap();
        assert!(addr.is_assignable(), "{} got {}", i, addr);
        assert!(seen.insert(addr));
        assert!(b.nwk.is_router(d(i)));
        assert!(b
            .confirms_for(i)
            .iter()
            .any(|c| matches!(c, NwkConfirm::StartRouter { .. })));
    }
}

#[test]
fn test_join_confirm_carries_assigned_address() {
    let mut b = Bench::new(Topology::chain(2, 200));
    b.form_at(1.0);
    b.discover_at(1, 3.0);
    b.run();

    let join = b
        .confirms_for(1)
        .into_iter()
        .find_map(|c| match c {
            NwkConfirm::Join { status, address, .. } => Some((*status, *address)),
            _ => None,
        })
        .unwrap();
    assert_eq!(join.0, NwkStatus::Success);
    assert_eq!(Some(join.1), b.nwk.short_address(d(1)));
}

#[test]
fn test_join_unknown_network_is_not_permitted() {
    let mut b = Bench::new(Topology::chain(2, 200));
    b.join_target = Some(0xDEAD);
    b.form_at(1.0);
    b.discover_at(1, 3.0);
    b.run();

    let join = b
        .confirms_for(1)
        .into_iter()
        .find(|c| matches!(c, NwkConfirm::Join { .. }))
        .cloned()
        .unwrap();
    assert!(matches!(
        join,
        NwkConfirm::Join {
            status: NwkStatus::NotPermitted,
            address: ShortAddress::NO_ROUTE,
            ..
        }
    ));
    assert_eq!(b.nwk.short_address(d(1)), None);
}

#[test]
fn test_same_streams_same_addresses() {
    let run = || {
        let mut b = Bench::new(Topology::fully_connected(4, 200));
        b.join_all();
        (0..4).map(|i| b.nwk.short_address(d(i))).collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_resolve_next_hop_neighbor_table_and_unreachable() {
    let mut b = Bench::new(Topology::chain(3, 200));
    b.join_all();
    let a1 = b.nwk.short_address(d(1)).unwrap();
    let a2 = b.nwk.short_address(d(2)).unwrap();

    assert_eq!(
        b.nwk.resolve_next_hop(d(0), a1),
        NextHop { address: a1, neighbor: true }
    );
    assert_eq!(b.nwk.resolve_next_hop(d(0), a2), NextHop::UNREACHABLE);

    b.nwk.set_route(d(0), a2, a1).unwrap();
    assert_eq!(
        b.nwk.resolve_next_hop(d(0), a2),
        NextHop { address: a1, neighbor: false }
    );
    assert_eq!(b.nwk.route_count(d(0)), 1);
    assert_eq!(b.nwk.device_by_address(a2), Some(d(2)));
    assert_eq!(b.nwk.device_by_address(ShortAddress::new(0x7777)), None);
}

#[test]
fn test_send_data_discovers_multi_hop_route() {
    let mut b = Bench::new(Topology::chain(3, 180));
    b.join_all();
    b.send_at(2, 0, 20.0);
    b.run();

    assert_eq!(b.delivered.len(), 1);
    let (at, dev, frame, lqi) = &b.delivered[0];
    assert_eq!(*dev, d(0));
    assert_eq!(frame.hops, 1);
    assert_eq!(*lqi, 180);
    assert!(at.ticks() > 20_000_000);

    let a1 = b.nwk.short_address(d(1)).unwrap();
    let a2 = b.nwk.short_address(d(2)).unwrap();
    assert_eq!(
        b.nwk.resolve_next_hop(d(2), ShortAddress::COORDINATOR),
        NextHop { address: a1, neighbor: false }
    );
    assert_eq!(
        b.nwk.resolve_next_hop(d(0), a2),
        NextHop { address: a1, neighbor: false }
    );
    assert_eq!(b.nwk.stats().route_discoveries, 1);
    assert_eq!(b.nwk.stats().frames_forwarded, 1);
}

#[test]
fn test_send_without_path_is_dropped() {
    let mut b = Bench::new(Topology::chain(3, 200));
    b.join_all();
    b.nwk.set_link_active(d(1), d(2), false);
    b.send_at(2, 0, 20.0);
    b.run();

    assert!(b.delivered.is_empty());
    assert_eq!(b.nwk.stats().no_route_drops, 1);
}

#[test]
fn test_routing_loop_hits_hop_limit() {
    let mut b = Bench::new(Topology::chain(3, 200));
    b.join_all();
    let a1 = b.nwk.short_address(d(1)).unwrap();
    let a2 = b.nwk.short_address(d(2)).unwrap();
    let ghost = ShortAddress::new(0x4242);
    // D1 and D2 point at each other for an address nobody owns.
    b.nwk.set_route(d(1), ghost, a2).unwrap();
    b.nwk.set_route(d(2), ghost, a1).unwrap();

    // Inject the frame at D1 without route discovery.
    b.sim.schedule(VirtualTime::from_secs_f64(21.0), EventType::Noop);
    let Bench { sim, nwk, medium, .. } = &mut b;
    let mut arrivals = Vec::new();
    sim
        .run(&mut |ctx: &mut SimulationContext, e: &Event| -> CoexResult<()> {
            match &e.payload {
                EventType::Noop => nwk.send_data(ctx, medium, d(1), ghost, vec![1; 16], false)?,
                EventType::FrameArrival { device, frame, .. } => {
                    arrivals.push(*device);
                    nwk.on_frame_arrival(ctx, medium, *device, frame.clone())?;
                }
                _ => {}
            }
            Ok(())
        })
        .unwrap();

    assert!(!arrivals.is_empty());
    assert!(arrivals.len() <= 3);
    assert_eq!(nwk.stats().hop_limit_drops, 1);
}

#[test]
fn test_tables_after_multi_hop_discovery() {
    let mut b = Bench::new(Topology::chain(3, 180));
    b.join_all();
    b.send_at(2, 0, 20.0);
    b.run();

    let a0 = ShortAddress::COORDINATOR;
    let a1 = b.nwk.short_address(d(1)).unwrap();
    let a2 = b.nwk.short_address(d(2)).unwrap();
    let entry = |dst, next_hop| RouteEntry { dst, next_hop };

    assert_eq!(b.nwk.routing_table(d(2)), vec![entry(a0, a1)]);
    assert_eq!(b.nwk.routing_table(d(1)), vec![entry(a0, a0), entry(a2, a2)]);
    assert_eq!(b.nwk.routing_table(d(0)), vec![entry(a2, a1)]);

    let relay = b.nwk.neighbor_table(d(1));
    let peers: Vec<(DeviceId, ShortAddress)> = relay.iter().map(|n| (n.device, n.address)).collect();
    assert_eq!(peers, vec![(d(0), a0), (d(2), a2)]);
    assert!(relay.iter().all(|n| n.lqi == 180 && n.active && n.router));
    assert_eq!(relay[1].ext_addr, ExtendedAddress::new(0x1002));

    b.nwk.set_link_active(d(0), d(1), false);
    let tables = b.nwk.tables(d(0), VirtualTime::from_secs_f64(21.0));
    assert_eq!(tables.address, Some(a0));
    assert_eq!(tables.neighbors.len(), 1);
    assert!(!tables.neighbors[0].active);
    let text = tables.to_string();
    assert!(text.contains("Neighbors (1):"));
    assert!(text.contains("Routes (1):"));
    assert!(text.contains("down"));
}

#[test]
fn test_tables_empty_outside_network() {
    let b = Bench::new(Topology::chain(2, 200));
    assert!(b.nwk.neighbor_table(d(1)).is_empty());
    assert!(b.nwk.routing_table(d(1)).is_empty());
    assert!(b.nwk.routing_table(d(9)).is_empty());
}
