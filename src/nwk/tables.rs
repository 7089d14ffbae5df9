//! Read-out of per-device NWK tables: neighbors and routing entries.

use serde::Serialize;

use super::MeshNwk;
use crate::device::{DeviceId, ExtendedAddress, ShortAddress};
use crate::time::VirtualTime;

/// One routing-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub dst: ShortAddress,
    pub next_hop: ShortAddress,
}

/// A same-network device with a radio link to the table owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NeighborEntry {
    pub device: DeviceId,
    pub address: ShortAddress,
    pub ext_addr: ExtendedAddress,
    pub lqi: u8,
    pub active: bool,
    pub router: bool,
}

/// Snapshot of one device's tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NwkTables {
    pub at: VirtualTime,
    pub device: DeviceId,
    pub address: Option<ShortAddress>,
    pub neighbors: Vec<NeighborEntry>,
    pub routes: Vec<RouteEntry>,
}

impl MeshNwk {
    /// Routing entries held by `device`, ordered by destination.
    pub fn routing_table(&self, device: DeviceId) -> Vec<RouteEntry> {
        self.nodes
            .get(device.index())
            .map(|n| {
                n.routing_table
                    .iter()
                    .map(|(&dst, &next_hop)| RouteEntry { dst, next_hop })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Linked devices in the same network as `device`, by id. Inactive
    /// links are listed with `active: false`.
    pub fn neighbor_table(&self, device: DeviceId) -> Vec<NeighborEntry> {
        let Some(own) = self.nodes.get(device.index()).and_then(|n| n.membership) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| {
                let peer = DeviceId::new(i as u32);
                let m = node.membership.filter(|m| m.ext_pan_id == own.ext_pan_id)?;
                if peer == device {
                    return None;
                }
                let link = self.topology.link(device, peer)?;
                Some(NeighborEntry {
                    device: peer,
                    address: m.short_addr,
                    ext_addr: node.ext_addr,
                    lqi: link.lqi,
                    active: link.active,
                    router: node.router,
                })
            })
            .collect()
    }

    pub fn tables(&self, device: DeviceId, at: VirtualTime) -> NwkTables {
        NwkTables {
            at,
            device,
            address: self.short_address(device),
            neighbors: self.neighbor_table(device),
            routes: self.routing_table(device),
        }
    }
}

impl std::fmt::Display for NwkTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let address = self
            .address
            .map_or_else(|| "--:--".to_string(), |a| a.to_string());
        writeln!(f, "Time {} | Node {} [{}] tables:", self.at, self.device, address)?;
        writeln!(f, "  Neighbors ({}):", self.neighbors.len())?;
        for n in &self.neighbors {
            writeln!(
                f,
                "    {:<6} [{} | {}] LQI {:>3} {:<6} {}",
                n.device.to_string(),
                n.address,
                n.ext_addr,
                n.lqi,
                if n.router { "router" } else { "end" },
                if n.active { "up" } else { "down" }
            )?;
        }
        write!(f, "  Routes ({}):", self.routes.len())?;
        for r in &self.routes {
            write!(f, "\n    [{}] → [{}]", r.dst, r.next_hop)?;
        }
        Ok(())
    }
}
