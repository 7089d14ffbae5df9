//! Radio connectivity between mesh devices.

use std::collections::BTreeMap;

use crate::device::DeviceId;

/// An undirected radio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Link quality indicator reported for frames on this link.
    pub lqi: u8,
    /// Whether the link is currently usable.
    pub active: bool,
}

impl Link {
    pub fn new(lqi: u8) -> Self {
        Link { lqi, active: true }
    }
}

impl Default for Link {
    fn default() -> Self {
        Link::new(255)
    }
}

/// Connectivity between `device_count` devices, indexed `0..device_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    device_count: usize,
    links: BTreeMap<(DeviceId, DeviceId), Link>,
}

impl Topology {
    /// No links at all.
    pub fn empty(device_count: usize) -> Self {
        Topology {
            device_count,
            links: BTreeMap::new(),
        }
    }

    /// Every pair of devices can hear each other.
    pub fn fully_connected(device_count: usize, lqi: u8) -> Self {
        let mut topo = Self::empty(device_count);
        for a in 0..device_count {
            for b in (a + 1)..device_count {
                topo.add_link(id(a), id(b), Link::new(lqi));
            }
        }
        topo
    }

    /// Device i hears only i-1 and i+1.
    pub fn chain(device_count: usize, lqi: u8) -> Self {
        let mut topo = Self::empty(device_count);
        for a in 1..device_count {
            topo.add_link(id(a - 1), id(a), Link::new(lqi));
        }
        topo
    }

    /// Device 0 is the hub; every other device hears only the hub.
    pub fn star(device_count: usize, lqi: u8) -> Self {
        let mut topo = Self::empty(device_count);
        for spoke in 1..device_count {
            topo.add_link(id(0), id(spoke), Link::new(lqi));
        }
        topo
    }

    /// Devices evenly spaced on a circle of `radius_m`, linked when at most
    /// `range_m` apart. LQI falls linearly from 255 at zero distance to 1
    /// at the edge of the range.
    pub fn circle(device_count: usize, radius_m: f64, range_m: f64) -> Self {
        let mut topo = Self::empty(device_count);
        if device_count < 2 || range_m <= 0.0 {
            return topo;
        }
        let positions: Vec<(f64, f64)> = (0..device_count)
            .map(|i| {
                let theta = std::f64::consts::TAU * i as f64 / device_count as f64;
                (radius_m * theta.cos(), radius_m * theta.sin())
            })
            .collect();
        for a in 0..device_count {
            for b in (a + 1)..device_count {
                let dx = positions[a].0 - positions[b].0;
                let dy = positions[a].1 - positions[b].1;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist <= range_m + 1e-9 {
                    topo.add_link(id(a), id(b), Link::new(lqi_for_distance(dist, range_m)));
                }
            }
        }
        topo
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    /// Add (or replace) the link between `a` and `b`.
    pub fn add_link(&mut self, a: DeviceId, b: DeviceId, link: Link) {
        self.links.insert(canonical_pair(a, b), link);
    }

    pub fn link(&self, a: DeviceId, b: DeviceId) -> Option<&Link> {
        self.links.get(&canonical_pair(a, b))
    }

    /// Bring a link up or down. Returns `false` if the link does not exist.
    pub fn set_active(&mut self, a: DeviceId, b: DeviceId, active: bool) -> bool {
        match self.links.get_mut(&canonical_pair(a, b)) {
            Some(link) => {
                link.active = active;
                true
            }
            None => false,
        }
    }

    /// Link exists and is active.
    pub fn is_connected(&self, a: DeviceId, b: DeviceId) -> bool {
        a != b && self.link(a, b).is_some_and(|l| l.active)
    }

    /// Devices reachable over one active link, in ascending id order.
    pub fn neighbors(&self, device: DeviceId) -> Vec<DeviceId> {
        (0..self.device_count)
            .map(id)
            .filter(|&other| self.is_connected(device, other))
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

fn id(index: usize) -> DeviceId {
    DeviceId::new(index as u32)
}

fn canonical_pair(a: DeviceId, b: DeviceId) -> (DeviceId, DeviceId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn lqi_for_distance(dist: f64, range: f64) -> u8 {
    let q = 255.0 * (1.0 - dist / range);
    q.round().clamp(1.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(i: u32) -> DeviceId {
        DeviceId::new(i)
    }

    #[test]
    fn test_chain_neighbors() {
        let t = Topology::chain(4, 200);
        assert_eq!(t.neighbors(d(0)), vec![d(1)]);
        assert_eq!(t.neighbors(d(2)), vec![d(1), d(3)]);
        assert!(!t.is_connected(d(0), d(2)));
        assert_eq!(t.link_count(), 3);
    }

    #[test]
    fn test_star_and_full() {
        let star = Topology::star(4, 100);
        assert_eq!(star.neighbors(d(0)), vec![d(1), d(2), d(3)]);
        assert_eq!(star.neighbors(d(3)), vec![d(0)]);

        let full = Topology::fully_connected(4, 100);
        assert_eq!(full.link_count(), 6);
        assert_eq!(full.link(d(3), d(1)).map(|l| l.lqi), Some(100));
    }

    #[test]
    fn test_circle_range() {
        // Five devices on a 10 m circle: adjacent ≈ 11.8 m, opposite ≈ 19.0 m.
        let ring = Topology::circle(5, 10.0, 15.0);
        assert_eq!(ring.neighbors(d(0)), vec![d(1), d(4)]);

        let full = Topology::circle(5, 10.0, 20.0);
        assert_eq!(full.link_count(), 10);
        let near = full.link(d(0), d(1)).map(|l| l.lqi).unwrap();
        let far = full.link(d(0), d(2)).map(|l| l.lqi).unwrap();
        assert!(near > far);
        assert!(far >= 1);
    }

    #[test]
    fn test_link_toggle() {
        let mut t = Topology::chain(3, 255);
        assert!(t.set_active(d(2), d(1), false));
        assert!(!t.is_connected(d(1), d(2)));
        assert_eq!(t.neighbors(d(1)), vec![d(0)]);
        assert!(t.set_active(d(1), d(2), true));
        assert!(t.is_connected(d(2), d(1)));
        assert!(!t.set_active(d(0), d(2), false));
    }
}
