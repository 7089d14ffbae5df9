/// Shared 2.4 GHz medium with deterministic failure injection.
///
/// Every mesh hop and every WLAN frame passes through the `Medium`, which
/// decides latency, random loss, MAC-level duplication and coexistence
/// interference. All randomness comes from one seeded `ChaCha8Rng`, so the
/// same seed gives the same decisions.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::debug;

use crate::time::{VirtualTime, TICKS_PER_SEC};

/// Raw bit rate of an 802.15.4 O-QPSK radio at 2.4 GHz.
pub const MESH_BIT_RATE: u64 = 250_000;

/// PHY + MAC + NWK header bytes added to every mesh payload on air.
const MESH_OVERHEAD_BYTES: u64 = 31;

/// PHY preamble + MAC + IP/UDP header bytes added to every WLAN payload.
const WLAN_OVERHEAD_BYTES: u64 = 64;

// ── Medium Config ─────────────────────────────────────────────────────

/// Medium behaviour. Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediumConfig {
    /// Fixed latency (µs) added to every delivered frame on top of airtime.
    pub base_latency_us: u64,
    /// Random extra latency in `[0, jitter_us)`.
    pub jitter_us: u64,
    pub drop_probability: f64,
    /// Chance that a delivered mesh frame is delivered a second time.
    pub duplicate_probability: f64,
    /// Delay (µs) of the duplicate copy after the original.
    pub retransmit_delay_us: u64,
    /// Chance that a mesh hop overlapping WLAN airtime is lost.
    pub interference_drop_probability: f64,
    /// LQI subtracted from mesh hops that survive WLAN interference.
    pub interference_lqi_penalty: u8,
    /// Chance that a WLAN frame overlapping mesh airtime is lost.
    pub wlan_interference_drop_probability: f64,
    /// WLAN PHY rate in bit/s.
    pub wlan_phy_rate: u64,
}

impl MediumConfig {
    /// No loss, no duplication, no interference effects.
    pub fn reliable() -> Self {
        MediumConfig {
            base_latency_us: 1_000,
            jitter_us: 0,
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            retransmit_delay_us: 2_000,
            interference_drop_probability: 0.0,
            interference_lqi_penalty: 0,
            wlan_interference_drop_probability: 0.0,
            wlan_phy_rate: 65_000_000,
        }
    }
}

impl Default for MediumConfig {
    fn default() -> Self {
        MediumConfig {
            jitter_us: 500,
            interference_drop_probability: 0.3,
            interference_lqi_penalty: 40,
            wlan_interference_drop_probability: 0.05,
            ..Self::reliable()
        }
    }
}

// ── Medium Decision ──────────────────────────────────────────────────

/// Outcome of one transmission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumDecision {
    Delivered {
        latency: u64,
        lqi: u8,
        /// Extra delay of a duplicate copy, if the frame is delivered twice.
        duplicate_after: Option<u64>,
    },
    DroppedByChance,
    DroppedByInterference,
}

/// Per-technology counters, reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MediumStats {
    pub mesh_delivered: u64,
    pub mesh_dropped: u64,
    pub mesh_interference_drops: u64,
    pub mesh_duplicates: u64,
    pub wlan_delivered: u64,
    pub wlan_dropped: u64,
    pub wlan_interference_drops: u64,
}

// ── Medium ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Medium {
    config: MediumConfig,
    rng: ChaCha8Rng,
    wlan_busy_until: VirtualTime,
    mesh_busy_until: VirtualTime,
    stats: MediumStats,
}

impl Medium {
    pub fn new(config: MediumConfig, seed: u64) -> Self {
        Medium {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            wlan_busy_until: VirtualTime::ZERO,
            mesh_busy_until: VirtualTime::ZERO,
            stats: MediumStats::default(),
        }
    }

    pub fn reliable(seed: u64) -> Self {
        Self::new(MediumConfig::reliable(), seed)
    }

    pub fn config(&self) -> &MediumConfig {
        &self.config
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    /// Airtime in ticks of a mesh frame carrying `payload_len` bytes.
    pub fn mesh_airtime(payload_len: usize) -> u64 {
        airtime((payload_len as u64 + MESH_OVERHEAD_BYTES) * 8, MESH_BIT_RATE)
    }

    pub fn wlan_airtime(&self, payload_len: usize) -> u64 {
        airtime(
            (payload_len as u64 + WLAN_OVERHEAD_BYTES) * 8,
            self.config.wlan_phy_rate,
        )
    }

    pub fn wlan_busy(&self, now: VirtualTime) -> bool {
        now.is_before(self.wlan_busy_until)
    }

    pub fn mesh_busy(&self, now: VirtualTime) -> bool {
        now.is_before(self.mesh_busy_until)
    }

    /// Decide the fate of one mesh hop sent at `now` over a link of `lqi`.
    pub fn transmit_mesh(&mut self, now: VirtualTime, payload_len: usize, lqi: u8) -> MediumDecision {
        let airtime = Self::mesh_airtime(payload_len);
        self.mesh_busy_until = self.mesh_busy_until.max(add(now, airtime));

        let mut lqi = lqi;
        if self.wlan_busy(now) {
            if self.chance(self.config.interference_drop_probability) {
                self.stats.mesh_interference_drops += 1;
                debug!(time = %now, "mesh hop lost to WLAN interference");
                return MediumDecision::DroppedByInterference;
            }
            lqi = lqi.saturating_sub(self.config.interference_lqi_penalty).max(1);
        }

        if self.chance(self.config.drop_probability) {
            self.stats.mesh_dropped += 1;
            return MediumDecision::DroppedByChance;
        }

        let latency = airtime + self.config.base_latency_us + self.jitter();
        let duplicate_after = if self.chance(self.config.duplicate_probability) {
            self.stats.mesh_duplicates += 1;
            Some(self.config.retransmit_delay_us.max(1))
        } else {
            None
        };
        self.stats.mesh_delivered += 1;
        MediumDecision::Delivered {
            latency,
            lqi,
            duplicate_after,
        }
    }

    /// Decide the fate of one WLAN frame sent at `now`.
    pub fn transmit_wlan(&mut self, now: VirtualTime, payload_len: usize) -> MediumDecision {
        let airtime = self.wlan_airtime(payload_len);
        self.wlan_busy_until = self.wlan_busy_until.max(add(now, airtime));

        if self.mesh_busy(now) && self.chance(self.config.wlan_interference_drop_probability) {
            self.stats.wlan_interference_drops += 1;
            return MediumDecision::DroppedByInterference;
        }
        if self.chance(self.config.drop_probability) {
            self.stats.wlan_dropped += 1;
            return MediumDecision::DroppedByChance;
        }

        let latency = airtime + self.config.base_latency_us + self.jitter();
        self.stats.wlan_delivered += 1;
        MediumDecision::Delivered {
            latency,
            lqi: u8::MAX,
            duplicate_after: None,
        }
    }

    /// Draws from the RNG only when `p > 0`, so disabled features leave the
    /// random stream untouched.
    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen::<f64>() < p
    }

    fn jitter(&mut self) -> u64 {
        if self.config.jitter_us > 0 {
            self.rng.gen_range(0..self.config.jitter_us)
        } else {
            0
        }
    }
}

fn airtime(bits: u64, rate: u64) -> u64 {
    if rate == 0 {
        return 0;
    }
    (bits * TICKS_PER_SEC).div_ceil(rate)
}

fn add(t: VirtualTime, ticks: u64) -> VirtualTime {
    t.advance(ticks).unwrap_or(VirtualTime::new(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_medium_delivers_everything() {
        let mut m = Medium::reliable(1);
        for i in 0..100 {
            let d = m.transmit_mesh(VirtualTime::new(i * 10_000), 16, 200);
            assert!(matches!(
                d,
                MediumDecision::Delivered { lqi: 200, duplicate_after: None, .. }
            ));
        }
        assert_eq!(m.stats().mesh_delivered, 100);
    }

    #[test]
    fn test_mesh_airtime_at_250k() {
        // (16 + 31) bytes * 8 bits / 250 kb/s = 1504 µs.
        assert_eq!(Medium::mesh_airtime(16), 1_504);
    }

    #[test]
    fn test_same_seed_same_decisions() {
        let cfg = MediumConfig {
            drop_probability: 0.3,
            duplicate_probability: 0.2,
            jitter_us: 1_000,
            ..MediumConfig::reliable()
        };
        let run = |seed| {
            let mut m = Medium::new(cfg.clone(), seed);
            (0..50)
                .map(|i| m.transmit_mesh(VirtualTime::new(i * 100_000), 20, 150))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_wlan_airtime_interferes_with_mesh() {
        let cfg = MediumConfig {
            interference_drop_probability: 1.0,
            ..MediumConfig::reliable()
        };
        let mut m = Medium::new(cfg, 3);
        let now = VirtualTime::new(1_000);
        m.transmit_wlan(now, 1472);
        assert!(m.wlan_busy(now));
        assert_eq!(
            m.transmit_mesh(now, 16, 200),
            MediumDecision::DroppedByInterference
        );
        assert_eq!(m.stats().mesh_interference_drops, 1);

        // Once the WLAN frame is off the air the mesh hop goes through.
        let later = VirtualTime::new(1_000_000);
        assert!(matches!(
            m.transmit_mesh(later, 16, 200),
            MediumDecision::Delivered { .. }
        ));
    }

    #[test]
    fn test_interference_lowers_lqi() {
        let cfg = MediumConfig {
            interference_lqi_penalty: 50,
            ..MediumConfig::reliable()
        };
        let mut m = Medium::new(cfg, 3);
        let now = VirtualTime::new(0);
        m.transmit_wlan(now, 1472);
        match m.transmit_mesh(now, 16, 120) {
            MediumDecision::Delivered { lqi, .. } => assert_eq!(lqi, 70),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicates_are_flagged() {
        let cfg = MediumConfig {
            duplicate_probability: 1.0,
            ..MediumConfig::reliable()
        };
        let mut m = Medium::new(cfg, 9);
        assert!(matches!(
            m.transmit_mesh(VirtualTime::ZERO, 16, 255),
            MediumDecision::Delivered { duplicate_after: Some(2_000), .. }
        ));
        assert_eq!(m.stats().mesh_duplicates, 1);
    }
}
