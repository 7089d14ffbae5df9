/// Scenario configuration.
///
/// Every field has a default, so a partial TOML file (or none at all)
/// describes the reference scenario: one coordinator and four routers on
/// a 10 m circle, heartbeats every 0.5 s from t = 16 s, one route trace,
/// WLAN traffic disabled.
///
/// ```toml
/// seed = 7
/// mesh_devices = 5
/// simulation_time = 60.0
///
/// [heartbeat]
/// interval = 0.25
/// payload_size = 32
///
/// [[trace]]
/// at = 20.0
/// src = 0
/// dst = 4
/// ```

use std::path::Path;

use serde::Deserialize;

use crate::device::DeviceId;
use crate::error::{CoexError, CoexResult};
use crate::heartbeat::HEADER_LEN;
use crate::medium::MediumConfig;
use crate::nwk::{ChannelMask, Link, NwkConfig, Topology};
use crate::orchestrator::{JoinParams, JoinPolicy};
use crate::time::secs_to_ticks;
use crate::wlan::WlanConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub seed: u64,
    /// Coordinator included.
    pub mesh_devices: usize,
    /// Seconds.
    pub simulation_time: f64,
    pub join: JoinConfig,
    pub heartbeat: HeartbeatConfig,
    /// Route traces; `None` means one trace from the coordinator to the
    /// last device shortly after heartbeats start.
    pub trace: Option<Vec<TraceConfig>>,
    pub topology: TopologyConfig,
    pub medium: MediumConfig,
    pub nwk: NwkConfig,
    pub wlan: WlanConfig,
    /// Scheduled link failures and repairs.
    pub link_event: Vec<LinkEventConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            seed: 1,
            mesh_devices: 5,
            simulation_time: 60.0,
            join: JoinConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            trace: None,
            topology: TopologyConfig::default(),
            medium: MediumConfig::default(),
            nwk: NwkConfig::default(),
            wlan: WlanConfig::default(),
            link_event: Vec::new(),
        }
    }
}

/// `[join]`: when and how devices enter the network. Times in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub formation_time: f64,
    pub formation_mask: ChannelMask,
    pub formation_scan_duration: u8,
    /// Router *i* (1-based) starts discovery at
    /// `discovery_start + (i - 1) × discovery_stagger`.
    pub discovery_start: f64,
    pub discovery_stagger: f64,
    pub discovery_mask: ChannelMask,
    pub discovery_scan_duration: u8,
    pub retry: JoinPolicy,
}

impl Default for JoinConfig {
    fn default() -> Self {
        let params = JoinParams::default();
        JoinConfig {
            formation_time: 1.0,
            formation_mask: params.formation_mask,
            formation_scan_duration: params.formation_scan_duration,
            discovery_start: 3.0,
            discovery_stagger: 1.0,
            discovery_mask: params.discovery_mask,
            discovery_scan_duration: params.discovery_scan_duration,
            retry: params.policy,
        }
    }
}

impl JoinConfig {
    pub fn params(&self) -> JoinParams {
        JoinParams {
            formation_mask: self.formation_mask,
            formation_scan_duration: self.formation_scan_duration,
            discovery_mask: self.discovery_mask,
            discovery_scan_duration: self.discovery_scan_duration,
            policy: self.retry,
        }
    }

    /// Discovery start of mesh device `index` (coordinator is 0).
    pub fn discovery_time(&self, index: usize) -> f64 {
        self.discovery_start + index.saturating_sub(1) as f64 * self.discovery_stagger
    }
}

/// `[heartbeat]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds.
    pub start: f64,
    /// Seconds.
    pub interval: f64,
    /// Total payload bytes, header included.
    pub payload_size: usize,
    /// Source → destination pairs; `None` means every router sends to the
    /// coordinator.
    pub pairs: Option<Vec<PairConfig>>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            start: 16.0,
            interval: 0.5,
            payload_size: HEADER_LEN,
            pairs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PairConfig {
    pub src: u32,
    pub dst: u32,
}

/// `[[trace]]`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TraceConfig {
    /// Seconds.
    pub at: f64,
    pub src: u32,
    pub dst: u32,
}

/// `[[link_event]]`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LinkEventConfig {
    /// Seconds.
    pub at: f64,
    pub a: u32,
    pub b: u32,
    pub active: bool,
}

// ── Topology ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    #[default]
    Circle,
    Chain,
    Star,
    FullyConnected,
    /// Only the links listed in `links`.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    pub a: u32,
    pub b: u32,
    #[serde(default = "max_lqi")]
    pub lqi: u8,
}

fn max_lqi() -> u8 {
    u8::MAX
}

/// `[topology]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub kind: TopologyKind,
    /// Circle radius, meters.
    pub radius: f64,
    /// Radio range, meters.
    pub range: f64,
    /// LQI of every link in the regular layouts.
    pub lqi: u8,
    /// Added on top of the layout (the whole topology for `explicit`).
    pub links: Vec<LinkConfig>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            kind: TopologyKind::Circle,
            radius: 10.0,
            range: 20.0,
            lqi: u8::MAX,
            links: Vec::new(),
        }
    }
}

impl TopologyConfig {
    pub fn build(&self, devices: usize) -> Topology {
        let mut topology = match self.kind {
            TopologyKind::Circle => Topology::circle(devices, self.radius, self.range),
            TopologyKind::Chain => Topology::chain(devices, self.lqi),
            TopologyKind::Star => Topology::star(devices, self.lqi),
            TopologyKind::FullyConnected => Topology::fully_connected(devices, self.lqi),
            TopologyKind::Explicit => Topology::empty(devices),
        };
        for l in &self.links {
            topology.add_link(DeviceId::new(l.a), DeviceId::new(l.b), Link::new(l.lqi));
        }
        topology
    }
}

// ── Loading ───────────────────────────────────────────────────────────

impl ScenarioConfig {
    /// Read a TOML scenario file. Validation is left to the caller, so
    /// command-line overrides can still be applied.
    pub fn load(path: &Path) -> CoexResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoexError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Reject configurations no run could salvage.
    pub fn validate(&self) -> CoexResult<()> {
        if self.heartbeat.payload_size < HEADER_LEN {
            return Err(CoexError::PayloadTooSmall {
                size: self.heartbeat.payload_size,
                min: HEADER_LEN,
            });
        }
        if self.mesh_devices == 0 {
            return Err(invalid("mesh_devices must be at least 1"));
        }
        if self.mesh_devices > usize::from(u16::MAX) {
            return Err(invalid("mesh_devices exceeds the network address space"));
        }
        positive("simulation_time", self.simulation_time)?;
        positive("heartbeat.interval", self.heartbeat.interval)?;
        if secs_to_ticks(self.heartbeat.interval) == 0 {
            return Err(invalid("heartbeat.interval is below the 1 µs clock resolution"));
        }
        non_negative("heartbeat.start", self.heartbeat.start)?;
        non_negative("join.formation_time", self.join.formation_time)?;
        non_negative("join.discovery_start", self.join.discovery_start)?;
        non_negative("join.discovery_stagger", self.join.discovery_stagger)?;
        non_negative("join.retry.retry_backoff", self.join.retry.retry_backoff)?;
        non_negative("wlan.start", self.wlan.start)?;

        let m = &self.medium;
        for (name, p) in [
            ("medium.drop_probability", m.drop_probability),
            ("medium.duplicate_probability", m.duplicate_probability),
            ("medium.interference_drop_probability", m.interference_drop_probability),
            ("medium.wlan_interference_drop_probability", m.wlan_interference_drop_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(format!("{} must be within [0, 1], got {}", name, p)));
            }
        }

        for (name, mask) in [
            ("join.formation_mask", self.join.formation_mask),
            ("join.discovery_mask", self.join.discovery_mask),
        ] {
            if ChannelMask::new(mask.bits()) != mask {
                return Err(invalid(format!(
                    "{} 0x{:08x} selects channels outside 11-26",
                    name,
                    mask.bits()
                )));
            }
        }

        let n = self.mesh_devices;
        for p in self.heartbeat.pairs.iter().flatten() {
            self.check_device("heartbeat.pairs", p.src)?;
            self.check_device("heartbeat.pairs", p.dst)?;
            if p.src == p.dst {
                return Err(invalid(format!("heartbeat pair {} → {} sends to itself", p.src, p.dst)));
            }
        }
        for t in self.trace.iter().flatten() {
            self.check_device("trace", t.src)?;
            self.check_device("trace", t.dst)?;
            non_negative("trace.at", t.at)?;
        }
        for l in &self.topology.links {
            self.check_device("topology.links", l.a)?;
            self.check_device("topology.links", l.b)?;
        }
        for e in &self.link_event {
            self.check_device("link_event", e.a)?;
            self.check_device("link_event", e.b)?;
            non_negative("link_event.at", e.at)?;
        }
        if self.topology.kind == TopologyKind::Circle && n > 1 {
            positive("topology.radius", self.topology.radius)?;
            positive("topology.range", self.topology.range)?;
        }
        Ok(())
    }

    fn check_device(&self, section: &str, index: u32) -> CoexResult<()> {
        if index as usize >= self.mesh_devices {
            return Err(invalid(format!(
                "{}: device {} out of range (mesh_devices = {})",
                section, index, self.mesh_devices
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> CoexError {
    CoexError::InvalidScenario(msg.into())
}

fn positive(name: &str, value: f64) -> CoexResult<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must be positive, got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f64) -> CoexResult<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must not be negative, got {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_describe_reference_scenario() {
        let c = ScenarioConfig::default();
        assert_eq!(c.mesh_devices, 5);
        assert_eq!(c.simulation_time, 60.0);
        assert_eq!(c.heartbeat.start, 16.0);
        assert_eq!(c.heartbeat.interval, 0.5);
        assert_eq!(c.heartbeat.payload_size, 16);
        assert_eq!(c.join.discovery_time(1), 3.0);
        assert_eq!(c.join.discovery_time(4), 6.0);
        assert_eq!(c.join.params(), JoinParams::default());
        assert!(!c.wlan.is_enabled());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c: ScenarioConfig = toml::from_str(
            r#"
            seed = 9
            [heartbeat]
            interval = 0.25
            [join.retry]
            max_retries = 3
            [[trace]]
            at = 20.0
            src = 1
            dst = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.seed, 9);
        assert_eq!(c.heartbeat.interval, 0.25);
        assert_eq!(c.heartbeat.start, 16.0);
        assert_eq!(c.join.retry.max_retries, 3);
        assert_eq!(c.join.retry.retry_backoff, 1.0);
        assert_eq!(c.trace.as_deref().map(<[_]>::len), Some(1));
        assert_eq!(c.mesh_devices, 5);
    }

    #[test]
    fn test_small_payload_is_fatal() {
        let mut c = ScenarioConfig::default();
        c.heartbeat.payload_size = 15;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, CoexError::PayloadTooSmall { size: 15, min: 16 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_out_of_range_devices() {
        let mut c = ScenarioConfig::default();
        c.trace = Some(vec![TraceConfig {
            at: 20.0,
            src: 0,
            dst: 5,
        }]);
        assert!(matches!(c.validate(), Err(CoexError::InvalidScenario(_))));

        let mut c = ScenarioConfig::default();
        c.mesh_devices = 0;
        assert!(matches!(c.validate(), Err(CoexError::InvalidScenario(_))));
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let mut c = ScenarioConfig::default();
        c.heartbeat.interval = 0.0;
        assert!(c.validate().is_err());
        c.heartbeat.interval = f64::NAN;
        assert!(c.validate().is_err());
        c.heartbeat.interval = 1e-9;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_mask_outside_band() {
        let c: ScenarioConfig = toml::from_str("[join]\ndiscovery_mask = 1").unwrap();
        assert!(matches!(c.validate(), Err(CoexError::InvalidScenario(_))));
    }

    #[test]
    fn test_topology_kinds() {
        let chain: ScenarioConfig = toml::from_str(
            r#"
            [topology]
            kind = "chain"
            lqi = 200
            "#,
        )
        .unwrap();
        let t = chain.topology.build(5);
        assert_eq!(t.link_count(), 4);
        assert_eq!(t.link(DeviceId::new(1), DeviceId::new(2)).map(|l| l.lqi), Some(200));

        let explicit: ScenarioConfig = toml::from_str(
            r#"
            [topology]
            kind = "explicit"
            links = [{ a = 0, b = 1 }, { a = 1, b = 2, lqi = 90 }]
            "#,
        )
        .unwrap();
        let t = explicit.topology.build(3);
        assert_eq!(t.link_count(), 2);
        assert!(!t.is_connected(DeviceId::new(0), DeviceId::new(2)));
        assert_eq!(t.link(DeviceId::new(0), DeviceId::new(1)).map(|l| l.lqi), Some(255));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mesh_devices = 3\nsimulation_time = 30.0").unwrap();
        let c = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(c.mesh_devices, 3);
        assert_eq!(c.simulation_time, 30.0);
    }

    #[test]
    fn test_load_errors() {
        let missing = ScenarioConfig::load(Path::new("/nonexistent/meshcoex.toml"));
        assert!(matches!(missing, Err(CoexError::ConfigRead { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mesh_devices = \"five\"").unwrap();
        assert!(matches!(
            ScenarioConfig::load(file.path()),
            Err(CoexError::ConfigParse(_))
        ));
    }
}
