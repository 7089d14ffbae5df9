/// Scenario assembly.
///
/// Turns a [`ScenarioConfig`] into a scheduled `Simulation` plus the
/// `CoexRuntime` that handles it: devices with their seeded streams, the
/// NWK layer over the configured topology, the shared medium, and the
/// initial events (formation, staggered discovery, heartbeat schedules,
/// route traces, WLAN flows, link events).

use tracing::info;

use crate::config::{LinkEventConfig, PairConfig, ScenarioConfig, TraceConfig};
use crate::device::{Device, DeviceId, ExtendedAddress};
use crate::error::CoexResult;
use crate::event::EventType;
use crate::heartbeat::HeartbeatEngine;
use crate::medium::Medium;
use crate::nwk::MeshNwk;
use crate::report::SimulationReport;
use crate::runtime::CoexRuntime;
use crate::simulation::Simulation;
use crate::time::{secs_to_ticks, VirtualTime};
use crate::wlan::WlanTraffic;

/// Offset of the medium's stream from the device streams.
const MEDIUM_STREAM: u64 = 1 << 32;

/// Seconds between heartbeat start and the default route trace.
const DEFAULT_TRACE_DELAY: f64 = 3.0;

/// Device 0 is the coordinator; device `i` draws its protocol jitter from
/// stream `seed + 10 i`.
pub fn build_devices(count: usize, seed: u64) -> Vec<Device> {
    (0..count)
        .map(|i| {
            let id = DeviceId::new(i as u32);
            let stream = seed.wrapping_add(i as u64 * 10);
            if i == 0 {
                Device::coordinator(id, ExtendedAddress::COORDINATOR, stream)
            } else {
                Device::router(id, ExtendedAddress::new(i as u64), stream)
            }
        })
        .collect()
}

// ── Scenario ──────────────────────────────────────────────────────────

/// A fully scheduled run, ready to execute.
pub struct Scenario {
    seed: u64,
    end: VirtualTime,
    sim: Simulation,
    runtime: CoexRuntime,
}

impl Scenario {
    /// Validate `config` and schedule every initial event.
    pub fn from_config(config: &ScenarioConfig) -> CoexResult<Self> {
        config.validate()?;

        let n = config.mesh_devices;
        let devices = build_devices(n, config.seed);
        let nwk = MeshNwk::new(config.nwk.clone(), config.topology.build(n), &devices);
        let medium = Medium::new(config.medium.clone(), config.seed.wrapping_add(MEDIUM_STREAM));
        let heartbeat = HeartbeatEngine::new(config.heartbeat.payload_size)?;
        let end = VirtualTime::from_secs_f64(config.simulation_time);
        let wlan = WlanTraffic::new(config.wlan.clone(), end);
        let runtime = CoexRuntime::new(devices, nwk, medium, config.join.params(), heartbeat, wlan);

        let mut scenario = Scenario {
            seed: config.seed,
            end,
            sim: Simulation::new(),
            runtime,
        };
        scenario.schedule_join(config);
        scenario.schedule_heartbeats(config);
        scenario.schedule_traces(config);
        scenario.schedule_wlan();
        scenario.schedule_link_events(&config.link_event);
        Ok(scenario)
    }

    pub fn runtime(&self) -> &CoexRuntime {
        &self.runtime
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn end_time(&self) -> VirtualTime {
        self.end
    }

    /// Hand out the scheduled simulation and its runtime, for callers that
    /// want to step the run themselves.
    pub fn into_parts(self) -> (Simulation, CoexRuntime) {
        (self.sim, self.runtime)
    }

    /// Run to the end of the simulation window and collect the report.
    ///
    /// A fatal error aborts the run and is returned instead of a report.
    pub fn run(mut self) -> CoexResult<SimulationReport> {
        self.sim.run_until(self.end, &mut self.runtime)?;
        info!(
            events = self.sim.events_processed(),
            time = %self.sim.current_time(),
            "simulation finished"
        );
        Ok(SimulationReport::collect(
            &self.runtime,
            self.seed,
            self.sim.current_time(),
            self.sim.events_processed(),
        ))
    }

    // ── Initial events ───────────────────────────────────────────

    fn schedule_join(&mut self, config: &ScenarioConfig) {
        let coord = DeviceId::new(0);
        self.sim.schedule(
            VirtualTime::ZERO,
            EventType::Log(format!(
                "{} mesh devices, {} WLAN stations, seed {}",
                config.mesh_devices,
                self.runtime.wlan().flow_count(),
                config.seed
            )),
        );
        self.sim.schedule_with_context(
            VirtualTime::from_secs_f64(config.join.formation_time),
            coord,
            EventType::FormNetwork { device: coord },
        );
        for i in 1..config.mesh_devices {
            let device = DeviceId::new(i as u32);
            self.sim.schedule_with_context(
                VirtualTime::from_secs_f64(config.join.discovery_time(i)),
                device,
                EventType::DiscoverNetworks { device },
            );
        }
    }

    fn schedule_heartbeats(&mut self, config: &ScenarioConfig) {
        let hb = &config.heartbeat;
        let pairs = hb.pairs.clone().unwrap_or_else(|| {
            (1..config.mesh_devices as u32)
                .map(|src| PairConfig { src, dst: 0 })
                .collect()
        });
        let start = VirtualTime::from_secs_f64(hb.start);
        let interval = secs_to_ticks(hb.interval);
        for p in pairs {
            let src = DeviceId::new(p.src);
            self.sim.schedule_with_context(
                start,
                src,
                EventType::HeartbeatTick {
                    src,
                    dst: DeviceId::new(p.dst),
                    interval,
                },
            );
        }
    }

    fn schedule_traces(&mut self, config: &ScenarioConfig) {
        let traces = config.trace.clone().unwrap_or_else(|| {
            vec![TraceConfig {
                at: config.heartbeat.start + DEFAULT_TRACE_DELAY,
                src: 0,
                dst: config.mesh_devices.saturating_sub(1) as u32,
            }]
        });
        for t in traces {
            self.sim.schedule(
                VirtualTime::from_secs_f64(t.at),
                EventType::TraceRoute {
                    src: DeviceId::new(t.src),
                    dst: DeviceId::new(t.dst),
                },
            );
        }
    }

    fn schedule_wlan(&mut self) {
        let start = self.runtime.wlan().start_time();
        for flow in 0..self.runtime.wlan().flow_count() {
            self.sim.schedule(start, EventType::WlanTx { flow });
        }
    }

    fn schedule_link_events(&mut self, events: &[LinkEventConfig]) {
        for e in events {
            self.sim.schedule(
                VirtualTime::from_secs_f64(e.at),
                EventType::SetLinkActive {
                    a: DeviceId::new(e.a),
                    b: DeviceId::new(e.b),
                    active: e.active,
                },
            );
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────

/// Fluent overrides on top of a base configuration.
///
/// ```rust
/// use meshcoex::scenario::ScenarioBuilder;
///
/// let report = ScenarioBuilder::new()
///     .seed(7)
///     .mesh_devices(3)
///     .simulation_time(20.0)
///     .trace(18.0, 0, 2)
///     .build()
///     .unwrap()
///     .run()
///     .unwrap();
/// assert!(report.ready_at.is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScenarioBuilder {
    config: ScenarioConfig,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ScenarioConfig) -> Self {
        ScenarioBuilder { config }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn mesh_devices(mut self, n: usize) -> Self {
        self.config.mesh_devices = n;
        self
    }

    pub fn simulation_time(mut self, secs: f64) -> Self {
        self.config.simulation_time = secs;
        self
    }

    pub fn payload_size(mut self, bytes: usize) -> Self {
        self.config.heartbeat.payload_size = bytes;
        self
    }

    pub fn heartbeat_interval(mut self, secs: f64) -> Self {
        self.config.heartbeat.interval = secs;
        self
    }

    /// Add a route trace. The first call replaces the default trace.
    pub fn trace(mut self, at: f64, src: u32, dst: u32) -> Self {
        self.config
            .trace
            .get_or_insert_with(Vec::new)
            .push(TraceConfig { at, src, dst });
        self
    }

    pub fn link_event(mut self, at: f64, a: u32, b: u32, active: bool) -> Self {
        self.config.link_event.push(LinkEventConfig { at, a, b, active });
        self
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ScenarioConfig {
        &mut self.config
    }

    pub fn build(self) -> CoexResult<Scenario> {
        Scenario::from_config(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoexError;

    #[test]
    fn test_device_streams_and_addresses() {
        let devices = build_devices(3, 100);
        assert!(devices[0].is_coordinator());
        assert_eq!(devices[0].ext_addr(), ExtendedAddress::COORDINATOR);
        assert_eq!(devices[2].ext_addr(), ExtendedAddress::new(2));
        let seeds: Vec<u64> = devices.iter().map(Device::stream_seed).collect();
        assert_eq!(seeds, vec![100, 110, 120]);
    }

    #[test]
    fn test_initial_schedule() {
        let scenario = ScenarioBuilder::new().build().unwrap();
        // Log, formation, 4 discoveries, 4 heartbeat schedules, 1 trace.
        assert_eq!(scenario.simulation().pending_count(), 11);
        assert_eq!(scenario.end_time(), VirtualTime::from_secs_f64(60.0));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let err = ScenarioBuilder::new().payload_size(8).build().err().unwrap();
        assert!(matches!(err, CoexError::PayloadTooSmall { size: 8, .. }));
    }

    #[test]
    fn test_explicit_traces_replace_default() {
        let b = ScenarioBuilder::new().trace(20.0, 1, 2).trace(21.0, 2, 1);
        assert_eq!(b.config().trace.as_ref().map(Vec::len), Some(2));
    }
}
