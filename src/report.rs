/// End-of-run report.
///
/// Computed from whatever state exists when the simulation window closes,
/// regardless of partial failures. `Display` renders the text report;
/// `Serialize` backs the `--json` output.

use serde::Serialize;

use crate::device::{DeviceId, ExtendedAddress, JoinPhase, Role, ShortAddress};
use crate::error::CoexResult;
use crate::medium::MediumStats;
use crate::nwk::{NwkStats, NwkTables};
use crate::orchestrator::PhaseTransition;
use crate::qos::{AnomalyCounters, QosRow};
use crate::route::RouteTrace;
use crate::runtime::CoexRuntime;
use crate::time::VirtualTime;
use crate::wlan::FlowReport;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRow {
    pub id: DeviceId,
    pub ext_addr: ExtendedAddress,
    pub short_addr: Option<ShortAddress>,
    pub role: Role,
    pub phase: JoinPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub end_time: VirtualTime,
    pub events_processed: u64,
    /// When the readiness flag flipped, if it ever did.
    pub ready_at: Option<VirtualTime>,
    pub devices: Vec<DeviceRow>,
    /// Every join phase change, in event order.
    pub timeline: Vec<PhaseTransition>,
    pub qos: Vec<QosRow>,
    pub anomalies: AnomalyCounters,
    pub skipped_heartbeats: u64,
    pub traces: Vec<RouteTrace>,
    /// Neighbor and routing tables of each trace source.
    pub tables: Vec<NwkTables>,
    pub wlan: Vec<FlowReport>,
    pub medium: MediumStats,
    pub nwk: NwkStats,
}

impl SimulationReport {
    pub fn collect(
        runtime: &CoexRuntime,
        seed: u64,
        end_time: VirtualTime,
        events_processed: u64,
    ) -> Self {
        let devices = runtime
            .devices()
            .iter()
            .map(|d| DeviceRow {
                id: d.id(),
                ext_addr: d.ext_addr(),
                short_addr: d.short_addr(),
                role: d.role(),
                phase: d.phase(),
            })
            .collect();
        SimulationReport {
            seed,
            end_time,
            events_processed,
            ready_at: runtime.orchestrator().ready_at(),
            devices,
            timeline: runtime.orchestrator().transitions().to_vec(),
            qos: runtime.qos().summarize(),
            anomalies: runtime.qos().anomalies(),
            skipped_heartbeats: runtime.skipped_heartbeats(),
            traces: runtime.traces().to_vec(),
            tables: runtime.tables().to_vec(),
            wlan: runtime.wlan().report(end_time),
            medium: runtime.medium().stats().clone(),
            nwk: runtime.nwk().stats().clone(),
        }
    }

    pub fn to_json(&self) -> CoexResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Row for `device`, if it has a QoS accumulator.
    pub fn qos_for(&self, device: DeviceId) -> Option<&QosRow> {
        self.qos.iter().find(|r| r.device == device)
    }
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Seed {} | simulated {} | {} events",
            self.seed, self.end_time, self.events_processed
        )?;
        match self.ready_at {
            Some(t) => writeln!(f, "Network ready at {}", t)?,
            None => writeln!(f, "Network never became ready")?,
        }

        writeln!(f, "\n-- Devices --")?;
        writeln!(
            f,
            "{:<6} {:<23} {:<6} {:<12} {}",
            "Id", "ExtAddr", "Short", "Role", "Phase"
        )?;
        for d in &self.devices {
            let short = d.short_addr.map_or_else(|| "--:--".to_string(), |a| a.to_string());
            writeln!(
                f,
                "{:<6} {:<23} {:<6} {:<12} {}",
                d.id.to_string(),
                d.ext_addr.to_string(),
                short,
                d.role.to_string(),
                d.phase
            )?;
        }

        writeln!(f, "\n-- Join timeline --")?;
        for t in &self.timeline {
            writeln!(f, "{}", t)?;
        }

        writeln!(f, "\n-- Heartbeat QoS --")?;
        writeln!(
            f,
            "{:<6} {:>6} {:>8} {:>7} {:>13} {:>8}",
            "Device", "Sent", "Received", "PDR", "AvgDelay(ms)", "AvgLQI"
        )?;
        for row in &self.qos {
            writeln!(f, "{}", row)?;
        }
        writeln!(
            f,
            "Dropped: {} duplicate, {} truncated, {} clock anomaly; {} ticks skipped",
            self.anomalies.duplicates,
            self.anomalies.truncated,
            self.anomalies.clock_anomalies,
            self.skipped_heartbeats
        )?;

        if !self.traces.is_empty() {
            writeln!(f, "\n-- Route traces --")?;
            for t in &self.traces {
                writeln!(f, "{}", t)?;
            }
        }

        if !self.tables.is_empty() {
            writeln!(f, "\n-- NWK tables --")?;
            for t in &self.tables {
                writeln!(f, "{}", t)?;
            }
        }

        if !self.wlan.is_empty() {
            writeln!(f, "\n-- WLAN flows --")?;
            writeln!(
                f,
                "{:<10} → {:<10} {:>10} {:>6} {:>16} {:>12} {:>10}",
                "SrcAddr", "DstAddr", "RxBytes", "Lost", "Throughput(Mb/s)", "AvgDelay(ms)",
                "Jitter(ms)"
            )?;
            for row in &self.wlan {
                writeln!(f, "{}", row)?;
            }
        }

        let m = &self.medium;
        writeln!(f, "\n-- Medium --")?;
        writeln!(
            f,
            "mesh: {} delivered, {} dropped, {} lost to interference, {} duplicated",
            m.mesh_delivered, m.mesh_dropped, m.mesh_interference_drops, m.mesh_duplicates
        )?;
        writeln!(
            f,
            "wlan: {} delivered, {} dropped, {} lost to interference",
            m.wlan_delivered, m.wlan_dropped, m.wlan_interference_drops
        )?;
        let n = &self.nwk;
        write!(
            f,
            "nwk:  {} sent, {} forwarded, {} delivered, {} no-route, {} hop-limit, {} route discoveries",
            n.frames_sent,
            n.frames_forwarded,
            n.frames_delivered,
            n.no_route_drops,
            n.hop_limit_drops,
            n.route_discoveries
        )
    }
}
