/// WLAN background traffic.
///
/// Every station runs one constant-rate UDP-like flow to the access point.
/// Frames share the medium with the mesh, which is what makes the two
/// networks interfere. Per-flow statistics mirror a flow monitor: tx/rx
/// counters, delay and jitter sums, first transmission and last reception.

use std::net::Ipv4Addr;

use serde::Deserialize;
use tracing::debug;

use crate::error::CoexResult;
use crate::event::EventType;
use crate::medium::{Medium, MediumDecision};
use crate::simulation::SimulationContext;
use crate::time::{secs_to_ticks, VirtualTime, TICKS_PER_SEC};

/// Address of the access point every flow targets.
pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WlanConfig {
    pub stations: u32,
    /// UDP payload bytes per frame.
    pub packet_size: u32,
    /// Offered load per station in bit/s; 0 disables WLAN traffic.
    pub data_rate: u64,
    /// Seconds.
    pub start: f64,
    /// Seconds; `None` runs until the end of the simulation.
    pub stop: Option<f64>,
}

impl Default for WlanConfig {
    fn default() -> Self {
        WlanConfig {
            stations: 2,
            packet_size: 1472,
            data_rate: 0,
            start: 1.0,
            stop: None,
        }
    }
}

impl WlanConfig {
    pub fn is_enabled(&self) -> bool {
        self.data_rate > 0 && self.stations > 0 && self.packet_size > 0
    }

    /// Ticks between two frames of one flow at the configured rate.
    pub fn frame_interval(&self) -> u64 {
        let bits = u64::from(self.packet_size) * 8;
        (bits * TICKS_PER_SEC / self.data_rate.max(1)).max(1)
    }
}

// ── Flow statistics ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Ticks.
    pub delay_sum: u64,
    /// Sum of |delay(n) − delay(n−1)|, ticks.
    pub jitter_sum: u64,
    pub first_tx: Option<VirtualTime>,
    pub last_rx: Option<VirtualTime>,
    last_delay: Option<u64>,
}

impl FlowStats {
    pub fn lost_packets(&self) -> u64 {
        self.tx_packets.saturating_sub(self.rx_packets)
    }
}

/// One row of the WLAN report.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FlowReport {
    pub flow: u32,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost: u64,
    /// Mb/s.
    pub throughput: f64,
    /// ms.
    pub avg_delay: f64,
    /// ms.
    pub avg_jitter: f64,
}

impl std::fmt::Display for FlowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<10} → {:<10} {:>10} {:>6} {:>16.3} {:>12.3} {:>10.3}",
            self.src, self.dst, self.rx_bytes, self.lost, self.throughput, self.avg_delay,
            self.avg_jitter
        )
    }
}

// ── Traffic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WlanTraffic {
    config: WlanConfig,
    interval: u64,
    start: VirtualTime,
    stop: VirtualTime,
    flows: Vec<FlowStats>,
}

impl WlanTraffic {
    /// Flows stop at `config.stop` or `sim_end`, whichever comes first.
    pub fn new(config: WlanConfig, sim_end: VirtualTime) -> Self {
        let stop = config
            .stop
            .map(VirtualTime::from_secs_f64)
            .map_or(sim_end, |s| s.min(sim_end));
        let flows = if config.is_enabled() {
            vec![FlowStats::default(); config.stations as usize]
        } else {
            Vec::new()
        };
        WlanTraffic {
            interval: config.frame_interval(),
            start: VirtualTime::new(secs_to_ticks(config.start)),
            stop,
            flows,
            config,
        }
    }

    pub fn config(&self) -> &WlanConfig {
        &self.config
    }

    pub fn start_time(&self) -> VirtualTime {
        self.start
    }

    pub fn flow_count(&self) -> u32 {
        self.flows.len() as u32
    }

    pub fn flow(&self, flow: u32) -> Option<&FlowStats> {
        self.flows.get(flow as usize)
    }

    /// Emit one frame of `flow` and schedule the next one.
    pub fn on_tx(
        &mut self,
        ctx: &mut SimulationContext,
        medium: &mut Medium,
        flow: u32,
    ) -> CoexResult<()> {
        let now = ctx.now();
        let bytes = self.config.packet_size;
        let Some(stats) = self.flows.get_mut(flow as usize) else {
            return Ok(());
        };
        if !now.is_before(self.stop) {
            return Ok(());
        }

        stats.tx_packets += 1;
        stats.tx_bytes += u64::from(bytes);
        stats.first_tx.get_or_insert(now);

        match medium.transmit_wlan(now, bytes as usize) {
            MediumDecision::Delivered { latency, .. } => {
                ctx.schedule_after(
                    latency,
                    EventType::WlanRx {
                        flow,
                        bytes,
                        sent_at: now,
                    },
                )?;
            }
            decision => debug!(flow, ?decision, "wlan frame lost"),
        }

        if now
            .advance(self.interval)
            .is_some_and(|next| next.is_before(self.stop))
        {
            ctx.schedule_after(self.interval, EventType::WlanTx { flow })?;
        }
        Ok(())
    }

    /// A frame of `flow` reached the access point.
    pub fn on_rx(&mut self, now: VirtualTime, flow: u32, bytes: u32, sent_at: VirtualTime) {
        let Some(stats) = self.flows.get_mut(flow as usize) else {
            return;
        };
        let delay = now.duration_since(sent_at).unwrap_or(0);
        stats.rx_packets += 1;
        stats.rx_bytes += u64::from(bytes);
        stats.delay_sum += delay;
        if let Some(prev) = stats.last_delay {
            stats.jitter_sum += delay.abs_diff(prev);
        }
        stats.last_delay = Some(delay);
        stats.last_rx = Some(now);
    }

    /// Per-flow rows; `end` stands in for the last reception of a flow
    /// that never received anything.
    pub fn report(&self, end: VirtualTime) -> Vec<FlowReport> {
        self.flows
            .iter()
            .enumerate()
            .map(|(i, st)| {
                let duration = match (st.first_tx, st.last_rx) {
                    (Some(first), Some(last)) if first.is_before(last) => {
                        last.as_secs_f64() - first.as_secs_f64()
                    }
                    (Some(first), _) => end.as_secs_f64() - first.as_secs_f64(),
                    (None, _) => 0.0,
                };
                let throughput = if duration > 0.0 {
                    st.rx_bytes as f64 * 8.0 / duration / 1e6
                } else {
                    0.0
                };
                let to_ms = |ticks: u64| ticks as f64 * 1_000.0 / TICKS_PER_SEC as f64;
                let avg_delay = if st.rx_packets > 0 {
                    to_ms(st.delay_sum) / st.rx_packets as f64
                } else {
                    0.0
                };
                let avg_jitter = if st.rx_packets > 1 {
                    to_ms(st.jitter_sum) / (st.rx_packets - 1) as f64
                } else {
                    0.0
                };
                FlowReport {
                    flow: i as u32,
                    src: station_address(i as u32),
                    dst: AP_ADDRESS,
                    tx_packets: st.tx_packets,
                    rx_packets: st.rx_packets,
                    rx_bytes: st.rx_bytes,
                    lost: st.lost_packets(),
                    throughput,
                    avg_delay,
                    avg_jitter,
                }
            })
            .collect()
    }
}

/// Stations are numbered after the access point.
pub fn station_address(flow: u32) -> Ipv4Addr {
    let host = 2 + flow;
    Ipv4Addr::new(10, 0, (host >> 8) as u8, (host & 0xff) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MediumConfig;
    use crate::simulation::Simulation;
    use crate::event::Event;

    fn config(rate: u64) -> WlanConfig {
        WlanConfig {
            stations: 1,
            packet_size: 1000,
            data_rate: rate,
            start: 0.0,
            stop: None,
        }
    }

    fn run(wlan: &mut WlanTraffic, medium: &mut Medium, until: VirtualTime) {
        let mut sim = Simulation::new();
        for flow in 0..wlan.flow_count() {
            sim.schedule(wlan.start_time(), EventType::WlanTx { flow });
        }
        let mut handler = |ctx: &mut SimulationContext, ev: &Event| -> CoexResult<()> {
            match &ev.payload {
                EventType::WlanTx { flow } => wlan.on_tx(ctx, medium, *flow),
                EventType::WlanRx {
                    flow,
                    bytes,
                    sent_at,
                } => {
                    wlan.on_rx(ctx.now(), *flow, *bytes, *sent_at);
                    Ok(())
                }
                _ => Ok(()),
            }
        };
        sim.run_until(until, &mut handler).unwrap();
    }

    #[test]
    fn test_zero_rate_disables_traffic() {
        let wlan = WlanTraffic::new(WlanConfig::default(), VirtualTime::from_secs_f64(60.0));
        assert_eq!(wlan.flow_count(), 0);
        assert!(wlan.report(VirtualTime::from_secs_f64(60.0)).is_empty());
    }

    #[test]
    fn test_frame_interval_matches_rate() {
        // 1000 B at 8 Mb/s → 1 ms.
        assert_eq!(config(8_000_000).frame_interval(), 1_000);
    }

    #[test]
    fn test_constant_rate_flow_is_lossless_on_reliable_medium() {
        let end = VirtualTime::from_secs_f64(1.0);
        let mut wlan = WlanTraffic::new(config(800_000), end);
        let mut medium = Medium::reliable(7);
        run(&mut wlan, &mut medium, end);

        // 10 ms per frame over one second.
        let st = wlan.flow(0).unwrap();
        assert_eq!(st.tx_packets, 100);
        assert_eq!(st.rx_packets, 100);
        assert_eq!(st.lost_packets(), 0);
        assert_eq!(st.jitter_sum, 0);

        let row = &wlan.report(end)[0];
        assert_eq!(row.src, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(row.dst, AP_ADDRESS);
        assert!(row.avg_delay > 0.0);
        assert!(row.throughput > 0.7 && row.throughput < 0.9, "{}", row.throughput);
    }

    #[test]
    fn test_stop_time_bounds_flow() {
        let end = VirtualTime::from_secs_f64(1.0);
        let mut cfg = config(800_000);
        cfg.stop = Some(0.5);
        let mut wlan = WlanTraffic::new(cfg, end);
        let mut medium = Medium::reliable(7);
        run(&mut wlan, &mut medium, end);
        assert_eq!(wlan.flow(0).unwrap().tx_packets, 50);
    }

    #[test]
    fn test_lossy_medium_counts_lost_frames() {
        let end = VirtualTime::from_secs_f64(1.0);
        let mut wlan = WlanTraffic::new(config(800_000), end);
        let mut medium = Medium::new(
            MediumConfig {
                drop_probability: 1.0,
                ..MediumConfig::reliable()
            },
            1,
        );
        run(&mut wlan, &mut medium, end);
        let row = &wlan.report(end)[0];
        assert_eq!(row.rx_packets, 0);
        assert_eq!(row.lost, 100);
        assert_eq!(row.throughput, 0.0);
        assert_eq!(row.avg_delay, 0.0);
    }

    #[test]
    fn test_jitter_is_mean_delay_variation() {
        let mut wlan = WlanTraffic::new(config(800_000), VirtualTime::from_secs_f64(1.0));
        let t = VirtualTime::new;
        wlan.on_rx(t(1_000), 0, 1000, t(0));
        wlan.on_rx(t(13_000), 0, 1000, t(10_000));
        wlan.on_rx(t(21_000), 0, 1000, t(20_000));
        let st = wlan.flow(0).unwrap();
        // delays 1, 3, 1 ms → variations 2 + 2 ms.
        assert_eq!(st.jitter_sum, 4_000);
        let row = &wlan.report(t(21_000))[0];
        assert!((row.avg_jitter - 2.0).abs() < 1e-9);
        assert!((row.avg_delay - 5.0 / 3.0).abs() < 1e-9);
    }
}
