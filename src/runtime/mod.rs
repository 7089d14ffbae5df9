//! `CoexRuntime`: the simulation context object.
//!
//! Owns every piece of state the scenario shares across devices (the
//! devices themselves, the NWK layer, the medium, the join orchestrator,
//! heartbeat sequence counters, QoS accumulators, WLAN flows and recorded
//! route traces) and dispatches each event to the component it concerns.
//! One runtime per simulation; nothing is global.

use tracing::{debug, info, warn};

use crate::device::{Device, DeviceId, ShortAddress};
use crate::error::{CoexError, CoexResult};
use crate::event::{Event, EventType};
use crate::heartbeat::HeartbeatEngine;
use crate::medium::Medium;
use crate::nwk::{MeshFrame, MeshNwk, NwkConfirm, NwkTables};
use crate::orchestrator::{JoinOrchestrator, JoinParams};
use crate::qos::QosEngine;
use crate::route::{trace_route, RouteTrace, TraceOutcome};
use crate::simulation::{EventHandler, SimulationContext};
use crate::time::VirtualTime;
use crate::wlan::WlanTraffic;

/// Dispatches simulation events to the mesh, WLAN and measurement
/// components.
///
/// Implements [`EventHandler`], so it is passed straight to
/// [`Simulation::run_until`](crate::simulation::Simulation::run_until).
#[derive(Debug, Clone)]
pub struct CoexRuntime {
    pub(crate) devices: Vec<Device>,
    pub(crate) nwk: MeshNwk,
    pub(crate) medium: Medium,
    pub(crate) orchestrator: JoinOrchestrator,
    pub(crate) heartbeat: HeartbeatEngine,
    pub(crate) qos: QosEngine,
    pub(crate) wlan: WlanTraffic,
    pub(crate) traces: Vec<RouteTrace>,
    /// NWK tables of each trace source, taken with the trace.
    pub(crate) tables: Vec<NwkTables>,
    skipped_heartbeats: u64,
}

impl CoexRuntime {
    /// `devices` must be indexed by id, `devices[i].id() == i`.
    pub fn new(
        devices: Vec<Device>,
        nwk: MeshNwk,
        medium: Medium,
        join: JoinParams,
        heartbeat: HeartbeatEngine,
        wlan: WlanTraffic,
    ) -> Self {
        let orchestrator = JoinOrchestrator::new(join, devices.len());
        CoexRuntime {
            devices,
            nwk,
            medium,
            orchestrator,
            heartbeat,
            qos: QosEngine::new(),
            wlan,
            traces: Vec::new(),
            tables: Vec::new(),
            skipped_heartbeats: 0,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.index())
    }

    pub fn nwk(&self) -> &MeshNwk {
        &self.nwk
    }

    /// Mutable NWK access, e.g. to plant routing-table entries.
    pub fn nwk_mut(&mut self) -> &mut MeshNwk {
        &mut self.nwk
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn orchestrator(&self) -> &JoinOrchestrator {
        &self.orchestrator
    }

    pub fn heartbeat(&self) -> &HeartbeatEngine {
        &self.heartbeat
    }

    pub fn qos(&self) -> &QosEngine {
        &self.qos
    }

    pub fn wlan(&self) -> &WlanTraffic {
        &self.wlan
    }

    pub fn traces(&self) -> &[RouteTrace] {
        &self.traces
    }

    pub fn tables(&self) -> &[NwkTables] {
        &self.tables
    }

    /// Heartbeat ticks that found the network not ready or the source
    /// unable to route.
    pub fn skipped_heartbeats(&self) -> u64 {
        self.skipped_heartbeats
    }

    // ── Handlers ─────────────────────────────────────────────────

    fn on_confirm(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
        confirm: &NwkConfirm,
    ) -> CoexResult<()> {
        let dev = device_slot(&mut self.devices, device)?;
        self.orchestrator.on_confirm(ctx, dev, &mut self.nwk, confirm)
    }

    fn on_frame_arrival(
        &mut self,
        ctx: &mut SimulationContext,
        device: DeviceId,
        frame: &MeshFrame,
        lqi: u8,
    ) -> CoexResult<()> {
        let delivered = self
            .nwk
            .on_frame_arrival(ctx, &mut self.medium, device, frame.clone())?;
        if let Some(frame) = delivered {
            self.qos.record_received(ctx.now(), device, &frame.payload, lqi);
        }
        Ok(())
    }

    /// Reschedules itself first, so the periodic schedule survives a
    /// skipped or failed tick.
    fn on_heartbeat_tick(
        &mut self,
        ctx: &mut SimulationContext,
        src: DeviceId,
        dst: DeviceId,
        interval: u64,
    ) -> CoexResult<()> {
        ctx.schedule_with_context(interval, src, EventType::HeartbeatTick { src, dst, interval })?;

        if !self.orchestrator.is_ready() {
            self.skipped_heartbeats += 1;
            debug!(%src, %dst, "network not ready, heartbeat skipped");
            return Ok(());
        }
        let src_phase = self
            .device(src)
            .ok_or(CoexError::DeviceNotFound(src))?
            .phase();
        if !src_phase.can_route() {
            self.skipped_heartbeats += 1;
            debug!(%src, phase = %src_phase, "source cannot route yet, heartbeat skipped");
            return Ok(());
        }

        let (record, payload) = self.heartbeat.next_heartbeat(src, ctx.now())?;
        self.qos.record_sent(dst);
        // A destination outside the network still costs a sequence number
        // and counts as sent; the NWK drops the frame for lack of a route.
        let dst_addr = self.nwk.short_address(dst).unwrap_or(ShortAddress::NO_ROUTE);
        debug!(%record, %dst, %dst_addr, "heartbeat sent");
        self.nwk
            .send_data(ctx, &mut self.medium, src, dst_addr, payload, true)
    }

    fn on_trace_route(&mut self, now: VirtualTime, src: DeviceId, dst: DeviceId) {
        let max_hops = self.devices.len();
        let trace = match self.nwk.short_address(src) {
            None => RouteTrace::aborted(
                now,
                src,
                dst,
                TraceOutcome::UnknownAddress(ShortAddress::NO_ROUTE),
            ),
            Some(src_addr) => {
                let dst_addr = self.nwk.short_address(dst).unwrap_or(ShortAddress::NO_ROUTE);
                trace_route(&self.nwk, now, (src, src_addr), (dst, dst_addr), max_hops)
            }
        };
        info!(
            %src,
            %dst,
            outcome = %trace.outcome,
            hops = trace.hop_count(),
            "route traced"
        );
        let tables = self.nwk.tables(src, now);
        debug!("\n{}\n{}", trace, tables);
        self.traces.push(trace);
        self.tables.push(tables);
    }
}

fn device_slot(devices: &mut [Device], id: DeviceId) -> CoexResult<&mut Device> {
    devices
        .get_mut(id.index())
        .ok_or(CoexError::DeviceNotFound(id))
}

impl EventHandler for CoexRuntime {
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) -> CoexResult<()> {
        let _span = event
            .context
            .map(|d| tracing::debug_span!("device", id = %d).entered());

        match &event.payload {
            EventType::FormNetwork { device } => {
                let dev = device_slot(&mut self.devices, *device)?;
                self.orchestrator.form_network(ctx, dev, &mut self.nwk)
            }

            EventType::DiscoverNetworks { device } => {
                let dev = device_slot(&mut self.devices, *device)?;
                self.orchestrator.discover_networks(ctx, dev, &mut self.nwk)
            }

            EventType::NwkConfirm { device, confirm } => self.on_confirm(ctx, *device, confirm),

            EventType::FrameArrival { device, frame, lqi } => {
                self.on_frame_arrival(ctx, *device, frame, *lqi)
            }

            EventType::HeartbeatTick { src, dst, interval } => {
                self.on_heartbeat_tick(ctx, *src, *dst, *interval)
            }

            EventType::TraceRoute { src, dst } => {
                self.on_trace_route(ctx.now(), *src, *dst);
                Ok(())
            }

            EventType::WlanTx { flow } => self.wlan.on_tx(ctx, &mut self.medium, *flow),

            EventType::WlanRx {
                flow,
                bytes,
                sent_at,
            } => {
                self.wlan.on_rx(ctx.now(), *flow, *bytes, *sent_at);
                Ok(())
            }

            EventType::SetLinkActive { a, b, active } => {
                if self.nwk.set_link_active(*a, *b, *active) {
                    info!(%a, %b, active, "link state changed");
                } else {
                    warn!(%a, %b, "no such link");
                }
                Ok(())
            }

            EventType::Log(msg) => {
                info!(time = %ctx.now(), "{}", msg);
                Ok(())
            }

            EventType::Noop => Ok(()),
        }
    }
}
