/// Join orchestration.
///
/// Drives every mesh device to a routable state with the NWK primitives,
/// standing in for the application layer: the coordinator forms the
/// network, every other device discovers it, joins the first network it
/// hears and then starts acting as a router. Progress is made only in
/// response to confirmations, one outstanding request per device.
///
/// The orchestrator also owns the process-wide joined-device counter and
/// the readiness flag that gates heartbeat traffic.

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::device::{Device, DeviceId, JoinPhase, ShortAddress};
use crate::error::{CoexError, CoexResult};
use crate::event::EventType;
use crate::nwk::{CapabilityInfo, ChannelMask, MeshNwk, NetworkDescriptor, NwkConfirm, NwkStatus};
use crate::simulation::SimulationContext;
use crate::time::{secs_to_ticks, VirtualTime};

// ── Parameters ────────────────────────────────────────────────────────

/// Bounded retries after a discovery or join failure.
///
/// `max_retries = 0` keeps the no-retry behaviour: the device fails on
/// its first unsuccessful confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct JoinPolicy {
    pub max_retries: u32,
    /// Seconds between a failure and the next discovery attempt.
    pub retry_backoff: f64,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        JoinPolicy {
            max_retries: 0,
            retry_backoff: 1.0,
        }
    }
}

/// Scan parameters for the two management requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinParams {
    pub formation_mask: ChannelMask,
    pub formation_scan_duration: u8,
    pub discovery_mask: ChannelMask,
    pub discovery_scan_duration: u8,
    pub policy: JoinPolicy,
}

impl Default for JoinParams {
    fn default() -> Self {
        JoinParams {
            formation_mask: ChannelMask::ALL_CHANNELS,
            formation_scan_duration: 0,
            discovery_mask: ChannelMask::LOW_CHANNELS,
            discovery_scan_duration: 2,
            policy: JoinPolicy::default(),
        }
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PhaseTransition {
    pub at: VirtualTime,
    pub device: DeviceId,
    pub from: JoinPhase,
    pub to: JoinPhase,
}

impl std::fmt::Display for PhaseTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Time {} | {}: {} → {}", self.at, self.device, self.from, self.to)
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JoinOrchestrator {
    params: JoinParams,
    total_mesh_devices: usize,
    joined_count: usize,
    ready_at: Option<VirtualTime>,
    transitions: Vec<PhaseTransition>,
}

impl JoinOrchestrator {
    pub fn new(params: JoinParams, total_mesh_devices: usize) -> Self {
        JoinOrchestrator {
            params,
            total_mesh_devices,
            joined_count: 0,
            ready_at: None,
            transitions: Vec::new(),
        }
    }

    /// The single gate for heartbeat traffic.
    pub fn is_ready(&self) -> bool {
        self.ready_at.is_some()
    }

    pub fn ready_at(&self) -> Option<VirtualTime> {
        self.ready_at
    }

    pub fn joined_count(&self) -> usize {
        self.joined_count
    }

    /// Every phase change so far, in event order.
    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    // ── Operations ───────────────────────────────────────────────

    /// Coordinator only, from `Idle`.
    pub fn form_network(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        nwk: &mut MeshNwk,
    ) -> CoexResult<()> {
        if !device.is_coordinator() || device.phase() != JoinPhase::Idle {
            return Err(invalid_state(device, "form a network"));
        }
        ensure_idle_channel(device)?;

        let request = nwk.form_network(
            ctx,
            device.id(),
            self.params.formation_mask,
            self.params.formation_scan_duration,
        )?;
        device.begin_request(request)?;
        self.transition(ctx.now(), device, JoinPhase::FormingNetwork);
        Ok(())
    }

    /// Any non-coordinator device, from `Idle`.
    pub fn discover_networks(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        nwk: &mut MeshNwk,
    ) -> CoexResult<()> {
        if device.is_coordinator() || device.phase() != JoinPhase::Idle {
            return Err(invalid_state(device, "discover networks"));
        }
        ensure_idle_channel(device)?;

        let request = nwk.discover_networks(
            ctx,
            device.id(),
            self.params.discovery_mask,
            self.params.discovery_scan_duration,
        )?;
        device.begin_request(request)?;
        self.transition(ctx.now(), device, JoinPhase::Discovering);
        Ok(())
    }

    /// Route a confirmation to its handler. Confirmations that do not
    /// match the device's outstanding request are logged and ignored.
    pub fn on_confirm(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        nwk: &mut MeshNwk,
        confirm: &NwkConfirm,
    ) -> CoexResult<()> {
        if !device.complete_request(confirm.request()) {
            warn!(device = %device.id(), %confirm, "ignoring stale confirmation");
            return Ok(());
        }
        match confirm {
            NwkConfirm::Formation { status, .. } => self.on_formation_confirm(ctx, device, *status),
            NwkConfirm::Discovery {
                status, networks, ..
            } => self.on_discovery_confirm(ctx, device, nwk, *status, networks),
            NwkConfirm::Join {
                status, address, ..
            } => self.on_join_confirm(ctx, device, nwk, *status, *address),
            NwkConfirm::StartRouter { .. } => self.on_router_promotion_done(ctx, device, nwk),
        }
    }

    fn on_formation_confirm(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        status: NwkStatus,
    ) -> CoexResult<()> {
        if device.phase() != JoinPhase::FormingNetwork {
            return Err(invalid_state(device, "complete formation"));
        }
        if !status.is_success() {
            self.transition(ctx.now(), device, JoinPhase::Failed);
            let err = CoexError::NetworkFormationFailed {
                device: device.id(),
                status,
            };
            error!(%err, "no network to join");
            return Err(err);
        }

        device.assign_short_address(ShortAddress::COORDINATOR)?;
        self.transition(ctx.now(), device, JoinPhase::NetworkFormed);
        if self.total_mesh_devices <= 1 {
            self.mark_ready(ctx.now());
        }
        Ok(())
    }

    /// First-found policy: join the first network in the result list.
    fn on_discovery_confirm(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        nwk: &mut MeshNwk,
        status: NwkStatus,
        networks: &[NetworkDescriptor],
    ) -> CoexResult<()> {
        if device.phase() != JoinPhase::Discovering {
            return Err(invalid_state(device, "complete discovery"));
        }
        let first = match (status, networks.first()) {
            (NwkStatus::Success, Some(first)) => first,
            (status, _) => {
                let status = if status.is_success() {
                    NwkStatus::NoNetworks
                } else {
                    status
                };
                return self.fail_or_retry(
                    ctx,
                    device,
                    CoexError::DiscoveryFailed {
                        device: device.id(),
                        status,
                    },
                );
            }
        };

        info!(device = %device.id(), network = %first, "joining first discovered network");
        device.join.candidate = Some(first.ext_pan_id);
        let request = nwk.join(
            ctx,
            device.id(),
            first.ext_pan_id,
            CapabilityInfo::router_allocating(),
        )?;
        device.begin_request(request)?;
        self.transition(ctx.now(), device, JoinPhase::Joining);
        Ok(())
    }

    fn on_join_confirm(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        nwk: &mut MeshNwk,
        status: NwkStatus,
        address: ShortAddress,
    ) -> CoexResult<()> {
        if device.phase() != JoinPhase::Joining {
            return Err(invalid_state(device, "complete a join"));
        }
        if !status.is_success() {
            return self.fail_or_retry(
                ctx,
                device,
                CoexError::JoinFailed {
                    device: device.id(),
                    status,
                },
            );
        }
        if !address.is_assignable() {
            return self.fail_or_retry(
                ctx,
                device,
                CoexError::InvalidAssignedAddress {
                    device: device.id(),
                    address,
                },
            );
        }

        device.assign_short_address(address)?;
        self.transition(ctx.now(), device, JoinPhase::Joined);
        self.joined_count += 1;
        info!(
            device = %device.id(),
            %address,
            joined = self.joined_count,
            of = self.total_mesh_devices.saturating_sub(1),
            "device joined"
        );
        if self.joined_count >= self.total_mesh_devices.saturating_sub(1) {
            self.mark_ready(ctx.now());
        }

        let request = nwk.start_router(ctx, device.id())?;
        device.begin_request(request)?;
        self.transition(ctx.now(), device, JoinPhase::PromotingToRouter);
        Ok(())
    }

    /// Start-router carries no status, so promotion cannot fail.
    fn on_router_promotion_done(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        nwk: &mut MeshNwk,
    ) -> CoexResult<()> {
        match device.phase() {
            JoinPhase::Joined | JoinPhase::PromotingToRouter => {
                nwk.complete_start_router(device.id())?;
                device.promote_to_router();
                self.transition(ctx.now(), device, JoinPhase::Router);
                Ok(())
            }
            _ => Err(invalid_state(device, "become a router")),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn fail_or_retry(
        &mut self,
        ctx: &mut SimulationContext,
        device: &mut Device,
        err: CoexError,
    ) -> CoexResult<()> {
        device.join.failures += 1;
        device.join.candidate = None;

        let policy = self.params.policy;
        if device.join.failures <= policy.max_retries {
            warn!(
                %err,
                attempt = device.join.failures,
                max_retries = policy.max_retries,
                "retrying discovery"
            );
            self.transition(ctx.now(), device, JoinPhase::Idle);
            ctx.schedule_with_context(
                secs_to_ticks(policy.retry_backoff),
                device.id(),
                EventType::DiscoverNetworks {
                    device: device.id(),
                },
            )?;
            return Ok(());
        }

        self.transition(ctx.now(), device, JoinPhase::Failed);
        error!(%err, "device left in Failed");
        Err(err)
    }

    fn mark_ready(&mut self, now: VirtualTime) {
        if self.ready_at.is_none() {
            self.ready_at = Some(now);
            info!(time = %now, joined = self.joined_count, "network ready, heartbeats unlocked");
        }
    }

    fn transition(&mut self, now: VirtualTime, device: &mut Device, to: JoinPhase) {
        let from = device.phase();
        device.join.phase = to;
        info!(device = %device.id(), %from, %to, "join phase");
        self.transitions.push(PhaseTransition {
            at: now,
            device: device.id(),
            from,
            to,
        });
    }
}

fn invalid_state(device: &Device, operation: &'static str) -> CoexError {
    CoexError::InvalidState {
        device: device.id(),
        phase: device.phase(),
        operation,
    }
}

fn ensure_idle_channel(device: &Device) -> CoexResult<()> {
    match device.join_state().pending {
        Some(pending) => Err(CoexError::RequestOutstanding {
            device: device.id(),
            pending,
        }),
        None => Ok(()),
    }
}
