//! Device record and per-device join progress.

use crate::error::{CoexError, CoexResult};
use crate::nwk::RequestId;

use super::id::{DeviceId, ExtendedAddress, ShortAddress};

/// Role of a device in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Role {
    Coordinator,
    Router,
    Unjoined,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coordinator => write!(f, "Coordinator"),
            Role::Router => write!(f, "Router"),
            Role::Unjoined => write!(f, "Unjoined"),
        }
    }
}

/// Progress through the join state machine.
///
/// Routers walk `Idle → Discovering → Joining → Joined → PromotingToRouter
/// → Router`; the coordinator walks `Idle → FormingNetwork →
/// NetworkFormed`. `Failed` is terminal unless retries are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JoinPhase {
    Idle,
    FormingNetwork,
    NetworkFormed,
    Discovering,
    Joining,
    Joined,
    PromotingToRouter,
    Router,
    Failed,
}

impl JoinPhase {
    /// Phases in which a device may originate or relay heartbeat traffic.
    pub fn can_route(self) -> bool {
        matches!(self, JoinPhase::Router | JoinPhase::NetworkFormed)
    }
}

impl std::fmt::Display for JoinPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JoinPhase::Idle => "Idle",
            JoinPhase::FormingNetwork => "FormingNetwork",
            JoinPhase::NetworkFormed => "NetworkFormed",
            JoinPhase::Discovering => "Discovering",
            JoinPhase::Joining => "Joining",
            JoinPhase::Joined => "Joined",
            JoinPhase::PromotingToRouter => "PromotingToRouter",
            JoinPhase::Router => "Router",
            JoinPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Per-device orchestration state. Mutated only by the join orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinState {
    pub phase: JoinPhase,
    /// The one request this device is waiting on, if any.
    pub pending: Option<RequestId>,
    /// Extended PAN id of the network picked from discovery.
    pub candidate: Option<u64>,
    /// Failed discovery/join attempts so far.
    pub failures: u32,
}

impl JoinState {
    pub fn new() -> Self {
        JoinState {
            phase: JoinPhase::Idle,
            pending: None,
            candidate: None,
            failures: 0,
        }
    }
}

impl Default for JoinState {
    fn default() -> Self {
        Self::new()
    }
}

/// A participant in the mesh network.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    ext_addr: ExtendedAddress,
    short_addr: Option<ShortAddress>,
    role: Role,
    stream_seed: u64,
    pub(crate) join: JoinState,
}

impl Device {
    /// The single device that forms the network.
    pub fn coordinator(id: DeviceId, ext_addr: ExtendedAddress, stream_seed: u64) -> Self {
        Device {
            id,
            ext_addr,
            short_addr: None,
            role: Role::Coordinator,
            stream_seed,
            join: JoinState::new(),
        }
    }

    /// A device that will discover, join and become a router.
    pub fn router(id: DeviceId, ext_addr: ExtendedAddress, stream_seed: u64) -> Self {
        Device {
            id,
            ext_addr,
            short_addr: None,
            role: Role::Unjoined,
            stream_seed,
            join: JoinState::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn ext_addr(&self) -> ExtendedAddress {
        self.ext_addr
    }

    pub fn short_addr(&self) -> Option<ShortAddress> {
        self.short_addr
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stream_seed(&self) -> u64 {
        self.stream_seed
    }

    pub fn phase(&self) -> JoinPhase {
        self.join.phase
    }

    pub fn join_state(&self) -> &JoinState {
        &self.join
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }

    /// Record the address handed out by the network. Once per join episode.
    pub(crate) fn assign_short_address(&mut self, addr: ShortAddress) -> CoexResult<()> {
        if let Some(existing) = self.short_addr {
            return Err(CoexError::AddressAlreadyAssigned {
                device: self.id,
                address: existing,
            });
        }
        self.short_addr = Some(addr);
        Ok(())
    }

    pub(crate) fn promote_to_router(&mut self) {
        if self.role == Role::Unjoined {
            self.role = Role::Router;
        }
    }

    /// Mark `id` as this device's outstanding request.
    pub(crate) fn begin_request(&mut self, id: RequestId) -> CoexResult<()> {
        if let Some(pending) = self.join.pending {
            return Err(CoexError::RequestOutstanding {
                device: self.id,
                pending,
            });
        }
        self.join.pending = Some(id);
        Ok(())
    }

    /// Clear the outstanding request if it is `id`. Returns `false` for a
    /// confirmation that does not match (stale or foreign).
    pub(crate) fn complete_request(&mut self, id: RequestId) -> bool {
        if self.join.pending == Some(id) {
            self.join.pending = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Device {
        Device::router(DeviceId::new(1), ExtendedAddress::new(1), 10)
    }

    #[test]
    fn test_new_router_is_unjoined_and_idle() {
        let d = router();
        assert_eq!(d.role(), Role::Unjoined);
        assert_eq!(d.phase(), JoinPhase::Idle);
        assert!(d.short_addr().is_none());
    }

    #[test]
    fn test_address_assigned_once() {
        let mut d = router();
        d.assign_short_address(ShortAddress::new(0x0042)).unwrap();
        let err = d.assign_short_address(ShortAddress::new(0x0043)).unwrap_err();
        assert!(matches!(err, CoexError::AddressAlreadyAssigned { .. }));
        assert_eq!(d.short_addr(), Some(ShortAddress::new(0x0042)));
    }

    #[test]
    fn test_single_outstanding_request() {
        let mut d = router();
        d.begin_request(RequestId::new(7)).unwrap();
        let err = d.begin_request(RequestId::new(8)).unwrap_err();
        assert!(matches!(err, CoexError::RequestOutstanding { .. }));

        assert!(!d.complete_request(RequestId::new(8)));
        assert!(d.complete_request(RequestId::new(7)));
        assert!(d.join_state().pending.is_none());
    }

    #[test]
    fn test_promotion_keeps_coordinator_role() {
        let mut c = Device::coordinator(DeviceId::new(0), ExtendedAddress::COORDINATOR, 0);
        c.promote_to_router();
        assert_eq!(c.role(), Role::Coordinator);

        let mut r = router();
        r.promote_to_router();
        assert_eq!(r.role(), Role::Router);
    }

    #[test]
    fn test_phase_routing_capability() {
        assert!(JoinPhase::Router.can_route());
        assert!(JoinPhase::NetworkFormed.can_route());
        assert!(!JoinPhase::PromotingToRouter.can_route());
        assert!(!JoinPhase::Failed.can_route());
    }
}
