//! Request/confirm vocabulary of the network primitive layer.

use crate::device::ShortAddress;

/// Correlates a primitive request with its eventual confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        RequestId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R#{}", self.0)
    }
}

/// Status carried by formation, discovery and join confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NwkStatus {
    Success,
    /// Discovery heard no beacon on the scanned channels.
    NoNetworks,
    /// No router of the target network accepted the association.
    NotPermitted,
    /// Formation could not start a network.
    StartupFailure,
    /// The request is not valid in the device's current NWK state.
    InvalidRequest,
}

impl NwkStatus {
    pub fn is_success(self) -> bool {
        self == NwkStatus::Success
    }
}

impl std::fmt::Display for NwkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NwkStatus::Success => "SUCCESS",
            NwkStatus::NoNetworks => "NO_NETWORKS",
            NwkStatus::NotPermitted => "NOT_PERMITTED",
            NwkStatus::StartupFailure => "STARTUP_FAILURE",
            NwkStatus::InvalidRequest => "INVALID_REQUEST",
        };
        f.write_str(s)
    }
}

/// Bitmap of 2.4 GHz channels 11–26 (bit n = channel n).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct ChannelMask(u32);

impl ChannelMask {
    /// Channels 11 through 26.
    pub const ALL_CHANNELS: ChannelMask = ChannelMask(0x07FF_F800);
    /// Channels 11 through 14, the default discovery subset.
    pub const LOW_CHANNELS: ChannelMask = ChannelMask(0x0000_7800);

    pub const FIRST_CHANNEL: u8 = 11;
    pub const LAST_CHANNEL: u8 = 26;

    #[inline]
    pub fn new(bits: u32) -> Self {
        ChannelMask(bits & Self::ALL_CHANNELS.0)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, channel: u8) -> bool {
        (Self::FIRST_CHANNEL..=Self::LAST_CHANNEL).contains(&channel) && self.0 & (1 << channel) != 0
    }

    /// Channels in ascending (scan) order.
    pub fn channels(self) -> impl Iterator<Item = u8> {
        (Self::FIRST_CHANNEL..=Self::LAST_CHANNEL).filter(move |&c| self.contains(c))
    }

    pub fn channel_count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Capability flags sent with a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityInfo(u8);

impl CapabilityInfo {
    const DEVICE_TYPE_ROUTER: u8 = 0x02;
    const RECEIVER_ON_WHEN_IDLE: u8 = 0x08;
    const ALLOCATE_ADDRESS: u8 = 0x80;

    /// Router-capable device asking the network to assign its address.
    pub fn router_allocating() -> Self {
        CapabilityInfo(Self::DEVICE_TYPE_ROUTER | Self::RECEIVER_ON_WHEN_IDLE | Self::ALLOCATE_ADDRESS)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_router(self) -> bool {
        self.0 & Self::DEVICE_TYPE_ROUTER != 0
    }

    pub fn allocate_address(self) -> bool {
        self.0 & Self::ALLOCATE_ADDRESS != 0
    }
}

/// One network heard during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub ext_pan_id: u64,
    pub pan_id: u16,
    pub logical_channel: u8,
    pub stack_profile: u8,
    pub permit_joining: bool,
}

impl std::fmt::Display for NetworkDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ExtPanID 0x{:x} CH {} PanID 0x{:04x} profile {}",
            self.ext_pan_id, self.logical_channel, self.pan_id, self.stack_profile
        )
    }
}

/// Confirmation delivered to the device that issued a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NwkConfirm {
    Formation {
        request: RequestId,
        status: NwkStatus,
    },
    Discovery {
        request: RequestId,
        status: NwkStatus,
        networks: Vec<NetworkDescriptor>,
    },
    Join {
        request: RequestId,
        status: NwkStatus,
        /// `ShortAddress::NO_ROUTE` unless the join succeeded.
        address: ShortAddress,
        ext_pan_id: u64,
    },
    StartRouter {
        request: RequestId,
    },
}

impl NwkConfirm {
    pub fn request(&self) -> RequestId {
        match self {
            NwkConfirm::Formation { request, .. }
            | NwkConfirm::Discovery { request, .. }
            | NwkConfirm::Join { request, .. }
            | NwkConfirm::StartRouter { request } => *request,
        }
    }
}

impl std::fmt::Display for NwkConfirm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NwkConfirm::Formation { request, status } => {
                write!(f, "FormationConfirm({}, {})", request, status)
            }
            NwkConfirm::Discovery { request, status, networks } => {
                write!(f, "DiscoveryConfirm({}, {}, {} networks)", request, status, networks.len())
            }
            NwkConfirm::Join { request, status, address, .. } => {
                write!(f, "JoinConfirm({}, {}, {})", request, status, address)
            }
            NwkConfirm::StartRouter { request } => write!(f, "StartRouterConfirm({})", request),
        }
    }
}

/// Result of `ResolveNextHop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    /// `ShortAddress::NO_ROUTE` when the device knows no way forward.
    pub address: ShortAddress,
    /// The next hop is a direct radio neighbor of the querying device.
    pub neighbor: bool,
}

impl NextHop {
    pub const UNREACHABLE: NextHop = NextHop {
        address: ShortAddress::NO_ROUTE,
        neighbor: false,
    };

    pub fn is_unreachable(self) -> bool {
        self.address == ShortAddress::NO_ROUTE
    }
}

/// A NWK data frame in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFrame {
    pub src: ShortAddress,
    pub dst: ShortAddress,
    /// Relays traversed so far.
    pub hops: u8,
    pub payload: Vec<u8>,
}

impl MeshFrame {
    pub fn new(src: ShortAddress, dst: ShortAddress, payload: Vec<u8>) -> Self {
        MeshFrame {
            src,
            dst,
            hops: 0,
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl std::fmt::Display for MeshFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} → {}, {}B]", self.src, self.dst, self.payload.len())
    }
}
