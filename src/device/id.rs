//! Device identity: simulation index, long-term and network addresses.

/// Index of a mesh device inside one simulation.
///
/// Also the 4-byte source identifier carried in heartbeat payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct DeviceId(u32);

impl DeviceId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        DeviceId(id)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// 16-bit network address assigned on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ShortAddress(u16);

impl ShortAddress {
    /// Address the coordinator always takes.
    pub const COORDINATOR: ShortAddress = ShortAddress(0x0000);
    /// Broadcast to all devices; doubles as the "no route" sentinel.
    pub const NO_ROUTE: ShortAddress = ShortAddress(0xFFFF);
    /// Highest address the network may hand out.
    pub const MAX_UNICAST: ShortAddress = ShortAddress(0xFFF7);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        ShortAddress(raw)
    }

    #[inline]
    pub fn raw(self) -> u16 {
        self.0
    }

    /// `true` for addresses in the broadcast / reserved range `0xFFF8..=0xFFFF`.
    #[inline]
    pub fn is_reserved(self) -> bool {
        self.0 > Self::MAX_UNICAST.0
    }

    /// `true` for addresses a router may assign to a joining device.
    #[inline]
    pub fn is_assignable(self) -> bool {
        self != Self::COORDINATOR && !self.is_reserved()
    }
}

impl std::fmt::Display for ShortAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}", self.0 >> 8, self.0 & 0xff)
    }
}

/// 64-bit IEEE extended address, fixed at device creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ExtendedAddress(u64);

impl ExtendedAddress {
    /// Extended address given to the coordinator in the reference scenario.
    pub const COORDINATOR: ExtendedAddress = ExtendedAddress(0x0000_0000_0000_CAFE);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        ExtendedAddress(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ExtendedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
