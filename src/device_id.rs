use std::fmt::{Debug, Display, Formatter};

/// Number of slots in each correlation table. Packet ids (and session ids, which double as
///  packet ids) are mapped to a slot by `id % SLOT_COUNT`.
pub const SLOT_COUNT: usize = 31;

/// The 8-bit address of a device taking part in D2D messaging.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeviceId(pub u8);

impl DeviceId {
    /// Packets addressed to this id are fanned out to all known peers
    pub const BROADCAST: DeviceId = DeviceId(0xFF);

    /// Sentinel destination for 'local receiver' sessions: receiving on a session opened towards
    ///  this id returns whichever response arrives first, regardless of conversation.
    ///
    /// NB: This id is never routable, sending on such a session fails with `NoRoute`
    pub const RECEIVER: DeviceId = DeviceId(0xFE);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_receiver(&self) -> bool {
        *self == Self::RECEIVER
    }
}

impl Debug for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::BROADCAST => write!(f, "dev#broadcast"),
            Self::RECEIVER => write!(f, "dev#receiver"),
            _ => write!(f, "dev#{}", self.0),
        }
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<u8> for DeviceId {
    fn from(value: u8) -> Self {
        DeviceId(value)
    }
}


/// Identifier chosen by the sender of a packet. It is used for correlating responses and acks
///  with the request they belong to, *not* for sequencing.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PacketId(pub u8);

impl PacketId {
    /// marks an empty correlation slot
    pub const EMPTY: PacketId = PacketId(0xFF);

    pub fn slot_index(&self) -> usize {
        self.0 as usize % SLOT_COUNT
    }
}

impl Debug for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pkt#{}", self.0)
    }
}

impl From<u8> for PacketId {
    fn from(value: u8) -> Self {
        PacketId(value)
    }
}


/// Identifies one physical port (UART, USB endpoint, socket, ...) of the link layer
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PortId(pub u8);
