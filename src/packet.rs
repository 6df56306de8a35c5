use bytes::Bytes;
use std::fmt::{Debug, Formatter};
use crate::device_id::{DeviceId, PacketId};
pub use crate::packet_header::{PacketInfo, PacketType};

/// A packet as it travels through the transport: header information plus an optional
///  (decrypted) payload.
///
/// Packets are moved between components rather than shared: a response packet is owned by its
///  correlation slot until a receiver takes it.
#[derive(Clone, Eq, PartialEq)]
pub struct D2dPacket {
    pub info: PacketInfo,
    pub payload: Option<Bytes>,
}

impl Debug for D2dPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.info, self.payload_len())
    }
}

impl D2dPacket {
    pub fn new(info: PacketInfo, payload: Option<Bytes>) -> D2dPacket {
        D2dPacket {
            info,
            payload: payload.filter(|p| !p.is_empty()),
        }
    }

    pub fn src_id(&self) -> DeviceId {
        self.info.src_id
    }

    pub fn dst_id(&self) -> DeviceId {
        self.info.dst_id
    }

    pub fn pkt_id(&self) -> PacketId {
        self.info.pkt_id
    }

    pub fn pkt_type(&self) -> PacketType {
        self.info.pkt_type
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref()
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// unencrypted length on the wire, i.e. header plus payload
    pub fn len(&self) -> usize {
        PacketInfo::SERIALIZED_LEN + self.payload_len()
    }

    /// The ack for this packet: addressed back to its sender, same packet id
    pub fn ack(&self) -> D2dPacket {
        D2dPacket::new(self.info.reply(PacketType::Ack), None)
    }
}


/// What the receive dispatcher does with a packet
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Classification {
    /// addressed to some other device, to be relayed
    Proxy,
    Broadcast,
    Request,
    Response,
    Ack,
}


/// A packet as application code sees it. When sending, the transport fills in source,
///  destination and packet id from the session; application code controls packet type, flags
///  and priority.
#[derive(Clone, Eq, PartialEq)]
pub struct Packet {
    pub info: PacketInfo,
    pub payload: Bytes,
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.info, self.payload.len())
    }
}

impl Packet {
    fn with_type(pkt_type: PacketType, payload: impl Into<Bytes>) -> Packet {
        Packet {
            info: PacketInfo::new(DeviceId(0), DeviceId(0), PacketId(0), pkt_type),
            payload: payload.into(),
        }
    }

    pub fn request(payload: impl Into<Bytes>) -> Packet {
        Self::with_type(PacketType::Request, payload)
    }

    pub fn response(payload: impl Into<Bytes>) -> Packet {
        Self::with_type(PacketType::Response, payload)
    }

    pub fn need_ack(mut self, need_ack: bool) -> Packet {
        self.info.need_ack = need_ack;
        self
    }

    pub fn need_rsp(mut self, need_rsp: bool) -> Packet {
        self.info.need_rsp = need_rsp;
        self
    }

    pub fn priority(mut self, priority: u8) -> Packet {
        self.info.priority = priority & 0b11;
        self
    }

    pub fn from_d2d(pkt: D2dPacket) -> Packet {
        Packet {
            info: pkt.info,
            payload: pkt.payload.unwrap_or_default(),
        }
    }

    pub fn into_d2d(self) -> D2dPacket {
        D2dPacket::new(self.info, Some(self.payload))
    }
}
