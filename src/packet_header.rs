use crate::device_id::{DeviceId, PacketId};
use crate::error::{D2dError, D2dResult};
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Debug, Formatter};

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    struct Info: u8 {
        const MASK_TYPE     = 0b1100_0000;
        const NEED_ACK      = 0b0010_0000;
        const NEED_RSP      = 0b0001_0000;
        const MASK_PRIORITY = 0b0000_1100;
        const MASK_RESERVED = 0b0000_0011;
    }
}

const TYPE_SHIFT: u8 = 6;
const PRIORITY_SHIFT: u8 = 2;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketType {
    Request = 0,
    Response = 1,
    Ack = 2,
}

/// The addressing and control information of a packet, i.e. its wire header:
///
/// ```ascii
/// 0: source device id (u8)
/// 1: destination device id (u8), 0xFF for broadcast
/// 2: packet id (u8)
/// 3: info (u8):
///    * bit 7-6: packet type (00 request, 01 response, 10 ack)
///    * bit 5:   need ack
///    * bit 4:   need response
///    * bit 3-2: priority
///    * bit 1-0: reserved
/// ```
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PacketInfo {
    pub src_id: DeviceId,
    pub dst_id: DeviceId,
    pub pkt_id: PacketId,
    pub pkt_type: PacketType,
    pub need_ack: bool,
    pub need_rsp: bool,
    /// 0..=3, carried on the wire but not interpreted by the transport
    pub priority: u8,
    /// 0..=3
    pub reserved: u8,
}

impl Debug for PacketInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{{{:?}->{:?} {:?}", self.pkt_type, self.src_id, self.dst_id, self.pkt_id)?;
        if self.need_ack {
            write!(f, " ack")?;
        }
        if self.need_rsp {
            write!(f, " rsp")?;
        }
        write!(f, " p{}}}", self.priority)
    }
}

impl PacketInfo {
    pub const SERIALIZED_LEN: usize = 4;

    pub fn new(src_id: DeviceId, dst_id: DeviceId, pkt_id: PacketId, pkt_type: PacketType) -> PacketInfo {
        PacketInfo {
            src_id,
            dst_id,
            pkt_id,
            pkt_type,
            need_ack: false,
            need_rsp: false,
            priority: 0,
            reserved: 0,
        }
    }

    /// The header of a packet travelling back to this packet's sender, correlated by the same
    ///  packet id
    pub fn reply(&self, pkt_type: PacketType) -> PacketInfo {
        PacketInfo::new(self.dst_id, self.src_id, self.pkt_id, pkt_type)
    }

    fn info_byte(&self) -> u8 {
        let pkt_type: u8 = self.pkt_type.into();
        let mut info = Info::from_bits_retain(pkt_type << TYPE_SHIFT);
        info.set(Info::NEED_ACK, self.need_ack);
        info.set(Info::NEED_RSP, self.need_rsp);
        info |= Info::from_bits_retain((self.priority << PRIORITY_SHIFT) & Info::MASK_PRIORITY.bits());
        info |= Info::from_bits_retain(self.reserved & Info::MASK_RESERVED.bits());
        info.bits()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.src_id.0);
        buf.put_u8(self.dst_id.0);
        buf.put_u8(self.pkt_id.0);
        buf.put_u8(self.info_byte());
    }

    pub fn deser(buf: &mut impl Buf) -> D2dResult<PacketInfo> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(D2dError::MalformedFrame(buf.remaining()));
        }

        let src_id = DeviceId(buf.get_u8());
        let dst_id = DeviceId(buf.get_u8());
        let pkt_id = PacketId(buf.get_u8());
        let info = Info::from_bits_retain(buf.get_u8());

        let raw_type = (info & Info::MASK_TYPE).bits() >> TYPE_SHIFT;
        let pkt_type = PacketType::try_from(raw_type)
            .map_err(|_| D2dError::UnknownPacketType(raw_type))?;

        Ok(PacketInfo {
            src_id,
            dst_id,
            pkt_id,
            pkt_type,
            need_ack: info.contains(Info::NEED_ACK),
            need_rsp: info.contains(Info::NEED_RSP),
            priority: (info & Info::MASK_PRIORITY).bits() >> PRIORITY_SHIFT,
            reserved: (info & Info::MASK_RESERVED).bits(),
        })
    }
}
