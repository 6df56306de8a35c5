use bytes::{BufMut, Bytes};
use tracing::trace;
use crate::device_id::DeviceId;
use crate::error::{D2dError, D2dResult};
use crate::packet::{Classification, D2dPacket, PacketInfo, PacketType};
use crate::pbuf::PBuf;
use crate::security::SecurityCodec;

/// Serializes a packet into a freshly allocated frame buffer. A non-empty payload goes through
///  the security codec, the header does not.
pub fn encode(pkt: &D2dPacket, security: &dyn SecurityCodec) -> D2dResult<PBuf> {
    let packed = match &pkt.payload {
        Some(payload) if !payload.is_empty() => Some(
            security.pack(payload)
                .map_err(D2dError::security)?
        ),
        _ => None,
    };

    let packed_len = packed.as_ref().map(|p| p.len()).unwrap_or(0);
    let mut buf = PBuf::alloc(PacketInfo::SERIALIZED_LEN + packed_len)?;
    pkt.info.ser(buf.buf_mut());
    if let Some(packed) = packed {
        buf.buf_mut().put_slice(&packed);
    }

    trace!("encoded {:?} to {} bytes", pkt, buf.len());
    Ok(buf)
}

/// Parses a received frame. The frame is only borrowed, the packet's payload is a fresh
///  allocation.
pub fn decode(frame: &[u8], security: &dyn SecurityCodec) -> D2dResult<D2dPacket> {
    let mut parse_buf = frame;
    let info = PacketInfo::deser(&mut parse_buf)?;

    let payload = if parse_buf.is_empty() {
        None
    }
    else {
        let unpacked = security.unpack(parse_buf)
            .map_err(D2dError::security)?;
        Some(Bytes::from(unpacked))
    };

    Ok(D2dPacket::new(info, payload))
}

pub fn classify(pkt: &D2dPacket, self_id: DeviceId) -> Classification {
    if pkt.dst_id().is_broadcast() {
        Classification::Broadcast
    }
    else if pkt.dst_id() != self_id {
        Classification::Proxy
    }
    else {
        match pkt.pkt_type() {
            PacketType::Request => Classification::Request,
            PacketType::Response => Classification::Response,
            PacketType::Ack => Classification::Ack,
        }
    }
}
