use std::sync::Arc;
use std::time::Duration;
use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};
use crate::codec;
use crate::config::TransportConfig;
use crate::correlation::ResultTables;
use crate::device_id::{DeviceId, PortId};
use crate::error::{D2dError, D2dResult};
use crate::link::LinkLayer;
use crate::packet::{D2dPacket, PacketType};
use crate::security::SecurityCodec;

/// Everything that puts frames on the link: application sends, relayed packets, responses
///  and acks.
#[derive(Clone)]
pub struct SendPath {
    link: Arc<dyn LinkLayer>,
    security: Arc<dyn SecurityCodec>,
    tables: Arc<ResultTables>,
    config: Arc<TransportConfig>,
}

impl SendPath {
    pub fn new(link: Arc<dyn LinkLayer>, security: Arc<dyn SecurityCodec>, tables: Arc<ResultTables>, config: Arc<TransportConfig>) -> SendPath {
        SendPath { link, security, tables, config }
    }

    /// Hands a packet to the link on the port leading to `dst_id`, without waiting for an ack
    pub async fn forward(&self, dst_id: DeviceId, pkt: &D2dPacket, timeout: Duration) -> D2dResult<()> {
        let frame = codec::encode(pkt, self.security.as_ref())?;
        let port = self.link.route(dst_id)
            .ok_or(D2dError::NoRoute(dst_id))?;

        trace!("sending {:?} to {:?} via {:?}", pkt, dst_id, port);
        self.link.send(port, &frame, timeout).await
            .map_err(D2dError::link)
    }

    /// Sends a packet and - if it asks for an ack and acks are enabled - waits for the ack
    pub async fn send_unicast(&self, dst_id: DeviceId, pkt: &D2dPacket, timeout: Duration) -> D2dResult<()> {
        self.forward(dst_id, pkt, timeout).await?;

        if !self.tables.try_claim_ack(pkt) {
            return Ok(());
        }

        match self.tables.acks.wait(pkt.pkt_id(), pkt.dst_id(), self.config.ack_timeout).await {
            Ok(_) => {
                trace!("got ack for {:?}", pkt);
                Ok(())
            }
            Err(D2dError::Timeout) => {
                debug!("no ack for {:?}", pkt);
                Err(D2dError::AckTimeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends a packet once on every port that has known peers, except for `exclude_port` which
    ///  is the port a relayed broadcast arrived on. Failing to send on some port does not
    ///  prevent sending on other ports.
    pub async fn send_broadcast(&self, pkt: &D2dPacket, timeout: Duration, exclude_port: Option<PortId>) -> D2dResult<()> {
        if pkt.info.need_ack || pkt.info.need_rsp {
            return Err(D2dError::InvalidBroadcastFlags);
        }

        let frame = codec::encode(pkt, self.security.as_ref())?;

        let mut sent_ports = FxHashSet::default();
        for peer in self.link.peers() {
            if Some(peer.port_id) == exclude_port || !sent_ports.insert(peer.port_id) {
                continue;
            }

            trace!("broadcasting {:?} on {:?}", pkt, peer.port_id);
            if let Err(e) = self.link.send(peer.port_id, &frame, timeout).await {
                warn!("error broadcasting on {:?}: {}", peer.port_id, e);
            }
        }
        Ok(())
    }

    /// Acknowledges a received request or response. Acks are never acknowledged.
    pub async fn send_ack(&self, for_pkt: &D2dPacket) -> D2dResult<()> {
        if for_pkt.pkt_type() == PacketType::Ack {
            return Ok(());
        }

        let ack = for_pkt.ack();
        self.forward(ack.dst_id(), &ack, self.config.ack_timeout).await
    }
}
