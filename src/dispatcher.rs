use std::sync::Arc;
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::codec;
use crate::config::TransportConfig;
use crate::correlation::ResultTables;
use crate::device_id::{DeviceId, PortId};
use crate::link::LinkLayer;
use crate::packet::Classification;
use crate::pbuf::PBuf;
use crate::request_exec::RequestExecutor;
use crate::security::SecurityCodec;
use crate::send_path::SendPath;

/// The dispatcher is where received frames enter the transport: it waits for the link to signal
///  a frame, decodes it and routes it to relaying, request execution or the correlation tables.
///
/// A bad frame never terminates the dispatcher, it is logged and dropped.
pub struct Dispatcher {
    self_id: DeviceId,
    link: Arc<dyn LinkLayer>,
    security: Arc<dyn SecurityCodec>,
    send_path: SendPath,
    tables: Arc<ResultTables>,
    executor: Arc<RequestExecutor>,
    config: Arc<TransportConfig>,
}

impl Dispatcher {
    pub fn new(
        self_id: DeviceId,
        link: Arc<dyn LinkLayer>,
        security: Arc<dyn SecurityCodec>,
        send_path: SendPath,
        tables: Arc<ResultTables>,
        executor: Arc<RequestExecutor>,
        config: Arc<TransportConfig>,
    ) -> Dispatcher {
        Dispatcher {
            self_id,
            link,
            security,
            send_path,
            tables,
            executor,
            config,
        }
    }

    pub async fn recv_loop(&self) {
        info!("starting receive dispatcher for {:?}", self.self_id);

        while let Some(port) = self.link.wait_ready().await {
            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "frame_received", ?correlation_id);
            self.on_frame_ready(port)
                .instrument(span)
                .await;
        }

        info!("link layer closed - receive dispatcher for {:?} terminated", self.self_id);
    }

    async fn on_frame_ready(&self, port: PortId) {
        let mut buf = match PBuf::alloc(self.link.mtu(port)) {
            Ok(buf) => buf,
            Err(e) => {
                warn!("dropping frame on {:?}: {}", port, e);
                return;
            }
        };

        if let Err(e) = self.link.receive(port, buf.buf_mut()).await {
            warn!("error receiving frame on {:?}: {} - dropping", port, e);
            return;
        }
        trace!("received frame on {:?}: {:?}", port, &buf[..]);

        let pkt = match codec::decode(&buf, self.security.as_ref()) {
            Ok(pkt) => pkt,
            Err(e) => {
                debug!("undecodable frame on {:?}: {} - dropping", port, e);
                return;
            }
        };
        drop(buf);

        if pkt.src_id() == self.self_id {
            debug!("received {:?} with own source id on {:?} - dropping", pkt, port);
            return;
        }

        match codec::classify(&pkt, self.self_id) {
            Classification::Proxy => {
                trace!("relaying {:?}", pkt);
                if let Err(e) = self.send_path.forward(pkt.dst_id(), &pkt, self.config.send_timeout).await {
                    debug!("error relaying {:?}: {}", pkt, e);
                }
            }
            Classification::Broadcast => {
                trace!("relaying broadcast {:?}", pkt);
                if let Err(e) = self.send_path.send_broadcast(&pkt, self.config.send_timeout, Some(port)).await {
                    debug!("error relaying broadcast {:?}: {}", pkt, e);
                }
            }
            Classification::Request => self.executor.execute(pkt).await,
            Classification::Response => self.tables.requests.store_response(pkt.pkt_id(), pkt.src_id(), pkt),
            Classification::Ack => self.tables.acks.store_ack(pkt.pkt_id(), pkt.src_id()),
        }
    }
}
