use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use crate::device_id::{DeviceId, PortId};
use crate::link::peer_table::PeerTable;
use crate::link::{LinkLayer, LinkStatus, LinkStatusListener, Peer};

#[derive(Default)]
struct MemoryPort {
    inbound: VecDeque<Bytes>,
    remote: Option<(Weak<MemoryLinkLayer>, PortId)>,
    fail_sends: bool,
}

/// An in-process link layer for simulating several devices in one process. Ports of different
///  instances are wired pairwise, like the two ends of a serial line.
///
/// Frames are delivered reliably and in order unless failures are injected.
pub struct MemoryLinkLayer {
    mtu: usize,
    ports: Mutex<FxHashMap<PortId, MemoryPort>>,
    peer_table: PeerTable,
    ready_send: Mutex<Option<mpsc::UnboundedSender<PortId>>>,
    ready_recv: tokio::sync::Mutex<mpsc::UnboundedReceiver<PortId>>,
    status_listener: Mutex<Option<Arc<dyn LinkStatusListener>>>,
}

impl MemoryLinkLayer {
    pub fn new(mtu: usize) -> Arc<MemoryLinkLayer> {
        let (ready_send, ready_recv) = mpsc::unbounded_channel();
        Arc::new(MemoryLinkLayer {
            mtu,
            ports: Default::default(),
            peer_table: Default::default(),
            ready_send: Mutex::new(Some(ready_send)),
            ready_recv: tokio::sync::Mutex::new(ready_recv),
            status_listener: Default::default(),
        })
    }

    /// Wires port `port_a` of `a` to port `port_b` of `b`
    pub fn connect(a: &Arc<MemoryLinkLayer>, port_a: PortId, b: &Arc<MemoryLinkLayer>, port_b: PortId) {
        a.ports.lock().entry(port_a).or_default().remote = Some((Arc::downgrade(b), port_b));
        b.ports.lock().entry(port_b).or_default().remote = Some((Arc::downgrade(a), port_a));
    }

    pub fn add_peer(&self, port_id: PortId, dev_id: DeviceId) {
        self.peer_table.add_static(port_id, dev_id);
    }

    pub fn peer_table(&self) -> &PeerTable {
        &self.peer_table
    }

    /// Makes all subsequent sends on a port fail (or succeed again)
    pub fn set_send_failure(&self, port_id: PortId, fail_sends: bool) {
        self.ports.lock().entry(port_id).or_default().fail_sends = fail_sends;
    }

    /// Delivers a raw frame as if it had arrived on a port
    pub fn inject_frame(&self, port_id: PortId, frame: &[u8]) {
        self.deliver(port_id, Bytes::copy_from_slice(frame));
    }

    /// Simulates a status change of a port, notifying the registered listener
    pub fn set_link_status(&self, port_id: PortId, status: LinkStatus) {
        debug!("port {:?} is now {:?}", port_id, status);
        if status == LinkStatus::Down {
            self.peer_table.forget_port(port_id);
        }

        let listener = self.status_listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_link_status(port_id, status);
        }
    }

    /// After closing, `wait_ready` returns `None` once all pending frames were signalled
    pub fn close(&self) {
        self.ready_send.lock().take();
    }

    fn deliver(&self, port_id: PortId, frame: Bytes) {
        trace!("delivering {} bytes on port {:?}", frame.len(), port_id);
        self.ports.lock().entry(port_id).or_default().inbound.push_back(frame);
        if let Some(ready_send) = self.ready_send.lock().as_ref() {
            let _ = ready_send.send(port_id);
        }
    }
}

#[async_trait]
impl LinkLayer for MemoryLinkLayer {
    fn mtu(&self, _port: PortId) -> usize {
        self.mtu
    }

    fn route(&self, dst: DeviceId) -> Option<PortId> {
        self.peer_table.route(dst)
    }

    fn peers(&self) -> Vec<Peer> {
        self.peer_table.peers()
    }

    async fn send(&self, port: PortId, frame: &[u8], _timeout: Duration) -> anyhow::Result<()> {
        if frame.len() > self.mtu {
            bail!("frame of {} bytes exceeds MTU {}", frame.len(), self.mtu);
        }

        let remote = {
            let ports = self.ports.lock();
            let memory_port = ports.get(&port)
                .ok_or_else(|| anyhow!("port {:?} is not connected", port))?;
            if memory_port.fail_sends {
                bail!("injected send failure on port {:?}", port);
            }
            memory_port.remote.clone()
        };

        let (remote, remote_port) = remote
            .ok_or_else(|| anyhow!("port {:?} is not connected", port))?;
        let remote = remote.upgrade()
            .ok_or_else(|| anyhow!("remote end of port {:?} is gone", port))?;

        if let Some(&dst) = frame.get(1) {
            self.peer_table.refresh(port, DeviceId(dst));
        }
        remote.deliver(remote_port, Bytes::copy_from_slice(frame));
        Ok(())
    }

    async fn receive(&self, port: PortId, buf: &mut BytesMut) -> anyhow::Result<()> {
        let frame = self.ports.lock()
            .get_mut(&port)
            .and_then(|p| p.inbound.pop_front())
            .ok_or_else(|| anyhow!("no frame available on port {:?}", port))?;

        if frame.len() > buf.capacity() - buf.len() {
            bail!("frame of {} bytes does not fit the receive buffer", frame.len());
        }
        if let Some(&src) = frame.first() {
            self.peer_table.learn(port, DeviceId(src));
        }
        buf.put_slice(&frame);
        Ok(())
    }

    async fn wait_ready(&self) -> Option<PortId> {
        self.ready_recv.lock().await
            .recv().await
    }

    fn set_status_listener(&self, listener: Arc<dyn LinkStatusListener>) {
        *self.status_listener.lock() = Some(listener);
    }
}
