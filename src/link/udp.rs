use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};
use crate::device_id::{DeviceId, PortId};
use crate::link::peer_table::PeerTable;
use crate::link::{LinkLayer, LinkStatus, LinkStatusListener, Peer};

#[derive(Default)]
struct PortAddrs {
    by_port: FxHashMap<PortId, SocketAddr>,
    by_addr: FxHashMap<SocketAddr, PortId>,
    next_port: u8,
}

impl PortAddrs {
    fn port_for(&mut self, addr: SocketAddr) -> anyhow::Result<PortId> {
        if let Some(port) = self.by_addr.get(&addr) {
            return Ok(*port);
        }
        if self.by_port.len() > u8::MAX as usize {
            bail!("no port id left for {:?}", addr);
        }

        let port = PortId(self.next_port);
        self.next_port = self.next_port.wrapping_add(1);
        self.by_port.insert(port, addr);
        self.by_addr.insert(addr, port);
        Ok(port)
    }
}

/// A link layer on top of a single UDP socket. Every remote socket address is treated as a
///  port of its own, so the transport's per-port logic (e.g. sending broadcasts once per port)
///  works unchanged.
///
/// Remote addresses are either configured with [UdpLinkLayer::add_peer] or learned from
///  received datagrams.
///
/// UDP has no notion of a connection, so the only link-down signal is the socket failing to
///  send to an address: the address's port is then reported as down, and peers learned on it
///  are forgotten. Timeouts and receive errors are not reported.
pub struct UdpLinkLayer {
    socket: UdpSocket,
    mtu: usize,
    addrs: Mutex<PortAddrs>,
    peer_table: PeerTable,
    pending: Mutex<VecDeque<(PortId, Bytes)>>,
    closed: AtomicBool,
    close_notify: Notify,
    status_listener: Mutex<Option<Arc<dyn LinkStatusListener>>>,
}

impl UdpLinkLayer {
    pub async fn bind(addr: SocketAddr, mtu: usize) -> anyhow::Result<Arc<UdpLinkLayer>> {
        let socket = UdpSocket::bind(addr).await?;
        info!("bound UDP link to {:?}", socket.local_addr()?);

        Ok(Arc::new(UdpLinkLayer {
            socket,
            mtu,
            addrs: Default::default(),
            peer_table: Default::default(),
            pending: Default::default(),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            status_listener: Default::default(),
        }))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Registers a device at a remote address, returning the port representing that address
    pub fn add_peer(&self, dev_id: DeviceId, addr: SocketAddr) -> anyhow::Result<PortId> {
        let port = self.addrs.lock().port_for(addr)?;
        self.peer_table.add_static(port, dev_id);
        Ok(port)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    fn notify_status(&self, port: PortId, status: LinkStatus) {
        let listener = self.status_listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_link_status(port, status);
        }
    }
}

#[async_trait]
impl LinkLayer for UdpLinkLayer {
    fn mtu(&self, _port: PortId) -> usize {
        self.mtu
    }

    fn route(&self, dst: DeviceId) -> Option<PortId> {
        self.peer_table.route(dst)
    }

    fn peers(&self) -> Vec<Peer> {
        self.peer_table.peers()
    }

    async fn send(&self, port: PortId, frame: &[u8], timeout: Duration) -> anyhow::Result<()> {
        let addr = self.addrs.lock().by_port.get(&port).cloned()
            .ok_or_else(|| anyhow!("no address for port {:?}", port))?;

        trace!("UDP link: sending {} bytes to {:?}", frame.len(), addr);
        let result = tokio::time::timeout(timeout, self.socket.send_to(frame, addr)).await
            .map_err(|_| anyhow!("timeout sending to {:?}", addr))?;
        if let Err(e) = result {
            warn!("UDP link: error sending to {:?} - reporting {:?} as down: {}", addr, port, e);
            self.peer_table.forget_port(port);
            self.notify_status(port, LinkStatus::Down);
            return Err(e.into());
        }

        if let Some(&dst) = frame.get(1) {
            self.peer_table.refresh(port, DeviceId(dst));
        }
        Ok(())
    }

    async fn receive(&self, port: PortId, buf: &mut BytesMut) -> anyhow::Result<()> {
        let frame = {
            let mut pending = self.pending.lock();
            let pos = pending.iter().position(|(p, _)| *p == port)
                .ok_or_else(|| anyhow!("no frame available on port {:?}", port))?;
            pending.remove(pos)
        };
        let (_, frame) = frame.ok_or_else(|| anyhow!("no frame available on port {:?}", port))?;

        if let Some(&src) = frame.first() {
            self.peer_table.learn(port, DeviceId(src));
        }
        buf.put_slice(&frame);
        Ok(())
    }

    async fn wait_ready(&self) -> Option<PortId> {
        let mut buf = vec![0u8; self.mtu];
        loop {
            let notified = self.close_notify.notified();
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let (num_read, from) = tokio::select! {
                _ = notified => return None,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(x) => x,
                    Err(e) => {
                        error!("socket error: {}", e);
                        continue;
                    }
                }
            };

            let port = match self.addrs.lock().port_for(from) {
                Ok(port) => port,
                Err(e) => {
                    debug!("dropping datagram: {}", e);
                    continue;
                }
            };
            trace!("UDP link: received {} bytes from {:?} on port {:?}", num_read, from, port);
            self.pending.lock().push_back((port, Bytes::copy_from_slice(&buf[..num_read])));
            return Some(port);
        }
    }

    fn set_status_listener(&self, listener: Arc<dyn LinkStatusListener>) {
        *self.status_listener.lock() = Some(listener);
    }
}
