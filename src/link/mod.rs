//! The interface to the physical links (UART, USB, sockets, ...) that frames travel over, plus
//!  link implementations.
//!
//! A link layer has one or several *ports*, each connecting this device to one or more peer
//!  devices. Link layers are responsible for keeping track of which peer is reachable through
//!  which port, typically by learning source ids from received frames (see [peer_table]).

pub mod peer_table;
pub mod memory;
pub mod udp;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use crate::device_id::{DeviceId, PortId};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Peer {
    pub port_id: PortId,
    pub dev_id: DeviceId,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkStatus {
    Up,
    Down,
}

/// Callback for link status changes. This is called from inside the link layer, so
///  implementations must not block.
pub trait LinkStatusListener: Send + Sync {
    fn on_link_status(&self, port: PortId, status: LinkStatus);
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LinkLayer: Send + Sync + 'static {
    /// the maximum frame size that can be received on a port
    fn mtu(&self, port: PortId) -> usize;

    /// the port through which a device was seen most recently
    fn route(&self, dst: DeviceId) -> Option<PortId>;

    fn peers(&self) -> Vec<Peer>;

    async fn send(&self, port: PortId, frame: &[u8], timeout: Duration) -> anyhow::Result<()>;

    /// Reads the next frame that arrived on a port into a buffer. This is called once for each
    ///  time `wait_ready` returned the port.
    async fn receive(&self, port: PortId, buf: &mut BytesMut) -> anyhow::Result<()>;

    /// Waits until a frame arrived on some port. Returns `None` once the link layer is closed.
    async fn wait_ready(&self) -> Option<PortId>;

    fn set_status_listener(&self, listener: Arc<dyn LinkStatusListener>);
}
