use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};
use crate::device_id::{DeviceId, PortId};
use crate::link::Peer;

#[derive(Debug, Clone, Copy)]
struct PeerEntry {
    last_seen: Instant,
    /// configured rather than learned, never expires
    is_static: bool,
}

/// An ARP-like table of which device is reachable through which port. Entries are learned from
///  the source id of received frames and refreshed when sending.
///
/// NB: A device can be known on several ports, e.g. if it is reachable both directly and through
///  a relaying device. Routing picks the port it was seen on most recently.
#[derive(Default)]
pub struct PeerTable {
    entries: Mutex<FxHashMap<(PortId, DeviceId), PeerEntry>>,
}

impl PeerTable {
    pub fn add_static(&self, port_id: PortId, dev_id: DeviceId) {
        debug!("adding static peer {:?} on port {:?}", dev_id, port_id);
        self.entries.lock().insert((port_id, dev_id), PeerEntry {
            last_seen: Instant::now(),
            is_static: true,
        });
    }

    /// Records that a frame from `src_id` was received on a port. The source of a frame is its
    ///  first byte.
    pub fn learn(&self, port_id: PortId, src_id: DeviceId) {
        if src_id.is_broadcast() || src_id.is_receiver() {
            return;
        }

        let mut entries = self.entries.lock();
        match entries.get_mut(&(port_id, src_id)) {
            Some(entry) => entry.last_seen = Instant::now(),
            None => {
                debug!("learned peer {:?} on port {:?}", src_id, port_id);
                entries.insert((port_id, src_id), PeerEntry {
                    last_seen: Instant::now(),
                    is_static: false,
                });
            }
        }
    }

    /// Refreshes an existing entry after sending to it
    pub fn refresh(&self, port_id: PortId, dst_id: DeviceId) {
        if let Some(entry) = self.entries.lock().get_mut(&(port_id, dst_id)) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn route(&self, dst_id: DeviceId) -> Option<PortId> {
        let result = self.entries.lock().iter()
            .filter(|((_, dev_id), _)| *dev_id == dst_id)
            .max_by_key(|(_, entry)| entry.last_seen)
            .map(|((port_id, _), _)| *port_id);
        trace!("route to {:?}: {:?}", dst_id, result);
        result
    }

    pub fn peers(&self) -> Vec<Peer> {
        let mut result = self.entries.lock().keys()
            .map(|(port_id, dev_id)| Peer { port_id: *port_id, dev_id: *dev_id })
            .collect::<Vec<_>>();
        result.sort_by_key(|p| (p.port_id, p.dev_id));
        result
    }

    /// Removes all learned entries of a port, e.g. after the link went down
    pub fn forget_port(&self, port_id: PortId) {
        self.entries.lock()
            .retain(|(p, _), entry| *p != port_id || entry.is_static);
    }

    /// Removes learned entries that were not seen for some time
    pub fn expire(&self, max_age: Duration) {
        let now = Instant::now();
        self.entries.lock().retain(|(port_id, dev_id), entry| {
            let keep = entry.is_static || now.duration_since(entry.last_seen) <= max_age;
            if !keep {
                debug!("expiring peer {:?} on port {:?}", dev_id, port_id);
            }
            keep
        });
    }
}
