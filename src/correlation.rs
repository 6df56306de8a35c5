use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, trace, warn};
use crate::device_id::{DeviceId, PacketId, PortId, SLOT_COUNT};
use crate::error::{D2dError, D2dResult};
use crate::link::{LinkStatus, LinkStatusListener};
use crate::packet::{D2dPacket, PacketType};

/// Outcome of looking for a specific (packet id, source) pair in a correlation slot
#[derive(Debug, Eq, PartialEq)]
pub enum SlotMatch {
    /// The slot held the expected result. The contained packet was moved out of the slot,
    ///  which is empty afterwards. Ack results carry no packet.
    Matched(Option<D2dPacket>),
    /// The slot holds a result for some other conversation that happens to map to the same
    ///  slot index
    Foreign,
    Empty,
}

struct Slot {
    expected_pkt_id: PacketId,
    expected_src_id: DeviceId,
    packet: Option<D2dPacket>,
}

impl Slot {
    fn empty() -> Slot {
        Slot {
            expected_pkt_id: PacketId::EMPTY,
            expected_src_id: DeviceId::BROADCAST,
            packet: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.expected_pkt_id == PacketId::EMPTY
    }
}

struct TableState {
    slots: [Slot; SLOT_COUNT],
    /// bit `i` is set while slot `i` holds a result that no waiter has looked at yet
    event_bits: u32,
    /// incremented on every link-down event
    disconnect_epoch: u64,
}

impl TableState {
    fn store(&mut self, index: usize, pkt_id: PacketId, src_id: DeviceId, packet: Option<D2dPacket>) {
        let slot = &mut self.slots[index];
        if !slot.is_empty() {
            debug!("slot {} still holds a result for {:?} from {:?} - replacing it", index, slot.expected_pkt_id, slot.expected_src_id);
        }
        // the previous packet (if any) is dropped here
        *slot = Slot {
            expected_pkt_id: pkt_id,
            expected_src_id: src_id,
            packet,
        };
        self.event_bits |= 1 << index;
    }

    fn match_and_consume(&mut self, pkt_id: PacketId, src_id: DeviceId) -> SlotMatch {
        let slot = &mut self.slots[pkt_id.slot_index()];
        if slot.is_empty() {
            SlotMatch::Empty
        }
        else if slot.expected_pkt_id == pkt_id && slot.expected_src_id == src_id {
            let packet = slot.packet.take();
            *slot = Slot::empty();
            SlotMatch::Matched(packet)
        }
        else {
            SlotMatch::Foreign
        }
    }

    fn empty(&mut self, index: usize) {
        self.slots[index] = Slot::empty();
        self.event_bits &= !(1 << index);
    }
}


/// A fixed set of slots holding results (responses or acks) that arrived for packets sent by
///  this device, and the machinery for waiting for them.
///
/// Results are indexed by `pkt_id % SLOT_COUNT`, so two conversations can compete for the same
///  slot. This is resolved by verifying both packet id and source on retrieval: a waiter that
///  finds a foreign result discards it and keeps waiting.
///
/// NB: The lock is held only for manipulating slots and event bits, never across an `.await`
pub struct CorrelationTable {
    name: &'static str,
    state: Mutex<TableState>,
    notify: Notify,
}

impl CorrelationTable {
    pub fn new(name: &'static str) -> CorrelationTable {
        CorrelationTable {
            name,
            state: Mutex::new(TableState {
                slots: std::array::from_fn(|_| Slot::empty()),
                event_bits: 0,
                disconnect_epoch: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Stores a response packet, replacing whatever the slot held before
    pub fn store_response(&self, pkt_id: PacketId, src_id: DeviceId, packet: D2dPacket) {
        trace!("{}: storing {:?}", self.name, packet);
        self.state.lock().store(pkt_id.slot_index(), pkt_id, src_id, Some(packet));
        self.notify.notify_waiters();
    }

    pub fn store_ack(&self, pkt_id: PacketId, src_id: DeviceId) {
        trace!("{}: storing ack for {:?} from {:?}", self.name, pkt_id, src_id);
        self.state.lock().store(pkt_id.slot_index(), pkt_id, src_id, None);
        self.notify.notify_waiters();
    }

    pub fn match_and_consume(&self, pkt_id: PacketId, src_id: DeviceId) -> SlotMatch {
        self.state.lock().match_and_consume(pkt_id, src_id)
    }

    pub fn empty(&self, index: usize) {
        self.state.lock().empty(index);
    }

    /// Wakes all waits that are in progress, failing them with `Disconnected`
    pub fn disconnect_all(&self) {
        self.state.lock().disconnect_epoch += 1;
        self.notify.notify_waiters();
    }

    /// Waits for the result for a given packet id from a given source. Results stored before
    ///  the wait started are found as well.
    ///
    /// The slot is empty when this function returns, whether successfully or not.
    pub async fn wait(&self, pkt_id: PacketId, src_id: DeviceId, timeout: Duration) -> D2dResult<Option<D2dPacket>> {
        let index = pkt_id.slot_index();
        let bit = 1u32 << index;
        let deadline = Instant::now() + timeout;
        let epoch = self.state.lock().disconnect_epoch;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register for notifications before checking, so a store between check and await
            //  is not lost
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.disconnect_epoch != epoch {
                    debug!("{}: link went down while waiting for {:?} from {:?}", self.name, pkt_id, src_id);
                    state.empty(index);
                    return Err(D2dError::Disconnected);
                }

                if state.event_bits & bit != 0 {
                    state.event_bits &= !bit;
                    match state.match_and_consume(pkt_id, src_id) {
                        SlotMatch::Matched(packet) => {
                            trace!("{}: got result for {:?} from {:?}", self.name, pkt_id, src_id);
                            return Ok(packet);
                        }
                        SlotMatch::Foreign => {
                            debug!("{}: slot {} holds a result for a different conversation while waiting for {:?} from {:?} - discarding it", self.name, index, pkt_id, src_id);
                            state.empty(index);
                        }
                        SlotMatch::Empty => {}
                    }
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                debug!("{}: timeout waiting for {:?} from {:?}", self.name, pkt_id, src_id);
                self.state.lock().empty(index);
                return Err(D2dError::Timeout);
            }
        }
    }

    /// Waits for the first fresh result in any slot, regardless of conversation. Results without
    ///  a packet are skipped.
    pub async fn wait_any(&self, timeout: Duration) -> D2dResult<D2dPacket> {
        let deadline = Instant::now() + timeout;
        let epoch = self.state.lock().disconnect_epoch;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.disconnect_epoch != epoch {
                    return Err(D2dError::Disconnected);
                }

                while state.event_bits != 0 {
                    let index = state.event_bits.trailing_zeros() as usize;
                    let packet = state.slots[index].packet.take();
                    state.empty(index);
                    if let Some(packet) = packet {
                        trace!("{}: got result {:?} in slot {}", self.name, packet, index);
                        return Ok(packet);
                    }
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Err(D2dError::Timeout);
            }
        }
    }
}


/// The two correlation tables of a device: one for responses to requests this device sent, and
///  one for acks.
pub struct ResultTables {
    pub requests: CorrelationTable,
    pub acks: CorrelationTable,
    ack_enabled: bool,
}

impl ResultTables {
    pub fn new(ack_enabled: bool) -> ResultTables {
        ResultTables {
            requests: CorrelationTable::new("request results"),
            acks: CorrelationTable::new("ack results"),
            ack_enabled,
        }
    }

    /// Returns true if the sender of a packet should wait for an ack after sending it. No slot
    ///  is reserved: an ack that arrives before the wait starts is found by the wait.
    pub fn try_claim_ack(&self, packet: &D2dPacket) -> bool {
        self.ack_enabled
            && packet.info.need_ack
            && matches!(packet.pkt_type(), PacketType::Request | PacketType::Response)
    }

    pub fn disconnect_all(&self) {
        self.requests.disconnect_all();
        self.acks.disconnect_all();
    }
}

impl LinkStatusListener for ResultTables {
    fn on_link_status(&self, port: PortId, status: LinkStatus) {
        match status {
            LinkStatus::Up => debug!("link {:?} is up", port),
            LinkStatus::Down => {
                warn!("link {:?} went down - failing all pending waits", port);
                self.disconnect_all();
            }
        }
    }
}
