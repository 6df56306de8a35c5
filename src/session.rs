use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;
use crate::device_id::{DeviceId, PacketId};
use crate::error::{D2dError, D2dResult};

/// A conversation with a destination device. The session id doubles as the packet id of
///  every packet sent through the session, correlating responses and acks.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Session {
    pub id: u8,
    pub dst_id: DeviceId,
}

impl Session {
    pub fn pkt_id(&self) -> PacketId {
        PacketId(self.id)
    }
}

struct SessionState {
    sessions: FxHashMap<u8, Session>,
    counter: u8,
}

/// The set of open sessions.
///
/// No two open sessions share a correlation slot, i.e. session ids are unique modulo
///  [crate::device_id::SLOT_COUNT]. Since that leaves room for at most `SLOT_COUNT` sessions,
///  opening more fails.
pub struct SessionRegistry {
    state: Mutex<SessionState>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry {
            state: Mutex::new(SessionState {
                sessions: FxHashMap::default(),
                counter: 0,
            }),
        }
    }
}

impl SessionRegistry {
    pub fn open(&self, dst_id: DeviceId) -> D2dResult<u8> {
        let mut state = self.state.lock();
        let num_candidates = state.sessions.len() + 1;
        assert!(num_candidates < 256, "number of open sessions is limited by the id space");

        for _ in 0..num_candidates {
            // ids wrap at 255, so a session id never equals the 'empty slot' marker. NB: the u8
            //  counter itself wraps at 256, so 0 comes up twice in a row at the wrap; that
            //  candidate is simply tried twice.
            let candidate = state.counter % 0xFF;
            state.counter = state.counter.wrapping_add(1);

            let slot = PacketId(candidate).slot_index();
            if state.sessions.values().all(|s| s.pkt_id().slot_index() != slot) {
                let session = Session { id: candidate, dst_id };
                state.sessions.insert(candidate, session);
                debug!("opened session {} to {:?}", candidate, dst_id);
                return Ok(candidate);
            }
        }

        debug!("no session id available for {:?}, {} sessions are open", dst_id, state.sessions.len());
        Err(D2dError::SessionsExhausted)
    }

    pub fn close(&self, session_id: u8) -> D2dResult<()> {
        match self.state.lock().sessions.remove(&session_id) {
            Some(session) => {
                debug!("closed session {} to {:?}", session_id, session.dst_id);
                Ok(())
            }
            None => Err(D2dError::NoSuchSession(session_id)),
        }
    }

    pub fn lookup(&self, session_id: u8) -> Option<Session> {
        self.state.lock().sessions.get(&session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
