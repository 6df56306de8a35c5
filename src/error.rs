use crate::device_id::DeviceId;

pub type D2dResult<T> = Result<T, D2dError>;

/// Errors returned by the transport API.
///
/// Errors raised while processing a single received frame never reach application code: the
///  dispatcher logs them and drops the frame.
#[derive(Debug, thiserror::Error)]
pub enum D2dError {
    #[error("transport is already initialized")]
    AlreadyInitialized,
    #[error("transport is not initialized")]
    NotInitialized,
    #[error("transport is already started")]
    AlreadyStarted,
    #[error("transport is not started")]
    NotStarted,
    #[error("no open session with id {0}")]
    NoSuchSession(u8),
    #[error("no session id available without a correlation slot collision")]
    SessionsExhausted,
    #[error("no route to {0:?}")]
    NoRoute(DeviceId),
    #[error("link error: {0}")]
    Link(String),
    #[error("timed out waiting for ack")]
    AckTimeout,
    #[error("timed out")]
    Timeout,
    #[error("giving up after {attempts} attempts, last error: {last}")]
    RetryExhausted { attempts: usize, last: Box<D2dError> },
    #[error("failed to allocate {0} bytes")]
    OutOfMemory(usize),
    #[error("broadcast packets must not request ack or response")]
    InvalidBroadcastFlags,
    #[error("link went down")]
    Disconnected,
    #[error("security codec failure: {0}")]
    SecurityError(String),
    #[error("malformed frame of length {0}")]
    MalformedFrame(usize),
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("request queue is full")]
    QueueFull,
}

impl D2dError {
    /// Transient failures of a single send attempt. `D2dTransport::send` re-attempts on these,
    ///  everything else is returned to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, D2dError::NoRoute(_) | D2dError::Link(_) | D2dError::AckTimeout)
    }

    pub fn link(e: anyhow::Error) -> D2dError {
        D2dError::Link(format!("{:#}", e))
    }

    pub fn security(e: anyhow::Error) -> D2dError {
        D2dError::SecurityError(format!("{:#}", e))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::no_route(D2dError::NoRoute(DeviceId(3)), true)]
    #[case::link(D2dError::Link("x".to_string()), true)]
    #[case::ack_timeout(D2dError::AckTimeout, true)]
    #[case::timeout(D2dError::Timeout, false)]
    #[case::disconnected(D2dError::Disconnected, false)]
    #[case::oom(D2dError::OutOfMemory(12), false)]
    #[case::security(D2dError::SecurityError("x".to_string()), false)]
    #[case::too_large(D2dError::PayloadTooLarge { len: 2000, max: 1024 }, false)]
    #[case::broadcast_flags(D2dError::InvalidBroadcastFlags, false)]
    fn test_is_retryable(#[case] error: D2dError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_display_retry_exhausted() {
        let e = D2dError::RetryExhausted { attempts: 2, last: Box::new(D2dError::AckTimeout) };
        assert_eq!(e.to_string(), "giving up after 2 attempts, last error: timed out waiting for ack");
    }
}
