use std::time::Duration;
use anyhow::bail;

pub struct TransportConfig {
    /// If false, nobody waits for acks: `need_ack` is still put on the wire and honored by
    ///  receivers, but senders consider a packet delivered once the link accepted it.
    pub ack_enabled: bool,

    /// How long a sender waits for the ack of a unicast packet. This is also the bound for
    ///  sending an ack.
    pub ack_timeout: Duration,

    /// Default bound for handing a frame to the link when application code does not pass its
    ///  own timeout. The default follows a '1 KB per second' rule of thumb for a
    ///  max-size packet on slow serial links.
    pub send_timeout: Duration,

    /// Bound for sending a response from a worker back to the requester
    pub response_send_timeout: Duration,

    /// This is the *total* number of attempts for a single `send`, not the number of repeats.
    pub retry_count: usize,

    /// Number of worker tasks executing incoming requests. If this is 0, requests are executed
    ///  inline in the receive dispatcher, which blocks all reception while a handler runs.
    ///
    /// NB: In inline mode, a response with `need_ack` waits for its ack on the dispatcher task,
    ///  which is the task that would have to deliver the ack. Such a response therefore always
    ///  runs into `ack_timeout`, and the late ack stays in the ack table until its slot is
    ///  reused.
    pub worker_count: usize,

    /// Requests waiting for a free worker. If the queue stays full for `submit_timeout`, the
    ///  request is dropped.
    pub worker_queue_depth: usize,
    pub submit_timeout: Duration,

    /// Upper bound for the unencrypted payload of a single packet
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            ack_enabled: true,
            ack_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_millis(1024),
            response_send_timeout: Duration::from_millis(1024),
            retry_count: 2,
            worker_count: 2,
            worker_queue_depth: 20,
            submit_timeout: Duration::from_millis(100),
            max_payload_size: 1024,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_count == 0 {
            bail!("retry count must be at least 1");
        }
        if self.ack_enabled && self.ack_timeout.is_zero() {
            bail!("ack timeout must be positive if acks are enabled");
        }
        if self.send_timeout.is_zero() || self.response_send_timeout.is_zero() {
            bail!("send timeouts must be positive");
        }
        if self.worker_count > 0 && self.worker_queue_depth == 0 {
            bail!("worker queue depth must be positive if there are workers");
        }
        if self.max_payload_size == 0 || self.max_payload_size > u16::MAX as usize {
            bail!("max payload size must be in 1..={}", u16::MAX);
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn with(f: impl FnOnce(&mut TransportConfig)) -> TransportConfig {
        let mut config = TransportConfig::default();
        f(&mut config);
        config
    }

    #[rstest]
    #[case::default(TransportConfig::default(), true)]
    #[case::inline_execution(with(|c| { c.worker_count = 0; c.worker_queue_depth = 0; }), true)]
    #[case::no_acks_zero_timeout(with(|c| { c.ack_enabled = false; c.ack_timeout = Duration::ZERO; }), true)]
    #[case::zero_retries(with(|c| c.retry_count = 0), false)]
    #[case::zero_ack_timeout(with(|c| c.ack_timeout = Duration::ZERO), false)]
    #[case::zero_send_timeout(with(|c| c.send_timeout = Duration::ZERO), false)]
    #[case::zero_queue(with(|c| c.worker_queue_depth = 0), false)]
    #[case::zero_payload(with(|c| c.max_payload_size = 0), false)]
    #[case::huge_payload(with(|c| c.max_payload_size = 100_000), false)]
    fn test_validate(#[case] config: TransportConfig, #[case] expected_ok: bool) {
        assert_eq!(config.validate().is_ok(), expected_ok);
    }
}
