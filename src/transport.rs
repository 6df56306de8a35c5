use std::sync::{Arc, OnceLock};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::config::TransportConfig;
use crate::correlation::ResultTables;
use crate::device_id::DeviceId;
use crate::dispatcher::Dispatcher;
use crate::error::{D2dError, D2dResult};
use crate::link::LinkLayer;
use crate::packet::{D2dPacket, Packet};
use crate::request_exec::{HandlerSlot, RequestExecutor, RequestHandler};
use crate::security::SecurityCodec;
use crate::send_path::SendPath;
use crate::session::SessionRegistry;

/// The running parts of a started transport
struct Running {
    dispatcher: JoinHandle<()>,
    executor: Arc<RequestExecutor>,
}

impl Running {
    fn stop(&self) {
        self.dispatcher.abort();
        self.executor.shutdown();
    }
}

struct TransportInner {
    config: Arc<TransportConfig>,
    link: Arc<dyn LinkLayer>,
    security: Arc<dyn SecurityCodec>,
    self_id: OnceLock<DeviceId>,
    sessions: SessionRegistry,
    tables: Arc<ResultTables>,
    handler: Arc<HandlerSlot>,
    send_path: SendPath,
    running: Mutex<Option<Running>>,
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.stop();
        }
    }
}

/// A device's endpoint for D2D messaging. This is cheap to clone, all clones share the same
///  state.
///
/// Lifecycle: `new` -> `init` (assigns the device id) -> `start` (spawns the receive
///  dispatcher and request workers). Sessions can be opened after `init`, sending and receiving
///  requires `start`.
///
/// Each session supports one conversation at a time: sending on a session and receiving its
///  response from several tasks concurrently has undefined results.
///
/// A device normally runs a single transport, but this is not enforced per process: `init`
///  guards each instance against being initialized twice, and several instances (e.g.
///  simulated devices) can live in the same process.
#[derive(Clone)]
pub struct D2dTransport {
    inner: Arc<TransportInner>,
}

impl D2dTransport {
    pub fn new(config: TransportConfig, link: Arc<dyn LinkLayer>, security: Arc<dyn SecurityCodec>) -> anyhow::Result<D2dTransport> {
        config.validate()?;

        let config = Arc::new(config);
        let tables = Arc::new(ResultTables::new(config.ack_enabled));
        let send_path = SendPath::new(link.clone(), security.clone(), tables.clone(), config.clone());

        Ok(D2dTransport {
            inner: Arc::new(TransportInner {
                config,
                link,
                security,
                self_id: OnceLock::new(),
                sessions: SessionRegistry::default(),
                tables,
                handler: Default::default(),
                send_path,
                running: Default::default(),
            })
        })
    }

    pub fn init(&self, self_id: DeviceId) -> D2dResult<()> {
        self.inner.self_id.set(self_id)
            .map_err(|_| D2dError::AlreadyInitialized)?;
        info!("initialized D2D transport as {:?}", self_id);
        Ok(())
    }

    pub fn self_id(&self) -> Option<DeviceId> {
        self.inner.self_id.get().cloned()
    }

    fn require_init(&self) -> D2dResult<DeviceId> {
        self.self_id()
            .ok_or(D2dError::NotInitialized)
    }

    fn require_started(&self) -> D2dResult<DeviceId> {
        let self_id = self.require_init()?;
        if !self.is_started() {
            return Err(D2dError::NotStarted);
        }
        Ok(self_id)
    }

    /// Spawns the receive dispatcher and the request workers, and registers for link status
    ///  notifications.
    ///
    /// NB: This must be called from inside a tokio runtime
    pub fn start(&self) -> D2dResult<()> {
        let self_id = self.require_init()?;

        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Err(D2dError::AlreadyStarted);
        }

        self.inner.link.set_status_listener(self.inner.tables.clone());

        let executor = Arc::new(RequestExecutor::new(&self.inner.config, self.inner.send_path.clone(), self.inner.handler.clone()));
        let dispatcher = Dispatcher::new(
            self_id,
            self.inner.link.clone(),
            self.inner.security.clone(),
            self.inner.send_path.clone(),
            self.inner.tables.clone(),
            executor.clone(),
            self.inner.config.clone(),
        );
        let dispatcher = tokio::spawn(async move {
            dispatcher.recv_loop().await
        });

        *running = Some(Running {
            dispatcher,
            executor,
        });
        info!("started D2D transport for {:?}", self_id);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Stops the receive dispatcher and request workers. Pending waits are not interrupted, they
    ///  run into their timeouts.
    pub fn shutdown(&self) {
        if let Some(running) = self.inner.running.lock().take() {
            info!("shutting down D2D transport for {:?}", self.self_id());
            running.stop();
        }
    }

    /// Opens a session to a destination device, returning the session id. Use
    ///  [DeviceId::BROADCAST] for broadcasting and [DeviceId::RECEIVER] for receiving responses of
    ///  all conversations.
    pub fn open(&self, dst_id: DeviceId) -> D2dResult<u8> {
        self.require_init()?;
        self.inner.sessions.open(dst_id)
    }

    pub fn close(&self, session_id: u8) -> D2dResult<()> {
        self.require_init()?;
        self.inner.sessions.close(session_id)
    }

    /// Sends a packet through a session. Source, destination and packet id are taken from the
    ///  session, packet type, flags and payload from `pkt`.
    ///
    /// Unicast packets are re-sent on transient failures (no route, link errors, missing ack)
    ///  up to the configured number of attempts. Broadcasts are sent once per port and must not
    ///  ask for acks or responses.
    pub async fn send(&self, session_id: u8, pkt: &Packet, timeout: Duration) -> D2dResult<()> {
        let self_id = self.require_started()?;
        let session = self.inner.sessions.lookup(session_id)
            .ok_or(D2dError::NoSuchSession(session_id))?;

        let max = self.inner.config.max_payload_size;
        if pkt.payload.len() > max {
            return Err(D2dError::PayloadTooLarge { len: pkt.payload.len(), max });
        }

        let mut info = pkt.info;
        info.src_id = self_id;
        info.dst_id = session.dst_id;
        info.pkt_id = session.pkt_id();
        let d2d_pkt = D2dPacket::new(info, Some(pkt.payload.clone()));

        if session.dst_id.is_broadcast() {
            return self.inner.send_path.send_broadcast(&d2d_pkt, self.inner.config.send_timeout, None).await;
        }

        let retry_count = self.inner.config.retry_count;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.inner.send_path.send_unicast(session.dst_id, &d2d_pkt, timeout).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    if attempts >= retry_count {
                        error!("sending {:?} failed after {} attempts: {}", d2d_pkt, attempts, e);
                        return Err(D2dError::RetryExhausted { attempts, last: Box::new(e) });
                    }
                    warn!("sending {:?} failed: {} - retrying", d2d_pkt, e);
                }
                Err(e) => {
                    debug!("sending {:?} failed: {}", d2d_pkt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Waits for the response to the request last sent through a session, acknowledging it if
    ///  the responder asked for an ack. On a session opened towards [DeviceId::RECEIVER], this
    ///  returns the first response of any conversation.
    pub async fn recv(&self, session_id: u8, timeout: Duration) -> D2dResult<Packet> {
        self.require_started()?;
        let session = self.inner.sessions.lookup(session_id)
            .ok_or(D2dError::NoSuchSession(session_id))?;

        let response = if session.dst_id.is_receiver() {
            self.inner.tables.requests.wait_any(timeout).await?
        }
        else {
            self.inner.tables.requests.wait(session.pkt_id(), session.dst_id, timeout).await?
                .ok_or(D2dError::Timeout)?
        };

        if response.info.need_ack {
            if let Err(e) = self.inner.send_path.send_ack(&response).await {
                warn!("error acknowledging {:?}: {}", response, e);
            }
        }

        Ok(Packet::from_d2d(response))
    }

    /// Registers the handler for requests addressed to this device, replacing any previously
    ///  registered handler
    pub fn register_request_handler(&self, handler: Arc<dyn RequestHandler>) -> D2dResult<()> {
        self.require_init()?;
        *self.inner.handler.write() = Some(handler);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use rstest::rstest;
    use tokio::time::Instant;
    use crate::device_id::PortId;
    use crate::link::memory::MemoryLinkLayer;
    use crate::link::{LinkStatus, MockLinkLayer};
    use crate::packet::PacketType;
    use crate::security::{Aes256GcmSecurity, Lz4Compression, NoSecurity};

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn on_request(&self, request: &Packet, response: &mut Packet) {
            response.payload = request.payload.clone();
        }
    }

    fn device(id: u8, link: &Arc<MemoryLinkLayer>, security: Arc<dyn SecurityCodec>) -> D2dTransport {
        let transport = D2dTransport::new(TransportConfig::default(), link.clone(), security).unwrap();
        transport.init(DeviceId(id)).unwrap();
        transport.start().unwrap();
        transport
    }

    fn echo_device(id: u8, link: &Arc<MemoryLinkLayer>, security: Arc<dyn SecurityCodec>) -> D2dTransport {
        let transport = device(id, link, security);
        transport.register_request_handler(Arc::new(EchoHandler)).unwrap();
        transport
    }

    /// two devices 1 and 7, connected through port 0 on both sides
    fn pair(security_1: Arc<dyn SecurityCodec>, security_7: Arc<dyn SecurityCodec>) -> (D2dTransport, D2dTransport, Arc<MemoryLinkLayer>) {
        let link_1 = MemoryLinkLayer::new(256);
        let link_7 = MemoryLinkLayer::new(256);
        MemoryLinkLayer::connect(&link_1, PortId(0), &link_7, PortId(0));
        link_1.add_peer(PortId(0), DeviceId(7));
        link_7.add_peer(PortId(0), DeviceId(1));

        (device(1, &link_1, security_1), echo_device(7, &link_7, security_7), link_1)
    }

    fn payload_64() -> Bytes {
        (0..64u8).collect::<Vec<_>>().into()
    }

    #[tokio::test]
    async fn test_echo() {
        let (device_1, _device_7, _) = pair(Arc::new(NoSecurity), Arc::new(NoSecurity));

        let session = device_1.open(DeviceId(7)).unwrap();
        let request = Packet::request(payload_64()).need_ack(true).need_rsp(true);
        device_1.send(session, &request, TIMEOUT).await.unwrap();

        let response = device_1.recv(session, TIMEOUT).await.unwrap();
        assert_eq!(response.payload, payload_64());
        assert_eq!(response.info.pkt_type, PacketType::Response);
        assert_eq!(response.info.src_id, DeviceId(7));
        assert_eq!(response.info.dst_id, DeviceId(1));
        assert_eq!(response.info.pkt_id.0, session);
        assert!(response.info.need_ack);
    }

    #[tokio::test]
    async fn test_echo_encrypted() {
        let (device_1, _device_7, _) = pair(
            Arc::new(Aes256GcmSecurity::from_shared_secret(b"fleet secret")),
            Arc::new(Aes256GcmSecurity::from_shared_secret(b"fleet secret")),
        );

        let session = device_1.open(DeviceId(7)).unwrap();
        device_1.send(session, &Packet::request(payload_64()).need_rsp(true), TIMEOUT).await.unwrap();
        assert_eq!(device_1.recv(session, TIMEOUT).await.unwrap().payload, payload_64());
    }

    #[tokio::test]
    async fn test_echo_compressed_and_encrypted() {
        let security = || Arc::new(Lz4Compression::new(Aes256GcmSecurity::from_shared_secret(b"fleet secret"), 1024));
        let (device_1, _device_7, _) = pair(security(), security());

        let payload: Bytes = b"status=ok;".iter().cycle().take(500).cloned().collect::<Vec<_>>().into();
        let session = device_1.open(DeviceId(7)).unwrap();
        device_1.send(session, &Packet::request(payload.clone()).need_ack(true).need_rsp(true), TIMEOUT).await.unwrap();
        assert_eq!(device_1.recv(session, TIMEOUT).await.unwrap().payload, payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_key_fails_with_ack_timeout() {
        let (device_1, _device_7, _) = pair(
            Arc::new(Aes256GcmSecurity::from_shared_secret(b"fleet secret")),
            Arc::new(Aes256GcmSecurity::from_shared_secret(b"other secret")),
        );

        let session = device_1.open(DeviceId(7)).unwrap();
        let result = device_1.send(session, &Packet::request(payload_64()).need_ack(true), TIMEOUT).await;
        match result {
            Err(D2dError::RetryExhausted { attempts: 2, last }) => assert!(matches!(*last, D2dError::AckTimeout)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (device_1, _device_7, _) = pair(Arc::new(NoSecurity), Arc::new(NoSecurity));

        let session_a = device_1.open(DeviceId(7)).unwrap();
        let session_b = device_1.open(DeviceId(7)).unwrap();
        device_1.send(session_a, &Packet::request(&b"a"[..]).need_rsp(true), TIMEOUT).await.unwrap();
        device_1.send(session_b, &Packet::request(&b"b"[..]).need_rsp(true), TIMEOUT).await.unwrap();

        assert_eq!(device_1.recv(session_b, TIMEOUT).await.unwrap().payload, Bytes::from_static(b"b"));
        assert_eq!(device_1.recv(session_a, TIMEOUT).await.unwrap().payload, Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_receiver_session() {
        let (device_1, _device_7, _) = pair(Arc::new(NoSecurity), Arc::new(NoSecurity));

        let receiver = device_1.open(DeviceId::RECEIVER).unwrap();
        let session = device_1.open(DeviceId(7)).unwrap();
        device_1.send(session, &Packet::request(&b"anyone"[..]).need_rsp(true), TIMEOUT).await.unwrap();

        let response = device_1.recv(receiver, TIMEOUT).await.unwrap();
        assert_eq!(response.payload, Bytes::from_static(b"anyone"));
        assert_eq!(response.info.pkt_id.0, session);
    }

    #[tokio::test]
    async fn test_proxy() {
        // 1 <-> 2 <-> 3, with 1 and 3 only reachable through 2
        let link_1 = MemoryLinkLayer::new(256);
        let link_2 = MemoryLinkLayer::new(256);
        let link_3 = MemoryLinkLayer::new(256);
        MemoryLinkLayer::connect(&link_1, PortId(0), &link_2, PortId(0));
        MemoryLinkLayer::connect(&link_2, PortId(1), &link_3, PortId(0));
        link_1.add_peer(PortId(0), DeviceId(3));
        link_2.add_peer(PortId(0), DeviceId(1));
        link_2.add_peer(PortId(1), DeviceId(3));
        link_3.add_peer(PortId(0), DeviceId(1));

        let device_1 = device(1, &link_1, Arc::new(NoSecurity));
        let _device_2 = device(2, &link_2, Arc::new(NoSecurity));
        let _device_3 = echo_device(3, &link_3, Arc::new(NoSecurity));

        let session = device_1.open(DeviceId(3)).unwrap();
        device_1.send(session, &Packet::request(&b"relay me"[..]).need_ack(true).need_rsp(true), TIMEOUT).await.unwrap();
        let response = device_1.recv(session, TIMEOUT).await.unwrap();
        assert_eq!(response.payload, Bytes::from_static(b"relay me"));
        assert_eq!(response.info.src_id, DeviceId(3));
    }

    async fn drain(link: &MemoryLinkLayer) -> Vec<Vec<u8>> {
        let mut result = Vec::new();
        link.close();
        while let Some(port) = link.wait_ready().await {
            let mut buf = BytesMut::with_capacity(256);
            link.receive(port, &mut buf).await.unwrap();
            result.push(buf.to_vec());
        }
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast() {
        // 1 has two ports with peers 2 (port 0) and 3, 4 (both port 1); 2 relays to a raw link
        let link_1 = MemoryLinkLayer::new(256);
        let link_2 = MemoryLinkLayer::new(256);
        let raw_34 = MemoryLinkLayer::new(256);
        let raw_behind_2 = MemoryLinkLayer::new(256);
        MemoryLinkLayer::connect(&link_1, PortId(0), &link_2, PortId(0));
        MemoryLinkLayer::connect(&link_1, PortId(1), &raw_34, PortId(0));
        MemoryLinkLayer::connect(&link_2, PortId(1), &raw_behind_2, PortId(0));
        link_1.add_peer(PortId(0), DeviceId(2));
        link_1.add_peer(PortId(1), DeviceId(3));
        link_1.add_peer(PortId(1), DeviceId(4));
        link_2.add_peer(PortId(0), DeviceId(1));
        link_2.add_peer(PortId(1), DeviceId(5));

        let device_1 = device(1, &link_1, Arc::new(NoSecurity));
        let _device_2 = device(2, &link_2, Arc::new(NoSecurity));

        let session = device_1.open(DeviceId::BROADCAST).unwrap();
        assert!(matches!(
            device_1.send(session, &Packet::request(&b"hi"[..]).need_rsp(true), TIMEOUT).await,
            Err(D2dError::InvalidBroadcastFlags)
        ));
        device_1.send(session, &Packet::request(&b"hi"[..]), TIMEOUT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let expected_frame = vec![1, 0xFF, session, 0, b'h', b'i'];
        assert_eq!(drain(&raw_34).await, vec![expected_frame.clone()]);
        assert_eq!(drain(&raw_behind_2).await, vec![expected_frame]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fan_out() {
        // 7 never answers: its end of the link is not a transport
        let link_1 = MemoryLinkLayer::new(256);
        let silent_7 = MemoryLinkLayer::new(256);
        MemoryLinkLayer::connect(&link_1, PortId(0), &silent_7, PortId(0));
        link_1.add_peer(PortId(0), DeviceId(7));
        let device_1 = device(1, &link_1, Arc::new(NoSecurity));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let session = device_1.open(DeviceId(7)).unwrap();
            let device = device_1.clone();
            handles.push(tokio::spawn(async move {
                device.recv(session, Duration::from_secs(100)).await.map(|_| ())
            }));
        }
        let session = device_1.open(DeviceId(7)).unwrap();
        let device = device_1.clone();
        handles.push(tokio::spawn(async move {
            device.send(session, &Packet::request(&b"x"[..]).need_ack(true), Duration::from_secs(100)).await
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let start = Instant::now();
        link_1.set_link_status(PortId(0), LinkStatus::Down);

        for handle in handles {
            assert!(matches!(handle.await.unwrap(), Err(D2dError::Disconnected)));
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_dispatcher() {
        let link_1 = MemoryLinkLayer::new(256);
        let link_7 = MemoryLinkLayer::new(256);
        MemoryLinkLayer::connect(&link_1, PortId(0), &link_7, PortId(0));
        link_1.add_peer(PortId(0), DeviceId(7));
        link_7.add_peer(PortId(0), DeviceId(1));
        let device_1 = device(1, &link_1, Arc::new(NoSecurity));
        let _device_7 = echo_device(7, &link_7, Arc::new(NoSecurity));

        link_7.inject_frame(PortId(0), &[1]);
        link_7.inject_frame(PortId(0), &[1, 7, 0, 0xFF, 1, 2, 3]);
        link_7.inject_frame(PortId(0), &[0; 300]);

        let session = device_1.open(DeviceId(7)).unwrap();
        device_1.send(session, &Packet::request(&b"still there?"[..]).need_ack(true).need_rsp(true), TIMEOUT).await.unwrap();
        assert_eq!(device_1.recv(session, TIMEOUT).await.unwrap().payload, Bytes::from_static(b"still there?"));
    }

    fn mock_link() -> MockLinkLayer {
        let mut link = MockLinkLayer::new();
        link.expect_set_status_listener().return_const(());
        link.expect_wait_ready().returning(|| None);
        link.expect_route().return_const(Some(PortId(0)));
        link
    }

    #[rstest]
    #[case::link_errors(false, Duration::ZERO)]
    #[case::ack_timeouts(true, Duration::from_secs(1))]
    fn test_retry_bound(#[case] link_accepts: bool, #[case] expected_duration: Duration) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let mut link = mock_link();
            link.expect_send()
                .times(2)
                .returning(move |_, _, _| if link_accepts { Ok(()) } else { Err(anyhow::anyhow!("line busy")) });

            let transport = D2dTransport::new(TransportConfig::default(), Arc::new(link), Arc::new(NoSecurity)).unwrap();
            transport.init(DeviceId(1)).unwrap();
            transport.start().unwrap();

            let session = transport.open(DeviceId(7)).unwrap();
            let start = Instant::now();
            let result = transport.send(session, &Packet::request(&b"x"[..]).need_ack(true), TIMEOUT).await;
            match result {
                Err(D2dError::RetryExhausted { attempts, last }) => {
                    assert_eq!(attempts, 2);
                    assert!(last.is_retryable());
                }
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(start.elapsed(), expected_duration);
        });
    }

    #[tokio::test]
    async fn test_no_route_is_retried() {
        let mut link = MockLinkLayer::new();
        link.expect_set_status_listener().return_const(());
        link.expect_wait_ready().returning(|| None);
        link.expect_route().times(3).return_const(None);
        link.expect_send().times(0);

        let config = TransportConfig {
            retry_count: 3,
            ..TransportConfig::default()
        };
        let transport = D2dTransport::new(config, Arc::new(link), Arc::new(NoSecurity)).unwrap();
        transport.init(DeviceId(1)).unwrap();
        transport.start().unwrap();

        let session = transport.open(DeviceId(7)).unwrap();
        let result = transport.send(session, &Packet::request(&b"x"[..]), TIMEOUT).await;
        assert!(matches!(result, Err(D2dError::RetryExhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let transport = D2dTransport::new(TransportConfig::default(), Arc::new(mock_link()), Arc::new(NoSecurity)).unwrap();
        assert!(matches!(transport.start(), Err(D2dError::NotInitialized)));
        assert!(matches!(transport.open(DeviceId(7)), Err(D2dError::NotInitialized)));
        assert!(matches!(transport.register_request_handler(Arc::new(EchoHandler)), Err(D2dError::NotInitialized)));

        transport.init(DeviceId(1)).unwrap();
        assert!(matches!(transport.init(DeviceId(2)), Err(D2dError::AlreadyInitialized)));
        assert_eq!(transport.self_id(), Some(DeviceId(1)));

        let session = transport.open(DeviceId(7)).unwrap();
        assert!(matches!(transport.send(session, &Packet::request(&b"x"[..]), TIMEOUT).await, Err(D2dError::NotStarted)));
        assert!(matches!(transport.recv(session, TIMEOUT).await, Err(D2dError::NotStarted)));

        assert!(!transport.is_started());
        transport.start().unwrap();
        assert!(transport.is_started());
        assert!(matches!(transport.start(), Err(D2dError::AlreadyStarted)));

        transport.shutdown();
        assert!(!transport.is_started());
    }

    #[test]
    fn test_init_is_per_instance() {
        let a = D2dTransport::new(TransportConfig::default(), Arc::new(mock_link()), Arc::new(NoSecurity)).unwrap();
        let b = D2dTransport::new(TransportConfig::default(), Arc::new(mock_link()), Arc::new(NoSecurity)).unwrap();

        a.init(DeviceId(1)).unwrap();
        b.init(DeviceId(2)).unwrap();
        assert!(matches!(a.clone().init(DeviceId(3)), Err(D2dError::AlreadyInitialized)));
        assert_eq!((a.self_id(), b.self_id()), (Some(DeviceId(1)), Some(DeviceId(2))));
    }

    #[tokio::test]
    async fn test_send_errors() {
        let transport = D2dTransport::new(TransportConfig::default(), Arc::new(mock_link()), Arc::new(NoSecurity)).unwrap();
        transport.init(DeviceId(1)).unwrap();
        transport.start().unwrap();

        assert!(matches!(transport.send(42, &Packet::request(&b"x"[..]), TIMEOUT).await, Err(D2dError::NoSuchSession(42))));
        assert!(matches!(transport.recv(42, TIMEOUT).await, Err(D2dError::NoSuchSession(42))));

        let session = transport.open(DeviceId(7)).unwrap();
        let result = transport.send(session, &Packet::request(vec![0u8; 1025]), TIMEOUT).await;
        assert!(matches!(result, Err(D2dError::PayloadTooLarge { len: 1025, max: 1024 })));

        transport.close(session).unwrap();
        assert!(matches!(transport.close(session), Err(D2dError::NoSuchSession(_))));
    }

    #[test]
    fn test_invalid_config() {
        let config = TransportConfig {
            retry_count: 0,
            ..TransportConfig::default()
        };
        assert!(D2dTransport::new(config, Arc::new(MockLinkLayer::new()), Arc::new(NoSecurity)).is_err());
    }
}
