use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument, Span};
use crate::config::TransportConfig;
use crate::error::{D2dError, D2dResult};
use crate::packet::{D2dPacket, Packet, PacketType};
use crate::send_path::SendPath;

/// Application callback for requests addressed to this device.
///
/// `response` is pre-addressed back to the requester with the request's packet id. The
///  handler fills in the payload and may adjust flags; it is sent back if the request asked
///  for a response.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn on_request(&self, request: &Packet, response: &mut Packet);
}

/// The currently registered request handler, shared between the transport's API and the
///  workers
pub type HandlerSlot = RwLock<Option<Arc<dyn RequestHandler>>>;

/// The stages of handling a received request, for tracing
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestState {
    Received,
    AckSent,
    AckSkipped,
    Queued,
    Executing,
    ResponseSent,
    ResponseSkipped,
    Done,
}


/// Runs the request handler for a single request and sends the response
struct RequestWorker {
    handler: Arc<HandlerSlot>,
    send_path: SendPath,
    response_send_timeout: Duration,
}

impl RequestWorker {
    async fn execute(&self, request: D2dPacket) {
        trace!(state = ?RequestState::Executing, "executing {:?}", request);

        let request = Packet::from_d2d(request);
        let mut response = Packet {
            info: request.info.reply(PacketType::Response),
            payload: Bytes::new(),
        };
        response.info.need_ack = request.info.need_ack;
        response.info.priority = request.info.priority;

        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.on_request(&request, &mut response).await,
            None => warn!("no request handler registered - responding to {:?} with an empty payload", request.info),
        }

        if request.info.need_rsp {
            // the handler must not redirect the response
            response.info.src_id = request.info.dst_id;
            response.info.dst_id = request.info.src_id;
            response.info.pkt_id = request.info.pkt_id;
            response.info.pkt_type = PacketType::Response;

            let response = response.into_d2d();
            match self.send_path.send_unicast(response.dst_id(), &response, self.response_send_timeout).await {
                Ok(()) => trace!(state = ?RequestState::ResponseSent, "sent response {:?}", response),
                Err(e) => warn!("error sending response {:?}: {}", response, e),
            }
        }
        else {
            trace!(state = ?RequestState::ResponseSkipped, "no response requested for {:?}", request.info);
        }

        trace!(state = ?RequestState::Done, "done with {:?}", request.info);
    }
}


/// A fixed number of worker tasks executing requests from a bounded queue
pub struct WorkerPool {
    sender: mpsc::Sender<D2dPacket>,
    workers: Vec<JoinHandle<()>>,
    submit_timeout: Duration,
}

impl WorkerPool {
    fn start(worker_count: usize, queue_depth: usize, submit_timeout: Duration, worker: Arc<RequestWorker>) -> WorkerPool {
        let (sender, receiver) = mpsc::channel::<D2dPacket>(queue_depth);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|worker_index| {
                let receiver = receiver.clone();
                let worker = worker.clone();
                tokio::spawn(async move {
                    debug!("starting request worker #{}", worker_index);
                    loop {
                        let next = receiver.lock().await.recv().await;
                        match next {
                            Some(request) => worker.execute(request).await,
                            None => break,
                        }
                    }
                    debug!("request worker #{} terminated", worker_index);
                })
            })
            .collect();

        WorkerPool {
            sender,
            workers,
            submit_timeout,
        }
    }

    async fn submit(&self, request: D2dPacket) -> D2dResult<()> {
        self.sender.send_timeout(request, self.submit_timeout).await
            .map_err(|_| D2dError::QueueFull)
    }

    fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}


/// Handles requests addressed to this device: acknowledges them if requested and hands them to
///  the worker pool - or executes them directly if there are no workers.
pub struct RequestExecutor {
    worker: Arc<RequestWorker>,
    pool: Option<WorkerPool>,
    send_path: SendPath,
}

impl RequestExecutor {
    /// NB: This spawns the worker tasks, so it must be called from inside a tokio runtime
    pub fn new(config: &TransportConfig, send_path: SendPath, handler: Arc<HandlerSlot>) -> RequestExecutor {
        let worker = Arc::new(RequestWorker {
            handler,
            send_path: send_path.clone(),
            response_send_timeout: config.response_send_timeout,
        });

        let pool = if config.worker_count > 0 {
            Some(WorkerPool::start(config.worker_count, config.worker_queue_depth, config.submit_timeout, worker.clone()))
        }
        else {
            debug!("no request workers configured - executing requests inline");
            None
        };

        RequestExecutor {
            worker,
            pool,
            send_path,
        }
    }

    pub async fn execute(&self, request: D2dPacket) {
        trace!(state = ?RequestState::Received, "received request {:?}", request);

        if request.info.need_ack {
            match self.send_path.send_ack(&request).await {
                Ok(()) => trace!(state = ?RequestState::AckSent, "sent ack for {:?}", request.info),
                Err(e) => warn!("error sending ack for {:?} - executing the request anyway: {}", request.info, e),
            }
        }
        else {
            trace!(state = ?RequestState::AckSkipped, "no ack requested for {:?}", request.info);
        }

        match &self.pool {
            Some(pool) => {
                let info = request.info;
                match pool.submit(request).await {
                    Ok(()) => trace!(state = ?RequestState::Queued, "queued {:?}", info),
                    Err(e) => warn!("dropping request {:?}: {}", info, e),
                }
            }
            None => self.worker.execute(request).instrument(Span::current()).await,
        }
    }

    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}
