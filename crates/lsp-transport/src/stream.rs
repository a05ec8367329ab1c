use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::codec::{self, Incoming, LspCodec};
use crate::{
    LanguageConnection, MethodTable, Notification, TransportError, TransportResult,
    DEFAULT_SUBSCRIPTION_CAPACITY,
};

type PendingReplies = Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>;

/// Work for the writer task, handled in queue order.
enum WriteItem {
    Frame(Bytes),
    /// Answered after the sink has flushed every earlier frame.
    Drained(oneshot::Sender<()>),
}

struct Shared {
    methods: MethodTable,
    pending: PendingReplies,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.methods.close();
        // Dropping the reply senders fails every outstanding request.
        self.pending.lock().clear();
    }
}

/// A [`LanguageConnection`] over any byte stream speaking LSP framing.
///
/// A writer task drains an unbounded queue of encoded frames; a reader task
/// decodes frames, fans notifications out per method and resolves replies to
/// [`StreamConnection::request`]. Requests from the remote side are answered
/// with `MethodNotFound`.
pub struct StreamConnection {
    outbound: mpsc::UnboundedSender<WriteItem>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamConnection {
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_capacity(reader, writer, DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    pub fn with_capacity<R, W>(reader: R, writer: W, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            methods: MethodTable::new(capacity),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer_task = tokio::spawn(run_writer(writer, outbound_rx, Arc::clone(&shared)));
        let reader_task = tokio::spawn(run_reader(reader, outbound.clone(), Arc::clone(&shared)));

        Self {
            outbound,
            shared,
            next_id: AtomicU64::new(1),
            tasks: vec![writer_task, reader_task],
        }
    }

    /// Send a JSON-RPC request and wait for its reply.
    pub async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = codec::encode_request(id, method, &params)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, reply_tx);
        if self.is_closed() {
            self.shared.pending.lock().remove(&id);
            return Err(TransportError::Closed);
        }

        if self.outbound.send(WriteItem::Frame(frame)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(TransportError::Closed);
        }
        debug!(target: "lsp.transport", id, method, "request sent");

        match reply_rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(TransportError::Protocol(format!("{method} failed: {message}"))),
            Err(_) => Err(TransportError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageConnection for StreamConnection {
    fn send_notification(&self, method: &str, params: Value) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let frame = codec::encode_notification(method, &params)?;
        self.outbound
            .send(WriteItem::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.outbound.send(WriteItem::Drained(done_tx)).is_ok() {
            // Errors once the writer task has stopped, which also ends the wait.
            let _ = done_rx.await;
        }
    }

    fn subscribe(&self, method: &str) -> broadcast::Receiver<Notification> {
        if self.is_closed() {
            return broadcast::channel(1).1;
        }
        self.shared.methods.sender_for(method).subscribe()
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_writer<W>(writer: W, mut items: mpsc::UnboundedReceiver<WriteItem>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LspCodec::new());
    while let Some(item) = items.recv().await {
        match item {
            WriteItem::Frame(frame) => {
                if let Err(err) = sink.send(frame).await {
                    warn!(target: "lsp.transport", error = %err, "write failed; closing connection");
                    break;
                }
            }
            WriteItem::Drained(done) => {
                if let Err(err) = sink.flush().await {
                    warn!(target: "lsp.transport", error = %err, "flush failed; closing connection");
                    break;
                }
                let _ = done.send(());
            }
        }
    }
    shared.close();
}

async fn run_reader<R>(reader: R, replies: mpsc::UnboundedSender<WriteItem>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, LspCodec::new());
    while let Some(frame) = frames.next().await {
        let body = match frame {
            Ok(body) => body,
            Err(err) => {
                warn!(target: "lsp.transport", error = %err, "unreadable frame; closing connection");
                break;
            }
        };
        match Incoming::parse(&body) {
            Ok(Incoming::Notification(notification)) => {
                let method = notification.method.clone();
                let delivered = shared.methods.dispatch(notification);
                trace!(target: "lsp.transport", %method, delivered, "notification received");
            }
            Ok(Incoming::Request { id, method, .. }) => {
                debug!(target: "lsp.transport", %id, %method, "unsupported server request");
                match codec::encode_method_not_found(&id, &method) {
                    Ok(reply) => {
                        let _ = replies.send(WriteItem::Frame(reply));
                    }
                    Err(err) => warn!(target: "lsp.transport", error = %err, "failed to encode reply"),
                }
            }
            Ok(Incoming::Response { id, result }) => {
                let waiter = id.as_u64().and_then(|id| shared.pending.lock().remove(&id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!(target: "lsp.transport", %id, "response without pending request"),
                }
            }
            Err(err) => {
                warn!(target: "lsp.transport", error = %err, "dropping undecodable message");
            }
        }
    }
    debug!(target: "lsp.transport", "stream ended");
    shared.close();
}
