//! Broker connections.
//!
//! A connection multiplexes many producers over one socket. All writes are
//! funneled through a single writer task, so anything posted with
//! [`Connection::write`] goes out in posting order — the ordering guarantee
//! the producer relies on for replay. The reader task decodes inbound
//! frames, routes send receipts to the owning producer, and correlates
//! request/response pairs by request id.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strym_protocol::{decode_frame, encode_frame, Command, MAX_FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Queued-write watermark above which the connection reports not writable
const WRITE_HIGH_WATERMARK: usize = 64 * 1024;

static CONNECTION_ID_GENERATOR: AtomicU64 = AtomicU64::new(0);

/// Inbound callbacks a registered producer receives from its connection.
pub trait ProducerHandler: Send + Sync + 'static {
    /// Broker acknowledged the send with `sequence_id`.
    fn ack_received(&self, cnx_id: u64, sequence_id: u64, ledger_id: u64, entry_id: u64);

    /// The connection died; the producer should reconnect and replay.
    fn connection_closed(&self, cnx_id: u64);
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Process-unique id, used to tell stale connections from the current one.
    fn id(&self) -> u64;

    /// Human-readable identifier (remote address) for diagnostics.
    fn connection_id(&self) -> String;

    fn register_producer(&self, producer_id: u64, handler: Arc<dyn ProducerHandler>);

    fn remove_producer(&self, producer_id: u64);

    /// Send a request command and await the correlated response.
    async fn send_request(&self, command: Command) -> Result<Command>;

    /// Post a pre-serialized frame to the serialized writer. The write
    /// consumes this handle; callers keeping the frame for replay pass a
    /// clone.
    fn write(&self, frame: Bytes);

    fn is_active(&self) -> bool;

    fn is_writable(&self) -> bool;

    /// Tear the connection down; registered producers are notified.
    fn close(&self);
}

/// Hands out connections to the reconnect loop.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Command>>>>>;
type ProducerHandlers = Arc<Mutex<HashMap<u64, Arc<dyn ProducerHandler>>>>;

/// TCP connection with one writer task and one reader task.
pub struct TcpConnection {
    id: u64,
    remote: String,
    writer_tx: mpsc::UnboundedSender<Bytes>,
    queued_bytes: Arc<AtomicUsize>,
    pending: PendingRequests,
    producers: ProducerHandlers,
    active: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    request_timeout: Duration,
}

impl TcpConnection {
    /// Connect and spawn the I/O tasks.
    pub async fn connect(addr: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connection(format!("failed to set TCP_NODELAY: {e}")))?;

        let remote = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        let (read_half, write_half) = stream.into_split();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queued_bytes = Arc::new(AtomicUsize::new(0));
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let producers: ProducerHandlers = Arc::new(Mutex::new(HashMap::new()));
        let active = Arc::new(AtomicBool::new(true));

        let cnx = Arc::new(Self {
            id: CONNECTION_ID_GENERATOR.fetch_add(1, Ordering::Relaxed),
            remote,
            writer_tx,
            queued_bytes: queued_bytes.clone(),
            pending: pending.clone(),
            producers: producers.clone(),
            active: active.clone(),
            shutdown: shutdown_tx,
            request_timeout,
        });

        tokio::spawn(writer_task(
            write_half,
            writer_rx,
            queued_bytes,
            shutdown_rx.clone(),
        ));

        let reader_cnx_id = cnx.id;
        tokio::spawn(reader_task(
            read_half,
            reader_cnx_id,
            pending,
            producers,
            active,
            cnx.writer_tx.clone(),
            shutdown_rx,
        ));

        debug!("Connected to {} (cnx {})", cnx.remote, cnx.id);
        Ok(cnx)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn connection_id(&self) -> String {
        self.remote.clone()
    }

    fn register_producer(&self, producer_id: u64, handler: Arc<dyn ProducerHandler>) {
        self.producers.lock().insert(producer_id, handler);
    }

    fn remove_producer(&self, producer_id: u64) {
        self.producers.lock().remove(&producer_id);
    }

    async fn send_request(&self, command: Command) -> Result<Command> {
        let request_id = command
            .request_id()
            .ok_or_else(|| Error::Producer("command has no request id".into()))?;
        let frame = encode_frame(&command)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        self.write(frame);

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Connection("connection closed".into())),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(Error::Timeout)
            }
        }
    }

    fn write(&self, frame: Bytes) {
        self.queued_bytes.fetch_add(frame.len(), Ordering::Relaxed);
        if self.writer_tx.send(frame).is_err() {
            debug!("Write on closed cnx {} dropped", self.id);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn is_writable(&self) -> bool {
        self.is_active() && self.queued_bytes.load(Ordering::Relaxed) < WRITE_HIGH_WATERMARK
    }

    fn close(&self) {
        self.active.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
    }
}

async fn writer_task(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut writer_rx: mpsc::UnboundedReceiver<Bytes>,
    queued_bytes: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = writer_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let len = frame.len();
        let result = write_half.write_all(&frame).await;
        queued_bytes.fetch_sub(len, Ordering::Relaxed);
        if let Err(e) = result {
            debug!("Connection write failed: {}", e);
            break;
        }
    }
}

async fn reader_task(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    cnx_id: u64,
    pending: PendingRequests,
    producers: ProducerHandlers,
    active: Arc<AtomicBool>,
    writer_tx: mpsc::UnboundedSender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut len_buf = [0u8; 4];

    loop {
        let read_result = tokio::select! {
            result = read_half.read_exact(&mut len_buf) => result,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        if read_result.is_err() {
            break;
        }

        let body_len = u32::from_be_bytes(len_buf) as usize;
        if body_len > MAX_FRAME_SIZE {
            warn!("Dropping connection {}: oversized frame ({body_len} bytes)", cnx_id);
            break;
        }

        let mut body = vec![0u8; body_len];
        if read_half.read_exact(&mut body).await.is_err() {
            break;
        }

        let command = match decode_frame(&body) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping connection {}: undecodable frame: {}", cnx_id, e);
                break;
            }
        };

        match command {
            Command::SendReceipt {
                producer_id,
                sequence_id,
                ledger_id,
                entry_id,
            } => {
                let handler = producers.lock().get(&producer_id).cloned();
                match handler {
                    Some(handler) => {
                        handler.ack_received(cnx_id, sequence_id, ledger_id, entry_id)
                    }
                    None => debug!(
                        "Receipt for unknown producer {} on cnx {}",
                        producer_id, cnx_id
                    ),
                }
            }
            Command::Ping => {
                if let Ok(frame) = encode_frame(&Command::Pong) {
                    let _ = writer_tx.send(frame);
                }
            }
            Command::Pong => {}
            other => match other.request_id() {
                Some(request_id) => {
                    let sender = pending.lock().remove(&request_id);
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(Ok(other));
                        }
                        None => debug!("Response for unknown request id {}", request_id),
                    }
                }
                None => debug!("Unexpected command on cnx {}: {:?}", cnx_id, other),
            },
        }
    }

    // Connection is gone: fail outstanding requests and tell every producer.
    active.store(false, Ordering::Release);
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(Error::Connection("connection closed".into())));
    }
    let handlers: Vec<Arc<dyn ProducerHandler>> =
        producers.lock().drain().map(|(_, h)| h).collect();
    for handler in handlers {
        handler.connection_closed(cnx_id);
    }
    debug!("Connection {} closed", cnx_id);
}

/// Connects to a single broker address.
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl ConnectionProvider for TcpConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let cnx = tokio::time::timeout(
            self.connect_timeout,
            TcpConnection::connect(&self.addr, self.request_timeout),
        )
        .await
        .map_err(|_| Error::Connection(format!("connection timeout to {}", self.addr)))??;
        Ok(cnx as Arc<dyn Connection>)
    }
}
