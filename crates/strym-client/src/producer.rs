//! The producer: send pipeline, in-flight window, ack correlation, timers,
//! and reconnect-with-replay.
//!
//! Three concerns meet here and must hold simultaneously: ordering (sequence
//! ids are assigned, enqueued, and dispatched inside one critical section, so
//! wire order equals submission order), backpressure (one semaphore permit
//! per application message for its whole lifetime in the window), and
//! reconnection (the window is replayed in order on every new connection).
//!
//! Send futures may complete on the connection's reader task; applications
//! must not block inside continuations chained on them.

use crate::batch::BatchContainer;
use crate::config::ProducerConfig;
use crate::connection::{Connection, ConnectionProvider, ProducerHandler};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::stats::{ProducerStats, ProducerStatsSnapshot};
use crate::window::{PendingQueue, SendOp, SendReceipts};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use strym_core::{payload_checksum, Backoff, Codec};
use strym_protocol::{encode_frame, Command, CompressionType, MessageId};
use tokio::sync::{oneshot, watch, Notify, Semaphore};
use tracing::{debug, info, warn};

static PRODUCER_ID_GENERATOR: AtomicU64 = AtomicU64::new(0);
static REQUEST_ID_GENERATOR: AtomicU64 = AtomicU64::new(0);

/// Initial reconnect backoff
const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
/// Reconnect backoff cap
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

fn new_request_id() -> u64 {
    REQUEST_ID_GENERATOR.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Producer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Uninitialized,
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

/// Resolves to the [`MessageId`] assigned by the broker, or the error that
/// terminated the send.
pub struct SendFuture(oneshot::Receiver<Result<MessageId>>);

impl Future for SendFuture {
    type Output = Result<MessageId>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Producer(
                "send dropped before completion".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// State guarded by the producer mutex. The mutex is never held across an
/// await point; wire writes are posted to the connection's writer instead of
/// being performed under the lock.
struct SharedState {
    state: ProducerState,
    cnx: Option<Arc<dyn Connection>>,
    pending: PendingQueue,
    batch: Option<BatchContainer>,
    producer_name: Option<String>,
    connection_id: Option<String>,
    connected_since: Option<String>,
    flush_timer_armed: bool,
}

struct ProducerInner {
    topic: String,
    partition_index: i32,
    producer_id: u64,
    conf: ProducerConfig,
    provider: Arc<dyn ConnectionProvider>,
    codec: Codec,
    semaphore: Arc<Semaphore>,
    sequence_id: AtomicU64,
    state: Mutex<SharedState>,
    stats: ProducerStats,
    /// Wakes the connector loop after a disconnect.
    reconnect: Notify,
    shutdown: watch::Sender<bool>,
    /// Deadline for the initial registration (operation timeout).
    create_deadline: Instant,
    created_tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
    created_done: AtomicBool,
}

enum AttemptOutcome {
    Connected,
    Retry,
    Terminal,
}

/// A producer publishing to one topic partition.
///
/// Created in `Uninitialized`, connects in the background, and is handed
/// back to the caller once the broker has confirmed registration.
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    /// Create a producer and wait for its first successful registration.
    pub async fn new(
        provider: Arc<dyn ConnectionProvider>,
        topic: impl Into<String>,
        partition_index: i32,
        conf: ProducerConfig,
    ) -> Result<Self> {
        if conf.max_pending_messages == 0 {
            return Err(Error::Producer(
                "max_pending_messages must be at least 1".into(),
            ));
        }
        if conf.batching_enabled && conf.batching_max_messages == 0 {
            return Err(Error::Producer(
                "batching_max_messages must be at least 1".into(),
            ));
        }

        let (created_tx, created_rx) = oneshot::channel();
        let (shutdown_tx, _) = watch::channel(false);

        let batch = conf
            .batching_enabled
            .then(|| BatchContainer::new(conf.batching_max_messages, conf.max_batch_bytes));

        let inner = Arc::new(ProducerInner {
            topic: topic.into(),
            partition_index,
            producer_id: PRODUCER_ID_GENERATOR.fetch_add(1, Ordering::Relaxed),
            codec: Codec::new(conf.compression_type),
            semaphore: Arc::new(Semaphore::new(conf.max_pending_messages)),
            sequence_id: AtomicU64::new(0),
            state: Mutex::new(SharedState {
                state: ProducerState::Uninitialized,
                cnx: None,
                pending: PendingQueue::default(),
                batch,
                producer_name: None,
                connection_id: None,
                connected_since: None,
                flush_timer_armed: false,
            }),
            stats: ProducerStats::default(),
            reconnect: Notify::new(),
            shutdown: shutdown_tx,
            create_deadline: Instant::now() + conf.operation_timeout,
            created_tx: Mutex::new(Some(created_tx)),
            created_done: AtomicBool::new(false),
            provider,
            conf,
        });

        tokio::spawn(inner.clone().run_connector());

        if !inner.conf.send_timeout.is_zero() {
            tokio::spawn(inner.clone().run_timeout_sweeper());
        }
        if !inner.conf.stats_interval.is_zero() {
            tokio::spawn(inner.clone().run_stats_reporter());
        }

        match created_rx.await {
            Ok(Ok(())) => Ok(Self { inner }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Producer("producer creation aborted".into())),
        }
    }

    /// Publish a message. The returned future resolves once the broker
    /// acknowledges the send (or it terminates with an error).
    pub async fn send_async(&self, message: impl Into<Message>) -> SendFuture {
        self.inner.send_async(message.into()).await
    }

    /// Close the producer: cancel timers, tell the broker, release buffers.
    pub async fn close_async(&self) -> Result<()> {
        self.inner.close_async().await
    }

    pub fn is_connected(&self) -> bool {
        let st = self.inner.state.lock();
        st.cnx.is_some() && st.state == ProducerState::Ready
    }

    pub fn is_writable(&self) -> bool {
        self.inner
            .state
            .lock()
            .cnx
            .as_ref()
            .map(|cnx| cnx.is_writable())
            .unwrap_or(false)
    }

    pub fn state(&self) -> ProducerState {
        self.inner.state.lock().state
    }

    pub fn stats(&self) -> ProducerStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn producer_name(&self) -> Option<String> {
        self.inner.state.lock().producer_name.clone()
    }

    pub fn connection_id(&self) -> Option<String> {
        let st = self.inner.state.lock();
        st.cnx.as_ref().and_then(|_| st.connection_id.clone())
    }

    /// Human-readable timestamp of the current connection's registration.
    pub fn connected_since(&self) -> Option<String> {
        let st = self.inner.state.lock();
        st.cnx.as_ref().and_then(|_| st.connected_since.clone())
    }

    pub fn pending_queue_size(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Age of the oldest unacknowledged send in milliseconds, 0 when the
    /// window is empty.
    pub fn delay_in_millis(&self) -> u64 {
        self.inner
            .state
            .lock()
            .pending
            .peek()
            .map(|op| op.created_at.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

impl ProducerInner {
    // ------------------------------------------------------------------
    // Send pipeline
    // ------------------------------------------------------------------

    async fn send_async(&self, mut message: Message) -> SendFuture {
        let (tx, rx) = oneshot::channel();
        let fut = SendFuture(rx);

        // State gate
        match self.state.lock().state {
            ProducerState::Ready | ProducerState::Connecting => {}
            ProducerState::Closing | ProducerState::Closed => {
                let _ = tx.send(Err(Error::AlreadyClosed));
                return fut;
            }
            ProducerState::Failed | ProducerState::Uninitialized => {
                let _ = tx.send(Err(Error::NotConnected));
                return fut;
            }
        }

        // Backpressure admission: one permit per application message, held
        // until ack, failure, or timeout.
        if self.conf.block_if_queue_full {
            match self.semaphore.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    let _ = tx.send(Err(Error::Interrupted));
                    return fut;
                }
            }
        } else {
            match self.semaphore.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    self.stats.record_send_failed(1);
                    let _ = tx.send(Err(Error::QueueFull));
                    return fut;
                }
            }
        }

        if message.metadata.checksum.is_none() {
            message.metadata.checksum = Some(payload_checksum(&message.payload));
        }

        // A producer name on the metadata means the message already went
        // through a producer once; only replicated copies may carry one in.
        if message.metadata.producer_name.is_some() && !message.metadata.replicated {
            self.semaphore.add_permits(1);
            self.stats.record_send_failed(1);
            let _ = tx.send(Err(Error::InvalidMessage(
                "cannot re-use the same message".into(),
            )));
            return fut;
        }

        let Message { payload, mut metadata } = message;
        let uncompressed_size = payload.len();

        // Compression for non-batched sends happens off the producer mutex;
        // batches are compressed when they are closed out.
        let compressed = if self.conf.batching_enabled {
            None
        } else {
            match self.codec.compress(payload.clone()) {
                Ok(compressed) => Some(compressed),
                Err(e) => {
                    self.semaphore.add_permits(1);
                    self.stats.record_send_failed(1);
                    let _ = tx.send(Err(e.into()));
                    return fut;
                }
            }
        };

        let mut st = self.state.lock();
        let sequence_id = self.sequence_id.fetch_add(1, Ordering::SeqCst);

        if metadata.publish_time.is_none() {
            metadata.publish_time = Some(now_millis());
            metadata.producer_name = Some(st.producer_name.clone().unwrap_or_default());
            metadata.sequence_id = Some(sequence_id);
            if self.conf.compression_type != CompressionType::None {
                metadata.compression = self.conf.compression_type;
                metadata.uncompressed_size = Some(uncompressed_size as u32);
            }
        }

        if let Some(mut batch) = st.batch.take() {
            // Batched path: payload bytes are copied into the container, so
            // the caller's buffer is released on return.
            if batch.has_space_for(uncompressed_size) {
                batch.add(metadata, payload, tx);
            } else {
                debug!(
                    "[{}] [{:?}] Closing out batch to accommodate large message with size {}",
                    self.topic, st.producer_name, uncompressed_size
                );
                self.flush_batch_locked(&mut st, &mut batch);
                batch.add(metadata, payload, tx);
            }
            if batch.is_full() {
                self.flush_batch_locked(&mut st, &mut batch);
            }
            st.batch = Some(batch);
        } else {
            // Non-batched path: frame, enqueue, dispatch.
            let command = Command::Send {
                producer_id: self.producer_id,
                sequence_id,
                num_messages: 1,
                metadata,
                payload: compressed.expect("compressed outside the lock"),
            };
            let frame = match encode_frame(&command) {
                Ok(frame) => frame,
                Err(e) => {
                    drop(st);
                    self.semaphore.add_permits(1);
                    self.stats.record_send_failed(1);
                    let _ = tx.send(Err(e.into()));
                    return fut;
                }
            };

            let op = SendOp {
                frame,
                sequence_id,
                num_messages: 1,
                batch_size_bytes: uncompressed_size,
                created_at: Instant::now(),
                receipts: SendReceipts::Single(tx),
            };
            self.enqueue_and_dispatch_locked(&mut st, op);
        }

        fut
    }

    /// Push a send operation into the window and, when connected, post its
    /// frame to the connection's serialized writer. Sequence assignment,
    /// window insertion, and dispatch share one critical section so wire
    /// order equals window order.
    fn enqueue_and_dispatch_locked(&self, st: &mut SharedState, op: SendOp) {
        let num_messages = op.num_messages as u64;
        let num_bytes = op.batch_size_bytes as u64;
        let sequence_id = op.sequence_id;
        // The window keeps its own frame handle for replay; the dispatched
        // clone is consumed by the write.
        let frame = op.frame.clone();
        st.pending.push(op);

        if st.state == ProducerState::Ready {
            if let Some(cnx) = st.cnx.as_ref() {
                cnx.write(frame);
                self.stats.record_sent(num_messages, num_bytes);
                return;
            }
        }
        debug!(
            "[{}] Connection is not ready -- queued sequenceId {}",
            self.topic, sequence_id
        );
    }

    /// Close the current batch into a send operation. Compression and the
    /// payload checksum are computed here, over the composed batch payload.
    fn flush_batch_locked(&self, st: &mut SharedState, batch: &mut BatchContainer) {
        let Some(closed) = batch.close() else {
            return;
        };

        let mut metadata = closed.metadata;
        metadata.checksum = Some(payload_checksum(&closed.payload));
        if self.conf.compression_type != CompressionType::None {
            metadata.compression = self.conf.compression_type;
            metadata.uncompressed_size = Some(closed.payload.len() as u32);
        }

        let frame = self
            .codec
            .compress(closed.payload)
            .map_err(Error::from)
            .and_then(|compressed| {
                encode_frame(&Command::Send {
                    producer_id: self.producer_id,
                    sequence_id: closed.sequence_id,
                    num_messages: closed.num_messages,
                    metadata,
                    payload: compressed,
                })
                .map_err(Error::from)
            });

        match frame {
            Ok(frame) => {
                let op = SendOp {
                    frame,
                    sequence_id: closed.sequence_id,
                    num_messages: closed.num_messages,
                    batch_size_bytes: closed.size_bytes,
                    created_at: Instant::now(),
                    receipts: SendReceipts::Batch(closed.receipts),
                };
                self.enqueue_and_dispatch_locked(st, op);
            }
            Err(e) => {
                warn!(
                    "[{}] Error while closing out batch -- {}",
                    self.topic, e
                );
                self.semaphore.add_permits(closed.num_messages as usize);
                self.stats.record_send_failed(closed.num_messages as u64);
                for receipt in closed.receipts {
                    let _ = receipt.send(Err(e.clone()));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Acknowledgements
    // ------------------------------------------------------------------

    fn handle_ack(&self, cnx_id: u64, sequence_id: u64, ledger_id: u64, entry_id: u64) {
        let mut close_cnx = None;
        let mut completed = None;
        {
            let mut st = self.state.lock();
            let Some(head) = st.pending.peek() else {
                debug!(
                    "[{}] Got ack for timed out msg {}",
                    self.topic, sequence_id
                );
                return;
            };

            let expected = head.sequence_id;
            if sequence_id > expected {
                // Protocol desync: force the connection closed so the window
                // is replayed on a fresh one. Do not pop.
                warn!(
                    "[{}] Got ack for msg. expecting: {} - got: {} - queue-size: {}",
                    self.topic,
                    expected,
                    sequence_id,
                    st.pending.len()
                );
                close_cnx = st
                    .cnx
                    .as_ref()
                    .filter(|cnx| cnx.id() == cnx_id)
                    .cloned();
            } else if sequence_id < expected {
                // Stale ack for a message the sweeper already failed.
                debug!(
                    "[{}] Got ack for timed out msg {} last-seq: {}",
                    self.topic, sequence_id, expected
                );
            } else {
                let op = st.pending.pop().expect("head was just peeked");
                self.semaphore.add_permits(op.num_messages as usize);
                completed = Some(op);
            }
        }

        // Callbacks and teardown run outside the mutex; a completion handler
        // cannot re-enter and corrupt producer state.
        if let Some(cnx) = close_cnx {
            cnx.close();
        }
        if let Some(op) = completed {
            self.stats.record_acks(op.num_messages as u64);
            op.succeed(ledger_id, entry_id, self.partition_index);
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    async fn run_connector(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = Backoff::new(RECONNECT_BACKOFF_INITIAL, RECONNECT_BACKOFF_MAX);

        loop {
            if *shutdown.borrow() || self.is_terminal() {
                break;
            }
            {
                let mut st = self.state.lock();
                if st.state == ProducerState::Uninitialized {
                    st.state = ProducerState::Connecting;
                }
            }

            match self.provider.connect().await {
                Ok(cnx) => match self.connection_opened(cnx).await {
                    AttemptOutcome::Connected => {
                        backoff.reset();
                        // Parked until the connection dies or we shut down.
                        tokio::select! {
                            _ = self.reconnect.notified() => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                    AttemptOutcome::Retry => {
                        let delay = backoff.next_delay();
                        debug!(
                            "[{}] Retrying producer creation in {:?}",
                            self.topic, delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                    AttemptOutcome::Terminal => break,
                },
                Err(e) => {
                    if self.connection_failed(e) {
                        break;
                    }
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Register on a fresh connection, adopt the broker-assigned name, and
    /// replay the window.
    async fn connection_opened(self: &Arc<Self>, cnx: Arc<dyn Connection>) -> AttemptOutcome {
        let held_name = {
            let mut st = self.state.lock();
            if matches!(st.state, ProducerState::Closing | ProducerState::Closed) {
                return AttemptOutcome::Terminal;
            }
            // The cnx reference is set before registering, so a break during
            // registration triggers a reconnect attempt.
            st.cnx = Some(cnx.clone());
            st.producer_name.clone()
        };
        cnx.register_producer(self.producer_id, self.clone() as Arc<dyn ProducerHandler>);

        info!(
            "[{}] [{:?}] Creating producer on cnx {}",
            self.topic,
            held_name,
            cnx.connection_id()
        );

        let request_id = new_request_id();
        let response = cnx
            .send_request(Command::Producer {
                topic: self.topic.clone(),
                producer_id: self.producer_id,
                request_id,
                producer_name: held_name,
            })
            .await;

        let result = match response {
            Ok(Command::ProducerSuccess { producer_name, .. }) => Ok(producer_name),
            Ok(Command::Error { code, message, .. }) => Err(Error::from_server(code, message)),
            Ok(other) => Err(Error::Protocol(format!(
                "unexpected producer response: {other:?}"
            ))),
            Err(e) => Err(e),
        };

        match result {
            Ok(assigned_name) => {
                let arm_flush_timer;
                {
                    let mut st = self.state.lock();
                    if matches!(st.state, ProducerState::Closing | ProducerState::Closed) {
                        drop(st);
                        // Closed while reconnecting: make sure the broker
                        // drops the producer on its side.
                        if let Ok(frame) = encode_frame(&Command::CloseProducer {
                            producer_id: self.producer_id,
                            request_id: new_request_id(),
                        }) {
                            cnx.write(frame);
                        }
                        cnx.remove_producer(self.producer_id);
                        cnx.close();
                        return AttemptOutcome::Terminal;
                    }

                    if st.producer_name.is_none() {
                        st.producer_name = Some(assigned_name);
                    }
                    st.connection_id = Some(cnx.connection_id());
                    st.connected_since =
                        Some(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string());

                    info!(
                        "[{}] [{:?}] Created producer on cnx {}",
                        self.topic,
                        st.producer_name,
                        cnx.connection_id()
                    );

                    arm_flush_timer = self.conf.batching_enabled && !st.flush_timer_armed;
                    st.flush_timer_armed |= arm_flush_timer;

                    // Replay every pending operation in window order on the
                    // new connection's serialized writer, then go Ready.
                    let resend = st.pending.len();
                    if resend > 0 {
                        info!(
                            "[{}] [{:?}] Re-sending {} messages to server",
                            self.topic, st.producer_name, resend
                        );
                    }
                    for op in st.pending.iter() {
                        cnx.write(op.frame.clone());
                        self.stats
                            .record_sent(op.num_messages as u64, op.batch_size_bytes as u64);
                    }
                    st.state = ProducerState::Ready;
                }

                if arm_flush_timer {
                    tokio::spawn(self.clone().run_batch_flusher());
                }
                self.resolve_created(Ok(()));
                AttemptOutcome::Connected
            }
            Err(e) => {
                cnx.remove_producer(self.producer_id);
                let closing = {
                    let st = self.state.lock();
                    matches!(st.state, ProducerState::Closing | ProducerState::Closed)
                };
                if closing {
                    cnx.close();
                    return AttemptOutcome::Terminal;
                }

                warn!("[{}] Failed to create producer: {}", self.topic, e);

                match e {
                    Error::BacklogQuotaExceeded => {
                        // Terminal for every pending message and the producer.
                        warn!(
                            "[{}] Topic backlog quota exceeded. Failing pending messages.",
                            self.topic
                        );
                        let failed = {
                            let mut st = self.state.lock();
                            st.state = ProducerState::Failed;
                            self.fail_pending_locked(&mut st, &Error::BacklogQuotaExceeded)
                        };
                        for op in failed {
                            op.fail(Error::BacklogQuotaExceeded);
                        }
                        self.resolve_created(Err(Error::BacklogQuotaExceeded));
                        AttemptOutcome::Terminal
                    }
                    Error::ProducerBlockedQuotaExceeded => {
                        warn!(
                            "[{}] Producer is blocked on creation because backlog exceeded on topic.",
                            self.topic
                        );
                        AttemptOutcome::Retry
                    }
                    e => {
                        let created_done = self.created_done.load(Ordering::Acquire);
                        if created_done
                            || (e.is_retriable() && Instant::now() < self.create_deadline)
                        {
                            AttemptOutcome::Retry
                        } else {
                            self.state.lock().state = ProducerState::Failed;
                            self.resolve_created(Err(e));
                            AttemptOutcome::Terminal
                        }
                    }
                }
            }
        }
    }

    /// A connection attempt failed before registration. Only terminal once
    /// the creation deadline has elapsed without a single success.
    fn connection_failed(&self, error: Error) -> bool {
        if Instant::now() > self.create_deadline && !self.created_done.load(Ordering::Acquire) {
            info!(
                "[{}] Producer creation failed for producer {}",
                self.topic, self.producer_id
            );
            self.state.lock().state = ProducerState::Failed;
            self.resolve_created(Err(error));
            true
        } else {
            debug!("[{}] Connection attempt failed: {}", self.topic, error);
            false
        }
    }

    fn resolve_created(&self, result: Result<()>) {
        if let Some(tx) = self.created_tx.lock().take() {
            self.created_done.store(true, Ordering::Release);
            let _ = tx.send(result);
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.state.lock().state,
            ProducerState::Closed | ProducerState::Failed
        )
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Fails the whole window once its head exceeds the send timeout. The
    /// broker may still ack any prefix of the window after the head expires,
    /// so failing everything at once keeps ordering simple to reason about.
    async fn run_timeout_sweeper(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let send_timeout = self.conf.send_timeout;
        let mut delay = send_timeout;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() || self.is_terminal() {
                break;
            }

            let mut timed_out = Vec::new();
            delay = {
                let mut st = self.state.lock();
                match st.pending.peek() {
                    None => send_timeout,
                    Some(head) => {
                        let elapsed = head.created_at.elapsed();
                        if elapsed >= send_timeout {
                            info!(
                                "[{}] [{:?}] Message send timed out. Failing {} messages",
                                self.topic,
                                st.producer_name,
                                st.pending.len()
                            );
                            timed_out = self.fail_pending_locked(&mut st, &Error::Timeout);
                            send_timeout
                        } else {
                            send_timeout - elapsed
                        }
                    }
                }
            };

            for op in timed_out {
                op.fail(Error::Timeout);
            }
        }
    }

    /// Periodically closes out partially-filled batches.
    async fn run_batch_flusher(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let delay = self.conf.batching_max_publish_delay;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() || self.is_terminal() {
                break;
            }

            let mut st = self.state.lock();
            if matches!(st.state, ProducerState::Closing | ProducerState::Closed) {
                break;
            }
            if let Some(mut batch) = st.batch.take() {
                self.flush_batch_locked(&mut st, &mut batch);
                st.batch = Some(batch);
            }
        }
    }

    async fn run_stats_reporter(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.conf.stats_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() || self.is_terminal() {
                break;
            }
            let snapshot = self.stats.snapshot();
            info!(
                "[{}] Producer stats: sent {} msgs / {} bytes, {} acks, {} failed, {} pending",
                self.topic,
                snapshot.msgs_sent,
                snapshot.bytes_sent,
                snapshot.acks_received,
                snapshot.send_failed,
                snapshot.pending()
            );
        }
    }

    /// Drain and fail every windowed operation and staged batch entry,
    /// releasing their permits. Must run under the producer mutex; the
    /// returned operations are completed by the caller after unlocking.
    fn fail_pending_locked(&self, st: &mut SharedState, error: &Error) -> Vec<SendOp> {
        let (ops, permits) = st.pending.drain();
        self.semaphore.add_permits(permits as usize);

        let mut failed_messages = permits as u64;
        if let Some(batch) = st.batch.as_mut() {
            let released = batch.fail_all(error);
            self.semaphore.add_permits(released as usize);
            failed_messages += released as u64;
        }
        self.stats.record_send_failed(failed_messages);
        ops
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    async fn close_async(&self) -> Result<()> {
        let cnx = {
            let mut st = self.state.lock();
            match st.state {
                ProducerState::Closing | ProducerState::Closed => return Ok(()),
                _ => {}
            }

            let cnx = st.cnx.clone().filter(|cnx| cnx.is_active());
            match cnx {
                None => {
                    info!(
                        "[{}] [{:?}] Closed producer (not connected)",
                        self.topic, st.producer_name
                    );
                    st.state = ProducerState::Closed;
                    let _ = st.pending.drain();
                    if let Some(batch) = st.batch.as_mut() {
                        batch.fail_all(&Error::AlreadyClosed);
                    }
                    None
                }
                Some(cnx) => {
                    st.state = ProducerState::Closing;
                    Some(cnx)
                }
            }
        };

        // Cancel the sweeper, the batch flusher, the stats reporter, and the
        // connector; wake any sender blocked on a permit.
        self.shutdown.send_replace(true);
        self.semaphore.close();

        let Some(cnx) = cnx else {
            return Ok(());
        };

        let request_id = new_request_id();
        let response = cnx
            .send_request(Command::CloseProducer {
                producer_id: self.producer_id,
                request_id,
            })
            .await;
        cnx.remove_producer(self.producer_id);

        match response {
            Ok(Command::Success { .. }) => {}
            Ok(Command::Error { code, message, .. }) => {
                return Err(Error::from_server(code, message))
            }
            Ok(other) => {
                return Err(Error::Protocol(format!(
                    "unexpected close response: {other:?}"
                )))
            }
            Err(e) => {
                if cnx.is_active() {
                    return Err(e);
                }
                // The connection died in the meantime; the broker dropped the
                // producer either way.
            }
        }

        let mut st = self.state.lock();
        info!(
            "[{}] [{:?}] Closed producer",
            self.topic, st.producer_name
        );
        st.state = ProducerState::Closed;
        let _ = st.pending.drain();
        Ok(())
    }
}

impl ProducerHandler for ProducerInner {
    fn ack_received(&self, cnx_id: u64, sequence_id: u64, ledger_id: u64, entry_id: u64) {
        self.handle_ack(cnx_id, sequence_id, ledger_id, entry_id);
    }

    fn connection_closed(&self, cnx_id: u64) {
        {
            let mut st = self.state.lock();
            let is_current = st.cnx.as_ref().map(|cnx| cnx.id()) == Some(cnx_id);
            if !is_current {
                return;
            }
            st.cnx = None;
            if matches!(st.state, ProducerState::Ready | ProducerState::Connecting) {
                st.state = ProducerState::Connecting;
            }
        }
        debug!("[{}] Connection {} closed, scheduling reconnect", self.topic, cnx_id);
        self.reconnect.notify_one();
    }
}
