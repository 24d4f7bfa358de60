use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use anyhow::anyhow;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use crate::buffers::history_buffer::HistoryBuffer;
use crate::buffers::rate_limiter::{ExponentialRateLimiter, NullRateLimiter, RateLimiter};
use crate::buffers::round_robin_buffer::RoundRobinBuffer;
use crate::config::SessionConfig;
use crate::log_util::log_prefix;
use crate::message_header::MessageHeader;
use crate::msg::message_writer::MessageWriter;
use crate::msg::queueable_message::QueueableMessage;
use crate::msg::response_futures::{ResponseFuture, ResponseFutures};
use crate::sequence_number::{AtomicSequenceNumber, SequenceNumber};
use crate::socket::MessageSocket;
use crate::socket_writer::{SocketWriter, SocketWriterListener};

/// Tracks what the writer loop reports
struct OutboundListener {
    session_id: AtomicU64,
    last_sent_sequence_number: AtomicSequenceNumber,
    write_failure: Mutex<Option<String>>,
}

impl SocketWriterListener for OutboundListener {
    fn exception_on_write(&self, e: &anyhow::Error) {
        warn!("{}: failed to write to socket: {}", log_prefix(self.session_id.load(Ordering::Acquire)), e);
        *self.write_failure.lock().unwrap() = Some(e.to_string());
    }

    fn message_sent(&self, sequence_number: i32, is_control: bool) {
        trace!("{}: sent seq.nr. {} (control: {})", log_prefix(self.session_id.load(Ordering::Acquire)), sequence_number, is_control);
        self.last_sent_sequence_number.set(sequence_number);
    }
}

/// The outbound half of a client session: it owns the message queue, the history of sent
///  messages and the writer loop, and it has the entry points for the session's life cycle.
///
/// The receive path is not part of this: it reports received sequence numbers through
///  [OutboundSession::on_message_received] so they are piggy-backed on outgoing messages,
///  and it dispatches responses through [OutboundSession::complete_response].
///
/// Reconnecting is the caller's business, too. After a write failed (see
///  [OutboundSession::write_failure]), the caller connects a new socket, and
///  [OutboundSession::resume] re-sends everything the server did not acknowledge.
pub struct OutboundSession {
    empty_queue_timeout: Option<Duration>,
    session_id: AtomicU64,
    last_received_sequence_number: AtomicSequenceNumber,
    response_futures: Arc<ResponseFutures>,
    message_writer: MessageWriter,
    history: Arc<HistoryBuffer>,
    listener: Arc<OutboundListener>,
    socket_writer: RwLock<Option<Arc<SocketWriter>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl OutboundSession {
    pub fn new(config: &SessionConfig) -> anyhow::Result<OutboundSession> {
        config.validate()?;

        let rate_limiter: Arc<dyn RateLimiter> = if config.rate_limit_enabled {
            Arc::new(ExponentialRateLimiter::new(config.message_queue_size))
        }
        else {
            Arc::new(NullRateLimiter)
        };

        let message_queue = Arc::new(RoundRobinBuffer::new(
            config.message_queue_size,
            rate_limiter,
            Box::new(|m: &QueueableMessage| m.is_hla_response()),
            config.primary_factor,
            config.alternate_factor,
        ));

        let response_futures = Arc::new(ResponseFutures::new());
        let message_writer = MessageWriter::new(MessageHeader::NO_SESSION_ID, message_queue.clone(), response_futures.clone());

        // the new session message is written directly and does not go through the history
        let history = Arc::new(HistoryBuffer::new(message_queue, first_buffered_sequence_number()));

        Ok(OutboundSession {
            empty_queue_timeout: config.empty_queue_timeout,
            session_id: AtomicU64::new(MessageHeader::NO_SESSION_ID),
            last_received_sequence_number: AtomicSequenceNumber::new(SequenceNumber::NO_SEQUENCE_NUMBER),
            response_futures,
            message_writer,
            history,
            listener: Arc::new(OutboundListener {
                session_id: AtomicU64::new(MessageHeader::NO_SESSION_ID),
                last_sent_sequence_number: AtomicSequenceNumber::new(SequenceNumber::NO_SEQUENCE_NUMBER),
                write_failure: Mutex::new(None),
            }),
            socket_writer: RwLock::new(None),
            writer_task: Mutex::new(None),
        })
    }

    fn log_prefix(&self) -> String {
        log_prefix(self.session_id())
    }

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    /// This is called once the server assigned the session id
    pub fn set_session_id(&self, session_id: u64) {
        self.session_id.store(session_id, Ordering::Release);
        self.listener.session_id.store(session_id, Ordering::Release);
        self.message_writer.set_session_id(session_id);
        if let Some(writer) = self.socket_writer.read().unwrap().as_ref() {
            writer.set_session_id(session_id);
        }
    }

    fn socket_writer(&self) -> anyhow::Result<Arc<SocketWriter>> {
        self.socket_writer.read().unwrap()
            .clone()
            .ok_or_else(|| anyhow!("session was not started"))
    }

    /// Sends the new session message on the socket and starts the writer loop
    pub async fn start(&self, socket: Arc<dyn MessageSocket>) -> anyhow::Result<()> {
        if self.socket_writer.read().unwrap().is_some() {
            anyhow::bail!("session was started already");
        }

        let writer = Arc::new(SocketWriter::create_socket_writer(
            self.session_id(),
            self.listener.clone(),
            self.history.clone(),
            socket,
            first_buffered_sequence_number(),
        ));

        writer.write_direct_message(&MessageWriter::create_new_session_message()).await?;
        debug!("{}: sent new session request", self.log_prefix());

        *self.socket_writer.write().unwrap() = Some(writer.clone());
        self.spawn_writer(&writer);
        Ok(())
    }

    fn spawn_writer(&self, writer: &Arc<SocketWriter>) {
        let handle = writer.spawn_writer_loop();
        if let Some(prev) = self.writer_task.lock().unwrap().replace(handle) {
            if !prev.is_finished() {
                warn!("{}: replacing a writer loop that is still running", self.log_prefix());
            }
        }
    }

    /// Stops the writer loop and waits for it to terminate. Messages that were not sent stay
    ///  in the queue.
    ///
    /// NB: If the loop is stuck writing to the socket, this waits until the write completes or
    ///      fails - see [OutboundSession::shutdown]
    pub async fn stop(&self) -> anyhow::Result<()> {
        let writer = self.socket_writer()?;
        writer.stop_writer_loop();

        let task = self.writer_task.lock().unwrap().take();
        if let Some(task) = task {
            task.await?;
        }
        debug!("{}: writer loop stopped", self.log_prefix());
        Ok(())
    }

    /// Continues the session on a new socket: sends a resume request, and then re-sends all
    ///  retained messages after `last_acknowledged`, the last sequence number the server
    ///  received. An invalid `last_acknowledged` means the server received none of them.
    ///
    /// This fails if the server's acknowledged position was dropped from the history already:
    ///  the session can not be recovered in that case.
    pub async fn resume(&self, socket: Arc<dyn MessageSocket>, last_acknowledged: i32) -> anyhow::Result<()> {
        self.stop().await?;
        let writer = self.socket_writer()?;

        let last_received = self.last_received_sequence_number.get();
        let oldest_available = writer.get_oldest_added_sequence_number();
        let newest_available = writer.get_newest_added_sequence_number();
        debug!("{}: resuming - oldest available message is {}, last received message is {}", self.log_prefix(), oldest_available, last_received);

        let acknowledged_in_history = SequenceNumber::is_valid(last_acknowledged) && SequenceNumber::is_valid(newest_available);
        if acknowledged_in_history && !SequenceNumber::in_interval(last_acknowledged, oldest_available, newest_available)? {
            anyhow::bail!("server acknowledged seq.nr. {}, which is not in the retained history from {} to {}", last_acknowledged, oldest_available, newest_available);
        }

        let direct_writer = SocketWriter::create_direct_socket_writer(self.session_id(), socket.clone());
        direct_writer.write_direct_message(&MessageWriter::create_resume_session_message(
            self.session_id(),
            last_received,
            oldest_available,
        )).await?;

        if !SequenceNumber::is_valid(last_acknowledged) {
            writer.rewind_to_first_message()?;
        }
        else if acknowledged_in_history && newest_available != last_acknowledged {
            writer.rewind_to_sequence_number_after(last_acknowledged)?;
        }
        debug!("{}: resuming with seq.nr. {}", self.log_prefix(), SequenceNumber::next_after(last_acknowledged));

        *self.listener.write_failure.lock().unwrap() = None;
        writer.set_new_socket(socket);
        writer.enable_writer_loop();
        self.spawn_writer(&writer);

        info!("{}: resumed session", self.log_prefix());
        Ok(())
    }

    /// Waits for all queued messages to be written, for at most the configured
    ///  `empty_queue_timeout`. Returns whether everything was written.
    pub async fn flush(&self) -> anyhow::Result<bool> {
        let writer = self.socket_writer()?;
        Ok(writer.wait_for_empty_queue(self.empty_queue_timeout).await)
    }

    /// Stops the session for good: producers are rejected, the socket is closed (which also
    ///  ends a write that hangs), unsent messages are dropped and callers waiting for
    ///  responses get an error.
    pub async fn shutdown(&self) {
        self.message_writer.disable_message_queue_insertion();
        if let Ok(writer) = self.socket_writer() {
            writer.stop_writer_loop();
            writer.close_socket().await;

            let task = self.writer_task.lock().unwrap().take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!("{}: writer loop terminated abnormally: {}", self.log_prefix(), e);
                }
            }
        }
        self.history.discard_unsent();
        self.response_futures.abandon_all();
        info!("{}: outbound session shut down", self.log_prefix());
    }

    pub fn on_message_received(&self, sequence_number: i32) {
        let previous = self.last_received_sequence_number.get_and_set(sequence_number);
        trace!("{}: received seq.nr. {} after {}", self.log_prefix(), sequence_number, previous.get());
    }

    pub fn last_received_sequence_number(&self) -> i32 {
        self.last_received_sequence_number.get()
    }

    /// Returns `false` if no request is waiting for this response
    pub fn complete_response(&self, sequence_number: i32, payload: Bytes) -> bool {
        self.response_futures.complete(sequence_number, payload)
    }

    pub fn last_sent_sequence_number(&self) -> i32 {
        self.listener.last_sent_sequence_number.get()
    }

    /// The error of the last failed socket write, if the writer loop terminated because of it
    pub fn write_failure(&self) -> Option<String> {
        self.listener.write_failure.lock().unwrap().clone()
    }

    pub async fn send_heartbeat(&self) -> anyhow::Result<ResponseFuture> {
        self.message_writer.write_heartbeat_message(self.last_received_sequence_number()).await
    }

    pub async fn send_terminate(&self) -> anyhow::Result<()> {
        self.message_writer.write_terminate_message(self.last_received_sequence_number()).await
    }

    pub async fn send_hla_call_request(&self, hla_service_call: Bytes) -> anyhow::Result<ResponseFuture> {
        self.message_writer.write_hla_call_request(hla_service_call, self.last_received_sequence_number()).await
    }

    pub async fn send_hla_callback_response(&self, response_to: i32, encoded_response: Bytes) -> anyhow::Result<()> {
        self.message_writer.write_hla_callback_response(response_to, encoded_response, self.last_received_sequence_number()).await
    }
}

fn first_buffered_sequence_number() -> i32 {
    SequenceNumber::next_after(SequenceNumber::INITIAL_SEQUENCE_NUMBER)
}
