use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
#[cfg(test)] use mockall::automock;
use tokio::task::JoinHandle;
use tracing::debug;
use crate::buffers::{BufferPeeker, BufferReader};
use crate::buffers::history_buffer::HistoryBuffer;
use crate::log_util::{log_prefix, pad_num};
use crate::msg::encoded_message::EncodedMessage;
use crate::safe_converter::check_message_size;
use crate::sequence_number::SequenceNumber;
use crate::socket::MessageSocket;

/// Callbacks from the writer loop to the session
#[cfg_attr(test, automock)]
pub trait SocketWriterListener: Send + Sync + 'static {
    /// Writing to the socket failed, and the writer loop terminated. The message that failed is
    ///  still the next one in the history.
    fn exception_on_write(&self, e: &anyhow::Error);

    fn message_sent(&self, sequence_number: i32, is_control: bool);
}

struct WriterSequence {
    expected_next_sequence_number: SequenceNumber,
    last_sequence_number: i32,
}

/// Writes encoded messages to the socket.
///
/// A regular writer owns a [HistoryBuffer] and runs a loop that takes messages from it and
///  writes them, see [SocketWriter::spawn_writer_loop]. After the socket failed, the session
///  replaces the socket, rewinds the history to the last message the server acknowledged and
///  enables the loop again.
///
/// A *direct* writer has no history and only writes the messages it is given, without sequence
///  numbers or backpressure - this is for the handshake before a session is established.
///  Operations that need a history are programming errors on a direct writer.
///
/// NB: Socket writes can not be interrupted. If the loop is stuck in a write, the only way to
///      stop it is to close the socket.
pub struct SocketWriter {
    session_id: AtomicU64,
    listener: Option<Arc<dyn SocketWriterListener>>,
    history: Option<Arc<HistoryBuffer>>,
    socket: RwLock<Arc<dyn MessageSocket>>,
    sequence: Mutex<WriterSequence>,
    run: AtomicBool,
}

impl SocketWriter {
    pub fn create_socket_writer(
        session_id: u64,
        listener: Arc<dyn SocketWriterListener>,
        history: Arc<HistoryBuffer>,
        socket: Arc<dyn MessageSocket>,
        expected_next_sequence_number: i32,
    ) -> SocketWriter {
        SocketWriter {
            session_id: AtomicU64::new(session_id),
            listener: Some(listener),
            history: Some(history),
            socket: RwLock::new(socket),
            sequence: Mutex::new(WriterSequence {
                expected_next_sequence_number: SequenceNumber::new(expected_next_sequence_number),
                last_sequence_number: SequenceNumber::NO_SEQUENCE_NUMBER,
            }),
            run: AtomicBool::new(true),
        }
    }

    pub fn create_direct_socket_writer(session_id: u64, socket: Arc<dyn MessageSocket>) -> SocketWriter {
        SocketWriter {
            session_id: AtomicU64::new(session_id),
            listener: None,
            history: None,
            socket: RwLock::new(socket),
            sequence: Mutex::new(WriterSequence {
                expected_next_sequence_number: SequenceNumber::new(SequenceNumber::INITIAL_SEQUENCE_NUMBER + 1),
                last_sequence_number: SequenceNumber::NO_SEQUENCE_NUMBER,
            }),
            run: AtomicBool::new(false),
        }
    }

    pub fn is_direct_only(&self) -> bool {
        self.history.is_none()
    }

    fn history(&self) -> &Arc<HistoryBuffer> {
        self.history.as_ref()
            .expect("this is a bug: operation requires a history buffer, but this is a direct socket writer")
    }

    fn listener(&self) -> &Arc<dyn SocketWriterListener> {
        self.listener.as_ref()
            .expect("this is a bug: a buffered socket writer should have a listener")
    }

    fn log_prefix(&self) -> String {
        log_prefix(self.session_id.load(Ordering::Acquire))
    }

    fn current_socket(&self) -> Arc<dyn MessageSocket> {
        self.socket.read().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }

    pub fn spawn_writer_loop(self: &Arc<Self>) -> JoinHandle<()> {
        assert!(!self.is_direct_only(), "this is a bug: a direct socket writer has no writer loop");

        let writer = self.clone();
        tokio::spawn(async move {
            writer.socket_writer_loop().await;
        })
    }

    /// Writes messages until the loop is stopped, the history is interrupted or a write fails
    pub async fn socket_writer_loop(&self) {
        debug!("{}: starting socket writer loop", self.log_prefix());

        while self.is_running() {
            if let Err(e) = self.write_next_message().await {
                debug!("{}: {}", self.log_prefix(), e);
                break;
            }
        }

        debug!("{}: socket writer loop terminated", self.log_prefix());
    }

    /// Waits for the next message in the history and writes it. A write failure is reported to
    ///  the listener and stops the loop, but it is not returned as an error: only an
    ///  interrupted history is.
    pub async fn write_next_message(&self) -> anyhow::Result<()> {
        let history = self.history();

        let message = match history.wait_and_peek().await {
            Some(m) => m,
            None => anyhow::bail!("failed retrieving next message, buffer interrupted"),
        };

        if let Err(e) = self.write_message(&message).await {
            self.listener().exception_on_write(&e);
            self.run.store(false, Ordering::Release);
            return Ok(());
        }

        {
            let mut sequence = self.sequence.lock().unwrap();
            if sequence.expected_next_sequence_number.get() != message.sequence_number {
                debug!("{}: use of non-sequential sequence number in outgoing message: {} after previous sequence number {}",
                    self.log_prefix(), message.sequence_number, sequence.last_sequence_number);
            }
            sequence.last_sequence_number = message.sequence_number;
            sequence.expected_next_sequence_number.set(message.sequence_number);
            sequence.expected_next_sequence_number.increment();
        }

        self.listener().message_sent(message.sequence_number, message.is_control);
        history.poll();
        Ok(())
    }

    pub async fn write_direct_message(&self, message: &EncodedMessage) -> anyhow::Result<()> {
        self.write_message(message).await
    }

    async fn write_message(&self, message: &EncodedMessage) -> anyhow::Result<()> {
        if check_message_size(message.len()).is_err() {
            anyhow::bail!("failed to write message because its size exceeds {}", u32::MAX);
        }

        self.current_socket()
            .send(&message.data).await?;

        debug!("{}: sent     seq.nr. {}, type {}", self.log_prefix(), pad_num(message.sequence_number), message.message_type_name());
        Ok(())
    }

    /// waits until all queued messages were written, see [BufferReader::wait_until_empty]
    pub async fn wait_for_empty_queue(&self, timeout: Option<Duration>) -> bool {
        self.history().wait_until_empty(timeout).await
    }

    /// Replays all retained messages. This fails if messages were dropped from the history.
    pub fn rewind_to_first_message(&self) -> anyhow::Result<()> {
        let history = self.history();
        history.rewind_to_first()?;
        self.expect_next_from_history();
        Ok(())
    }

    /// Replays all retained messages after the given sequence number, i.e. continues after
    ///  the last message the server acknowledged
    pub fn rewind_to_sequence_number_after(&self, sequence_number: i32) -> anyhow::Result<()> {
        let history = self.history();
        history.rewind_to_after(sequence_number)?;
        self.expect_next_from_history();
        Ok(())
    }

    fn expect_next_from_history(&self) {
        if let Some(next) = self.history().peek() {
            self.sequence.lock().unwrap()
                .expected_next_sequence_number.set(next.sequence_number);
        }
    }

    pub fn expected_next_sequence_number(&self) -> i32 {
        self.sequence.lock().unwrap().expected_next_sequence_number.get()
    }

    pub fn last_sequence_number(&self) -> i32 {
        self.sequence.lock().unwrap().last_sequence_number
    }

    pub fn get_oldest_added_sequence_number(&self) -> i32 {
        self.history().get_oldest_added_sequence_number()
    }

    pub fn get_newest_added_sequence_number(&self) -> i32 {
        self.history().get_newest_added_sequence_number()
    }

    pub fn set_session_id(&self, session_id: u64) {
        self.session_id.store(session_id, Ordering::Release);
    }

    /// This does not restart the writer loop, see [SocketWriter::enable_writer_loop]
    pub fn set_new_socket(&self, socket: Arc<dyn MessageSocket>) {
        assert!(!self.is_direct_only(), "this is a bug: the socket of a direct socket writer can not be replaced");
        *self.socket.write().unwrap() = socket;
    }

    pub async fn close_socket(&self) {
        self.current_socket().close().await;
    }

    pub fn enable_writer_loop(&self) {
        self.run.store(true, Ordering::Release);
        self.history().interrupt(false);
    }

    /// Stops the loop once its current write (if any) is done. A loop that waits for the next
    ///  message wakes up immediately.
    pub fn stop_writer_loop(&self) {
        self.run.store(false, Ordering::Release);
        self.history().interrupt(true);
    }
}
