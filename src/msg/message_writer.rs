use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use crate::buffers::{BufferReader, GenericBuffer};
use crate::buffers::round_robin_buffer::RoundRobinBuffer;
use crate::log_util::log_prefix;
use crate::message_header::MessageHeader;
use crate::message_type::MessageType;
use crate::msg::encodable::{EncodableMessage, HlaCallRequestMessage, HlaCallbackResponseMessage, NewSessionMessage, ResumeRequestMessage};
use crate::msg::encoded_message::EncodedMessage;
use crate::msg::queueable_message::QueueableMessage;
use crate::msg::response_futures::{ResponseFuture, ResponseFutures};
use crate::safe_converter::PrecheckedCast;
use crate::sequence_number::SequenceNumber;

/// The API for putting messages into the outbound queue. Sequence numbers are assigned later,
///  when the messages are actually sent.
///
/// The handshake messages (new session, resume) do not go through the queue: they are
///  written directly to the socket before the writer loop runs.
pub struct MessageWriter {
    session_id: AtomicU64,
    message_queue: Arc<RoundRobinBuffer<QueueableMessage>>,
    response_futures: Arc<ResponseFutures>,
    insertion_disabled: AtomicBool,
}

impl MessageWriter {
    pub fn new(
        session_id: u64,
        message_queue: Arc<RoundRobinBuffer<QueueableMessage>>,
        response_futures: Arc<ResponseFutures>,
    ) -> MessageWriter {
        MessageWriter {
            session_id: AtomicU64::new(session_id),
            message_queue,
            response_futures,
            insertion_disabled: AtomicBool::new(false),
        }
    }

    pub fn create_new_session_message() -> EncodedMessage {
        let message = NewSessionMessage { protocol_version: NewSessionMessage::CURRENT_PROTOCOL_VERSION };
        Self::create_direct_message(
            SequenceNumber::INITIAL_SEQUENCE_NUMBER,
            MessageHeader::NO_SESSION_ID,
            SequenceNumber::NO_SEQUENCE_NUMBER,
            MessageType::CtrlNewSession,
            &message,
        )
    }

    pub fn create_resume_session_message(
        session_id: u64,
        last_received_sequence_number: i32,
        oldest_available_sequence_number: i32,
    ) -> EncodedMessage {
        let message = ResumeRequestMessage {
            last_received_sequence_number,
            oldest_available_sequence_number,
        };
        Self::create_direct_message(
            SequenceNumber::NO_SEQUENCE_NUMBER,
            session_id,
            last_received_sequence_number,
            MessageType::CtrlResumeRequest,
            &message,
        )
    }

    fn create_direct_message(sequence_number: i32, session_id: u64, last_received_sequence_number: i32, message_type: MessageType, message: &dyn EncodableMessage) -> EncodedMessage {
        let payload_size = message.encoded_len().prechecked_cast();
        EncodedMessage::create(
            &MessageHeader::with(payload_size, sequence_number, session_id, last_received_sequence_number, message_type),
            Some(message),
        )
    }

    pub async fn write_heartbeat_message(&self, last_received_sequence_number: i32) -> anyhow::Result<ResponseFuture> {
        self.add_request(last_received_sequence_number, MessageType::CtrlHeartbeat, None).await
    }

    pub async fn write_terminate_message(&self, last_received_sequence_number: i32) -> anyhow::Result<()> {
        self.add_message(last_received_sequence_number, MessageType::CtrlTerminateSession, None).await
    }

    /// `hla_service_call` is the encoded HLA call with its parameters, opaque at this level
    pub async fn write_hla_call_request(&self, hla_service_call: Bytes, last_received_sequence_number: i32) -> anyhow::Result<ResponseFuture> {
        self.add_request(
            last_received_sequence_number,
            MessageType::HlaCallRequest,
            Some(Box::new(HlaCallRequestMessage(hla_service_call))),
        ).await
    }

    /// Responses go to the alternate queue (if the queue is configured that way), so this does
    ///  not wait behind a full primary queue
    pub async fn write_hla_callback_response(&self, response_to: i32, encoded_response: Bytes, last_received_sequence_number: i32) -> anyhow::Result<()> {
        self.add_message(
            last_received_sequence_number,
            MessageType::HlaCallbackResponse,
            Some(Box::new(HlaCallbackResponseMessage { response_to, response: encoded_response })),
        ).await
    }

    pub fn set_session_id(&self, session_id: u64) {
        self.session_id.store(session_id, Ordering::Release);
    }

    /// All later writes fail, and so do producers waiting for space in the queue. This is
    ///  permanent.
    pub fn disable_message_queue_insertion(&self) {
        debug!("{}: disabling message queue insertion", log_prefix(self.session_id()));
        self.insertion_disabled.store(true, Ordering::Release);
        self.message_queue.interrupt(true);
    }

    pub fn is_insertion_disabled(&self) -> bool {
        self.insertion_disabled.load(Ordering::Acquire)
    }

    fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    async fn add_message(&self, last_received_sequence_number: i32, message_type: MessageType, payload: Option<Box<dyn EncodableMessage>>) -> anyhow::Result<()> {
        let message = QueueableMessage::new(last_received_sequence_number, self.session_id(), message_type, payload, None)?;
        self.insert(message).await
    }

    async fn add_request(&self, last_received_sequence_number: i32, message_type: MessageType, payload: Option<Box<dyn EncodableMessage>>) -> anyhow::Result<ResponseFuture> {
        let (promise, future) = oneshot::channel();
        let message = QueueableMessage::new(
            last_received_sequence_number,
            self.session_id(),
            message_type,
            payload,
            Some((promise, self.response_futures.clone())),
        )?;
        self.insert(message).await?;
        Ok(future)
    }

    async fn insert(&self, message: QueueableMessage) -> anyhow::Result<()> {
        if self.is_insertion_disabled() {
            anyhow::bail!("message queue insertion is disabled");
        }

        trace!("{}: queueing {:?}", log_prefix(self.session_id()), message);
        if let Err(e) = self.message_queue.insert(message).await {
            debug!("{}: {}", log_prefix(self.session_id()), e);
            anyhow::bail!("the message queue is full");
        }
        Ok(())
    }
}
