use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::trace;
use crate::log_util::log_prefix;
use crate::message_header::MessageHeader;
use crate::message_type::MessageType;
use crate::msg::encodable::EncodableMessage;
use crate::msg::encoded_message::EncodedMessage;
use crate::msg::response_futures::{ResponseFutures, ResponsePromise};
use crate::safe_converter::{check_message_size, PrecheckedCast};

/// An outbound message that has not been assigned a sequence number yet.
///
/// The sequence number is assigned when the message is about to be sent, and that is also when
///  a request's response promise is registered: [QueueableMessage::create_encoded_message]
///  consumes the message so this can happen only once.
pub struct QueueableMessage {
    payload_size: u32,
    last_received_sequence_number: i32,
    session_id: u64,
    message_type: MessageType,
    payload: Option<Box<dyn EncodableMessage>>,
    response: Option<(ResponsePromise, Arc<ResponseFutures>)>,
}

impl Debug for QueueableMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueableMessage")
            .field("payload_size", &self.payload_size)
            .field("last_received_sequence_number", &self.last_received_sequence_number)
            .field("session_id", &self.session_id)
            .field("message_type", &self.message_type)
            .field("expects_response", &self.response.is_some())
            .finish()
    }
}

impl QueueableMessage {
    /// fails if the encoded message would not fit into the header's size field
    pub fn new(
        last_received_sequence_number: i32,
        session_id: u64,
        message_type: MessageType,
        payload: Option<Box<dyn EncodableMessage>>,
        response: Option<(ResponsePromise, Arc<ResponseFutures>)>,
    ) -> anyhow::Result<QueueableMessage> {
        let payload_len = payload.as_ref()
            .map(|p| p.encoded_len())
            .unwrap_or(0);
        check_message_size(payload_len + MessageHeader::SERIALIZED_LEN)?;

        Ok(QueueableMessage {
            payload_size: payload_len.prechecked_cast(),
            last_received_sequence_number,
            session_id,
            message_type,
            payload,
            response,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn is_hla_response(&self) -> bool {
        self.message_type.is_hla_response()
    }

    pub fn expects_response(&self) -> bool {
        self.response.is_some()
    }

    /// Encodes the message with the given sequence number. If the message is a request, its
    ///  promise is registered under that sequence number *before* the encoded message is
    ///  returned, so the response can never arrive before the promise is in place.
    pub fn create_encoded_message(self, sequence_number: i32) -> EncodedMessage {
        let header = MessageHeader::with(
            self.payload_size,
            sequence_number,
            self.session_id,
            self.last_received_sequence_number,
            self.message_type,
        );
        let encoded = EncodedMessage::create(&header, self.payload.as_deref());

        if let Some((promise, futures)) = self.response {
            trace!("{}: registering response promise for seq.nr. {}", log_prefix(self.session_id), sequence_number);
            futures.insert(sequence_number, promise);
        }

        encoded
    }
}
