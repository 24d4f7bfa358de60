use std::fmt::Debug;
use bytes::{BufMut, Bytes, BytesMut};

/// The payload of a message, i.e. everything that follows the [crate::message_header::MessageHeader]
pub trait EncodableMessage: Debug + Send + Sync + 'static {
    fn encoded_len(&self) -> usize;

    fn ser(&self, buf: &mut BytesMut);
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewSessionMessage {
    pub protocol_version: i32,
}
impl NewSessionMessage {
    pub const CURRENT_PROTOCOL_VERSION: i32 = 1;
}
impl EncodableMessage for NewSessionMessage {
    fn encoded_len(&self) -> usize {
        size_of::<i32>()
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.protocol_version);
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResumeRequestMessage {
    /// the last message from the server that this client received
    pub last_received_sequence_number: i32,
    /// the oldest message that this client can still re-send
    pub oldest_available_sequence_number: i32,
}
impl EncodableMessage for ResumeRequestMessage {
    fn encoded_len(&self) -> usize {
        2 * size_of::<i32>()
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.last_received_sequence_number);
        buf.put_i32(self.oldest_available_sequence_number);
    }
}

/// An already-encoded HLA call, opaque at this level
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HlaCallRequestMessage(pub Bytes);
impl EncodableMessage for HlaCallRequestMessage {
    fn encoded_len(&self) -> usize {
        self.0.len()
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HlaCallbackResponseMessage {
    /// sequence number of the server's callback request this responds to
    pub response_to: i32,
    pub response: Bytes,
}
impl EncodableMessage for HlaCallbackResponseMessage {
    fn encoded_len(&self) -> usize {
        size_of::<i32>() + self.response.len()
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.response_to);
        buf.put_slice(&self.response);
    }
}
