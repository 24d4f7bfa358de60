use bytes::{Buf, BufMut, BytesMut};
use num_enum::TryFromPrimitive;
use anyhow::bail;
use crate::message_type::MessageType;

/// The fixed-size header that precedes every message's payload on the wire. `packet_size` is the
///  total size *including* the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub packet_size: u32,
    pub sequence_number: i32,
    pub session_id: u64,
    pub last_received_sequence_number: i32,
    pub message_type: MessageType,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + size_of::<i32>() + size_of::<u64>() + size_of::<i32>() + size_of::<u32>();

    /// offset of the message type inside the header, for peeking at raw buffers
    pub const MESSAGE_TYPE_OFFSET: usize = 20;

    /// the server assigns the session id, this is the marker for 'not yet assigned'
    pub const NO_SESSION_ID: u64 = 0;

    pub fn with(payload_size: u32, sequence_number: i32, session_id: u64, last_received_sequence_number: i32, message_type: MessageType) -> MessageHeader {
        MessageHeader {
            packet_size: payload_size + Self::SERIALIZED_LEN as u32,
            sequence_number,
            session_id,
            last_received_sequence_number,
            message_type,
        }
    }

    pub fn payload_size(&self) -> u32 {
        self.packet_size - Self::SERIALIZED_LEN as u32
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.packet_size);
        buf.put_i32(self.sequence_number);
        buf.put_u64(self.session_id);
        buf.put_i32(self.last_received_sequence_number);
        buf.put_u32(self.message_type.into());
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        let packet_size = buf.try_get_u32()?;
        if (packet_size as usize) < Self::SERIALIZED_LEN {
            bail!("packet size {} is smaller than the header size {}", packet_size, Self::SERIALIZED_LEN);
        }
        let sequence_number = buf.try_get_i32()?;
        let session_id = buf.try_get_u64()?;
        let last_received_sequence_number = buf.try_get_i32()?;
        let message_type = MessageType::try_from_primitive(buf.try_get_u32()?)?;

        Ok(MessageHeader {
            packet_size,
            sequence_number,
            session_id,
            last_received_sequence_number,
            message_type,
        })
    }

    /// Reads the message type from an encoded message for logging, without decoding the rest
    ///  of the header
    pub fn message_type_name(encoded: &[u8]) -> String {
        let mut buf = match encoded.get(Self::MESSAGE_TYPE_OFFSET..) {
            Some(b) => b,
            None => return "<ENCODING ERROR>".to_string(),
        };
        match buf.try_get_u32() {
            Ok(raw) => match MessageType::try_from_primitive(raw) {
                Ok(t) => t.to_string(),
                Err(_) => format!("<UNKNOWN TYPE {}>", raw),
            },
            Err(_) => "<ENCODING ERROR>".to_string(),
        }
    }
}
