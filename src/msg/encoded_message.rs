use bytes::{Bytes, BytesMut};
use crate::message_header::MessageHeader;
use crate::msg::encodable::EncodableMessage;

/// A message as it goes on the wire, header and payload. This is immutable and cheap to
///  clone (the bytes are shared), so it can be retained for replay and peeked at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedMessage {
    pub sequence_number: i32,
    pub is_control: bool,
    pub data: Bytes,
}

impl EncodedMessage {
    pub fn create(header: &MessageHeader, payload: Option<&dyn EncodableMessage>) -> EncodedMessage {
        let mut buf = BytesMut::with_capacity(header.packet_size as usize);
        header.ser(&mut buf);
        if let Some(payload) = payload {
            payload.ser(&mut buf);
        }
        debug_assert_eq!(buf.len(), header.packet_size as usize);

        EncodedMessage {
            sequence_number: header.sequence_number,
            is_control: header.message_type.is_control(),
            data: buf.freeze(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn message_type_name(&self) -> String {
        MessageHeader::message_type_name(&self.data)
    }
}
