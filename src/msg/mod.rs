pub mod encodable;
pub mod encoded_message;
pub mod message_writer;
pub mod queueable_message;
pub mod response_futures;
