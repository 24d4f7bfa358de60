//! This is the client side of the Federate Protocol's session layer: it delivers request,
//!  response and notification messages from a federate to a federation server over a
//!  byte-stream socket, in order, and survives the loss of that socket.
//!
//! ## Design goals
//!
//! * Exactly one logical session between one client and one server endpoint
//!   * the socket can be replaced after a reconnect, the session (and its sequence numbers)
//!     lives on
//!   * explicitly *not* a message broker
//! * Every message that is sent as part of the session gets a sequence number, assigned at the
//!   last possible moment, i.e. when the writer is about to put it on the socket
//! * Recently sent messages are retained so they can be re-sent after a reconnect, starting
//!   right after the last message the server acknowledged
//!   * retention is bounded: the history is a ring buffer, and the oldest messages are dropped
//!     when it overflows. Rewinding to a message that was dropped is an error.
//! * Control messages (heartbeats, session termination etc.) are never replayed. At most one of
//!   them is pending at any time, and it has priority over regular messages
//! * Requests are correlated to their responses by sequence number. The response future is
//!   registered *before* the request's bytes reach the socket, so the receive path always
//!   finds it.
//! * Backpressure: the outbound queue is bounded, and producers are suspended when it is full
//!   * HLA responses (i.e. answers to callbacks from the server) go to an unbounded alternate
//!     queue that is served round-robin with the primary queue, so a federate that is
//!     throttled can still answer callbacks
//!
//! ## Message framing
//!
//! Every message on the wire is a fixed-size header followed by the payload. All numbers are
//!  in network byte order (BE):
//!
//! ```ascii
//!  0: packet size (u32) - total size of the message *including* this header
//!  4: sequence number (i32) - `i32::MIN` for 'no sequence number'
//!  8: session id (u64) - 0 before the server assigned one
//! 16: last received sequence number (i32) - piggy-backed acknowledgement of the
//!      server's messages
//! 20: message type (u32):
//!      1 CTRL_NEW_SESSION             2 CTRL_NEW_SESSION_STATUS
//!      3 CTRL_HEARTBEAT               4 CTRL_HEARTBEAT_RESPONSE
//!      5 CTRL_TERMINATE_SESSION       6 CTRL_SESSION_TERMINATED
//!     10 CTRL_RESUME_REQUEST         11 CTRL_RESUME_STATUS
//!     20 HLA_CALL_REQUEST            21 HLA_CALL_RESPONSE
//!     22 HLA_CALLBACK_REQUEST        23 HLA_CALLBACK_RESPONSE
//! 24: payload
//! ```
//!
//! Message types below 20 are control messages.
//!
//! ## Sequence numbers
//!
//! Sequence numbers are non-negative `i32` values that wrap around from `i32::MAX` to 0.
//!  Negative values are invalid, `i32::MIN` being the well-known 'no sequence number'.
//!
//! ## Outbound pipeline
//!
//! ```ascii
//!  MessageWriter --insert--> RoundRobinBuffer --(encode + sequence)--> HistoryBuffer
//!                                                                         |
//!                             socket <--write-- SocketWriter <--peek/poll-+
//! ```
//!
//! The `SocketWriter`'s loop is the only consumer. It peeks a message, writes it and polls
//!  it only after the write succeeded, so a message that failed to go out is still at the
//!  head of the history after a reconnect.
//!
//! Socket writes can not be cancelled: the only way to get a writer loop out of a write
//!  that hangs is to close the socket.

pub mod config;
pub mod sequence_number;
pub mod message_type;
pub mod message_header;
pub mod msg;
pub mod buffers;
pub mod socket;
pub mod socket_writer;
pub mod outbound;
mod log_util;
mod safe_converter;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            // .with_max_level(Level::DEBUG)
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
