use std::fmt::{Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The type of a message as it is transferred on the wire, see the crate documentation for
///  the framing.
///
/// Types below [MessageType::FIRST_NON_CONTROL] are *control messages* that manage the session
///  itself. They are not retained for replay after a reconnect.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    CtrlNewSession = 1,
    CtrlNewSessionStatus = 2,
    CtrlHeartbeat = 3,
    CtrlHeartbeatResponse = 4,
    CtrlTerminateSession = 5,
    CtrlSessionTerminated = 6,
    CtrlResumeRequest = 10,
    CtrlResumeStatus = 11,
    HlaCallRequest = 20,
    HlaCallResponse = 21,
    HlaCallbackRequest = 22,
    HlaCallbackResponse = 23,
    Unknown = 999,
}

impl MessageType {
    const FIRST_NON_CONTROL: u32 = 20;

    pub fn is_control(&self) -> bool {
        u32::from(*self) < Self::FIRST_NON_CONTROL
    }

    /// Responses are answers to something the server asked for - they bypass the primary
    ///  queue's backpressure
    pub fn is_hla_response(&self) -> bool {
        matches!(self, MessageType::HlaCallResponse | MessageType::HlaCallbackResponse)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::CtrlNewSession => "CTRL_NEW_SESSION",
            MessageType::CtrlNewSessionStatus => "CTRL_NEW_SESSION_STATUS",
            MessageType::CtrlHeartbeat => "CTRL_HEARTBEAT",
            MessageType::CtrlHeartbeatResponse => "CTRL_HEARTBEAT_RESPONSE",
            MessageType::CtrlTerminateSession => "CTRL_TERMINATE_SESSION",
            MessageType::CtrlSessionTerminated => "CTRL_SESSION_TERMINATED",
            MessageType::CtrlResumeRequest => "CTRL_RESUME_REQUEST",
            MessageType::CtrlResumeStatus => "CTRL_RESUME_STATUS",
            MessageType::HlaCallRequest => "HLA_CALL_REQUEST",
            MessageType::HlaCallResponse => "HLA_CALL_RESPONSE",
            MessageType::HlaCallbackRequest => "HLA_CALLBACK_REQUEST",
            MessageType::HlaCallbackResponse => "HLA_CALLBACK_RESPONSE",
            MessageType::Unknown => "UNKNOWN",
        }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
