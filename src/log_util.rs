pub const CLIENT_PREFIX: &str = "Client";

const NUMBER_LENGTH: usize = 10;

/// Session ids are rendered as four groups of 16 bits in hex, e.g. `0000-0001-abcd-ef01`
pub fn format_session_id(session_id: u64) -> String {
    format!(
        "{:04x}-{:04x}-{:04x}-{:04x}",
        (session_id >> 48) & 0xffff,
        (session_id >> 32) & 0xffff,
        (session_id >> 16) & 0xffff,
        session_id & 0xffff,
    )
}

pub fn log_prefix(session_id: u64) -> String {
    format!("{} Session {}", CLIENT_PREFIX, format_session_id(session_id))
}

/// right-aligned so that sequence numbers line up in the debug log
pub fn pad_num(nr: i32) -> String {
    format!("{:>width$}", nr, width = NUMBER_LENGTH)
}
