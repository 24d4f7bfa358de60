use std::time::Duration;
use anyhow::bail;

pub struct SessionConfig {
    /// This is the capacity of the outbound message queue, i.e. the number of messages that can
    ///  be pending before producers are suspended. It is also the number of sent messages that
    ///  are retained for replay after a reconnect.
    ///
    /// Choosing this too small means that a short network outage can make the session
    ///  unrecoverable because the server's last acknowledged message was already dropped from
    ///  the history.
    pub message_queue_size: usize,

    /// If this is set, producers are slowed down progressively when the queue fills up rather
    ///  than running into the hard limit, see [crate::buffers::rate_limiter::ExponentialRateLimiter]
    pub rate_limit_enabled: bool,

    /// Round-robin weight of regular messages vs. HLA responses when both are pending
    pub primary_factor: u32,
    pub alternate_factor: u32,

    /// How long `flush` waits for the queue to be drained. `None` waits indefinitely.
    pub empty_queue_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn default_config() -> SessionConfig {
        SessionConfig {
            message_queue_size: 2000,
            rate_limit_enabled: false,
            primary_factor: 1,
            alternate_factor: 1,
            empty_queue_timeout: Some(Duration::from_secs(5)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.message_queue_size == 0 {
            bail!("message queue size must be positive");
        }
        if self.primary_factor == 0 || self.alternate_factor == 0 {
            bail!("round-robin factors must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        assert!(SessionConfig::default_config().validate().is_ok());
    }

    #[rstest]
    #[case::zero_queue_size(0, 1, 1)]
    #[case::zero_primary(10, 0, 1)]
    #[case::zero_alternate(10, 1, 0)]
    fn test_validate_invalid(#[case] message_queue_size: usize, #[case] primary_factor: u32, #[case] alternate_factor: u32) {
        let config = SessionConfig {
            message_queue_size,
            primary_factor,
            alternate_factor,
            ..SessionConfig::default_config()
        };
        assert!(config.validate().is_err());
    }
}
