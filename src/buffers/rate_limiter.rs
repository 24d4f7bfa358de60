use std::time::Duration;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::trace;

/// A hook around inserts into a bounded queue, for slowing producers down before the queue
///  runs full
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// called before an element is inserted, with the number of elements in the queue
    async fn pre_insert(&self, queue_size: usize);

    /// called after an element was inserted, with the new number of elements in the queue
    fn post_insert(&self, queue_size: usize);
}

pub struct NullRateLimiter;

#[async_trait]
impl RateLimiter for NullRateLimiter {
    async fn pre_insert(&self, _queue_size: usize) {}

    fn post_insert(&self, _queue_size: usize) {}
}

/// Once more than 5% of the queue's capacity is used, this delays each insert by
///  `(n / 100)^2` milliseconds for a queue size of `n`, i.e. not at all below 100 elements,
///  1ms for 100 to 199 elements, 4ms for 200 to 299 and so on.
pub struct ExponentialRateLimiter {
    cutoff: usize,
}

impl ExponentialRateLimiter {
    pub fn new(queue_capacity: usize) -> ExponentialRateLimiter {
        ExponentialRateLimiter {
            cutoff: queue_capacity / 20,
        }
    }

    pub fn delay_for(&self, queue_size: usize) -> Option<Duration> {
        if queue_size <= self.cutoff {
            return None;
        }

        let hundreds = (queue_size / 100) as u64;
        if hundreds == 0 {
            return None;
        }
        Some(Duration::from_millis(hundreds * hundreds))
    }
}

#[async_trait]
impl RateLimiter for ExponentialRateLimiter {
    async fn pre_insert(&self, queue_size: usize) {
        if let Some(delay) = self.delay_for(queue_size) {
            trace!("{} queued messages: delaying insert by {:?}", queue_size, delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn post_insert(&self, _queue_size: usize) {}
}
