use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{debug, trace};
use crate::buffers::{BufferPeeker, BufferReader, GenericBuffer, Monitor};
use crate::buffers::rate_limiter::{NullRateLimiter, RateLimiter};

/// decides if an element goes to the alternate queue
pub type QueueAlternator<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

struct RoundRobinState<E> {
    primary: VecDeque<E>,
    alternate: VecDeque<E>,
    interrupted: bool,
    /// position in the round-robin cycle, from 1 to `primary_factor + alternate_factor`
    alternator_index: u32,
}

impl<E> RoundRobinState<E> {
    fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.alternate.is_empty()
    }

    fn len(&self) -> usize {
        self.primary.len() + self.alternate.len()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Queue {
    Primary,
    Alternate,
}

/// A FIFO queue made up of two queues that are served round-robin:
///
/// * The *primary* queue is bounded. Inserting into a full primary queue waits until there is
///    space, and a [RateLimiter] can slow down producers before that.
/// * The *alternate* queue is unbounded, elements go there if the [QueueAlternator] says so.
///
/// Elements are taken from the two queues by their configured weights: With factors of 1 and
///  1 it is strictly alternating, with factors 3 and 1 it is 'primary, alternate, primary,
///  primary' and so on. If the selected queue is empty, the other queue is used. Order is
///  preserved within each queue, but not between them.
pub struct RoundRobinBuffer<E> {
    monitor: Monitor<RoundRobinState<E>>,
    capacity: usize,
    rate_limiter: Arc<dyn RateLimiter>,
    alternator: QueueAlternator<E>,
    primary_factor: u32,
    alternate_factor: u32,
    smaller_factor_doubled: u32,
}

impl<E: Send + 'static> RoundRobinBuffer<E> {
    pub fn new(
        capacity: usize,
        rate_limiter: Arc<dyn RateLimiter>,
        alternator: QueueAlternator<E>,
        primary_factor: u32,
        alternate_factor: u32,
    ) -> RoundRobinBuffer<E> {
        assert!(capacity > 0, "this is a bug: queue capacity must be positive");
        assert!(primary_factor > 0 && alternate_factor > 0, "this is a bug: round-robin factors must be positive");

        RoundRobinBuffer {
            monitor: Monitor::new(RoundRobinState {
                primary: VecDeque::new(),
                alternate: VecDeque::new(),
                interrupted: false,
                alternator_index: 1,
            }),
            capacity,
            rate_limiter,
            alternator,
            primary_factor,
            alternate_factor,
            smaller_factor_doubled: 2 * primary_factor.min(alternate_factor),
        }
    }

    /// A plain bounded FIFO queue: no rate limiting, and everything goes to the primary queue
    pub fn bounded(capacity: usize) -> RoundRobinBuffer<E> {
        Self::new(capacity, Arc::new(NullRateLimiter), Box::new(|_: &E| false), 1, 1)
    }

    pub fn primary_size(&self) -> usize {
        self.monitor.with(|s| s.primary.len())
    }

    pub fn alternate_size(&self) -> usize {
        self.monitor.with(|s| s.alternate.len())
    }

    /// waits until there is an element or the buffer is interrupted, without taking the element
    pub async fn wait_until_available(&self) {
        self.monitor.wait_until(|s| {
            if s.interrupted || !s.is_empty() { Some(()) } else { None }
        }).await
    }

    fn select_read_queue(&self, state: &RoundRobinState<E>) -> Queue {
        let preferred = if state.alternator_index <= self.smaller_factor_doubled {
            if state.alternator_index % 2 == 0 {
                Queue::Alternate
            }
            else {
                Queue::Primary
            }
        }
        else if self.primary_factor > self.alternate_factor {
            Queue::Primary
        }
        else {
            Queue::Alternate
        };

        match preferred {
            Queue::Primary if state.primary.is_empty() => Queue::Alternate,
            Queue::Alternate if state.alternate.is_empty() => Queue::Primary,
            q => q,
        }
    }

    fn increment_alternator(&self, state: &mut RoundRobinState<E>) {
        state.alternator_index += 1;
        if state.alternator_index > self.primary_factor + self.alternate_factor {
            state.alternator_index = 1;
        }
    }

    fn poll_locked(&self, state: &mut RoundRobinState<E>) -> Option<E> {
        let result = match self.select_read_queue(state) {
            Queue::Primary => state.primary.pop_front(),
            Queue::Alternate => state.alternate.pop_front(),
        };
        self.increment_alternator(state);
        result
    }
}

impl<E: Clone + Send + 'static> RoundRobinBuffer<E> {
    fn peek_locked(&self, state: &RoundRobinState<E>) -> Option<E> {
        match self.select_read_queue(state) {
            Queue::Primary => state.primary.front().cloned(),
            Queue::Alternate => state.alternate.front().cloned(),
        }
    }
}

#[async_trait]
impl<E: Send + 'static> GenericBuffer<E> for RoundRobinBuffer<E> {
    async fn insert(&self, element: E) -> anyhow::Result<()> {
        if (self.alternator)(&element) {
            self.monitor.update(|s| s.alternate.push_back(element));
            return Ok(());
        }

        let queue_size = self.primary_size();
        self.rate_limiter.pre_insert(queue_size).await;

        let mut element = Some(element);
        let result = self.monitor.wait_until(|s| {
            if s.primary.len() < self.capacity {
                s.primary.extend(element.take());
                Some(Ok(s.primary.len()))
            }
            else if s.interrupted {
                Some(Err(anyhow!("the message queue is full and interrupted")))
            }
            else {
                None
            }
        }).await;

        match result {
            Ok(new_size) => {
                self.monitor.notify_all();
                self.rate_limiter.post_insert(new_size);
                Ok(())
            }
            Err(e) => {
                debug!("discarding element: {}", e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<E: Send + 'static> BufferReader<E> for RoundRobinBuffer<E> {
    fn poll(&self) -> Option<E> {
        self.monitor.update(|s| self.poll_locked(s))
    }

    async fn wait_and_poll(&self) -> Option<E> {
        let result = self.monitor.wait_until(|s| {
            if s.interrupted || !s.is_empty() {
                Some(self.poll_locked(s))
            }
            else {
                None
            }
        }).await;
        self.monitor.notify_all();
        result
    }

    async fn wait_until_empty(&self, timeout: Option<Duration>) -> bool {
        self.monitor.wait_until_timeout(timeout, |s| {
            if s.interrupted || s.is_empty() { Some(()) } else { None }
        }).await;
        self.is_empty()
    }

    /// the number of elements in both queues
    fn size(&self) -> usize {
        self.monitor.with(|s| s.len())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn interrupt(&self, interrupted: bool) {
        trace!("round robin buffer: interrupted={}", interrupted);
        self.monitor.update(|s| s.interrupted = interrupted);
    }

    fn is_interrupted(&self) -> bool {
        self.monitor.with(|s| s.interrupted)
    }
}

#[async_trait]
impl<E: Clone + Send + 'static> BufferPeeker<E> for RoundRobinBuffer<E> {
    fn peek(&self) -> Option<E> {
        self.monitor.with(|s| self.peek_locked(s))
    }

    async fn wait_and_peek(&self) -> Option<E> {
        self.monitor.wait_until(|s| {
            if s.interrupted || !s.is_empty() {
                Some(self.peek_locked(s))
            }
            else {
                None
            }
        }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use rstest::rstest;
    use tokio::time::{sleep, timeout};
    use crate::buffers::rate_limiter::MockRateLimiter;

    /// negative numbers go to the alternate queue
    fn buffer(capacity: usize, primary_factor: u32, alternate_factor: u32) -> RoundRobinBuffer<i32> {
        RoundRobinBuffer::new(capacity, Arc::new(NullRateLimiter), Box::new(|&n: &i32| n < 0), primary_factor, alternate_factor)
    }

    fn drain(buffer: &RoundRobinBuffer<i32>) -> Vec<i32> {
        let mut result = Vec::new();
        while let Some(n) = buffer.poll() {
            result.push(n);
        }
        result
    }

    #[rstest]
    #[case::only_primary(1, 1, vec![1, 2, 3], vec![1, 2, 3])]
    #[case::only_alternate(1, 1, vec![-1, -2, -3], vec![-1, -2, -3])]
    #[case::alternating(1, 1, vec![1, 2, 3, -1, -2, -3], vec![1, -1, 2, -2, 3, -3])]
    #[case::alternate_runs_dry(1, 1, vec![1, 2, 3, 4, -1], vec![1, -1, 2, 3, 4])]
    #[case::primary_heavy(3, 1, vec![1, 2, 3, 4, 5, 6, -1, -2], vec![1, -1, 2, 3, 4, -2, 5, 6])]
    #[case::alternate_heavy(1, 2, vec![1, 2, 3, -1, -2, -3, -4], vec![1, -1, -2, 2, -3, -4, 3])]
    fn test_round_robin(#[case] primary_factor: u32, #[case] alternate_factor: u32, #[case] elements: Vec<i32>, #[case] expected: Vec<i32>) {
        let buffer = buffer(100, primary_factor, alternate_factor);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build().unwrap();
        rt.block_on(async {
            for n in elements {
                buffer.insert(n).await.unwrap();
            }
        });

        assert_eq!(buffer.size(), expected.len());
        assert_eq!(drain(&buffer), expected);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_peek_does_not_advance() {
        let buffer = buffer(10, 1, 1);
        buffer.insert(1).await.unwrap();
        buffer.insert(-1).await.unwrap();

        assert_eq!(buffer.peek(), Some(1));
        assert_eq!(buffer.peek(), Some(1));
        assert_eq!(buffer.poll(), Some(1));
        assert_eq!(buffer.peek(), Some(-1));
        assert_eq!(buffer.wait_and_peek().await, Some(-1));
        assert_eq!(buffer.wait_and_poll().await, Some(-1));
        assert_eq!(buffer.peek(), None);
    }

    #[tokio::test]
    async fn test_insert_blocks_when_full() {
        let buffer = Arc::new(buffer(2, 1, 1));
        buffer.insert(1).await.unwrap();
        buffer.insert(2).await.unwrap();
        assert_eq!(buffer.primary_size(), 2);

        let buffer2 = buffer.clone();
        let inserter = tokio::spawn(async move {
            buffer2.insert(3).await
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!inserter.is_finished());

        // the alternate queue is not bounded
        timeout(Duration::from_secs(1), buffer.insert(-1)).await.unwrap().unwrap();
        assert_eq!(buffer.alternate_size(), 1);

        assert_eq!(buffer.poll(), Some(1));
        inserter.await.unwrap().unwrap();
        assert_eq!(drain(&buffer), vec![-1, 2, 3]);
    }

    #[tokio::test]
    async fn test_poll_unblocks_one_inserter() {
        let buffer = Arc::new(buffer(1, 1, 1));
        buffer.insert(1).await.unwrap();

        let mut inserters = Vec::new();
        for n in 2..=3 {
            let buffer2 = buffer.clone();
            inserters.push(tokio::spawn(async move {
                buffer2.insert(n).await
            }));
        }
        sleep(Duration::from_millis(20)).await;

        assert_eq!(buffer.poll(), Some(1));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(inserters.iter().filter(|h| h.is_finished()).count(), 1);
        assert_eq!(buffer.size(), 1);

        assert!(buffer.poll().is_some());
        for h in inserters {
            h.await.unwrap().unwrap();
        }
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_full_insert_fails() {
        let buffer = Arc::new(buffer(1, 1, 1));
        buffer.insert(1).await.unwrap();

        let buffer2 = buffer.clone();
        let inserter = tokio::spawn(async move {
            buffer2.insert(2).await
        });
        sleep(Duration::from_millis(20)).await;

        buffer.interrupt(true);
        assert!(inserter.await.unwrap().is_err());
        assert_eq!(drain(&buffer), vec![1]);

        // inserting into a buffer with room works even when it is interrupted
        buffer.insert(3).await.unwrap();
        assert_eq!(buffer.poll(), Some(3));
    }

    #[tokio::test]
    async fn test_interrupt_wakes_poller() {
        let buffer = Arc::new(buffer(5, 1, 1));

        let buffer2 = buffer.clone();
        let poller = tokio::spawn(async move {
            buffer2.wait_and_poll().await
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!poller.is_finished());

        buffer.interrupt(true);
        assert_eq!(poller.await.unwrap(), None);
        buffer.wait_until_available().await;

        buffer.interrupt(false);
        buffer.insert(7).await.unwrap();
        assert_eq!(buffer.wait_and_poll().await, Some(7));
        assert!(!buffer.is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_empty() {
        let buffer = Arc::new(buffer(5, 1, 1));
        assert!(buffer.wait_until_empty(Some(Duration::from_secs(1))).await);

        buffer.insert(1).await.unwrap();
        buffer.insert(-1).await.unwrap();
        assert!(!buffer.wait_until_empty(Some(Duration::from_secs(1))).await);

        let buffer2 = buffer.clone();
        let waiter = tokio::spawn(async move {
            buffer2.wait_until_empty(None).await
        });
        buffer.poll();
        buffer.poll();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_rate_limiter_calls() {
        let mut rate_limiter = MockRateLimiter::new();
        rate_limiter.expect_pre_insert()
            .with(eq(0))
            .once()
            .return_const(());
        rate_limiter.expect_pre_insert()
            .with(eq(1))
            .once()
            .return_const(());
        rate_limiter.expect_post_insert()
            .with(eq(1))
            .once()
            .return_const(());
        rate_limiter.expect_post_insert()
            .with(eq(2))
            .once()
            .return_const(());

        let buffer = RoundRobinBuffer::new(5, Arc::new(rate_limiter), Box::new(|&n: &i32| n < 0), 1, 1);
        buffer.insert(1).await.unwrap();
        buffer.insert(2).await.unwrap();
        // alternate inserts bypass the rate limiter
        buffer.insert(-1).await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded() {
        let buffer = RoundRobinBuffer::<i32>::bounded(3);
        buffer.insert(-1).await.unwrap();
        buffer.insert(1).await.unwrap();
        assert_eq!(buffer.primary_size(), 2);
        assert_eq!(buffer.alternate_size(), 0);
        assert_eq!(buffer.capacity(), 3);
    }
}
