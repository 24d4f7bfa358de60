//! Buffers between the producers of outbound messages and the socket writer.
//!
//! All buffers are internally synchronized and can be shared between tasks. Operations that
//!  wait (for data, for space, for the buffer to drain) are `async` and can be woken up by
//!  [BufferReader::interrupt]: interruption is sticky until it is explicitly cleared, and it
//!  does not touch buffered data.

use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

pub mod circular_buffer;
pub mod history_buffer;
pub mod rate_limiter;
pub mod round_robin_buffer;

#[async_trait]
pub trait BufferReader<E: Send + 'static>: Send + Sync {
    /// removes and returns the oldest element, without waiting
    fn poll(&self) -> Option<E>;

    /// waits until there is an element or the buffer is interrupted. Returns `None` only
    ///  when interrupted.
    async fn wait_and_poll(&self) -> Option<E>;

    /// Waits until the buffer is empty, the buffer is interrupted or the timeout elapses,
    ///  returning whether the buffer is empty. `None` waits without a time limit.
    async fn wait_until_empty(&self, timeout: Option<Duration>) -> bool;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn capacity(&self) -> usize;

    fn interrupt(&self, interrupted: bool);

    fn is_interrupted(&self) -> bool;
}

/// Read access without removing the element - this requires the elements to be cloneable
#[async_trait]
pub trait BufferPeeker<E: Clone + Send + 'static>: BufferReader<E> {
    fn peek(&self) -> Option<E>;

    async fn wait_and_peek(&self) -> Option<E>;
}

#[async_trait]
pub trait GenericBuffer<E: Send + 'static>: BufferReader<E> {
    /// Adds an element. This may wait for space to become available, and it fails if the
    ///  buffer is full and interrupted.
    async fn insert(&self, element: E) -> anyhow::Result<()>;
}


/// A mutex-protected state with a notification for tasks waiting for the state to change.
///
/// The lock is never held across an await point: waiting registers for the next notification,
///  checks the condition under the lock, and releases the lock before suspending.
pub(crate) struct Monitor<T> {
    state: Mutex<T>,
    changed: Notify,
}

impl<T: Send> Monitor<T> {
    pub fn new(state: T) -> Monitor<T> {
        Monitor {
            state: Mutex::new(state),
            changed: Notify::new(),
        }
    }

    /// read or modify the state without waking up waiters
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// modify the state and wake up all waiters
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = self.with(f);
        self.changed.notify_waiters();
        result
    }

    pub fn notify_all(&self) {
        self.changed.notify_waiters();
    }

    /// For waiting on this monitor together with something else. The returned future must be
    ///  enabled before the state is checked, otherwise notifications can be missed.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Calls `f` under the lock until it returns `Some`, waiting for a state change between
    ///  calls. If `f` modifies the state, it is the caller's responsibility to notify afterwards.
    pub async fn wait_until<R>(&self, mut f: impl FnMut(&mut T) -> Option<R> + Send) -> R {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.with(&mut f) {
                return result;
            }
            notified.await;
        }
    }

    /// Same as [Monitor::wait_until], but gives up after `timeout` and returns `None` in that case
    pub async fn wait_until_timeout<R>(&self, timeout: Option<Duration>, f: impl FnMut(&mut T) -> Option<R> + Send) -> Option<R> {
        match timeout {
            None => Some(self.wait_until(f).await),
            Some(timeout) => tokio::time::timeout(timeout, self.wait_until(f)).await.ok(),
        }
    }
}
