use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use tracing::trace;
use crate::buffers::{BufferPeeker, BufferReader, GenericBuffer, Monitor};

struct CircularBufferState<E> {
    data: Vec<Option<E>>,
    /// position of the most recently written element, `None` before the first write
    write_index: Option<usize>,
    /// number of unread elements, counting backwards from `write_index`
    count: usize,
    has_rotated: bool,
    has_written_after_rotate: bool,
    interrupted: bool,
}

impl<E: Clone> CircularBufferState<E> {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn next_write_index(&self) -> usize {
        match self.write_index {
            None => 0,
            Some(w) => (w + 1) % self.capacity(),
        }
    }

    /// the logical read position is derived from the write position and the number of unread
    ///  elements
    fn read_index(&self) -> usize {
        let write_index = self.write_index.map(|w| w as isize).unwrap_or(-1);
        (write_index - (self.count as isize - 1)).rem_euclid(self.capacity() as isize) as usize
    }

    fn oldest_index(&self) -> usize {
        if self.has_rotated {
            self.next_write_index()
        }
        else {
            0
        }
    }

    fn insert(&mut self, element: E) {
        let write_index = self.next_write_index();
        self.data[write_index] = Some(element);
        self.write_index = Some(write_index);

        if self.has_rotated {
            self.has_written_after_rotate = true;
        }
        if write_index == self.capacity() - 1 {
            self.has_rotated = true;
        }
        if self.count < self.capacity() {
            self.count += 1;
        }
    }

    fn peek(&self) -> Option<E> {
        if self.count == 0 {
            return None;
        }
        self.data[self.read_index()].clone()
    }

    fn poll(&mut self) -> Option<E> {
        let result = self.peek();
        if result.is_some() {
            self.count -= 1;
        }
        result
    }

    fn rewind_to_first(&mut self) -> anyhow::Result<()> {
        if self.has_written_after_rotate {
            bail!("tried to rewind past the bounds of the buffer");
        }

        self.count = match self.write_index {
            _ if self.has_rotated => self.capacity(),
            Some(w) => w + 1,
            None => 0,
        };
        Ok(())
    }

    fn rewind_to(&mut self, mut is_target: impl FnMut(&E) -> bool) -> anyhow::Result<()> {
        let original_count = self.count;

        // slots beyond the write position were never written unless the buffer rotated
        let valid_index_bound = match self.write_index {
            _ if self.has_rotated => self.capacity(),
            Some(w) => w + 1,
            None => 0,
        };

        // with no unread elements, the read index points at the slot after the newest element
        if self.count == 0 {
            self.count = 1;
        }

        loop {
            let index = self.read_index();
            if index < valid_index_bound {
                if let Some(e) = &self.data[index] {
                    if is_target(e) {
                        return Ok(());
                    }
                }
            }

            self.count += 1;
            if self.count > self.capacity() {
                self.count = original_count;
                bail!("tried to rewind past the bounds of the buffer");
            }
        }
    }
}


/// A fixed-capacity buffer that overwrites its oldest element when it is full.
///
/// Reading does not discard elements: they stay in the buffer until they are overwritten, and
///  the read position can be moved back to them ('rewind'). This is the retained history of
///  sent messages, so it is not a lossless queue: a writer that is far ahead of the reader
///  overwrites unread elements.
pub struct CircularBuffer<E> {
    monitor: Monitor<CircularBufferState<E>>,
    capacity: usize,
}

impl<E: Clone + Send + 'static> CircularBuffer<E> {
    pub fn new(capacity: usize) -> CircularBuffer<E> {
        assert!(capacity > 0, "this is a bug: a circular buffer needs a positive capacity");

        CircularBuffer {
            monitor: Monitor::new(CircularBufferState {
                data: (0..capacity).map(|_| None).collect(),
                write_index: None,
                count: 0,
                has_rotated: false,
                has_written_after_rotate: false,
                interrupted: false,
            }),
            capacity,
        }
    }

    /// Adds an element, overwriting the oldest element if the buffer is full. This never waits.
    pub fn put(&self, element: E) {
        self.monitor.update(|s| s.insert(element));
    }

    /// the oldest element that is still in the buffer, regardless of the read position
    pub fn peek_oldest(&self) -> Option<E> {
        self.monitor.with(|s| {
            let oldest = s.oldest_index();
            s.write_index.and_then(|_| s.data[oldest].clone())
        })
    }

    /// the most recently added element, regardless of the read position
    pub fn peek_newest(&self) -> Option<E> {
        self.monitor.with(|s| s.write_index.and_then(|w| s.data[w].clone()))
    }

    /// Moves the read position back to the oldest element. This fails if elements were
    ///  overwritten since the buffer last rotated, i.e. if the oldest element is not the
    ///  first one that was written after the rotation.
    pub fn rewind_to_first(&self) -> anyhow::Result<()> {
        let result = self.monitor.update(|s| s.rewind_to_first());
        trace!("rewind to first element: {:?}", result);
        result
    }

    /// Moves the read position back until it points to an element for which `is_target`
    ///  returns `true`. If there is no such element, the read position is left unchanged and
    ///  an error is returned.
    pub fn rewind_to(&self, is_target: impl FnMut(&E) -> bool) -> anyhow::Result<()> {
        self.monitor.update(|s| s.rewind_to(is_target))
    }

    pub fn is_full(&self) -> bool {
        self.monitor.with(|s| s.count >= s.capacity())
    }
}

#[async_trait]
impl<E: Clone + Send + 'static> BufferReader<E> for CircularBuffer<E> {
    fn poll(&self) -> Option<E> {
        self.monitor.update(|s| s.poll())
    }

    async fn wait_and_poll(&self) -> Option<E> {
        let result = self.monitor.wait_until(|s| {
            if s.interrupted || s.count > 0 {
                Some(s.poll())
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
            if s.interrupted || s.count == 0 { Some(()) } else { None }
        }).await;
        self.is_empty()
    }

    fn size(&self) -> usize {
        self.monitor.with(|s| s.count)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn interrupt(&self, interrupted: bool) {
        self.monitor.update(|s| s.interrupted = interrupted);
    }

    fn is_interrupted(&self) -> bool {
        self.monitor.with(|s| s.interrupted)
    }
}

#[async_trait]
impl<E: Clone + Send + 'static> BufferPeeker<E> for CircularBuffer<E> {
    fn peek(&self) -> Option<E> {
        self.monitor.with(|s| s.peek())
    }

    async fn wait_and_peek(&self) -> Option<E> {
        self.monitor.wait_until(|s| {
            if s.interrupted || s.count > 0 {
                Some(s.peek())
            }
            else {
                None
            }
        }).await
    }
}

#[async_trait]
impl<E: Clone + Send + 'static> GenericBuffer<E> for CircularBuffer<E> {
    async fn insert(&self, element: E) -> anyhow::Result<()> {
        self.put(element);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use rstest::rstest;

    fn buffer_with(capacity: usize, elements: &[u32]) -> CircularBuffer<u32> {
        let buffer = CircularBuffer::new(capacity);
        for &e in elements {
            buffer.put(e);
        }
        buffer
    }

    fn drain(buffer: &CircularBuffer<u32>) -> Vec<u32> {
        let mut result = Vec::new();
        while let Some(e) = buffer.poll() {
            result.push(e);
        }
        result
    }

    #[rstest]
    #[case::empty(3, vec![], vec![])]
    #[case::partial(3, vec![1, 2], vec![1, 2])]
    #[case::full(3, vec![1, 2, 3], vec![1, 2, 3])]
    #[case::overwrite_one(3, vec![1, 2, 3, 4], vec![2, 3, 4])]
    #[case::overwrite_many(3, vec![1, 2, 3, 4, 5, 6, 7], vec![5, 6, 7])]
    #[case::capacity_one(1, vec![1, 2], vec![2])]
    fn test_fifo(#[case] capacity: usize, #[case] elements: Vec<u32>, #[case] expected: Vec<u32>) {
        let buffer = buffer_with(capacity, &elements);
        assert_eq!(buffer.size(), expected.len());
        assert_eq!(buffer.peek(), expected.first().cloned());
        assert_eq!(drain(&buffer), expected);
        assert!(buffer.is_empty());
        assert_eq!(buffer.poll(), None);
    }

    #[rstest]
    #[case::empty(vec![], None, None)]
    #[case::single(vec![1], Some(1), Some(1))]
    #[case::full(vec![1, 2, 3], Some(1), Some(3))]
    #[case::overwritten(vec![1, 2, 3, 4], Some(2), Some(4))]
    #[case::overwritten_twice(vec![1, 2, 3, 4, 5, 6, 7], Some(5), Some(7))]
    fn test_peek_oldest_newest(#[case] elements: Vec<u32>, #[case] oldest: Option<u32>, #[case] newest: Option<u32>) {
        let buffer = buffer_with(3, &elements);
        drain(&buffer);
        assert_eq!(buffer.peek_oldest(), oldest);
        assert_eq!(buffer.peek_newest(), newest);
    }

    #[rstest]
    #[case::empty(vec![], vec![])]
    #[case::partial(vec![1, 2], vec![1, 2])]
    #[case::exactly_full(vec![1, 2, 3], vec![1, 2, 3])]
    fn test_rewind_to_first(#[case] elements: Vec<u32>, #[case] expected: Vec<u32>) {
        let buffer = buffer_with(3, &elements);
        drain(&buffer);
        buffer.rewind_to_first().unwrap();
        assert_eq!(drain(&buffer), expected);
    }

    #[test]
    fn test_rewind_to_first_after_overwrite_fails() {
        let buffer = buffer_with(3, &[1, 2, 3, 4]);
        assert_eq!(buffer.poll(), Some(2));
        let size_before = buffer.size();

        assert!(buffer.rewind_to_first().is_err());
        assert_eq!(buffer.size(), size_before);
        assert_eq!(buffer.peek(), Some(3));
    }

    #[rstest]
    #[case::newest(vec![1, 2, 3], 3, vec![3])]
    #[case::middle(vec![1, 2, 3], 2, vec![2, 3])]
    #[case::oldest(vec![1, 2, 3], 1, vec![1, 2, 3])]
    #[case::rotated_newest(vec![1, 2, 3, 4, 5], 5, vec![5])]
    #[case::rotated_oldest(vec![1, 2, 3, 4, 5], 3, vec![3, 4, 5])]
    #[case::rotated_exactly(vec![1, 2, 3], 1, vec![1, 2, 3])]
    fn test_rewind_to(#[case] elements: Vec<u32>, #[case] target: u32, #[case] expected: Vec<u32>) {
        let buffer = buffer_with(3, &elements);
        drain(&buffer);
        buffer.rewind_to(|&e| e == target).unwrap();
        assert_eq!(drain(&buffer), expected);
    }

    #[test]
    fn test_rewind_to_unread_element() {
        let buffer = buffer_with(4, &[1, 2, 3]);
        assert_eq!(buffer.poll(), Some(1));

        buffer.rewind_to(|&e| e == 2).unwrap();
        assert_eq!(drain(&buffer), vec![2, 3]);
    }

    #[rstest]
    #[case::empty(vec![], 1)]
    #[case::not_written(vec![1, 2], 7)]
    #[case::overwritten(vec![1, 2, 3, 4, 5], 2)]
    fn test_rewind_to_missing(#[case] elements: Vec<u32>, #[case] target: u32) {
        let buffer = buffer_with(3, &elements);
        drain(&buffer);
        if let Some(&last) = elements.last() {
            buffer.rewind_to(|&e| e == last).unwrap();
        }
        let size_before = buffer.size();
        let peek_before = buffer.peek();

        assert!(buffer.rewind_to(|&e| e == target).is_err());
        assert_eq!(buffer.size(), size_before);
        assert_eq!(buffer.peek(), peek_before);
    }

    #[tokio::test]
    async fn test_wait_and_poll_wakes_on_insert() {
        let buffer = Arc::new(CircularBuffer::<u32>::new(3));

        let buffer2 = buffer.clone();
        let handle = tokio::spawn(async move {
            buffer2.wait_and_poll().await
        });

        tokio::task::yield_now().await;
        buffer.put(5);
        assert_eq!(handle.await.unwrap(), Some(5));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_wakes_waiters() {
        let buffer = Arc::new(CircularBuffer::<u32>::new(3));

        let buffer2 = buffer.clone();
        let poller = tokio::spawn(async move {
            buffer2.wait_and_poll().await
        });
        let buffer3 = buffer.clone();
        let peeker = tokio::spawn(async move {
            buffer3.wait_and_peek().await
        });

        tokio::task::yield_now().await;
        buffer.interrupt(true);
        assert_eq!(poller.await.unwrap(), None);
        assert_eq!(peeker.await.unwrap(), None);
        assert!(buffer.is_interrupted());

        buffer.put(1);
        assert_eq!(buffer.wait_and_peek().await, Some(1));

        buffer.interrupt(false);
        assert_eq!(buffer.wait_and_poll().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_empty() {
        let buffer = Arc::new(buffer_with(3, &[1, 2]));
        assert!(!buffer.wait_until_empty(Some(Duration::from_millis(100))).await);

        let buffer2 = buffer.clone();
        let handle = tokio::spawn(async move {
            buffer2.wait_until_empty(None).await
        });
        tokio::task::yield_now().await;
        buffer.poll();
        buffer.poll();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_generic_insert() {
        let buffer = CircularBuffer::new(2);
        GenericBuffer::insert(&buffer, 1).await.unwrap();
        GenericBuffer::insert(&buffer, 2).await.unwrap();
        GenericBuffer::insert(&buffer, 3).await.unwrap();
        assert!(buffer.is_full());
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(drain(&buffer), vec![2, 3]);
    }
}
