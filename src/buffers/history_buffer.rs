use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tracing::{debug, trace};
use crate::buffers::{BufferPeeker, BufferReader, Monitor};
use crate::buffers::circular_buffer::CircularBuffer;
use crate::buffers::round_robin_buffer::RoundRobinBuffer;
use crate::msg::encoded_message::EncodedMessage;
use crate::msg::queueable_message::QueueableMessage;
use crate::sequence_number::SequenceNumber;

struct HistoryState {
    sequence_number_allocator: SequenceNumber,
    /// control messages are not retained for replay, and only the most recent one is kept
    current_control_message: Option<EncodedMessage>,
}

/// This is the stream of encoded messages that the socket writer consumes.
///
/// It is fed from a queue of pending messages, and it moves a message from that queue to its
///  history only when the history has no unread messages: that is when the message gets its
///  sequence number (and a request's response promise is registered). Messages in the history
///  are retained after they were read, so they can be re-sent after a reconnect.
///
/// Control messages do not go into the history but into a single slot that takes precedence
///  over the history, and that is discarded when the history is rewound.
pub struct HistoryBuffer {
    state: Monitor<HistoryState>,
    message_queue: Arc<RoundRobinBuffer<QueueableMessage>>,
    history: CircularBuffer<EncodedMessage>,
}

impl HistoryBuffer {
    /// The history retains as many messages as the queue can hold
    pub fn new(message_queue: Arc<RoundRobinBuffer<QueueableMessage>>, initial_sequence_number: i32) -> HistoryBuffer {
        let capacity = message_queue.capacity();
        HistoryBuffer {
            state: Monitor::new(HistoryState {
                sequence_number_allocator: SequenceNumber::new(initial_sequence_number),
                current_control_message: None,
            }),
            message_queue,
            history: CircularBuffer::new(capacity),
        }
    }

    /// Adds an encoded message directly, bypassing the queue of pending messages. A control
    ///  message replaces a control message that was not read yet.
    pub fn insert_into_history(&self, message: EncodedMessage) {
        self.state.update(|s| self.insert_locked(s, message));
    }

    /// Moves the read position to the message with the given sequence number, so that it is
    ///  the next to be read
    pub fn rewind_to(&self, sequence_number: i32) -> anyhow::Result<()> {
        self.state.update(|s| self.rewind_to_locked(s, sequence_number))?;
        debug!("rewound history to seq.nr. {}", sequence_number);
        Ok(())
    }

    /// Moves the read position to the message *after* the one with the given sequence number.
    ///  This is where replay starts after the peer acknowledged that sequence number.
    pub fn rewind_to_after(&self, sequence_number: i32) -> anyhow::Result<()> {
        self.state.update(|s| {
            self.rewind_to_locked(s, sequence_number)?;
            self.history.poll();
            Ok::<_, anyhow::Error>(())
        })?;
        debug!("rewound history to after seq.nr. {}", sequence_number);
        Ok(())
    }

    /// Moves the read position to the oldest retained message
    pub fn rewind_to_first(&self) -> anyhow::Result<()> {
        self.state.update(|s| {
            self.history.rewind_to_first()?;
            s.current_control_message = None;
            Ok::<_, anyhow::Error>(())
        })?;
        debug!("rewound history to oldest retained message");
        Ok(())
    }

    /// Drops all messages that were not sequenced yet, and a pending control message. Dropping
    ///  a request also drops its response promise, so whoever waits for the response gets an
    ///  error.
    pub fn discard_unsent(&self) -> usize {
        let discarded = self.state.update(|s| {
            let mut discarded = s.current_control_message.take().iter().count();
            while self.message_queue.poll().is_some() {
                discarded += 1;
            }
            discarded
        });
        if discarded > 0 {
            debug!("discarded {} unsent messages", discarded);
        }
        discarded
    }

    /// the oldest retained message that can be replayed, ignoring control messages
    pub fn get_oldest_added_sequence_number(&self) -> i32 {
        self.state.with(|_| self.history.peek_oldest())
            .map(|m| m.sequence_number)
            .unwrap_or(SequenceNumber::NO_SEQUENCE_NUMBER)
    }

    /// the most recently sequenced message, ignoring control messages
    pub fn get_newest_added_sequence_number(&self) -> i32 {
        self.state.with(|_| self.history.peek_newest())
            .map(|m| m.sequence_number)
            .unwrap_or(SequenceNumber::NO_SEQUENCE_NUMBER)
    }

    fn rewind_to_locked(&self, state: &mut HistoryState, sequence_number: i32) -> anyhow::Result<()> {
        self.history.rewind_to(|m| m.sequence_number == sequence_number)?;
        state.current_control_message = None;
        Ok(())
    }

    fn insert_locked(&self, state: &mut HistoryState, message: EncodedMessage) {
        if message.is_control {
            if let Some(prev) = state.current_control_message.replace(message) {
                debug!("discarding unsent control message seq.nr. {}", prev.sequence_number);
            }
        }
        else {
            self.history.put(message);
        }
    }

    /// sequencing happens only when there is nothing left to read, so a rewind replays
    ///  exactly the messages that were sequenced before
    fn poll_into_history(&self, state: &mut HistoryState) {
        if !self.history.is_empty() || state.current_control_message.is_some() {
            return;
        }

        if let Some(message) = self.message_queue.poll() {
            let sequence_number = state.sequence_number_allocator.allocate();
            trace!("assigning seq.nr. {} to {:?}", sequence_number, message);
            let encoded = message.create_encoded_message(sequence_number);
            self.insert_locked(state, encoded);
        }
    }

    fn has_content(&self, state: &HistoryState) -> bool {
        state.current_control_message.is_some() || !self.history.is_empty()
    }

    fn internal_poll(&self, state: &mut HistoryState) -> Option<EncodedMessage> {
        state.current_control_message.take()
            .or_else(|| self.history.poll())
    }

    fn internal_peek(&self, state: &HistoryState) -> Option<EncodedMessage> {
        state.current_control_message.clone()
            .or_else(|| self.history.peek())
    }

    async fn wait_for_message(&self, consume: bool) -> Option<EncodedMessage> {
        loop {
            let changed = self.state.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let result = self.state.with(|s| {
                self.poll_into_history(s);
                if self.has_content(s) || self.message_queue.is_interrupted() {
                    Some(if consume { self.internal_poll(s) } else { self.internal_peek(s) })
                }
                else {
                    None
                }
            });

            if let Some(result) = result {
                self.state.notify_all();
                return result;
            }

            tokio::select! {
                _ = self.message_queue.wait_until_available() => {}
                _ = &mut changed => {}
            }
        }
    }
}

#[async_trait]
impl BufferReader<EncodedMessage> for HistoryBuffer {
    fn poll(&self) -> Option<EncodedMessage> {
        self.state.update(|s| {
            self.poll_into_history(s);
            self.internal_poll(s)
        })
    }

    async fn wait_and_poll(&self) -> Option<EncodedMessage> {
        self.wait_for_message(true).await
    }

    /// waits until all messages were read, i.e. nothing is pending and the history has no
    ///  unread messages
    async fn wait_until_empty(&self, timeout: Option<Duration>) -> bool {
        let wait = async {
            loop {
                let changed = self.state.notified();
                tokio::pin!(changed);
                changed.as_mut().enable();

                if self.is_empty() || self.is_interrupted() {
                    return;
                }
                changed.await;
            }
        };

        match timeout {
            None => wait.await,
            Some(timeout) => {
                let _ = tokio::time::timeout(timeout, wait).await;
            }
        }
        self.is_empty()
    }

    fn size(&self) -> usize {
        self.state.with(|s| {
            self.history.size() + self.message_queue.size() + s.current_control_message.iter().count()
        })
    }

    fn capacity(&self) -> usize {
        self.history.capacity()
    }

    fn interrupt(&self, interrupted: bool) {
        self.message_queue.interrupt(interrupted);
        self.state.notify_all();
    }

    fn is_interrupted(&self) -> bool {
        self.message_queue.is_interrupted()
    }
}

#[async_trait]
impl BufferPeeker<EncodedMessage> for HistoryBuffer {
    fn peek(&self) -> Option<EncodedMessage> {
        self.state.with(|s| {
            self.poll_into_history(s);
            self.internal_peek(s)
        })
    }

    async fn wait_and_peek(&self) -> Option<EncodedMessage> {
        self.wait_for_message(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rstest::rstest;
    use tokio::sync::oneshot;
    use tokio::time::sleep;
    use crate::buffers::GenericBuffer;
    use crate::message_header::MessageHeader;
    use crate::message_type::MessageType;
    use crate::msg::encodable::HlaCallRequestMessage;
    use crate::msg::response_futures::ResponseFutures;

    fn history_buffer(capacity: usize, initial_sequence_number: i32) -> (Arc<RoundRobinBuffer<QueueableMessage>>, HistoryBuffer) {
        let queue = Arc::new(RoundRobinBuffer::bounded(capacity));
        let history = HistoryBuffer::new(queue.clone(), initial_sequence_number);
        (queue, history)
    }

    fn request(payload: &'static [u8]) -> QueueableMessage {
        QueueableMessage::new(
            SequenceNumber::NO_SEQUENCE_NUMBER,
            1,
            MessageType::HlaCallRequest,
            Some(Box::new(HlaCallRequestMessage(Bytes::from_static(payload)))),
            None,
        ).unwrap()
    }

    fn control(message_type: MessageType) -> QueueableMessage {
        QueueableMessage::new(SequenceNumber::NO_SEQUENCE_NUMBER, 1, message_type, None, None).unwrap()
    }

    fn encoded(sequence_number: i32, message_type: MessageType) -> EncodedMessage {
        EncodedMessage::create(&MessageHeader::with(0, sequence_number, 1, 0, message_type), None)
    }

    #[tokio::test]
    async fn test_sequencing_and_replay() {
        let (queue, history) = history_buffer(4, 100);
        for payload in [b"a", b"b", b"c"] {
            queue.insert(request(payload)).await.unwrap();
        }

        let mut sequence_numbers = Vec::new();
        for _ in 0..3 {
            sequence_numbers.push(history.wait_and_poll().await.unwrap().sequence_number);
        }
        assert_eq!(sequence_numbers, vec![100, 101, 102]);
        assert_eq!(history.get_oldest_added_sequence_number(), 100);
        assert_eq!(history.get_newest_added_sequence_number(), 102);
        assert!(history.is_empty());

        history.rewind_to_after(100).unwrap();
        assert_eq!(history.peek().unwrap().sequence_number, 101);
        assert_eq!(history.size(), 2);
    }

    #[tokio::test]
    async fn test_fifo_with_control_messages() {
        let (queue, history) = history_buffer(10, 7);
        queue.insert(request(b"1")).await.unwrap();
        queue.insert(control(MessageType::CtrlHeartbeat)).await.unwrap();
        queue.insert(request(b"2")).await.unwrap();
        queue.insert(request(b"3")).await.unwrap();

        let mut polled = Vec::new();
        while let Some(msg) = history.poll() {
            polled.push((msg.sequence_number, msg.is_control));
        }
        assert_eq!(polled, vec![(7, false), (8, true), (9, false), (10, false)]);

        // the control message is not retained
        history.rewind_to_first().unwrap();
        let mut replayed = Vec::new();
        while let Some(msg) = history.poll() {
            replayed.push(msg.sequence_number);
        }
        assert_eq!(replayed, vec![7, 9, 10]);
    }

    #[test]
    fn test_only_latest_control_message_is_kept() {
        let (_queue, history) = history_buffer(4, 0);
        history.insert_into_history(encoded(1, MessageType::CtrlHeartbeat));
        history.insert_into_history(encoded(2, MessageType::CtrlTerminateSession));

        assert_eq!(history.size(), 1);
        assert_eq!(history.poll().unwrap().sequence_number, 2);
        assert_eq!(history.poll(), None);
    }

    #[test]
    fn test_control_message_takes_precedence() {
        let (_queue, history) = history_buffer(4, 0);
        history.insert_into_history(encoded(1, MessageType::HlaCallRequest));
        history.insert_into_history(encoded(2, MessageType::CtrlHeartbeat));

        assert_eq!(history.peek().unwrap().sequence_number, 2);
        assert_eq!(history.poll().unwrap().sequence_number, 2);
        assert_eq!(history.poll().unwrap().sequence_number, 1);
    }

    #[rstest]
    #[case::rewind_to(true)]
    #[case::rewind_to_first(false)]
    fn test_rewind_discards_control_message(#[case] to_sequence_number: bool) {
        let (_queue, history) = history_buffer(4, 0);
        history.insert_into_history(encoded(1, MessageType::HlaCallRequest));
        history.poll();
        history.insert_into_history(encoded(2, MessageType::CtrlHeartbeat));

        if to_sequence_number {
            history.rewind_to(1).unwrap();
        }
        else {
            history.rewind_to_first().unwrap();
        }
        assert_eq!(history.poll().unwrap().sequence_number, 1);
        assert_eq!(history.poll(), None);
    }

    #[test]
    fn test_control_messages_not_counted_as_added() {
        let (_queue, history) = history_buffer(4, 0);
        assert_eq!(history.get_oldest_added_sequence_number(), SequenceNumber::NO_SEQUENCE_NUMBER);
        assert_eq!(history.get_newest_added_sequence_number(), SequenceNumber::NO_SEQUENCE_NUMBER);

        history.insert_into_history(encoded(5, MessageType::CtrlHeartbeat));
        assert_eq!(history.get_newest_added_sequence_number(), SequenceNumber::NO_SEQUENCE_NUMBER);
    }

    #[tokio::test]
    async fn test_rewind_past_retained_history_fails() {
        let (queue, history) = history_buffer(2, 0);
        for payload in [b"a", b"b", b"c"] {
            queue.insert(request(payload)).await.unwrap();
            history.poll().unwrap();
        }
        assert_eq!(history.get_oldest_added_sequence_number(), 1);

        assert!(history.rewind_to_after(0).is_err());
        assert!(history.rewind_to_first().is_err());
        assert!(history.is_empty());

        history.rewind_to_after(1).unwrap();
        assert_eq!(history.poll().unwrap().sequence_number, 2);
    }

    #[tokio::test]
    async fn test_promise_registered_when_sequenced() {
        let futures = Arc::new(ResponseFutures::new());
        let (queue, history) = history_buffer(4, 30);

        let (promise, future) = oneshot::channel();
        let msg = QueueableMessage::new(0, 1, MessageType::HlaCallRequest, None, Some((promise, futures.clone()))).unwrap();
        queue.insert(msg).await.unwrap();
        assert!(futures.is_empty());

        let peeked = history.wait_and_peek().await.unwrap();
        assert_eq!(peeked.sequence_number, 30);
        assert!(futures.contains(30));

        assert!(futures.complete(30, Bytes::from_static(b"response")));
        assert_eq!(future.await.unwrap(), Bytes::from_static(b"response"));
    }

    #[tokio::test]
    async fn test_wait_and_peek_wakes_on_insert() {
        let (queue, history) = history_buffer(4, 0);
        let history = Arc::new(history);

        let history2 = history.clone();
        let peeker = tokio::spawn(async move {
            history2.wait_and_peek().await
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!peeker.is_finished());

        queue.insert(request(b"x")).await.unwrap();
        assert_eq!(peeker.await.unwrap().unwrap().sequence_number, 0);
        assert_eq!(history.size(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_wakes_without_data_loss() {
        let (queue, history) = history_buffer(4, 0);
        let history = Arc::new(history);

        let history2 = history.clone();
        let poller = tokio::spawn(async move {
            history2.wait_and_poll().await
        });
        sleep(Duration::from_millis(20)).await;

        history.interrupt(true);
        assert_eq!(poller.await.unwrap(), None);

        queue.insert(request(b"x")).await.unwrap();
        history.interrupt(false);
        assert_eq!(history.wait_and_poll().await.unwrap().sequence_number, 0);
    }

    #[tokio::test]
    async fn test_wait_and_peek_wakes_on_rewind() {
        let (queue, history) = history_buffer(4, 0);
        queue.insert(request(b"x")).await.unwrap();
        history.poll().unwrap();
        let history = Arc::new(history);

        let history2 = history.clone();
        let peeker = tokio::spawn(async move {
            history2.wait_and_peek().await
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!peeker.is_finished());

        history.rewind_to_first().unwrap();
        assert_eq!(peeker.await.unwrap().unwrap().sequence_number, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_empty() {
        let (queue, history) = history_buffer(4, 0);
        assert!(history.wait_until_empty(Some(Duration::from_secs(1))).await);

        queue.insert(request(b"a")).await.unwrap();
        queue.insert(request(b"b")).await.unwrap();
        assert!(!history.wait_until_empty(Some(Duration::from_secs(1))).await);

        let history = Arc::new(history);
        let history2 = history.clone();
        let waiter = tokio::spawn(async move {
            history2.wait_until_empty(None).await
        });
        history.poll().unwrap();
        history.poll().unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_discard_unsent() {
        let futures = Arc::new(ResponseFutures::new());
        let (queue, history) = history_buffer(4, 0);
        history.insert_into_history(encoded(1, MessageType::HlaCallRequest));
        history.insert_into_history(encoded(2, MessageType::CtrlHeartbeat));

        let (promise, future) = oneshot::channel();
        queue.insert(QueueableMessage::new(0, 1, MessageType::HlaCallRequest, None, Some((promise, futures.clone()))).unwrap()).await.unwrap();
        queue.insert(request(b"x")).await.unwrap();

        assert_eq!(history.discard_unsent(), 3);
        assert!(future.await.is_err());
        assert!(futures.is_empty());

        // the sequenced message is retained
        assert_eq!(history.size(), 1);
        assert_eq!(history.poll().unwrap().sequence_number, 1);
        assert_eq!(history.discard_unsent(), 0);
    }

    #[test]
    fn test_capacity() {
        let (_queue, history) = history_buffer(17, 0);
        assert_eq!(history.capacity(), 17);
    }
}
