use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicI32, Ordering};
use anyhow::bail;

/// A sequence number of a message in one direction of a session.
///
/// Valid sequence numbers are non-negative and wrap around from [SequenceNumber::MAX_SEQUENCE_NUMBER]
///  to [SequenceNumber::INITIAL_SEQUENCE_NUMBER]. [SequenceNumber::NO_SEQUENCE_NUMBER] is the
///  well-known marker for 'no sequence number', and incrementing it (or any other negative
///  value) yields the initial sequence number.
///
/// NB: This is a plain value without synchronization, see [AtomicSequenceNumber] for sharing
///      between tasks
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SequenceNumber(i32);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const INITIAL_SEQUENCE_NUMBER: i32 = 0;
    pub const MAX_SEQUENCE_NUMBER: i32 = i32::MAX;
    pub const NO_SEQUENCE_NUMBER: i32 = i32::MIN;

    pub fn new(value: i32) -> SequenceNumber {
        SequenceNumber(value)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn set(&mut self, value: i32) {
        self.0 = value;
    }

    pub fn increment(&mut self) -> &mut Self {
        self.0 = Self::next_after(self.0);
        self
    }

    /// returns the current value and advances to the next one - this is how outgoing messages
    ///  get their numbers
    pub fn allocate(&mut self) -> i32 {
        let result = self.0;
        self.increment();
        result
    }

    pub fn next_after(number: i32) -> i32 {
        if number == Self::MAX_SEQUENCE_NUMBER || !Self::is_valid(number) {
            Self::INITIAL_SEQUENCE_NUMBER
        }
        else {
            number + 1
        }
    }

    pub fn is_valid(value: i32) -> bool {
        value > -1
    }

    /// Checks if `candidate` lies in the (inclusive) interval from `oldest` to `newest`, taking
    ///  wrap-around into account: if `oldest` is bigger than `newest`, the interval wrapped
    ///  around [SequenceNumber::MAX_SEQUENCE_NUMBER].
    pub fn in_interval(candidate: i32, oldest: i32, newest: i32) -> anyhow::Result<bool> {
        for value in [candidate, oldest, newest] {
            if !Self::is_valid(value) {
                bail!("sequence number argument {} is invalid, must be in range {} to {}", value, Self::INITIAL_SEQUENCE_NUMBER, Self::MAX_SEQUENCE_NUMBER);
            }
        }

        if oldest <= newest {
            Ok(oldest <= candidate && candidate <= newest)
        }
        else {
            Ok(candidate <= newest || oldest <= candidate)
        }
    }
}


/// A [SequenceNumber] that can be shared, e.g. the 'last received' number that the receive path
///  updates and outgoing messages carry as a piggy-backed acknowledgement.
#[derive(Debug)]
pub struct AtomicSequenceNumber(AtomicI32);

impl AtomicSequenceNumber {
    pub fn new(value: i32) -> AtomicSequenceNumber {
        AtomicSequenceNumber(AtomicI32::new(value))
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Release);
    }

    pub fn increment(&self) {
        // the closure never returns None, so this can not fail
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(SequenceNumber::next_after(n)));
    }

    pub fn get_and_set(&self, value: i32) -> SequenceNumber {
        SequenceNumber(self.0.swap(value, Ordering::AcqRel))
    }
}
