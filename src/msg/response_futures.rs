use std::sync::Mutex;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The sending half of a pending response, fulfilled by the receive path
pub type ResponsePromise = oneshot::Sender<Bytes>;
/// The caller's handle for a pending response. If the promise is dropped without being
///  fulfilled (e.g. because the session was terminated), awaiting this yields an error.
pub type ResponseFuture = oneshot::Receiver<Bytes>;

/// Pending responses by the sequence number of the request they answer.
///
/// The writer side registers a promise when a request gets its sequence number, the receive
///  path completes it when the response arrives. Both happen concurrently, so this is
///  internally synchronized.
#[derive(Default)]
pub struct ResponseFutures {
    promises: Mutex<FxHashMap<i32, ResponsePromise>>,
}

impl ResponseFutures {
    pub fn new() -> ResponseFutures {
        Default::default()
    }

    pub fn insert(&self, sequence_number: i32, promise: ResponsePromise) {
        let prev = self.promises.lock().unwrap()
            .insert(sequence_number, promise);
        if prev.is_some() {
            warn!("replacing pending response promise for seq.nr. {} - the previous caller will not get a response", sequence_number);
        }
    }

    /// Returns `false` if there was no promise for the sequence number (or its future was
    ///  dropped already)
    pub fn complete(&self, sequence_number: i32, response: Bytes) -> bool {
        match self.remove(sequence_number) {
            Some(promise) => {
                let result = promise.send(response).is_ok();
                if !result {
                    debug!("response for seq.nr. {} arrived, but nobody is waiting for it any more", sequence_number);
                }
                result
            }
            None => {
                debug!("no pending request for seq.nr. {}", sequence_number);
                false
            }
        }
    }

    pub fn remove(&self, sequence_number: i32) -> Option<ResponsePromise> {
        self.promises.lock().unwrap()
            .remove(&sequence_number)
    }

    pub fn contains(&self, sequence_number: i32) -> bool {
        self.promises.lock().unwrap()
            .contains_key(&sequence_number)
    }

    pub fn len(&self) -> usize {
        self.promises.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all pending promises, so callers waiting for them get an error instead of
    ///  waiting forever
    pub fn abandon_all(&self) {
        let abandoned = std::mem::take(&mut *self.promises.lock().unwrap());
        if !abandoned.is_empty() {
            warn!("abandoning {} pending response promises", abandoned.len());
        }
    }
}
