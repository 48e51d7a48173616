//! Pending-call table for one connection.
//!
//! Every outgoing call gets a fresh correlation ID and a oneshot channel that
//! is resolved exactly once: by the matching Response/Error, or with
//! `ConnectionLost` when the connection goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::codec::Fields;
use crate::error::{AmpError, Result};
use crate::handler::CommandSchema;
use crate::protocol::RESERVED_CORRELATION_ID;

/// Sender half resolving a pending call.
pub(crate) type ReplySender = oneshot::Sender<Result<Fields>>;

/// One outstanding call.
pub(crate) struct PendingCall {
    /// Schema of the called command, used to decode the response.
    pub schema: Arc<CommandSchema>,
    /// Resolves the caller.
    pub tx: ReplySender,
}

struct State {
    next_id: u32,
    calls: HashMap<u32, PendingCall>,
    closed: bool,
}

/// Correlation ID allocator and table of outstanding calls.
pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                calls: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an ID for a new call and register its continuation.
    ///
    /// Fails with `ConnectionLost` once the table has been closed.
    pub fn register(
        &self,
        schema: Arc<CommandSchema>,
    ) -> Result<(u32, oneshot::Receiver<Result<Fields>>)> {
        let mut state = self.lock();
        if state.closed {
            return Err(AmpError::ConnectionLost);
        }

        // IDs wrap around, skipping 0 and any still in flight
        let id = loop {
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            if id != RESERVED_CORRELATION_ID && !state.calls.contains_key(&id) {
                break id;
            }
        };

        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, PendingCall { schema, tx });
        Ok((id, rx))
    }

    /// Remove and return the call waiting on `id`.
    pub fn take(&self, id: u32) -> Option<PendingCall> {
        self.lock().calls.remove(&id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    /// Close the table and fail every outstanding call with `ConnectionLost`.
    ///
    /// Returns the number of calls that were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut state = self.lock();
            state.closed = true;
            state.calls.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(AmpError::ConnectionLost));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Schema;

    fn schema() -> Arc<CommandSchema> {
        Arc::new(CommandSchema::new("Count", Schema::new(), Schema::new()))
    }

    #[test]
    fn test_ids_start_at_one_and_are_unique() {
        let pending = PendingCalls::new();
        let (a, _ra) = pending.register(schema()).unwrap();
        let (b, _rb) = pending.register(schema()).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_wraparound_skips_zero_and_in_flight() {
        let pending = PendingCalls::new();
        let (first, _r1) = pending.register(schema()).unwrap();
        assert_eq!(first, 1);

        pending.lock().next_id = u32::MAX;
        let (last, _r2) = pending.register(schema()).unwrap();
        assert_eq!(last, u32::MAX);

        // 0 is reserved and 1 is still pending
        let (next, _r3) = pending.register(schema()).unwrap();
        assert_eq!(next, 2);
    }

    #[tokio::test]
    async fn test_take_resolves_once() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register(schema()).unwrap();

        let call = pending.take(id).unwrap();
        call.tx.send(Ok(Fields::new().with("ok", true))).unwrap();
        assert!(pending.take(id).is_none());

        let fields = rx.await.unwrap().unwrap();
        assert_eq!(fields.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_resolves_with_connection_lost() {
        let pending = PendingCalls::new();
        let (_, rx1) = pending.register(schema()).unwrap();
        let (_, rx2) = pending.register(schema()).unwrap();

        assert_eq!(pending.fail_all(), 2);
        assert!(matches!(rx1.await.unwrap(), Err(AmpError::ConnectionLost)));
        assert!(matches!(rx2.await.unwrap(), Err(AmpError::ConnectionLost)));

        assert!(matches!(
            pending.register(schema()),
            Err(AmpError::ConnectionLost)
        ));
    }
}
