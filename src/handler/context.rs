//! Call context for handlers.
//!
//! Identifies the call being answered and gives the handler access to the
//! [`Peer`] it came from, so a handler can issue its own calls or close the
//! connection.

use crate::peer::Peer;

/// Context passed to command handlers.
///
/// `CallContext` is `Clone` and can be moved into spawned tasks.
#[derive(Clone)]
pub struct CallContext {
    /// Correlation ID of the call being answered.
    correlation_id: u32,
    /// Name of the command being answered.
    command: String,
    /// Connection the call arrived on.
    peer: Option<Peer>,
}

impl CallContext {
    /// Create a context with no connection behind it (for testing handlers).
    pub fn detached(correlation_id: u32, command: &str) -> Self {
        Self {
            correlation_id,
            command: command.to_string(),
            peer: None,
        }
    }

    pub(crate) fn with_peer(correlation_id: u32, command: &str, peer: Peer) -> Self {
        Self {
            correlation_id,
            command: command.to_string(),
            peer: Some(peer),
        }
    }

    /// Get the correlation ID.
    #[inline]
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    /// Get the command name.
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Get the connection this call arrived on, if any.
    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_context() {
        let ctx = CallContext::detached(42, "Count");
        assert_eq!(ctx.correlation_id(), 42);
        assert_eq!(ctx.command(), "Count");
        assert!(ctx.peer().is_none());

        let copy = ctx.clone();
        assert_eq!(copy.correlation_id(), ctx.correlation_id());
    }
}
