//! One-shot remote callbacks.
//!
//! Pending callbacks have no expiry: if the peer never replies the entry
//! stays until the connection ends.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{PeerError, Result};

/// Invoked with the reply data, at most once.
pub type Resolver = Box<dyn FnOnce(Value) + Send + 'static>;

/// Pending one-shot callbacks of one connection, keyed by correlation id.
///
/// Ids come from a per-connection counter and are never reused.
#[derive(Default)]
pub struct CallbackCorrelator {
    next_id: u64,
    pending: HashMap<u64, Resolver>,
}

impl CallbackCorrelator {
    /// Empty table; the first id handed out is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `resolver` under a fresh correlation id.
    pub fn register(&mut self, resolver: Resolver) -> u64 {
        self.next_id += 1;
        self.pending.insert(self.next_id, resolver);
        self.next_id
    }

    /// Invoke and remove the resolver for `id`. Unknown ids are a no-op.
    pub fn resolve(&mut self, id: u64, data: Value) -> bool {
        match self.pending.remove(&id) {
            Some(resolver) => {
                resolver(data);
                true
            }
            None => false,
        }
    }

    /// Drop a pending resolver without invoking it.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Number of callbacks still waiting for a reply.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when no callback is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending resolver.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl std::fmt::Debug for CallbackCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackCorrelator")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Reply to a [`crate::PeerHandle::send_with_callback`] call.
///
/// Resolves with the reply data, or with [`PeerError::Disconnected`] if the
/// connection ends first.
#[derive(Debug)]
pub struct ReplyFuture {
    rx: oneshot::Receiver<Value>,
}

impl ReplyFuture {
    /// A future plus the resolver that completes it.
    pub fn channel() -> (Resolver, ReplyFuture) {
        let (tx, rx) = oneshot::channel();
        let resolver: Resolver = Box::new(move |data| {
            let _ = tx.send(data);
        });
        (resolver, ReplyFuture { rx })
    }
}

impl Future for ReplyFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|reply| {
            reply.map_err(|_| PeerError::Disconnected("connection closed before reply".into()))
        })
    }
}
