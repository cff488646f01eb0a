//! Key/value store with per-entry expiry and exactly one terminal
//! notification per entry.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};

/// How a registry entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// A later `set` with the same key replaced it.
    Overwritten,
    /// Removed with [`TimedRegistry::delete`].
    Deleted,
    /// Its timeout elapsed.
    TimedOut,
    /// The whole registry was stopped.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no registry entry for key")]
    NotFound,
}

/// Terminal notification. Receives the entry's value back.
pub type OnTerminal<K, V> = Box<dyn FnOnce(&K, V, Terminal) + Send>;

struct Entry<K, V> {
    value: V,
    deadline: Option<(delay_queue::Key, Instant)>,
    on_terminal: OnTerminal<K, V>,
}

impl<K, V> Entry<K, V> {
    fn finish(self, key: &K, terminal: Terminal) {
        (self.on_terminal)(key, self.value, terminal);
    }
}

/// Expiring registry, driven by the task that owns it.
///
/// Expiry only happens while someone awaits [`TimedRegistry::expired`]; the
/// connection task keeps that future in its select loop.
pub struct TimedRegistry<K, V> {
    entries: HashMap<K, Entry<K, V>>,
    deadlines: DelayQueue<K>,
}

impl<K, V> TimedRegistry<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: DelayQueue::new(),
        }
    }

    /// Insert or replace an entry. A replaced entry gets
    /// [`Terminal::Overwritten`] before the new one is stored. `None` means
    /// the entry never expires on its own.
    pub fn set<F>(&mut self, key: K, value: V, timeout: Option<Duration>, on_terminal: F)
    where
        F: FnOnce(&K, V, Terminal) + Send + 'static,
    {
        if let Some(previous) = self.take(&key) {
            previous.finish(&key, Terminal::Overwritten);
        }
        let deadline = timeout.map(|timeout| {
            (
                self.deadlines.insert(key.clone(), timeout),
                Instant::now() + timeout,
            )
        });
        self.entries.insert(
            key,
            Entry {
                value,
                deadline,
                on_terminal: Box::new(on_terminal),
            },
        );
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Mutable access to the value stored under `key`. Does not touch its
    /// deadline.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|entry| &mut entry.value)
    }

    /// True while `key` has a live entry.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// When the entry will time out, if it has a timeout.
    pub fn expires_at(&self, key: &K) -> Option<Instant> {
        self.entries
            .get(key)
            .and_then(|entry| entry.deadline.map(|(_, at)| at))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove an entry, firing [`Terminal::Deleted`].
    pub fn delete(&mut self, key: &K) -> Result<(), RegistryError> {
        let entry = self.take(key).ok_or(RegistryError::NotFound)?;
        entry.finish(key, Terminal::Deleted);
        Ok(())
    }

    /// Remove an entry and hand back its value. No terminal notification
    /// fires.
    pub fn extract(&mut self, key: &K) -> Result<V, RegistryError> {
        self.take(key)
            .map(|entry| entry.value)
            .ok_or(RegistryError::NotFound)
    }

    /// Remove every entry, firing [`Terminal::Stopped`] for each.
    pub fn stop(&mut self) {
        self.deadlines.clear();
        for (key, entry) in self.entries.drain() {
            entry.finish(&key, Terminal::Stopped);
        }
    }

    /// Poll for the next timed-out entry. Fires [`Terminal::TimedOut`] and
    /// yields its key. Stays pending while nothing has a deadline.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<K> {
        while let Poll::Ready(Some(expired)) = self.deadlines.poll_expired(cx) {
            let key = expired.into_inner();
            if let Some(entry) = self.entries.remove(&key) {
                entry.finish(&key, Terminal::TimedOut);
                return Poll::Ready(key);
            }
        }
        Poll::Pending
    }

    /// Wait for the next timed-out entry. Cancel safe.
    pub async fn expired(&mut self) -> K {
        std::future::poll_fn(|cx| self.poll_expired(cx)).await
    }

    fn take(&mut self, key: &K) -> Option<Entry<K, V>> {
        let entry = self.entries.remove(key)?;
        if let Some((delay_key, _)) = &entry.deadline {
            self.deadlines.remove(delay_key);
        }
        Some(entry)
    }
}

impl<K: Eq + Hash + Clone, V> Default for TimedRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for TimedRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedRegistry")
            .field("entries", &self.entries.len())
            .field("deadlines", &self.deadlines.len())
            .finish()
    }
}
