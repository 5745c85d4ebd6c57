//! Bounded outbound FIFO shared between [`crate::session::Session`] and its send worker.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// What the overflow policy should do when `push` is called at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued message to make room for the new one.
    DropOldest,
    /// Refuse the new message, keeping the queue as-is.
    DropNewest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// An element of the outbound queue: either an opaque payload or the shutdown sentinel.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Raw bytes to be forwarded to the transport, unexamined.
    Frame(Vec<u8>),
    /// Sentinel pushed by the shutdown coordinator to unblock a parked `pop`.
    StopSignal,
}

struct Inner {
    items: VecDeque<OutboundMessage>,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Thread-safe bounded FIFO. `push` never blocks; `pop` blocks up to a timeout.
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl OutboundQueue {
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                policy,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends `msg` at the tail. Never blocks. Returns `true` if the message was
    /// retained (either there was room, or the overflow policy kept it by evicting
    /// something else), `false` if `DropNewest` refused it.
    ///
    /// The `StopSignal` sentinel always bypasses capacity checks.
    pub fn push(&self, msg: OutboundMessage) -> bool {
        let retained = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if matches!(msg, OutboundMessage::StopSignal) || inner.items.len() < inner.capacity {
                inner.items.push_back(msg);
                true
            } else {
                match inner.policy {
                    OverflowPolicy::DropOldest => {
                        inner.items.pop_front();
                        inner.items.push_back(msg);
                        true
                    }
                    OverflowPolicy::DropNewest => false,
                }
            }
        };
        self.notify.notify_one();
        retained
    }

    /// Re-enqueues `msg` at the head, for the send worker's park-and-retry path.
    /// Applies the overflow policy if the queue is already at capacity.
    pub fn push_front(&self, msg: OutboundMessage) -> bool {
        let retained = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if inner.items.len() < inner.capacity {
                inner.items.push_front(msg);
                true
            } else {
                match inner.policy {
                    OverflowPolicy::DropOldest => {
                        // The "oldest" entry from the head's perspective is the tail.
                        inner.items.pop_back();
                        inner.items.push_front(msg);
                        true
                    }
                    OverflowPolicy::DropNewest => false,
                }
            }
        };
        self.notify.notify_one();
        retained
    }

    /// Waits up to `wait` for an item, returning `None` on timeout.
    pub async fn pop(&self, wait: Duration) -> Option<OutboundMessage> {
        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            let notified = self.notify.notified();
            if timeout(wait, notified).await.is_err() {
                return None;
            }
            // Woken up: loop back and try again (another waiter may have won the race).
        }
    }

    fn try_pop(&self) -> Option<OutboundMessage> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.items.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains all remaining entries, discarding them. Returns the number discarded.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let n = inner.items.len();
        inner.items.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(b: &str) -> OutboundMessage {
        OutboundMessage::Frame(b.as_bytes().to_vec())
    }

    fn as_str(msg: &OutboundMessage) -> &str {
        match msg {
            OutboundMessage::Frame(b) => std::str::from_utf8(b).unwrap(),
            OutboundMessage::StopSignal => "<stop>",
        }
    }

    #[test]
    fn push_and_pop_fifo_order() {
        let q = OutboundQueue::new(10, OverflowPolicy::DropOldest);
        q.push(frame("a"));
        q.push(frame("b"));
        q.push(frame("c"));
        assert_eq!(q.len(), 3);
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            assert_eq!(as_str(&q.pop(Duration::from_millis(10)).await.unwrap()), "a");
            assert_eq!(as_str(&q.pop(Duration::from_millis(10)).await.unwrap()), "b");
            assert_eq!(as_str(&q.pop(Duration::from_millis(10)).await.unwrap()), "c");
            assert!(q.pop(Duration::from_millis(10)).await.is_none());
        });
    }

    #[test]
    fn overflow_drop_oldest_keeps_last_n_in_order() {
        let q = OutboundQueue::new(3, OverflowPolicy::DropOldest);
        for letter in ["A", "B", "C", "D", "E"] {
            q.push(frame(letter));
        }
        assert_eq!(q.len(), 3);
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let remaining: Vec<String> = {
                let mut out = Vec::new();
                while let Some(m) = q.pop(Duration::from_millis(5)).await {
                    out.push(as_str(&m).to_string());
                }
                out
            };
            assert_eq!(remaining, vec!["C", "D", "E"]);
        });
    }

    #[test]
    fn overflow_drop_newest_keeps_first_n_in_order() {
        let q = OutboundQueue::new(3, OverflowPolicy::DropNewest);
        for letter in ["A", "B", "C", "D", "E"] {
            q.push(frame(letter));
        }
        assert_eq!(q.len(), 3);
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let remaining: Vec<String> = {
                let mut out = Vec::new();
                while let Some(m) = q.pop(Duration::from_millis(5)).await {
                    out.push(as_str(&m).to_string());
                }
                out
            };
            assert_eq!(remaining, vec!["A", "B", "C"]);
        });
    }

    #[test]
    fn stop_signal_bypasses_capacity() {
        let q = OutboundQueue::new(1, OverflowPolicy::DropNewest);
        q.push(frame("A"));
        assert!(q.push(OutboundMessage::StopSignal));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_counts_and_empties() {
        let q = OutboundQueue::new(5, OverflowPolicy::DropOldest);
        q.push(frame("A"));
        q.push(frame("B"));
        assert_eq!(q.drain(), 2);
        assert!(q.is_empty());
    }
}
