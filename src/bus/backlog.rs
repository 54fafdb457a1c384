//! Ordered buffer of publishes waiting for a healthy broker connection.
//!
//! The backlog lives in process memory only. Anything still queued when the
//! process exits is lost; consumers of the published events must treat a
//! missing event as possible and a repeated one as harmless.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::OutboundMessage;

/// What to do when a bounded backlog is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Refuse the new message.
    RejectNew,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "reject-new" => Ok(OverflowPolicy::RejectNew),
            other => Err(format!(
                "unknown overflow policy {other:?}, expected drop-oldest or reject-new"
            )),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => f.write_str("drop-oldest"),
            OverflowPolicy::RejectNew => f.write_str("reject-new"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BacklogError {
    #[error("backlog is full ({capacity} messages)")]
    Full { capacity: usize },
}

/// Outcome of a [`Backlog::drain`] pass.
#[derive(Debug)]
pub struct DrainReport<E> {
    /// Messages the sink accepted and that were removed.
    pub delivered: usize,
    /// Messages still queued afterwards.
    pub remaining: usize,
    /// The sink error that stopped the pass, if any.
    pub error: Option<E>,
}

impl<E> DrainReport<E> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.remaining == 0
    }
}

/// FIFO backlog. Not synchronized: the owner serializes access (the bus
/// client keeps it under the same lock as its channel).
#[derive(Debug, Default)]
pub struct Backlog {
    queue: VecDeque<OutboundMessage>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    dropped: u64,
}

impl Backlog {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A backlog holding at most `capacity` messages (at least one).
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity.max(1)),
            policy,
            dropped: 0,
        }
    }

    /// Append a message.
    ///
    /// Returns the evicted message when a full backlog drops its oldest
    /// entry, and [`BacklogError::Full`] under [`OverflowPolicy::RejectNew`].
    pub fn enqueue(&mut self, msg: OutboundMessage) -> Result<Option<OutboundMessage>, BacklogError> {
        let mut evicted = None;
        if let Some(capacity) = self.capacity {
            if self.queue.len() >= capacity {
                match self.policy {
                    OverflowPolicy::RejectNew => {
                        self.dropped += 1;
                        return Err(BacklogError::Full { capacity });
                    }
                    OverflowPolicy::DropOldest => {
                        evicted = self.queue.pop_front();
                        self.dropped += 1;
                    }
                }
            }
        }
        self.queue.push_back(msg);
        Ok(evicted)
    }

    /// Feed queued messages to `sink` oldest first.
    ///
    /// A message is removed only after `sink` accepts it. The first error
    /// stops the pass and leaves that message and everything behind it in
    /// place, in the original order.
    pub fn drain<F, E>(&mut self, mut sink: F) -> DrainReport<E>
    where
        F: FnMut(&OutboundMessage) -> Result<(), E>,
    {
        let mut delivered = 0;
        while let Some(front) = self.queue.front() {
            if let Err(error) = sink(front) {
                return DrainReport {
                    delivered,
                    remaining: self.queue.len(),
                    error: Some(error),
                };
            }
            self.queue.pop_front();
            delivered += 1;
        }
        DrainReport {
            delivered,
            remaining: 0,
            error: None,
        }
    }

    pub fn peek(&self) -> Option<&OutboundMessage> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Messages lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
