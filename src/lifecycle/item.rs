use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Identifier assigned by the service that owns the contest or target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Key used for per-item locking.
    pub fn lock_key(self) -> String {
        format!("lifecycle:{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        ItemId(id)
    }
}

/// Where an item is in its lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Pending,
    Active,
    Ended,
}

impl LifecycleStatus {
    fn rank(self) -> u8 {
        match self {
            LifecycleStatus::Pending => 0,
            LifecycleStatus::Active => 1,
            LifecycleStatus::Ended => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleStatus::Ended
    }

    /// Whether moving to `next` is allowed. Staying put is; going back is not.
    pub fn permits(self, next: LifecycleStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleStatus::Pending => "PENDING",
            LifecycleStatus::Active => "ACTIVE",
            LifecycleStatus::Ended => "ENDED",
        };
        f.write_str(name)
    }
}

impl FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(LifecycleStatus::Pending),
            "ACTIVE" => Ok(LifecycleStatus::Active),
            "ENDED" => Ok(LifecycleStatus::Ended),
            other => Err(format!("unknown lifecycle status {other:?}")),
        }
    }
}

/// The persisted record of one schedulable contest or target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleItem {
    pub id: ItemId,
    /// The one authoritative deadline. Wall-clock, so it survives restarts.
    pub expires_at: DateTime<Utc>,
    pub status: LifecycleStatus,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleItem {
    /// A fresh record in [`LifecycleStatus::Pending`].
    pub fn pending(id: ItemId, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            expires_at,
            status: LifecycleStatus::Pending,
            updated_at: now,
        }
    }

    /// Move to `next`.
    ///
    /// Returns `Ok(false)` when already there (re-entering a status is a
    /// no-op) and [`StoreError::InvalidTransition`] for a backwards move.
    pub fn advance(&mut self, next: LifecycleStatus, at: DateTime<Utc>) -> Result<bool, StoreError> {
        if !self.status.permits(next) {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        if self.status == next {
            return Ok(false);
        }
        self.status = next;
        self.updated_at = at;
        Ok(true)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
