//! Wire format of the lifecycle events and where they travel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemId;

/// Inbound: a contest or target now exists and must end at `expires_at`.
///
/// Encoded as `{"id": 42, "expiresAt": "2024-05-01T12:00:00Z"}`. Producers
/// that send `contestId`/`targetId` and `endDate` are understood too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCreated {
    #[serde(alias = "contestId", alias = "targetId")]
    pub id: ItemId,
    #[serde(alias = "endDate")]
    pub expires_at: DateTime<Utc>,
}

/// Outbound: the item reached its deadline and is now ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEnded {
    pub id: ItemId,
}

/// Exchange and routing keys the scheduler uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    /// Routing key of [`ItemCreated`] events.
    pub created_key: String,
    /// Routing key of [`ItemEnded`] events.
    pub ended_key: String,
}

impl Topology {
    pub fn new(
        exchange: impl Into<String>,
        created_key: impl Into<String>,
        ended_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            created_key: created_key.into(),
            ended_key: ended_key.into(),
        }
    }

    /// Generic names: `lifecycle`, `item.created`, `item.ended`.
    pub fn items() -> Self {
        Self::new("lifecycle", "item.created", "item.ended")
    }

    /// Contest timers: `contestQueue`, `contest.start`, `contest.end`.
    pub fn contests() -> Self {
        Self::new("contestQueue", "contest.start", "contest.end")
    }

    /// Target timers: `targetQueue`, `target.start`, `target.end`.
    pub fn targets() -> Self {
        Self::new("targetQueue", "target.start", "target.end")
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::items()
    }
}
