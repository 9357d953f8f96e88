//! Events - 配信後のエンゲージメント
//!
//! Downstream signals about a sent message. Only analytics reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngagementKind {
    Opened,
    Clicked,
    Responded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub message_id: MessageId,
    pub kind: EngagementKind,
    pub occurred_at: DateTime<Utc>,
}

impl EngagementEvent {
    pub fn new(message_id: MessageId, kind: EngagementKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            message_id,
            kind,
            occurred_at,
        }
    }
}
