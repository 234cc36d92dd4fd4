//! Common types for Notifuse

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for workspaces
pub type WorkspaceId = String;

/// Unique identifier for broadcasts
pub type BroadcastId = String;

/// Unique identifier for integrations
pub type IntegrationId = String;

/// Identifier of one sent email in message history
pub type MessageId = String;

/// Unique identifier for users
pub type UserId = String;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Correlation tag carrying our own message id through a provider
pub const MESSAGE_ID_TAG: &str = "notifuse_message_id";

/// Correlation tag carrying the originating broadcast id
pub const BROADCAST_ID_TAG: &str = "notifuse_broadcast_id";

/// Correlation tag carrying the originating transactional notification id
pub const TRANSACTIONAL_ID_TAG: &str = "notifuse_transactional_id";

/// Maximum length of a status-info string stored with message history
pub const STATUS_INFO_MAX_LEN: usize = 255;

/// Default page size for list operations
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Hard cap on page size for list operations
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Normalized limit/offset pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    /// Apply defaults: limit 50 when not positive, capped at 100; offset 0 when negative
    pub fn normalize(limit: i64, offset: i64) -> Self {
        let limit = if limit <= 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            limit.min(MAX_PAGE_LIMIT)
        };
        Self {
            limit,
            offset: offset.max(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::normalize(0, 0)
    }
}

/// Authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub workspace_id: WorkspaceId,
    pub name: Option<String>,
}

/// Truncate a string to at most `max` characters without splitting a code point
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        assert_eq!(Pagination::normalize(0, 0).limit, 50);
        assert_eq!(Pagination::normalize(-3, 0).limit, 50);
        assert_eq!(Pagination::normalize(150, 0).limit, 100);
        assert_eq!(Pagination::normalize(20, -5), Pagination { limit: 20, offset: 0 });
    }

    #[test]
    fn test_truncate_chars() {
        let long = "x".repeat(300);
        assert_eq!(truncate_chars(&long, STATUS_INFO_MAX_LEN).len(), 255);
        assert_eq!(truncate_chars("short", 255), "short");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
