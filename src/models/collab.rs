use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// A user currently present in a document session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ActiveUser {
    pub user_id: String,
    pub username: String,
    pub cursor_position: String,
    pub last_active: DateTime<Utc>,
}

impl ActiveUser {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            cursor_position: String::new(),
            last_active: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Delete,
    Replace,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Insert => write!(f, "insert"),
            OperationType::Delete => write!(f, "delete"),
            OperationType::Replace => write!(f, "replace"),
        }
    }
}

/// A single edit. Order inside a change is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Operation {
    #[serde(rename = "type")]
    pub r#type: OperationType,
    pub position: i32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub length: i32,
}

impl Operation {
    pub fn insert(position: i32, content: impl Into<String>) -> Self {
        let content = content.into();
        let length = content.chars().count() as i32;
        Self {
            r#type: OperationType::Insert,
            position,
            content,
            length,
        }
    }

    pub fn delete(position: i32, length: i32) -> Self {
        Self {
            r#type: OperationType::Delete,
            position,
            content: String::new(),
            length,
        }
    }

    pub fn replace(position: i32, length: i32, content: impl Into<String>) -> Self {
        Self {
            r#type: OperationType::Replace,
            position,
            content: content.into(),
            length,
        }
    }
}

/// A committed batch of operations, persisted as one version-history row and broadcast on the
/// document's change topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DocumentChange {
    pub document_id: String,
    pub user_id: String,
    pub version: String,
    pub operations: Vec<Operation>,
    pub timestamp: DateTime<Utc>,
}

/// Events published on `documents/{id}/presence`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    Join {
        user: ActiveUser,
    },
    Leave {
        user_id: String,
    },
    Cursor {
        user_id: String,
        cursor_position: String,
    },
}
