/// Data models for database operations.
/// Represents groups, persisted messages, and request/response DTOs.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub members: BTreeSet<String>,
    pub created_at: String,
}

/// A message cleared for persistence, already encrypted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: String,
    pub target: String,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub is_group: bool,
}

/// A message as persisted. Only `deleted_for` ever changes after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub sender: String,
    pub target: String,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub timestamp: String,
    pub is_group: bool,
    pub deleted_for: BTreeSet<String>,
}

/// A decrypted history line as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub time: String,
}

/// Which conversation a history mutation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationSelector {
    Direct { user_a: String, user_b: String },
    Group { group_id: String },
}

// Request/Response DTOs
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub message: String,
    pub modified_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteGroupResponse {
    pub message: String,
    pub deleted_messages: usize,
}
