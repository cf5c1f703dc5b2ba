/// Persistent message log with a per-user soft-delete overlay.
///
/// This module provides:
/// - Append-only storage of encrypted direct and group messages
/// - History queries that hide messages the requester has cleared and
///   decrypt what remains
/// - Per-user clearing that never touches ciphertext or other users' views
/// - Cascade deletion of a group together with its messages
///
/// `deleted_for` is stored as rows in `message_deletions`; rows are only
/// ever inserted, except when a whole group is deleted.
use super::models::{ConversationSelector, HistoryEntry, NewMessage, StoredMessage};
use super::{now_timestamp, DbPool};
use crate::codec::MessageCodec;
use crate::error::{ChatError, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::Arc;

const DIRECT_PAIR_FILTER: &str =
    "is_group = 0 AND ((sender = ?1 AND target = ?2) OR (sender = ?2 AND target = ?1))";
const GROUP_FILTER: &str = "is_group = 1 AND target = ?1";

/// Encrypted row as read from the database, before decryption
struct SealedRow {
    sender: String,
    target: String,
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
    timestamp: String,
}

pub struct HistoryStore {
    pool: DbPool,
    codec: Arc<MessageCodec>,
}

impl HistoryStore {
    pub fn new(pool: DbPool, codec: Arc<MessageCodec>) -> Self {
        HistoryStore { pool, codec }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Durably insert a message
    pub async fn append(&self, message: NewMessage) -> Result<StoredMessage> {
        let conn = self.pool.lock().await;
        let timestamp = now_timestamp();

        conn.execute(
            "INSERT INTO messages (sender, target, ciphertext, iv, timestamp, is_group)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &message.sender,
                &message.target,
                &message.ciphertext,
                &message.iv,
                &timestamp,
                message.is_group,
            ],
        )?;

        Ok(StoredMessage {
            id: conn.last_insert_rowid(),
            sender: message.sender,
            target: message.target,
            ciphertext: message.ciphertext,
            iv: message.iv,
            timestamp,
            is_group: message.is_group,
            deleted_for: BTreeSet::new(),
        })
    }

    /// Raw persisted record, including who has cleared it
    pub async fn get(&self, message_id: i64) -> Result<Option<StoredMessage>> {
        let conn = self.pool.lock().await;

        let message = conn
            .query_row(
                "SELECT id, sender, target, ciphertext, iv, timestamp, is_group
                 FROM messages WHERE id = ?1",
                params![message_id],
                |row| {
                    Ok(StoredMessage {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        target: row.get(2)?,
                        ciphertext: row.get(3)?,
                        iv: row.get(4)?,
                        timestamp: row.get(5)?,
                        is_group: row.get(6)?,
                        deleted_for: BTreeSet::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut message) = message else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT identity FROM message_deletions WHERE message_id = ?1")?;
        message.deleted_for = stmt
            .query_map(params![message_id], |row| row.get(0))?
            .collect::<std::result::Result<BTreeSet<String>, _>>()?;

        Ok(Some(message))
    }

    /// Direct messages between two identities that `requester` has not
    /// cleared, oldest first
    pub async fn query_direct(
        &self,
        user_a: &str,
        user_b: &str,
        requester: &str,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = {
            let conn = self.pool.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT sender, target, ciphertext, iv, timestamp FROM messages m
                 WHERE {DIRECT_PAIR_FILTER}
                   AND NOT EXISTS (SELECT 1 FROM message_deletions d
                                   WHERE d.message_id = m.id AND d.identity = ?3)
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![user_a, user_b, requester], read_sealed_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        self.open_rows(rows)
    }

    /// Group messages that `requester` has not cleared, oldest first.
    /// Membership of `requester` is the caller's responsibility.
    pub async fn query_group(&self, group_id: &str, requester: &str) -> Result<Vec<HistoryEntry>> {
        let rows = {
            let conn = self.pool.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT sender, target, ciphertext, iv, timestamp FROM messages m
                 WHERE {GROUP_FILTER}
                   AND NOT EXISTS (SELECT 1 FROM message_deletions d
                                   WHERE d.message_id = m.id AND d.identity = ?2)
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![group_id, requester], read_sealed_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        self.open_rows(rows)
    }

    /// Hide every message of a conversation from `requester`.
    ///
    /// Returns how many messages were newly hidden; repeating the call
    /// returns 0 and changes nothing.
    pub async fn clear_for_user(
        &self,
        selector: &ConversationSelector,
        requester: &str,
    ) -> Result<usize> {
        let conn = self.pool.lock().await;

        let modified = match selector {
            ConversationSelector::Direct { user_a, user_b } => conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO message_deletions (message_id, identity)
                     SELECT id, ?3 FROM messages WHERE {DIRECT_PAIR_FILTER}"
                ),
                params![user_a, user_b, requester],
            )?,
            ConversationSelector::Group { group_id } => conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO message_deletions (message_id, identity)
                     SELECT id, ?2 FROM messages WHERE {GROUP_FILTER}"
                ),
                params![group_id, requester],
            )?,
        };

        Ok(modified)
    }

    /// Remove a group, its memberships, and every message sent to it.
    /// Returns the number of messages removed.
    pub async fn delete_group_cascade(&self, group_id: &str) -> Result<usize> {
        self.delete_group_inner(group_id, None).await
    }

    /// Like `delete_group_cascade`, but only if `actor` is a member. The
    /// membership check and the deletion share one transaction.
    pub async fn delete_group_as_member(&self, group_id: &str, actor: &str) -> Result<usize> {
        self.delete_group_inner(group_id, Some(actor)).await
    }

    async fn delete_group_inner(&self, group_id: &str, actor: Option<&str>) -> Result<usize> {
        let mut conn = self.pool.lock().await;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = ?1)",
            params![group_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(ChatError::NotFound(format!("group {}", group_id)));
        }

        if let Some(actor) = actor {
            let is_member: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND identity = ?2)",
                params![group_id, actor],
                |row| row.get(0),
            )?;
            if !is_member {
                return Err(ChatError::Permission);
            }
        }

        tx.execute(
            &format!(
                "DELETE FROM message_deletions
                 WHERE message_id IN (SELECT id FROM messages WHERE {GROUP_FILTER})"
            ),
            params![group_id],
        )?;
        let deleted = tx.execute(
            &format!("DELETE FROM messages WHERE {GROUP_FILTER}"),
            params![group_id],
        )?;
        tx.execute("DELETE FROM group_members WHERE group_id = ?1", params![group_id])?;
        tx.execute("DELETE FROM groups WHERE group_id = ?1", params![group_id])?;
        tx.commit()?;

        log::info!("Deleted group {} and {} messages", group_id, deleted);
        Ok(deleted)
    }

    /// Number of stored messages addressed to `target`
    pub async fn count_for_target(&self, target: &str) -> Result<usize> {
        let conn = self.pool.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE target = ?1",
            params![target],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Decrypt fetched rows. Any undecodable row fails the whole read.
    fn open_rows(&self, rows: Vec<SealedRow>) -> Result<Vec<HistoryEntry>> {
        rows.into_iter()
            .map(|row| {
                let message = self.codec.decrypt(&row.ciphertext, &row.iv)?;
                Ok(HistoryEntry {
                    sender: row.sender,
                    receiver: row.target,
                    message,
                    time: row.timestamp,
                })
            })
            .collect()
    }
}

fn read_sealed_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SealedRow> {
    Ok(SealedRow {
        sender: row.get(0)?,
        target: row.get(1)?,
        ciphertext: row.get(2)?,
        iv: row.get(3)?,
        timestamp: row.get(4)?,
    })
}
