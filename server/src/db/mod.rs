/// Database layer for persistent storage.
/// Group storage lives here; the message log is in `history_store`.
pub mod history_store;
pub mod init;
pub mod models;

use chrono::Utc;
use models::Group;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use history_store::HistoryStore;

pub type DbPool = Arc<Mutex<Connection>>;

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> SqliteResult<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

/// Current time in the format stored in every timestamp column.
/// Fixed-width UTC so that text ordering matches time ordering.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn load_members(conn: &Connection, group_id: &str) -> SqliteResult<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT identity FROM group_members WHERE group_id = ?1")?;
    let members = stmt
        .query_map(params![group_id], |row| row.get(0))?
        .collect::<Result<BTreeSet<String>, _>>()?;
    Ok(members)
}

fn load_group(conn: &Connection, group_id: &str) -> SqliteResult<Option<Group>> {
    let row = conn
        .query_row(
            "SELECT group_id, name, created_at FROM groups WHERE group_id = ?1",
            params![group_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
        )
        .optional()?;

    match row {
        Some((id, name, created_at)) => {
            let members = load_members(conn, &id)?;
            Ok(Some(Group {
                id,
                name,
                members,
                created_at,
            }))
        }
        None => Ok(None),
    }
}

/// Database operations
pub struct Database;

impl Database {
    /// Create a group with its initial member set
    pub async fn create_group(
        pool: &DbPool,
        name: &str,
        members: &BTreeSet<String>,
    ) -> SqliteResult<Group> {
        let mut conn = pool.lock().await;
        let group_id = uuid::Uuid::new_v4().to_string();
        let created_at = now_timestamp();

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO groups (group_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![&group_id, name, &created_at],
        )?;
        for member in members {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, identity) VALUES (?1, ?2)",
                params![&group_id, member],
            )?;
        }
        tx.commit()?;

        Ok(Group {
            id: group_id,
            name: name.to_string(),
            members: members.clone(),
            created_at,
        })
    }

    /// Get group by id, including its members
    pub async fn get_group(pool: &DbPool, group_id: &str) -> SqliteResult<Option<Group>> {
        let conn = pool.lock().await;
        load_group(&conn, group_id)
    }

    /// Current member set, or None if the group does not exist
    pub async fn get_members(pool: &DbPool, group_id: &str) -> SqliteResult<Option<BTreeSet<String>>> {
        let conn = pool.lock().await;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = ?1)",
            params![group_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }
        load_members(&conn, group_id).map(Some)
    }

    pub async fn is_member(pool: &DbPool, group_id: &str, identity: &str) -> SqliteResult<bool> {
        let conn = pool.lock().await;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND identity = ?2)",
            params![group_id, identity],
            |row| row.get(0),
        )
    }

    /// Groups the identity currently belongs to, oldest first
    pub async fn list_groups_for_member(pool: &DbPool, identity: &str) -> SqliteResult<Vec<Group>> {
        let conn = pool.lock().await;
        let mut stmt = conn.prepare(
            "SELECT g.group_id FROM groups g
             JOIN group_members m ON m.group_id = g.group_id
             WHERE m.identity = ?1
             ORDER BY g.created_at ASC, g.group_id ASC",
        )?;
        let ids = stmt
            .query_map(params![identity], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = load_group(&conn, &id)? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Add a member. Returns false if they already were one.
    pub async fn add_member(pool: &DbPool, group_id: &str, identity: &str) -> SqliteResult<bool> {
        let conn = pool.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, identity) VALUES (?1, ?2)",
            params![group_id, identity],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a member. Returns false if they were not one.
    pub async fn remove_member(pool: &DbPool, group_id: &str, identity: &str) -> SqliteResult<bool> {
        let conn = pool.lock().await;
        let removed = conn.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND identity = ?2",
            params![group_id, identity],
        )?;
        Ok(removed > 0)
    }
}
