/// Database schema initialization.
/// Sets up SQLite WAL mode and creates tables on startup.
use rusqlite::{Connection, Result as SqliteResult};

/// Initialize database connection with WAL mode and schema
pub fn initialize_database(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode (for file-based DB only, ignore error for in-memory)
    let _ = conn.execute("PRAGMA journal_mode = WAL", []);
    let _ = conn.execute("PRAGMA synchronous = NORMAL", []);
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    create_schema(conn)?;

    Ok(())
}

/// Create all database tables
fn create_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            group_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id TEXT NOT NULL,
            identity TEXT NOT NULL,
            PRIMARY KEY (group_id, identity),
            FOREIGN KEY(group_id) REFERENCES groups(group_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            sender TEXT NOT NULL,
            target TEXT NOT NULL,
            ciphertext BLOB NOT NULL,
            iv BLOB NOT NULL,
            timestamp TEXT NOT NULL,
            is_group INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS message_deletions (
            message_id INTEGER NOT NULL,
            identity TEXT NOT NULL,
            PRIMARY KEY (message_id, identity),
            FOREIGN KEY(message_id) REFERENCES messages(id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_target ON messages(target, is_group);
        CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender);
        CREATE INDEX IF NOT EXISTS idx_group_members_identity ON group_members(identity);
        "#,
    )?;

    Ok(())
}
