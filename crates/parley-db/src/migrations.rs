use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                first_name      TEXT NOT NULL,
                last_name       TEXT NOT NULL,
                phone_number    TEXT,
                role            TEXT NOT NULL DEFAULT 'guest',
                password        TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                receiver_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                edited          INTEGER NOT NULL DEFAULT 0,
                edited_at       TEXT,
                parent_id       TEXT REFERENCES messages(id) ON DELETE CASCADE,
                thread_level    INTEGER NOT NULL DEFAULT 0 CHECK (thread_level >= 0),
                reply_count     INTEGER NOT NULL DEFAULT 0 CHECK (reply_count >= 0)
            );

            CREATE INDEX idx_messages_sender ON messages(sender_id, created_at);
            CREATE INDEX idx_messages_receiver ON messages(receiver_id, created_at);
            CREATE INDEX idx_messages_parent ON messages(parent_id);

            CREATE TABLE message_history (
                id              TEXT PRIMARY KEY,
                message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                old_content     TEXT NOT NULL,
                edited_by       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                edited_at       TEXT NOT NULL,
                version         INTEGER NOT NULL CHECK (version >= 1),
                UNIQUE(message_id, version)
            );

            CREATE TABLE notifications (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                content         TEXT NOT NULL,
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, created_at);

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                title           TEXT,
                created_at      TEXT NOT NULL,
                last_message_at TEXT,
                message_count   INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE conversation_participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user ON conversation_participants(user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('users', 'messages', 'message_history', 'notifications',
                              'conversations', 'conversation_participants')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }
}
