use rusqlite::{OptionalExtension, Row, params};

use crate::models::NotificationRow;
use crate::{Database, Result, StoreError};

const NOTIFICATION_COLUMNS: &str = "id, user_id, message_id, title, content, is_read, created_at";

fn map_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl Database {
    pub fn count_notifications(&self, user_id: &str, unread: Option<bool>) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications
                 WHERE user_id = ?1 AND (?2 IS NULL OR is_read = NOT ?2)",
                params![user_id, unread],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Notifications for `user_id`, newest first. `unread` narrows to unread
    /// (`Some(true)`) or read (`Some(false)`) ones.
    pub fn list_notifications(
        &self,
        user_id: &str,
        unread: Option<bool>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM notifications
                 WHERE user_id = ?1 AND (?2 IS NULL OR is_read = NOT ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3 OFFSET ?4",
                NOTIFICATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id, unread, limit, offset as i64], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn notifications_for_message(&self, message_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM notifications WHERE message_id = ?1 ORDER BY rowid",
                NOTIFICATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([message_id], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark one notification read. Only its addressee may do so.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let owner: Option<String> = conn
                .query_row("SELECT user_id FROM notifications WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            match owner {
                None => Err(StoreError::not_found("notification", id)),
                Some(owner) if owner != user_id => Err(StoreError::PermissionDenied(
                    "notification belongs to another user".into(),
                )),
                Some(_) => {
                    conn.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
                    Ok(())
                }
            }
        })
    }

    /// Returns how many notifications changed.
    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id],
            )?)
        })
    }
}
