//! Side effects of message writes. Called directly from the write paths in
//! `messages.rs`, inside the caller's transaction, so a failure here rolls the
//! write back with it.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{HistoryRow, MessageRow, NotificationRow};
use crate::{Result, timestamp};

const PREVIEW_CHARS: usize = 50;

/// After a message row is inserted: notify the receiver unless the sender
/// wrote to themselves. Never called on updates.
pub(crate) fn on_message_created(
    conn: &Connection,
    message: &MessageRow,
) -> Result<Option<NotificationRow>> {
    if message.sender_id == message.receiver_id {
        return Ok(None);
    }

    let notification = NotificationRow {
        id: Uuid::new_v4().to_string(),
        user_id: message.receiver_id.clone(),
        message_id: message.id.clone(),
        title: format!("New message from {}", message.sender_username),
        content: format!("You have received a new message: {}", preview(&message.content)),
        is_read: false,
        created_at: timestamp::now(),
    };

    conn.execute(
        "INSERT INTO notifications (id, user_id, message_id, title, content, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            notification.id,
            notification.user_id,
            notification.message_id,
            notification.title,
            notification.content,
            notification.created_at,
        ],
    )?;
    debug!(message_id = %message.id, user_id = %notification.user_id, "Notification created");
    Ok(Some(notification))
}

/// Before a content-changing update: copy the stored pre-image into the
/// history ledger as the next version.
///
/// If the row has vanished the edit goes ahead without a history entry.
pub(crate) fn on_message_updating(
    conn: &Connection,
    message_id: &str,
    editor_id: &str,
) -> Result<Option<HistoryRow>> {
    let pre_image: Option<String> = conn
        .query_row("SELECT content FROM messages WHERE id = ?1", [message_id], |row| row.get(0))
        .optional()?;

    let Some(old_content) = pre_image else {
        warn!(message_id, "Pre-image missing, skipping history entry");
        return Ok(None);
    };

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM message_history WHERE message_id = ?1",
        [message_id],
        |row| row.get(0),
    )?;

    let entry = HistoryRow {
        id: Uuid::new_v4().to_string(),
        message_id: message_id.to_string(),
        old_content,
        edited_by: editor_id.to_string(),
        edited_at: timestamp::now(),
        version,
    };

    conn.execute(
        "INSERT INTO message_history (id, message_id, old_content, edited_by, edited_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.message_id,
            entry.old_content,
            entry.edited_by,
            entry.edited_at,
            entry.version,
        ],
    )?;
    debug!(message_id, version, "History entry recorded");
    Ok(Some(entry))
}

/// First 50 characters, with an ellipsis only when something was cut.
pub(crate) fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_not_truncated() {
        assert_eq!(preview("hello"), "hello");
    }

    #[test]
    fn long_content_is_cut_on_char_boundary() {
        let content = "é".repeat(60);
        let p = preview(&content);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 53);
    }

    #[test]
    fn exactly_fifty_chars_has_no_ellipsis() {
        let content = "x".repeat(50);
        assert_eq!(preview(&content), content);
    }
}
