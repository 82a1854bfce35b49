//! Row → wire model conversions. Stored ids and timestamps that fail to parse
//! are reported as internal errors.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::models::{ConversationRow, HistoryRow, MessageRow, NotificationRow, ParticipantRow, UserRow};
use parley_db::thread::ThreadNode as ThreadRow;
use parley_db::timestamp;
use parley_types::models::{
    Conversation, HistoryEntry, Message, Notification, Participant, ThreadNode, User,
};

use crate::error::ApiError;

pub(crate) fn uuid(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Internal(format!("stored id is not a uuid: {}", raw)))
}

fn time(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    timestamp::parse(raw).ok_or_else(|| ApiError::Internal(format!("bad stored timestamp: {}", raw)))
}

fn opt_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.map(time).transpose()
}

pub(crate) fn user(row: UserRow) -> Result<User, ApiError> {
    Ok(User {
        id: uuid(&row.id)?,
        role: row
            .role
            .parse()
            .map_err(|e| ApiError::Internal(format!("user {}: {}", row.id, e)))?,
        created_at: time(&row.created_at)?,
        username: row.username,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
        phone_number: row.phone_number,
    })
}

pub(crate) fn users(rows: Vec<UserRow>) -> Result<Vec<User>, ApiError> {
    rows.into_iter().map(user).collect()
}

pub(crate) fn message(row: MessageRow) -> Result<Message, ApiError> {
    Ok(Message {
        id: uuid(&row.id)?,
        sender_id: uuid(&row.sender_id)?,
        receiver_id: uuid(&row.receiver_id)?,
        timestamp: time(&row.created_at)?,
        edited_at: opt_time(row.edited_at.as_deref())?,
        parent_message: row.parent_id.as_deref().map(uuid).transpose()?,
        sender_username: row.sender_username,
        receiver_username: row.receiver_username,
        content: row.content,
        edited: row.edited,
        thread_level: row.thread_level,
        reply_count: row.reply_count,
    })
}

pub(crate) fn messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, ApiError> {
    rows.into_iter().map(message).collect()
}

pub(crate) fn thread(node: ThreadRow) -> Result<ThreadNode, ApiError> {
    Ok(ThreadNode {
        message: message(node.message)?,
        replies: node.replies.into_iter().map(thread).collect::<Result<_, _>>()?,
    })
}

pub(crate) fn history(row: HistoryRow) -> Result<HistoryEntry, ApiError> {
    Ok(HistoryEntry {
        id: uuid(&row.id)?,
        message_id: uuid(&row.message_id)?,
        edited_by: uuid(&row.edited_by)?,
        edited_at: time(&row.edited_at)?,
        old_content: row.old_content,
        version: row.version,
    })
}

pub(crate) fn notification(row: NotificationRow) -> Result<Notification, ApiError> {
    Ok(Notification {
        id: uuid(&row.id)?,
        message_id: uuid(&row.message_id)?,
        created_at: time(&row.created_at)?,
        title: row.title,
        content: row.content,
        is_read: row.is_read,
    })
}

pub(crate) fn conversation(row: ConversationRow) -> Result<Conversation, ApiError> {
    Ok(Conversation {
        id: uuid(&row.id)?,
        created_at: time(&row.created_at)?,
        last_message_at: opt_time(row.last_message_at.as_deref())?,
        title: row.title,
        message_count: row.message_count,
    })
}

pub(crate) fn participant(row: ParticipantRow) -> Result<Participant, ApiError> {
    Ok(Participant {
        user_id: uuid(&row.user.id)?,
        joined_at: time(&row.joined_at)?,
        username: row.user.username,
    })
}
