use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::info;

use crate::filters::ConversationFilter;
use crate::models::{ConversationRow, ParticipantRow};
use crate::users::{map_user, query_username};
use crate::{Database, Result, StoreError, timestamp};

const CONVERSATION_COLUMNS: &str = "c.id, c.title, c.created_at, c.last_message_at, c.message_count";

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        last_message_at: row.get(3)?,
        message_count: row.get(4)?,
    })
}

impl Database {
    /// Create a conversation. The creator always joins; at least one other
    /// existing user is required.
    pub fn create_conversation(
        &self,
        id: &str,
        title: Option<&str>,
        creator_id: &str,
        participant_ids: &[String],
    ) -> Result<ConversationRow> {
        let others: BTreeSet<&str> = participant_ids
            .iter()
            .map(String::as_str)
            .filter(|p| *p != creator_id)
            .collect();
        if others.is_empty() {
            return Err(StoreError::Validation(
                "a conversation needs at least one other participant".into(),
            ));
        }

        let conversation = self.with_tx(|tx| {
            for user_id in others.iter().copied().chain([creator_id]) {
                query_username(tx, user_id)?;
            }

            let now = timestamp::now();
            tx.execute(
                "INSERT INTO conversations (id, title, created_at) VALUES (?1, ?2, ?3)",
                params![id, title, now],
            )?;
            for user_id in others.iter().copied().chain([creator_id]) {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![id, user_id, now],
                )?;
            }
            refresh_stats(tx, id)
        })?;

        info!(conversation_id = id, participants = others.len() + 1, "Conversation created");
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let member: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversation_participants
                               WHERE conversation_id = ?1 AND user_id = ?2)",
                [conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(member)
        })
    }

    /// Participants in join order.
    pub fn conversation_participants(&self, conversation_id: &str) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.phone_number,
                        u.role, u.password, u.created_at, p.joined_at
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ?1
                 ORDER BY p.joined_at, u.username",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(ParticipantRow {
                        user: map_user(row)?,
                        joined_at: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns `false` when the user was already a participant.
    pub fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_tx(|tx| {
            if query_conversation(tx, conversation_id)?.is_none() {
                return Err(StoreError::not_found("conversation", conversation_id));
            }
            query_username(tx, user_id)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation_id, user_id, timestamp::now()],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Recompute `message_count` and `last_message_at` from the messages
    /// exchanged between participants, store and return them.
    pub fn refresh_conversation_stats(&self, conversation_id: &str) -> Result<ConversationRow> {
        self.with_tx(|tx| refresh_stats(tx, conversation_id))
    }

    pub fn count_conversations(&self, filter: &ConversationFilter) -> Result<u64> {
        let (where_sql, values) = filter.where_clause();
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM conversations c {}", where_sql);
            let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Conversations newest first.
    pub fn list_conversations(
        &self,
        filter: &ConversationFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ConversationRow>> {
        let (where_sql, mut values) = filter.where_clause();
        values.push((limit as i64).into());
        values.push((offset as i64).into());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations c {}
                 ORDER BY c.created_at DESC, c.rowid DESC
                 LIMIT ? OFFSET ?",
                CONVERSATION_COLUMNS, where_sql
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let sql = format!("SELECT {} FROM conversations c WHERE c.id = ?1", CONVERSATION_COLUMNS);
    Ok(conn.query_row(&sql, [id], map_conversation).optional()?)
}

fn refresh_stats(conn: &Connection, id: &str) -> Result<ConversationRow> {
    let updated = conn.execute(
        "UPDATE conversations
         SET (message_count, last_message_at) = (
             SELECT COUNT(*), MAX(m.created_at) FROM messages m
             WHERE m.sender_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = ?1)
               AND m.receiver_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = ?1)
         )
         WHERE id = ?1",
        [id],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found("conversation", id));
    }
    query_conversation(conn, id)?.ok_or_else(|| StoreError::not_found("conversation", id))
}
