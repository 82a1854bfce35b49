use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::filters::{MessageFilter, SortOrder};
use crate::hooks;
use crate::models::{HistoryRow, MessageRow, NewMessage};
use crate::thread::{MAX_THREAD_DEPTH, ThreadArena, ThreadNode};
use crate::users::query_username;
use crate::{Database, Result, StoreError, timestamp};

pub const MAX_CONTENT_CHARS: usize = 10_000;

// JOIN users to fetch both usernames in a single query (eliminates N+1)
pub(crate) const MESSAGE_SELECT: &str =
    "SELECT m.id, m.sender_id, s.username, m.receiver_id, r.username, m.content, m.created_at,
            m.edited, m.edited_at, m.parent_id, m.thread_level, m.reply_count
     FROM messages m
     JOIN users s ON s.id = m.sender_id
     JOIN users r ON r.id = m.receiver_id";

pub(crate) fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        receiver_id: row.get(3)?,
        receiver_username: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        edited: row.get(7)?,
        edited_at: row.get(8)?,
        parent_id: row.get(9)?,
        thread_level: row.get(10)?,
        reply_count: row.get(11)?,
    })
}

impl Database {
    // -- Writes --

    /// Insert a message. For replies the receiver and thread level come from
    /// the parent, and the parent's reply count is recomputed afterwards.
    /// The receiver is notified in the same transaction.
    pub fn send_message(&self, new: &NewMessage) -> Result<MessageRow> {
        validate_content(&new.content)?;

        let message = self.with_tx(|tx| {
            query_username(tx, &new.sender_id)?;

            let (receiver_id, thread_level) = match &new.parent_id {
                Some(parent_id) => {
                    let parent = query_message(tx, parent_id)?
                        .ok_or_else(|| StoreError::not_found("message", parent_id))?;
                    let receiver = if new.sender_id == parent.sender_id {
                        parent.receiver_id
                    } else {
                        parent.sender_id
                    };
                    (receiver, parent.thread_level + 1)
                }
                None => {
                    let receiver = new
                        .receiver_id
                        .clone()
                        .ok_or_else(|| StoreError::Validation("receiver is required".into()))?;
                    (receiver, 0)
                }
            };
            query_username(tx, &receiver_id)?;

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at, parent_id, thread_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.id,
                    new.sender_id,
                    receiver_id,
                    new.content,
                    timestamp::now(),
                    new.parent_id,
                    thread_level,
                ],
            )?;

            if let Some(parent_id) = &new.parent_id {
                refresh_reply_count(tx, parent_id)?;
            }

            let message = query_message(tx, &new.id)?
                .ok_or_else(|| StoreError::not_found("message", &new.id))?;
            hooks::on_message_created(tx, &message)?;
            Ok(message)
        })?;

        info!(
            message_id = %message.id,
            parent_id = ?message.parent_id,
            thread_level = message.thread_level,
            "Message sent"
        );
        Ok(message)
    }

    /// Replace a message's content. A real change marks the message edited
    /// and appends the previous content to its history first; an identical
    /// content is a no-op.
    pub fn edit_message(&self, id: &str, editor_id: &str, content: &str) -> Result<MessageRow> {
        validate_content(content)?;

        self.with_tx(|tx| {
            let current = query_message(tx, id)?.ok_or_else(|| StoreError::not_found("message", id))?;
            if current.content == content {
                debug!(message_id = id, "Edit without content change ignored");
                return Ok(current);
            }

            hooks::on_message_updating(tx, id, editor_id)?;

            tx.execute(
                "UPDATE messages SET content = ?1, edited = 1, edited_at = ?2 WHERE id = ?3",
                params![content, timestamp::now(), id],
            )?;

            query_message(tx, id)?.ok_or_else(|| StoreError::not_found("message", id))
        })
    }

    /// Delete a message. Replies, history and notifications go with it
    /// through the schema's cascades; the parent's reply count is refreshed.
    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.with_tx(|tx| {
            let current = query_message(tx, id)?.ok_or_else(|| StoreError::not_found("message", id))?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            if let Some(parent_id) = &current.parent_id {
                refresh_reply_count(tx, parent_id)?;
            }
            Ok(())
        })?;
        info!(message_id = id, "Message deleted");
        Ok(())
    }

    // -- Reads --

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn count_messages(&self, filter: &MessageFilter) -> Result<u64> {
        let (where_sql, values) = filter.where_clause();
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM messages m {}", where_sql);
            let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    pub fn list_messages(
        &self,
        filter: &MessageFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, filter, limit, offset))
    }

    /// History rows of a message, newest version first.
    pub fn message_history(&self, message_id: &str) -> Result<Vec<HistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, old_content, edited_by, edited_at, version
                 FROM message_history
                 WHERE message_id = ?1
                 ORDER BY version DESC",
            )?;
            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        old_content: row.get(2)?,
                        edited_by: row.get(3)?,
                        edited_at: row.get(4)?,
                        version: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Threads --

    /// Follow parent pointers up to the message that has none.
    pub fn thread_root(&self, id: &str) -> Result<MessageRow> {
        let arena = self.load_ancestors(id)?;
        let root = arena.root_of(id)?;
        if root.parent_id.is_some() {
            return Err(StoreError::Corrupt(format!(
                "reply chain of message {} is deeper than {} levels",
                id, MAX_THREAD_DEPTH
            )));
        }
        Ok(root.clone())
    }

    /// Load `id` and its ancestors in one query, at most `MAX_THREAD_DEPTH`
    /// levels up. The depth bound keeps a looping chain finite.
    fn load_ancestors(&self, id: &str) -> Result<ThreadArena> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH RECURSIVE chain(id, parent_id, depth) AS (
                     SELECT id, parent_id, 0 FROM messages WHERE id = ?1
                     UNION
                     SELECT p.id, p.parent_id, chain.depth + 1
                     FROM messages p JOIN chain ON p.id = chain.parent_id
                     WHERE chain.depth < ?2
                 )
                 {} WHERE m.id IN (SELECT id FROM chain)",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![id, MAX_THREAD_DEPTH as i64], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ThreadArena::from_rows(rows))
        })
    }

    /// Load `id` and its descendants down to `max_depth` levels in one query.
    pub fn load_subtree(&self, id: &str, max_depth: usize) -> Result<ThreadArena> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH RECURSIVE subtree(id, depth) AS (
                     SELECT id, 0 FROM messages WHERE id = ?1
                     UNION
                     SELECT c.id, subtree.depth + 1
                     FROM messages c JOIN subtree ON c.parent_id = subtree.id
                     WHERE subtree.depth < ?2
                 )
                 {} WHERE m.id IN (SELECT id FROM subtree)",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![id, max_depth as i64], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if rows.is_empty() {
                return Err(StoreError::not_found("message", id));
            }
            Ok(ThreadArena::from_rows(rows))
        })
    }

    /// Replies below `id`, at most `max_depth` levels deep. Deeper replies are
    /// left out.
    pub fn all_replies(&self, id: &str, max_depth: usize) -> Result<Vec<MessageRow>> {
        let arena = self.load_subtree(id, max_depth)?;
        Ok(arena.descendants(id, max_depth).into_iter().cloned().collect())
    }

    /// The whole thread `id` belongs to, starting at its root.
    pub fn thread(&self, id: &str, max_depth: usize) -> Result<ThreadNode> {
        let root = self.thread_root(id)?;
        let arena = self.load_subtree(&root.id, max_depth)?;
        arena
            .tree(&root.id, max_depth)
            .ok_or_else(|| StoreError::not_found("message", &root.id))
    }

    /// Root messages exchanged between two users, newest first, each with its
    /// reply tree.
    pub fn threaded_conversation(
        &self,
        user_id: &str,
        partner_id: &str,
        limit: u32,
        max_depth: usize,
    ) -> Result<Vec<ThreadNode>> {
        let filter = MessageFilter {
            with_user: Some(partner_id.to_string()),
            roots_only: true,
            order: SortOrder::NewestFirst,
            ..MessageFilter::involving(user_id)
        };
        let roots = self.list_messages(&filter, limit, 0)?;

        let mut threads = Vec::with_capacity(roots.len());
        for root in roots {
            let arena = self.load_subtree(&root.id, max_depth)?;
            if let Some(tree) = arena.tree(&root.id, max_depth) {
                threads.push(tree);
            }
        }
        Ok(threads)
    }
}

fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation("content must not be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(StoreError::Validation(format!(
            "content exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    Ok(())
}

fn refresh_reply_count(conn: &Connection, parent_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE messages
         SET reply_count = (SELECT COUNT(*) FROM messages c WHERE c.parent_id = ?1)
         WHERE id = ?1",
        [parent_id],
    )?;
    Ok(())
}

pub(crate) fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
    Ok(conn.query_row(&sql, [id], map_message).optional()?)
}

fn query_messages(
    conn: &Connection,
    filter: &MessageFilter,
    limit: u32,
    offset: u64,
) -> Result<Vec<MessageRow>> {
    let (where_sql, mut values) = filter.where_clause();
    values.push((limit as i64).into());
    values.push((offset as i64).into());

    let order = filter.order.sql();
    let sql = format!(
        "{} {} ORDER BY m.created_at {}, m.rowid {} LIMIT ? OFFSET ?",
        MESSAGE_SELECT, where_sql, order, order
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
