use std::collections::HashSet;
use std::ops::ControlFlow;

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{error, info};

use crate::filters::UserFilter;
use crate::models::{DeletionReport, NewUser, UserRow};
use crate::{Database, Result, StoreError, timestamp};

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, phone_number, role, password, created_at";

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        phone_number: row.get(5)?,
        role: row.get(6)?,
        password: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl Database {
    pub fn create_user(&self, user: &NewUser) -> Result<UserRow> {
        let created_at = timestamp::now();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, first_name, last_name, phone_number, role, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.first_name,
                    user.last_name,
                    user.phone_number,
                    user.role,
                    user.password_hash,
                    created_at,
                ],
            )?;
            query_user_by_id(conn, &user.id)?.ok_or_else(|| StoreError::not_found("user", &user.id))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, [username], map_user).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn username_or_email_taken(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 OR email = ?2)",
                [username, email],
                |row| row.get(0),
            )?;
            Ok(taken)
        })
    }

    pub fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        let (where_sql, values) = filter.where_clause();
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM users {}", where_sql);
            let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Users ordered newest first.
    pub fn list_users(&self, filter: &UserFilter, limit: u32, offset: u64) -> Result<Vec<UserRow>> {
        let (where_sql, mut values) = filter.where_clause();
        values.push((limit as i64).into());
        values.push((offset as i64).into());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
                USER_COLUMNS, where_sql
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One page of users in insertion order. Backing query for
    /// [`Database::lazy_paginate_users`].
    pub fn paginate_users(&self, page_size: u32, offset: u64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users ORDER BY rowid LIMIT ?1 OFFSET ?2",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![page_size, offset as i64], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Stream every user through `visit` one row at a time from a single
    /// cursor. Returning `ControlFlow::Break` stops the scan.
    pub fn for_each_user<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(UserRow) -> ControlFlow<()>,
    {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY rowid", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                if visit(map_user(row)?).is_break() {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Stream users in chunks of `batch_size` from one open cursor, without
    /// materializing the full result set. The final chunk may be short.
    pub fn stream_users_in_batches<F>(&self, batch_size: usize, mut visit: F) -> Result<()>
    where
        F: FnMut(Vec<UserRow>) -> ControlFlow<()>,
    {
        if batch_size == 0 {
            return Err(StoreError::Validation("batch size must be positive".into()));
        }

        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY rowid", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut batch = Vec::with_capacity(batch_size);

            while let Some(row) = rows.next()? {
                batch.push(map_user(row)?);
                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if visit(full).is_break() {
                        return Ok(());
                    }
                }
            }
            if !batch.is_empty() {
                let _ = visit(batch);
            }
            Ok(())
        })
    }

    /// Batch-stream users and hand every row that matches `predicate` to
    /// `on_match`. Returns the number of matches.
    pub fn filter_users_in_batches<P, F>(
        &self,
        batch_size: usize,
        predicate: P,
        mut on_match: F,
    ) -> Result<usize>
    where
        P: Fn(&UserRow) -> bool,
        F: FnMut(UserRow),
    {
        let mut matched = 0;
        self.stream_users_in_batches(batch_size, |batch| {
            for user in batch.into_iter().filter(|u| predicate(u)) {
                matched += 1;
                on_match(user);
            }
            ControlFlow::Continue(())
        })?;
        Ok(matched)
    }

    /// Delete an account together with everything that references it.
    ///
    /// The sweep runs explicitly on top of the schema's ON DELETE CASCADE rules
    /// and shares one transaction with the account row: any failure rolls the
    /// whole deletion back.
    pub fn delete_user(&self, user_id: &str) -> Result<DeletionReport> {
        let result = self.with_tx(|tx| {
            if query_user_by_id(tx, user_id)?.is_none() {
                return Err(StoreError::not_found("user", user_id));
            }

            // Parents outside the sweep whose reply_count will drop.
            let mut parents: HashSet<String> = HashSet::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT parent_id FROM messages
                     WHERE parent_id IS NOT NULL AND (sender_id = ?1 OR receiver_id = ?1)",
                )?;
                for parent in stmt.query_map([user_id], |row| row.get::<_, String>(0))? {
                    parents.insert(parent?);
                }
            }

            // History first, so rows on the user's own messages are counted
            // before the message cascade removes them.
            let history_rows =
                tx.execute("DELETE FROM message_history WHERE edited_by = ?1", [user_id])?;
            let report = DeletionReport {
                sent_messages: tx.execute("DELETE FROM messages WHERE sender_id = ?1", [user_id])?,
                received_messages: tx
                    .execute("DELETE FROM messages WHERE receiver_id = ?1", [user_id])?,
                notifications: tx.execute("DELETE FROM notifications WHERE user_id = ?1", [user_id])?,
                history_rows,
                memberships: tx.execute(
                    "DELETE FROM conversation_participants WHERE user_id = ?1",
                    [user_id],
                )?,
            };

            for parent in &parents {
                tx.execute(
                    "UPDATE messages
                     SET reply_count = (SELECT COUNT(*) FROM messages c WHERE c.parent_id = ?1)
                     WHERE id = ?1",
                    [parent],
                )?;
            }

            tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            Ok(report)
        });

        match &result {
            Ok(report) => info!(user_id, ?report, "Account deleted"),
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => error!(user_id, "Account deletion rolled back: {}", e),
        }
        result
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id], map_user).optional()?)
}

pub(crate) fn query_username(conn: &Connection, id: &str) -> Result<String> {
    conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| StoreError::not_found("user", id))
}
