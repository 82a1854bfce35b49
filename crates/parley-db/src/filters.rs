//! WHERE-clause builders for the list queries. Every builder returns SQL using
//! anonymous `?` placeholders plus the matching values, in order.

use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            SortOrder::NewestFirst => "DESC",
            SortOrder::OldestFirst => "ASC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Caller must be sender or receiver.
    pub involving: Option<String>,
    pub sender: Option<String>,
    pub receiver: Option<String>,
    /// Other party. Combined with `involving` this selects one pair of users.
    pub with_user: Option<String>,
    /// Both sender and receiver are participants of this conversation.
    pub conversation: Option<String>,
    /// Case-insensitive substring match on content.
    pub search: Option<String>,
    pub sent_after: Option<String>,
    pub sent_before: Option<String>,
    pub roots_only: bool,
    pub order: SortOrder,
}

impl MessageFilter {
    pub fn involving(user_id: impl Into<String>) -> Self {
        Self {
            involving: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub(crate) fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        match (&self.involving, &self.with_user) {
            (Some(me), Some(other)) => {
                clauses.push(
                    "((m.sender_id = ? AND m.receiver_id = ?) OR (m.sender_id = ? AND m.receiver_id = ?))",
                );
                values.extend([me, other, other, me].map(|v| Value::Text(v.clone())));
            }
            (Some(me), None) => {
                clauses.push("(m.sender_id = ? OR m.receiver_id = ?)");
                values.extend([me, me].map(|v| Value::Text(v.clone())));
            }
            (None, Some(other)) => {
                clauses.push("(m.sender_id = ? OR m.receiver_id = ?)");
                values.extend([other, other].map(|v| Value::Text(v.clone())));
            }
            (None, None) => {}
        }
        if let Some(sender) = &self.sender {
            clauses.push("m.sender_id = ?");
            values.push(Value::Text(sender.clone()));
        }
        if let Some(receiver) = &self.receiver {
            clauses.push("m.receiver_id = ?");
            values.push(Value::Text(receiver.clone()));
        }
        if let Some(conversation) = &self.conversation {
            clauses.push(
                "m.sender_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = ?)
                 AND m.receiver_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = ?)",
            );
            values.push(Value::Text(conversation.clone()));
            values.push(Value::Text(conversation.clone()));
        }
        if let Some(search) = &self.search {
            clauses.push("m.content LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(search)));
        }
        if let Some(after) = &self.sent_after {
            clauses.push("m.created_at >= ?");
            values.push(Value::Text(after.clone()));
        }
        if let Some(before) = &self.sent_before {
            clauses.push("m.created_at <= ?");
            values.push(Value::Text(before.clone()));
        }
        if self.roots_only {
            clauses.push("m.parent_id IS NULL");
        }

        (join_clauses(&clauses), values)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// First or last name contains.
    pub name: Option<String>,
    pub email_domain: Option<String>,
    /// First name, last name, email or username contains.
    pub search: Option<String>,
    pub exclude_id: Option<String>,
    pub joined_after: Option<String>,
    pub joined_before: Option<String>,
}

impl UserFilter {
    pub(crate) fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = &self.name {
            clauses.push("(first_name LIKE ? ESCAPE '\\' OR last_name LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(name);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(domain) = &self.email_domain {
            clauses.push("email LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%@{}", escape_like(domain))));
        }
        if let Some(search) = &self.search {
            clauses.push(
                "(first_name LIKE ? ESCAPE '\\' OR last_name LIKE ? ESCAPE '\\'
                  OR email LIKE ? ESCAPE '\\' OR username LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(search);
            for _ in 0..4 {
                values.push(Value::Text(pattern.clone()));
            }
        }
        if let Some(id) = &self.exclude_id {
            clauses.push("id != ?");
            values.push(Value::Text(id.clone()));
        }
        if let Some(after) = &self.joined_after {
            clauses.push("created_at >= ?");
            values.push(Value::Text(after.clone()));
        }
        if let Some(before) = &self.joined_before {
            clauses.push("created_at <= ?");
            values.push(Value::Text(before.clone()));
        }

        (join_clauses(&clauses), values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentActivity {
    pub since: String,
    /// `true` keeps conversations with messages since `since`, `false` keeps
    /// the ones without.
    pub present: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationFilter {
    /// Only conversations this user participates in.
    pub member: String,
    pub title: Option<String>,
    /// Another user that must also participate.
    pub participant: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub recent_activity: Option<RecentActivity>,
}

impl ConversationFilter {
    pub fn for_member(user_id: impl Into<String>) -> Self {
        Self {
            member: user_id.into(),
            title: None,
            participant: None,
            created_after: None,
            created_before: None,
            recent_activity: None,
        }
    }

    pub(crate) fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> =
            vec!["c.id IN (SELECT conversation_id FROM conversation_participants WHERE user_id = ?)"];
        let mut values: Vec<Value> = vec![Value::Text(self.member.clone())];

        if let Some(title) = &self.title {
            clauses.push("c.title LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(title)));
        }
        if let Some(participant) = &self.participant {
            clauses.push(
                "c.id IN (SELECT conversation_id FROM conversation_participants WHERE user_id = ?)",
            );
            values.push(Value::Text(participant.clone()));
        }
        if let Some(after) = &self.created_after {
            clauses.push("c.created_at >= ?");
            values.push(Value::Text(after.clone()));
        }
        if let Some(before) = &self.created_before {
            clauses.push("c.created_at <= ?");
            values.push(Value::Text(before.clone()));
        }
        if let Some(recent) = &self.recent_activity {
            clauses.push(if recent.present {
                "EXISTS (SELECT 1 FROM messages m
                         WHERE m.created_at >= ?
                           AND m.sender_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = c.id)
                           AND m.receiver_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = c.id))"
            } else {
                "NOT EXISTS (SELECT 1 FROM messages m
                             WHERE m.created_at >= ?
                               AND m.sender_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = c.id)
                               AND m.receiver_id IN (SELECT user_id FROM conversation_participants WHERE conversation_id = c.id))"
            });
            values.push(Value::Text(recent.since.clone()));
        }

        (join_clauses(&clauses), values)
    }
}

fn join_clauses(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn like_pattern(raw: &str) -> String {
    format!("%{}%", escape_like(raw))
}
