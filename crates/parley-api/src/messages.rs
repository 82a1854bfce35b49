use axum::{
    Extension,
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use parley_db::filters::{MessageFilter, SortOrder};
use parley_db::models::{MessageRow, NewMessage};
use parley_db::timestamp;
use parley_types::api::{ContentRequest, InboxResponse, SendMessageRequest};

use crate::auth::AppState;
use crate::convert;
use crate::db_call;
use crate::error::ApiError;
use crate::extract::{Json, Path, Query};
use crate::middleware::Claims;
use crate::pagination::{MESSAGE_PAGES, PageRequest};
use crate::users::non_blank;

/// Messages per side in the inbox view.
const INBOX_LIMIT: u32 = 50;
const DEFAULT_THREAD_LIMIT: u32 = 20;
const MAX_THREAD_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    pub page: Option<u64>,
    pub page_size: Option<u32>,
    pub q: Option<String>,
    pub sender: Option<Uuid>,
    pub with_user: Option<Uuid>,
    pub sent_after: Option<DateTime<Utc>>,
    pub sent_before: Option<DateTime<Utc>>,
    pub sent_date_after: Option<NaiveDate>,
    pub sent_date_before: Option<NaiveDate>,
    #[serde(default)]
    pub roots_only: bool,
    pub ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadListQuery {
    pub limit: Option<u32>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewMessage {
        id: Uuid::new_v4().to_string(),
        sender_id: claims.sub.to_string(),
        receiver_id: Some(req.receiver_id.to_string()),
        content: req.content,
        parent_id: None,
    };
    let row = db_call(&state, move |state| Ok(state.db.send_message(&new)?)).await?;
    Ok((StatusCode::CREATED, Json(convert::message(row)?)))
}

/// Messages the caller sent or received.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessageListQuery>,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, MESSAGE_PAGES)?;
    let order = match query.ordering.as_deref() {
        None | Some("-timestamp") => SortOrder::NewestFirst,
        Some("timestamp") => SortOrder::OldestFirst,
        Some(other) => {
            return Err(ApiError::BadRequest(format!("unknown ordering: {}", other)));
        }
    };

    let sent_after = [
        query.sent_after.map(timestamp::format),
        query.sent_date_after.map(timestamp::start_of_day),
    ]
    .into_iter()
    .flatten()
    .max();
    let sent_before = [
        query.sent_before.map(timestamp::format),
        query.sent_date_before.map(timestamp::end_of_day),
    ]
    .into_iter()
    .flatten()
    .min();

    let filter = MessageFilter {
        sender: query.sender.map(|id| id.to_string()),
        with_user: query.with_user.map(|id| id.to_string()),
        search: non_blank(query.q),
        sent_after,
        sent_before,
        roots_only: query.roots_only,
        order,
        ..MessageFilter::involving(claims.sub.to_string())
    };

    let (count, rows) = db_call(&state, move |state| {
        let count = state.db.count_messages(&filter)?;
        let rows = state.db.list_messages(&filter, page.limit(), page.offset())?;
        Ok((count, rows))
    })
    .await?;

    Ok(Json(page.finish(count, convert::messages(rows)?, &uri)?))
}

/// Sent and received messages, fetched concurrently on two blocking workers.
pub async fn inbox(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let sent_filter = MessageFilter {
        sender: Some(me.clone()),
        ..MessageFilter::default()
    };
    let received_filter = MessageFilter {
        receiver: Some(me),
        ..MessageFilter::default()
    };

    let (sent, received) = tokio::join!(
        db_call(&state, move |state| Ok(state.db.list_messages(&sent_filter, INBOX_LIMIT, 0)?)),
        db_call(&state, move |state| Ok(state.db.list_messages(&received_filter, INBOX_LIMIT, 0)?)),
    );

    Ok(Json(InboxResponse {
        sent: convert::messages(sent?)?,
        received: convert::messages(received?)?,
    }))
}

/// Root messages between the caller and `partner_id`, newest first, each
/// with its reply tree.
pub async fn conversation_with(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(partner_id): Path<Uuid>,
    Query(query): Query<ThreadListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let partner = partner_id.to_string();
    let limit = query.limit.unwrap_or(DEFAULT_THREAD_LIMIT).clamp(1, MAX_THREAD_LIMIT);

    let threads = db_call(&state, move |state| {
        if state.db.get_user_by_id(&partner)?.is_none() {
            return Err(ApiError::NotFound("user not found".into()));
        }
        Ok(state
            .db
            .threaded_conversation(&me, &partner, limit, state.reply_depth)?)
    })
    .await?;

    let threads = threads
        .into_iter()
        .map(convert::thread)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(threads))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let row = db_call(&state, move |state| {
        let message = load_message(state, &message_id)?;
        ensure_participant(&message, &me)?;
        Ok(message)
    })
    .await?;
    Ok(Json(convert::message(row)?))
}

/// Only the sender may edit. Prior content is kept in the message history.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ContentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let row = db_call(&state, move |state| {
        let message = load_message(state, &message_id)?;
        ensure_sender(&message, &me, "edit")?;
        Ok(state.db.edit_message(&message.id, &me, &req.content)?)
    })
    .await?;
    Ok(Json(convert::message(row)?))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    db_call(&state, move |state| {
        let message = load_message(state, &message_id)?;
        ensure_sender(&message, &me, "delete")?;
        Ok(state.db.delete_message(&message.id)?)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reply to a message the caller sent or received. The receiver is the other
/// side of the parent.
pub async fn reply(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(parent_id): Path<Uuid>,
    Json(req): Json<ContentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let row = db_call(&state, move |state| {
        let parent = load_message(state, &parent_id)?;
        ensure_participant(&parent, &me)?;
        Ok(state.db.send_message(&NewMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: me,
            receiver_id: None,
            content: req.content,
            parent_id: Some(parent.id),
        })?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(convert::message(row)?)))
}

/// Replies below a message, flattened depth-first, down to the configured
/// reply depth.
pub async fn list_replies(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let rows = db_call(&state, move |state| {
        let message = load_message(state, &message_id)?;
        ensure_participant(&message, &me)?;
        Ok(state.db.all_replies(&message.id, state.reply_depth)?)
    })
    .await?;
    Ok(Json(convert::messages(rows)?))
}

/// The whole thread a message belongs to, from its root.
pub async fn get_thread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let tree = db_call(&state, move |state| {
        let message = load_message(state, &message_id)?;
        ensure_participant(&message, &me)?;
        Ok(state.db.thread(&message.id, state.reply_depth)?)
    })
    .await?;
    Ok(Json(convert::thread(tree)?))
}

pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let rows = db_call(&state, move |state| {
        let message = load_message(state, &message_id)?;
        ensure_participant(&message, &me)?;
        Ok(state.db.message_history(&message.id)?)
    })
    .await?;
    let history = rows
        .into_iter()
        .map(convert::history)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(history))
}

fn load_message(state: &crate::auth::AppStateInner, id: &Uuid) -> Result<MessageRow, ApiError> {
    state
        .db
        .get_message(&id.to_string())?
        .ok_or_else(|| ApiError::NotFound("message not found".into()))
}

fn ensure_participant(message: &MessageRow, user_id: &str) -> Result<(), ApiError> {
    if message.sender_id == user_id || message.receiver_id == user_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden("you are not part of this message".into()))
    }
}

fn ensure_sender(message: &MessageRow, user_id: &str, action: &str) -> Result<(), ApiError> {
    if message.sender_id == user_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("only the sender can {} a message", action)))
    }
}
