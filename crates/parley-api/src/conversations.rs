use axum::{
    Extension,
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use parley_db::filters::{ConversationFilter, MessageFilter, RecentActivity};
use parley_db::timestamp;
use parley_types::api::{AddParticipantRequest, CreateConversationRequest};
use parley_types::models::ConversationDetail;

use crate::auth::{AppState, AppStateInner};
use crate::convert;
use crate::db_call;
use crate::error::ApiError;
use crate::extract::{Json, Path, Query};
use crate::middleware::Claims;
use crate::pagination::{CONVERSATION_PAGES, MESSAGE_PAGES, PageRequest};
use crate::users::non_blank;

/// Window for `has_recent_messages`.
const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    pub page: Option<u64>,
    pub page_size: Option<u32>,
    pub title: Option<String>,
    pub participant: Option<Uuid>,
    pub created_after: Option<NaiveDate>,
    pub created_before: Option<NaiveDate>,
    pub has_recent_messages: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub page_size: Option<u32>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::new_v4().to_string();
    let creator = claims.sub.to_string();
    let title = non_blank(req.title);
    let participants: Vec<String> = req.participant_ids.iter().map(Uuid::to_string).collect();

    let detail = db_call(&state, move |state| {
        state
            .db
            .create_conversation(&id, title.as_deref(), &creator, &participants)?;
        detail(state, &id)
    })
    .await?;

    info!(conversation_id = %detail.conversation.id, "Conversation created via API");
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Conversations the caller takes part in, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ConversationListQuery>,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, CONVERSATION_PAGES)?;
    let filter = ConversationFilter {
        title: non_blank(query.title),
        participant: query.participant.map(|id| id.to_string()),
        created_after: query.created_after.map(timestamp::start_of_day),
        created_before: query.created_before.map(timestamp::end_of_day),
        recent_activity: query.has_recent_messages.map(|present| RecentActivity {
            since: timestamp::format(Utc::now() - Duration::hours(RECENT_WINDOW_HOURS)),
            present,
        }),
        ..ConversationFilter::for_member(claims.sub.to_string())
    };

    let (count, rows) = db_call(&state, move |state| {
        let count = state.db.count_conversations(&filter)?;
        let rows = state
            .db
            .list_conversations(&filter, page.limit(), page.offset())?
            .into_iter()
            .map(|c| state.db.refresh_conversation_stats(&c.id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((count, rows))
    })
    .await?;

    let results = rows
        .into_iter()
        .map(convert::conversation)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(page.finish(count, results, &uri)?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let id = conversation_id.to_string();
    let me = claims.sub.to_string();
    let detail = db_call(&state, move |state| {
        ensure_member(state, &id, &me)?;
        detail(state, &id)
    })
    .await?;
    Ok(Json(detail))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = conversation_id.to_string();
    let me = claims.sub.to_string();
    let user_id = req.user_id.to_string();
    let detail = db_call(&state, move |state| {
        ensure_member(state, &id, &me)?;
        state.db.add_participant(&id, &user_id)?;
        detail(state, &id)
    })
    .await?;
    Ok(Json(detail))
}

/// Messages exchanged among the conversation's participants.
pub async fn conversation_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, MESSAGE_PAGES)?;
    let id = conversation_id.to_string();
    let me = claims.sub.to_string();

    let (count, rows) = db_call(&state, move |state| {
        ensure_member(state, &id, &me)?;
        let filter = MessageFilter {
            conversation: Some(id),
            ..MessageFilter::default()
        };
        let count = state.db.count_messages(&filter)?;
        let rows = state.db.list_messages(&filter, page.limit(), page.offset())?;
        Ok((count, rows))
    })
    .await?;

    Ok(Json(page.finish(count, convert::messages(rows)?, &uri)?))
}

/// Missing conversations are 404, foreign ones 403.
fn ensure_member(state: &AppStateInner, conversation_id: &str, user_id: &str) -> Result<(), ApiError> {
    if state.db.get_conversation(conversation_id)?.is_none() {
        return Err(ApiError::NotFound("conversation not found".into()));
    }
    if !state.db.is_participant(conversation_id, user_id)? {
        return Err(ApiError::Forbidden(
            "you are not a participant in this conversation".into(),
        ));
    }
    Ok(())
}

fn detail(state: &AppStateInner, conversation_id: &str) -> Result<ConversationDetail, ApiError> {
    let conversation = state.db.refresh_conversation_stats(conversation_id)?;
    let participants = state
        .db
        .conversation_participants(conversation_id)?
        .into_iter()
        .map(convert::participant)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConversationDetail {
        conversation: convert::conversation(conversation)?,
        participants,
    })
}
