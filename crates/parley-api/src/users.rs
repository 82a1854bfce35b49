use axum::{
    Extension,
    extract::State,
    http::Uri,
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use parley_db::filters::UserFilter;
use parley_db::timestamp;
use parley_types::api::AccountDeleted;
use parley_types::models::Role;

use crate::auth::AppState;
use crate::convert;
use crate::db_call;
use crate::error::ApiError;
use crate::extract::{Json, Path, Query};
use crate::middleware::Claims;
use crate::pagination::{PageRequest, USER_PAGES};

const SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u64>,
    pub page_size: Option<u32>,
    pub name: Option<String>,
    pub email_domain: Option<String>,
    pub q: Option<String>,
    pub joined_after: Option<NaiveDate>,
    pub joined_before: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, USER_PAGES)?;
    let filter = UserFilter {
        name: non_blank(query.name),
        email_domain: non_blank(query.email_domain),
        search: non_blank(query.q),
        exclude_id: None,
        joined_after: query.joined_after.map(timestamp::start_of_day),
        joined_before: query.joined_before.map(timestamp::end_of_day),
    };

    let (count, rows) = db_call(&state, move |state| {
        let count = state.db.count_users(&filter)?;
        let rows = state.db.list_users(&filter, page.limit(), page.offset())?;
        Ok((count, rows))
    })
    .await?;

    Ok(Json(page.finish(count, convert::users(rows)?, &uri)?))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = claims.sub.to_string();
    let row = db_call(&state, move |state| {
        state
            .db
            .get_user_by_id(&id)?
            .ok_or_else(|| ApiError::NotFound("user not found".into()))
    })
    .await?;
    Ok(Json(convert::user(row)?))
}

/// Up to ten users matching first name, last name, email or username,
/// excluding the caller. Results are cached per query text.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let q = non_blank(query.q)
        .ok_or_else(|| ApiError::BadRequest("search query parameter 'q' is required".into()))?;

    let key = format!("users/search?q={}&exclude={}", q, claims.sub);
    if let Some(hit) = state.search_cache.get(&key) {
        return Ok(Json(hit));
    }

    let filter = UserFilter {
        search: Some(q),
        exclude_id: Some(claims.sub.to_string()),
        ..UserFilter::default()
    };
    let rows = db_call(&state, move |state| {
        Ok(state.db.list_users(&filter, SEARCH_LIMIT, 0)?)
    })
    .await?;

    let users = convert::users(rows)?;
    state.search_cache.insert(key, users.clone());
    Ok(Json(users))
}

/// Profiles are visible to their owner and to admins.
pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.sub != user_id && claims.role != Role::Admin {
        return Err(ApiError::Forbidden("you can only view your own profile".into()));
    }
    let row = db_call(&state, move |state| {
        state
            .db
            .get_user_by_id(&user_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("user not found".into()))
    })
    .await?;
    Ok(Json(convert::user(row)?))
}

/// Delete the caller's account and everything that references it.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = claims.sub.to_string();
    let report = db_call(&state, move |state| {
        let report = state.db.delete_user(&id)?;
        state.search_cache.invalidate_all();
        Ok(report)
    })
    .await?;

    info!(user_id = %claims.sub, "Account deleted on request");
    Ok(Json(AccountDeleted {
        sent_messages: report.sent_messages,
        received_messages: report.received_messages,
        notifications: report.notifications,
        history_rows: report.history_rows,
        memberships: report.memberships,
    }))
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
