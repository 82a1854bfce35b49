use axum::{
    Extension,
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_types::api::MarkedRead;

use crate::auth::AppState;
use crate::convert;
use crate::db_call;
use crate::error::ApiError;
use crate::extract::{Json, Path, Query};
use crate::middleware::Claims;
use crate::pagination::{MESSAGE_PAGES, PageRequest};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<u64>,
    pub page_size: Option<u32>,
    /// `true` for unread only, `false` for read only.
    pub unread: Option<bool>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NotificationQuery>,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, MESSAGE_PAGES)?;
    let me = claims.sub.to_string();
    let unread = query.unread;

    let (count, rows) = db_call(&state, move |state| {
        let count = state.db.count_notifications(&me, unread)?;
        let rows = state
            .db
            .list_notifications(&me, unread, page.limit(), page.offset())?;
        Ok((count, rows))
    })
    .await?;

    let results = rows
        .into_iter()
        .map(convert::notification)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(page.finish(count, results, &uri)?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    db_call(&state, move |state| {
        Ok(state
            .db
            .mark_notification_read(&notification_id.to_string(), &me)?)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let updated = db_call(&state, move |state| Ok(state.db.mark_all_notifications_read(&me)?)).await?;
    Ok(Json(MarkedRead { updated }))
}
