use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Role, User};

// -- JWT Claims --

/// Bearer token payload, shared by the auth handlers and the middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountDeleted {
    pub sent_messages: usize,
    pub received_messages: usize,
    pub notifications: usize,
    pub history_rows: usize,
    pub memberships: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
}

/// Body of both replies and edits.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxResponse {
    pub sent: Vec<Message>,
    pub received: Vec<Message>,
}

// -- Notifications --

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkedRead {
    pub updated: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
}

// -- Pagination --

/// One page of a list endpoint. `next` and `previous` are relative links that
/// keep the request's other query parameters.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub page_size: u32,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
