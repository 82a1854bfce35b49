use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::NewUser;
use parley_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use parley_types::models::{Role, User};

use crate::cache::QueryCache;
use crate::convert;
use crate::db_call;
use crate::error::ApiError;
use crate::extract::Json;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// Levels of replies shown below a message.
    pub reply_depth: usize,
    pub search_cache: QueryCache<Vec<User>>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req)?;

    let (user, token) = db_call(&state, move |state| {
        let username = req.username.trim().to_string();
        let email = req.email.trim().to_lowercase();
        if state.db.username_or_email_taken(&username, &email)? {
            return Err(ApiError::Conflict("username or email already taken".into()));
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?
            .to_string();

        let row = state.db.create_user(&NewUser {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            phone_number: req.phone_number.filter(|p| !p.trim().is_empty()),
            role: Role::Guest.as_str().to_string(),
            password_hash,
        })?;
        state.search_cache.invalidate_all();

        let user = convert::user(row)?;
        let token = create_token(state, &user)?;
        Ok((user, token))
    })
    .await?;

    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, token) = db_call(&state, move |state| {
        let row = state
            .db
            .get_user_by_username(&req.username)?
            .ok_or(ApiError::Unauthorized)?;

        // Verify password
        let parsed_hash = PasswordHash::new(&row.password)
            .map_err(|e| ApiError::Internal(format!("stored hash unreadable: {}", e)))?;
        if Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_err()
        {
            warn!(username = %req.username, "Failed login");
            return Err(ApiError::Unauthorized);
        }

        let user = convert::user(row)?;
        let token = create_token(state, &user)?;
        Ok((user, token))
    })
    .await?;

    Ok(Json(AuthResponse { user, token }))
}

fn create_token(state: &AppStateInner, user: &User) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(state.token_ttl_days)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let username_len = req.username.trim().chars().count();
    if !(3..=32).contains(&username_len) {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    let email = req.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(ApiError::BadRequest("email address is invalid".into())),
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("first and last name are required".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }
    if req.password != req.password_confirm {
        return Err(ApiError::BadRequest("passwords do not match".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        RegisterRequest {
            username: "ada".into(),
            email: "ada@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: None,
            password: "correct horse".into(),
            password_confirm: "correct horse".into(),
        }
    }

    #[test]
    fn accepts_valid_registration() {
        assert!(validate_registration(&request()).is_ok());
    }

    #[test]
    fn rejects_bad_fields() {
        let short = RegisterRequest { username: "ab".into(), ..request() };
        let email = RegisterRequest { email: "ada.example.com".into(), ..request() };
        let name = RegisterRequest { last_name: " ".into(), ..request() };
        let weak = RegisterRequest {
            password: "short".into(),
            password_confirm: "short".into(),
            ..request()
        };
        let mismatch = RegisterRequest { password_confirm: "different!".into(), ..request() };
        for req in [short, email, name, weak, mismatch] {
            assert!(matches!(validate_registration(&req), Err(ApiError::BadRequest(_))));
        }
    }
}
