use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::{Json, Router};
use axum::routing::post;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, issue_token, verify_password};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

/// `/auth/logout` is mounted separately since it sits behind the auth
/// middleware, unlike register/login.
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/auth/logout", post(logout))
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    id: i64,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("username and password are required".into()));
    }
    let password_hash = hash_password(&body.password)?;
    let id = sqlx::query_scalar!(
        "INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id",
        body.username,
        password_hash,
    )
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { id })))
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<LoginResponse>, ApiError> {
    let row = sqlx::query!(
        "SELECT id, password_hash FROM users WHERE username = $1",
        body.username
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(&body.password, &row.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    let token = issue_token(row.id, &state.config.jwt_secret, state.config.jwt_expiry_seconds)?;
    Ok(Json(LoginResponse { token }))
}

async fn logout(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<StatusCode, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthenticated)?;

    let claims = jsonwebtoken::decode::<crate::auth::Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )
    .map_err(|_| ApiError::Unauthenticated)?
    .claims;

    let expires_at = Utc::now()
        .checked_add_signed(Duration::seconds(claims.exp - Utc::now().timestamp()))
        .unwrap_or_else(Utc::now);

    sqlx::query!(
        "INSERT INTO revoked_tokens (jti, expires_at) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        claims.jti,
        expires_at,
    )
    .execute(&state.db)
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
