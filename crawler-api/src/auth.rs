use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// Identifies the caller for the remainder of the request, set by
/// [`require_auth`] and pulled out of extensions by downstream handlers.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub i64);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(user_id: i64, secret: &str, expiry_seconds: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(expiry_seconds)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::from)
}

fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Extracts the caller's identity from either a bearer JWT or HTTP Basic
/// credentials and stashes it as a request extension for downstream
/// extractors. Bearer tokens are additionally checked against the
/// `revoked_tokens` table so that a logged-out token stops working
/// immediately, not merely at `exp`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;

    let user_id = if let Some(token) = header_value.strip_prefix("Bearer ") {
        authenticate_bearer(token, &state).await?
    } else if let Some(encoded) = header_value.strip_prefix("Basic ") {
        authenticate_basic(encoded, &state).await?
    } else {
        return Err(ApiError::Unauthenticated);
    };

    request.extensions_mut().insert(UserId(user_id));
    Ok(next.run(request).await)
}

async fn authenticate_bearer(token: &str, state: &AppState) -> Result<i64, ApiError> {
    let claims = decode_token(token, &state.config.jwt_secret).map_err(|_| ApiError::Unauthenticated)?;

    let revoked = sqlx::query_scalar!(
        "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = $1 AND expires_at > now())",
        claims.jti
    )
    .fetch_one(&state.db)
    .await?
    .unwrap_or(false);
    if revoked {
        return Err(ApiError::Unauthenticated);
    }

    claims
        .sub
        .parse::<i64>()
        .map_err(|_| ApiError::Unauthenticated)
}

async fn authenticate_basic(encoded: &str, state: &AppState) -> Result<i64, ApiError> {
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ApiError::Unauthenticated)?;
    let text = String::from_utf8(decoded).map_err(|_| ApiError::Unauthenticated)?;
    let (username, password) = text.split_once(':').ok_or(ApiError::Unauthenticated)?;

    let row = sqlx::query!(
        "SELECT id, password_hash FROM users WHERE username = $1",
        username
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or(ApiError::Unauthenticated)?;

    if !verify_password(password, &row.password_hash) {
        return Err(ApiError::Unauthenticated);
    }
    Ok(row.id)
}
