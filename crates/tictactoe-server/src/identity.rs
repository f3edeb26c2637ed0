use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use sqlx::SqlitePool;

use crate::db;
use crate::error::AppError;

pub type PlayerId = i64;

/// Who is on the other end of a connection, as vouched for by the sessions table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: PlayerId,
    pub name: String,
    pub avatar_url: Option<String>,
}

const MAX_GAME_ID_LEN: usize = 64;

/// Resolve a session token to the player it belongs to.
pub async fn authenticate(pool: &SqlitePool, token: &str) -> Result<Identity, AppError> {
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    let user = db::get_session_user(pool, token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Identity {
        id: user.id,
        name: user.username,
        avatar_url: Some(user.avatar_url).filter(|url| !url.is_empty()),
    })
}

/// Token from `Authorization`, with or without a `Bearer` prefix.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}

/// Game ids are caller-chosen, so keep them short and URL-safe.
pub fn validate_game_id(raw: &str) -> Result<String, AppError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(AppError::BadRequest("missing game id".into()));
    }
    if id.len() > MAX_GAME_ID_LEN {
        return Err(AppError::BadRequest("game id too long".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::BadRequest("game id has invalid characters".into()));
    }
    Ok(id.to_string())
}
