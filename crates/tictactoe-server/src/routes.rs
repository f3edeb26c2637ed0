use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use tictactoe_core::protocol::{AuthPollResponse, DeviceAuthResponse, PlayerStats, UserInfo};

use crate::db;
use crate::error::AppError;
use crate::identity::{self, bearer_token};
use crate::state::{AppState, PendingLogin};
use crate::ws;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Device Auth (GitHub or Dev Mode) ────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GhDeviceCode {
    user_code: String,
    device_code: String,
    verification_uri: String,
    interval: u64,
}

pub async fn device_auth(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeviceAuthResponse>, AppError> {
    let Some(client_id) = state.config.github_client_id.as_deref() else {
        // Dev mode: generate a fake code that poll will recognize
        let n = state.dev_counter.fetch_add(1, Ordering::Relaxed);
        let user_code = format!("DEV-{:04}", n);
        state.pending_logins.insert(
            user_code.clone(),
            PendingLogin::Dev {
                username: format!("dev_player_{}", n),
            },
        );

        return Ok(Json(DeviceAuthResponse {
            user_code,
            verification_uri: "http://localhost (dev mode - no action needed)".to_string(),
            interval: 1,
        }));
    };

    let body: GhDeviceCode = state
        .http
        .post("https://github.com/login/device/code")
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("scope", "read:user")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    state.pending_logins.insert(
        body.user_code.clone(),
        PendingLogin::GitHub {
            device_code: body.device_code,
        },
    );

    Ok(Json(DeviceAuthResponse {
        user_code: body.user_code,
        verification_uri: body.verification_uri,
        interval: body.interval,
    }))
}

// ── Auth Poll ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthPollRequest {
    pub user_code: String,
}

#[derive(Deserialize)]
struct GhTokenResp {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct GhUser {
    id: u64,
    login: String,
    avatar_url: String,
}

pub async fn auth_poll(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AuthPollRequest>,
) -> Result<Json<AuthPollResponse>, AppError> {
    let pending = state
        .pending_logins
        .get(&req.user_code)
        .map(|p| p.value().clone());

    let device_code = match pending {
        None => return Ok(Json(AuthPollResponse::Expired)),
        Some(PendingLogin::Dev { username }) => {
            // Username doubles as the external id for dev accounts.
            let user_id = db::upsert_user(&state.db, &username, &username, "").await?;
            let token = db::create_session(&state.db, user_id).await?;
            state.pending_logins.remove(&req.user_code);

            info!(username = %username, user_id, "dev user authenticated");
            return Ok(Json(AuthPollResponse::Complete { token, username }));
        }
        Some(PendingLogin::GitHub { device_code }) => device_code,
    };

    let client_id = state
        .config
        .github_client_id
        .as_deref()
        .ok_or(AppError::Misconfigured("GITHUB_CLIENT_ID"))?;

    let token_resp: GhTokenResp = state
        .http
        .post("https://github.com/login/oauth/access_token")
        .header("Accept", "application/json")
        .form(&[
            ("client_id", client_id),
            ("device_code", device_code.as_str()),
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
        ])
        .send()
        .await?
        .json()
        .await?;

    let Some(access_token) = token_resp.access_token else {
        return match token_resp.error.as_deref() {
            Some("authorization_pending") | Some("slow_down") => {
                Ok(Json(AuthPollResponse::Pending))
            }
            _ => {
                state.pending_logins.remove(&req.user_code);
                Ok(Json(AuthPollResponse::Expired))
            }
        };
    };

    let user: GhUser = state
        .http
        .get("https://api.github.com/user")
        .bearer_auth(&access_token)
        .header("User-Agent", "tictactoe-server")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let user_id =
        db::upsert_user(&state.db, &user.id.to_string(), &user.login, &user.avatar_url).await?;
    let token = db::create_session(&state.db, user_id).await?;
    state.pending_logins.remove(&req.user_code);

    info!(username = %user.login, user_id, "github user authenticated");
    Ok(Json(AuthPollResponse::Complete {
        token,
        username: user.login,
    }))
}

// ── Account ─────────────────────────────────────────────────────────────

pub async fn current_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let user = db::get_session_user(&state.db, token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(UserInfo {
        id: user.id,
        username: user.username,
        avatar_url: user.avatar_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub player_id: Option<i64>,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<PlayerStats>, AppError> {
    let player_id = query
        .player_id
        .ok_or_else(|| AppError::BadRequest("missing player_id".into()))?;
    let row = db::get_stats(&state.db, player_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(PlayerStats {
        player_id: row.user_id,
        wins: row.wins,
        losses: row.losses,
        draws: row.draws,
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    db::delete_session(&state.db, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub game: String,
    pub token: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let game_id = identity::validate_game_id(&query.game)?;

    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(AppError::Unauthorized)?;
    let identity = identity::authenticate(&state.db, token).await?;

    let current = state.connection_count.load(Ordering::Relaxed);
    if current >= state.config.max_connections {
        return Err(AppError::ServiceUnavailable);
    }

    Ok(ws.on_upgrade(move |socket| ws::handle_socket(state, socket, identity, game_id)))
}
