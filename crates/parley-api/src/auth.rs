use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};

use parley_crypto::password;
use parley_db::{Database, unique_violation};
use parley_gateway::presence::Presence;
use parley_gateway::throttle::{Decision, LoginThrottle};
use parley_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use parley_types::error::ChatError;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Shared with the channel gateway: one lockout state per source
    /// address, whichever door is being hammered.
    pub throttle: Arc<LoginThrottle>,
    /// Direct-variant presence; feeds the contact list's online flags.
    pub presence: Presence,
    pub upload_dir: PathBuf,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ChatError::InvalidCredentials.into());
    }
    if req.password.len() < 8 {
        return Err(ChatError::InvalidCredentials.into());
    }

    let db = state.db.clone();
    let username = req.username.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<(), ChatError> {
        let digest = password::hash_password(&req.password)?;
        match db.create_direct_user(&username, &digest) {
            Ok(()) => Ok(()),
            Err(e) if unique_violation(&e) => Err(ChatError::UsernameTaken),
            Err(e) => Err(ChatError::Internal(e)),
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("register task failed: {}", e))?;
    created?;

    info!("direct account registered: {}", req.username);

    let token = create_token(&state.jwt_secret, &req.username)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            username: req.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = addr.ip().to_string();

    let db = state.db.clone();
    let throttle = state.throttle.clone();
    let username = req.username.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        verify_direct_login(&db, &throttle, &source, &username, &req.password)
    })
    .await
    .map_err(|e| anyhow::anyhow!("login task failed: {}", e))?;
    outcome?;

    info!("{} logged in from {}", req.username, addr);

    let token = create_token(&state.jwt_secret, &req.username)?;
    Ok(Json(AuthResponse {
        username: req.username,
        token,
    }))
}

/// Stateless tokens: logout is client-side discard. The endpoint exists
/// for interface parity and always succeeds for an authenticated caller.
pub async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// One throttled login attempt against the direct credential table.
/// Blocking (argon2 + SQLite); callers wrap it in `spawn_blocking`.
pub fn verify_direct_login(
    db: &Database,
    throttle: &LoginThrottle,
    source: &str,
    username: &str,
    pass: &str,
) -> Result<(), ChatError> {
    if let Decision::Locked { remaining_secs } = throttle.check(source) {
        return Err(ChatError::RateLimited(remaining_secs));
    }

    let verified = match db.get_direct_user(username) {
        Ok(Some(row)) => password::verify_password(pass, &row.password).unwrap_or_else(|e| {
            error!("stored digest for {} is malformed: {}", username, e);
            false
        }),
        Ok(None) => false,
        Err(e) => {
            error!("credential lookup failed for {}: {}", username, e);
            false
        }
    };

    if verified {
        throttle.record_success(source);
        Ok(())
    } else {
        throttle.record_failure(source);
        Err(ChatError::InvalidCredentials)
    }
}

fn create_token(secret: &str, username: &str) -> Result<String, ChatError> {
    let claims = Claims {
        sub: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Internal(anyhow::anyhow!("token encoding failed: {}", e)))
}
