use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_types::api::{Claims, UserPresence};

use crate::auth::AppState;
use crate::error::ApiError;

/// Contact list: every registered direct user except the caller, each with
/// a live online flag from the presence registry.
pub async fn get_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let me = claims.sub.clone();
    let usernames = tokio::task::spawn_blocking(move || db.list_direct_usernames(&me))
        .await
        .map_err(|e| anyhow::anyhow!("user list task failed: {}", e))??;

    let online = state.presence.snapshot().await;
    let users: Vec<UserPresence> = usernames
        .into_iter()
        .map(|username| {
            let online = online.contains(&username);
            UserPresence { username, online }
        })
        .collect();

    Ok(Json(users))
}
