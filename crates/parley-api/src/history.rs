use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use parley_types::api::{Claims, DirectMessage, MessageKind};

use crate::auth::AppState;
use crate::error::ApiError;

/// Direct history with `partner`, ascending timestamp. Side effect first:
/// everything the partner sent the caller is marked seen, so the returned
/// rows already carry the updated flags.
pub async fn get_history(
    State(state): State<AppState>,
    Path(partner): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let me = claims.sub.clone();
    let rows = tokio::task::spawn_blocking(move || {
        db.mark_seen(&partner, &me)?;
        db.direct_history(&me, &partner)
    })
    .await
    .map_err(|e| anyhow::anyhow!("history task failed: {}", e))??;

    let messages: Vec<DirectMessage> = rows
        .into_iter()
        .map(|row| DirectMessage {
            id: row.id,
            sender: row.sender,
            recipient: row.recipient,
            body: row.body,
            kind: MessageKind::from_db(&row.kind),
            timestamp: row.timestamp,
            seen: row.seen,
        })
        .collect();

    Ok(Json(messages))
}
