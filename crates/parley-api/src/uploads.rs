use axum::{
    Json,
    extract::{Multipart, State},
    response::IntoResponse,
};
use tracing::info;

use parley_types::api::{MessageKind, UploadResponse};
use parley_types::error::ChatError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Accept one multipart file field, store it under the upload directory as
/// `{unix_ts}_{sanitized_name}`, and answer with the URL it will be served
/// from plus the message kind derived from its extension.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // The file part may sit anywhere in the form; other fields are skipped.
    let field = loop {
        let next = multipart
            .next_field()
            .await
            .map_err(|e| anyhow::anyhow!("multipart read failed: {}", e))?;
        match next {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(ChatError::UploadRejected("no file").into()),
        }
    };

    let filename = field
        .file_name()
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .ok_or(ChatError::UploadRejected("no filename"))?;

    let data = field
        .bytes()
        .await
        .map_err(|e| anyhow::anyhow!("multipart body read failed: {}", e))?;

    let kind = kind_for_filename(&filename);
    let stored_name = format!("{}_{}", chrono::Utc::now().timestamp(), filename);

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| anyhow::anyhow!("creating upload dir: {}", e))?;
    let path = state.upload_dir.join(&stored_name);
    tokio::fs::write(&path, &data)
        .await
        .map_err(|e| anyhow::anyhow!("writing upload {}: {}", path.display(), e))?;

    info!("stored upload {} ({} bytes)", stored_name, data.len());

    Ok(Json(UploadResponse {
        url: format!("/uploads/{}", stored_name),
        kind,
    }))
}

/// Keep only characters that are safe in a bare filename. Path separators
/// become underscores and any leading run of dots and underscores is
/// trimmed, so `../../etc/passwd` collapses to `etc_passwd`.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

fn kind_for_filename(name: &str) -> MessageKind {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg") => MessageKind::Image,
        _ => MessageKind::File,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_tricks() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("photo (1).png"), "photo__1_.png");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn kind_follows_extension() {
        assert_eq!(kind_for_filename("cat.PNG"), MessageKind::Image);
        assert_eq!(kind_for_filename("notes.pdf"), MessageKind::File);
        assert_eq!(kind_for_filename("no_extension"), MessageKind::File);
    }

    #[tokio::test]
    async fn upload_takes_file_field_in_any_position() {
        use std::sync::Arc;
        use std::time::{SystemTime, UNIX_EPOCH};

        use axum::Router;
        use axum::body::Body;
        use axum::http::{Request, StatusCode, header};
        use axum::routing::post;
        use tower::ServiceExt;

        use crate::auth::AppStateInner;
        use parley_gateway::presence::Presence;
        use parley_gateway::throttle::LoginThrottle;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let upload_dir = std::env::temp_dir().join(format!("parley-upload-test-{}", nanos));

        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(parley_db::Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
            throttle: Arc::new(LoginThrottle::new()),
            presence: Presence::new(),
            upload_dir: upload_dir.clone(),
        });
        let app = Router::new().route("/upload", post(upload)).with_state(state);

        // The file part comes second, after an unrelated field.
        let boundary = "parleyboundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\nholiday\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\n\
             Content-Type: image/png\r\n\r\nnot a real png\r\n--{b}--\r\n",
            b = boundary
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let url = parsed["url"].as_str().unwrap();
        assert!(url.starts_with("/uploads/"));
        assert!(url.ends_with("_cat.png"));
        assert_eq!(parsed["kind"], "image");

        std::fs::remove_dir_all(&upload_dir).ok();
    }
}
