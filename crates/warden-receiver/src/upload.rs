use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header::CONTENT_LENGTH},
    response::{IntoResponse, Response},
    routing::post,
};
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

pub const AUTH_HEADER: &str = "x-auth-token";
pub const FILENAME_HEADER: &str = "x-filename";
const FALLBACK_FILE_NAME: &str = "received_file";

/// Status sent when the body ends before the declared length.
pub const INCOMPLETE_UPLOAD: u16 = 499;

#[derive(Debug, Clone)]
pub struct ReceiverState {
    pub token: Arc<str>,
    pub dir: PathBuf,
    pub retention_days: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Incomplete upload: got {got}/{expected} bytes")]
    Incomplete { got: u64, expected: u64 },
    #[error("Internal server error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn router(state: ReceiverState) -> Router {
    Router::new()
        .route("/", post(receive))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

fn text_error(code: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(status = code.as_u16(), %message, "upload rejected");
    (code, message).into_response()
}

/// Reduces the client-supplied name to its last path component.
pub fn sanitize_file_name(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

async fn receive(State(state): State<ReceiverState>, headers: HeaderMap, body: Body) -> Response {
    let token = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if token != Some(&*state.token) {
        return text_error(StatusCode::FORBIDDEN, "Forbidden: Invalid token");
    }

    let expected = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|len| *len > 0);
    let Some(expected) = expected else {
        return text_error(StatusCode::BAD_REQUEST, "Missing Content-Length");
    };

    let name = sanitize_file_name(headers.get(FILENAME_HEADER).and_then(|v| v.to_str().ok()));
    tracing::info!(file = %name, bytes = expected, "upload started");

    match store_upload(&state.dir, &name, expected, body.into_data_stream()).await {
        Ok(written) => {
            tracing::info!(file = %name, bytes = written, "upload stored");
            spawn_retention(state.dir.clone(), state.retention_days);
            (
                StatusCode::OK,
                format!("File '{name}' received successfully ({written} bytes)"),
            )
                .into_response()
        }
        Err(err @ UploadError::Incomplete { .. }) => {
            let code = StatusCode::from_u16(INCOMPLETE_UPLOAD).unwrap_or(StatusCode::BAD_REQUEST);
            text_error(code, err.to_string())
        }
        Err(err @ UploadError::Io(_)) => {
            tracing::error!(file = %name, error = %err, "upload failed");
            text_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Streams `body` into `<dir>/<name>.part` and renames it once `expected` bytes
/// arrived. The partial file is removed on every failure.
pub async fn store_upload<S, E>(
    dir: &Path,
    name: &str,
    expected: u64,
    body: S,
) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    tokio::fs::create_dir_all(dir).await?;
    let final_path = dir.join(name);
    let part_path = dir.join(format!("{name}.part"));

    let result = write_part(&part_path, expected, body).await;
    let result = match result {
        Ok(written) => tokio::fs::rename(&part_path, &final_path)
            .await
            .map(|()| written)
            .map_err(UploadError::from),
        Err(err) => Err(err),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&part_path).await;
    }
    result
}

async fn write_part<S, E>(part_path: &Path, expected: u64, mut body: S) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut file = tokio::fs::File::create(part_path).await?;
    let mut written = 0u64;
    while written < expected {
        let Some(chunk) = body.next().await else {
            break;
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, written, expected, "upload body interrupted");
                break;
            }
        };
        let room = usize::try_from(expected - written).unwrap_or(usize::MAX);
        let take = chunk.len().min(room);
        file.write_all(&chunk[..take]).await?;
        written += take as u64;
    }
    file.flush().await?;
    file.sync_all().await?;

    if written < expected {
        return Err(UploadError::Incomplete {
            got: written,
            expected,
        });
    }
    Ok(written)
}

fn spawn_retention(dir: PathBuf, days: u32) {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = warden_core::cleanup_old_archives(days, &dir) {
            tracing::error!(dir = %dir.display(), error = %err, "retention cleanup failed");
        }
    });
}
