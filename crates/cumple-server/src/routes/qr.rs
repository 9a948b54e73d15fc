use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

/// GET /qr — the last readiness snapshot as PNG.
pub async fn qr(State(app): State<AppState>) -> Result<Response, AppError> {
    let notifier = app.notifier.clone();
    let png = tokio::task::spawn_blocking(move || notifier.snapshot())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    match png {
        Some(bytes) => Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response()),
        None => Err(AppError::not_found(
            "no snapshot yet, trigger /warmup first",
        )),
    }
}
