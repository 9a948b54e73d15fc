use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET|POST /warmup — open the messaging session in the background.
///
/// Returns 202 at once. The readiness snapshot (the pairing code on a fresh
/// profile) shows up under `/qr` once the probe finishes.
pub async fn warmup(
    State(app): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let notifier = app.notifier.clone();
    let guard = notifier.reserve()?;
    tokio::task::spawn_blocking(move || {
        if let Err(e) = notifier.warmup_reserved(guard) {
            tracing::warn!(error = %e, "warm-up failed");
        }
    });
    let body = serde_json::json!({
        "ok": true,
        "msg": "warm-up started, open /qr in a few seconds",
    });
    Ok((StatusCode::ACCEPTED, Json(body)))
}
