use axum::extract::State;
use axum::Json;
use cumple_core::dispatch::RunSummary;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub ok: bool,
    pub msg: String,
    #[serde(flatten)]
    pub summary: RunSummary,
}

/// GET|POST /run — one synchronous reminder run.
///
/// The run lock is taken before the blocking task is spawned so a second
/// trigger gets its 409 immediately.
pub async fn run(State(app): State<AppState>) -> Result<Json<RunResponse>, AppError> {
    let notifier = app.notifier.clone();
    let guard = notifier.reserve()?;
    let today = app.today();
    let summary = tokio::task::spawn_blocking(move || notifier.run_reserved(guard, today))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(RunResponse {
        ok: true,
        msg: "OK".to_string(),
        summary,
    }))
}
