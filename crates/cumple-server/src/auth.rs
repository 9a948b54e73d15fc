use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::Uri,
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Gate trigger endpoints behind `?key=<run_token>`.
///
/// Without a configured token every request passes through.
pub async fn key_middleware(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let Some(token) = app.run_token.as_deref() else {
        return next.run(req).await;
    };
    let supplied = extract_key_param(req.uri());
    if supplied.as_deref() == Some(token) {
        return next.run(req).await;
    }
    tracing::warn!(path = %req.uri().path(), "rejected trigger with bad key");
    Response::builder()
        .status(401)
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"ok":false,"msg":"Unauthorized"}"#))
        .expect("infallible: all header values are valid ASCII")
}

/// Percent-decoded value of the `key` query parameter.
fn extract_key_param(uri: &Uri) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.remove("key")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
