pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::{middleware, Router};
use state::AppState;
use tower_http::trace::TraceLayer;

/// Build the axum Router with the trigger routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let triggers = Router::new()
        .route("/run", get(routes::run::run).post(routes::run::run))
        .route(
            "/warmup",
            get(routes::warmup::warmup).post(routes::warmup::warmup),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::key_middleware,
        ));

    Router::new()
        .route("/", get(routes::health::health))
        .route("/qr", get(routes::qr::qr))
        .merge(triggers)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the trigger server on a pre-bound listener.
pub async fn serve_on(app_state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let port = listener.local_addr()?.port();
    let app = build_router(app_state);

    tracing::info!("cumple listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
