use cumple_server::state::AppState;
use std::path::Path;

pub fn run(root: &Path, port: u16) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "{}", w.message);
    }
    let run_token = config.server.run_token.clone();
    if run_token.is_none() {
        tracing::warn!("no run_token configured, trigger endpoints are open");
    }
    let notifier = super::notifier(root, config)?;
    let state = AppState::new(notifier, run_token);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        tokio::select! {
            res = cumple_server::serve_on(state, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}
