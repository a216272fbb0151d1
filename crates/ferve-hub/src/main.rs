use anyhow::{bail, Context};
use ferve_hub::{
    config::{load_config, HubConfig},
    logging::init_logging,
    server::{serve, AppState},
    services::projects::ProjectRegistry,
    telemetry::SysinfoSampler,
};
use std::net::SocketAddr;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = load_config();
    let log_guard = init_logging(&config);
    let log_file = log_guard
        .as_ref()
        .and_then(|guard| guard.path())
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "stdout only".to_string());
    if let Err(err) = run(config, &log_file).await {
        error!(event = "hub_error", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config: HubConfig, log_file: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid address {}", config.addr))?;
    if !addr.ip().is_loopback() {
        bail!("refusing to listen on non-loopback address {addr}");
    }

    let registry = ProjectRegistry::load_or_init(&config.projects_file)
        .context("loading project registry")?;
    let state = AppState::new(&config, registry);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let telemetry = state
        .hub
        .spawn_telemetry(SysinfoSampler::new(), config.stats_interval);

    info!(
        event = "hub_start",
        addr = %addr,
        projects = %config.projects_file.display(),
        downloads = %config.downloads_dir.display(),
        log_file = log_file
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = serve(listener, state, shutdown).await;
    telemetry.abort();
    result.context("server stopped")?;
    info!(event = "hub_stop");
    Ok(())
}
