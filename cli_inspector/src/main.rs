use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use session_core::{
    load_dashboard_config_from_env, spawn_session, LogForwardLayer, WebSocketConnector,
    DIAGNOSTICS_TARGET,
};
use tracing::info;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod app;
mod ui;

use app::InspectorApp;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dooders experiment inspector", long_about = None)]
struct Cli {
    /// WebSocket endpoint streaming experiment snapshots.
    #[arg(long)]
    endpoint: Option<String>,
    /// Steps used by `s` and by a bare `start`.
    #[arg(long)]
    steps: Option<u32>,
    /// Agents used by `s` and by a bare `start`.
    #[arg(long)]
    agents: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Diagnostics reach the log pane through their own listener.
    let (log_layer, log_rx) = LogForwardLayer::channel();
    let log_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("{DIAGNOSTICS_TARGET}=off").parse()?);
    tracing_subscriber::registry()
        .with(log_layer.with_filter(log_filter))
        .init();

    let cli = Cli::parse();
    let (loaded, metadata) = load_dashboard_config_from_env();
    let mut config = (*loaded).clone();
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(steps) = cli.steps {
        config.default_steps = steps;
    }
    if let Some(agents) = cli.agents {
        config.default_agents = agents;
    }
    info!(
        endpoint = %config.endpoint,
        config_path = ?metadata.path(),
        "inspector.starting"
    );

    let session = spawn_session(&config, Arc::new(WebSocketConnector));
    session.open().await;

    let runtime = tokio::runtime::Handle::current();
    let app_session = session.clone();
    let ui = tokio::task::spawn_blocking(move || -> Result<()> {
        let app = InspectorApp::new(app_session, runtime, &config, log_rx)?;
        app.run()
    });
    let outcome = ui.await?;

    session.shutdown().await;
    info!("inspector.stopped");
    outcome
}
