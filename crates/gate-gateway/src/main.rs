//! Gate Gateway - Main Entry Point

use gate_gateway::{serve, GateConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gate_gateway::telemetry::init();

    tracing::info!("Gate Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("GATE_CONFIG").unwrap_or_else(|_| "/etc/gate/gateway.toml".into());

    let config = match GateConfig::load(&config_path) {
        Ok(config) => config,
        Err(gate_gateway::ConfigError::Io { .. }) => {
            tracing::warn!(path = %config_path, "Config not found, using defaults");
            GateConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    serve(config).await
}
