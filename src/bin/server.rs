//! KeelDB - TCP server

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use keeldb::server::{Server, ServerConfig};
use keeldb::EngineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::new();
    let mut engine = EngineConfig::new();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        let mut value = || args.next().with_context(|| format!("{} needs a value", arg));
        match arg.as_str() {
            "--port" | "-p" => {
                let port = value()?;
                config = config.port(port.parse().with_context(|| format!("invalid port '{}'", port))?);
            }
            "--host" => config = config.host(value()?),
            "--data-dir" => engine = engine.data_dir(value()?),
            "--lock-timeout-ms" => {
                let ms: u64 = value()?.parse().context("invalid --lock-timeout-ms")?;
                engine = engine.lock_timeout(Duration::from_millis(ms));
            }
            other => bail!("unknown argument '{}'", other),
        }
    }
    Ok(config.engine(engine))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = parse_args()?;
    info!(data_dir = ?config.engine.data_dir, "Starting KeelDB server");
    let server = Server::new(config).context("failed to open database")?;

    tokio::select! {
        result = server.run() => result.context("server error")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
