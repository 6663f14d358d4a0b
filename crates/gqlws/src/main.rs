//! # gqlws
//!
//! Demo GraphQL subscription server: loads settings, serves the demo schema
//! over `graphql-ws`, and publishes a `ping` event on a fixed interval.

#![deny(unsafe_code)]

mod schema;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gqlws_core::logging::{LogFormat, init_subscriber};
use gqlws_server::{EventPublisher, GqlWsServer, SchemaExecutor, ServerConfig};
use gqlws_settings::{GqlWsSettings, load_settings_from_path, settings_path};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// GraphQL subscriptions over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "gqlws", about = "GraphQL subscriptions over WebSocket demo server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.gqlws/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between demo `ping` events (0 disables them).
    #[arg(long, default_value = "2")]
    ping_interval_secs: u64,

    /// Log filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Serve Prometheus metrics on `/metrics`.
    #[arg(long)]
    metrics: bool,
}

impl Cli {
    fn apply(&self, settings: &mut GqlWsSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Load settings. An explicit `--config` must load; the default path falls
/// back to defaults and reports why.
fn load_settings(cli: &Cli) -> Result<(GqlWsSettings, Option<String>)> {
    match &cli.config {
        Some(path) => {
            let settings = load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            Ok((settings, None))
        }
        None => match load_settings_from_path(&settings_path()) {
            Ok(settings) => Ok((settings, None)),
            Err(e) => Ok((GqlWsSettings::default(), Some(e.to_string()))),
        },
    }
}

/// Publish `("ping", "Blue")` every `interval` until shutdown.
async fn publish_pings(publisher: EventPublisher, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if publisher.publish("ping", "Blue").await.is_err() {
                    debug!("dispatcher gone, ping publisher exiting");
                    break;
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: they carry the log level.
    let (mut settings, load_warning) = load_settings(&cli)?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);
    if let Some(reason) = load_warning {
        warn!(reason = %reason, "failed to load settings file, using defaults");
    }

    let config = ServerConfig::from_settings(&settings);
    let executor = Arc::new(SchemaExecutor::new(schema::build_schema()));
    let mut server = GqlWsServer::new(config, executor);
    if cli.metrics {
        let handle = gqlws_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind listener")?;
    info!(
        "gqlws listening on ws://{addr}{} (health: http://{addr}/health)",
        server.config().path
    );

    if cli.ping_interval_secs > 0 {
        let pings = tokio::spawn(publish_pings(
            server.publisher().clone(),
            Duration::from_secs(cli.ping_interval_secs),
            server.shutdown().token(),
        ));
        server.shutdown().track(pings);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    server.shutdown_gracefully().await;
    let _ = handle.await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["gqlws"]);
        assert_eq!(cli.ping_interval_secs, 2);
        assert!(cli.host.is_none());
        assert!(!cli.metrics);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "gqlws",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--log-level",
            "debug",
        ]);
        let mut settings = GqlWsSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.server.path, "/subscriptions");
    }

    #[test]
    fn explicit_config_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{broken").unwrap();
        let cli = Cli::parse_from(["gqlws", "--config", path.to_str().unwrap()]);
        assert!(load_settings(&cli).is_err());
    }

    #[test]
    fn explicit_config_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"path":"/gql"}}"#).unwrap();
        let cli = Cli::parse_from(["gqlws", "--config", path.to_str().unwrap()]);
        let (settings, warning) = load_settings(&cli).unwrap();
        assert_eq!(settings.server.path, "/gql");
        assert!(warning.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ping_publisher_stops_on_shutdown() {
        let registry = Arc::new(gqlws_server::ConnectionRegistry::default());
        let executor = Arc::new(SchemaExecutor::new(schema::build_schema()));
        let (_dispatcher, publisher) = gqlws_server::EventDispatcher::new(
            registry,
            executor,
            gqlws_server::subscriptions::DispatcherConfig::default(),
        );
        let token = CancellationToken::new();
        let task = tokio::spawn(publish_pings(publisher, Duration::from_secs(1), token.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
        task.await.unwrap();
    }
}
