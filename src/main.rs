//! Binary entry point: loads settings, wires the reference collaborators,
//! starts the metrics server, installs signal traps, and blocks on the
//! agent's lifecycle. Kept thin — no flag parsing beyond locating a config
//! file.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use config::{Config, Environment, File};
use eyre::{Result, WrapErr};
use nodewatch::agent::{AgentCore, AgentCoreConfig};
use nodewatch::extension::InMemoryExtensionRegistry;
use nodewatch::metrics::AgentMetrics;
use nodewatch::redact::DefaultRedactor;
use nodewatch::scheduler::SchedulerOverride;
use nodewatch::server;
use nodewatch::settings::Settings;
use nodewatch::subprocess::TokioSubprocessRunner;
use nodewatch::transport::InMemoryTransport;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Loads the client settings tree from `config/<RUN_ENV>/nodewatch(.json|.toml|...)`
/// with `NODEWATCH_`-prefixed environment variable overrides, grounded on the
/// teacher's `config`-crate-based loader.
fn load_settings() -> Result<Settings> {
    let env = env::var("RUN_ENV").unwrap_or_else(|_| "default".into());
    let config_path = format!("./config/{env}/nodewatch");

    let raw = Config::builder()
        .add_source(File::with_name(&config_path).required(false))
        .add_source(Environment::with_prefix("NODEWATCH").separator("_"))
        .build()
        .wrap_err("failed to build configuration")?;

    let tree: serde_json::Value = raw
        .try_deserialize()
        .wrap_err("failed to deserialize configuration into a settings tree")?;

    Settings::from_value(tree).map_err(Into::into)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let settings = Arc::new(load_settings().wrap_err("failed to load settings")?);
    let metrics = Arc::new(AgentMetrics::new(&settings.client.name)?);

    let metrics_addr: SocketAddr = env::var("NODEWATCH_METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9100".into())
        .parse()
        .wrap_err("invalid NODEWATCH_METRICS_ADDR")?;
    server::run_metrics_server(metrics.clone(), metrics_addr);

    let test_mode = env::var("NODEWATCH_TEST_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let config = AgentCoreConfig {
        settings,
        transport: Arc::new(InMemoryTransport::new()),
        extensions: Arc::new(InMemoryExtensionRegistry::new()),
        redactor: Arc::new(DefaultRedactor),
        runner: Arc::new(TokioSubprocessRunner),
        metrics,
        version: AGENT_VERSION.to_string(),
        schedule_override: SchedulerOverride { test_mode },
    };

    let (core, handle) = AgentCore::build(config);
    let run_handle = tokio::spawn(core.run());

    let handle_for_signal = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle_for_signal.stop().await;
        }
    });

    #[cfg(unix)]
    {
        let handle_for_sigterm = handle.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                handle_for_sigterm.stop().await;
            }
        });
    }

    run_handle.await.wrap_err("agent task panicked")??;
    Ok(())
}
