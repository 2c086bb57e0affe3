//! Fleet update orchestrator: a hierarchical Strategy/Stage/Step state
//! machine that plans and drives fleet-wide host updates (software
//! patching, software upgrade, firmware update, Kubernetes upgrade,
//! Kubernetes root-CA rotation) against an abstract platform driver.
//!
//! A Strategy Builder turns user knobs and a fleet snapshot into an
//! ordered list of Stages; a Stage/Strategy Controller drives the
//! current Stage's current Step to a terminal outcome, one event loop
//! at a time. Steps are small cooperative coroutines: `apply` resolves
//! immediately or asks to wait, and progress from there comes only
//! through `handle_event` or the controller's own timeout check.
//!
//! No platform backend is implemented here — `driver::PlatformDriver`
//! is an interface only, with `driver::fake` standing in as the test
//! double. A consuming binary wires a real backend, a `Config`, and
//! this crate's `api::AppState`/`api::rest_api::RestApi` together to
//! run the orchestrator as a service.

pub mod api;
pub mod builders;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod inventory;
pub mod persistence;
pub mod steps;
pub mod strategy;
pub mod types;

pub use config::Config;
pub use controller::StrategyController;
pub use error::{Error, Result};

/// Install the process-wide `tracing` subscriber (§10.2): `RUST_LOG`
/// if set, `info` otherwise. Call once, before any controller runs.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Process-boundary entry point: load configuration, restore any
/// strategies persisted from a previous run, and serve the REST
/// surface until the process is killed. `anyhow` carries context here
/// rather than inventing a startup-specific `Error` variant (§10.1) —
/// nothing past this function ever needs to match on *why* startup
/// failed.
pub async fn run(config_path: &str, driver: std::sync::Arc<dyn driver::PlatformDriver>) -> anyhow::Result<()> {
    use anyhow::Context;

    let config_toml = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("reading config file {config_path}"))?;
    let config = Config::from_toml_str(&config_toml).with_context(|| "parsing config file")?;

    let inventory = inventory::Inventory::default();
    let state = std::sync::Arc::new(api::AppState::new(config, driver, inventory));
    state.restore().await.with_context(|| "restoring persisted strategies")?;

    api::rest_api::RestApi::new(state)
        .serve()
        .await
        .with_context(|| "serving orchestration REST surface")
}
