// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Controller daemon bootstrap: configuration, database, startup
//! reconciliation, health monitor and the HTTP server.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flotilla_core::application::config_service::ConfigService;
use flotilla_core::application::dispatch::ExecDispatcher;
use flotilla_core::application::health::HealthMonitor;
use flotilla_core::application::registry::AgentRegistryService;
use flotilla_core::application::updates::UpdateService;
use flotilla_core::config::ControllerConfig;
use flotilla_core::domain::repository::{
    AgentRepository, ApiKeyRepository, ConfigRepository, RunRepository, UpdateRepository,
};
use flotilla_core::infrastructure::db::Database;
use flotilla_core::infrastructure::event_bus::{FleetEventBus, RunStreamBus};
use flotilla_core::infrastructure::repositories::{
    PostgresAgentRepository, PostgresApiKeyRepository, PostgresConfigRepository,
    PostgresRunRepository, PostgresUpdateRepository,
};
use flotilla_core::infrastructure::runner_client::{HttpRunnerClient, RunnerClient};
use flotilla_core::presentation::api::{self, AppState};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = ControllerConfig::load(config_path)?;
    if config.admin_token.is_empty() {
        warn!("No admin token configured; admin endpoints will reject all callers");
    }

    let db = Database::new(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.migrate().await.context("Schema bootstrap failed")?;
    let pool = db.get_pool().clone();

    let agents: Arc<dyn AgentRepository> = Arc::new(PostgresAgentRepository::new(pool.clone()));
    let config_repo: Arc<dyn ConfigRepository> =
        Arc::new(PostgresConfigRepository::new(pool.clone()));
    let runs: Arc<dyn RunRepository> = Arc::new(PostgresRunRepository::new(pool.clone()));
    let update_repo: Arc<dyn UpdateRepository> =
        Arc::new(PostgresUpdateRepository::new(pool.clone()));
    let api_keys: Arc<dyn ApiKeyRepository> = Arc::new(PostgresApiKeyRepository::new(pool));

    let client: Arc<dyn RunnerClient> = Arc::new(HttpRunnerClient::new());
    let fleet_bus = FleetEventBus::new(config.event_capacity);
    let run_bus = RunStreamBus::new(256);
    let shutdown = CancellationToken::new();

    let registry = AgentRegistryService::new(
        agents.clone(),
        config_repo.clone(),
        client.clone(),
        fleet_bus.clone(),
    );
    let health = Arc::new(HealthMonitor::new(
        agents,
        client.clone(),
        fleet_bus.clone(),
        Duration::from_secs(config.probe_interval_secs),
        Duration::from_millis(config.probe_timeout_ms),
        shutdown.clone(),
    ));
    let configs = ConfigService::new(config_repo);
    let dispatcher = ExecDispatcher::new(
        runs.clone(),
        client.clone(),
        fleet_bus.clone(),
        run_bus.clone(),
        config.ssh_exec_enabled,
        config.default_exec_timeout_ms,
    );
    let updates = UpdateService::new(update_repo, client, fleet_bus.clone());

    // Streams interrupted by a previous process must not stay in flight
    // forever; finalize them before accepting new work.
    let finalized = dispatcher
        .reconcile_stale_runs()
        .await
        .context("Startup run reconciliation failed")?;
    if finalized > 0 {
        warn!("Finalized {} orphaned runs from a previous process", finalized);
    }

    let monitor_handle = health.clone().spawn();

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        config,
        registry,
        health,
        configs,
        dispatcher,
        updates,
        runs,
        api_keys,
        fleet_bus,
        run_bus,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Controller listening on {}", bind_addr);

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_signal.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    monitor_handle.await.ok();
    Ok(())
}
