// Health Monitor - periodic liveness prober for the fleet
//
// Runs on a fixed interval and probes every registered agent concurrently
// and independently: one agent's slowness never delays another's probe, and
// probe errors are contained per agent. A transition event is emitted only
// when the newly computed status differs from the stored one.

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::application::ServiceError;
use crate::domain::agent::{Agent, AgentStatus};
use crate::domain::events::FleetEvent;
use crate::domain::repository::AgentRepository;
use crate::infrastructure::event_bus::FleetEventBus;
use crate::infrastructure::runner_client::RunnerClient;

/// Outcome of a manual on-demand probe.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PingReport {
    pub status: AgentStatus,
    pub latency_ms: u64,
    pub payload: Option<Value>,
}

pub struct HealthMonitor {
    agents: Arc<dyn AgentRepository>,
    client: Arc<dyn RunnerClient>,
    bus: FleetEventBus,
    interval: Duration,
    probe_timeout: Duration,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        client: Arc<dyn RunnerClient>,
        bus: FleetEventBus,
        interval: Duration,
        probe_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            agents,
            client,
            bus,
            interval,
            probe_timeout,
            shutdown,
        }
    }

    /// Start the probe loop as a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting health monitor (interval: {:?}, timeout: {:?})",
                self.interval, self.probe_timeout
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.probe_all().await;
                    }
                    _ = self.shutdown.cancelled() => {
                        info!("Health monitor stopped");
                        break;
                    }
                }
            }
        })
    }

    /// One full sweep over the registry. Never fails; per-agent errors are
    /// logged and recorded as offline status.
    pub async fn probe_all(&self) {
        let agents = match self.agents.list_all().await {
            Ok(agents) => agents,
            Err(e) => {
                error!("Health sweep could not list agents: {}", e);
                return;
            }
        };

        join_all(agents.into_iter().map(|agent| self.probe_one(agent))).await;
    }

    async fn probe_one(&self, agent: Agent) {
        let previous = agent.status;
        let started = Instant::now();
        let result = self.client.health(&agent, self.probe_timeout).await;

        match result {
            Ok(payload) => {
                let version = payload
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                if let Err(e) = self
                    .agents
                    .update_probe_result(agent.id, AgentStatus::Online, Some(Utc::now()), version)
                    .await
                {
                    error!("Failed to persist probe result for {}: {}", agent.name, e);
                    return;
                }
                self.emit_transition(&agent, previous, AgentStatus::Online);
            }
            Err(e) => {
                debug!(
                    "Probe failed for {} after {:?}: {}",
                    agent.name,
                    started.elapsed(),
                    e
                );
                if previous != AgentStatus::Offline {
                    if let Err(e) = self
                        .agents
                        .update_probe_result(agent.id, AgentStatus::Offline, None, None)
                        .await
                    {
                        error!("Failed to persist probe result for {}: {}", agent.name, e);
                        return;
                    }
                }
                self.emit_transition(&agent, previous, AgentStatus::Offline);
            }
        }
    }

    fn emit_transition(&self, agent: &Agent, from: AgentStatus, to: AgentStatus) {
        if from == to {
            return;
        }
        info!("Agent {} transitioned {} -> {}", agent.name, from, to);
        self.bus.publish(FleetEvent::AgentStatusChanged {
            agent_id: agent.id,
            name: agent.name.clone(),
            from,
            to,
            changed_at: Utc::now(),
        });
    }

    /// Manual out-of-band probe for one agent: same semantics as a sweep
    /// probe, plus the latency and raw payload back to the caller.
    pub async fn ping_now(&self, agent: &Agent) -> PingReport {
        let started = Instant::now();
        let result = self.client.health(agent, self.probe_timeout).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(payload) => {
                let version = payload
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                if let Err(e) = self
                    .agents
                    .update_probe_result(agent.id, AgentStatus::Online, Some(Utc::now()), version)
                    .await
                {
                    error!("Failed to persist ping result for {}: {}", agent.name, e);
                }
                self.emit_transition(agent, agent.status, AgentStatus::Online);
                PingReport {
                    status: AgentStatus::Online,
                    latency_ms,
                    payload: Some(payload),
                }
            }
            Err(e) => {
                debug!("Manual ping failed for {}: {}", agent.name, e);
                if agent.status != AgentStatus::Offline {
                    if let Err(e) = self
                        .agents
                        .update_probe_result(agent.id, AgentStatus::Offline, None, None)
                        .await
                    {
                        error!("Failed to persist ping result for {}: {}", agent.name, e);
                    }
                }
                self.emit_transition(agent, agent.status, AgentStatus::Offline);
                PingReport {
                    status: AgentStatus::Offline,
                    latency_ms,
                    payload: None,
                }
            }
        }
    }

    /// Live pass-through health check. Persists nothing; UI convenience.
    pub async fn proxy_health(&self, agent: &Agent) -> Result<Value, ServiceError> {
        self.client
            .health(agent, self.probe_timeout)
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryAgentRepository;
    use crate::infrastructure::runner_client::{
        ChunkStream, ClientError, ExecPayload, FileDownloadPayload, FileUploadPayload,
        SshExecPayload, UpdatePayload,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Probe stub with a switchable outcome.
    struct SwitchableRunner {
        healthy: AtomicBool,
    }

    impl SwitchableRunner {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
            })
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RunnerClient for SwitchableRunner {
        async fn health(
            &self,
            agent: &Agent,
            _timeout: Duration,
        ) -> Result<Value, ClientError> {
            if self.healthy.load(Ordering::SeqCst) && !agent.name.ends_with("-dead") {
                Ok(json!({"ok": true, "name": agent.name, "version": "2.0.1"}))
            } else {
                Err(ClientError::Unreachable("probe timed out".to_string()))
            }
        }

        async fn exec_stream(
            &self,
            _agent: &Agent,
            _payload: ExecPayload,
        ) -> Result<ChunkStream, ClientError> {
            unimplemented!("not exercised by health tests")
        }

        async fn ssh_exec_stream(
            &self,
            _agent: &Agent,
            _payload: SshExecPayload,
        ) -> Result<ChunkStream, ClientError> {
            unimplemented!("not exercised by health tests")
        }

        async fn upload(
            &self,
            _agent: &Agent,
            _payload: FileUploadPayload,
        ) -> Result<(), ClientError> {
            unimplemented!("not exercised by health tests")
        }

        async fn download(
            &self,
            _agent: &Agent,
            _remote_path: &str,
        ) -> Result<FileDownloadPayload, ClientError> {
            unimplemented!("not exercised by health tests")
        }

        async fn trigger_update(
            &self,
            _agent: &Agent,
            _payload: UpdatePayload,
        ) -> Result<String, ClientError> {
            unimplemented!("not exercised by health tests")
        }
    }

    fn agent_named(name: &str, status: AgentStatus) -> Agent {
        Agent {
            id: crate::domain::agent::AgentId::new(),
            name: name.to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "tok".to_string(),
            default_cwd: None,
            group_id: None,
            labels: HashMap::new(),
            status,
            last_seen: None,
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn monitor(
        agents: Arc<InMemoryAgentRepository>,
        client: Arc<SwitchableRunner>,
        bus: FleetEventBus,
    ) -> HealthMonitor {
        HealthMonitor::new(
            agents,
            client,
            bus,
            Duration::from_secs(15),
            Duration::from_millis(100),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn repeated_failures_emit_exactly_one_offline_event() {
        let agents = Arc::new(InMemoryAgentRepository::new());
        let agent = agent_named("edge-01", AgentStatus::Online);
        let agent_id = agent.id;
        agents.save(&agent).await.unwrap();

        let client = SwitchableRunner::new(false);
        let bus = FleetEventBus::new(16);
        let mut rx = bus.subscribe();
        let monitor = monitor(agents.clone(), client, bus);

        monitor.probe_all().await;
        monitor.probe_all().await;

        let stored = agents.find_by_id(agent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Offline);

        match rx.try_recv().unwrap() {
            FleetEvent::AgentStatusChanged { from, to, .. } => {
                assert_eq!(from, AgentStatus::Online);
                assert_eq!(to, AgentStatus::Offline);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "second sweep must not re-emit");
    }

    #[tokio::test]
    async fn recovery_updates_status_version_and_last_seen() {
        let agents = Arc::new(InMemoryAgentRepository::new());
        let agent = agent_named("edge-01", AgentStatus::Offline);
        let agent_id = agent.id;
        agents.save(&agent).await.unwrap();

        let client = SwitchableRunner::new(true);
        let bus = FleetEventBus::new(16);
        let mut rx = bus.subscribe();
        let monitor = monitor(agents.clone(), client, bus);

        monitor.probe_all().await;

        let stored = agents.find_by_id(agent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Online);
        assert!(stored.last_seen.is_some());
        assert_eq!(stored.version.as_deref(), Some("2.0.1"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            FleetEvent::AgentStatusChanged { to: AgentStatus::Online, .. }
        ));
    }

    #[tokio::test]
    async fn one_dead_agent_never_blocks_the_rest() {
        let agents = Arc::new(InMemoryAgentRepository::new());
        let healthy = agent_named("edge-01", AgentStatus::Offline);
        let dead = agent_named("edge-02-dead", AgentStatus::Offline);
        let healthy_id = healthy.id;
        agents.save(&healthy).await.unwrap();
        agents.save(&dead).await.unwrap();

        let client = SwitchableRunner::new(true);
        let monitor = monitor(agents.clone(), client, FleetEventBus::new(16));
        monitor.probe_all().await;

        let stored = agents.find_by_id(healthy_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn ping_now_reports_latency_and_payload() {
        let agents = Arc::new(InMemoryAgentRepository::new());
        let agent = agent_named("edge-01", AgentStatus::Offline);
        agents.save(&agent).await.unwrap();

        let client = SwitchableRunner::new(true);
        let monitor = monitor(agents.clone(), client.clone(), FleetEventBus::new(16));

        let report = monitor.ping_now(&agent).await;
        assert_eq!(report.status, AgentStatus::Online);
        assert_eq!(report.payload.unwrap()["ok"], true);

        client.set_healthy(false);
        let agent = agents.find_by_id(agent.id).await.unwrap().unwrap();
        let report = monitor.ping_now(&agent).await;
        assert_eq!(report.status, AgentStatus::Offline);
        assert!(report.payload.is_none());
    }
}
