// Agent self-update triggers - advisory records only
//
// The runner performs the update itself; the controller records what was
// asked, forwards the trigger in the background and stores whatever came
// back. Like the exec streaming phase, the forwarding task has no
// synchronous caller left, so failures are recorded rather than raised.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::ServiceError;
use crate::domain::agent::Agent;
use crate::domain::events::FleetEvent;
use crate::domain::repository::UpdateRepository;
use crate::domain::update::{UpdateId, UpdateRecord, UpdateStatus};
use crate::infrastructure::event_bus::FleetEventBus;
use crate::infrastructure::runner_client::{RunnerClient, UpdatePayload};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TriggerUpdateRequest {
    pub target: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "restart".to_string()
}

pub struct UpdateService {
    updates: Arc<dyn UpdateRepository>,
    client: Arc<dyn RunnerClient>,
    bus: FleetEventBus,
}

impl UpdateService {
    pub fn new(
        updates: Arc<dyn UpdateRepository>,
        client: Arc<dyn RunnerClient>,
        bus: FleetEventBus,
    ) -> Self {
        Self {
            updates,
            client,
            bus,
        }
    }

    /// Record the request and forward it to the runner in the background.
    /// The pending record is returned immediately.
    pub async fn trigger(
        &self,
        agent: Agent,
        request: TriggerUpdateRequest,
    ) -> Result<UpdateRecord, ServiceError> {
        if request.target.trim().is_empty() {
            return Err(ServiceError::BadRequest("target is required".to_string()));
        }

        let record = UpdateRecord::new(agent.id, request.target.clone(), request.strategy.clone());
        self.updates.save(&record).await?;

        let updates = self.updates.clone();
        let client = self.client.clone();
        let bus = self.bus.clone();
        let update_id = record.id;
        let agent_id = agent.id;
        tokio::spawn(async move {
            let outcome = client
                .trigger_update(
                    &agent,
                    UpdatePayload {
                        target: request.target,
                        strategy: request.strategy,
                    },
                )
                .await;

            let (status, log) = match outcome {
                Ok(body) => {
                    info!("Update {} acknowledged by {}", update_id, agent.name);
                    (UpdateStatus::Ok, body)
                }
                Err(e) => {
                    warn!("Update {} failed against {}: {}", update_id, agent.name, e);
                    (UpdateStatus::Error, e.to_string())
                }
            };
            if let Err(e) = updates.set_outcome(update_id, status, &log).await {
                warn!("Failed to record update outcome for {}: {}", update_id, e);
            }
            bus.publish(FleetEvent::UpdateFinished {
                update_id,
                agent_id,
                status,
                finished_at: Utc::now(),
            });
        });

        Ok(record)
    }

    pub async fn get(&self, id: UpdateId) -> Result<UpdateRecord, ServiceError> {
        self.updates
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("update {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, AgentStatus};
    use crate::infrastructure::event_bus::recv_logging_lag;
    use crate::infrastructure::repositories::InMemoryUpdateRepository;
    use crate::infrastructure::runner_client::{
        ChunkStream, ClientError, ExecPayload, FileDownloadPayload, FileUploadPayload,
        SshExecPayload,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct AckingRunner {
        ok: bool,
    }

    #[async_trait]
    impl RunnerClient for AckingRunner {
        async fn health(
            &self,
            _agent: &Agent,
            _timeout: Duration,
        ) -> Result<serde_json::Value, ClientError> {
            unimplemented!("not exercised by update tests")
        }

        async fn exec_stream(
            &self,
            _agent: &Agent,
            _payload: ExecPayload,
        ) -> Result<ChunkStream, ClientError> {
            unimplemented!("not exercised by update tests")
        }

        async fn ssh_exec_stream(
            &self,
            _agent: &Agent,
            _payload: SshExecPayload,
        ) -> Result<ChunkStream, ClientError> {
            unimplemented!("not exercised by update tests")
        }

        async fn upload(
            &self,
            _agent: &Agent,
            _payload: FileUploadPayload,
        ) -> Result<(), ClientError> {
            unimplemented!("not exercised by update tests")
        }

        async fn download(
            &self,
            _agent: &Agent,
            _remote_path: &str,
        ) -> Result<FileDownloadPayload, ClientError> {
            unimplemented!("not exercised by update tests")
        }

        async fn trigger_update(
            &self,
            _agent: &Agent,
            _payload: UpdatePayload,
        ) -> Result<String, ClientError> {
            if self.ok {
                Ok("updating to 2.1.0".to_string())
            } else {
                Err(ClientError::Unreachable("connection refused".to_string()))
            }
        }
    }

    fn agent() -> Agent {
        Agent {
            id: AgentId::new(),
            name: "edge-01".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "tok".to_string(),
            default_cwd: None,
            group_id: None,
            labels: HashMap::new(),
            status: AgentStatus::Online,
            last_seen: None,
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trigger_records_outcome_and_emits_event() {
        let updates = Arc::new(InMemoryUpdateRepository::new());
        let bus = FleetEventBus::new(16);
        let mut rx = bus.subscribe();
        let service = UpdateService::new(updates.clone(), Arc::new(AckingRunner { ok: true }), bus);

        let record = service
            .trigger(
                agent(),
                TriggerUpdateRequest {
                    target: "2.1.0".to_string(),
                    strategy: default_strategy(),
                },
            )
            .await
            .unwrap();
        assert_eq!(record.status, UpdateStatus::Pending);

        match recv_logging_lag(&mut rx).await.unwrap() {
            FleetEvent::UpdateFinished { update_id, status, .. } => {
                assert_eq!(update_id, record.id);
                assert_eq!(status, UpdateStatus::Ok);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }

        let stored = service.get(record.id).await.unwrap();
        assert_eq!(stored.status, UpdateStatus::Ok);
        assert_eq!(stored.log, "updating to 2.1.0");
    }

    #[tokio::test]
    async fn unreachable_runner_yields_error_outcome() {
        let updates = Arc::new(InMemoryUpdateRepository::new());
        let bus = FleetEventBus::new(16);
        let mut rx = bus.subscribe();
        let service = UpdateService::new(updates, Arc::new(AckingRunner { ok: false }), bus);

        let record = service
            .trigger(
                agent(),
                TriggerUpdateRequest {
                    target: "2.1.0".to_string(),
                    strategy: default_strategy(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            recv_logging_lag(&mut rx).await.unwrap(),
            FleetEvent::UpdateFinished { status: UpdateStatus::Error, .. }
        ));
        let stored = service.get(record.id).await.unwrap();
        assert!(stored.log.contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_target_is_a_bad_request() {
        let service = UpdateService::new(
            Arc::new(InMemoryUpdateRepository::new()),
            Arc::new(AckingRunner { ok: true }),
            FleetEventBus::new(16),
        );
        assert!(matches!(
            service
                .trigger(
                    agent(),
                    TriggerUpdateRequest {
                        target: "  ".to_string(),
                        strategy: default_strategy(),
                    }
                )
                .await,
            Err(ServiceError::BadRequest(_))
        ));
    }
}
