// Exec Dispatcher - audited, streamed command execution against runners
//
// Submitting a run and consuming its output are decoupled: dispatch
// validates, allocates a run id and returns it immediately; a detached
// tracked task opens the streaming call, demultiplexes stream-tagged
// fragments into the run log and the live run bus, and always writes
// exactly one terminal run record, whatever happens to the stream.

use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::ServiceError;
use crate::domain::agent::{Agent, AgentId};
use crate::domain::events::{FleetEvent, RunOutputChunk};
use crate::domain::repository::RunRepository;
use crate::domain::run::{
    hash_command, head, redact_env, Run, RunArtifact, RunId, RunKind, RunStatus, StreamKind,
    MAX_HEAD_BYTES,
};
use crate::infrastructure::event_bus::{FleetEventBus, RunStreamBus};
use crate::infrastructure::runner_client::{
    ChunkStream, ExecPayload, FileUploadPayload, RunnerClient, SshExecPayload,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub kind: String,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub ssh: Option<SshTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub bastion: Option<String>,
    #[serde(default)]
    pub pty: bool,
}

/// Wire fragment emitted by a runner while streaming. Anything that does
/// not parse as this is treated as raw stdout.
#[derive(Debug, Deserialize)]
struct WireFragment {
    #[serde(rename = "type")]
    kind: Option<String>,
    stream: Option<String>,
    data: Option<String>,
    code: Option<i32>,
}

/// Immutable facts captured at dispatch time, carried into the terminal
/// audit record.
struct RunSeed {
    run_id: RunId,
    agent_id: AgentId,
    requested_by: String,
    kind: RunKind,
    command_hash: String,
    cwd: Option<String>,
    env_keys: HashMap<String, String>,
    remote_host: Option<String>,
}

struct StreamOutcome {
    status: RunStatus,
    exit_code: i32,
    stdout_head: String,
    stderr_head: String,
}

pub struct ExecDispatcher {
    runs: Arc<dyn RunRepository>,
    client: Arc<dyn RunnerClient>,
    fleet_bus: FleetEventBus,
    run_bus: RunStreamBus,
    ssh_enabled: bool,
    default_timeout_ms: u64,
    // Tracked background streams keyed by run id, evicted on completion.
    inflight: Arc<DashMap<RunId, Instant>>,
}

impl ExecDispatcher {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        client: Arc<dyn RunnerClient>,
        fleet_bus: FleetEventBus,
        run_bus: RunStreamBus,
        ssh_enabled: bool,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            runs,
            client,
            fleet_bus,
            run_bus,
            ssh_enabled,
            default_timeout_ms,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Validate, allocate a run id and hand the streaming phase to a
    /// detached task. The returned id is available before the remote
    /// command has produced anything; callers subscribe or poll for the
    /// outcome. Concurrent dispatches against one agent run in parallel,
    /// deliberately without admission control.
    pub fn dispatch(&self, agent: Agent, request: ExecRequest) -> Result<RunId, ServiceError> {
        let kind = RunKind::parse(&request.kind)
            .ok_or_else(|| ServiceError::BadRequest(format!("invalid kind: {}", request.kind)))?;
        if request.command.trim().is_empty() {
            return Err(ServiceError::BadRequest("command is required".to_string()));
        }
        if kind == RunKind::Ssh && !self.ssh_enabled {
            return Err(ServiceError::Unavailable(
                "ssh execution is disabled on this controller".to_string(),
            ));
        }
        if kind == RunKind::Ssh && request.ssh.is_none() {
            return Err(ServiceError::BadRequest(
                "ssh target is required for ssh kind".to_string(),
            ));
        }

        let run_id = RunId::new();
        let seed = RunSeed {
            run_id,
            agent_id: agent.id,
            requested_by: request
                .requested_by
                .clone()
                .unwrap_or_else(|| "api".to_string()),
            kind,
            command_hash: hash_command(&request.command),
            cwd: request.cwd.clone().or_else(|| agent.default_cwd.clone()),
            env_keys: redact_env(&request.env),
            remote_host: request.ssh.as_ref().map(|s| s.host.clone()),
        };

        let runs = self.runs.clone();
        let client = self.client.clone();
        let fleet_bus = self.fleet_bus.clone();
        let run_bus = self.run_bus.clone();
        let inflight = self.inflight.clone();
        let timeout_ms = request.timeout_ms.unwrap_or(self.default_timeout_ms);

        self.inflight.insert(run_id, Instant::now());
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = consume_stream(
                &runs, &client, &run_bus, &agent, &request, kind, seed.run_id, timeout_ms,
            )
            .await;
            finalize(&runs, &fleet_bus, &run_bus, seed, outcome, started).await;
            inflight.remove(&run_id);
        });

        info!("Dispatched run {} ({})", run_id, kind.as_str());
        Ok(run_id)
    }

    /// Number of runs whose streaming phase is still in flight.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Startup reconciliation: streams the previous process never finished
    /// left run-log rows with no terminal record. Finalize them as errors
    /// so no run stays permanently in flight across a restart.
    pub async fn reconcile_stale_runs(&self) -> Result<usize, ServiceError> {
        let orphans = self.runs.orphaned_run_ids().await?;
        let count = orphans.len();
        for run_id in orphans {
            warn!("Finalizing orphaned run {} from a previous process", run_id);
            let run = Run {
                id: run_id,
                agent_id: AgentId(Uuid::nil()),
                requested_by: "reconciler".to_string(),
                kind: RunKind::Bash,
                command_hash: String::new(),
                cwd: None,
                env_keys: HashMap::new(),
                status: RunStatus::Error,
                exit_code: -1,
                stdout_head: String::new(),
                stderr_head: "finalized after controller restart; outcome unknown".to_string(),
                duration_ms: 0,
                remote_host: None,
                finished_at: Utc::now(),
            };
            self.runs.save(&run).await?;
            self.fleet_bus.publish(FleetEvent::RunFinished {
                run_id,
                agent_id: run.agent_id,
                status: run.status,
                exit_code: run.exit_code,
                finished_at: run.finished_at,
            });
        }
        Ok(count)
    }

    /// Non-streaming whole-cycle file push to the runner.
    pub async fn upload(
        &self,
        agent: &Agent,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), ServiceError> {
        let payload = FileUploadPayload {
            path: remote_path.to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(content),
        };
        self.client
            .upload(agent, payload)
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))
    }

    /// Non-streaming pull from the runner; the received bytes are recorded
    /// as a content-addressed artifact.
    pub async fn download(
        &self,
        agent: &Agent,
        remote_path: &str,
        run_id: Option<RunId>,
    ) -> Result<(RunArtifact, Vec<u8>), ServiceError> {
        let payload = self
            .client
            .download(agent, remote_path)
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        let content = payload
            .decode()
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&content);
        let artifact = RunArtifact {
            id: Uuid::new_v4(),
            run_id,
            agent_id: agent.id,
            remote_path: payload.path,
            size_bytes: content.len() as i64,
            mime_type: infer::get(&content)
                .map(|t| t.mime_type().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            sha256: hex::encode(hasher.finalize()),
            created_at: Utc::now(),
        };
        self.runs.save_artifact(&artifact).await?;
        Ok((artifact, content))
    }
}

#[allow(clippy::too_many_arguments)]
async fn consume_stream(
    runs: &Arc<dyn RunRepository>,
    client: &Arc<dyn RunnerClient>,
    run_bus: &RunStreamBus,
    agent: &Agent,
    request: &ExecRequest,
    kind: RunKind,
    run_id: RunId,
    timeout_ms: u64,
) -> StreamOutcome {
    let opened = open_stream(client, agent, request, kind, timeout_ms).await;
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(message) => {
            return StreamOutcome {
                status: RunStatus::Error,
                exit_code: -1,
                stdout_head: String::new(),
                stderr_head: head(&message),
            };
        }
    };

    let mut outcome = StreamOutcome {
        status: RunStatus::Ok,
        exit_code: 0,
        stdout_head: String::new(),
        stderr_head: String::new(),
    };
    let mut buffer = String::new();

    loop {
        match stream.next().await {
            Some(Ok(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    handle_fragment(runs, run_bus, run_id, line.trim_end(), &mut outcome).await;
                }
            }
            Some(Err(e)) => {
                warn!("Run {} stream broke: {}", run_id, e);
                outcome.status = RunStatus::Error;
                outcome.exit_code = -1;
                append_head(&mut outcome.stderr_head, &e.to_string());
                return outcome;
            }
            None => break,
        }
    }
    if !buffer.trim().is_empty() {
        let line = std::mem::take(&mut buffer);
        handle_fragment(runs, run_bus, run_id, line.trim_end(), &mut outcome).await;
    }

    outcome
}

async fn open_stream(
    client: &Arc<dyn RunnerClient>,
    agent: &Agent,
    request: &ExecRequest,
    kind: RunKind,
    timeout_ms: u64,
) -> Result<ChunkStream, String> {
    let cwd = request.cwd.clone().or_else(|| agent.default_cwd.clone());
    let result = match kind {
        RunKind::Ssh => {
            // Validated at dispatch; a missing target here is a logic error
            // surfaced as a normal stream failure.
            let Some(target) = request.ssh.clone() else {
                return Err("ssh target missing".to_string());
            };
            client
                .ssh_exec_stream(
                    agent,
                    SshExecPayload {
                        host: target.host,
                        user: target.user,
                        cmd: request.command.clone(),
                        port: target.port,
                        env: request.env.clone(),
                        cwd,
                        timeout_ms,
                        bastion: target.bastion,
                        pty: target.pty,
                        stream: true,
                    },
                )
                .await
        }
        RunKind::Bash | RunKind::Python => {
            let (cmd, script) = match kind {
                RunKind::Bash => (Some(request.command.clone()), None),
                _ => (None, Some(request.command.clone())),
            };
            client
                .exec_stream(
                    agent,
                    ExecPayload {
                        kind: kind.as_str().to_string(),
                        cmd,
                        script,
                        cwd,
                        env: request.env.clone(),
                        timeout_ms,
                        stream: true,
                    },
                )
                .await
        }
    };
    result.map_err(|e| e.to_string())
}

/// Parse one fragment, append it to the run log and fan it out live.
async fn handle_fragment(
    runs: &Arc<dyn RunRepository>,
    run_bus: &RunStreamBus,
    run_id: RunId,
    line: &str,
    outcome: &mut StreamOutcome,
) {
    if line.is_empty() {
        return;
    }

    let (stream, data) = match serde_json::from_str::<WireFragment>(line) {
        Ok(fragment) if fragment.kind.as_deref() == Some("exit") => {
            outcome.exit_code = fragment.code.unwrap_or(0);
            if outcome.exit_code != 0 {
                outcome.status = RunStatus::Error;
            }
            return;
        }
        Ok(WireFragment {
            stream: Some(stream),
            data: Some(data),
            ..
        }) => (StreamKind::parse(&stream), data),
        // Unparseable chunks count as raw stdout.
        _ => (StreamKind::Stdout, line.to_string()),
    };

    match stream {
        StreamKind::Stdout => append_head(&mut outcome.stdout_head, &data),
        StreamKind::Stderr => append_head(&mut outcome.stderr_head, &data),
    }

    match runs.append_log(run_id, stream, &data).await {
        Ok(seq) => {
            run_bus.publish(RunOutputChunk {
                run_id,
                seq,
                stream,
                data,
            });
        }
        Err(e) => {
            error!("Failed to append run log for {}: {}", run_id, e);
        }
    }
}

fn append_head(target: &mut String, data: &str) {
    if target.len() >= MAX_HEAD_BYTES {
        return;
    }
    target.push_str(data);
    target.push('\n');
    if target.len() > MAX_HEAD_BYTES {
        *target = head(target);
    }
}

/// Always runs, exactly once per dispatched run: terminal record, single
/// `RunFinished` event, live channel teardown.
async fn finalize(
    runs: &Arc<dyn RunRepository>,
    fleet_bus: &FleetEventBus,
    run_bus: &RunStreamBus,
    seed: RunSeed,
    outcome: StreamOutcome,
    started: Instant,
) {
    let run = Run {
        id: seed.run_id,
        agent_id: seed.agent_id,
        requested_by: seed.requested_by,
        kind: seed.kind,
        command_hash: seed.command_hash,
        cwd: seed.cwd,
        env_keys: seed.env_keys,
        status: outcome.status,
        exit_code: outcome.exit_code,
        stdout_head: outcome.stdout_head,
        stderr_head: outcome.stderr_head,
        duration_ms: started.elapsed().as_millis() as i64,
        remote_host: seed.remote_host,
        finished_at: Utc::now(),
    };

    if let Err(e) = runs.save(&run).await {
        error!("Failed to write terminal record for run {}: {}", run.id, e);
    }
    fleet_bus.publish(FleetEvent::RunFinished {
        run_id: run.id,
        agent_id: run.agent_id,
        status: run.status,
        exit_code: run.exit_code,
        finished_at: run.finished_at,
    });
    run_bus.close(run.id);
    info!(
        "Run {} finished: {} (exit {}, {} ms)",
        run.id,
        run.status.as_str(),
        run.exit_code,
        run.duration_ms
    );
}
