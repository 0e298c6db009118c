// HTTP API surface of the controller: agent registry, configuration,
// execution dispatch, updates and the two server-push event streams.
//
// Three bearer tiers: the static admin secret (or a stored admin-role API
// key) for fleet management, the static registration secret for agent
// self-registration, and the per-agent credential for config pulls.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::config_service::{ConfigService, CreateConfigRequest};
use crate::application::dispatch::{ExecDispatcher, ExecRequest};
use crate::application::health::HealthMonitor;
use crate::application::registry::{AgentRegistryService, UpsertAgentRequest};
use crate::application::updates::{TriggerUpdateRequest, UpdateService};
use crate::config::ControllerConfig;
use crate::domain::api_key::ApiKeyRole;
use crate::domain::config::{ConfigId, ConfigScope};
use crate::domain::repository::{ApiKeyRepository, RunRepository};
use crate::domain::run::RunId;
use crate::domain::update::UpdateId;
use crate::infrastructure::event_bus::{FleetEventBus, RunStreamBus};
use crate::presentation::error::ApiError;

pub struct AppState {
    pub config: ControllerConfig,
    pub registry: AgentRegistryService,
    pub health: Arc<HealthMonitor>,
    pub configs: ConfigService,
    pub dispatcher: ExecDispatcher,
    pub updates: UpdateService,
    pub runs: Arc<dyn RunRepository>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub fleet_bus: FleetEventBus,
    pub run_bus: RunStreamBus,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/agents", get(list_agents).put(upsert_agent))
        .route("/api/agents/catalog", get(catalog))
        .route("/api/agents/register", post(register_agent))
        .route("/api/agents/{id}", get(get_agent).delete(remove_agent))
        .route("/api/agents/{id}/ping", post(ping_agent))
        .route("/api/agents/{id}/health", get(proxy_agent_health))
        .route("/api/agents/{id}/exec", post(exec_agent))
        .route("/api/agents/{id}/upload", post(upload_file))
        .route("/api/agents/{id}/download", post(download_file))
        .route("/api/agents/{id}/update", post(trigger_update))
        .route("/api/agents/{id}/runs", get(list_agent_runs))
        .route("/api/agents/{id}/config/effective", get(effective_config))
        .route("/api/agent/config", get(pull_config))
        .route("/api/configs", get(list_configs).post(create_config))
        .route("/api/configs/assign", post(assign_config))
        .route("/api/updates/{id}", get(get_update))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/logs", get(get_run_logs))
        .route("/api/runs/{id}/stream", get(stream_run))
        .route("/api/events", get(stream_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Admin tier: the static admin secret, or a stored admin-role API key.
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    if !state.config.admin_token.is_empty() && token == state.config.admin_token {
        return Ok(());
    }
    if let Some(key) = state.api_keys.find_by_token(token).await? {
        if key.role == ApiKeyRole::Admin {
            return Ok(());
        }
    }
    Err(ApiError::Unauthorized("admin credential required".to_string()))
}

/// Registration tier: the static secret handed to agents at install time.
fn require_registration(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    if state.config.registration_token.is_empty() || token != state.config.registration_token {
        return Err(ApiError::Unauthorized(
            "registration credential required".to_string(),
        ));
    }
    Ok(())
}

// ---- Agents ----------------------------------------------------------------

async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agents = state.registry.list().await?;
    Ok(Json(json!({ "agents": agents })))
}

async fn catalog(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let agents = state.registry.catalog().await?;
    Ok(Json(json!({ "agents": agents })))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.get(&id).await?;
    Ok(Json(json!({ "agent": agent })))
}

async fn upsert_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UpsertAgentRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.upsert(request).await?;
    Ok(Json(json!({ "agent": agent })))
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UpsertAgentRequest>,
) -> Result<Json<Value>, ApiError> {
    require_registration(&state, &headers)?;
    let agent = state.registry.self_register(request).await?;
    Ok(Json(json!({ "agent": agent })))
}

async fn remove_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let removed = state.registry.remove(&id).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn ping_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let report = state.health.ping_now(&agent).await;
    Ok(Json(json!({ "ping": report })))
}

async fn proxy_agent_health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let payload = state.health.proxy_health(&agent).await?;
    Ok(Json(payload))
}

// ---- Execution -------------------------------------------------------------

async fn exec_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let run_id = state.dispatcher.dispatch(agent, request)?;
    Ok(Json(json!({ "run_id": run_id })))
}

#[derive(Deserialize)]
struct UploadRequest {
    path: String,
    content_base64: String,
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let content = base64::engine::general_purpose::STANDARD
        .decode(&request.content_base64)
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 content: {}", e)))?;
    state.dispatcher.upload(&agent, &request.path, &content).await?;
    Ok(Json(json!({ "ok": true, "path": request.path })))
}

#[derive(Deserialize)]
struct DownloadRequest {
    path: String,
    #[serde(default)]
    run_id: Option<RunId>,
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let (artifact, content) = state
        .dispatcher
        .download(&agent, &request.path, request.run_id)
        .await?;
    Ok(Json(json!({
        "artifact": artifact,
        "content_base64": base64::engine::general_purpose::STANDARD.encode(content),
    })))
}

// ---- Updates ---------------------------------------------------------------

async fn trigger_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<TriggerUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let record = state.updates.trigger(agent, request).await?;
    Ok(Json(json!({ "update": record })))
}

async fn get_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let update_id = UpdateId::from_string(&id)
        .map_err(|_| ApiError::BadRequest("invalid update id".to_string()))?;
    let record = state.updates.get(update_id).await?;
    Ok(Json(json!({ "update": record })))
}

// ---- Configuration ---------------------------------------------------------

#[derive(Deserialize)]
struct ConfigListQuery {
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    ref_id: Option<Uuid>,
}

async fn list_configs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ConfigListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let scope = match query.scope.as_deref() {
        Some(raw) => Some(
            ConfigScope::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid scope: {}", raw)))?,
        ),
        None => None,
    };
    let configs = state.configs.list(scope, query.ref_id).await?;
    Ok(Json(json!({ "configs": configs })))
}

async fn create_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let config = state.configs.create(request).await?;
    Ok(Json(json!({ "config": config })))
}

#[derive(Deserialize)]
struct AssignRequest {
    agent: String,
    config_id: ConfigId,
}

async fn assign_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&request.agent).await?;
    let assignment = state.configs.assign(&agent, request.config_id).await?;
    Ok(Json(json!({ "assignment": assignment })))
}

async fn effective_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let effective = state.configs.effective(&agent).await?;
    Ok(Json(json!({ "effective": effective })))
}

/// Agent-authenticated pull: the agent presents its own name and stored
/// credential and receives the identical resolution the admin endpoint
/// serves.
async fn pull_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let name = headers
        .get("x-agent-name")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-Agent-Name header".to_string()))?;
    let token = bearer(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let agent = state
        .registry
        .resolve(name)
        .await
        .map_err(|_| ApiError::Unauthorized("unknown agent credential".to_string()))?;
    if agent.token != token {
        return Err(ApiError::Unauthorized("unknown agent credential".to_string()));
    }

    let effective = state.configs.effective(&agent).await?;
    Ok(Json(json!({ "effective": effective })))
}

// ---- Runs ------------------------------------------------------------------

async fn list_agent_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let agent = state.registry.resolve(&id).await?;
    let runs = state.runs.find_by_agent(agent.id, 50).await?;
    Ok(Json(json!({ "runs": runs })))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let run_id =
        RunId::from_string(&id).map_err(|_| ApiError::BadRequest("invalid run id".to_string()))?;
    let run = state
        .runs
        .find_by_id(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run {}", run_id)))?;
    Ok(Json(json!({ "run": run })))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default)]
    after: i64,
}

async fn get_run_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let run_id =
        RunId::from_string(&id).map_err(|_| ApiError::BadRequest("invalid run id".to_string()))?;
    let logs = state.runs.logs(run_id, query.after).await?;
    Ok(Json(json!({ "logs": logs })))
}

// ---- Server-push streams ---------------------------------------------------

async fn stream_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_admin(&state, &headers).await?;
    let run_id =
        RunId::from_string(&id).map_err(|_| ApiError::BadRequest("invalid run id".to_string()))?;

    let receiver = state.run_bus.subscribe(run_id);
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(chunk) => Some(Ok(Event::default()
                .data(serde_json::to_string(&chunk).unwrap_or_default()))),
            // A lagged observer just misses fragments; delivery is
            // best-effort at-most-once.
            Err(_) => None,
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_admin(&state, &headers).await?;

    let receiver = state.fleet_bus.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => Some(Ok(Event::default()
                .data(serde_json::to_string(&event).unwrap_or_default()))),
            Err(_) => None,
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::{FleetEventBus, RunStreamBus};
    use crate::infrastructure::repositories::{
        InMemoryAgentRepository, InMemoryApiKeyRepository, InMemoryConfigRepository,
        InMemoryRunRepository, InMemoryUpdateRepository,
    };
    use crate::infrastructure::runner_client::{
        ChunkStream, ClientError, ExecPayload, FileDownloadPayload, FileUploadPayload,
        RunnerClient, SshExecPayload, UpdatePayload,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    struct OfflineRunner;

    #[async_trait]
    impl RunnerClient for OfflineRunner {
        async fn health(&self, _agent: &crate::domain::agent::Agent, _timeout: Duration) -> Result<Value, ClientError> {
            Err(ClientError::Unreachable("offline".to_string()))
        }
        async fn exec_stream(&self, _agent: &crate::domain::agent::Agent, _payload: ExecPayload) -> Result<ChunkStream, ClientError> {
            Err(ClientError::Unreachable("offline".to_string()))
        }
        async fn ssh_exec_stream(&self, _agent: &crate::domain::agent::Agent, _payload: SshExecPayload) -> Result<ChunkStream, ClientError> {
            Err(ClientError::Unreachable("offline".to_string()))
        }
        async fn upload(&self, _agent: &crate::domain::agent::Agent, _payload: FileUploadPayload) -> Result<(), ClientError> {
            Err(ClientError::Unreachable("offline".to_string()))
        }
        async fn download(&self, _agent: &crate::domain::agent::Agent, _remote_path: &str) -> Result<FileDownloadPayload, ClientError> {
            Err(ClientError::Unreachable("offline".to_string()))
        }
        async fn trigger_update(&self, _agent: &crate::domain::agent::Agent, _payload: UpdatePayload) -> Result<String, ClientError> {
            Err(ClientError::Unreachable("offline".to_string()))
        }
    }

    fn test_app() -> Router {
        test_app_with_keys().0
    }

    fn test_app_with_keys() -> (Router, Arc<InMemoryApiKeyRepository>) {
        let mut config = ControllerConfig::default();
        config.admin_token = "admin-secret".to_string();
        config.registration_token = "register-secret".to_string();

        let agents = Arc::new(InMemoryAgentRepository::new());
        let config_repo = Arc::new(InMemoryConfigRepository::new());
        let runs: Arc<dyn RunRepository> = Arc::new(InMemoryRunRepository::new());
        let client: Arc<dyn RunnerClient> = Arc::new(OfflineRunner);
        let fleet_bus = FleetEventBus::new(32);
        let run_bus = RunStreamBus::new(32);

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
            Duration::from_secs(15),
            Duration::from_millis(100),
            CancellationToken::new(),
        ));
        let configs = ConfigService::new(config_repo);
        let dispatcher = ExecDispatcher::new(
            runs.clone(),
            client.clone(),
            fleet_bus.clone(),
            run_bus.clone(),
            false,
            60_000,
        );
        let updates = UpdateService::new(
            Arc::new(InMemoryUpdateRepository::new()),
            client,
            fleet_bus.clone(),
        );

        let api_keys = Arc::new(InMemoryApiKeyRepository::new());
        let router = app(Arc::new(AppState {
            config,
            registry,
            health,
            configs,
            dispatcher,
            updates,
            runs,
            api_keys: api_keys.clone(),
            fleet_bus,
            run_bus,
        }));
        (router, api_keys)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn admin_endpoints_reject_missing_bearer() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agents")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stored_admin_key_passes_the_admin_tier() {
        let (app, api_keys) = test_app_with_keys();
        api_keys
            .save(&crate::domain::api_key::ApiKey {
                id: Uuid::new_v4(),
                name: "dashboard".to_string(),
                token: "key-token".to_string(),
                role: ApiKeyRole::Admin,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        api_keys
            .save(&crate::domain::api_key::ApiKey {
                id: Uuid::new_v4(),
                name: "viewer".to_string(),
                token: "reader-token".to_string(),
                role: ApiKeyRole::Reader,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let accepted = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/agents")
                    .header("authorization", "Bearer key-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);

        let denied = app
            .oneshot(
                Request::builder()
                    .uri("/api/agents")
                    .header("authorization", "Bearer reader-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn catalog_is_public() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agents/catalog")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["agents"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_requires_the_registration_secret() {
        let app = test_app();
        let payload = json!({
            "name": "edge-01",
            "base_url": "http://127.0.0.1:1",
            "token": "tok"
        });

        let denied = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/register")
                    .header("authorization", "Bearer admin-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let accepted = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/register")
                    .header("authorization", "Bearer register-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
        let body = body_json(accepted).await;
        assert_eq!(body["agent"]["name"], "edge-01");
        assert!(body["agent"].get("token").is_none());
    }

    #[tokio::test]
    async fn agent_pull_verifies_the_stored_credential() {
        let app = test_app();
        let payload = json!({
            "name": "edge-01",
            "base_url": "http://127.0.0.1:1",
            "token": "agent-token"
        });
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/register")
                    .header("authorization", "Bearer register-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let wrong = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/agent/config")
                    .header("x-agent-name", "edge-01")
                    .header("authorization", "Bearer not-the-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let right = app
            .oneshot(
                Request::builder()
                    .uri("/api/agent/config")
                    .header("x-agent-name", "edge-01")
                    .header("authorization", "Bearer agent-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(right.status(), StatusCode::OK);
        let body = body_json(right).await;
        assert_eq!(body["effective"]["document"], json!({}));
    }

    #[tokio::test]
    async fn exec_against_unknown_agent_is_not_found() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/ghost/exec")
                    .header("authorization", "Bearer admin-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"kind": "bash", "command": "true"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ssh_exec_is_service_unavailable_when_disabled() {
        let app = test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/register")
                    .header("authorization", "Bearer register-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"name": "edge-01", "base_url": "http://127.0.0.1:1", "token": "t"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/edge-01/exec")
                    .header("authorization", "Bearer admin-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "kind": "ssh",
                            "command": "uptime",
                            "ssh": {"host": "db-01", "user": "ops"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn invalid_config_scope_is_a_bad_request() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/configs")
                    .header("authorization", "Bearer admin-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"scope": "tenant", "document": {}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
