#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Gateway section written into the daemon's config file.
#[derive(Debug, Clone)]
pub struct GatewaySetup {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl GatewaySetup {
    /// OpenAI-format provider pointed at a local mock.
    pub fn mock(mock: &MockLlmServer) -> Self {
        Self {
            provider: "openai".to_string(),
            model: "mock-model-v1".to_string(),
            base_url: Some(mock.base_url()),
            api_key: Some("mock-api-key".to_string()),
            timeout_secs: 5,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            provider: "none".to_string(),
            model: String::new(),
            base_url: None,
            api_key: None,
            timeout_secs: 5,
        }
    }

    fn to_toml(&self, port: u16) -> String {
        let mut out = format!(
            "log_level = \"debug\"\n\n[server]\nhost = \"127.0.0.1\"\nport = {}\n\n[scheduler]\ntimezone = \"utc\"\nmax_sleep_secs = 1\n\n[gateway]\nprovider = \"{}\"\ntimeout_secs = {}\n",
            port, self.provider, self.timeout_secs
        );
        if !self.model.is_empty() {
            out.push_str(&format!("model = \"{}\"\n", self.model));
        }
        if let Some(base_url) = &self.base_url {
            out.push_str(&format!("base_url = \"{}\"\n", base_url));
        }
        if let Some(api_key) = &self.api_key {
            out.push_str(&format!("api_key = \"{}\"\n", api_key));
        }
        out
    }
}

pub struct DaemonHarness {
    child: Child,
    pub api_port: u16,
    pub api_base: String,
    data_dir: tempfile::TempDir,
    trace_log: Arc<Mutex<Vec<String>>>,
}

impl DaemonHarness {
    pub async fn spawn(gateway: GatewaySetup) -> TestResult<Self> {
        let api_port = find_free_port()?;
        let data_dir = tempfile::Builder::new().prefix("agentdesk-e2e").tempdir()?;
        let config_path = data_dir.path().join("config.toml");
        std::fs::write(&config_path, gateway.to_toml(api_port))?;

        let log_file = std::fs::File::create(data_dir.path().join("daemon.log"))?;
        let log_file_err = log_file.try_clone()?;

        let child = Command::new(env!("CARGO_BIN_EXE_agentdesk"))
            .arg("serve")
            .arg("--config")
            .arg(&config_path)
            .env_remove("AGENTDESK_API_HOST")
            .env_remove("AGENTDESK_API_PORT")
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()?;

        let mut harness = Self {
            child,
            api_port,
            api_base: format!("http://127.0.0.1:{}", api_port),
            data_dir,
            trace_log: Arc::new(Mutex::new(Vec::new())),
        };

        harness.wait_until_ready().await?;
        Ok(harness)
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!("agentdesk exited early with status: {}", status).into());
            }

            let res = reqwest::Client::new()
                .get(format!("{}/health", self.api_base))
                .timeout(Duration::from_millis(700))
                .send()
                .await;

            if let Ok(resp) = res
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err("Timed out waiting for agentdesk API readiness".into())
    }

    pub async fn create_agent(&self, name: &str, system_prompt: &str) -> TestResult<Value> {
        let body = json!({ "name": name, "system_prompt": system_prompt });
        let (_, out) = self
            .request(reqwest::Method::POST, "/agents", Some(body))
            .await?;
        Ok(out)
    }

    pub async fn create_task(&self, agent_id: &str, name: &str, workflow: &str) -> TestResult<Value> {
        let body = json!({
            "agent_id": agent_id,
            "task_name": name,
            "schedule_type": "daily",
            "schedule_time": "09:00",
            "workflow_definition": workflow,
            "tools_to_use": ["gmail"]
        });
        let (status, out) = self
            .request(reqwest::Method::POST, "/scheduled-tasks", Some(body))
            .await?;
        if !status.is_success() {
            return Err(format!("create_task failed: {} {}", status, out).into());
        }
        Ok(out)
    }

    pub async fn run_task(&self, task_id: &str) -> TestResult<(reqwest::StatusCode, Value)> {
        self.request(
            reqwest::Method::POST,
            "/scheduled-tasks/run",
            Some(json!({ "task_id": task_id })),
        )
        .await
    }

    /// Poll a task until its last run reaches a terminal status.
    pub async fn wait_for_run(&self, task_id: &str) -> TestResult<Value> {
        for _ in 0..100 {
            let (_, task) = self
                .request(
                    reqwest::Method::GET,
                    &format!("/scheduled-tasks/{}", task_id),
                    None,
                )
                .await?;
            match task.get("last_run_status").and_then(Value::as_str) {
                Some("success") | Some("failed") => return Ok(task),
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
        Err(format!("task {} never finished its run", task_id).into())
    }

    pub async fn list_activities(&self) -> TestResult<Vec<Value>> {
        let (_, out) = self
            .request(reqwest::Method::GET, "/activities", None)
            .await?;
        Ok(out.as_array().cloned().unwrap_or_default())
    }

    /// Activities are recorded after the terminal status, so poll for them.
    pub async fn wait_for_activities(&self, count: usize) -> TestResult<Vec<Value>> {
        for _ in 0..50 {
            let activities = self.list_activities().await?;
            if activities.len() >= count {
                return Ok(activities);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(format!("fewer than {} activities recorded", count).into())
    }

    pub fn persist_trace_file(&self, name: &str) -> TestResult<PathBuf> {
        let path = self.data_dir.path().join(format!("{}.trace.log", name));
        let lines = self.trace_log.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::write(&path, lines.join("\n\n---\n\n"))?;
        Ok(path)
    }

    pub async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TestResult<(reqwest::StatusCode, Value)> {
        let url = format!("{}{}", self.api_base, path);
        let client = reqwest::Client::new();
        let mut req = client
            .request(method.clone(), &url)
            .timeout(Duration::from_secs(30));
        if let Some(payload) = body.clone() {
            req = req.json(&payload);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let parsed = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| {
            json!({
                "success": false,
                "raw": text,
                "error": format!("non-json response status={}", status)
            })
        });

        let mut traces = self.trace_log.lock().unwrap_or_else(|e| e.into_inner());
        traces.push(format!(
            "REQUEST {} {}\nBODY {}\nSTATUS {}\nRESPONSE {}",
            method,
            path,
            body.unwrap_or(Value::Null),
            status,
            parsed
        ));
        drop(traces);

        Ok((status, parsed))
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        let _ = self.persist_trace_file("daemon");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Clone)]
struct MockServerState {
    traces: Arc<Mutex<Vec<Vec<MockChatMessage>>>>,
    failing: Arc<AtomicBool>,
}

/// OpenAI-compatible chat completions endpoint with a switchable failure mode.
pub struct MockLlmServer {
    pub port: u16,
    traces: Arc<Mutex<Vec<Vec<MockChatMessage>>>>,
    failing: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MockChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct MockOpenAiRequest {
    messages: Vec<MockChatMessage>,
}

async fn mock_chat_completion(
    State(state): State<MockServerState>,
    Json(payload): Json<MockOpenAiRequest>,
) -> Response {
    state
        .traces
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(payload.messages.clone());

    if state.failing.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": "mock provider is down" } })),
        )
            .into_response();
    }

    let prompt = payload
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    Json(json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": format!("Mock digest for: {}", prompt)
            }
        }]
    }))
    .into_response()
}

impl MockLlmServer {
    pub async fn start() -> TestResult<Self> {
        let port = find_free_port()?;
        let traces = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(AtomicBool::new(false));
        let state = MockServerState {
            traces: Arc::clone(&traces),
            failing: Arc::clone(&failing),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(mock_chat_completion))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            port,
            traces,
            failing,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/v1/chat/completions", self.port)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Message lists received so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<MockChatMessage>> {
        self.traces.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Sandboxes without socket permissions skip the end-to-end suite.
pub fn bind_not_permitted(err: &(dyn std::error::Error + Send + Sync)) -> bool {
    err.to_string().contains("Operation not permitted")
}
