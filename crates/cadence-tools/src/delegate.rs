//! Internal services that tool calls are delegated to.

use crate::error::ToolDispatchError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Background agents can take a while to think; the pump keeps relaying meanwhile.
const DELEGATE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// A named background chat agent.
#[async_trait]
pub trait ChatDelegate: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<Value, ToolDispatchError>;
}

/// Runs administrative tasks. Callers must authorize before invoking.
#[async_trait]
pub trait AdminTaskExecutor: Send + Sync {
    async fn execute(&self, task: &str, parameters: Option<Value>) -> Result<Value, ToolDispatchError>;
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DELEGATE_TIMEOUT)
        .build()
        .unwrap_or_default()
}

async fn post_json<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<Value, ToolDispatchError> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ToolDispatchError::Service(format!("service returned {status}")));
    }
    Ok(response.json().await?)
}

/// Chat delegate that POSTs a [`ChatRequest`] to an internal URL.
#[derive(Debug, Clone)]
pub struct HttpChatDelegate {
    client: reqwest::Client,
    url: String,
}

impl HttpChatDelegate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ChatDelegate for HttpChatDelegate {
    async fn chat(&self, request: ChatRequest) -> Result<Value, ToolDispatchError> {
        post_json(&self.client, &self.url, &request).await
    }
}

#[derive(Serialize)]
struct AdminTaskRequest<'a> {
    task: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

/// Admin executor that POSTs `{task, parameters}` to an internal URL.
#[derive(Debug, Clone)]
pub struct HttpAdminExecutor {
    client: reqwest::Client,
    url: String,
}

impl HttpAdminExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AdminTaskExecutor for HttpAdminExecutor {
    async fn execute(&self, task: &str, parameters: Option<Value>) -> Result<Value, ToolDispatchError> {
        post_json(&self.client, &self.url, &AdminTaskRequest { task, parameters }).await
    }
}

/// Stands in for a service with no configured URL.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl AdminTaskExecutor for Unconfigured {
    async fn execute(&self, _task: &str, _parameters: Option<Value>) -> Result<Value, ToolDispatchError> {
        Err(ToolDispatchError::Service(format!("{} is not configured", self.0)))
    }
}

#[async_trait]
impl ChatDelegate for Unconfigured {
    async fn chat(&self, _request: ChatRequest) -> Result<Value, ToolDispatchError> {
        Err(ToolDispatchError::Service(format!("{} is not configured", self.0)))
    }
}
