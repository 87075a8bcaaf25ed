//! Remote executor client
//!
//! A remote executor is an HTTP agent accepting `POST /v1/execute` with the
//! unit as JSON and answering with the attempt result. Transport failures
//! and timeouts fall back to local execution of the unit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RemoteExecutorConfig;
use crate::executor::{ExecutionContext, UnitExecutor};
use crate::models::{AttemptResult, TestUnit};

/// Remote executor errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Executor answered with status {0}")]
    Status(u16),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    unit: &'a TestUnit,
    attempt: u32,
    output_dir: &'a Path,
}

/// Executes units on a remote agent
pub struct RemoteExecutor {
    id: String,
    url: String,
    client: Client,
    access_key: Option<String>,
    timeout: Duration,
    fallback: Arc<dyn UnitExecutor>,
}

impl RemoteExecutor {
    pub fn new(
        agent: &RemoteExecutorConfig,
        access_key: Option<String>,
        timeout: Duration,
        fallback: Arc<dyn UnitExecutor>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            id: agent.id.clone(),
            url: format!("{}/v1/execute", agent.endpoint.trim_end_matches('/')),
            client,
            access_key,
            timeout,
            fallback,
        })
    }

    async fn execute_remote(
        &self,
        unit: &TestUnit,
        ctx: &ExecutionContext,
    ) -> std::result::Result<AttemptResult, RemoteError> {
        let body = ExecuteRequest {
            unit,
            attempt: ctx.attempt,
            output_dir: &ctx.output_dir,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.access_key {
            request = request.bearer_auth(key);
        }

        debug!("POST {} ({})", self.url, unit.id);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else if e.is_connect() {
                RemoteError::ConnectionRefused(self.url.clone())
            } else {
                RemoteError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let result: AttemptResult = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else {
                RemoteError::InvalidResponse(e.to_string())
            }
        })?;

        if result.unit_id != unit.id {
            return Err(RemoteError::InvalidResponse(format!(
                "result for {} while executing {}",
                result.unit_id, unit.id
            )));
        }

        Ok(result)
    }
}

#[async_trait]
impl UnitExecutor for RemoteExecutor {
    async fn execute(&self, unit: &TestUnit, ctx: &ExecutionContext) -> Result<AttemptResult> {
        match self.execute_remote(unit, ctx).await {
            Ok(result) => Ok(result.on_executor(self.name())),
            Err(e) => {
                warn!(
                    "Remote executor {} unavailable ({}), executing {} locally",
                    self.id, e, unit.id
                );
                self.fallback.execute(unit, ctx).await
            }
        }
    }

    fn name(&self) -> String {
        format!("remote:{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedExecutor;
    use crate::models::TestStatus;
    use tokio::net::TcpListener;

    fn agent(endpoint: &str) -> RemoteExecutorConfig {
        RemoteExecutorConfig {
            id: "agent-1".to_string(),
            endpoint: endpoint.to_string(),
            tags: vec!["os=linux".to_string()],
        }
    }

    #[test]
    fn test_url_and_name() {
        let executor = RemoteExecutor::new(
            &agent("http://10.0.0.21:8420/"),
            None,
            Duration::from_secs(5),
            Arc::new(ScriptedExecutor::new()),
        )
        .unwrap();
        assert_eq!(executor.url, "http://10.0.0.21:8420/v1/execute");
        assert_eq!(executor.name(), "remote:agent-1");
    }

    #[tokio::test]
    async fn test_unreachable_agent_falls_back_to_local() {
        let fallback = Arc::new(ScriptedExecutor::new());
        let executor = RemoteExecutor::new(
            &agent("http://127.0.0.1:9"),
            Some("key".to_string()),
            Duration::from_secs(2),
            fallback.clone(),
        )
        .unwrap();

        let unit = TestUnit::new("RemoteTest", vec!["true".into()]);
        let ctx = ExecutionContext::new(1, "junit-1");
        let result = executor.execute(&unit, &ctx).await.unwrap();

        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.executor, "scripted");
        assert_eq!(fallback.calls(), vec![("RemoteTest".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_silent_agent_times_out_then_falls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fallback = Arc::new(ScriptedExecutor::new());
        let executor = RemoteExecutor::new(
            &agent(&format!("http://{addr}")),
            None,
            Duration::from_millis(200),
            fallback.clone(),
        )
        .unwrap();

        let unit = TestUnit::new("SlowTest", vec!["true".into()]);
        let ctx = ExecutionContext::new(1, "junit-1");

        let err = executor.execute_remote(&unit, &ctx).await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout(_)), "{err}");

        let result = executor.execute(&unit, &ctx).await.unwrap();
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(fallback.calls(), vec![("SlowTest".to_string(), 1)]);

        server.abort();
    }
}
