//! HTTP client for the session/run read model.
//!
//! Endpoints, relative to the base URL:
//! - `GET  /sessions`, `GET /sessions/{id}`, `GET /sessions/{id}/runs`
//! - `GET  /runs/{id}`, `GET /runs/{id}/events`
//! - `POST /runs`, `PATCH /runs/{id}`

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use flowsync_core::config::FlowConfig;
use flowsync_core::control::RunWriter;
use flowsync_core::engine::RunState;
use flowsync_core::model::{ExecutionRun, ExecutionSession};
use flowsync_core::store::{ReadModel, RunEvents};
use flowsync_core::{FlowError, FlowResult};

use crate::error::RemoteError;

/// Body of a run state change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatePatch {
    pub code_run_state: RunState,
}

/// HTTP read model and run writer.
#[derive(Clone)]
pub struct HttpReadModel {
    client: reqwest::Client,
    base_url: Url,
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl HttpReadModel {
    /// Create a client for `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> FlowResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()).into());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            base_url,
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        })
    }

    pub fn from_config(config: &FlowConfig) -> FlowResult<Self> {
        let mut read_model = Self::new(&config.read_model_url, config.http_timeout())?;
        read_model.max_retries = config.write_max_retries;
        Ok(read_model)
    }

    /// Override the retry settings for writes.
    pub fn with_retry(mut self, max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Base URL extended by `segments`.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET `url`; `None` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, RemoteError> {
        tracing::trace!(url = %url, "GET");
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.json().await?))
    }

    /// Send a write, retrying transient failures with exponential backoff.
    async fn write_with_retry<F, Fut>(&self, operation: &str, mut attempt_write: F) -> Result<(), RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let mut delay = self.initial_delay;

        for attempt in 0..=self.max_retries {
            match attempt_write().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        operation,
                        "Run store write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                }
                Err(e) => {
                    tracing::error!(operation, error = %e, "Run store write failed");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), RemoteError> {
        let response = request.send().await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ReadModel for HttpReadModel {
    async fn fetch_sessions(&self) -> FlowResult<Vec<ExecutionSession>> {
        let url = self.endpoint(&["sessions"])?;
        self.get_json(url)
            .await?
            .ok_or_else(|| FlowError::NotFound("sessions endpoint".to_string()))
    }

    async fn fetch_session(&self, session_id: Uuid) -> FlowResult<Option<ExecutionSession>> {
        let url = self.endpoint(&["sessions", &session_id.to_string()])?;
        Ok(self.get_json(url).await?)
    }

    async fn fetch_session_runs(&self, session_id: Uuid) -> FlowResult<Vec<ExecutionRun>> {
        let url = self.endpoint(&["sessions", &session_id.to_string(), "runs"])?;
        Ok(self.get_json(url).await?.unwrap_or_default())
    }

    async fn fetch_run(&self, run_id: Uuid) -> FlowResult<Option<ExecutionRun>> {
        let url = self.endpoint(&["runs", &run_id.to_string()])?;
        Ok(self.get_json(url).await?)
    }

    async fn fetch_run_events(&self, run_id: Uuid) -> FlowResult<RunEvents> {
        let url = self.endpoint(&["runs", &run_id.to_string(), "events"])?;
        Ok(self.get_json(url).await?.unwrap_or_default())
    }
}

#[async_trait]
impl RunWriter for HttpReadModel {
    async fn create_run(&self, run: &ExecutionRun) -> FlowResult<()> {
        let url = self.endpoint(&["runs"])?;
        self.write_with_retry("create_run", || self.send(self.client.post(url.clone()).json(run)))
            .await?;
        tracing::debug!(run_id = %run.id, "Run created");
        Ok(())
    }

    async fn update_run_state(&self, run_id: Uuid, state: RunState) -> FlowResult<()> {
        let url = self.endpoint(&["runs", &run_id.to_string()])?;
        let patch = RunStatePatch { code_run_state: state };
        self.write_with_retry("update_run_state", || {
            self.send(self.client.patch(url.clone()).json(&patch))
        })
        .await?;
        tracing::debug!(run_id = %run_id, state = %state, "Run state written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_paths() {
        let read_model = HttpReadModel::new("http://localhost:8090/api/", Duration::from_secs(5)).unwrap();
        let id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();

        assert_eq!(
            read_model.endpoint(&["sessions"]).unwrap().as_str(),
            "http://localhost:8090/api/sessions"
        );
        assert_eq!(
            read_model
                .endpoint(&["sessions", &id.to_string(), "runs"])
                .unwrap()
                .as_str(),
            "http://localhost:8090/api/sessions/11111111-1111-1111-1111-111111111111/runs"
        );
    }

    #[test]
    fn test_endpoint_without_trailing_slash() {
        let read_model = HttpReadModel::new("http://localhost:8090/api", Duration::from_secs(5)).unwrap();
        assert_eq!(
            read_model.endpoint(&["runs"]).unwrap().as_str(),
            "http://localhost:8090/api/runs"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpReadModel::new("not a url", Duration::from_secs(5)),
            Err(FlowError::Config(_))
        ));
        assert!(matches!(
            HttpReadModel::new("mailto:ops@example.com", Duration::from_secs(5)),
            Err(FlowError::Config(_))
        ));
    }

    #[test]
    fn test_state_patch_body() {
        let patch = RunStatePatch {
            code_run_state: RunState::WindowClosed,
        };
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"{"code_run_state":"window_closed"}"#
        );
    }

    #[test]
    fn test_write_gives_up_after_retries() {
        tokio_test::block_on(async {
            let read_model = HttpReadModel::new("http://127.0.0.1:9/api", Duration::from_secs(2))
                .unwrap()
                .with_retry(1, Duration::from_millis(1), Duration::from_millis(2));

            let err = read_model
                .update_run_state(Uuid::new_v4(), RunState::Paused)
                .await
                .unwrap_err();
            assert!(matches!(err, FlowError::Transport(_)));
        });
    }
}
