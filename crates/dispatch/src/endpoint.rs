use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use callrun_core::{CallRunError, Result, RunTask};

/// Body of one batch-call request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest<'a> {
    pub from_number: &'a str,
    pub name: String,
    /// Unix milliseconds.
    pub trigger_timestamp: i64,
    pub tasks: &'a [RunTask],
}

/// External batch-call API. A success means every task in the batch was accepted.
#[async_trait]
pub trait DispatchEndpoint: Send + Sync {
    async fn send_batch(&self, request: &BatchRequest<'_>) -> Result<()>;
}

/// HTTP implementation: bearer-authenticated JSON POST, any 2xx is success.
#[derive(Debug, Clone)]
pub struct HttpDispatchEndpoint {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpDispatchEndpoint {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DispatchEndpoint for HttpDispatchEndpoint {
    async fn send_batch(&self, request: &BatchRequest<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CallRunError::ExternalDispatch(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(
                url = %self.url,
                %status,
                body = %body_text,
                tasks = request.tasks.len(),
                "dispatch endpoint returned non-2xx status"
            );
            return Err(CallRunError::ExternalDispatch(format!("HTTP {status} - {body_text}")));
        }

        debug!(url = %self.url, %status, tasks = request.tasks.len(), "batch accepted");
        Ok(())
    }
}

/// Endpoint used when no API key is configured: every batch fails.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredEndpoint;

#[async_trait]
impl DispatchEndpoint for UnconfiguredEndpoint {
    async fn send_batch(&self, _request: &BatchRequest<'_>) -> Result<()> {
        Err(CallRunError::ExternalDispatch("dispatch API key not configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn request_serializes_payload_shape() {
        let tasks = vec![RunTask {
            to_number: "+12145550101".into(),
            agent_id: "agent_1".into(),
            dynamic_variables: BTreeMap::new(),
        }];
        let req = BatchRequest {
            from_number: "+12145550000",
            name: "Batch Run 1 – 2024-01-10 09:00:00".into(),
            trigger_timestamp: 1_704_898_800_000,
            tasks: &tasks,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["from_number"], "+12145550000");
        assert_eq!(v["trigger_timestamp"], 1_704_898_800_000i64);
        assert_eq!(v["tasks"][0]["agent_id"], "agent_1");
    }

    #[tokio::test]
    async fn unconfigured_always_fails() {
        let err = UnconfiguredEndpoint
            .send_batch(&BatchRequest {
                from_number: "x",
                name: "n".into(),
                trigger_timestamp: 0,
                tasks: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallRunError::ExternalDispatch(_)));
    }
}
