use crate::adapter;
use crate::error::{AgentError, Result};

/// Executes a task by calling the local scraper API. No request timeout is
/// set: scrapes legitimately run for hours (SPEC_FULL.md §4.7).
pub struct TaskExecutor {
    http: reqwest::Client,
    local_api_url: String,
    api_type: String,
}

impl TaskExecutor {
    pub fn new(local_api_url: String, api_type: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            local_api_url,
            api_type,
        }
    }

    pub async fn execute(
        &self,
        action: &str,
        payload: &serde_json::Value,
        report_id: &str,
    ) -> Result<serde_json::Value> {
        let endpoint = adapter::endpoint_for(&self.api_type, action);
        let url = format!("{}{}", self.local_api_url, endpoint);
        let body = adapter::prepare_payload(&self.api_type, action, payload, report_id);

        tracing::info!(url = %url, "calling local API");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::LocalApi(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let truncated: String = text.chars().take(500).collect();
            return Err(AgentError::LocalApi(format!("API returned {status}: {truncated}")));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AgentError::LocalApi(e.to_string()))
    }

    pub async fn wait_for_ready(&self, max_wait_secs: u64) -> bool {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(max_wait_secs);
        let probe = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut attempt = 0;
        while tokio::time::Instant::now() < deadline {
            attempt += 1;
            if let Ok(response) = probe.get(format!("{}/health", self.local_api_url)).send().await {
                if response.status().is_success() {
                    tracing::info!(attempt, "local API is ready");
                    return true;
                }
            }
            tracing::info!(attempt, "local API not ready yet");
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        tracing::error!("local API not ready after {max_wait_secs}s");
        false
    }
}
