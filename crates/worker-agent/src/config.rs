/// Worker agent configuration, loaded once at startup from environment variables.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub orchestrator_ws_url: String,
    pub api_type: String,
    pub worker_token: String,
    pub local_api_url: String,
    pub agent_status_port: u16,
    pub heartbeat_interval_secs: u64,
    pub worker_name: String,
    pub worker_version: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            orchestrator_ws_url: env_or("ORCHESTRATOR_WS_URL", "ws://127.0.0.1:8010/worker"),
            api_type: env_or("WORKER_API_TYPE", "crunchbase"),
            worker_token: env_or("WORKER_TOKEN", "dev-crunchbase-token"),
            local_api_url: env_or("LOCAL_API_URL", "http://127.0.0.1:8000"),
            agent_status_port: env_parse_or("AGENT_STATUS_PORT", 9090),
            heartbeat_interval_secs: env_parse_or("WORKER_HEARTBEAT_INTERVAL", 10),
            worker_name: env_or("WORKER_NAME", "worker-agent"),
            worker_version: env_or("WORKER_VERSION", "0.1.0"),
            max_reconnect_attempts: env_parse_or("MAX_RECONNECT_ATTEMPTS", 0),
            reconnect_delay_secs: env_parse_or("RECONNECT_DELAY", 5),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();
        if self.orchestrator_ws_url.is_empty() {
            errors.push("ORCHESTRATOR_WS_URL must not be empty".to_string());
        }
        if self.worker_token.is_empty() {
            errors.push("WORKER_TOKEN must not be empty".to_string());
        }
        if self.local_api_url.is_empty() {
            errors.push("LOCAL_API_URL must not be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_token() {
        let mut config = AgentConfig::from_env();
        config.worker_token = String::new();
        assert!(config.validate().is_err());
    }
}
