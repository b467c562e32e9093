use std::collections::HashMap;

/// Complete orchestrator configuration, loaded once at startup.
///
/// Loading is two-phase: [`OrchestratorConfig::from_env`] parses every
/// variable with a default, then [`OrchestratorConfig::validate`] aggregates
/// every violation into one error so the binary fails loudly, once, before
/// any background task starts.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub backend_status_url: String,
    pub backend_url: String,
    /// api_type -> set of valid worker tokens.
    pub worker_tokens: HashMap<String, Vec<String>>,
    pub worker_heartbeat_interval_secs: u64,
    pub worker_timeout_secs: u64,
    pub task_timeout_secs: u64,
    pub task_retry_limit: u32,
    pub log_level: String,
}

const DEFAULT_API_TYPES: &[&str] = &["crunchbase", "tracxn", "social"];

impl OrchestratorConfig {
    /// Parse configuration from environment variables, applying the documented defaults.
    pub fn from_env() -> Self {
        Self {
            host: env_or("ORCHESTRATOR_HOST", "0.0.0.0"),
            port: env_parse_or("ORCHESTRATOR_PORT", 8010),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379/1"),
            backend_status_url: env_or(
                "BACKEND_STATUS_URL",
                "http://backend:8000/api/reports/status-update/",
            ),
            backend_url: env_or("BACKEND_URL", "http://backend:8000"),
            worker_tokens: load_worker_tokens(),
            worker_heartbeat_interval_secs: env_parse_or("WORKER_HEARTBEAT_INTERVAL", 10),
            worker_timeout_secs: env_parse_or("WORKER_TIMEOUT", 60),
            task_timeout_secs: env_parse_or("TASK_TIMEOUT", 7200),
            task_retry_limit: env_parse_or("TASK_RETRY_LIMIT", 3),
            log_level: env_or("LOG_LEVEL", "INFO"),
        }
    }

    /// Validate every field, aggregating all violations rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.port == 0 {
            errors.push("ORCHESTRATOR_PORT must be > 0".into());
        }
        if self.redis_url.is_empty() {
            errors.push("REDIS_URL must not be empty".into());
        }
        if self.backend_status_url.is_empty() {
            errors.push("BACKEND_STATUS_URL must not be empty".into());
        }
        if self.backend_url.is_empty() {
            errors.push("BACKEND_URL must not be empty".into());
        }
        if self.worker_heartbeat_interval_secs == 0 {
            errors.push("WORKER_HEARTBEAT_INTERVAL must be > 0".into());
        }
        if self.worker_timeout_secs < self.worker_heartbeat_interval_secs {
            errors.push(
                "WORKER_TIMEOUT must be >= WORKER_HEARTBEAT_INTERVAL".into(),
            );
        }
        if self.task_timeout_secs == 0 {
            errors.push("TASK_TIMEOUT must be > 0".into());
        }
        if self.task_retry_limit == 0 {
            errors.push("TASK_RETRY_LIMIT must be > 0".into());
        }
        for api_type in DEFAULT_API_TYPES {
            match self.worker_tokens.get(*api_type) {
                Some(tokens) if !tokens.is_empty() => {}
                _ => errors.push(format!(
                    "WORKER_TOKENS_{} must name at least one token",
                    api_type.to_uppercase()
                )),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// Working timeout: tolerates a worker suppressing heartbeats during a blocking call.
    pub fn worker_working_timeout_secs(&self) -> u64 {
        self.worker_timeout_secs * 3
    }

    /// TTL for non-terminal task records: 2x the expected maximum task duration.
    pub fn task_pending_ttl_secs(&self) -> u64 {
        self.task_timeout_secs * 2
    }

    /// TTL for terminal task records, so submitters can still poll the result.
    pub fn task_terminal_ttl_secs(&self) -> u64 {
        3600
    }

    /// TTL for a worker record: 2x the idle timeout.
    pub fn worker_ttl_secs(&self) -> u64 {
        self.worker_timeout_secs * 2
    }
}

fn load_worker_tokens() -> HashMap<String, Vec<String>> {
    let mut tokens = HashMap::new();
    for api_type in DEFAULT_API_TYPES {
        let env_key = format!("WORKER_TOKENS_{}", api_type.to_uppercase());
        let values: Vec<String> = std::env::var(&env_key)
            .unwrap_or_default()
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if values.is_empty() {
            tracing::warn!(
                api_type = *api_type,
                "No worker tokens configured, falling back to a development default"
            );
            tokens.insert(api_type.to_string(), vec![format!("dev-{}-token", api_type)]);
        } else {
            tokens.insert(api_type.to_string(), values);
        }
    }
    tokens
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

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let mut config = OrchestratorConfig::from_env();
        // from_env() falls back to dev tokens when unset, which should already validate.
        config.worker_tokens.insert(
            "crunchbase".into(),
            vec!["dev-crunchbase-token".into()],
        );
        config
            .worker_tokens
            .insert("tracxn".into(), vec!["dev-tracxn-token".into()]);
        config
            .worker_tokens
            .insert("social".into(), vec!["dev-social-token".into()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn aggregates_multiple_errors() {
        let config = OrchestratorConfig {
            host: "0.0.0.0".into(),
            port: 0,
            redis_url: String::new(),
            backend_status_url: "http://x".into(),
            backend_url: "http://x".into(),
            worker_tokens: HashMap::new(),
            worker_heartbeat_interval_secs: 10,
            worker_timeout_secs: 60,
            task_timeout_secs: 7200,
            task_retry_limit: 3,
            log_level: "INFO".into(),
        };

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ORCHESTRATOR_PORT"));
        assert!(message.contains("REDIS_URL"));
        assert!(message.contains("WORKER_TOKENS_CRUNCHBASE"));
    }

    #[test]
    fn working_timeout_is_three_times_idle() {
        let mut config = OrchestratorConfig::from_env();
        config.worker_timeout_secs = 60;
        assert_eq!(config.worker_working_timeout_secs(), 180);
    }
}
