//! Room coordinator configuration.
//!
//! Configuration is loaded from environment variables. Sensitive fields
//! are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default timeout for cluster-forwarded operations, in milliseconds.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;

/// Default priority assigned to middleware registered without one.
pub const DEFAULT_MIDDLEWARE_PRIORITY: i32 = 100;

/// Default server instance ID prefix.
pub const DEFAULT_SERVER_ID_PREFIX: &str = "room";

/// Room coordinator configuration.
///
/// Loaded from environment variables with sensible defaults. The cluster
/// token is a shared secret embedded in broadcast envelopes so receivers
/// can reject messages that did not originate inside the cluster.
#[derive(Clone)]
pub struct Config {
    /// Shared store connection URL (e.g. `redis://localhost:6379`).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// Shared cluster token carried in broadcast envelopes.
    /// Protected by `SecretString` to prevent accidental logging.
    pub cluster_token: SecretString,

    /// Unique identifier for this process instance.
    pub server_id: String,

    /// Timeout for cluster-forwarded operations in milliseconds.
    pub rpc_timeout_ms: u64,

    /// Priority assigned to middleware registered without one.
    pub default_middleware_priority: i32,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("cluster_token", &"[REDACTED]")
            .field("server_id", &self.server_id)
            .field("rpc_timeout_ms", &self.rpc_timeout_ms)
            .field(
                "default_middleware_priority",
                &self.default_middleware_priority,
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("ROOMS_REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("ROOMS_REDIS_URL".to_string()))?
                .clone(),
        );

        let cluster_token = SecretString::from(
            vars.get("ROOMS_CLUSTER_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("ROOMS_CLUSTER_TOKEN".to_string()))?
                .clone(),
        );

        let rpc_timeout_ms = match vars.get("ROOMS_RPC_TIMEOUT_MS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("ROOMS_RPC_TIMEOUT_MS: {raw}"))
            })?,
            None => DEFAULT_RPC_TIMEOUT_MS,
        };

        let default_middleware_priority = match vars.get("ROOMS_DEFAULT_MIDDLEWARE_PRIORITY") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("ROOMS_DEFAULT_MIDDLEWARE_PRIORITY: {raw}"))
            })?,
            None => DEFAULT_MIDDLEWARE_PRIORITY,
        };

        // Generate a server instance ID unless one is pinned
        let server_id = vars.get("ROOMS_SERVER_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            cluster_token,
            server_id,
            rpc_timeout_ms,
            default_middleware_priority,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "ROOMS_REDIS_URL".to_string(),
                "redis://localhost:6379".to_string(),
            ),
            (
                "ROOMS_CLUSTER_TOKEN".to_string(),
                "cluster-token-123".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.redis_url.expose_secret(), "redis://localhost:6379");
        assert_eq!(config.cluster_token.expose_secret(), "cluster-token-123");
        assert_eq!(config.rpc_timeout_ms, DEFAULT_RPC_TIMEOUT_MS);
        assert_eq!(
            config.default_middleware_priority,
            DEFAULT_MIDDLEWARE_PRIORITY
        );
        // Server ID should be auto-generated
        assert!(config.server_id.starts_with("room-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("ROOMS_SERVER_ID".to_string(), "room-custom-001".to_string());
        vars.insert("ROOMS_RPC_TIMEOUT_MS".to_string(), "250".to_string());
        vars.insert(
            "ROOMS_DEFAULT_MIDDLEWARE_PRIORITY".to_string(),
            "42".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.server_id, "room-custom-001");
        assert_eq!(config.rpc_timeout_ms, 250);
        assert_eq!(config.default_middleware_priority, 42);
    }

    #[test]
    fn test_from_vars_missing_redis_url() {
        let mut vars = base_vars();
        vars.remove("ROOMS_REDIS_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ROOMS_REDIS_URL"));
    }

    #[test]
    fn test_from_vars_missing_cluster_token() {
        let mut vars = base_vars();
        vars.remove("ROOMS_CLUSTER_TOKEN");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ROOMS_CLUSTER_TOKEN")
        );
    }

    #[test]
    fn test_from_vars_invalid_timeout() {
        let mut vars = base_vars();
        vars.insert("ROOMS_RPC_TIMEOUT_MS".to_string(), "soon".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let vars = base_vars();
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("redis://"));
        assert!(!debug_output.contains("cluster-token-123"));
    }
}
