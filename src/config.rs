//! Gateway configuration, loaded entirely from the environment.
//!
//! Unlike the heavier TOML/YAML-file configuration this codebase uses
//! elsewhere, the gateway's configuration surface is small enough that
//! environment variables alone (with documented defaults) are sufficient,
//! following the same "env var first" precedence the rest of the stack
//! applies to individual settings such as `SECRET_KEY`.

use std::env;
use std::time::Duration;

/// Runtime configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the upstream agent service, e.g. `http://localhost:8001`.
    pub agent_service_url: String,
    /// How long a terminal stream is retained before the janitor reaps it.
    pub session_timeout: Duration,
    /// How often the janitor sweeps the registry for reapable streams.
    pub cleanup_interval: Duration,
    /// Reserved identity allowed to read/send into any chat.
    pub admin_user_id: Option<String>,
    /// Host to bind the HTTP/WebSocket listener to.
    pub host: String,
    /// Port to bind the HTTP/WebSocket listener to.
    pub port: u16,
    /// sqlx connection string for the message store.
    pub database_url: String,
    /// Timeout for the upstream agent request as a whole.
    pub upstream_timeout: Duration,
}

impl GatewayConfig {
    /// Build configuration from environment variables, applying the
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            agent_service_url: env::var("AGENT_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            session_timeout: Duration::from_secs(env_u64("SESSION_TIMEOUT_SECONDS", 3600)),
            cleanup_interval: Duration::from_secs(env_u64("SESSION_CLEANUP_INTERVAL", 300)),
            admin_user_id: env::var("ADMIN_USER_ID").ok(),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_u64("PORT", 8000) as u16,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://gateway.db".to_string()),
            upstream_timeout: Duration::from_secs(7200),
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_id.as_deref() == Some(user_id)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        env::remove_var("SESSION_TIMEOUT_SECONDS");
        env::remove_var("SESSION_CLEANUP_INTERVAL");
        let cfg = GatewayConfig::from_env();
        assert_eq!(cfg.session_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(300));
    }

    #[test]
    fn admin_check() {
        let mut cfg = GatewayConfig::from_env();
        cfg.admin_user_id = Some("IJIgxK".to_string());
        assert!(cfg.is_admin("IJIgxK"));
        assert!(!cfg.is_admin("someone-else"));
    }
}
