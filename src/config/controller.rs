//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_CONFLICT_REQUEUE_MS,
    DEFAULT_CONTEXT_NAME, DEFAULT_GITHUB_API_URL, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
    DEFAULT_METRICS_PORT, DEFAULT_MIRROR_WRITE_DELAY_MS, DEFAULT_NAMESPACE,
    DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, DEFAULT_SERVER,
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap and a Secret using `envFrom` in the deployment.
#[derive(Clone)]
pub struct ControllerConfig {
    /// Namespace holding derived ServiceAccounts and token Secrets
    pub namespace: String,
    /// Context name written into generated kubeconfigs when a User does not set one
    pub context_name: String,
    /// Cluster endpoint written into generated kubeconfigs
    pub server: String,
    /// Base64 CA bundle written into generated kubeconfigs
    /// When empty, the CA of each token Secret is used instead
    pub ca: String,
    /// ClusterRole bound to users that request no roles at all
    /// Empty means such users get no bindings
    pub default_cluster_role: String,
    /// GitHub base URL; the public API when empty, `{url}/api/v3` for Enterprise
    pub github_url: String,
    /// GitHub token used for Actions secrets and variables
    /// GitHub synchronization is disabled when empty
    pub github_token: String,
    /// Minimum delay between consecutive GitHub writes (milliseconds)
    pub mirror_write_delay_ms: u64,
    /// HTTP server port for metrics and probes
    pub metrics_port: u16,
    /// HTTP server startup timeout (seconds)
    pub server_startup_timeout_secs: u64,
    /// HTTP server readiness poll interval (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Requeue interval after terminal errors (seconds)
    pub reconciliation_error_requeue_secs: u64,
    /// Requeue delay after a status write conflict (milliseconds)
    pub conflict_requeue_ms: u64,
    /// Fibonacci backoff floor for retryable errors (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for retryable errors (seconds)
    pub backoff_max_secs: u64,
    /// Maximum concurrent reconciliations per controller
    pub max_concurrent_reconciliations: u16,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("namespace", &self.namespace)
            .field("context_name", &self.context_name)
            .field("server", &self.server)
            .field("default_cluster_role", &self.default_cluster_role)
            .field("github_url", &self.github_url)
            .field("github_token", &if self.github_token.is_empty() { "" } else { "***" })
            .field("mirror_write_delay_ms", &self.mirror_write_delay_ms)
            .field("metrics_port", &self.metrics_port)
            .finish_non_exhaustive()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            server: DEFAULT_SERVER.to_string(),
            ca: String::new(),
            default_cluster_role: String::new(),
            github_url: String::new(),
            github_token: String::new(),
            mirror_write_delay_ms: DEFAULT_MIRROR_WRITE_DELAY_MS,
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            conflict_requeue_ms: DEFAULT_CONFLICT_REQUEUE_MS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            namespace: var_or_default_str(&lookup, "NAMESPACE", &defaults.namespace),
            context_name: var_or_default_str(&lookup, "CONTEXT_NAME", &defaults.context_name),
            server: var_or_default_str(&lookup, "SERVER", &defaults.server),
            ca: var_or_default_str(&lookup, "CA", ""),
            default_cluster_role: var_or_default_str(&lookup, "DEFAULT_CLUSTER_ROLE", ""),
            github_url: var_or_default_str(&lookup, "GITHUB_URL", ""),
            github_token: var_or_default_str(&lookup, "GITHUB_TOKEN", ""),
            mirror_write_delay_ms: var_or_default(
                &lookup,
                "MIRROR_WRITE_DELAY_MS",
                defaults.mirror_write_delay_ms,
            ),
            metrics_port: var_or_default(&lookup, "METRICS_PORT", defaults.metrics_port),
            server_startup_timeout_secs: var_or_default(
                &lookup,
                "SERVER_STARTUP_TIMEOUT_SECS",
                defaults.server_startup_timeout_secs,
            ),
            server_poll_interval_ms: var_or_default(
                &lookup,
                "SERVER_POLL_INTERVAL_MS",
                defaults.server_poll_interval_ms,
            ),
            reconciliation_error_requeue_secs: var_or_default(
                &lookup,
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                defaults.reconciliation_error_requeue_secs,
            ),
            conflict_requeue_ms: var_or_default(
                &lookup,
                "CONFLICT_REQUEUE_MS",
                defaults.conflict_requeue_ms,
            ),
            backoff_min_secs: var_or_default(&lookup, "BACKOFF_MIN_SECS", defaults.backoff_min_secs),
            backoff_max_secs: var_or_default(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            max_concurrent_reconciliations: var_or_default(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            log_level: var_or_default_str(&lookup, "LOG_LEVEL", &defaults.log_level),
            log_format: var_or_default_str(&lookup, "LOG_FORMAT", &defaults.log_format),
        }
    }

    /// GitHub synchronization is enabled only when a token is configured
    #[must_use]
    pub fn github_enabled(&self) -> bool {
        !self.github_token.is_empty()
    }

    /// Resolve the GitHub REST API base URL
    #[must_use]
    pub fn github_api_url(&self) -> String {
        if self.github_url.is_empty() {
            DEFAULT_GITHUB_API_URL.to_string()
        } else {
            format!("{}/api/v3", self.github_url.trim_end_matches('/'))
        }
    }

    /// Get minimum delay between GitHub writes
    pub fn mirror_write_delay(&self) -> Duration {
        Duration::from_millis(self.mirror_write_delay_ms)
    }

    /// Get terminal error requeue duration
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get conflict requeue duration
    pub fn conflict_requeue_duration(&self) -> Duration {
        Duration::from_millis(self.conflict_requeue_ms)
    }
}

/// Read a variable or return default value
fn var_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a variable as string or return default
fn var_or_default_str<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}
