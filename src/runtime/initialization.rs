//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! Kubernetes client and reconciler wiring.

use crate::config::ControllerConfig;
use crate::controller::apply::KubeObjectStore;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability::{self, PrometheusObserver};
use crate::provider::{GithubSecretStore, MirrorSecretStore};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
/// Fails if metrics cannot be registered, the HTTP server does not come up,
/// the cluster is unreachable or reports an unparseable version, or the
/// GitHub client cannot be built.
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let config = ControllerConfig::from_env();
    init_tracing(&config);

    info!("Starting User Access Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!("Configuration: {:?}", config);

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let version = client
        .apiserver_version()
        .await
        .context("Failed to query Kubernetes API server version")?;
    let minor_version = parse_minor_version(&version.minor)?;
    info!(
        "Kubernetes API server version {}.{}",
        version.major, minor_version
    );

    let mirror: Option<Arc<dyn MirrorSecretStore>> = if config.github_enabled() {
        let store = GithubSecretStore::new(&config.github_api_url(), config.github_token.clone())
            .context("Failed to create GitHub client")?;
        info!("GitHub synchronization enabled against {}", store.base_url());
        Some(Arc::new(store))
    } else {
        warn!("GITHUB_TOKEN is not set, GitHub synchronization is disabled");
        None
    };

    let reconciler = Arc::new(Reconciler::new(
        config,
        Arc::new(KubeObjectStore::new(client.clone())),
        mirror,
        minor_version,
        Arc::new(PrometheusObserver),
    ));

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

fn init_tracing(config: &ControllerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "user_access_controller={}",
            config.log_level.to_lowercase()
        ))
    });

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Minor version as reported by the API server
///
/// Managed distributions append a `+`, as in `30+`.
///
/// # Errors
/// Fails when the value is not a number.
pub fn parse_minor_version(minor: &str) -> Result<u32> {
    minor
        .trim()
        .trim_end_matches('+')
        .parse()
        .with_context(|| format!("Unrecognised Kubernetes minor version '{minor}'"))
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.server_poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minor_version() {
        assert_eq!(parse_minor_version("30").unwrap(), 30);
        assert_eq!(parse_minor_version("27+").unwrap(), 27);
        assert!(parse_minor_version("").is_err());
        assert!(parse_minor_version("x").is_err());
    }
}
