//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the custom resources served by this controller
pub const API_GROUP: &str = "access.octopilot.io";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "user-access-controller";

/// Finalizer placed on `User` resources so removal can prune derived objects
pub const USER_FINALIZER: &str = "access.octopilot.io/user-cleanup";

/// Finalizer placed on `UserSyncGithub` resources so the mirrored secret can be removed
pub const USER_SYNC_FINALIZER: &str = "access.octopilot.io/github-cleanup";

/// Annotation linking a derived ServiceAccount back to its User
pub const USER_ANNOTATION: &str = "access.octopilot.io/user";

/// Prefix for generated binding names
pub const BINDING_NAME_PREFIX: &str = "access";

/// Maximum length of a Kubernetes object name (DNS label)
pub const MAX_NAME_LENGTH: usize = 63;

/// Length of the binding name hash suffix (hex characters)
pub const NAME_HASH_LENGTH: usize = 8;

/// Object-set id used for everything derived from a `User`
pub const USER_SET_ID: &str = "access-user";

/// Object-set id used for the kubeconfig derived from a token Secret
pub const SECRET_SET_ID: &str = "access-secret";

/// Object-set id of `UserSyncGithub`, which derives no cluster objects
pub const USER_SYNC_SET_ID: &str = "access-usersync";

/// Label carrying the owner hash, used to list everything an owner applied
pub const OBJECTSET_HASH_LABEL: &str = "objectset.access.octopilot.io/hash";

/// Annotation carrying the object-set id
pub const OBJECTSET_ID_ANNOTATION: &str = "objectset.access.octopilot.io/id";

/// Annotation carrying the owner's group/version/kind
pub const OWNER_GVK_ANNOTATION: &str = "objectset.access.octopilot.io/owner-gvk";

/// Annotation carrying the owner's name
pub const OWNER_NAME_ANNOTATION: &str = "objectset.access.octopilot.io/owner-name";

/// Annotation carrying the owner's namespace
pub const OWNER_NAMESPACE_ANNOTATION: &str = "objectset.access.octopilot.io/owner-namespace";

/// Annotation carrying the hash of the last applied desired content
pub const APPLIED_HASH_ANNOTATION: &str = "objectset.access.octopilot.io/applied-hash";

/// Secret type of service account tokens
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Annotation binding a token Secret to its ServiceAccount
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Annotation holding the uid of the ServiceAccount a token Secret was issued for
pub const SERVICE_ACCOUNT_UID_ANNOTATION: &str = "kubernetes.io/service-account.uid";

/// First Kubernetes minor version that no longer auto-provisions token Secrets
pub const TOKEN_SECRET_MIN_MINOR_VERSION: u32 = 24;

/// Status condition maintained on every source object
pub const READY_CONDITION: &str = "Ready";

/// GitHub Actions variable listing the secret names this controller created
pub const MANAGED_SECRETS_VARIABLE: &str = "ACCESS_MANAGED_SECRETS";

/// User agent sent to the GitHub API
pub const GITHUB_USER_AGENT: &str = "user-access-controller";

/// Public GitHub API endpoint
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST API version header value
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Default namespace holding derived ServiceAccounts and token Secrets
pub const DEFAULT_NAMESPACE: &str = "access-system";

/// Default kubeconfig context name
pub const DEFAULT_CONTEXT_NAME: &str = "default";

/// Default cluster endpoint written into generated kubeconfigs
pub const DEFAULT_SERVER: &str = "https://localhost:6443";

/// Namespace used for the kubeconfig context when nothing else applies
pub const FALLBACK_CONTEXT_NAMESPACE: &str = "default";

/// Default minimum delay between consecutive GitHub writes (milliseconds)
pub const DEFAULT_MIRROR_WRITE_DELAY_MS: u64 = 1000;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval for terminal reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 300;

/// Default requeue delay after a status write conflict (milliseconds)
pub const DEFAULT_CONFLICT_REQUEUE_MS: u64 = 500;

/// Default Fibonacci backoff floor for retryable errors (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default Fibonacci backoff ceiling for retryable errors (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default number of concurrent reconciliations per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 4;
