//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use user_access_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Apply engine and store seam
pub use crate::controller::apply::{
    ApplyError, ApplyReport, DesiredObject, ObjectKey, ObjectKind, ObjectSet, ObjectStore, Owner,
    StoreError,
};

// Generic reconcile algorithm
pub use crate::controller::generating::{
    Generated, GeneratingHandler, GeneratingOptions, GeneratingPolicy, HandleOutcome,
    PolicyError, SourceObject,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    CredentialDeriver, CredentialOutcome, IdentityPolicy, MirrorPolicy, Reconciler,
    ReconcilerError,
};

// External secret store
pub use crate::provider::{MirrorSecretStore, MirrorSync};

// Config types - for configuration management
pub use crate::config::ControllerConfig;

// Observer seam
pub use crate::observability::{PrometheusObserver, ReconcileObserver, RecordingObserver};
