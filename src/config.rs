//! Controller configuration
//!
//! Every setting is a command-line flag with an environment variable
//! fallback, so the same binary works from a shell and from a Deployment.

use std::time::Duration;

use clap::Args;

/// Field manager recorded on every write
pub const DEFAULT_FIELD_MANAGER: &str = "webapp-operator";

/// Runtime configuration for the WebApp controller
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Only watch WebApps in this namespace (all namespaces when unset)
    #[arg(long = "namespace", env = "WEBAPP_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Field manager name used for create, patch and status writes
    #[arg(long, env = "WEBAPP_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    /// Upper bound on a single reconciliation pass, in seconds
    #[arg(long, env = "WEBAPP_RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout_secs: u64,

    /// Delay before retrying after a transient failure, in seconds
    #[arg(long, env = "WEBAPP_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Delay before retrying after an update conflict, in seconds
    #[arg(long, env = "WEBAPP_CONFLICT_REQUEUE_SECS", default_value_t = 1)]
    pub conflict_requeue_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            reconcile_timeout_secs: 30,
            error_requeue_secs: 30,
            conflict_requeue_secs: 1,
        }
    }
}

impl ControllerConfig {
    /// Upper bound on a single reconciliation pass
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Delay before retrying after a transient failure
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Delay before retrying after an update conflict
    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_secs(self.conflict_requeue_secs)
    }
}
