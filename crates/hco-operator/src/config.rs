//! Operator process configuration
//!
//! Every setting is a CLI flag that can also come from the environment, so
//! the same binary runs from a Deployment (downward API env vars) or a
//! developer shell.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use hco_common::{Error, Result};

/// Service account file holding the namespace the pod runs in
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Env var naming the operator namespace
pub const OPERATOR_NAMESPACE_ENV: &str = "OPERATOR_NAMESPACE";

/// Env var naming the namespace watched for `HyperConverged`
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// Env var naming the operator pod
pub const POD_NAME_ENV: &str = "POD_NAME";

/// Env var forcing the run mode
pub const FORCE_RUN_MODE_ENV: &str = "OSDK_FORCE_RUN_MODE";

/// Where the operator is running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Outside a cluster, e.g. from a developer machine
    Local,
    /// Inside a cluster pod
    Cluster,
}

/// Operator settings
#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the operator runs in
    #[arg(long, env = OPERATOR_NAMESPACE_ENV)]
    pub operator_namespace: Option<String>,

    /// Namespace watched for HyperConverged objects
    #[arg(long, env = WATCH_NAMESPACE_ENV)]
    pub watch_namespace: Option<String>,

    /// Name of the operator pod
    #[arg(long, env = POD_NAME_ENV)]
    pub pod_name: Option<String>,

    /// Set to "local" to run outside a cluster
    #[arg(long, env = FORCE_RUN_MODE_ENV)]
    pub force_run_mode: Option<String>,

    /// Directory holding dataImportCronTemplates.yaml
    #[arg(
        long,
        env = "DATA_IMPORT_CRON_TEMPLATES_DIR",
        default_value = "./dataImportCronTemplates"
    )]
    pub templates_dir: PathBuf,

    /// Version of the running operator, recorded on the parent status
    #[arg(
        id = "version_marker",
        long = "version-marker",
        env = "HCO_KV_IO_VERSION",
        default_value = env!("CARGO_PKG_VERSION")
    )]
    pub version: String,

    /// Seconds to wait for operands to disappear when the parent is deleted
    #[arg(long, default_value_t = 60)]
    pub teardown_timeout_secs: u64,

    /// Emit JSON logs
    #[arg(long, env = "HCO_JSON_LOGS")]
    pub json_logs: bool,
}

impl OperatorConfig {
    /// Run mode selected by `force_run_mode`
    pub fn run_mode(&self) -> RunMode {
        match self.force_run_mode.as_deref() {
            Some("local") => RunMode::Local,
            _ => RunMode::Cluster,
        }
    }

    /// Namespace watched for `HyperConverged`
    pub fn watch_namespace(&self) -> Result<&str> {
        self.watch_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| Error::config(format!("{WATCH_NAMESPACE_ENV} must be set")))
    }

    /// Operator namespace from configuration only
    pub fn operator_namespace_from_env(&self) -> Result<&str> {
        self.operator_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                Error::config(format!("{OPERATOR_NAMESPACE_ENV} unset or empty in environment"))
            })
    }

    /// Bound on teardown waits
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

/// Namespace the operator pod runs in, read from the service account mount
///
/// Fails in local run mode, where there is no such mount.
pub fn resolve_operator_namespace(cfg: &OperatorConfig, sa_path: &Path) -> Result<String> {
    if cfg.run_mode() == RunMode::Local {
        return Err(Error::config("operator run mode forced to local"));
    }
    match std::fs::read_to_string(sa_path) {
        Ok(raw) => Ok(raw.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::config("namespace not found for current environment"))
        }
        Err(e) => Err(Error::internal_with_context(
            "operator-namespace",
            format!("can't read {}: {e}", sa_path.display()),
        )),
    }
}
