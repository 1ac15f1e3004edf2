//! Process-wide configuration, resolved once in `main` and passed into
//! constructors. No module-level mutable state.

use std::path::PathBuf;
use std::time::Duration;

/// Everything the controllers need to know about their environment.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Namespace the operator (and all generated objects) live in.
    pub operator_namespace: String,
    /// This operator's own image; reused for collector and aggregator
    /// containers inside scan pods.
    pub operator_image: String,
    /// Image carrying the OpenSCAP scanner binary.
    pub scanner_image: String,
    /// Name of the pod we run in, staged into every scan's discovery paths.
    pub pod_name: String,
    /// How long rules dropped by a content refresh linger before deletion.
    pub rule_removal_grace: Duration,
    /// Where raw-result PVCs are mounted, when they are mounted at all.
    /// Set inside the result-server and aggregator workloads; unset in the
    /// controller process, which then delegates rotation to them.
    pub raw_results_root: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_env() -> Self {
        RunConfig {
            operator_namespace: std::env::var("POD_NAMESPACE")
                .unwrap_or_else(|_| "openshift-compliance".to_string()),
            operator_image: std::env::var("OPERATOR_IMAGE")
                .unwrap_or_else(|_| "ghcr.io/compliance-operator/compliance-operator:latest".to_string()),
            scanner_image: std::env::var("SCANNER_IMAGE")
                .unwrap_or_else(|_| "ghcr.io/compliance-operator/openscap:latest".to_string()),
            pod_name: std::env::var("POD_NAME").unwrap_or_else(|_| "compliance-operator".to_string()),
            rule_removal_grace: Duration::from_secs(
                std::env::var("RULE_REMOVAL_GRACE_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
            ),
            raw_results_root: std::env::var_os("RAW_RESULTS_DIR").map(PathBuf::from),
        }
    }
}
