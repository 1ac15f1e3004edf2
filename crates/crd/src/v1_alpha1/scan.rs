// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The ComplianceScan kind: one concrete scan job and its state machine
//! surface.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::Conditions;

/// Whether the scan runs once per node in a role or once per cluster.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ScanType {
    Node,
    #[default]
    Platform,
}

/// The engine evaluating the scan's rules.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScannerType {
    #[default]
    OpenScap,
    Cel,
}

impl ScannerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerType::OpenScap => "openscap",
            ScannerType::Cel => "cel",
        }
    }
}

/// Raw result retention settings.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawResultStorageSpec {
    /// PVC size request, e.g. `1Gi`.
    #[serde(default = "RawResultStorageSpec::default_size")]
    pub size: String,
    /// Number of previous runs to retain on top of the current one.
    #[serde(default = "RawResultStorageSpec::default_rotation")]
    #[schemars(range(min = 0))]
    pub rotation: u32,
}

impl RawResultStorageSpec {
    fn default_size() -> String {
        "1Gi".to_string()
    }

    fn default_rotation() -> u32 {
        3
    }
}

impl Default for RawResultStorageSpec {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            rotation: Self::default_rotation(),
        }
    }
}

/// Spec object for the `ComplianceScan` CRD.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ComplianceScan",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "ComplianceScanStatus", shortname = "scan")]
#[kube(namespaced)]
pub struct ComplianceScanSpec {
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default)]
    pub scanner_type: ScannerType,
    /// XCCDF profile id, or the tailoring's generated id when
    /// `tailoringConfigMap` is set.
    pub profile: String,
    /// Content image carrying the data stream.
    #[serde(default)]
    pub content_image: String,
    /// Data stream path inside the content image.
    #[serde(default)]
    pub content: String,
    /// ConfigMap holding the tailoring document, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tailoring_config_map: Option<String>,
    /// Node selector for Node scans; ignored for Platform scans.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub raw_result_storage: RawResultStorageSpec,
    /// Per-phase timeout in seconds.
    #[serde(default = "ComplianceScanSpec::default_timeout")]
    #[schemars(range(min = 0))]
    pub timeout_seconds: u32,
    /// Priority class for the scanner workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
    /// Create NotApplicable check results instead of suppressing them.
    #[serde(default)]
    pub show_not_applicable: bool,
    #[serde(default)]
    pub debug: bool,
}

impl ComplianceScanSpec {
    fn default_timeout() -> u32 {
        1800
    }
}

/// The single active phase of a scan. Transitions are strictly forward
/// except Done -> Launching on rescan.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ScanPhase {
    #[default]
    Pending,
    Launching,
    Running,
    Aggregating,
    Done,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Pending => "Pending",
            ScanPhase::Launching => "Launching",
            ScanPhase::Running => "Running",
            ScanPhase::Aggregating => "Aggregating",
            ScanPhase::Done => "Done",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ScanResult {
    #[default]
    NotAvailable,
    Compliant,
    NonCompliant,
    Inconsistent,
    Error,
}

impl ScanResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanResult::NotAvailable => "NotAvailable",
            ScanResult::Compliant => "Compliant",
            ScanResult::NonCompliant => "NonCompliant",
            ScanResult::Inconsistent => "Inconsistent",
            ScanResult::Error => "Error",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceScanStatus {
    #[serde(default)]
    pub phase: ScanPhase,
    #[serde(default)]
    pub result: ScanResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<Time>,
    /// When the current phase was entered; drives timeout enforcement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_start_timestamp: Option<Time>,
    /// Index of the current run directory under the raw result PVC.
    /// Monotonically increasing; bumped on every rescan.
    #[serde(default)]
    pub current_index: u64,
    /// Name of the PVC holding raw results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// Finalizer guaranteeing scan workloads and raw storage are cleaned up.
pub const SCAN_FINALIZER: &str = "scan.finalizers.compliance.openshift.io";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ScannerType::OpenScap).unwrap(),
            "\"openscap\""
        );
        assert_eq!(serde_json::to_string(&ScannerType::Cel).unwrap(), "\"cel\"");
    }

    #[test]
    fn rotation_defaults_apply_on_empty_spec() {
        let storage: RawResultStorageSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(storage.rotation, 3);
        assert_eq!(storage.size, "1Gi");
    }
}
