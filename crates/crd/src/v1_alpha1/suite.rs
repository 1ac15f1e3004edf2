// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! ComplianceSuite plus the ScanSetting/ScanSettingBinding pair that
//! generates one.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::Conditions;
use super::scan::{ComplianceScanSpec, RawResultStorageSpec, ScanPhase, ScanResult};

/// A named scan inside a suite.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceScanSpecWrapper {
    pub name: String,
    #[serde(flatten)]
    pub scan: ComplianceScanSpec,
}

/// Spec object for the `ComplianceSuite` CRD: a set of scans run together.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ComplianceSuite",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "ComplianceSuiteStatus", shortname = "suite")]
#[kube(namespaced)]
pub struct ComplianceSuiteSpec {
    /// Apply Configuration remediations as scans produce them.
    #[serde(default)]
    pub auto_apply_remediations: bool,
    /// Refresh outdated remediation payloads automatically.
    #[serde(default)]
    pub auto_update_remediations: bool,
    /// Cron schedule for periodic rescans; empty disables the trigger.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schedule: String,
    #[serde(default)]
    pub scans: Vec<ComplianceScanSpecWrapper>,
}

/// Rolled-up state of one child scan.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusSummary {
    pub name: String,
    #[serde(default)]
    pub phase: ScanPhase,
    #[serde(default)]
    pub result: ScanResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSuiteStatus {
    #[serde(default)]
    pub phase: ScanPhase,
    #[serde(default)]
    pub result: ScanResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scan_statuses: Vec<ScanStatusSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// Spec object for the `ScanSetting` CRD: the reusable subset of scan
/// configuration a binding stamps onto its generated scans.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ScanSetting",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(namespaced, shortname = "ss")]
pub struct ScanSettingSpec {
    #[serde(default)]
    pub raw_result_storage: RawResultStorageSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schedule: String,
    /// Node roles scanned by node profiles; one scan is generated per role.
    #[serde(default = "ScanSettingSpec::default_roles")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub auto_apply_remediations: bool,
    #[serde(default)]
    pub auto_update_remediations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(default)]
    pub show_not_applicable: bool,
}

impl ScanSettingSpec {
    fn default_roles() -> Vec<String> {
        vec!["master".to_string(), "worker".to_string()]
    }
}

/// Reference to a Profile or TailoredProfile by kind and name.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReference {
    /// `Profile` or `TailoredProfile`.
    pub kind: String,
    pub name: String,
}

/// Reference to the ScanSetting a binding consumes.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsReference {
    pub name: String,
}

/// Spec object for the `ScanSettingBinding` CRD. Reconciled into exactly one
/// suite with one scan per (profile, role) plus one platform scan per
/// platform profile.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ScanSettingBinding",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "ScanSettingBindingStatus", shortname = "ssb")]
#[kube(namespaced)]
pub struct ScanSettingBindingSpec {
    #[schemars(length(min = 1))]
    pub profiles: Vec<ProfileReference>,
    #[serde(default)]
    pub settings_ref: SettingsReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettingBindingStatus {
    /// Name of the generated suite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}
