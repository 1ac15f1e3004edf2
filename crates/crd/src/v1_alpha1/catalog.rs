// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Content catalog kinds: ProfileBundle and the Profile/Rule/Variable
//! objects parsed out of its data stream.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::Conditions;

/// Outcome of parsing a ProfileBundle's content image.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum DataStreamStatusType {
    #[default]
    Pending,
    Valid,
    Invalid,
}

/// Spec object for the `ProfileBundle` CRD: a named handle to a content
/// image containing rule definitions.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ProfileBundle",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "ProfileBundleStatus", shortname = "pb")]
#[kube(namespaced)]
pub struct ProfileBundleSpec {
    /// Reference to the content image carrying the data stream.
    #[schemars(length(min = 1))]
    pub content_image: String,
    /// Path of the data stream file inside the content image.
    #[schemars(length(min = 1))]
    pub content_file: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBundleStatus {
    #[serde(default)]
    pub data_stream_status: DataStreamStatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// Finalizer guaranteeing the parser workload is torn down with the bundle.
pub const PROFILE_BUNDLE_FINALIZER: &str = "profilebundle.finalizers.compliance.openshift.io";

/// A reference to a Rule or CustomRule by name.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleReference {
    #[schemars(length(min = 1))]
    pub name: String,
}

/// Spec object for the read-only `Profile` catalog entry.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "Profile",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(namespaced)]
pub struct ProfileSpec {
    /// Full XCCDF profile identifier.
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Ordered references to the enabled rules.
    #[serde(default)]
    pub rules: Vec<RuleReference>,
    /// Ordered references to the default variables.
    #[serde(default)]
    pub values: Vec<RuleReference>,
}

/// Severity carried by rules and their check results.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    #[default]
    Unknown,
    Info,
    Low,
    Medium,
    High,
}

impl RuleSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSeverity::Unknown => "unknown",
            RuleSeverity::Info => "info",
            RuleSeverity::Low => "low",
            RuleSeverity::Medium => "medium",
            RuleSeverity::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "info" => RuleSeverity::Info,
            "low" => RuleSeverity::Low,
            "medium" => RuleSeverity::Medium,
            "high" => RuleSeverity::High,
            _ => RuleSeverity::Unknown,
        }
    }
}

/// Whether a rule inspects control-plane objects or per-node state.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    #[default]
    Platform,
    Node,
}

/// Spec object for the read-only `Rule` catalog entry. User-added labels and
/// annotations on the metadata survive content refreshes.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(kind = "Rule", group = "compliance.openshift.io", version = "v1alpha1")]
#[kube(namespaced)]
pub struct RuleSpec {
    /// Full XCCDF rule identifier.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub severity: RuleSeverity,
    #[serde(default)]
    pub rule_type: RuleType,
    /// Default check type when the rule carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
}

/// Spec object for the `Variable` CRD: a tunable typed value referenced by
/// rule templates.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "Variable",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(namespaced)]
pub struct VariableSpec {
    /// Full XCCDF value identifier.
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub value_type: VariableType,
    #[serde(default)]
    pub value: String,
    /// Allowed values; empty means unconstrained.
    #[serde(default)]
    pub selections: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_wire_form() {
        for sev in [
            RuleSeverity::Unknown,
            RuleSeverity::Info,
            RuleSeverity::Low,
            RuleSeverity::Medium,
            RuleSeverity::High,
        ] {
            assert_eq!(RuleSeverity::parse(sev.as_str()), sev);
        }
        // XCCDF content with no severity attribute maps to unknown.
        assert_eq!(RuleSeverity::parse(""), RuleSeverity::Unknown);
    }
}
