// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-rule outcomes written by the aggregator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::catalog::RuleSeverity;

/// Outcome of one rule on one scan run.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum CheckStatus {
    Pass,
    Fail,
    Info,
    Manual,
    NotApplicable,
    #[default]
    Error,
    Inconsistent,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "Pass",
            CheckStatus::Fail => "Fail",
            CheckStatus::Info => "Info",
            CheckStatus::Manual => "Manual",
            CheckStatus::NotApplicable => "NotApplicable",
            CheckStatus::Error => "Error",
            CheckStatus::Inconsistent => "Inconsistent",
        }
    }
}

/// Spec object for the `ComplianceCheckResult` CRD.
///
/// Check result names are a pure function of (scan name, rule id), so reruns
/// of the same scan update the same objects in place.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ComplianceCheckResult",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(namespaced, shortname = "ccr")]
pub struct ComplianceCheckResultSpec {
    /// Full XCCDF rule identifier.
    pub id: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub severity: RuleSeverity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    /// Manual verification steps extracted from the rule's OCIL payload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Variable values the rule was evaluated with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_used: Vec<String>,
}
