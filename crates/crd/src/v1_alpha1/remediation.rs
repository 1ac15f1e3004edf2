// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Object-shaped fixes produced by scans and applied back to the cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether applying the payload changes configuration or enforces policy.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum RemediationType {
    #[default]
    Configuration,
    Enforcement,
}

/// The arbitrary cluster object a remediation materializes.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPayload {
    /// The full object manifest. Kept schema-free; the payload kind is only
    /// known to the content author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::v1_alpha1::remediation::arbitrary_object_schema")]
    pub object: Option<serde_json::Value>,
}

/// Schema hook for the untyped payload: any object is accepted.
pub fn arbitrary_object_schema(
    _: &mut schemars::r#gen::SchemaGenerator,
) -> schemars::schema::Schema {
    schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    }
    .into()
}

/// Spec object for the `ComplianceRemediation` CRD.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "ComplianceRemediation",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "ComplianceRemediationStatus", shortname = "cr")]
#[kube(namespaced)]
pub struct ComplianceRemediationSpec {
    /// User intent: apply the payload to the cluster.
    #[serde(default)]
    pub apply: bool,
    #[serde(default, rename = "type")]
    pub remediation_type: RemediationType,
    /// Set when a newer scan produced a different payload for this fix.
    #[serde(default)]
    pub outdated: bool,
    /// Payload from the latest scan run.
    #[serde(default)]
    pub current: RemediationPayload,
    /// The previously applied payload, kept while `outdated` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdated_payload: Option<RemediationPayload>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum RemediationApplicationState {
    #[default]
    Pending,
    Applied,
    Error,
    Outdated,
    NotApplied,
    NeedsReview,
    MissingDependencies,
}

impl RemediationApplicationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationApplicationState::Pending => "Pending",
            RemediationApplicationState::Applied => "Applied",
            RemediationApplicationState::Error => "Error",
            RemediationApplicationState::Outdated => "Outdated",
            RemediationApplicationState::NotApplied => "NotApplied",
            RemediationApplicationState::NeedsReview => "NeedsReview",
            RemediationApplicationState::MissingDependencies => "MissingDependencies",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRemediationStatus {
    #[serde(default)]
    pub application_state: RemediationApplicationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
