// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! User-authored overrides: TailoredProfile and CEL-backed CustomRule.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::catalog::{RuleReference, RuleSeverity};
use super::conditions::Conditions;

/// A variable override inside a TailoredProfile.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariableValueSpec {
    #[schemars(length(min = 1))]
    pub name: String,
    pub value: String,
}

/// Spec object for the `TailoredProfile` CRD.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "TailoredProfile",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "TailoredProfileStatus", shortname = "tp")]
#[kube(namespaced)]
pub struct TailoredProfileSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Name of the base Profile this tailoring extends, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Rules enabled on top of the base profile selections.
    #[serde(default)]
    pub enable_rules: Vec<RuleReference>,
    /// Rules disabled from the base profile selections.
    #[serde(default)]
    pub disable_rules: Vec<RuleReference>,
    /// Rules kept selected but marked for manual checking.
    #[serde(default)]
    pub manual_rules: Vec<RuleReference>,
    /// Variable value overrides.
    #[serde(default)]
    pub set_values: Vec<VariableValueSpec>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum TailoredProfileState {
    #[default]
    Pending,
    Ready,
    Error,
}

/// Reference to the generated tailoring ConfigMap.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutputRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TailoredProfileStatus {
    /// Generated XCCDF profile id for this tailoring.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<OutputRef>,
    #[serde(default)]
    pub state: TailoredProfileState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// One named Kubernetes resource binding consumed by a CEL expression.
///
/// The historic payload nested the fields under a `kubeResource` object; that
/// shape still deserializes (see the manual `Deserialize` below) but is never
/// written back.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomRuleInput {
    /// Name the fetched resource is bound to in the CEL context.
    #[schemars(length(min = 1, max = 63))]
    #[schemars(regex(pattern = r"^[a-zA-Z_][a-zA-Z0-9_]*$"))]
    pub name: String,
    /// API group of the target resource; empty for the core group.
    #[serde(default)]
    pub api_group: String,
    #[schemars(length(min = 1))]
    pub version: String,
    /// Plural resource name, e.g. `pods`.
    #[schemars(length(min = 1))]
    pub resource: String,
    /// Namespace to list in; empty means cluster-wide.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Specific object name; empty means the whole list.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,
}

impl<'de> Deserialize<'de> for CustomRuleInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Flat {
            name: String,
            #[serde(default)]
            api_group: String,
            version: String,
            resource: String,
            #[serde(default)]
            namespace: String,
            #[serde(default)]
            resource_name: String,
        }

        // Migration-only path for content written by older releases.
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Nested {
            kube_resource: Flat,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Compat {
            Flat(Flat),
            Nested(Nested),
        }

        let flat = match Compat::deserialize(deserializer)? {
            Compat::Flat(f) => f,
            Compat::Nested(n) => n.kube_resource,
        };
        Ok(CustomRuleInput {
            name: flat.name,
            api_group: flat.api_group,
            version: flat.version,
            resource: flat.resource,
            namespace: flat.namespace,
            resource_name: flat.resource_name,
        })
    }
}

impl CustomRuleInput {
    /// API URI for this input, used by the offline fetch planner.
    pub fn uri(&self) -> String {
        let mut path = if self.api_group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.api_group, self.version)
        };
        if !self.namespace.is_empty() {
            path.push_str(&format!("/namespaces/{}", self.namespace));
        }
        path.push_str(&format!("/{}", self.resource));
        if !self.resource_name.is_empty() {
            path.push_str(&format!("/{}", self.resource_name));
        }
        path
    }
}

/// Spec object for the `CustomRule` CRD: a user-authored check whose payload
/// is a CEL expression over declared inputs.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "CustomRule",
    group = "compliance.openshift.io",
    version = "v1alpha1"
)]
#[kube(status = "CustomRuleStatus", shortname = "crule")]
#[kube(namespaced)]
pub struct CustomRuleSpec {
    /// Identifier used in check results; defaults to the object name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub severity: RuleSeverity,
    /// The CEL expression; must evaluate to a boolean.
    #[schemars(length(min = 1, max = 65536))]
    pub expression: String,
    /// Resources bound into the CEL context before evaluation.
    #[schemars(length(min = 1))]
    pub inputs: Vec<CustomRuleInput>,
    /// Message attached to Fail results.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum CustomRulePhase {
    #[default]
    Pending,
    Ready,
    Error,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomRuleStatus {
    #[serde(default)]
    pub phase: CustomRulePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Generation the phase was last derived from; validation re-runs
    /// whenever the spec generation advances past it.
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validation_time: Option<Time>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_uri_covers_core_and_grouped_resources() {
        let core = CustomRuleInput {
            name: "pods".into(),
            api_group: String::new(),
            version: "v1".into(),
            resource: "pods".into(),
            namespace: "testns".into(),
            resource_name: String::new(),
        };
        assert_eq!(core.uri(), "/api/v1/namespaces/testns/pods");

        let grouped = CustomRuleInput {
            name: "oauth".into(),
            api_group: "config.openshift.io".into(),
            version: "v1".into(),
            resource: "oauths".into(),
            namespace: String::new(),
            resource_name: "cluster".into(),
        };
        assert_eq!(grouped.uri(), "/apis/config.openshift.io/v1/oauths/cluster");
    }

    #[test]
    fn legacy_nested_input_shape_still_deserializes() {
        let legacy = serde_json::json!({
            "kubeResource": {
                "name": "pods",
                "version": "v1",
                "resource": "pods",
                "namespace": "testns"
            }
        });
        let input: CustomRuleInput = serde_json::from_value(legacy).unwrap();
        assert_eq!(input.name, "pods");
        assert_eq!(input.namespace, "testns");

        let flat = serde_json::json!({
            "name": "pods",
            "version": "v1",
            "resource": "pods"
        });
        let input: CustomRuleInput = serde_json::from_value(flat).unwrap();
        assert_eq!(input.resource, "pods");
        assert!(input.namespace.is_empty());
    }
}
