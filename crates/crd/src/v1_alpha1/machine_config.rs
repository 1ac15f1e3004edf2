//! External machine-configuration kinds the operator coordinates with.
//!
//! These belong to the node-reboot subsystem; only the fields the fetcher and
//! the remediation controller touch are declared, everything else rides along
//! untyped.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema hook for raw ignition/kubelet payloads.
fn raw_payload_schema(_: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
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

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "MachineConfig",
    group = "machineconfiguration.openshift.io",
    version = "v1"
)]
pub struct MachineConfigSpec {
    /// Embedded ignition payload. May carry a multi-megabyte
    /// `storage.files` array, which the fetcher strips before dumping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_payload_schema")]
    pub config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_image_url: Option<String>,
}

/// Selector block shared by pool specs.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    kind = "MachineConfigPool",
    group = "machineconfiguration.openshift.io",
    version = "v1",
    status = "MachineConfigPoolStatus"
)]
pub struct MachineConfigPoolSpec {
    /// Pausing a pool holds node reboots while a remediation batch lands.
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub machine_config_selector: PoolSelector,
    #[serde(default)]
    pub node_selector: PoolSelector,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolStatus {
    /// The rendered MachineConfig currently observed by the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<PoolConfigurationRef>,
    #[serde(default)]
    pub machine_count: i32,
    #[serde(default)]
    pub updated_machine_count: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfigurationRef {
    #[serde(default)]
    pub name: String,
}

