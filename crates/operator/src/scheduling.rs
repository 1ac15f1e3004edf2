// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Placement helpers for operator-launched workloads.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::{Api, Client};
use tracing::warn;

/// Returns the priority class if it exists, `None` (plus a warning string)
/// otherwise. Scans keep running without one.
pub async fn validated_priority_class(
    client: &Client,
    name: &str,
) -> (Option<String>, Option<String>) {
    let api: Api<PriorityClass> = Api::all(client.clone());
    match api.get_opt(name).await {
        Ok(Some(_)) => (Some(name.to_string()), None),
        Ok(None) => {
            warn!(priority_class = name, "priority class not found, scheduling without one");
            (
                None,
                Some(format!(
                    "priority class '{name}' not found, the scan pods run without one"
                )),
            )
        }
        Err(e) => {
            warn!(priority_class = name, error = %e, "priority class lookup failed");
            (None, Some(format!("could not validate priority class '{name}': {e}")))
        }
    }
}

/// Node selector pinning a workload to the control plane.
pub fn control_plane_selector() -> BTreeMap<String, String> {
    [(
        "node-role.kubernetes.io/master".to_string(),
        String::new(),
    )]
    .into()
}

/// Tolerations letting operator workloads land on tainted control-plane
/// nodes.
pub fn control_plane_tolerations() -> Vec<Toleration> {
    vec![Toleration {
        key: Some("node-role.kubernetes.io/master".to_string()),
        operator: Some("Exists".to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_placement_is_master_scoped() {
        let selector = control_plane_selector();
        assert!(selector.contains_key("node-role.kubernetes.io/master"));
        let tolerations = control_plane_tolerations();
        assert_eq!(tolerations.len(), 1);
        assert_eq!(tolerations[0].effect.as_deref(), Some("NoSchedule"));
    }
}
