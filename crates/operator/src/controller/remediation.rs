// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The ComplianceRemediation controller: materializes scan-produced fixes as
//! cluster mutations, gating on declared dependencies and batching
//! node-pool work behind a pause/unpause cycle so one pool only reboots
//! once per remediation wave.

use std::sync::Arc;
use std::time::Duration;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    CheckStatus, ComplianceCheckResult, ComplianceRemediation, ComplianceRemediationStatus,
    ComplianceSuite, MachineConfig, MachineConfigPool, RemediationApplicationState,
    RemediationType,
};
use futures::StreamExt;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{pinned_kind, Scope};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Resource, ResourceExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::{Error, Result};

/// Label machine-config payloads carry to name their pool role.
const MC_ROLE_LABEL: &str = "machineconfiguration.openshift.io/role";

pub async fn run(ctx: Arc<Context>) {
    let rems: Api<ComplianceRemediation> = Api::all(ctx.client.clone());

    Controller::new(rems, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(
    _rem: Arc<ComplianceRemediation>,
    err: &Error,
    ctx: Arc<Context>,
) -> ReconcileAction {
    warn!(error = %err, "remediation reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

async fn reconcile(
    rem: Arc<ComplianceRemediation>,
    ctx: Arc<Context>,
) -> Result<ReconcileAction> {
    let namespace = rem
        .namespace()
        .ok_or_else(|| Error::Message("remediation has no namespace".to_string()))?;

    let current_state = rem
        .status
        .as_ref()
        .map(|s| s.application_state)
        .unwrap_or_default();

    let Some(payload) = rem.spec.current.object.clone() else {
        return set_state(
            &rem,
            &ctx,
            RemediationApplicationState::Error,
            Some("remediation carries no payload object".to_string()),
        )
        .await;
    };

    // An outdated remediation waits for a human unless the suite opted into
    // automatic updates.
    if rem.spec.outdated && !auto_update_enabled(&rem, &ctx).await? {
        return set_state(&rem, &ctx, RemediationApplicationState::Outdated, None).await;
    }

    let should_apply =
        rem.spec.apply || rem.spec.remediation_type == RemediationType::Enforcement;

    if !should_apply {
        if current_state == RemediationApplicationState::Applied {
            unapply(&rem, &payload, &ctx).await?;
            return set_state(&rem, &ctx, RemediationApplicationState::NotApplied, None).await;
        }
        // Unapplying a never-applied remediation is a no-op.
        return set_state(&rem, &ctx, RemediationApplicationState::NotApplied, None).await;
    }

    // Dependencies gate Enforcement remediations too.
    if let Some(missing) = unsatisfied_dependencies(&rem, &namespace, &ctx).await? {
        debug!(remediation = %rem.name_any(), missing = %missing, "dependencies unsatisfied");
        return set_state(
            &rem,
            &ctx,
            RemediationApplicationState::MissingDependencies,
            Some(missing),
        )
        .await;
    }

    let pool = pool_for_payload(&payload);
    if let Some(pool_name) = &pool {
        pause_pool(pool_name, &ctx).await?;
    }

    let applied = match apply_payload(&rem, payload.clone(), &ctx).await? {
        ApplyOutcome::Applied => true,
        ApplyOutcome::ForeignOwner => {
            return set_state(
                &rem,
                &ctx,
                RemediationApplicationState::NeedsReview,
                Some("the target object exists and is owned by something else".to_string()),
            )
            .await;
        }
    };

    // Kubelet payloads only count as applied once the rendered machine
    // config for the pool picked the fields up.
    if applied && payload_kind(&payload) == Some("KubeletConfig".to_string()) {
        if let Some(pool_name) = &pool {
            if !kubelet_config_rendered(&payload, pool_name, &ctx).await? {
                return set_state(&rem, &ctx, RemediationApplicationState::Pending, None).await;
            }
        }
    }

    if let Some(pool_name) = &pool {
        maybe_unpause_pool(pool_name, &rem, &ctx).await?;
    }

    ctx.metrics.remediation_applied();
    set_state(&rem, &ctx, RemediationApplicationState::Applied, None).await
}

async fn set_state(
    rem: &ComplianceRemediation,
    ctx: &Context,
    state: RemediationApplicationState,
    message: Option<String>,
) -> Result<ReconcileAction> {
    let previous = rem.status.as_ref().map(|s| s.application_state);
    if previous != Some(state) {
        let namespace = rem.namespace().unwrap_or_default();
        let api: Api<ComplianceRemediation> = Api::namespaced(ctx.client.clone(), &namespace);
        let status = ComplianceRemediationStatus {
            application_state: state,
            error_message: message,
        };
        let patch = json!({"status": serde_json::to_value(&status)?});
        api.patch_status(&rem.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        let oref = rem.object_ref(&());
        ctx.publish_event(
            &oref,
            "ApplicationStateChanged",
            "Reconcile",
            format!("remediation is now {}", state.as_str()),
        )
        .await;
    }

    Ok(match state {
        // Dependency owners may flip to Pass at any time.
        RemediationApplicationState::MissingDependencies
        | RemediationApplicationState::Pending => {
            ReconcileAction::requeue(Duration::from_secs(60))
        }
        _ => ReconcileAction::requeue(Duration::from_secs(300)),
    })
}

async fn auto_update_enabled(rem: &ComplianceRemediation, ctx: &Context) -> Result<bool> {
    let Some(suite_name) = rem.labels().get(keys::SUITE_LABEL) else {
        return Ok(false);
    };
    let namespace = rem.namespace().unwrap_or_default();
    let suites: Api<ComplianceSuite> = Api::namespaced(ctx.client.clone(), &namespace);
    Ok(suites
        .get_opt(suite_name)
        .await?
        .map(|s| s.spec.auto_update_remediations)
        .unwrap_or(false))
}

/// A declared object dependency, JSON-encoded in the depends-on-obj
/// annotation.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDependency {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Parses the comma-separated rule dependency list.
pub fn rule_dependencies(rem: &ComplianceRemediation) -> Vec<String> {
    rem.annotations()
        .get(keys::REMEDIATION_DEPENDS_ON_ANNOTATION)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn object_dependencies(rem: &ComplianceRemediation) -> Result<Vec<ObjectDependency>> {
    match rem
        .annotations()
        .get(keys::REMEDIATION_OBJECT_DEPENDS_ON_ANNOTATION)
    {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| Error::InvalidSpec(format!("bad object dependency list: {e}"))),
    }
}

/// Returns a human-readable description of the first unsatisfied dependency,
/// or `None` when everything is in place. A rule dependency is satisfied
/// when the rule's latest check result is Pass.
async fn unsatisfied_dependencies(
    rem: &ComplianceRemediation,
    namespace: &str,
    ctx: &Context,
) -> Result<Option<String>> {
    let rule_deps = rule_dependencies(rem);
    if !rule_deps.is_empty() {
        let api: Api<ComplianceCheckResult> = Api::namespaced(ctx.client.clone(), namespace);
        let results = api.list(&ListParams::default()).await?;
        for dep in rule_deps {
            let latest = results
                .iter()
                .filter(|r| {
                    r.annotations().get(keys::RULE_ANNOTATION).map(String::as_str)
                        == Some(dep.as_str())
                })
                .max_by_key(|r| {
                    r.annotations()
                        .get(keys::LAST_SCANNED_ANNOTATION)
                        .cloned()
                        .unwrap_or_default()
                });
            match latest {
                Some(result) if result.spec.status == CheckStatus::Pass => {}
                Some(result) => {
                    return Ok(Some(format!(
                        "rule dependency '{dep}' is {}",
                        result.spec.status.as_str()
                    )));
                }
                None => {
                    return Ok(Some(format!("rule dependency '{dep}' has no result yet")));
                }
            }
        }
    }

    for dep in object_dependencies(rem)? {
        if !object_exists(&dep, namespace, ctx).await? {
            return Ok(Some(format!(
                "object dependency {}/{} '{}' is missing",
                dep.api_version, dep.kind, dep.name
            )));
        }
    }

    Ok(None)
}

async fn object_exists(dep: &ObjectDependency, namespace: &str, ctx: &Context) -> Result<bool> {
    let gvk = gvk_from_api_version(&dep.api_version, &dep.kind)?;
    let (ar, caps) = pinned_kind(&ctx.client, &gvk).await?;
    let api: Api<DynamicObject> = if caps.scope == Scope::Namespaced {
        Api::namespaced_with(
            ctx.client.clone(),
            dep.namespace.as_deref().unwrap_or(namespace),
            &ar,
        )
    } else {
        Api::all_with(ctx.client.clone(), &ar)
    };
    Ok(api.get_opt(&dep.name).await?.is_some())
}

fn gvk_from_api_version(api_version: &str, kind: &str) -> Result<GroupVersionKind> {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    Ok(GroupVersionKind::gvk(group, version, kind))
}

fn payload_kind(payload: &serde_json::Value) -> Option<String> {
    payload.get("kind").and_then(|k| k.as_str()).map(str::to_string)
}

/// Machine-config shaped payloads are pool-scoped; everything else applies
/// directly.
pub fn pool_for_payload(payload: &serde_json::Value) -> Option<String> {
    match payload_kind(payload)?.as_str() {
        "MachineConfig" => payload
            .pointer("/metadata/labels")
            .and_then(|l| l.get(MC_ROLE_LABEL))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        "KubeletConfig" => payload
            .pointer("/spec/machineConfigPoolSelector/matchLabels")
            .and_then(|l| l.as_object())
            .and_then(|labels| {
                labels.iter().find_map(|(k, v)| {
                    k.strip_prefix("pools.operator.machineconfiguration.openshift.io/")
                        .map(str::to_string)
                        .or_else(|| v.as_str().map(str::to_string).filter(|_| k == MC_ROLE_LABEL))
                })
            }),
        _ => None,
    }
}

/// Pauses the pool, observing the paused state through a re-read before
/// returning. Mutation goes through resourceVersion CAS.
async fn pause_pool(pool_name: &str, ctx: &Context) -> Result<()> {
    set_pool_paused(pool_name, true, ctx).await
}

async fn set_pool_paused(pool_name: &str, paused: bool, ctx: &Context) -> Result<()> {
    let api: Api<MachineConfigPool> = Api::all(ctx.client.clone());
    let Some(mut pool) = api.get_opt(pool_name).await? else {
        // Pools are external machinery; their absence is not ours to fix.
        warn!(pool = pool_name, "machine config pool not found, skipping pause coordination");
        return Ok(());
    };
    if pool.spec.paused == paused {
        return Ok(());
    }

    pool.spec.paused = paused;
    // replace() carries the resourceVersion we read, so a concurrent writer
    // fails this request instead of being silently overwritten.
    api.replace(pool_name, &PostParams::default(), &pool).await?;

    let observed = api.get(pool_name).await?;
    if observed.spec.paused != paused {
        return Err(Error::Message(format!(
            "pool '{pool_name}' did not reach paused={paused}"
        )));
    }
    info!(pool = pool_name, paused, "machine config pool pause state changed");
    Ok(())
}

/// Unpauses once no other remediation for this pool is still waiting to
/// land, so one pause cycle covers the whole batch.
async fn maybe_unpause_pool(
    pool_name: &str,
    current: &ComplianceRemediation,
    ctx: &Context,
) -> Result<()> {
    let namespace = current.namespace().unwrap_or_default();
    let api: Api<ComplianceRemediation> = Api::namespaced(ctx.client.clone(), &namespace);
    let pending = api
        .list(&ListParams::default())
        .await?
        .iter()
        .filter(|r| r.name_any() != current.name_any())
        .filter(|r| r.spec.apply || r.spec.remediation_type == RemediationType::Enforcement)
        .filter(|r| {
            r.spec
                .current
                .object
                .as_ref()
                .and_then(pool_for_payload)
                .as_deref()
                == Some(pool_name)
        })
        .filter(|r| {
            r.status.as_ref().map(|s| s.application_state)
                != Some(RemediationApplicationState::Applied)
        })
        .count();

    if pending == 0 {
        set_pool_paused(pool_name, false, ctx).await?;
    } else {
        debug!(pool = pool_name, pending, "keeping pool paused for in-flight remediations");
    }
    Ok(())
}

enum ApplyOutcome {
    Applied,
    ForeignOwner,
}

/// Create-or-update of the payload with the remediation as controller
/// reference, so garbage collection cascades on unapply. Re-applying an
/// identical payload is a no-op.
async fn apply_payload(
    rem: &ComplianceRemediation,
    payload: serde_json::Value,
    ctx: &Context,
) -> Result<ApplyOutcome> {
    let api_version = payload
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidSpec("payload has no apiVersion".to_string()))?;
    let kind = payload_kind(&payload)
        .ok_or_else(|| Error::InvalidSpec("payload has no kind".to_string()))?;
    let gvk = gvk_from_api_version(api_version, &kind)?;
    let (ar, caps) = pinned_kind(&ctx.client, &gvk).await?;

    let mut desired: DynamicObject = serde_json::from_value(payload)?;
    let target_namespace = desired
        .metadata
        .namespace
        .clone()
        .or_else(|| rem.namespace());
    let api: Api<DynamicObject> = if caps.scope == Scope::Namespaced {
        Api::namespaced_with(
            ctx.client.clone(),
            target_namespace.as_deref().unwrap_or_default(),
            &ar,
        )
    } else {
        Api::all_with(ctx.client.clone(), &ar)
    };

    desired.metadata.owner_references = rem.controller_owner_ref(&()).map(|o| vec![o]);
    let name = desired.name_any();

    match api.get_opt(&name).await? {
        None => {
            info!(remediation = %rem.name_any(), target = %name, kind = %kind, "applying remediation payload");
            api.create(&PostParams::default(), &desired).await?;
            Ok(ApplyOutcome::Applied)
        }
        Some(existing) => {
            let ours = existing
                .metadata
                .owner_references
                .as_ref()
                .into_iter()
                .flatten()
                .any(|o| {
                    o.controller == Some(true) && Some(&o.uid) == rem.uid().as_ref()
                });
            if !ours {
                let foreign_controller = existing
                    .metadata
                    .owner_references
                    .as_ref()
                    .into_iter()
                    .flatten()
                    .any(|o| o.controller == Some(true));
                if foreign_controller {
                    return Ok(ApplyOutcome::ForeignOwner);
                }
            }

            if is_json_subset(&desired.data, &serde_json::to_value(&existing)?) {
                debug!(target = %name, "payload already in place, nothing to apply");
                return Ok(ApplyOutcome::Applied);
            }

            desired.metadata.resource_version = existing.resource_version();
            api.replace(&name, &PostParams::default(), &desired).await?;
            Ok(ApplyOutcome::Applied)
        }
    }
}

/// Deletes the payload object; garbage collection cleans up the rest. The
/// pool unpauses once the last applied remediation for it is gone.
async fn unapply(
    rem: &ComplianceRemediation,
    payload: &serde_json::Value,
    ctx: &Context,
) -> Result<()> {
    let api_version = payload
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidSpec("payload has no apiVersion".to_string()))?;
    let kind = payload_kind(payload)
        .ok_or_else(|| Error::InvalidSpec("payload has no kind".to_string()))?;
    let gvk = gvk_from_api_version(api_version, &kind)?;
    let (ar, caps) = pinned_kind(&ctx.client, &gvk).await?;

    let name = payload
        .pointer("/metadata/name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| Error::InvalidSpec("payload has no name".to_string()))?;
    let namespace = payload
        .pointer("/metadata/namespace")
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .or_else(|| rem.namespace());

    let api: Api<DynamicObject> = if caps.scope == Scope::Namespaced {
        Api::namespaced_with(ctx.client.clone(), namespace.as_deref().unwrap_or_default(), &ar)
    } else {
        Api::all_with(ctx.client.clone(), &ar)
    };

    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!(remediation = %rem.name_any(), target = name, "remediation payload removed"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(pool_name) = pool_for_payload(payload) {
        maybe_unpause_pool(&pool_name, rem, ctx).await?;
    }
    Ok(())
}

/// True when the rendered machine config for the pool carries every field
/// of the kubelet payload at matching JSON paths.
async fn kubelet_config_rendered(
    payload: &serde_json::Value,
    pool_name: &str,
    ctx: &Context,
) -> Result<bool> {
    let pools: Api<MachineConfigPool> = Api::all(ctx.client.clone());
    let Some(pool) = pools.get_opt(pool_name).await? else {
        return Ok(false);
    };
    let Some(rendered_name) = pool
        .status
        .as_ref()
        .and_then(|s| s.configuration.as_ref())
        .map(|c| c.name.clone())
    else {
        return Ok(false);
    };

    let mcs: Api<MachineConfig> = Api::all(ctx.client.clone());
    let Some(rendered) = mcs.get_opt(&rendered_name).await? else {
        return Ok(false);
    };

    let Some(kubelet_payload) = payload.pointer("/spec/kubeletConfig") else {
        return Ok(true);
    };
    let rendered_value = serde_json::to_value(&rendered)?;
    Ok(is_json_subset(kubelet_payload, &rendered_value)
        || rendered_contains(kubelet_payload, &rendered_value))
}

/// Rendered MCs embed the kubelet config as a file payload; search every
/// object in the rendered tree for a superset match.
fn rendered_contains(sub: &serde_json::Value, rendered: &serde_json::Value) -> bool {
    match rendered {
        serde_json::Value::Object(_) => {
            if is_json_subset(sub, rendered) {
                return true;
            }
            rendered
                .as_object()
                .unwrap()
                .values()
                .any(|v| rendered_contains(sub, v))
        }
        serde_json::Value::Array(items) => items.iter().any(|v| rendered_contains(sub, v)),
        _ => false,
    }
}

/// Every key present in `sub` must appear in `sup` with an equal (or
/// recursively subset) value.
pub fn is_json_subset(sub: &serde_json::Value, sup: &serde_json::Value) -> bool {
    match (sub, sup) {
        (serde_json::Value::Object(sub_map), serde_json::Value::Object(sup_map)) => {
            sub_map.iter().all(|(k, sub_v)| {
                sup_map
                    .get(k)
                    .is_some_and(|sup_v| is_json_subset(sub_v, sup_v))
            })
        }
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::ComplianceRemediationSpec;

    fn rem_with_annotations(pairs: &[(&str, &str)]) -> ComplianceRemediation {
        let mut rem = ComplianceRemediation::new("r", ComplianceRemediationSpec::default());
        rem.metadata.annotations = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        rem
    }

    #[test]
    fn rule_dependency_lists_parse() {
        let rem = rem_with_annotations(&[(
            keys::REMEDIATION_DEPENDS_ON_ANNOTATION,
            "rule-zero, rule-one,,rule-two",
        )]);
        assert_eq!(
            rule_dependencies(&rem),
            vec!["rule-zero", "rule-one", "rule-two"]
        );
        assert!(rule_dependencies(&rem_with_annotations(&[])).is_empty());
    }

    #[test]
    fn object_dependency_lists_parse() {
        let rem = rem_with_annotations(&[(
            keys::REMEDIATION_OBJECT_DEPENDS_ON_ANNOTATION,
            r#"[{"apiVersion": "v1", "kind": "ConfigMap", "name": "base", "namespace": "ns"}]"#,
        )]);
        let deps = object_dependencies(&rem).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, "ConfigMap");
        assert_eq!(deps[0].namespace.as_deref(), Some("ns"));

        let broken = rem_with_annotations(&[(
            keys::REMEDIATION_OBJECT_DEPENDS_ON_ANNOTATION,
            "not json",
        )]);
        assert!(object_dependencies(&broken).is_err());
    }

    #[test]
    fn machine_config_payloads_map_to_their_pool() {
        let mc = serde_json::json!({
            "apiVersion": "machineconfiguration.openshift.io/v1",
            "kind": "MachineConfig",
            "metadata": {
                "name": "75-sshd",
                "labels": {MC_ROLE_LABEL: "worker"}
            }
        });
        assert_eq!(pool_for_payload(&mc).as_deref(), Some("worker"));

        let kc = serde_json::json!({
            "apiVersion": "machineconfiguration.openshift.io/v1",
            "kind": "KubeletConfig",
            "spec": {
                "machineConfigPoolSelector": {
                    "matchLabels": {
                        "pools.operator.machineconfiguration.openshift.io/master": ""
                    }
                }
            }
        });
        assert_eq!(pool_for_payload(&kc).as_deref(), Some("master"));

        let cm = serde_json::json!({"apiVersion": "v1", "kind": "ConfigMap"});
        assert_eq!(pool_for_payload(&cm), None);
    }

    #[test]
    fn subset_check_matches_nested_paths() {
        let sub = serde_json::json!({"kubeletConfig": {"maxPods": 250}});
        let sup = serde_json::json!({
            "kubeletConfig": {"maxPods": 250, "systemReserved": {"memory": "1Gi"}},
            "other": true
        });
        assert!(is_json_subset(&sub, &sup));

        let wrong_value = serde_json::json!({"kubeletConfig": {"maxPods": 100}});
        assert!(!is_json_subset(&wrong_value, &sup));

        let missing_key = serde_json::json!({"kubeletConfig": {"podPidsLimit": 4096}});
        assert!(!is_json_subset(&missing_key, &sup));

        // Scalars compare by equality.
        assert!(is_json_subset(
            &serde_json::json!(true),
            &serde_json::json!(true)
        ));
    }

    #[test]
    fn rendered_search_finds_embedded_supersets() {
        let sub = serde_json::json!({"maxPods": 250});
        let rendered = serde_json::json!({
            "spec": {
                "config": {
                    "storage": {
                        "files": [
                            {"path": "/etc/kubernetes/kubelet.conf",
                             "contents": {"maxPods": 250, "clusterDNS": ["10.0.0.10"]}}
                        ]
                    }
                }
            }
        });
        assert!(rendered_contains(&sub, &rendered));
        assert!(!rendered_contains(
            &serde_json::json!({"maxPods": 9}),
            &rendered
        ));
    }

    #[test]
    fn gvk_parsing_handles_core_and_grouped() {
        let core = gvk_from_api_version("v1", "ConfigMap").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");

        let grouped =
            gvk_from_api_version("machineconfiguration.openshift.io/v1", "MachineConfig").unwrap();
        assert_eq!(grouped.group, "machineconfiguration.openshift.io");
        assert_eq!(grouped.kind, "MachineConfig");
    }
}
