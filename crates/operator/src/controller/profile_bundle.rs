// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The ProfileBundle controller plus the content sync used by the parser
//! workload: Profile, Rule and Variable objects are upserted from the data
//! stream, user metadata on existing Rules survives the refresh, and rules
//! dropped by the new content linger for a grace window before deletion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    DataStreamStatusType, Profile, ProfileBundle, ProfileBundleStatus, ProfileSpec, Rule,
    RuleReference, RuleSpec, Variable, VariableSpec, PROFILE_BUNDLE_FINALIZER,
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::chrono::{DateTime, Utc};
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::controller::Context;
use crate::xccdf::datastream::DataStream;
use crate::xccdf::{profile_name_from_id, rule_name_from_id, variable_name_from_id};
use crate::{Error, Result};

pub async fn run(ctx: Arc<Context>) {
    let bundles: Api<ProfileBundle> = Api::all(ctx.client.clone());

    Controller::new(bundles, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(_pb: Arc<ProfileBundle>, err: &Error, ctx: Arc<Context>) -> ReconcileAction {
    warn!(error = %err, "profile bundle reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

async fn reconcile(pb: Arc<ProfileBundle>, ctx: Arc<Context>) -> Result<ReconcileAction> {
    let namespace = pb
        .namespace()
        .ok_or_else(|| Error::Message("profile bundle has no namespace".to_string()))?;
    let api: Api<ProfileBundle> = Api::namespaced(ctx.client.clone(), &namespace);

    if pb.meta().deletion_timestamp.is_some() {
        delete_parser_workload(&pb, &ctx).await?;
        remove_finalizer(&api, &pb).await?;
        return Ok(ReconcileAction::await_change());
    }
    ensure_finalizer(&api, &pb).await?;

    // The parser workload does the heavy lifting; this loop only keeps it
    // running and pointed at the right image.
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    let desired = parser_workload(&pb, &ctx.config);
    match deployments.get_opt(&desired.name_any()).await? {
        None => {
            info!(bundle = %pb.name_any(), "creating content parser workload");
            deployments.create(&PostParams::default(), &desired).await?;
            patch_status(
                &api,
                &pb,
                ProfileBundleStatus {
                    data_stream_status: DataStreamStatusType::Pending,
                    ..Default::default()
                },
            )
            .await?;
        }
        Some(existing) => {
            if workload_needs_update(&existing, &pb) {
                info!(bundle = %pb.name_any(), "content image changed, restarting parser");
                let patch =
                    json!({"spec": serde_json::to_value(desired.spec.as_ref().unwrap())?});
                deployments
                    .patch(&desired.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                patch_status(
                    &api,
                    &pb,
                    ProfileBundleStatus {
                        data_stream_status: DataStreamStatusType::Pending,
                        ..Default::default()
                    },
                )
                .await?;
            }
        }
    }

    Ok(ReconcileAction::requeue(Duration::from_secs(120)))
}

fn parser_workload_name(pb: &ProfileBundle) -> String {
    format!("{}-pp", pb.name_any())
}

fn workload_needs_update(existing: &Deployment, pb: &ProfileBundle) -> bool {
    let image = existing
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.init_containers.as_ref())
        .and_then(|c| c.first())
        .and_then(|c| c.image.as_deref());
    image != Some(pb.spec.content_image.as_str())
}

/// The parser pod: an init container copies the data stream out of the
/// content image, the parser container runs this binary's profileparser
/// subcommand against it.
fn parser_workload(pb: &ProfileBundle, cfg: &RunConfig) -> Deployment {
    let labels: BTreeMap<String, String> =
        [("profile-bundle".to_string(), pb.name_any())].into();

    Deployment {
        metadata: ObjectMeta {
            name: Some(parser_workload_name(pb)),
            namespace: pb.namespace(),
            labels: Some(labels.clone()),
            owner_references: pb.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some("profileparser".to_string()),
                    init_containers: Some(vec![Container {
                        name: "content-container".to_string(),
                        image: Some(pb.spec.content_image.clone()),
                        command: Some(vec!["sh".to_string()]),
                        args: Some(vec![
                            "-c".to_string(),
                            format!("cp {} /content/", pb.spec.content_file),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "content-dir".to_string(),
                            mount_path: "/content".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: "profileparser".to_string(),
                        image: Some(cfg.operator_image.clone()),
                        command: Some(vec!["compliance-operator".to_string()]),
                        args: Some(vec![
                            "profileparser".to_string(),
                            format!("--name={}", pb.name_any()),
                            format!("--namespace={}", pb.namespace().unwrap_or_default()),
                            format!("--ds-path=/content/{}", pb.spec.content_file),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "content-dir".to_string(),
                            mount_path: "/content".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "content-dir".to_string(),
                        empty_dir: Some(Default::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn delete_parser_workload(pb: &ProfileBundle, ctx: &Context) -> Result<()> {
    let namespace = pb.namespace().unwrap_or_default();
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    match deployments
        .delete(&parser_workload_name(pb), &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Merges parser annotations into the existing map instead of replacing it,
/// so user-added keys survive a content refresh. Parser keys win over stale
/// parser values, user keys are left alone entirely.
pub fn merge_parser_annotations(
    existing: &BTreeMap<String, String>,
    parsed: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = existing.clone();
    for (k, v) in parsed {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Synchronizes the parsed data stream into the bundle's namespace. Run by
/// the parser workload, which has the content mounted locally.
pub async fn sync_content(
    client: &Client,
    pb: &ProfileBundle,
    datastream: &DataStream,
    removal_grace: Duration,
) -> Result<()> {
    let namespace = pb
        .namespace()
        .ok_or_else(|| Error::Message("profile bundle has no namespace".to_string()))?;
    let bundle_label: BTreeMap<String, String> =
        [(keys::PROFILE_BUNDLE_LABEL.to_string(), pb.name_any())].into();

    sync_rules(client, pb, &namespace, datastream, &bundle_label, removal_grace).await?;
    sync_profiles(client, pb, &namespace, datastream, &bundle_label).await?;
    sync_variables(client, pb, &namespace, datastream, &bundle_label).await?;

    let api: Api<ProfileBundle> = Api::namespaced(client.clone(), &namespace);
    let status = ProfileBundleStatus {
        data_stream_status: DataStreamStatusType::Valid,
        error_message: None,
        conditions: None,
    };
    let patch = json!({"status": serde_json::to_value(&status)?});
    api.patch_status(&pb.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Marks the bundle Invalid; downstream objects are left untouched until
/// the content image is fixed.
pub async fn mark_invalid(client: &Client, pb: &ProfileBundle, message: &str) -> Result<()> {
    let namespace = pb.namespace().unwrap_or_default();
    let api: Api<ProfileBundle> = Api::namespaced(client.clone(), &namespace);
    let status = ProfileBundleStatus {
        data_stream_status: DataStreamStatusType::Invalid,
        error_message: Some(message.to_string()),
        conditions: None,
    };
    let patch = json!({"status": serde_json::to_value(&status)?});
    api.patch_status(&pb.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn sync_rules(
    client: &Client,
    pb: &ProfileBundle,
    namespace: &str,
    datastream: &DataStream,
    bundle_label: &BTreeMap<String, String>,
    removal_grace: Duration,
) -> Result<()> {
    let api: Api<Rule> = Api::namespaced(client.clone(), namespace);
    let mut seen = Vec::new();

    for parsed in &datastream.rules {
        let name = rule_name_from_id(&parsed.id);
        seen.push(name.clone());

        let mut parser_annotations = BTreeMap::new();
        parser_annotations.insert(keys::RULE_ANNOTATION.to_string(), name.clone());

        let spec = RuleSpec {
            id: parsed.id.clone(),
            title: parsed.title.clone(),
            description: parsed.description.clone(),
            rationale: parsed.rationale.clone(),
            severity: parsed.severity,
            rule_type: parsed.rule_type,
            check_type: None,
        };

        match api.get_opt(&name).await? {
            None => {
                let mut rule = Rule::new(&name, spec);
                rule.metadata.namespace = Some(namespace.to_string());
                rule.metadata.labels = Some(bundle_label.clone());
                rule.metadata.annotations = Some(parser_annotations);
                rule.metadata.owner_references =
                    pb.controller_owner_ref(&()).map(|o| vec![o]);
                api.create(&PostParams::default(), &rule).await?;
            }
            Some(existing) => {
                // Labels are left untouched; annotations merge so user keys
                // survive. A prior removal mark is cleared since the rule is
                // back in the content.
                let mut annotations =
                    merge_parser_annotations(existing.annotations(), &parser_annotations);
                annotations.remove(keys::RULE_REMOVED_ANNOTATION);
                let patch = json!({
                    "metadata": {"annotations": annotations},
                    "spec": serde_json::to_value(&spec)?,
                });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
        }
    }

    // Rules that fell out of the content get a grace window so in-flight
    // scans keep their metadata, then go away.
    let selector = format!("{}={}", keys::PROFILE_BUNDLE_LABEL, pb.name_any());
    for rule in api.list(&ListParams::default().labels(&selector)).await? {
        let name = rule.name_any();
        if seen.contains(&name) {
            continue;
        }
        match rule.annotations().get(keys::RULE_REMOVED_ANNOTATION) {
            None => {
                let patch = json!({
                    "metadata": {"annotations": {
                        keys::RULE_REMOVED_ANNOTATION: Utc::now().to_rfc3339()
                    }}
                });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
            Some(marked) => {
                let expired = DateTime::parse_from_rfc3339(marked)
                    .map(|t| {
                        Utc::now().signed_duration_since(t.with_timezone(&Utc))
                            > k8s_openapi::chrono::Duration::from_std(removal_grace)
                                .unwrap_or_default()
                    })
                    .unwrap_or(true);
                if expired {
                    info!(rule = %name, "removing rule absent from refreshed content");
                    api.delete(&name, &DeleteParams::default()).await?;
                }
            }
        }
    }

    Ok(())
}

async fn sync_profiles(
    client: &Client,
    pb: &ProfileBundle,
    namespace: &str,
    datastream: &DataStream,
    bundle_label: &BTreeMap<String, String>,
) -> Result<()> {
    let api: Api<Profile> = Api::namespaced(client.clone(), namespace);
    for parsed in &datastream.profiles {
        let name = profile_name_from_id(&parsed.id);
        let spec = ProfileSpec {
            id: parsed.id.clone(),
            title: parsed.title.clone(),
            description: parsed.description.clone(),
            version: None,
            rules: parsed
                .selected_rules
                .iter()
                .map(|id| RuleReference {
                    name: rule_name_from_id(id),
                })
                .collect(),
            values: Vec::new(),
        };

        match api.get_opt(&name).await? {
            None => {
                let mut profile = Profile::new(&name, spec);
                profile.metadata.namespace = Some(namespace.to_string());
                profile.metadata.labels = Some(bundle_label.clone());
                profile.metadata.owner_references =
                    pb.controller_owner_ref(&()).map(|o| vec![o]);
                api.create(&PostParams::default(), &profile).await?;
            }
            Some(_) => {
                let patch = json!({"spec": serde_json::to_value(&spec)?});
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
        }
    }
    Ok(())
}

async fn sync_variables(
    client: &Client,
    pb: &ProfileBundle,
    namespace: &str,
    datastream: &DataStream,
    bundle_label: &BTreeMap<String, String>,
) -> Result<()> {
    let api: Api<Variable> = Api::namespaced(client.clone(), namespace);
    for parsed in &datastream.variables {
        let name = variable_name_from_id(&parsed.id);
        let spec = VariableSpec {
            id: parsed.id.clone(),
            title: parsed.title.clone(),
            description: parsed.description.clone(),
            value_type: parsed.var_type,
            value: parsed.value.clone(),
            selections: parsed.selections.clone(),
        };

        match api.get_opt(&name).await? {
            None => {
                let mut variable = Variable::new(&name, spec);
                variable.metadata.namespace = Some(namespace.to_string());
                variable.metadata.labels = Some(bundle_label.clone());
                variable.metadata.owner_references =
                    pb.controller_owner_ref(&()).map(|o| vec![o]);
                api.create(&PostParams::default(), &variable).await?;
            }
            Some(_) => {
                let patch = json!({"spec": serde_json::to_value(&spec)?});
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
        }
    }
    Ok(())
}

async fn patch_status(
    api: &Api<ProfileBundle>,
    pb: &ProfileBundle,
    status: ProfileBundleStatus,
) -> Result<()> {
    let patch = json!({"status": serde_json::to_value(&status)?});
    api.patch_status(&pb.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn ensure_finalizer(api: &Api<ProfileBundle>, pb: &ProfileBundle) -> Result<()> {
    if pb
        .finalizers()
        .contains(&PROFILE_BUNDLE_FINALIZER.to_string())
    {
        return Ok(());
    }
    let mut finalizers = pb.finalizers().to_vec();
    finalizers.push(PROFILE_BUNDLE_FINALIZER.to_string());
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(&pb.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<ProfileBundle>, pb: &ProfileBundle) -> Result<()> {
    let finalizers: Vec<String> = pb
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != PROFILE_BUNDLE_FINALIZER)
        .cloned()
        .collect();
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(&pb.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::ProfileBundleSpec;

    #[test]
    fn user_annotations_survive_a_parser_merge() {
        let existing: BTreeMap<String, String> = [
            ("internal-id".to_string(), "SEC-1".to_string()),
            (keys::RULE_ANNOTATION.to_string(), "stale-name".to_string()),
        ]
        .into();
        let parsed: BTreeMap<String, String> =
            [(keys::RULE_ANNOTATION.to_string(), "fresh-name".to_string())].into();

        let merged = merge_parser_annotations(&existing, &parsed);
        // User key survives, parser key refreshes.
        assert_eq!(merged.get("internal-id").map(String::as_str), Some("SEC-1"));
        assert_eq!(
            merged.get(keys::RULE_ANNOTATION).map(String::as_str),
            Some("fresh-name")
        );
    }

    #[test]
    fn parser_workload_mounts_the_content_image() {
        let mut pb = ProfileBundle::new(
            "ocp4",
            ProfileBundleSpec {
                content_image: "ghcr.io/complianceascode/ocp4:latest".into(),
                content_file: "ssg-ocp4-ds.xml".into(),
            },
        );
        pb.metadata.namespace = Some("openshift-compliance".into());

        let workload = parser_workload(&pb, &RunConfig::from_env());
        assert_eq!(workload.name_any(), "ocp4-pp");
        let pod = workload.spec.unwrap().template.spec.unwrap();
        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.image.as_deref(), Some("ghcr.io/complianceascode/ocp4:latest"));
        assert!(init.args.as_ref().unwrap()[1].contains("ssg-ocp4-ds.xml"));
    }

    #[test]
    fn workload_update_detects_image_changes() {
        let mut pb = ProfileBundle::new(
            "ocp4",
            ProfileBundleSpec {
                content_image: "img:v2".into(),
                content_file: "ds.xml".into(),
            },
        );
        pb.metadata.namespace = Some("ns".into());
        let mut existing = parser_workload(&pb, &RunConfig::from_env());
        assert!(!workload_needs_update(&existing, &pb));

        pb.spec.content_image = "img:v3".into();
        assert!(workload_needs_update(&existing, &pb));
        existing = parser_workload(&pb, &RunConfig::from_env());
        assert!(!workload_needs_update(&existing, &pb));
    }
}
