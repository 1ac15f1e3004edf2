// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The TailoredProfile controller: validates rule selections, computes the
//! scanner type, and renders the tailoring ConfigMap for OpenSCAP scans.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    CustomRule, OutputRef, Profile, ProfileBundle, Rule, TailoredProfile, TailoredProfileState,
    TailoredProfileStatus, Variable,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::chrono::Utc;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

use crate::controller::Context;
use crate::xccdf::tailoring::{Selection, SetValue, TailoringDocument, TailoringProfile};
use crate::xccdf::{tailored_profile_id, tailoring_id};
use crate::{Error, Result};

pub async fn run(ctx: Arc<Context>) {
    let tps: Api<TailoredProfile> = Api::all(ctx.client.clone());

    Controller::new(tps, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(_tp: Arc<TailoredProfile>, err: &Error, ctx: Arc<Context>) -> ReconcileAction {
    warn!(error = %err, "tailored profile reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

/// Which catalog a tailoring's selections resolve against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SelectionKind {
    Scap,
    Cel,
}

async fn reconcile(tp: Arc<TailoredProfile>, ctx: Arc<Context>) -> Result<ReconcileAction> {
    let namespace = tp
        .namespace()
        .ok_or_else(|| Error::Message("tailored profile has no namespace".to_string()))?;

    let generation = tp.metadata.generation.unwrap_or_default();
    if let Some(status) = &tp.status {
        if status.observed_generation == generation
            && status.state == TailoredProfileState::Ready
        {
            return Ok(ReconcileAction::await_change());
        }
    }

    match process(&tp, &namespace, &ctx).await {
        Ok(status) => {
            patch_status(&tp, &namespace, &ctx, status).await?;
            Ok(ReconcileAction::await_change())
        }
        Err(Error::InvalidSpec(message)) => {
            warn!(tp = %tp.name_any(), message = %message, "invalid tailored profile");
            let mut conditions = compliance_crd::v1_alpha1::Conditions::default();
            conditions.set_invalid(&message);
            let status = TailoredProfileStatus {
                state: TailoredProfileState::Error,
                error_message: Some(message.clone()),
                observed_generation: generation,
                conditions: Some(conditions),
                ..Default::default()
            };
            patch_status(&tp, &namespace, &ctx, status).await?;

            let oref = tp.object_ref(&());
            ctx.publish_warning(&oref, "Invalid", "Reconcile", message).await;
            Ok(ReconcileAction::await_change())
        }
        Err(e) => Err(e),
    }
}

async fn process(
    tp: &TailoredProfile,
    namespace: &str,
    ctx: &Context,
) -> Result<TailoredProfileStatus> {
    let selections: Vec<&str> = tp
        .spec
        .enable_rules
        .iter()
        .chain(tp.spec.disable_rules.iter())
        .chain(tp.spec.manual_rules.iter())
        .map(|r| r.name.as_str())
        .collect();
    if selections.is_empty() && tp.spec.extends.is_none() {
        return Err(Error::InvalidSpec(
            "tailored profile selects nothing and extends nothing".to_string(),
        ));
    }

    let rules_api: Api<Rule> = Api::namespaced(ctx.client.clone(), namespace);
    let custom_api: Api<CustomRule> = Api::namespaced(ctx.client.clone(), namespace);

    let mut kind: Option<SelectionKind> = None;
    let mut resolved_rules: BTreeMap<String, Rule> = BTreeMap::new();
    for name in &selections {
        let scap = rules_api.get_opt(name).await?;
        let cel = custom_api.get_opt(name).await?;
        let this_kind = match (scap, cel) {
            (Some(rule), _) => {
                resolved_rules.insert((*name).to_string(), rule);
                SelectionKind::Scap
            }
            (None, Some(_)) => SelectionKind::Cel,
            (None, None) => {
                return Err(Error::InvalidSpec(format!(
                    "selection '{name}' matches no Rule or CustomRule in {namespace}"
                )));
            }
        };
        match kind {
            None => kind = Some(this_kind),
            Some(existing) if existing != this_kind => {
                return Err(Error::InvalidSpec(
                    "tailored profile mixes CustomRules with SCAP Rules".to_string(),
                ));
            }
            Some(_) => {}
        }
    }

    let generation = tp.metadata.generation.unwrap_or_default();
    match kind {
        Some(SelectionKind::Cel) => {
            annotate_scanner_type(tp, namespace, ctx, "cel").await?;
            Ok(ready_status(tp, generation, None))
        }
        _ => {
            annotate_scanner_type(tp, namespace, ctx, "openscap").await?;
            let output_ref =
                render_tailoring(tp, namespace, ctx, &resolved_rules).await?;
            Ok(ready_status(tp, generation, Some(output_ref)))
        }
    }
}

fn ready_status(
    tp: &TailoredProfile,
    generation: i64,
    output_ref: Option<OutputRef>,
) -> TailoredProfileStatus {
    let mut conditions = compliance_crd::v1_alpha1::Conditions::default();
    conditions.set_ready("tailored profile");
    TailoredProfileStatus {
        id: tailored_profile_id(&tp.name_any()),
        output_ref,
        state: TailoredProfileState::Ready,
        error_message: None,
        observed_generation: generation,
        conditions: Some(conditions),
    }
}

async fn annotate_scanner_type(
    tp: &TailoredProfile,
    namespace: &str,
    ctx: &Context,
    scanner_type: &str,
) -> Result<()> {
    if tp.annotations().get(keys::SCANNER_TYPE_ANNOTATION).map(String::as_str)
        == Some(scanner_type)
    {
        return Ok(());
    }
    let api: Api<TailoredProfile> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = json!({
        "metadata": {"annotations": {keys::SCANNER_TYPE_ANNOTATION: scanner_type}}
    });
    api.patch(&tp.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Renders the XCCDF tailoring document into a ConfigMap owned by the
/// TailoredProfile.
async fn render_tailoring(
    tp: &TailoredProfile,
    namespace: &str,
    ctx: &Context,
    resolved_rules: &BTreeMap<String, Rule>,
) -> Result<OutputRef> {
    let (extends_id, content_file) = match &tp.spec.extends {
        Some(base_name) => {
            let profiles: Api<Profile> = Api::namespaced(ctx.client.clone(), namespace);
            let Some(base) = profiles.get_opt(base_name).await? else {
                return Err(Error::InvalidSpec(format!(
                    "extended profile '{base_name}' not found"
                )));
            };
            validate_membership(tp, &base)?;
            let content_file = bundle_content_file(&base, namespace, ctx).await?;
            (Some(base.spec.id.clone()), content_file)
        }
        None => {
            // Standalone tailorings take their content from the first
            // resolved rule's bundle.
            let content_file = match resolved_rules.values().next() {
                Some(rule) => rule_content_file(rule, namespace, ctx).await?,
                None => String::new(),
            };
            (None, content_file)
        }
    };

    let variables_api: Api<Variable> = Api::namespaced(ctx.client.clone(), namespace);
    let mut values = Vec::new();
    for set_value in &tp.spec.set_values {
        let Some(variable) = variables_api.get_opt(&set_value.name).await? else {
            return Err(Error::InvalidSpec(format!(
                "variable '{}' not found",
                set_value.name
            )));
        };
        if !variable.spec.selections.is_empty()
            && !variable.spec.selections.contains(&set_value.value)
        {
            return Err(Error::InvalidSpec(format!(
                "value '{}' is not allowed for variable '{}'",
                set_value.value, set_value.name
            )));
        }
        values.push(SetValue {
            idref: variable.spec.id.clone(),
            value: set_value.value.clone(),
        });
    }

    let mut selections = Vec::new();
    for (names, selected) in [
        (&tp.spec.enable_rules, true),
        (&tp.spec.disable_rules, false),
        (&tp.spec.manual_rules, true),
    ] {
        for reference in names {
            let Some(rule) = resolved_rules.get(&reference.name) else {
                continue;
            };
            selections.push(Selection {
                idref: rule.spec.id.clone(),
                selected,
            });
        }
    }

    let doc = TailoringDocument {
        id: tailoring_id(&tp.name_any()),
        benchmark_href: format!("/content/{content_file}"),
        version_time: Utc::now().to_rfc3339(),
        profile: TailoringProfile {
            id: tailored_profile_id(&tp.name_any()),
            extends: extends_id,
            title: (!tp.spec.title.is_empty()).then(|| tp.spec.title.clone()),
            description: (!tp.spec.description.is_empty()).then(|| tp.spec.description.clone()),
            selections,
            values,
        },
    };
    let xml = doc.to_xml()?;

    let cm_name = format!("{}-tp", tp.name_any());
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(cm_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: tp.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        data: Some([("tailoring.xml".to_string(), xml)].into()),
        ..Default::default()
    };

    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
    match cms.get_opt(&cm_name).await? {
        None => {
            info!(tp = %tp.name_any(), "creating tailoring config map");
            cms.create(&PostParams::default(), &cm).await?;
        }
        Some(_) => {
            let patch = json!({"data": cm.data});
            cms.patch(&cm_name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
    }

    Ok(OutputRef {
        name: cm_name,
        namespace: namespace.to_string(),
    })
}

/// Enabled rules must belong to the extended profile, unless the override
/// validation is explicitly disabled.
fn validate_membership(tp: &TailoredProfile, base: &Profile) -> Result<()> {
    if tp
        .annotations()
        .contains_key(keys::DISABLE_OUTDATED_REFERENCE_VALIDATION_ANNOTATION)
    {
        return Ok(());
    }
    for enabled in &tp.spec.enable_rules {
        if !base.spec.rules.iter().any(|r| r.name == enabled.name) {
            return Err(Error::InvalidSpec(format!(
                "rule '{}' is not part of profile '{}'",
                enabled.name,
                base.name_any()
            )));
        }
    }
    Ok(())
}

async fn bundle_content_file(profile: &Profile, namespace: &str, ctx: &Context) -> Result<String> {
    let Some(bundle_name) = profile.labels().get(keys::PROFILE_BUNDLE_LABEL) else {
        return Ok(String::new());
    };
    let bundles: Api<ProfileBundle> = Api::namespaced(ctx.client.clone(), namespace);
    Ok(bundles
        .get_opt(bundle_name)
        .await?
        .map(|b| b.spec.content_file)
        .unwrap_or_default())
}

async fn rule_content_file(rule: &Rule, namespace: &str, ctx: &Context) -> Result<String> {
    let Some(bundle_name) = rule.labels().get(keys::PROFILE_BUNDLE_LABEL) else {
        return Ok(String::new());
    };
    let bundles: Api<ProfileBundle> = Api::namespaced(ctx.client.clone(), namespace);
    Ok(bundles
        .get_opt(bundle_name)
        .await?
        .map(|b| b.spec.content_file)
        .unwrap_or_default())
}

async fn patch_status(
    tp: &TailoredProfile,
    namespace: &str,
    ctx: &Context,
    status: TailoredProfileStatus,
) -> Result<()> {
    let api: Api<TailoredProfile> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = json!({"status": serde_json::to_value(&status)?});
    api.patch_status(&tp.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::{ProfileSpec, RuleReference, TailoredProfileSpec};

    fn profile_with_rules(rules: &[&str]) -> Profile {
        Profile::new(
            "ocp4-cis",
            ProfileSpec {
                id: "xccdf_org.ssgproject.content_profile_cis".into(),
                title: "CIS".into(),
                description: String::new(),
                version: None,
                rules: rules
                    .iter()
                    .map(|r| RuleReference { name: (*r).to_string() })
                    .collect(),
                values: Vec::new(),
            },
        )
    }

    fn tp_enabling(rules: &[&str]) -> TailoredProfile {
        TailoredProfile::new(
            "modified",
            TailoredProfileSpec {
                extends: Some("ocp4-cis".into()),
                enable_rules: rules
                    .iter()
                    .map(|r| RuleReference { name: (*r).to_string() })
                    .collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn enabling_a_foreign_rule_is_rejected() {
        let base = profile_with_rules(&["rule-a", "rule-b"]);
        let tp = tp_enabling(&["rule-c"]);
        let err = validate_membership(&tp, &base).unwrap_err();
        assert!(err.to_string().contains("rule-c"));
    }

    #[test]
    fn membership_validation_can_be_disabled() {
        let base = profile_with_rules(&["rule-a"]);
        let mut tp = tp_enabling(&["rule-c"]);
        tp.metadata.annotations = Some(
            [(
                keys::DISABLE_OUTDATED_REFERENCE_VALIDATION_ANNOTATION.to_string(),
                "true".to_string(),
            )]
            .into(),
        );
        assert!(validate_membership(&tp, &base).is_ok());
    }

    #[test]
    fn member_rules_validate() {
        let base = profile_with_rules(&["rule-a", "rule-b"]);
        let tp = tp_enabling(&["rule-a", "rule-b"]);
        assert!(validate_membership(&tp, &base).is_ok());
    }
}
