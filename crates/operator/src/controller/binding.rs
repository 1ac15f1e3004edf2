// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The ScanSettingBinding controller: validates the referenced profiles and
//! settings, then renders exactly one suite with one scan per (profile,
//! role) plus one platform scan per platform profile.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    ComplianceScanSpec, ComplianceScanSpecWrapper, ComplianceSuite, ComplianceSuiteSpec, Profile,
    ProfileBundle, ScanSetting, ScanSettingBinding, ScanSettingBindingStatus, ScanType,
    ScannerType, TailoredProfile,
};
use futures::StreamExt;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

use crate::controller::Context;
use crate::{Error, Result};

pub async fn run(ctx: Arc<Context>) {
    let bindings: Api<ScanSettingBinding> = Api::all(ctx.client.clone());
    let suites: Api<ComplianceSuite> = Api::all(ctx.client.clone());

    Controller::new(bindings, WatcherConfig::default().any_semantic())
        .owns(suites, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(
    _binding: Arc<ScanSettingBinding>,
    err: &Error,
    ctx: Arc<Context>,
) -> ReconcileAction {
    warn!(error = %err, "binding reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

async fn reconcile(binding: Arc<ScanSettingBinding>, ctx: Arc<Context>) -> Result<ReconcileAction> {
    let namespace = binding
        .namespace()
        .ok_or_else(|| Error::Message("binding has no namespace".to_string()))?;

    let settings_api: Api<ScanSetting> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(settings) = settings_api.get_opt(&binding.spec.settings_ref.name).await? else {
        return invalid(
            &binding,
            &ctx,
            format!("ScanSetting '{}' not found", binding.spec.settings_ref.name),
        )
        .await;
    };

    let mut scans = Vec::new();
    for profile_ref in &binding.spec.profiles {
        match profile_ref.kind.as_str() {
            "Profile" => {
                let api: Api<Profile> = Api::namespaced(ctx.client.clone(), &namespace);
                let Some(profile) = api.get_opt(&profile_ref.name).await? else {
                    return invalid(
                        &binding,
                        &ctx,
                        format!("Profile '{}' not found", profile_ref.name),
                    )
                    .await;
                };
                scans.extend(scans_for_profile(&profile, &settings, &ctx).await?);
            }
            "TailoredProfile" => {
                let api: Api<TailoredProfile> = Api::namespaced(ctx.client.clone(), &namespace);
                let Some(tp) = api.get_opt(&profile_ref.name).await? else {
                    return invalid(
                        &binding,
                        &ctx,
                        format!("TailoredProfile '{}' not found", profile_ref.name),
                    )
                    .await;
                };
                scans.extend(scans_for_tailored_profile(&tp, &settings, &ctx).await?);
            }
            other => {
                return invalid(&binding, &ctx, format!("unknown profile kind '{other}'")).await;
            }
        }
    }

    let suite = build_suite(&binding, &settings, scans);
    let suites: Api<ComplianceSuite> = Api::namespaced(ctx.client.clone(), &namespace);
    match suites.get_opt(&suite.name_any()).await? {
        None => {
            info!(binding = %binding.name_any(), "creating suite");
            suites.create(&PostParams::default(), &suite).await?;
        }
        Some(_) => {
            let patch = json!({"spec": serde_json::to_value(&suite.spec)?});
            suites
                .patch(&suite.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
    }

    let bindings: Api<ScanSettingBinding> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut status = ScanSettingBindingStatus {
        output_ref: Some(suite.name_any()),
        conditions: binding.status.as_ref().and_then(|s| s.conditions.clone()),
    };
    let mut conditions = status.conditions.take().unwrap_or_default();
    conditions.set_ready("binding");
    status.conditions = Some(conditions);
    let patch = json!({"status": serde_json::to_value(&status)?});
    bindings
        .patch_status(&binding.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(ReconcileAction::requeue(Duration::from_secs(300)))
}

async fn invalid(
    binding: &ScanSettingBinding,
    ctx: &Context,
    message: String,
) -> Result<ReconcileAction> {
    warn!(binding = %binding.name_any(), message = %message, "invalid binding");
    let namespace = binding.namespace().unwrap_or_default();
    let bindings: Api<ScanSettingBinding> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut conditions = binding
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    conditions.set_invalid(&message);
    let status = ScanSettingBindingStatus {
        output_ref: None,
        conditions: Some(conditions),
    };
    let patch = json!({"status": serde_json::to_value(&status)?});
    bindings
        .patch_status(&binding.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    let oref = binding.object_ref(&());
    ctx.publish_warning(&oref, "Invalid", "Reconcile", message).await;
    // Spec errors don't fix themselves; wait for the next change.
    Ok(ReconcileAction::await_change())
}

/// Node profiles (by convention suffixed `-node`) scan every configured
/// role; platform profiles scan the control plane once.
async fn scans_for_profile(
    profile: &Profile,
    settings: &ScanSetting,
    ctx: &Context,
) -> Result<Vec<ComplianceScanSpecWrapper>> {
    let (content_image, content_file) = bundle_content(profile, ctx).await?;
    let base = ComplianceScanSpec {
        profile: profile.spec.id.clone(),
        content_image,
        content: content_file,
        scanner_type: ScannerType::OpenScap,
        raw_result_storage: settings.spec.raw_result_storage.clone(),
        priority_class: settings.spec.priority_class.clone(),
        show_not_applicable: settings.spec.show_not_applicable,
        timeout_seconds: settings.spec.timeout_seconds.unwrap_or(1800),
        ..Default::default()
    };

    let name = profile.name_any();
    if name.ends_with("-node") {
        Ok(settings
            .spec
            .roles
            .iter()
            .map(|role| ComplianceScanSpecWrapper {
                name: format!("scan-{name}-{role}"),
                scan: ComplianceScanSpec {
                    scan_type: ScanType::Node,
                    node_selector: role_selector(role),
                    ..base.clone()
                },
            })
            .collect())
    } else {
        Ok(vec![ComplianceScanSpecWrapper {
            name: format!("scan-{name}"),
            scan: ComplianceScanSpec {
                scan_type: ScanType::Platform,
                ..base
            },
        }])
    }
}

/// Tailored profiles inherit their scanner type from the annotation the
/// tailored-profile controller computed out of the selections.
async fn scans_for_tailored_profile(
    tp: &TailoredProfile,
    settings: &ScanSetting,
    ctx: &Context,
) -> Result<Vec<ComplianceScanSpecWrapper>> {
    let scanner_type = match tp
        .annotations()
        .get(keys::SCANNER_TYPE_ANNOTATION)
        .map(String::as_str)
    {
        Some("cel") => ScannerType::Cel,
        _ => ScannerType::OpenScap,
    };

    if scanner_type == ScannerType::Cel {
        // CEL scans resolve their rules straight from the TailoredProfile.
        return Ok(vec![ComplianceScanSpecWrapper {
            name: tp.name_any(),
            scan: ComplianceScanSpec {
                scan_type: ScanType::Platform,
                scanner_type: ScannerType::Cel,
                profile: tp.name_any(),
                raw_result_storage: settings.spec.raw_result_storage.clone(),
                priority_class: settings.spec.priority_class.clone(),
                show_not_applicable: settings.spec.show_not_applicable,
                timeout_seconds: settings.spec.timeout_seconds.unwrap_or(1800),
                ..Default::default()
            },
        }]);
    }

    let namespace = tp.namespace().unwrap_or_default();
    let Some(base_name) = &tp.spec.extends else {
        return Err(Error::InvalidSpec(format!(
            "TailoredProfile '{}' extends no profile and selects no CustomRules",
            tp.name_any()
        )));
    };
    let profiles: Api<Profile> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(base) = profiles.get_opt(base_name).await? else {
        return Err(Error::InvalidSpec(format!(
            "TailoredProfile '{}' extends missing profile '{base_name}'",
            tp.name_any()
        )));
    };

    let tailoring_cm = tp
        .status
        .as_ref()
        .and_then(|s| s.output_ref.as_ref())
        .map(|r| r.name.clone());
    let profile_id = tp
        .status
        .as_ref()
        .map(|s| s.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| crate::xccdf::tailored_profile_id(&tp.name_any()));

    let mut wrappers = scans_for_profile(&base, settings, ctx).await?;
    for wrapper in &mut wrappers {
        wrapper.name = format!(
            "scan-{}",
            wrapper
                .name
                .trim_start_matches("scan-")
                .replace(base.name_any().as_str(), tp.name_any().as_str())
        );
        wrapper.scan.profile = profile_id.clone();
        wrapper.scan.tailoring_config_map = tailoring_cm.clone();
    }
    Ok(wrappers)
}

/// The content image and file come from the bundle owning the profile.
async fn bundle_content(profile: &Profile, ctx: &Context) -> Result<(String, String)> {
    let namespace = profile.namespace().unwrap_or_default();
    let Some(bundle_name) = profile.labels().get(keys::PROFILE_BUNDLE_LABEL) else {
        return Err(Error::InvalidSpec(format!(
            "Profile '{}' has no bundle label",
            profile.name_any()
        )));
    };
    let bundles: Api<ProfileBundle> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(bundle) = bundles.get_opt(bundle_name).await? else {
        return Err(Error::InvalidSpec(format!(
            "ProfileBundle '{bundle_name}' not found"
        )));
    };
    Ok((bundle.spec.content_image, bundle.spec.content_file))
}

fn role_selector(role: &str) -> BTreeMap<String, String> {
    [(format!("node-role.kubernetes.io/{role}"), String::new())].into()
}

fn build_suite(
    binding: &ScanSettingBinding,
    settings: &ScanSetting,
    scans: Vec<ComplianceScanSpecWrapper>,
) -> ComplianceSuite {
    ComplianceSuite {
        metadata: ObjectMeta {
            name: Some(binding.name_any()),
            namespace: binding.namespace(),
            owner_references: binding.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: ComplianceSuiteSpec {
            auto_apply_remediations: settings.spec.auto_apply_remediations,
            auto_update_remediations: settings.spec.auto_update_remediations,
            schedule: settings.spec.schedule.clone(),
            scans,
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_selectors_use_the_node_role_label() {
        let selector = role_selector("worker");
        assert!(selector.contains_key("node-role.kubernetes.io/worker"));
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn suites_inherit_the_settings_schedule_and_flags() {
        let binding = ScanSettingBinding::new(
            "nightly",
            compliance_crd::v1_alpha1::ScanSettingBindingSpec::default(),
        );
        let mut settings = ScanSetting::new(
            "default",
            compliance_crd::v1_alpha1::ScanSettingSpec::default(),
        );
        settings.spec.schedule = "0 1 * * *".into();
        settings.spec.auto_apply_remediations = true;

        let suite = build_suite(&binding, &settings, Vec::new());
        assert_eq!(suite.name_any(), "nightly");
        assert_eq!(suite.spec.schedule, "0 1 * * *");
        assert!(suite.spec.auto_apply_remediations);
    }
}
