// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The ComplianceScan controller: observes the scan's workloads, feeds the
//! pure state machine in [`phases`], and executes whatever actions fall out.

pub mod phases;
pub mod rotation;
pub mod workload;

use std::sync::Arc;
use std::time::Duration;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    ComplianceScan, ComplianceScanStatus, CustomRule, ScanPhase, ScanResult, ScannerType,
    TailoredProfile, SCAN_FINALIZER,
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Node, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::aggregator::{from_cel_results, Aggregator};
use crate::cel::CelResult;
use crate::controller::Context;
use crate::{Error, Result};

use self::phases::{Action, Observed, Transition};

/// Container waiting reasons that will never recover without operator or
/// user intervention.
const UNRECOVERABLE_REASONS: [&str; 3] = ["ImagePullBackOff", "ErrImagePull", "CrashLoopBackOff"];

/// Verifies the CRDs are reachable before the loops start spinning.
pub async fn preflight(ctx: &Context) -> Result<()> {
    let scans: Api<ComplianceScan> = Api::all(ctx.client.clone());
    scans.list(&ListParams::default().limit(1)).await?;
    Ok(())
}

pub async fn run(ctx: Arc<Context>) {
    let scans: Api<ComplianceScan> = Api::all(ctx.client.clone());
    let pods: Api<Pod> = Api::all(ctx.client.clone());

    Controller::new(scans, WatcherConfig::default().any_semantic())
        .owns(pods, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(_scan: Arc<ComplianceScan>, err: &Error, ctx: Arc<Context>) -> ReconcileAction {
    warn!(error = %err, "scan reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

async fn reconcile(scan: Arc<ComplianceScan>, ctx: Arc<Context>) -> Result<ReconcileAction> {
    let namespace = scan
        .namespace()
        .ok_or_else(|| Error::Message("scan has no namespace".to_string()))?;
    let api: Api<ComplianceScan> = Api::namespaced(ctx.client.clone(), &namespace);

    if scan.meta().deletion_timestamp.is_some() {
        cleanup_workloads(&scan, &ctx).await?;
        remove_finalizer(&api, &scan).await?;
        return Ok(ReconcileAction::await_change());
    }
    ensure_finalizer(&api, &scan).await?;

    let status = scan.status.clone().unwrap_or_default();
    let observed = observe(&scan, &status, &ctx).await?;
    let transition = phases::step(status.phase, &observed);
    debug!(
        scan = %scan.name_any(),
        phase = status.phase.as_str(),
        next = transition.next.as_str(),
        "scan state machine step"
    );

    let new_status = execute(&scan, &status, &transition, &ctx).await?;
    patch_status(&api, &scan, &new_status).await?;

    if transition.next != status.phase {
        let oref = scan.object_ref(&());
        ctx.publish_event(
            &oref,
            "PhaseTransition",
            "Reconcile",
            format!("scan moved to phase {}", transition.next.as_str()),
        )
        .await;
        ctx.touch().await;
    }

    Ok(match transition.next {
        ScanPhase::Done => ReconcileAction::requeue(Duration::from_secs(300)),
        _ => ReconcileAction::requeue(Duration::from_secs(10)),
    })
}

/// Rejects specs the state machine should never launch.
fn validate_spec(scan: &ComplianceScan) -> Option<String> {
    if scan.spec.profile.is_empty() {
        return Some("spec.profile must not be empty".to_string());
    }
    match scan.spec.scanner_type {
        ScannerType::OpenScap => {
            if scan.spec.content_image.is_empty() || scan.spec.content.is_empty() {
                return Some(
                    "openscap scans need both contentImage and content".to_string(),
                );
            }
        }
        ScannerType::Cel => {
            if scan.spec.scan_type == compliance_crd::v1_alpha1::ScanType::Node {
                return Some("the cel scanner only supports platform scans".to_string());
            }
        }
    }
    if scan.spec.scan_type == compliance_crd::v1_alpha1::ScanType::Node
        && scan.spec.node_selector.is_empty()
    {
        return Some("node scans need a nodeSelector".to_string());
    }
    None
}

async fn observe(
    scan: &ComplianceScan,
    status: &ComplianceScanStatus,
    ctx: &Context,
) -> Result<Observed> {
    let namespace = scan.namespace().unwrap_or_default();
    let mut obs = Observed {
        spec_error: validate_spec(scan),
        needs_result_server: scan.spec.scanner_type == ScannerType::OpenScap,
        rescan_requested: scan.annotations().contains_key(keys::RESCAN_ANNOTATION),
        timed_out: phase_timed_out(scan, status),
        ..Default::default()
    };

    obs.tailoring_ready = match &scan.spec.tailoring_config_map {
        None => true,
        Some(name) => {
            let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
            match cms.get_opt(name).await? {
                Some(cm) => cm
                    .data
                    .as_ref()
                    .is_some_and(|d| d.contains_key("tailoring.xml")),
                None => false,
            }
        }
    };

    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    obs.pvc_bound = pvcs.get_opt(&workload::pvc_name(scan)).await?.is_some();

    if obs.needs_result_server {
        let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
        obs.result_server_ready = deployments
            .get_opt(&workload::result_server_name(scan))
            .await?
            .and_then(|d| d.status)
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            > 0;
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!(
        "{}={},workload=scanner",
        keys::SCAN_LABEL,
        scan.name_any()
    );
    let scanner_pods = pods.list(&ListParams::default().labels(&selector)).await?;
    obs.workload_created = !scanner_pods.items.is_empty();

    let mut all_done = obs.workload_created;
    for pod in &scanner_pods.items {
        match pod_state(pod) {
            PodState::Running => all_done = false,
            PodState::Succeeded => {}
            PodState::Unrecoverable(reason) => {
                obs.pod_failure = Some(format!("{}: {reason}", pod.name_any()));
                all_done = false;
            }
        }
    }
    obs.pods_done = all_done;

    obs.exit_codes = collect_exit_codes(scan, ctx).await?;

    if status.phase == ScanPhase::Aggregating {
        obs.aggregation_done = match scan.spec.scanner_type {
            // The aggregator pod owns OpenSCAP aggregation.
            ScannerType::OpenScap => {
                let aggregator = pods.get_opt(&workload::aggregator_pod_name(scan)).await?;
                aggregator.as_ref().map(pod_state) == Some(PodState::Succeeded)
            }
            // CEL aggregates in this process; the write path is idempotent
            // so re-running on requeue is harmless.
            ScannerType::Cel => aggregate_cel(scan, ctx).await?,
        };
    }

    Ok(obs)
}

#[derive(PartialEq, Eq)]
enum PodState {
    Running,
    Succeeded,
    Unrecoverable(String),
}

fn pod_state(pod: &Pod) -> PodState {
    let Some(status) = &pod.status else {
        return PodState::Running;
    };
    match status.phase.as_deref() {
        Some("Succeeded") => return PodState::Succeeded,
        Some("Failed") => {
            return PodState::Unrecoverable(
                status
                    .message
                    .clone()
                    .unwrap_or_else(|| "pod failed".to_string()),
            );
        }
        _ => {}
    }
    for cs in status.container_statuses.iter().flatten() {
        if let Some(waiting) = cs.state.as_ref().and_then(|s| s.waiting.as_ref()) {
            if let Some(reason) = &waiting.reason {
                if UNRECOVERABLE_REASONS.contains(&reason.as_str()) {
                    return PodState::Unrecoverable(reason.clone());
                }
            }
        }
    }
    PodState::Running
}

fn phase_timed_out(scan: &ComplianceScan, status: &ComplianceScanStatus) -> bool {
    if scan.spec.timeout_seconds == 0 || status.phase == ScanPhase::Done {
        return false;
    }
    let Some(started) = &status.phase_start_timestamp else {
        return false;
    };
    let elapsed = Utc::now().signed_duration_since(started.0);
    elapsed.num_seconds() >= i64::from(scan.spec.timeout_seconds)
}

/// Exit codes live in the per-node result ConfigMaps the log collectors (or
/// the CEL scanner) write.
async fn collect_exit_codes(scan: &ComplianceScan, ctx: &Context) -> Result<Vec<i32>> {
    let namespace = scan.namespace().unwrap_or_default();
    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!("{}={}", keys::SCAN_LABEL, scan.name_any());
    let list = cms.list(&ListParams::default().labels(&selector)).await?;

    let mut codes = Vec::new();
    for cm in list {
        if let Some(raw) = cm.data.as_ref().and_then(|d| d.get("exit-code")) {
            match raw.trim().parse::<i32>() {
                Ok(code) => codes.push(code),
                Err(_) => codes.push(-1),
            }
        }
    }
    Ok(codes)
}

/// In-process CEL aggregation: read the scanner's results ConfigMap, map
/// through the originating CustomRules, and hand off to the aggregator.
async fn aggregate_cel(scan: &ComplianceScan, ctx: &Context) -> Result<bool> {
    let namespace = scan.namespace().unwrap_or_default();
    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
    let cm_name = workload::result_configmap_name(scan, "api-checks");
    let Some(cm) = cms.get_opt(&cm_name).await? else {
        return Ok(false);
    };
    let Some(raw) = cm.data.as_ref().and_then(|d| d.get("results")) else {
        return Ok(false);
    };

    let cel_results: Vec<CelResult> = serde_json::from_str(raw)?;
    let rules = selected_custom_rules(scan, ctx).await.unwrap_or_else(|e| {
        warn!(error = %e, "could not resolve CustomRules, aggregating without rule metadata");
        Vec::new()
    });

    let results = from_cel_results(&cel_results, &rules);
    let timestamp = Utc::now().to_rfc3339();
    let aggregator = Aggregator::new(ctx.client.clone(), &namespace);
    let warnings = aggregator.aggregate(scan, &results, &timestamp).await?;
    for warning in &warnings {
        warn!(scan = %scan.name_any(), warning = %warning, "aggregation warning");
    }
    ctx.metrics.check_results_written(results.len() as u64);

    Ok(true)
}

/// For CEL scans the spec's profile names the TailoredProfile; its enabled
/// selections are the CustomRules to resolve.
async fn selected_custom_rules(scan: &ComplianceScan, ctx: &Context) -> Result<Vec<CustomRule>> {
    let namespace = scan.namespace().unwrap_or_default();
    let tps: Api<TailoredProfile> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(tp) = tps.get_opt(&scan.spec.profile).await? else {
        return Ok(Vec::new());
    };

    let rules_api: Api<CustomRule> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut rules = Vec::new();
    for selection in tp.spec.enable_rules.iter().chain(tp.spec.manual_rules.iter()) {
        if let Some(rule) = rules_api.get_opt(&selection.name).await? {
            rules.push(rule);
        }
    }
    Ok(rules)
}

async fn execute(
    scan: &ComplianceScan,
    status: &ComplianceScanStatus,
    transition: &Transition,
    ctx: &Context,
) -> Result<ComplianceScanStatus> {
    let namespace = scan.namespace().unwrap_or_default();
    let mut new_status = status.clone();
    let mut conditions = status.conditions.clone().unwrap_or_default();

    for action in &transition.actions {
        match action {
            Action::CreatePvc => {
                let pvcs: Api<PersistentVolumeClaim> =
                    Api::namespaced(ctx.client.clone(), &namespace);
                let pvc = workload::build_pvc(scan);
                create_if_absent(&pvcs, &pvc.name_any(), &pvc).await?;
                new_status.results_storage = Some(workload::pvc_name(scan));
            }
            Action::CreateResultServer => {
                let deployments: Api<Deployment> =
                    Api::namespaced(ctx.client.clone(), &namespace);
                let rs = workload::build_result_server(scan, &ctx.config);
                create_if_absent(&deployments, &rs.name_any(), &rs).await?;
            }
            Action::CreateScannerWorkload => {
                launch_scanners(scan, ctx).await?;
                ctx.metrics.scan_started();
            }
            Action::CreateAggregator => {
                if scan.spec.scanner_type == ScannerType::OpenScap {
                    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
                    let pod = workload::build_aggregator_pod(scan, &ctx.config);
                    create_if_absent(&pods, &pod.name_any(), &pod).await?;
                }
            }
            Action::RecordResult(result, message) => {
                new_status.result = *result;
                new_status.error_message = message.clone();
                new_status.end_timestamp = Some(Time(Utc::now()));
                match result {
                    ScanResult::Error => {
                        ctx.metrics.scan_error();
                        conditions.set_invalid(
                            message.as_deref().unwrap_or("scan failed"),
                        );
                    }
                    _ => {
                        ctx.metrics.scan_done();
                        conditions.set_ready("scan");
                    }
                }
            }
            Action::SetTimeoutCondition => {
                conditions.set_timeout("scan");
            }
            Action::RotateRawResults => {
                match &ctx.config.raw_results_root {
                    Some(root) => {
                        let kept = rotation::rotate(
                            &root.join(scan.name_any()),
                            scan.spec.raw_result_storage.rotation,
                        )?;
                        debug!(scan = %scan.name_any(), kept = kept.len(), "raw results rotated");
                    }
                    // The PVC is not mounted here; the result server prunes
                    // on our behalf with the same rotation code.
                    None => {
                        debug!(scan = %scan.name_any(), "raw result rotation delegated to the result server");
                    }
                }
            }
            Action::CleanupWorkloads => {
                cleanup_workloads(scan, ctx).await?;
            }
            Action::BumpRunIndex => {
                new_status.current_index += 1;
                new_status.result = ScanResult::NotAvailable;
                new_status.error_message = None;
                new_status.warnings = Vec::new();
                new_status.end_timestamp = None;
                clear_rescan_state(scan, ctx).await?;
            }
        }
    }

    if transition.next != status.phase {
        new_status.phase = transition.next;
        new_status.phase_start_timestamp = Some(Time(Utc::now()));
        match transition.next {
            ScanPhase::Launching => {
                new_status.start_timestamp = Some(Time(Utc::now()));
                conditions.set_processing("scan");
            }
            ScanPhase::Done => {}
            _ => conditions.set_processing("scan"),
        }
    }

    new_status.conditions = Some(conditions);
    Ok(new_status)
}

/// One pod per matched node for Node scans, one pod for Platform scans.
/// A bogus priority class downgrades to none rather than wedging the scan.
async fn launch_scanners(scan: &ComplianceScan, ctx: &Context) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_default();
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut scan = scan.clone();
    if let Some(class) = scan.spec.priority_class.clone() {
        let (validated, warning) =
            crate::scheduling::validated_priority_class(&ctx.client, &class).await;
        scan.spec.priority_class = validated;
        if let Some(warning) = warning {
            warn!(scan = %scan.name_any(), warning = %warning, "priority class downgraded");
        }
    }

    let nodes = if scan.spec.scan_type == compliance_crd::v1_alpha1::ScanType::Node {
        matching_nodes(&scan, ctx).await?
    } else {
        Vec::new()
    };

    for pod in workload::scanner_pods(&scan, &nodes, &ctx.config) {
        create_if_absent(&pods, &pod.name_any(), &pod).await?;
    }
    Ok(())
}

async fn matching_nodes(scan: &ComplianceScan, ctx: &Context) -> Result<Vec<String>> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let selector = scan
        .spec
        .node_selector
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    let list = nodes.list(&ListParams::default().labels(&selector)).await?;
    Ok(list.iter().map(|n| n.name_any()).collect())
}

/// Creating an object that already exists is the steady state here; every
/// reconcile pass re-issues the creates for whatever is missing.
async fn create_if_absent<K>(api: &Api<K>, name: &str, obj: &K) -> Result<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
{
    match api.get_opt(name).await? {
        Some(_) => Ok(()),
        None => match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        },
    }
}

async fn cleanup_workloads(scan: &ComplianceScan, ctx: &Context) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_default();
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!("{}={}", keys::SCAN_LABEL, scan.name_any());
    pods.delete_collection(
        &DeleteParams::default(),
        &ListParams::default().labels(&selector),
    )
    .await?;

    if scan.spec.scanner_type == ScannerType::OpenScap {
        let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
        match deployments
            .delete(&workload::result_server_name(scan), &DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }
    info!(scan = %scan.name_any(), "scan workloads cleaned up");
    Ok(())
}

/// Acknowledges a rescan: drops the trigger annotation and the previous
/// run's result ConfigMaps.
async fn clear_rescan_state(scan: &ComplianceScan, ctx: &Context) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_default();
    let api: Api<ComplianceScan> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = json!({"metadata": {"annotations": {keys::RESCAN_ANNOTATION: null}}});
    api.patch(
        &scan.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;

    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!("{}={}", keys::SCAN_LABEL, scan.name_any());
    cms.delete_collection(
        &DeleteParams::default(),
        &ListParams::default().labels(&selector),
    )
    .await?;
    Ok(())
}

async fn patch_status(
    api: &Api<ComplianceScan>,
    scan: &ComplianceScan,
    status: &ComplianceScanStatus,
) -> Result<()> {
    let patch = json!({"status": serde_json::to_value(status)?});
    api.patch_status(
        &scan.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn ensure_finalizer(api: &Api<ComplianceScan>, scan: &ComplianceScan) -> Result<()> {
    if scan.finalizers().contains(&SCAN_FINALIZER.to_string()) {
        return Ok(());
    }
    let mut finalizers = scan.finalizers().to_vec();
    finalizers.push(SCAN_FINALIZER.to_string());
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &scan.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<ComplianceScan>, scan: &ComplianceScan) -> Result<()> {
    let finalizers: Vec<String> = scan
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != SCAN_FINALIZER)
        .cloned()
        .collect();
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &scan.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::{ComplianceScanSpec, ScanType};

    fn scan(spec: ComplianceScanSpec) -> ComplianceScan {
        let mut scan = ComplianceScan::new("s", spec);
        scan.metadata.namespace = Some("ns".into());
        scan
    }

    #[test]
    fn spec_validation_catches_the_usual_mistakes() {
        assert!(validate_spec(&scan(ComplianceScanSpec::default())).is_some());

        let node_cel = ComplianceScanSpec {
            profile: "p".into(),
            scan_type: ScanType::Node,
            scanner_type: ScannerType::Cel,
            ..Default::default()
        };
        assert!(validate_spec(&scan(node_cel))
            .unwrap()
            .contains("platform"));

        let ok = ComplianceScanSpec {
            profile: "p".into(),
            scanner_type: ScannerType::Cel,
            scan_type: ScanType::Platform,
            ..Default::default()
        };
        assert!(validate_spec(&scan(ok)).is_none());
    }

    #[test]
    fn pod_states_classify_startup_failures() {
        let mut pod = Pod::default();
        assert!(matches!(pod_state(&pod), PodState::Running));

        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            phase: Some("Succeeded".into()),
            ..Default::default()
        });
        assert!(matches!(pod_state(&pod), PodState::Succeeded));

        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            container_statuses: Some(vec![k8s_openapi::api::core::v1::ContainerStatus {
                state: Some(k8s_openapi::api::core::v1::ContainerState {
                    waiting: Some(k8s_openapi::api::core::v1::ContainerStateWaiting {
                        reason: Some("ImagePullBackOff".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(matches!(pod_state(&pod), PodState::Unrecoverable(_)));
    }

    #[test]
    fn timeouts_require_a_phase_start() {
        let s = scan(ComplianceScanSpec {
            profile: "p".into(),
            timeout_seconds: 1,
            ..Default::default()
        });
        let status = ComplianceScanStatus::default();
        assert!(!phase_timed_out(&s, &status));

        let expired = ComplianceScanStatus {
            phase: ScanPhase::Running,
            phase_start_timestamp: Some(Time(
                Utc::now() - k8s_openapi::chrono::Duration::seconds(120),
            )),
            ..Default::default()
        };
        assert!(phase_timed_out(&s, &expired));

        // Done scans never time out.
        let done = ComplianceScanStatus {
            phase: ScanPhase::Done,
            ..expired
        };
        assert!(!phase_timed_out(&s, &done));
    }
}
