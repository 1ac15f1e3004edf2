// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The ComplianceSuite controller: materializes child scans, rolls their
//! phases and results up, applies remediations when asked to, and stamps
//! rescan triggers on a cron schedule.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    CheckStatus, ComplianceCheckResult, ComplianceRemediation, ComplianceScan, ComplianceSuite,
    ComplianceSuiteStatus, RemediationType, ScanPhase, ScanResult, ScanStatusSummary,
};
use cron::Schedule;
use futures::StreamExt;
use k8s_openapi::chrono::{DateTime, Utc};
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::{Error, Result};

/// Tracks the last time the cron trigger fired, so a restart doesn't replay
/// the schedule.
const LAST_RESCAN_ANNOTATION: &str = "compliance.openshift.io/last-rescan-timestamp";

pub async fn run(ctx: Arc<Context>) {
    let suites: Api<ComplianceSuite> = Api::all(ctx.client.clone());
    let scans: Api<ComplianceScan> = Api::all(ctx.client.clone());

    Controller::new(suites, WatcherConfig::default().any_semantic())
        .owns(scans, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(_suite: Arc<ComplianceSuite>, err: &Error, ctx: Arc<Context>) -> ReconcileAction {
    warn!(error = %err, "suite reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

/// Rolls child results up: any Error wins, then full compliance, then
/// non-compliance. Children still running keep the suite NotAvailable.
pub fn rollup_result(children: &[ScanStatusSummary]) -> ScanResult {
    if children.is_empty() || children.iter().any(|c| c.phase != ScanPhase::Done) {
        return ScanResult::NotAvailable;
    }
    if children.iter().any(|c| c.result == ScanResult::Error) {
        return ScanResult::Error;
    }
    if children.iter().all(|c| c.result == ScanResult::Compliant) {
        return ScanResult::Compliant;
    }
    ScanResult::NonCompliant
}

/// A NonCompliant child whose every failed rule is covered by an Optional
/// remediation rolls up as Compliant: optional fixes contribute nothing to
/// the suite's non-compliance.
pub fn effective_result(
    child: &ScanStatusSummary,
    failed_rules: &[String],
    optional_rules: &HashSet<String>,
) -> ScanResult {
    if child.result != ScanResult::NonCompliant {
        return child.result;
    }
    if !failed_rules.is_empty() && failed_rules.iter().all(|r| optional_rules.contains(r)) {
        return ScanResult::Compliant;
    }
    child.result
}

/// The suite phase is the least-advanced child phase.
pub fn rollup_phase(children: &[ScanStatusSummary]) -> ScanPhase {
    children
        .iter()
        .map(|c| c.phase)
        .min_by_key(|p| match p {
            ScanPhase::Pending => 0,
            ScanPhase::Launching => 1,
            ScanPhase::Running => 2,
            ScanPhase::Aggregating => 3,
            ScanPhase::Done => 4,
        })
        .unwrap_or(ScanPhase::Pending)
}

async fn reconcile(suite: Arc<ComplianceSuite>, ctx: Arc<Context>) -> Result<ReconcileAction> {
    let namespace = suite
        .namespace()
        .ok_or_else(|| Error::Message("suite has no namespace".to_string()))?;
    let scans: Api<ComplianceScan> = Api::namespaced(ctx.client.clone(), &namespace);
    let suites: Api<ComplianceSuite> = Api::namespaced(ctx.client.clone(), &namespace);

    // Fan out: one ComplianceScan per wrapped spec, owned by the suite.
    let mut children = Vec::new();
    for wrapper in &suite.spec.scans {
        let mut desired = ComplianceScan::new(&wrapper.name, wrapper.scan.clone());
        desired.metadata = ObjectMeta {
            name: Some(wrapper.name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(
                [(keys::SUITE_LABEL.to_string(), suite.name_any())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: suite.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        };

        let observed = match scans.get_opt(&wrapper.name).await? {
            Some(existing) => {
                if existing.spec != desired.spec {
                    let patch = json!({"spec": serde_json::to_value(&desired.spec)?});
                    scans
                        .patch(&wrapper.name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await?
                } else {
                    existing
                }
            }
            None => {
                info!(suite = %suite.name_any(), scan = %wrapper.name, "creating child scan");
                scans.create(&PostParams::default(), &desired).await?
            }
        };

        let status = observed.status.unwrap_or_default();
        children.push(ScanStatusSummary {
            name: wrapper.name.clone(),
            phase: status.phase,
            result: status.result,
            error_message: status.error_message,
        });
    }

    let phase = rollup_phase(&children);

    // The rollup sees effective results: a child failing only on rules with
    // Optional remediations does not drag the suite into NonCompliant. The
    // per-scan summaries keep the raw results.
    let mut effective = Vec::with_capacity(children.len());
    for child in &children {
        let result = if child.result == ScanResult::NonCompliant {
            let (failed, optional) = optional_coverage(&child.name, &namespace, &ctx).await?;
            effective_result(child, &failed, &optional)
        } else {
            child.result
        };
        effective.push(ScanStatusSummary {
            result,
            ..child.clone()
        });
    }
    let result = rollup_result(&effective);

    let mut status = ComplianceSuiteStatus {
        phase,
        result,
        scan_statuses: children,
        conditions: suite
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone()),
    };
    let mut conditions = status.conditions.take().unwrap_or_default();
    match phase {
        ScanPhase::Done => conditions.set_ready("suite"),
        _ => conditions.set_processing("suite"),
    }
    status.conditions = Some(conditions);

    let patch = json!({"status": serde_json::to_value(&status)?});
    suites
        .patch_status(&suite.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    if phase == ScanPhase::Done && suite.spec.auto_apply_remediations {
        auto_apply_remediations(&suite, &ctx).await?;
    }

    // The cron trigger only makes sense once a run has completed.
    if phase == ScanPhase::Done && !suite.spec.schedule.is_empty() {
        if let Some(requeue) = handle_schedule(&suite, &ctx).await? {
            return Ok(ReconcileAction::requeue(requeue));
        }
    }

    Ok(ReconcileAction::requeue(Duration::from_secs(60)))
}

/// Failed rules for one scan, plus the rules an Optional remediation of that
/// scan covers. Both come back as DNS-friendly rule names.
async fn optional_coverage(
    scan_name: &str,
    namespace: &str,
    ctx: &Context,
) -> Result<(Vec<String>, HashSet<String>)> {
    let results: Api<ComplianceCheckResult> = Api::namespaced(ctx.client.clone(), namespace);
    let selector = format!(
        "{}={},{}={}",
        keys::SCAN_LABEL,
        scan_name,
        keys::CHECK_STATUS_LABEL,
        CheckStatus::Fail.as_str()
    );
    let failed: Vec<String> = results
        .list(&ListParams::default().labels(&selector))
        .await?
        .iter()
        .filter_map(|r| r.annotations().get(keys::RULE_ANNOTATION).cloned())
        .collect();

    let rems: Api<ComplianceRemediation> = Api::namespaced(ctx.client.clone(), namespace);
    let rem_selector = format!("{}={}", keys::SCAN_LABEL, scan_name);
    let optional: HashSet<String> = rems
        .list(&ListParams::default().labels(&rem_selector))
        .await?
        .iter()
        .filter(|r| {
            r.annotations()
                .contains_key(keys::REMEDIATION_OPTIONAL_ANNOTATION)
        })
        .filter_map(|r| r.annotations().get(keys::RULE_ANNOTATION).cloned())
        .collect();

    Ok((failed, optional))
}

/// Flips `apply` on every Configuration remediation the suite produced.
/// Enforcement remediations apply on their own and Optional ones are still
/// applied here; optionality only affects the compliance rollup.
async fn auto_apply_remediations(suite: &ComplianceSuite, ctx: &Context) -> Result<()> {
    let namespace = suite.namespace().unwrap_or_default();
    let api: Api<ComplianceRemediation> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!("{}={}", keys::SUITE_LABEL, suite.name_any());
    for rem in api.list(&ListParams::default().labels(&selector)).await? {
        if rem.spec.apply || rem.spec.remediation_type == RemediationType::Enforcement {
            continue;
        }
        let patch = json!({"spec": {"apply": true}});
        api.patch(&rem.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Fires the rescan trigger when the cron schedule says so. Returns the
/// delay until the next evaluation.
async fn handle_schedule(suite: &ComplianceSuite, ctx: &Context) -> Result<Option<Duration>> {
    let namespace = suite.namespace().unwrap_or_default();
    let now = Utc::now();

    let last_fired = suite
        .annotations()
        .get(LAST_RESCAN_ANNOTATION)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);

    let schedule = parse_schedule(&suite.spec.schedule)?;
    let Some(next_fire) = schedule.after(&last_fired).next() else {
        return Ok(None);
    };

    if next_fire <= now {
        info!(suite = %suite.name_any(), "schedule fired, stamping rescan on child scans");
        stamp_rescan(suite, ctx).await?;
        let suites: Api<ComplianceSuite> = Api::namespaced(ctx.client.clone(), &namespace);
        let patch = json!({
            "metadata": {"annotations": {LAST_RESCAN_ANNOTATION: now.to_rfc3339()}}
        });
        suites
            .patch(&suite.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        return Ok(Some(Duration::from_secs(10)));
    }

    let wait = (next_fire - now).to_std().unwrap_or(Duration::from_secs(60));
    debug!(suite = %suite.name_any(), seconds = wait.as_secs(), "next scheduled rescan");
    Ok(Some(wait))
}

async fn stamp_rescan(suite: &ComplianceSuite, ctx: &Context) -> Result<()> {
    let namespace = suite.namespace().unwrap_or_default();
    let scans: Api<ComplianceScan> = Api::namespaced(ctx.client.clone(), &namespace);
    for wrapper in &suite.spec.scans {
        let patch = json!({
            "metadata": {"annotations": {keys::RESCAN_ANNOTATION: Utc::now().to_rfc3339()}}
        });
        scans
            .patch(&wrapper.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Kubernetes-style five-field cron; the underlying parser wants seconds,
/// so a zero-seconds field is prepended.
fn parse_schedule(spec: &str) -> Result<Schedule> {
    let with_seconds = format!("0 {spec}");
    Schedule::from_str(&with_seconds)
        .map_err(|e| Error::InvalidSpec(format!("bad cron schedule '{spec}': {e}")))
}
