// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The CustomRule controller: validates structure and compiles the CEL
//! expression, stamping the observed generation so validation re-runs only
//! when the spec changes.

use std::sync::Arc;
use std::time::Duration;

use cel_interpreter::Program;
use compliance_crd::v1_alpha1::{CustomRule, CustomRulePhase, CustomRuleStatus};
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

use crate::controller::Context;
use crate::{Error, Result};

pub async fn run(ctx: Arc<Context>) {
    let rules: Api<CustomRule> = Api::all(ctx.client.clone());

    Controller::new(rules, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn error_policy(_rule: Arc<CustomRule>, err: &Error, ctx: Arc<Context>) -> ReconcileAction {
    warn!(error = %err, "custom rule reconcile failed");
    ctx.metrics.reconcile_error();
    ReconcileAction::requeue(Duration::from_secs(60))
}

async fn reconcile(rule: Arc<CustomRule>, ctx: Arc<Context>) -> Result<ReconcileAction> {
    let namespace = rule
        .namespace()
        .ok_or_else(|| Error::Message("custom rule has no namespace".to_string()))?;
    let generation = rule.metadata.generation.unwrap_or_default();

    // Already validated for this generation.
    if let Some(status) = &rule.status {
        if status.observed_generation == generation && status.phase == CustomRulePhase::Ready {
            return Ok(ReconcileAction::await_change());
        }
    }

    let validation = validate(&rule);
    let status = CustomRuleStatus {
        phase: match &validation {
            Ok(()) => CustomRulePhase::Ready,
            Err(_) => CustomRulePhase::Error,
        },
        error_message: validation.as_ref().err().map(|e| e.to_string()),
        observed_generation: generation,
        last_validation_time: Some(Time(Utc::now())),
    };

    let api: Api<CustomRule> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = json!({"status": serde_json::to_value(&status)?});
    api.patch_status(&rule.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!(rule = %rule.name_any(), phase = ?status.phase, "custom rule validated");

    // Validation errors might be transient content problems; retry slowly.
    Ok(match validation {
        Ok(()) => ReconcileAction::await_change(),
        Err(_) => ReconcileAction::requeue(Duration::from_secs(300)),
    })
}

/// Structure checks first, then a CEL compile so expression typos surface
/// before any scan references the rule.
fn validate(rule: &CustomRule) -> Result<()> {
    if rule.spec.expression.is_empty() {
        return Err(Error::InvalidSpec("CEL expression is empty".to_string()));
    }
    if rule.spec.inputs.is_empty() {
        return Err(Error::InvalidSpec("no inputs defined".to_string()));
    }
    for (idx, input) in rule.spec.inputs.iter().enumerate() {
        if input.name.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "input {idx} has an empty binding name"
            )));
        }
        if input.version.is_empty() || input.resource.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "input '{}' needs both a version and a resource",
                input.name
            )));
        }
    }
    if rule.spec.error_message.is_empty() {
        warn!(rule = %rule.name_any(), "rule has no error message defined");
    }

    Program::compile(&rule.spec.expression)
        .map_err(|e| Error::Cel(format!("expression failed to compile: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::{CustomRuleInput, CustomRuleSpec};

    fn rule(expression: &str, inputs: Vec<CustomRuleInput>) -> CustomRule {
        CustomRule::new(
            "r",
            CustomRuleSpec {
                expression: expression.to_string(),
                inputs,
                error_message: "nope".into(),
                ..Default::default()
            },
        )
    }

    fn pods_input() -> CustomRuleInput {
        CustomRuleInput {
            name: "pods".into(),
            api_group: String::new(),
            version: "v1".into(),
            resource: "pods".into(),
            namespace: String::new(),
            resource_name: String::new(),
        }
    }

    #[test]
    fn valid_rules_pass() {
        assert!(validate(&rule("pods.items.size() > 0", vec![pods_input()])).is_ok());
    }

    #[test]
    fn empty_expression_and_inputs_are_rejected() {
        assert!(validate(&rule("", vec![pods_input()])).is_err());
        assert!(validate(&rule("true", vec![])).is_err());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let mut input = pods_input();
        input.version = String::new();
        let err = validate(&rule("true", vec![input])).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn broken_expressions_fail_compilation() {
        let err = validate(&rule("pods.items.filter(", vec![pods_input()])).unwrap_err();
        assert!(err.to_string().contains("compile"));
    }
}
