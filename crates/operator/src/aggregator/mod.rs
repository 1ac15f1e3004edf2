// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Result aggregation: turns raw scanner outputs into check-result and
//! remediation objects, with at-most-one-writer semantics per result name.

pub mod arf;

use std::collections::{BTreeMap, HashMap, HashSet};

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{
    CheckStatus, ComplianceCheckResult, ComplianceCheckResultSpec, ComplianceRemediation,
    ComplianceRemediationSpec, ComplianceScan, CustomRule, RemediationPayload, RemediationType,
    RuleSeverity,
};
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cel::{CelResult, CelStatus};
use crate::rule_metadata::RuleMetadataCache;
use crate::xccdf::datastream::ParsedFix;
use crate::xccdf::rule_name_from_id;
use crate::Result;

/// One per-rule outcome, normalized across the ARF and CEL paths.
#[derive(Clone, Debug, Default)]
pub struct RuleResult {
    /// Full rule identifier (XCCDF form or CustomRule id).
    pub id: String,
    pub status: CheckStatus,
    pub severity: RuleSeverity,
    pub description: String,
    pub rationale: String,
    pub instructions: String,
    pub message: String,
    pub warnings: Vec<String>,
    /// Extra annotations carried by the scanner (CEL diagnostics).
    pub annotations: BTreeMap<String, String>,
    pub fixes: Vec<ParsedFix>,
    pub values_used: Vec<String>,
}

/// Check result names are a pure function of (scan, rule): reruns always
/// target the same object.
pub fn check_result_name(scan_name: &str, rule_id: &str) -> String {
    format!("{scan_name}-{}", rule_name_from_id(rule_id))
}

/// Normalizes CEL scanner output, pulling severity and prose from the
/// originating CustomRules.
pub fn from_cel_results(results: &[CelResult], rules: &[CustomRule]) -> Vec<RuleResult> {
    let mut by_id: HashMap<String, &CustomRule> = HashMap::new();
    for rule in rules {
        by_id.insert(rule.name_any(), rule);
        if !rule.spec.id.is_empty() {
            by_id.insert(rule.spec.id.clone(), rule);
        }
    }

    results
        .iter()
        .map(|res| {
            let rule = by_id.get(res.id.as_str());
            RuleResult {
                id: res.id.clone(),
                status: match res.status {
                    CelStatus::Pass => CheckStatus::Pass,
                    CelStatus::Fail => CheckStatus::Fail,
                    CelStatus::Error => CheckStatus::Error,
                },
                severity: rule.map(|r| r.spec.severity).unwrap_or_default(),
                description: rule.map(|r| r.spec.description.clone()).unwrap_or_default(),
                rationale: rule.map(|r| r.spec.rationale.clone()).unwrap_or_default(),
                instructions: String::new(),
                message: res.message.clone(),
                warnings: res.warnings.clone(),
                annotations: res.annotations.clone(),
                fixes: Vec::new(),
                values_used: Vec::new(),
            }
        })
        .collect()
}

/// Merges per-node result sets into one. When nodes disagree on a rule the
/// merged status is Inconsistent and the disagreement is spelled out in the
/// warnings.
pub fn merge_node_results(per_node: &[(String, Vec<RuleResult>)]) -> Vec<RuleResult> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, RuleResult> = HashMap::new();
    let mut verdicts: HashMap<String, Vec<(String, CheckStatus)>> = HashMap::new();

    for (node, results) in per_node {
        for result in results {
            verdicts
                .entry(result.id.clone())
                .or_default()
                .push((node.clone(), result.status));
            merged.entry(result.id.clone()).or_insert_with(|| {
                order.push(result.id.clone());
                result.clone()
            });
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for id in order {
        let Some(mut result) = merged.remove(&id) else {
            continue;
        };
        let votes = verdicts.remove(&id).unwrap_or_default();
        if votes.iter().any(|(_, s)| Some(*s) != votes.first().map(|(_, s)| *s)) {
            let detail = votes
                .iter()
                .map(|(node, status)| format!("{node}={}", status.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            result.status = CheckStatus::Inconsistent;
            result
                .warnings
                .push(format!("nodes disagree on this rule: {detail}"));
        }
        out.push(result);
    }
    out
}

/// Builds the check result object for one rule outcome. Operator metadata is
/// stamped first; the rule's custom metadata only fills keys that are still
/// free.
pub fn build_check_result(
    scan: &ComplianceScan,
    result: &RuleResult,
    cache: &RuleMetadataCache,
    timestamp: &str,
) -> ComplianceCheckResult {
    let scan_name = scan.name_any();
    let dns_name = rule_name_from_id(&result.id);

    let mut labels = BTreeMap::new();
    labels.insert(keys::SCAN_LABEL.to_string(), scan_name.clone());
    if let Some(suite) = scan.labels().get(keys::SUITE_LABEL) {
        labels.insert(keys::SUITE_LABEL.to_string(), suite.clone());
    }
    labels.insert(
        keys::CHECK_STATUS_LABEL.to_string(),
        result.status.as_str().to_string(),
    );
    labels.insert(
        keys::CHECK_SEVERITY_LABEL.to_string(),
        result.severity.as_str().to_string(),
    );

    let mut annotations = BTreeMap::new();
    annotations.insert(keys::RULE_ANNOTATION.to_string(), dns_name.clone());
    annotations.insert(keys::LAST_SCANNED_ANNOTATION.to_string(), timestamp.to_string());
    for (k, v) in &result.annotations {
        annotations.insert(k.clone(), v.clone());
    }

    cache.merge_into(&dns_name, &mut labels, &mut annotations);

    let mut warnings = result.warnings.clone();
    if !result.message.is_empty() {
        warnings.push(result.message.clone());
    }

    ComplianceCheckResult {
        metadata: ObjectMeta {
            name: Some(check_result_name(&scan_name, &result.id)),
            namespace: scan.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: scan.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: ComplianceCheckResultSpec {
            id: result.id.clone(),
            status: result.status,
            severity: result.severity,
            description: result.description.clone(),
            rationale: result.rationale.clone(),
            instructions: result.instructions.clone(),
            warnings,
            values_used: result.values_used.clone(),
        },
    }
}

/// Extracts remediation objects from a rule's fix elements. Each YAML
/// document becomes one remediation; the second and later documents get a
/// numeric suffix.
pub fn remediations_for(
    scan: &ComplianceScan,
    result: &RuleResult,
) -> Vec<ComplianceRemediation> {
    let Some(fix) = result.fixes.iter().find(|f| f.is_relevant()) else {
        return Vec::new();
    };

    let base_name = check_result_name(&scan.name_any(), &result.id);
    let dns_name = rule_name_from_id(&result.id);
    let mut rems = Vec::new();

    for (idx, doc) in yaml_documents(&fix.content).into_iter().enumerate() {
        let mut payload = doc;
        let lifted = lift_remediation_annotations(&mut payload);

        let name = if idx == 0 {
            base_name.clone()
        } else {
            format!("{base_name}-{idx}")
        };

        let mut annotations = lifted.annotations;
        annotations.insert(keys::RULE_ANNOTATION.to_string(), dns_name.clone());

        let mut labels = BTreeMap::new();
        labels.insert(keys::SCAN_LABEL.to_string(), scan.name_any());
        if let Some(suite) = scan.labels().get(keys::SUITE_LABEL) {
            labels.insert(keys::SUITE_LABEL.to_string(), suite.clone());
        }

        rems.push(ComplianceRemediation {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: scan.namespace(),
                labels: Some(labels),
                annotations: Some(annotations),
                owner_references: scan.controller_owner_ref(&()).map(|o| vec![o]),
                ..Default::default()
            },
            spec: ComplianceRemediationSpec {
                apply: false,
                remediation_type: lifted.remediation_type,
                outdated: false,
                current: RemediationPayload {
                    object: Some(payload),
                },
                outdated_payload: None,
            },
            status: None,
        });
    }

    rems
}

fn yaml_documents(content: &str) -> Vec<serde_json::Value> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(content) {
        match serde_json::Value::deserialize(doc) {
            Ok(serde_json::Value::Null) => continue,
            Ok(value) => docs.push(value),
            Err(e) => {
                warn!(error = %e, "skipping unparseable fix document");
            }
        }
    }
    docs
}

struct LiftedAnnotations {
    annotations: BTreeMap<String, String>,
    remediation_type: RemediationType,
}

/// Moves the `complianceascode.io` control annotations from the payload onto
/// the remediation. The payload applied to the cluster stays clean.
fn lift_remediation_annotations(payload: &mut serde_json::Value) -> LiftedAnnotations {
    let mut lifted = LiftedAnnotations {
        annotations: BTreeMap::new(),
        remediation_type: RemediationType::Configuration,
    };

    let Some(ann) = payload
        .pointer_mut("/metadata/annotations")
        .and_then(|a| a.as_object_mut())
    else {
        return lifted;
    };

    for key in [
        keys::REMEDIATION_DEPENDS_ON_ANNOTATION,
        keys::REMEDIATION_OBJECT_DEPENDS_ON_ANNOTATION,
        keys::REMEDIATION_OPTIONAL_ANNOTATION,
    ] {
        if let Some(value) = ann.remove(key) {
            lifted
                .annotations
                .insert(key.to_string(), value.as_str().unwrap_or_default().to_string());
        }
    }

    if let Some(value) = ann.remove(keys::REMEDIATION_TYPE_ANNOTATION) {
        if value.as_str() == Some("Enforcement") {
            lifted.remediation_type = RemediationType::Enforcement;
        }
    }
    if let Some(value) = ann.remove(keys::REMEDIATION_ENFORCEMENT_TYPE_ANNOTATION) {
        if lifted.remediation_type == RemediationType::Enforcement {
            lifted.annotations.insert(
                keys::REMEDIATION_ENFORCEMENT_TYPE_ANNOTATION.to_string(),
                value.as_str().unwrap_or_default().to_string(),
            );
        }
    }

    if ann.is_empty() {
        if let Some(meta) = payload
            .pointer_mut("/metadata")
            .and_then(|m| m.as_object_mut())
        {
            meta.remove("annotations");
        }
    }

    lifted
}

/// Writes check results and remediations for one scan run, then garbage
/// collects results the run no longer produced.
pub struct Aggregator {
    client: Client,
    namespace: String,
}

impl Aggregator {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    pub async fn aggregate(
        &self,
        scan: &ComplianceScan,
        results: &[RuleResult],
        timestamp: &str,
    ) -> Result<Vec<String>> {
        let mut run_warnings = Vec::new();

        // Metadata propagation degrades gracefully: a failed list only
        // costs the custom metadata, not the run.
        let cache = match RuleMetadataCache::build(&self.client, &self.namespace).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "rule metadata unavailable, results will carry operator metadata only");
                run_warnings.push(format!("rule metadata unavailable: {e}"));
                RuleMetadataCache::default()
            }
        };

        let api: Api<ComplianceCheckResult> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let rem_api: Api<ComplianceRemediation> =
            Api::namespaced(self.client.clone(), &self.namespace);

        let selector = format!("{}={}", keys::SCAN_LABEL, scan.name_any());
        let mut stale: HashSet<String> = api
            .list(&ListParams::default().labels(&selector))
            .await?
            .iter()
            .map(|r| r.name_any())
            .collect();

        for result in results {
            let desired = build_check_result(scan, result, &cache, timestamp);
            let name = desired.name_any();
            stale.remove(&name);

            let existing = match api.get_opt(&name).await {
                Ok(existing) => existing,
                Err(e) => {
                    run_warnings.push(format!("could not read check result {name}: {e}"));
                    continue;
                }
            };

            if existing.is_none()
                && result.status == CheckStatus::NotApplicable
                && !scan.spec.show_not_applicable
            {
                continue;
            }

            // A single failed write skips that result, not the run.
            if let Err(e) = self.write_check_result(&api, existing, desired).await {
                warn!(result = %name, error = %e, "skipping unwritable check result");
                run_warnings.push(format!("could not write check result {name}: {e}"));
                continue;
            }

            for rem in remediations_for(scan, result) {
                if let Err(e) = self.write_remediation(&rem_api, rem).await {
                    run_warnings.push(format!("could not write remediation: {e}"));
                }
            }
        }

        for name in stale {
            info!(result = %name, "deleting stale check result");
            if let Err(e) = api.delete(&name, &Default::default()).await {
                run_warnings.push(format!("could not delete stale result {name}: {e}"));
            }
        }

        Ok(run_warnings)
    }

    async fn write_check_result(
        &self,
        api: &Api<ComplianceCheckResult>,
        existing: Option<ComplianceCheckResult>,
        mut desired: ComplianceCheckResult,
    ) -> Result<()> {
        match existing {
            None => {
                api.create(&PostParams::default(), &desired).await?;
            }
            Some(existing) => {
                desired.metadata.resource_version = existing.resource_version();
                api.replace(&desired.name_any(), &PostParams::default(), &desired)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_remediation(
        &self,
        api: &Api<ComplianceRemediation>,
        desired: ComplianceRemediation,
    ) -> Result<()> {
        let name = desired.name_any();
        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &desired).await?;
            }
            Some(existing) => {
                let mut updated = existing.clone();
                if existing.spec.current.object != desired.spec.current.object {
                    // The payload changed underneath an applied fix: keep the
                    // old payload around and flag the object as outdated.
                    if existing.spec.apply {
                        updated.spec.outdated = true;
                        updated.spec.outdated_payload = Some(existing.spec.current.clone());
                    }
                    updated.spec.current = desired.spec.current;
                }
                updated.metadata.annotations = desired.metadata.annotations;
                updated.metadata.labels = desired.metadata.labels;
                api.replace(&name, &PostParams::default(), &updated).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::ComplianceScanSpec;

    fn scan(name: &str) -> ComplianceScan {
        let mut scan = ComplianceScan::new(name, ComplianceScanSpec::default());
        scan.metadata.namespace = Some("openshift-compliance".into());
        scan
    }

    fn result(id: &str, status: CheckStatus) -> RuleResult {
        RuleResult {
            id: id.to_string(),
            status,
            severity: RuleSeverity::High,
            ..Default::default()
        }
    }

    #[test]
    fn result_names_are_stable_and_dns_friendly() {
        let name = check_result_name(
            "scan-ocp4-cis",
            "xccdf_org.ssgproject.content_rule_API_Server_Oauth",
        );
        assert_eq!(name, "scan-ocp4-cis-api-server-oauth");
        // Pure function: identical inputs, identical names.
        assert_eq!(
            name,
            check_result_name("scan-ocp4-cis", "xccdf_org.ssgproject.content_rule_API_Server_Oauth")
        );
    }

    #[test]
    fn operator_metadata_wins_over_rule_metadata() {
        let cache = RuleMetadataCache::with_entry(
            "my-rule",
            [("business".to_string(), "payments".to_string())].into(),
            [("internal-id".to_string(), "SEC-1".to_string())].into(),
        );
        let ccr = build_check_result(
            &scan("s"),
            &result("my_rule", CheckStatus::Fail),
            &cache,
            "2026-01-01T00:00:00Z",
        );
        let labels = ccr.metadata.labels.unwrap();
        let annotations = ccr.metadata.annotations.unwrap();

        assert_eq!(labels.get(keys::SCAN_LABEL).map(String::as_str), Some("s"));
        assert_eq!(labels.get(keys::CHECK_STATUS_LABEL).map(String::as_str), Some("Fail"));
        assert_eq!(labels.get(keys::CHECK_SEVERITY_LABEL).map(String::as_str), Some("high"));
        assert_eq!(labels.get("business").map(String::as_str), Some("payments"));
        assert_eq!(annotations.get("internal-id").map(String::as_str), Some("SEC-1"));
        assert_eq!(
            annotations.get(keys::RULE_ANNOTATION).map(String::as_str),
            Some("my-rule")
        );
    }

    #[test]
    fn two_fix_documents_yield_suffixed_remediations() {
        let mut rr = result("xccdf_org.ssgproject.content_rule_sshd", CheckStatus::Fail);
        rr.fixes.push(ParsedFix {
            id: "fix".into(),
            system: "urn:xccdf:fix:script:kubernetes".into(),
            content: "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: two\n".into(),
        });
        let rems = remediations_for(&scan("s"), &rr);
        assert_eq!(rems.len(), 2);
        assert_eq!(rems[0].name_any(), "s-sshd");
        assert_eq!(rems[1].name_any(), "s-sshd-1");
    }

    #[test]
    fn control_annotations_are_lifted_off_the_payload() {
        let mut rr = result("rule_dep", CheckStatus::Fail);
        rr.fixes.push(ParsedFix {
            id: "fix".into(),
            system: "urn:xccdf:fix:script:kubernetes".into(),
            content: concat!(
                "apiVersion: v1\n",
                "kind: ConfigMap\n",
                "metadata:\n",
                "  name: fixed\n",
                "  annotations:\n",
                "    complianceascode.io/depends-on: rule-zero\n",
                "    complianceascode.io/optional: \"\"\n",
                "    keepme: \"yes\"\n",
            )
            .into(),
        });
        let rems = remediations_for(&scan("s"), &rr);
        assert_eq!(rems.len(), 1);
        let annotations = rems[0].metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations
                .get(keys::REMEDIATION_DEPENDS_ON_ANNOTATION)
                .map(String::as_str),
            Some("rule-zero")
        );
        assert!(annotations.contains_key(keys::REMEDIATION_OPTIONAL_ANNOTATION));

        let payload = rems[0].spec.current.object.as_ref().unwrap();
        let payload_ann = payload.pointer("/metadata/annotations").unwrap();
        assert!(payload_ann.get("complianceascode.io/depends-on").is_none());
        assert_eq!(payload_ann.get("keepme").unwrap(), "yes");
    }

    #[test]
    fn enforcement_type_is_lifted_only_for_enforcement_remediations() {
        let mut rr = result("rule_enf", CheckStatus::Fail);
        rr.fixes.push(ParsedFix {
            id: "fix".into(),
            system: "urn:xccdf:fix:script:kubernetes".into(),
            content: concat!(
                "apiVersion: v1\n",
                "kind: ConfigMap\n",
                "metadata:\n",
                "  name: enforced\n",
                "  annotations:\n",
                "    complianceascode.io/remediation-type: Enforcement\n",
                "    complianceascode.io/enforcement-type: gatekeeper\n",
            )
            .into(),
        });
        let rems = remediations_for(&scan("s"), &rr);
        assert_eq!(rems[0].spec.remediation_type, RemediationType::Enforcement);
        assert_eq!(
            rems[0]
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(keys::REMEDIATION_ENFORCEMENT_TYPE_ANNOTATION)
                .map(String::as_str),
            Some("gatekeeper")
        );
    }

    #[test]
    fn node_disagreement_becomes_inconsistent() {
        let merged = merge_node_results(&[
            ("node-a".to_string(), vec![result("r1", CheckStatus::Pass), result("r2", CheckStatus::Pass)]),
            ("node-b".to_string(), vec![result("r1", CheckStatus::Fail), result("r2", CheckStatus::Pass)]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].status, CheckStatus::Inconsistent);
        assert!(merged[0].warnings[0].contains("node-a=Pass"));
        assert!(merged[0].warnings[0].contains("node-b=Fail"));
        assert_eq!(merged[1].status, CheckStatus::Pass);
    }

    #[test]
    fn cel_results_inherit_custom_rule_severity() {
        let mut rule = CustomRule::new(
            "no-root-pods",
            compliance_crd::v1_alpha1::CustomRuleSpec {
                severity: RuleSeverity::High,
                description: "no root pods".into(),
                ..Default::default()
            },
        );
        rule.metadata.namespace = Some("ns".into());

        let results = from_cel_results(
            &[CelResult {
                id: "no-root-pods".into(),
                status: CelStatus::Fail,
                message: "pods must not run as root".into(),
                warnings: Vec::new(),
                annotations: BTreeMap::new(),
            }],
            &[rule],
        );
        assert_eq!(results[0].severity, RuleSeverity::High);
        assert_eq!(results[0].status, CheckStatus::Fail);
        assert_eq!(results[0].description, "no root pods");
    }
}
