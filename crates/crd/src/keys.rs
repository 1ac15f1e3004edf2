// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Operator-managed label and annotation keys.
//!
//! Everything under these prefixes belongs to the operator; user metadata
//! propagated from Rule objects never overwrites them.

/// Label naming the owning scan on generated objects.
pub const SCAN_LABEL: &str = "compliance.openshift.io/scan-name";

/// Label naming the owning suite, when the scan belongs to one.
pub const SUITE_LABEL: &str = "compliance.openshift.io/suite";

/// Label naming the origin bundle on Profile, Rule and Variable objects.
pub const PROFILE_BUNDLE_LABEL: &str = "compliance.openshift.io/profile-bundle";

/// Check result status, mirrored as a label for selector queries.
pub const CHECK_STATUS_LABEL: &str = "compliance.openshift.io/check-status";

/// Check result severity, mirrored as a label for selector queries.
pub const CHECK_SEVERITY_LABEL: &str = "compliance.openshift.io/check-severity";

/// DNS-friendly rule name on check results and remediations.
pub const RULE_ANNOTATION: &str = "compliance.openshift.io/rule";

/// RFC3339 timestamp of the run that produced a check result.
pub const LAST_SCANNED_ANNOTATION: &str = "compliance.openshift.io/last-scanned-timestamp";

/// Computed scanner type on TailoredProfiles: `openscap` or `cel`.
pub const SCANNER_TYPE_ANNOTATION: &str = "compliance.openshift.io/scanner-type";

/// User-settable trigger; any value change restarts a Done scan.
pub const RESCAN_ANNOTATION: &str = "compliance.openshift.io/rescan";

/// Disables the extends-membership validation on a TailoredProfile.
pub const DISABLE_OUTDATED_REFERENCE_VALIDATION_ANNOTATION: &str =
    "compliance.openshift.io/disable-outdated-reference-validation";

/// Marks a Rule for delayed removal after a content refresh dropped it.
pub const RULE_REMOVED_ANNOTATION: &str = "compliance.openshift.io/removed-at";

// Keys lifted by the aggregator from fix payloads onto remediations.
pub const REMEDIATION_DEPENDS_ON_ANNOTATION: &str = "complianceascode.io/depends-on";
pub const REMEDIATION_OBJECT_DEPENDS_ON_ANNOTATION: &str = "complianceascode.io/depends-on-obj";
pub const REMEDIATION_OPTIONAL_ANNOTATION: &str = "complianceascode.io/optional";
pub const REMEDIATION_TYPE_ANNOTATION: &str = "complianceascode.io/remediation-type";
pub const REMEDIATION_ENFORCEMENT_TYPE_ANNOTATION: &str = "complianceascode.io/enforcement-type";

/// Key prefixes reserved for the operator. User metadata under these prefixes
/// is silently dropped during propagation.
pub const OPERATOR_MANAGED_PREFIXES: [&str; 3] = [
    "compliance.openshift.io/",
    "complianceoperator.openshift.io/",
    "complianceascode.io/",
];

/// Returns true if the given key starts with an operator-managed prefix.
pub fn is_operator_managed_key(key: &str) -> bool {
    OPERATOR_MANAGED_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}
