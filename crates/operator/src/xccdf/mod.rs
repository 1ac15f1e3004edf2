// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! XCCDF codecs: data stream parsing and tailoring document generation.

pub mod datastream;
pub mod tailoring;

pub use datastream::{DataStream, ParsedFix, ParsedProfile, ParsedRule, ParsedVariable};
pub use tailoring::{TailoringDocument, TailoringProfile};

/// XCCDF namespace associating generated content with this operator.
pub const XCCDF_NAMESPACE: &str = "compliance.openshift.io";

/// The XCCDF 1.2 schema URI; the consuming scanner requires it verbatim.
pub const XCCDF_URI: &str = "http://checklists.nist.gov/xccdf/1.2";

const PROFILE_ID_PREFIX: &str = "xccdf_org.ssgproject.content_profile_";
const RULE_ID_PREFIX: &str = "xccdf_org.ssgproject.content_rule_";
const VALUE_ID_PREFIX: &str = "xccdf_org.ssgproject.content_value_";

/// XCCDF id of the profile generated for a tailoring.
pub fn tailored_profile_id(tp_name: &str) -> String {
    format!("xccdf_{XCCDF_NAMESPACE}_profile_{tp_name}")
}

/// XCCDF id of the tailoring document itself.
pub fn tailoring_id(tp_name: &str) -> String {
    format!("xccdf_{XCCDF_NAMESPACE}_tailoring_{tp_name}")
}

fn dns_friendly(id: &str, prefix: &str) -> String {
    id.strip_prefix(prefix)
        .unwrap_or(id)
        .replace('_', "-")
        .to_lowercase()
}

/// DNS-friendly rule name from the full XCCDF id.
pub fn rule_name_from_id(id: &str) -> String {
    dns_friendly(id, RULE_ID_PREFIX)
}

/// DNS-friendly profile name from the full XCCDF id.
pub fn profile_name_from_id(id: &str) -> String {
    dns_friendly(id, PROFILE_ID_PREFIX)
}

/// DNS-friendly variable name from the full XCCDF id.
pub fn variable_name_from_id(id: &str) -> String {
    dns_friendly(id, VALUE_ID_PREFIX)
}

/// Short variable name used for path templating, keyed by the trimmed id.
pub fn variable_template_key(id: &str) -> String {
    id.strip_prefix(VALUE_ID_PREFIX).unwrap_or(id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_name_is_dns_friendly() {
        assert_eq!(
            rule_name_from_id("xccdf_org.ssgproject.content_rule_API_Server_Anonymous"),
            "api-server-anonymous"
        );
        // Unprefixed ids pass through with the same normalization.
        assert_eq!(rule_name_from_id("My_Custom_Rule"), "my-custom-rule");
    }

    #[test]
    fn tailoring_ids_carry_the_operator_namespace() {
        assert_eq!(
            tailoring_id("nist-moderate"),
            "xccdf_compliance.openshift.io_tailoring_nist-moderate"
        );
        assert_eq!(
            tailored_profile_id("nist-moderate"),
            "xccdf_compliance.openshift.io_profile_nist-moderate"
        );
    }
}
