// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Indexes user-added metadata on Rule and CustomRule objects for
//! propagation onto check results.

use std::collections::{BTreeMap, HashMap};

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{CustomRule, Rule};
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::Result;

/// Splits metadata into the custom (non-operator-managed) subset.
pub fn custom_metadata(source: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    source
        .iter()
        .filter(|(k, _)| !keys::is_operator_managed_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A per-aggregation-run lookup from the DNS-friendly rule name (the value
/// of the rule annotation) to the rule's custom labels and annotations.
/// Built once per run; immutable afterwards.
#[derive(Default)]
pub struct RuleMetadataCache {
    custom_labels: HashMap<String, BTreeMap<String, String>>,
    custom_annotations: HashMap<String, BTreeMap<String, String>>,
}

impl RuleMetadataCache {
    /// Lists every Rule and CustomRule in the namespace and indexes the
    /// custom subset of their metadata.
    pub async fn build(client: &Client, namespace: &str) -> Result<Self> {
        let mut cache = RuleMetadataCache::default();

        let rules: Api<Rule> = Api::namespaced(client.clone(), namespace);
        for rule in rules.list(&ListParams::default()).await? {
            let Some(dns_name) = rule.annotations().get(keys::RULE_ANNOTATION).cloned() else {
                continue;
            };
            cache.index(&dns_name, rule.labels(), rule.annotations());
        }

        let custom_rules: Api<CustomRule> = Api::namespaced(client.clone(), namespace);
        for rule in custom_rules.list(&ListParams::default()).await? {
            // CustomRules are keyed by their object name; no parser stamps
            // a rule annotation on them.
            let dns_name = rule.name_any();
            cache.index(&dns_name, rule.labels(), rule.annotations());
        }

        Ok(cache)
    }

    fn index(
        &mut self,
        dns_name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) {
        let labels = custom_metadata(labels);
        let annotations = custom_metadata(annotations);
        if labels.is_empty() && annotations.is_empty() {
            return;
        }
        self.custom_labels.insert(dns_name.to_string(), labels);
        self.custom_annotations
            .insert(dns_name.to_string(), annotations);
    }

    pub fn labels_for(&self, dns_name: &str) -> Option<&BTreeMap<String, String>> {
        self.custom_labels.get(dns_name)
    }

    pub fn annotations_for(&self, dns_name: &str) -> Option<&BTreeMap<String, String>> {
        self.custom_annotations.get(dns_name)
    }

    /// Merges the rule's custom metadata into the target maps. Existing keys
    /// are never overwritten, so operator-managed entries always win.
    pub fn merge_into(
        &self,
        dns_name: &str,
        labels: &mut BTreeMap<String, String>,
        annotations: &mut BTreeMap<String, String>,
    ) {
        if let Some(custom) = self.labels_for(dns_name) {
            merge_if_not_exists(labels, custom);
        }
        if let Some(custom) = self.annotations_for(dns_name) {
            merge_if_not_exists(annotations, custom);
        }
    }

    #[cfg(test)]
    pub fn with_entry(
        dns_name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        let mut cache = RuleMetadataCache::default();
        cache.index(dns_name, &labels, &annotations);
        cache
    }
}

fn merge_if_not_exists(dst: &mut BTreeMap<String, String>, src: &BTreeMap<String, String>) {
    for (k, v) in src {
        dst.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn operator_keys_are_filtered_from_custom_metadata() {
        let custom = custom_metadata(&map(&[
            ("business", "payments"),
            (keys::SCAN_LABEL, "other"),
            ("complianceascode.io/optional", ""),
        ]));
        assert_eq!(custom, map(&[("business", "payments")]));
    }

    #[test]
    fn merge_never_overwrites_operator_entries() {
        let cache = RuleMetadataCache::with_entry(
            "ocp4-x",
            map(&[("business", "payments"), (keys::SCAN_LABEL, "spoofed")]),
            map(&[("internal-id", "SEC-1")]),
        );

        let mut labels = map(&[(keys::SCAN_LABEL, "real-scan")]);
        let mut annotations = map(&[("internal-id", "operator-set")]);
        cache.merge_into("ocp4-x", &mut labels, &mut annotations);

        // The spoofed operator key never made it into the cache.
        assert_eq!(labels.get(keys::SCAN_LABEL).map(String::as_str), Some("real-scan"));
        assert_eq!(labels.get("business").map(String::as_str), Some("payments"));
        // Existing keys keep their values even for custom names.
        assert_eq!(
            annotations.get("internal-id").map(String::as_str),
            Some("operator-set")
        );
    }

    #[test]
    fn unknown_rules_merge_nothing() {
        let cache = RuleMetadataCache::default();
        let mut labels = map(&[("a", "b")]);
        let mut annotations = BTreeMap::new();
        cache.merge_into("nope", &mut labels, &mut annotations);
        assert_eq!(labels, map(&[("a", "b")]));
        assert!(annotations.is_empty());
    }
}
