// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! ARF report parsing: pairs `rule-result` entries with their rule
//! definitions from the data stream.

use compliance_crd::v1_alpha1::CheckStatus;
use tracing::warn;

use crate::xccdf::datastream::DataStream;
use crate::{Error, Result};

use super::RuleResult;

/// Maps an XCCDF result token to a check status. `notselected` yields
/// `None`: the rule was not part of the benchmark and produces no object.
pub fn map_status(raw: &str) -> Result<Option<CheckStatus>> {
    match raw {
        // Fixed means the rule failed initially but was then fixed.
        "pass" | "fixed" => Ok(Some(CheckStatus::Pass)),
        "fail" => Ok(Some(CheckStatus::Fail)),
        // Unknown is a completed run whose results can't be interpreted.
        "error" | "unknown" => Ok(Some(CheckStatus::Error)),
        // Notchecked rules have no automated check at all.
        "notchecked" => Ok(Some(CheckStatus::Manual)),
        "informational" => Ok(Some(CheckStatus::Info)),
        "notapplicable" => Ok(Some(CheckStatus::NotApplicable)),
        "notselected" => Ok(None),
        other => Err(Error::Content(format!(
            "couldn't match '{other}' to a known result state"
        ))),
    }
}

/// Parses one ARF report against the data stream's rule table.
///
/// Results referencing unknown rules or unknown states are skipped with a
/// log line; a malformed report should not sink the whole aggregation.
pub fn parse_results(datastream: &DataStream, report_xml: &str) -> Result<Vec<RuleResult>> {
    let doc = roxmltree::Document::parse(report_xml)?;
    let mut out = Vec::new();

    for node in doc
        .root_element()
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "rule-result")
    {
        let Some(rule_id) = node.attribute("idref").filter(|id| !id.is_empty()) else {
            continue;
        };
        let Some(rule) = datastream.rule(rule_id) else {
            warn!(rule = rule_id, "result references a rule missing from the data stream");
            continue;
        };

        let raw_status = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "result")
            .and_then(|c| c.text())
            .unwrap_or_default()
            .trim()
            .to_string();

        let status = match map_status(&raw_status) {
            Ok(Some(status)) => status,
            Ok(None) => continue,
            Err(e) => {
                warn!(rule = rule_id, error = %e, "skipping unmappable result");
                continue;
            }
        };

        let mut description = rule.title.clone();
        if !description.is_empty() && !rule.rationale.is_empty() {
            description.push('\n');
        }
        description.push_str(&rule.rationale);

        out.push(RuleResult {
            id: rule_id.to_string(),
            status,
            severity: rule.severity,
            description,
            rationale: rule.rationale.clone(),
            instructions: rule.instructions.clone(),
            message: String::new(),
            warnings: rule.warnings.clone(),
            annotations: Default::default(),
            fixes: rule.fixes.clone(),
            values_used: Vec::new(),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> DataStream {
        DataStream::parse(
            r#"<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" id="b">
  <Profile id="p"><select idref="rule_pass" selected="true"/></Profile>
  <Rule id="rule_pass" severity="medium"><title>Passing rule</title><rationale>because</rationale></Rule>
  <Rule id="rule_fail" severity="high"><title>Failing rule</title></Rule>
  <Rule id="rule_manual" severity="low"><title>Manual rule</title></Rule>
  <Rule id="rule_na" severity="info"><title>NA rule</title></Rule>
  <Rule id="rule_skip" severity="low"><title>Skipped</title></Rule>
</Benchmark>"#,
        )
        .unwrap()
    }

    const REPORT: &str = r#"<arf xmlns="http://scap.nist.gov/schema/asset-reporting-format/1.1">
  <TestResult>
    <rule-result idref="rule_pass"><result>pass</result></rule-result>
    <rule-result idref="rule_fail"><result>fail</result></rule-result>
    <rule-result idref="rule_manual"><result>notchecked</result></rule-result>
    <rule-result idref="rule_na"><result>notapplicable</result></rule-result>
    <rule-result idref="rule_skip"><result>notselected</result></rule-result>
    <rule-result idref="rule_unknown_rule"><result>pass</result></rule-result>
  </TestResult>
</arf>"#;

    #[test]
    fn mapping_table_matches_the_xccdf_states() {
        assert_eq!(map_status("pass").unwrap(), Some(CheckStatus::Pass));
        assert_eq!(map_status("fixed").unwrap(), Some(CheckStatus::Pass));
        assert_eq!(map_status("fail").unwrap(), Some(CheckStatus::Fail));
        assert_eq!(map_status("error").unwrap(), Some(CheckStatus::Error));
        assert_eq!(map_status("unknown").unwrap(), Some(CheckStatus::Error));
        assert_eq!(map_status("notchecked").unwrap(), Some(CheckStatus::Manual));
        assert_eq!(map_status("informational").unwrap(), Some(CheckStatus::Info));
        assert_eq!(
            map_status("notapplicable").unwrap(),
            Some(CheckStatus::NotApplicable)
        );
        assert_eq!(map_status("notselected").unwrap(), None);
        assert!(map_status("exploded").is_err());
    }

    #[test]
    fn report_parsing_skips_notselected_and_unknown_rules() {
        let results = parse_results(&stream(), REPORT).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rule_pass", "rule_fail", "rule_manual", "rule_na"]);
    }

    #[test]
    fn description_joins_title_and_rationale() {
        let results = parse_results(&stream(), REPORT).unwrap();
        assert_eq!(results[0].description, "Passing rule\nbecause");
        // No rationale: just the title, no trailing newline.
        assert_eq!(results[1].description, "Failing rule");
    }
}
