// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Data stream parsing: profiles, rules, variables and the API-path
//! warnings embedded in rule definitions.

use std::collections::HashMap;

use compliance_crd::v1_alpha1::{RuleSeverity, RuleType, VariableType};

use crate::planner::ResourcePath;
use crate::{Error, Result};

const ENDPOINT_CLASS: &str = "ocp-api-endpoint";
const MACHINE_CONFIG_FIX_SYSTEM: &str = "urn:xccdf:fix:script:ignition";
const KUBERNETES_FIX_SYSTEM: &str = "urn:xccdf:fix:script:kubernetes";
const OCIL_CHECK_SYSTEM: &str = "http://scap.nist.gov/schema/ocil/2";
const QUESTIONNAIRE_SUFFIX: &str = "_ocil:questionnaire:1";
const QUESTION_SUFFIX: &str = "_question:question:1";

/// A remediation template embedded in a rule, as multi-document YAML.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFix {
    pub id: String,
    pub system: String,
    pub content: String,
}

impl ParsedFix {
    pub fn is_relevant(&self) -> bool {
        self.system == MACHINE_CONFIG_FIX_SYSTEM || self.system == KUBERNETES_FIX_SYSTEM
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParsedRule {
    pub id: String,
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub severity: RuleSeverity,
    pub rule_type: RuleType,
    /// Manual verification steps from the rule's OCIL question, if any.
    pub instructions: String,
    /// Human-facing warnings; the API-endpoint carriers are excluded.
    pub warnings: Vec<String>,
    /// Paths harvested from `ocp-api-endpoint` warning elements.
    pub api_paths: Vec<ResourcePath>,
    pub fixes: Vec<ParsedFix>,
}

#[derive(Clone, Debug, Default)]
pub struct ParsedProfile {
    pub id: String,
    pub title: String,
    pub description: String,
    /// `<select selected="true">` idrefs in document order.
    pub selected_rules: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ParsedVariable {
    pub id: String,
    pub title: String,
    pub description: String,
    pub var_type: VariableType,
    pub value: String,
    pub selections: Vec<String>,
}

/// The parsed content of one data stream file.
#[derive(Clone, Debug, Default)]
pub struct DataStream {
    pub profiles: Vec<ParsedProfile>,
    pub rules: Vec<ParsedRule>,
    pub variables: Vec<ParsedVariable>,
}

impl DataStream {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();

        let ocil_questions = collect_ocil_questions(&root);

        let mut ds = DataStream::default();
        for node in root.descendants().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "Profile" => ds.profiles.push(parse_profile(&node)),
                "Rule" => ds.rules.push(parse_rule(&node, &ocil_questions)),
                "Value" => {
                    if let Some(var) = parse_variable(&node) {
                        ds.variables.push(var);
                    }
                }
                _ => {}
            }
        }

        if ds.profiles.is_empty() && ds.rules.is_empty() {
            return Err(Error::Content(
                "data stream carries no profiles or rules".to_string(),
            ));
        }
        Ok(ds)
    }

    pub fn profile(&self, id: &str) -> Option<&ParsedProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn rule(&self, id: &str) -> Option<&ParsedRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Default values for non-hidden variables, keyed by the short template
    /// name. `<set-value>` nodes in the same document override defaults.
    pub fn variable_values(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|v| (super::variable_template_key(&v.id), v.value.clone()))
            .collect()
    }
}

fn child_text(node: &roxmltree::Node, name: &str) -> String {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

fn parse_profile(node: &roxmltree::Node) -> ParsedProfile {
    let mut profile = ParsedProfile {
        id: node.attribute("id").unwrap_or_default().to_string(),
        title: child_text(node, "title"),
        description: child_text(node, "description"),
        selected_rules: Vec::new(),
    };
    for select in node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "select")
    {
        if select.attribute("selected") != Some("true") {
            continue;
        }
        if let Some(idref) = select.attribute("idref") {
            profile.selected_rules.push(idref.to_string());
        }
    }
    profile
}

fn parse_rule(node: &roxmltree::Node, ocil_questions: &HashMap<String, String>) -> ParsedRule {
    let id = node.attribute("id").unwrap_or_default().to_string();
    let severity = RuleSeverity::parse(node.attribute("severity").unwrap_or_default());

    let mut rule = ParsedRule {
        title: child_text(node, "title"),
        description: child_text(node, "description"),
        rationale: child_text(node, "rationale"),
        instructions: rule_instructions(node, ocil_questions),
        severity,
        rule_type: rule_type_for(&id),
        id,
        ..Default::default()
    };

    for warning in node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "warning")
    {
        let paths = paths_from_warning(&warning);
        if paths.is_empty() {
            // A warning without endpoint markup is user-facing text.
            if let Some(text) = warning_text(&warning) {
                rule.warnings.push(text);
            }
        } else if rule.api_paths.is_empty() {
            // Only the first endpoint-bearing warning contributes paths.
            rule.api_paths = paths;
        }
    }

    for fix in node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "fix")
    {
        let parsed = ParsedFix {
            id: fix.attribute("id").unwrap_or_default().to_string(),
            system: fix.attribute("system").unwrap_or_default().to_string(),
            content: fix.text().unwrap_or_default().trim().to_string(),
        };
        if parsed.is_relevant() && !parsed.content.is_empty() {
            rule.fixes.push(parsed);
        }
    }

    rule
}

/// Node rules live in `-node` benchmarks and carry a machine-config fix;
/// everything else queries the control plane.
fn rule_type_for(id: &str) -> RuleType {
    if id.contains("_rule_kubelet") || id.contains("_node_") {
        RuleType::Node
    } else {
        RuleType::Platform
    }
}

/// The expected structure is:
///
/// ```xml
/// <warning category="general"><code class="ocp-api-endpoint" id="xyz">
///   /apis/config.openshift.io/v1/oauths/cluster
/// </code></warning>
/// ```
///
/// with optional `filter-xyz` and `dump-xyz` siblings overriding the jq
/// filter and on-disk dump path.
fn paths_from_warning(warning: &roxmltree::Node) -> Vec<ResourcePath> {
    let mut paths = Vec::new();
    for code in warning
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "code")
    {
        if !code
            .attribute("class")
            .is_some_and(|c| c.contains(ENDPOINT_CLASS))
        {
            continue;
        }
        let obj_path = code.text().map(str::trim).unwrap_or_default().to_string();
        if obj_path.is_empty() {
            continue;
        }

        let mut dump_path = obj_path.clone();
        let mut filter = None;
        if let Some(path_id) = code.attribute("id") {
            let filter_id = format!("filter-{path_id}");
            let dump_id = format!("dump-{path_id}");
            let filter_node = find_by_id(warning, &filter_id);
            let dump_node = find_by_id(warning, &dump_id);
            // Both must be present for the override to take effect.
            if let (Some(f), Some(d)) = (filter_node, dump_node) {
                filter = f.text().map(|t| t.trim().to_string());
                if let Some(text) = d.text() {
                    dump_path = text.trim().to_string();
                }
            }
        }

        paths.push(ResourcePath {
            obj_path,
            dump_path,
            filter,
            suppress_warning: false,
        });
    }
    paths
}

fn find_by_id<'a>(scope: &roxmltree::Node<'a, 'a>, id: &str) -> Option<roxmltree::Node<'a, 'a>> {
    scope
        .descendants()
        .find(|n| n.is_element() && n.attribute("id") == Some(id))
}

fn warning_text(warning: &roxmltree::Node) -> Option<String> {
    let text: String = warning
        .descendants()
        .filter_map(|n| n.text())
        .collect::<Vec<_>>()
        .join(" ");
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Maps questionnaire references to question text so that Manual results can
/// carry their verification steps.
fn collect_ocil_questions(root: &roxmltree::Node) -> HashMap<String, String> {
    let mut questions = HashMap::new();
    for question in root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "boolean_question")
    {
        let Some(id) = question.attribute("id") else {
            continue;
        };
        let text = child_text(&question, "question_text");
        if text.is_empty() {
            continue;
        }
        // The last line of OCIL question text is the yes/no prompt.
        let mut lines: Vec<&str> = text.trim().lines().collect();
        if lines.len() > 1 {
            lines.pop();
        }
        questions.insert(id.to_string(), lines.join("\n").trim().to_string());
    }
    questions
}

fn rule_instructions(rule: &roxmltree::Node, questions: &HashMap<String, String>) -> String {
    let Some(check_ref) = rule
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "check")
        .find(|c| c.attribute("system") == Some(OCIL_CHECK_SYSTEM))
        .and_then(|c| {
            c.children()
                .find(|r| r.is_element() && r.tag_name().name() == "check-content-ref")
        })
    else {
        return String::new();
    };

    let Some(questionnaire) = check_ref.attribute("name") else {
        return String::new();
    };
    let Some(base) = questionnaire.strip_suffix(QUESTIONNAIRE_SUFFIX) else {
        return String::new();
    };
    questions
        .get(&format!("{base}{QUESTION_SUFFIX}"))
        .cloned()
        .unwrap_or_default()
}

fn parse_variable(node: &roxmltree::Node) -> Option<ParsedVariable> {
    let id = node.attribute("id")?.to_string();
    let var_type = match node.attribute("type") {
        Some("number") => VariableType::Number,
        Some("boolean") => VariableType::Boolean,
        _ => VariableType::String,
    };

    let mut value = String::new();
    let mut selections = Vec::new();
    for val in node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "value")
    {
        // Hidden values are content-internal functions.
        if val.attribute("hidden") == Some("true") {
            return None;
        }
        let text = val.text().unwrap_or_default().trim().to_string();
        match val.attribute("selector") {
            None | Some("") => value = text,
            Some(_) => selections.push(text),
        }
    }

    Some(ParsedVariable {
        title: child_text(node, "title"),
        description: child_text(node, "description"),
        id,
        var_type,
        value,
        selections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" id="xccdf_org.ssgproject.content_benchmark_OCP4">
  <Profile id="xccdf_org.ssgproject.content_profile_cis">
    <title>CIS Benchmark</title>
    <description>Platform checks</description>
    <select idref="xccdf_org.ssgproject.content_rule_api_server_oauth" selected="true"/>
    <select idref="xccdf_org.ssgproject.content_rule_disabled_rule" selected="false"/>
    <select idref="xccdf_org.ssgproject.content_rule_fixy" selected="true"/>
  </Profile>
  <Value id="xccdf_org.ssgproject.content_value_var_oauth_name" type="string">
    <title>OAuth name</title>
    <value>cluster</value>
    <value selector="alt">other</value>
  </Value>
  <Value id="xccdf_org.ssgproject.content_value_var_hidden" type="string">
    <value hidden="true">secret()</value>
  </Value>
  <Rule id="xccdf_org.ssgproject.content_rule_api_server_oauth" severity="medium">
    <title>OAuth is configured</title>
    <rationale>Without OAuth anyone can log in.</rationale>
    <warning category="general"><code class="ocp-api-endpoint" id="oauth">/apis/config.openshift.io/v1/oauths/{{.var_oauth_name}}</code>
      <code id="filter-oauth">.spec</code>
      <code id="dump-oauth">/apis/config.openshift.io/v1/oauths/cluster#spec</code>
    </warning>
    <warning category="general">Check the console manually on hypershift.</warning>
  </Rule>
  <Rule id="xccdf_org.ssgproject.content_rule_fixy" severity="high">
    <title>Fixable rule</title>
    <fix system="urn:xccdf:fix:script:kubernetes" id="fixy">apiVersion: v1
kind: ConfigMap</fix>
    <fix system="urn:xccdf:fix:script:sh" id="shfix">echo nope</fix>
  </Rule>
</Benchmark>"#;

    #[test]
    fn selected_rules_preserve_document_order_and_skip_unselected() {
        let ds = DataStream::parse(STREAM).unwrap();
        let profile = ds
            .profile("xccdf_org.ssgproject.content_profile_cis")
            .unwrap();
        assert_eq!(
            profile.selected_rules,
            vec![
                "xccdf_org.ssgproject.content_rule_api_server_oauth",
                "xccdf_org.ssgproject.content_rule_fixy",
            ]
        );
    }

    #[test]
    fn endpoint_warnings_yield_paths_with_filter_and_dump_overrides() {
        let ds = DataStream::parse(STREAM).unwrap();
        let rule = ds
            .rule("xccdf_org.ssgproject.content_rule_api_server_oauth")
            .unwrap();
        assert_eq!(rule.api_paths.len(), 1);
        let path = &rule.api_paths[0];
        assert_eq!(
            path.obj_path,
            "/apis/config.openshift.io/v1/oauths/{{.var_oauth_name}}"
        );
        assert_eq!(path.filter.as_deref(), Some(".spec"));
        assert_eq!(
            path.dump_path,
            "/apis/config.openshift.io/v1/oauths/cluster#spec"
        );
        // The endpoint warning is not user-facing; the manual one is.
        assert_eq!(rule.warnings.len(), 1);
        assert!(rule.warnings[0].contains("hypershift"));
    }

    #[test]
    fn only_the_first_endpoint_warning_contributes_paths() {
        let ds = DataStream::parse(
            r#"<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" id="b">
  <Profile id="p"><select idref="r" selected="true"/></Profile>
  <Rule id="r" severity="low">
    <title>Doubly warned</title>
    <warning><code class="ocp-api-endpoint" id="a">/api/v1/nodes</code></warning>
    <warning><code class="ocp-api-endpoint" id="b">/api/v1/pods</code></warning>
  </Rule>
</Benchmark>"#,
        )
        .unwrap();
        let rule = ds.rule("r").unwrap();
        assert_eq!(rule.api_paths.len(), 1);
        assert_eq!(rule.api_paths[0].obj_path, "/api/v1/nodes");
        // Endpoint-bearing warnings never surface as user-facing text.
        assert!(rule.warnings.is_empty());
    }

    #[test]
    fn only_relevant_fix_systems_are_kept() {
        let ds = DataStream::parse(STREAM).unwrap();
        let rule = ds.rule("xccdf_org.ssgproject.content_rule_fixy").unwrap();
        assert_eq!(rule.fixes.len(), 1);
        assert_eq!(rule.fixes[0].system, KUBERNETES_FIX_SYSTEM);
        assert!(rule.fixes[0].content.contains("ConfigMap"));
    }

    #[test]
    fn hidden_variables_are_skipped_and_defaults_captured() {
        let ds = DataStream::parse(STREAM).unwrap();
        assert_eq!(ds.variables.len(), 1);
        let values = ds.variable_values();
        assert_eq!(values.get("var_oauth_name").map(String::as_str), Some("cluster"));
        assert!(!values.contains_key("var_hidden"));
    }

    #[test]
    fn empty_stream_is_a_content_error() {
        let err = DataStream::parse("<empty/>").unwrap_err();
        assert!(err.to_string().contains("no profiles or rules"));
    }
}
