// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Resource path planner: turns a profile (and optional tailoring) into the
//! ordered list of API object paths the scan must pre-fetch.

use std::collections::HashMap;

use regex::Regex;

use crate::xccdf::datastream::DataStream;
use crate::xccdf::tailoring::TailoringDocument;

/// One planned fetch: where to GET, where to dump, and how to filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourcePath {
    pub obj_path: String,
    pub dump_path: String,
    pub filter: Option<String>,
    /// Fetch failures on this path are expected and not worth a warning.
    pub suppress_warning: bool,
}

impl ResourcePath {
    fn plain(path: &str) -> Self {
        ResourcePath {
            obj_path: path.to_string(),
            dump_path: path.to_string(),
            filter: None,
            suppress_warning: false,
        }
    }
}

/// Cluster identity paths staged for every scan regardless of profile.
/// Fetch failures on any of them are surfaced like content-selected paths.
fn mandatory_paths(operator_namespace: &str, pod_name: &str) -> Vec<ResourcePath> {
    vec![
        ResourcePath::plain("/version"),
        ResourcePath::plain("/apis/config.openshift.io/v1/clusteroperators/openshift-apiserver"),
        ResourcePath::plain("/apis/config.openshift.io/v1/infrastructures/cluster"),
        ResourcePath::plain("/apis/config.openshift.io/v1/networks/cluster"),
        ResourcePath::plain("/api/v1/nodes"),
        ResourcePath {
            obj_path: format!("/api/v1/namespaces/{operator_namespace}/pods/{pod_name}"),
            dump_path: format!("/api/v1/namespaces/{operator_namespace}/pods/api-checks-pod"),
            filter: None,
            suppress_warning: false,
        },
    ]
}

/// Plans the fetch list for `profile_id` against the data stream, with
/// tailoring selections overriding the base profile's.
///
/// Selections are emitted in document order; the mandatory discovery paths
/// always come first.
pub fn plan(
    datastream: &DataStream,
    tailoring: Option<&TailoringDocument>,
    profile_id: &str,
    operator_namespace: &str,
    pod_name: &str,
) -> Vec<ResourcePath> {
    let mut values = datastream.variable_values();
    let mut out = mandatory_paths(operator_namespace, pod_name);

    let mut effective_profile = profile_id.to_string();
    let mut overridden: HashMap<String, bool> = HashMap::new();

    if let Some(tailoring) = tailoring {
        // set-value entries override bundle defaults; a name the bundle
        // never defined stays undefined.
        for set_value in &tailoring.profile.values {
            let key = crate::xccdf::variable_template_key(&set_value.idref);
            values
                .entry(key)
                .and_modify(|value| *value = set_value.value.clone());
        }
        for selection in &tailoring.profile.selections {
            overridden.insert(selection.idref.clone(), selection.selected);
            if selection.selected {
                push_rule_paths(datastream, &selection.idref, &values, &mut out);
            }
        }
        match &tailoring.profile.extends {
            Some(base) => effective_profile = base.clone(),
            // Nothing extended: only tailored selections contribute.
            None => return out,
        }
    }

    if let Some(profile) = datastream.profile(&effective_profile) {
        for rule_id in &profile.selected_rules {
            // Tailoring overrides win, both to disable and to avoid
            // double-planning an already-emitted selection.
            if overridden.contains_key(rule_id) {
                continue;
            }
            push_rule_paths(datastream, rule_id, &values, &mut out);
        }
    }

    out
}

fn push_rule_paths(
    datastream: &DataStream,
    rule_id: &str,
    values: &HashMap<String, String>,
    out: &mut Vec<ResourcePath>,
) {
    let Some(rule) = datastream.rule(rule_id) else {
        return;
    };
    for path in &rule.api_paths {
        out.push(ResourcePath {
            obj_path: render_template(&path.obj_path, values),
            dump_path: render_template(&path.dump_path, values),
            filter: path.filter.as_ref().map(|f| render_template(f, values)),
            suppress_warning: path.suppress_warning,
        });
    }
}

/// Substitutes `{{.name}}` markers the way Go templates rendered them in the
/// content. Unknown names resolve to the empty string.
pub fn render_template(input: &str, values: &HashMap<String, String>) -> String {
    // The marker grammar is fixed by the content build; no user input
    // reaches this regex.
    let re = Regex::new(r"\{\{\s*\.([A-Za-z0-9_\-]+)\s*\}\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        values.get(&caps[1]).cloned().unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xccdf::tailoring::{Selection, SetValue, TailoringProfile};

    fn stream() -> DataStream {
        DataStream::parse(
            r#"<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" id="b">
  <Profile id="profile_base">
    <select idref="rule_a" selected="true"/>
    <select idref="rule_b" selected="true"/>
  </Profile>
  <Value id="xccdf_org.ssgproject.content_value_var_name" type="string">
    <value>default-name</value>
  </Value>
  <Rule id="rule_a" severity="low">
    <title>A</title>
    <warning><code class="ocp-api-endpoint" id="a">/api/v1/namespaces/{{.var_name}}/configmaps</code></warning>
  </Rule>
  <Rule id="rule_b" severity="low">
    <title>B</title>
    <warning><code class="ocp-api-endpoint" id="b">/apis/config.openshift.io/v1/oauths/cluster</code></warning>
  </Rule>
  <Rule id="rule_c" severity="low">
    <title>C</title>
    <warning><code class="ocp-api-endpoint" id="c">/api/v1/nodes/{{.var_missing}}/proxy</code></warning>
  </Rule>
  <Rule id="rule_d" severity="low">
    <title>D</title>
    <warning><code class="ocp-api-endpoint" id="d">/apis/config.openshift.io/v1/{{.var_new}}/cluster</code></warning>
  </Rule>
</Benchmark>"#,
        )
        .unwrap()
    }

    fn planned_paths(tailoring: Option<&TailoringDocument>) -> Vec<String> {
        plan(&stream(), tailoring, "profile_base", "openshift-compliance", "scanner-pod")
            .into_iter()
            .map(|p| p.obj_path)
            .collect()
    }

    #[test]
    fn mandatory_discovery_paths_come_first() {
        let paths = planned_paths(None);
        assert_eq!(paths[0], "/version");
        assert_eq!(paths[4], "/api/v1/nodes");
        assert!(paths[5].contains("/pods/scanner-pod"));
    }

    #[test]
    fn profile_selections_render_variables_in_document_order() {
        let paths = planned_paths(None);
        assert_eq!(
            &paths[6..],
            &[
                "/api/v1/namespaces/default-name/configmaps".to_string(),
                "/apis/config.openshift.io/v1/oauths/cluster".to_string(),
            ]
        );
    }

    #[test]
    fn tailoring_overrides_base_selections_and_values() {
        let tailoring = TailoringDocument {
            id: "t".into(),
            benchmark_href: "/content/ds.xml".into(),
            version_time: "2026-01-01T00:00:00Z".into(),
            profile: TailoringProfile {
                id: "p".into(),
                extends: Some("profile_base".into()),
                selections: vec![
                    Selection { idref: "rule_b".into(), selected: false },
                    Selection { idref: "rule_c".into(), selected: true },
                    Selection { idref: "rule_d".into(), selected: true },
                ],
                values: vec![
                    SetValue {
                        idref: "xccdf_org.ssgproject.content_value_var_name".into(),
                        value: "tailored-ns".into(),
                    },
                    // Not a bundle default; must not spring into existence.
                    SetValue {
                        idref: "xccdf_org.ssgproject.content_value_var_new".into(),
                        value: "oauths".into(),
                    },
                ],
                ..Default::default()
            },
        };
        let paths = planned_paths(Some(&tailoring));
        // rule_c enabled by the tailoring; missing variable renders empty.
        assert!(paths.contains(&"/api/v1/nodes//proxy".to_string()));
        // rule_b disabled by the tailoring.
        assert!(!paths.iter().any(|p| p.contains("oauths")));
        // rule_a comes from the base with the overridden value.
        assert!(paths.contains(&"/api/v1/namespaces/tailored-ns/configmaps".to_string()));
        // set-value only overrides defaults, so var_new stays undefined.
        assert!(paths.contains(&"/apis/config.openshift.io/v1//cluster".to_string()));
    }

    #[test]
    fn tailoring_without_extends_contributes_only_its_own_selections() {
        let tailoring = TailoringDocument {
            profile: TailoringProfile {
                id: "p".into(),
                extends: None,
                selections: vec![Selection { idref: "rule_c".into(), selected: true }],
                ..Default::default()
            },
            ..Default::default()
        };
        let paths = planned_paths(Some(&tailoring));
        assert_eq!(paths.len(), 7);
        assert!(paths[6].starts_with("/api/v1/nodes/"));
    }
}
