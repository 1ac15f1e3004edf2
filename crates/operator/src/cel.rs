// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! CEL rule evaluation: compiles a user expression against its declared
//! inputs and emits a pass/fail verdict with diagnostic metadata.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, ExecutionError, Program, Value};
use compliance_crd::v1_alpha1::{CustomRule, CustomRuleInput};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

/// Annotation keys attached to Error results for drift diagnosis.
pub const ERROR_TYPE_ANNOTATION: &str = "error.type";
pub const EXPRESSION_ANNOTATION: &str = "cel.expression";
pub const AVAILABLE_RESOURCES_ANNOTATION: &str = "available.resources";
pub const DECLARED_INPUTS_ANNOTATION: &str = "declared.inputs";

/// Wire status in the scanner's JSON output.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CelStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "ERROR")]
    Error,
}

/// One per-rule verdict as serialized to the output file.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct CelResult {
    pub id: String,
    pub status: CelStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The slice of a CustomRule the evaluator needs.
#[derive(Clone, Debug)]
pub struct CelRule {
    pub id: String,
    pub expression: String,
    pub error_message: String,
    pub inputs: Vec<CustomRuleInput>,
}

impl From<&CustomRule> for CelRule {
    fn from(rule: &CustomRule) -> Self {
        let id = if rule.spec.id.is_empty() {
            rule.metadata.name.clone().unwrap_or_default()
        } else {
            rule.spec.id.clone()
        };
        CelRule {
            id,
            expression: rule.spec.expression.clone(),
            error_message: rule.spec.error_message.clone(),
            inputs: rule.spec.inputs.clone(),
        }
    }
}

/// Where input payloads come from: the fetcher's dump tree in scanner pods,
/// or the API server when running in-process.
pub enum InputSource {
    Offline(PathBuf),
    Live(Client),
}

impl InputSource {
    /// Fetches the declared inputs only; resources a rule does not name are
    /// never read. Missing inputs come back as `None`.
    pub async fn collect(
        &self,
        inputs: &[CustomRuleInput],
    ) -> HashMap<String, Option<serde_json::Value>> {
        let mut out = HashMap::new();
        for input in inputs {
            let value = match self {
                InputSource::Offline(root) => read_dump(root, input),
                InputSource::Live(client) => fetch_live(client, input).await,
            };
            out.insert(input.name.clone(), value);
        }
        out
    }
}

fn read_dump(root: &Path, input: &CustomRuleInput) -> Option<serde_json::Value> {
    let rel = input.uri();
    let path = root.join(rel.trim_start_matches('/'));
    let bytes = std::fs::read(&path).ok()?;
    // The fetcher writes an explicit comment marker for 404s.
    if bytes.starts_with(b"# kube-api-error") {
        return None;
    }
    serde_json::from_slice(&bytes).ok()
}

async fn fetch_live(client: &Client, input: &CustomRuleInput) -> Option<serde_json::Value> {
    let req = http::Request::get(input.uri()).body(Vec::new()).ok()?;
    match client.request_text(req).await {
        Ok(text) => serde_json::from_str(&text).ok(),
        Err(e) => {
            debug!(input = %input.name, error = %e, "live input fetch failed");
            None
        }
    }
}

/// Placeholder injected for declared-but-missing inputs so that
/// `.items.size()` evaluates to 0 instead of throwing.
fn empty_list_placeholder() -> serde_json::Value {
    serde_json::json!({"apiVersion": "v1", "items": []})
}

/// Evaluates one rule against already-collected inputs.
///
/// `variables` are the tailoring's setValues, bound as strings.
pub fn evaluate(
    rule: &CelRule,
    inputs: &HashMap<String, Option<serde_json::Value>>,
    variables: &[(String, String)],
) -> CelResult {
    let declared: Vec<&str> = rule.inputs.iter().map(|i| i.name.as_str()).collect();
    let available: Vec<&str> = rule
        .inputs
        .iter()
        .filter(|i| matches!(inputs.get(&i.name), Some(Some(_))))
        .map(|i| i.name.as_str())
        .collect();

    let program = match Program::compile(&rule.expression) {
        Ok(p) => p,
        Err(e) => {
            let mut annotations = BTreeMap::new();
            annotations.insert(ERROR_TYPE_ANNOTATION.to_string(), "compilation".to_string());
            annotations.insert(EXPRESSION_ANNOTATION.to_string(), rule.expression.clone());
            annotations.insert(
                AVAILABLE_RESOURCES_ANNOTATION.to_string(),
                available.join(","),
            );
            annotations.insert(DECLARED_INPUTS_ANNOTATION.to_string(), declared.join(","));
            return CelResult {
                id: rule.id.clone(),
                status: CelStatus::Error,
                message: format!("expression failed to compile: {e}"),
                warnings: vec![e.to_string()],
                annotations,
            };
        }
    };

    let mut context = Context::default();
    register_functions(&mut context);

    for input in &rule.inputs {
        let value = match inputs.get(&input.name) {
            Some(Some(v)) => v.clone(),
            _ => {
                warn!(input = %input.name, rule = %rule.id, "input missing, binding empty list");
                empty_list_placeholder()
            }
        };
        context.add_variable_from_value(input.name.clone(), json_to_cel(&value));
    }
    for (name, value) in variables {
        context.add_variable_from_value(name.clone(), Value::String(Arc::new(value.clone())));
    }

    match program.execute(&context) {
        Ok(Value::Bool(true)) => CelResult {
            id: rule.id.clone(),
            status: CelStatus::Pass,
            message: String::new(),
            warnings: Vec::new(),
            annotations: BTreeMap::new(),
        },
        Ok(Value::Bool(false)) => CelResult {
            id: rule.id.clone(),
            status: CelStatus::Fail,
            message: rule.error_message.clone(),
            warnings: Vec::new(),
            annotations: BTreeMap::new(),
        },
        Ok(other) => CelResult {
            id: rule.id.clone(),
            status: CelStatus::Error,
            message: "expression did not evaluate to a boolean".to_string(),
            warnings: vec![format!("got {:?}", other)],
            annotations: BTreeMap::new(),
        },
        Err(e) => CelResult {
            id: rule.id.clone(),
            status: CelStatus::Error,
            message: "expression evaluation failed".to_string(),
            warnings: vec![e.to_string()],
            annotations: BTreeMap::new(),
        },
    }
}

/// Evaluates every rule and writes the JSON results plus the `exit_code`
/// file to `out_dir`. Returns the exit code.
pub async fn run_scan(
    rules: &[CelRule],
    variables: &[(String, String)],
    source: &InputSource,
    out_dir: &Path,
) -> Result<i32> {
    let mut results = Vec::with_capacity(rules.len());
    for rule in rules {
        let inputs = source.collect(&rule.inputs).await;
        results.push(evaluate(rule, &inputs, variables));
    }

    let exit_code = exit_code_for(&results);
    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join("results.json"), serde_json::to_vec_pretty(&results)?)?;
    std::fs::write(out_dir.join("exit_code"), exit_code.to_string())?;
    Ok(exit_code)
}

/// 0 when every rule passes, 2 when any fails, -1 when any errors.
/// An error outranks a failure.
pub fn exit_code_for(results: &[CelResult]) -> i32 {
    let mut code = 0;
    for result in results {
        match result.status {
            CelStatus::Fail if code == 0 => code = 2,
            CelStatus::Error => return -1,
            _ => {}
        }
    }
    code
}

fn register_functions(context: &mut Context) {
    context.add_function("parseJSON", parse_json);
    context.add_function("parseYAML", parse_yaml);
}

fn parse_json(s: Arc<String>) -> std::result::Result<Value, ExecutionError> {
    let parsed: serde_json::Value = serde_json::from_str(&s)
        .map_err(|e| ExecutionError::function_error("parseJSON", &e.to_string()))?;
    Ok(json_to_cel(&parsed))
}

fn parse_yaml(s: Arc<String>) -> std::result::Result<Value, ExecutionError> {
    let parsed: serde_yaml::Value = serde_yaml::from_str(&s)
        .map_err(|e| ExecutionError::function_error("parseYAML", &e.to_string()))?;
    let json = serde_json::to_value(parsed)
        .map_err(|e| ExecutionError::function_error("parseYAML", &e.to_string()))?;
    Ok(json_to_cel(&json))
}

/// Converts a JSON document into CEL values. Lists and objects become dyn
/// containers, which is what the input declarations promise.
pub fn json_to_cel(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::String(Arc::new(s.clone())),
        serde_json::Value::Array(items) => {
            Value::List(Arc::new(items.iter().map(json_to_cel).collect()))
        }
        serde_json::Value::Object(fields) => {
            let map: HashMap<Key, Value> = fields
                .iter()
                .map(|(k, v)| (Key::from(k.clone()), json_to_cel(v)))
                .collect();
            Value::Map(Map { map: Arc::new(map) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(expr: &str, inputs: &[&str]) -> CelRule {
        CelRule {
            id: "test-rule".into(),
            expression: expr.into(),
            error_message: "pods must not run as root".into(),
            inputs: inputs
                .iter()
                .map(|name| CustomRuleInput {
                    name: (*name).into(),
                    api_group: String::new(),
                    version: "v1".into(),
                    resource: (*name).into(),
                    namespace: "testns".into(),
                    resource_name: String::new(),
                })
                .collect(),
        }
    }

    fn pod_list(run_as_non_root: bool) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "items": [{
                "metadata": {"name": "web", "labels": {"test": "x"}},
                "spec": {"securityContext": {"runAsNonRoot": run_as_non_root}}
            }]
        })
    }

    fn inputs_with(name: &str, value: serde_json::Value) -> HashMap<String, Option<serde_json::Value>> {
        HashMap::from([(name.to_string(), Some(value))])
    }

    #[test]
    fn true_verdict_passes() {
        let r = rule("pods.items.all(p, p.spec.securityContext.runAsNonRoot == true)", &["pods"]);
        let result = evaluate(&r, &inputs_with("pods", pod_list(true)), &[]);
        assert_eq!(result.status, CelStatus::Pass);
        assert!(result.message.is_empty());
    }

    #[test]
    fn false_verdict_fails_with_the_rule_error_message() {
        let r = rule(
            "pods.items.filter(p, has(p.metadata.labels) && p.metadata.labels[\"test\"] == \"x\")\
             .all(p, has(p.spec.securityContext) && p.spec.securityContext.runAsNonRoot == true)",
            &["pods"],
        );
        let result = evaluate(&r, &inputs_with("pods", pod_list(false)), &[]);
        assert_eq!(result.status, CelStatus::Fail);
        assert_eq!(result.message, "pods must not run as root");
    }

    #[test]
    fn compile_failure_carries_drift_diagnostics() {
        let r = rule("undeclared.items.size() >", &["pods"]);
        let result = evaluate(&r, &HashMap::new(), &[]);
        assert_eq!(result.status, CelStatus::Error);
        assert_eq!(
            result.annotations.get(ERROR_TYPE_ANNOTATION).map(String::as_str),
            Some("compilation")
        );
        assert_eq!(
            result.annotations.get(DECLARED_INPUTS_ANNOTATION).map(String::as_str),
            Some("pods")
        );
        assert!(result.annotations.contains_key(EXPRESSION_ANNOTATION));
    }

    #[test]
    fn missing_input_binds_an_empty_list() {
        let r = rule("pods.items.size() == 0", &["pods"]);
        let result = evaluate(&r, &HashMap::new(), &[]);
        assert_eq!(result.status, CelStatus::Pass);
    }

    #[test]
    fn runtime_error_is_an_error_with_the_text_in_warnings() {
        let r = rule("pods.items[17].metadata.name == \"x\"", &["pods"]);
        let result = evaluate(&r, &inputs_with("pods", pod_list(true)), &[]);
        assert_eq!(result.status, CelStatus::Error);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn variables_bind_as_strings() {
        let r = rule("threshold == \"600\"", &[]);
        let result = evaluate(&r, &HashMap::new(), &[("threshold".into(), "600".into())]);
        assert_eq!(result.status, CelStatus::Pass);
    }

    #[test]
    fn parse_json_function_is_available() {
        let r = rule("parseJSON(doc).maxPods == 250", &[]);
        let result = evaluate(
            &r,
            &HashMap::new(),
            &[("doc".into(), "{\"maxPods\": 250}".into())],
        );
        assert_eq!(result.status, CelStatus::Pass);
    }

    #[test]
    fn parse_yaml_function_is_available() {
        let r = rule("parseYAML(doc).kind == \"KubeletConfig\"", &[]);
        let result = evaluate(
            &r,
            &HashMap::new(),
            &[("doc".into(), "kind: KubeletConfig\n".into())],
        );
        assert_eq!(result.status, CelStatus::Pass);
    }

    #[test]
    fn exit_codes_follow_the_scanner_contract() {
        let pass = CelResult {
            id: "a".into(),
            status: CelStatus::Pass,
            message: String::new(),
            warnings: Vec::new(),
            annotations: BTreeMap::new(),
        };
        let mut fail = pass.clone();
        fail.status = CelStatus::Fail;
        let mut error = pass.clone();
        error.status = CelStatus::Error;

        assert_eq!(exit_code_for(&[pass.clone()]), 0);
        assert_eq!(exit_code_for(&[pass.clone(), fail.clone()]), 2);
        assert_eq!(exit_code_for(&[fail, error, pass]), -1);
        assert_eq!(exit_code_for(&[]), 0);
    }

    #[tokio::test]
    async fn run_scan_writes_results_and_exit_code() {
        let dump = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let rules = vec![
            rule("pods.items.size() == 0", &["pods"]),
            rule("pods.items.size() > 0", &["pods"]),
        ];
        let source = InputSource::Offline(dump.path().to_path_buf());

        // No dumps exist, so both rules see the empty placeholder: the
        // first passes, the second fails.
        let code = run_scan(&rules, &[], &source, out.path()).await.unwrap();
        assert_eq!(code, 2);
        assert_eq!(
            std::fs::read_to_string(out.path().join("exit_code")).unwrap(),
            "2"
        );
        let results: Vec<CelResult> = serde_json::from_slice(
            &std::fs::read(out.path().join("results.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CelStatus::Pass);
        assert_eq!(results[1].status, CelStatus::Fail);
    }

    mod input_isolation {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Evaluating a rule never surfaces resources it did not declare,
            // no matter what else sits in the dump tree.
            #[test]
            fn only_declared_inputs_are_read(extra in "[a-z]{1,12}") {
                prop_assume!(extra != "pods");
                let dir = tempfile::tempdir().unwrap();
                let undeclared = dir.path().join("api/v1/namespaces/testns").join(&extra);
                std::fs::create_dir_all(&undeclared).unwrap();
                std::fs::write(undeclared.join("sentinel"), b"{\"leak\": true}").unwrap();

                let r = rule("pods.items.size() == 0", &["pods"]);
                let source = InputSource::Offline(dir.path().to_path_buf());
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let collected = rt.block_on(source.collect(&r.inputs));

                prop_assert_eq!(collected.len(), 1);
                prop_assert!(collected.contains_key("pods"));
            }
        }
    }
}
