// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Sandboxed jq filter evaluation for fetched API objects.
//!
//! Filters come from content authors, so evaluation is bounded: the input
//! document is size-capped and only the first two outputs are ever pulled
//! from the interpreter.

use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};

use crate::{Error, Result};

/// Largest document a filter will run against. MachineConfig lists are
/// pre-stripped by the fetcher, so anything bigger is content misbehavior.
const MAX_FILTER_INPUT_BYTES: usize = 3 * 1024 * 1024;

/// Non-fatal filter outcomes, recorded as scan warnings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterWarning {
    /// The filter matched more than one object; the first one is used.
    MoreThanOneObj,
    /// The filter resolved to null; the path is treated as empty.
    NullVal,
}

impl FilterWarning {
    pub fn message(&self, filter: &str) -> String {
        match self {
            FilterWarning::MoreThanOneObj => {
                format!("filter '{filter}': more than one object returned, using the first")
            }
            FilterWarning::NullVal => {
                format!("filter '{filter}': no value was returned")
            }
        }
    }
}

/// Result of a filter run: the (possibly absent) value plus an optional
/// warning classification.
#[derive(Clone, Debug, Default)]
pub struct Filtered {
    pub value: Option<serde_json::Value>,
    pub warning: Option<FilterWarning>,
}

/// Runs `filter` against `body` interpreted as JSON.
///
/// Parse failures and unexpected runtime errors are fatal to the fetch;
/// multiple results and null results degrade to warnings.
pub fn apply(body: &[u8], filter: &str) -> Result<Filtered> {
    if body.len() > MAX_FILTER_INPUT_BYTES {
        return Err(Error::Filter(format!(
            "refusing to filter a {} byte document",
            body.len()
        )));
    }

    let input: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| Error::Filter(format!("input is not JSON: {e}")))?;

    let mut defs = ParseCtx::new(Vec::new());
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());

    let (parsed, parse_errs) = jaq_parse::parse(filter, jaq_parse::main());
    if !parse_errs.is_empty() {
        let msgs: Vec<String> = parse_errs.iter().map(|e| e.to_string()).collect();
        return Err(Error::Filter(format!(
            "could not create filter '{filter}': {}",
            msgs.join("; ")
        )));
    }
    let Some(parsed) = parsed else {
        return Err(Error::Filter(format!("could not create filter '{filter}'")));
    };

    let compiled = defs.compile(parsed);
    if !defs.errs.is_empty() {
        return Err(Error::Filter(format!(
            "could not compile filter '{filter}'"
        )));
    }

    let inputs = RcIter::new(core::iter::empty());
    let mut outputs = compiled.run((Ctx::new([], &inputs), Val::from(input)));

    let first = match outputs.next() {
        None => return Err(Error::Filter(format!("no result from filter '{filter}'"))),
        Some(Err(e)) => {
            // Piped filters acting on missing fields surface as null-typed
            // interpreter errors; those degrade to an empty result.
            let msg = e.to_string();
            if msg.ends_with("null") || msg.contains("null (null)") {
                return Ok(Filtered {
                    value: None,
                    warning: Some(FilterWarning::NullVal),
                });
            }
            return Err(Error::Filter(format!("filter '{filter}' failed: {msg}")));
        }
        Some(Ok(val)) => val,
    };

    let first = normalize(serde_json::Value::from(first));
    if first.is_null() {
        return Ok(Filtered {
            value: None,
            warning: Some(FilterWarning::NullVal),
        });
    }

    let warning = outputs.next().is_some().then_some(FilterWarning::MoreThanOneObj);
    Ok(Filtered {
        value: Some(first),
        warning,
    })
}

/// String results are often embedded YAML manifests; decode them to JSON so
/// the scanner sees structure instead of a quoted blob.
fn normalize(value: serde_json::Value) -> serde_json::Value {
    let serde_json::Value::String(s) = &value else {
        return value;
    };
    match serde_yaml::from_str::<serde_yaml::Value>(s) {
        Ok(yaml @ serde_yaml::Value::Mapping(_)) => {
            serde_json::to_value(yaml).unwrap_or(value)
        }
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_a_nested_field() {
        let body = br#"{"spec": {"replicas": 3, "paused": false}}"#;
        let out = apply(body, ".spec.replicas").unwrap();
        assert_eq!(out.value, Some(serde_json::json!(3)));
        assert_eq!(out.warning, None);
    }

    #[test]
    fn null_result_degrades_to_a_warning() {
        let body = br#"{"spec": {}}"#;
        let out = apply(body, ".spec.missing").unwrap();
        assert_eq!(out.value, None);
        assert_eq!(out.warning, Some(FilterWarning::NullVal));
    }

    #[test]
    fn multiple_results_keep_the_first_and_warn() {
        let body = br#"{"items": [{"n": 1}, {"n": 2}]}"#;
        let out = apply(body, ".items[]").unwrap();
        assert_eq!(out.value, Some(serde_json::json!({"n": 1})));
        assert_eq!(out.warning, Some(FilterWarning::MoreThanOneObj));
    }

    #[test]
    fn bad_filter_syntax_is_fatal() {
        let body = br#"{}"#;
        assert!(apply(body, ".[|").is_err());
    }

    #[test]
    fn embedded_yaml_strings_decode_to_objects() {
        let body = br#"{"data": {"config.yaml": "kind: KubeletConfig\nspec:\n  maxPods: 250\n"}}"#;
        let out = apply(body, r#".data["config.yaml"]"#).unwrap();
        let value = out.value.unwrap();
        assert_eq!(value["kind"], "KubeletConfig");
        assert_eq!(value["spec"]["maxPods"], 250);
    }

    #[test]
    fn oversized_documents_are_rejected() {
        let body = vec![b'x'; MAX_FILTER_INPUT_BYTES + 1];
        assert!(apply(&body, ".").is_err());
    }
}
