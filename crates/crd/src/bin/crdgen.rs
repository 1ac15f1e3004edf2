// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Generates yaml CRD resources from rust code.
//! Designed to be run with the `CRDS_DIR` and `SCHEMA_DIR` environment
//! variables pointing at the deploy manifests.
use std::{fs::File, io::Write, path::Path};

use compliance_crd::v1_alpha1::{
    ComplianceCheckResult, ComplianceRemediation, ComplianceScan, ComplianceSuite, CustomRule,
    Profile, ProfileBundle, Rule, ScanSetting, ScanSettingBinding, TailoredProfile, Variable,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

#[allow(clippy::unwrap_used)]
fn generate_crd_files(crd: &CustomResourceDefinition, crds_dir: &Path, schema_dir: &Path) {
    let kind = crd.spec.names.kind.to_lowercase();

    let yaml = serde_yaml::to_string(&crd).unwrap();
    let yaml_path = crds_dir.join(format!("{kind}-crd.yaml"));
    File::create(yaml_path)
        .unwrap()
        .write_all(yaml.as_bytes())
        .unwrap();

    let version = &crd.spec.versions[0];
    let openapi_schema = version
        .schema
        .as_ref()
        .and_then(|s| s.open_api_v3_schema.as_ref())
        .unwrap();

    let schema_json: serde_json::Value = serde_json::to_value(openapi_schema).unwrap();

    let api_version = format!("{}/{}", crd.spec.group, version.name);
    let full_schema = serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["apiVersion", "kind", "metadata", "spec"],
        "properties": {
            "apiVersion": {
                "type": "string",
                "const": api_version
            },
            "kind": {
                "type": "string",
                "const": crd.spec.names.kind
            },
            "metadata": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "namespace": { "type": "string" }
                },
                "required": ["name"]
            },
            "spec": schema_json["properties"]["spec"],
            "status": schema_json["properties"]["status"]
        }
    });

    let json = serde_json::to_string_pretty(&full_schema).unwrap();
    let json_path = schema_dir.join(format!("{kind}_{}.json", version.name));
    File::create(json_path)
        .unwrap()
        .write_all(json.as_bytes())
        .unwrap();
}

#[allow(clippy::unwrap_used)]
fn main() {
    let crds_dir_str = std::env::var_os("CRDS_DIR").unwrap();
    let schema_dir_str = std::env::var_os("SCHEMA_DIR").unwrap();

    let crds_dir = Path::new(&crds_dir_str);
    let schema_dir = Path::new(&schema_dir_str);

    let crds = vec![
        ProfileBundle::crd(),
        Profile::crd(),
        Rule::crd(),
        Variable::crd(),
        TailoredProfile::crd(),
        CustomRule::crd(),
        ComplianceScan::crd(),
        ComplianceSuite::crd(),
        ScanSetting::crd(),
        ScanSettingBinding::crd(),
        ComplianceCheckResult::crd(),
        ComplianceRemediation::crd(),
    ];

    for crd in crds {
        generate_crd_files(&crd, crds_dir, schema_dir);
    }
}
