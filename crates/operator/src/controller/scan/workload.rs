// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Typed builders for everything a scan launches: the raw-results PVC, the
//! result server, the scanner pods and the aggregator pod. Branching on
//! scanner type happens here, once, instead of deep map surgery on pod
//! templates.

use std::collections::BTreeMap;

use compliance_crd::keys;
use compliance_crd::v1_alpha1::{ComplianceScan, ScanType, ScannerType};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Pod, PodSpec, PodTemplateSpec,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

use crate::config::RunConfig;
use crate::scheduling;

const CONTENT_MOUNT: &str = "/content";
const REPORT_MOUNT: &str = "/reports";
const API_DUMP_MOUNT: &str = "/kubernetesapi";

pub fn pvc_name(scan: &ComplianceScan) -> String {
    format!("{}-raw-results", scan.name_any())
}

pub fn result_server_name(scan: &ComplianceScan) -> String {
    format!("{}-rs", scan.name_any())
}

pub fn node_pod_name(scan: &ComplianceScan, node: &str) -> String {
    format!("{}-{node}-pod", scan.name_any())
}

pub fn platform_pod_name(scan: &ComplianceScan) -> String {
    format!("{}-api-checks-pod", scan.name_any())
}

pub fn aggregator_pod_name(scan: &ComplianceScan) -> String {
    format!("aggregator-pod-{}", scan.name_any())
}

/// ConfigMap the log collector writes the ARF and exit code into, one per
/// node (or one for the platform pod).
pub fn result_configmap_name(scan: &ComplianceScan, node: &str) -> String {
    format!("{}-{node}-results", scan.name_any())
}

fn scan_labels(scan: &ComplianceScan) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(keys::SCAN_LABEL.to_string(), scan.name_any());
    if let Some(suite) = scan.labels().get(keys::SUITE_LABEL) {
        labels.insert(keys::SUITE_LABEL.to_string(), suite.clone());
    }
    labels
}

fn owned_meta(scan: &ComplianceScan, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: scan.namespace(),
        labels: Some(scan_labels(scan)),
        owner_references: scan.controller_owner_ref(&()).map(|o| vec![o]),
        ..Default::default()
    }
}

/// The per-run output PVC. Written only by scanner pods; the aggregator and
/// the result server read.
pub fn build_pvc(scan: &ComplianceScan) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: owned_meta(scan, pvc_name(scan)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [(
                        "storage".to_string(),
                        Quantity(scan.spec.raw_result_storage.size.clone()),
                    )]
                    .into(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The result server: single reader of raw artifacts for external clients,
/// and the sink the log collectors upload ARFs to.
pub fn build_result_server(scan: &ComplianceScan, cfg: &RunConfig) -> Deployment {
    let name = result_server_name(scan);
    let mut pod_labels = scan_labels(scan);
    pod_labels.insert("workload".to_string(), "resultserver".to_string());

    Deployment {
        metadata: owned_meta(scan, name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some("resultserver".to_string()),
                    node_selector: Some(scheduling::control_plane_selector()),
                    tolerations: Some(scheduling::control_plane_tolerations()),
                    priority_class_name: scan.spec.priority_class.clone(),
                    containers: vec![Container {
                        name: "result-server".to_string(),
                        image: Some(cfg.operator_image.clone()),
                        command: Some(vec!["compliance-operator".to_string()]),
                        args: Some(vec![
                            "result-server".to_string(),
                            format!("--scan={}", scan.name_any()),
                            format!("--path={}/", raw_results_dir()),
                            format!("--rotation={}", scan.spec.raw_result_storage.rotation),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "raw-results".to_string(),
                            mount_path: raw_results_dir(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "raw-results".to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: pvc_name(scan),
                            read_only: None,
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn raw_results_dir() -> String {
    "/rawresults".to_string()
}

/// One scanner pod per workload instance. Node scans get one per matched
/// node; platform scans a single pod.
pub fn scanner_pods(scan: &ComplianceScan, nodes: &[String], cfg: &RunConfig) -> Vec<Pod> {
    match (scan.spec.scan_type, scan.spec.scanner_type) {
        (ScanType::Node, _) => nodes
            .iter()
            .map(|node| openscap_pod(scan, cfg, Some(node)))
            .collect(),
        (ScanType::Platform, ScannerType::OpenScap) => vec![openscap_pod(scan, cfg, None)],
        (ScanType::Platform, ScannerType::Cel) => vec![cel_pod(scan, cfg)],
    }
}

/// The OpenSCAP pod: api-resource-collector stages API dumps, the scanner
/// evaluates, the log collector ships the ARF and exit code out as a
/// ConfigMap.
fn openscap_pod(scan: &ComplianceScan, cfg: &RunConfig, node: Option<&str>) -> Pod {
    let (pod_name, target) = match node {
        Some(node) => (node_pod_name(scan, node), node.to_string()),
        None => (platform_pod_name(scan), "api-checks".to_string()),
    };

    let mut metadata = owned_meta(scan, pod_name);
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("workload".to_string(), "scanner".to_string());
    metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert("target".to_string(), target.clone());

    let content_mounts = vec![
        VolumeMount {
            name: "content-dir".to_string(),
            mount_path: CONTENT_MOUNT.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "report-dir".to_string(),
            mount_path: REPORT_MOUNT.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "api-dump-dir".to_string(),
            mount_path: API_DUMP_MOUNT.to_string(),
            ..Default::default()
        },
    ];

    let collector = Container {
        name: "api-resource-collector".to_string(),
        image: Some(cfg.operator_image.clone()),
        command: Some(vec!["compliance-operator".to_string()]),
        args: Some(vec![
            "api-resource-collector".to_string(),
            format!("--content={CONTENT_MOUNT}/{}", scan.spec.content),
            format!("--resultdir={API_DUMP_MOUNT}"),
            format!("--profile={}", scan.spec.profile),
            format!("--warnings-output-file={REPORT_MOUNT}/warnings"),
        ]),
        volume_mounts: Some(content_mounts.clone()),
        ..Default::default()
    };

    let scanner = Container {
        name: "scanner".to_string(),
        image: Some(cfg.scanner_image.clone()),
        command: Some(vec!["oscap-chroot".to_string()]),
        args: Some(vec![
            "xccdf".to_string(),
            "eval".to_string(),
            format!("--profile={}", scan.spec.profile),
            format!("--results-arf={REPORT_MOUNT}/arf.xml"),
            format!("{CONTENT_MOUNT}/{}", scan.spec.content),
        ]),
        volume_mounts: Some(content_mounts.clone()),
        ..Default::default()
    };

    let log_collector = Container {
        name: "log-collector".to_string(),
        image: Some(cfg.operator_image.clone()),
        command: Some(vec!["compliance-operator".to_string()]),
        args: Some(vec![
            "resultscollector".to_string(),
            format!("--arf-file={REPORT_MOUNT}/arf.xml"),
            format!("--exit-code-file={REPORT_MOUNT}/exit_code"),
            format!("--warnings-file={REPORT_MOUNT}/warnings"),
            format!("--config-map-name={}", result_configmap_name(scan, &target)),
            format!("--owner={}", scan.name_any()),
            format!("--node-name={target}"),
        ]),
        volume_mounts: Some(content_mounts),
        ..Default::default()
    };

    let mut volumes = vec![
        Volume {
            name: "report-dir".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: "api-dump-dir".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: "content-dir".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ];
    if let Some(tailoring) = &scan.spec.tailoring_config_map {
        volumes.push(Volume {
            name: "tailoring".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: tailoring.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let node_selector = node.map(|n| {
        BTreeMap::from([("kubernetes.io/hostname".to_string(), n.to_string())])
    });

    Pod {
        metadata,
        spec: Some(PodSpec {
            service_account_name: Some("compliance-scanner".to_string()),
            restart_policy: Some("Never".to_string()),
            node_selector,
            priority_class_name: scan.spec.priority_class.clone(),
            init_containers: Some(vec![Container {
                name: "content-container".to_string(),
                image: Some(scan.spec.content_image.clone()),
                command: Some(vec!["sh".to_string()]),
                args: Some(vec![
                    "-c".to_string(),
                    format!("cp {} {CONTENT_MOUNT}/", scan.spec.content),
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "content-dir".to_string(),
                    mount_path: CONTENT_MOUNT.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            containers: vec![collector, scanner, log_collector],
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The CEL pod is a single container that fetches, evaluates and writes in
/// one pass; no result server is involved.
fn cel_pod(scan: &ComplianceScan, cfg: &RunConfig) -> Pod {
    let mut metadata = owned_meta(scan, platform_pod_name(scan));
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("workload".to_string(), "scanner".to_string());

    Pod {
        metadata,
        spec: Some(PodSpec {
            service_account_name: Some("compliance-scanner".to_string()),
            restart_policy: Some("Never".to_string()),
            priority_class_name: scan.spec.priority_class.clone(),
            containers: vec![Container {
                name: "scanner".to_string(),
                image: Some(cfg.operator_image.clone()),
                command: Some(vec!["compliance-operator".to_string()]),
                args: Some(vec![
                    "cel-scanner".to_string(),
                    format!("--scan={}", scan.name_any()),
                    format!("--profile={}", scan.spec.profile),
                    format!("--resultdir={REPORT_MOUNT}"),
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "report-dir".to_string(),
                    mount_path: REPORT_MOUNT.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "report-dir".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The aggregator pod reads every result ConfigMap for the scan and writes
/// check results and remediations. OpenSCAP only; CEL aggregates in
/// process.
pub fn build_aggregator_pod(scan: &ComplianceScan, cfg: &RunConfig) -> Pod {
    let mut metadata = owned_meta(scan, aggregator_pod_name(scan));
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("workload".to_string(), "aggregator".to_string());

    Pod {
        metadata,
        spec: Some(PodSpec {
            service_account_name: Some("remediation-aggregator".to_string()),
            restart_policy: Some("OnFailure".to_string()),
            node_selector: Some(scheduling::control_plane_selector()),
            tolerations: Some(scheduling::control_plane_tolerations()),
            priority_class_name: scan.spec.priority_class.clone(),
            containers: vec![Container {
                name: "aggregator".to_string(),
                image: Some(cfg.operator_image.clone()),
                command: Some(vec!["compliance-operator".to_string()]),
                args: Some(vec![
                    "aggregator".to_string(),
                    format!("--scan={}", scan.name_any()),
                    format!("--content={CONTENT_MOUNT}/{}", scan.spec.content),
                ]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_crd::v1_alpha1::{ComplianceScanSpec, RawResultStorageSpec};

    fn scan(scan_type: ScanType, scanner_type: ScannerType) -> ComplianceScan {
        let mut scan = ComplianceScan::new(
            "scan-ocp4-cis",
            ComplianceScanSpec {
                scan_type,
                scanner_type,
                profile: "xccdf_org.ssgproject.content_profile_cis".into(),
                content_image: "ghcr.io/complianceascode/ocp4:latest".into(),
                content: "ssg-ocp4-ds.xml".into(),
                raw_result_storage: RawResultStorageSpec {
                    size: "2Gi".into(),
                    rotation: 3,
                },
                ..Default::default()
            },
        );
        scan.metadata.namespace = Some("openshift-compliance".into());
        scan.metadata.uid = Some("abc-123".into());
        scan
    }

    #[test]
    fn node_scans_get_one_pod_per_node_pinned_to_it() {
        let nodes = vec!["master-0".to_string(), "worker-1".to_string()];
        let pods = scanner_pods(&scan(ScanType::Node, ScannerType::OpenScap), &nodes, &RunConfig::from_env());
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].metadata.name.as_deref(), Some("scan-ocp4-cis-master-0-pod"));
        let selector = pods[1].spec.as_ref().unwrap().node_selector.as_ref().unwrap();
        assert_eq!(
            selector.get("kubernetes.io/hostname").map(String::as_str),
            Some("worker-1")
        );
        // The full sidecar set rides along.
        let names: Vec<&str> = pods[0].spec.as_ref().unwrap().containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api-resource-collector", "scanner", "log-collector"]);
    }

    #[test]
    fn platform_openscap_is_a_single_pod_with_sidecars() {
        let pods = scanner_pods(&scan(ScanType::Platform, ScannerType::OpenScap), &[], &RunConfig::from_env());
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].spec.as_ref().unwrap().containers.len(), 3);
    }

    #[test]
    fn platform_cel_is_a_single_container_pod() {
        let pods = scanner_pods(&scan(ScanType::Platform, ScannerType::Cel), &[], &RunConfig::from_env());
        assert_eq!(pods.len(), 1);
        let spec = pods[0].spec.as_ref().unwrap();
        assert_eq!(spec.containers.len(), 1);
        assert!(spec.init_containers.is_none());
    }

    #[test]
    fn workloads_are_owned_by_the_scan() {
        let s = scan(ScanType::Platform, ScannerType::OpenScap);
        let pvc = build_pvc(&s);
        let owner = &pvc.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "ComplianceScan");
        assert_eq!(owner.name, "scan-ocp4-cis");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn pvc_requests_the_configured_size() {
        let pvc = build_pvc(&scan(ScanType::Platform, ScannerType::OpenScap));
        let requests = pvc
            .spec
            .unwrap()
            .resources
            .unwrap()
            .requests
            .unwrap();
        assert_eq!(requests.get("storage").unwrap().0, "2Gi");
    }

    #[test]
    fn result_configmap_names_are_per_node() {
        let s = scan(ScanType::Node, ScannerType::OpenScap);
        assert_eq!(
            result_configmap_name(&s, "worker-1"),
            "scan-ocp4-cis-worker-1-results"
        );
    }
}
