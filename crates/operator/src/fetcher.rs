// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Streams planned API paths to a deterministic on-disk tree for the
//! scanner to consume.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use compliance_crd::v1_alpha1::MachineConfig;
use kube::api::ListParams;
use kube::core::ErrorResponse;
use kube::{Api, Client};
use tracing::debug;

use crate::filter;
use crate::planner::ResourcePath;
use crate::{Error, Result};

/// The list endpoint that gets the paged, payload-stripped treatment.
const MACHINE_CONFIG_LIST_PATH: &str = "/apis/machineconfiguration.openshift.io/v1/machineconfigs";

/// Page size for MachineConfig enumeration. Each config can embed megabytes
/// of ignition files, so batches stay small.
const MACHINE_CONFIG_PAGE_SIZE: u32 = 5;

/// Placeholder payload written for 404s so the scanner sees an explicit
/// empty instead of a missing file.
pub fn not_found_placeholder(reason: &str) -> Vec<u8> {
    format!("# kube-api-error={reason}").into_bytes()
}

pub struct Fetcher {
    client: Client,
}

/// Everything one fetch run produced: dump-path keyed payloads plus the
/// warnings to surface on the scan.
#[derive(Default)]
pub struct Fetched {
    pub files: BTreeMap<String, Vec<u8>>,
    pub warnings: Vec<String>,
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Streams every planned path. NotFound, Forbidden and unknown-kind
    /// responses are non-fatal; anything else aborts the fetch.
    pub async fn fetch(&self, paths: &[ResourcePath]) -> Result<Fetched> {
        let mut out = Fetched::default();

        for rpath in paths {
            debug!(uri = %rpath.obj_path, "fetching");
            let body = if rpath.obj_path == MACHINE_CONFIG_LIST_PATH {
                self.stream_machine_configs().await.map(Some)?
            } else {
                match self.stream_uri(&rpath.obj_path).await {
                    Ok(body) => Some(body),
                    Err(Error::Kube(kube::Error::Api(ae))) if non_fatal(&ae) => {
                        if !rpath.suppress_warning {
                            out.warnings
                                .push(format!("could not fetch {}: {}", rpath.obj_path, ae.message));
                        }
                        if ae.code == 404 {
                            out.files.insert(
                                rpath.dump_path.clone(),
                                not_found_placeholder(&ae.reason),
                            );
                        }
                        None
                    }
                    Err(e) => return Err(e),
                }
            };

            let Some(body) = body else { continue };
            if body.is_empty() {
                debug!(uri = %rpath.obj_path, "no data in response body");
                continue;
            }

            match &rpath.filter {
                Some(expr) => {
                    let filtered = filter::apply(&body, expr)?;
                    if let Some(warning) = filtered.warning {
                        out.warnings.push(warning.message(expr));
                    }
                    let payload = match filtered.value {
                        Some(v) => serde_json::to_vec(&v)?,
                        None => Vec::new(),
                    };
                    out.files.insert(rpath.dump_path.clone(), payload);
                }
                None => {
                    out.files.insert(rpath.dump_path.clone(), body);
                }
            }
        }

        Ok(out)
    }

    async fn stream_uri(&self, uri: &str) -> Result<Vec<u8>> {
        let req = http::Request::get(uri)
            .body(Vec::new())
            .map_err(|e| Error::Message(e.to_string()))?;
        let text = self.client.request_text(req).await?;
        Ok(text.into_bytes())
    }

    /// Pages through MachineConfigs and strips the embedded ignition file
    /// payloads before re-serializing the list.
    async fn stream_machine_configs(&self) -> Result<Vec<u8>> {
        let api: Api<MachineConfig> = Api::all(self.client.clone());
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut lp = ListParams::default().limit(MACHINE_CONFIG_PAGE_SIZE);
            lp.continue_token = continue_token.clone();
            let page = api.list(&lp).await?;

            for mc in page.items {
                let mut value = serde_json::to_value(&mc)?;
                strip_ignition_files(&mut value);
                items.push(value);
            }

            continue_token = page.metadata.continue_.filter(|t| !t.is_empty());
            if continue_token.is_none() {
                break;
            }
        }

        let list = serde_json::json!({
            "apiVersion": "machineconfiguration.openshift.io/v1",
            "kind": "MachineConfigList",
            "items": items,
        });
        Ok(serde_json::to_vec_pretty(&list)?)
    }
}

/// Removes `spec.config.storage.files` in place; everything else in the
/// ignition payload stays.
pub fn strip_ignition_files(mc: &mut serde_json::Value) {
    if let Some(storage) = mc
        .pointer_mut("/spec/config/storage")
        .and_then(|s| s.as_object_mut())
    {
        storage.remove("files");
    }
}

/// Writes fetched payloads under `root`, mirroring the API URI layout.
/// Directories are created `0700`, files `0600`.
pub fn save_resources(root: &Path, files: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    for (dump_path, contents) in files {
        let (dir, file) = split_dump_path(root, dump_path)?;
        create_private_dir(&dir)?;
        let target = dir.join(file);
        debug!(path = %target.display(), "saving fetched resource");
        write_private_file(&target, contents)?;
    }
    Ok(())
}

fn split_dump_path(root: &Path, dump_path: &str) -> Result<(PathBuf, String)> {
    let trimmed = dump_path.trim_start_matches('/');
    let mut segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    // Reject traversal and degenerate paths before touching the fs.
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(Error::Message(format!("bad object path: {dump_path}")));
    }
    let file = segments.pop().unwrap().to_string();
    let mut dir = root.to_path_buf();
    for seg in segments {
        dir.push(seg);
    }
    Ok((dir, file))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(dir)
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

fn non_fatal(ae: &ErrorResponse) -> bool {
    ae.code == 404 || ae.code == 403 || ae.reason == "NotFound" || ae.reason == "Forbidden"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignition_files_are_stripped_in_place() {
        let mut mc = serde_json::json!({
            "spec": {
                "config": {
                    "ignition": {"version": "3.2.0"},
                    "storage": {
                        "files": [{"path": "/etc/huge", "contents": {"source": "data:..."}}],
                        "disks": []
                    }
                }
            }
        });
        strip_ignition_files(&mut mc);
        assert!(mc.pointer("/spec/config/storage/files").is_none());
        assert!(mc.pointer("/spec/config/storage/disks").is_some());
        assert_eq!(mc.pointer("/spec/config/ignition/version").unwrap(), "3.2.0");
    }

    #[test]
    fn configs_without_storage_are_untouched() {
        let mut mc = serde_json::json!({"spec": {"config": {"ignition": {}}}});
        let before = mc.clone();
        strip_ignition_files(&mut mc);
        assert_eq!(mc, before);
    }

    #[test]
    fn dump_tree_mirrors_the_api_uri() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "/apis/config.openshift.io/v1/oauths/cluster".to_string(),
            b"{}".to_vec(),
        );
        files.insert("/version".to_string(), b"v".to_vec());
        save_resources(dir.path(), &files).unwrap();

        let written = dir
            .path()
            .join("apis/config.openshift.io/v1/oauths/cluster");
        assert_eq!(std::fs::read(written).unwrap(), b"{}");
        // Single-segment paths land directly under the root.
        assert_eq!(std::fs::read(dir.path().join("version")).unwrap(), b"v");
    }

    #[cfg(unix)]
    #[test]
    fn dump_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mut files = BTreeMap::new();
        files.insert("/api/v1/nodes".to_string(), b"[]".to_vec());
        save_resources(dir.path(), &files).unwrap();

        let meta = std::fs::metadata(dir.path().join("api/v1/nodes")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        let dir_meta = std::fs::metadata(dir.path().join("api/v1")).unwrap();
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = BTreeMap::new();
        files.insert("/api/../../etc/passwd".to_string(), b"x".to_vec());
        assert!(save_resources(dir.path(), &files).is_err());
    }

    #[test]
    fn placeholder_matches_the_scanner_contract() {
        assert_eq!(
            not_found_placeholder("NotFound"),
            b"# kube-api-error=NotFound".to_vec()
        );
    }
}
