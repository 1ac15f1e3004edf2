// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Raw result retention: one numbered directory per run, pruned to
//! `rotation` previous runs plus the current one.

use std::path::Path;

use tracing::info;

use crate::Result;

/// Deletes the oldest run directories until at most `rotation + 1` remain.
/// Non-numeric entries (lost+found and friends) are left alone.
pub fn rotate(root: &Path, rotation: u32) -> Result<Vec<u64>> {
    let mut indices = run_indices(root)?;
    indices.sort_unstable();

    let keep = rotation as usize + 1;
    if indices.len() > keep {
        let cutoff = indices.len() - keep;
        for index in indices.drain(..cutoff) {
            let dir = root.join(index.to_string());
            info!(dir = %dir.display(), "rotating out old raw results");
            std::fs::remove_dir_all(&dir)?;
        }
    }
    Ok(indices)
}

/// Numeric run directories currently present under the PVC root.
pub fn run_indices(root: &Path) -> Result<Vec<u64>> {
    let mut indices = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        {
            indices.push(index);
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkruns(root: &Path, indices: &[u64]) {
        for i in indices {
            std::fs::create_dir_all(root.join(i.to_string()).join("platform")).unwrap();
        }
    }

    #[test]
    fn keeps_rotation_plus_one_newest_runs() {
        let dir = tempfile::tempdir().unwrap();
        mkruns(dir.path(), &[0, 1, 2, 3, 4]);

        let kept = rotate(dir.path(), 3).unwrap();
        assert_eq!(kept, vec![1, 2, 3, 4]);
        assert!(!dir.path().join("0").exists());
        assert!(dir.path().join("4").join("platform").exists());
    }

    #[test]
    fn under_the_bound_nothing_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        mkruns(dir.path(), &[7, 8]);
        let kept = rotate(dir.path(), 3).unwrap();
        assert_eq!(kept, vec![7, 8]);
    }

    #[test]
    fn non_numeric_entries_survive() {
        let dir = tempfile::tempdir().unwrap();
        mkruns(dir.path(), &[0, 1, 2]);
        std::fs::create_dir(dir.path().join("lost+found")).unwrap();

        rotate(dir.path(), 1).unwrap();
        assert!(dir.path().join("lost+found").exists());
        assert!(!dir.path().join("0").exists());
        assert!(dir.path().join("2").exists());
    }

    #[test]
    fn rotation_zero_keeps_only_the_current_run() {
        let dir = tempfile::tempdir().unwrap();
        mkruns(dir.path(), &[3, 4, 5]);
        let kept = rotate(dir.path(), 0).unwrap();
        assert_eq!(kept, vec![5]);
    }
}
