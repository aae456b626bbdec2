//! # Snapshot store
//!
//! The flavor-independent half of snapshotting: the `latest`/`named/<name>`
//! alias machinery, snapshot listing, and garbage-collecting unreferenced
//! timestamp directories. Building the actual per-flavor snapshot tree is
//! [`crate::mirror::Flavor::snapshot_content`]; everything here operates
//! purely on `<destination>/snap/<reponame>/...` paths and knows nothing
//! about RPM or Debian. Grounded on
//! `original_source/pyreposync/sync_generic.py`.

use crate::error::{RepoSyncError, SnapshotError};
use crate::mirror::Flavor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn snap_root(destination: &Path, reponame: &str) -> PathBuf {
    destination.join("snap").join(reponame)
}

/// Builds a new dated snapshot and repoints `latest` at it. The snapshot
/// timestamp must already be unique — the caller (the job runner) mints it
/// once per sync pass.
pub fn snap(destination: &Path, reponame: &str, date: &str, flavor: &dyn Flavor) -> Result<(), RepoSyncError> {
    tracing::info!(reponame, "creating snapshot");
    flavor.snapshot_content(date)?;

    let root = snap_root(destination, reponame);
    let current = root.join(date);
    let latest = root.join("latest");
    let timestamp_file = current.join("timestamp");

    tracing::info!(reponame, "setting latest to current release");
    let _ = std::fs::remove_file(&latest);
    symlink(&current, &latest)?;
    std::fs::write(&timestamp_file, format!("{date}\n"))?;

    tracing::info!(reponame, "done creating snapshot");
    Ok(())
}

/// Lists the names of snapshots under `named/`. Empty if the directory
/// doesn't exist yet.
pub fn named_snapshots(destination: &Path, reponame: &str) -> Vec<String> {
    let dir = snap_root(destination, reponame).join("named");
    list_dir_names(&dir)
}

/// Lists the timestamp-named snapshot directories directly under
/// `snap/<reponame>/`, excluding `latest` and `named`.
pub fn timestamp_snapshots(destination: &Path, reponame: &str) -> Vec<String> {
    list_dir_names(&snap_root(destination, reponame))
        .into_iter()
        .filter(|name| name != "latest" && name != "named")
        .collect()
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Resolves a symlink alias (`latest` or `named/<name>`) to the timestamp
/// it points at, by reading the link target's final path component.
fn read_alias_target(link: &Path) -> Option<String> {
    let target = std::fs::read_link(link).ok()?;
    target
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

/// Computes the set of timestamps currently referenced by `latest` or any
/// named alias, each mapped to the alias name(s) that reference it
/// (a timestamp is live iff some alias points at it).
pub fn referenced_timestamps(destination: &Path, reponame: &str) -> BTreeMap<String, Vec<String>> {
    let root = snap_root(destination, reponame);
    let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for name in named_snapshots(destination, reponame) {
        let link = root.join("named").join(&name);
        if let Some(timestamp) = read_alias_target(&link) {
            result.entry(timestamp).or_default().push(format!("named/{name}"));
        }
    }

    if let Some(timestamp) = read_alias_target(&root.join("latest")) {
        result.entry(timestamp).or_default().push("latest".to_string());
    }

    result
}

/// Deletes every timestamp directory not reachable from `latest` or a
/// named alias.
pub fn snap_cleanup(destination: &Path, reponame: &str) -> Result<(), RepoSyncError> {
    let referenced = referenced_timestamps(destination, reponame);
    let root = snap_root(destination, reponame);
    for snap in timestamp_snapshots(destination, reponame) {
        if !referenced.contains_key(&snap) {
            tracing::info!(reponame, snapshot = %snap, "pruning unreferenced snapshot");
            std::fs::remove_dir_all(root.join(&snap))?;
        }
    }
    Ok(())
}

/// A timestamp is valid when it is exactly 14 ASCII digits
/// (`YYYYMMDDHHMMSS`).
pub fn is_valid_timestamp(candidate: &str) -> bool {
    candidate.len() == 14 && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// Creates or replaces a named alias pointing at `timestamp_or_name`. If
/// the given value isn't a valid timestamp, it is treated as an existing
/// named snapshot and resolved to the timestamp it currently references.
pub fn snap_name(
    destination: &Path,
    reponame: &str,
    timestamp_or_name: &str,
    snapname: &str,
) -> Result<(), RepoSyncError> {
    tracing::info!(reponame, snapname, "creating named snapshot");

    let timestamp = if is_valid_timestamp(timestamp_or_name) {
        timestamp_or_name.to_string()
    } else {
        tracing::warn!(
            candidate = timestamp_or_name,
            "not a valid timestamp, checking if it's a named snapshot"
        );
        let source = snap_root(destination, reponame).join(timestamp_or_name);
        read_alias_target(&source).ok_or_else(|| {
            SnapshotError::NotFound(timestamp_or_name.to_string())
        })?
    };

    let root = snap_root(destination, reponame);
    let source = root.join(&timestamp);
    if !source.is_dir() {
        return Err(SnapshotError::NotFound(timestamp).into());
    }

    let named_dir = root.join("named");
    std::fs::create_dir_all(&named_dir)?;
    let target = named_dir.join(snapname);
    let _ = std::fs::remove_file(&target);
    symlink(&source, &target)?;

    tracing::info!(reponame, snapname, "done creating named snapshot");
    Ok(())
}

/// Removes a named alias. A no-op if the alias doesn't exist.
pub fn snap_unname(destination: &Path, reponame: &str, snapname: &str) -> Result<(), RepoSyncError> {
    tracing::info!(reponame, snapname, "removing named snapshot");
    let target = snap_root(destination, reponame).join("named").join(snapname);
    let _ = std::fs::remove_file(&target);
    tracing::info!(reponame, snapname, "done removing named snapshot");
    Ok(())
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dirs(dest: &Path, reponame: &str, timestamps: &[&str]) {
        for ts in timestamps {
            std::fs::create_dir_all(dest.join("snap").join(reponame).join(ts)).unwrap();
        }
    }

    #[test]
    fn timestamp_validation() {
        assert!(is_valid_timestamp("20240101120000"));
        assert!(!is_valid_timestamp("not-a-date"));
        assert!(!is_valid_timestamp("2024010112"));
    }

    #[test]
    fn named_and_unname_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), "repo", &["20240101120000"]);

        snap_name(dir.path(), "repo", "20240101120000", "stable").unwrap();
        let named = named_snapshots(dir.path(), "repo");
        assert_eq!(named, vec!["stable".to_string()]);

        let referenced = referenced_timestamps(dir.path(), "repo");
        assert_eq!(referenced["20240101120000"], vec!["named/stable".to_string()]);

        snap_unname(dir.path(), "repo", "stable").unwrap();
        assert!(named_snapshots(dir.path(), "repo").is_empty());
    }

    #[test]
    fn cleanup_removes_unreferenced() {
        let dir = tempfile::tempdir().unwrap();
        make_dirs(dir.path(), "repo", &["20240101120000", "20240102120000"]);
        snap_name(dir.path(), "repo", "20240101120000", "keep").unwrap();

        snap_cleanup(dir.path(), "repo").unwrap();

        let remaining = timestamp_snapshots(dir.path(), "repo");
        assert_eq!(remaining, vec!["20240101120000".to_string()]);
    }

    #[test]
    fn snap_name_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("snap").join("repo")).unwrap();
        let result = snap_name(dir.path(), "repo", "20240101120000", "x");
        assert!(result.is_err());
    }
}
