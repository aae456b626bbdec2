//! RPM repository flavor: `repomd.xml` + `primary.xml` + `.treeinfo`.
//! Grounded on `original_source/pyreposync/sync_rpm.py`.

use super::Flavor;
use crate::error::RepoSyncError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::hasher::Algo;
use crate::rpm_meta;
use std::path::PathBuf;

pub struct RpmMirror {
    pub reponame: String,
    pub base_url: String,
    pub destination: PathBuf,
    pub treeinfo: String,
    pub allow_missing_packages: bool,
}

impl RpmMirror {
    fn join_url(&self, rel: &str) -> String {
        format!("{}{}", self.base_url, rel)
    }
}

impl Flavor for RpmMirror {
    fn reponame(&self) -> &str {
        &self.reponame
    }

    fn sync_root(&self) -> PathBuf {
        self.destination.join("sync").join(&self.reponame)
    }

    fn snap_root(&self, date: &str) -> PathBuf {
        self.destination.join("snap").join(&self.reponame).join(date)
    }

    fn sync(&self, fetcher: &Fetcher) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let repodata_dir = sync_root.join("repodata");
        let _ = std::fs::remove_dir_all(&repodata_dir);

        let repomd_path = repodata_dir.join("repomd.xml");
        fetcher.fetch(
            &self.join_url("repodata/repomd.xml"),
            &repomd_path,
            &FetchOptions {
                replace: true,
                ..Default::default()
            },
        )?;

        let entries = rpm_meta::read_repomd(&sync_root)?;
        for entry in &entries {
            let dest = sync_root.join(&entry.href);
            fetcher.fetch(
                &self.join_url(&entry.href),
                &dest,
                &FetchOptions {
                    expected_digest: Some(entry.hex.clone()),
                    algo: rpm_meta::parse_algo(&entry.algo),
                    replace: true,
                    tolerate_missing: false,
                },
            )?;
        }

        self.sync_packages(fetcher, &entries)?;
        self.sync_treeinfo(fetcher)?;
        Ok(())
    }

    fn snapshot_content(&self, date: &str) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let snap_root = self.snap_root(date);

        tracing::info!(reponame = %self.reponame, "copy repodata");
        let entries = rpm_meta::read_repomd(&sync_root)?;
        copy_into(
            &sync_root.join("repodata").join("repomd.xml"),
            &snap_root.join("repodata").join("repomd.xml"),
        )?;
        for entry in &entries {
            copy_into(&sync_root.join(&entry.href), &snap_root.join(&entry.href))?;
        }

        tracing::info!(reponame = %self.reponame, "copy treeinfo");
        let _ = copy_into(
            &sync_root.join(&self.treeinfo),
            &snap_root.join(&self.treeinfo),
        );
        let treeinfo_entries = rpm_meta::read_treeinfo(&sync_root, &self.treeinfo);
        for entry in &treeinfo_entries {
            if entry.path == "repodata/repomd.xml" {
                continue;
            }
            let _ = copy_into(&sync_root.join(&entry.path), &snap_root.join(&entry.path));
        }

        tracing::info!(reponame = %self.reponame, "copy packages");
        let primary_href = rpm_meta::find_primary(&entries)
            .map(|e| e.href.clone())
            .ok_or_else(|| {
                crate::error::MetadataError::MissingPrimary(sync_root.join("repodata"))
            })?;
        for package in rpm_meta::read_primary(&sync_root, &primary_href)? {
            let package = package?;
            let src = sync_root.join(format!("{}.{}.{}", package.href, package.algo, package.hex));
            let dst = snap_root.join(&package.href);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Err(e) = symlink_file(&src, &dst) {
                tracing::error!(path = %dst.display(), "could not snapshot package: {e}");
            }
        }
        Ok(())
    }

    fn migrate(&self) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let migrated_marker = sync_root.join("migrated");
        if migrated_marker.is_file() {
            tracing::info!(reponame = %self.reponame, "migration already done");
            return Ok(());
        }

        let entries = rpm_meta::read_repomd(&sync_root)?;
        let primary_href = rpm_meta::find_primary(&entries)
            .map(|e| e.href.clone())
            .ok_or_else(|| {
                crate::error::MetadataError::MissingPrimary(sync_root.join("repodata"))
            })?;

        for package in rpm_meta::read_primary(&sync_root, &primary_href)? {
            let package = package?;
            let old = sync_root.join(&package.href);
            let new = sync_root.join(format!("{}.{}.{}", package.href, package.algo, package.hex));
            match std::fs::rename(&old, &new) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::error!(href = %package.href, "could not migrate: file not found");
                }
                Err(e) => {
                    tracing::error!(href = %package.href, "could not migrate: {e}");
                }
            }
        }

        for snap in crate::snapshot::timestamp_snapshots(&self.destination, &self.reponame) {
            tracing::info!(snap, "migrating existing snapshot");
            let base = self.destination.join("snap").join(&self.reponame).join(&snap);
            let entries = match rpm_meta::read_repomd(&base) {
                Ok(e) => e,
                Err(_) => continue,
            };
            let primary_href = match rpm_meta::find_primary(&entries) {
                Some(e) => e.href.clone(),
                None => continue,
            };
            let packages = match rpm_meta::read_primary(&base, &primary_href) {
                Ok(p) => p,
                Err(_) => continue,
            };
            for package in packages {
                let Ok(package) = package else { continue };
                let dst = base.join(&package.href);
                let src = sync_root.join(format!("{}.{}.{}", package.href, package.algo, package.hex));
                let _ = symlink_file(&src, &dst);
            }
        }

        std::fs::write(&migrated_marker, "migrated\n")?;
        Ok(())
    }

    fn revalidate(&self) -> Result<Vec<(PathBuf, String, Algo)>, RepoSyncError> {
        let sync_root = self.sync_root();
        let entries = match rpm_meta::read_repomd(&sync_root) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(reponame = %self.reponame, "no repodata found: {e}");
                return Ok(Vec::new());
            }
        };
        let Some(primary_href) = rpm_meta::find_primary(&entries).map(|e| e.href.clone()) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for package in rpm_meta::read_primary(&sync_root, &primary_href)? {
            let package = package?;
            let Some(algo) = Algo::parse(&package.algo) else {
                continue;
            };
            let path = sync_root.join(format!("{}.{}.{}", package.href, package.algo, package.hex));
            out.push((path, package.hex, algo));
        }
        Ok(out)
    }
}

impl RpmMirror {
    fn sync_packages(
        &self,
        fetcher: &Fetcher,
        repomd_entries: &[rpm_meta::RepomdEntry],
    ) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let primary_href = rpm_meta::find_primary(repomd_entries)
            .map(|e| e.href.clone())
            .ok_or_else(|| {
                crate::error::MetadataError::MissingPrimary(sync_root.join("repodata"))
            })?;

        for package in rpm_meta::read_primary(&sync_root, &primary_href)? {
            let package = package?;
            let dest = sync_root.join(format!("{}.{}.{}", package.href, package.algo, package.hex));
            let outcome = fetcher.fetch(
                &self.join_url(&package.href),
                &dest,
                &FetchOptions {
                    expected_digest: Some(package.hex.clone()),
                    algo: Algo::parse(&package.algo),
                    replace: false,
                    tolerate_missing: self.allow_missing_packages,
                },
            );
            match outcome {
                Ok(_) => {}
                Err(e) if self.allow_missing_packages => {
                    tracing::warn!(href = %package.href, "tolerating missing package: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn sync_treeinfo(&self, fetcher: &Fetcher) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let dest = sync_root.join(&self.treeinfo);
        let outcome = fetcher.fetch(
            &self.join_url(&self.treeinfo),
            &dest,
            &FetchOptions {
                replace: true,
                tolerate_missing: true,
                ..Default::default()
            },
        )?;
        if outcome == crate::fetcher::FetchOutcome::ToleratedMissing {
            return Ok(());
        }

        for entry in rpm_meta::read_treeinfo(&sync_root, &self.treeinfo) {
            if entry.path == "repodata/repomd.xml" {
                continue;
            }
            let dest = sync_root.join(&entry.path);
            let algo = entry.algo.as_deref().and_then(Algo::parse);
            fetcher.fetch(
                &self.join_url(&entry.path),
                &dest,
                &FetchOptions {
                    expected_digest: entry.hex.clone(),
                    algo,
                    replace: true,
                    tolerate_missing: false,
                },
            )?;
        }
        Ok(())
    }
}

fn copy_into(src: &std::path::Path, dst: &std::path::Path) -> Result<(), RepoSyncError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

#[cfg(unix)]
fn symlink_file(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    let _ = std::fs::remove_file(dst);
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink_file(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    let _ = std::fs::remove_file(dst);
    std::fs::copy(src, dst).map(|_| ())
}
