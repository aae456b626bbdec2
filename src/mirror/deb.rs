//! Debian repository flavor: `dists/<suite>/Release` + per-arch
//! `Packages.gz`. Grounded on
//! `original_source/pyreposync/deb_sync.py`.

use super::Flavor;
use crate::deb_meta;
use crate::error::RepoSyncError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::hasher::Algo;
use std::path::PathBuf;

const RELEASE_FILES: &[&str] = &["InRelease", "Release", "Release.gpg"];

/// Binary package indices are only ever synced/validated/snapshotted for
/// this component, matching the original's `sync_package_binary_files`/
/// `snap_package_binary_files`, which hardcode it regardless of the
/// configured `components` list.
const MAIN_COMPONENT: &str = "main";

pub struct DebMirror {
    pub reponame: String,
    pub base_url: String,
    pub destination: PathBuf,
    pub suites: Vec<String>,
    pub components: Vec<String>,
    pub binary_archs: Vec<String>,
    pub allow_missing_packages: bool,
}

impl Flavor for DebMirror {
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
        for suite in &self.suites {
            self.sync_suite(fetcher, suite)?;
        }
        Ok(())
    }

    fn snapshot_content(&self, date: &str) -> Result<(), RepoSyncError> {
        for suite in &self.suites {
            self.snapshot_suite(date, suite)?;
        }
        Ok(())
    }

    fn revalidate(&self) -> Result<Vec<(PathBuf, String, Algo)>, RepoSyncError> {
        let sync_root = self.sync_root();
        let mut out = Vec::new();
        for suite in &self.suites {
            for arch in &self.binary_archs {
                let reader = match deb_meta::binary_files_sha256(&sync_root, suite, MAIN_COMPONENT, arch) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::error!(suite, component = MAIN_COMPONENT, arch, "no package index: {e}");
                        continue;
                    }
                };
                for record in reader {
                    let (filename, entry) = record.map_err(RepoSyncError::Io)?;
                    let path = sync_root.join(format!("{filename}.sha256.{}", entry.sha256));
                    out.push((path, entry.sha256, Algo::Sha256));
                }
            }
        }
        Ok(out)
    }
}

impl DebMirror {
    fn sync_suite(&self, fetcher: &Fetcher, suite: &str) -> Result<(), RepoSyncError> {
        tracing::info!(reponame = %self.reponame, suite, "syncing suite");
        let sync_root = self.sync_root();
        let suite_url = format!("{}dists/{suite}", self.base_url);
        let suite_path = sync_root.join("dists").join(suite);

        for release_file in RELEASE_FILES {
            fetcher.fetch(
                &format!("{suite_url}/{release_file}"),
                &suite_path.join(release_file),
                &FetchOptions {
                    replace: true,
                    tolerate_missing: true,
                    ..Default::default()
                },
            )?;
        }

        let release_files = deb_meta::release_files_sha256(&sync_root, suite)?;
        for (filename, entry) in &release_files {
            fetcher.fetch(
                &format!("{suite_url}/{filename}"),
                &suite_path.join(filename),
                &FetchOptions {
                    expected_digest: Some(entry.sha256.clone()),
                    algo: Some(Algo::Sha256),
                    replace: true,
                    tolerate_missing: true,
                },
            )?;
        }

        for arch in &self.binary_archs {
            self.sync_binary_files(fetcher, suite, MAIN_COMPONENT, arch)?;
        }

        tracing::info!(reponame = %self.reponame, suite, "syncing suite, done");
        Ok(())
    }

    fn sync_binary_files(
        &self,
        fetcher: &Fetcher,
        suite: &str,
        component: &str,
        arch: &str,
    ) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let reader = match deb_meta::binary_files_sha256(&sync_root, suite, component, arch) {
            Ok(r) => r,
            Err(e) if self.allow_missing_packages => {
                tracing::warn!(suite, component, arch, "no package index: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for record in reader {
            let (filename, entry) = record.map_err(|e| RepoSyncError::Io(e))?;
            let dest = sync_root.join(format!("{filename}.sha256.{}", entry.sha256));
            let outcome = fetcher.fetch(
                &format!("{}{filename}", self.base_url),
                &dest,
                &FetchOptions {
                    expected_digest: Some(entry.sha256.clone()),
                    algo: Some(Algo::Sha256),
                    replace: false,
                    tolerate_missing: self.allow_missing_packages,
                },
            );
            match outcome {
                Ok(_) => {}
                Err(e) if self.allow_missing_packages => {
                    tracing::warn!(filename, "tolerating missing package: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn snapshot_suite(&self, date: &str, suite: &str) -> Result<(), RepoSyncError> {
        tracing::info!(reponame = %self.reponame, suite, "creating snapshot for suite");
        let sync_root = self.sync_root();
        let snap_suite_root = self.snap_root(date).join("dists").join(suite);
        let sync_suite_root = sync_root.join("dists").join(suite);
        std::fs::create_dir_all(&snap_suite_root)?;

        for release_file in RELEASE_FILES {
            let src = sync_suite_root.join(release_file);
            let dst = snap_suite_root.join(release_file);
            if src.is_file() {
                std::fs::copy(&src, &dst)?;
            }
        }

        let release_files = deb_meta::release_files_sha256(&sync_root, suite)?;
        for filename in release_files.keys() {
            let src = sync_suite_root.join(filename);
            let dst = snap_suite_root.join(filename);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let _ = std::fs::copy(&src, &dst);
        }

        for arch in &self.binary_archs {
            self.snapshot_binary_files(date, suite, MAIN_COMPONENT, arch)?;
        }

        tracing::info!(reponame = %self.reponame, suite, "creating snapshot for suite, done");
        Ok(())
    }

    fn snapshot_binary_files(
        &self,
        date: &str,
        suite: &str,
        component: &str,
        arch: &str,
    ) -> Result<(), RepoSyncError> {
        let sync_root = self.sync_root();
        let snap_root = self.snap_root(date);
        let reader = match deb_meta::binary_files_sha256(&sync_root, suite, component, arch) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };

        for record in reader {
            let (filename, entry) = record.map_err(RepoSyncError::Io)?;
            let src = sync_root.join(format!("{filename}.sha256.{}", entry.sha256));
            let dst = snap_root.join(&filename);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Err(e) = symlink_file(&src, &dst) {
                tracing::error!(filename, "could not snapshot package: {e}");
            }
        }
        Ok(())
    }
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
