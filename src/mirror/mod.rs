//! # Mirror engine
//!
//! Drives one repository's `sync` (fetch upstream metadata and content into
//! `<destination>/sync/<reponame>`) and the flavor-specific half of `snap`
//! (copying or symlinking that content into a dated snapshot directory).
//! RPM and Debian repositories share everything else — path layout, the
//! `latest`/`named` alias machinery, cleanup — which lives in
//! [`crate::snapshot`]. Rather than a `SyncGeneric` base class the two
//! flavors implement the same small [`Flavor`] trait and are driven
//! uniformly by the runner and by `snapshot::snap`.

pub mod deb;
pub mod rpm;

use crate::config::Repository;
use crate::error::RepoSyncError;
use crate::fetcher::{Fetcher, FetcherConfig};
use std::path::{Path, PathBuf};

/// Operations a repository flavor must provide. `sync` populates the
/// content-addressed store under `sync_root()`; `snapshot_content` builds
/// the flavor-specific part of a dated snapshot tree; `migrate` performs
/// the one-shot layout migration (a no-op for flavors that never had a
/// legacy layout).
pub trait Flavor {
    fn reponame(&self) -> &str;
    fn sync_root(&self) -> PathBuf;
    fn snap_root(&self, date: &str) -> PathBuf;

    fn sync(&self, fetcher: &Fetcher) -> Result<(), RepoSyncError>;
    fn snapshot_content(&self, date: &str) -> Result<(), RepoSyncError>;

    fn migrate(&self) -> Result<(), RepoSyncError> {
        Ok(())
    }

    /// Returns every on-disk file this repository's metadata declares,
    /// along with the digest it's expected to match, for the `validate`
    /// verb to re-check without re-downloading anything.
    fn revalidate(&self) -> Result<Vec<(PathBuf, String, crate::hasher::Algo)>, RepoSyncError>;
}

/// Builds a [`Fetcher`] wired from a repository's configured transport
/// options (proxy, TLS identity, basic auth) plus the global proxy
/// fallback from `[main]`.
pub fn fetcher_for(repo: &Repository, global_proxy: &Option<String>) -> Result<Fetcher, RepoSyncError> {
    Fetcher::new(FetcherConfig {
        proxy: global_proxy.clone(),
        client_cert: repo.tls.client_cert.clone(),
        client_key: repo.tls.client_key.clone(),
        ca_cert: repo.tls.ca_cert.clone(),
        basic_auth: repo.basic_auth.clone(),
    })
}

/// Builds a concrete [`Flavor`] for a configured repository.
pub fn build(repo: &Repository, destination: &Path) -> Box<dyn Flavor> {
    match &repo.flavor {
        crate::config::Flavor::Rpm { treeinfo } => Box::new(rpm::RpmMirror {
            reponame: repo.reponame.clone(),
            base_url: repo.base_url.clone(),
            destination: destination.to_path_buf(),
            treeinfo: treeinfo.clone(),
            allow_missing_packages: repo.allow_missing_packages,
        }),
        crate::config::Flavor::Deb {
            suites,
            components,
            binary_archs,
        } => Box::new(deb::DebMirror {
            reponame: repo.reponame.clone(),
            base_url: repo.base_url.clone(),
            destination: destination.to_path_buf(),
            suites: suites.clone(),
            components: components.clone(),
            binary_archs: binary_archs.clone(),
            allow_missing_packages: repo.allow_missing_packages,
        }),
    }
}
