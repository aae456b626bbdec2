//! # Migrator
//!
//! Drives the one-shot migration of a legacy `sync/<reponame>/<path>`
//! layout into the content-addressed `<path>.<algo>.<hex>` naming used by
//! the mirror engine, plus the matching repoint of existing snapshot
//! symlinks. Flavor-specific (currently only RPM repositories had a
//! pre-content-addressed layout); Debian repositories have always used the
//! content-addressed naming, so their `Flavor::migrate` is a no-op.
//! Grounded on `original_source/pyreposync/sync_rpm.py::migrate`.

use crate::config::Repository;
use crate::error::RepoSyncError;
use crate::mirror;
use std::path::Path;

/// Runs migration for a single repository. Idempotent: a `migrated`
/// sentinel file under the repository's sync root short-circuits repeat
/// runs.
pub fn migrate_repository(repo: &Repository, destination: &Path) -> Result<(), RepoSyncError> {
    let flavor = mirror::build(repo, destination);
    flavor.migrate()
}
