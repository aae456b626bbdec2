//! # Job runner
//!
//! A fixed pool of OS threads draining a shared job queue, one repository
//! at a time, with per-repository failure isolation: one repository's
//! error is logged and recorded, the rest of the queue keeps running, and
//! the process exit code reflects whether anything failed. Grounded on
//! `original_source/pyreposync/__init__.py`'s `RepoSyncThread`/`work()` —
//! `queue.pop()` there is a `collections.deque` shared across `threading.Thread`
//! workers; here it's the same `VecDeque` behind a `Mutex`, with
//! `std::thread` workers instead of Python threads.

use crate::config::Repository;
use crate::error::RepoSyncError;
use crate::hasher;
use crate::mirror;
use crate::snapshot;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// The verb being applied to every queued repository.
#[derive(Debug, Clone)]
pub enum Action {
    Sync,
    Snap,
    SnapCleanup,
    SnapList,
    SnapName { timestamp: String, snapname: String },
    SnapUnname { snapname: String },
    Validate,
    Migrate,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Sync => "sync",
            Action::Snap => "snap",
            Action::SnapCleanup => "snap_cleanup",
            Action::SnapList => "snap_list",
            Action::SnapName { .. } => "snap_name",
            Action::SnapUnname { .. } => "snap_unname",
            Action::Validate => "validate",
            Action::Migrate => "migrate",
        }
    }

    /// Only `sync` honors the configured worker count; every
    /// other verb runs with a single worker, matching the original's
    /// `num_worker = downloaders if method == 'sync' else 1`.
    fn worker_count(&self, downloaders: usize) -> usize {
        match self {
            Action::Sync => downloaders.max(1),
            _ => 1,
        }
    }
}

/// Shared, read-only context every worker needs to act on a repository.
#[derive(Clone)]
pub struct RunnerContext {
    pub destination: PathBuf,
    pub global_proxy: Option<String>,
    pub date: String,
}

/// The outcome of running one action against one repository: a failure
/// (if any) plus any display lines produced (used by `snap_list` and
/// `validate`, which report per-file detail without aborting the job).
pub struct JobResult {
    pub reponame: String,
    pub error: Option<RepoSyncError>,
    pub lines: Vec<String>,
}

/// Runs `action` against every repository in `repos`, fanned out across a
/// worker pool sized per [`Action::worker_count`]. Returns the process
/// exit code (`0` if every repository succeeded, `1` otherwise) and the
/// per-repository results in completion order.
pub fn run(
    repos: Vec<Repository>,
    action: Action,
    ctx: RunnerContext,
    downloaders: usize,
) -> (i32, Vec<JobResult>) {
    let worker_count = action.worker_count(downloaders);
    let queue = Arc::new(Mutex::new(VecDeque::from(repos)));
    let status = Arc::new(AtomicI32::new(0));
    let results = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let queue = Arc::clone(&queue);
        let status = Arc::clone(&status);
        let results = Arc::clone(&results);
        let action = action.clone();
        let ctx = ctx.clone();
        handles.push(std::thread::spawn(move || worker_loop(queue, action, ctx, status, results)));
    }
    for handle in handles {
        let _ = handle.join();
    }

    let results = Arc::try_unwrap(results)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();
    (status.load(Ordering::SeqCst), results)
}

fn worker_loop(
    queue: Arc<Mutex<VecDeque<Repository>>>,
    action: Action,
    ctx: RunnerContext,
    status: Arc<AtomicI32>,
    results: Arc<Mutex<Vec<JobResult>>>,
) {
    loop {
        let repo = {
            let mut q = queue.lock().unwrap();
            q.pop_front()
        };
        let Some(repo) = repo else { break };

        tracing::info!(action = action.name(), reponame = %repo.reponame, "start repo");
        let mut lines = Vec::new();
        let outcome = execute(&repo, &action, &ctx, &mut lines);
        match &outcome {
            Ok(()) => {
                tracing::info!(action = action.name(), reponame = %repo.reponame, "done repo");
            }
            Err(e) => {
                tracing::error!(action = action.name(), reponame = %repo.reponame, "could not complete: {e}");
                status.store(1, Ordering::SeqCst);
            }
        }

        results.lock().unwrap().push(JobResult {
            reponame: repo.reponame.clone(),
            error: outcome.err(),
            lines,
        });
    }
}

fn execute(
    repo: &Repository,
    action: &Action,
    ctx: &RunnerContext,
    lines: &mut Vec<String>,
) -> Result<(), RepoSyncError> {
    match action {
        Action::Sync => {
            let fetcher = mirror::fetcher_for(repo, &ctx.global_proxy)?;
            let flavor = mirror::build(repo, &ctx.destination);
            flavor.sync(&fetcher)
        }
        Action::Snap => {
            let flavor = mirror::build(repo, &ctx.destination);
            snapshot::snap(&ctx.destination, &repo.reponame, &ctx.date, flavor.as_ref())
        }
        Action::SnapCleanup => snapshot::snap_cleanup(&ctx.destination, &repo.reponame),
        Action::SnapName { timestamp, snapname } => {
            snapshot::snap_name(&ctx.destination, &repo.reponame, timestamp, snapname)
        }
        Action::SnapUnname { snapname } => {
            snapshot::snap_unname(&ctx.destination, &repo.reponame, snapname)
        }
        Action::Migrate => crate::migrate::migrate_repository(repo, &ctx.destination),
        Action::SnapList => {
            lines.push(format!("Repository: {}", repo.reponame));
            lines.push("The following timestamp snapshots exist:".to_string());
            let referenced = snapshot::referenced_timestamps(&ctx.destination, &repo.reponame);
            for ts in snapshot::timestamp_snapshots(&ctx.destination, &repo.reponame) {
                let aliases = referenced.get(&ts).cloned().unwrap_or_default();
                lines.push(format!("  {ts} -> {aliases:?}"));
            }
            lines.push("The following named snapshots exist:".to_string());
            for name in snapshot::named_snapshots(&ctx.destination, &repo.reponame) {
                let target = referenced
                    .iter()
                    .find(|(_, aliases)| aliases.contains(&format!("named/{name}")))
                    .map(|(ts, _)| ts.clone());
                lines.push(format!("  named/{name} -> {target:?}"));
            }
            let latest = referenced
                .iter()
                .find(|(_, aliases)| aliases.contains(&"latest".to_string()))
                .map(|(ts, _)| ts.clone());
            lines.push(format!("  latest -> {latest:?}"));
            Ok(())
        }
        Action::Validate => {
            let flavor = mirror::build(repo, &ctx.destination);
            let entries = flavor.revalidate()?;
            for (path, expected, algo) in entries {
                if !path.is_file() {
                    lines.push(format!("file not found: {}", path.display()));
                    continue;
                }
                if let Err(e) = hasher::verify(&path, &expected, algo) {
                    tracing::error!(path = %path.display(), "hash mismatch: {e}");
                    lines.push(format!("hash mismatch: {}", path.display()));
                }
            }
            Ok(())
        }
    }
}
