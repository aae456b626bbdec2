//! # Error Types
//!
//! Defines a structured error hierarchy for the mirror/snapshot engine using
//! `thiserror`. Each variant carries enough context for meaningful
//! diagnostics without exposing internal implementation details to the
//! caller: `DownloadError`, `HashError`, `MetadataError`, `NotFoundError`,
//! `ConfigError`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes in the sync engine.
#[derive(Error, Debug)]
pub enum RepoSyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("download error: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration parsing and validation errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("invalid configuration: {message}")]
    Validation { message: String },

    #[error("duplicate reponame '{0}' across configured repositories")]
    DuplicateReponame(String),

    #[error("--repo and --tags are mutually exclusive")]
    BothRepoAndTags,
}

/// Errors from the fetcher. Non-recoverable after the retry budget is
/// exhausted; fatal for the repository currently being synced.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("unexpected HTTP status {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("hash verification failed after retries: {0}")]
    HashExhausted(#[from] HashError),

    #[error("io error fetching {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read TLS material at {path}: {source}")]
    TlsFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not build TLS client identity from {cert}/{key}: {source}")]
    ClientIdentity {
        cert: PathBuf,
        key: PathBuf,
        #[source]
        source: native_tls::Error,
    },

    #[error("could not parse CA bundle at {path}: {source}")]
    CaBundle {
        path: PathBuf,
        #[source]
        source: native_tls::Error,
    },

    #[error("could not build TLS connector: {0}")]
    Connector(native_tls::Error),
}

/// Digest mismatch. Retried internally by the fetcher; surfaces as
/// `FetchError::HashExhausted` once the retry budget is spent, or is
/// reported per-file without aborting when observed during `validate`.
#[derive(Error, Debug)]
#[error("hash mismatch for {path}: expected {expected}, got {actual}")]
pub struct HashError {
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

/// Malformed or missing repository metadata. Fatal for the repository.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("missing or unreadable repomd.xml at {0}")]
    MissingRepomd(PathBuf),

    #[error("repomd.xml at {0} has no primary.xml entry")]
    MissingPrimary(PathBuf),

    #[error("malformed XML in {path}: {source}")]
    MalformedXml {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },

    #[error("missing or unreadable Release file at {0}")]
    MissingRelease(PathBuf),

    #[error("malformed Release file at {0}: {1}")]
    MalformedRelease(PathBuf, String),
}

/// Snapshot store errors.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("no such snapshot or alias: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepoSyncError>;
