//! # Content Hashing
//!
//! Computes digests of upstream-declared package and metadata files and
//! compares them against the checksums published in `repomd.xml`,
//! `primary.xml`, `Release`, and `Packages.gz`. Upstream metadata is the
//! authority for which algorithm applies to a given file, so four
//! algorithms are supported side by side rather than standardizing on one.
//!
//! Streaming implementation throughout — a `primary.xml` can enumerate
//! packages hundreds of megabytes in size, and files are never buffered
//! whole into memory for hashing.

use crate::error::{HashError, RepoSyncError};
use sha2::Digest as _;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Size of the read buffer for streaming hash computation (64 KiB).
const BUF_SIZE: usize = 64 * 1024;

/// Checksum algorithms named in upstream metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algo {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algo {
    /// Parses an algorithm name as it appears in `repomd.xml`/`.treeinfo`
    /// checksum declarations. `sha` is accepted as an alias for `sha1`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Algo::Md5),
            "sha" | "sha1" => Some(Algo::Sha1),
            "sha256" => Some(Algo::Sha256),
            "sha512" => Some(Algo::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algo::Md5 => "md5",
            Algo::Sha1 => "sha1",
            Algo::Sha256 => "sha256",
            Algo::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for Algo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Incremental hasher state, abstracting over the four supported
/// algorithms behind a single `update`/`finish` interface.
enum Streaming {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Streaming {
    fn new(algo: Algo) -> Self {
        match algo {
            Algo::Md5 => Streaming::Md5(md5::Md5::new()),
            Algo::Sha1 => Streaming::Sha1(sha1::Sha1::new()),
            Algo::Sha256 => Streaming::Sha256(sha2::Sha256::new()),
            Algo::Sha512 => Streaming::Sha512(sha2::Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Streaming::Md5(h) => h.update(chunk),
            Streaming::Sha1(h) => h.update(chunk),
            Streaming::Sha256(h) => h.update(chunk),
            Streaming::Sha512(h) => h.update(chunk),
        }
    }

    fn finish_hex(self) -> String {
        match self {
            Streaming::Md5(h) => hex::encode(h.finalize()),
            Streaming::Sha1(h) => hex::encode(h.finalize()),
            Streaming::Sha256(h) => hex::encode(h.finalize()),
            Streaming::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes the hex digest of a file's contents under the given algorithm.
///
/// Reads the file in `BUF_SIZE` chunks so arbitrarily large blobs (RPM and
/// DEB packages routinely exceed available memory in aggregate) are never
/// loaded whole.
pub fn digest_file(path: &Path, algo: Algo) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Streaming::new(algo);
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let bytes_read = file.read(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buf[..bytes_read]);
    }

    Ok(hasher.finish_hex())
}

/// Computes the hex digest of in-memory data under the given algorithm.
pub fn digest_bytes(data: &[u8], algo: Algo) -> String {
    let mut hasher = Streaming::new(algo);
    hasher.update(data);
    hasher.finish_hex()
}

/// Verifies that `path`'s digest under `algo` equals `expected_hex`
/// (case-insensitive). Returns `HashError` on mismatch.
pub fn verify(path: &Path, expected_hex: &str, algo: Algo) -> Result<(), RepoSyncError> {
    let actual = digest_file(path, algo)?;
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(HashError {
            path: path.to_path_buf(),
            expected: expected_hex.to_string(),
            actual,
        }
        .into())
    }
}

/// Returns the first `n` characters of a hash for display purposes.
pub fn short_hash(hash: &str, n: usize) -> &str {
    &hash[..n.min(hash.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let h1 = digest_file(&path, Algo::Sha256).unwrap();
        let h2 = digest_file(&path, Algo::Sha256).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn known_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, b"").unwrap();
        let h = digest_file(&path, Algo::Sha256).unwrap();
        assert_eq!(
            h,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[test]
    fn algo_parse_aliases() {
        assert_eq!(Algo::parse("sha"), Some(Algo::Sha1));
        assert_eq!(Algo::parse("SHA256"), Some(Algo::Sha256));
        assert_eq!(Algo::parse("bogus"), None);
    }

    #[test]
    fn verify_detects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, b"data").unwrap();
        let wrong = "0".repeat(64);
        let result = verify(&path, &wrong, Algo::Sha256);
        assert!(result.is_err());
    }

    #[test]
    fn verify_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, b"data").unwrap();
        let hex = digest_file(&path, Algo::Sha256).unwrap();
        assert!(verify(&path, &hex.to_uppercase(), Algo::Sha256).is_ok());
    }

    #[test]
    fn short_hash_truncates() {
        let hash = "abcdefghij";
        assert_eq!(short_hash(hash, 4), "abcd");
    }
}
