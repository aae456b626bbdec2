//! # Debian metadata reader
//!
//! Parses Debian `Release` (deb822) for its `SHA256:` index block, and
//! per-arch `Packages.gz` for package checksums. `Packages.gz`
//! can run to hundreds of megabytes, so it is read as a line-at-a-time
//! stream rather than buffered whole.

use crate::error::{MetadataError, RepoSyncError};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A file's declared size and sha256 digest, as published by upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sha256Entry {
    pub sha256: String,
    pub size: u64,
}

/// Reads `<sync_root>/dists/<suite>/Release`, locating the block that
/// begins with a `SHA256:` line. Subsequent indented lines are split into
/// `<hex> <size> <relative-path>` tokens; the block ends at the first
/// non-indented line.
pub fn release_files_sha256(
    sync_root: &Path,
    suite: &str,
) -> Result<BTreeMap<String, Sha256Entry>, RepoSyncError> {
    let path = sync_root.join("dists").join(suite).join("Release");
    let content =
        std::fs::read_to_string(&path).map_err(|_| MetadataError::MissingRelease(path.clone()))?;

    let mut result = BTreeMap::new();
    let mut in_section = false;

    for line in content.lines() {
        if line.starts_with("SHA256:") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some(stripped) = line.strip_prefix(' ') {
            let mut tokens = stripped.split_whitespace();
            let (hex, size, filename) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(h), Some(s), Some(f)) => (h, s, f),
                _ => {
                    return Err(MetadataError::MalformedRelease(
                        path.clone(),
                        format!("expected 3 tokens in SHA256 line, got: {stripped:?}"),
                    )
                    .into())
                }
            };
            let size: u64 = size.parse().map_err(|_| {
                MetadataError::MalformedRelease(path.clone(), format!("invalid size: {size:?}"))
            })?;
            result.insert(
                filename.to_string(),
                Sha256Entry {
                    sha256: hex.to_string(),
                    size,
                },
            );
        } else {
            break;
        }
    }

    Ok(result)
}

/// Streams `<sync_root>/dists/<suite>/<component>/binary-<arch>/Packages.gz`,
/// yielding a `(filename, Sha256Entry)` pair as soon as a record's
/// `SHA256`, `Filename`, and `Size` fields have all been seen, then resets
/// to accumulate the next record.
pub fn binary_files_sha256(
    sync_root: &Path,
    suite: &str,
    component: &str,
    arch: &str,
) -> Result<PackagesIndexReader<flate2::read::GzDecoder<std::fs::File>>, RepoSyncError> {
    let path = sync_root
        .join("dists")
        .join(suite)
        .join(component)
        .join(format!("binary-{arch}"))
        .join("Packages.gz");
    let file = std::fs::File::open(&path).map_err(|_| MetadataError::MissingRelease(path.clone()))?;
    let decoder = flate2::read::GzDecoder::new(file);
    Ok(PackagesIndexReader::new(decoder))
}

/// Streaming iterator over `Packages.gz` records.
pub struct PackagesIndexReader<R> {
    lines: std::io::Lines<BufReader<R>>,
    sha256: Option<String>,
    filename: Option<String>,
    size: Option<u64>,
}

impl<R: std::io::Read> PackagesIndexReader<R> {
    fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
            sha256: None,
            filename: None,
            size: None,
        }
    }

    fn reset(&mut self) {
        self.sha256 = None;
        self.filename = None;
        self.size = None;
    }
}

impl<R: std::io::Read> Iterator for PackagesIndexReader<R> {
    type Item = std::io::Result<(String, Sha256Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(e)),
            };

            if let Some(v) = line.strip_prefix("SHA256: ") {
                self.sha256 = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("Filename: ") {
                self.filename = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("Size: ") {
                self.size = v.trim().parse().ok();
            }

            if let (Some(sha256), Some(filename), Some(size)) =
                (self.sha256.clone(), self.filename.clone(), self.size)
            {
                self.reset();
                return Some(Ok((filename, Sha256Entry { sha256, size })));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn parses_release_sha256_block() {
        let dir = tempfile::tempdir().unwrap();
        let release = "Origin: test\n\
             SHA256:\n \
             aabbcc 123 main/binary-amd64/Packages.gz\n \
             ddeeff 456 main/binary-amd64/Release\n\
             SHA1:\n \
             1122 123 main/binary-amd64/Packages.gz\n";
        write(dir.path(), "dists/stable/Release", release.as_bytes());

        let entries = release_files_sha256(dir.path(), "stable").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries.get("main/binary-amd64/Packages.gz").unwrap().sha256,
            "aabbcc"
        );
        assert_eq!(entries.get("main/binary-amd64/Release").unwrap().size, 456);
    }

    #[test]
    fn missing_release_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = release_files_sha256(dir.path(), "stable");
        assert!(result.is_err());
    }

    #[test]
    fn streams_packages_gz_records() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "Package: foo\n\
             Filename: pool/f/foo_1.0_amd64.deb\n\
             Size: 100\n\
             SHA256: abc123\n\
             \n\
             Package: bar\n\
             SHA256: def456\n\
             Filename: pool/b/bar_2.0_amd64.deb\n\
             Size: 200\n";

        let path = dir.path().join("Packages.gz");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(raw.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let dists_dir = dir.path().join("dists/stable/main/binary-amd64");
        std::fs::create_dir_all(&dists_dir).unwrap();
        std::fs::copy(&path, dists_dir.join("Packages.gz")).unwrap();

        let reader = binary_files_sha256(dir.path(), "stable", "main", "amd64").unwrap();
        let entries: Vec<_> = reader.collect::<std::io::Result<Vec<_>>>().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "pool/f/foo_1.0_amd64.deb");
        assert_eq!(entries[0].1.sha256, "abc123");
        assert_eq!(entries[1].1.size, 200);
    }
}
