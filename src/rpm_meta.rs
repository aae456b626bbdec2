//! # RPM metadata reader
//!
//! Parses `repomd.xml`, the referenced `primary.xml[.gz|.bz2]`, and
//! `.treeinfo`, yielding content entries. `primary.xml` can run
//! to hundreds of megabytes, so it is parsed with a streaming `quick_xml`
//! reader rather than materialized as a DOM.

use crate::error::{MetadataError, RepoSyncError};
use crate::hasher::Algo;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// One `<data>` entry from `repomd.xml`: a metadata file and its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepomdEntry {
    pub href: String,
    pub algo: String,
    pub hex: String,
}

/// One `<package>` entry from `primary.xml`: a package file and its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryEntry {
    pub href: String,
    pub algo: String,
    pub hex: String,
}

/// One entry from `.treeinfo`: a relative path and an optional checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeinfoEntry {
    pub path: String,
    pub algo: Option<String>,
    pub hex: Option<String>,
}

const NS_REPO: &[u8] = b"http://linux.duke.edu/metadata/repo";
const NS_COMMON: &[u8] = b"http://linux.duke.edu/metadata/common";

/// Parses `<sync_root>/repodata/repomd.xml`, yielding one entry per
/// `<data>` child. Missing or malformed documents are a fatal
/// `MetadataError` for the repository.
pub fn read_repomd(sync_root: &Path) -> Result<Vec<RepomdEntry>, RepoSyncError> {
    let path = sync_root.join("repodata").join("repomd.xml");
    let content = std::fs::read_to_string(&path)
        .map_err(|_| MetadataError::MissingRepomd(path.clone()))?;

    let mut reader = Reader::from_str(&content);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();

    let mut cur_href: Option<String> = None;
    let mut cur_algo: Option<String> = None;
    let mut cur_hex: Option<String> = None;
    let mut in_data = false;
    let mut in_checksum = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let (_, local) = split_ns(e.name().as_ref());
                if local == b"data" {
                    in_data = true;
                    cur_href = None;
                    cur_algo = None;
                    cur_hex = None;
                } else if in_data && local == b"location" {
                    if let Some(attr) = find_attr(e, b"href") {
                        cur_href = Some(attr);
                    }
                } else if in_data && local == b"checksum" {
                    in_checksum = true;
                    if let Some(attr) = find_attr(e, b"type") {
                        cur_algo = Some(attr);
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                let (_, local) = split_ns(e.name().as_ref());
                if in_data && local == b"location" {
                    if let Some(attr) = find_attr(e, b"href") {
                        cur_href = Some(attr);
                    }
                }
            }
            Ok(Event::Text(t)) if in_checksum => {
                cur_hex = Some(
                    t.unescape()
                        .map_err(|e| MetadataError::MalformedXml {
                            path: path.clone(),
                            source: e,
                        })?
                        .trim()
                        .to_string(),
                );
            }
            Ok(Event::End(ref e)) => {
                let (_, local) = split_ns(e.name().as_ref());
                if local == b"checksum" {
                    in_checksum = false;
                } else if local == b"data" {
                    in_data = false;
                    if let (Some(href), Some(algo), Some(hex)) =
                        (cur_href.take(), cur_algo.take(), cur_hex.take())
                    {
                        entries.push(RepomdEntry { href, algo, hex });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MetadataError::MalformedXml {
                    path: path.clone(),
                    source: e,
                }
                .into())
            }
            _ => {}
        }
        buf.clear();
    }

    let _ = NS_REPO; // namespace checked structurally via local-name matching above
    Ok(entries)
}

/// Locates the `primary.xml[.gz|.bz2]` entry inside a parsed `repomd.xml`
/// (case-insensitive substring match on `href`).
pub fn find_primary<'a>(entries: &'a [RepomdEntry]) -> Option<&'a RepomdEntry> {
    entries
        .iter()
        .find(|e| e.href.to_ascii_lowercase().contains("primary.xml"))
}

/// Opens `primary.xml[.gz|.bz2]` under `sync_root` and streams `<package>`
/// entries, transparently decompressing by file extension. Returns an
/// iterator so callers never materialize the whole package list at once.
pub fn read_primary(
    sync_root: &Path,
    primary_href: &str,
) -> Result<PrimaryEntryIter<Box<dyn BufRead>>, RepoSyncError> {
    let path = sync_root.join(primary_href);
    let reader: Box<dyn BufRead> = open_decompressed(&path)?;
    Ok(PrimaryEntryIter::new(path, reader))
}

fn open_decompressed(path: &Path) -> Result<Box<dyn BufRead>, RepoSyncError> {
    let file = std::fs::File::open(path).map_err(|_| MetadataError::MissingPrimary(path.to_path_buf()))?;
    let lower = path.to_string_lossy().to_ascii_lowercase();
    if lower.ends_with(".gz") {
        Ok(Box::new(std::io::BufReader::new(flate2::read::GzDecoder::new(file))))
    } else if lower.ends_with(".bz2") {
        Ok(Box::new(std::io::BufReader::new(bzip2::read::BzDecoder::new(file))))
    } else {
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

/// Streaming iterator over `<package>` elements of `primary.xml`.
pub struct PrimaryEntryIter<R: BufRead> {
    path: PathBuf,
    reader: Reader<R>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> PrimaryEntryIter<R> {
    fn new(path: PathBuf, inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.trim_text(true);
        Self {
            path,
            reader,
            buf: Vec::new(),
            done: false,
        }
    }

    fn next_entry(&mut self) -> Result<Option<PrimaryEntry>, RepoSyncError> {
        if self.done {
            return Ok(None);
        }

        let mut cur_href: Option<String> = None;
        let mut cur_algo: Option<String> = None;
        let mut cur_hex: Option<String> = None;
        let mut in_package = false;
        let mut in_checksum = false;

        loop {
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(ref e)) => {
                    let (_, local) = split_ns(e.name().as_ref());
                    if local == b"package" {
                        in_package = true;
                    } else if in_package && local == b"checksum" {
                        in_checksum = true;
                        if let Some(attr) = find_attr(e, b"type") {
                            cur_algo = Some(attr);
                        }
                    } else if in_package && local == b"location" {
                        if let Some(attr) = find_attr(e, b"href") {
                            cur_href = Some(attr);
                        }
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    let (_, local) = split_ns(e.name().as_ref());
                    if in_package && local == b"location" {
                        if let Some(attr) = find_attr(e, b"href") {
                            cur_href = Some(attr);
                        }
                    }
                }
                Ok(Event::Text(t)) if in_checksum => {
                    cur_hex = Some(
                        t.unescape()
                            .map_err(|e| MetadataError::MalformedXml {
                                path: self.path.clone(),
                                source: e,
                            })?
                            .trim()
                            .to_string(),
                    );
                }
                Ok(Event::End(ref e)) => {
                    let (_, local) = split_ns(e.name().as_ref());
                    if local == b"checksum" {
                        in_checksum = false;
                    } else if local == b"package" {
                        self.buf.clear();
                        return match (cur_href, cur_algo, cur_hex) {
                            (Some(href), Some(algo), Some(hex)) => {
                                Ok(Some(PrimaryEntry { href, algo, hex }))
                            }
                            _ => Ok(None),
                        };
                    }
                }
                Ok(Event::Eof) => {
                    self.done = true;
                    self.buf.clear();
                    return Ok(None);
                }
                Err(e) => {
                    return Err(MetadataError::MalformedXml {
                        path: self.path.clone(),
                        source: e,
                    }
                    .into())
                }
                _ => {}
            }
            self.buf.clear();
        }
    }
}

impl<R: BufRead> Iterator for PrimaryEntryIter<R> {
    type Item = Result<PrimaryEntry, RepoSyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads `<sync_root>/<treeinfo>` (INI-like). Missing file yields an empty
/// vector, not an error.
pub fn read_treeinfo(sync_root: &Path, treeinfo_name: &str) -> Vec<TreeinfoEntry> {
    let path = sync_root.join(treeinfo_name);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let ini = match ini::Ini::load_from_str(&content) {
        Ok(ini) => ini,
        Err(_) => return Vec::new(),
    };

    if let Some(section) = ini.section(Some("checksums")) {
        let mut out = Vec::new();
        for (key, value) in section.iter() {
            if key == "repodata/repomd.xml" {
                continue;
            }
            if let Some((algo, hex)) = value.split_once(':') {
                out.push(TreeinfoEntry {
                    path: key.to_string(),
                    algo: Some(algo.to_string()),
                    hex: Some(hex.to_string()),
                });
            }
        }
        return out;
    }

    // Fallback: sections named `images-*` or `stage2*`, collecting every
    // option value as a bare filename with unknown hash.
    let mut seen = std::collections::BTreeSet::new();
    for (section_name, props) in ini.iter() {
        let Some(name) = section_name.as_ref() else {
            continue;
        };
        if name.starts_with("images-") || name.starts_with("stage2") {
            for (_, value) in props.iter() {
                seen.insert(value.to_string());
            }
        }
    }
    seen.into_iter()
        .map(|path| TreeinfoEntry {
            path,
            algo: None,
            hex: None,
        })
        .collect()
}

/// Parses an algo/hex pair from a [`RepomdEntry`]/[`PrimaryEntry`] into a
/// typed [`Algo`], falling back to treating unknown algo strings as
/// unverifiable (returns `None`).
pub fn parse_algo(name: &str) -> Option<Algo> {
    Algo::parse(name)
}

fn split_ns(qname: &[u8]) -> (Option<&[u8]>, &[u8]) {
    match qname.iter().position(|&b| b == b':') {
        Some(idx) => (Some(&qname[..idx]), &qname[idx + 1..]),
        None => (None, qname),
    }
}

fn find_attr(e: &quick_xml::events::BytesStart, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name {
            a.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn parses_repomd_entries() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "repodata/repomd.xml",
            r#"<?xml version="1.0"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <checksum type="sha256">aabbcc</checksum>
    <location href="repodata/primary.xml.gz"/>
  </data>
</repomd>"#,
        );

        let entries = read_repomd(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].href, "repodata/primary.xml.gz");
        assert_eq!(entries[0].algo, "sha256");
        assert_eq!(entries[0].hex, "aabbcc");

        let primary = find_primary(&entries).unwrap();
        assert!(primary.href.to_ascii_lowercase().contains("primary.xml"));
    }

    #[test]
    fn missing_repomd_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_repomd(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn parses_primary_packages_streaming() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "repodata/primary.xml",
            r#"<?xml version="1.0"?>
<metadata xmlns="http://linux.duke.edu/metadata/common">
  <package type="rpm">
    <checksum type="sha256">11</checksum>
    <location href="Packages/a.rpm"/>
  </package>
  <package type="rpm">
    <checksum type="sha256">22</checksum>
    <location href="Packages/b.rpm"/>
  </package>
</metadata>"#,
        );

        let entries: Vec<_> = read_primary(dir.path(), "repodata/primary.xml")
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].href, "Packages/a.rpm");
        assert_eq!(entries[1].hex, "22");
    }

    #[test]
    fn treeinfo_checksums_section() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            ".treeinfo",
            "[checksums]\nrepodata/repomd.xml = sha256:ignored\nimages/pxeboot/vmlinuz = sha256:deadbeef\n",
        );

        let entries = read_treeinfo(dir.path(), ".treeinfo");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "images/pxeboot/vmlinuz");
        assert_eq!(entries[0].hex.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn treeinfo_images_fallback() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            ".treeinfo",
            "[images-x86_64]\nkernel = images/pxeboot/vmlinuz\ninitrd = images/pxeboot/initrd.img\n",
        );

        let entries = read_treeinfo(dir.path(), ".treeinfo");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.algo.is_none()));
    }

    #[test]
    fn missing_treeinfo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let entries = read_treeinfo(dir.path(), ".treeinfo");
        assert!(entries.is_empty());
    }
}
