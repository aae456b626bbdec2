//! # Configuration
//!
//! Loads and validates the INI configuration file: a `[main]` section plus
//! one `[<name>:rpm]` or `[<name>:deb822]` section per mirrored repository.
//! Follows a search-then-parse-then-validate shape, one section at a time.

use crate::error::{ConfigError, RepoSyncError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration: global settings plus the repository set.
#[derive(Debug, Clone)]
pub struct Config {
    pub main: MainSettings,
    pub repositories: BTreeMap<String, Repository>,
}

/// `[main]` section settings.
#[derive(Debug, Clone)]
pub struct MainSettings {
    pub destination: PathBuf,
    pub downloaders: usize,
    pub loglevel: String,
    pub proxy: Option<String>,
}

/// A single configured repository, identified by `reponame` (the section
/// name with its `:rpm`/`:deb822` suffix stripped).
#[derive(Debug, Clone)]
pub struct Repository {
    pub reponame: String,
    pub base_url: String,
    pub allow_missing_packages: bool,
    pub tags: Vec<String>,
    pub tls: TlsConfig,
    pub basic_auth: Option<(String, String)>,
    pub flavor: Flavor,
}

/// TLS client identity / CA bundle, carried through to the fetcher.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

/// Flavor-specific repository parameters.
#[derive(Debug, Clone)]
pub enum Flavor {
    Rpm { treeinfo: String },
    Deb {
        suites: Vec<String>,
        components: Vec<String>,
        binary_archs: Vec<String>,
    },
}

impl Repository {
    pub fn flavor_name(&self) -> &'static str {
        match self.flavor {
            Flavor::Rpm { .. } => "rpm",
            Flavor::Deb { .. } => "deb",
        }
    }
}

const DEFAULT_TREEINFO: &str = ".treeinfo";

/// Loads and validates configuration from `path`.
pub fn load_config(path: &Path) -> Result<Config, RepoSyncError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()).into());
    }

    let ini = ini::Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let main = parse_main(&ini)?;
    let mut repositories = BTreeMap::new();

    for (section_name, props) in ini.iter() {
        let Some(name) = section_name else { continue };
        let (reponame, flavor_tag) = match split_suffix(name) {
            Some(v) => v,
            None => continue,
        };

        let base_url = props
            .get("baseurl")
            .ok_or_else(|| ConfigError::Validation {
                message: format!("section '{name}' is missing 'baseurl'"),
            })?
            .to_string();

        let allow_missing_packages = props
            .get("allow_missing_packages")
            .map(parse_bool)
            .unwrap_or(false);

        let tags = props
            .get("tags")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let tls = TlsConfig {
            client_cert: props.get("sslclientcert").map(PathBuf::from),
            client_key: props.get("sslclientkey").map(PathBuf::from),
            ca_cert: props.get("sslcacert").map(PathBuf::from),
        };

        let basic_auth = match (props.get("basic_auth_user"), props.get("basic_auth_pass")) {
            (Some(user), Some(pass)) => Some((user.to_string(), pass.to_string())),
            _ => None,
        };

        let flavor = match flavor_tag {
            "rpm" => Flavor::Rpm {
                treeinfo: props
                    .get("treeinfo")
                    .unwrap_or(DEFAULT_TREEINFO)
                    .to_string(),
            },
            "deb822" => Flavor::Deb {
                suites: split_whitespace_list(props.get("suites")),
                components: split_whitespace_list(props.get("components")),
                binary_archs: split_whitespace_list(props.get("binary_archs")),
            },
            _ => unreachable!("split_suffix only returns known flavor tags"),
        };

        let repo = Repository {
            reponame: reponame.to_string(),
            base_url,
            allow_missing_packages,
            tags,
            tls,
            basic_auth,
            flavor,
        };

        if repositories.insert(reponame.to_string(), repo).is_some() {
            return Err(ConfigError::DuplicateReponame(reponame.to_string()).into());
        }
    }

    for repo in repositories.values() {
        validate_repository(repo)?;
    }

    Ok(Config { main, repositories })
}

fn parse_main(ini: &ini::Ini) -> Result<MainSettings, RepoSyncError> {
    let section = ini.section(Some("main")).ok_or_else(|| ConfigError::Validation {
        message: "missing [main] section".to_string(),
    })?;

    let destination = section
        .get("destination")
        .ok_or_else(|| ConfigError::Validation {
            message: "[main] is missing 'destination'".to_string(),
        })?;

    let downloaders = section
        .get("downloaders")
        .map(|v| {
            v.parse::<usize>().map_err(|_| ConfigError::Validation {
                message: format!("invalid 'downloaders' value: {v:?}"),
            })
        })
        .transpose()?
        .unwrap_or(1);

    Ok(MainSettings {
        destination: PathBuf::from(destination),
        downloaders,
        loglevel: section.get("loglevel").unwrap_or("info").to_string(),
        proxy: section.get("proxy").map(str::to_string),
    })
}

fn validate_repository(repo: &Repository) -> Result<(), ConfigError> {
    if repo.base_url.is_empty() {
        return Err(ConfigError::Validation {
            message: format!("repository '{}' has an empty baseurl", repo.reponame),
        });
    }
    if repo.tls.client_cert.is_some() != repo.tls.client_key.is_some() {
        return Err(ConfigError::Validation {
            message: format!(
                "repository '{}' must set both sslclientcert and sslclientkey, or neither",
                repo.reponame
            ),
        });
    }
    if let Flavor::Deb { binary_archs, suites, .. } = &repo.flavor {
        if binary_archs.is_empty() {
            return Err(ConfigError::Validation {
                message: format!(
                    "repository '{}' (deb822) must declare at least one binary_archs entry",
                    repo.reponame
                ),
            });
        }
        if suites.is_empty() {
            return Err(ConfigError::Validation {
                message: format!(
                    "repository '{}' (deb822) must declare at least one suite",
                    repo.reponame
                ),
            });
        }
    }
    Ok(())
}

/// Splits `<name>:rpm` / `<name>:deb822` section names; returns `None` for
/// sections this tool does not recognize (e.g. `[main]`).
fn split_suffix(section: &str) -> Option<(&str, &str)> {
    for suffix in [":rpm", ":deb822"] {
        if let Some(name) = section.strip_suffix(suffix) {
            return Some((name, &suffix[1..]));
        }
    }
    None
}

fn split_whitespace_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Evaluates `--tags` filtering against a repository's configured tags.
/// A leading `!` negates a tag; at least one non-negated tag must match,
/// exactly as the original `validate_tags`.
pub fn tags_match(repo_tags: &[String], requested: &[String]) -> bool {
    for tag in requested {
        if let Some(negated) = tag.strip_prefix('!') {
            if repo_tags.iter().any(|t| t == negated) {
                return false;
            }
        } else if !repo_tags.iter().any(|t| t == tag) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reposync.ini");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_rpm_and_deb_repos() {
        let (_dir, path) = write_ini(
            "[main]\n\
             destination = /var/repo\n\
             downloaders = 4\n\
             \n\
             [centos9:rpm]\n\
             baseurl = https://mirror.example/centos/9/\n\
             treeinfo = .treeinfo\n\
             tags = prod,rpm\n\
             \n\
             [bookworm:deb822]\n\
             baseurl = https://mirror.example/debian/\n\
             suites = bookworm bookworm-updates\n\
             components = main\n\
             binary_archs = amd64 arm64\n",
        );

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.main.downloaders, 4);
        assert_eq!(cfg.repositories.len(), 2);

        let rpm = &cfg.repositories["centos9"];
        assert_eq!(rpm.tags, vec!["prod", "rpm"]);
        match &rpm.flavor {
            Flavor::Rpm { treeinfo } => assert_eq!(treeinfo, ".treeinfo"),
            _ => panic!("expected rpm flavor"),
        }

        let deb = &cfg.repositories["bookworm"];
        match &deb.flavor {
            Flavor::Deb { suites, binary_archs, .. } => {
                assert_eq!(suites, &["bookworm", "bookworm-updates"]);
                assert_eq!(binary_archs, &["amd64", "arm64"]);
            }
            _ => panic!("expected deb flavor"),
        }
    }

    #[test]
    fn duplicate_reponame_is_rejected() {
        let (_dir, path) = write_ini(
            "[main]\n\
             destination = /var/repo\n\
             \n\
             [dup:rpm]\n\
             baseurl = https://a/\n\
             \n\
             [dup:deb822]\n\
             baseurl = https://b/\n\
             binary_archs = amd64\n",
        );

        let result = load_config(&path);
        assert!(matches!(
            result,
            Err(RepoSyncError::Config(ConfigError::DuplicateReponame(_)))
        ));
    }

    #[test]
    fn missing_baseurl_is_invalid() {
        let (_dir, path) = write_ini("[main]\ndestination = /var/repo\n\n[x:rpm]\n");
        let result = load_config(&path);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_reports_not_found() {
        let result = load_config(Path::new("/nonexistent/reposync.ini"));
        assert!(matches!(
            result,
            Err(RepoSyncError::Config(ConfigError::NotFound(_)))
        ));
    }

    #[test]
    fn tag_matching_negation() {
        let repo_tags = vec!["prod".to_string(), "rpm".to_string()];
        assert!(tags_match(&repo_tags, &["prod".to_string()]));
        assert!(!tags_match(&repo_tags, &["!prod".to_string()]));
        assert!(!tags_match(&repo_tags, &["staging".to_string()]));
    }
}
