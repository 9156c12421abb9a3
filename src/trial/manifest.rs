//! `checksums.sha256`, in `sha256sum` format
//!
//! One `<hex digest>  <relative path>` line per file. Blank lines and lines
//! starting with `#` are ignored. A `*` before the path (binary mode marker)
//! is accepted and dropped.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::TrialError;

pub const MANIFEST_FILE: &str = "checksums.sha256";

/// Prefix of run output directories, never part of the manifest
pub const RUN_DIR_PREFIX: &str = "run.";

/// Directory packages get unpacked into, never part of the manifest
pub const INST_DIR: &str = "inst";

/// Relative path -> hex SHA-256
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: BTreeMap<String, String>,
}

impl ChecksumManifest {
    pub fn parse(contents: &str) -> Result<Self, TrialError> {
        let mut entries = BTreeMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim_end();
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let malformed = |reason: &str| TrialError::Manifest {
                line: idx + 1,
                reason: reason.to_string(),
            };

            let (digest, path) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("expected '<sha256>  <path>'"))?;
            let path = path.trim_start();
            let path = path.strip_prefix('*').unwrap_or(path);

            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed("digest is not a SHA-256 hex string"));
            }
            if !is_safe_relative(path) {
                return Err(malformed("path must be relative and stay inside the trial"));
            }
            if entries
                .insert(path.to_string(), digest.to_ascii_lowercase())
                .is_some()
            {
                return Err(malformed("path listed twice"));
            }
        }
        Ok(Self { entries })
    }

    /// Digest every regular file below `dir`, skipping the manifest itself
    /// and run output and unpack directories.
    pub fn collect(dir: &Path) -> Result<Self, TrialError> {
        let mut entries = BTreeMap::new();
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() != 1 || !is_excluded(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| TrialError::Io {
                    path: entry.path().to_path_buf(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "outside trial"),
                })?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.insert(rel, file_sha256(entry.path())?);
        }
        Ok(Self { entries })
    }

    /// Render in `sha256sum` format, sorted by path
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(path, digest)| format!("{}  {}\n", digest, path))
            .collect()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_excluded(top_level_name: &str) -> bool {
    top_level_name == MANIFEST_FILE
        || top_level_name == INST_DIR
        || top_level_name.starts_with(RUN_DIR_PREFIX)
}

fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Hex SHA-256 of a file, streamed
pub fn file_sha256(path: &Path) -> Result<String, TrialError> {
    let io_err = |source| TrialError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_sha256sum_lines() {
        let text = format!("# packages\n\n{d}  osmo-bsc.tar\n{d} *bin/osmo-bts.tar\n", d = DIGEST);
        let manifest = ChecksumManifest::parse(&text).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.get("bin/osmo-bts.tar"), Some(DIGEST));
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(matches!(
            ChecksumManifest::parse("abc  file\n"),
            Err(TrialError::Manifest { line: 1, .. })
        ));
        let escape = format!("{}  ../etc/passwd\n", DIGEST);
        assert!(ChecksumManifest::parse(&escape).is_err());
        let twice = format!("{d}  a\n{d}  a\n", d = DIGEST);
        assert!(matches!(
            ChecksumManifest::parse(&twice),
            Err(TrialError::Manifest { line: 2, .. })
        ));
    }

    #[test]
    fn test_collect_skips_outputs_and_renders_sorted() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.tar"), b"b").unwrap();
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub").join("a.tar"), b"").unwrap();
        fs::write(temp.path().join(MANIFEST_FILE), b"old").unwrap();
        fs::create_dir_all(temp.path().join("run.20260101-000000")).unwrap();
        fs::write(temp.path().join("run.20260101-000000").join("log"), b"x").unwrap();
        fs::create_dir_all(temp.path().join(INST_DIR).join("b")).unwrap();
        fs::write(temp.path().join(INST_DIR).join("b").join("bin"), b"x").unwrap();

        let manifest = ChecksumManifest::collect(temp.path()).unwrap();
        let paths: Vec<&str> = manifest.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["b.tar", "sub/a.tar"]);
        assert_eq!(manifest.get("sub/a.tar"), Some(DIGEST));

        let reparsed = ChecksumManifest::parse(&manifest.render()).unwrap();
        assert_eq!(reparsed, manifest);
    }
}
