//! Trials: a directory of software packages under test
//!
//! A trial directory carries a `checksums.sha256` manifest for every package
//! it ships. Nothing is unpacked or run before the manifest verifies. Each
//! invocation gets its own `run.<timestamp>` output directory and records
//! the suite runs executed against the trial.

mod manifest;

pub use manifest::{file_sha256, ChecksumManifest, INST_DIR, MANIFEST_FILE, RUN_DIR_PREFIX};

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::state::TestStatus;
use crate::suite::SuiteRun;

/// Trial errors
#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error("trial directory not found: {0}")]
    NotFound(PathBuf),

    #[error("file listed in {} is missing: {path}", MANIFEST_FILE)]
    MissingFile { path: String },

    #[error("checksum mismatch for {path}: expected {expected}, actual {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{}:{line}: {reason}", MANIFEST_FILE)]
    Manifest { line: usize, reason: String },

    #[error("no package matching '{name}*.tar' in the trial")]
    PackageNotFound { name: String },

    #[error("package '{name}' is ambiguous: {candidates:?}")]
    AmbiguousPackage { name: String, candidates: Vec<String> },

    #[error("trial has not been verified")]
    NotVerified,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk trial directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl TrialError {
    fn io(path: &Path, source: io::Error) -> Self {
        TrialError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Overall trial status from its suite run statuses.
///
/// FAIL if any run failed, PASS if at least one passed and none failed,
/// UNKNOWN otherwise.
pub fn trial_status(runs: impl IntoIterator<Item = TestStatus>) -> TestStatus {
    let mut any_pass = false;
    for status in runs {
        match status {
            TestStatus::Fail | TestStatus::Error => return TestStatus::Fail,
            TestStatus::Pass => any_pass = true,
            TestStatus::Unknown | TestStatus::Skip => {}
        }
    }
    if any_pass {
        TestStatus::Pass
    } else {
        TestStatus::Unknown
    }
}

#[derive(Debug)]
pub struct Trial {
    dir: PathBuf,
    name: String,
    manifest: ChecksumManifest,
    verified: bool,
    run_dir: Option<PathBuf>,
    suite_runs: Vec<SuiteRun>,
    started_at: DateTime<Utc>,
}

impl Trial {
    /// Open a trial directory and parse its manifest
    pub fn open(dir: &Path) -> Result<Self, TrialError> {
        if !dir.is_dir() {
            return Err(TrialError::NotFound(dir.to_path_buf()));
        }
        let manifest_path = dir.join(MANIFEST_FILE);
        let contents =
            fs::read_to_string(&manifest_path).map_err(|e| TrialError::io(&manifest_path, e))?;
        let manifest = ChecksumManifest::parse(&contents)?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        debug!(trial = %name, files = manifest.len(), "Opened trial");
        Ok(Self {
            dir: dir.to_path_buf(),
            name,
            manifest,
            verified: false,
            run_dir: None,
            suite_runs: Vec::new(),
            started_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &ChecksumManifest {
        &self.manifest
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Check every manifest entry against the file on disk.
    ///
    /// Entries are checked in path order; the first failure is returned.
    pub fn verify(&mut self) -> Result<(), TrialError> {
        for (rel, expected) in self.manifest.iter() {
            let path = rel
                .split('/')
                .fold(self.dir.clone(), |acc, part| acc.join(part));
            if !path.is_file() {
                return Err(TrialError::MissingFile {
                    path: rel.to_string(),
                });
            }
            let actual = file_sha256(&path)?;
            if actual != expected {
                return Err(TrialError::ChecksumMismatch {
                    path: rel.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        info!(trial = %self.name, files = self.manifest.len(), "Trial verified");
        self.verified = true;
        Ok(())
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Regenerate the manifest from the directory contents
    pub fn write_manifest(dir: &Path) -> Result<ChecksumManifest, TrialError> {
        let manifest = ChecksumManifest::collect(dir)?;
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, manifest.render()).map_err(|e| TrialError::io(&path, e))?;
        info!(path = %path.display(), files = manifest.len(), "Wrote trial manifest");
        Ok(manifest)
    }

    /// Locate the package archive for `name`: a manifest entry whose file
    /// name starts with `name` and ends in `.tar`.
    pub fn package(&self, name: &str) -> Result<PathBuf, TrialError> {
        let candidates: Vec<&str> = self
            .manifest
            .iter()
            .map(|(path, _)| path)
            .filter(|path| {
                let file = path.rsplit('/').next().unwrap_or(path);
                file.starts_with(name) && file.ends_with(".tar")
            })
            .collect();

        match candidates.as_slice() {
            [] => Err(TrialError::PackageNotFound {
                name: name.to_string(),
            }),
            [single] => Ok(single
                .split('/')
                .fold(self.dir.clone(), |acc, part| acc.join(part))),
            many => Err(TrialError::AmbiguousPackage {
                name: name.to_string(),
                candidates: many.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    /// Extract a package into `inst/<name>`, replacing earlier contents.
    ///
    /// Requires a successful `verify` first.
    pub fn unpack(&self, name: &str) -> Result<PathBuf, TrialError> {
        if !self.verified {
            return Err(TrialError::NotVerified);
        }
        let archive_path = self.package(name)?;
        let dest = self.dir.join(INST_DIR).join(name);
        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|e| TrialError::io(&dest, e))?;
        }
        fs::create_dir_all(&dest).map_err(|e| TrialError::io(&dest, e))?;

        let file = File::open(&archive_path).map_err(|e| TrialError::io(&archive_path, e))?;
        tar::Archive::new(file)
            .unpack(&dest)
            .map_err(|e| TrialError::io(&archive_path, e))?;

        info!(package = %name, dest = %dest.display(), "Unpacked package");
        Ok(dest)
    }

    /// Create a fresh `run.<UTC timestamp>` output directory and make it
    /// the current one
    pub fn new_run_dir(&mut self) -> Result<PathBuf, TrialError> {
        let base = format!("{}{}", RUN_DIR_PREFIX, Utc::now().format("%Y%m%d-%H%M%S"));
        let mut attempt = 0u32;
        let dir = loop {
            let candidate = if attempt == 0 {
                self.dir.join(&base)
            } else {
                self.dir.join(format!("{}.{}", base, attempt))
            };
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(TrialError::io(&candidate, e)),
            }
        };
        debug!(dir = %dir.display(), "Created run directory");
        self.run_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Most recently created run directory
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    pub fn add_suite_run(&mut self, run: SuiteRun) {
        self.suite_runs.push(run);
    }

    pub fn suite_runs(&self) -> &[SuiteRun] {
        &self.suite_runs
    }

    pub fn status(&self) -> TestStatus {
        trial_status(self.suite_runs.iter().map(SuiteRun::status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_tar(path: &Path, entry: &str, contents: &[u8]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry, contents).unwrap();
        builder.into_inner().unwrap().flush().unwrap();
    }

    fn trial_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        make_tar(&temp.path().join("osmo-bsc.build-23.tar"), "bin/osmo-bsc", b"#!/bin/sh\n");
        make_tar(&temp.path().join("osmo-msc.build-7.tar"), "bin/osmo-msc", b"msc");
        Trial::write_manifest(temp.path()).unwrap();
        temp
    }

    #[test]
    fn test_verify_and_unpack() {
        let temp = trial_dir();
        let mut trial = Trial::open(temp.path()).unwrap();
        assert!(matches!(trial.unpack("osmo-bsc"), Err(TrialError::NotVerified)));

        trial.verify().unwrap();
        let dest = trial.unpack("osmo-bsc").unwrap();
        assert_eq!(dest, temp.path().join(INST_DIR).join("osmo-bsc"));
        assert_eq!(fs::read(dest.join("bin/osmo-bsc")).unwrap(), b"#!/bin/sh\n");
    }

    #[test]
    fn test_verify_detects_changed_file() {
        let temp = trial_dir();
        let path = temp.path().join("osmo-msc.build-7.tar");
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let mut trial = Trial::open(temp.path()).unwrap();
        match trial.verify() {
            Err(TrialError::ChecksumMismatch { path, expected, actual }) => {
                assert_eq!(path, "osmo-msc.build-7.tar");
                assert_ne!(expected, actual);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert!(!trial.is_verified());
    }

    #[test]
    fn test_verify_detects_missing_file() {
        let temp = trial_dir();
        fs::remove_file(temp.path().join("osmo-bsc.build-23.tar")).unwrap();
        let mut trial = Trial::open(temp.path()).unwrap();
        assert!(matches!(
            trial.verify(),
            Err(TrialError::MissingFile { ref path }) if path == "osmo-bsc.build-23.tar"
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(Trial::open(temp.path()), Err(TrialError::Io { .. })));
        assert!(matches!(
            Trial::open(&temp.path().join("nope")),
            Err(TrialError::NotFound(_))
        ));
    }

    #[test]
    fn test_package_lookup() {
        let temp = trial_dir();
        make_tar(&temp.path().join("osmo-bsc-extra.tar"), "x", b"x");
        Trial::write_manifest(temp.path()).unwrap();
        let trial = Trial::open(temp.path()).unwrap();
        assert!(matches!(
            trial.package("osmo-bsc"),
            Err(TrialError::AmbiguousPackage { .. })
        ));
        assert!(trial.package("osmo-msc").is_ok());
        assert!(matches!(
            trial.package("osmo-hlr"),
            Err(TrialError::PackageNotFound { .. })
        ));
    }

    #[test]
    fn test_run_dirs_are_distinct_and_excluded_from_manifest() {
        let temp = trial_dir();
        let mut trial = Trial::open(temp.path()).unwrap();
        assert!(trial.run_dir().is_none());
        let first = trial.new_run_dir().unwrap();
        let second = trial.new_run_dir().unwrap();
        assert!(first.is_dir() && second.is_dir());
        assert_ne!(first, second);
        assert_eq!(trial.run_dir(), Some(second.as_path()));
        assert!(first
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(RUN_DIR_PREFIX));

        fs::write(first.join("log"), b"output").unwrap();
        let manifest = ChecksumManifest::collect(temp.path()).unwrap();
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_trial_status_rules() {
        use TestStatus::*;
        assert_eq!(trial_status([]), Unknown);
        assert_eq!(trial_status([Pass, Unknown]), Pass);
        assert_eq!(trial_status([Pass, Fail]), Fail);
        assert_eq!(trial_status([Unknown, Unknown]), Unknown);
        assert_eq!(trial_status([Error]), Fail);
    }
}
