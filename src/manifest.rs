//! The manifest reader: parses a package manifest file (the `scripts` and
//! `wireit` sections) and caches the parsed tree by package directory, the
//! way `cargo`'s `Config` caches parsed TOML config files for the lifetime
//! of one run (`util/config/mod.rs`) and `ops/cargo_read_manifest.rs` reads
//! a manifest relative to a directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Diagnostic, DiagnosticKind, SourcePosition};
use crate::pool::Semaphore;

pub const MANIFEST_FILE_NAME: &str = "package.json";
pub const WIREIT_RUNNER_COMMAND: &str = "wireit";

/// Raw, barely-typed view of one manifest file: enough structure to drive
/// validation, but `wireit` configs are kept as untyped JSON until the
/// analyzer validates and upgrades them (mirrors `cargo`'s two-step
/// "read, then validate/decode" split in `util/config/mod.rs`).
#[derive(Clone, Debug, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub scripts: Option<HashMap<String, String>>,
    #[serde(default)]
    pub wireit: Option<HashMap<String, Value>>,
}

/// One successfully parsed manifest, plus the absolute path it was read
/// from (used to anchor diagnostics).
#[derive(Clone, Debug)]
pub struct Manifest {
    pub package_dir: PathBuf,
    pub path: PathBuf,
    pub raw: Arc<RawManifest>,
}

impl Manifest {
    pub fn script_command(&self, name: &str) -> Option<&str> {
        self.raw
            .scripts
            .as_ref()
            .and_then(|s| s.get(name))
            .map(|s| s.as_str())
    }

    pub fn wireit_config(&self, name: &str) -> Option<&Value> {
        self.raw.wireit.as_ref().and_then(|w| w.get(name))
    }

    pub fn position(&self) -> SourcePosition {
        SourcePosition {
            file: self.path.clone(),
            line: 1,
            column: 1,
        }
    }
}

/// Caches parsed manifests by canonicalized package directory so that the
/// analyzer's parallel placeholder walk never re-reads the same file twice,
/// even when many scripts in different packages depend on it. Manifest
/// reads go through `fd_pool`, the same kind of file-descriptor budget
/// semaphore the executor uses for hashing (spec §5: "everything else...
/// is unbounded but limited by a separate file-descriptor budget
/// semaphore"), so a package tree with many manifests can't open
/// unboundedly many files at once during the analyzer's parallel walk.
pub struct ManifestReader {
    cache: Mutex<HashMap<PathBuf, Arc<ManifestResult>>>,
    fd_pool: Semaphore,
}

type ManifestResult = Result<Manifest, Diagnostic>;

impl Default for ManifestReader {
    fn default() -> Self {
        ManifestReader {
            cache: Mutex::new(HashMap::new()),
            fd_pool: Semaphore::new(crate::pool::default_file_descriptor_capacity()),
        }
    }
}

impl ManifestReader {
    pub fn new() -> Self {
        ManifestReader::default()
    }

    /// Discards every cached manifest. Called by the watcher whenever a
    /// manifest file changes, forcing the next analysis to re-read
    /// everything from disk.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }

    pub fn invalidate(&self, package_dir: &Path) {
        self.cache.lock().unwrap().remove(package_dir);
    }

    /// Reads and parses the manifest for `package_dir`, or returns the
    /// cached result from a previous call.
    pub fn read(&self, package_dir: &Path) -> Arc<ManifestResult> {
        let key = normalize(package_dir);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return Arc::clone(cached);
        }
        let result = Arc::new(self.read_uncached(&key));
        self.cache
            .lock()
            .unwrap()
            .insert(key, Arc::clone(&result));
        result
    }

    fn read_uncached(&self, package_dir: &Path) -> ManifestResult {
        let path = package_dir.join(MANIFEST_FILE_NAME);
        let pos = SourcePosition {
            file: path.clone(),
            line: 1,
            column: 1,
        };
        let _permit = self.fd_pool.acquire();
        let contents = fs::read_to_string(&path).map_err(|_| {
            Diagnostic::error(
                DiagnosticKind::MissingPackageJson,
                format!("no {MANIFEST_FILE_NAME} in {}", package_dir.display()),
            )
            .at(pos.clone())
        })?;
        let raw: RawManifest = serde_json::from_str(&contents).map_err(|e| {
            Diagnostic::error(
                DiagnosticKind::InvalidJsonSyntax,
                format!("invalid JSON in {}: {e}", path.display()),
            )
            .at(pos.clone())
        })?;
        if raw.scripts.is_none() {
            return Err(Diagnostic::error(
                DiagnosticKind::NoScriptsInPackageJson,
                format!("{} has no \"scripts\" section", path.display()),
            )
            .at(pos));
        }
        Ok(Manifest {
            package_dir: package_dir.to_path_buf(),
            path,
            raw: Arc::new(raw),
        })
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// The set of lockfile basenames implicitly added as inputs when `files` is
/// declared and package-lock checking is not disabled.
pub const DEFAULT_PACKAGE_LOCKS: &[&str] = &["package-lock.json"];
