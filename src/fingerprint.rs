//! Content-addressed fingerprinting.
//!
//! Grounded directly on `ops/cargo_rustc/fingerprint.rs`: a fingerprint is
//! built from "extra" salt data (here: platform, architecture, runtime
//! version, command, extra args, env) plus the recursively computed
//! fingerprints of cascading dependencies, resolved to a single hash. Two
//! deliberate differences, both noted in DESIGN.md: wireit has no dep-info
//! file to wait on, so `files` globs are hashed by content rather than
//! compared by mtime; and the resolved value keeps its component parts
//! around (rather than discarding them once hashed) so [`Fingerprint::difference`]
//! can explain *why* two fingerprints differ, not just that they do. The
//! platform/architecture/runtime-version salt mirrors `cargo`'s own
//! `rustc -vV` commit-hash inclusion: a fingerprint from one machine or one
//! Node.js version should not be considered fresh on another.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{CleanPolicy, GlobPattern, ScriptConfig, ScriptKind};
use crate::error::{internal, WireitResult};
use crate::pool::Semaphore;
use crate::reference::ScriptReference;

/// The part of a fingerprint that identifies *where* it was produced,
/// cached once per process since it never changes mid-run. Mirrors
/// `cargo`'s one-time `rustc -vV` probe that gets folded into every
/// fingerprint for the rest of the build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct PlatformInfo {
    pub platform: String,
    pub arch: String,
    pub runtime_version: String,
}

impl PlatformInfo {
    /// Detects the current platform/architecture (from `std::env::consts`)
    /// and the runtime (`node --version`) this crate drives scripts under.
    /// Probed once and cached; a failure to invoke `node` yields `"unknown"`
    /// rather than failing analysis (scripts may not need Node at all, e.g.
    /// pure shell scripts).
    pub fn detect() -> &'static PlatformInfo {
        static CACHED: OnceLock<PlatformInfo> = OnceLock::new();
        CACHED.get_or_init(|| PlatformInfo {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            runtime_version: probe_runtime_version(),
        })
    }
}

fn probe_runtime_version() -> String {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The service-specific salt: whether this script is a service at all, and
/// if so, the exact readiness pattern it was configured with (changing the
/// pattern should invalidate freshness the same as changing the command).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum ServiceFingerprint {
    NotAService,
    Service { ready_when: Option<String> },
}

impl ServiceFingerprint {
    fn from_kind(kind: &ScriptKind) -> Self {
        match kind {
            ScriptKind::Service { ready_when } => ServiceFingerprint::Service {
                ready_when: ready_when.as_ref().map(|r| r.line_matches.as_str().to_string()),
            },
            _ => ServiceFingerprint::NotAService,
        }
    }
}

/// A fully resolved fingerprint for one script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Fingerprint {
    pub platform: String,
    pub arch: String,
    pub runtime_version: String,
    pub command: Option<String>,
    pub extra_args: Vec<String>,
    pub clean: CleanPolicy,
    /// Canonical (`!`-prefixed for excludes) glob strings, in declared order.
    pub output: Vec<String>,
    pub service: ServiceFingerprint,
    pub env: BTreeMap<String, String>,
    /// Relative path (from the script's package directory) to content hash.
    pub files: BTreeMap<String, String>,
    /// Canonical dependency reference string to that dependency's own
    /// resolved fingerprint hash. Only cascading dependencies participate.
    pub dependencies: BTreeMap<String, String>,
    /// False if any transitive input is unknown: this script (or a
    /// cascading dependency) has a command but undeclared `files`.
    /// Services are exempted from the "no files" half of this rule since
    /// they produce no files of their own.
    pub fully_tracked: bool,
}

impl Fingerprint {
    /// The stable hash identifying this fingerprint, used as both the
    /// freshness comparison key and the cache key.
    pub fn hash(&self) -> String {
        // `serde_json` serializes `BTreeMap`s in key order, so this is a
        // canonical encoding: two `Fingerprint`s with equal field values
        // always hash identically regardless of construction order.
        let encoded = serde_json::to_vec(self).expect("Fingerprint always serializes");
        let digest = Sha256::digest(&encoded);
        hex::encode(digest)
    }

    /// Explains every way `self` (the freshly computed fingerprint) differs
    /// from `previous` (the one recorded the last time this script ran), in
    /// a fixed field order, so that user-facing "why did this re-run" output
    /// is deterministic regardless of which fields happened to change. Empty
    /// iff the two hash identically.
    pub fn difference(&self, previous: &Fingerprint) -> Vec<FingerprintChange> {
        let mut changes = Vec::new();
        if self.platform != previous.platform {
            changes.push(FingerprintChange::Platform);
        }
        if self.arch != previous.arch {
            changes.push(FingerprintChange::Architecture);
        }
        if self.runtime_version != previous.runtime_version {
            changes.push(FingerprintChange::RuntimeVersion);
        }
        if self.command != previous.command {
            changes.push(FingerprintChange::Command);
        }
        if self.extra_args != previous.extra_args {
            changes.push(FingerprintChange::ExtraArgs);
        }
        if self.clean != previous.clean {
            changes.push(FingerprintChange::Clean);
        }
        if self.output != previous.output {
            changes.push(FingerprintChange::Output);
        }
        if self.service != previous.service {
            changes.push(FingerprintChange::Service);
        }
        if self.env != previous.env {
            changes.push(FingerprintChange::Env);
        }
        let added = keys_added(&self.files, &previous.files);
        if !added.is_empty() {
            changes.push(FingerprintChange::FilesAdded(added));
        }
        let removed = keys_added(&previous.files, &self.files);
        if !removed.is_empty() {
            changes.push(FingerprintChange::FilesRemoved(removed));
        }
        let changed = keys_changed(&self.files, &previous.files);
        if !changed.is_empty() {
            changes.push(FingerprintChange::FilesChanged(changed));
        }
        let dep_added = keys_added(&self.dependencies, &previous.dependencies);
        if !dep_added.is_empty() {
            changes.push(FingerprintChange::DependencyAdded(dep_added));
        }
        let dep_removed = keys_added(&previous.dependencies, &self.dependencies);
        if !dep_removed.is_empty() {
            changes.push(FingerprintChange::DependencyRemoved(dep_removed));
        }
        let dep_changed = keys_changed(&self.dependencies, &previous.dependencies);
        if !dep_changed.is_empty() {
            changes.push(FingerprintChange::DependencyChanged(dep_changed));
        }
        changes
    }
}

/// One field-level difference, in this fixed order:
/// platform, architecture, runtime version, command, extra arguments,
/// clean, output, service config, environment, then files/dependencies
/// split into added/removed/changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FingerprintChange {
    Platform,
    Architecture,
    RuntimeVersion,
    Command,
    ExtraArgs,
    Clean,
    Output,
    Service,
    Env,
    FilesAdded(Vec<String>),
    FilesRemoved(Vec<String>),
    FilesChanged(Vec<String>),
    DependencyAdded(Vec<String>),
    DependencyRemoved(Vec<String>),
    DependencyChanged(Vec<String>),
}

/// Keys present in `current` but not in `previous`. Sorted for deterministic
/// reporting.
fn keys_added(current: &BTreeMap<String, String>, previous: &BTreeMap<String, String>) -> Vec<String> {
    let mut added: Vec<String> = current
        .keys()
        .filter(|k| !previous.contains_key(*k))
        .cloned()
        .collect();
    added.sort();
    added
}

/// Keys present in both maps but with a different value. Sorted for
/// deterministic reporting.
fn keys_changed(current: &BTreeMap<String, String>, previous: &BTreeMap<String, String>) -> Vec<String> {
    let mut changed: Vec<String> = current
        .iter()
        .filter(|(k, v)| previous.get(*k).is_some_and(|pv| pv != *v))
        .map(|(k, _)| k.clone())
        .collect();
    changed.sort();
    changed
}

/// Computes the fingerprint for `config`, given the already-resolved
/// fingerprints of its cascading dependencies (the executor computes these
/// bottom-up, the same order `custom_build.rs`'s `calculate()` recurses into
/// its own dependency targets before hashing itself). `fd_pool` bounds how
/// many declared input files are open for hashing at once (spec §5's
/// file-descriptor budget, separate from the process worker pool).
pub fn compute(
    config: &ScriptConfig,
    dependency_fingerprints: &std::collections::HashMap<ScriptReference, Fingerprint>,
    fd_pool: &Semaphore,
) -> WireitResult<Fingerprint> {
    let platform = PlatformInfo::detect();

    let files = match &config.files {
        Some(patterns) => hash_files(config.reference.package_dir(), patterns, fd_pool)?,
        None => BTreeMap::new(),
    };

    let output = config
        .output
        .as_ref()
        .map(|patterns| patterns.iter().map(canonical_glob_string).collect())
        .unwrap_or_default();

    let mut dependencies = BTreeMap::new();
    let mut deps_fully_tracked = true;
    for dep in config.cascading_dependencies() {
        let dep_fp = dependency_fingerprints.get(dep.reference()).ok_or_else(|| {
            internal(format!(
                "no fingerprint computed yet for dependency {}",
                dep.reference()
            ))
        })?;
        if !dep_fp.fully_tracked {
            deps_fully_tracked = false;
        }
        dependencies.insert(dep.reference().to_canonical_string(), dep_fp.hash());
    }

    // Services with a command but no declared `files` are still fully
    // tracked; only their dependency chain can disqualify them. No-command
    // groupers are always fully tracked. One-shot scripts
    // need declared `files` in addition to a fully-tracked dependency chain.
    let fully_tracked = match config.kind {
        ScriptKind::NoCommand => true,
        ScriptKind::Service { .. } => deps_fully_tracked,
        ScriptKind::OneShot => deps_fully_tracked && config.files.is_some(),
    };

    Ok(Fingerprint {
        platform: platform.platform.clone(),
        arch: platform.arch.clone(),
        runtime_version: platform.runtime_version.clone(),
        command: config.command.clone(),
        extra_args: config.extra_args.clone(),
        clean: config.clean,
        output,
        service: ServiceFingerprint::from_kind(&config.kind),
        env: config.env.clone(),
        files,
        dependencies,
        fully_tracked,
    })
}

fn canonical_glob_string(pattern: &GlobPattern) -> String {
    if pattern.exclude {
        format!("!{}", pattern.pattern)
    } else {
        pattern.pattern.clone()
    }
}

/// A script is eligible to have its outputs archived to/restored from the
/// cache only if it is fully tracked *and* declares an `output` glob list:
/// without declared outputs there is nothing for the cache to archive, so
/// such a script can still be "fresh" but never "cached". This is this
/// crate's resolution of the "command-with-output but no output" half of
/// the fully-tracked rule: kept as a distinct,
/// narrower-scoped predicate rather than folded into `fully_tracked` itself,
/// so a script with `files` but no `output` (e.g. a test script) can still
/// be skipped as fresh.
pub fn cache_eligible(config: &ScriptConfig, fingerprint: &Fingerprint) -> bool {
    fingerprint.fully_tracked && config.output.is_some()
}

/// Walks `package_dir`, applying `patterns` as a `.gitignore`-style override
/// set (later patterns can re-include what an earlier negated pattern
/// excluded), and returns the content hash of every matched file, keyed by
/// its path relative to `package_dir` so the fingerprint is stable across
/// checkouts at different absolute paths.
fn hash_files(
    package_dir: &Path,
    patterns: &[GlobPattern],
    fd_pool: &Semaphore,
) -> WireitResult<BTreeMap<String, String>> {
    let mut overrides = ignore::overrides::OverrideBuilder::new(package_dir);
    for pattern in patterns {
        overrides.add(&canonical_glob_string(pattern))?;
    }
    let overrides = overrides.build()?;

    let mut files = BTreeMap::new();
    let walker = ignore::WalkBuilder::new(package_dir)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .overrides(overrides)
        .build();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().map_or(false, |t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(package_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let contents = {
            let _permit = fd_pool.acquire();
            std::fs::read(path)?
        };
        let digest = Sha256::digest(&contents);
        files.insert(relative, hex::encode(digest));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanPolicy;
    use crate::error::SourcePosition;
    use std::fs;

    fn fds() -> Semaphore {
        Semaphore::new(8)
    }

    fn config(dir: &Path, files: Option<Vec<GlobPattern>>) -> ScriptConfig {
        ScriptConfig {
            reference: ScriptReference::new(dir, "build"),
            kind: crate::config::ScriptKind::OneShot,
            command: Some("echo hi".to_string()),
            dependencies: Vec::new(),
            declaring_file: dir.join("package.json"),
            files,
            output: None,
            clean: CleanPolicy::Always,
            env: BTreeMap::new(),
            extra_args: Vec::new(),
            position: SourcePosition {
                file: dir.join("package.json"),
                line: 1,
                column: 1,
            },
        }
    }

    #[test]
    fn unknown_inputs_are_not_fully_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), None);
        let fp = compute(&cfg, &Default::default(), &fds()).unwrap();
        assert!(!fp.fully_tracked);
    }

    #[test]
    fn no_command_groupers_are_always_fully_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path(), None);
        cfg.kind = crate::config::ScriptKind::NoCommand;
        cfg.command = None;
        let fp = compute(&cfg, &Default::default(), &fds()).unwrap();
        assert!(fp.fully_tracked);
    }

    #[test]
    fn services_without_files_are_fully_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path(), None);
        cfg.kind = crate::config::ScriptKind::Service { ready_when: None };
        let fp = compute(&cfg, &Default::default(), &fds()).unwrap();
        assert!(fp.fully_tracked);
    }

    #[test]
    fn same_contents_hash_identically() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let cfg = config(tmp.path(), Some(vec![GlobPattern::parse("*.txt")]));
        let a = compute(&cfg, &Default::default(), &fds()).unwrap();
        let b = compute(&cfg, &Default::default(), &fds()).unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn changed_file_contents_change_the_hash_and_are_reported_as_files_changed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let cfg = config(tmp.path(), Some(vec![GlobPattern::parse("*.txt")]));
        let before = compute(&cfg, &Default::default(), &fds()).unwrap();

        fs::write(tmp.path().join("a.txt"), b"goodbye").unwrap();
        let after = compute(&cfg, &Default::default(), &fds()).unwrap();

        assert_ne!(before.hash(), after.hash());
        let diff = after.difference(&before);
        assert_eq!(diff, vec![FingerprintChange::FilesChanged(vec!["a.txt".to_string()])]);
    }

    #[test]
    fn added_and_removed_files_are_reported_distinctly() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let cfg = config(tmp.path(), Some(vec![GlobPattern::parse("*.txt")]));
        let before = compute(&cfg, &Default::default(), &fds()).unwrap();

        fs::remove_file(tmp.path().join("a.txt")).unwrap();
        fs::write(tmp.path().join("b.txt"), b"hello").unwrap();
        let after = compute(&cfg, &Default::default(), &fds()).unwrap();

        let diff = after.difference(&before);
        assert_eq!(
            diff,
            vec![
                FingerprintChange::FilesAdded(vec!["b.txt".to_string()]),
                FingerprintChange::FilesRemoved(vec!["a.txt".to_string()]),
            ]
        );
    }

    #[test]
    fn excluded_files_are_not_hashed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        fs::write(tmp.path().join("b.log"), b"ignored").unwrap();
        let cfg = config(
            tmp.path(),
            Some(vec![
                GlobPattern::parse("*"),
                GlobPattern::parse("!*.log"),
            ]),
        );
        let fp = compute(&cfg, &Default::default(), &fds()).unwrap();
        assert!(fp.files.contains_key("a.txt"));
        assert!(!fp.files.contains_key("b.log"));
    }

    #[test]
    fn every_field_participates_in_difference() {
        // Every fingerprint field must participate in `difference()`;
        // omitting one breaks user-facing explanations of why a script
        // re-ran.
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let cfg = config(tmp.path(), Some(vec![GlobPattern::parse("*.txt")]));
        let base = compute(&cfg, &Default::default(), &fds()).unwrap();

        let mut platform = base.clone();
        platform.platform = "other-os".to_string();
        assert_eq!(platform.difference(&base), vec![FingerprintChange::Platform]);

        let mut arch = base.clone();
        arch.arch = "other-arch".to_string();
        assert_eq!(arch.difference(&base), vec![FingerprintChange::Architecture]);

        let mut runtime = base.clone();
        runtime.runtime_version = "v99.0.0".to_string();
        assert_eq!(runtime.difference(&base), vec![FingerprintChange::RuntimeVersion]);

        let mut command = base.clone();
        command.command = Some("echo other".to_string());
        assert_eq!(command.difference(&base), vec![FingerprintChange::Command]);

        let mut extra_args = base.clone();
        extra_args.extra_args = vec!["--flag".to_string()];
        assert_eq!(extra_args.difference(&base), vec![FingerprintChange::ExtraArgs]);

        let mut clean = base.clone();
        clean.clean = CleanPolicy::Never;
        assert_eq!(clean.difference(&base), vec![FingerprintChange::Clean]);

        let mut output = base.clone();
        output.output = vec!["dist/**".to_string()];
        assert_eq!(output.difference(&base), vec![FingerprintChange::Output]);

        let mut service = base.clone();
        service.service = ServiceFingerprint::Service { ready_when: None };
        assert_eq!(service.difference(&base), vec![FingerprintChange::Service]);

        let mut env = base.clone();
        env.env.insert("FOO".to_string(), "bar".to_string());
        assert_eq!(env.difference(&base), vec![FingerprintChange::Env]);

        let mut dep_added = base.clone();
        dep_added
            .dependencies
            .insert("/pkg:build".to_string(), "deadbeef".to_string());
        assert_eq!(
            dep_added.difference(&base),
            vec![FingerprintChange::DependencyAdded(vec!["/pkg:build".to_string()])]
        );
    }
}
