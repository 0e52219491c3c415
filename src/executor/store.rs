//! The on-disk state directory, one per script, under a stable root: the
//! last-run fingerprint file and a lightweight log of the last run. Local
//! cache tarballs live in [`crate::cache::LocalCache`]'s own
//! tree, keyed by fingerprint hash rather than by script, since the same
//! output can be shared across machines/checkouts.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::WireitResult;
use crate::fingerprint::Fingerprint;
use crate::reference::ScriptReference;

/// The directory under `root` holding this script's state. Keyed by a hash
/// of the canonical reference string (rather than the string itself)
/// because package directories may be arbitrarily deep, and path-like
/// separators in the canonical string are not safe to nest directly as
/// path components on every platform.
pub fn script_state_dir(root: &Path, reference: &ScriptReference) -> PathBuf {
    let digest = Sha256::digest(reference.to_canonical_string().as_bytes());
    root.join(hex::encode(digest))
}

const FINGERPRINT_FILE_NAME: &str = "fingerprint.json";
const LOG_FILE_NAME: &str = "last-run.log";

/// Reads the fingerprint recorded by the previous successful run, or `None`
/// if there isn't one (first run, or the previous run was interrupted and
/// never reached the "write fingerprint file" step).
pub fn read_fingerprint(state_dir: &Path) -> Option<Fingerprint> {
    let contents = fs::read(state_dir.join(FINGERPRINT_FILE_NAME)).ok()?;
    serde_json::from_slice(&contents).ok()
}

/// Deletes the fingerprint file. Called at spawn time, before a command
/// actually runs, so that a process killed mid-run (host abort, crash) is
/// never mistaken for fresh on the next invocation.
pub fn clear_fingerprint(state_dir: &Path) -> WireitResult<()> {
    let path = state_dir.join(FINGERPRINT_FILE_NAME);
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Writes the fingerprint file. Only called after a script's run step
/// returns a clean success (or a fresh/cached decision re-affirms the
/// existing fingerprint).
pub fn write_fingerprint(state_dir: &Path, fingerprint: &Fingerprint) -> WireitResult<()> {
    fs::create_dir_all(state_dir)?;
    let encoded = serde_json::to_vec_pretty(fingerprint)?;
    fs::write(state_dir.join(FINGERPRINT_FILE_NAME), encoded)?;
    Ok(())
}

/// Overwrites the lightweight log of the most recent run's output.
pub fn write_log(state_dir: &Path, combined_output: &str) -> WireitResult<()> {
    fs::create_dir_all(state_dir)?;
    fs::write(state_dir.join(LOG_FILE_NAME), combined_output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_references_get_distinct_directories() {
        let root = Path::new("/cache-root");
        let a = script_state_dir(root, &ScriptReference::new("/pkg/a", "build"));
        let b = script_state_dir(root, &ScriptReference::new("/pkg/b", "build"));
        assert_ne!(a, b);
    }

    #[test]
    fn clearing_then_reading_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        let fp = crate::fingerprint::Fingerprint {
            platform: "linux".into(),
            arch: "x86_64".into(),
            runtime_version: "v20".into(),
            command: Some("tsc".into()),
            extra_args: vec![],
            clean: crate::config::CleanPolicy::Always,
            output: vec![],
            service: crate::fingerprint::ServiceFingerprint::NotAService,
            env: Default::default(),
            files: Default::default(),
            dependencies: Default::default(),
            fully_tracked: true,
        };
        write_fingerprint(&dir, &fp).unwrap();
        assert!(read_fingerprint(&dir).is_some());
        clear_fingerprint(&dir).unwrap();
        assert!(read_fingerprint(&dir).is_none());
    }
}
