//! The cache backend contract plus the `Cache` facade the executor actually
//! calls: it owns the "is this backend down" latch (a deliberately
//! preserved open question, see DESIGN.md) and dispatches to whichever
//! concrete backend `WIREIT_CACHE` selected.
//!
//! The concrete backends themselves (`local`, the only one implemented
//! here; `github`/remote-HTTP backends are out of scope — concrete cache
//! backends are treated as a black box) only need to satisfy [`CacheBackend`].

mod local;
mod none;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::WireitResult;
use crate::reference::ScriptReference;

pub use local::LocalCache;
pub use none::NoneCache;

/// A restored cache hit: `apply()` copies the archived output files back
/// into the script's package directory.
pub trait CacheHit: Send {
    fn apply(&self, package_dir: &Path) -> WireitResult<()>;
}

/// Implemented once per storage mechanism. `get` returns `Ok(None)` on a
/// clean miss; `set` returns `Ok(false)` to report a *temporary* failure
/// (e.g. a remote backend that is unreachable) without treating it as a
/// hard error. Unexpected errors (corrupt archive, permission denied)
/// propagate as `Err`.
pub trait CacheBackend: Send + Sync {
    fn get(
        &self,
        script: &ScriptReference,
        fingerprint_hash: &str,
    ) -> WireitResult<Option<Box<dyn CacheHit>>>;

    /// `output_files` are paths relative to the script's package directory.
    fn set(
        &self,
        script: &ScriptReference,
        fingerprint_hash: &str,
        package_dir: &Path,
        output_files: &[PathBuf],
    ) -> WireitResult<bool>;
}

/// Wraps a [`CacheBackend`] with the "service is down" latch: once any call
/// to the underlying backend fails (returns `Err`, or `set` returns
/// `Ok(false)`), this `Cache` stops calling the backend for the rest of its
/// lifetime and reports every subsequent `get`/`set` as a miss/no-op.
///
/// **Deliberate design choice:** this latch is never cleared, even if the
/// underlying cause (e.g. a transient network blip) would have cleared up
/// moments later. A fresh `Cache` (e.g. a new `Executor` in watch mode, or
/// a new process) gets a fresh latch. Whether the latch should instead
/// reset after a timeout is left as an open question; this crate keeps the
/// simpler behavior rather than guessing at an interval.
pub struct Cache {
    backend: Box<dyn CacheBackend>,
    down: AtomicBool,
}

impl Cache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Cache {
            backend,
            down: AtomicBool::new(false),
        }
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub fn get(
        &self,
        script: &ScriptReference,
        fingerprint_hash: &str,
    ) -> WireitResult<Option<Box<dyn CacheHit>>> {
        if self.is_down() {
            return Ok(None);
        }
        match self.backend.get(script, fingerprint_hash) {
            Ok(hit) => Ok(hit),
            Err(e) => {
                self.down.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    pub fn set(
        &self,
        script: &ScriptReference,
        fingerprint_hash: &str,
        package_dir: &Path,
        output_files: &[PathBuf],
    ) -> WireitResult<bool> {
        if self.is_down() {
            return Ok(false);
        }
        match self.backend.set(script, fingerprint_hash, package_dir, output_files) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.down.store(true, Ordering::Release);
                Ok(false)
            }
            Err(e) => {
                self.down.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}

/// Selects a backend from `WIREIT_CACHE`: `local` (default outside CI),
/// `github` (unimplemented here; a remote HTTP backend is out of scope —
/// falls back to `none` with a warning), or `none` (default when `CI=true`).
pub fn backend_from_env(cache_dir: PathBuf) -> Box<dyn CacheBackend> {
    match std::env::var("WIREIT_CACHE").as_deref() {
        Ok("local") => Box::new(LocalCache::new(cache_dir)),
        Ok("none") => Box::new(NoneCache),
        Ok("github") => {
            log::warn!(
                "WIREIT_CACHE=github requested, but the remote HTTP backend is an external \
                 collaborator out of scope for this build; falling back to no cache"
            );
            Box::new(NoneCache)
        }
        Ok(other) => {
            log::warn!("unrecognized WIREIT_CACHE=\"{other}\"; falling back to no cache");
            Box::new(NoneCache)
        }
        Err(_) => {
            if std::env::var("CI").as_deref() == Ok("true") {
                Box::new(NoneCache)
            } else {
                Box::new(LocalCache::new(cache_dir))
            }
        }
    }
}
