//! The `none` backend: every `get` is a miss, every `set` a no-op success.
//! Selected when `WIREIT_CACHE=none` or (by default) whenever `CI=true`,
//! so CI runs never spend time materializing a cache that will be thrown
//! away with the container.

use std::path::PathBuf;

use crate::error::WireitResult;
use crate::reference::ScriptReference;

use super::{CacheBackend, CacheHit};

pub struct NoneCache;

impl CacheBackend for NoneCache {
    fn get(
        &self,
        _script: &ScriptReference,
        _fingerprint_hash: &str,
    ) -> WireitResult<Option<Box<dyn CacheHit>>> {
        Ok(None)
    }

    fn set(
        &self,
        _script: &ScriptReference,
        _fingerprint_hash: &str,
        _package_dir: &std::path::Path,
        _output_files: &[PathBuf],
    ) -> WireitResult<bool> {
        Ok(true)
    }
}
