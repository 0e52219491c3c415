//! [`ScriptReference`]: the `(package directory, script name)` key used
//! throughout the crate as a map key, a graph node identifier, and a
//! serializable round-trip value.
//!
//! Modeled on `cargo`'s `core::PackageId`: a small `Arc`-wrapped inner
//! struct so clones are cheap and the type can be used freely as a hash-map
//! key without re-deriving `Hash`/`Eq`/`Ord` by hand at every use site.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};

use crate::error::WireitResult;

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd)]
struct Inner {
    package_dir: PathBuf,
    script_name: String,
}

/// Identifies a single script: the absolute directory of the manifest that
/// declares it, plus its name within that manifest's `scripts` table.
#[derive(Clone, Eq)]
pub struct ScriptReference {
    inner: Arc<Inner>,
}

impl ScriptReference {
    pub fn new(package_dir: impl Into<PathBuf>, script_name: impl Into<String>) -> Self {
        ScriptReference {
            inner: Arc::new(Inner {
                package_dir: package_dir.into(),
                script_name: script_name.into(),
            }),
        }
    }

    pub fn package_dir(&self) -> &Path {
        &self.inner.package_dir
    }

    pub fn script_name(&self) -> &str {
        &self.inner.script_name
    }

    /// `(package_dir, name)`, the key used to sort dependency lists
    /// deterministically.
    pub fn sort_key(&self) -> (&Path, &str) {
        (&self.inner.package_dir, &self.inner.script_name)
    }

    /// Deterministic tuple serialization used as the canonical string
    /// encoding and as a stable map key in serialized fingerprints.
    pub fn to_canonical_string(&self) -> String {
        format!(
            "{}:{}",
            self.inner.package_dir.display(),
            self.inner.script_name
        )
    }

    /// Inverse of [`Self::to_canonical_string`]. The package directory portion
    /// is everything up to the *last* `:` so that absolute paths containing a
    /// drive letter (`C:\...`) still round-trip on Windows.
    pub fn from_canonical_string(s: &str) -> WireitResult<Self> {
        let idx = s
            .rfind(':')
            .with_context(|| format!("invalid script reference: `{s}`"))?;
        let (dir, name) = s.split_at(idx);
        let name = &name[1..];
        if dir.is_empty() || name.is_empty() {
            bail!("invalid script reference: `{s}`");
        }
        Ok(ScriptReference::new(dir, name))
    }
}

impl PartialEq for ScriptReference {
    fn eq(&self, other: &Self) -> bool {
        *self.inner == *other.inner
    }
}

impl Hash for ScriptReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.package_dir.hash(state);
        self.inner.script_name.hash(state);
    }
}

impl Ord for ScriptReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ScriptReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ScriptReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.inner.script_name,
            self.inner.package_dir.display()
        )
    }
}

impl fmt::Debug for ScriptReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptReference")
            .field("package_dir", &self.inner.package_dir)
            .field("script_name", &self.inner.script_name)
            .finish()
    }
}
