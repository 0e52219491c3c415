//! The local filesystem cache backend: output files are archived as a
//! `tar.gz`, sharded by the first two hex characters of the fingerprint
//! hash so that a long-running monorepo never ends up with tens of
//! thousands of entries in one flat directory — the same sharding cargo's
//! own crate registry cache uses (`~/.cargo/registry/cache/<source>/`
//! already buckets by source id; per-entry sharding one level deeper is
//! the natural next step when the key space is a content hash rather than
//! a small number of registries). `tar` and `flate2` pull their justification
//! straight from `cargo` itself (`ops/cargo_package.rs`'s `.crate` archive
//! format is exactly a gzip-compressed tarball).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::WireitResult;
use crate::reference::ScriptReference;

use super::{CacheBackend, CacheHit};

pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: PathBuf) -> Self {
        LocalCache { root }
    }

    fn entry_path(&self, fingerprint_hash: &str) -> PathBuf {
        let shard = &fingerprint_hash[..fingerprint_hash.len().min(2)];
        self.root
            .join(shard)
            .join(format!("{fingerprint_hash}.tar.gz"))
    }
}

struct LocalHit {
    archive_path: PathBuf,
}

impl CacheHit for LocalHit {
    fn apply(&self, package_dir: &Path) -> WireitResult<()> {
        let file = File::open(&self.archive_path)?;
        let decoder = GzDecoder::new(BufReader::new(file));
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(package_dir)?;
        Ok(())
    }
}

impl CacheBackend for LocalCache {
    fn get(
        &self,
        _script: &ScriptReference,
        fingerprint_hash: &str,
    ) -> WireitResult<Option<Box<dyn CacheHit>>> {
        let path = self.entry_path(fingerprint_hash);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(LocalHit { archive_path: path })))
    }

    fn set(
        &self,
        _script: &ScriptReference,
        fingerprint_hash: &str,
        package_dir: &Path,
        output_files: &[PathBuf],
    ) -> WireitResult<bool> {
        let path = self.entry_path(fingerprint_hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Written to a temporary file in the same directory, then renamed
        // into place, so a concurrent `get()` from a sibling script build
        // never observes a half-written archive.
        let tmp = tempfile::NamedTempFile::new_in(path.parent().unwrap_or(&self.root))?;
        {
            let encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            for relative in output_files {
                let absolute = package_dir.join(relative);
                if absolute.is_dir() {
                    builder.append_dir_all(relative, &absolute)?;
                } else if absolute.is_file() {
                    builder.append_path_with_name(&absolute, relative)?;
                }
            }
            builder
                .into_inner()
                .and_then(|encoder| encoder.finish())?;
        }
        tmp.persist(&path)
            .map_err(|e| crate::error::internal(format!("failed to persist cache entry: {e}")))?;
        Ok(true)
    }
}
