//! Disk-backed, content-addressed product cache.
//!
//! Layout:
//!
//! ```text
//! <root>/products/<fp[0..2]>/<fp>.json
//! <root>/checkpoints/<pipeline>.state.json
//! ```
//!
//! Every file is published atomically: bytes go to a temporary file in the
//! destination directory, are synced, then renamed into place. A reader
//! therefore sees either nothing or a complete record.

use super::record::ProductRecord;
use crate::core::{DataProduct, Fingerprint};
use crate::errors::{CacheCorruptionError, CacheError};
use crate::pipeline::RunState;
use crate::utils::is_valid_name;
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const PRODUCTS_DIR: &str = "products";
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Product store keyed by fingerprint.
///
/// Only the root rank writes; any rank may read once the write has been
/// followed by a barrier.
#[derive(Debug, Clone)]
pub struct ProductCache {
    root: PathBuf,
    pipeline: String,
}

impl ProductCache {
    /// Opens (or creates) a cache rooted at `root` for the named pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline name is not a valid name (it becomes
    /// the checkpoint file name) or the directory layout cannot be created.
    pub fn new(root: impl Into<PathBuf>, pipeline: impl Into<String>) -> Result<Self, CacheError> {
        let pipeline = pipeline.into();
        if !is_valid_name(&pipeline) {
            return Err(CacheError::InvalidPipelineName(pipeline));
        }
        let root = root.into();
        fs::create_dir_all(root.join(PRODUCTS_DIR))?;
        fs::create_dir_all(root.join(CHECKPOINTS_DIR))?;
        Ok(Self { root, pipeline })
    }

    /// Root directory of this cache.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path on disk for a product fingerprint.
    #[must_use]
    pub fn product_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let fp = fingerprint.as_str();
        self.root
            .join(PRODUCTS_DIR)
            .join(&fp[..2.min(fp.len())])
            .join(format!("{fp}.json"))
    }

    /// Path of this pipeline's checkpoint file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root
            .join(CHECKPOINTS_DIR)
            .join(format!("{}.state.json", self.pipeline))
    }

    /// Returns true if an artifact file exists for the fingerprint.
    ///
    /// Existence is not verification; use [`ProductCache::get`] to read.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.product_path(fingerprint).is_file()
    }

    /// Reads and verifies a product.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if no artifact exists and
    /// [`CacheError::Corrupted`] if the artifact fails verification.
    pub fn load(&self, fingerprint: &Fingerprint) -> Result<DataProduct, CacheError> {
        let path = self.product_path(fingerprint);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(CacheError::NotFound(fingerprint.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        ProductRecord::open(&bytes, fingerprint)
    }

    /// Reads a product, treating a missing or corrupt artifact as a miss.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<DataProduct> {
        match self.load(fingerprint) {
            Ok(product) => {
                debug!(fingerprint = fingerprint.short(), name = product.name(), "cache hit");
                Some(product)
            }
            Err(CacheError::NotFound(_)) => None,
            Err(e) => {
                warn!(fingerprint = fingerprint.short(), error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Publishes a product under `fingerprint`.
    ///
    /// Publishing an identical fingerprint twice overwrites the earlier
    /// record with the same content.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupted`] if the product's own fingerprint
    /// differs from the key, or an I/O error if the write fails.
    pub fn put(&self, fingerprint: &Fingerprint, product: &DataProduct) -> Result<(), CacheError> {
        if product.fingerprint() != fingerprint {
            return Err(CacheCorruptionError::new(
                fingerprint.as_str(),
                format!("refusing to publish product keyed {}", product.fingerprint()),
            )
            .into());
        }

        let record = ProductRecord::seal(fingerprint, product)?;
        let bytes = serde_json::to_vec(&record)?;
        write_atomic(&self.product_path(fingerprint), &bytes)?;
        debug!(fingerprint = fingerprint.short(), name = product.name(), "published product");
        Ok(())
    }

    /// Removes one artifact. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn purge(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        match fs::remove_file(self.product_path(fingerprint)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every product and this pipeline's checkpoint. Returns the
    /// number of products removed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be walked or cleared.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let products = self.root.join(PRODUCTS_DIR);
        let mut removed = 0;
        for shard in fs::read_dir(&products)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            removed += fs::read_dir(&shard)?
                .filter_map(Result::ok)
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
                .count();
            fs::remove_dir_all(&shard)?;
        }

        match fs::remove_file(self.state_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(root = %self.root.display(), removed, "cleared product cache");
        Ok(removed)
    }

    /// Checkpoints run state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    pub fn save_state(&self, state: &RunState) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.state_path(), &bytes)?;
        debug!(run_id = %state.run_id, phase = %state.phase, "checkpointed run state");
        Ok(())
    }

    /// Loads the last checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint exists but cannot be read or parsed.
    pub fn load_state(&self) -> Result<Option<RunState>, CacheError> {
        match fs::read(self.state_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(IoErrorKind::InvalidInput, "cache path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NdArray, Payload};
    use pretty_assertions::assert_eq;

    fn cache() -> (tempfile::TempDir, ProductCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProductCache::new(dir.path().join("cache"), "test").unwrap();
        (dir, cache)
    }

    fn product(name: &str) -> DataProduct {
        let fp = Fingerprint::of_bytes(b"stage").for_output(name);
        let arr = NdArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        DataProduct::new(name, "load", fp, Payload::from(arr))
    }

    #[test]
    fn test_pipeline_name_cannot_escape_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["../x", "a/b", "", ".hidden"] {
            let err = ProductCache::new(dir.path(), name).unwrap_err();
            assert!(matches!(err, CacheError::InvalidPipelineName(_)), "{name}");
            assert_eq!(err.kind(), crate::errors::ErrorKind::Configuration);
        }
        assert!(!dir.path().join(CHECKPOINTS_DIR).exists());
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_dir, cache) = cache();
        let p = product("vis");

        assert!(!cache.contains(p.fingerprint()));
        cache.put(p.fingerprint(), &p).unwrap();
        assert!(cache.contains(p.fingerprint()));
        assert_eq!(cache.get(p.fingerprint()), Some(p));
    }

    #[test]
    fn test_layout_is_sharded_by_prefix() {
        let (_dir, cache) = cache();
        let p = product("vis");
        let fp = p.fingerprint().as_str().to_string();

        let path = cache.product_path(p.fingerprint());
        assert!(path.ends_with(format!("products/{}/{fp}.json", &fp[..2])));
    }

    #[test]
    fn test_missing_is_miss() {
        let (_dir, cache) = cache();
        let fp = Fingerprint::of_bytes(b"nothing");

        assert_eq!(cache.get(&fp), None);
        assert!(matches!(cache.load(&fp), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_artifact_reads_as_miss() {
        let (_dir, cache) = cache();
        let p = product("vis");
        cache.put(p.fingerprint(), &p).unwrap();

        fs::write(cache.product_path(p.fingerprint()), b"{\"truncated\":").unwrap();

        assert_eq!(cache.get(p.fingerprint()), None);
        let err = cache.load(p.fingerprint()).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::CacheCorruption);
    }

    #[test]
    fn test_put_rejects_mismatched_key() {
        let (_dir, cache) = cache();
        let p = product("vis");
        let other = Fingerprint::of_bytes(b"other");

        assert!(matches!(cache.put(&other, &p), Err(CacheError::Corrupted(_))));
        assert!(!cache.contains(&other));
    }

    #[test]
    fn test_purge_and_clear() {
        let (_dir, cache) = cache();
        let a = product("a");
        let b = product("b");
        cache.put(a.fingerprint(), &a).unwrap();
        cache.put(b.fingerprint(), &b).unwrap();

        assert!(cache.purge(a.fingerprint()).unwrap());
        assert!(!cache.purge(a.fingerprint()).unwrap());
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(!cache.contains(b.fingerprint()));
    }

    #[test]
    fn test_state_round_trip() {
        let (_dir, cache) = cache();
        assert_eq!(cache.load_state().unwrap(), None);

        let state = RunState::new("test", Fingerprint::of_bytes(b"plan"));
        cache.save_state(&state).unwrap();
        assert_eq!(cache.load_state().unwrap(), Some(state));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (_dir, cache) = cache();
        let p = product("vis");
        cache.put(p.fingerprint(), &p).unwrap();

        let dir = cache.product_path(p.fingerprint()).parent().unwrap().to_path_buf();
        let names: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 1);
    }
}
