//! # RocksDB Storage Adapter
//!
//! Persistent implementation of the chain's `KeyValueStore`.
//!
//! ## Features
//!
//! - Atomic batch writes (`WriteBatch`)
//! - Snappy compression
//! - Bloom filters for point lookups
//! - Optional fsync per write
//!
//! The chain namespaces its records with key prefixes, so a single default
//! column family holds everything.

use mc_03_blockchain::{BatchOperation, KeyValueStore, KvError};
use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::io;
use std::path::{Path, PathBuf};

/// RocksDB tuning.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Database directory.
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 64MB)
    pub write_buffer_size: usize,
    /// Maximum number of write buffers (default: 3)
    pub max_write_buffer_number: i32,
    /// Target file size for level-1 (default: 64MB)
    pub target_file_size_base: u64,
    /// fsync after each write.
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chaindata"),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            target_file_size_base: 64 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Default tuning for the chain database under `data_dir`.
    pub fn under(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("chaindata"),
            ..Self::default()
        }
    }

    /// Create config for testing (smaller buffers, no sync)
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            target_file_size_base: 4 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed key-value store.
pub struct RocksDbStore {
    db: DB,
    sync_writes: bool,
}

impl RocksDbStore {
    /// Open or create the database at `config.path`.
    pub fn open(config: &RocksDbConfig) -> Result<Self, KvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_target_file_size_base(config.target_file_size_base);
        opts.set_compression_type(DBCompressionType::Snappy);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path)
            .map_err(|e| KvError::Io(format!("failed to open RocksDB: {e}")))?;

        Ok(Self {
            db,
            sync_writes: config.sync_writes,
        })
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.db
            .get(key)
            .map_err(|e| KvError::Io(format!("RocksDB get failed: {e}")))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.db
            .put_opt(key, value, &self.write_options())
            .map_err(|e| KvError::Io(format!("RocksDB put failed: {e}")))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.db
            .delete_opt(key, &self.write_options())
            .map_err(|e| KvError::Io(format!("RocksDB delete failed: {e}")))
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KvError> {
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put(&key, &value),
                BatchOperation::Delete { key } => batch.delete(&key),
            }
        }
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| KvError::Io(format!("RocksDB batch write failed: {e}")))
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KvError> {
        self.db
            .get_pinned(key)
            .map(|v| v.is_some())
            .map_err(|e| KvError::Io(format!("RocksDB exists check failed: {e}")))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let mut results = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| KvError::Io(format!("RocksDB scan failed: {e}")))?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}

/// Free space on the filesystem holding `path`, in percent.
pub fn available_disk_space_percent(path: &Path) -> io::Result<u8> {
    let available = fs2::available_space(path)?;
    let total = fs2::total_space(path)?;
    if total == 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "unable to determine disk space",
        ));
    }
    Ok(((available as f64 / total as f64) * 100.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RocksDbStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksDbStore::open(&RocksDbConfig::for_testing(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, store) = open_temp();
        store.put(b"h:1", b"one").unwrap();
        assert_eq!(store.get(b"h:1").unwrap(), Some(b"one".to_vec()));
        assert!(store.exists(b"h:1").unwrap());

        store.delete(b"h:1").unwrap();
        assert_eq!(store.get(b"h:1").unwrap(), None);
        assert!(!store.exists(b"h:1").unwrap());
    }

    #[test]
    fn test_batch_applies_in_order() {
        let (_dir, store) = open_temp();
        store.put(b"a", b"old").unwrap();
        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".to_vec(), b"new".to_vec()),
                BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
                BatchOperation::Delete { key: b"b".to_vec() },
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_end() {
        let (_dir, store) = open_temp();
        store.put(b"n:2", b"b").unwrap();
        store.put(b"n:1", b"a").unwrap();
        store.put(b"o:1", b"x").unwrap();

        let found = store.prefix_scan(b"n:").unwrap();
        assert_eq!(
            found,
            vec![
                (b"n:1".to_vec(), b"a".to_vec()),
                (b"n:2".to_vec(), b"b".to_vec()),
            ]
        );
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let config = RocksDbConfig::for_testing(dir.path());
        {
            let store = RocksDbStore::open(&config).unwrap();
            store.put(b"k", b"v").unwrap();
        }
        let store = RocksDbStore::open(&config).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_disk_space_percent() {
        let dir = TempDir::new().unwrap();
        let percent = available_disk_space_percent(dir.path()).unwrap();
        assert!(percent <= 100);
    }
}
