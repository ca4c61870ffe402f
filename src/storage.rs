//! Key/value storage backends
//!
//! The ledger only needs point reads, ordered prefix scans and an atomic batch
//! write. RocksDB backs production deployments; the in-memory backend is used
//! by tests and development runs.

use crate::errors::StorageError;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// A single staged mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Minimal storage contract used by the ledger gateway
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Ordered scan of keys under `prefix`, strictly after `start_after` when given.
    fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply every op or none of them.
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError>;
}

/// Read access shared by raw backends and in-flight ledger transactions
pub trait KvRead {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// At most `limit` keys under `prefix`, strictly after `start_after` when given
    fn scan_page(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(self
            .scan(prefix)?
            .into_iter()
            .filter(|(key, _)| start_after.map_or(true, |after| key.as_slice() > after))
            .take(limit)
            .collect())
    }
}

impl<T: KvBackend + ?Sized> KvRead for T {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(key)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.scan_prefix(prefix, None, usize::MAX)
    }

    fn scan_page(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.scan_prefix(prefix, start_after, limit)
    }
}

/// RocksDB-backed storage
#[derive(Clone)]
pub struct RocksStorage {
    db: Arc<DB>,
}

impl RocksStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with(path, 64, 4)
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        write_buffer_size_mb: usize,
        max_write_buffer_number: i32,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvBackend for RocksStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let start = start_after.unwrap_or(prefix);
        let mut rows = Vec::new();

        for entry in self.db.iterator(IteratorMode::From(start, Direction::Forward)) {
            let (key, value) = entry.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            if start_after.map_or(false, |after| &key[..] <= after) {
                continue;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }

        Ok(rows)
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                WriteOp::Put(key, value) => batch.put(key, value),
                WriteOp::Delete(key) => batch.delete(key),
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }
}

/// Ordered in-memory storage
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvBackend for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self
            .data
            .read()
            .map_err(|_| StorageError::ReadFailed("memory store lock poisoned".into()))?;
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self
            .data
            .read()
            .map_err(|_| StorageError::ReadFailed("memory store lock poisoned".into()))?;

        let lower = match start_after {
            Some(after) => Bound::Excluded(after.to_vec()),
            None => Bound::Included(prefix.to_vec()),
        };

        Ok(data
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StorageError::WriteFailed("memory store lock poisoned".into()))?;
        for op in ops {
            match op {
                WriteOp::Put(key, value) => {
                    data.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}
