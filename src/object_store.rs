//! Object-storage client capability.
//!
//! The orchestrator never speaks an object protocol directly; it talks to an
//! [`ObjectClient`] through the storage layer. Two clients ship with the
//! crate: an in-memory store and a directory-mirrored store that lays objects
//! out as `<root>/<bucket>/<key>`.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Whole-object operations. No client is expected to support partial or
/// in-place writes.
pub trait ObjectClient: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectError>;

    fn head(&self, bucket: &str, key: &str) -> Result<bool, ObjectError>;

    /// Keys in `bucket` starting with `prefix`, sorted.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectError>;

    fn get(&self, bucket: &str, key: &str, out: &mut dyn Write) -> Result<u64, ObjectError>;

    fn put(&self, bucket: &str, key: &str, input: &mut dyn Read) -> Result<u64, ObjectError>;

    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), ObjectError>;

    fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store failure: {0}")]
    Backend(String),
}

/// Object store held entirely in memory. Buckets are created on first write
/// or with [`MemoryObjectClient::create_bucket`].
#[derive(Default)]
pub struct MemoryObjectClient {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.lock().entry(bucket.to_string()).or_default();
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.lock()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock().get(bucket).and_then(|b| b.get(key).cloned())
    }

    /// Every object as `(bucket, key) -> body`; used for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<(String, String), Vec<u8>> {
        self.lock()
            .iter()
            .flat_map(|(bucket, objects)| {
                objects
                    .iter()
                    .map(|(key, body)| ((bucket.clone(), key.clone()), body.clone()))
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, Vec<u8>>>> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObjectClient for MemoryObjectClient {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectError> {
        Ok(self.lock().contains_key(bucket))
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, ObjectError> {
        Ok(self
            .lock()
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectError> {
        let buckets = self.lock();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectError::NoSuchBucket(bucket.to_string()))?;
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, bucket: &str, key: &str, out: &mut dyn Write) -> Result<u64, ObjectError> {
        let body = self.object(bucket, key).ok_or_else(|| ObjectError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        out.write_all(&body)?;
        Ok(body.len() as u64)
    }

    fn put(&self, bucket: &str, key: &str, input: &mut dyn Read) -> Result<u64, ObjectError> {
        let mut body = Vec::new();
        input.read_to_end(&mut body)?;
        let len = body.len() as u64;
        self.insert(bucket, key, body);
        Ok(len)
    }

    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), ObjectError> {
        let body = self
            .object(src_bucket, src_key)
            .ok_or_else(|| ObjectError::NoSuchKey {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;
        self.insert(dst_bucket, dst_key, body);
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectError> {
        let mut buckets = self.lock();
        let removed = buckets
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key));
        match removed {
            Some(_) => Ok(()),
            None => Err(ObjectError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

/// Object store mirrored onto a local directory: bucket `b`, key `x/y` lives
/// at `<root>/b/x/y`. Suits gateways that expose a bucket as a mount.
pub struct DirObjectClient {
    root: PathBuf,
}

impl DirObjectClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.bucket_path(bucket), |path, segment| path.join(segment))
    }

    fn missing(bucket: &str, key: &str) -> ObjectError {
        ObjectError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

fn key_of(bucket_root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(bucket_root).ok()?;
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(segments.join("/"))
}

impl ObjectClient for DirObjectClient {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectError> {
        Ok(self.bucket_path(bucket).is_dir())
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, ObjectError> {
        Ok(!key.is_empty() && self.object_path(bucket, key).is_file())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectError> {
        let bucket_root = self.bucket_path(bucket);
        if !bucket_root.is_dir() {
            return Err(ObjectError::NoSuchBucket(bucket.to_string()));
        }
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&bucket_root).sort_by_file_name() {
            let entry = entry.map_err(|e| ObjectError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = key_of(&bucket_root, entry.path())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn get(&self, bucket: &str, key: &str, out: &mut dyn Write) -> Result<u64, ObjectError> {
        let path = self.object_path(bucket, key);
        if !path.is_file() {
            return Err(Self::missing(bucket, key));
        }
        let mut file = std::fs::File::open(path)?;
        Ok(std::io::copy(&mut file, out)?)
    }

    fn put(&self, bucket: &str, key: &str, input: &mut dyn Read) -> Result<u64, ObjectError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        Ok(std::io::copy(input, &mut file)?)
    }

    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), ObjectError> {
        let src = self.object_path(src_bucket, src_key);
        if !src.is_file() {
            return Err(Self::missing(src_bucket, src_key));
        }
        let dst = self.object_path(dst_bucket, dst_key);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)?;
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectError> {
        let path = self.object_path(bucket, key);
        if !path.is_file() {
            return Err(Self::missing(bucket, key));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}
