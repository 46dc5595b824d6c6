//! Uniform storage operations over the local/UNC filesystem and object storage.
//!
//! A path string is classified once, when it becomes a [`Location`]; after
//! that [`Storage`] picks the backend for every call so orchestration code
//! never branches on where content lives. Mutations are gated by the run's
//! dry-run flag and narrate what they would have done instead.

use std::fmt;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::events::{LogLevel, Progress};
use crate::fsops;
use crate::object_store::{ObjectClient, ObjectError};
use crate::resolve;

/// A place content can live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Local(PathBuf),
    Object { bucket: String, key: String },
}

impl Location {
    /// Classify `path`: `s3://bucket/key` is object storage (bucket and key
    /// split on the first separator), everything else is an absolute
    /// filesystem path.
    pub fn parse(path: &str) -> Self {
        let path = path.trim();
        if resolve::is_object_url(path) {
            let rest = &path[resolve::OBJECT_SCHEME.len()..];
            let (bucket, key) = rest.split_once(resolve::SEPARATORS).unwrap_or((rest, ""));
            return Location::Object {
                bucket: bucket.to_string(),
                key: normalize_key(key),
            };
        }
        Location::Local(resolve::absolutize(Path::new(path)))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Location::Object { .. })
    }

    /// Append a relative path; stray separators and `.` segments are ignored.
    pub fn join(&self, rel: &str) -> Self {
        let segments = rel
            .split(resolve::SEPARATORS)
            .filter(|segment| !segment.is_empty() && *segment != ".");
        match self {
            Location::Local(path) => {
                Location::Local(segments.fold(path.clone(), |path, segment| path.join(segment)))
            }
            Location::Object { bucket, key } => {
                let mut joined = key.clone();
                for segment in segments {
                    if !joined.is_empty() {
                        joined.push('/');
                    }
                    joined.push_str(segment);
                }
                Location::Object {
                    bucket: bucket.clone(),
                    key: joined,
                }
            }
        }
    }

    /// `/`-separated path of `self` below `root`, if it is below it.
    pub fn relative_to(&self, root: &Location) -> Option<String> {
        match (self, root) {
            (Location::Local(path), Location::Local(root)) => {
                let rel = path.strip_prefix(root).ok()?;
                let segments: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(segments.join("/"))
            }
            (
                Location::Object { bucket, key },
                Location::Object {
                    bucket: root_bucket,
                    key: root_key,
                },
            ) if bucket == root_bucket => {
                if root_key.is_empty() {
                    return Some(key.clone());
                }
                key.strip_prefix(root_key.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(str::to_string)
            }
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<Location> {
        match self {
            Location::Local(path) => path.parent().map(|p| Location::Local(p.to_path_buf())),
            Location::Object { bucket, key } => {
                if key.is_empty() {
                    return None;
                }
                let parent = key.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                Some(Location::Object {
                    bucket: bucket.clone(),
                    key: parent.to_string(),
                })
            }
        }
    }

    /// Sibling named `<file name><suffix>`.
    pub fn with_suffix(&self, suffix: &str) -> Location {
        match self {
            Location::Local(path) => {
                let mut name = path.as_os_str().to_os_string();
                name.push(suffix);
                Location::Local(PathBuf::from(name))
            }
            Location::Object { bucket, key } => Location::Object {
                bucket: bucket.clone(),
                key: format!("{key}{suffix}"),
            },
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Object { bucket, key } if key.is_empty() => write!(f, "s3://{bucket}"),
            Location::Object { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.split(resolve::SEPARATORS)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list {location}: {source}")]
    Walk {
        location: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("object storage error on {location}: {source}")]
    Object {
        location: String,
        #[source]
        source: ObjectError,
    },

    #[error("no object storage client configured for {0}")]
    NoObjectClient(String),

    #[error("{0} is not handled by this backend")]
    WrongBackend(String),
}

impl StorageError {
    fn io(location: &Location, source: std::io::Error) -> Self {
        StorageError::Io {
            location: location.to_string(),
            source,
        }
    }

    fn object(location: &Location, source: ObjectError) -> Self {
        StorageError::Object {
            location: location.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Operations one storage backend provides for locations it owns.
pub trait Backend: Send + Sync {
    fn exists(&self, location: &Location) -> Result<bool>;

    fn is_dir(&self, location: &Location) -> Result<bool>;

    fn list_files(&self, location: &Location, recursive: bool) -> Result<Vec<Location>>;

    fn read_into(&self, location: &Location, out: &mut dyn Write) -> Result<u64>;

    fn write_from(&self, location: &Location, input: &mut dyn Read) -> Result<u64>;

    fn copy_file(&self, src: &Location, dst: &Location) -> Result<u64>;

    /// Move a file over `dst`, replacing it if present.
    fn replace(&self, src: &Location, dst: &Location) -> Result<()>;

    fn delete_file(&self, location: &Location) -> Result<()>;

    fn delete_tree(&self, location: &Location, children_only: bool) -> Result<()>;

    fn create_dir(&self, location: &Location) -> Result<()>;
}

pub struct LocalBackend;

fn local_path(location: &Location) -> Result<&Path> {
    match location {
        Location::Local(path) => Ok(path),
        other => Err(StorageError::WrongBackend(other.to_string())),
    }
}

impl Backend for LocalBackend {
    fn exists(&self, location: &Location) -> Result<bool> {
        Ok(local_path(location)?.exists())
    }

    fn is_dir(&self, location: &Location) -> Result<bool> {
        Ok(local_path(location)?.is_dir())
    }

    fn list_files(&self, location: &Location, recursive: bool) -> Result<Vec<Location>> {
        let files = fsops::list_files(local_path(location)?, recursive).map_err(|source| {
            StorageError::Walk {
                location: location.to_string(),
                source,
            }
        })?;
        Ok(files.into_iter().map(Location::Local).collect())
    }

    fn read_into(&self, location: &Location, out: &mut dyn Write) -> Result<u64> {
        let mut file = std::fs::File::open(local_path(location)?)
            .map_err(|e| StorageError::io(location, e))?;
        std::io::copy(&mut file, out).map_err(|e| StorageError::io(location, e))
    }

    fn write_from(&self, location: &Location, input: &mut dyn Read) -> Result<u64> {
        let path = local_path(location)?;
        let mut write = || -> std::io::Result<u64> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::File::create(&path)?;
            std::io::copy(input, &mut file)
        };
        write().map_err(|e| StorageError::io(location, e))
    }

    fn copy_file(&self, src: &Location, dst: &Location) -> Result<u64> {
        fsops::copy_file(local_path(src)?, local_path(dst)?).map_err(|e| StorageError::io(src, e))
    }

    fn replace(&self, src: &Location, dst: &Location) -> Result<()> {
        fsops::move_path(local_path(src)?, local_path(dst)?).map_err(|e| StorageError::io(src, e))
    }

    fn delete_file(&self, location: &Location) -> Result<()> {
        fsops::delete_file(local_path(location)?).map_err(|e| StorageError::io(location, e))
    }

    fn delete_tree(&self, location: &Location, children_only: bool) -> Result<()> {
        fsops::delete_tree(local_path(location)?, children_only)
            .map_err(|e| StorageError::io(location, e))
    }

    fn create_dir(&self, location: &Location) -> Result<()> {
        std::fs::create_dir_all(local_path(location)?).map_err(|e| StorageError::io(location, e))
    }
}

/// Object storage seen as a tree: "directories" are key prefixes.
pub struct ObjectBackend {
    client: Arc<dyn ObjectClient>,
}

impl ObjectBackend {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }

    fn keys_below(&self, location: &Location) -> Result<Vec<String>> {
        let (bucket, key) = object_parts(location)?;
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };
        self.client
            .list(bucket, &prefix)
            .map_err(|e| StorageError::object(location, e))
    }
}

fn object_parts(location: &Location) -> Result<(&str, &str)> {
    match location {
        Location::Object { bucket, key } => Ok((bucket, key)),
        other => Err(StorageError::WrongBackend(other.to_string())),
    }
}

impl Backend for ObjectBackend {
    fn exists(&self, location: &Location) -> Result<bool> {
        let (bucket, key) = object_parts(location)?;
        let found = if key.is_empty() {
            self.client.bucket_exists(bucket)
        } else {
            self.client.head(bucket, key)
        }
        .map_err(|e| StorageError::object(location, e))?;
        if found || key.is_empty() {
            return Ok(found);
        }
        self.is_dir(location)
    }

    fn is_dir(&self, location: &Location) -> Result<bool> {
        let (bucket, key) = object_parts(location)?;
        if key.is_empty() {
            return self
                .client
                .bucket_exists(bucket)
                .map_err(|e| StorageError::object(location, e));
        }
        match self.keys_below(location) {
            Ok(keys) => Ok(!keys.is_empty()),
            Err(StorageError::Object {
                source: ObjectError::NoSuchBucket(_),
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_files(&self, location: &Location, recursive: bool) -> Result<Vec<Location>> {
        let Location::Object { bucket, .. } = location else {
            return Err(StorageError::WrongBackend(location.to_string()));
        };
        let files = self
            .keys_below(location)?
            .into_iter()
            .map(|key| Location::Object {
                bucket: bucket.clone(),
                key,
            })
            .filter(|file| {
                recursive
                    || file
                        .relative_to(location)
                        .is_some_and(|rel| !rel.contains('/'))
            })
            .collect();
        Ok(files)
    }

    fn read_into(&self, location: &Location, out: &mut dyn Write) -> Result<u64> {
        let (bucket, key) = object_parts(location)?;
        self.client
            .get(bucket, key, out)
            .map_err(|e| StorageError::object(location, e))
    }

    fn write_from(&self, location: &Location, input: &mut dyn Read) -> Result<u64> {
        let (bucket, key) = object_parts(location)?;
        self.client
            .put(bucket, key, input)
            .map_err(|e| StorageError::object(location, e))
    }

    fn copy_file(&self, src: &Location, dst: &Location) -> Result<u64> {
        let (src_bucket, src_key) = object_parts(src)?;
        let (dst_bucket, dst_key) = object_parts(dst)?;
        self.client
            .copy(src_bucket, src_key, dst_bucket, dst_key)
            .map_err(|e| StorageError::object(src, e))?;
        Ok(0)
    }

    fn replace(&self, src: &Location, dst: &Location) -> Result<()> {
        self.copy_file(src, dst)?;
        self.delete_file(src)
    }

    fn delete_file(&self, location: &Location) -> Result<()> {
        let (bucket, key) = object_parts(location)?;
        self.client
            .delete(bucket, key)
            .map_err(|e| StorageError::object(location, e))
    }

    fn delete_tree(&self, location: &Location, children_only: bool) -> Result<()> {
        let (bucket, key) = object_parts(location)?;
        if !self.is_dir(location)? {
            return Ok(());
        }
        for child in self.keys_below(location)? {
            self.client
                .delete(bucket, &child)
                .map_err(|e| StorageError::object(location, e))?;
        }
        if !children_only
            && !key.is_empty()
            && self
                .client
                .head(bucket, key)
                .map_err(|e| StorageError::object(location, e))?
        {
            self.delete_file(location)?;
        }
        Ok(())
    }

    fn create_dir(&self, _location: &Location) -> Result<()> {
        Ok(())
    }
}

/// Backend dispatch plus the dry-run gate for one run.
pub struct Storage {
    local: LocalBackend,
    object: Option<ObjectBackend>,
    dry_run: bool,
    progress: Arc<Progress>,
}

impl Storage {
    pub fn new(
        object_client: Option<Arc<dyn ObjectClient>>,
        dry_run: bool,
        progress: Arc<Progress>,
    ) -> Self {
        Self {
            local: LocalBackend,
            object: object_client.map(ObjectBackend::new),
            dry_run,
            progress,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn backend(&self, location: &Location) -> Result<&dyn Backend> {
        match location {
            Location::Local(_) => Ok(&self.local),
            Location::Object { .. } => self
                .object
                .as_ref()
                .map(|backend| backend as &dyn Backend)
                .ok_or_else(|| StorageError::NoObjectClient(location.to_string())),
        }
    }

    /// Under dry run, narrate `message` and report that the caller must skip.
    fn skip(&self, operation: &str, message: String) -> bool {
        if self.dry_run {
            self.progress.step_progress(&format!("DryRun:{operation}"), &message);
        }
        self.dry_run
    }

    pub fn exists(&self, location: &Location) -> Result<bool> {
        self.backend(location)?.exists(location)
    }

    pub fn is_dir(&self, location: &Location) -> Result<bool> {
        self.backend(location)?.is_dir(location)
    }

    pub fn list_files(&self, location: &Location, recursive: bool) -> Result<Vec<Location>> {
        self.backend(location)?.list_files(location, recursive)
    }

    pub fn read_all_lines(&self, location: &Location) -> Result<Vec<String>> {
        if let Location::Local(path) = location {
            return fsops::read_all_lines(path).map_err(|e| StorageError::io(location, e));
        }
        let text = self.read_to_string(location)?;
        Ok(text.lines().map(str::to_string).collect())
    }

    pub fn read_to_string(&self, location: &Location) -> Result<String> {
        let mut buffer = Vec::new();
        self.backend(location)?.read_into(location, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            StorageError::io(location, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    pub fn write_string(&self, location: &Location, content: &str) -> Result<u64> {
        if self.skip("WriteFile", format!("Writing File : {location}")) {
            return Ok(0);
        }
        self.backend(location)?
            .write_from(location, &mut content.as_bytes())
    }

    pub fn create_dir(&self, location: &Location) -> Result<()> {
        if self.skip("CreateDirectory", format!("Creating Directory : {location}")) {
            return Ok(());
        }
        self.backend(location)?.create_dir(location)
    }

    /// Copy one file, overwriting the destination. Copies that cross
    /// backends are staged through a local temporary file.
    pub fn copy_file(&self, src: &Location, dst: &Location) -> Result<u64> {
        if self.skip("CopyFile", format!("Copying File : {src} To {dst}")) {
            return Ok(0);
        }
        let bytes = self.transfer(src, dst)?;
        self.copied(src, dst);
        Ok(bytes)
    }

    fn transfer(&self, src: &Location, dst: &Location) -> Result<u64> {
        let from = self.backend(src)?;
        let to = self.backend(dst)?;
        if src.is_object() == dst.is_object() {
            return from.copy_file(src, dst);
        }
        let mut staged = tempfile::tempfile().map_err(|e| StorageError::io(src, e))?;
        let bytes = from.read_into(src, &mut staged)?;
        staged.rewind().map_err(|e| StorageError::io(src, e))?;
        to.write_from(dst, &mut staged)?;
        Ok(bytes)
    }

    fn copied(&self, src: &Location, dst: &Location) {
        let message = format!("Copied file: {src}  [to]  {dst}");
        tracing::debug!("{message}");
        self.progress.log("CopyMoveProgress", &message, LogLevel::Info);
    }

    /// Copy everything below `src` into `dst`, overwriting existing files.
    pub fn copy_tree(&self, src: &Location, dst: &Location) -> Result<u64> {
        if self.skip("CopyFolder", format!("Copying From : {src} To {dst}")) {
            return Ok(0);
        }
        if let (Location::Local(from), Location::Local(to)) = (src, dst) {
            return fsops::copy_tree(from, to, |a, b, _| {
                self.copied(&Location::Local(a.to_path_buf()), &Location::Local(b.to_path_buf()))
            })
            .map_err(|e| StorageError::io(src, e));
        }
        let mut bytes = 0;
        for file in self.list_files(src, true)? {
            let Some(rel) = file.relative_to(src) else {
                continue;
            };
            let target = dst.join(&rel);
            bytes += self.transfer(&file, &target)?;
            self.copied(&file, &target);
        }
        Ok(bytes)
    }

    /// Move a file over `dst`, replacing whatever is there.
    pub fn replace_file(&self, src: &Location, dst: &Location) -> Result<()> {
        if self.skip("MoveFile", format!("Moving File : {src} To {dst}")) {
            return Ok(());
        }
        if src.is_object() == dst.is_object() {
            return self.backend(src)?.replace(src, dst);
        }
        self.transfer(src, dst)?;
        self.backend(src)?.delete_file(src)
    }

    /// Move the contents of `src` into `dst`. With `merge`, directories that
    /// already exist at `dst` receive the moved content alongside their own;
    /// without it, `dst` is emptied first. `src` itself is left in place.
    pub fn move_tree(&self, src: &Location, dst: &Location, merge: bool) -> Result<()> {
        if self.skip("MoveFolderContent", format!("Moving From : {src} To {dst}")) {
            return Ok(());
        }
        if !merge {
            self.backend(dst)?.delete_tree(dst, true)?;
        }
        if let (Location::Local(from), Location::Local(to)) = (src, dst) {
            return fsops::move_contents(from, to, &mut |a, b| {
                let message = format!("Moved: {}  [to]  {}", a.display(), b.display());
                self.progress.log("CopyMoveProgress", &message, LogLevel::Info);
            })
            .map_err(|e| StorageError::io(src, e));
        }
        self.copy_tree(src, dst)?;
        self.backend(src)?.delete_tree(src, true)
    }

    pub fn delete_file(&self, location: &Location) -> Result<()> {
        if self.skip("DeleteFile", format!("Deleting File : {location}")) {
            return Ok(());
        }
        self.backend(location)?.delete_file(location)
    }

    /// Delete a directory (or key prefix) and its content, or only its content.
    pub fn delete_tree(&self, location: &Location, children_only: bool) -> Result<()> {
        let what = if children_only { "Contents Of" } else { "Directory" };
        if self.skip("DeleteFolder", format!("Deleting {what} : {location}")) {
            return Ok(());
        }
        self.backend(location)?.delete_tree(location, children_only)
    }
}
