//! Object-store capabilities and the stores shipped with metavault.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};
use crate::object_url::ObjectUrl;

/// Write handle to one object.
///
/// Bytes become visible under the object's name only when
/// [`close`](ObjectWriter::close) succeeds; dropping the handle discards
/// them.
pub trait ObjectWriter: Write + Send {
    /// Publish the object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the bytes can't be made durable.
    fn close(self: Box<Self>) -> Result<()>;

    /// Discard everything written without publishing it.
    fn abort(self: Box<Self>) {
        drop(self);
    }
}

/// Access to the objects of one storage service.
pub trait ObjectClient: Send + Sync {
    /// Open a writer that replaces `bucket/object` on close.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the object can't be opened for writing.
    fn writer(&self, bucket: &str, object: &str) -> Result<Box<dyn ObjectWriter>>;

    /// Open `bucket/object` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    fn reader(&self, bucket: &str, object: &str) -> Result<Box<dyn Read + Send>>;

    /// Whether `bucket/object` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the service can't be queried.
    fn exists(&self, bucket: &str, object: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Objects stored as files under `root/<bucket>/<object>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an object, refusing paths that escape the root.
    fn path_of(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(object);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::malformed_url(
                &format!("local://{bucket}/{object}"),
                "object path must stay inside its bucket",
            ));
        }
        Ok(self.root.join(relative))
    }
}

struct LocalObjectWriter {
    file: BufWriter<NamedTempFile>,
    dest: PathBuf,
}

impl Write for LocalObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ObjectWriter for LocalObjectWriter {
    fn close(self: Box<Self>) -> Result<()> {
        let Self { file, dest } = *self;
        let file = file.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.as_file().sync_all()?;
        file.persist(&dest).map_err(|e| e.error)?;
        tracing::debug!(path = %dest.display(), "published object");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        let Self { file, dest } = *self;
        let (temp, _unflushed) = file.into_parts();
        let removed = temp.close();
        if let Err(e) = removed {
            tracing::warn!(path = %dest.display(), error = %e, "failed to remove unpublished object");
        }
    }
}

impl ObjectClient for LocalObjectStore {
    fn writer(&self, bucket: &str, object: &str) -> Result<Box<dyn ObjectWriter>> {
        let dest = self.path_of(bucket, object)?;
        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let file = NamedTempFile::new_in(dir)?;
        Ok(Box::new(LocalObjectWriter {
            file: BufWriter::new(file),
            dest,
        }))
    }

    fn reader(&self, bucket: &str, object: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_of(bucket, object)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(io::BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{bucket}/{object}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, bucket: &str, object: &str) -> Result<bool> {
        Ok(self.path_of(bucket, object)?.is_file())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

type ObjectMap = BTreeMap<(String, String), Bytes>;

/// Objects held in process memory. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<ObjectMap>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes of a published object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    pub fn get(&self, bucket: &str, object: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(&(bucket.to_owned(), object.to_owned()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{object}")))
    }

    /// Publish `data` directly.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn put(&self, bucket: &str, object: &str, data: impl Into<Bytes>) -> Result<()> {
        self.objects
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert((bucket.to_owned(), object.to_owned()), data.into());
        Ok(())
    }
}

struct MemoryObjectWriter {
    buf: Vec<u8>,
    key: (String, String),
    objects: Arc<Mutex<ObjectMap>>,
}

impl Write for MemoryObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for MemoryObjectWriter {
    fn close(self: Box<Self>) -> Result<()> {
        let Self { buf, key, objects } = *self;
        objects
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(key, Bytes::from(buf));
        Ok(())
    }
}

impl ObjectClient for MemoryObjectStore {
    fn writer(&self, bucket: &str, object: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryObjectWriter {
            buf: Vec::new(),
            key: (bucket.to_owned(), object.to_owned()),
            objects: Arc::clone(&self.objects),
        }))
    }

    fn reader(&self, bucket: &str, object: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.get(bucket, object)?)))
    }

    fn exists(&self, bucket: &str, object: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .contains_key(&(bucket.to_owned(), object.to_owned())))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Object clients keyed by URL scheme.
#[derive(Clone, Default)]
pub struct ObjectStores {
    clients: BTreeMap<String, Arc<dyn ObjectClient>>,
}

impl ObjectStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry serving `local://` URLs from `root`.
    #[must_use]
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new().with("local", Arc::new(LocalObjectStore::new(root)))
    }

    /// Register `client` for `scheme`, replacing any earlier one.
    #[must_use]
    pub fn with(mut self, scheme: impl Into<String>, client: Arc<dyn ObjectClient>) -> Self {
        self.clients.insert(scheme.into(), client);
        self
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedScheme`] if nothing serves the
    /// URL's scheme.
    pub fn client_for(&self, url: &ObjectUrl) -> Result<&Arc<dyn ObjectClient>> {
        self.clients
            .get(&url.scheme)
            .ok_or_else(|| StoreError::UnsupportedScheme(url.scheme.clone()))
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the scheme is unsupported or the object
    /// can't be opened.
    pub fn open_writer(&self, url: &ObjectUrl) -> Result<Box<dyn ObjectWriter>> {
        self.client_for(url)?.writer(&url.bucket, &url.object)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the scheme is unsupported or the object
    /// can't be opened.
    pub fn open_reader(&self, url: &ObjectUrl) -> Result<Box<dyn Read + Send>> {
        self.client_for(url)?.reader(&url.bucket, &url.object)
    }
}

impl std::fmt::Debug for ObjectStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStores")
            .field("schemes", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
