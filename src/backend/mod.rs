// Copyright (c) 2019 Julead Developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Pluggable storage backends.
//!
//! Two disjoint backend shapes exist: *data* backends store item bytes and
//! serve the request engine; *meta* backends store collection and item
//! metadata documents.  One of each kind is resolved by name from a static
//! registry at startup, initialized once, and shared immutably by every
//! connection worker afterwards.

pub mod mongodb;
pub mod null;
pub mod posix;

use crate::errors::CreationError;
use bson::Document;
use phf::phf_map;
use std::any::Any;
use std::{error::Error, fmt, io};

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by backend implementations.
#[derive(Debug)]
pub enum BackendError {
    /// A filesystem or socket operation failed.
    Io(io::Error),

    /// The metadata database rejected an operation.
    Database(String),

    /// The backend path string could not be understood.
    InvalidPath(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackendError::Io(e) => write!(f, "I/O error: {}", e),
            BackendError::Database(reason) => write!(f, "database error: {}", reason),
            BackendError::InvalidPath(reason) => write!(f, "invalid backend path: {}", reason),
        }
    }
}

impl Error for BackendError {}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> BackendError { BackendError::Io(e) }
}

/// The item status fields a caller can request.
pub const ITEM_STATUS_MODIFICATION_TIME: u32 = 1 << 0;
pub const ITEM_STATUS_SIZE: u32 = 1 << 1;

/// Status of a stored item.  `flags` declares which of the two values were
/// actually filled by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ItemStatus {
    pub flags: u32,
    pub modification_time: i64,
    pub size: u64,
}

/// Handle for an open backend object.
///
/// A handle is produced by `create` or `open`, owned by the connection that
/// produced it, and ends its life with exactly one `close`.  The private
/// state is whatever the owning backend needs to keep per open object; only
/// that backend ever looks inside.
pub struct BackendItem {
    path: String,
    data: Option<Box<dyn Any + Send>>,
}

impl BackendItem {
    pub fn new(path: String) -> BackendItem {
        BackendItem { path, data: None }
    }

    /// The backend-specific path of the underlying object.
    pub fn path(&self) -> &str { &self.path }

    pub fn set_data(&mut self, data: Box<dyn Any + Send>) { self.data = Some(data); }

    pub fn take_data(&mut self) -> Option<Box<dyn Any + Send>> { self.data.take() }

    /// Downcasts the private state to the owning backend's type.
    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.as_mut().and_then(|data| data.downcast_mut::<T>())
    }
}

/// A storage backend for item payloads.
///
/// `init` runs once before any worker; `fini` once after the listener has
/// stopped.  Everything else is called from connection workers, strictly
/// sequentially within one connection.  Distinct connections may hold the
/// same item open at the same time; implementations must tolerate that.
pub trait DataBackend: Send + Sync {
    /// `path` comes verbatim from the configuration and is opaque to the
    /// engine.
    fn init(&mut self, path: &str) -> BackendResult<()>;

    fn fini(&mut self) {}

    /// Optional per-worker setup and teardown.
    fn thread_init(&self) {}
    fn thread_fini(&self) {}

    /// Materializes a new object and returns a usable handle for it.
    fn create(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem>;

    /// Produces a handle for an existing object.  May be called for an
    /// object that was just created on the same connection.
    fn open(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem>;

    /// Releases a handle.  Called exactly once per handle.
    fn close(&self, item: &mut BackendItem);

    /// Removes the underlying object.  The engine closes the handle right
    /// after.
    fn delete(&self, item: &mut BackendItem) -> BackendResult<()>;

    /// Fills only the fields requested by `flags`.
    fn status(&self, item: &mut BackendItem, flags: u32) -> BackendResult<ItemStatus>;

    /// Flushes the object to stable storage.
    fn sync(&self, item: &mut BackendItem) -> BackendResult<()>;

    /// Reads at most `buf.len()` bytes at `offset`; the returned count is
    /// authoritative and may be short.
    fn read(&self, item: &mut BackendItem, buf: &mut [u8], offset: u64) -> BackendResult<u64>;

    /// Writes `buf` at `offset`; the returned count is authoritative and may
    /// be short.  The engine does not retry.
    fn write(&self, item: &mut BackendItem, buf: &[u8], offset: u64) -> BackendResult<u64>;
}

/// A metadata backend, storing one value document per `(namespace, key)`.
pub trait MetaBackend: Send + Sync {
    fn init(&mut self, path: &str) -> BackendResult<()>;

    fn fini(&mut self) {}

    fn create(&self, namespace: &str, key: &str, value: &Document) -> BackendResult<()>;

    fn delete(&self, namespace: &str, key: &str) -> BackendResult<()>;

    /// The value document stored under `key`, if any.
    fn get(&self, namespace: &str, key: &str) -> BackendResult<Option<Document>>;

    /// A cursor over every value document in the namespace.
    fn get_all(&self, namespace: &str) -> BackendResult<Box<dyn MetaIterator>>;
}

/// Cursor over the value documents of a namespace.
pub trait MetaIterator: Send {
    fn next(&mut self) -> BackendResult<Option<Document>>;
}

type DataBackendCtor = fn() -> Box<dyn DataBackend>;
type MetaBackendCtor = fn() -> Box<dyn MetaBackend>;

// Compile-time registration table; the original resolved these symbols out
// of loadable modules at startup.
static DATA_BACKENDS: phf::Map<&'static str, DataBackendCtor> = phf_map! {
    "null" => self::null::new_backend,
    "posix" => self::posix::new_backend,
};

static META_BACKENDS: phf::Map<&'static str, MetaBackendCtor> = phf_map! {
    "mongodb" => self::mongodb::new_backend,
};

/// Resolves and initializes the named data backend.
pub fn data_backend(name: &str, path: &str) -> Result<Box<dyn DataBackend>, CreationError> {
    let ctor = DATA_BACKENDS.get(name).ok_or_else(|| {
        CreationError::InvalidResource(format!("unknown storage backend '{}'", name))
    })?;

    let mut backend = ctor();
    backend.init(path).map_err(|e| {
        CreationError::InvalidResource(format!("storage backend '{}' failed to initialize: {}", name, e))
    })?;

    info!("[backend] storage backend '{}' initialized with path '{}'", name, path);

    Ok(backend)
}

/// Resolves and initializes the named meta backend.
pub fn meta_backend(name: &str, path: &str) -> Result<Box<dyn MetaBackend>, CreationError> {
    let ctor = META_BACKENDS.get(name).ok_or_else(|| {
        CreationError::InvalidResource(format!("unknown metadata backend '{}'", name))
    })?;

    let mut backend = ctor();
    backend.init(path).map_err(|e| {
        CreationError::InvalidResource(format!("metadata backend '{}' failed to initialize: {}", name, e))
    })?;

    info!("[backend] metadata backend '{}' initialized with path '{}'", name, path);

    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_names_fail_fast() {
        assert!(data_backend("bogus", "/tmp").is_err());
        assert!(meta_backend("bogus", "localhost:julea").is_err());
    }

    #[test]
    fn null_backend_resolves() {
        let backend = data_backend("null", "ignored").unwrap();
        let mut item = backend.create("a", "b", "c").unwrap();
        backend.close(&mut item);
    }

    #[test]
    fn item_data_downcasts_to_the_owning_type() {
        let mut item = BackendItem::new("a.b.c".to_string());
        item.set_data(Box::new(42u32));

        assert_eq!(item.data_mut::<u32>(), Some(&mut 42));
        assert!(item.data_mut::<String>().is_none());

        let data = item.take_data().unwrap();
        assert_eq!(*data.downcast::<u32>().unwrap(), 42);
        assert!(item.take_data().is_none());
    }
}
