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
use crate::backend::{BackendItem, DataBackend};
use fnv::FnvHashMap;
use std::sync::Arc;

/// Per-connection map of open backend handles.
///
/// Entries are keyed by `"store.collection.item"` and live until the item is
/// deleted or the connection ends; whichever way an entry leaves the map, the
/// backend sees exactly one `close` for it.  Concurrent connections keep
/// independent caches and may hold the same item open at the same time.
pub struct ItemCache {
    backend: Arc<dyn DataBackend>,
    files: FnvHashMap<String, BackendItem>,
}

fn key(store: &str, collection: &str, item: &str) -> String {
    format!("{}.{}.{}", store, collection, item)
}

impl ItemCache {
    pub fn new(backend: Arc<dyn DataBackend>) -> ItemCache {
        ItemCache {
            backend,
            files: FnvHashMap::default(),
        }
    }

    /// Creates the item through the backend and caches the new handle.
    pub fn create(&mut self, store: &str, collection: &str, item: &str) -> Option<&mut BackendItem> {
        let key = key(store, collection, item);

        match self.backend.create(store, collection, item) {
            Ok(file) => {
                if let Some(mut stale) = self.files.insert(key.clone(), file) {
                    self.backend.close(&mut stale);
                }
                self.files.get_mut(&key)
            },
            Err(e) => {
                warn!("[cache] create failed for '{}': {}", key, e);
                None
            },
        }
    }

    /// Returns the cached handle, opening the item on first use.
    pub fn open(&mut self, store: &str, collection: &str, item: &str) -> Option<&mut BackendItem> {
        let key = key(store, collection, item);

        if !self.files.contains_key(&key) {
            match self.backend.open(store, collection, item) {
                Ok(file) => {
                    self.files.insert(key.clone(), file);
                },
                Err(e) => {
                    warn!("[cache] open failed for '{}': {}", key, e);
                    return None;
                },
            }
        }

        self.files.get_mut(&key)
    }

    /// Removes the entry, if present, and closes its handle.
    pub fn close(&mut self, store: &str, collection: &str, item: &str) {
        if let Some(mut file) = self.files.remove(&key(store, collection, item)) {
            self.backend.close(&mut file);
        }
    }

    pub fn len(&self) -> usize { self.files.len() }
}

impl Drop for ItemCache {
    fn drop(&mut self) {
        for (_, mut file) in self.files.drain() {
            self.backend.close(&mut file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, ItemStatus};
    use spectral::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CallCounts {
        creates: usize,
        opens: usize,
        closes: usize,
    }

    /// Backend double that counts lifecycle calls.
    #[derive(Default)]
    struct CountingBackend {
        calls: Mutex<CallCounts>,
        fail_open: bool,
    }

    impl DataBackend for CountingBackend {
        fn init(&mut self, _path: &str) -> BackendResult<()> { Ok(()) }

        fn create(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem> {
            self.calls.lock().unwrap().creates += 1;
            Ok(BackendItem::new(key(store, collection, item)))
        }

        fn open(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem> {
            if self.fail_open {
                return Err(crate::backend::BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such item",
                )));
            }
            self.calls.lock().unwrap().opens += 1;
            Ok(BackendItem::new(key(store, collection, item)))
        }

        fn close(&self, _item: &mut BackendItem) {
            self.calls.lock().unwrap().closes += 1;
        }

        fn delete(&self, _item: &mut BackendItem) -> BackendResult<()> { Ok(()) }

        fn status(&self, _item: &mut BackendItem, flags: u32) -> BackendResult<ItemStatus> {
            Ok(ItemStatus {
                flags,
                modification_time: 0,
                size: 0,
            })
        }

        fn sync(&self, _item: &mut BackendItem) -> BackendResult<()> { Ok(()) }

        fn read(&self, _item: &mut BackendItem, _buf: &mut [u8], _offset: u64) -> BackendResult<u64> {
            Ok(0)
        }

        fn write(&self, _item: &mut BackendItem, buf: &[u8], _offset: u64) -> BackendResult<u64> {
            Ok(buf.len() as u64)
        }
    }

    #[test]
    fn open_reuses_the_cached_handle() {
        let backend = Arc::new(CountingBackend::default());
        let mut cache = ItemCache::new(backend.clone() as Arc<dyn DataBackend>);

        assert!(cache.open("s", "c", "i").is_some());
        assert!(cache.open("s", "c", "i").is_some());
        assert_that(&cache.len()).is_equal_to(1);

        assert_that(&backend.calls.lock().unwrap().opens).is_equal_to(1);
    }

    #[test]
    fn every_handle_is_closed_exactly_once() {
        let backend = Arc::new(CountingBackend::default());

        {
            let mut cache = ItemCache::new(backend.clone() as Arc<dyn DataBackend>);
            cache.create("s", "c", "one");
            cache.open("s", "c", "two");
            cache.open("s", "c", "three");

            // Explicit close removes the entry immediately.
            cache.close("s", "c", "two");
            assert_eq!(cache.len(), 2);
        }

        let calls = backend.calls.lock().unwrap();
        assert_that(&(calls.creates + calls.opens)).is_equal_to(3);
        assert_that(&calls.closes).is_equal_to(3);
    }

    #[test]
    fn close_of_an_unknown_key_is_a_no_op() {
        let backend = Arc::new(CountingBackend::default());
        let mut cache = ItemCache::new(backend.clone() as Arc<dyn DataBackend>);

        cache.close("s", "c", "missing");
        assert_eq!(backend.calls.lock().unwrap().closes, 0);
    }

    #[test]
    fn failed_open_leaves_no_entry() {
        let backend = Arc::new(CountingBackend {
            fail_open: true,
            ..CountingBackend::default()
        });
        let mut cache = ItemCache::new(backend.clone() as Arc<dyn DataBackend>);

        assert!(cache.open("s", "c", "i").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(backend.calls.lock().unwrap().closes, 0);
    }

    #[test]
    fn create_over_an_open_handle_closes_the_stale_one() {
        let backend = Arc::new(CountingBackend::default());
        let mut cache = ItemCache::new(backend.clone() as Arc<dyn DataBackend>);

        cache.open("s", "c", "i");
        cache.create("s", "c", "i");
        assert_eq!(cache.len(), 1);

        // The replaced handle must have been closed right away.
        assert_eq!(backend.calls.lock().unwrap().closes, 1);
    }

    #[test]
    fn distinct_items_get_distinct_keys() {
        let backend = Arc::new(CountingBackend::default());
        let mut cache = ItemCache::new(backend.clone() as Arc<dyn DataBackend>);

        cache.open("a", "b", "c");
        cache.open("a", "b.c", "d");
        cache.open("x", "y", "z");
        assert_eq!(cache.len(), 3);
    }
}
