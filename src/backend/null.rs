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

//! The null data backend accepts every operation and stores nothing.  It is
//! useful for measuring the daemon and protocol without touching a disk.

use crate::backend::{BackendItem, BackendResult, DataBackend, ItemStatus};

pub struct NullBackend;

pub fn new_backend() -> Box<dyn DataBackend> { Box::new(NullBackend) }

impl DataBackend for NullBackend {
    fn init(&mut self, _path: &str) -> BackendResult<()> { Ok(()) }

    fn create(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem> {
        trace!("[null] create {}.{}.{}", store, collection, item);
        Ok(BackendItem::new(format!("{}.{}.{}", store, collection, item)))
    }

    fn open(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem> {
        trace!("[null] open {}.{}.{}", store, collection, item);
        Ok(BackendItem::new(format!("{}.{}.{}", store, collection, item)))
    }

    fn close(&self, item: &mut BackendItem) {
        trace!("[null] close {}", item.path());
    }

    fn delete(&self, item: &mut BackendItem) -> BackendResult<()> {
        trace!("[null] delete {}", item.path());
        Ok(())
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ITEM_STATUS_SIZE;

    #[test]
    fn accepts_everything_and_stores_nothing() {
        let backend = NullBackend;
        let mut item = backend.create("s", "c", "i").unwrap();

        assert_eq!(backend.write(&mut item, b"hello", 0).unwrap(), 5);

        let mut buf = [0u8; 5];
        assert_eq!(backend.read(&mut item, &mut buf, 0).unwrap(), 0);

        let status = backend.status(&mut item, ITEM_STATUS_SIZE).unwrap();
        assert_eq!(status.size, 0);

        backend.delete(&mut item).unwrap();
        backend.close(&mut item);
    }
}
