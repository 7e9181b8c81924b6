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

//! The POSIX data backend stores each item as a plain file under
//! `storage_path/store/collection/item`.

use crate::backend::{
    BackendError, BackendItem, BackendResult, DataBackend, ItemStatus,
    ITEM_STATUS_MODIFICATION_TIME, ITEM_STATUS_SIZE,
};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

pub struct PosixBackend {
    root: PathBuf,
}

pub fn new_backend() -> Box<dyn DataBackend> {
    Box::new(PosixBackend {
        root: PathBuf::new(),
    })
}

impl PosixBackend {
    fn item_path(&self, store: &str, collection: &str, item: &str) -> PathBuf {
        self.root.join(store).join(collection).join(item)
    }
}

fn open_file(item: &mut BackendItem) -> BackendResult<&mut File> {
    let path = item.path().to_string();
    item.data_mut::<File>().ok_or_else(|| {
        BackendError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("item '{}' has no open file", path),
        ))
    })
}

impl DataBackend for PosixBackend {
    fn init(&mut self, path: &str) -> BackendResult<()> {
        fs::create_dir_all(path)?;
        self.root = PathBuf::from(path);
        Ok(())
    }

    fn create(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem> {
        let path = self.item_path(store, collection, item);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        trace!("[posix] created {}", path.display());

        let mut handle = BackendItem::new(path.to_string_lossy().into_owned());
        handle.set_data(Box::new(file));
        Ok(handle)
    }

    fn open(&self, store: &str, collection: &str, item: &str) -> BackendResult<BackendItem> {
        let path = self.item_path(store, collection, item);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut handle = BackendItem::new(path.to_string_lossy().into_owned());
        handle.set_data(Box::new(file));
        Ok(handle)
    }

    fn close(&self, item: &mut BackendItem) {
        trace!("[posix] close {}", item.path());
        // Dropping the file releases the descriptor.
        let _ = item.take_data();
    }

    fn delete(&self, item: &mut BackendItem) -> BackendResult<()> {
        fs::remove_file(item.path())?;
        Ok(())
    }

    fn status(&self, item: &mut BackendItem, flags: u32) -> BackendResult<ItemStatus> {
        let file = open_file(item)?;
        let metadata = file.metadata()?;

        let mut status = ItemStatus::default();
        status.flags = flags;

        if flags & ITEM_STATUS_MODIFICATION_TIME != 0 {
            status.modification_time = match metadata.modified()?.duration_since(UNIX_EPOCH) {
                Ok(elapsed) => elapsed.as_secs() as i64,
                Err(before_epoch) => -(before_epoch.duration().as_secs() as i64),
            };
        }

        if flags & ITEM_STATUS_SIZE != 0 {
            status.size = metadata.len();
        }

        Ok(status)
    }

    fn sync(&self, item: &mut BackendItem) -> BackendResult<()> {
        let file = open_file(item)?;
        file.sync_all()?;
        Ok(())
    }

    fn read(&self, item: &mut BackendItem, buf: &mut [u8], offset: u64) -> BackendResult<u64> {
        let file = open_file(item)?;
        let n = file.read_at(buf, offset)?;
        Ok(n as u64)
    }

    fn write(&self, item: &mut BackendItem, buf: &[u8], offset: u64) -> BackendResult<u64> {
        let file = open_file(item)?;
        let n = file.write_at(buf, offset)?;
        Ok(n as u64)
    }
}
