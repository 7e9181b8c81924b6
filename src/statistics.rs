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

//! Operation counters.
//!
//! Two instances exist at runtime: one per connection, touched only by its
//! worker, and one daemon-wide instance behind a mutex.  A worker folds its
//! counters into the daemon-wide instance exactly once, when the connection
//! drains.

/// The eight monotonic counters a daemon maintains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    FilesCreated,
    FilesDeleted,
    FilesStated,
    Sync,
    BytesRead,
    BytesWritten,
    BytesReceived,
    BytesSent,
}

#[derive(Clone, Debug, Default)]
pub struct Statistics {
    files_created: u64,
    files_deleted: u64,
    files_stated: u64,
    sync_count: u64,
    bytes_read: u64,
    bytes_written: u64,
    bytes_received: u64,
    bytes_sent: u64,
}

impl Statistics {
    pub fn new() -> Statistics { Statistics::default() }

    pub fn add(&mut self, counter: Counter, value: u64) {
        match counter {
            Counter::FilesCreated => self.files_created += value,
            Counter::FilesDeleted => self.files_deleted += value,
            Counter::FilesStated => self.files_stated += value,
            Counter::Sync => self.sync_count += value,
            Counter::BytesRead => self.bytes_read += value,
            Counter::BytesWritten => self.bytes_written += value,
            Counter::BytesReceived => self.bytes_received += value,
            Counter::BytesSent => self.bytes_sent += value,
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::FilesCreated => self.files_created,
            Counter::FilesDeleted => self.files_deleted,
            Counter::FilesStated => self.files_stated,
            Counter::Sync => self.sync_count,
            Counter::BytesRead => self.bytes_read,
            Counter::BytesWritten => self.bytes_written,
            Counter::BytesReceived => self.bytes_received,
            Counter::BytesSent => self.bytes_sent,
        }
    }

    /// Adds every counter into `other`.  Called once per connection, at
    /// teardown, with the daemon-wide mutex held.
    pub fn fold_into(&self, other: &mut Statistics) {
        other.files_created += self.files_created;
        other.files_deleted += self.files_deleted;
        other.files_stated += self.files_stated;
        other.sync_count += self.sync_count;
        other.bytes_read += self.bytes_read;
        other.bytes_written += self.bytes_written;
        other.bytes_received += self.bytes_received;
        other.bytes_sent += self.bytes_sent;
    }

    /// The counters in their fixed reply order: files created, deleted,
    /// stated, syncs, bytes read, written, received, sent.
    pub fn values(&self) -> [u64; 8] {
        [
            self.files_created,
            self.files_deleted,
            self.files_stated,
            self.sync_count,
            self.bytes_read,
            self.bytes_written,
            self.bytes_received,
            self.bytes_sent,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut stats = Statistics::new();
        stats.add(Counter::FilesCreated, 1);
        stats.add(Counter::FilesCreated, 2);
        stats.add(Counter::BytesWritten, 100);

        assert_eq!(stats.get(Counter::FilesCreated), 3);
        assert_eq!(stats.get(Counter::BytesWritten), 100);
        assert_eq!(stats.get(Counter::BytesRead), 0);
    }

    #[test]
    fn fold_adds_all_eight() {
        let mut local = Statistics::new();
        local.add(Counter::FilesCreated, 1);
        local.add(Counter::FilesDeleted, 2);
        local.add(Counter::FilesStated, 3);
        local.add(Counter::Sync, 4);
        local.add(Counter::BytesRead, 5);
        local.add(Counter::BytesWritten, 6);
        local.add(Counter::BytesReceived, 7);
        local.add(Counter::BytesSent, 8);

        let mut global = Statistics::new();
        global.add(Counter::FilesCreated, 10);

        local.fold_into(&mut global);

        assert_eq!(global.values(), [11, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn values_order_is_fixed() {
        let mut stats = Statistics::new();
        stats.add(Counter::Sync, 9);
        stats.add(Counter::BytesSent, 13);

        let values = stats.values();
        assert_eq!(values[3], 9);
        assert_eq!(values[7], 13);
    }
}
