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

//! The per-connection request engine.
//!
//! One engine runs per accepted connection, on its own worker thread, and
//! executes its connection strictly serially: read a framed request, execute
//! its operations against the storage backend, write the reply, repeat.  All
//! working state -- the memory chunk, the open-item cache, the counters, the
//! message envelope -- belongs to this worker alone.

mod cache;

pub use self::cache::ItemCache;

use crate::backend::{
    DataBackend, ItemStatus, ITEM_STATUS_MODIFICATION_TIME, ITEM_STATUS_SIZE,
};
use crate::memory::MemoryChunk;
use crate::protocol::{Message, MessageType, ProtocolError, SAFETY_NETWORK, SAFETY_STORAGE};
use crate::statistics::{Counter, Statistics};
use std::io::{self, BufReader, Read};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

pub struct Engine {
    input: BufReader<TcpStream>,
    output: TcpStream,
    backend: Arc<dyn DataBackend>,
    files: ItemCache,
    chunk: MemoryChunk,
    statistics: Statistics,
    global: Arc<Mutex<Statistics>>,
    stripe_size: u64,
}

impl Engine {
    pub fn new(
        stream: TcpStream,
        backend: Arc<dyn DataBackend>,
        global: Arc<Mutex<Statistics>>,
        stripe_size: u64,
    ) -> io::Result<Engine> {
        // Replies are small and latency-sensitive; never let Nagle hold them.
        stream.set_nodelay(true)?;

        let input = BufReader::new(stream.try_clone()?);

        Ok(Engine {
            input,
            output: stream,
            files: ItemCache::new(backend.clone()),
            chunk: MemoryChunk::new(stripe_size),
            statistics: Statistics::new(),
            global,
            backend,
            stripe_size,
        })
    }

    /// Serves the connection until the client goes away or the stream turns
    /// out to be garbage, then drains.
    pub fn run(mut self) {
        self.backend.thread_init();

        let mut message = Message::new(MessageType::None, 0);

        loop {
            match message.read(&mut self.input) {
                Ok(true) => {},
                Ok(false) => {
                    debug!("[engine] client disconnected");
                    break;
                },
                Err(e) => {
                    log_teardown(&e);
                    break;
                },
            }

            if let Err(e) = self.dispatch(&mut message) {
                log_teardown(&e);
                break;
            }
        }

        // Fold this connection's counters into the daemon-wide instance;
        // this is the only time a worker touches shared counter state.
        {
            let mut global = self.global.lock().unwrap();
            self.statistics.fold_into(&mut global);
        }

        // Destroying the cache closes every handle still open.
        drop(self.files);

        self.backend.thread_fini();

        debug!("[engine] connection drained");
    }

    fn dispatch(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        match message.message_type() {
            Some(MessageType::Create) => self.handle_create(message),
            Some(MessageType::Delete) => self.handle_delete(message),
            Some(MessageType::Read) => self.handle_read(message),
            Some(MessageType::Write) => self.handle_write(message),
            Some(MessageType::Status) => self.handle_status(message),
            Some(MessageType::Statistics) => self.handle_statistics(message),
            Some(MessageType::None) => Ok(()),
            Some(MessageType::Reply) | None => {
                warn!(
                    "[engine] ignoring request with invalid type {:#x}",
                    message.kind()
                );
                Ok(())
            },
        }
    }

    // CREATE is fire-and-forget: the daemon acknowledges nothing, not even
    // when the client asked for network safety.
    fn handle_create(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        let count = message.count();
        let store = message.get_string()?;
        let collection = message.get_string()?;

        for _ in 0..count {
            let item = message.get_string()?;

            if self.files.create(&store, &collection, &item).is_some() {
                self.statistics.add(Counter::FilesCreated, 1);
            }
        }

        Ok(())
    }

    fn handle_delete(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        let count = message.count();
        let store = message.get_string()?;
        let collection = message.get_string()?;

        let mut reply = if message.type_modifier() & SAFETY_NETWORK != 0 {
            Some(Message::new_reply(message))
        } else {
            None
        };

        for _ in 0..count {
            let item = message.get_string()?;

            if let Some(file) = self.files.open(&store, &collection, &item) {
                let deleted = match self.backend.delete(file) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("[engine] delete failed on '{}': {}", file.path(), e);
                        false
                    },
                };

                self.files.close(&store, &collection, &item);

                if deleted {
                    self.statistics.add(Counter::FilesDeleted, 1);
                }
            }

            if let Some(reply) = reply.as_mut() {
                // Zero-length operation; only the count matters to the client.
                reply.add_operation(0);
            }
        }

        if let Some(reply) = reply {
            reply.write(&mut self.output, &self.chunk)?;
        }

        Ok(())
    }

    fn handle_read(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        let count = message.count();
        let store = message.get_string()?;
        let collection = message.get_string()?;
        let item = message.get_string()?;

        let mut reply = Message::new_reply(message);
        let mut file = self.files.open(&store, &collection, &item);

        for _ in 0..count {
            let length = message.get_8()?;
            let offset = message.get_8()?;

            let buf = match self.chunk.get(length) {
                Some(buf) => buf,
                None => {
                    // The batch does not fit the chunk in one go: flush what
                    // has accumulated and start a fresh reply.
                    reply.write(&mut self.output, &self.chunk)?;
                    reply = Message::new_reply(message);
                    self.chunk.reset();

                    match self.chunk.get(length) {
                        Some(buf) => buf,
                        None => {
                            return Err(ProtocolError::Malformed(format!(
                                "read of {} bytes exceeds the stripe size {}",
                                length, self.stripe_size
                            )));
                        },
                    }
                },
            };

            let mut bytes_read = 0;

            if let Some(ref mut file) = file {
                match self.backend.read(file, self.chunk.bytes_mut(buf), offset) {
                    Ok(n) => bytes_read = n,
                    Err(e) => warn!("[engine] read failed on '{}': {}", file.path(), e),
                }
            }

            self.statistics.add(Counter::BytesRead, bytes_read);

            reply.add_operation(8);
            reply.append_8(bytes_read);

            if bytes_read > 0 {
                reply.add_send(buf.take(bytes_read));
            }

            self.statistics.add(Counter::BytesSent, bytes_read);
        }

        reply.write(&mut self.output, &self.chunk)?;
        self.chunk.reset();

        Ok(())
    }

    fn handle_write(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        let count = message.count();

        let mut reply = if message.type_modifier() & SAFETY_NETWORK != 0 {
            Some(Message::new_reply(message))
        } else {
            None
        };

        let store = message.get_string()?;
        let collection = message.get_string()?;
        let item = message.get_string()?;

        // The chunk is reset between batches, so one full stripe always fits.
        let buf = self
            .chunk
            .get(self.stripe_size)
            .expect("the memory chunk holds one full stripe between batches");

        let mut file = self.files.open(&store, &collection, &item);

        let mut merge_length: u64 = 0;
        let mut merge_offset: u64 = 0;

        for _ in 0..count {
            let length = message.get_8()?;
            let offset = message.get_8()?;

            if length > self.stripe_size {
                return Err(ProtocolError::Malformed(format!(
                    "write of {} bytes exceeds the stripe size {}",
                    length, self.stripe_size
                )));
            }

            // Merge operations that continue exactly where the previous one
            // ended, as long as the result still fits one stripe.
            if merge_length > 0
                && merge_offset + merge_length == offset
                && merge_length + length <= self.stripe_size
            {
                merge_length += length;
            } else if merge_length > 0 {
                let data = self.chunk.bytes_mut(buf.take(merge_length));
                self.input.read_exact(data).map_err(ProtocolError::from_read)?;
                self.statistics.add(Counter::BytesReceived, merge_length);

                if let Some(ref mut file) = file {
                    match self
                        .backend
                        .write(file, self.chunk.bytes(buf.take(merge_length)), merge_offset)
                    {
                        Ok(n) => self.statistics.add(Counter::BytesWritten, n),
                        Err(e) => warn!("[engine] write failed on '{}': {}", file.path(), e),
                    }
                }

                merge_length = 0;
                merge_offset = 0;
            }

            if merge_length == 0 {
                merge_length = length;
                merge_offset = offset;
            }

            if let Some(reply) = reply.as_mut() {
                // The acknowledged size is the declared length; merged
                // backend writes make true per-operation counts
                // unattributable.
                reply.add_operation(8);
                reply.append_8(length);
            }
        }

        if merge_length > 0 {
            let data = self.chunk.bytes_mut(buf.take(merge_length));
            self.input.read_exact(data).map_err(ProtocolError::from_read)?;
            self.statistics.add(Counter::BytesReceived, merge_length);

            if let Some(ref mut file) = file {
                match self
                    .backend
                    .write(file, self.chunk.bytes(buf.take(merge_length)), merge_offset)
                {
                    Ok(n) => self.statistics.add(Counter::BytesWritten, n),
                    Err(e) => warn!("[engine] write failed on '{}': {}", file.path(), e),
                }
            }
        }

        if message.type_modifier() & SAFETY_STORAGE != 0 {
            if let Some(ref mut file) = file {
                match self.backend.sync(file) {
                    Ok(()) => self.statistics.add(Counter::Sync, 1),
                    Err(e) => warn!("[engine] sync failed on '{}': {}", file.path(), e),
                }
            }
        }

        if let Some(reply) = reply {
            reply.write(&mut self.output, &self.chunk)?;
        }

        self.chunk.reset();

        Ok(())
    }

    fn handle_status(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        let count = message.count();
        let store = message.get_string()?;
        let collection = message.get_string()?;

        let mut reply = Message::new_reply(message);

        for _ in 0..count {
            let item = message.get_string()?;
            let flags = message.get_4()?;

            let mut status = ItemStatus::default();

            if let Some(file) = self.files.open(&store, &collection, &item) {
                match self.backend.status(file, flags) {
                    Ok(s) => {
                        status = s;
                        self.statistics.add(Counter::FilesStated, 1);
                    },
                    Err(e) => warn!("[engine] status failed on '{}': {}", file.path(), e),
                }
            }

            let mut fields = 0;
            if flags & ITEM_STATUS_MODIFICATION_TIME != 0 {
                fields += 1;
            }
            if flags & ITEM_STATUS_SIZE != 0 {
                fields += 1;
            }

            reply.add_operation(fields * 8);

            // Fixed field order: modification time before size.
            if flags & ITEM_STATUS_MODIFICATION_TIME != 0 {
                reply.append_8(status.modification_time as u64);
            }
            if flags & ITEM_STATUS_SIZE != 0 {
                reply.append_8(status.size);
            }
        }

        reply.write(&mut self.output, &self.chunk)?;

        Ok(())
    }

    fn handle_statistics(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        let get_all = message.get_1()?;

        let mut reply = Message::new_reply(message);
        reply.add_operation(8 * 8);

        if get_all == 0 {
            for value in self.statistics.values().iter() {
                reply.append_8(*value);
            }
        } else {
            // The global view covers connections that have already drained;
            // live workers fold their counters in at teardown.
            let global = self.global.lock().unwrap();
            for value in global.values().iter() {
                reply.append_8(*value);
            }
        }

        reply.write(&mut self.output, &self.chunk)?;

        Ok(())
    }
}

fn log_teardown(e: &ProtocolError) {
    if e.client_closed() {
        debug!("[engine] client went away mid-message");
    } else {
        error!("[engine] dropping connection after protocol error: {}", e);
    }
}
