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

//! Bounded scratch memory for the per-connection pipeline.
//!
//! Each connection worker owns one `MemoryChunk` of exactly one stripe,
//! which bounds the worker's memory and guarantees that a full stripe-sized
//! buffer is always available for a write batch.  Sub-buffers are handed out
//! by linear bump; resetting the chunk invalidates every outstanding range.

/// A sub-buffer handed out by a `MemoryChunk`, identified by range rather
/// than by reference so that several can be outstanding at once.  Reading a
/// range after `reset` yields whatever bytes the chunk holds by then; the
/// engine's batch discipline never does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    offset: usize,
    len: usize,
}

impl Chunk {
    pub fn len(&self) -> u64 { self.len as u64 }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// A prefix of this range, at most `len` bytes long.
    pub fn take(&self, len: u64) -> Chunk {
        Chunk {
            offset: self.offset,
            len: self.len.min(len as usize),
        }
    }
}

/// A single contiguous allocation with a bump cursor.
pub struct MemoryChunk {
    data: Vec<u8>,
    used: usize,
}

impl MemoryChunk {
    pub fn new(size: u64) -> MemoryChunk {
        MemoryChunk {
            data: vec![0; size as usize],
            used: 0,
        }
    }

    pub fn size(&self) -> u64 { self.data.len() as u64 }

    /// Returns the next `len` bytes, or `None` if they would overflow the
    /// chunk.
    pub fn get(&mut self, len: u64) -> Option<Chunk> {
        let len = len as usize;

        if len > self.data.len() - self.used {
            return None;
        }

        let chunk = Chunk {
            offset: self.used,
            len,
        };
        self.used += len;

        Some(chunk)
    }

    /// Returns the cursor to the start, invalidating all outstanding ranges.
    pub fn reset(&mut self) { self.used = 0; }

    pub fn bytes(&self, chunk: Chunk) -> &[u8] {
        &self.data[chunk.offset..chunk.offset + chunk.len]
    }

    pub fn bytes_mut(&mut self, chunk: Chunk) -> &mut [u8] {
        &mut self.data[chunk.offset..chunk.offset + chunk.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_until_full() {
        let mut chunk = MemoryChunk::new(16);

        let a = chunk.get(10).unwrap();
        let b = chunk.get(6).unwrap();
        assert_eq!(a.len(), 10);
        assert_eq!(b.len(), 6);

        // Full; even a single byte must fail now.
        assert!(chunk.get(1).is_none());
    }

    #[test]
    fn oversized_request_fails_without_moving_the_cursor() {
        let mut chunk = MemoryChunk::new(8);
        assert!(chunk.get(9).is_none());
        assert!(chunk.get(8).is_some());
    }

    #[test]
    fn reset_reclaims_everything() {
        let mut chunk = MemoryChunk::new(8);
        assert!(chunk.get(8).is_some());
        assert!(chunk.get(1).is_none());

        chunk.reset();
        assert!(chunk.get(8).is_some());
    }

    #[test]
    fn ranges_do_not_overlap() {
        let mut chunk = MemoryChunk::new(8);
        let a = chunk.get(4).unwrap();
        let b = chunk.get(4).unwrap();

        chunk.bytes_mut(a).copy_from_slice(b"aaaa");
        chunk.bytes_mut(b).copy_from_slice(b"bbbb");

        assert_eq!(chunk.bytes(a), b"aaaa");
        assert_eq!(chunk.bytes(b), b"bbbb");
    }

    #[test]
    fn take_clamps_to_the_range() {
        let mut chunk = MemoryChunk::new(8);
        let a = chunk.get(4).unwrap();
        assert_eq!(a.take(2).len(), 2);
        assert_eq!(a.take(100).len(), 4);
    }

    #[test]
    fn zero_length_ranges_are_allowed() {
        let mut chunk = MemoryChunk::new(4);
        let a = chunk.get(0).unwrap();
        assert!(a.is_empty());
        assert_eq!(chunk.bytes(a), b"");
    }
}
