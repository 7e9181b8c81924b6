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

//! Framed message codec.
//!
//! Every message starts with a fixed header of three little-endian `u32`
//! values: the payload length in bytes (header and sub-sends excluded), the
//! message kind (type tag in the low 16 bits, modifier bits in the high 16),
//! and the operation count.  The payload is an ordered sequence of typed
//! fields -- bytes, little-endian integers, and NUL-terminated UTF-8 strings
//! -- appended by the sender and consumed in the same order by the receiver.
//!
//! A message may carry *sub-sends*: raw byte ranges that travel on the wire
//! immediately after the framed payload, so that bulk data never passes
//! through the payload builder.  `read` does not consume sub-sends; their
//! sizes are agreed in-band and the receiver pulls them off the stream
//! explicitly.

use crate::memory::{Chunk, MemoryChunk};
use crate::protocol::ProtocolError;
use byteorder::{ByteOrder, LittleEndian};
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::str;

/// Size of the fixed message header on the wire.
pub const MESSAGE_HEADER_SIZE: usize = 12;

/// The client wants the batch acknowledged over the network.
pub const SAFETY_NETWORK: u32 = 0x0001_0000;
/// The daemon must flush to stable storage after a write batch.
pub const SAFETY_STORAGE: u32 = 0x0002_0000;
/// All bits of the kind word that carry modifiers rather than the type tag.
pub const MODIFIER_MASK: u32 = 0xffff_0000;

/// The operation a batch carries.  Type tags are numerically stable; they are
/// the low half of the kind word on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    None,
    Create,
    Delete,
    Read,
    Write,
    Status,
    Statistics,
    Reply,
}

impl MessageType {
    pub fn from_tag(tag: u32) -> Option<MessageType> {
        match tag {
            0 => Some(MessageType::None),
            1 => Some(MessageType::Create),
            2 => Some(MessageType::Delete),
            3 => Some(MessageType::Read),
            4 => Some(MessageType::Write),
            5 => Some(MessageType::Status),
            6 => Some(MessageType::Statistics),
            7 => Some(MessageType::Reply),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            MessageType::None => 0,
            MessageType::Create => 1,
            MessageType::Delete => 2,
            MessageType::Read => 3,
            MessageType::Write => 4,
            MessageType::Status => 5,
            MessageType::Statistics => 6,
            MessageType::Reply => 7,
        }
    }
}

/// An in-memory message envelope.
///
/// The same instance can be reused across `read` calls; reading replaces the
/// envelope's contents wholesale, so no partial state survives an error.
pub struct Message {
    kind: u32,
    count: u32,
    data: BytesMut,
    cursor: usize,
    sends: Vec<Chunk>,
}

impl Message {
    pub fn new(message_type: MessageType, modifier: u32) -> Message {
        Message {
            kind: message_type.tag() | (modifier & MODIFIER_MASK),
            count: 0,
            data: BytesMut::new(),
            cursor: 0,
            sends: Vec::new(),
        }
    }

    /// Creates an empty reply for a request.  Request and reply are
    /// one-to-one on a connection, so correlation is implicit in the
    /// per-connection FIFO order.
    pub fn new_reply(_request: &Message) -> Message { Message::new(MessageType::Reply, 0) }

    /// The type tag, if it names a known message type.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(self.kind & !MODIFIER_MASK)
    }

    /// The raw kind word as it appeared on the wire.
    pub fn kind(&self) -> u32 { self.kind }

    /// The modifier bits accompanying the type tag.
    pub fn type_modifier(&self) -> u32 { self.kind & MODIFIER_MASK }

    pub fn count(&self) -> u32 { self.count }

    /// Payload size in bytes, as the header will declare it.
    pub fn length(&self) -> usize { self.data.len() }

    /// Registers one more operation, reserving `size` bytes of payload
    /// capacity for its fields.
    pub fn add_operation(&mut self, size: usize) {
        self.count += 1;
        self.data.reserve(size);
    }

    pub fn append_1(&mut self, value: u8) { self.data.extend_from_slice(&[value]); }

    pub fn append_4(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    pub fn append_8(&mut self, value: u64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    /// Appends a string and its terminating NUL.
    pub fn append_string(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.data.extend_from_slice(&[0]);
    }

    pub fn get_1(&mut self) -> Result<u8, ProtocolError> {
        let buf = self.take(1)?;
        Ok(buf[0])
    }

    pub fn get_4(&mut self) -> Result<u32, ProtocolError> {
        let buf = self.take(4)?;
        Ok(LittleEndian::read_u32(buf))
    }

    pub fn get_8(&mut self) -> Result<u64, ProtocolError> {
        let buf = self.take(8)?;
        Ok(LittleEndian::read_u64(buf))
    }

    /// Reads the next NUL-terminated UTF-8 string from the payload.
    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let rest = &self.data[self.cursor..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| ProtocolError::Malformed("unterminated string".to_string()))?;
        let value = str::from_utf8(&rest[..nul])
            .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8 in string: {}", e)))?
            .to_string();
        self.cursor += nul + 1;
        Ok(value)
    }

    /// Attaches an out-of-band byte range.  It does not enter the payload;
    /// `write` emits it after the framed body, in attachment order.
    pub fn add_send(&mut self, chunk: Chunk) { self.sends.push(chunk); }

    pub fn sends(&self) -> &[Chunk] { &self.sends }

    /// Reads one message off the stream, replacing this envelope's contents.
    ///
    /// Returns `Ok(false)` on a clean close, i.e. EOF before the first header
    /// byte.  EOF anywhere later is a short read and fails with `Closed`.
    pub fn read<R: Read>(&mut self, stream: &mut R) -> Result<bool, ProtocolError> {
        let mut header = [0u8; MESSAGE_HEADER_SIZE];

        if !read_header(stream, &mut header)? {
            return Ok(false);
        }

        let length = LittleEndian::read_u32(&header[0..4]) as usize;
        let kind = LittleEndian::read_u32(&header[4..8]);
        let count = LittleEndian::read_u32(&header[8..12]);

        self.data.clear();
        self.data.resize(length, 0);

        if length > 0 {
            stream
                .read_exact(&mut self.data[..])
                .map_err(ProtocolError::from_read)?;
        }

        self.kind = kind;
        self.count = count;
        self.cursor = 0;
        self.sends.clear();

        Ok(true)
    }

    /// Emits header, payload, and every attached sub-send in order.  Sub-send
    /// ranges are resolved against the connection's memory chunk.
    pub fn write<W: Write>(&self, stream: &mut W, chunk: &MemoryChunk) -> Result<(), ProtocolError> {
        let mut header = [0u8; MESSAGE_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], self.data.len() as u32);
        LittleEndian::write_u32(&mut header[4..8], self.kind);
        LittleEndian::write_u32(&mut header[8..12], self.count);

        stream.write_all(&header)?;
        stream.write_all(&self.data)?;

        for send in &self.sends {
            stream.write_all(chunk.bytes(*send))?;
        }

        stream.flush()?;

        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ProtocolError> {
        if self.cursor + n > self.data.len() {
            return Err(ProtocolError::Malformed(format!(
                "payload too short: wanted {} more bytes, {} left",
                n,
                self.data.len() - self.cursor
            )));
        }

        let buf = &self.data[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(buf)
    }
}

fn read_header<R: Read>(stream: &mut R, header: &mut [u8]) -> Result<bool, ProtocolError> {
    let mut filled = 0;

    while filled < header.len() {
        match stream.read(&mut header[filled..]) {
            // EOF on the very first byte is a clean close between messages.
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ProtocolError::Closed),
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChunk;
    use matches::matches;
    use std::io::Cursor;

    fn empty_chunk() -> MemoryChunk { MemoryChunk::new(0) }

    #[test]
    fn roundtrip_typed_fields() {
        let mut msg = Message::new(MessageType::Status, SAFETY_NETWORK);
        msg.add_operation(0);
        msg.append_string("store");
        msg.append_string("collection");
        msg.append_1(7);
        msg.append_4(0xdead_beef);
        msg.append_8(0x0123_4567_89ab_cdef);

        let mut wire = Vec::new();
        msg.write(&mut wire, &empty_chunk()).unwrap();

        let mut decoded = Message::new(MessageType::None, 0);
        assert!(decoded.read(&mut Cursor::new(&wire)).unwrap());

        assert_eq!(decoded.message_type(), Some(MessageType::Status));
        assert_eq!(decoded.type_modifier(), SAFETY_NETWORK);
        assert_eq!(decoded.count(), 1);
        assert_eq!(decoded.length(), msg.length());
        assert_eq!(decoded.get_string().unwrap(), "store");
        assert_eq!(decoded.get_string().unwrap(), "collection");
        assert_eq!(decoded.get_1().unwrap(), 7);
        assert_eq!(decoded.get_4().unwrap(), 0xdead_beef);
        assert_eq!(decoded.get_8().unwrap(), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn header_is_little_endian() {
        let mut msg = Message::new(MessageType::Write, SAFETY_STORAGE);
        msg.add_operation(8);
        msg.append_8(42);

        let mut wire = Vec::new();
        msg.write(&mut wire, &empty_chunk()).unwrap();

        // length = 8, kind = tag 4 | storage bit, count = 1
        assert_eq!(&wire[0..4], &[8, 0, 0, 0]);
        assert_eq!(&wire[4..8], &[4, 0, 2, 0]);
        assert_eq!(&wire[8..12], &[1, 0, 0, 0]);
    }

    #[test]
    fn sub_sends_follow_the_payload() {
        let mut chunk = MemoryChunk::new(64);
        let first = chunk.get(3).unwrap();
        chunk.bytes_mut(first).copy_from_slice(b"abc");
        let second = chunk.get(2).unwrap();
        chunk.bytes_mut(second).copy_from_slice(b"de");

        let mut msg = Message::new(MessageType::Reply, 0);
        msg.add_operation(8);
        msg.append_8(3);
        msg.add_send(first);
        msg.add_operation(8);
        msg.append_8(2);
        msg.add_send(second);

        let mut wire = Vec::new();
        msg.write(&mut wire, &chunk).unwrap();

        // Sub-sends never count toward the declared payload length.
        assert_eq!(msg.sends().len(), 2);
        assert_eq!(&wire[0..4], &[16, 0, 0, 0]);
        assert_eq!(&wire[MESSAGE_HEADER_SIZE + 16..], b"abcde");
    }

    #[test]
    fn clean_eof_is_not_an_error() {
        let mut msg = Message::new(MessageType::None, 0);
        assert_eq!(msg.read(&mut Cursor::new(&[])).unwrap(), false);
    }

    #[test]
    fn eof_mid_header_is_closed() {
        let mut msg = Message::new(MessageType::None, 0);
        let result = msg.read(&mut Cursor::new(&[1, 0, 0]));
        assert!(matches!(result, Err(ProtocolError::Closed)));
    }

    #[test]
    fn eof_mid_payload_is_closed() {
        let mut request = Message::new(MessageType::Create, 0);
        request.add_operation(0);
        request.append_string("incomplete");

        let mut wire = Vec::new();
        request.write(&mut wire, &empty_chunk()).unwrap();
        wire.truncate(wire.len() - 4);

        let mut msg = Message::new(MessageType::None, 0);
        let result = msg.read(&mut Cursor::new(&wire));
        assert!(matches!(result, Err(ProtocolError::Closed)));
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let mut msg = Message::new(MessageType::Create, 0);
        msg.append_4(1234);
        let mut wire = Vec::new();
        msg.write(&mut wire, &empty_chunk()).unwrap();

        let mut decoded = Message::new(MessageType::None, 0);
        assert!(decoded.read(&mut Cursor::new(&wire)).unwrap());
        assert!(matches!(decoded.get_string(), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut msg = Message::new(MessageType::None, 0);
        let wire = [
            3, 0, 0, 0, // length
            1, 0, 0, 0, // kind
            1, 0, 0, 0, // count
            0xff, 0xfe, 0x00, // not UTF-8
        ];
        assert!(msg.read(&mut Cursor::new(&wire)).unwrap());
        assert!(matches!(msg.get_string(), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn short_payload_reads_are_malformed() {
        let mut msg = Message::new(MessageType::Read, 0);
        msg.append_4(9);
        let mut wire = Vec::new();
        msg.write(&mut wire, &empty_chunk()).unwrap();

        let mut decoded = Message::new(MessageType::None, 0);
        assert!(decoded.read(&mut Cursor::new(&wire)).unwrap());
        assert!(matches!(decoded.get_8(), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn reply_has_reply_type_and_no_operations() {
        let request = Message::new(MessageType::Delete, SAFETY_NETWORK);
        let reply = Message::new_reply(&request);
        assert_eq!(reply.message_type(), Some(MessageType::Reply));
        assert_eq!(reply.type_modifier(), 0);
        assert_eq!(reply.count(), 0);
    }

    #[test]
    fn unknown_type_tag_is_preserved() {
        let wire = [0u8, 0, 0, 0, 99, 0, 0, 0, 0, 0, 0, 0];
        let mut msg = Message::new(MessageType::None, 0);
        assert!(msg.read(&mut Cursor::new(&wire)).unwrap());
        assert_eq!(msg.message_type(), None);
        assert_eq!(msg.kind(), 99);
    }
}
