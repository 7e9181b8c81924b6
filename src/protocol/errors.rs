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
use std::{error::Error, fmt, io};

/// Errors at the wire protocol layer.
#[derive(Debug)]
pub enum ProtocolError {
    /// The peer went away in the middle of a message.
    Closed,

    /// The framed payload could not be decoded.
    Malformed(String),

    /// An I/O error occurred while reading or writing a message.
    Io(io::Error),
}

impl ProtocolError {
    /// Maps an error from a mid-message stream read, where EOF means the
    /// peer vanished rather than the stream ending cleanly.
    pub fn from_read(e: io::Error) -> ProtocolError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Closed
        } else {
            ProtocolError::Io(e)
        }
    }

    /// Whether this error simply reflects the client having gone away, as
    /// opposed to a decoding failure the operator may care about.
    pub fn client_closed(&self) -> bool {
        match self {
            ProtocolError::Closed => true,
            ProtocolError::Io(e) => match e.kind() {
                io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe => true,
                _ => false,
            },
            ProtocolError::Malformed(_) => false,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Closed => write!(f, "connection closed mid-message"),
            ProtocolError::Malformed(reason) => write!(f, "malformed message: {}", reason),
            ProtocolError::Io(e) => write!(f, "message I/O failed: {}", e),
        }
    }
}

impl Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> ProtocolError { ProtocolError::Io(e) }
}
