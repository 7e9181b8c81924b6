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

/// Errors that can occur while bringing up the daemon.
#[derive(Debug)]
pub enum CreationError {
    /// A configured resource was missing or invalid.
    InvalidResource(String),

    /// The listening socket could not be created or bound.
    ListenerFailed(io::Error),
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CreationError::InvalidResource(reason) => write!(f, "invalid resource: {}", reason),
            CreationError::ListenerFailed(e) => write!(f, "listener failed: {}", e),
        }
    }
}

impl Error for CreationError {}

impl From<io::Error> for CreationError {
    fn from(e: io::Error) -> CreationError { CreationError::ListenerFailed(e) }
}
