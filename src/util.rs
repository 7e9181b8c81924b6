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
use std::io;

/// Detaches the process from the controlling terminal.
///
/// Standard daemon setup: fork (the parent reports the pid and exits), start
/// a new session, fork again so the daemon can never reacquire a terminal,
/// move to the filesystem root, and point the standard streams at /dev/null.
#[cfg(unix)]
pub fn daemonize() -> io::Result<()> {
    unsafe {
        let pid = libc::fork();

        if pid > 0 {
            eprintln!("Daemon started as process {}.", pid);
            libc::_exit(0);
        }

        if pid == -1 {
            return Err(io::Error::last_os_error());
        }

        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }

        let pid = libc::fork();

        if pid > 0 {
            libc::_exit(0);
        }

        if pid == -1 {
            return Err(io::Error::last_os_error());
        }

        if libc::chdir(b"/\0".as_ptr() as *const libc::c_char) == -1 {
            return Err(io::Error::last_os_error());
        }

        let fd = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        if libc::dup2(fd, libc::STDIN_FILENO) == -1
            || libc::dup2(fd, libc::STDOUT_FILENO) == -1
            || libc::dup2(fd, libc::STDERR_FILENO) == -1
        {
            return Err(io::Error::last_os_error());
        }

        if fd > 2 {
            libc::close(fd);
        }
    }

    Ok(())
}
