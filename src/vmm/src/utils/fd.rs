// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::os::unix::io::{AsRawFd, RawFd};

/// Errors associated with taking ownership of a raw file descriptor.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandleError {
    /// The descriptor value is negative.
    #[error("Invalid file descriptor {0}: must be non-negative")]
    Negative(RawFd),
    /// The descriptor value is one of stdin, stdout or stderr.
    #[error("Invalid file descriptor {0}: cannot be 0, 1, or 2 (stdin, stdout, stderr)")]
    StandardStream(RawFd),
}

/// Sole owner of one raw file descriptor.
///
/// The descriptor is closed exactly once, either by an explicit `release()` or when the
/// handle is dropped. Moving the handle moves the ownership with it.
#[derive(Debug)]
pub struct ResourceHandle {
    fd: Option<RawFd>,
}

impl ResourceHandle {
    /// Take ownership of `raw_fd`.
    ///
    /// Nothing is acquired on error, the caller still owns `raw_fd`.
    pub fn acquire(raw_fd: RawFd) -> Result<Self, HandleError> {
        match raw_fd {
            fd if fd < 0 => Err(HandleError::Negative(fd)),
            libc::STDIN_FILENO | libc::STDOUT_FILENO | libc::STDERR_FILENO => {
                Err(HandleError::StandardStream(raw_fd))
            }
            fd => Ok(ResourceHandle { fd: Some(fd) }),
        }
    }

    /// The held descriptor, `None` once released.
    pub fn value(&self) -> Option<RawFd> {
        self.fd
    }

    /// Close the descriptor if it is still held. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(fd) = self.fd.take() {
            // SAFETY: `fd` is owned by this handle and `take()` guarantees we never see it again.
            if unsafe { libc::close(fd) } < 0 {
                log::warn!(
                    "Failed to close file descriptor {}: {}",
                    fd,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

impl AsRawFd for ResourceHandle {
    /// Returns -1 for a released handle so that any syscall issued on it fails with EBADF.
    fn as_raw_fd(&self) -> RawFd {
        self.fd.unwrap_or(-1)
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Check whether `fd` refers to an open file description of this process.
pub fn is_fd_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}
