// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
//! The cross-thread wake channel.
//!
//! A readable descriptor the loop keeps registered under its reserved
//! sequence number. Any thread signals it with [`WakeChannel::wake`]; the
//! owning thread drains it with [`WakeChannel::awoken`]. Signals coalesce:
//! however many wakes accumulate, one drain returns the descriptor to a
//! not-readable state.
//!
//! On Linux and Android this is an `eventfd` counter. Elsewhere a
//! non-blocking socket pair emulates the counter-fd contract, with the
//! drain consuming every accumulated byte.

use crate::sys;
use std::{
    fs::File,
    io,
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
};

pub(crate) struct WakeChannel {
    reader: File,
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    writer: File,
}

impl WakeChannel {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) fn new() -> io::Result<WakeChannel> {
        let fd = sys::create_eventfd()?;
        Ok(WakeChannel {
            reader: unsafe { File::from_raw_fd(fd) },
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(crate) fn new() -> io::Result<WakeChannel> {
        let (read_fd, write_fd) = sys::create_socket_pair()?;
        Ok(WakeChannel {
            reader: unsafe { File::from_raw_fd(read_fd) },
            writer: unsafe { File::from_raw_fd(write_fd) },
        })
    }

    /// The descriptor the loop registers with the readiness backend.
    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Posts one increment, making the read end readable.
    ///
    /// A full counter means the channel is already readable, so `EAGAIN`
    /// is success for our purposes. Any other failure is fatal: a loop
    /// that cannot be nudged can miss work forever.
    pub(crate) fn wake(&self) {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let (fd, payload) = (self.reader.as_raw_fd(), 1u64.to_ne_bytes());
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let (fd, payload) = (self.writer.as_raw_fd(), [1u8]);

        loop {
            match syscall!(write(fd, payload.as_ptr() as *const _, payload.len())) {
                Ok(_) => return,
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => panic!("could not write wake signal to fd {}: {}", fd, err),
            }
        }
    }

    /// Drains every pending increment. Read errors are ignored; the worst
    /// outcome of a failed drain is one spurious extra wake.
    pub(crate) fn awoken(&self) {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let mut counter = 0u64;
            loop {
                match syscall!(read(
                    self.reader.as_raw_fd(),
                    &mut counter as *mut u64 as *mut _,
                    8
                )) {
                    Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                    _ => return,
                }
            }
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let mut buf = [0u8; 128];
            loop {
                match syscall!(read(
                    self.reader.as_raw_fd(),
                    buf.as_mut_ptr() as *mut _,
                    buf.len()
                )) {
                    Ok(n) if n > 0 => continue,
                    Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                    _ => return,
                }
            }
        }
    }

    #[cfg(test)]
    fn is_readable(&self) -> bool {
        let mut pollfd = libc::pollfd {
            fd: self.reader.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        syscall!(poll(&mut pollfd, 1, 0)).unwrap() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_makes_the_channel_readable() {
        let channel = WakeChannel::new().unwrap();
        assert!(!channel.is_readable());

        channel.wake();
        assert!(channel.is_readable());
    }

    #[test]
    fn wakes_coalesce_into_one_drain() {
        let channel = WakeChannel::new().unwrap();

        channel.wake();
        channel.wake();
        channel.wake();
        assert!(channel.is_readable());

        channel.awoken();
        assert!(!channel.is_readable());
    }

    #[test]
    fn drain_on_idle_channel_is_harmless() {
        let channel = WakeChannel::new().unwrap();
        channel.awoken();
        assert!(!channel.is_readable());
    }
}
