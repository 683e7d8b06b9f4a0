// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use crate::events::Events;
use smallvec::SmallVec;
use std::{io, os::unix::io::RawFd, sync::Arc};

macro_rules! syscall {
    ($fn:ident $args:tt) => {{
        let res = unsafe { libc::$fn $args };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
mod kqueue;

/// Maximum number of readiness events retrieved per wait.
pub(crate) const EVENT_BATCH: usize = 16;

pub(crate) type EventBatch = SmallVec<[PollEvent; EVENT_BATCH]>;

/// One readiness event as reported by the kernel multiplexer, translated
/// into the crate's event vocabulary.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollEvent {
    pub(crate) seq: u64,
    pub(crate) events: Events,
}

/// Thin wrapper over a kernel readiness multiplexer.
///
/// Registrations are keyed by `(fd, seq)`; the seq travels through the
/// kernel opaquely and comes back attached to every observed event. The
/// requested mask covers `INPUT | OUTPUT` only; implementations report
/// `ERROR` and `HANGUP` whenever the kernel indicates them.
///
/// `wait` is only ever called by the thread that owns the loop; the control
/// operations may be called from any thread (the engine serializes them
/// under its own lock).
pub(crate) trait Poller: Send + Sync {
    fn add(&self, fd: RawFd, events: Events, seq: u64) -> io::Result<()>;
    fn modify(&self, fd: RawFd, events: Events, seq: u64) -> io::Result<()>;
    fn remove(&self, fd: RawFd) -> io::Result<()>;

    /// Blocks for up to `timeout_ms` milliseconds (`< 0` means forever,
    /// `0` means no blocking) and appends up to [`EVENT_BATCH`] observed
    /// events. Returns the number of events; `Ok(0)` is a timeout.
    fn wait(&self, timeout_ms: i32, events: &mut EventBatch) -> io::Result<usize>;
}

/// Creates the platform's readiness multiplexer.
pub(crate) fn new_poller() -> io::Result<Arc<dyn Poller>> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    return Ok(Arc::new(epoll::Epoll::new()?));
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    return Ok(Arc::new(kqueue::Kqueue::new()?));
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn create_eventfd() -> io::Result<RawFd> {
    syscall!(eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC))
}

/// Creates the non-blocking, close-on-exec socket pair that stands in for
/// a counter fd on platforms without one. Returns `(read_fd, write_fd)`.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub(crate) fn create_socket_pair() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    syscall!(socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()))?;
    for &fd in &fds {
        syscall!(fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK))?;
        syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
    }
    Ok((fds[0], fds[1]))
}
