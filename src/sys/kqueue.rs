// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use crate::events::Events;
use crate::sys::{EventBatch, PollEvent, Poller, EVENT_BATCH};
use smallvec::SmallVec;
use std::{
    fs::File,
    io, mem,
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
    ptr,
};

pub(crate) struct Kqueue {
    kqueue: File,
}

impl Kqueue {
    pub(crate) fn new() -> io::Result<Kqueue> {
        let fd = syscall!(kqueue())?;
        Ok(Kqueue {
            kqueue: unsafe { File::from_raw_fd(fd) },
        })
    }

    fn create_event(fd: RawFd, filter: i16, flags: u16, seq: u64) -> libc::kevent {
        // Field-by-field assignment because the kevent layout grows extra
        // members on some BSDs.
        let mut event: libc::kevent = unsafe { mem::zeroed() };
        event.ident = fd as libc::uintptr_t;
        event.filter = filter as _;
        event.flags = flags as _;
        event.udata = seq as usize as *mut libc::c_void;
        event
    }

    // kqueue registers one kernel object per (fd, filter) pair, so a single
    // logical registration turns into one change per requested direction.
    fn create_events(fd: RawFd, events: Events, seq: u64) -> SmallVec<[libc::kevent; 2]> {
        let mut changes = SmallVec::new();
        if events.contains(Events::INPUT) {
            changes.push(Self::create_event(
                fd,
                libc::EVFILT_READ as i16,
                (libc::EV_ADD | libc::EV_ENABLE) as u16,
                seq,
            ));
        }
        if events.contains(Events::OUTPUT) {
            changes.push(Self::create_event(
                fd,
                libc::EVFILT_WRITE as i16,
                (libc::EV_ADD | libc::EV_ENABLE) as u16,
                seq,
            ));
        }
        changes
    }

    fn change(&self, changes: &[libc::kevent]) -> io::Result<()> {
        syscall!(kevent(
            self.kqueue.as_raw_fd(),
            changes.as_ptr(),
            changes.len() as libc::c_int,
            ptr::null_mut(),
            0,
            ptr::null()
        ))?;
        Ok(())
    }
}

impl Poller for Kqueue {
    fn add(&self, fd: RawFd, events: Events, seq: u64) -> io::Result<()> {
        self.change(&Self::create_events(fd, events, seq))
    }

    // EV_ADD on an existing (fd, filter) pair updates it in place.
    fn modify(&self, fd: RawFd, events: Events, seq: u64) -> io::Result<()> {
        self.change(&Self::create_events(fd, events, seq))
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        // The two filters are separate kernel objects; delete each on its
        // own so a direction that was never subscribed cannot fail the
        // other one.
        let mut deleted = false;
        let mut last_err = None;
        for &filter in &[libc::EVFILT_READ as i16, libc::EVFILT_WRITE as i16] {
            let event = Self::create_event(fd, filter, libc::EV_DELETE as u16, 0);
            match self.change(&[event]) {
                Ok(()) => deleted = true,
                Err(err) => last_err = Some(err),
            }
        }
        if deleted {
            Ok(())
        } else {
            Err(last_err.unwrap_or_else(|| io::Error::from_raw_os_error(libc::ENOENT)))
        }
    }

    fn wait(&self, timeout_ms: i32, events: &mut EventBatch) -> io::Result<usize> {
        let timeout = libc::timespec {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
        };
        let timeout_ptr = if timeout_ms < 0 {
            ptr::null()
        } else {
            &timeout as *const libc::timespec
        };

        let mut items: [libc::kevent; EVENT_BATCH] = unsafe { mem::zeroed() };
        let count = syscall!(kevent(
            self.kqueue.as_raw_fd(),
            ptr::null(),
            0,
            items.as_mut_ptr(),
            EVENT_BATCH as libc::c_int,
            timeout_ptr
        ))?;

        for item in items.iter().take(count as usize) {
            let mut observed = Events::empty();
            if item.filter == libc::EVFILT_READ as _ {
                observed |= Events::INPUT;
            }
            if item.filter == libc::EVFILT_WRITE as _ {
                observed |= Events::OUTPUT;
            }
            if item.flags & libc::EV_ERROR as u16 != 0 {
                observed |= Events::ERROR;
            }
            if item.flags & libc::EV_EOF as u16 != 0 {
                observed |= Events::HANGUP;
            }
            events.push(PollEvent {
                seq: item.udata as usize as u64,
                events: observed,
            });
        }
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        syscall!(pipe(fds.as_mut_ptr())).unwrap();
        (fds[0], fds[1])
    }

    #[test]
    fn wait_reports_readable_pipe_under_its_seq() {
        let kqueue = Kqueue::new().unwrap();
        let (rd, wr) = pipe();

        kqueue.add(rd, Events::INPUT, 7).unwrap();

        let mut events: EventBatch = SmallVec::new();
        assert_eq!(kqueue.wait(0, &mut events).unwrap(), 0);

        syscall!(write(wr, b"x".as_ptr() as *const _, 1)).unwrap();

        events.clear();
        assert_eq!(kqueue.wait(1000, &mut events).unwrap(), 1);
        assert_eq!(events[0].seq, 7);
        assert!(events[0].events.contains(Events::INPUT));

        kqueue.remove(rd).unwrap();
        syscall!(close(rd)).unwrap();
        syscall!(close(wr)).unwrap();
    }

    #[test]
    fn remove_tolerates_a_direction_that_was_never_subscribed() {
        let kqueue = Kqueue::new().unwrap();
        let (rd, wr) = pipe();

        kqueue.add(rd, Events::INPUT, 4).unwrap();
        kqueue.remove(rd).unwrap();

        let err = kqueue.remove(rd).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        syscall!(close(rd)).unwrap();
        syscall!(close(wr)).unwrap();
    }
}
