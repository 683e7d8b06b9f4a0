// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use crate::events::Events;
use crate::sys::{EventBatch, PollEvent, Poller, EVENT_BATCH};
use std::{
    fs::File,
    io, mem,
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
    ptr,
};

pub(crate) struct Epoll {
    epoll: File,
}

impl Epoll {
    pub(crate) fn new() -> io::Result<Epoll> {
        let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Epoll {
            epoll: unsafe { File::from_raw_fd(fd) },
        })
    }

    fn create_event(events: Events, seq: u64) -> libc::epoll_event {
        let mut epoll_events = 0u32;
        if events.contains(Events::INPUT) {
            epoll_events |= libc::EPOLLIN as u32;
        }
        if events.contains(Events::OUTPUT) {
            epoll_events |= libc::EPOLLOUT as u32;
        }
        libc::epoll_event {
            events: epoll_events,
            u64: seq,
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, event: Option<libc::epoll_event>) -> io::Result<()> {
        let mut event = event;
        let event_ptr = event.as_mut().map_or(ptr::null_mut(), |e| e as *mut _);
        syscall!(epoll_ctl(self.epoll.as_raw_fd(), op, fd, event_ptr))?;
        Ok(())
    }
}

impl Poller for Epoll {
    fn add(&self, fd: RawFd, events: Events, seq: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some(Self::create_event(events, seq)))
    }

    fn modify(&self, fd: RawFd, events: Events, seq: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some(Self::create_event(events, seq)))
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, None)
    }

    fn wait(&self, timeout_ms: i32, events: &mut EventBatch) -> io::Result<usize> {
        let mut items: [libc::epoll_event; EVENT_BATCH] = unsafe { mem::zeroed() };
        let count = syscall!(epoll_wait(
            self.epoll.as_raw_fd(),
            items.as_mut_ptr(),
            EVENT_BATCH as libc::c_int,
            timeout_ms
        ))?;

        for item in items.iter().take(count as usize) {
            let epoll_events = item.events;
            let mut observed = Events::empty();
            if epoll_events & libc::EPOLLIN as u32 != 0 {
                observed |= Events::INPUT;
            }
            if epoll_events & libc::EPOLLOUT as u32 != 0 {
                observed |= Events::OUTPUT;
            }
            if epoll_events & libc::EPOLLERR as u32 != 0 {
                observed |= Events::ERROR;
            }
            if epoll_events & libc::EPOLLHUP as u32 != 0 {
                observed |= Events::HANGUP;
            }
            events.push(PollEvent {
                seq: item.u64,
                events: observed,
            });
        }
        Ok(count as usize)
    }
}
