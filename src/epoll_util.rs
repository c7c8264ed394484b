//! Thin wrapper around the aggregate/internal epoll instances every filter
//! multiplexes its native kernel objects through.
//!
//! This plays the role the teacher's `kqueue.rs` module plays for the BSD
//! side: one place that talks to the raw syscalls so the rest of the crate
//! works with plain Rust types.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use rustix::event::epoll;

/// One epoll instance, used either as a queue's aggregate readiness
/// descriptor or as a filter's internal multiplexer over several native
/// fds (e.g. READ/WRITE's watched sockets, TIMER's per-knote timerfds).
#[derive(Debug)]
pub struct EpollSet {
    fd: OwnedFd,
}

impl EpollSet {
    pub fn new() -> io::Result<Self> {
        let fd = epoll::epoll_create(epoll::CreateFlags::CLOEXEC)?;
        Ok(EpollSet { fd })
    }

    /// Registers `source`, tagging its events with `data` (typically an
    /// ident or a filter index) so the waker can tell what became ready.
    pub fn add(&self, source: BorrowedFd<'_>, data: u64, events: epoll::EventFlags) -> io::Result<()> {
        epoll::epoll_add(&self.fd, source, epoll::EventData::new_u64(data), events)
    }

    pub fn modify(&self, source: BorrowedFd<'_>, data: u64, events: epoll::EventFlags) -> io::Result<()> {
        epoll::epoll_mod(&self.fd, source, epoll::EventData::new_u64(data), events)
    }

    pub fn delete(&self, source: BorrowedFd<'_>) -> io::Result<()> {
        match epoll::epoll_del(&self.fd, source) {
            Ok(()) => Ok(()),
            // Already gone (e.g. the fd was closed before we got to
            // unregister it) — not an error the caller needs to see.
            Err(rustix::io::Errno::NOENT) | Err(rustix::io::Errno::BADF) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocks until at least one registered source is ready or `timeout`
    /// elapses, returning the `(data, events)` pair of each ready source.
    ///
    /// `Some(Duration::ZERO)` polls without blocking; `None` blocks
    /// indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<(u64, epoll::EventFlags)>> {
        let mut events = epoll::EventVec::with_capacity(256);
        let millis = timeout.map(|d| {
            let ms = d.as_millis();
            if ms > i32::MAX as u128 {
                i32::MAX
            } else {
                ms as i32
            }
        });

        loop {
            match epoll::epoll_wait(&self.fd, &mut events, millis.unwrap_or(-1)) {
                Ok(()) => break,
                Err(rustix::io::Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(events.iter().map(|ev| (ev.data.u64(), ev.flags)).collect())
    }
}

impl AsFd for EpollSet {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for EpollSet {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
