//! `EVFILT_TIMER`: each knote owns a dedicated timerfd, multiplexed
//! through this filter's own epoll instance (the same "one epoll surface
//! per filter" shape READ/WRITE use).

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Mutex;
use std::time::Duration;

use rustix::time::{
    timerfd_create, timerfd_settime, Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags,
    Timespec,
};

use crate::epoll_util::EpollSet;
use crate::error::QueueError;
use crate::event::{fflags, flags, KEvent};
use crate::filter::{post_delivery, Filter, PostDelivery};
use crate::knote::{Knote, KnoteState, KnoteTable, Private};

fn duration_from_kevent(data: i64, fflags_bits: u32) -> Duration {
    let data = data.max(0) as u64;
    if fflags_bits & fflags::NOTE_SECONDS != 0 {
        Duration::from_secs(data)
    } else if fflags_bits & fflags::NOTE_USECONDS != 0 {
        Duration::from_micros(data)
    } else if fflags_bits & fflags::NOTE_NSECONDS != 0 {
        Duration::from_nanos(data)
    } else {
        Duration::from_millis(data)
    }
}

#[derive(Debug)]
pub struct TimerFilter {
    epoll: EpollSet,
    knotes: Mutex<KnoteTable>,
    fds: Mutex<HashMap<usize, OwnedFd>>,
}

impl TimerFilter {
    pub fn new() -> io::Result<Self> {
        Ok(TimerFilter {
            epoll: EpollSet::new()?,
            knotes: Mutex::new(KnoteTable::new()),
            fds: Mutex::new(HashMap::new()),
        })
    }

    fn arm(&self, ident: usize, period: Duration) -> io::Result<OwnedFd> {
        let fd = timerfd_create(
            TimerfdClockId::Monotonic,
            TimerfdFlags::NONBLOCK | TimerfdFlags::CLOEXEC,
        )?;

        let itimerspec = Itimerspec {
            it_interval: to_timespec(period),
            it_value: to_timespec(period),
        };
        timerfd_settime(&fd, TimerfdTimerFlags::empty(), &itimerspec)?;

        self.epoll
            .add(fd.as_fd(), ident as u64, rustix::event::epoll::EventFlags::IN)?;
        Ok(fd)
    }
}

fn to_timespec(d: Duration) -> Timespec {
    Timespec {
        tv_sec: d.as_secs() as _,
        tv_nsec: d.subsec_nanos() as _,
    }
}

impl Filter for TimerFilter {
    fn pfd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }

    fn contains(&self, ident: usize) -> bool {
        self.knotes.lock().unwrap().contains(ident)
    }

    fn copyin(&self, change: KEvent) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();

        if let Some(kn) = table.get_mut(change.ident) {
            kn.kev.udata = change.udata;
            kn.kev.flags = change.flags;
            if change.has_flag(flags::EV_DISABLE) {
                kn.enabled = false;
            } else if change.has_flag(flags::EV_ENABLE) || change.has_flag(flags::EV_ADD) {
                kn.enabled = true;
            }
            return Ok(());
        }

        if !change.has_flag(flags::EV_ADD) {
            return Err(QueueError::NoSuchEntry);
        }
        if change.data < 0 {
            return Err(QueueError::InvalidFlags);
        }

        let period = duration_from_kevent(change.data, change.fflags);
        let fd = self.arm(change.ident, period).map_err(QueueError::from)?;
        let raw = fd.as_raw_fd();
        self.fds.lock().unwrap().insert(change.ident, fd);

        let mut kn = Knote::new(change);
        kn.private = Private::Timer { fd: raw };
        table.insert(change.ident, kn);
        Ok(())
    }

    fn delete(&self, ident: usize) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();
        if table.remove(ident).is_none() {
            return Err(QueueError::NoSuchEntry);
        }
        if let Some(fd) = self.fds.lock().unwrap().remove(&ident) {
            let _ = self.epoll.delete(fd.as_fd());
        }
        Ok(())
    }

    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize> {
        let ready = self.epoll.wait(Some(Duration::ZERO))?;
        let mut table = self.knotes.lock().unwrap();
        let fds = self.fds.lock().unwrap();

        for (ident, _) in ready {
            let ident = ident as usize;
            if let (Some(kn), Some(fd)) = (table.get_mut(ident), fds.get(&ident)) {
                if !kn.enabled {
                    continue;
                }
                let mut buf = [0u8; 8];
                match rustix::io::read(fd, &mut buf) {
                    Ok(8) => {
                        let expirations = u64::from_ne_bytes(buf);
                        kn.kev.data = expirations as i64;
                        kn.state = KnoteState::Fired;
                    }
                    _ => {}
                }
            }
        }
        drop(fds);

        let mut n = 0;
        let mut to_destroy = Vec::new();

        for slot in out.iter_mut() {
            let ident = match table.fired().map(|(i, _)| *i).next() {
                Some(i) => i,
                None => break,
            };
            let kn = table.get_mut(ident).unwrap();
            *slot = kn.kev;

            match post_delivery(&kn.kev) {
                PostDelivery::Destroy => to_destroy.push(ident),
                PostDelivery::DisableAndRewatch => {
                    kn.enabled = false;
                    kn.state = KnoteState::Watching;
                }
                PostDelivery::Rewatch => {
                    kn.state = KnoteState::Watching;
                }
            }
            n += 1;
        }

        for ident in to_destroy {
            table.remove(ident);
            if let Some(fd) = self.fds.lock().unwrap().remove(&ident) {
                let _ = self.epoll.delete(fd.as_fd());
            }
        }

        Ok(n)
    }

    fn close(&self) {
        let mut fds = self.fds.lock().unwrap();
        for (_, fd) in fds.drain() {
            let _ = self.epoll.delete(fd.as_fd());
        }
    }
}
