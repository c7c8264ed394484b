//! `EVFILT_READ` / `EVFILT_WRITE`: one epoll instance per direction,
//! registering each watched descriptor directly, exactly as the source's
//! `EVFILT_READ`/`EVFILT_WRITE` share an epoll-backed implementation.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::sync::Mutex;

use rustix::event::epoll;

use crate::epoll_util::EpollSet;
use crate::error::QueueError;
use crate::event::{flags, KEvent};
use crate::filter::{post_delivery, Filter, PostDelivery};
use crate::knote::{Knote, KnoteState, KnoteTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug)]
pub struct ReadWriteFilter {
    direction: Direction,
    epoll: EpollSet,
    knotes: Mutex<KnoteTable>,
}

impl ReadWriteFilter {
    pub fn new(direction: Direction) -> io::Result<Self> {
        Ok(ReadWriteFilter {
            direction,
            epoll: EpollSet::new()?,
            knotes: Mutex::new(KnoteTable::new()),
        })
    }

    fn interest(&self, edge: bool) -> epoll::EventFlags {
        let base = match self.direction {
            Direction::Read => epoll::EventFlags::IN,
            Direction::Write => epoll::EventFlags::OUT,
        };
        if edge {
            base | epoll::EventFlags::ET
        } else {
            base
        }
    }

    /// Computes the `data` payload and `EV_EOF`/`fflags` the source's
    /// level readiness would carry for `ident`, per §4.2.
    fn compute_data(&self, ident: usize, ready: epoll::EventFlags) -> (i64, bool, u32) {
        let fd = ident as RawFd;
        let mut eof = ready.intersects(epoll::EventFlags::HUP | epoll::EventFlags::ERR);
        let mut errno_fflags = 0u32;

        if matches!(self.direction, Direction::Write) && eof {
            if let Some(errno) = socket_error(fd) {
                errno_fflags = errno as u32;
            }
        }

        if matches!(self.direction, Direction::Read) && is_listening(fd) {
            // Linux has no portable way to read the exact accept backlog
            // depth; BSD callers only rely on "at least one pending".
            return (1, eof, errno_fflags);
        }

        let data = match file_size_offset(fd) {
            Some((size, offset)) if size >= offset => size - offset,
            _ => bytes_available(fd).unwrap_or(0) as i64,
        };

        if matches!(self.direction, Direction::Read) && data == 0 && ready.contains(epoll::EventFlags::HUP) {
            eof = true;
        }

        (data, eof, errno_fflags)
    }
}

impl Filter for ReadWriteFilter {
    fn pfd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }

    fn contains(&self, ident: usize) -> bool {
        self.knotes.lock().unwrap().contains(ident)
    }

    fn copyin(&self, change: KEvent) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();
        let edge = change.has_flag(flags::EV_CLEAR);
        let fd = change.ident as RawFd;

        if let Some(kn) = table.get_mut(change.ident) {
            kn.kev.fflags = change.fflags;
            kn.kev.data = change.data;
            kn.kev.udata = change.udata;
            kn.kev.flags = change.flags;
            if change.has_flag(flags::EV_DISABLE) {
                kn.enabled = false;
            } else if change.has_flag(flags::EV_ENABLE) || change.has_flag(flags::EV_ADD) {
                kn.enabled = true;
            }
        } else if change.has_flag(flags::EV_ADD) {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            self.epoll
                .add(borrowed, change.ident as u64, self.interest(edge))
                .map_err(QueueError::from)?;
            table.insert(change.ident, Knote::new(change));
            return Ok(());
        } else {
            return Err(QueueError::NoSuchEntry);
        }

        if change.has_flag(flags::EV_ADD) {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            self.epoll
                .modify(borrowed, change.ident as u64, self.interest(edge))
                .map_err(QueueError::from)?;
        }
        Ok(())
    }

    fn delete(&self, ident: usize) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();
        if table.remove(ident).is_none() {
            return Err(QueueError::NoSuchEntry);
        }
        let borrowed = unsafe { BorrowedFd::borrow_raw(ident as RawFd) };
        let _ = self.epoll.delete(borrowed);
        Ok(())
    }

    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize> {
        let ready = self.epoll.wait(Some(std::time::Duration::ZERO))?;
        let mut table = self.knotes.lock().unwrap();

        for (ident, ev_flags) in ready {
            if let Some(kn) = table.get_mut(ident as usize) {
                if !kn.enabled {
                    continue;
                }
                let (data, eof, err_fflags) = self.compute_data(ident as usize, ev_flags);
                kn.kev.data = data;
                if eof {
                    kn.kev.flags |= flags::EV_EOF;
                    if err_fflags != 0 {
                        kn.kev.fflags = err_fflags;
                    }
                } else {
                    kn.kev.flags &= !flags::EV_EOF;
                }
                kn.state = KnoteState::Fired;
            }
        }

        let mut n = 0;
        let mut to_destroy = Vec::new();
        let mut to_disable = Vec::new();

        for slot in out.iter_mut() {
            let fired_ident = table
                .fired()
                .map(|(ident, _)| *ident)
                .next();
            let ident = match fired_ident {
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
                    to_disable.push(ident);
                }
                PostDelivery::Rewatch => {
                    if kn.clear() {
                        kn.kev.data = 0;
                    }
                    kn.state = KnoteState::Watching;
                }
            }
            n += 1;
        }

        for ident in to_destroy {
            table.remove(ident);
            let borrowed = unsafe { BorrowedFd::borrow_raw(ident as RawFd) };
            let _ = self.epoll.delete(borrowed);
        }

        Ok(n)
    }

    fn close(&self) {
        let mut table = self.knotes.lock().unwrap();
        for (ident, _) in table.iter_mut() {
            let borrowed = unsafe { BorrowedFd::borrow_raw(*ident as RawFd) };
            let _ = self.epoll.delete(borrowed);
        }
    }
}

// -- small syscall helpers, grounded in the same "drop to libc where rustix
// doesn't cover it" precedent the teacher sets in `kqueue.rs`. --

fn bytes_available(fd: RawFd) -> Option<i32> {
    let mut n: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n as *mut libc::c_int) };
    if rc == 0 {
        Some(n)
    } else {
        None
    }
}

fn file_size_offset(fd: RawFd) -> Option<(i64, i64)> {
    let mut st: MaybeUninit<libc::stat> = MaybeUninit::uninit();
    let rc = unsafe { libc::fstat(fd, st.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let st = unsafe { st.assume_init() };
    if (st.st_mode & libc::S_IFMT) != libc::S_IFREG {
        return None;
    }
    let offset = unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) };
    if offset < 0 {
        return None;
    }
    Some((st.st_size as i64, offset as i64))
}

fn is_listening(fd: RawFd) -> bool {
    let mut val: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            &mut val as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    rc == 0 && val != 0
}

fn socket_error(fd: RawFd) -> Option<i32> {
    let mut val: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut val as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 && val != 0 {
        Some(val)
    } else {
        None
    }
}
