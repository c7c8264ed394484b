//! The queue dispatcher: routes changes to filters and drains fired
//! events off the aggregate readiness descriptor.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use rustix::event::epoll;

use crate::epoll_util::EpollSet;
use crate::error::QueueError;
use crate::event::{flags, KEvent};
use crate::filter::read_write::Direction;
use crate::filter::{
    Filter, FilterKind, ProcFilter, ReadWriteFilter, SignalFilter, TimerFilter, UserFilter,
    VnodeFilter,
};

type Slot = OnceLock<Box<dyn Filter>>;

/// A single kqueue-equivalent instance: an aggregate readiness descriptor
/// plus the seven filters, each constructed lazily on first use.
#[derive(Debug)]
pub struct Queue {
    epoll: EpollSet,
    filters: [Slot; crate::filter::FILTER_COUNT],
    // Guards lazy construction so two threads racing EV_ADD on the same
    // filter for the first time don't double-register its pfd.
    construct_lock: Mutex<()>,
}

impl Queue {
    /// Creates a new queue with its aggregate readiness descriptor. All
    /// seven filters are initialized lazily on first use.
    pub fn create() -> io::Result<Queue> {
        let epoll = EpollSet::new()?;
        log::trace!("create: epoll_fd={:?}", epoll.as_raw_fd());
        Ok(Queue {
            epoll,
            filters: [
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
                OnceLock::new(),
            ],
            construct_lock: Mutex::new(()),
        })
    }

    fn filter_for(&self, kind: FilterKind) -> io::Result<&dyn Filter> {
        let idx = kind.index();
        if let Some(f) = self.filters[idx].get() {
            return Ok(f.as_ref());
        }

        let _guard = self.construct_lock.lock().unwrap();
        if let Some(f) = self.filters[idx].get() {
            return Ok(f.as_ref());
        }

        let built: Box<dyn Filter> = match kind {
            FilterKind::Read => Box::new(ReadWriteFilter::new(Direction::Read)?),
            FilterKind::Write => Box::new(ReadWriteFilter::new(Direction::Write)?),
            FilterKind::Vnode => Box::new(VnodeFilter::new()?),
            FilterKind::Proc => Box::new(ProcFilter::new()?),
            FilterKind::Signal => Box::new(SignalFilter::new()?),
            FilterKind::Timer => Box::new(TimerFilter::new()?),
            FilterKind::User => Box::new(UserFilter::new()?),
        };

        let raw = built.pfd();
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
        self.epoll.add(borrowed, idx as u64, epoll::EventFlags::IN)?;

        let _ = self.filters[idx].set(built);
        Ok(self.filters[idx].get().unwrap().as_ref())
    }

    /// Applies `changes` in order, then collects up to `events_out.len()`
    /// fired events, honoring `timeout` (`None` blocks indefinitely,
    /// `Some(Duration::ZERO)` returns immediately).
    ///
    /// Per spec.md §7: a change with `EV_RECEIPT` always echoes an
    /// `EV_ERROR` event (success or failure) without consuming a "real"
    /// slot's worth of meaning; a change that fails without `EV_RECEIPT`
    /// stops the rest of the change list from applying, and is reported
    /// either in-band (if the caller is also collecting events in this
    /// same call) or through the return path (a plain change-only submit).
    pub fn submit(
        &self,
        changes: &[KEvent],
        events_out: &mut [KEvent],
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let mixed = !events_out.is_empty();
        let mut written = 0;
        let mut hard_error = None;

        for &change in changes {
            // Change application is never gated on remaining output
            // capacity: a register-only call (`events_out` empty, the
            // universal `kevent(kq, changes, n, NULL, 0, NULL)` shape)
            // must still apply every change in the batch. Only writing a
            // receipt event is gated on capacity.
            let receipt = change.has_flag(flags::EV_RECEIPT);
            match self.apply_change(change) {
                Ok(()) => {
                    if receipt && written < events_out.len() {
                        events_out[written] = KEvent::error_receipt(change, 0);
                        written += 1;
                    }
                }
                Err(err) => {
                    if receipt {
                        if written < events_out.len() {
                            events_out[written] = KEvent::error_receipt(change, err.errno() as i64);
                            written += 1;
                        }
                        continue;
                    }
                    if mixed && written < events_out.len() {
                        events_out[written] = KEvent::error_receipt(change, err.errno() as i64);
                        written += 1;
                    } else if !mixed {
                        hard_error = Some(err);
                    }
                    break;
                }
            }
        }

        if let Some(err) = hard_error {
            return Err(err.into());
        }

        if written >= events_out.len() {
            return Ok(written);
        }

        let ready = self.epoll.wait(timeout)?;
        for (idx, _) in ready {
            if written >= events_out.len() {
                break;
            }
            let idx = idx as usize;
            if let Some(filter) = self.filters.get(idx).and_then(Slot::get) {
                let out = &mut events_out[written..];
                let n = filter.copyout(out)?;
                written += n;
            }
        }

        Ok(written)
    }

    fn apply_change(&self, change: KEvent) -> Result<(), QueueError> {
        let kind = match FilterKind::from_raw(change.filter) {
            Some(k) => k,
            None => return Err(QueueError::InvalidFilter),
        };

        let filter = self.filter_for(kind).map_err(QueueError::from)?;

        // A change with no flags at all is only meaningless for a knote
        // that doesn't exist yet (there's nothing to create and nothing
        // to update). For an existing knote it's how EVFILT_USER's bare
        // trigger (flags=0, fflags=NOTE_TRIGGER) is submitted, per
        // examples/original_source/test/user.cpp.
        if change.flags == 0 && !filter.contains(change.ident) {
            return Err(QueueError::InvalidFlags);
        }

        if change.has_flag(flags::EV_DELETE) {
            return filter.delete(change.ident);
        }

        filter.copyin(change)
    }

    /// Whether any enabled knote is currently fired and awaiting pickup.
    pub fn is_readable(&self) -> bool {
        // A zero-timeout epoll_wait is the only race-free way to ask
        // "is the aggregate descriptor readable right now" without
        // consuming the event.
        matches!(self.epoll.wait(Some(Duration::ZERO)), Ok(v) if !v.is_empty())
    }
}

impl AsRawFd for Queue {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

impl AsFd for Queue {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.epoll.as_fd()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        log::trace!("close: epoll_fd={:?}", self.epoll.as_raw_fd());
        for slot in &self.filters {
            if let Some(f) = slot.get() {
                f.close();
            }
        }
    }
}
