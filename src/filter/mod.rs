//! The seven filter classes and the `Filter` trait the queue dispatcher
//! drives uniformly.

mod proc_waiter;
mod signal_waiter;

pub mod proc_filter;
pub mod read_write;
pub mod signal;
pub mod timer;
pub mod user;
pub mod vnode;

pub use proc_filter::ProcFilter;
pub use read_write::ReadWriteFilter;
pub use signal::SignalFilter;
pub use timer::TimerFilter;
pub use user::UserFilter;
pub use vnode::VnodeFilter;

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

use crate::error::QueueError;
use crate::event::{self, FilterId, KEvent};

/// Which of the seven filter classes a `KEvent::filter` value names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Read,
    Write,
    Vnode,
    Proc,
    Signal,
    Timer,
    User,
}

pub const FILTER_COUNT: usize = 7;

impl FilterKind {
    pub fn from_raw(filter: FilterId) -> Option<FilterKind> {
        match filter {
            event::EVFILT_READ => Some(FilterKind::Read),
            event::EVFILT_WRITE => Some(FilterKind::Write),
            event::EVFILT_VNODE => Some(FilterKind::Vnode),
            event::EVFILT_PROC => Some(FilterKind::Proc),
            event::EVFILT_SIGNAL => Some(FilterKind::Signal),
            event::EVFILT_TIMER => Some(FilterKind::Timer),
            event::EVFILT_USER => Some(FilterKind::User),
            _ => None,
        }
    }

    pub fn raw(self) -> FilterId {
        match self {
            FilterKind::Read => event::EVFILT_READ,
            FilterKind::Write => event::EVFILT_WRITE,
            FilterKind::Vnode => event::EVFILT_VNODE,
            FilterKind::Proc => event::EVFILT_PROC,
            FilterKind::Signal => event::EVFILT_SIGNAL,
            FilterKind::Timer => event::EVFILT_TIMER,
            FilterKind::User => event::EVFILT_USER,
        }
    }

    pub fn index(self) -> usize {
        match self {
            FilterKind::Read => 0,
            FilterKind::Write => 1,
            FilterKind::Vnode => 2,
            FilterKind::Proc => 3,
            FilterKind::Signal => 4,
            FilterKind::Timer => 5,
            FilterKind::User => 6,
        }
    }

    pub fn all() -> [FilterKind; FILTER_COUNT] {
        [
            FilterKind::Read,
            FilterKind::Write,
            FilterKind::Vnode,
            FilterKind::Proc,
            FilterKind::Signal,
            FilterKind::Timer,
            FilterKind::User,
        ]
    }
}

/// Common behavior every filter implements. The queue dispatcher never
/// reaches into a filter's internals; it only ever calls through this
/// trait, matching the C source's `struct filter` vtable
/// (`kf_copyin`/`kf_copyout`) translated into a trait object.
pub trait Filter: fmt::Debug + Send + Sync {
    /// The descriptor registered into the queue's aggregate epoll set.
    /// Readable iff this filter's eventlist is non-empty (spurious
    /// wakeups are tolerated, spurious *events* are not).
    fn pfd(&self) -> RawFd;

    /// Whether a knote for `ident` is currently registered.
    fn contains(&self, ident: usize) -> bool;

    /// Applies one `EV_ADD`/`EV_ENABLE`/`EV_DISABLE` change. Creates the
    /// knote on first `EV_ADD`, updates it in place on subsequent ones.
    fn copyin(&self, change: KEvent) -> Result<(), QueueError>;

    /// Applies an `EV_DELETE`: disarms the kernel primitive and removes
    /// the knote. Fails with `NoSuchEntry` if `ident` isn't registered.
    fn delete(&self, ident: usize) -> Result<(), QueueError>;

    /// Drains up to `out.len()` fired events into `out`, applying
    /// disposition (oneshot-delete / dispatch-disable / clear-reset /
    /// level-rearm) to each, and returns how many were written.
    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize>;

    /// Releases every knote and this filter's kernel handles. Called once,
    /// when the owning queue closes.
    fn close(&self);
}

/// Shared decision for every filter's `copyout`: given the disposition
/// flags on a fired knote, what should happen to it after delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDelivery {
    /// `EV_ONESHOT`: destroy the knote.
    Destroy,
    /// `EV_DISPATCH`: disable and return to the watchlist.
    DisableAndRewatch,
    /// Default or `EV_CLEAR`: return to the watchlist, still enabled.
    Rewatch,
}

pub fn post_delivery(kev: &KEvent) -> PostDelivery {
    if kev.has_flag(event::flags::EV_ONESHOT) {
        PostDelivery::Destroy
    } else if kev.has_flag(event::flags::EV_DISPATCH) {
        PostDelivery::DisableAndRewatch
    } else {
        PostDelivery::Rewatch
    }
}
