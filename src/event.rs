//! The `kevent` record shape and the numeric constants published for ABI
//! compatibility with BSD kqueue.

use std::fmt;

/// Selects which [`Filter`](crate::filter::Filter) a change or event belongs
/// to. The numeric values match `EVFILT_*` from BSD's `<sys/event.h>`.
pub type FilterId = i16;

pub const EVFILT_READ: FilterId = -1;
pub const EVFILT_WRITE: FilterId = -2;
pub const EVFILT_VNODE: FilterId = -4;
pub const EVFILT_PROC: FilterId = -5;
pub const EVFILT_SIGNAL: FilterId = -6;
pub const EVFILT_TIMER: FilterId = -7;
pub const EVFILT_USER: FilterId = -10;

/// `flags` bitmask values, matching `EV_*` from BSD's `<sys/event.h>`.
pub mod flags {
    pub const EV_ADD: u16 = 0x0001;
    pub const EV_DELETE: u16 = 0x0002;
    pub const EV_ENABLE: u16 = 0x0004;
    pub const EV_DISABLE: u16 = 0x0008;
    pub const EV_ONESHOT: u16 = 0x0010;
    pub const EV_CLEAR: u16 = 0x0020;
    pub const EV_RECEIPT: u16 = 0x0040;
    pub const EV_DISPATCH: u16 = 0x0080;
    pub const EV_SYSFLAGS: u16 = 0xf000;
    pub const EV_FLAG0: u16 = 0x1000;
    pub const EV_FLAG1: u16 = 0x2000;
    pub const EV_ERROR: u16 = 0x4000;
    pub const EV_EOF: u16 = 0x8000;
}

/// `fflags` bitmask values, matching `NOTE_*` from BSD's `<sys/event.h>`.
///
/// The same bit pattern is reused across filters (e.g. `0x01` is both
/// `NOTE_DELETE` for VNODE and `NOTE_SECONDS` for TIMER); fflags are only
/// meaningful within the filter that owns the knote, exactly as in BSD.
pub mod fflags {
    // EVFILT_READ / EVFILT_WRITE
    pub const NOTE_LOWAT: u32 = 0x0000_0001;
    pub const NOTE_READ: u32 = 0x0000_0001;

    // EVFILT_VNODE
    pub const NOTE_DELETE: u32 = 0x0000_0001;
    pub const NOTE_WRITE: u32 = 0x0000_0002;
    pub const NOTE_EXTEND: u32 = 0x0000_0004;
    pub const NOTE_ATTRIB: u32 = 0x0000_0008;
    pub const NOTE_LINK: u32 = 0x0000_0010;
    pub const NOTE_RENAME: u32 = 0x0000_0020;
    pub const NOTE_REVOKE: u32 = 0x0000_0040;

    // EVFILT_TIMER
    pub const NOTE_SECONDS: u32 = 0x0000_0001;
    pub const NOTE_USECONDS: u32 = 0x0000_0002;
    pub const NOTE_NSECONDS: u32 = 0x0000_0004;

    // EVFILT_USER
    pub const NOTE_FFNOP: u32 = 0x0000_0000;
    pub const NOTE_FFAND: u32 = 0x4000_0000;
    pub const NOTE_FFOR: u32 = 0x8000_0000;
    pub const NOTE_FFCOPY: u32 = 0xc000_0000;
    pub const NOTE_FFCTRLMASK: u32 = 0xc000_0000;
    pub const NOTE_FFLAGSMASK: u32 = 0x00ff_ffff;
    pub const NOTE_TRIGGER: u32 = 0x0100_0000;
}

/// The kqueue-equivalent event/change record.
///
/// One `KEvent` is both a change (when submitted) and an event (when
/// retrieved): the field layout matches BSD's `struct kevent` exactly so
/// that flag/fflag/data semantics translate without reinterpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KEvent {
    /// fd, pid, signal number, timer id or user id, depending on `filter`.
    pub ident: usize,
    pub filter: FilterId,
    pub flags: u16,
    pub fflags: u32,
    pub data: i64,
    pub udata: usize,
}

impl KEvent {
    pub const fn new(ident: usize, filter: FilterId, flags: u16) -> Self {
        KEvent {
            ident,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: 0,
        }
    }

    pub const fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn is_error(&self) -> bool {
        self.has_flag(flags::EV_ERROR)
    }

    /// Builds the synthetic `EV_ERROR` receipt event BSD kqueue delivers for
    /// a rejected or acknowledged change.
    pub fn error_receipt(mut change: KEvent, errno: i64) -> KEvent {
        change.flags = flags::EV_ERROR;
        change.data = errno;
        change
    }
}

impl fmt::Display for KEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ ident={}, filter={}, flags={:#06x}, fflags={:#010x}, data={}, udata={} }}",
            self.ident, self.filter, self.flags, self.fflags, self.data, self.udata
        )
    }
}
