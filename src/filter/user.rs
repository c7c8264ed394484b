//! `EVFILT_USER`: a purely in-process filter driven by the small fflags
//! control algebra in spec.md §4.7.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;

use rustix::event::{eventfd, EventfdFlags};

use crate::error::QueueError;
use crate::event::{fflags, flags, KEvent};
use crate::filter::{post_delivery, Filter, PostDelivery};
use crate::knote::{Knote, KnoteState, KnoteTable};

#[derive(Debug)]
pub struct UserFilter {
    pfd: std::os::unix::io::OwnedFd,
    knotes: Mutex<KnoteTable>,
}

impl UserFilter {
    pub fn new() -> io::Result<Self> {
        let pfd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
        Ok(UserFilter {
            pfd,
            knotes: Mutex::new(KnoteTable::new()),
        })
    }

    fn apply_ffctrl(current: u32, change_fflags: u32) -> u32 {
        let op = change_fflags & fflags::NOTE_FFCTRLMASK;
        let operand = change_fflags & fflags::NOTE_FFLAGSMASK;
        match op {
            fflags::NOTE_FFAND => current & operand,
            fflags::NOTE_FFOR => current | operand,
            fflags::NOTE_FFCOPY => operand,
            _ => current,
        }
    }
}

impl Filter for UserFilter {
    fn pfd(&self) -> RawFd {
        self.pfd.as_raw_fd()
    }

    fn contains(&self, ident: usize) -> bool {
        self.knotes.lock().unwrap().contains(ident)
    }

    fn copyin(&self, change: KEvent) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();
        let trigger = change.fflags & fflags::NOTE_TRIGGER != 0;

        if let Some(kn) = table.get_mut(change.ident) {
            kn.kev.udata = change.udata;
            kn.kev.flags = change.flags;
            if change.has_flag(flags::EV_DISABLE) {
                kn.enabled = false;
            } else if change.has_flag(flags::EV_ENABLE) || change.has_flag(flags::EV_ADD) {
                kn.enabled = true;
            }
            kn.kev.fflags = Self::apply_ffctrl(kn.kev.fflags, change.fflags);
            if trigger && kn.enabled {
                // Multiple triggers before the knote drains coalesce into
                // a single fire (spec.md §4.7).
                if kn.state != KnoteState::Fired {
                    kn.state = KnoteState::Fired;
                    let one: u64 = 1;
                    let _ = rustix::io::write(&self.pfd, &one.to_ne_bytes());
                }
            }
            return Ok(());
        }

        if !change.has_flag(flags::EV_ADD) {
            return Err(QueueError::NoSuchEntry);
        }

        let mut kn = Knote::new(change);
        kn.kev.fflags = Self::apply_ffctrl(0, change.fflags);
        if trigger {
            kn.state = KnoteState::Fired;
            let one: u64 = 1;
            let _ = rustix::io::write(&self.pfd, &one.to_ne_bytes());
        }
        table.insert(change.ident, kn);
        Ok(())
    }

    fn delete(&self, ident: usize) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();
        if table.remove(ident).is_none() {
            return Err(QueueError::NoSuchEntry);
        }
        Ok(())
    }

    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize> {
        let mut scratch = [0u8; 8];
        let _ = rustix::io::read(&self.pfd, &mut scratch);

        let mut table = self.knotes.lock().unwrap();
        let mut n = 0;
        let mut to_destroy = Vec::new();

        for slot in out.iter_mut() {
            let ident = match table.fired().map(|(i, _)| *i).next() {
                Some(i) => i,
                None => break,
            };
            let kn = table.get_mut(ident).unwrap();
            // Control bits and NOTE_TRIGGER are never shown to the caller;
            // only NOTE_FFLAGSMASK bits remain visible (spec.md §4.7).
            let mut delivered = kn.kev;
            delivered.fflags = kn.kev.fflags & fflags::NOTE_FFLAGSMASK;
            *slot = delivered;

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
        }
        if table.any_fired() {
            let one: u64 = 1;
            let _ = rustix::io::write(&self.pfd, &one.to_ne_bytes());
        }

        Ok(n)
    }

    fn close(&self) {}
}
