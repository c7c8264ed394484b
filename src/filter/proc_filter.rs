//! `EVFILT_PROC`: child-process lifecycle, backed by the process-wide
//! waiter in [`super::proc_waiter`].

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use rustix::event::{eventfd, EventfdFlags};

use crate::error::QueueError;
use crate::event::{flags, KEvent};
use crate::filter::proc_waiter;
use crate::filter::{post_delivery, Filter, PostDelivery};
use crate::knote::{Knote, KnoteState, KnoteTable};

/// The piece the process-wide waiter thread holds a weak reference to and
/// calls back into when a watched pid exits. Split out from `ProcFilter`
/// so the waiter never has to touch the filter's `Drop` glue.
#[derive(Debug)]
pub struct ProcDelivery {
    knotes: Mutex<KnoteTable>,
    pfd: std::os::unix::io::OwnedFd,
}

impl ProcDelivery {
    pub fn deliver(&self, pid: i32, status: i64) {
        let mut table = self.knotes.lock().unwrap();
        let kn = match table.get_mut(pid as usize) {
            Some(kn) => kn,
            None => return, // not watched by this queue
        };
        if !kn.enabled {
            return;
        }
        kn.kev.data = status;
        kn.state = KnoteState::Fired;
        drop(table);

        let one: u64 = 1;
        let _ = rustix::io::write(&self.pfd, &one.to_ne_bytes());
    }
}

#[derive(Debug)]
pub struct ProcFilter {
    delivery: Arc<ProcDelivery>,
}

impl ProcFilter {
    pub fn new() -> io::Result<Self> {
        let pfd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
        Ok(ProcFilter {
            delivery: Arc::new(ProcDelivery {
                knotes: Mutex::new(KnoteTable::new()),
                pfd,
            }),
        })
    }
}

impl Filter for ProcFilter {
    fn pfd(&self) -> RawFd {
        self.delivery.pfd.as_raw_fd()
    }

    fn contains(&self, ident: usize) -> bool {
        self.delivery.knotes.lock().unwrap().contains(ident)
    }

    fn copyin(&self, change: KEvent) -> Result<(), QueueError> {
        let pid = change.ident as i32;
        let mut table = self.delivery.knotes.lock().unwrap();

        if let Some(kn) = table.get_mut(change.ident) {
            kn.kev.fflags = change.fflags;
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

        table.insert(change.ident, Knote::new(change));
        drop(table);

        proc_waiter::subscribe(pid, &self.delivery);
        Ok(())
    }

    fn delete(&self, ident: usize) -> Result<(), QueueError> {
        let mut table = self.delivery.knotes.lock().unwrap();
        if table.remove(ident).is_none() {
            return Err(QueueError::NoSuchEntry);
        }
        drop(table);
        proc_waiter::unsubscribe(ident as i32, &self.delivery);
        Ok(())
    }

    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize> {
        let mut scratch = [0u8; 8];
        let _ = rustix::io::read(&self.delivery.pfd, &mut scratch);

        let mut table = self.delivery.knotes.lock().unwrap();
        let mut n = 0;
        let mut to_unsubscribe = Vec::new();

        for slot in out.iter_mut() {
            let ident = match table.fired().map(|(i, _)| *i).next() {
                Some(i) => i,
                None => break,
            };
            let kn = table.get_mut(ident).unwrap();
            *slot = kn.kev;

            match post_delivery(&kn.kev) {
                PostDelivery::Destroy => to_unsubscribe.push(ident),
                PostDelivery::DisableAndRewatch => {
                    kn.enabled = false;
                    kn.state = KnoteState::Watching;
                }
                PostDelivery::Rewatch => {
                    kn.kev.data = 0;
                    kn.state = KnoteState::Watching;
                }
            }
            n += 1;
        }

        for ident in &to_unsubscribe {
            table.remove(*ident);
        }
        // Fixes the source's `abort()` XXX-FIXME: if capacity ran out
        // before the eventlist drained, keep the pfd signaled instead of
        // crashing so the remaining events are seen on the next
        // collection (spec.md §9).
        if table.any_fired() {
            let one: u64 = 1;
            let _ = rustix::io::write(&self.delivery.pfd, &one.to_ne_bytes());
        }
        drop(table);

        for ident in to_unsubscribe {
            proc_waiter::unsubscribe(ident as i32, &self.delivery);
        }

        Ok(n)
    }

    fn close(&self) {
        let idents: Vec<usize> = {
            let mut table = self.delivery.knotes.lock().unwrap();
            table.iter_mut().map(|(i, _)| *i).collect()
        };
        for ident in idents {
            proc_waiter::unsubscribe(ident as i32, &self.delivery);
        }
    }
}
