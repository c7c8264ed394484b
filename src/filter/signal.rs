//! `EVFILT_SIGNAL`: per-queue delivery counts for a process-wide masked
//! signal, without disturbing any other disposition the application has
//! installed.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use rustix::event::{eventfd, EventfdFlags};

use crate::error::QueueError;
use crate::event::{flags, KEvent};
use crate::filter::signal_waiter;
use crate::filter::{post_delivery, Filter, PostDelivery};
use crate::knote::{Knote, KnoteState, KnoteTable};

#[derive(Debug)]
pub struct SignalDelivery {
    knotes: Mutex<KnoteTable>,
    pfd: std::os::unix::io::OwnedFd,
}

impl SignalDelivery {
    pub fn deliver(&self, signo: i32) {
        let mut table = self.knotes.lock().unwrap();
        let kn = match table.get_mut(signo as usize) {
            Some(kn) => kn,
            None => return,
        };
        if !kn.enabled {
            return;
        }
        // Coalesced delivery count since the last read, per spec.md §4.5.
        kn.kev.data += 1;
        kn.state = KnoteState::Fired;
        drop(table);

        let one: u64 = 1;
        let _ = rustix::io::write(&self.pfd, &one.to_ne_bytes());
    }
}

#[derive(Debug)]
pub struct SignalFilter {
    delivery: Arc<SignalDelivery>,
}

impl SignalFilter {
    pub fn new() -> io::Result<Self> {
        let pfd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
        Ok(SignalFilter {
            delivery: Arc::new(SignalDelivery {
                knotes: Mutex::new(KnoteTable::new()),
                pfd,
            }),
        })
    }
}

impl Filter for SignalFilter {
    fn pfd(&self) -> RawFd {
        self.delivery.pfd.as_raw_fd()
    }

    fn contains(&self, ident: usize) -> bool {
        self.delivery.knotes.lock().unwrap().contains(ident)
    }

    fn copyin(&self, change: KEvent) -> Result<(), QueueError> {
        let signo = change.ident as i32;
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

        signal_waiter::acquire(signo, &self.delivery);
        Ok(())
    }

    fn delete(&self, ident: usize) -> Result<(), QueueError> {
        let mut table = self.delivery.knotes.lock().unwrap();
        if table.remove(ident).is_none() {
            return Err(QueueError::NoSuchEntry);
        }
        drop(table);
        signal_waiter::release(ident as i32, &self.delivery);
        Ok(())
    }

    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize> {
        let mut scratch = [0u8; 8];
        let _ = rustix::io::read(&self.delivery.pfd, &mut scratch);

        let mut table = self.delivery.knotes.lock().unwrap();
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
                    // EV_CLEAR (the default expected behavior per spec.md
                    // §4.5) resets the count; without it the count keeps
                    // accumulating across collections.
                    if kn.clear() {
                        kn.kev.data = 0;
                    }
                    kn.state = KnoteState::Watching;
                }
            }
            n += 1;
        }

        for ident in &to_destroy {
            table.remove(*ident);
        }
        if table.any_fired() {
            let one: u64 = 1;
            let _ = rustix::io::write(&self.delivery.pfd, &one.to_ne_bytes());
        }
        drop(table);

        for ident in to_destroy {
            signal_waiter::release(ident as i32, &self.delivery);
        }

        Ok(n)
    }

    fn close(&self) {
        let idents: Vec<usize> = {
            let mut table = self.delivery.knotes.lock().unwrap();
            table.iter_mut().map(|(i, _)| *i).collect()
        };
        for ident in idents {
            signal_waiter::release(ident as i32, &self.delivery);
        }
    }
}
