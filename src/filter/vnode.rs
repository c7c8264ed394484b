//! `EVFILT_VNODE`: an inotify instance multiplexing every watched file,
//! translating native inotify events into the `NOTE_*` fflags a BSD caller
//! would see.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Mutex;

use rustix::fs::inotify;

use crate::error::QueueError;
use crate::event::{fflags, flags, KEvent};
use crate::filter::{post_delivery, Filter, PostDelivery};
use crate::knote::{Knote, KnoteState, KnoteTable, Private};

/// Translate the requested `NOTE_*` bits into an inotify watch mask.
fn fflags_to_watch_mask(fflags: u32) -> inotify::WatchFlags {
    use inotify::WatchFlags as W;
    let mut mask = W::empty();
    if fflags & fflags::NOTE_DELETE != 0 {
        mask |= W::DELETE_SELF;
    }
    if fflags & fflags::NOTE_WRITE != 0 {
        mask |= W::MODIFY;
    }
    if fflags & fflags::NOTE_ATTRIB != 0 {
        mask |= W::ATTRIB;
    }
    if fflags & fflags::NOTE_RENAME != 0 {
        mask |= W::MOVE_SELF;
    }
    if fflags & fflags::NOTE_LINK != 0 {
        mask |= W::ATTRIB;
    }
    if fflags & fflags::NOTE_REVOKE != 0 {
        mask |= W::UNMOUNT;
    }
    mask
}

fn native_to_fflags(mask: inotify::ReadFlags, file_was_extended: bool) -> u32 {
    use inotify::ReadFlags as R;
    let mut out = 0u32;
    if mask.contains(R::DELETE_SELF) {
        out |= fflags::NOTE_DELETE;
    }
    if mask.contains(R::MODIFY) {
        out |= fflags::NOTE_WRITE;
        if file_was_extended {
            out |= fflags::NOTE_EXTEND;
        }
    }
    if mask.contains(R::ATTRIB) {
        out |= fflags::NOTE_ATTRIB;
    }
    if mask.contains(R::MOVE_SELF) {
        out |= fflags::NOTE_RENAME;
    }
    if mask.contains(R::UNMOUNT) {
        out |= fflags::NOTE_REVOKE;
    }
    out
}

#[derive(Debug)]
pub struct VnodeFilter {
    inotify: OwnedFd,
    knotes: Mutex<KnoteTable>,
    /// wd -> ident, so an inotify event (which only carries `wd`) can be
    /// routed back to the knote that owns it.
    wd_to_ident: Mutex<HashMap<i32, usize>>,
    /// Last known file size per ident, to detect NOTE_WRITE-with-extend.
    last_size: Mutex<HashMap<usize, i64>>,
    /// The fflags mask the caller asked to be notified about, per ident.
    /// `kev.fflags` itself is overwritten at fire time with the *delivered*
    /// subset, so the requested mask has to live elsewhere.
    requested: Mutex<HashMap<usize, u32>>,
}

impl VnodeFilter {
    pub fn new() -> io::Result<Self> {
        let inotify = inotify::init(inotify::CreateFlags::NONBLOCK | inotify::CreateFlags::CLOEXEC)?;
        Ok(VnodeFilter {
            inotify,
            knotes: Mutex::new(KnoteTable::new()),
            wd_to_ident: Mutex::new(HashMap::new()),
            last_size: Mutex::new(HashMap::new()),
            requested: Mutex::new(HashMap::new()),
        })
    }

    fn path_of(&self, fd: RawFd) -> io::Result<std::path::PathBuf> {
        // NOTE_* watches are keyed by path, not fd: inotify has no
        // add-by-fd entry point, so re-derive the path via /proc, exactly
        // as the file descriptor was opened by the caller before EV_ADD.
        std::fs::read_link(format!("/proc/self/fd/{}", fd))
    }

    fn current_size(&self, fd: RawFd) -> i64 {
        let mut st: mem::MaybeUninit<libc::stat> = mem::MaybeUninit::uninit();
        let rc = unsafe { libc::fstat(fd, st.as_mut_ptr()) };
        if rc == 0 {
            unsafe { st.assume_init() }.st_size as i64
        } else {
            0
        }
    }
}

impl Filter for VnodeFilter {
    fn pfd(&self) -> RawFd {
        self.inotify.as_raw_fd()
    }

    fn contains(&self, ident: usize) -> bool {
        self.knotes.lock().unwrap().contains(ident)
    }

    fn copyin(&self, change: KEvent) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();

        if let Some(kn) = table.get_mut(change.ident) {
            kn.kev.fflags = change.fflags;
            kn.kev.udata = change.udata;
            kn.kev.flags = change.flags;
            self.requested.lock().unwrap().insert(change.ident, change.fflags);
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

        let fd = change.ident as RawFd;
        let path = self.path_of(fd).map_err(QueueError::from)?;
        let mask = fflags_to_watch_mask(change.fflags);
        let wd = inotify::add_watch(&self.inotify, &path, mask).map_err(QueueError::from)?;

        self.last_size
            .lock()
            .unwrap()
            .insert(change.ident, self.current_size(fd));
        self.wd_to_ident.lock().unwrap().insert(wd, change.ident);
        self.requested.lock().unwrap().insert(change.ident, change.fflags);

        let mut kn = Knote::new(change);
        kn.private = Private::Vnode { wd };
        table.insert(change.ident, kn);
        Ok(())
    }

    fn delete(&self, ident: usize) -> Result<(), QueueError> {
        let mut table = self.knotes.lock().unwrap();
        let kn = table.remove(ident).ok_or(QueueError::NoSuchEntry)?;
        if let Private::Vnode { wd } = kn.private {
            let _ = inotify::remove_watch(&self.inotify, wd);
            self.wd_to_ident.lock().unwrap().remove(&wd);
        }
        self.last_size.lock().unwrap().remove(&ident);
        self.requested.lock().unwrap().remove(&ident);
        Ok(())
    }

    fn copyout(&self, out: &mut [KEvent]) -> io::Result<usize> {
        let mut buf = [0u8; 4096];
        let events = match inotify::read(&self.inotify, &mut buf) {
            Ok(events) => events,
            Err(rustix::io::Errno::AGAIN) => Default::default(),
            Err(e) => return Err(e.into()),
        };

        {
            let wd_to_ident = self.wd_to_ident.lock().unwrap();
            let mut table = self.knotes.lock().unwrap();
            let mut last_size = self.last_size.lock().unwrap();
            let requested = self.requested.lock().unwrap();

            for ev in events {
                let ident = match wd_to_ident.get(&ev.wd()) {
                    Some(ident) => *ident,
                    None => continue,
                };
                let kn = match table.get_mut(ident) {
                    Some(kn) => kn,
                    None => continue,
                };
                if !kn.enabled {
                    continue;
                }

                let extended = if ev.events().contains(inotify::ReadFlags::MODIFY) {
                    let fd = ident as RawFd;
                    let new_size = self.current_size(fd);
                    let old = last_size.insert(ident, new_size).unwrap_or(new_size);
                    new_size > old
                } else {
                    false
                };

                let mask = requested.get(&ident).copied().unwrap_or(0);
                let new_fflags = native_to_fflags(ev.events(), extended) & mask;
                if new_fflags == 0 {
                    continue;
                }
                // Merge multiple native events destined for the same
                // knote into one fired delivery rather than firing twice.
                kn.kev.fflags |= new_fflags;
                kn.state = KnoteState::Fired;
            }
        }

        let mut table = self.knotes.lock().unwrap();
        let mut n = 0;
        let mut to_destroy = Vec::new();

        for slot in out.iter_mut() {
            let ident = match table.fired().map(|(i, _)| *i).next() {
                Some(i) => i,
                None => break,
            };
            let kn = table.get_mut(ident).unwrap();
            *slot = kn.kev;

            // NOTE_DELETE fires once: inotify auto-removes the watch.
            let is_delete = kn.kev.fflags & fflags::NOTE_DELETE != 0;
            match post_delivery(&kn.kev) {
                PostDelivery::Destroy => to_destroy.push(ident),
                _ if is_delete => to_destroy.push(ident),
                PostDelivery::DisableAndRewatch => {
                    kn.enabled = false;
                    kn.state = KnoteState::Watching;
                }
                PostDelivery::Rewatch => {
                    if kn.clear() {
                        kn.kev.fflags = 0;
                    }
                    kn.state = KnoteState::Watching;
                }
            }
            n += 1;
        }

        for ident in to_destroy {
            if let Some(kn) = table.remove(ident) {
                if let Private::Vnode { wd } = kn.private {
                    self.wd_to_ident.lock().unwrap().remove(&wd);
                }
            }
        }

        Ok(n)
    }

    fn close(&self) {
        let mut table = self.knotes.lock().unwrap();
        for (_, kn) in table.iter_mut() {
            if let Private::Vnode { wd } = kn.private {
                let _ = inotify::remove_watch(&self.inotify, wd);
            }
        }
    }
}
