//! The knote: a single `(filter, ident)` registration and its membership
//! state within a filter's watchlist/eventlist.

use std::collections::HashMap;

use crate::event::{flags, KEvent};

/// Where a knote currently lives. A knote is on at most one list at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnoteState {
    /// Armed and waiting for its kernel condition.
    Watching,
    /// Fired, awaiting pickup by the caller.
    Fired,
}

/// Per-filter private state a knote carries. Each filter downcasts this to
/// the variant it owns; knotes never reference another filter's private
/// state.
#[derive(Debug)]
pub enum Private {
    None,
    /// `EVFILT_VNODE`: the native inotify watch descriptor.
    Vnode { wd: i32 },
    /// `EVFILT_TIMER`: the dedicated timerfd backing this knote.
    Timer { fd: std::os::unix::io::RawFd },
    /// `EVFILT_PROC`: cached status, filled in once the child exits.
    Proc { exited: bool },
}

/// A single registered interest in `(filter, ident)`.
#[derive(Debug)]
pub struct Knote {
    pub kev: KEvent,
    pub state: KnoteState,
    pub enabled: bool,
    pub private: Private,
}

impl Knote {
    pub fn new(kev: KEvent) -> Self {
        Knote {
            kev,
            state: KnoteState::Watching,
            enabled: true,
            private: Private::None,
        }
    }

    pub fn oneshot(&self) -> bool {
        self.kev.has_flag(flags::EV_ONESHOT)
    }

    pub fn clear(&self) -> bool {
        self.kev.has_flag(flags::EV_CLEAR)
    }

    pub fn dispatch(&self) -> bool {
        self.kev.has_flag(flags::EV_DISPATCH)
    }
}

/// Owns every knote for one filter, keyed by `ident`. `ident` is unique
/// within a `(queue, filter)` pair by construction: a second `EV_ADD` for an
/// ident already present updates the existing entry instead of inserting a
/// duplicate.
#[derive(Debug, Default)]
pub struct KnoteTable {
    knotes: HashMap<usize, Knote>,
}

impl KnoteTable {
    pub fn new() -> Self {
        KnoteTable {
            knotes: HashMap::new(),
        }
    }

    pub fn get(&self, ident: usize) -> Option<&Knote> {
        self.knotes.get(&ident)
    }

    pub fn get_mut(&mut self, ident: usize) -> Option<&mut Knote> {
        self.knotes.get_mut(&ident)
    }

    pub fn contains(&self, ident: usize) -> bool {
        self.knotes.contains_key(&ident)
    }

    pub fn insert(&mut self, ident: usize, knote: Knote) {
        self.knotes.insert(ident, knote);
    }

    pub fn remove(&mut self, ident: usize) -> Option<Knote> {
        self.knotes.remove(&ident)
    }

    pub fn len(&self) -> usize {
        self.knotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knotes.is_empty()
    }

    /// Every knote currently on the eventlist (fired, awaiting pickup).
    pub fn fired(&self) -> impl Iterator<Item = (&usize, &Knote)> {
        self.knotes
            .iter()
            .filter(|(_, kn)| kn.state == KnoteState::Fired)
    }

    pub fn any_fired(&self) -> bool {
        self.knotes.values().any(|kn| kn.state == KnoteState::Fired)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&usize, &mut Knote)> {
        self.knotes.iter_mut()
    }
}
