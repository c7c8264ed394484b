//! Process-wide signal delivery, fanned out to every queue watching a
//! given signal. Mirrors [`super::proc_waiter`]'s shape: one dedicated
//! thread blocks in `sigwaitinfo`, and the global signal mask is
//! reference-counted so it is restored once the last watcher goes away
//! (spec.md §4.5, §9 "Global signal mask").

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::filter::signal::SignalDelivery;

struct Registry {
    watched: Mutex<HashMap<i32, Watch>>,
}

struct Watch {
    refcount: u32,
    subscribers: Vec<std::sync::Weak<SignalDelivery>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static THREAD_STARTED: OnceLock<()> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        watched: Mutex::new(HashMap::new()),
    })
}

fn ensure_thread_running() {
    THREAD_STARTED.get_or_init(|| {
        std::thread::Builder::new()
            .name("kqueue-core-signal-waiter".into())
            .spawn(wait_loop)
            .expect("failed to spawn process-wide signal waiter thread");
    });
}

/// Masks `signo` process-wide (if not already masked by another watcher)
/// and registers `delivery` to receive future deliveries of it.
pub fn acquire(signo: i32, delivery: &Arc<SignalDelivery>) {
    ensure_thread_running();
    let reg = registry();
    let mut watched = reg.watched.lock().unwrap();
    let watch = watched.entry(signo).or_insert_with(|| {
        block_signal(signo);
        Watch {
            refcount: 0,
            subscribers: Vec::new(),
        }
    });
    watch.refcount += 1;
    watch.subscribers.push(Arc::downgrade(delivery));
}

/// Drops `delivery`'s interest in `signo`; unmasks the signal once the
/// last watcher across every queue releases it.
pub fn release(signo: i32, delivery: &Arc<SignalDelivery>) {
    let reg = registry();
    let mut watched = reg.watched.lock().unwrap();
    if let Some(watch) = watched.get_mut(&signo) {
        watch
            .subscribers
            .retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(delivery)));
        watch.refcount = watch.refcount.saturating_sub(1);
        if watch.refcount == 0 {
            unblock_signal(signo);
            watched.remove(&signo);
        }
    }
}

fn block_signal(signo: i32) {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signo);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

fn unblock_signal(signo: i32) {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signo);
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
    }
}

fn wait_loop() {
    loop {
        let signo = {
            let watched = registry().watched.lock().unwrap();
            if watched.is_empty() {
                drop(watched);
                // Nothing watched yet; avoid spinning on an empty mask.
                std::thread::sleep(std::time::Duration::from_millis(50));
                continue;
            }
            let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
            unsafe { libc::sigemptyset(&mut set) };
            for &s in watched.keys() {
                unsafe { libc::sigaddset(&mut set, s) };
            }
            drop(watched);

            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::sigwaitinfo(&set, &mut info) };
            if rc < 0 {
                let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                if errno == libc::EINTR {
                    continue;
                }
                log::warn!("signal waiter: sigwaitinfo failed: {}", errno);
                continue;
            }
            rc
        };

        let targets: Vec<_> = {
            let watched = registry().watched.lock().unwrap();
            watched
                .get(&signo)
                .map(|w| w.subscribers.iter().filter_map(|s| s.upgrade()).collect())
                .unwrap_or_default()
        };

        for delivery in targets {
            delivery.deliver(signo);
        }
    }
}
