//! The process-wide child-exit waiter.
//!
//! The original source starts one waiter thread per queue, with a comment
//! admitting there should only be one per process. This is that redesign
//! (spec.md §9): a single background thread blocks in `waitid(P_ALL,
//! WEXITED|WNOWAIT)` and demultiplexes each exit by pid into every
//! `ProcFilter` instance that is watching that pid, across every queue in
//! the process.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, OnceLock};

use crate::filter::proc_filter::ProcDelivery;

struct Registry {
    // pid -> filters currently watching it.
    subscribers: Mutex<HashMap<i32, Vec<std::sync::Weak<ProcDelivery>>>>,
    wake: Condvar,
    wake_mutex: Mutex<()>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let registry = Registry {
            subscribers: Mutex::new(HashMap::new()),
            wake: Condvar::new(),
            wake_mutex: Mutex::new(()),
        };
        std::thread::Builder::new()
            .name("kqueue-core-proc-waiter".into())
            .spawn(wait_loop)
            .expect("failed to spawn process-wide child waiter thread");
        registry
    })
}

/// Registers interest in `pid`'s exit. The waiter is woken so it can pick
/// up a pid that may already be in a terminal state.
pub fn subscribe(pid: i32, delivery: &std::sync::Arc<ProcDelivery>) {
    let reg = registry();
    reg.subscribers
        .lock()
        .unwrap()
        .entry(pid)
        .or_default()
        .push(std::sync::Arc::downgrade(delivery));
    let _guard = reg.wake_mutex.lock().unwrap();
    reg.wake.notify_all();
}

pub fn unsubscribe(pid: i32, delivery: &std::sync::Arc<ProcDelivery>) {
    let reg = registry();
    let mut subs = reg.subscribers.lock().unwrap();
    if let Some(list) = subs.get_mut(&pid) {
        list.retain(|w| !std::ptr::eq(w.as_ptr(), std::sync::Arc::as_ptr(delivery)));
        if list.is_empty() {
            subs.remove(&pid);
        }
    }
}

fn wait_loop() {
    // Block every signal on this thread: PROC filter work must never run
    // inside a signal handler and must never perturb the caller's own
    // signal disposition.
    unsafe {
        let mut full: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut full);
        libc::pthread_sigmask(libc::SIG_BLOCK, &full, std::ptr::null_mut());
    }

    let reg = registry();

    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_ALL,
                0,
                &mut info as *mut libc::siginfo_t,
                libc::WEXITED | libc::WNOWAIT,
            )
        };

        if rc != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            if errno == libc::ECHILD {
                let guard = reg.wake_mutex.lock().unwrap();
                let _unused = reg.wake.wait(guard).unwrap();
                continue;
            }
            if errno == libc::EINTR {
                continue;
            }
            // Unrecoverable: park forever rather than busy-loop.
            log::warn!("proc waiter: waitid failed: {}", errno);
            let guard = reg.wake_mutex.lock().unwrap();
            let _unused = reg.wake.wait(guard).unwrap();
            continue;
        }

        let pid = unsafe { info.si_pid() };
        let status = decode_status(&info);

        let targets: Vec<_> = {
            let subs = reg.subscribers.lock().unwrap();
            subs.get(&pid)
                .map(|v| v.iter().filter_map(|w| w.upgrade()).collect())
                .unwrap_or_default()
        };

        for delivery in targets {
            delivery.deliver(pid, status);
        }
    }
}

/// `data` as BSD kqueue callers expect it: exit status for normal exit,
/// `128 + signal` for signal termination — pinning down the source's
/// "arbitrary non-zero number 254" per spec.md §9.
fn decode_status(info: &libc::siginfo_t) -> i64 {
    let si_code = info.si_code;
    let si_status = unsafe { info.si_status() };
    match si_code {
        libc::CLD_EXITED => si_status as i64,
        libc::CLD_KILLED | libc::CLD_DUMPED => 128 + si_status as i64,
        _ => 1,
    }
}
