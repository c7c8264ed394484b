use std::time::Duration;

use kqueue_core::{flags, queue_create, queue_submit, KEvent, EVFILT_SIGNAL};

/// Mirrors the ADD|CLEAR|DISPATCH then re-ENABLE scenario: after a signal
/// is delivered and collected, the knote is disabled until the caller
/// explicitly re-enables it, and a second raise in between is not seen.
#[test]
fn dispatch_disables_until_explicit_re_enable() {
    let queue = queue_create().unwrap();
    let signo = libc::SIGUSR1;

    let add = KEvent::new(
        signo as usize,
        EVFILT_SIGNAL,
        flags::EV_ADD | flags::EV_CLEAR | flags::EV_DISPATCH,
    );
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    unsafe {
        libc::raise(signo);
    }

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].ident, signo as usize);
    assert!(events[0].data >= 1);

    unsafe {
        libc::raise(signo);
    }
    // EV_DISPATCH disabled the knote after delivery: this raise is not
    // observed until it's re-enabled.
    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(n, 0);

    let enable = KEvent::new(signo as usize, EVFILT_SIGNAL, flags::EV_ADD | flags::EV_ENABLE);
    queue_submit(&queue, &[enable], &mut events, Some(Duration::ZERO)).unwrap();

    unsafe {
        libc::raise(signo);
    }
    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);

    let delete = KEvent::new(signo as usize, EVFILT_SIGNAL, flags::EV_DELETE);
    queue_submit(&queue, &[delete], &mut events, Some(Duration::ZERO)).unwrap();
}
