use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use kqueue_core::{flags, queue_create, queue_submit, KEvent, EVFILT_READ};

#[test]
fn level_triggered_read_keeps_firing_until_drained() {
    let (mut tx, rx) = UnixStream::pair().unwrap();
    let queue = queue_create().unwrap();

    let add = KEvent::new(rx.as_raw_fd() as usize, EVFILT_READ, flags::EV_ADD);
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    tx.write_all(b"hello").unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].ident, rx.as_raw_fd() as usize);
    assert_eq!(events[0].data, 5);

    // Without EV_CLEAR, level readiness means the same event is still
    // pending until the underlying bytes are consumed.
    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(n, 1);
}

#[test]
fn edge_triggered_read_fires_once_per_arrival() {
    let (mut tx, rx) = UnixStream::pair().unwrap();
    let queue = queue_create().unwrap();

    let add = KEvent::new(
        rx.as_raw_fd() as usize,
        EVFILT_READ,
        flags::EV_ADD | flags::EV_CLEAR,
    );
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    tx.write_all(b"hi").unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);

    // EV_CLEAR resets state after delivery: nothing new has arrived, so
    // the second collection should see nothing.
    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn eof_is_reported_when_peer_hangs_up() {
    let (tx, rx) = UnixStream::pair().unwrap();
    let queue = queue_create().unwrap();

    let add = KEvent::new(rx.as_raw_fd() as usize, EVFILT_READ, flags::EV_ADD);
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    drop(tx);

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);
    assert!(events[0].has_flag(flags::EV_EOF));
}

#[test]
fn add_then_delete_round_trips() {
    let (_tx, rx) = UnixStream::pair().unwrap();
    let queue = queue_create().unwrap();
    let ident = rx.as_raw_fd() as usize;

    let add = KEvent::new(ident, EVFILT_READ, flags::EV_ADD);
    let mut events = [KEvent::default(); 1];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    let delete = KEvent::new(ident, EVFILT_READ, flags::EV_DELETE);
    queue_submit(&queue, &[delete], &mut events, Some(Duration::ZERO)).unwrap();

    // A second delete now fails: the knote is gone.
    let delete_again = KEvent::new(ident, EVFILT_READ, flags::EV_DELETE);
    let err = queue_submit(&queue, &[delete_again], &mut events, Some(Duration::ZERO));
    assert!(err.is_err());
}
