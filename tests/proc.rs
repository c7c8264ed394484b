use std::time::Duration;

use kqueue_core::{queue_create, queue_submit, KEvent};
use kqueue_core::{flags, EVFILT_PROC};

#[test]
fn exit_status_is_reported_without_reaping_the_child() {
    let child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();

    let queue = queue_create().unwrap();
    let add = KEvent::new(pid as usize, EVFILT_PROC, flags::EV_ADD | flags::EV_ONESHOT);
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].ident, pid as usize);
    assert_eq!(events[0].data, 0, "`true` exits 0");

    // waitid was called with WNOWAIT, so the child is still reapable by
    // its actual owner.
    let mut child = child;
    let status = child.wait().unwrap();
    assert!(status.success());
}

#[test]
fn killed_child_reports_128_plus_signal() {
    let mut child = std::process::Command::new("sleep")
        .arg("5")
        .spawn()
        .unwrap();
    let pid = child.id();

    let queue = queue_create().unwrap();
    let add = KEvent::new(pid as usize, EVFILT_PROC, flags::EV_ADD | flags::EV_ONESHOT);
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].data, 128 + libc::SIGKILL as i64);

    let _ = child.wait();
}
