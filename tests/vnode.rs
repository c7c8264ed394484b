use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use kqueue_core::{fflags, flags, queue_create, queue_submit, KEvent, EVFILT_VNODE};

#[test]
fn delete_fires_once_and_removes_the_knote() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watched");
    let file = std::fs::File::create(&path).unwrap();

    let queue = queue_create().unwrap();
    let mut add = KEvent::new(file.as_raw_fd() as usize, EVFILT_VNODE, flags::EV_ADD);
    add.fflags = fflags::NOTE_DELETE;
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    std::fs::remove_file(&path).unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].fflags & fflags::NOTE_DELETE, fflags::NOTE_DELETE);

    // The knote auto-destroyed on NOTE_DELETE: a second collection sees
    // nothing more, even though the underlying inode is gone too.
    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn write_is_reported_with_extend_when_the_file_grows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grows");
    let mut file = std::fs::File::create(&path).unwrap();

    let queue = queue_create().unwrap();
    let mut add = KEvent::new(file.as_raw_fd() as usize, EVFILT_VNODE, flags::EV_ADD);
    add.fflags = fflags::NOTE_WRITE | fflags::NOTE_EXTEND;
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    file.write_all(b"more bytes than before").unwrap();
    file.sync_all().unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);
    assert!(events[0].fflags & fflags::NOTE_WRITE != 0);
}
