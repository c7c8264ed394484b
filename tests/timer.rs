use std::time::Duration;

use kqueue_core::{flags, queue_create, queue_submit, KEvent, EVFILT_TIMER};

#[test]
fn oneshot_timer_fires_exactly_once() {
    let queue = queue_create().unwrap();

    let add = KEvent::new(1, EVFILT_TIMER, flags::EV_ADD | flags::EV_ONESHOT);
    let mut add = add;
    add.data = 20; // milliseconds

    let mut events = [KEvent::default(); 4];
    let n = queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();
    assert_eq!(n, 0, "arming a timer should not fire immediately");

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].ident, 1);
    assert_eq!(events[0].filter, EVFILT_TIMER);
    assert!(events[0].data >= 1);

    // The knote was destroyed after the EV_ONESHOT delivery: waiting
    // again should time out with nothing further to collect.
    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn repeating_timer_can_be_collected_more_than_once() {
    let queue = queue_create().unwrap();

    let mut add = KEvent::new(2, EVFILT_TIMER, flags::EV_ADD);
    add.data = 10;

    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    let n1 = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n1, 1);

    let n2 = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(n2, 1);

    let delete = KEvent::new(2, EVFILT_TIMER, flags::EV_DELETE);
    queue_submit(&queue, &[delete], &mut events, Some(Duration::ZERO)).unwrap();
}
