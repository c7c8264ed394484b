use std::time::Duration;

use kqueue_core::{fflags, flags, queue_create, queue_submit, KEvent, EVFILT_USER};

#[test]
fn ten_triggers_before_collection_coalesce_into_one_event() {
    let queue = queue_create().unwrap();

    let mut add = KEvent::new(7, EVFILT_USER, flags::EV_ADD | flags::EV_CLEAR);
    add.fflags = fflags::NOTE_FFNOP;
    let mut events = [KEvent::default(); 16];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    let triggers: Vec<KEvent> = (0..10)
        .map(|_| {
            let mut ev = KEvent::new(7, EVFILT_USER, 0);
            ev.fflags = fflags::NOTE_TRIGGER;
            ev
        })
        .collect();
    queue_submit(&queue, &triggers, &mut events, Some(Duration::ZERO)).unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(n, 1, "coalesced triggers should deliver a single event");
    assert_eq!(events[0].ident, 7);

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_millis(100))).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn fflags_control_algebra_applies_on_copyin() {
    let queue = queue_create().unwrap();

    let mut add = KEvent::new(8, EVFILT_USER, flags::EV_ADD);
    add.fflags = fflags::NOTE_FFCOPY | 0x03;
    let mut events = [KEvent::default(); 4];
    queue_submit(&queue, &[add], &mut events, Some(Duration::ZERO)).unwrap();

    let mut or_in = KEvent::new(8, EVFILT_USER, 0);
    or_in.fflags = fflags::NOTE_FFOR | 0x04;
    queue_submit(&queue, &[or_in], &mut events, Some(Duration::ZERO)).unwrap();

    let mut trigger = KEvent::new(8, EVFILT_USER, 0);
    trigger.fflags = fflags::NOTE_TRIGGER;
    queue_submit(&queue, &[trigger], &mut events, Some(Duration::ZERO)).unwrap();

    let n = queue_submit(&queue, &[], &mut events, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].fflags, 0x07, "0b011 | 0b100 via NOTE_FFOR");
    assert_eq!(events[0].fflags & fflags::NOTE_TRIGGER, 0, "control bits never escape to the caller");
}
