mod common;

use common::{frame, BASE};
use world::{ActionSchema, ConditioningWindow};

/// After N pushes the window holds the last min(N, k) pairs, oldest first.
#[test]
fn window_keeps_the_most_recent_pairs_in_order() {
    let schema = ActionSchema::racing();
    for capacity in 1..=5 {
        for pushes in 0..=12u8 {
            let mut window = ConditioningWindow::new(capacity).unwrap();
            for v in 0..pushes {
                window.push(frame(BASE, v), schema.noop());
            }
            let expected: Vec<u8> = (0..pushes)
                .skip(usize::from(pushes).saturating_sub(capacity))
                .collect();
            let held: Vec<u8> = window
                .window()
                .observations()
                .map(|o| o.pixel(0, 0)[0])
                .collect();
            assert_eq!(held, expected, "capacity {capacity}, {pushes} pushes");
            assert_eq!(window.len(), usize::from(pushes).min(capacity));
        }
    }
}

#[test]
fn reset_truncates_to_capacity_and_rejects_mismatched_lengths() {
    let schema = ActionSchema::racing();
    let mut window = ConditioningWindow::new(3).unwrap();
    let frames: Vec<_> = (0..5).map(|v| frame(BASE, v)).collect();
    window.reset(frames.clone(), vec![schema.noop(); 5]).unwrap();
    assert!(window.is_full());
    assert_eq!(window.window().last().unwrap().0, &frames[4]);

    assert!(window.reset(frames, vec![schema.noop(); 4]).is_err());
}

#[test]
fn tail_views_the_newest_entries() {
    let schema = ActionSchema::racing();
    let mut window = ConditioningWindow::new(4).unwrap();
    for v in 0..4 {
        window.push(frame(BASE, v), schema.noop());
    }
    let tail = window.window().tail(2);
    let held: Vec<u8> = tail.observations().map(|o| o.pixel(0, 0)[0]).collect();
    assert_eq!(held, vec![2, 3]);
    assert_eq!(window.window().tail(10).len(), 4);
}

#[test]
fn zero_capacity_is_a_configuration_error() {
    assert!(ConditioningWindow::new(0).is_err());
}
