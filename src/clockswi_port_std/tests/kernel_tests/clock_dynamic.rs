//! Timer programming in the dynamic tick mode
use clockswi_kernel::{Clock, UTicks};

use crate::EventLog;

define_system!(Dynamic);

static LOG: EventLog<(usize, UTicks)> = EventLog::new();

fn record(label: usize) {
    LOG.push((label, System::ticks()));
}

#[test]
fn arm_for_nearest_deadline() {
    clockswi_port_std::boot::<SystemTraits>();
    // Nothing to wait for
    assert_eq!(
        clockswi_port_std::last_armed::<SystemTraits>(),
        Some(UTicks::MAX / 2)
    );

    let clocks: [Clock<SystemTraits>; 4] =
        std::array::from_fn(|label| Clock::register(record, label));
    for (clock, timeout) in clocks.iter().zip([5, 12, 12, 30]) {
        clock.start(timeout).unwrap();
    }
    assert_eq!(clockswi_port_std::last_armed::<SystemTraits>(), Some(5));
    assert_eq!(System::ticks_until_interrupt(), 5);

    clockswi_port_std::advance::<SystemTraits>(5);
    assert_eq!(LOG.take(), [(0, 5)]);
    assert_eq!(clockswi_port_std::last_armed::<SystemTraits>(), Some(7));
    assert_eq!(System::ticks_until_interrupt(), 7);

    clockswi_port_std::advance::<SystemTraits>(3);
    assert_eq!(System::ticks_until_interrupt(), 4);
    assert_eq!(clocks[1].remaining_ticks(), 4);

    // A nearer deadline reprograms the timer
    clocks[0].start(2).unwrap();
    assert_eq!(clockswi_port_std::last_armed::<SystemTraits>(), Some(2));
    // A farther one doesn't
    clockswi_port_std::take_armed_log::<SystemTraits>();
    clocks[0].stop();
    clocks[0].start(20).unwrap();
    assert!(clockswi_port_std::take_armed_log::<SystemTraits>().is_empty());

    clockswi_port_std::advance::<SystemTraits>(4);
    // The early interrupt at tick 10 had nothing to do
    assert_eq!(LOG.take(), [(1, 12), (2, 12)]);
    assert_eq!(clockswi_port_std::last_armed::<SystemTraits>(), Some(16));

    clockswi_port_std::advance::<SystemTraits>(16);
    assert_eq!(LOG.take(), [(0, 28)]);
    clockswi_port_std::advance::<SystemTraits>(2);
    assert_eq!(LOG.take(), [(3, 30)]);

    // Idle again
    assert_eq!(
        clockswi_port_std::last_armed::<SystemTraits>(),
        Some(UTicks::MAX / 2)
    );
    assert!(clocks.iter().all(|clock| !clock.is_active()));
    assert_eq!(System::ticks(), 30);
}
