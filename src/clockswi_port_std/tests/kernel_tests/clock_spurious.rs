//! Timer interrupts that arrive when nothing is due (dynamic tick mode)
use clockswi_kernel::{Clock, UTicks};

use crate::EventLog;

define_system!(Dynamic);

static LOG: EventLog<(usize, UTicks)> = EventLog::new();

fn record(label: usize) {
    LOG.push((label, System::ticks()));
}

#[test]
fn spurious_interrupt_boundary() {
    clockswi_port_std::boot::<SystemTraits>();
    let a = Clock::<SystemTraits>::register(record, 0);
    let b = Clock::<SystemTraits>::register(record, 1);
    a.start(4).unwrap();
    b.start(10).unwrap();

    clockswi_port_std::advance::<SystemTraits>(4);
    assert_eq!(LOG.take(), [(0, 4)]);
    assert_eq!(clockswi_port_std::last_armed::<SystemTraits>(), Some(6));

    // Zero ticks after the last serviced tick: spurious. Nothing runs, and the
    // timer is rearmed for the remaining distance.
    clockswi_port_std::take_armed_log::<SystemTraits>();
    clockswi_port_std::fire_timer_interrupt::<SystemTraits>();
    assert!(LOG.get().is_empty());
    assert_eq!(System::ticks(), 4);
    assert_eq!(clockswi_port_std::take_armed_log::<SystemTraits>(), [6]);

    // One tick after: serviced (nothing is due yet, though)
    clockswi_port_std::advance::<SystemTraits>(1);
    clockswi_port_std::fire_timer_interrupt::<SystemTraits>();
    assert!(LOG.get().is_empty());
    assert_eq!(System::ticks(), 5);
    assert_eq!(clockswi_port_std::take_armed_log::<SystemTraits>(), [5]);
    assert_eq!(b.remaining_ticks(), 5);

    clockswi_port_std::advance::<SystemTraits>(5);
    assert_eq!(LOG.take(), [(1, 10)]);
    assert!(!b.is_active());
}

mod from_clock_function {
    use super::*;

    define_system!(Dynamic);

    static LOG: EventLog<UTicks> = EventLog::new();

    fn start_another(_: usize) {
        LOG.push(System::ticks());
        if LOG.get().len() == 1 {
            // Started from a Clock function; the timer is reprogrammed after
            // all functions return
            OTHER.with(|other| other.start(1).unwrap());
        }
    }

    thread_local! {
        static OTHER: Clock<SystemTraits> = Clock::register(start_another, 0);
    }

    #[test]
    fn restart_from_clock_function() {
        clockswi_port_std::boot::<SystemTraits>();
        let first = Clock::<SystemTraits>::register(start_another, 0);
        first.start(3).unwrap();

        clockswi_port_std::advance::<SystemTraits>(3);
        assert_eq!(LOG.get(), [3]);
        assert_eq!(clockswi_port_std::last_armed::<SystemTraits>(), Some(1));

        clockswi_port_std::advance::<SystemTraits>(1);
        assert_eq!(LOG.take(), [3, 4]);
    }
}
