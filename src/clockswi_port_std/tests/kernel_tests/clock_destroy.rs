//! Destroying Clocks, including from Clock functions
use clockswi_kernel::{Clock, UTicks};
use std::sync::OnceLock;

use crate::EventLog;

mod during_walk {
    use super::*;

    define_system!(Dynamic);

    static LOG: EventLog<(usize, UTicks)> = EventLog::new();
    static CLOCKS: OnceLock<[Clock<SystemTraits>; 4]> = OnceLock::new();

    fn record(label: usize) {
        LOG.push((label, System::ticks()));
        let clocks = CLOCKS.get().unwrap();
        match label {
            // Destroy the next Clock in the walk
            0 => clocks[1].destroy(),
            // Destroy itself
            2 => clocks[2].destroy(),
            _ => {}
        }
    }

    #[test]
    fn destroy_from_clock_function() {
        clockswi_port_std::boot::<SystemTraits>();
        let clocks = CLOCKS.get_or_init(|| std::array::from_fn(|label| Clock::register(record, label)));
        clocks[2].set_period(1).unwrap();
        for clock in clocks {
            clock.start(5).unwrap();
        }

        clockswi_port_std::advance::<SystemTraits>(6);
        assert_eq!(LOG.take(), [(0, 5), (2, 5), (3, 5)]);
    }
}

mod stale_handle {
    use super::*;

    define_system!(FixedPeriod);

    fn nop(_: usize) {}

    #[test]
    #[should_panic(expected = "has been destroyed")]
    fn use_after_destroy() {
        clockswi_port_std::boot::<SystemTraits>();
        let clock = Clock::<SystemTraits>::register(nop, 0);
        clock.start(10).unwrap();
        clock.destroy();

        // Reuses the slot
        let other = Clock::<SystemTraits>::register(nop, 0);
        assert_ne!(clock, other);
        clock.stop();
    }
}

mod active {
    use super::*;

    define_system!(FixedPeriod);

    static LOG: EventLog<usize> = EventLog::new();

    fn record(label: usize) {
        LOG.push(label);
    }

    #[test]
    fn destroy_active_clock() {
        clockswi_port_std::boot::<SystemTraits>();
        let a = Clock::<SystemTraits>::register(record, 0);
        let b = Clock::<SystemTraits>::register(record, 1);
        a.start(3).unwrap();
        b.start(3).unwrap();
        clockswi_port_std::advance::<SystemTraits>(1);
        a.destroy();

        clockswi_port_std::advance::<SystemTraits>(5);
        assert_eq!(LOG.take(), [1]);
    }
}
