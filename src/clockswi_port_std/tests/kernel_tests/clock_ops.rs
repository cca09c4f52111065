//! Clock operations and their parameter checks
use clockswi_kernel::{
    Clock, ResultCode, SetClockPeriodError, SetClockTimeoutError, StartClockError, Swi, UTicks,
    MAX_CLOCK_TIMEOUT,
};

use crate::EventLog;

define_system!(FixedPeriod);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fired {
    label: usize,
    tick: UTicks,
    swi_priority: Option<usize>,
}

static LOG: EventLog<Fired> = EventLog::new();

fn record(label: usize) {
    LOG.push(Fired {
        label,
        tick: System::ticks(),
        swi_priority: Swi::<SystemTraits>::current().map(|swi| swi.priority()),
    });
}

fn fired(label: usize, tick: UTicks) -> Fired {
    Fired {
        label,
        tick,
        // Processed by the deferred work Swi
        swi_priority: Some(7),
    }
}

#[test]
fn clock_ops() {
    clockswi_port_std::boot::<SystemTraits>();
    assert_eq!(System::tick_period_us(), 1_000);
    assert_eq!(System::ticks_until_interrupt(), 1);
    assert_eq!(System::ticks_from_micros(0), 0);
    assert_eq!(System::ticks_from_micros(1_000), 1);
    assert_eq!(System::ticks_from_micros(1_001), 2);
    assert_eq!(System::ticks_from_micros(2_500), 3);

    let clock = Clock::<SystemTraits>::register(record, 0);
    assert!(!clock.is_active());
    assert_eq!(clock.remaining_ticks(), 0);

    // Parameter checks
    assert_eq!(clock.start(0), Err(StartClockError::InvalidTimeout));
    assert_eq!(
        clock.start(MAX_CLOCK_TIMEOUT + 1),
        Err(StartClockError::InvalidTimeout)
    );
    assert_eq!(clock.restart(), Err(StartClockError::InvalidTimeout));
    assert_eq!(
        clock.set_timeout(0),
        Err(SetClockTimeoutError::InvalidTimeout)
    );
    assert_eq!(
        clock.set_period(MAX_CLOCK_TIMEOUT + 1),
        Err(SetClockPeriodError::BadParam)
    );
    assert_eq!(
        ResultCode::from(clock.set_period(MAX_CLOCK_TIMEOUT + 1)),
        ResultCode::BadParam
    );
    assert!(!clock.is_active());

    // `restart` uses the stored timeout
    clock.set_timeout(4).unwrap();
    assert_eq!(clock.timeout(), 4);
    clock.restart().unwrap();
    assert!(clock.is_active());
    assert_eq!(clock.remaining_ticks(), 4);
    clockswi_port_std::advance::<SystemTraits>(2);
    assert_eq!(clock.remaining_ticks(), 2);
    // Restarting an active Clock reschedules it
    clock.restart().unwrap();
    clockswi_port_std::advance::<SystemTraits>(4);
    assert_eq!(LOG.take(), [fired(0, 6)]);
    assert!(!clock.is_active());

    // `start` replaces the stored timeout
    clock.start(3).unwrap();
    assert_eq!(clock.timeout(), 3);

    // `stop` is idempotent
    clock.stop();
    clock.stop();
    assert!(!clock.is_active());
    clockswi_port_std::advance::<SystemTraits>(5);
    assert!(LOG.get().is_empty());

    // Periodic, with a replaced function argument
    clock.set_func(record, 9);
    clock.set_period(2).unwrap();
    assert_eq!(clock.period(), 2);
    clock.start(1).unwrap();
    clockswi_port_std::advance::<SystemTraits>(5);
    assert_eq!(
        LOG.take(),
        [fired(9, 12), fired(9, 14), fired(9, 16)]
    );
    assert!(clock.is_active());

    // A period change takes effect at the next expiration
    clock.set_period(0).unwrap();
    clockswi_port_std::advance::<SystemTraits>(10);
    assert_eq!(LOG.take(), [fired(9, 18)]);
    assert!(!clock.is_active());

    assert_eq!(System::ticks(), 26);
    assert_eq!(clockswi_port_std::now::<SystemTraits>(), 26);
}

mod backlog {
    use super::*;
    use clockswi_kernel::SwiDisableGuard;

    define_system!(FixedPeriod);

    static LOG: EventLog<(usize, UTicks)> = EventLog::new();

    fn record(label: usize) {
        LOG.push((label, System::ticks()));
    }

    #[test]
    fn deferred_ticks_are_serviced_in_order() {
        clockswi_port_std::boot::<SystemTraits>();
        let a = Clock::<SystemTraits>::register(record, 0);
        let b = Clock::<SystemTraits>::register(record, 1);
        a.start(2).unwrap();
        b.start(1).unwrap();
        b.set_period(1).unwrap();

        {
            // The deferred work Swi can't run, so ticks pile up
            let _guard = SwiDisableGuard::<SystemTraits>::new();
            clockswi_port_std::advance::<SystemTraits>(3);
            assert!(LOG.get().is_empty());
        }

        // Each pending tick is serviced as the tick it was, although
        // `System::ticks` has already moved on
        assert_eq!(LOG.take(), [(1, 3), (0, 3), (1, 3), (1, 3)]);
        assert!(!a.is_active());

        clockswi_port_std::advance::<SystemTraits>(1);
        assert_eq!(LOG.take(), [(1, 4)]);
    }
}
