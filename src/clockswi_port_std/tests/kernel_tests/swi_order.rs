//! Ready Swis run from high to low priority, in posting order within a
//! priority level.
use clockswi_kernel::{Swi, SwiAttrs};

use crate::EventLog;

/// Create Swis at priorities `[3, 1, 3, 2]`, labeled `0..4`.
fn create_swis<Traits: clockswi_kernel::KernelTraits>(
    func: fn(usize, usize),
) -> [Swi<Traits>; 4] {
    let priorities = [3, 1, 3, 2];
    std::array::from_fn(|label| {
        Swi::new(
            SwiAttrs {
                arg0: label,
                ..SwiAttrs::new(priorities[label])
            },
            func,
        )
    })
}

/// The first priority-3 Swi, the second one, the priority-2 Swi, and then the
/// priority-1 Swi
const EXPECTED: [usize; 4] = [0, 2, 3, 1];

mod from_interrupt {
    use super::*;

    define_system!(FixedPeriod);

    static LOG: EventLog<usize> = EventLog::new();

    fn record(label: usize, _: usize) {
        LOG.push(label);
    }

    #[test]
    fn posted_by_interrupt_handler() {
        clockswi_port_std::boot::<SystemTraits>();
        let swis = create_swis::<SystemTraits>(record);

        clockswi_port_std::raise_interrupt::<SystemTraits>(|| {
            for swi in swis {
                swi.post();
            }
            // Nothing runs inside the handler
            assert!(LOG.get().is_empty());
            assert!(swis.iter().all(|swi| swi.is_posted()));
        });

        assert_eq!(LOG.take(), EXPECTED);
        assert!(swis.iter().all(|swi| !swi.is_posted()));
    }
}

mod while_disabled {
    use super::*;

    define_system!(Dynamic);

    static LOG: EventLog<usize> = EventLog::new();

    fn record(label: usize, _: usize) {
        LOG.push(label);
    }

    #[test]
    fn posted_while_disabled() {
        clockswi_port_std::boot::<SystemTraits>();
        let swis = create_swis::<SystemTraits>(record);

        let key = System::swi_disable();
        for swi in swis {
            swi.post();
        }
        assert!(LOG.get().is_empty());

        System::swi_restore(key);
        assert_eq!(LOG.take(), EXPECTED);
    }
}

mod under_interrupt_guard {
    use super::*;
    use clockswi_kernel::InterruptGuard;

    define_system!(Dynamic);

    static LOG: EventLog<usize> = EventLog::new();

    fn record(label: usize, _: usize) {
        LOG.push(label);
    }

    #[test]
    fn posted_under_interrupt_guard() {
        clockswi_port_std::boot::<SystemTraits>();
        let swis = create_swis::<SystemTraits>(record);
        let [rest @ .., last] = swis;

        {
            let _guard = InterruptGuard::<SystemTraits>::new();
            for swi in rest {
                swi.post();
            }
        }
        // Queued Swis wait for the next scheduling point
        assert!(LOG.get().is_empty());

        last.post();
        assert_eq!(LOG.take(), EXPECTED);
    }
}

mod reposted_after_interrupt_guard {
    use super::*;
    use clockswi_kernel::InterruptGuard;

    define_system!(FixedPeriod);

    static LOG: EventLog<(usize, u32)> = EventLog::new();

    fn record(label: usize, _: usize) {
        LOG.push((label, Swi::<SystemTraits>::current_trigger()));
    }

    #[test]
    fn repost_runs_swi_queued_under_interrupt_guard() {
        clockswi_port_std::boot::<SystemTraits>();
        let swi = Swi::<SystemTraits>::new(SwiAttrs::new(2), record);

        {
            let _guard = InterruptGuard::<SystemTraits>::new();
            swi.post();
        }
        assert!(LOG.get().is_empty());
        assert!(swi.is_posted());

        // Already posted, so it keeps its place and runs once
        swi.post();
        assert_eq!(LOG.take(), [(0, 0)]);
        assert!(!swi.is_posted());

        // Same for trigger-based posting
        {
            let _guard = InterruptGuard::<SystemTraits>::new();
            swi.or(0b01);
        }
        assert!(LOG.get().is_empty());
        swi.or(0b10);
        assert_eq!(LOG.take(), [(0, 0b11)]);
    }
}
