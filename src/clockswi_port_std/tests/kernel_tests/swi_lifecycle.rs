//! Posting, reprioritizing, and destroying Swis
use clockswi_kernel::{Swi, SwiAttrs};

use crate::EventLog;

mod coalescing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    define_system!(Dynamic);

    static LOG: EventLog<usize> = EventLog::new();
    static REPOSTS: AtomicUsize = AtomicUsize::new(2);

    fn record(label: usize, _: usize) {
        LOG.push(label);
    }

    fn repost_self(label: usize, _: usize) {
        LOG.push(label);
        if REPOSTS.fetch_sub(1, Ordering::Relaxed) > 0 {
            let this = Swi::<SystemTraits>::current().unwrap();
            this.post();
            // It's not running yet, but queued behind this run
            assert!(this.is_posted());
            LOG.push(label + 100);
        }
    }

    #[test]
    fn double_post_runs_once() {
        clockswi_port_std::boot::<SystemTraits>();
        let swi = Swi::<SystemTraits>::new(SwiAttrs::new(3), record);

        let key = System::swi_disable();
        swi.post();
        swi.post();
        System::swi_restore(key);
        assert_eq!(LOG.take(), [0]);

        // Separately posted from a task context, it runs each time
        swi.post();
        swi.post();
        assert_eq!(LOG.take(), [0, 0]);

        let swi = Swi::<SystemTraits>::new(
            SwiAttrs {
                arg0: 7,
                ..SwiAttrs::new(3)
            },
            repost_self,
        );
        swi.post();
        assert_eq!(LOG.take(), [7, 107, 7, 107, 7]);
    }
}

mod set_priority {
    use super::*;

    define_system!(Dynamic);

    static LOG: EventLog<usize> = EventLog::new();

    fn record(label: usize, _: usize) {
        LOG.push(label);
    }

    #[test]
    fn move_posted_swi() {
        clockswi_port_std::boot::<SystemTraits>();
        let [a, b, c] = std::array::from_fn(|label| {
            Swi::<SystemTraits>::new(
                SwiAttrs {
                    arg0: label,
                    ..SwiAttrs::new(2)
                },
                record,
            )
        });

        let key = System::swi_disable();
        a.post();
        b.post();
        c.post();
        a.set_priority(5);
        c.set_priority(1);
        // Not posted; just changes the priority
        let d = Swi::<SystemTraits>::new(
            SwiAttrs {
                arg0: 3,
                ..SwiAttrs::new(0)
            },
            record,
        );
        d.set_priority(6);
        assert_eq!(a.priority(), 5);
        assert_eq!(d.priority(), 6);
        assert!(LOG.get().is_empty());
        System::swi_restore(key);

        assert_eq!(LOG.take(), [0, 1, 2]);

        // A posted Swi moved within its level goes to the back
        let key = System::swi_disable();
        a.set_priority(2);
        b.post();
        a.post();
        c.post();
        b.set_priority(2);
        System::swi_restore(key);

        assert_eq!(LOG.take(), [0, 1, 2]);

        d.post();
        assert_eq!(LOG.take(), [3]);
    }
}

mod destroy_posted {
    use super::*;

    define_system!(Dynamic);

    fn nop(_: usize, _: usize) {}

    #[test]
    #[should_panic(expected = "can't be destroyed while it's posted")]
    fn destroy_posted_swi() {
        clockswi_port_std::boot::<SystemTraits>();
        let swi = Swi::<SystemTraits>::new(SwiAttrs::new(1), nop);

        let _key = System::swi_disable();
        swi.post();
        swi.destroy();
    }
}

mod destroy {
    use super::*;

    define_system!(Dynamic);

    static LOG: EventLog<usize> = EventLog::new();

    fn record(label: usize, _: usize) {
        LOG.push(label);
    }

    #[test]
    fn destroy_and_reuse() {
        clockswi_port_std::boot::<SystemTraits>();
        let swi = Swi::<SystemTraits>::new(SwiAttrs::new(1), record);
        swi.post();
        swi.destroy();

        // The slot is reused, but the old handle doesn't alias the new Swi
        let new_swi = Swi::<SystemTraits>::new(
            SwiAttrs {
                arg0: 1,
                ..SwiAttrs::new(1)
            },
            record,
        );
        assert_ne!(swi, new_swi);
        new_swi.post();
        assert_eq!(LOG.take(), [0, 1]);

        let result = std::panic::catch_unwind(|| swi.post());
        assert!(result.is_err());
        assert!(!System::swi_is_locked());
    }
}

mod bad_priority {
    use super::*;

    define_system!(Dynamic);

    fn nop(_: usize, _: usize) {}

    #[test]
    #[should_panic(expected = "out of range")]
    fn priority_out_of_range() {
        clockswi_port_std::boot::<SystemTraits>();
        Swi::<SystemTraits>::new(SwiAttrs::new(8), nop);
    }
}
