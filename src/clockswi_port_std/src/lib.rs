#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use clockswi_kernel::{KernelTraits, PortToKernel, SwiKey, System, UTicks};
use core::marker::PhantomData;
use spin::Mutex as SpinMutex;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate clockswi_kernel;
/// Used by `boot`
#[doc(hidden)]
pub extern crate env_logger;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: KernelTraits + PortToKernel {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    sim: SpinMutex<Sim>,
}

/// The simulated CPU and timer hardware.
///
/// The mutex protecting this is never held while calling into the kernel.
#[derive(Debug)]
struct Sim {
    cpu_lock: bool,
    /// The nesting level of interrupt handlers.
    interrupt_depth: usize,
    /// Simulated time in ticks. Unlike the hardware counter, this never wraps.
    now: u64,
    /// The value of `now` at which the timer interrupt fires.
    timer_at: Option<u64>,
    /// The timer interrupt is pended and will be taken as soon as CPU Lock is
    /// released outside an interrupt handler.
    timer_pended: bool,
    /// The arguments of all `pend_tick_after` calls.
    armed_log: Vec<UTicks>,
}

impl Sim {
    const fn new() -> Self {
        Self {
            cpu_lock: false,
            interrupt_depth: 0,
            now: 0,
            timer_at: None,
            timer_pended: false,
            armed_log: Vec::new(),
        }
    }

    /// The hardware tick count, which wraps around after `max_tick_count`.
    fn tick_count(&self, max_tick_count: UTicks) -> UTicks {
        (self.now % (u64::from(max_tick_count) + 1)) as UTicks
    }

    /// Check if the timer interrupt can be taken now.
    fn take_timer_interrupt(&mut self) -> bool {
        if self.timer_pended && !self.cpu_lock && self.interrupt_depth == 0 {
            self.timer_pended = false;
            true
        } else {
            false
        }
    }
}

impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            sim: SpinMutex::new(Sim::new()),
        }
    }

    pub unsafe fn enter_cpu_lock<Traits: PortInstance>(&self) {
        log::trace!("enter_cpu_lock");

        let mut sim = self.sim.lock();
        assert!(!sim.cpu_lock);
        sim.cpu_lock = true;
    }

    pub unsafe fn leave_cpu_lock<Traits: PortInstance>(&'static self) {
        log::trace!("leave_cpu_lock");

        let mut sim = self.sim.lock();
        assert!(sim.cpu_lock);
        sim.cpu_lock = false;

        let take = sim.take_timer_interrupt();
        drop(sim);

        if take {
            self.timer_handler::<Traits>();
        }
    }

    pub fn is_cpu_lock_active<Traits: PortInstance>(&self) -> bool {
        self.sim.lock().cpu_lock
    }

    pub fn is_interrupt_context<Traits: PortInstance>(&self) -> bool {
        self.sim.lock().interrupt_depth > 0
    }

    pub unsafe fn tick_count<Traits: PortInstance>(&self) -> UTicks {
        self.sim.lock().tick_count(Traits::MAX_TICK_COUNT)
    }

    pub unsafe fn pend_tick_after<Traits: PortInstance>(&self, tick_count_delta: UTicks) {
        log::trace!("pend_tick_after({tick_count_delta:?})");
        assert!(tick_count_delta > 0 && tick_count_delta <= Traits::MAX_TIMEOUT);

        let mut sim = self.sim.lock();
        sim.timer_at = Some(sim.now + u64::from(tick_count_delta));
        sim.armed_log.push(tick_count_delta);
    }

    pub unsafe fn pend_tick<Traits: PortInstance>(&self) {
        log::trace!("pend_tick");

        self.sim.lock().timer_pended = true;
    }

    /// Run `body` as an interrupt handler, wrapped by the interrupt prologue
    /// and epilogue the kernel expects.
    fn interrupt<Traits: PortInstance>(&self, body: impl FnOnce()) {
        assert!(
            !self.is_cpu_lock_active::<Traits>(),
            "interrupts are masked by CPU Lock"
        );

        let key = System::<Traits>::swi_disable();
        self.sim.lock().interrupt_depth += 1;
        let _epilogue = InterruptEpilogue::<Traits> {
            state: self,
            key: Some(key),
            _phantom: PhantomData,
        };

        body();
    }

    fn timer_handler<Traits: PortInstance>(&'static self) {
        log::trace!("timer_handler");

        self.interrupt::<Traits>(|| {
            // Safety: CPU Lock inactive, an interrupt context
            unsafe { <Traits as PortToKernel>::timer_tick() };
        });

        // The handler might have pended another tick
        let take = self.sim.lock().take_timer_interrupt();
        if take {
            self.timer_handler::<Traits>();
        }
    }

    /// Advance the simulated time by one tick, taking the timer interrupt if
    /// it's due.
    fn step<Traits: PortInstance>(&'static self) {
        let mut sim = self.sim.lock();
        sim.now += 1;
        if sim.timer_at == Some(sim.now) {
            sim.timer_at = None;
            sim.timer_pended = true;
        }
        let take = sim.take_timer_interrupt();
        drop(sim);

        if take {
            self.timer_handler::<Traits>();
        }
    }
}

/// Leaves the interrupt context and resumes Swi scheduling when the
/// interrupt handler returns or unwinds.
struct InterruptEpilogue<'a, Traits: PortInstance> {
    state: &'a State,
    key: Option<SwiKey>,
    _phantom: PhantomData<Traits>,
}

impl<Traits: PortInstance> Drop for InterruptEpilogue<'_, Traits> {
    fn drop(&mut self) {
        self.state.sim.lock().interrupt_depth -= 1;
        if let Some(key) = self.key.take() {
            System::<Traits>::swi_restore(key);
        }
    }
}

/// Install the logger and initialize the kernel.
pub fn boot<Traits: PortInstance>() {
    let _ = env_logger::try_init();
    System::<Traits>::init();
}

/// Advance the simulated time by `ticks` ticks, one tick at a time. Every
/// timer interrupt due in this period is taken (and its Swis run) at the
/// exact tick it's due.
pub fn advance<Traits: PortInstance>(ticks: u64) {
    let state = Traits::port_state();
    for _ in 0..ticks {
        state.step::<Traits>();
    }
}

/// Take the timer interrupt immediately, whether it's due or not.
pub fn fire_timer_interrupt<Traits: PortInstance>() {
    Traits::port_state().timer_handler::<Traits>();
}

/// Run `body` as an interrupt handler.
pub fn raise_interrupt<Traits: PortInstance>(body: impl FnOnce()) {
    Traits::port_state().interrupt::<Traits>(body);
}

/// Get the simulated time in ticks since boot of the simulated hardware.
pub fn now<Traits: PortInstance>() -> u64 {
    Traits::port_state().sim.lock().now
}

/// Get the number of ticks until the timer interrupt fires. Returns `None` if
/// the timer is not programmed.
pub fn timer_remaining<Traits: PortInstance>() -> Option<u64> {
    let sim = Traits::port_state().sim.lock();
    sim.timer_at.map(|at| at - sim.now)
}

/// Get the argument of the last `pend_tick_after` call.
pub fn last_armed<Traits: PortInstance>() -> Option<UTicks> {
    Traits::port_state().sim.lock().armed_log.last().copied()
}

/// Take the arguments of the `pend_tick_after` calls made so far.
pub fn take_armed_log<Traits: PortInstance>() -> Vec<UTicks> {
    std::mem::take(&mut Traits::port_state().sim.lock().armed_log)
}

/// Instantiate the port. Implements the port traits on the given system type.
///
/// The second form changes the range of the simulated hardware tick counter.
///
/// ```rust,ignore
/// clockswi_port_std::use_port!(unsafe struct SystemTraits);
/// clockswi_port_std::use_port!(unsafe struct SystemTraits {
///     max_tick_count: 999,
///     max_timeout: 400,
/// });
/// ```
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $crate::use_port!(unsafe $vis struct $SystemTraits {
            max_tick_count: $crate::clockswi_kernel::UTicks::MAX,
            max_timeout: $crate::clockswi_kernel::UTicks::MAX / 2,
        });
    };
    (unsafe $vis:vis struct $SystemTraits:ident {
        max_tick_count: $max_tick_count:expr,
        max_timeout: $max_timeout:expr $(,)?
    }) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::clockswi_kernel::{PortThreading, PortTimer, UTicks};
            use $crate::{PortInstance, State};

            pub(super) static PORT_STATE: State = State::new();

            // Assume `$SystemTraits: KernelTraits`
            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            unsafe impl PortThreading for $SystemTraits {
                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock::<Self>() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock::<Self>() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active::<Self>()
                }

                fn is_interrupt_context() -> bool {
                    PORT_STATE.is_interrupt_context::<Self>()
                }
            }

            impl PortTimer for $SystemTraits {
                const MAX_TICK_COUNT: UTicks = $max_tick_count;
                const MAX_TIMEOUT: UTicks = $max_timeout;

                unsafe fn tick_count() -> UTicks {
                    unsafe { PORT_STATE.tick_count::<Self>() }
                }

                unsafe fn pend_tick_after(tick_count_delta: UTicks) {
                    unsafe { PORT_STATE.pend_tick_after::<Self>(tick_count_delta) }
                }

                unsafe fn pend_tick() {
                    unsafe { PORT_STATE.pend_tick::<Self>() }
                }
            }
        }
    };
}
