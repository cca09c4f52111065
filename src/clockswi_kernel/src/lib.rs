#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
use core::marker::PhantomData;

#[doc(hidden)]
pub extern crate arrayvec;

pub mod utils;

mod clock;
mod error;
mod klock;
mod state;
mod swi;

pub use self::{
    clock::{Clock, ClockFn},
    error::*,
    klock::InterruptGuard,
    state::State,
    swi::{Swi, SwiAttrs, SwiDisableGuard, SwiFn, SwiKey, MAX_SWI_PRIORITY_LEVELS},
};

#[doc(hidden)]
pub use self::{clock::ClockCb, swi::SwiCb};

use self::utils::{Slot, VecLike};

/// Unsigned integer type representing a tick count.
pub type UTicks = u32;

/// The maximum timeout accepted by [`Clock::start`] and the maximum period
/// accepted by [`Clock::set_period`].
///
/// Tick counts are compared by their wrapping difference, which is only
/// unambiguous for distances up to half the tick space.
pub const MAX_CLOCK_TIMEOUT: UTicks = UTicks::MAX / 2;

/// Specifies how the timer interrupt is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickMode {
    /// The timer interrupt fires every tick.
    FixedPeriod,
    /// The timer interrupt fires only at ticks when a Clock expires.
    Dynamic,
}

/// Implemented by a port. This trait contains items related to low-level
/// operations for controlling CPU states.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// providing the CPU Lock state the kernel relies on for mutual exclusion.
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortThreading: Sized + 'static {
    /// Disable all kernel-managed interrupts (this state is called *CPU Lock*).
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn enter_cpu_lock();

    /// Re-enable kernel-managed interrupts previously disabled by
    /// `enter_cpu_lock`, thus deactivating the CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;

    /// Return a flag indicating whether the current context is an interrupt
    /// context, i.e., the body of an interrupt handler.
    fn is_interrupt_context() -> bool;
}

/// Implemented by a port. This trait contains items related to controlling
/// a system timer.
pub trait PortTimer {
    /// The maximum value that [`tick_count`] can return. The hardware counter
    /// wraps around to zero after this value.
    ///
    /// [`tick_count`]: Self::tick_count
    const MAX_TICK_COUNT: UTicks = UTicks::MAX;

    /// The maximum value that can be passed to [`pend_tick_after`]. Must be
    /// less than or equal to [`MAX_TICK_COUNT`] and `UTicks::MAX / 2`.
    ///
    /// [`pend_tick_after`]: Self::pend_tick_after
    /// [`MAX_TICK_COUNT`]: Self::MAX_TICK_COUNT
    const MAX_TIMEOUT: UTicks = UTicks::MAX / 2;

    /// Read the current hardware tick count.
    ///
    /// Precondition: CPU Lock active
    unsafe fn tick_count() -> UTicks;

    /// Schedule the timer interrupt to fire `tick_count_delta` ticks later,
    /// replacing any previously scheduled interrupt.
    ///
    /// Precondition: CPU Lock active, `0 < tick_count_delta <= MAX_TIMEOUT`
    unsafe fn pend_tick_after(tick_count_delta: UTicks);

    /// Pend the timer interrupt so that it's taken as soon as CPU Lock is
    /// released.
    ///
    /// Precondition: CPU Lock active
    unsafe fn pend_tick();
}

/// Represents a particular group of traits that a port should implement.
pub trait Port: PortThreading + PortTimer {}

impl<T: PortThreading + PortTimer> Port for T {}

/// Methods intended to be called by a port.
///
/// # Safety
///
/// These are only meant to be called by the port.
pub trait PortToKernel {
    /// The body of the timer interrupt handler.
    ///
    /// The port must call this between the interrupt prologue
    /// ([`System::swi_disable`], then entering the interrupt context) and the
    /// interrupt epilogue (leaving the interrupt context, then
    /// [`System::swi_restore`]).
    ///
    /// Precondition: CPU Lock inactive, an interrupt context
    unsafe fn timer_tick();
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn timer_tick() {
        clock::handle_tick::<Traits>();
    }
}

/// Associates "system" types with kernel-private data. Use [`build!`] to
/// implement.
///
/// # Safety
///
/// This is only intended to be implemented by `build!`.
pub unsafe trait KernelCfg: Port + Sized + 'static {
    /// How the timer interrupt is scheduled.
    const TICK_MODE: TickMode;

    /// The length of a tick in microseconds.
    const TICK_PERIOD_US: u32;

    /// The number of Swi priority levels, in range
    /// `1..=`[`MAX_SWI_PRIORITY_LEVELS`].
    const NUM_SWI_PRIORITY_LEVELS: usize;

    /// The priority of the Swi processing expired Clocks in
    /// [`TickMode::FixedPeriod`].
    const CLOCK_SWI_PRIORITY: usize;

    #[doc(hidden)]
    type SwiTable: VecLike<Element = Slot<SwiCb>> + 'static;

    #[doc(hidden)]
    type ClockTable: VecLike<Element = Slot<ClockCb>> + 'static;

    /// Access the kernel's global state.
    fn state() -> &'static State<Self>;
}

/// Represents "system" types having sufficient trait `impl`s to instantiate
/// the kernel.
pub trait KernelTraits: Port + KernelCfg + 'static {}

impl<T: Port + KernelCfg + 'static> KernelTraits for T {}

/// System-global operations of the kernel instantiated for `Traits`.
pub struct System<Traits>(PhantomData<Traits>);

impl<Traits: KernelTraits> System<Traits> {
    /// Initialize the kernel and start the tick timer.
    ///
    /// Clocks started before this are scheduled relative to tick zero.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn init() {
        clock::init::<Traits>();
    }

    pub fn tick_mode() -> TickMode {
        Traits::TICK_MODE
    }

    /// Get the current tick count.
    pub fn ticks() -> UTicks {
        clock::ticks::<Traits>()
    }

    /// Get the number of ticks until the next timer interrupt.
    pub fn ticks_until_interrupt() -> UTicks {
        clock::ticks_until_interrupt::<Traits>()
    }

    /// Get the length of a tick in microseconds.
    pub fn tick_period_us() -> u32 {
        Traits::TICK_PERIOD_US
    }

    /// Convert a duration in microseconds to ticks, rounding up.
    pub fn ticks_from_micros(us: u32) -> UTicks {
        let (ticks, rem) = num_integer::div_rem(us, Traits::TICK_PERIOD_US);
        ticks + (rem != 0) as UTicks
    }

    /// Suspend Swi scheduling. Returns a key to be passed to
    /// [`Self::swi_restore`].
    pub fn swi_disable() -> SwiKey {
        swi::disable::<Traits>()
    }

    /// Resume Swi scheduling if `key` was issued when scheduling was active,
    /// running the Swis posted in the meantime.
    pub fn swi_restore(key: SwiKey) {
        swi::restore::<Traits>(key);
    }

    /// Get a flag indicating whether Swi scheduling is suspended.
    pub fn swi_is_locked() -> bool {
        swi::is_locked::<Traits>()
    }
}

/// Instantiate the kernel for a system type that implements the port traits.
///
/// ```rust,ignore
/// clockswi_kernel::build!(SystemTraits, {
///     tick_mode: TickMode::Dynamic,
///     tick_period_us: 1_000,
///     num_swi_priority_levels: 16,
///     clock_swi_priority: 15,
///     max_swis: 16,
///     max_clocks: 32,
/// });
/// ```
///
/// The options are checked at compile time.
#[macro_export]
macro_rules! build {
    ($sys:ty, {
        tick_mode: $tick_mode:expr,
        tick_period_us: $tick_period_us:expr,
        num_swi_priority_levels: $num_levels:expr,
        clock_swi_priority: $clock_swi_priority:expr,
        max_swis: $max_swis:expr,
        max_clocks: $max_clocks:expr $(,)?
    }) => {
        const _: () = {
            use $crate::{
                arrayvec::ArrayVec,
                utils::{Init, Slot},
                ClockCb, KernelCfg, PortTimer, State, SwiCb, TickMode, UTicks,
                MAX_SWI_PRIORITY_LEVELS,
            };

            static STATE: State<$sys> = Init::INIT;

            // Safety: We are `build!`, so it's okay to `impl` this
            unsafe impl KernelCfg for $sys {
                const TICK_MODE: TickMode = $tick_mode;
                const TICK_PERIOD_US: u32 = $tick_period_us;
                const NUM_SWI_PRIORITY_LEVELS: usize = $num_levels;
                const CLOCK_SWI_PRIORITY: usize = $clock_swi_priority;

                type SwiTable = ArrayVec<Slot<SwiCb>, { $max_swis }>;
                type ClockTable = ArrayVec<Slot<ClockCb>, { $max_clocks }>;

                #[inline(always)]
                fn state() -> &'static State<Self> {
                    &STATE
                }
            }

            const _: () = assert!(
                <$sys as KernelCfg>::NUM_SWI_PRIORITY_LEVELS >= 1
                    && <$sys as KernelCfg>::NUM_SWI_PRIORITY_LEVELS <= MAX_SWI_PRIORITY_LEVELS,
                "`num_swi_priority_levels` must be in range `1..=32`"
            );
            const _: () = assert!(
                <$sys as KernelCfg>::CLOCK_SWI_PRIORITY
                    < <$sys as KernelCfg>::NUM_SWI_PRIORITY_LEVELS,
                "`clock_swi_priority` must be less than `num_swi_priority_levels`"
            );
            const _: () = assert!(
                <$sys as KernelCfg>::TICK_PERIOD_US > 0,
                "`tick_period_us` must be nonzero"
            );
            const _: () = assert!(
                <$sys as PortTimer>::MAX_TIMEOUT > 0
                    && <$sys as PortTimer>::MAX_TIMEOUT <= <$sys as PortTimer>::MAX_TICK_COUNT
                    && <$sys as PortTimer>::MAX_TIMEOUT <= UTicks::MAX / 2,
                "the port's `MAX_TIMEOUT` is out of range"
            );
        };
    };
}
