//! Tick timer and timed callbacks (Clocks)
//!
//! The kernel counts time in *ticks*. How the tick count advances depends on
//! [`KernelCfg::TICK_MODE`]:
//!
//!  - [`TickMode::FixedPeriod`]: the port delivers a timer interrupt every
//!    tick, and each one increments the tick count. Expired Clocks are
//!    processed by a Swi at [`KernelCfg::CLOCK_SWI_PRIORITY`], which catches up
//!    with the interrupts one tick at a time.
//!
//!  - [`TickMode::Dynamic`]: the hardware counter runs freely, and the timer
//!    interrupt is only requested for the tick at which the earliest active
//!    Clock expires. The interrupt handler services every tick elapsed since
//!    the last one and calls expired Clocks' functions directly.
//!
//! In both modes, Clocks expiring at the same tick fire in registration
//! order, and Clocks expiring at different ticks fire in tick order.
use core::{fmt, hash, marker::PhantomData, mem};

use crate::{
    error::{SetClockPeriodError, SetClockTimeoutError, StartClockError},
    klock::{lock_cpu, CpuLockGuard},
    swi::{Swi, SwiAttrs},
    utils::{
        list::{Link, Linked, ListAccessor, ListHead},
        Init, Pool, PoolId,
    },
    KernelCfg, KernelTraits, TickMode, UTicks, MAX_CLOCK_TIMEOUT,
};

/// The function called when a Clock expires. Receives the argument supplied
/// to [`Clock::register`] or [`Clock::set_func`].
pub type ClockFn = fn(usize);

/// *Clock control block* - the state data of a Clock.
#[doc(hidden)]
pub struct ClockCb {
    func: ClockFn,
    arg: usize,
    timeout: UTicks,
    /// `0` means one-shot.
    period: UTicks,
    /// The tick at which the Clock fires next. Only meaningful if `active`.
    deadline: UTicks,
    active: bool,
    /// Link in the list of registered Clocks.
    link: Option<Link>,
}

impl Linked for ClockCb {
    fn link(&self) -> &Option<Link> {
        &self.link
    }
    fn link_mut(&mut self) -> &mut Option<Link> {
        &mut self.link
    }
}

/// The tick timer state. Stored in [`State`](crate::State).
pub(super) struct ClockState<Traits: KernelCfg> {
    pool: Pool<Traits::ClockTable>,
    /// All registered Clocks, in registration order.
    registered: ListHead,

    /// The last serviced tick.
    ticks: UTicks,
    /// The hardware tick count at `ticks`. Only used in the dynamic mode.
    last_tick_count: UTicks,
    /// The tick at which the timer interrupt is expected next.
    next_scheduled_tick: UTicks,
    /// The timer is programmed for a Clock (rather than just for keeping
    /// `last_tick_count` from falling a whole hardware period behind).
    ticking: bool,

    /// The number of ticks yet to be serviced by the deferred work Swi.
    pending_count: UTicks,
    /// The number of active Clocks.
    num_active: usize,
    /// Clock functions are being called.
    in_work_func: bool,
    /// The next Clock to visit in the ongoing registration-order walk.
    /// [`Clock::destroy`] updates this if it unlinks that Clock.
    walk_next: Option<usize>,
    work_swi: Option<Swi<Traits>>,
    booted: bool,
}

impl<Traits: KernelCfg> Init for ClockState<Traits> {
    const INIT: Self = Self {
        pool: Init::INIT,
        registered: ListHead::INIT,
        ticks: 0,
        last_tick_count: 0,
        next_scheduled_tick: 0,
        ticking: false,
        pending_count: 0,
        num_active: 0,
        in_work_func: false,
        walk_next: None,
        work_swi: None,
        booted: false,
    };
}

/// Get the signed distance from `from` to `to`, assuming both lie within
/// half the tick space from each other.
#[inline]
fn distance(from: UTicks, to: UTicks) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Calculate the number of hardware ticks elapsed from `last` to `now` on a
/// counter that wraps around after `max`.
#[inline]
fn tick_count_delta(last: UTicks, now: UTicks, max: UTicks) -> UTicks {
    if now >= last {
        now - last
    } else {
        // `max - last + now + 1` can't overflow because `now < last`
        (max - last) + now + 1
    }
}

/// The hardware tick count `by` ticks before `count`. Inverse of
/// [`tick_count_delta`].
fn rewind_tick_count(count: UTicks, by: UTicks, max: UTicks) -> UTicks {
    if by <= count {
        count - by
    } else {
        max - (by - count - 1)
    }
}

impl<Traits: KernelTraits> ClockState<Traits> {
    fn cb_mut(&mut self, id: PoolId) -> &mut ClockCb {
        match self.pool.get_mut(id) {
            Some(cb) => cb,
            None => panic!("Clock {id:?} has been destroyed"),
        }
    }

    /// Iterate over the indices of registered Clocks in registration order.
    fn registered(&self) -> impl Iterator<Item = usize> + '_ {
        let first = self.registered.first;
        let mut cur = first;
        core::iter::from_fn(move || {
            let index = cur?;
            cur = match self.pool[index].link {
                Some(link) if Some(link.next) != first => Some(link.next),
                _ => None,
            };
            Some(index)
        })
    }

    /// Get the current tick count.
    ///
    /// CPU Lock must be active (the caller is holding the token that gave
    /// access to `self`).
    fn now(&self) -> UTicks {
        match Traits::TICK_MODE {
            TickMode::Dynamic if self.booted => {
                // Safety: CPU Lock active
                let tick_count = unsafe { Traits::tick_count() };
                let elapsed =
                    tick_count_delta(self.last_tick_count, tick_count, Traits::MAX_TICK_COUNT);
                self.ticks.wrapping_add(elapsed)
            }
            _ => self.ticks,
        }
    }

    fn activate(&mut self, id: PoolId, timeout: UTicks) {
        let now = self.now();
        let cb = self.cb_mut(id);
        cb.deadline = now.wrapping_add(timeout);
        let was_active = mem::replace(&mut cb.active, true);
        if !was_active {
            self.num_active += 1;
        }
        log::trace!("Clock {id:?} started, expiring at tick {}", now.wrapping_add(timeout));

        if Traits::TICK_MODE == TickMode::Dynamic && self.booted && !self.in_work_func {
            let scheduled_in = distance(now, self.next_scheduled_tick);
            if !self.ticking || (scheduled_in > 0 && (timeout as i32) < scheduled_in) {
                self.program_timer();
            }
        }
    }

    fn deactivate(&mut self, id: PoolId) {
        let cb = self.cb_mut(id);
        if mem::replace(&mut cb.active, false) {
            self.num_active -= 1;
            log::trace!("Clock {id:?} stopped");
        }
    }

    /// Program the hardware timer for the earliest active Clock (dynamic
    /// mode).
    fn program_timer(&mut self) {
        let now = self.now();
        let nearest = self
            .registered()
            .filter(|&i| self.pool[i].active)
            .map(|i| distance(now, self.pool[i].deadline))
            .min();

        match nearest {
            Some(d) if d <= 0 => {
                log::trace!("timer: tick {now} is due now");
                self.ticking = true;
                self.next_scheduled_tick = now;
                // Safety: CPU Lock active
                unsafe { Traits::pend_tick() };
            }
            Some(d) => {
                let d = (d as UTicks).min(Traits::MAX_TIMEOUT);
                log::trace!("timer: programming for {d} ticks from tick {now}");
                self.ticking = true;
                self.next_scheduled_tick = now.wrapping_add(d);
                // Safety: CPU Lock active
                unsafe { Traits::pend_tick_after(d) };
            }
            None => {
                // Keep `last_tick_count` within a hardware period of the
                // actual count
                let d = Traits::MAX_TIMEOUT;
                log::trace!("timer: idle, programming for {d} ticks from tick {now}");
                self.ticking = false;
                self.next_scheduled_tick = now.wrapping_add(d);
                // Safety: CPU Lock active
                unsafe { Traits::pend_tick_after(d) };
            }
        }
    }

    /// Find the earliest expiration among active Clocks within
    /// `(base, base + elapsed]`, expressed as an offset from `base`.
    fn earliest_due(&self, base: UTicks, elapsed: UTicks) -> Option<UTicks> {
        self.registered()
            .filter(|&i| self.pool[i].active)
            .map(|i| self.pool[i].deadline.wrapping_sub(base))
            .filter(|offset| (1..=elapsed).contains(offset))
            .min()
    }
}

/// Initialize the tick timer and start ticking.
pub(super) fn init<Traits: KernelTraits>() {
    {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        assert!(!st.booted, "`System::init` was called twice");
    }

    let work_swi = match Traits::TICK_MODE {
        TickMode::FixedPeriod => Some(Swi::<Traits>::new(
            SwiAttrs::new(Traits::CLOCK_SWI_PRIORITY),
            deferred_work::<Traits>,
        )),
        TickMode::Dynamic => None,
    };

    let mut lock = lock_cpu::<Traits>();
    let st = Traits::state().clock.write(&mut *lock);
    st.work_swi = work_swi;
    st.booted = true;

    match Traits::TICK_MODE {
        TickMode::FixedPeriod => {
            st.ticking = true;
            st.next_scheduled_tick = st.ticks.wrapping_add(1);
            // Safety: CPU Lock active
            unsafe { Traits::pend_tick_after(1) };
        }
        TickMode::Dynamic => {
            // Safety: CPU Lock active
            st.last_tick_count = unsafe { Traits::tick_count() };
            st.program_timer();
        }
    }

    log::debug!(
        "tick timer started: mode = {:?}, period = {}us, {} Clock(s) active",
        Traits::TICK_MODE,
        Traits::TICK_PERIOD_US,
        st.num_active
    );
}

/// The timer interrupt handler body.
pub(super) fn handle_tick<Traits: KernelTraits>() {
    match Traits::TICK_MODE {
        TickMode::FixedPeriod => handle_tick_fixed::<Traits>(),
        TickMode::Dynamic => handle_tick_dynamic::<Traits>(),
    }
}

fn handle_tick_fixed<Traits: KernelTraits>() {
    let mut lock = lock_cpu::<Traits>();
    let st = Traits::state().clock.write(&mut *lock);
    debug_assert!(st.booted);

    st.ticks = st.ticks.wrapping_add(1);
    st.next_scheduled_tick = st.ticks.wrapping_add(1);
    // Safety: CPU Lock active
    unsafe { Traits::pend_tick_after(1) };

    // Once a tick is deferred, the following ones must be too, or
    // `deferred_work` would lose track of which tick each pending one is
    let work_swi = if st.num_active > 0 || st.pending_count > 0 {
        st.pending_count += 1;
        st.work_swi
    } else {
        None
    };
    drop(lock);

    if let Some(swi) = work_swi {
        swi.post();
    }
}

fn handle_tick_dynamic<Traits: KernelTraits>() {
    let mut lock = lock_cpu::<Traits>();
    let st = Traits::state().clock.write(&mut *lock);
    debug_assert!(st.booted);

    // Safety: CPU Lock active
    let tick_count = unsafe { Traits::tick_count() };
    let elapsed = tick_count_delta(st.last_tick_count, tick_count, Traits::MAX_TICK_COUNT);

    if elapsed == 0 {
        log::trace!("spurious timer interrupt at tick {}", st.ticks);
        st.program_timer();
        return;
    }

    let base = st.ticks;
    st.ticks = base.wrapping_add(elapsed);
    st.last_tick_count = tick_count;
    st.in_work_func = true;

    loop {
        let st = Traits::state().clock.write(&mut *lock);
        let Some(offset) = st.earliest_due(base, elapsed) else {
            break;
        };
        let tick = base.wrapping_add(offset);
        let guard = ServiceGuard::<Traits>::new(tick);
        lock = fire_clocks_due_at(lock, tick);
        mem::forget(guard);
    }

    let st = Traits::state().clock.write(&mut *lock);
    st.in_work_func = false;
    st.program_timer();
}

/// The deferred work Swi function (fixed-period mode). Services pending ticks
/// in order.
fn deferred_work<Traits: KernelTraits>(_: usize, _: usize) {
    let mut lock = lock_cpu::<Traits>();
    Traits::state().clock.write(&mut *lock).in_work_func = true;

    loop {
        let st = Traits::state().clock.write(&mut *lock);
        if st.pending_count == 0 {
            break;
        }
        let tick = st.ticks.wrapping_sub(st.pending_count - 1);
        st.pending_count -= 1;
        let guard = ServiceGuard::<Traits>::new(tick);
        lock = fire_clocks_due_at(lock, tick);
        mem::forget(guard);
    }

    Traits::state().clock.write(&mut *lock).in_work_func = false;
}

/// Hands the tick being serviced back as unserviced if a Clock function
/// unwinds. The Clocks that haven't fired yet at that tick fire the next time
/// ticks are serviced; the ones that have were already rearmed or
/// deactivated.
struct ServiceGuard<Traits: KernelTraits> {
    tick: UTicks,
    _phantom: PhantomData<Traits>,
}

impl<Traits: KernelTraits> ServiceGuard<Traits> {
    fn new(tick: UTicks) -> Self {
        Self {
            tick,
            _phantom: PhantomData,
        }
    }
}

impl<Traits: KernelTraits> Drop for ServiceGuard<Traits> {
    fn drop(&mut self) {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        log::debug!("a Clock function panicked at tick {}", self.tick);
        st.walk_next = None;
        st.in_work_func = false;

        match Traits::TICK_MODE {
            TickMode::FixedPeriod => st.pending_count += 1,
            TickMode::Dynamic => {
                let rewind = st.ticks.wrapping_sub(self.tick).wrapping_add(1);
                st.ticks = self.tick.wrapping_sub(1);
                st.last_tick_count =
                    rewind_tick_count(st.last_tick_count, rewind, Traits::MAX_TICK_COUNT);
                st.program_timer();
            }
        }
    }
}

/// Call the functions of the Clocks expiring at `tick`, in registration
/// order. Periodic Clocks are rearmed, and one-shot Clocks are deactivated
/// before their functions are called.
fn fire_clocks_due_at<Traits: KernelTraits>(
    mut lock: CpuLockGuard<Traits>,
    tick: UTicks,
) -> CpuLockGuard<Traits> {
    let st = Traits::state().clock.write(&mut *lock);
    let mut cur = ListAccessor::new(&mut st.registered, &mut st.pool).front();

    while let Some(index) = cur {
        let st = Traits::state().clock.write(&mut *lock);
        st.walk_next = ListAccessor::new(&mut st.registered, &mut st.pool)
            .next(index)
            .ok()
            .flatten();

        let cb = &mut st.pool[index];
        if cb.active && cb.deadline == tick {
            let (func, arg) = (cb.func, cb.arg);
            if cb.period == 0 {
                cb.active = false;
                st.num_active -= 1;
            } else {
                cb.deadline = cb.deadline.wrapping_add(cb.period);
            }

            drop(lock);
            func(arg);
            lock = lock_cpu::<Traits>();
        }

        cur = Traits::state().clock.read(&*lock).walk_next;
    }

    lock
}

/// Represents a single Clock in a system.
///
/// This type is a handle; copying it doesn't copy the Clock. Using a handle
/// after [`Self::destroy`] panics.
pub struct Clock<Traits> {
    id: PoolId,
    _phantom: PhantomData<fn() -> Traits>,
}

impl<Traits> Clone for Clock<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits> Copy for Clock<Traits> {}

impl<Traits> PartialEq for Clock<Traits> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<Traits> Eq for Clock<Traits> {}

impl<Traits> hash::Hash for Clock<Traits> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<Traits> fmt::Debug for Clock<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.id).finish()
    }
}

impl<Traits: KernelTraits> Clock<Traits> {
    /// Register an inactive one-shot Clock with the specified function.
    ///
    /// # Panics
    ///
    /// Panics if the Clock pool is full.
    pub fn register(func: ClockFn, arg: usize) -> Self {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        let Ok(id) = st.pool.allocate(ClockCb {
            func,
            arg,
            timeout: 0,
            period: 0,
            deadline: 0,
            active: false,
            link: None,
        }) else {
            panic!("out of Clock control blocks; increase `max_clocks`");
        };

        let result = ListAccessor::new(&mut st.registered, &mut st.pool).push_back(id.index());
        debug_assert!(result.is_ok(), "{result:?}");
        log::trace!("Clock {id:?} registered");

        Self {
            id,
            _phantom: PhantomData,
        }
    }

    /// Start the Clock so that it fires `timeout` ticks later. The timeout is
    /// stored and used by subsequent calls to [`Self::restart`].
    ///
    /// If the Clock is already active, its expiration is rescheduled.
    pub fn start(self, timeout: UTicks) -> Result<(), StartClockError> {
        validate_timeout(timeout)?;

        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        st.cb_mut(self.id).timeout = timeout;
        st.activate(self.id, timeout);
        Ok(())
    }

    /// Start the Clock with the stored timeout.
    pub fn restart(self) -> Result<(), StartClockError> {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        let timeout = st.cb_mut(self.id).timeout;
        validate_timeout(timeout)?;
        st.activate(self.id, timeout);
        Ok(())
    }

    /// Stop the Clock. Does nothing if it's inactive.
    pub fn stop(self) {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().clock.write(&mut *lock).deactivate(self.id);
    }

    /// Set the timeout used by [`Self::restart`]. Doesn't affect the current
    /// expiration of an active Clock.
    pub fn set_timeout(self, timeout: UTicks) -> Result<(), SetClockTimeoutError> {
        validate_timeout(timeout)?;

        let mut lock = lock_cpu::<Traits>();
        Traits::state().clock.write(&mut *lock).cb_mut(self.id).timeout = timeout;
        Ok(())
    }

    /// Get the stored timeout.
    pub fn timeout(self) -> UTicks {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().clock.write(&mut *lock).cb_mut(self.id).timeout
    }

    /// Set the period. `0` makes the Clock one-shot. Takes effect when the
    /// Clock fires next.
    pub fn set_period(self, period: UTicks) -> Result<(), SetClockPeriodError> {
        if period > MAX_CLOCK_TIMEOUT {
            return Err(SetClockPeriodError::BadParam);
        }

        let mut lock = lock_cpu::<Traits>();
        Traits::state().clock.write(&mut *lock).cb_mut(self.id).period = period;
        Ok(())
    }

    pub fn period(self) -> UTicks {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().clock.write(&mut *lock).cb_mut(self.id).period
    }

    /// Replace the function and its argument.
    pub fn set_func(self, func: ClockFn, arg: usize) {
        let mut lock = lock_cpu::<Traits>();
        let cb = Traits::state().clock.write(&mut *lock).cb_mut(self.id);
        cb.func = func;
        cb.arg = arg;
    }

    pub fn is_active(self) -> bool {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().clock.write(&mut *lock).cb_mut(self.id).active
    }

    /// Get the number of ticks until the Clock fires next. Returns `0` if
    /// the Clock is inactive.
    pub fn remaining_ticks(self) -> UTicks {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        let now = st.now();
        let cb = st.cb_mut(self.id);
        if cb.active {
            distance(now, cb.deadline).max(0) as UTicks
        } else {
            0
        }
    }

    /// Stop and unregister the Clock. The handle becomes invalid.
    ///
    /// This can be called from a Clock function, including that of the Clock
    /// being destroyed.
    pub fn destroy(self) {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().clock.write(&mut *lock);
        st.deactivate(self.id);

        let index = self.id.index();
        let mut registered = ListAccessor::new(&mut st.registered, &mut st.pool);
        if st.walk_next == Some(index) {
            st.walk_next = registered.next(index).ok().flatten();
        }
        let result = registered.remove(index);
        debug_assert!(result.is_ok(), "{result:?}");

        st.pool.deallocate(self.id);
        log::trace!("Clock {:?} destroyed", self.id);
    }
}

fn validate_timeout(timeout: UTicks) -> Result<(), SetClockTimeoutError> {
    if timeout == 0 || timeout > MAX_CLOCK_TIMEOUT {
        Err(SetClockTimeoutError::InvalidTimeout)
    } else {
        Ok(())
    }
}

pub(super) fn ticks<Traits: KernelTraits>() -> UTicks {
    let lock = lock_cpu::<Traits>();
    Traits::state().clock.read(&*lock).now()
}

pub(super) fn ticks_until_interrupt<Traits: KernelTraits>() -> UTicks {
    let lock = lock_cpu::<Traits>();
    let st = Traits::state().clock.read(&*lock);
    if !st.booted {
        return 0;
    }
    match Traits::TICK_MODE {
        TickMode::FixedPeriod => 1,
        TickMode::Dynamic => distance(st.now(), st.next_scheduled_tick).max(0) as UTicks,
    }
}
