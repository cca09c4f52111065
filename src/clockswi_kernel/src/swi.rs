//! Software interrupts (Swis)
//!
//! A Swi is a unit of deferred work with a fixed priority. Posting a Swi puts
//! it into the ready queue of its priority level. Ready Swis run to completion
//! in priority order (a higher number means a higher priority) and in FIFO
//! order within a level. A Swi that becomes ready while a lower-priority one is
//! running preempts it, which is expressed as a nested call of the run loop
//! ([`run_ready`]) on the native stack.
//!
//! Scheduling can be suspended with [`System::swi_disable`]. While suspended,
//! posted Swis only accumulate in the ready queues; they run when the outermost
//! [`System::swi_restore`] is called.
//!
//! [`System::swi_disable`]: crate::System::swi_disable
//! [`System::swi_restore`]: crate::System::swi_restore
use core::{fmt, hash, marker::PhantomData, mem};

use crate::{
    klock::{lock_cpu, CpuLockGuard},
    utils::{
        list::{Link, Linked, ListAccessor, ListHead},
        Init, Pool, PoolId, PrioBitmap, PRIO_BITMAP_MAX_LEN,
    },
    KernelCfg, KernelTraits,
};

/// The maximum value of [`KernelCfg::NUM_SWI_PRIORITY_LEVELS`].
pub const MAX_SWI_PRIORITY_LEVELS: usize = PRIO_BITMAP_MAX_LEN;

/// The function run by a Swi. Receives [`SwiAttrs::arg0`] and
/// [`SwiAttrs::arg1`].
pub type SwiFn = fn(usize, usize);

/// Attributes of a Swi, supplied to [`Swi::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwiAttrs {
    /// The priority, which must be less than
    /// [`KernelCfg::NUM_SWI_PRIORITY_LEVELS`]. Larger values mean higher
    /// priorities.
    pub priority: usize,
    /// The initial value of the trigger. The trigger is reset to this value
    /// every time the Swi starts running.
    pub trigger: u32,
    pub arg0: usize,
    pub arg1: usize,
}

impl SwiAttrs {
    /// Construct `SwiAttrs` with the specified priority. The trigger and the
    /// arguments are initialized to zero.
    pub const fn new(priority: usize) -> Self {
        Self {
            priority,
            trigger: 0,
            arg0: 0,
            arg1: 0,
        }
    }
}

/// *Swi control block* - the state data of a Swi.
#[doc(hidden)]
pub struct SwiCb {
    func: SwiFn,
    arg0: usize,
    arg1: usize,
    priority: usize,
    /// The level of the ready queue `link` belongs to. Can differ from
    /// `priority`; only this one tells which queue to unlink from.
    queued_at: usize,
    trigger: u32,
    init_trigger: u32,
    /// `true` iff `link.is_some()`
    posted: bool,
    link: Option<Link>,
}

impl Linked for SwiCb {
    fn link(&self) -> &Option<Link> {
        &self.link
    }
    fn link_mut(&mut self) -> &mut Option<Link> {
        &mut self.link
    }
}

/// The Swi scheduler state. Stored in [`State`](crate::State).
pub(super) struct SwiState<Traits: KernelCfg> {
    pool: Pool<Traits::SwiTable>,
    queues: [ListHead; MAX_SWI_PRIORITY_LEVELS],
    /// Bit `i` is set iff `queues[i]` is not empty.
    ready: PrioBitmap,
    /// The priority of the innermost running Swi. `None` if no Swi is running.
    cur_priority: Option<usize>,
    cur_swi: Option<PoolId>,
    /// The trigger value latched when `cur_swi` started running.
    cur_trigger: u32,
    /// Scheduling is suspended.
    locked: bool,
}

impl<Traits: KernelCfg> Init for SwiState<Traits> {
    const INIT: Self = Self {
        pool: Init::INIT,
        queues: [ListHead::INIT; MAX_SWI_PRIORITY_LEVELS],
        ready: PrioBitmap::INIT,
        cur_priority: None,
        cur_swi: None,
        cur_trigger: 0,
        locked: false,
    };
}

impl<Traits: KernelCfg> SwiState<Traits> {
    fn cb_mut(&mut self, id: PoolId) -> &mut SwiCb {
        match self.pool.get_mut(id) {
            Some(cb) => cb,
            None => panic!("Swi {id:?} has been destroyed"),
        }
    }

    /// Link an unlinked Swi to the back of the ready queue of its priority.
    fn enqueue(&mut self, index: usize) {
        let priority = self.pool[index].priority;
        self.pool[index].queued_at = priority;
        let result = ListAccessor::new(&mut self.queues[priority], &mut self.pool).push_back(index);
        debug_assert!(result.is_ok(), "{result:?}");
        self.ready.set(priority);
    }

    /// Unlink a Swi from the ready queue it's currently in.
    fn unlink(&mut self, index: usize) {
        let level = self.pool[index].queued_at;
        let mut queue = ListAccessor::new(&mut self.queues[level], &mut self.pool);
        let result = queue.remove(index);
        debug_assert!(result.is_ok(), "{result:?}");
        if queue.is_empty() {
            self.ready.clear(level);
        }
    }

    /// Get the highest ready priority if it's strictly higher than that of
    /// the running Swi.
    fn preempting_priority(&self) -> Option<usize> {
        let highest = self.ready.find_highest()?;
        match self.cur_priority {
            Some(cur) if highest <= cur => None,
            _ => Some(highest),
        }
    }
}

/// Represents a single Swi in a system.
///
/// This type is a handle; copying it doesn't copy the Swi. Using a handle
/// after [`Self::destroy`] panics.
pub struct Swi<Traits> {
    id: PoolId,
    _phantom: PhantomData<fn() -> Traits>,
}

impl<Traits> Clone for Swi<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits> Copy for Swi<Traits> {}

impl<Traits> PartialEq for Swi<Traits> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<Traits> Eq for Swi<Traits> {}

impl<Traits> hash::Hash for Swi<Traits> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<Traits> fmt::Debug for Swi<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Swi").field(&self.id).finish()
    }
}

impl<Traits> Swi<Traits> {
    fn from_id(id: PoolId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }
}

impl<Traits: KernelTraits> Swi<Traits> {
    /// Create a Swi.
    ///
    /// # Panics
    ///
    /// Panics if `attrs.priority` is out of range or the Swi pool is full.
    pub fn new(attrs: SwiAttrs, func: SwiFn) -> Self {
        assert!(
            attrs.priority < Traits::NUM_SWI_PRIORITY_LEVELS,
            "Swi priority {} is out of range 0..{}",
            attrs.priority,
            Traits::NUM_SWI_PRIORITY_LEVELS
        );

        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().swi.write(&mut *lock);
        let allocated = st.pool.allocate(SwiCb {
            func,
            arg0: attrs.arg0,
            arg1: attrs.arg1,
            priority: attrs.priority,
            queued_at: attrs.priority,
            trigger: attrs.trigger,
            init_trigger: attrs.trigger,
            posted: false,
            link: None,
        });
        drop(lock);

        match allocated {
            Ok(id) => {
                log::trace!("Swi {id:?} created at priority {}", attrs.priority);
                Self::from_id(id)
            }
            Err(_) => panic!("out of Swi control blocks; increase `max_swis`"),
        }
    }

    /// Get the running Swi. Returns `None` if no Swi is running.
    pub fn current() -> Option<Self> {
        let lock = lock_cpu::<Traits>();
        Traits::state().swi.read(&*lock).cur_swi.map(Self::from_id)
    }

    /// Get the trigger value of the running Swi, as it was just before the
    /// Swi started running. Returns `0` if no Swi is running.
    pub fn current_trigger() -> u32 {
        let lock = lock_cpu::<Traits>();
        let st = Traits::state().swi.read(&*lock);
        if st.cur_swi.is_some() {
            st.cur_trigger
        } else {
            0
        }
    }

    /// Post the Swi.
    ///
    /// The Swi is put at the back of the ready queue of its priority unless
    /// it's already posted, in which case it keeps its place. Either way, it
    /// runs before this method returns if it outranks the running Swi (if
    /// any) and scheduling is possible at this point.
    ///
    /// Scheduling is not possible if it's suspended by
    /// [`System::swi_disable`], in an interrupt context, or in a CPU Lock
    /// state (e.g., inside [`InterruptGuard`]). In these cases, the Swi runs
    /// at the next scheduling point, such as [`System::swi_restore`], the exit
    /// of an interrupt handler, or the next `post` made outside these
    /// conditions.
    ///
    /// [`System::swi_disable`]: crate::System::swi_disable
    /// [`System::swi_restore`]: crate::System::swi_restore
    /// [`InterruptGuard`]: crate::InterruptGuard
    pub fn post(self) {
        post_with_lock(lock_cpu::<Traits>(), self.id);
    }

    /// Increment the trigger and post the Swi.
    pub fn inc(self) {
        self.update_trigger(|trigger| {
            *trigger = trigger.wrapping_add(1);
            true
        });
    }

    /// Decrement the trigger and post the Swi if the trigger becomes zero.
    /// Does nothing if the trigger is already zero.
    pub fn dec(self) {
        self.update_trigger(|trigger| {
            if *trigger == 0 {
                false
            } else {
                *trigger -= 1;
                *trigger == 0
            }
        });
    }

    /// Set the bits of `mask` in the trigger and post the Swi.
    pub fn or(self, mask: u32) {
        self.update_trigger(|trigger| {
            *trigger |= mask;
            true
        });
    }

    /// Clear the bits of `mask` in the trigger and post the Swi if the
    /// trigger becomes zero. Does nothing if the trigger is already zero.
    pub fn andn(self, mask: u32) {
        self.update_trigger(|trigger| {
            if *trigger == 0 {
                false
            } else {
                *trigger &= !mask;
                *trigger == 0
            }
        });
    }

    fn update_trigger(self, f: impl FnOnce(&mut u32) -> bool) {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().swi.write(&mut *lock);
        if f(&mut st.cb_mut(self.id).trigger) {
            post_with_lock(lock, self.id);
        }
    }

    /// Get the current value of the trigger.
    pub fn trigger(self) -> u32 {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().swi.write(&mut *lock).cb_mut(self.id).trigger
    }

    /// Get the priority.
    pub fn priority(self) -> usize {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().swi.write(&mut *lock).cb_mut(self.id).priority
    }

    /// Get a flag indicating whether the Swi is posted and has not started
    /// running yet.
    pub fn is_posted(self) -> bool {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().swi.write(&mut *lock).cb_mut(self.id).posted
    }

    /// Change the priority. If the Swi is posted, it's moved to the back of
    /// the ready queue of the new priority.
    ///
    /// # Panics
    ///
    /// Panics if `priority` is out of range.
    pub fn set_priority(self, priority: usize) {
        assert!(
            priority < Traits::NUM_SWI_PRIORITY_LEVELS,
            "Swi priority {priority} is out of range 0..{}",
            Traits::NUM_SWI_PRIORITY_LEVELS
        );

        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().swi.write(&mut *lock);
        let index = self.id.index();
        st.cb_mut(self.id).priority = priority;

        if st.pool[index].link.is_some() {
            st.unlink(index);
            st.enqueue(index);
            log::trace!("Swi {:?} moved to priority {priority}", self.id);
            schedule(lock);
        }
    }

    /// Destroy the Swi.
    ///
    /// # Panics
    ///
    /// Panics if the Swi is posted. A posted Swi is referenced by its ready
    /// queue and can't be silently dropped from it.
    pub fn destroy(self) {
        let mut lock = lock_cpu::<Traits>();
        let st = Traits::state().swi.write(&mut *lock);
        assert!(
            !st.cb_mut(self.id).posted,
            "Swi {:?} can't be destroyed while it's posted",
            self.id
        );
        st.pool.deallocate(self.id);
        log::trace!("Swi {:?} destroyed", self.id);
    }
}

fn post_with_lock<Traits: KernelTraits>(mut lock: CpuLockGuard<Traits>, id: PoolId) {
    let st = Traits::state().swi.write(&mut *lock);
    let cb = st.cb_mut(id);
    if !cb.posted {
        cb.posted = true;
        st.enqueue(id.index());
        log::trace!("Swi {id:?} posted");
    }

    // Even if it was already posted, it might have been posted at a point
    // where scheduling wasn't possible
    schedule(lock);
}

/// Run the Swis outranking the running one if scheduling is possible at this
/// point.
fn schedule<Traits: KernelTraits>(mut lock: CpuLockGuard<Traits>) {
    let inhibited = lock.was_active() || Traits::is_interrupt_context();
    let st = Traits::state().swi.write(&mut *lock);
    if inhibited || st.locked || st.preempting_priority().is_none() {
        return;
    }

    st.locked = true;
    let resume = ResumeOnDrop::<Traits>(PhantomData);
    resume.finish(run_ready(lock));
}

/// Run ready Swis until none of them outranks the running one.
///
/// Scheduling must be suspended on entry, and it's suspended again on return.
/// Each Swi function is called with scheduling resumed and CPU Lock inactive,
/// so it can be preempted by interrupts and by Swis it (or an interrupt)
/// posts.
fn run_ready<Traits: KernelTraits>(mut lock: CpuLockGuard<Traits>) -> CpuLockGuard<Traits> {
    loop {
        let st = Traits::state().swi.write(&mut *lock);
        debug_assert!(st.locked);

        let Some(priority) = st.preempting_priority() else {
            break;
        };

        let mut queue = ListAccessor::new(&mut st.queues[priority], &mut st.pool);
        // There must be at least one Swi because the bitmap indicated so
        let Some(index) = queue.pop_front() else {
            unreachable!("ready bitmap is out of sync with queue {priority}");
        };
        if queue.is_empty() {
            st.ready.clear(priority);
        }

        let cb = &mut st.pool[index];
        cb.posted = false;
        let trigger = mem::replace(&mut cb.trigger, cb.init_trigger);
        let (func, arg0, arg1) = (cb.func, cb.arg0, cb.arg1);
        let id = st.pool.id_at(index);

        let frame = Frame {
            priority: mem::replace(&mut st.cur_priority, Some(priority)),
            swi: mem::replace(&mut st.cur_swi, id),
            trigger: mem::replace(&mut st.cur_trigger, trigger),
        };
        st.locked = false;
        drop(lock);

        log::trace!("running Swi {id:?} at priority {priority}");
        let frame = FrameGuard::<Traits> {
            frame,
            _phantom: PhantomData,
        };
        func(arg0, arg1);
        lock = frame.finish();
    }
    lock
}

/// The scheduler state saved by [`run_ready`] while a Swi runs.
#[derive(Clone, Copy)]
struct Frame {
    priority: Option<usize>,
    swi: Option<PoolId>,
    trigger: u32,
}

impl Frame {
    fn restore<Traits: KernelCfg>(self, st: &mut SwiState<Traits>) {
        st.cur_priority = self.priority;
        st.cur_swi = self.swi;
        st.cur_trigger = self.trigger;
        st.locked = true;
    }
}

/// Restores a saved [`Frame`] when the Swi function returns or unwinds.
struct FrameGuard<Traits: KernelTraits> {
    frame: Frame,
    _phantom: PhantomData<Traits>,
}

impl<Traits: KernelTraits> FrameGuard<Traits> {
    fn finish(self) -> CpuLockGuard<Traits> {
        let mut lock = lock_cpu::<Traits>();
        self.frame.restore(Traits::state().swi.write(&mut *lock));
        mem::forget(self);
        lock
    }
}

impl<Traits: KernelTraits> Drop for FrameGuard<Traits> {
    fn drop(&mut self) {
        let mut lock = lock_cpu::<Traits>();
        self.frame.restore(Traits::state().swi.write(&mut *lock));
    }
}

/// Resumes scheduling after [`run_ready`], whether it returns or a Swi
/// function unwinds out of it.
struct ResumeOnDrop<Traits: KernelTraits>(PhantomData<Traits>);

impl<Traits: KernelTraits> ResumeOnDrop<Traits> {
    fn finish(self, mut lock: CpuLockGuard<Traits>) {
        Traits::state().swi.write(&mut *lock).locked = false;
        mem::forget(self);
    }
}

impl<Traits: KernelTraits> Drop for ResumeOnDrop<Traits> {
    fn drop(&mut self) {
        let mut lock = lock_cpu::<Traits>();
        Traits::state().swi.write(&mut *lock).locked = false;
        log::debug!("Swi scheduling resumed after a panic");
    }
}

/// The previous state of the Swi scheduler lock, returned by
/// [`System::swi_disable`](crate::System::swi_disable).
#[must_use = "pass this to `System::swi_restore`"]
#[derive(Debug, PartialEq, Eq)]
pub struct SwiKey {
    was_locked: bool,
}

impl SwiKey {
    /// Get a flag indicating whether scheduling had already been suspended
    /// when this key was issued.
    pub fn was_locked(&self) -> bool {
        self.was_locked
    }
}

pub(super) fn disable<Traits: KernelTraits>() -> SwiKey {
    let mut lock = lock_cpu::<Traits>();
    let st = Traits::state().swi.write(&mut *lock);
    SwiKey {
        was_locked: mem::replace(&mut st.locked, true),
    }
}

pub(super) fn restore<Traits: KernelTraits>(key: SwiKey) {
    if key.was_locked {
        return;
    }

    let mut lock = lock_cpu::<Traits>();
    let inhibited = lock.was_active() || Traits::is_interrupt_context();
    let st = Traits::state().swi.write(&mut *lock);
    debug_assert!(st.locked, "unbalanced Swi restore");

    if inhibited || st.preempting_priority().is_none() {
        st.locked = false;
        return;
    }

    let resume = ResumeOnDrop::<Traits>(PhantomData);
    resume.finish(run_ready(lock));
}

pub(super) fn is_locked<Traits: KernelTraits>() -> bool {
    let lock = lock_cpu::<Traits>();
    Traits::state().swi.read(&*lock).locked
}

/// RAII guard that suspends Swi scheduling while it's alive.
///
/// Equivalent to pairing [`System::swi_disable`] and
/// [`System::swi_restore`], but the restore also happens on early return and
/// unwinding.
///
/// [`System::swi_disable`]: crate::System::swi_disable
/// [`System::swi_restore`]: crate::System::swi_restore
#[must_use = "scheduling is resumed as soon as the guard is dropped"]
pub struct SwiDisableGuard<Traits: KernelTraits> {
    key: Option<SwiKey>,
    _phantom: PhantomData<Traits>,
}

impl<Traits: KernelTraits> SwiDisableGuard<Traits> {
    pub fn new() -> Self {
        Self {
            key: Some(disable::<Traits>()),
            _phantom: PhantomData,
        }
    }
}

impl<Traits: KernelTraits> Default for SwiDisableGuard<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: KernelTraits> Drop for SwiDisableGuard<Traits> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            restore::<Traits>(key);
        }
    }
}

impl<Traits: KernelTraits> fmt::Debug for SwiDisableGuard<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SwiDisableGuard")
            .field("key", &self.key)
            .finish()
    }
}
