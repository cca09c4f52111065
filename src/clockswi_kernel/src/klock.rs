//! Kernel state locking mechanism
use core::{fmt, marker::PhantomData, ops};
use tokenlock::UnsyncTokenLock;

use crate::{utils::Init, PortThreading};

/// RAII guard for a CPU Lock state, i.e., a state where all kernel-managed
/// interrupts are disabled.
///
/// Guards nest: a guard created while CPU Lock is already active does nothing
/// on drop, leaving the outer owner in control.
///
/// ```rust,ignore
/// let _guard = InterruptGuard::<SystemTraits>::new();
/// // Interrupts are disabled until `_guard` goes out of scope
/// ```
#[must_use = "CPU Lock is released as soon as the guard is dropped"]
pub struct InterruptGuard<Traits: PortThreading> {
    was_active: bool,
    // `!Send` and `!Sync`
    _phantom: PhantomData<(Traits, *const ())>,
}

impl<Traits: PortThreading> InterruptGuard<Traits> {
    /// Enter a CPU Lock state unless it's already active.
    #[inline]
    pub fn new() -> Self {
        let was_active = Traits::is_cpu_lock_active();
        if !was_active {
            // Safety: CPU Lock inactive
            unsafe { Traits::enter_cpu_lock() };
        }
        Self {
            was_active,
            _phantom: PhantomData,
        }
    }

    /// Return `true` if CPU Lock was already active when this guard was
    /// created.
    #[inline]
    pub fn was_active(&self) -> bool {
        self.was_active
    }
}

impl<Traits: PortThreading> Default for InterruptGuard<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: PortThreading> Drop for InterruptGuard<Traits> {
    #[inline]
    fn drop(&mut self) {
        if !self.was_active {
            // Safety: CPU Lock is active, and we are the one who activated it
            unsafe { Traits::leave_cpu_lock() };
        }
    }
}

impl<Traits: PortThreading> fmt::Debug for InterruptGuard<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InterruptGuard")
            .field("was_active", &self.was_active)
            .finish()
    }
}

pub(super) struct CpuLockTag<Traits>(Traits);

/// The key that "unlocks" [`CpuLockCell`].
pub(super) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`CpuLockToken`].
pub(super) type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`lock_cpu`]).
pub(super) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T: Init> Init for CpuLockCell<Traits, T> {
    const INIT: Self = Self(Init::INIT);
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits: PortThreading, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if Traits::is_cpu_lock_active() {
            // The owner of CPU Lock might be holding a token
            f.write_str("CpuLockCell(< locked >)")
        } else {
            let lock = lock_cpu::<Traits>();
            f.write_str("CpuLockCell(")?;
            self.0.read(&*lock).fmt(f)?;
            f.write_str(")")
        }
    }
}

/// Enter a CPU Lock state (or stay in it if it's already active) and get an
/// RAII guard carrying the token for [`CpuLockCell`].
///
/// The kernel never holds two `CpuLockGuard`s at once and never calls
/// application code while holding one. This is what makes minting a token
/// here sound even when CPU Lock was already active: an outer owner of CPU
/// Lock can only be application code holding an [`InterruptGuard`], which
/// carries no token.
pub(super) fn lock_cpu<Traits: PortThreading>() -> CpuLockGuard<Traits> {
    let irq = InterruptGuard::new();
    CpuLockGuard {
        // Safety: There are no other instances of `CpuLockToken`; see above
        token: unsafe { CpuLockToken::new_unchecked() },
        irq,
    }
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockToken`] can be borrowed from this type.
pub(super) struct CpuLockGuard<Traits: PortThreading> {
    // Dropped before `irq` so that the token is gone by the time an interrupt
    // pended during the critical section is taken
    token: CpuLockToken<Traits>,
    irq: InterruptGuard<Traits>,
}

impl<Traits: PortThreading> CpuLockGuard<Traits> {
    /// Return `true` if CPU Lock had already been active before this guard
    /// was acquired, i.e., the caller is running inside an
    /// [`InterruptGuard`].
    pub(super) fn was_active(&self) -> bool {
        self.irq.was_active()
    }
}

impl<Traits: PortThreading> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortThreading> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}
