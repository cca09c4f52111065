use crate::{clock::ClockState, klock::CpuLockCell, swi::SwiState, utils::Init, KernelCfg};

/// Global kernel state. Instantiated by [`build!`](crate::build) as a
/// `static` and accessed through [`KernelCfg::state`].
pub struct State<Traits: KernelCfg> {
    pub(super) swi: CpuLockCell<Traits, SwiState<Traits>>,
    pub(super) clock: CpuLockCell<Traits, ClockState<Traits>>,
}

impl<Traits: KernelCfg> Init for State<Traits> {
    const INIT: Self = Self {
        swi: Init::INIT,
        clock: Init::INIT,
    };
}
