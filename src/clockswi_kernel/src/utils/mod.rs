//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because it's needed by macros.
mod init;
pub(crate) mod list;
mod pool;
mod prio_bitmap;
mod veclike;
pub use self::{init::*, pool::*, prio_bitmap::*, veclike::*};
