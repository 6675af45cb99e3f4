use cfg_if::cfg_if;
use tracing::{instrument, Span};

use crate::error::TenderError::BoundsCheckFailed;
use crate::mem::guest_mem::GuestMemory;
use crate::mem::layout::GuestLayout;
use crate::mem::ptr_offset::Offset;
use crate::{log_then_return, Result};

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        use self::x86_64 as arch;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        use self::aarch64 as arch;
    }
}

/// Everything the trampoline needs to start the guest, as host addresses.
///
/// Deliberately not `Clone`: a context is consumed by [`LaunchContext::launch`].
#[derive(Debug, PartialEq, Eq)]
pub struct LaunchContext {
    stack_top: usize,
    entry: usize,
    boot_info: usize,
}

impl LaunchContext {
    /// Resolve the stack top, `entry` and the boot info record in `memory`.
    ///
    /// `entry` must lie inside the mapped part of guest memory.
    #[instrument(err(Debug), skip(memory), parent = Span::current(), level = "Trace")]
    pub fn new(memory: &GuestMemory, entry: Offset) -> Result<Self> {
        if entry < GuestLayout::host_base() || entry >= memory.mem_size() {
            log_then_return!(BoundsCheckFailed(u64::from(entry), memory.mem_size()));
        }
        Ok(Self {
            stack_top: memory.host_address(memory.layout().stack_top())?,
            entry: memory.host_address(entry)?,
            boot_info: memory.host_address(GuestLayout::boot_info_offset())?,
        })
    }

    /// The initial stack pointer
    pub fn stack_top(&self) -> usize {
        self.stack_top
    }

    /// The address control is transferred to
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// The address passed to the guest in its first argument register
    pub fn boot_info(&self) -> usize {
        self.boot_info
    }

    /// Switch to the guest stack and jump to the guest entry point with the
    /// boot info address as the first argument. Never returns.
    ///
    /// # Safety
    ///
    /// The guest memory this context was built from must stay mapped, and
    /// must hold guest code at the entry point, for the rest of the process.
    /// Nothing on the current stack is ever used again.
    pub unsafe fn launch(self) -> ! {
        unsafe { arch::launch(self.stack_top, self.entry, self.boot_info) }
    }
}
