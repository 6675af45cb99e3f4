use std::cmp::max;

use tender_common::mem::{
    BOOT_INFO_BASE, BOOT_INFO_SIZE, CMDLINE_BASE, CMDLINE_SIZE, HOST_MEM_BASE, HYPERCALL_ADDRESS,
    HYPERCALL_PAGE_SIZE, KERNEL_BASE, MIN_MEM_SIZE, STACK_RESERVE,
};
use tracing::{instrument, Span};

use super::ptr_offset::Offset;
use crate::error::TenderError::{MemoryRequestTooSmall, MemorySizeNotPageAligned};
use crate::{log_then_return, Result};

// +-------------------------------------------+ mem_size
// |    Guest Stack (grows down from the top)  |
// +-------------------------------------------+
// |                    ⋮                      |
// |     Free memory (guest allocator)         |
// +-------------------------------------------+ kernel_end
// |            Unikernel image                |
// +-------------------------------------------+ KERNEL_BASE (0x100000)
// |         Command line (NUL terminated)     |
// +-------------------------------------------+ CMDLINE_BASE
// |              Boot info record             |
// +-------------------------------------------+ BOOT_INFO_BASE
// |     Hypercall page (device table)         |
// +-------------------------------------------+ HOST_MEM_BASE
// |                    ⋮                      |
// |                 Unmapped                  |
// |                    ⋮                      |
// +-------------------------------------------+ 0x0

/// The placement of everything the tender writes into guest memory, for a
/// given guest memory size.
///
/// A `GuestLayout` can only be constructed for sizes that fit the reserved
/// regions plus at least one page, and that are a multiple of the host page
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestLayout {
    mem_size: usize,
}

impl GuestLayout {
    /// Validate `mem_size` and return the layout for it
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn new(mem_size: usize) -> Result<Self> {
        let min = Self::min_mem_size();
        if mem_size < min {
            log_then_return!(MemoryRequestTooSmall(mem_size, min));
        }
        let page_size = page_size::get();
        if mem_size % page_size != 0 {
            log_then_return!(MemorySizeNotPageAligned(mem_size, page_size));
        }
        Ok(Self { mem_size })
    }

    /// The smallest guest memory size this host accepts
    pub fn min_mem_size() -> usize {
        max(MIN_MEM_SIZE as usize, KERNEL_BASE as usize + page_size::get())
    }

    /// Total guest memory size in bytes, counted from the guest origin
    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    /// The host address the guest mapping must start at. This is also the
    /// lowest guest offset that is backed by memory.
    pub fn host_base() -> usize {
        HOST_MEM_BASE as usize
    }

    /// The number of bytes actually mapped: everything from `host_base()` to
    /// the top of guest memory
    pub fn mapped_size(&self) -> usize {
        self.mem_size - Self::host_base()
    }

    /// Guest offset of the hypercall page, where the device table lives
    pub fn hypercall_page_offset() -> Offset {
        Offset::from(HYPERCALL_ADDRESS)
    }

    /// Bytes reserved for the hypercall page
    pub fn hypercall_page_size() -> usize {
        HYPERCALL_PAGE_SIZE as usize
    }

    /// Guest offset of the boot info record
    pub fn boot_info_offset() -> Offset {
        Offset::from(BOOT_INFO_BASE)
    }

    /// Bytes reserved for the boot info record
    pub fn boot_info_size() -> usize {
        BOOT_INFO_SIZE as usize
    }

    /// Guest offset of the command line buffer
    pub fn cmdline_offset() -> Offset {
        Offset::from(CMDLINE_BASE)
    }

    /// Bytes available for the command line, including its NUL terminator
    pub fn cmdline_capacity() -> u64 {
        CMDLINE_SIZE
    }

    /// Guest offset where loaders place the unikernel image
    pub fn kernel_offset() -> Offset {
        Offset::from(KERNEL_BASE)
    }

    /// The initial guest stack pointer: the top of guest memory minus the
    /// architecture's alignment reserve
    pub fn stack_top(&self) -> Offset {
        Offset::from(self.mem_size as u64 - STACK_RESERVE)
    }
}

#[cfg(test)]
mod tests {
    use tender_common::mem::{HOST_MEM_BASE, KERNEL_BASE};

    use super::GuestLayout;
    use crate::error::TenderError;

    #[test]
    fn rejects_too_small() {
        let err = GuestLayout::new(KERNEL_BASE as usize).unwrap_err();
        assert!(matches!(err, TenderError::MemoryRequestTooSmall(..)));
        assert!(GuestLayout::new(0).is_err());
    }

    #[test]
    fn rejects_unaligned() {
        let size = GuestLayout::min_mem_size() + 1;
        let err = GuestLayout::new(size).unwrap_err();
        assert!(matches!(err, TenderError::MemorySizeNotPageAligned(..)));
    }

    #[test]
    fn minimum_is_accepted() {
        let layout = GuestLayout::new(GuestLayout::min_mem_size()).unwrap();
        assert_eq!(
            layout.mapped_size(),
            GuestLayout::min_mem_size() - HOST_MEM_BASE as usize
        );
    }

    #[test]
    fn reserved_regions_are_ordered() {
        assert_eq!(
            GuestLayout::hypercall_page_offset(),
            GuestLayout::host_base()
        );
        assert_eq!(
            GuestLayout::hypercall_page_offset() + GuestLayout::hypercall_page_size(),
            GuestLayout::boot_info_offset()
        );
        assert_eq!(
            GuestLayout::boot_info_offset() + GuestLayout::boot_info_size(),
            GuestLayout::cmdline_offset()
        );
        assert_eq!(
            GuestLayout::cmdline_offset() + GuestLayout::cmdline_capacity(),
            GuestLayout::kernel_offset()
        );
    }

    #[test]
    fn stack_top() {
        let layout = GuestLayout::new(0x200000).unwrap();
        #[cfg(target_arch = "x86_64")]
        assert_eq!(layout.stack_top(), 0x200000_u64 - 8);
        #[cfg(target_arch = "aarch64")]
        assert_eq!(layout.stack_top(), 0x200000_u64 - 16);
        assert!(layout.stack_top().is_aligned(8));
    }
}
