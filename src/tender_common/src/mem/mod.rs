//! The guest address space seen by both sides. Offsets are relative to the
//! guest origin (0); the tender maps the region starting at
//! [`HOST_MEM_BASE`] because the host kernel refuses mappings near address 0
//! (`vm.mmap_min_addr`).
//!
//! ```text
//!                  HOST_MEM_BASE
//!  |--unmapped--|--|--|-------|--unikernel....
//!  0            HOST_MEM_BASE (hypercall/map address)
//!                  BOOT_INFO_BASE
//!                     CMDLINE_BASE
//!                             KERNEL_BASE
//! ```

pub const PAGE_SIZE: u64 = 1 << 12;

#[cfg(target_arch = "x86_64")]
mod arch {
    pub const HOST_MEM_BASE: u64 = 0x10000;
    pub const BOOT_INFO_BASE: u64 = 0x10100;
    pub const CMDLINE_BASE: u64 = 0x10200;
    /// The System V ABI expects `rsp + 8` to be 16-byte aligned on entry, as
    /// if a return address had just been pushed.
    pub const STACK_RESERVE: u64 = 0x8;
}

#[cfg(target_arch = "aarch64")]
mod arch {
    pub const HOST_MEM_BASE: u64 = 0x40000;
    pub const BOOT_INFO_BASE: u64 = 0x40100;
    pub const CMDLINE_BASE: u64 = 0x40200;
    /// `sp` must stay 16-byte aligned at all times.
    pub const STACK_RESERVE: u64 = 16;
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("tender only supports x86_64 and aarch64 hosts");

pub use arch::{BOOT_INFO_BASE, CMDLINE_BASE, HOST_MEM_BASE, STACK_RESERVE};

/// Guest offset of the hypercall page; shares its address with the start of
/// the host mapping. It holds the device table, see
/// [`crate::hypercall::HypercallPage`].
pub const HYPERCALL_ADDRESS: u64 = HOST_MEM_BASE;
/// Bytes reserved for the hypercall page, up to the boot info record.
pub const HYPERCALL_PAGE_SIZE: u64 = BOOT_INFO_BASE - HYPERCALL_ADDRESS;
/// Where loaders place the first byte of the unikernel image.
pub const KERNEL_BASE: u64 = 0x100000;
/// Bytes reserved for the boot info record, zero-padded.
pub const BOOT_INFO_SIZE: u64 = CMDLINE_BASE - BOOT_INFO_BASE;
/// Bytes available to the command line, including its NUL terminator.
pub const CMDLINE_SIZE: u64 = KERNEL_BASE - CMDLINE_BASE;
/// The smallest guest that can hold the reserved regions and one page of
/// kernel.
pub const MIN_MEM_SIZE: u64 = KERNEL_BASE + PAGE_SIZE;

/// The record the guest finds in its first argument register on entry.
///
/// `cmdline` holds a guest address (which is also the host address, since the
/// guest origin is host address 0 once the tender has subtracted its mapping
/// base).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootInfo {
    pub cmdline: u64,
    pub mem_size: u64,
    pub kernel_end: u64,
}

const _: () = assert!(core::mem::size_of::<BootInfo>() as u64 <= BOOT_INFO_SIZE);
