/// Writing the boot info record and command line the guest reads at startup
pub mod boot_info;
/// The fixed-base host mapping that backs the guest address space
pub mod guest_mem;
/// Publishing the device table the guest reads from the hypercall page
pub mod hypercall_page;
/// Where everything lives in guest memory for a given memory size
pub mod layout;
/// Permission flags for ranges of guest memory
pub mod memory_region;
/// A wrapper around unsigned guest offsets
pub mod ptr_offset;
