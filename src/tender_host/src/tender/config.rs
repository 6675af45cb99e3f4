/// The complete set of configuration needed to create a tender.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TenderConfiguration {
    /// Total guest memory in bytes, counted from the guest origin. Must be a
    /// multiple of the host page size and large enough to hold the reserved
    /// regions plus one page of kernel.
    pub mem_size: usize,
    /// When set, a syscall the policy doesn't allow prints the syscall
    /// number to stderr and exits with status 1, instead of killing the
    /// process outright. Meant for finding out which rules a guest needs.
    pub report_disallowed_syscalls: bool,
}

impl TenderConfiguration {
    /// The default guest memory size
    pub const DEFAULT_MEM_SIZE: usize = 512 * 1024 * 1024;

    /// Create a new configuration with the given memory size
    pub fn new(mem_size: usize, report_disallowed_syscalls: bool) -> Self {
        Self {
            mem_size,
            report_disallowed_syscalls,
        }
    }
}

impl Default for TenderConfiguration {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MEM_SIZE, false)
    }
}
