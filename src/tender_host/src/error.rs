use std::num::TryFromIntError;

use thiserror::Error;

use crate::mem::memory_region::MemoryRegionFlags;

/// The error type for tender operations
#[derive(Error, Debug)]
pub enum TenderError {
    /// Guest memory access out of bounds
    #[error("Offset: {0:#x} out of bounds, Max is: {1:#x}")]
    BoundsCheckFailed(u64, usize),

    /// Guest offset arithmetic overflowed
    #[error("Couldnt add offset to base address. Offset: {0:#x}, Base Address: {1:#x}")]
    CheckedAddOverflow(u64, u64),

    /// The block device backing file is empty
    #[error("Block device {0} is empty")]
    BlockDeviceEmpty(String),

    /// The block device backing file has a size that is not a multiple of the sector size
    #[error("Block device size {0} is not a multiple of the sector size {1}")]
    BlockSizeMisaligned(u64, u64),

    /// The command line doesn't fit between the command line buffer and the kernel
    #[error("Command line of {0} bytes (plus NUL terminator) exceeds the reserved {1} bytes")]
    CmdlineTooLong(usize, u64),

    /// CString conversion error
    #[error("Error converting CString {0:?}")]
    CStringConversionError(#[from] std::ffi::NulError),

    /// A generic error with a message
    #[error("{0}")]
    Error(String),

    /// Reading Writing or Seeking data failed.
    #[error("Reading Writing or Seeking data failed {0:?}")]
    IOError(#[from] std::io::Error),

    /// Failed to convert to Integer
    #[error("Failed To Convert Size to usize")]
    IntConversionFailure(#[from] TryFromIntError),

    /// The kernel end offset is outside guest memory
    #[error("Kernel end {0:#x} lies outside guest memory of {1:#x} bytes")]
    KernelEndOutOfRange(u64, usize),

    /// The guest memory mapping could not be placed at the fixed host base
    #[error("Guest memory mapped at {actual:#x}, expected {expected:#x}")]
    MappedAtWrongAddress {
        /// the fixed host base
        expected: usize,
        /// where the host kernel placed the mapping
        actual: usize,
    },

    /// The requested guest memory size is too small to hold the reserved regions
    #[error("Memory requested {0:#x} is smaller than the minimum size {1:#x}")]
    MemoryRequestTooSmall(usize, usize),

    /// The requested guest memory size isn't a multiple of the host page size
    #[error("Memory requested {0:#x} is not a multiple of the page size {1:#x}")]
    MemorySizeNotPageAligned(usize, usize),

    /// mmap Failed.
    #[error("mmap failed with os error {0:?}")]
    MmapFailed(Option<i32>),

    /// A module's setup failed; the boot sequence is aborted
    #[error("Module {0} setup failed: {1}")]
    ModuleSetupFailed(&'static str, String),

    /// mprotect Failed.
    #[error("mprotect of {0:#x} bytes as {1} failed with os error {2:?}")]
    MprotectFailed(usize, MemoryRegionFlags, Option<i32>),

    /// A request for a range of guest memory whose bounds aren't page aligned
    #[error("Guest range {0:#x}+{1:#x} is not page aligned")]
    RangeNotPageAligned(u64, usize),

    /// a backend error occurred with seccomp filters
    #[error("Backend Error with Seccomp Filter {0:?}")]
    SeccompFilterBackendError(#[from] seccompiler::BackendError),

    /// an error occurred with seccomp filters
    #[error("Error with Seccomp Filter {0:?}")]
    SeccompFilterError(#[from] seccompiler::Error),

    /// A signal handler couldn't be installed
    #[error("Failed to register signal handler for signal {0}: os error {1:?}")]
    SignalHandlerRegistrationFailed(i32, Option<i32>),

    /// Attaching to a TAP interface failed
    #[error("Could not attach to TAP interface {0}: {1}")]
    TapAttachFailed(String, String),

    /// More modules publish a device than the hypercall page can describe
    #[error("{0} devices do not fit in the hypercall page, which holds at most {1}")]
    TooManyDevices(usize, usize),

    /// A device record whose kind the tender doesn't know
    #[error("Unknown device kind {0}")]
    UnknownDeviceKind(u32),
}

impl From<&str> for TenderError {
    fn from(s: &str) -> Self {
        TenderError::Error(s.to_string())
    }
}

/// Creates a `TenderError::Error` from a string literal or format string
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        $crate::TenderError::Error(__err_msg)
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
           let __err_msg = std::format!($fmtstr, $($arg)*);
           $crate::error::TenderError::Error(__err_msg)
    }};
}
