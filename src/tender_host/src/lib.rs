//! This crate contains a tender (monitor) that runs a unikernel guest directly
//! inside a Linux process, confined by a seccomp allow-list that the guest
//! cannot widen.

#[deny(dead_code, missing_docs, unused_mut)]
/// Dealing with errors, including the fatal boot-time errors
pub mod error;
/// The architecture-specific control transfer into the guest.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod launch;
/// Functionality to establish and address the guest's memory.
///
/// The guest is addressed from offset 0, but the region is mapped at
/// `HOST_MEM_BASE` because low host addresses cannot be mapped:
///
/// 0x0            unmapped
/// HOST_MEM_BASE  hypercall page: the device table
/// BOOT_INFO_BASE boot info record
/// CMDLINE_BASE   NUL-terminated command line
/// 0x100000       the unikernel image, then free memory up to the stack at
///                the top of guest memory
#[deny(dead_code, missing_docs, unused_mut)]
pub mod mem;
/// Capability modules (`core`, `net`, `block`) and the registry that runs
/// their setup hooks.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod modules;
/// The deny-by-default syscall policy
#[deny(dead_code, missing_docs, unused_mut)]
pub mod seccomp;
/// The SIGSYS reporter used when debugging a guest's syscall needs
pub(crate) mod signal_handlers;
/// The tender lifecycle: allocation, boot info, module setup, launch.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod tender;
/// `trait`s and other functionality for dealing with defining tender
/// states and moving between them
pub mod tender_state;
/// Utilities for testing
#[deny(missing_docs, unused_mut)]
#[cfg(test)]
pub(crate) mod testing;

/// The re-export for the `TenderError` type
pub use error::TenderError;
/// The re-export for the `LaunchContext` type
pub use launch::LaunchContext;
/// The re-export for the `GuestMemory` type
pub use mem::guest_mem::GuestMemory;
/// The re-export for the `Offset` type
pub use mem::ptr_offset::Offset;
/// The re-export for the `Module` trait
pub use modules::Module;
/// The re-export for the `ModuleRegistry` type
pub use modules::ModuleRegistry;
/// The re-export for the `SandboxPolicy` type
pub use seccomp::policy::SandboxPolicy;
/// The re-export for the `BootParams` type
pub use tender::BootParams;
/// The re-export for the `ReadyTender` type
pub use tender::ReadyTender;
/// The re-export for the `TenderConfiguration` type
pub use tender::TenderConfiguration;
/// The re-export for the `UninitializedTender` type
pub use tender::UninitializedTender;

/// The universal `Result` type used throughout the tender
pub type Result<T> = core::result::Result<T, error::TenderError>;

/// Logs an error then returns with it, more or less equivalent to the bail! macro in anyhow
/// but for TenderError instead of anyhow::Error
#[macro_export]
macro_rules! log_then_return {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        let __err = $crate::TenderError::Error(__err_msg);
        log::error!("{}", __err);
        return Err(__err);
    }};
    ($err:expr $(,)?) => {
        log::error!("{}", $err);
        return Err($err);
    };
    ($err:stmt $(,)?) => {
        log::error!("{}", $err);
        return Err($err);
    };
    ($fmtstr:expr, $($arg:tt)*) => {
           let __err_msg = std::format!($fmtstr, $($arg)*);
           let __err = $crate::error::TenderError::Error(__err_msg);
           log::error!("{}", __err);
           return Err(__err);
    };
}
