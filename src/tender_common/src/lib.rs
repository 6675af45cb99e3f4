#![no_std]

/// The device table the tender publishes in the hypercall page, and the
/// syscalls through which a guest drives each kind of device.
pub mod hypercall;
/// Guest memory layout and the boot info record.
pub mod mem;
