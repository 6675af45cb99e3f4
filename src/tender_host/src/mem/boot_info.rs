use std::ffi::CString;
use std::mem::offset_of;

use tender_common::mem::BootInfo;
use tracing::{debug, instrument, Span};

use super::guest_mem::GuestMemory;
use super::layout::GuestLayout;
use super::ptr_offset::Offset;
use crate::error::TenderError::{CmdlineTooLong, KernelEndOutOfRange};
use crate::{log_then_return, Result};

/// Writes the boot info record and the command line into guest memory.
///
/// The record is the only thing the guest learns about its environment at
/// startup: where its command line is, how much memory it owns and where its
/// image ends. It is written exactly once, before launch.
pub struct BootInfoBuilder;

impl BootInfoBuilder {
    /// Zero the boot info region, then fill in `mem_size`, `kernel_end` and
    /// a pointer to the command line buffer.
    ///
    /// Returns the guest offset of the command line buffer, which is where
    /// [`BootInfoBuilder::write_cmdline`] stores the text.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn build(memory: &mut GuestMemory, kernel_end: Offset) -> Result<Offset> {
        let mem_size = memory.mem_size();
        if kernel_end < GuestLayout::kernel_offset() || kernel_end > mem_size {
            log_then_return!(KernelEndOutOfRange(u64::from(kernel_end), mem_size));
        }

        let base = GuestLayout::boot_info_offset();
        memory.zero(base, GuestLayout::boot_info_size())?;

        let cmdline = GuestLayout::cmdline_offset();
        let cmdline_ptr = memory.host_address(cmdline)? as u64;
        memory.write_u64(base + offset_of!(BootInfo, cmdline), cmdline_ptr)?;
        memory.write_u64(base + offset_of!(BootInfo, mem_size), mem_size as u64)?;
        memory.write_u64(
            base + offset_of!(BootInfo, kernel_end),
            u64::from(kernel_end),
        )?;

        debug!(
            "boot info at {}: mem_size={:#x} kernel_end={} cmdline={}",
            base, mem_size, kernel_end, cmdline
        );
        Ok(cmdline)
    }

    /// Copy `cmdline` plus its NUL terminator into the command line buffer.
    ///
    /// Fails without touching guest memory if the text contains a NUL byte
    /// or does not fit between the buffer start and the kernel load address.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn write_cmdline(memory: &mut GuestMemory, cmdline: &str) -> Result<()> {
        let cstr = CString::new(cmdline)?;
        let bytes = cstr.as_bytes_with_nul();
        let capacity = GuestLayout::cmdline_capacity();
        if bytes.len() as u64 > capacity {
            log_then_return!(CmdlineTooLong(bytes.len(), capacity));
        }
        memory.copy_from_slice(bytes, GuestLayout::cmdline_offset())
    }

    /// Read the boot info record back out of guest memory
    pub fn read(memory: &GuestMemory) -> Result<BootInfo> {
        let base = GuestLayout::boot_info_offset();
        Ok(BootInfo {
            cmdline: memory.read_u64(base + offset_of!(BootInfo, cmdline))?,
            mem_size: memory.read_u64(base + offset_of!(BootInfo, mem_size))?,
            kernel_end: memory.read_u64(base + offset_of!(BootInfo, kernel_end))?,
        })
    }
}
