use std::ffi::c_void;
use std::io::Error;

use byteorder::{ByteOrder, LittleEndian};
use libc::{
    mmap, mprotect, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_FIXED_NOREPLACE, MAP_PRIVATE,
    PROT_READ, PROT_WRITE,
};
use tracing::{debug, instrument, Span};

use super::layout::GuestLayout;
use super::memory_region::MemoryRegionFlags;
use super::ptr_offset::Offset;
use crate::error::TenderError::{
    BoundsCheckFailed, MappedAtWrongAddress, MmapFailed, MprotectFailed, RangeNotPageAligned,
};
use crate::{log_then_return, Result};

macro_rules! bounds_check {
    ($offset:expr, $size:expr) => {
        if $offset > $size {
            log_then_return!(BoundsCheckFailed(u64::from($offset), $size));
        }
    };
}

/// The guest's entire address space, owned exclusively by the tender.
///
/// Guest memory is addressed from offset 0, however it cannot actually be
/// mapped at host address 0 due to restrictions on mapping low memory
/// present in modern Linux kernels (the `vm.mmap_min_addr` sysctl).
/// Therefore the region is mapped at [`GuestLayout::host_base`] and only
/// covers `[host_base, mem_size)`; every access goes through an `Offset`
/// that is translated by subtracting the base again, so that offset 0 always
/// means "start of guest memory".
///
/// Offsets below the base are part of the guest address space but are not
/// backed by memory: reading or writing them fails.
#[derive(Debug)]
pub struct GuestMemory {
    mapped: *mut u8,
    layout: GuestLayout,
}

impl GuestMemory {
    /// Map the memory described by `layout` at its fixed host base.
    ///
    /// The mapping is private, anonymous and zero-filled. It is an error for
    /// the host kernel to place it anywhere other than exactly at the base,
    /// since every guest-relative address downstream assumes that base.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn new(layout: GuestLayout) -> Result<Self> {
        let base = GuestLayout::host_base();
        let size = layout.mapped_size();
        // MAP_FIXED_NOREPLACE fails rather than clobbering an existing
        // mapping; kernels older than 4.17 treat it as a hint, which the
        // address check below catches.
        let addr = unsafe {
            mmap(
                base as *mut c_void,
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };
        if addr == MAP_FAILED {
            log_then_return!(MmapFailed(Error::last_os_error().raw_os_error()));
        }
        if addr as usize != base {
            unsafe {
                munmap(addr, size);
            }
            log_then_return!(MappedAtWrongAddress {
                expected: base,
                actual: addr as usize,
            });
        }
        debug!(
            "mapped {:#x} bytes of guest memory at {:#x}",
            size, addr as usize
        );

        Ok(Self {
            mapped: addr as *mut u8,
            layout,
        })
    }

    /// The layout this memory was created for
    pub fn layout(&self) -> &GuestLayout {
        &self.layout
    }

    /// Total guest memory size, counted from the guest origin.
    pub fn mem_size(&self) -> usize {
        self.layout.mem_size()
    }

    /// Translate a guest offset to the host address the guest will see it at.
    ///
    /// `host_address(o) = mapped_base + o - host_base`. The result for
    /// offsets below the host base is an address in the unmapped hole; it is
    /// still meaningful as a pointer value (offset 0 is the guest origin) but
    /// must not be dereferenced.
    pub fn host_address(&self, offset: Offset) -> Result<usize> {
        bounds_check!(offset, self.mem_size());
        let offset = usize::try_from(offset)?;
        Ok(self.mapped as usize - GuestLayout::host_base() + offset)
    }

    /// Return a host pointer to `len` accessible bytes at `offset`, checking
    /// that the whole range is backed by the mapping.
    fn host_ptr(&self, offset: Offset, len: usize) -> Result<*mut u8> {
        bounds_check!(offset, self.mem_size());
        bounds_check!(offset.checked_add(len as u64)?, self.mem_size());
        let base = GuestLayout::host_base();
        if offset < base {
            log_then_return!(BoundsCheckFailed(u64::from(offset), self.mem_size()));
        }
        let idx = usize::try_from(offset)? - base;
        // safety: `idx + len` lies inside the mapping as checked above
        Ok(unsafe { self.mapped.add(idx) })
    }

    /// Borrow `len` bytes of guest memory at `offset`
    pub fn as_slice(&self, offset: Offset, len: usize) -> Result<&[u8]> {
        let ptr = self.host_ptr(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Mutably borrow `len` bytes of guest memory at `offset`
    pub fn as_mut_slice(&mut self, offset: Offset, len: usize) -> Result<&mut [u8]> {
        let ptr = self.host_ptr(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// If all memory locations within the range
    /// `[offset, offset + from_bytes.len()]` are valid, copy all
    /// bytes from `from_bytes` in order to `self` and return `Ok`.
    /// Otherwise, return `Err`.
    pub fn copy_from_slice(&mut self, from_bytes: &[u8], offset: Offset) -> Result<()> {
        self.as_mut_slice(offset, from_bytes.len())?
            .copy_from_slice(from_bytes);
        Ok(())
    }

    /// copy all of `self` in the range `[ offset, offset + slc.len() )`
    /// into `slc` and return `Ok`. If the range is invalid, return `Err`
    pub fn copy_to_slice(&self, slc: &mut [u8], offset: Offset) -> Result<()> {
        slc.copy_from_slice(self.as_slice(offset, slc.len())?);
        Ok(())
    }

    /// Set `len` bytes starting at `offset` to zero
    pub fn zero(&mut self, offset: Offset, len: usize) -> Result<()> {
        self.as_mut_slice(offset, len)?.fill(0);
        Ok(())
    }

    /// Read a little-endian `u64` from guest memory at `offset`
    pub fn read_u64(&self, offset: Offset) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.as_slice(offset, 8)?))
    }

    /// Write `val` as a little-endian `u64` to guest memory at `offset`
    pub fn write_u64(&mut self, offset: Offset, val: u64) -> Result<()> {
        LittleEndian::write_u64(self.as_mut_slice(offset, 8)?, val);
        Ok(())
    }

    /// Read a little-endian `u32` from guest memory at `offset`
    pub fn read_u32(&self, offset: Offset) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.as_slice(offset, 4)?))
    }

    /// Write `val` as a little-endian `u32` to guest memory at `offset`
    pub fn write_u32(&mut self, offset: Offset, val: u32) -> Result<()> {
        LittleEndian::write_u32(self.as_mut_slice(offset, 4)?, val);
        Ok(())
    }

    /// Read a little-endian `i32` from guest memory at `offset`
    pub fn read_i32(&self, offset: Offset) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.as_slice(offset, 4)?))
    }

    /// Write `val` as a little-endian `i32` to guest memory at `offset`
    pub fn write_i32(&mut self, offset: Offset, val: i32) -> Result<()> {
        LittleEndian::write_i32(self.as_mut_slice(offset, 4)?, val);
        Ok(())
    }

    /// Change the host page protection of `[offset, offset + len)`.
    ///
    /// Both bounds must be page aligned and the range must be backed by the
    /// mapping. Image loaders use this to make guest text executable.
    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    pub fn protect(&mut self, offset: Offset, len: usize, flags: MemoryRegionFlags) -> Result<()> {
        let page_size = page_size::get() as u64;
        if !offset.is_aligned(page_size) || len as u64 % page_size != 0 {
            log_then_return!(RangeNotPageAligned(u64::from(offset), len));
        }
        let ptr = self.host_ptr(offset, len)?;
        if unsafe { mprotect(ptr as *mut c_void, len, flags.to_prot()) } != 0 {
            log_then_return!(MprotectFailed(
                len,
                flags,
                Error::last_os_error().raw_os_error()
            ));
        }
        Ok(())
    }
}

impl Drop for GuestMemory {
    fn drop(&mut self) {
        unsafe {
            munmap(self.mapped as *mut c_void, self.layout.mapped_size());
        }
    }
}
