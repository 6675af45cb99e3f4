use bitflags::bitflags;
use libc::{c_int, PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};

bitflags! {
    /// flags representing memory permission for a range of guest memory
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MemoryRegionFlags: u32 {
        /// no permissions
        const NONE = 0;
        /// allow guest to read
        const READ = 1;
        /// allow guest to write
        const WRITE = 2;
        /// allow guest to execute
        const EXECUTE = 4;
    }
}

impl MemoryRegionFlags {
    /// The `PROT_*` bits `mmap`/`mprotect` expect for these flags
    pub fn to_prot(self) -> c_int {
        let mut prot = PROT_NONE;
        if self.contains(MemoryRegionFlags::READ) {
            prot |= PROT_READ;
        }
        if self.contains(MemoryRegionFlags::WRITE) {
            prot |= PROT_WRITE;
        }
        if self.contains(MemoryRegionFlags::EXECUTE) {
            prot |= PROT_EXEC;
        }
        prot
    }
}

impl std::fmt::Display for MemoryRegionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "NONE")
        } else {
            let mut first = true;
            if self.contains(MemoryRegionFlags::READ) {
                write!(f, "READ")?;
                first = false;
            }
            if self.contains(MemoryRegionFlags::WRITE) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "WRITE")?;
                first = false;
            }
            if self.contains(MemoryRegionFlags::EXECUTE) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "EXECUTE")?;
            }
            Ok(())
        }
    }
}
