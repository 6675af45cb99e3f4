//! How a guest reaches its devices.
//!
//! There is no trap into the tender once the guest runs: guest and tender
//! share one thread and one address space, and the only way out is a
//! syscall the sandbox policy allows. Each module that owns a host
//! descriptor allows a few syscalls on that descriptor only, and publishes a
//! [`DeviceRecord`] in the [`HypercallPage`] at
//! [`crate::mem::HYPERCALL_ADDRESS`] so the guest knows which descriptor to
//! use. A request is a plain syscall:
//!
//! | request      | syscall                                                |
//! |--------------|--------------------------------------------------------|
//! | console      | `write(1, buf, len)`                                   |
//! | walltime     | `clock_gettime(CLOCK_REALTIME, ts)`                    |
//! | monotonic    | `clock_gettime(CLOCK_MONOTONIC, ts)`                   |
//! | poll         | `ppoll(fds, n, timeout, NULL)` on net `hostfd`s        |
//! | block read   | `pread64(hostfd, buf, BLOCK_SECTOR_SIZE, offset)`      |
//! | block write  | `pwrite64(hostfd, buf, BLOCK_SECTOR_SIZE, offset)`     |
//! | net read     | `read(hostfd, buf, len)`, one frame, `EAGAIN` if none  |
//! | net write    | `write(hostfd, buf, len)`, one frame of at most `mtu + 14` bytes |
//! | halt         | `exit_group(status)`                                   |
//!
//! Block offsets must be sector aligned and leave room for a whole sector
//! before `capacity`. Anything else, including the right syscall on the
//! wrong descriptor, kills the guest.

use strum::{FromRepr, IntoStaticStr};

use crate::mem::HYPERCALL_PAGE_SIZE;

/// Every block request transfers exactly one sector.
pub const BLOCK_SECTOR_SIZE: u64 = 512;

/// What a [`DeviceRecord`] describes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Net = 1,
    Block = 2,
}

impl DeviceKind {
    /// The snake_case name used in diagnostics
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// One device the guest may use. Fields that don't apply to the device's
/// kind are zero.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecord {
    /// a [`DeviceKind`] discriminant
    pub kind: u32,
    /// the host descriptor the device's syscalls must name
    pub hostfd: i32,
    /// block: size in bytes, a multiple of [`BLOCK_SECTOR_SIZE`]
    pub capacity: u64,
    /// net: largest payload of a frame, excluding the ethernet header
    pub mtu: u64,
    /// net: MAC address in the low six bytes, network byte order
    pub mac: [u8; 8],
}

/// Layout of the hypercall page: a count followed by that many records.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct HypercallPage {
    pub count: u64,
    pub devices: [DeviceRecord; MAX_DEVICES],
}

/// How many devices fit in the hypercall page.
pub const MAX_DEVICES: usize =
    (HYPERCALL_PAGE_SIZE as usize - core::mem::size_of::<u64>())
        / core::mem::size_of::<DeviceRecord>();

const _: () = assert!(core::mem::size_of::<HypercallPage>() as u64 <= HYPERCALL_PAGE_SIZE);
