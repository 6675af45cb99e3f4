use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tender_common::hypercall::{DeviceKind, DeviceRecord, BLOCK_SECTOR_SIZE};
use tracing::{debug, instrument, Span};

use super::Module;
use crate::error::TenderError::{BlockDeviceEmpty, BlockSizeMisaligned};
use crate::seccomp::{ArgCondition, ArgLen, CmpOp, SandboxPolicy};
use crate::{log_then_return, Result};

/// A block device backed by a host file, opened read-write.
///
/// The file size must be a non-zero whole number of sectors. The guest
/// reaches the file through `pread64` and `pwrite64` on its descriptor, one
/// sector-aligned sector at a time, and never past the end of the device.
#[derive(Debug)]
pub struct BlockModule {
    path: PathBuf,
    file: File,
    capacity: u64,
}

impl BlockModule {
    /// Open the backing file at `path`
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let capacity = file.metadata()?.len();
        if capacity == 0 {
            log_then_return!(BlockDeviceEmpty(path.display().to_string()));
        }
        if capacity % BLOCK_SECTOR_SIZE != 0 {
            log_then_return!(BlockSizeMisaligned(capacity, BLOCK_SECTOR_SIZE));
        }
        debug!("block device {}: {} bytes", path.display(), capacity);
        Ok(Self {
            path,
            file,
            capacity,
        })
    }

    /// Size of the device in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> u64 {
        self.file.as_raw_fd() as u64
    }

    // pread64/pwrite64(fd, buf, count, offset)
    fn io_conditions(&self) -> Vec<ArgCondition> {
        vec![
            ArgCondition::eq(0, self.fd()),
            ArgCondition::new(2, ArgLen::Qword, CmpOp::Eq, BLOCK_SECTOR_SIZE),
            ArgCondition::new(3, ArgLen::Qword, CmpOp::MaskedEq(BLOCK_SECTOR_SIZE - 1), 0),
            ArgCondition::new(
                3,
                ArgLen::Qword,
                CmpOp::Le,
                self.capacity - BLOCK_SECTOR_SIZE,
            ),
        ]
    }
}

impl Module for BlockModule {
    fn name(&self) -> &'static str {
        "block"
    }

    fn setup(&mut self, policy: &mut SandboxPolicy) -> Result<()> {
        policy.add_rule(libc::SYS_pread64, self.io_conditions());
        policy.add_rule(libc::SYS_pwrite64, self.io_conditions());
        Ok(())
    }

    fn device(&self) -> Option<DeviceRecord> {
        Some(DeviceRecord {
            kind: DeviceKind::Block as u32,
            hostfd: self.file.as_raw_fd(),
            capacity: self.capacity,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;

    use tempfile::NamedTempFile;
    use tender_common::hypercall::{DeviceKind, BLOCK_SECTOR_SIZE};

    use super::BlockModule;
    use crate::error::TenderError;
    use crate::modules::Module;
    use crate::seccomp::SandboxPolicy;

    fn backing_file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0; len]).unwrap();
        file
    }

    #[test]
    fn rejects_partial_sectors() {
        let file = backing_file(1000);
        let err = BlockModule::open(file.path()).unwrap_err();
        assert!(matches!(err, TenderError::BlockSizeMisaligned(1000, 512)));
    }

    #[test]
    fn rejects_empty_files() {
        let file = backing_file(0);
        let err = BlockModule::open(file.path()).unwrap_err();
        assert!(matches!(err, TenderError::BlockDeviceEmpty(_)));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BlockModule::open(dir.path().join("nope.img")).unwrap_err();
        assert!(matches!(err, TenderError::IOError(_)));
    }

    #[test]
    fn rules_are_bound_to_the_device_fd() {
        let file = backing_file(4096);
        let mut module = BlockModule::open(file.path()).unwrap();
        assert_eq!(module.capacity(), 4096);
        assert_eq!(module.path(), file.path());
        let mut policy = SandboxPolicy::default();
        module.setup(&mut policy).unwrap();

        let fd = module.file.as_raw_fd() as u64;
        let io = |fd: u64, len: u64, offset: u64| [fd, 0, len, offset, 0, 0];
        for nr in [libc::SYS_pread64, libc::SYS_pwrite64] {
            assert!(policy.permits(nr, &io(fd, 512, 0)));
            assert!(policy.permits(nr, &io(fd, 512, 4096 - 512)));
            // another descriptor
            assert!(!policy.permits(nr, &io(fd + 1, 512, 0)));
            // partial or multiple sectors
            assert!(!policy.permits(nr, &io(fd, 100, 0)));
            assert!(!policy.permits(nr, &io(fd, 1024, 0)));
            // unaligned offset
            assert!(!policy.permits(nr, &io(fd, 512, 100)));
            // past the end
            assert!(!policy.permits(nr, &io(fd, 512, 4096)));
        }
        assert!(!policy.permits(libc::SYS_read, &io(fd, 512, 0)));
    }

    #[test]
    fn publishes_its_descriptor() {
        let file = backing_file(8 * BLOCK_SECTOR_SIZE as usize);
        let module = BlockModule::open(file.path()).unwrap();
        let device = module.device().unwrap();
        assert_eq!(device.kind, DeviceKind::Block as u32);
        assert_eq!(device.hostfd, module.file.as_raw_fd());
        assert_eq!(device.capacity, 4096);
        assert_eq!((device.mtu, device.mac), (0, [0; 8]));
    }
}
