use std::fmt::Debug;

use tracing::{info, instrument, Span};

use super::config::TenderConfiguration;
use super::ready::ReadyTender;
use crate::launch::LaunchContext;
use crate::mem::boot_info::BootInfoBuilder;
use crate::mem::guest_mem::GuestMemory;
use crate::mem::hypercall_page::HypercallPageBuilder;
use crate::mem::layout::GuestLayout;
use crate::mem::memory_region::MemoryRegionFlags;
use crate::mem::ptr_offset::Offset;
use crate::modules::{CoreModule, Module, ModuleRegistry};
use crate::seccomp::SandboxPolicy;
use crate::tender_state::tender::{EvolvableTender, Tender};
use crate::tender_state::transition::TransitionMetadata;
use crate::Result;

/// What the image loader found out about the guest, plus its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootParams {
    /// Guest offset of the first instruction to run
    pub entry: Offset,
    /// Guest offset of the first byte past the loaded image
    pub kernel_end: Offset,
    /// The guest command line, without NUL terminator
    pub cmdline: String,
}

impl BootParams {
    /// Bundle the loader's results with the command line
    pub fn new(entry: Offset, kernel_end: Offset, cmdline: impl Into<String>) -> Self {
        Self {
            entry,
            kernel_end,
            cmdline: cmdline.into(),
        }
    }
}

impl TransitionMetadata<UninitializedTender, ReadyTender> for BootParams {}

/// A tender whose guest memory is mapped, but which has written nothing to
/// it yet. This is where the image loader puts the guest, and where modules
/// other than `core` are registered.
pub struct UninitializedTender {
    config: TenderConfiguration,
    memory: GuestMemory,
    registry: ModuleRegistry,
}

impl Debug for UninitializedTender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UninitializedTender")
            .field("config", &self.config)
            .field("memory", &self.memory)
            .field("modules", &self.registry.names())
            .finish()
    }
}

impl Tender for UninitializedTender {
    fn memory(&self) -> &GuestMemory {
        &self.memory
    }
}

impl UninitializedTender {
    /// Map guest memory for `config`; the registry starts out with `core`.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn new(config: TenderConfiguration) -> Result<Self> {
        let layout = GuestLayout::new(config.mem_size)?;
        let memory = GuestMemory::new(layout)?;
        Ok(Self {
            config,
            memory,
            registry: ModuleRegistry::new(CoreModule::new()),
        })
    }

    /// The configuration this tender was created with
    pub fn config(&self) -> &TenderConfiguration {
        &self.config
    }

    /// Guest memory, for the image loader
    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.memory
    }

    /// Add `module` after every module registered so far
    pub fn register_module(&mut self, module: Box<dyn Module>) {
        self.registry.register(module);
    }

    /// Names of the registered modules, in setup order
    pub fn module_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    /// Copy a flat binary image to the kernel base and make its pages
    /// read-only and executable. Returns the offset just past the image,
    /// rounded up to a page.
    pub fn load_flat_image(&mut self, image: &[u8]) -> Result<Offset> {
        let base = GuestLayout::kernel_offset();
        self.memory.copy_from_slice(image, base)?;
        let page_size = page_size::get() as u64;
        let end = u64::from(base.checked_add(image.len() as u64)?);
        let end = Offset::from(end.div_ceil(page_size) * page_size);
        let len = usize::try_from(u64::from(end) - u64::from(base))?;
        self.memory
            .protect(base, len, MemoryRegionFlags::READ | MemoryRegionFlags::EXECUTE)?;
        Ok(end)
    }
}

impl EvolvableTender<UninitializedTender, ReadyTender, BootParams> for UninitializedTender {
    /// Write the boot info and command line, run every module's setup, then
    /// publish the modules' devices in the hypercall page.
    ///
    /// Any failure here is fatal for the boot; the sandbox policy is never
    /// loaded.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    fn evolve(mut self, params: BootParams) -> Result<ReadyTender> {
        BootInfoBuilder::build(&mut self.memory, params.kernel_end)?;
        BootInfoBuilder::write_cmdline(&mut self.memory, &params.cmdline)?;

        let mut policy = SandboxPolicy::new(self.config.report_disallowed_syscalls);
        self.registry.run_all_setups(&mut policy)?;
        HypercallPageBuilder::build(&mut self.memory, &self.registry.devices())?;

        let launch = LaunchContext::new(&self.memory, params.entry)?;
        info!(
            "tender ready: {} rules from modules {:?}",
            policy.rules().len(),
            self.registry.names()
        );
        Ok(ReadyTender::new(self.memory, self.registry, policy, launch))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;
    use tempfile::NamedTempFile;
    use tender_common::hypercall::DeviceKind;
    use tender_testing::HELLO_GUEST_X86_64;

    use super::{BootParams, UninitializedTender};
    use crate::error::TenderError;
    use crate::mem::boot_info::BootInfoBuilder;
    use crate::mem::hypercall_page::HypercallPageBuilder;
    use crate::mem::layout::GuestLayout;
    use crate::mem::ptr_offset::Offset;
    use crate::modules::{BlockModule, Module};
    use crate::new_error;
    use crate::seccomp::{PolicyState, SandboxPolicy};
    use crate::tender::TenderConfiguration;
    use crate::tender_state::tender::{EvolvableTender, Tender};
    use crate::Result;

    struct Broken;

    impl Module for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn setup(&mut self, _: &mut SandboxPolicy) -> Result<()> {
            Err(new_error!("backing device is gone"))
        }
    }

    fn config() -> TenderConfiguration {
        TenderConfiguration::new(0x200000, false)
    }

    #[test]
    #[serial]
    fn rejects_invalid_memory_size() {
        let err = UninitializedTender::new(TenderConfiguration::new(0x1000, false)).unwrap_err();
        assert!(matches!(err, TenderError::MemoryRequestTooSmall(..)));
    }

    #[test]
    #[serial]
    fn loads_flat_image() {
        let mut tender = UninitializedTender::new(config()).unwrap();
        let end = tender.load_flat_image(HELLO_GUEST_X86_64).unwrap();
        assert_eq!(end, GuestLayout::kernel_offset() + page_size::get());
        let mut loaded = vec![0; HELLO_GUEST_X86_64.len()];
        tender
            .memory()
            .copy_to_slice(&mut loaded, GuestLayout::kernel_offset())
            .unwrap();
        assert_eq!(loaded, HELLO_GUEST_X86_64);

        let too_big = vec![0x90; 0x200000];
        assert!(tender.load_flat_image(&too_big).is_err());
    }

    #[test]
    #[serial]
    fn quiet_scenario() {
        let tender = UninitializedTender::new(config()).unwrap();
        assert_eq!(tender.module_names(), ["core"]);
        let ready = tender
            .evolve(BootParams::new(
                Offset::from(0x100000_u64),
                Offset::from(0x180000_u64),
                "quiet",
            ))
            .unwrap();

        let bi = BootInfoBuilder::read(ready.memory()).unwrap();
        assert_eq!(bi.mem_size, 0x200000);
        assert_eq!(bi.kernel_end, 0x180000);
        assert_eq!(bi.cmdline, u64::from(GuestLayout::cmdline_offset()));
        let mut cmdline = [0u8; 6];
        ready
            .memory()
            .copy_to_slice(&mut cmdline, GuestLayout::cmdline_offset())
            .unwrap();
        assert_eq!(&cmdline, b"quiet\0");

        let ctx = ready.launch_context();
        assert_eq!(ctx.entry(), 0x100000);
        assert_eq!(ctx.boot_info(), usize::try_from(GuestLayout::boot_info_offset()).unwrap());
        #[cfg(target_arch = "x86_64")]
        assert_eq!(ctx.stack_top(), 0x200000 - 8);
        #[cfg(target_arch = "aarch64")]
        assert_eq!(ctx.stack_top(), 0x200000 - 16);
        assert_eq!(ready.policy().state(), PolicyState::Accumulating);
    }

    #[test]
    #[serial]
    fn failing_module_aborts_boot() {
        let mut tender = UninitializedTender::new(config()).unwrap();
        tender.register_module(Box::new(Broken));
        assert_eq!(tender.module_names(), ["core", "broken"]);
        let err = tender
            .evolve(BootParams::new(
                Offset::from(0x100000_u64),
                Offset::from(0x180000_u64),
                "",
            ))
            .unwrap_err();
        match err {
            TenderError::ModuleSetupFailed(name, reason) => {
                assert_eq!(name, "broken");
                assert!(reason.contains("backing device is gone"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn oversized_cmdline_aborts_boot() {
        let tender = UninitializedTender::new(config()).unwrap();
        let cmdline = "x".repeat(GuestLayout::cmdline_capacity() as usize);
        let err = tender
            .evolve(BootParams::new(
                Offset::from(0x100000_u64),
                Offset::from(0x180000_u64),
                cmdline,
            ))
            .unwrap_err();
        assert!(matches!(err, TenderError::CmdlineTooLong(..)));
    }

    #[test]
    #[serial]
    fn block_device_is_published_to_the_guest() {
        let mut disk = NamedTempFile::new().unwrap();
        disk.write_all(&[0; 2048]).unwrap();

        let mut tender = UninitializedTender::new(config()).unwrap();
        tender.register_module(Box::new(BlockModule::open(disk.path()).unwrap()));
        let ready = tender
            .evolve(BootParams::new(
                Offset::from(0x100000_u64),
                Offset::from(0x180000_u64),
                "quiet",
            ))
            .unwrap();

        let pread_rule = ready
            .policy()
            .rules()
            .iter()
            .find(|r| r.syscall == libc::SYS_pread64)
            .unwrap();
        let devices = HypercallPageBuilder::read(ready.memory()).unwrap();
        assert_eq!(devices.len(), 1);
        let device = devices[0];
        assert_eq!(device.kind, DeviceKind::Block as u32);
        assert_eq!(device.capacity, 2048);
        // the descriptor the guest is told about is the one the rule allows
        let mut args = [0u64; 6];
        args[0] = device.hostfd as u64;
        args[2] = 512;
        assert!(ready.policy().permits(pread_rule.syscall, &args));
        args[0] += 1;
        assert!(!ready.policy().permits(pread_rule.syscall, &args));
    }

    #[test]
    #[serial]
    fn core_only_publishes_an_empty_table() {
        let tender = UninitializedTender::new(config()).unwrap();
        let ready = tender
            .evolve(BootParams::new(
                Offset::from(0x100000_u64),
                Offset::from(0x180000_u64),
                "",
            ))
            .unwrap();
        assert!(HypercallPageBuilder::read(ready.memory()).unwrap().is_empty());
    }
}
