/// Block device backed by a host file
pub mod block;
/// The baseline every guest gets: console, clocks, polling and exit
pub mod core;
/// Network device backed by a TAP interface or an existing fd
pub mod net;

pub use self::block::BlockModule;
pub use self::core::CoreModule;
pub use self::net::NetModule;

use tender_common::hypercall::DeviceRecord;
use tracing::{info, instrument, Span};

use crate::error::TenderError::ModuleSetupFailed;
use crate::seccomp::SandboxPolicy;
use crate::{log_then_return, Result};

/// A named capability the guest can be given.
///
/// `setup` runs exactly once, before the sandbox policy is loaded, and is the
/// only chance a module has to widen the policy. A module that owns a host
/// descriptor restricts its rules to that descriptor and describes it in
/// `device`, which the tender publishes to the guest.
pub trait Module {
    /// The name reported when setup fails, and attached to the module's rules
    fn name(&self) -> &'static str;

    /// Add the syscall rules this module needs
    fn setup(&mut self, policy: &mut SandboxPolicy) -> Result<()>;

    /// The device record the guest finds in the hypercall page, if any
    fn device(&self) -> Option<DeviceRecord> {
        None
    }
}

/// The ordered set of modules a tender runs with. `core` is always first.
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
    set_up: bool,
}

impl ModuleRegistry {
    /// A registry holding only `core`
    pub fn new(core: CoreModule) -> Self {
        Self {
            modules: vec![Box::new(core)],
            set_up: false,
        }
    }

    /// Append `module`; it is set up after every module registered before it
    pub fn register(&mut self, module: Box<dyn Module>) {
        assert!(!self.set_up, "module registered after setup ran");
        self.modules.push(module);
    }

    /// Module names, in setup order
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Run every module's setup in order against `policy`.
    ///
    /// The first failing module aborts the sequence; its name is in the
    /// returned error and no later module is set up.
    ///
    /// # Panics
    ///
    /// If called more than once.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn run_all_setups(&mut self, policy: &mut SandboxPolicy) -> Result<()> {
        assert!(!self.set_up, "module setup already ran");
        self.set_up = true;
        for module in self.modules.iter_mut() {
            let name = module.name();
            policy.set_owner(name);
            if let Err(e) = module.setup(policy) {
                log_then_return!(ModuleSetupFailed(name, e.to_string()));
            }
            info!("module {} set up", name);
        }
        Ok(())
    }

    /// The devices published by the modules, in setup order
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.modules.iter().filter_map(|m| m.device()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use log::Level;
    use tender_common::hypercall::{DeviceKind, DeviceRecord};

    use super::{CoreModule, Module, ModuleRegistry};
    use crate::error::TenderError;
    use crate::new_error;
    use crate::seccomp::{ArgCondition, PolicyState, SandboxPolicy};
    use crate::testing::logger::{Logger, LOGGER};
    use crate::Result;

    struct Recording {
        name: &'static str,
        fail: bool,
        calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Module for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn setup(&mut self, policy: &mut SandboxPolicy) -> Result<()> {
            self.calls.borrow_mut().push(self.name);
            if self.fail {
                return Err(new_error!("no backing device"));
            }
            policy.add_rule(libc::SYS_read, vec![ArgCondition::eq(0, 9)]);
            Ok(())
        }
    }

    fn recording(
        name: &'static str,
        fail: bool,
        calls: &Rc<RefCell<Vec<&'static str>>>,
    ) -> Box<dyn Module> {
        Box::new(Recording {
            name,
            fail,
            calls: calls.clone(),
        })
    }

    #[test]
    fn core_rules_come_first() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new(CoreModule::new());
        registry.register(recording("first", false, &calls));
        registry.register(recording("second", false, &calls));
        assert_eq!(registry.names(), ["core", "first", "second"]);

        let mut policy = SandboxPolicy::default();
        registry.run_all_setups(&mut policy).unwrap();

        assert_eq!(*calls.borrow(), ["first", "second"]);
        let owners: Vec<_> = policy.rules().iter().map(|r| r.owner).collect();
        let first_other = owners.iter().position(|o| *o != "core").unwrap();
        assert!(first_other > 0);
        assert!(owners[first_other..].iter().all(|o| *o != "core"));
        assert_eq!(&owners[first_other..], ["first", "second"]);
    }

    #[test]
    fn failing_setup_aborts() {
        Logger::initialize_test_logger();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new(CoreModule::new());
        registry.register(recording("broken", true, &calls));
        registry.register(recording("after", false, &calls));

        let mut policy = SandboxPolicy::default();
        let err = registry.run_all_setups(&mut policy).unwrap_err();

        assert!(matches!(err, TenderError::ModuleSetupFailed("broken", _)));
        assert_eq!(*calls.borrow(), ["broken"]);
        assert_ne!(policy.state(), PolicyState::Loaded);
        assert!(policy.rules().iter().all(|r| r.owner == "core"));
        LOGGER.test_log_records(|log_calls| {
            assert!(log_calls.iter().any(|call| call.level == Level::Error
                && call.args.contains("Module broken setup failed")));
        });
    }

    #[test]
    #[should_panic(expected = "already ran")]
    fn setup_runs_once() {
        let mut registry = ModuleRegistry::new(CoreModule::new());
        let mut policy = SandboxPolicy::default();
        registry.run_all_setups(&mut policy).unwrap();
        let _ = registry.run_all_setups(&mut policy);
    }

    struct Disk(i32);

    impl Module for Disk {
        fn name(&self) -> &'static str {
            "disk"
        }

        fn setup(&mut self, _: &mut SandboxPolicy) -> Result<()> {
            Ok(())
        }

        fn device(&self) -> Option<DeviceRecord> {
            Some(DeviceRecord {
                kind: DeviceKind::Block as u32,
                hostfd: self.0,
                capacity: 512,
                ..Default::default()
            })
        }
    }

    #[test]
    fn devices_follow_registration_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new(CoreModule::new());
        registry.register(Box::new(Disk(5)));
        registry.register(recording("plain", false, &calls));
        registry.register(Box::new(Disk(6)));

        let fds: Vec<_> = registry.devices().iter().map(|d| d.hostfd).collect();
        assert_eq!(fds, [5, 6]);
    }
}
