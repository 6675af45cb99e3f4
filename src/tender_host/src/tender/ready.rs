use std::convert::Infallible;
use std::fmt::Debug;

use tracing::info;

use crate::launch::LaunchContext;
use crate::mem::guest_mem::GuestMemory;
use crate::modules::ModuleRegistry;
use crate::seccomp::SandboxPolicy;
use crate::signal_handlers::sigsys_signal_handler::register_signal_handler_once;
use crate::tender_state::tender::Tender;
use crate::Result;

/// A tender with boot info written and every module set up. The only thing
/// left to do is load the sandbox policy and jump into the guest.
pub struct ReadyTender {
    memory: GuestMemory,
    // owns the modules' descriptors, which must stay open for the guest
    registry: ModuleRegistry,
    policy: SandboxPolicy,
    launch: LaunchContext,
}

impl Debug for ReadyTender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyTender")
            .field("memory", &self.memory)
            .field("modules", &self.registry.names())
            .field("policy", &self.policy)
            .field("launch", &self.launch)
            .finish()
    }
}

impl Tender for ReadyTender {
    fn memory(&self) -> &GuestMemory {
        &self.memory
    }
}

impl ReadyTender {
    pub(super) fn new(
        memory: GuestMemory,
        registry: ModuleRegistry,
        policy: SandboxPolicy,
        launch: LaunchContext,
    ) -> Self {
        Self {
            memory,
            registry,
            policy,
            launch,
        }
    }

    /// The policy the modules built, not yet loaded
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Where the guest will start
    pub fn launch_context(&self) -> &LaunchContext {
        &self.launch
    }

    /// Load the sandbox policy and transfer control to the guest.
    ///
    /// Only returns if installing the policy fails. Once it is installed the
    /// process belongs to the guest: it ends when the guest exits or makes a
    /// syscall the policy does not allow.
    pub fn run(mut self) -> Result<Infallible> {
        if self.policy.reports_disallowed() {
            register_signal_handler_once()?;
        }
        info!(
            "launching guest at {:#x}, stack {:#x}",
            self.launch.entry(),
            self.launch.stack_top()
        );
        self.policy.load()?;
        // nothing below may allocate or log
        unsafe { self.launch.launch() }
    }
}
