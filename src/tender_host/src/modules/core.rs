use libc::{CLOCK_MONOTONIC, CLOCK_REALTIME, STDERR_FILENO, STDOUT_FILENO};
use tracing::{instrument, Span};

use super::Module;
use crate::seccomp::{ArgCondition, SandboxPolicy};
use crate::Result;

/// The module every guest runs with.
///
/// It allows console output on stdout, reading the monotonic and wall
/// clocks, sleeping in `ppoll` and exiting. When the policy reports
/// disallowed syscalls, writing to stderr is allowed too so the report can
/// be printed.
#[derive(Debug, Default)]
pub struct CoreModule;

impl CoreModule {
    /// The core module
    pub fn new() -> Self {
        Self
    }
}

impl Module for CoreModule {
    fn name(&self) -> &'static str {
        "core"
    }

    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    fn setup(&mut self, policy: &mut SandboxPolicy) -> Result<()> {
        policy.add_rule(
            libc::SYS_write,
            vec![ArgCondition::eq(0, STDOUT_FILENO as u64)],
        );
        policy.add_rule(libc::SYS_exit_group, vec![]);
        policy.add_rule(libc::SYS_ppoll, vec![]);
        policy.add_rule(
            libc::SYS_clock_gettime,
            vec![ArgCondition::eq(0, CLOCK_MONOTONIC as u64)],
        );
        policy.add_rule(
            libc::SYS_clock_gettime,
            vec![ArgCondition::eq(0, CLOCK_REALTIME as u64)],
        );
        if policy.reports_disallowed() {
            policy.add_rule(
                libc::SYS_write,
                vec![ArgCondition::eq(0, STDERR_FILENO as u64)],
            );
        }
        Ok(())
    }
}
