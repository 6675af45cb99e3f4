use std::collections::BTreeMap;

use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use tracing::{debug, instrument, Span};

use crate::{new_error, Result};

/// How much of a syscall argument a condition looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLen {
    /// the low 32 bits
    Dword,
    /// all 64 bits
    Qword,
}

/// The comparison a condition applies to a syscall argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// argument == value
    Eq,
    /// argument != value
    Ne,
    /// argument < value
    Lt,
    /// argument <= value
    Le,
    /// argument > value
    Gt,
    /// argument >= value
    Ge,
    /// (argument & mask) == value
    MaskedEq(u64),
}

/// A predicate over a single syscall argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgCondition {
    arg: u8,
    len: ArgLen,
    op: CmpOp,
    value: u64,
}

impl ArgCondition {
    /// Compare argument number `arg` (0 to 5) against `value`
    pub fn new(arg: u8, len: ArgLen, op: CmpOp, value: u64) -> Self {
        Self {
            arg,
            len,
            op,
            value,
        }
    }

    /// The common case: the low 32 bits of argument `arg` equal `value`.
    /// File descriptors and clock ids are both `int`s.
    pub fn eq(arg: u8, value: u64) -> Self {
        Self::new(arg, ArgLen::Dword, CmpOp::Eq, value)
    }

    /// Whether the condition holds for the given syscall arguments
    pub fn matches(&self, args: &[u64; 6]) -> bool {
        let Some(raw) = args.get(self.arg as usize) else {
            return false;
        };
        let (arg, value) = match self.len {
            ArgLen::Dword => (*raw & 0xffff_ffff, self.value & 0xffff_ffff),
            ArgLen::Qword => (*raw, self.value),
        };
        match self.op {
            CmpOp::Eq => arg == value,
            CmpOp::Ne => arg != value,
            CmpOp::Lt => arg < value,
            CmpOp::Le => arg <= value,
            CmpOp::Gt => arg > value,
            CmpOp::Ge => arg >= value,
            CmpOp::MaskedEq(mask) => arg & mask == value,
        }
    }

    fn to_seccomp(self) -> Result<SeccompCondition> {
        let len = match self.len {
            ArgLen::Dword => SeccompCmpArgLen::Dword,
            ArgLen::Qword => SeccompCmpArgLen::Qword,
        };
        let op = match self.op {
            CmpOp::Eq => SeccompCmpOp::Eq,
            CmpOp::Ne => SeccompCmpOp::Ne,
            CmpOp::Lt => SeccompCmpOp::Lt,
            CmpOp::Le => SeccompCmpOp::Le,
            CmpOp::Gt => SeccompCmpOp::Gt,
            CmpOp::Ge => SeccompCmpOp::Ge,
            CmpOp::MaskedEq(mask) => SeccompCmpOp::MaskedEq(mask),
        };
        Ok(SeccompCondition::new(self.arg, len, op, self.value)?)
    }
}

/// One allow rule: `syscall` is allowed when every condition holds. A rule
/// with no conditions allows the syscall unconditionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// the syscall number, as in `libc::SYS_*`
    pub syscall: i64,
    /// conditions that must all hold
    pub conditions: Vec<ArgCondition>,
    /// the name of the module that added the rule
    pub owner: &'static str,
}

impl PolicyRule {
    fn matches(&self, syscall: i64, args: &[u64; 6]) -> bool {
        self.syscall == syscall && self.conditions.iter().all(|c| c.matches(args))
    }
}

/// Where a [`SandboxPolicy`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    /// no rules yet
    Empty,
    /// rules have been added, nothing is enforced yet
    Accumulating,
    /// handed to the host kernel; the rule set can no longer change
    Loaded,
}

/// A deny-by-default syscall allow-list.
///
/// Modules widen the policy during setup; the tender then loads it right
/// before transferring control to the guest. From that point on the kernel
/// enforces it on every syscall the process makes, and any syscall that no
/// rule matches kills the process.
///
/// The policy is append-only: there is no way to remove a rule, and adding
/// one after the policy is loaded is a bug in the boot sequence that panics.
#[derive(Debug)]
pub struct SandboxPolicy {
    rules: Vec<PolicyRule>,
    owner: &'static str,
    report_disallowed: bool,
    // the installed program; kept so it is never freed under the filter
    program: Option<BpfProgram>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::new(false)
    }
}

impl SandboxPolicy {
    /// Create an empty policy.
    ///
    /// With `report_disallowed` set, a disallowed syscall raises `SIGSYS`
    /// instead of killing the process, so that a handler can report which
    /// syscall was missing.
    pub fn new(report_disallowed: bool) -> Self {
        Self {
            rules: Vec::new(),
            owner: "unknown",
            report_disallowed,
            program: None,
        }
    }

    /// Attribute rules added from now on to the module called `owner`
    pub(crate) fn set_owner(&mut self, owner: &'static str) {
        self.owner = owner;
    }

    /// Whether disallowed syscalls trap instead of killing the process
    pub fn reports_disallowed(&self) -> bool {
        self.report_disallowed
    }

    /// Allow `syscall` when all of `conditions` hold.
    ///
    /// # Panics
    ///
    /// If the policy has already been loaded.
    pub fn add_rule(&mut self, syscall: i64, conditions: Vec<ArgCondition>) {
        assert!(
            self.program.is_none(),
            "rule for syscall {} added to a loaded sandbox policy",
            syscall
        );
        debug!(
            "{}: allow syscall {} when {:?}",
            self.owner, syscall, conditions
        );
        self.rules.push(PolicyRule {
            syscall,
            conditions,
            owner: self.owner,
        });
    }

    /// All rules, in the order they were added
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// The current lifecycle state
    pub fn state(&self) -> PolicyState {
        if self.program.is_some() {
            PolicyState::Loaded
        } else if self.rules.is_empty() {
            PolicyState::Empty
        } else {
            PolicyState::Accumulating
        }
    }

    /// Whether the policy allows `syscall` with `args`.
    ///
    /// This evaluates the rules the same way the compiled filter does,
    /// without loading anything.
    pub fn permits(&self, syscall: i64, args: &[u64; 6]) -> bool {
        self.rules.iter().any(|r| r.matches(syscall, args))
    }

    /// The action taken for syscalls no rule matches
    pub fn mismatch_action(&self) -> SeccompAction {
        if self.report_disallowed {
            SeccompAction::Trap
        } else {
            SeccompAction::KillProcess
        }
    }

    /// Compile the rules into a BPF program for the host architecture
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn compile(&self) -> Result<BpfProgram> {
        let mut by_syscall: BTreeMap<i64, Option<Vec<SeccompRule>>> = BTreeMap::new();
        for rule in &self.rules {
            let entry = by_syscall
                .entry(rule.syscall)
                .or_insert_with(|| Some(Vec::new()));
            // `None` marks a syscall that some rule allows unconditionally
            if rule.conditions.is_empty() {
                *entry = None;
            } else if let Some(seccomp_rules) = entry {
                let conditions = rule
                    .conditions
                    .iter()
                    .map(|c| c.to_seccomp())
                    .collect::<Result<Vec<_>>>()?;
                seccomp_rules.push(SeccompRule::new(conditions)?);
            }
        }
        let rules = by_syscall
            .into_iter()
            .map(|(nr, rules)| (nr, rules.unwrap_or_default()))
            .collect();

        let arch = <&str as TryInto<TargetArch>>::try_into(std::env::consts::ARCH).map_err(|e| {
            new_error!("unsupported seccomp target {}: {:?}", std::env::consts::ARCH, e)
        })?;

        Ok(SeccompFilter::new(
            rules,
            self.mismatch_action(),
            SeccompAction::Allow,
            arch,
        )
        .and_then(|filter| filter.try_into())?)
    }

    /// Compile the policy and install it for the calling thread.
    ///
    /// # Panics
    ///
    /// If the policy has already been loaded.
    pub fn load(&mut self) -> Result<()> {
        self.load_with(|program| Ok(seccompiler::apply_filter(program)?))
    }

    /// Compile the policy and hand the program to `install`, marking the
    /// policy loaded once `install` succeeds.
    ///
    /// The program is built before `install` runs and is then moved into the
    /// policy, so nothing is allocated or freed after the filter takes
    /// effect.
    ///
    /// # Panics
    ///
    /// If the policy has already been loaded.
    pub fn load_with<F>(&mut self, install: F) -> Result<()>
    where
        F: FnOnce(&BpfProgram) -> Result<()>,
    {
        assert!(self.program.is_none(), "sandbox policy loaded twice");
        let program = self.compile()?;
        debug!(
            "loading sandbox policy: {} rules, {} instructions",
            self.rules.len(),
            program.len()
        );
        install(&program)?;
        self.program = Some(program);
        Ok(())
    }

    /// The program that was installed, once the policy is loaded
    pub fn loaded_program(&self) -> Option<&BpfProgram> {
        self.program.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use seccompiler::SeccompAction;

    use super::{ArgCondition, ArgLen, CmpOp, PolicyState, SandboxPolicy};

    fn args(a0: u64) -> [u64; 6] {
        [a0, 0, 0, 0, 0, 0]
    }

    #[test]
    fn lifecycle() {
        let mut policy = SandboxPolicy::default();
        assert_eq!(policy.state(), PolicyState::Empty);
        policy.add_rule(libc::SYS_exit_group, vec![]);
        assert_eq!(policy.state(), PolicyState::Accumulating);
        policy.load_with(|_| Ok(())).unwrap();
        assert_eq!(policy.state(), PolicyState::Loaded);
    }

    #[test]
    fn installed_program_outlives_load() {
        let mut policy = SandboxPolicy::default();
        policy.add_rule(libc::SYS_exit_group, vec![]);
        assert!(policy.loaded_program().is_none());

        let mut installed = (std::ptr::null(), 0);
        policy
            .load_with(|program| {
                installed = (program.as_ptr(), program.len());
                Ok(())
            })
            .unwrap();

        // the very buffer that was installed is still owned by the policy
        let kept = policy.loaded_program().unwrap();
        assert_eq!((kept.as_ptr(), kept.len()), installed);
        assert!(kept.len() > 0);
    }

    #[test]
    #[should_panic(expected = "added to a loaded sandbox policy")]
    fn add_after_load_panics() {
        let mut policy = SandboxPolicy::default();
        policy.add_rule(libc::SYS_exit_group, vec![]);
        policy.load_with(|_| Ok(())).unwrap();
        policy.add_rule(libc::SYS_getpid, vec![]);
    }

    #[test]
    #[should_panic(expected = "loaded twice")]
    fn double_load_panics() {
        let mut policy = SandboxPolicy::default();
        policy.add_rule(libc::SYS_exit_group, vec![]);
        policy.load_with(|_| Ok(())).unwrap();
        let _ = policy.load_with(|_| Ok(()));
    }

    #[test]
    fn failed_install_leaves_policy_unloaded() {
        let mut policy = SandboxPolicy::default();
        policy.add_rule(libc::SYS_exit_group, vec![]);
        assert!(policy.load_with(|_| Err("nope".into())).is_err());
        assert_eq!(policy.state(), PolicyState::Accumulating);
        policy.add_rule(libc::SYS_getpid, vec![]);
    }

    #[test]
    fn permits_follows_conditions() {
        let mut policy = SandboxPolicy::default();
        policy.add_rule(libc::SYS_write, vec![ArgCondition::eq(0, 1)]);
        policy.add_rule(libc::SYS_exit_group, vec![]);
        policy.add_rule(
            libc::SYS_read,
            vec![
                ArgCondition::eq(0, 5),
                ArgCondition::new(2, ArgLen::Qword, CmpOp::Le, 4096),
            ],
        );

        assert!(policy.permits(libc::SYS_write, &args(1)));
        assert!(!policy.permits(libc::SYS_write, &args(2)));
        assert!(policy.permits(libc::SYS_exit_group, &args(42)));
        assert!(!policy.permits(libc::SYS_getpid, &args(0)));
        assert!(policy.permits(libc::SYS_read, &[5, 0, 4096, 0, 0, 0]));
        assert!(!policy.permits(libc::SYS_read, &[5, 0, 4097, 0, 0, 0]));
        assert!(!policy.permits(libc::SYS_read, &[6, 0, 1, 0, 0, 0]));
    }

    #[test]
    fn dword_ignores_high_bits() {
        let cond = ArgCondition::eq(0, 1);
        assert!(cond.matches(&args(0x1_0000_0001)));
        let cond = ArgCondition::new(0, ArgLen::Qword, CmpOp::Eq, 1);
        assert!(!cond.matches(&args(0x1_0000_0001)));
        let cond = ArgCondition::new(1, ArgLen::Qword, CmpOp::MaskedEq(0xff00), 0x1200);
        assert!(cond.matches(&[0, 0x3412, 0, 0, 0, 0]));
        assert!(!cond.matches(&[0, 0x3512, 0, 0, 0, 0]));
    }

    #[test]
    fn rules_keep_order_and_owner() {
        let mut policy = SandboxPolicy::default();
        policy.set_owner("core");
        policy.add_rule(libc::SYS_exit_group, vec![]);
        policy.set_owner("block");
        policy.add_rule(libc::SYS_pread64, vec![ArgCondition::eq(0, 3)]);
        let owners: Vec<_> = policy.rules().iter().map(|r| r.owner).collect();
        assert_eq!(owners, ["core", "block"]);
    }

    #[test]
    fn compiles_mixed_rules() {
        let mut policy = SandboxPolicy::default();
        policy.add_rule(libc::SYS_write, vec![ArgCondition::eq(0, 1)]);
        policy.add_rule(libc::SYS_write, vec![ArgCondition::eq(0, 2)]);
        // an unconditional rule wins over conditional ones for the same syscall
        policy.add_rule(libc::SYS_ppoll, vec![ArgCondition::eq(1, 1)]);
        policy.add_rule(libc::SYS_ppoll, vec![]);
        let program = policy.compile().unwrap();
        assert!(!program.is_empty());
    }

    #[test]
    fn mismatch_action() {
        assert_eq!(
            SandboxPolicy::new(false).mismatch_action(),
            SeccompAction::KillProcess
        );
        assert_eq!(SandboxPolicy::new(true).mismatch_action(), SeccompAction::Trap);
    }
}
