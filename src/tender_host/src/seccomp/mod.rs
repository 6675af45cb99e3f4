// For more information on seccomp filters, refer to:
// https://www.kernel.org/doc/html/latest/userspace-api/seccomp_filter.html

/// The append-only allow-list modules widen before launch, and its
/// compilation to a BPF program.
pub mod policy;

pub use policy::{ArgCondition, ArgLen, CmpOp, PolicyRule, PolicyState, SandboxPolicy};
