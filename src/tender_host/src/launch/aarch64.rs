use std::arch::asm;

/// AAPCS64: the first argument goes in `x0`. The frame pointer is cleared so
/// that stack walkers in the guest stop at its entry frame.
pub(super) unsafe fn launch(stack_top: usize, entry: usize, arg: usize) -> ! {
    unsafe {
        asm!(
            "mov sp, {sp}",
            "mov x29, xzr",
            "br {entry}",
            sp = in(reg) stack_top,
            entry = in(reg) entry,
            in("x0") arg,
            options(noreturn)
        )
    }
}
