use std::arch::asm;

/// System V: the first integer argument goes in `rdi`. `rbp` is cleared so
/// that stack walkers in the guest stop at its entry frame.
pub(super) unsafe fn launch(stack_top: usize, entry: usize, arg: usize) -> ! {
    unsafe {
        asm!(
            "mov rsp, {sp}",
            "xor ebp, ebp",
            "jmp {entry}",
            sp = in(reg) stack_top,
            entry = in(reg) entry,
            in("rdi") arg,
            options(noreturn)
        )
    }
}
