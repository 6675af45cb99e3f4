use libc::{c_int, c_void, sigaction, siginfo_t, SIGSYS};
use once_cell::sync::OnceCell;

use crate::signal_handlers::register_signal_handler;

// Store the old SIGSYS handler using OnceCell for thread-safe initialization
static OLD_SIGSYS_HANDLER: OnceCell<sigaction> = OnceCell::new();

const REPORT_PREFIX: &[u8] = b"Looks like you also need syscall: ";
const REPORT_LEN: usize = 64;

/// Registers the SIGSYS reporter once per process.
///
/// Only useful together with a policy whose mismatch action is `Trap`: the
/// handler names the syscall the policy rejected and exits with status 1.
pub(crate) fn register_signal_handler_once() -> crate::Result<()> {
    register_signal_handler(SIGSYS, handle_signal, &OLD_SIGSYS_HANDLER)
}

/// Format the report line for `syscall` into `buf` without allocating,
/// returning the number of bytes used.
fn format_report(syscall: i32, buf: &mut [u8; REPORT_LEN]) -> usize {
    let mut len = REPORT_PREFIX.len();
    buf[..len].copy_from_slice(REPORT_PREFIX);

    let mut digits = [0u8; 12];
    let mut n = syscall.unsigned_abs();
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if syscall < 0 {
        i -= 1;
        digits[i] = b'-';
    }
    let digits = &digits[i..];
    buf[len..len + digits.len()].copy_from_slice(digits);
    len += digits.len();
    buf[len] = b'\n';
    len + 1
}

// Runs with the sandbox policy already loaded: only `write` to stderr and
// `exit_group` are available here.
extern "C" fn handle_signal(signal: c_int, info: *mut siginfo_t, _context: *mut c_void) {
    if signal != SIGSYS {
        // Unexpected signal; ignore
        return;
    }

    // si_syscall
    const SI_OFF_SYSCALL: isize = 6;
    let syscall = unsafe { *(info as *const i32).offset(SI_OFF_SYSCALL) };

    let mut buf = [0u8; REPORT_LEN];
    let len = format_report(syscall, &mut buf);
    unsafe {
        libc::write(libc::STDERR_FILENO, buf.as_ptr() as *const c_void, len);
        libc::_exit(1);
    }
}
