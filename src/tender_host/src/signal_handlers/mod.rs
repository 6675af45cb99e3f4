pub(crate) mod sigsys_signal_handler;

use std::io::Error;
use std::mem;

use libc::{c_int, c_void, sigaction, sigemptyset, siginfo_t, SA_SIGINFO};
use once_cell::sync::OnceCell;

use crate::error::TenderError::SignalHandlerRegistrationFailed;
use crate::Result;

// A helper function to register a signal handler. The previous action is
// kept in `old_handler`, which also makes registration happen once per
// process.
pub(crate) fn register_signal_handler(
    signal: c_int,
    handler_fn: extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
    old_handler: &OnceCell<sigaction>,
) -> Result<()> {
    old_handler.get_or_try_init(|| unsafe {
        let mut old_action: sigaction = mem::zeroed();
        let mut new_action: sigaction = mem::zeroed();

        new_action.sa_sigaction = handler_fn as usize;
        new_action.sa_flags = SA_SIGINFO;
        sigemptyset(&mut new_action.sa_mask);

        if sigaction(signal, &new_action, &mut old_action) != 0 {
            return Err(SignalHandlerRegistrationFailed(
                signal,
                Error::last_os_error().raw_os_error(),
            ));
        }

        Ok(old_action)
    })?;

    Ok(())
}
