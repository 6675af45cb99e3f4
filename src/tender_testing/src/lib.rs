// This crate contains testing utilities which need to be shared across multiple
// crates in this project.
use std::fs::File;
use std::io::Read;
use std::os::fd::{FromRawFd, RawFd};

use anyhow::{bail, Result};
use hex_literal::hex;

/// A flat x86_64 guest, loaded at the kernel base, that writes `hello\n` to
/// stdout and exits with status 7. It only needs `write(1, ..)` and
/// `exit_group`.
pub const HELLO_GUEST_X86_64: &[u8] = &hex!(
    "b8 01 00 00 00"        // mov eax, SYS_write
    "bf 01 00 00 00"        // mov edi, 1
    "48 8d 35 13 00 00 00"  // lea rsi, [rip + msg]
    "ba 06 00 00 00"        // mov edx, 6
    "0f 05"                 // syscall
    "b8 e7 00 00 00"        // mov eax, SYS_exit_group
    "bf 07 00 00 00"        // mov edi, 7
    "0f 05"                 // syscall
    "68 65 6c 6c 6f 0a"     // msg: "hello\n"
);

/// The exit status of [`HELLO_GUEST_X86_64`]
pub const HELLO_GUEST_EXIT_STATUS: i32 = 7;

/// A flat x86_64 guest that calls `getpid`, which no module allows, then
/// exits with status 0 if it survived.
pub const FORBIDDEN_GUEST_X86_64: &[u8] = &hex!(
    "b8 27 00 00 00"        // mov eax, SYS_getpid
    "0f 05"                 // syscall
    "b8 e7 00 00 00"        // mov eax, SYS_exit_group
    "bf 00 00 00 00"        // mov edi, 0
    "0f 05"                 // syscall
);

/// A flat x86_64 guest that touches its stack, then exits with the boot
/// info's `mem_size` in MiB as its status.
pub const BOOT_INFO_GUEST_X86_64: &[u8] = &hex!(
    "50"                    // push rax
    "58"                    // pop rax
    "48 8b 7f 08"           // mov rdi, [rdi + 8]
    "48 c1 ef 14"           // shr rdi, 20
    "b8 e7 00 00 00"        // mov eax, SYS_exit_group
    "0f 05"                 // syscall
);

/// A flat x86_64 guest that drives the first device in the hypercall page
/// as a block device: it reads sector 1 with `pread64` on the published
/// `hostfd` into its stack, writes the first 6 bytes of the sector to
/// stdout and exits with status 0. A short read exits with status 1.
pub const BLOCK_GUEST_X86_64: &[u8] = &hex!(
    "8b 3c 25 0c 00 01 00"  // mov edi, [0x1000c]      ; devices[0].hostfd
    "48 81 ec 00 02 00 00"  // sub rsp, 512
    "48 89 e6"              // mov rsi, rsp
    "ba 00 02 00 00"        // mov edx, 512
    "41 ba 00 02 00 00"     // mov r10d, 512           ; sector 1
    "b8 11 00 00 00"        // mov eax, SYS_pread64
    "0f 05"                 // syscall
    "48 3d 00 02 00 00"     // cmp rax, 512
    "75 15"                 // jne short_read
    "b8 01 00 00 00"        // mov eax, SYS_write
    "bf 01 00 00 00"        // mov edi, 1
    "ba 06 00 00 00"        // mov edx, 6
    "0f 05"                 // syscall
    "31 ff"                 // xor edi, edi
    "eb 05"                 // jmp exit
    "bf 01 00 00 00"        // short_read: mov edi, 1
    "b8 e7 00 00 00"        // exit: mov eax, SYS_exit_group
    "0f 05"                 // syscall
);

/// How a forked child finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// the child exited with this status
    Exited(i32),
    /// the child was killed by this signal
    Signaled(i32),
}

/// Run `child` in a forked process, which exits with the status `child`
/// returns, and wait for it.
///
/// Loading a seccomp filter or jumping into a guest can't be undone, so
/// tests that do either run in a child. The child must not allocate once it
/// has loaded a filter: build everything it needs before calling this.
pub fn fork_and_wait<F: FnOnce() -> i32>(child: F) -> Result<ChildStatus> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        bail!("fork failed: {}", std::io::Error::last_os_error());
    }
    if pid == 0 {
        let code = child();
        unsafe { libc::_exit(code) };
    }
    wait_for(pid)
}

/// Like [`fork_and_wait`], but `fd` in the child is redirected into a pipe
/// and everything the child writes to it is returned alongside its status.
pub fn fork_and_capture<F: FnOnce() -> i32>(fd: RawFd, child: F) -> Result<(ChildStatus, Vec<u8>)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        bail!("pipe failed: {}", std::io::Error::last_os_error());
    }
    let [read_fd, write_fd] = fds;

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        bail!("fork failed: {}", std::io::Error::last_os_error());
    }
    if pid == 0 {
        unsafe {
            libc::close(read_fd);
            if libc::dup2(write_fd, fd) < 0 {
                libc::_exit(127);
            }
            libc::close(write_fd);
        }
        let code = child();
        unsafe { libc::_exit(code) };
    }

    unsafe { libc::close(write_fd) };
    let mut output = Vec::new();
    // closes read_fd on drop
    let mut pipe = unsafe { File::from_raw_fd(read_fd) };
    pipe.read_to_end(&mut output)?;
    Ok((wait_for(pid)?, output))
}

fn wait_for(pid: libc::pid_t) -> Result<ChildStatus> {
    let mut status = 0;
    if unsafe { libc::waitpid(pid, &mut status, 0) } != pid {
        bail!("waitpid failed: {}", std::io::Error::last_os_error());
    }
    if libc::WIFEXITED(status) {
        Ok(ChildStatus::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Ok(ChildStatus::Signaled(libc::WTERMSIG(status)))
    } else {
        bail!("unexpected wait status {:#x}", status)
    }
}
