//! The `clone(2)` harness shared by the parent-side orchestrator (H, which
//! starts `/proc/self/exe init` already inside fresh namespaces) and the
//! exec-into-container path (I).
//!
//! `std::process::Command::pre_exec` + `nix::sched::unshare` cannot deliver
//! this: `unshare(CLONE_NEWPID)` only takes effect for the *next* `fork`,
//! never for the calling thread's own subsequent `execve`. The namespaces
//! a process lives in are decided at `clone(2)` time, not at `exec` time
//! (though they do survive `execve`). So, like Go's `os/exec` with
//! `SysProcAttr.Cloneflags` and the original's `nsenter.go` constructor
//! (`clone(SYS_clone, CLONE_FLAGS|SIGCHLD, NULL, ...)`), this calls the
//! classic two-argument `clone(2)` syscall directly with `stack = NULL`:
//! without `CLONE_VM` the kernel copy-on-writes the parent's address space
//! for the child exactly as `fork()` does, so a null stack is valid here
//! (mirrors `sbox`'s `clone3`-based harness in
//! `examples/udovin-sbox/src/syscall.rs`, simplified to `clone3`'s
//! predecessor since none of the `clone3`-only flags are needed).

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use nix::libc::{self, pid_t};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::Result;

pub const NEWNS: i32 = libc::CLONE_NEWNS;
pub const NEWUTS: i32 = libc::CLONE_NEWUTS;
pub const NEWPID: i32 = libc::CLONE_NEWPID;
pub const NEWNET: i32 = libc::CLONE_NEWNET;
pub const NEWIPC: i32 = libc::CLONE_NEWIPC;

/// Bring up a pipe whose read end is handed to the child as fd 3 and whose
/// write end stays with the parent — the control channel described in
/// SPEC_FULL.md §4.G/§4.H.
pub struct ControlPipe {
    rx: File,
    tx: File,
}

pub fn new_control_pipe() -> Result<ControlPipe> {
    let (rx, tx) = nix::unistd::pipe()?;
    Ok(ControlPipe {
        rx: unsafe { File::from_raw_fd(rx) },
        tx: unsafe { File::from_raw_fd(tx) },
    })
}

impl ControlPipe {
    pub fn rx_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }

    pub fn into_tx(self) -> File {
        drop(self.rx);
        self.tx
    }
}

pub enum Stdio {
    Inherit,
    RedirectTo(File),
}

/// Start `/proc/self/exe <arg0...>` directly inside a fresh set of
/// namespaces (OR of the `NEW*` flags above). `cwd` becomes the child's
/// working directory before `execve`; `pipe_rx` is dup'd onto fd 3.
pub fn spawn_reexec(
    clone_flags: i32,
    args: &[&str],
    cwd: &Path,
    pipe_rx: RawFd,
    stdio: Stdio,
) -> Result<Pid> {
    let argv: Vec<CString> = args.iter().map(|s| CString::new(*s).unwrap()).collect();
    let envp: Vec<CString> = std::env::vars()
        .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
        .collect();
    let cwd = CString::new(cwd.as_os_str().to_str().unwrap())?;

    match unsafe { raw_clone(clone_flags) }? {
        CloneResult::Child => {
            // From here on we are the child: any failure must _exit, never
            // return up through the caller's stack (which belongs to the
            // forked image of the parent, not a fresh process).
            let result = (|| -> Result<()> {
                nix::unistd::dup2(pipe_rx, 3)?;
                match stdio {
                    Stdio::Inherit => {}
                    Stdio::RedirectTo(file) => {
                        let fd = file.into_raw_fd();
                        nix::unistd::dup2(fd, libc::STDOUT_FILENO)?;
                        nix::unistd::dup2(fd, libc::STDERR_FILENO)?;
                    }
                }
                nix::unistd::chdir(cwd.as_c_str())?;
                let exe = CString::new("/proc/self/exe").unwrap();
                nix::unistd::execve(&exe, &argv, &envp)?;
                unreachable!("execve only returns on error");
            })();
            if result.is_err() {
                unsafe { libc::_exit(1) };
            }
            unreachable!();
        }
        CloneResult::Parent { child } => Ok(child),
    }
}

enum CloneResult {
    Child,
    Parent { child: Pid },
}

/// Raw `clone(2)`: `clone(flags | SIGCHLD, NULL, NULL, NULL, NULL)`. Returns
/// `Child` in the new process, `Parent{child}` in the caller.
unsafe fn raw_clone(flags: i32) -> std::result::Result<CloneResult, Errno> {
    let res = libc::syscall(
        libc::SYS_clone,
        (flags | libc::SIGCHLD) as libc::c_ulong,
        0usize, // stack = NULL: valid without CLONE_VM, kernel COWs like fork()
        0usize, // parent_tidptr
        0usize, // child_tidptr
        0usize, // tls
    );
    Errno::result(res).map(|v| match v {
        0 => CloneResult::Child,
        pid => CloneResult::Parent {
            child: Pid::from_raw(pid as pid_t),
        },
    })
}

pub fn wait_for_exit(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::__WALL))? {
            WaitStatus::Exited(_, code) => return Ok(code),
            WaitStatus::Signaled(_, sig, _) => return Ok(128 + sig as i32),
            _ => continue,
        }
    }
}

/// Pipe wire protocol between parent and init (fd 3): the parent writes
/// the space-joined user command and closes its end; the init reads to
/// EOF. See SPEC_FULL.md §4.G step 2 / §4.H step 11.
pub fn write_command(mut tx: impl Write, command: &str) -> Result<()> {
    tx.write_all(command.as_bytes())?;
    Ok(())
}

pub fn read_command(mut rx: impl Read) -> Result<String> {
    let mut buf = String::new();
    rx.read_to_string(&mut buf)?;
    Ok(buf)
}
