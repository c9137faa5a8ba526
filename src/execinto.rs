//! Exec-into-running-container (component I). Grounded on the original
//! `cmd/exec.go` (env-var handoff: `zdocker_pid`/`zdocker_cmd`, env
//! forwarding from `/proc/<pid>/environ`) and `nsenter/nsenter.go` (the
//! fixed `ipc,uts,net,pid,mnt` `setns` order, executed from a hook that
//! runs before the rest of the program). The Rust equivalent of that C
//! `__attribute__((constructor))` hook is the `ctor` crate; `pre_main_hook`
//! below is wired up via `#[ctor::ctor]` in `src/main.rs`.

use std::ffi::CString;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::execvpe;

use crate::config::Paths;
use crate::error::Error;
use crate::registry::Registry;
use crate::Result;

pub const ENV_PID: &str = "zdocker_pid";
pub const ENV_CMD: &str = "zdocker_cmd";

/// Entry point for `zdocker exec NAME CMD...`. Loads the target container's
/// PID, forwards its environment, and self-execs with `ENV_PID`/`ENV_CMD`
/// set so that `pre_main_hook` in the re-launched process does the actual
/// namespace entry before anything else runs.
pub fn launch(paths: Paths, name: &str, cmd: &[String]) -> Result<()> {
    let registry = Registry::new(paths);
    let record = registry.load(name)?;
    let pid: i32 = record
        .pid
        .parse()
        .map_err(|_| Error::ContainerNotRunning(name.to_string()))?;

    let joined = cmd.join(" ");
    let container_env = read_proc_environ(pid).unwrap_or_default();

    std::env::set_var(ENV_PID, pid.to_string());
    std::env::set_var(ENV_CMD, &joined);
    for (key, value) in container_env {
        std::env::set_var(key, value);
    }

    let exe = CString::new("/proc/self/exe")?;
    let argv = [exe.clone(), CString::new("exec")?];
    let envp: Vec<CString> = std::env::vars()
        .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
        .collect();
    execvpe(&exe, &argv, &envp).context("re-executing self for exec-into-container")?;
    unreachable!("execvpe only returns on error");
}

fn read_proc_environ(pid: i32) -> Result<Vec<(String, String)>> {
    let data = fs::read(format!("/proc/{pid}/environ"))
        .with_context(|| format!("reading /proc/{pid}/environ"))?;
    let mut vars = Vec::new();
    for entry in data.split(|&b| b == 0).filter(|s| !s.is_empty()) {
        let entry = String::from_utf8_lossy(entry);
        if let Some((k, v)) = entry.split_once('=') {
            vars.push((k.to_string(), v.to_string()));
        }
    }
    Ok(vars)
}

/// Runs before `fn main`. If this process was launched by `launch` above
/// (`ENV_PID` set), enter the target's IPC/UTS/NET/PID/MNT namespaces in
/// that fixed order, run the forwarded command, and exit — the rest of
/// the program (CLI parsing, tracing setup) never executes in this
/// process image. `setns(CLONE_NEWPID)` must happen before this process
/// spawns any thread, which is exactly the guarantee a pre-main hook
/// gives us; doing this in `main` would already be too late once `tokio`
/// or any other thread-spawning code has touched the process.
pub fn pre_main_hook() {
    let Ok(pid) = std::env::var(ENV_PID) else {
        return;
    };
    let Ok(cmd) = std::env::var(ENV_CMD) else {
        return;
    };
    if enter_namespaces(&pid).is_err() {
        std::process::exit(1);
    }
    let status = std::process::Command::new("sh").arg("-c").arg(&cmd).status();
    std::process::exit(status.map(|s| s.code().unwrap_or(1)).unwrap_or(1));
}

fn enter_namespaces(pid: &str) -> Result<()> {
    for kind in ["ipc", "uts", "net", "pid", "mnt"] {
        let path = PathBuf::from(format!("/proc/{pid}/ns/{kind}"));
        let fd = open(&path, OFlag::O_RDONLY, Mode::empty())
            .with_context(|| format!("opening {}", path.display()))?;
        let flag = match kind {
            "ipc" => CloneFlags::CLONE_NEWIPC,
            "uts" => CloneFlags::CLONE_NEWUTS,
            "net" => CloneFlags::CLONE_NEWNET,
            "pid" => CloneFlags::CLONE_NEWPID,
            "mnt" => CloneFlags::CLONE_NEWNS,
            _ => unreachable!(),
        };
        setns(fd, flag).with_context(|| format!("setns into {kind}"))?;
        nix::unistd::close(fd).ok();
    }
    Ok(())
}
