//! Init-side bootstrap (component G): runs as `zdocker init`, already
//! inside the fresh UTS/PID/MNT/NET/IPC namespaces the parent created via
//! `clone(2)` (`src/reexec.rs`). Mount sequencing follows `sbox`'s
//! `setup_mount_namespace`/`pivot_root` (`examples/udovin-sbox/src/mounts.rs`),
//! adapted to the two-directory `pivot_root`/`put_old` form spec.md §4.G
//! specifies rather than `sbox`'s self-pivot trick.

use std::ffi::CString;
use std::fs::{create_dir, File};
use std::os::fd::FromRawFd;
use std::path::Path;

use anyhow::Context;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, execvpe, pivot_root};

use crate::error::Error;
use crate::reexec::read_command;
use crate::Result;

const PIVOT_DIR: &str = ".pivot_root";

/// Run the full init sequence. Never returns on success (ends in `execve`);
/// any error here means the container was stillborn and the parent (who
/// is waiting on this process in TTY mode) must tear down its workspace
/// and cgroup.
pub fn run_init() -> Result<()> {
    remount_root_private()?;

    // fd 3 is the control pipe the parent dup'd in before exec (src/reexec.rs).
    let command_line = read_command(unsafe { File::from_raw_fd(3) })
        .context("reading user command from control pipe")?;
    let args: Vec<&str> = command_line.split(' ').filter(|s| !s.is_empty()).collect();
    anyhow::ensure!(!args.is_empty(), "{}", Error::MissingCommand);

    let new_root = std::env::current_dir().context("resolving merged dir as new root")?;
    pivot_into(&new_root)?;

    mount_proc()?;
    mount_dev()?;

    exec_user_command(&args)
}

fn remount_root_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .context("marking / private")
}

fn pivot_into(new_root: &Path) -> Result<()> {
    // pivot_root requires the new root to be a mount point: bind-mount it
    // onto itself.
    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .context("bind-mounting new root onto itself")?;

    chdir(new_root).context("chdir into new root")?;
    create_dir(PIVOT_DIR).context("creating .pivot_root")?;

    pivot_root(".", PIVOT_DIR).context("pivot_root")?;

    chdir("/").context("chdir to new /")?;
    umount2(format!("/{PIVOT_DIR}").as_str(), MntFlags::MNT_DETACH)
        .context("unmounting old root")?;
    std::fs::remove_dir(format!("/{PIVOT_DIR}")).context("removing .pivot_root")?;
    Ok(())
}

fn mount_proc() -> Result<()> {
    std::fs::create_dir_all("/proc").ok();
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .context("mounting /proc")
}

fn mount_dev() -> Result<()> {
    std::fs::create_dir_all("/dev").ok();
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .context("mounting /dev")
}

fn exec_user_command(args: &[&str]) -> Result<()> {
    let path = resolve_path(args[0]).unwrap_or_else(|| args[0].to_string());
    let argv: Vec<CString> = args.iter().map(|s| CString::new(*s).unwrap()).collect();
    let envp: Vec<CString> = std::env::vars()
        .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
        .collect();
    let path = CString::new(path)?;
    execvpe(&path, &argv, &envp).context("exec of user command failed")?;
    unreachable!("execvpe only returns on error");
}

fn resolve_path(cmd: &str) -> Option<String> {
    if cmd.contains('/') {
        return Some(cmd.to_string());
    }
    let path_var = std::env::var("PATH").ok()?;
    for dir in path_var.split(':') {
        let candidate = Path::new(dir).join(cmd);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}
