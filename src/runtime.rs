//! Parent-side orchestrator (component H): the `run` command. Choreography
//! follows spec.md §4.H; the self-reexec + control-pipe mechanics in turn
//! follow `examples/original_source/container/container_process.go`
//! (`exec.Command("/proc/self/exe", "init")` with `SysProcAttr.Cloneflags`)
//! and `sbox`'s pipe-synchronized init harness
//! (`examples/udovin-sbox/src/tasks.rs`), adapted to the flag set and
//! two-phase flow spec.md §2/§4.H specify.

use std::fs::File;
use std::time::SystemTime;

use anyhow::Context;
use tracing::{info, warn};

use crate::cgroup::{Cgroup, ResourceLimits};
use crate::config::Paths;
use crate::network::NetworkManager;
use crate::overlay::{Volume, Workspace};
use crate::reexec::{self, ControlPipe, Stdio};
use crate::registry::{generate_id, Record, Registry, Status};
use crate::Result;

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub image: String,
    pub command: Vec<String>,
    pub name: Option<String>,
    pub detach: bool,
    pub tty: bool,
    pub volume: Option<String>,
    pub memory: Option<String>,
    pub cpu_share: Option<u64>,
    pub cpuset: Option<String>,
    pub network: Option<String>,
    pub port_mapping: Vec<String>,
    pub env: Vec<String>,
}

pub fn run(paths: Paths, opts: RunOptions) -> Result<()> {
    let id = generate_id();
    let name = opts.name.clone().unwrap_or_else(|| id.clone());

    let registry = Registry::new(paths.clone());
    anyhow::ensure!(
        !registry.exists(&name),
        "container name {name} is already in use"
    );

    let command = resolve_command(&opts);
    registry.create_dir(&name)?;

    let volume = opts.volume.as_deref().and_then(Volume::parse);
    let workspace = Workspace::new(&paths, &opts.image, &name, volume);
    workspace
        .prepare(&paths.image_tar(&opts.image))
        .with_context(|| format!("preparing rootfs for {name}"))?;

    let pipe = reexec_pipe()?;
    let stdio = if opts.tty {
        Stdio::Inherit
    } else {
        let log = File::create(paths.container_log(&name)).context("creating container.log")?;
        Stdio::RedirectTo(log)
    };

    let clone_flags = reexec::NEWUTS | reexec::NEWPID | reexec::NEWNS | reexec::NEWNET | reexec::NEWIPC;
    let rx_fd = pipe.rx_fd();
    let pid = reexec::spawn_reexec(
        clone_flags,
        &["/proc/self/exe", "init"],
        &workspace.merged,
        rx_fd,
        stdio,
    )
    .with_context(|| format!("spawning init process for {name}"))?;
    info!(%name, pid = pid.as_raw(), "container init process started");

    let record = Record {
        id: id.clone(),
        name: name.clone(),
        pid: pid.as_raw().to_string(),
        command: command.join(" "),
        create_time: humantime_now(),
        status: Status::Running,
        volume: opts.volume.clone().unwrap_or_default(),
        port_mapping: opts.port_mapping.clone(),
        env: opts.env.clone(),
    };
    registry.save(&record)?;

    let cgroup = Cgroup::new(paths.cgroup_mount(), paths.cgroup_scope().join(&name))?;
    cgroup.apply(pid)?;
    cgroup.set(&ResourceLimits {
        memory: opts.memory.clone(),
        cpu_share: opts.cpu_share,
        cpuset_cpus: opts.cpuset.clone(),
    })?;

    if let Some(network) = &opts.network {
        let manager = NetworkManager::new(paths.clone());
        let endpoint = manager
            .connect(network, &id, pid.as_raw(), &opts.port_mapping)
            .with_context(|| format!("connecting {name} to network {network}"))?;
        info!(%name, network, ip = %endpoint.ip, "container network connected");
    }

    reexec::write_command(pipe.into_tx(), &command.join(" "))
        .context("writing user command to init process")?;

    if opts.tty {
        let code = reexec::wait_for_exit(pid)?;
        info!(%name, code, "container exited");
        if let Err(err) = registry.remove(&name) {
            warn!(%name, "failed to remove container record: {err:#}");
        }
        workspace.teardown();
        if let Err(err) = cgroup.destroy() {
            warn!(%name, "failed to destroy cgroup: {err:#}");
        }
    }
    Ok(())
}

fn reexec_pipe() -> Result<ControlPipe> {
    reexec::new_control_pipe()
}

/// If no command was given, fall back to the image default: `busybox`
/// gets an interactive shell / `sleep infinity` when detached; any other
/// image gets the same detached default but `sh` when interactive. This
/// mirrors spec.md §9's "default command heuristic" design note, which is
/// a product decision rather than a kernel requirement.
fn resolve_command(opts: &RunOptions) -> Vec<String> {
    if !opts.command.is_empty() {
        return opts.command.clone();
    }
    if opts.tty {
        vec!["sh".to_string()]
    } else {
        vec!["sleep".to_string(), "infinity".to_string()]
    }
}

fn humantime_now() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}
