//! Stop/remove (component J) plus the `ps`/`logs` read paths of component
//! F. Poll-then-escalate timeout logic follows spec.md §4.J; the original
//! `cmd/stop.go` only sends a single signal and persists status
//! immediately, so the poll loop and SIGKILL escalation are this crate's
//! fuller implementation of spec.md's expanded flow.

use std::io::Read;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::info;

use crate::config::Paths;
use crate::error::Error;
use crate::overlay::{Volume, Workspace};
use crate::registry::{Record, Registry, Status};
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn ps(paths: Paths) -> Result<Vec<Record>> {
    Registry::new(paths).reconcile()
}

pub fn logs(paths: Paths, name: &str) -> Result<String> {
    let registry = Registry::new(paths.clone());
    registry.load(name)?;
    let mut buf = String::new();
    std::fs::File::open(paths.container_log(name))?.read_to_string(&mut buf)?;
    Ok(buf)
}

pub fn stop(paths: Paths, name: &str, signal: Signal, timeout: Option<Duration>) -> Result<()> {
    let registry = Registry::new(paths);
    let mut record = registry.load(name)?;
    if record.status == Status::Stop {
        return Ok(());
    }
    anyhow::ensure!(!record.pid.is_empty(), "{}", Error::ContainerNotRunning(name.to_string()));
    let pid = Pid::from_raw(record.pid.parse()?);

    kill(pid, signal)?;

    if signal == Signal::SIGKILL {
        mark_stopped(&registry, &mut record)?;
        return Ok(());
    }

    let deadline = timeout
        .filter(|t| !t.is_zero())
        .map(|t| Instant::now() + t);
    loop {
        if kill(pid, None) == Err(nix::errno::Errno::ESRCH) {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                kill(pid, Signal::SIGKILL).ok();
                break;
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    mark_stopped(&registry, &mut record)?;
    info!(name, "container stopped");
    Ok(())
}

fn mark_stopped(registry: &Registry, record: &mut Record) -> Result<()> {
    record.status = Status::Stop;
    record.pid.clear();
    registry.save(record)
}

pub fn rm(paths: Paths, name: &str) -> Result<()> {
    let registry = Registry::new(paths.clone());
    let record = registry.load(name)?;
    anyhow::ensure!(
        record.status == Status::Stop,
        "{}",
        Error::ContainerNotStopped(name.to_string())
    );
    registry.remove(name)?;
    let volume = Volume::parse(&record.volume);
    Workspace::new(&paths, "", name, volume).teardown();
    Ok(())
}
