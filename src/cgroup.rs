//! Cgroup v2 controller (component A). Adapted from `sbox`'s `Cgroup` type
//! (`examples/udovin-sbox/src/cgroup.rs`), generalized with the limit-write
//! and subtree_control enabling logic from the original Go
//! `cgroups/manager.go`.

use std::fs::{create_dir_all, read_to_string, remove_dir_all, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::Result;

const CGROUP_PROCS: &str = "cgroup.procs";
const SUBTREE_CONTROL: &str = "cgroup.subtree_control";

#[derive(Clone, Debug, Default)]
pub struct ResourceLimits {
    pub memory: Option<String>,
    pub cpu_share: Option<u64>,
    pub cpuset_cpus: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Cgroup {
    mount_path: PathBuf,
    path: PathBuf,
}

impl Cgroup {
    pub fn new(mount_path: impl Into<PathBuf>, name: impl AsRef<Path>) -> Result<Self> {
        let name = name.as_ref();
        anyhow::ensure!(!name.is_absolute(), "cgroup name cannot be absolute");
        let mount_path = mount_path.into();
        anyhow::ensure!(mount_path.is_absolute(), "cgroup mount path must be absolute");
        let path = mount_path.join(name);
        Ok(Self { mount_path, path })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn parent(&self) -> Option<Self> {
        let path = self.path.parent()?;
        if path.starts_with(&self.mount_path) {
            Some(Self {
                mount_path: self.mount_path.clone(),
                path: path.to_owned(),
            })
        } else {
            None
        }
    }

    pub fn child(&self, name: impl AsRef<Path>) -> Result<Self> {
        let name = name.as_ref();
        anyhow::ensure!(!name.is_absolute(), "child cgroup name cannot be absolute");
        Ok(Self {
            mount_path: self.mount_path.clone(),
            path: self.path.join(name),
        })
    }

    /// Create the cgroup directory, enabling the controllers we need in
    /// every ancestor's `subtree_control` along the way (idempotent).
    pub fn create(&self) -> Result<()> {
        if self.path == self.mount_path {
            return Ok(());
        }
        if let Some(parent) = self.parent() {
            parent.create()?;
            if parent.path != self.mount_path {
                for controller in ["cpu", "cpuset", "memory"] {
                    if let Err(err) = parent.enable_controller(controller) {
                        warn!(%controller, path = %parent.path.display(), "failed to enable controller: {err:#}");
                    }
                }
            }
        }
        create_dir_all(&self.path)
            .with_context(|| format!("creating cgroup dir {}", self.path.display()))
    }

    fn enable_controller(&self, controller: &str) -> Result<()> {
        let path = self.path.join(SUBTREE_CONTROL);
        let current = read_to_string(&path).unwrap_or_default();
        if current
            .split_whitespace()
            .any(|name| name.trim_start_matches('+') == controller)
        {
            return Ok(());
        }
        File::options()
            .write(true)
            .open(&path)
            .and_then(|mut f| f.write_all(format!("+{controller}").as_bytes()))
            .with_context(|| format!("enabling {controller} in {}", path.display()))
    }

    /// Attach `pid` to this cgroup. Must succeed before the child runs any
    /// resource-intensive work.
    pub fn apply(&self, pid: Pid) -> Result<()> {
        self.create()?;
        self.write_procs(pid)
            .with_context(|| format!("attaching pid {pid} to {}", self.path.display()))
    }

    fn write_procs(&self, pid: Pid) -> Result<()> {
        File::options()
            .write(true)
            .open(self.path.join(CGROUP_PROCS))?
            .write_all(pid.to_string().as_bytes())?;
        Ok(())
    }

    /// Write resource limits. Empty fields are skipped.
    pub fn set(&self, limits: &ResourceLimits) -> Result<()> {
        if let Some(memory) = &limits.memory {
            self.write_file("memory.max", memory)
                .with_context(|| "writing memory.max")?;
        }
        if let Some(share) = limits.cpu_share {
            let weight = (share.saturating_mul(10)).clamp(1, 10000);
            self.write_file("cpu.weight", &weight.to_string())
                .with_context(|| "writing cpu.weight")?;
        }
        if let Some(cpuset) = &limits.cpuset_cpus {
            self.write_file("cpuset.cpus", cpuset)
                .with_context(|| "writing cpuset.cpus")?;
        }
        Ok(())
    }

    fn write_file(&self, name: &str, value: &str) -> Result<()> {
        File::options()
            .write(true)
            .open(self.path.join(name))?
            .write_all(value.as_bytes())?;
        Ok(())
    }

    /// Migrate every process out to the parent cgroup (best-effort) and
    /// remove the directory.
    pub fn destroy(&self) -> Result<()> {
        if let Ok(contents) = read_to_string(self.path.join(CGROUP_PROCS)) {
            if let Some(parent) = self.parent() {
                for line in contents.lines().filter(|l| !l.is_empty()) {
                    if let Err(err) = File::options()
                        .write(true)
                        .open(parent.path.join(CGROUP_PROCS))
                        .and_then(|mut f| f.write_all(line.as_bytes()))
                    {
                        warn!(pid = line, "failed to migrate pid out of cgroup: {err}");
                    }
                }
            }
        }
        debug!(path = %self.path.display(), "removing cgroup");
        remove_dir_all(&self.path)
            .with_context(|| format!("removing cgroup dir {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_conversion_clamps() {
        let limits = ResourceLimits {
            memory: None,
            cpu_share: Some(0),
            cpuset_cpus: None,
        };
        assert_eq!(limits.cpu_share.unwrap().saturating_mul(10).clamp(1, 10000), 1);

        let limits = ResourceLimits {
            memory: None,
            cpu_share: Some(512),
            cpuset_cpus: None,
        };
        assert_eq!(
            limits.cpu_share.unwrap().saturating_mul(10).clamp(1, 10000),
            5120
        );

        let limits = ResourceLimits {
            memory: None,
            cpu_share: Some(5000),
            cpuset_cpus: None,
        };
        assert_eq!(
            limits.cpu_share.unwrap().saturating_mul(10).clamp(1, 10000),
            10000
        );
    }

    #[test]
    fn rejects_absolute_name() {
        assert!(Cgroup::new("/sys/fs/cgroup", "/abs").is_err());
    }
}
