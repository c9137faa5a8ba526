//! Container registry (component F). Record schema follows `spec.md` §6
//! (stable, tests consume it) and `examples/original_source`'s
//! `container/container_process.go` `ContainerInfo`, extended with `env`
//! so a record fully reconstructs how a container was launched (see
//! SPEC_FULL.md §3).

use std::fs::{self, File};
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::Error;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Stop,
    Exit,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Running => "running",
            Status::Stop => "stop",
            Status::Exit => "exit",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub pid: String,
    pub command: String,
    #[serde(rename = "createTime")]
    pub create_time: String,
    pub status: Status,
    pub volume: String,
    #[serde(rename = "portMapping")]
    pub port_mapping: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

pub struct Registry {
    paths: Paths,
}

impl Registry {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.paths.container_dir(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.paths.container_config(name).exists()
    }

    pub fn create_dir(&self, name: &str) -> Result<()> {
        fs::create_dir_all(self.dir(name))
            .with_context(|| format!("creating container dir for {name}"))
    }

    pub fn save(&self, record: &Record) -> Result<()> {
        let path = self.paths.container_config(&record.name);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(record)?;
        {
            let mut f = File::create(&tmp)
                .with_context(|| format!("creating temp record for {}", record.name))?;
            f.write_all(&data)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("persisting record for {}", record.name))
    }

    pub fn load(&self, name: &str) -> Result<Record> {
        let path = self.paths.container_config(name);
        let data = fs::read(&path).map_err(|_| Error::NoSuchContainer(name.to_string()))?;
        Ok(serde_json::from_slice(&data)
            .with_context(|| format!("parsing record for {name}"))?)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.dir(name);
        fs::remove_dir_all(&dir).with_context(|| format!("removing container dir {name}"))
    }

    pub fn list(&self) -> Result<Vec<Record>> {
        let dir = self.paths.containers_dir();
        let mut records = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(err) => return Err(err).context("reading containers dir"),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(name, "skipping unreadable container record: {err:#}");
                }
            }
        }
        Ok(records)
    }

    /// Probe every `running` record's PID with signal 0; downgrade to
    /// `exit` if the process is gone.
    pub fn reconcile(&self) -> Result<Vec<Record>> {
        let mut records = self.list()?;
        for record in &mut records {
            if record.status != Status::Running {
                continue;
            }
            let Ok(pid) = record.pid.parse::<i32>() else {
                continue;
            };
            match kill(Pid::from_raw(pid), None) {
                Ok(()) => {}
                Err(nix::errno::Errno::ESRCH) => {
                    record.status = Status::Exit;
                    record.pid.clear();
                    self.save(record)?;
                }
                Err(_) => {}
            }
        }
        Ok(records)
    }
}

pub fn generate_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| rng.gen_range(0..10).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths_in(dir: &std::path::Path) -> Paths {
        std::env::set_var("ZDOCKER_STATE_ROOT", dir);
        Paths::default()
    }

    #[test]
    fn round_trips_a_record() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let registry = Registry::new(paths);
        registry.create_dir("web").unwrap();
        let record = Record {
            id: "1234567890".into(),
            name: "web".into(),
            pid: "123".into(),
            command: "sh -c echo hi".into(),
            create_time: "now".into(),
            status: Status::Running,
            volume: String::new(),
            port_mapping: vec![],
            env: vec![],
        };
        registry.save(&record).unwrap();
        let loaded = registry.load("web").unwrap();
        assert_eq!(loaded.pid, "123");
        assert_eq!(loaded.status, Status::Running);
    }

    #[test]
    fn generates_ten_digit_ids() {
        let id = generate_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }
}
