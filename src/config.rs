//! Filesystem layout. The runtime name also doubles as the cgroup v2 scope
//! name under `/sys/fs/cgroup/<runtime>` and the bridge network namespace
//! prefix, matching `examples/original_source`'s `zdocker` paths
//! (`/var/run/zdocker/...`) generalized to an overridable root.

use std::path::{Path, PathBuf};

const DEFAULT_RUNTIME: &str = "zdocker";
const DEFAULT_STATE_ROOT: &str = "/var/run/zdocker";
const DEFAULT_IMAGE_ROOT: &str = "/var/lib/zdocker";
const CGROUP_MOUNT: &str = "/sys/fs/cgroup";

#[derive(Clone, Debug)]
pub struct Paths {
    runtime: String,
    state_root: PathBuf,
    image_root: PathBuf,
    cgroup_mount: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let state_root = std::env::var_os("ZDOCKER_STATE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_ROOT));
        let image_root = std::env::var_os("ZDOCKER_IMAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_ROOT));
        let runtime = std::env::var("ZDOCKER_RUNTIME").unwrap_or_else(|_| DEFAULT_RUNTIME.into());
        Self {
            runtime,
            state_root,
            image_root,
            cgroup_mount: PathBuf::from(CGROUP_MOUNT),
        }
    }
}

impl Paths {
    pub fn cgroup_mount(&self) -> &Path {
        &self.cgroup_mount
    }

    pub fn cgroup_scope(&self) -> PathBuf {
        Path::new(&self.runtime).to_owned()
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.state_root.join("containers")
    }

    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("config.json")
    }

    pub fn container_log(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("container.log")
    }

    pub fn image_tar(&self, image: &str) -> PathBuf {
        self.image_root.join(format!("{image}.tar"))
    }

    pub fn image_layer(&self, image: &str) -> PathBuf {
        self.image_root.join(image)
    }

    pub fn write_layer(&self, name: &str) -> PathBuf {
        self.image_root.join("writeLayer").join(name)
    }

    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.image_root.join("workdir").join(name)
    }

    pub fn merged_dir(&self, name: &str) -> PathBuf {
        self.image_root.join("mnt").join(name)
    }

    pub fn network_dir(&self) -> PathBuf {
        self.state_root.join("network").join("network")
    }

    pub fn network_file(&self, name: &str) -> PathBuf {
        self.network_dir().join(name)
    }

    pub fn ipam_file(&self) -> PathBuf {
        self.state_root
            .join("network")
            .join("ipam")
            .join("subnet.json")
    }
}
