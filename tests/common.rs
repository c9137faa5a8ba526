use std::{
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use rand::distributions::{Alphanumeric, DistString as _};
use zdocker::cgroup::Cgroup;

pub struct TempDir(PathBuf);

impl TempDir {
    #[allow(unused)]
    pub fn new() -> anyhow::Result<Self> {
        let tmpdir = Path::new(env!("CARGO_TARGET_TMPDIR"));
        let path = loop {
            let path = tmpdir.join(format!("test-{}", rand_string(32)));
            match std::fs::metadata(&path) {
                Ok(_) => continue,
                Err(v) if v.kind() == ErrorKind::NotFound => break path,
                Err(v) => return Err(v.into()),
            }
        };
        std::fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    #[allow(unused)]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.0.join(path)
    }

    #[allow(unused)]
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[allow(unused)]
pub fn rand_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// A scratch cgroup under `/sys/fs/cgroup` for tests that need real
/// controller files. Requires cgroup v2 and write access to the mount,
/// same assumption `sbox`'s own test suite makes.
pub struct TempCgroup(Cgroup);

impl TempCgroup {
    #[allow(unused)]
    pub fn new() -> anyhow::Result<Self> {
        let root = Cgroup::new("/sys/fs/cgroup", format!("zdocker-test-{}", rand_string(16)))?;
        root.create()?;
        Ok(Self(root))
    }
}

impl Deref for TempCgroup {
    type Target = Cgroup;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for TempCgroup {
    fn drop(&mut self) {
        let _ = self.0.destroy();
    }
}
