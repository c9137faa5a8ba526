//! Overlay rootfs builder (component B). The mount mechanics follow
//! `sbox`'s `OverlayMount` (`examples/udovin-sbox/src/mounts.rs`); the
//! shared-lower-per-image layout and tar-extraction step follow the
//! original `container/container_volume.go`, updated from `aufs` to
//! `overlay` per the spec this crate implements, and from a shelled-out
//! `tar` process to the `tar` crate's in-process unpacking (`sbox`'s
//! `manager.rs` does the same for image layers).

use std::fs::{create_dir_all, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use tracing::warn;

use crate::config::Paths;
use crate::Result;

#[derive(Clone, Debug)]
pub struct Volume {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl Volume {
    /// Parse a raw `HOST:CONTAINER` spec. Returns `None` for an empty spec.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let (host, container) = raw.split_once(':')?;
        if host.is_empty() || container.is_empty() {
            return None;
        }
        Some(Self {
            host: PathBuf::from(host),
            container: PathBuf::from(container.trim_start_matches('/')),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Workspace {
    pub lower: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
    pub volume: Option<Volume>,
}

impl Workspace {
    pub fn new(paths: &Paths, image: &str, name: &str, volume: Option<Volume>) -> Self {
        Self {
            lower: paths.image_layer(image),
            upper: paths.write_layer(name),
            work: paths.work_dir(name),
            merged: paths.merged_dir(name),
            volume,
        }
    }

    /// Extract the image tarball into the shared lower layer if it hasn't
    /// been already, build the upper/work/merged dirs, mount the overlay,
    /// and bind-mount the volume if one was requested.
    pub fn prepare(&self, image_tar: &Path) -> Result<()> {
        if !self.lower.exists() {
            extract_image(image_tar, &self.lower)
                .with_context(|| format!("extracting image {}", image_tar.display()))?;
        }
        create_dir_all(&self.upper).context("creating overlay upperdir")?;
        create_dir_all(&self.work).context("creating overlay workdir")?;
        create_dir_all(&self.merged).context("creating overlay merged dir")?;

        let lowerdir = self
            .lower
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-utf8 lowerdir"))?;
        let upperdir = self
            .upper
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-utf8 upperdir"))?;
        let workdir = self
            .work
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-utf8 workdir"))?;
        let data = format!("lowerdir={lowerdir},upperdir={upperdir},workdir={workdir}");
        mount(
            Some("overlay"),
            &self.merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(data.as_str()),
        )
        .context("mounting overlay")?;

        if let Some(volume) = &self.volume {
            let target = self.merged.join(&volume.container);
            create_dir_all(&volume.host).context("creating volume host dir")?;
            create_dir_all(&target).context("creating volume container dir")?;
            mount(
                Some(&volume.host),
                &target,
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )
            .with_context(|| format!("bind-mounting volume onto {}", target.display()))?;
        }
        Ok(())
    }

    /// Tear down in strict reverse order. Failures are logged, not
    /// propagated, so the operator is left with a partially- rather than
    /// un-cleaned workspace.
    pub fn teardown(&self) {
        if let Some(volume) = &self.volume {
            let target = self.merged.join(&volume.container);
            if let Err(err) = umount2(&target, MntFlags::MNT_DETACH) {
                warn!(path = %target.display(), "failed to unmount volume: {err}");
            }
        }
        if let Err(err) = umount2(&self.merged, MntFlags::MNT_DETACH) {
            warn!(path = %self.merged.display(), "failed to unmount overlay: {err}");
        }
        for dir in [&self.upper, &self.work, &self.merged] {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %dir.display(), "failed to remove overlay dir: {err}");
                }
            }
        }
    }
}

/// Extract `tar` into `dest`, stripping the first path component of every
/// entry (equivalent to `tar --strip-components=1`).
fn extract_image(tar_path: &Path, dest: &Path) -> Result<()> {
    create_dir_all(dest)?;
    let file = File::open(tar_path)
        .with_context(|| format!("opening image tarball {}", tar_path.display()))?;
    let mut archive = tar::Archive::new(file);
    archive.set_preserve_permissions(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let mut components = path.components();
        components.next();
        let stripped: PathBuf = components.collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        entry.unpack(dest.join(stripped))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volume_spec() {
        let v = Volume::parse("/tmp/hostdir:/data").unwrap();
        assert_eq!(v.host, PathBuf::from("/tmp/hostdir"));
        assert_eq!(v.container, PathBuf::from("data"));
    }

    #[test]
    fn rejects_malformed_volume_spec() {
        assert!(Volume::parse("").is_none());
        assert!(Volume::parse("noColonHere").is_none());
        assert!(Volume::parse(":/data").is_none());
    }
}
