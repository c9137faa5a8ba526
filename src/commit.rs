//! `commit CONTAINER IMAGE` — a thin wrapper over the `tar` crate, out of
//! scope for deeper design per spec.md §1. Resolves the Open Question in
//! SPEC_FULL.md/spec.md §9: this takes both a container and an image name
//! (the record-aware form), not the simpler image-only form the original
//! `cmd/commit.go` shows, which spec.md explicitly calls out as ambiguous
//! and not to be implemented.

use std::fs::File;

use anyhow::Context;

use crate::config::Paths;
use crate::registry::Registry;
use crate::Result;

pub fn commit(paths: Paths, container: &str, image: &str) -> Result<()> {
    let registry = Registry::new(paths.clone());
    let record = registry.load(container)?;
    let merged = paths.merged_dir(&record.name);
    let dest = paths.image_tar(image);

    let file = File::create(&dest)
        .with_context(|| format!("creating image tarball {}", dest.display()))?;
    let mut builder = tar::Builder::new(file);
    builder
        .append_dir_all(".", &merged)
        .with_context(|| format!("archiving {}", merged.display()))?;
    builder.finish().context("finishing image tarball")
}
