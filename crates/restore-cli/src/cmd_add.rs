// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::{IntoDiagnostic, Result};

use crate::manifest_file::ManifestPath;

/// Add one or more paths (files, directories, or whole trees) to the
/// manifest, unbound. Run `match` afterward to pick handlers for them.
#[derive(Debug, Args)]
pub struct CmdAdd {
    #[clap(flatten)]
    manifest: ManifestPath,

    /// Follow symlinks: a symlinked directory is walked into, and a
    /// symlink's target is added alongside the link itself.
    #[clap(short = 'L', long)]
    follow_symlinks: bool,

    /// Files or directories to add.
    #[clap(required = true)]
    paths: Vec<String>,
}

impl CmdAdd {
    pub fn run(&self) -> Result<i32> {
        let mut manifest = self.manifest.load_or_new()?;
        let before = manifest.len();
        for path in &self.paths {
            manifest.add_file_tree(path, self.follow_symlinks).into_diagnostic()?;
        }
        let added = manifest.len() - before;
        self.manifest.save(&manifest)?;
        tracing::info!(added, total = manifest.len(), "updated manifest");
        Ok(0)
    }
}
