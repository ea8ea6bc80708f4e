// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::Result;

use crate::manifest_file::ManifestPath;

/// Drop manifest entries whose underlying path no longer exists on disk.
#[derive(Debug, Args)]
pub struct CmdPrune {
    #[clap(flatten)]
    manifest: ManifestPath,

    /// Report what would be removed without modifying the manifest.
    #[clap(long)]
    dry_run: bool,
}

impl CmdPrune {
    pub fn run(&self) -> Result<i32> {
        let mut manifest = self.manifest.load_or_new()?;
        let stale: Vec<String> = manifest
            .paths()
            .filter(|path| std::fs::symlink_metadata(path).is_err())
            .map(str::to_string)
            .collect();

        for path in &stale {
            tracing::info!(%path, "pruning");
            if !self.dry_run {
                manifest.remove(path);
            }
        }
        if !self.dry_run {
            self.manifest.save(&manifest)?;
        }
        println!("{} stale {}", stale.len(), if stale.len() == 1 { "entry" } else { "entries" });
        Ok(0)
    }
}
