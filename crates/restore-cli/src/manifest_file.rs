// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Loads and saves the manifest state file every subcommand but
//! `list-handlers` shares.

use std::path::PathBuf;

use clap::Args;
use miette::{IntoDiagnostic, Result};
use restore_core::manifest::Manifest;

/// Where the manifest lives on disk. Shared by every subcommand that reads
/// or writes manifest state.
#[derive(Debug, Args)]
pub struct ManifestPath {
    /// Path to the manifest state file.
    #[clap(long, global = true, env = "RESTORE_MANIFEST", default_value = "manifest")]
    pub manifest: PathBuf,
}

impl ManifestPath {
    /// Load the manifest at this path, or an empty one if it does not exist
    /// yet -- `add` and `match` both need to work against a fresh manifest
    /// on the very first run.
    pub fn load_or_new(&self) -> Result<Manifest> {
        match Manifest::loadfile(&self.manifest) {
            Ok(manifest) => Ok(manifest),
            Err(restore_core::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Manifest::new())
            }
            Err(err) => Err(err).into_diagnostic(),
        }
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        manifest.savefile(&self.manifest).into_diagnostic()
    }
}
