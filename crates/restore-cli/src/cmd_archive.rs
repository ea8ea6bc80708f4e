// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Args;
use miette::{IntoDiagnostic, Result};
use restore_core::archive::ArchiveWriter;
use restore_core::Config;

use crate::manifest_file::ManifestPath;

/// Bundle the manifest and its handlers' extra data into a single archive.
#[derive(Debug, Args)]
pub struct CmdArchive {
    #[clap(flatten)]
    manifest: ManifestPath,

    /// Where to write the archive.
    #[clap(default_value = "archive.tar.gz")]
    output: PathBuf,

    /// Compression to apply: `gz`, `bz2`, or `none`. Defaults to the
    /// configured `RESTORE_COMPRESSION` / `archive.default_compression`.
    #[clap(long)]
    compress: Option<String>,
}

impl CmdArchive {
    pub fn run(&self) -> Result<i32> {
        let config = Config::load().into_diagnostic()?;
        let compression = match &self.compress {
            Some(raw) => raw.parse::<restore_core::config::Compression>().into_diagnostic()?,
            None => config.archive.default_compression,
        };

        let manifest = restore_core::manifest::Manifest::loadfile(&self.manifest.manifest).into_diagnostic()?;
        let file = std::fs::File::create(&self.output).into_diagnostic()?;
        let mut writer = ArchiveWriter::create(file, compression);
        writer.add_manifest(&manifest).into_diagnostic()?;
        writer.finish().into_diagnostic()?;

        tracing::info!(output = %self.output.display(), entries = manifest.len(), "wrote archive");
        Ok(0)
    }
}
