// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use miette::{IntoDiagnostic, Result};
use restore_core::archive::ArchiveReader;
use restore_core::restorer::Restorer;
use restore_core::Config;

use crate::progress::Bar;

/// Restore every path recorded in an archive, in dependency order.
#[derive(Debug, Args)]
pub struct CmdRestore {
    /// Archive to restore from.
    #[clap(default_value = "archive.tar.gz")]
    archive: PathBuf,
}

impl CmdRestore {
    pub async fn run(&self) -> Result<i32> {
        let config = Config::load().into_diagnostic()?;
        let file = std::fs::File::open(&self.archive).into_diagnostic()?;
        let reader = Arc::new(ArchiveReader::open(file).into_diagnostic()?);
        let restorer = Restorer::new(config.matching.concurrency_max, Arc::new(Bar::new("restoring")));
        reader.restore(&restorer).await.into_diagnostic()?;
        tracing::info!(archive = %self.archive.display(), "restore complete");
        Ok(0)
    }
}
