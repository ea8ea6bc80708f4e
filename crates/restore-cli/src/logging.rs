// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Initializes the process-wide `tracing` subscriber from the command line's
//! `-v`/`-q` flags and the `RESTORE_LOG`/`RUST_LOG` environment variables,
//! mirroring the teacher's `SPFS_LOG` convention.

use clap::Args;
use tracing_subscriber::prelude::*;

const RESTORE_LOG: &str = "RESTORE_LOG";

/// Shared logging flags, flattened into every subcommand via the top-level
/// [`crate::Opt`].
#[derive(Debug, Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once.
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence all but error-level output.
    #[clap(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Logging {
    pub fn init(&self) {
        let default_directive = if self.quiet {
            "restore=error,warn"
        } else {
            match self.verbose {
                0 => "restore=info,warn",
                1 => "restore=debug,info",
                _ => "restore=trace,debug",
            }
        };
        let filter = std::env::var(RESTORE_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| default_directive.to_string());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(self.verbose > 1)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(tracing_subscriber::filter::EnvFilter::new(filter))
            .init();
    }
}
