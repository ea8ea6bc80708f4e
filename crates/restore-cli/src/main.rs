// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Command line interface for `restore`: builds and matches a manifest
//! against the filesystem, then bundles or replays it as an archive.

mod cmd_add;
mod cmd_archive;
mod cmd_list_handlers;
mod cmd_match;
mod cmd_prune;
mod cmd_restore;
mod logging;
mod manifest_file;
mod progress;

use clap::{Parser, Subcommand};
use miette::Result;

/// Describe files by how to re-create them, and bundle the description into
/// a restorable archive.
#[derive(Debug, Parser)]
#[clap(about, version)]
struct Opt {
    #[clap(flatten)]
    logging: logging::Logging,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Add(cmd_add::CmdAdd),
    Prune(cmd_prune::CmdPrune),
    Match(cmd_match::CmdMatch),
    ListHandlers(cmd_list_handlers::CmdListHandlers),
    Restore(cmd_restore::CmdRestore),
    Archive(cmd_archive::CmdArchive),
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    opt.logging.init();

    let code = match &opt.cmd {
        Command::Add(cmd) => cmd.run()?,
        Command::Prune(cmd) => cmd.run()?,
        Command::Match(cmd) => cmd.run().await?,
        Command::ListHandlers(cmd) => cmd.run()?,
        Command::Restore(cmd) => cmd.run().await?,
        Command::Archive(cmd) => cmd.run()?,
    };
    std::process::exit(code);
}
