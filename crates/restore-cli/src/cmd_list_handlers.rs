// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use colored::Colorize;
use miette::Result;
use restore_core::handler;

/// List every registered handler, in priority order.
#[derive(Debug, Args)]
pub struct CmdListHandlers;

impl CmdListHandlers {
    pub fn run(&self) -> Result<i32> {
        for kind in handler::all_handlers() {
            println!("{}", kind.name().bold());
        }
        Ok(0)
    }
}
