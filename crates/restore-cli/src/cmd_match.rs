// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use clap::Args;
use miette::{IntoDiagnostic, Result};
use restore_core::handler::{self, HandlerKind};
use restore_core::matcher::{AcceptAll, Matcher};
use restore_core::Config;

use crate::manifest_file::ManifestPath;
use crate::progress::Bar;

/// Match every unbound path in the manifest against the handler registry,
/// binding each to the first handler that claims it.
#[derive(Debug, Args)]
pub struct CmdMatch {
    #[clap(flatten)]
    manifest: ManifestPath,

    /// Disable the always-first (`handled-by-parent`) and always-last
    /// (`symbolic-link`, `basic-directory`, `basic-file`) fallback handlers,
    /// matching only the named or default middle handlers.
    #[clap(long)]
    no_common: bool,

    /// Comma-separated handler names to exclude from matching.
    #[clap(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Re-match paths that are already bound, not just unbound ones.
    #[clap(long)]
    overwrite: bool,

    /// Follow symlinks while matching and while expanding `--add` roots.
    #[clap(short = 'L', long)]
    follow_symlinks: bool,

    /// Recursively add and match a filesystem root in one pass, honoring
    /// each handler's `restores_contents` as it goes so a directory claimed
    /// by e.g. `git-clone` is never descended into.
    #[clap(long = "add", value_name = "PATH")]
    add_roots: Vec<String>,

    /// Restrict matching to these handler names (by default, every
    /// registered middle handler is tried).
    handlers: Vec<String>,
}

impl CmdMatch {
    pub async fn run(&self) -> Result<i32> {
        let config = Config::load().into_diagnostic()?;
        let mut manifest = self.manifest.load_or_new()?;

        if self.overwrite {
            let bound: Vec<String> = manifest
                .paths()
                .filter(|p| manifest.handler_for(p).is_some())
                .map(str::to_string)
                .collect();
            for path in bound {
                manifest.add_file(&path, None, true, false);
            }
        }

        let middle: Vec<Arc<dyn HandlerKind>> = if self.handlers.is_empty() {
            handler::middle_handlers().to_vec()
        } else {
            self.handlers
                .iter()
                .map(|name| handler::by_name(name).ok_or_else(|| restore_core::Error::UnknownHandler(name.clone())))
                .collect::<restore_core::Result<Vec<_>>>()
                .into_diagnostic()?
        };
        let middle: Vec<Arc<dyn HandlerKind>> =
            middle.into_iter().filter(|h| !self.exclude.contains(&h.name().to_string())).collect();
        let handlers: Vec<Arc<dyn HandlerKind>> = if self.no_common {
            middle
        } else {
            handler::first_handlers()
                .iter()
                .cloned()
                .chain(middle)
                .chain(handler::last_handlers().iter().cloned())
                .collect()
        };

        let matcher = Matcher::new(
            handlers,
            config.matching.concurrency_max,
            Arc::new(Bar::new("matching")),
            Arc::new(AcceptAll),
            config.matching.ignore_paths.clone(),
            self.follow_symlinks,
        );

        for root in &self.add_roots {
            matcher.add_root(&mut manifest, root).await.into_diagnostic()?;
        }

        let manifest = matcher.run(manifest).await.into_diagnostic()?;
        self.manifest.save(&manifest)?;
        tracing::info!(total = manifest.len(), "matching complete");
        Ok(0)
    }
}
