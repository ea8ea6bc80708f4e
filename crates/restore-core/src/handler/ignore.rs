// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Matches transient paths that should not be re-created at all: build
//! artifacts, caches, and well-known pseudo-filesystems.

use std::sync::Arc;
use std::collections::BTreeMap;

use crate::handler::{Args, Handler, HandlerKind, MatchContext};
use crate::Result;

/// Extensions treated as disposable regardless of location.
const MATCH_EXTENSIONS: &[&str] = &[".pyc", ".swp"];

/// Hard-coded paths known to hold transient files. Extended at runtime by
/// `matching.ignore_paths` (env `MATCH_IGNORE`).
const MATCH_PATHS: &[&str] = &[
    "/dev", "/proc", "/sys", "/tmp", "/run", "/var/tmp", "/var/run", "/var/lock", "/var/cache",
];

#[derive(Debug)]
pub struct IgnoreKind;

#[derive(Debug)]
pub struct IgnoreHandler {
    path: String,
}

impl HandlerKind for IgnoreKind {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        let matches_extension = MATCH_EXTENSIONS.iter().any(|ext| ctx.path.ends_with(ext));
        let matches_path = MATCH_PATHS.contains(&ctx.path) || ctx.ignore_paths.iter().any(|p| p == ctx.path);
        Ok((matches_extension || matches_path).then(Args::new))
    }

    fn construct(&self, path: String, _args: Args) -> Result<Arc<dyn Handler>> {
        Ok(Arc::new(IgnoreHandler { path }))
    }
}

impl Handler for IgnoreHandler {
    fn kind_name(&self) -> &'static str {
        "ignore"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn restores_contents(&self) -> bool {
        true
    }

    fn restore(&self, _extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    #[test]
    fn matches_known_extensions() {
        let manifest = Manifest::new();
        let ctx = MatchContext {
            path: "/home/user/module.pyc",
            manifest: &manifest,
            follow_symlinks: false,
            ignore_paths: &[],
        };
        assert!(IgnoreKind.try_match(&ctx).unwrap().is_some());
    }

    #[test]
    fn matches_configured_extra_path() {
        let manifest = Manifest::new();
        let extra = vec!["/mnt/scratch".to_string()];
        let ctx = MatchContext {
            path: "/mnt/scratch",
            manifest: &manifest,
            follow_symlinks: false,
            ignore_paths: &extra,
        };
        assert!(IgnoreKind.try_match(&ctx).unwrap().is_some());

        let ctx_miss = MatchContext { path: "/mnt/other", ..ctx };
        assert!(IgnoreKind.try_match(&ctx_miss).unwrap().is_none());
    }
}
