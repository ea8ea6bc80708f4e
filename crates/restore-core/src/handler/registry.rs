// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Assembles the handler kinds into the priority-ordered list the matcher
//! walks. Mirrors the original's `FIRST_HANDLERS` / `_DEFAULT_HANDLERS` /
//! `LAST_HANDLERS` split: a couple of handlers must run first or last to
//! keep the rest of the logic well-defined, and everything else competes
//! in between.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::basics::{BasicDirectoryKind, BasicFileKind, HandledByParentKind, SymbolicLinkKind};
use super::git::{GitBundleKind, GitCloneKind};
use super::ignore::IgnoreKind;
use super::packages::PacmanKind;
use super::youtube::YoutubeKind;
use super::HandlerKind;

// `HandledByParent` must run first: if it didn't, a more specific handler
// could steal a path a parent already promised to restore.
static FIRST: Lazy<Vec<Arc<dyn HandlerKind>>> = Lazy::new(|| vec![Arc::new(HandledByParentKind)]);

// Order among these matters for priority but not for correctness:
// `GitCloneKind` is listed ahead of `GitBundleKind` so a repository with a
// usable remote prefers the cheap clone over bundling its entire history
// into the archive. This is the list a caller extends, replaces, or filters
// by name (spec.md §4.1's `MIDDLE`).
static MIDDLE: Lazy<Vec<Arc<dyn HandlerKind>>> = Lazy::new(|| {
    vec![
        Arc::new(PacmanKind),
        Arc::new(IgnoreKind),
        Arc::new(GitCloneKind),
        Arc::new(GitBundleKind),
        Arc::new(YoutubeKind),
    ]
});

// These must run last: they match almost anything (any symlink, any
// directory, any file), so anything more specific needs first refusal.
static LAST: Lazy<Vec<Arc<dyn HandlerKind>>> = Lazy::new(|| {
    vec![
        Arc::new(SymbolicLinkKind),
        Arc::new(BasicDirectoryKind),
        Arc::new(BasicFileKind),
    ]
});

static REGISTRY: Lazy<Vec<Arc<dyn HandlerKind>>> =
    Lazy::new(|| FIRST.iter().chain(MIDDLE.iter()).chain(LAST.iter()).cloned().collect());

static BY_NAME: Lazy<HashMap<&'static str, Arc<dyn HandlerKind>>> =
    Lazy::new(|| REGISTRY.iter().map(|h| (h.name(), h.clone())).collect());

/// The full handler kind list, in priority order: `FIRST` then `MIDDLE`
/// then `LAST`, matching the registry's default composition.
pub fn all_handlers() -> &'static [Arc<dyn HandlerKind>] {
    &REGISTRY
}

/// The always-first handlers (just `handled-by-parent` today).
pub fn first_handlers() -> &'static [Arc<dyn HandlerKind>] {
    &FIRST
}

/// The user-selectable middle of the priority list: packages, ignore, and
/// the git handlers, by default.
pub fn middle_handlers() -> &'static [Arc<dyn HandlerKind>] {
    &MIDDLE
}

/// The always-last fallback handlers (symlink, then directory, then file).
pub fn last_handlers() -> &'static [Arc<dyn HandlerKind>] {
    &LAST
}

/// Compose a priority list the way the CLI's `match` subcommand does:
/// `FIRST` and `LAST` included unless `include_common` is false, `MIDDLE`
/// filtered down to `names` if non-empty (otherwise the full default
/// middle list).
pub fn priority_list(include_common: bool, names: &[String]) -> Vec<Arc<dyn HandlerKind>> {
    let middle: Vec<Arc<dyn HandlerKind>> = if names.is_empty() {
        MIDDLE.clone()
    } else {
        MIDDLE.iter().filter(|h| names.iter().any(|n| n == h.name())).cloned().collect()
    };
    if include_common {
        FIRST.iter().cloned().chain(middle).chain(LAST.iter().cloned()).collect()
    } else {
        middle
    }
}

/// Look up a handler kind by its manifest-format name.
pub fn by_name(name: &str) -> Option<Arc<dyn HandlerKind>> {
    BY_NAME.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handled_by_parent_runs_first() {
        assert_eq!(all_handlers()[0].name(), "parent");
    }

    #[test]
    fn fallback_handlers_run_last() {
        let names: Vec<&str> = all_handlers().iter().map(|h| h.name()).collect();
        let tail = &names[names.len() - 3..];
        assert_eq!(tail, ["symbolic-link", "basic-directory", "basic-file"]);
    }

    #[test]
    fn by_name_finds_every_registered_kind() {
        for handler in all_handlers() {
            assert!(by_name(handler.name()).is_some());
        }
        assert!(by_name("does-not-exist").is_none());
    }
}
