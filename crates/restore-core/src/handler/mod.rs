// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! The handler contract: matching a path, describing how to reconstruct it,
//! and actually reconstructing it.

pub mod basics;
pub mod git;
pub mod ignore;
pub mod packages;
mod registry;
pub mod youtube;

use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use nix::unistd::{Gid, Group, Uid, User};

use crate::manifest::Manifest;
use crate::{Error, Result};

pub use registry::{
    all_handlers, by_name, first_handlers, last_handlers, middle_handlers, priority_list,
};

/// Positional and keyword arguments a handler's `get_args`/constructor pair
/// exchange. Everything is a string: the manifest format is meant to be
/// hand-editable, not typed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub positional: Vec<String>,
    pub keyword: BTreeMap<String, String>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            positional: args.into_iter().map(Into::into).collect(),
            keyword: BTreeMap::new(),
        }
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.keyword.insert(key.to_string(), value.into());
        self
    }

    pub fn set_opt(mut self, key: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(v) = value {
            self.keyword.insert(key.to_string(), v.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keyword.get(key).map(String::as_str)
    }

    pub fn positional(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    /// Render as the comma-separated `a, b, key=value` form used in the
    /// manifest's on-disk format. Internal whitespace is preserved, leading
    /// and trailing whitespace around each item is not.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.positional.clone();
        parts.extend(self.keyword.iter().map(|(k, v)| format!("{k}={v}")));
        parts.join(", ")
    }

    /// Parse the comma-separated form back into args. `key=value` pairs
    /// become keyword args, anything else is positional.
    pub fn parse(raw: &str) -> Self {
        let mut positional = Vec::new();
        let mut keyword = BTreeMap::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((k, v)) => {
                    keyword.insert(k.trim().to_string(), v.trim().to_string());
                }
                None => positional.push(part.to_string()),
            }
        }
        Args { positional, keyword }
    }
}

/// Everything a [`HandlerKind::try_match`] implementation needs to look at:
/// the path under consideration, the filesystem metadata already gathered
/// by the matcher for it, and read-only access to the manifest built so
/// far (so e.g. `HandledByParent` can look up its parent's binding).
pub struct MatchContext<'a> {
    pub path: &'a str,
    pub manifest: &'a Manifest,
    pub follow_symlinks: bool,
    pub ignore_paths: &'a [String],
}

impl<'a> MatchContext<'a> {
    pub fn metadata(&self) -> std::io::Result<std::fs::Metadata> {
        if self.follow_symlinks {
            std::fs::metadata(self.path)
        } else {
            std::fs::symlink_metadata(self.path)
        }
    }
}

/// A concrete binding between a path and the handler that claimed it.
/// Object-safe: this is what the matcher and restorer hold and invoke, as
/// opposed to [`HandlerKind`], which is the static, stateless "can this
/// kind claim this path" side of the contract.
pub trait Handler: Send + Sync + std::fmt::Debug {
    /// Stable identifier used in the manifest's on-disk format.
    fn kind_name(&self) -> &'static str;

    fn path(&self) -> &str;

    /// Arguments that would reconstruct an identical handler if passed
    /// back through [`HandlerKind::construct`].
    fn get_args(&self) -> Args {
        Args::new()
    }

    /// Data gathered at backup time, keyed by name, bundled verbatim into
    /// the archive alongside the manifest entry for this path.
    fn get_extra_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(BTreeMap::new())
    }

    /// Paths that must be fully restored before this handler's `restore`
    /// runs. Always includes the parent directory.
    fn get_depends(&self) -> std::collections::BTreeSet<String> {
        let mut depends = std::collections::BTreeSet::new();
        if let Some(parent) = crate::path::parent(self.path()) {
            depends.insert(parent);
        }
        depends
    }

    /// Whether paths nested under this one are implicitly restored as a
    /// side effect of restoring this path (a directory recreated by a
    /// package install, a git clone's working tree, …). Handlers that set
    /// this cause the matcher to bind `HandledByParent` to their children
    /// instead of matching them independently.
    fn restores_contents(&self) -> bool {
        false
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()>;
}

/// The static, stateless side of a handler: whether a given path belongs to
/// it, and how to build the [`Handler`] instance that claimed it. One
/// `HandlerKind` impl per handler name; the registry holds one instance of
/// each, found via [`all_handlers`]/[`by_name`].
pub trait HandlerKind: Send + Sync {
    fn name(&self) -> &'static str;

    /// Investigate `ctx.path` and decide whether this kind claims it.
    /// Returns the args that would be passed to [`Self::construct`] on a
    /// match, or `None` to decline.
    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>>;

    fn construct(&self, path: String, args: Args) -> Result<Arc<dyn Handler>>;
}

/// Owner/group/mode bookkeeping shared by handlers that need to restore
/// ordinary file metadata (directories, regular files, git worktrees, …).
/// Owner and group are captured by name rather than id, since uids/gids
/// rarely match across machines; a file whose owner has no matching name
/// on this machine is saved with no owner at all.
#[derive(Clone, Debug, Default)]
pub struct FileInfo {
    pub mode: u32,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl FileInfo {
    pub fn capture(path: &str) -> Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        let mode = metadata.mode() & 0o7777;
        let owner = User::from_uid(Uid::from_raw(metadata.uid()))
            .map_err(Error::from)?
            .map(|u| u.name);
        let group = Group::from_gid(Gid::from_raw(metadata.gid()))
            .map_err(Error::from)?
            .map(|g| g.name);
        Ok(FileInfo { mode, owner, group })
    }

    pub fn into_extra_data(self, extra_data: &mut BTreeMap<String, Vec<u8>>) {
        extra_data.insert("mode".to_string(), self.mode.to_string().into_bytes());
        if let Some(owner) = self.owner {
            extra_data.insert("owner".to_string(), owner.into_bytes());
        }
        if let Some(group) = self.group {
            extra_data.insert("group".to_string(), group.into_bytes());
        }
    }

    /// Apply `mode`/`owner`/`group` from a restored `extra_data` map onto
    /// `path`, skipping anything that already matches (so restoring into a
    /// freshly-created file doesn't churn syscalls for no reason) and
    /// skipping an owner/group that was never saved to begin with.
    pub fn restore_onto(path: &str, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let current = std::fs::symlink_metadata(path)?;
        if let Some(raw_mode) = extra_data.get("mode") {
            let mode: u32 = std::str::from_utf8(raw_mode)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::other("bad mode in extra data"))?;
            if current.mode() & 0o7777 != mode {
                nix::sys::stat::fchmodat(
                    None,
                    Path::new(path),
                    nix::sys::stat::Mode::from_bits_truncate(mode),
                    nix::sys::stat::FchmodatFlags::FollowSymlink,
                )
                .map_err(Error::from)?;
            }
        }
        let owner = match extra_data.get("owner") {
            Some(raw) => {
                let name = String::from_utf8_lossy(raw);
                User::from_name(&name)
                    .map_err(Error::from)?
                    .map(|u| u.uid)
            }
            None => None,
        };
        let group = match extra_data.get("group") {
            Some(raw) => {
                let name = String::from_utf8_lossy(raw);
                Group::from_name(&name)
                    .map_err(Error::from)?
                    .map(|g| g.gid)
            }
            None => None,
        };
        let uid_changed = owner.is_some_and(|uid| uid.as_raw() != current.uid());
        let gid_changed = group.is_some_and(|gid| gid.as_raw() != current.gid());
        if uid_changed || gid_changed {
            nix::unistd::chown(path, owner, group).map_err(Error::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_render_roundtrips_through_parse() {
        let args = Args::with_positional(["hello world"]).set("foo", "bar");
        let rendered = args.render();
        assert_eq!(rendered, "hello world, foo=bar");
        let parsed = Args::parse(&rendered);
        assert_eq!(parsed, args);
    }

    #[test]
    fn args_parse_trims_whitespace_but_not_internal() {
        let parsed = Args::parse("hello world , foo =bar");
        assert_eq!(parsed.positional, vec!["hello world".to_string()]);
        assert_eq!(parsed.get("foo"), Some("bar"));
    }
}
