// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! The manifest: a map from filesystem path to the handler that claims it
//! (or no handler, for a path nobody has matched yet), plus the on-disk
//! serialization of that map.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use crate::handler::{self, Handler};
use crate::path::Mode;
use crate::{Error, Result};

/// Binds every path to either `Some(handler)` once matched, or `None`
/// while still awaiting a match. Entries are kept in a `BTreeMap` so
/// iteration is always in path order, matching the on-disk format's
/// sorted-by-path guarantee.
pub struct Manifest {
    files: BTreeMap<String, Option<Arc<dyn Handler>>>,
    mode: Mode,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Manifest {
            files: BTreeMap::new(),
            mode: Mode::Unset,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// The handler bound to `path`, if any (whether because it matched, or
    /// because it was explicitly added unbound).
    pub fn handler_for(&self, path: &str) -> Option<&dyn Handler> {
        self.files.get(path).and_then(|h| h.as_deref())
    }

    /// Same as [`Self::handler_for`], but returns an owned `Arc` so callers
    /// (the restorer, mainly) can hold it past the manifest's own borrow.
    pub fn handler_arc(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.files.get(path).and_then(|h| h.clone())
    }

    /// Every path in the manifest, in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Paths with no handler bound yet, in sorted order. What the matcher
    /// iterates over.
    pub fn unbound_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, h)| h.is_none())
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn normalize_for_insert(&mut self, path: &str) -> String {
        let normalized = crate::path::normalize(path);
        if self.mode == Mode::Unset {
            self.mode = Mode::from_path(&normalized);
        }
        self.normalize_existing(&normalized)
    }

    /// Same re-anchoring [`Self::normalize_for_insert`] does, without
    /// committing an unset mode -- for lookups against an existing
    /// manifest (removal, containment checks against user input) that
    /// shouldn't themselves decide absolute-vs-relative.
    fn normalize_existing(&self, path: &str) -> String {
        let normalized = crate::path::normalize(path);
        let base = std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf());
        crate::path::coerce(&normalized, self.mode, &base)
    }

    /// Remove `path` from the manifest, if present. Returns whether
    /// anything was removed. Used by `prune` to drop entries whose
    /// underlying file has disappeared since the last `add`.
    pub fn remove(&mut self, path: &str) -> bool {
        let normalized = self.normalize_existing(path);
        self.files.remove(&normalized).is_some()
    }

    /// Insert `path` bound to `handler` (or unbound, if `None`). Leaves an
    /// existing binding alone unless `overwrite` is set, matching the
    /// original format's `add_file(path, handler, overwrite=True)` default.
    ///
    /// When `follow_symlinks` is set and `path` is itself a symlink, the
    /// link target is added first (recursively, so a chain of symlinks adds
    /// every hop), resolved relative to the link's own directory when the
    /// target is not already absolute. Returns every path actually inserted
    /// -- just `path` normally, or `path` plus whatever the symlink chain
    /// added when `follow_symlinks` applies.
    pub fn add_file(
        &mut self,
        path: &str,
        handler: Option<Arc<dyn Handler>>,
        overwrite: bool,
        follow_symlinks: bool,
    ) -> BTreeSet<String> {
        let mut added = BTreeSet::new();
        if follow_symlinks {
            if let Some(target) = resolve_symlink_target(path) {
                added.extend(self.add_file(&target, None, false, true));
            }
        }
        let normalized = self.normalize_for_insert(path);
        if overwrite || !self.files.contains_key(&normalized) {
            self.files.insert(normalized.clone(), handler);
        }
        added.insert(normalized);
        added
    }

    /// Recursively add every directory and file under `root`, unbound,
    /// skipping anything already present. If `root` is not itself a
    /// directory (e.g. a plain file, or a symlink to one), it is added
    /// directly via [`Self::add_file`] instead of walked. `follow_symlinks`
    /// controls both whether a symlinked directory is walked into during
    /// the tree walk and whether a non-directory root's link target is
    /// added alongside it.
    pub fn add_file_tree(&mut self, root: &str, follow_symlinks: bool) -> Result<()> {
        let is_dir = if follow_symlinks {
            std::fs::metadata(root).map(|m| m.is_dir()).unwrap_or(false)
        } else {
            std::fs::symlink_metadata(root).map(|m| m.is_dir()).unwrap_or(false)
        };
        if !is_dir {
            self.add_file(root, None, false, follow_symlinks);
            return Ok(());
        }
        let walker = walkdir::WalkDir::new(root).follow_links(follow_symlinks);
        for entry in walker {
            let entry = entry?;
            let path = entry.path().to_string_lossy().into_owned();
            self.add_file(&path, None, false, false);
        }
        Ok(())
    }

    /// Render the on-disk format: one line per path, sorted, as
    /// `"<json-escaped path>"\t<handler name>\t<args>`. An unbound path
    /// uses the handler name `none` with empty args.
    pub fn dump(&self) -> String {
        let mut output = String::new();
        for (path, handler) in &self.files {
            let (name, argstr) = match handler {
                Some(h) => (h.kind_name().to_string(), h.get_args().render()),
                None => ("none".to_string(), String::new()),
            };
            let escaped_path = serde_json::to_string(path).expect("string serialization cannot fail");
            output.push_str(&escaped_path);
            output.push('\t');
            output.push_str(&name);
            output.push('\t');
            output.push_str(&argstr);
            output.push('\n');
        }
        output
    }

    /// Parse the on-disk format produced by [`Self::dump`], inserting each
    /// entry with the given `overwrite` policy.
    pub fn load(&mut self, data: &str, overwrite: bool) -> Result<()> {
        for (line_no, line) in data.split('\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, '\t');
            let (Some(raw_path), Some(name), Some(argstr)) = (fields.next(), fields.next(), fields.next()) else {
                return Err(Error::BadManifestLine {
                    line_no,
                    reason: "expected 3 tab-separated fields".to_string(),
                });
            };
            let path: String = serde_json::from_str(raw_path).map_err(|e| Error::BadManifestLine {
                line_no,
                reason: format!("bad path encoding: {e}"),
            })?;
            let handler = if name == "none" {
                None
            } else {
                let kind = handler::by_name(name).ok_or_else(|| Error::BadManifestLine {
                    line_no,
                    reason: format!("unknown handler {name:?}"),
                })?;
                let args = handler::Args::parse(argstr);
                Some(kind.construct(path.clone(), args).map_err(|e| Error::BadManifestLine {
                    line_no,
                    reason: e.to_string(),
                })?)
            };
            self.add_file(&path, handler, overwrite, false);
        }
        Ok(())
    }

    pub fn savefile(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.dump())?;
        Ok(())
    }

    pub fn loadfile(path: &Path) -> Result<Self> {
        let mut manifest = Manifest::new();
        let data = std::fs::read_to_string(path)?;
        manifest.load(&data, true)?;
        Ok(manifest)
    }
}

/// The path a symlink at `path` points to, resolved against the link's own
/// directory if the target is relative. `None` if `path` does not exist or
/// is not a symlink -- either is an ordinary "nothing to follow", not an
/// error.
fn resolve_symlink_target(path: &str) -> Option<String> {
    let target = std::fs::read_link(path).ok()?;
    if target.is_absolute() {
        return Some(target.to_string_lossy().into_owned());
    }
    let dir = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
    Some(dir.join(target).to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_sorts_by_path_and_marks_unbound_as_none() {
        let mut manifest = Manifest::new();
        manifest.add_file("/b", None, true, false);
        manifest.add_file("/a", None, true, false);
        let dump = manifest.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "\"/a\"\tnone\t");
        assert_eq!(lines[1], "\"/b\"\tnone\t");
    }

    #[test]
    fn load_roundtrips_unbound_entries() {
        let mut manifest = Manifest::new();
        manifest.add_file("/a", None, true, false);
        manifest.add_file("/b", None, true, false);
        let dump = manifest.dump();

        let mut loaded = Manifest::new();
        loaded.load(&dump, true).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("/a"));
        assert!(loaded.contains("/b"));
    }

    #[test]
    fn add_file_respects_overwrite_flag() {
        let mut manifest = Manifest::new();
        manifest.add_file("/a", None, true, false);
        assert!(manifest.handler_for("/a").is_none());

        // second add with overwrite=false on an already-present path is a
        // no-op even when a handler is supplied
        let kind = handler::by_name("ignore").unwrap();
        let h = kind.construct("/a".to_string(), handler::Args::new()).unwrap();
        manifest.add_file("/a", Some(h), false, false);
        assert!(manifest.handler_for("/a").is_none());
    }

    #[test]
    fn load_rejects_malformed_lines() {
        let mut manifest = Manifest::new();
        let err = manifest.load("not-enough-fields", true).unwrap_err();
        assert!(matches!(err, Error::BadManifestLine { .. }));
    }

    #[test]
    fn add_file_normalizes_equivalent_paths_to_one_key() {
        let mut a = Manifest::new();
        a.add_file("/a/b/../c", None, true, false);
        let mut b = Manifest::new();
        b.add_file("/a/c", None, true, false);
        assert_eq!(a.paths().collect::<Vec<_>>(), b.paths().collect::<Vec<_>>());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn absolute_add_commits_mode_then_coerces_relative_add() {
        let mut manifest = Manifest::new();
        manifest.add_file("/etc/hosts", None, true, false);
        assert_eq!(manifest.mode(), crate::path::Mode::Absolute);
        manifest.add_file("etc/motd", None, true, false);
        let base = std::env::current_dir().unwrap();
        assert!(manifest.contains(&format!("{}/etc/motd", base.display())));
    }

    #[test]
    fn add_file_follows_symlink_target_before_the_link_itself() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("b");
        std::fs::write(&target, b"hi").unwrap();
        let link = dir.path().join("a");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut manifest = Manifest::new();
        let added = manifest.add_file(&link.to_string_lossy(), None, true, true);
        assert_eq!(added.len(), 2);
        assert!(manifest.contains(&target.to_string_lossy()));
        assert!(manifest.contains(&link.to_string_lossy()));
    }

    #[test]
    fn add_file_tree_on_symlinked_file_root_adds_both_paths() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("b");
        std::fs::write(&target, b"hi").unwrap();
        let link = dir.path().join("a");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut manifest = Manifest::new();
        manifest.add_file_tree(&link.to_string_lossy(), true).unwrap();
        assert!(manifest.contains(&target.to_string_lossy()));
        assert!(manifest.contains(&link.to_string_lossy()));
    }
}
