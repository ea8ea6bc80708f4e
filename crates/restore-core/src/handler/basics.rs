// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! The fallback handlers every manifest ends up leaning on: plain
//! directories, plain files, symbolic links, and the "my parent already
//! covers me" marker.

use std::sync::Arc;
use std::collections::{BTreeMap, BTreeSet};

use crate::handler::{Args, FileInfo, Handler, HandlerKind, MatchContext};
use crate::{Error, Result};

/// Matches any path whose parent directory's handler declared
/// [`Handler::restores_contents`]. Restoring is a no-op: the parent's own
/// restore already produced this path.
#[derive(Debug)]
pub struct HandledByParentKind;

#[derive(Debug)]
pub struct HandledByParent {
    path: String,
}

impl HandlerKind for HandledByParentKind {
    fn name(&self) -> &'static str {
        "parent"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        let Some(parent) = crate::path::parent(ctx.path) else {
            return Ok(None);
        };
        let claims = ctx
            .manifest
            .handler_for(&parent)
            .is_some_and(|h| h.restores_contents());
        Ok(claims.then(Args::new))
    }

    fn construct(&self, path: String, _args: Args) -> Result<Arc<dyn Handler>> {
        Ok(Arc::new(HandledByParent { path }))
    }
}

impl Handler for HandledByParent {
    fn kind_name(&self) -> &'static str {
        "parent"
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

/// Fallback for directories with no more specific handler: recreated
/// empty, with mode/ownership restored.
#[derive(Debug)]
pub struct BasicDirectoryKind;

#[derive(Debug)]
pub struct BasicDirectoryHandler {
    path: String,
}

impl HandlerKind for BasicDirectoryKind {
    fn name(&self) -> &'static str {
        "basic-directory"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        Ok(ctx.metadata().ok().filter(|m| m.is_dir()).map(|_| Args::new()))
    }

    fn construct(&self, path: String, _args: Args) -> Result<Arc<dyn Handler>> {
        Ok(Arc::new(BasicDirectoryHandler { path }))
    }
}

impl Handler for BasicDirectoryHandler {
    fn kind_name(&self) -> &'static str {
        "basic-directory"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn get_extra_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut data = BTreeMap::new();
        FileInfo::capture(&self.path)?.into_extra_data(&mut data);
        Ok(data)
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        if !std::path::Path::new(&self.path).is_dir() {
            std::fs::create_dir(&self.path)?;
        }
        FileInfo::restore_onto(&self.path, extra_data)
    }
}

/// Fallback for regular files with no more specific handler: the entire
/// file content is captured verbatim as extra data.
#[derive(Debug)]
pub struct BasicFileKind;

#[derive(Debug)]
pub struct BasicFileHandler {
    path: String,
}

impl HandlerKind for BasicFileKind {
    fn name(&self) -> &'static str {
        "basic-file"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        Ok(ctx.metadata().ok().filter(|m| m.is_file()).map(|_| Args::new()))
    }

    fn construct(&self, path: String, _args: Args) -> Result<Arc<dyn Handler>> {
        Ok(Arc::new(BasicFileHandler { path }))
    }
}

impl Handler for BasicFileHandler {
    fn kind_name(&self) -> &'static str {
        "basic-file"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn get_extra_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut data = BTreeMap::new();
        data.insert("content".to_string(), std::fs::read(&self.path)?);
        FileInfo::capture(&self.path)?.into_extra_data(&mut data);
        Ok(data)
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let content = extra_data
            .get("content")
            .ok_or_else(|| Error::other("basic-file entry missing content"))?;
        std::fs::write(&self.path, content)?;
        FileInfo::restore_onto(&self.path, extra_data)
    }
}

/// Recreates a symbolic link pointing at the saved target. The target
/// string is stored as-is, broken or not: we're reproducing the link, not
/// validating it.
#[derive(Debug)]
pub struct SymbolicLinkKind;

#[derive(Debug)]
pub struct SymbolicLinkHandler {
    path: String,
}

impl HandlerKind for SymbolicLinkKind {
    fn name(&self) -> &'static str {
        "symbolic-link"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        let is_link = std::fs::symlink_metadata(ctx.path).map(|m| m.is_symlink()).unwrap_or(false);
        Ok(is_link.then(Args::new))
    }

    fn construct(&self, path: String, _args: Args) -> Result<Arc<dyn Handler>> {
        Ok(Arc::new(SymbolicLinkHandler { path }))
    }
}

impl Handler for SymbolicLinkHandler {
    fn kind_name(&self) -> &'static str {
        "symbolic-link"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn get_extra_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let target = std::fs::read_link(&self.path)?;
        let mut data = BTreeMap::new();
        data.insert(
            "target".to_string(),
            target.to_string_lossy().into_owned().into_bytes(),
        );
        Ok(data)
    }

    fn get_depends(&self) -> BTreeSet<String> {
        let mut depends = BTreeSet::new();
        if let Some(parent) = crate::path::parent(&self.path) {
            depends.insert(parent);
        }
        depends
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let target = extra_data
            .get("target")
            .ok_or_else(|| Error::other("symbolic-link entry missing target"))?;
        let target = String::from_utf8_lossy(target);
        std::os::unix::fs::symlink(target.as_ref(), &self.path)?;
        Ok(())
    }
}
