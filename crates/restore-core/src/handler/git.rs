// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Handlers for git repositories: re-clone from a remote when one exists,
//! otherwise fall back to shipping the repository's own history as a
//! bundle inside the archive.

use std::sync::Arc;
use std::collections::{BTreeMap, BTreeSet};
use std::process::{Command, Stdio};

use crate::handler::{Args, FileInfo, Handler, HandlerKind, MatchContext};
use crate::{Error, Result};

fn git(target: &str, args: &[&str]) -> Result<String> {
    let dir = if std::path::Path::new(target).is_dir() {
        target
    } else {
        crate::path::parent(target).as_deref().unwrap_or(".")
    };
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Subprocess {
            program: format!("git {}", args.join(" ")),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(Error::Subprocess {
            program: format!("git {}", args.join(" ")),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

/// For a path, try to find the repository it belongs to.
///
/// Returns `Some((bare, repo_root))`, or `None` if the path is not part of
/// a repository. As a fast path (avoiding a `git` invocation for every
/// candidate directory) this only looks at paths that either end in
/// `.git` or contain a `.git` subdirectory -- the convention every bare or
/// non-bare repository in practice follows.
fn try_get_repo(path: &str) -> Option<(bool, String)> {
    let looks_like_repo =
        path.ends_with(".git") || std::path::Path::new(path).join(".git").is_dir();
    if !looks_like_repo {
        return None;
    }
    if let Ok(toplevel) = git(path, &["rev-parse", "--show-toplevel"]) {
        if !toplevel.is_empty() {
            return Some((false, toplevel));
        }
    }
    if let Ok(git_dir) = git(path, &["rev-parse", "--git-dir"]) {
        let abs = std::fs::canonicalize(&git_dir).ok()?;
        return Some((true, abs.to_string_lossy().into_owned()));
    }
    None
}

fn remotes(path: &str) -> Vec<String> {
    git(path, &["remote"])
        .map(|out| out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
        .unwrap_or_default()
}

fn fetch_url(path: &str, remote_name: &str) -> Result<String> {
    let info = git(path, &["remote", "show", "-n", remote_name])?;
    info.lines()
        .find_map(|line| line.strip_prefix("  Fetch URL: "))
        .map(str::to_string)
        .ok_or_else(|| Error::other(format!("bad output from git remote show {remote_name}")))
}

fn remote_is_local(remote: &str) -> bool {
    remote.starts_with("file://") || remote.split(':').next().is_some_and(|s| s.contains('/'))
}

/// Matches a git repository's top level (or git dir, if bare) that has at
/// least one remote. Restoring re-clones from that remote -- fast and
/// simple, but loses anything not pushed: unpushed commits, uncommitted
/// changes, untracked files, per-repo hooks and config.
#[derive(Debug)]
pub struct GitCloneKind;

#[derive(Debug)]
pub struct GitCloneHandler {
    path: String,
    remote: String,
    bare: bool,
}

impl HandlerKind for GitCloneKind {
    fn name(&self) -> &'static str {
        "git-clone"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        if !ctx.metadata().map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(None);
        }
        let Some((bare, repo)) = try_get_repo(ctx.path) else {
            return Ok(None);
        };
        if repo != ctx.path {
            return Ok(None);
        }
        let remotes = remotes(ctx.path);
        if remotes.is_empty() {
            return Ok(None);
        }
        let remote_name = if remotes.iter().any(|r| r == "origin") {
            "origin"
        } else {
            remotes[0].as_str()
        };
        let remote = fetch_url(ctx.path, remote_name)?;
        Ok(Some(Args::with_positional([remote]).set("bare", bare.to_string())))
    }

    fn construct(&self, path: String, args: Args) -> Result<Arc<dyn Handler>> {
        let remote = args
            .positional(0)
            .ok_or_else(|| Error::other("git-clone handler requires a remote"))?
            .to_string();
        let bare = args.get("bare").map(|v| v == "true").unwrap_or(false);
        Ok(Arc::new(GitCloneHandler { path, remote, bare }))
    }
}

impl Handler for GitCloneHandler {
    fn kind_name(&self) -> &'static str {
        "git-clone"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn restores_contents(&self) -> bool {
        true
    }

    fn get_args(&self) -> Args {
        Args::with_positional([self.remote.clone()]).set("bare", self.bare.to_string())
    }

    fn get_depends(&self) -> BTreeSet<String> {
        let mut depends = BTreeSet::new();
        if let Some(parent) = crate::path::parent(&self.path) {
            depends.insert(parent);
        }
        if remote_is_local(&self.remote) {
            let local = self.remote.strip_prefix("file://").unwrap_or(&self.remote);
            depends.insert(local.to_string());
        }
        depends
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let mut args = vec!["clone"];
        if self.bare {
            args.push("--bare");
        }
        args.push(&self.remote);
        args.push(&self.path);
        let status = Command::new("git")
            .args(&args)
            .status()
            .map_err(|e| Error::Subprocess {
                program: "git clone".to_string(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(Error::Subprocess {
                program: "git clone".to_string(),
                reason: format!("exit status {:?}", status.code()),
            });
        }
        FileInfo::restore_onto(&self.path, extra_data)
    }
}

/// Matches any git repository (bare or not), storing its full history as a
/// bundle. Tried after [`GitCloneKind`], so a repository with a usable
/// remote prefers that instead. Does not capture uncommitted changes,
/// unreferenced commits, or per-repo hooks/config.
#[derive(Debug)]
pub struct GitBundleKind;

#[derive(Debug)]
pub struct GitBundleHandler {
    path: String,
    bare: bool,
}

impl HandlerKind for GitBundleKind {
    fn name(&self) -> &'static str {
        "git-bundle"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        if !ctx.metadata().map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(None);
        }
        let Some((bare, repo)) = try_get_repo(ctx.path) else {
            return Ok(None);
        };
        if repo != ctx.path {
            return Ok(None);
        }
        Ok(Some(Args::new().set("bare", bare.to_string())))
    }

    fn construct(&self, path: String, args: Args) -> Result<Arc<dyn Handler>> {
        let bare = args.get("bare").map(|v| v == "true").unwrap_or(false);
        Ok(Arc::new(GitBundleHandler { path, bare }))
    }
}

impl Handler for GitBundleHandler {
    fn kind_name(&self) -> &'static str {
        "git-bundle"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn restores_contents(&self) -> bool {
        true
    }

    fn get_args(&self) -> Args {
        Args::new().set("bare", self.bare.to_string())
    }

    fn get_extra_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let output = Command::new("git")
            .args(["-C", &self.path, "bundle", "create", "-", "--all"])
            .output()
            .map_err(|e| Error::Subprocess {
                program: "git bundle create".to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Subprocess {
                program: "git bundle create".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let mut data = BTreeMap::new();
        data.insert("bundle".to_string(), output.stdout);
        Ok(data)
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let bundle = extra_data
            .get("bundle")
            .ok_or_else(|| Error::other("git-bundle entry missing bundle data"))?;
        let mut tmp = tempfile::NamedTempFile::new()?;
        use std::io::Write;
        tmp.write_all(bundle)?;
        tmp.flush()?;
        let status = Command::new("git")
            .args(["clone", "-o", "bundle", &tmp.path().to_string_lossy(), &self.path])
            .status()
            .map_err(|e| Error::Subprocess {
                program: "git clone".to_string(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(Error::Subprocess {
                program: "git clone -o bundle".to_string(),
                reason: format!("exit status {:?}", status.code()),
            });
        }
        FileInfo::restore_onto(&self.path, extra_data)
    }
}
