// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Handlers for paths owned by a system package manager: restoring means
//! reinstalling the package, not copying the file back.
//!
//! Building the "what package owns this file" index is expensive (a full
//! package database scan), so it is built once, lazily, on first use, and
//! shared by every path asking the same package manager. A path looked up
//! while the index is still being built waits on that specific path's slot
//! rather than blocking on the whole scan, and resolves to "no package"
//! the moment the index finishes without ever having seen the path -- it
//! never waits forever on a path the index will never produce.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::Notify;

use crate::handler::{Args, Handler, HandlerKind, MatchContext};
use crate::{Error, Result};

/// Shared state for one package manager's file-to-package index.
struct PackageIndex {
    packages: DashMap<String, String>,
    done: AtomicBool,
    notify: Notify,
    started: AtomicBool,
}

impl PackageIndex {
    fn new() -> Self {
        Self {
            packages: DashMap::new(),
            done: AtomicBool::new(false),
            notify: Notify::new(),
            started: AtomicBool::new(false),
        }
    }

    fn set(&self, path: String, package: String) {
        self.packages.insert(path, package);
        self.notify.notify_waiters();
    }

    fn finish(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolve the package owning `path`, waiting for the index to either
    /// record it or finish entirely if it is not yet known.
    async fn get(&self, path: &str) -> Option<String> {
        loop {
            if let Some(package) = self.packages.get(path) {
                return Some(package.clone());
            }
            if self.done.load(Ordering::SeqCst) {
                return None;
            }
            let notified = self.notify.notified();
            // Re-check after subscribing, in case the index finished or
            // recorded our path between the checks above and here.
            if let Some(package) = self.packages.get(path) {
                return Some(package.clone());
            }
            if self.done.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }
}

/// A package manager capable of indexing which package owns which file,
/// checking whether a package is installed, and installing it.
#[async_trait::async_trait]
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scan the package database and call `set` for every file it owns.
    async fn index_packages(&self, set: &dyn Fn(String, String) + Send + Sync) -> Result<()>;

    async fn is_installed(&self, package: &str) -> Result<bool>;

    async fn install(&self, package: &str) -> Result<()>;
}

fn index_registry() -> &'static DashMap<&'static str, Arc<PackageIndex>> {
    static REGISTRY: Lazy<DashMap<&'static str, Arc<PackageIndex>>> = Lazy::new(DashMap::new);
    &REGISTRY
}

/// Look up (and lazily kick off indexing for) the package owning `path`
/// according to `manager`. Spawns the index scan at most once per manager.
/// `manager` must be a process-lifetime instance (a `static`) since the
/// scan runs as a detached task that may outlive this call.
async fn get_package(manager: &'static (dyn PackageManager + Send + Sync), path: &str) -> Option<String> {
    let index = index_registry()
        .entry(manager.name())
        .or_insert_with(|| Arc::new(PackageIndex::new()))
        .clone();

    if !index.started.swap(true, Ordering::SeqCst) {
        let index = index.clone();
        let manager_name = manager.name();
        tracing::debug!(manager = manager_name, "starting package index scan");
        let setter_index = index.clone();
        let set = move |path: String, package: String| setter_index.set(path, package);
        tokio::spawn(async move {
            if let Err(err) = manager.index_packages(&set).await {
                tracing::warn!(manager = manager_name, %err, "package index scan failed");
            }
            index.finish();
        });
    }

    index.get(path).await
}

/// pacman, arch linux's package manager.
#[derive(Debug, Default)]
pub struct Pacman;

#[async_trait::async_trait]
impl PackageManager for Pacman {
    fn name(&self) -> &'static str {
        "pacman"
    }

    async fn index_packages(&self, set: &dyn Fn(String, String) + Send + Sync) -> Result<()> {
        let output = tokio::process::Command::new("pacman")
            .arg("-Ql")
            .stdout(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Subprocess {
                program: "pacman -Ql".to_string(),
                reason: format!("exit status {:?}", output.status.code()),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some((package, filepath)) = line.split_once(' ') {
                set(filepath.to_string(), package.to_string());
            }
        }
        Ok(())
    }

    async fn is_installed(&self, package: &str) -> Result<bool> {
        let status = tokio::process::Command::new("pacman")
            .args(["-Qq", package])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    async fn install(&self, package: &str) -> Result<()> {
        let status = tokio::process::Command::new("pacman")
            .args(["-Sy", "--noconfirm", package])
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Subprocess {
                program: format!("pacman -Sy --noconfirm {package}"),
                reason: format!("exit status {:?}", status.code()),
            });
        }
        Ok(())
    }
}

static PACMAN: Pacman = Pacman;

#[derive(Debug)]
pub struct PacmanKind;

#[derive(Debug)]
pub struct PackageHandler {
    path: String,
    package: String,
    manager_name: &'static str,
}

impl HandlerKind for PacmanKind {
    fn name(&self) -> &'static str {
        "pacman"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::other("pacman handler requires a tokio runtime"))?;
        let path = ctx.path.to_string();
        let package = tokio::task::block_in_place(|| handle.block_on(get_package(&PACMAN, &path)));
        Ok(package.map(|p| Args::with_positional([p])))
    }

    fn construct(&self, path: String, args: Args) -> Result<Arc<dyn Handler>> {
        let package = args
            .positional(0)
            .ok_or_else(|| Error::other("pacman handler requires a package name"))?
            .to_string();
        Ok(Arc::new(PackageHandler {
            path,
            package,
            manager_name: "pacman",
        }))
    }
}

impl PackageHandler {
    fn manager(&self) -> &'static (dyn PackageManager + Send + Sync) {
        match self.manager_name {
            "pacman" => &PACMAN,
            other => unreachable!("unknown package manager {other}"),
        }
    }
}

impl Handler for PackageHandler {
    fn kind_name(&self) -> &'static str {
        self.manager_name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn get_args(&self) -> Args {
        Args::with_positional([self.package.clone()])
    }

    fn restore(&self, _extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::other("pacman handler requires a tokio runtime"))?;
        let manager = self.manager();
        let package = self.package.clone();
        tokio::task::block_in_place(|| {
            handle.block_on(async move {
                if manager.is_installed(&package).await.unwrap_or(false) {
                    return Ok(());
                }
                manager.install(&package).await
            })
        })
    }
}
