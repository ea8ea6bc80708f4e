// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Builds a manifest by asking the handler registry, in priority order,
//! which handler claims each unbound path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};

use crate::concurrency::ReadyFlags;
use crate::handler::{Handler, HandlerKind, MatchContext};
use crate::manifest::Manifest;
use crate::Result;

/// What to do with a path a handler has tentatively claimed. Mirrors the
/// interactive CLI's Confirm/Edit/Recursive/Ignore prompt without baking
/// any UI into the library: a CLI (or a test) supplies the policy.
pub enum ConfirmOutcome {
    /// Bind the path to the handler that matched it.
    Accept,
    /// Bind the path to a different handler instead (an edit, or an
    /// explicit ignore), or leave it unbound (`None`) to try again later.
    Replace(Option<Arc<dyn Handler>>),
    /// Abandon the rest of this matching run. Not an error: a user asking
    /// to stop mid-confirmation is an ordinary outcome, not a failure.
    StopMatching,
}

pub trait Confirm: Send + Sync {
    fn confirm(&self, path: &str, candidate: &dyn Handler) -> ConfirmOutcome;
}

/// Accepts every tentative match without asking. What non-interactive runs
/// (tests, `--yes`-style automation) use.
pub struct AcceptAll;

impl Confirm for AcceptAll {
    fn confirm(&self, _path: &str, _candidate: &dyn Handler) -> ConfirmOutcome {
        ConfirmOutcome::Accept
    }
}

pub trait MatchReporter: Send + Sync {
    fn visiting(&self, _path: &str) {}
    fn matched(&self, _path: &str, _handler_name: &str) {}
    fn progress(&self, _done: usize, _total: usize) {}
}

pub struct SilentReporter;
impl MatchReporter for SilentReporter {}

/// Bounded, priority-ordered matching over a manifest's unbound paths.
///
/// Concurrency is capped by a semaphore, and a child path's matching waits
/// for its parent's to finish first -- so a handler's `restores_contents`
/// flag, once set on the parent, is visible to every descendant before
/// they're tested, and `HandledByParentKind` never races its parent.
pub struct Matcher {
    handlers: Vec<Arc<dyn HandlerKind>>,
    concurrency: Arc<Semaphore>,
    reporter: Arc<dyn MatchReporter>,
    confirm: Arc<dyn Confirm>,
    ignore_paths: Vec<String>,
    follow_symlinks: bool,
}

impl Matcher {
    pub fn new(
        handlers: Vec<Arc<dyn HandlerKind>>,
        concurrency_max: usize,
        reporter: Arc<dyn MatchReporter>,
        confirm: Arc<dyn Confirm>,
        ignore_paths: Vec<String>,
        follow_symlinks: bool,
    ) -> Self {
        Matcher {
            handlers,
            concurrency: Arc::new(Semaphore::new(concurrency_max.max(1))),
            reporter,
            confirm,
            ignore_paths,
            follow_symlinks,
        }
    }

    /// Try every handler in priority order against `path`, asking
    /// `confirm` before committing the first match. Returns `true` if a
    /// `StopMatching` outcome was returned.
    async fn match_one(
        handlers: &[Arc<dyn HandlerKind>],
        manifest: &Mutex<Manifest>,
        path: &str,
        follow_symlinks: bool,
        ignore_paths: &[String],
        confirm: &dyn Confirm,
    ) -> Result<bool> {
        for kind in handlers {
            let matched = {
                let guard = manifest.lock().await;
                let ctx = MatchContext {
                    path,
                    manifest: &guard,
                    follow_symlinks,
                    ignore_paths,
                };
                // spec.md §7: a handler's `match` raising is logged and
                // treated as "no match" for that kind, not a fatal error
                // for the whole batch -- the priority loop just falls
                // through to the next handler.
                match kind.try_match(&ctx) {
                    Ok(matched) => matched,
                    Err(err) => {
                        tracing::warn!(handler = kind.name(), %path, %err, "handler match failed, treating as no match");
                        None
                    }
                }
            };
            let Some(args) = matched else { continue };
            let candidate = kind.construct(path.to_string(), args)?;
            match confirm.confirm(path, candidate.as_ref()) {
                ConfirmOutcome::Accept => {
                    manifest.lock().await.add_file(path, Some(candidate), true, follow_symlinks);
                    return Ok(false);
                }
                ConfirmOutcome::Replace(handler) => {
                    manifest.lock().await.add_file(path, handler, true, follow_symlinks);
                    return Ok(false);
                }
                ConfirmOutcome::StopMatching => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Match every currently-unbound path in `manifest` against the
    /// configured handlers, mutating it in place.
    pub async fn run(&self, manifest: Manifest) -> Result<Manifest> {
        let unbound = manifest.unbound_paths();
        let total = unbound.len();
        // Only a path in this set has a task spawned below that will ever
        // call `flags.mark_ready` on it. A parent that is absent from the
        // manifest entirely, or present but already bound before this run
        // started, has no such task -- waiting on its flag would hang
        // forever, so `wait` is only valid for a parent that is itself
        // pending in this same run (spec.md §4.4: "if also in the
        // manifest").
        let pending: HashSet<String> = unbound.iter().cloned().collect();
        let manifest = Arc::new(Mutex::new(manifest));
        let flags = Arc::new(ReadyFlags::new());
        let done = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut tasks = FuturesUnordered::new();
        for path in unbound {
            let manifest = manifest.clone();
            let flags = flags.clone();
            let handlers = self.handlers.clone();
            let reporter = self.reporter.clone();
            let confirm = self.confirm.clone();
            let ignore_paths = self.ignore_paths.clone();
            let follow_symlinks = self.follow_symlinks;
            let concurrency = self.concurrency.clone();
            let done = done.clone();
            let stopped = stopped.clone();
            let pending = pending.clone();

            tasks.push(tokio::spawn(async move {
                if let Some(parent) = crate::path::parent(&path) {
                    if pending.contains(&parent) {
                        flags.wait(&parent).await;
                    }
                }
                let permit = concurrency.acquire_owned().await.expect("semaphore never closed");
                let result = if stopped.load(Ordering::SeqCst) {
                    Ok(false)
                } else {
                    reporter.visiting(&path);
                    Self::match_one(&handlers, &manifest, &path, follow_symlinks, &ignore_paths, confirm.as_ref()).await
                };
                drop(permit);
                flags.mark_ready(&path);
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.progress(n, total);
                if matches!(result, Ok(true)) {
                    stopped.store(true, Ordering::SeqCst);
                }
                result
            }));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => first_error.get_or_insert(err),
                Err(join_err) => {
                    flags.release_all();
                    return Err(crate::Error::other(join_err.to_string()));
                }
            };
        }
        flags.release_all();
        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(Arc::try_unwrap(manifest)
            .unwrap_or_else(|_| unreachable!("all tasks have completed, so only one Arc remains"))
            .into_inner())
    }

    /// Recursively add `root` to `manifest` and match each directory as it
    /// is discovered, top-down, so a directory whose handler claims
    /// `restores_contents` stops the walk from descending into it at all
    /// (its children will be picked up by `HandledByParentKind` on a later
    /// `run`, not added here). Used for `--add` roots, where the pruning
    /// depends on each directory's match result as it's produced; run
    /// sequentially since it is inherently a top-down dependency chain.
    pub async fn add_root(&self, manifest: &mut Manifest, root: &str) -> Result<()> {
        let mutex = Mutex::new(std::mem::take(manifest));
        let mut walker = walkdir::WalkDir::new(root).follow_links(self.follow_symlinks).into_iter();
        let mut stopped = false;
        loop {
            let Some(entry) = walker.next() else { break };
            let entry = entry?;
            let path = entry.path().to_string_lossy().into_owned();
            {
                let mut guard = mutex.lock().await;
                guard.add_file(&path, None, false, false);
            }
            if stopped {
                continue;
            }
            self.reporter.visiting(&path);
            let stop = Self::match_one(
                &self.handlers,
                &mutex,
                &path,
                self.follow_symlinks,
                &self.ignore_paths,
                self.confirm.as_ref(),
            )
            .await?;
            if stop {
                stopped = true;
                continue;
            }
            let restores_contents = {
                let guard = mutex.lock().await;
                guard.handler_for(&path).is_some_and(|h| h.restores_contents())
            };
            if restores_contents && entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
        }
        *manifest = mutex.into_inner();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    // `all_handlers()` includes `PacmanKind`, whose `try_match` calls
    // `tokio::task::block_in_place` -- that panics outside a multi-thread
    // runtime, so these two tests need more than the default current-thread
    // `#[tokio::test]` flavor.
    #[tokio::test(flavor = "multi_thread")]
    async fn run_matches_basic_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, b"hi").unwrap();

        let mut manifest = Manifest::new();
        manifest.add_file(&dir.path().to_string_lossy(), None, true, false);
        manifest.add_file(&file_path.to_string_lossy(), None, true, false);

        let matcher = Matcher::new(
            crate::handler::all_handlers().to_vec(),
            4,
            Arc::new(SilentReporter),
            Arc::new(AcceptAll),
            Vec::new(),
            false,
        );
        let manifest = matcher.run(manifest).await.unwrap();
        assert_eq!(
            manifest.handler_for(&file_path.to_string_lossy()).unwrap().kind_name(),
            "basic-file"
        );
        assert_eq!(
            manifest.handler_for(&dir.path().to_string_lossy()).unwrap().kind_name(),
            "basic-directory"
        );
    }

    struct CountingReporter {
        visits: StdAtomicUsize,
    }
    impl MatchReporter for CountingReporter {
        fn visiting(&self, _path: &str) {
            self.visits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_visits_every_unbound_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"there").unwrap();

        let mut manifest = Manifest::new();
        manifest.add_file_tree(&dir.path().to_string_lossy(), false).unwrap();
        let unbound = manifest.len();

        let reporter = Arc::new(CountingReporter {
            visits: StdAtomicUsize::new(0),
        });
        let matcher = Matcher::new(
            crate::handler::all_handlers().to_vec(),
            4,
            reporter.clone(),
            Arc::new(AcceptAll),
            Vec::new(),
            false,
        );
        matcher.run(manifest).await.unwrap();
        assert_eq!(reporter.visits.load(Ordering::SeqCst), unbound);
    }

    // Seed scenario 1: a lone path whose parent directory was never added to
    // the manifest. Nothing will ever mark that parent's ready flag, so a
    // task that waited on it unconditionally would hang forever; bound with
    // a timeout so a regression shows up as a failing test instead of a
    // stuck suite.
    #[tokio::test(flavor = "multi_thread")]
    async fn run_does_not_wait_on_a_parent_absent_from_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("hosts");
        std::fs::write(&file_path, b"hi").unwrap();

        let mut manifest = Manifest::new();
        manifest.add_file(&file_path.to_string_lossy(), None, true, false);

        let matcher = Matcher::new(
            crate::handler::all_handlers().to_vec(),
            4,
            Arc::new(SilentReporter),
            Arc::new(AcceptAll),
            Vec::new(),
            false,
        );
        let manifest = tokio::time::timeout(std::time::Duration::from_secs(5), matcher.run(manifest))
            .await
            .expect("matcher.run hung waiting on a parent that was never part of the manifest")
            .unwrap();
        assert_eq!(
            manifest.handler_for(&file_path.to_string_lossy()).unwrap().kind_name(),
            "basic-file"
        );
    }
}
