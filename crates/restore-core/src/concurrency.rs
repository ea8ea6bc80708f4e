// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Shared concurrency primitives used by both the matcher (parent-before-
//! child ordering) and the restorer (dependency ordering).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A one-shot "this path is settled" signal. Built on `Notify` plus an
/// `AtomicBool` rather than `Notify` alone, since `Notify::notified()`
/// only wakes tasks already waiting when `notify_waiters` is called -- a
/// task that checks the flag, finds it unset, and calls `notified()`
/// *after* the flag flips would otherwise miss the wakeup and hang
/// forever. Checking the flag again right before awaiting closes that
/// window.
#[derive(Default)]
pub struct ReadyFlag {
    ready: AtomicBool,
    notify: Notify,
}

impl ReadyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            if self.is_ready() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }
}

/// A registry of [`ReadyFlag`]s keyed by path, created on first access so
/// waiters don't need to know the full path set up front.
#[derive(Default)]
pub struct ReadyFlags {
    flags: dashmap::DashMap<String, Arc<ReadyFlag>>,
}

impl ReadyFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Arc<ReadyFlag> {
        self.flags.entry(path.to_string()).or_insert_with(|| Arc::new(ReadyFlag::new())).clone()
    }

    pub fn mark_ready(&self, path: &str) {
        self.get(path).mark_ready();
    }

    pub async fn wait(&self, path: &str) {
        self.get(path).wait().await;
    }

    /// Mark every flag ready that was never otherwise touched; used when a
    /// pass ends early (an error, a cycle) and remaining waiters need to be
    /// released rather than hang.
    pub fn release_all(&self) {
        for entry in self.flags.iter() {
            entry.value().mark_ready();
        }
    }

    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.flags.iter().map(|e| (e.key().clone(), e.value().is_ready())).collect()
    }
}
