// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! A shared progress bar for `match` and `restore`, backed by `indicatif`
//! the way the teacher's own sync/render commands report progress.

use indicatif::{ProgressBar, ProgressStyle};
use restore_core::matcher::MatchReporter;
use restore_core::restorer::RestoreReporter;

pub struct Bar(ProgressBar);

impl Bar {
    pub fn new(label: &'static str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(&format!("{{spinner}} {label} {{pos}}/{{len}} {{wide_msg}}"))
                .expect("static template is valid")
                .progress_chars("=> "),
        );
        Bar(bar)
    }
}

impl MatchReporter for Bar {
    fn visiting(&self, path: &str) {
        self.0.set_message(path.to_string());
    }

    fn progress(&self, done: usize, total: usize) {
        self.0.set_length(total as u64);
        self.0.set_position(done as u64);
        if done == total {
            self.0.finish_and_clear();
        }
    }
}

impl RestoreReporter for Bar {
    fn restoring(&self, path: &str) {
        self.0.set_message(path.to_string());
    }

    fn progress(&self, done: usize, total: usize) {
        self.0.set_length(total as u64);
        self.0.set_position(done as u64);
        if done == total {
            self.0.finish_and_clear();
        }
    }

    fn failed(&self, path: &str, err: &restore_core::Error) {
        self.0.suspend(|| tracing::error!(%path, %err, "restore failed"));
    }
}
