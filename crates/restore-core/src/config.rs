// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide defaults, layered the way the teacher's own config loader
//! does: an optional config file, overlaid by environment variables,
//! overlaid by hard defaults.

use config::{Config as ConfigSource, File};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Default bound on simultaneously-matching paths, absent
/// `MATCH_CONCURRENCY_MAX`.
pub const DEFAULT_MATCH_CONCURRENCY_MAX: usize = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gz,
    Bz2,
    None,
}

impl std::str::FromStr for Compression {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gz" | "gzip" => Ok(Compression::Gz),
            "bz2" | "bzip2" => Ok(Compression::Bz2),
            "none" | "" => Ok(Compression::None),
            other => Err(crate::Error::other(format!(
                "unknown compression {other:?}, expected one of gz, bz2, none"
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Matching {
    pub concurrency_max: usize,
    /// Extra exact paths the ignore handler treats as transient, beyond its
    /// own hard-coded list. Populated from `MATCH_IGNORE` (colon separated,
    /// `\:` escapes a literal colon inside a path) same as spec.md §6.
    pub ignore_paths: Vec<String>,
}

impl Default for Matching {
    fn default() -> Self {
        Self {
            concurrency_max: DEFAULT_MATCH_CONCURRENCY_MAX,
            ignore_paths: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Archive {
    pub default_compression: Compression,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub matching: Matching,
    pub archive: Archive,
}

impl Config {
    /// Load configuration from (in increasing priority order): hard
    /// defaults, an optional config file (`$RESTORE_CONFIG`, or
    /// `restore.{toml,yaml,json}` in the current directory), then
    /// environment variables (`MATCH_CONCURRENCY_MAX`, `MATCH_IGNORE`,
    /// `RESTORE_COMPRESSION`).
    pub fn load() -> Result<Self> {
        let default_config_path = std::env::var("RESTORE_CONFIG").unwrap_or_else(|_| "restore".to_string());

        let mut builder = ConfigSource::builder()
            .set_default("matching.concurrency_max", DEFAULT_MATCH_CONCURRENCY_MAX as i64)?
            .set_default("matching.ignore_paths", Vec::<String>::new())?
            .set_default("archive.default_compression", "gz")?
            .add_source(File::with_name(&default_config_path).required(false));

        if let Ok(raw) = std::env::var("MATCH_CONCURRENCY_MAX") {
            let parsed: usize = raw
                .parse()
                .map_err(|_| crate::Error::other(format!("MATCH_CONCURRENCY_MAX must be an integer, got {raw:?}")))?;
            builder = builder.set_override("matching.concurrency_max", parsed as i64)?;
        }
        if let Ok(raw) = std::env::var("MATCH_IGNORE") {
            builder = builder.set_override("matching.ignore_paths", split_escaped_colons(&raw))?;
        }
        if let Ok(raw) = std::env::var("RESTORE_COMPRESSION") {
            builder = builder.set_override("archive.default_compression", raw)?;
        }

        let source = builder.build()?;
        let matching: Matching = source.get("matching").unwrap_or_default();
        let archive: Archive = source.get("archive").unwrap_or_default();
        Ok(Config { matching, archive })
    }
}

/// Split a colon-separated list where a literal colon in an item is
/// escaped as `\:`, exactly as spec.md §4.2/§6 describes for `MATCH_IGNORE`.
pub fn split_escaped_colons(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&':') {
            current.push(':');
            chars.next();
        } else if c == ':' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_escaped_colons_basic() {
        assert_eq!(
            split_escaped_colons(r"/tmp:/var/run"),
            vec!["/tmp".to_string(), "/var/run".to_string()]
        );
    }

    #[test]
    fn split_escaped_colons_escaped() {
        assert_eq!(
            split_escaped_colons(r"/a\:b:/c"),
            vec!["/a:b".to_string(), "/c".to_string()]
        );
    }
}
