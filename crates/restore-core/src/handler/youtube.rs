// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Matches videos downloaded with `yt-dlp`/`youtube-dl`, named
//! `{title}-{11 char id}.{ext}`, with an optional trailing `.start:end`
//! clip range. Restoring re-downloads (and, if a clip range was recorded,
//! trims with `ffmpeg`).

use std::sync::Arc;
use std::collections::BTreeMap;
use std::process::{Command, Stdio};

use crate::handler::{Args, FileInfo, Handler, HandlerKind, MatchContext};
use crate::{Error, Result};

const AUDIO_FORMATS: &[(&str, &str)] = &[
    ("aac", "aac"),
    ("ogg", "vorbis"),
    ("mp3", "mp3"),
    ("m4a", "m4a"),
    ("wav", "wav"),
];
const VIDEO_FORMATS: &[(&str, &str)] = &[
    ("mp4", "mp4"),
    ("flv", "flv"),
    ("webm", "webm"),
    ("mkv", "mkv"),
];

struct SplitName {
    title: String,
    id: String,
    start: Option<i64>,
    end: Option<i64>,
    ext: Option<String>,
}

/// Parse `{title}-{id}[.start:end].ext`. Returns `None` if the filename
/// doesn't look like one of ours -- this is an ordinary match miss, not an
/// error, since almost every file on a machine takes this path.
fn splitname(path: &str) -> Option<SplitName> {
    let filename = std::path::Path::new(path).file_name()?.to_str()?;
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext.to_string())),
        _ => (filename, None),
    };

    let mut name = stem.to_string();
    let mut start = None;
    let mut end = None;
    if let Some((head, tail)) = name.rsplit_once('.') {
        if let Some((s, e)) = tail.split_once(':') {
            let parse_part = |p: &str| -> Option<Option<i64>> {
                if p.is_empty() {
                    Some(None)
                } else if p.chars().all(|c| c.is_ascii_digit()) {
                    p.parse().ok().map(Some)
                } else {
                    None
                }
            };
            if let (Some(s), Some(e)) = (parse_part(s), parse_part(e)) {
                start = s;
                end = e;
                name = head.to_string();
            }
        }
    }

    if name.len() < 12 {
        return None;
    }
    let split_at = name.len() - 12;
    let title = &name[..split_at];
    let dash = name.as_bytes()[split_at];
    let id = &name[split_at + 1..];
    if dash != b'-' {
        return None;
    }
    let valid_id = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid_id {
        return None;
    }
    Some(SplitName {
        title: title.to_string(),
        id: id.to_string(),
        start,
        end,
        ext,
    })
}

fn youtube_dl(args: &[&str]) -> Option<String> {
    let output = Command::new("youtube-dl").args(args).stderr(Stdio::null()).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

fn verify_title(id: &str, title: &str) -> bool {
    youtube_dl(&["--get-filename", "-o", "%(title)s", id]).as_deref() == Some(title)
}

#[derive(Debug)]
pub struct YoutubeKind;

#[derive(Debug)]
pub struct YoutubeHandler {
    path: String,
    id: String,
    format: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
}

impl HandlerKind for YoutubeKind {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn try_match(&self, ctx: &MatchContext) -> Result<Option<Args>> {
        let Some(split) = splitname(ctx.path) else {
            return Ok(None);
        };
        if !verify_title(&split.id, &split.title) {
            return Ok(None);
        }
        let mut args = Args::with_positional([split.id]).set_opt("format", split.ext);
        if let Some(start) = split.start {
            args = args.set("start", start.to_string());
        }
        if let Some(end) = split.end {
            args = args.set("end", end.to_string());
        }
        Ok(Some(args))
    }

    fn construct(&self, path: String, args: Args) -> Result<Arc<dyn Handler>> {
        let id = args
            .positional(0)
            .ok_or_else(|| Error::other("youtube handler requires a video id"))?
            .to_string();
        let parse_i64 = |key: &str| -> Result<Option<i64>> {
            match args.get(key) {
                Some(v) => v
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::other(format!("youtube handler: bad {key} value {v:?}"))),
                None => Ok(None),
            }
        };
        Ok(Arc::new(YoutubeHandler {
            path,
            id,
            format: args.get("format").map(str::to_string),
            start: parse_i64("start")?,
            end: parse_i64("end")?,
        }))
    }
}

impl YoutubeHandler {
    fn format_args(&self) -> Result<Vec<String>> {
        let Some(format) = &self.format else {
            return Ok(Vec::new());
        };
        if let Some((_, audio)) = AUDIO_FORMATS.iter().find(|(ext, _)| *ext == format.as_str()) {
            return Ok(vec![
                "--format".to_string(),
                "bestaudio".to_string(),
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                audio.to_string(),
            ]);
        }
        if let Some((_, video)) = VIDEO_FORMATS.iter().find(|(ext, _)| *ext == format.as_str()) {
            return Ok(vec![
                "--format".to_string(),
                "bestvideo+bestaudio".to_string(),
                "--recode-video".to_string(),
                video.to_string(),
            ]);
        }
        Err(Error::other(format!("youtube handler: unknown file extension {format:?}")))
    }

    fn download_to_path(&self, path: &std::path::Path) -> Result<()> {
        let mut args = vec![
            self.id.clone(),
            "--verbose".to_string(),
            "--no-progress".to_string(),
            "--output".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        args.extend(self.format_args()?);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        youtube_dl(&arg_refs).ok_or_else(|| Error::Subprocess {
            program: "youtube-dl".to_string(),
            reason: format!("failed to download {}", self.id),
        })?;
        if !path.exists() {
            return Err(Error::other("youtube-dl returned success but file does not exist"));
        }
        Ok(())
    }
}

impl Handler for YoutubeHandler {
    fn kind_name(&self) -> &'static str {
        "youtube"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn get_args(&self) -> Args {
        let mut args = Args::with_positional([self.id.clone()]).set_opt("format", self.format.clone());
        if let Some(start) = self.start {
            args = args.set("start", start.to_string());
        }
        if let Some(end) = self.end {
            args = args.set("end", end.to_string());
        }
        args
    }

    fn get_depends(&self) -> std::collections::BTreeSet<String> {
        let mut depends = std::collections::BTreeSet::new();
        if let Some(parent) = crate::path::parent(&self.path) {
            depends.insert(parent);
        }
        depends.insert("/usr/bin/youtube-dl".to_string());
        depends
    }

    fn restore(&self, extra_data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let target = std::path::Path::new(&self.path);
        if self.start.is_none() && self.end.is_none() {
            self.download_to_path(target)?;
        } else {
            let tmp_ext = self.format.as_deref().unwrap_or("mkv");
            let tmp_path = std::env::temp_dir().join(format!("{}.{tmp_ext}", uuid_like()));
            let result = (|| -> Result<()> {
                self.download_to_path(&tmp_path)?;
                let mut time_args = Vec::new();
                if let Some(start) = self.start {
                    time_args.push("-ss".to_string());
                    time_args.push(start.to_string());
                }
                if let Some(end) = self.end {
                    let interval = match self.start {
                        Some(start) => end - start,
                        None => end,
                    };
                    time_args.push("-t".to_string());
                    time_args.push(interval.to_string());
                }
                let status = Command::new("ffmpeg")
                    .arg("-y")
                    .args(&time_args)
                    .arg("-i")
                    .arg(&tmp_path)
                    .args(["-strict", "-2"])
                    .arg(&self.path)
                    .status()
                    .map_err(|e| Error::Subprocess {
                        program: "ffmpeg".to_string(),
                        reason: e.to_string(),
                    })?;
                if !status.success() {
                    return Err(Error::Subprocess {
                        program: "ffmpeg".to_string(),
                        reason: format!("exit status {:?}", status.code()),
                    });
                }
                Ok(())
            })();
            let _ = std::fs::remove_file(&tmp_path);
            result?;
        }
        FileInfo::restore_onto(&self.path, extra_data)
    }
}

/// A process-unique scratch filename. Not a real UUID (no extra
/// dependency for one throwaway temp file); collisions only matter within
/// a single restore run, and the pid/counter pair already rules those out.
fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("restore-youtube-{}-{n}", std::process::id())
}
