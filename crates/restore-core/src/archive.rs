// Copyright (c) Contributors to the restore project.
// SPDX-License-Identifier: Apache-2.0

//! Bundles a manifest and its handlers' extra data into a single compressed
//! tar stream, and reads one back with random access.
//!
//! Writing streams directly onto whatever sink is handed in: nothing needs
//! to be buffered in memory or on disk up front. Reading takes the opposite
//! strategy (grounded in the teacher's `storage::tar::TarRepository`, which
//! unpacks its tarball to a scratch directory on open rather than re-reading
//! the tar stream per lookup): the archive is unpacked once into a private
//! temporary directory, after which `read`/`get_extra_data` are ordinary
//! filesystem reads instead of a tar member scan apiece.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression as Bz2Level;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::config::Compression;
use crate::manifest::Manifest;
use crate::restorer::{ExtraDataSource, Restorer};
use crate::{Error, Result};

/// Member name holding the serialized manifest, per spec.md §3/§6.
const MANIFEST_MEMBER: &str = "manifest";

/// Dispatches to the right compressor for a sink that doesn't need to
/// implement `Seek`, so archives can be written straight to a pipe or a
/// growing file.
enum Compressor<W: Write> {
    Gz(GzEncoder<W>),
    Bz2(BzEncoder<W>),
    None(W),
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Compressor::Gz(w) => w.write(buf),
            Compressor::Bz2(w) => w.write(buf),
            Compressor::None(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Compressor::Gz(w) => w.flush(),
            Compressor::Bz2(w) => w.flush(),
            Compressor::None(w) => w.flush(),
        }
    }
}

impl<W: Write> Compressor<W> {
    fn new(sink: W, compression: Compression) -> Self {
        match compression {
            Compression::Gz => Compressor::Gz(GzEncoder::new(sink, GzLevel::default())),
            Compression::Bz2 => Compressor::Bz2(BzEncoder::new(sink, Bz2Level::default())),
            Compression::None => Compressor::None(sink),
        }
    }

    fn finish(self) -> std::io::Result<W> {
        match self {
            Compressor::Gz(w) => w.finish(),
            Compressor::Bz2(w) => w.finish(),
            Compressor::None(w) => Ok(w),
        }
    }
}

/// `data/<stripped(path)>` for a manifest path, per spec.md §3/§6: the
/// manifest path with any leading `/` removed.
fn stripped(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Streaming tar writer. Append-only: `add_manifest` is meant to be called
/// once, after which `finish` flushes and closes the underlying compressor.
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<Compressor<W>>,
    known_dirs: std::collections::HashSet<String>,
    mtime: u64,
    uid: u64,
    gid: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn create(sink: W, compression: Compression) -> Self {
        let mtime = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        ArchiveWriter {
            builder: tar::Builder::new(Compressor::new(sink, compression)),
            known_dirs: std::collections::HashSet::new(),
            mtime,
            uid: nix::unistd::getuid().as_raw() as u64,
            gid: nix::unistd::getgid().as_raw() as u64,
        }
    }

    /// Emit directory members for every path component of `member_path`
    /// that hasn't already been written, so `data/foo/bar/key` always has
    /// `data` and `data/foo` and `data/foo/bar` entries ahead of it.
    fn ensure_parents(&mut self, member_path: &str) -> Result<()> {
        let mut prefix = String::new();
        let parts: Vec<&str> = member_path.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if self.known_dirs.insert(prefix.clone()) {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_mtime(self.mtime);
                header.set_uid(self.uid);
                header.set_gid(self.gid);
                header.set_cksum();
                self.builder.append_data(&mut header, &prefix, std::io::empty())?;
            }
        }
        Ok(())
    }

    fn append_file(&mut self, member_path: &str, content: &[u8]) -> Result<()> {
        self.ensure_parents(member_path)?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        header.set_cksum();
        self.builder.append_data(&mut header, member_path, content)?;
        Ok(())
    }

    /// Write the manifest member, then one member per (path, extra-data
    /// key) pair for every bound path whose handler reports non-empty
    /// extra data.
    pub fn add_manifest(&mut self, manifest: &Manifest) -> Result<()> {
        self.append_file(MANIFEST_MEMBER, manifest.dump().as_bytes())?;
        for path in manifest.paths() {
            let Some(handler) = manifest.handler_for(path) else { continue };
            let extra_data = handler.get_extra_data()?;
            if extra_data.is_empty() {
                continue;
            }
            let base = format!("data/{}", stripped(path));
            for (key, bytes) in &extra_data {
                self.append_file(&format!("{base}/{key}"), bytes)?;
            }
        }
        Ok(())
    }

    /// Flush and close the tar/compression framing, returning the
    /// underlying sink.
    pub fn finish(self) -> Result<W> {
        let compressor = self.builder.into_inner()?;
        Ok(compressor.finish()?)
    }
}

/// Sniff compression from magic bytes, restoring the source's read
/// position afterward so whichever decoder is chosen can start from the
/// beginning.
fn detect_compression<R: Read + Seek>(source: &mut R) -> Result<Compression> {
    let mut magic = [0u8; 3];
    let read = source.read(&mut magic)?;
    source.seek(SeekFrom::Start(0))?;
    if read >= 2 && magic[0] == 0x1f && magic[1] == 0x8b {
        Ok(Compression::Gz)
    } else if read >= 3 && &magic == b"BZh" {
        Ok(Compression::Bz2)
    } else {
        Ok(Compression::None)
    }
}

/// An opened archive, unpacked into a private temporary directory for
/// random access. Dropped alongside the temporary directory, which is
/// cleaned up automatically.
pub struct ArchiveReader {
    root: tempfile::TempDir,
    member_names: Vec<String>,
}

impl ArchiveReader {
    /// Auto-detect compression, unpack the whole tar stream, and cache the
    /// member name list. `manifest` missing from the unpacked tree is
    /// reported as [`Error::ArchiveCorruption`] immediately, matching
    /// spec.md §7's policy that a corrupt archive is fatal rather than a
    /// partial, degraded read.
    pub fn open<R: Read + Seek + 'static>(mut source: R) -> Result<Self> {
        let compression = detect_compression(&mut source)?;
        let root = tempfile::tempdir()?;
        let boxed: Box<dyn Read> = match compression {
            Compression::Gz => Box::new(GzDecoder::new(source)),
            Compression::Bz2 => Box::new(BzDecoder::new(source)),
            Compression::None => Box::new(source),
        };
        let mut archive = tar::Archive::new(boxed);
        archive.unpack(root.path()).map_err(|e| Error::ArchiveCorruption(e.to_string()))?;

        let member_names = list_members(root.path())?;
        if !member_names.iter().any(|m| m == MANIFEST_MEMBER) {
            return Err(Error::ArchiveCorruption(
                "archive has no `manifest` member".to_string(),
            ));
        }
        Ok(ArchiveReader { root, member_names })
    }

    /// Every member name the archive contained, in the order discovered
    /// while walking the unpacked tree. Cached at [`Self::open`] time.
    pub fn member_names(&self) -> &[String] {
        &self.member_names
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.path().join(name);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ArchiveCorruption(format!("no such member: {name}"))
            } else {
                Error::Io(e)
            }
        })
    }

    pub fn get_manifest(&self) -> Result<Manifest> {
        let data = self.read(MANIFEST_MEMBER)?;
        let text = String::from_utf8(data)
            .map_err(|e| Error::ArchiveCorruption(format!("manifest is not valid utf-8: {e}")))?;
        let mut manifest = Manifest::new();
        manifest.load(&text, true)?;
        Ok(manifest)
    }

    /// Every extra-data key/value pair recorded for `path`, keyed by the
    /// basename of `data/<stripped(path)>/<key>`. Empty if the path has no
    /// `data/` directory at all (an unbound entry, or a handler with no
    /// extra data).
    pub fn get_extra_data(&self, path: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let dir = self.root.path().join("data").join(stripped(path));
        let mut out = BTreeMap::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            let bytes = std::fs::read(entry.path())?;
            out.insert(key, bytes);
        }
        Ok(out)
    }

    /// Load the manifest and restore it via `restorer`, fetching each
    /// path's extra data from this archive. Takes `self` as an `Arc` since
    /// the restorer holds its extra-data source for the whole pass.
    pub async fn restore(self: &Arc<Self>, restorer: &Restorer) -> Result<()> {
        let manifest = self.get_manifest()?;
        let source: Arc<dyn ExtraDataSource> = self.clone();
        restorer.run(&manifest, source).await
    }
}

impl ExtraDataSource for ArchiveReader {
    fn get_extra_data(&self, path: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        ArchiveReader::get_extra_data(self, path)
    }
}

fn list_members(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry?;
        if entry.path() == root {
            continue;
        }
        let relative = entry.path().strip_prefix(root).expect("walked from root");
        names.push(relative_to_tar_name(relative));
    }
    Ok(names)
}

fn relative_to_tar_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use std::io::Cursor;

    fn manifest_with_one_file(content: &[u8]) -> (tempfile::TempDir, Manifest) {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, content).unwrap();
        let mut manifest = Manifest::new();
        let kind = handler::by_name("basic-file").unwrap();
        let handler = kind.construct(file_path.to_string_lossy().into_owned(), handler::Args::new()).unwrap();
        manifest.add_file(&file_path.to_string_lossy(), Some(handler), true, false);
        (dir, manifest)
    }

    #[test]
    fn round_trip_uncompressed() {
        let (_dir, manifest) = manifest_with_one_file(b"hello");
        let mut writer = ArchiveWriter::create(Vec::new(), Compression::None);
        writer.add_manifest(&manifest).unwrap();
        let bytes = writer.finish().unwrap();

        let reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
        let loaded = reader.get_manifest().unwrap();
        assert_eq!(loaded.len(), manifest.len());
        let path = manifest.paths().next().unwrap();
        let extra = reader.get_extra_data(path).unwrap();
        assert_eq!(extra.get("content").unwrap(), b"hello");
    }

    #[test]
    fn round_trip_gzip_is_auto_detected() {
        let (_dir, manifest) = manifest_with_one_file(b"hello gz");
        let mut writer = ArchiveWriter::create(Vec::new(), Compression::Gz);
        writer.add_manifest(&manifest).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
        let path = manifest.paths().next().unwrap();
        assert_eq!(reader.get_extra_data(path).unwrap().get("content").unwrap(), b"hello gz");
    }

    #[test]
    fn round_trip_bzip2_is_auto_detected() {
        let (_dir, manifest) = manifest_with_one_file(b"hello bz2");
        let mut writer = ArchiveWriter::create(Vec::new(), Compression::Bz2);
        writer.add_manifest(&manifest).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(&bytes[..3], b"BZh");

        let reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
        let path = manifest.paths().next().unwrap();
        assert_eq!(reader.get_extra_data(path).unwrap().get("content").unwrap(), b"hello bz2");
    }

    #[test]
    fn missing_manifest_member_is_archive_corruption() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "not-a-manifest", std::io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let err = ArchiveReader::open(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::ArchiveCorruption(_)));
    }

    #[test]
    fn unbound_path_has_no_extra_data() {
        let mut manifest = Manifest::new();
        manifest.add_file("/etc/hosts", None, true, false);
        let mut writer = ArchiveWriter::create(Vec::new(), Compression::None);
        writer.add_manifest(&manifest).unwrap();
        let bytes = writer.finish().unwrap();

        let reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
        assert!(reader.get_extra_data("/etc/hosts").unwrap().is_empty());
    }
}
