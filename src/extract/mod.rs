//! Extraction orchestration: selection, conflict policy, and batched
//! stream decoding.
//!
//! Extraction runs in two phases. Everything that can be decided without
//! decoding a byte is resolved first: the selection is expanded and
//! validated, stored names are sanitized, directories and empty files and
//! deletion markers are handled, and every stream-bearing member gets a
//! planned destination with its conflict policy already applied. Only then
//! does the decode batch run, visiting streams in strictly ascending order so
//! solid blocks are each decoded once, front to back.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::decode::{DecodeError, Sink, SinkProvider, StreamDecoder};
use crate::header::ArchiveHeader;
use crate::index::{ArchiveIndex, BuildError};
use crate::path::{EntryPath, EntryPathError};
use crate::record::ArchiveEntry;

#[cfg(test)]
mod tests;

/// Which members to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every member in the archive.
    All,

    /// Members by index into the archive's entry table.
    Indices(Vec<usize>),

    /// Members by stored name. With `loose` set, a requested name also
    /// matches on basename, so `"file.txt"` selects `"dir/file.txt"`.
    Names { names: Vec<String>, loose: bool },
}

/// Policy knobs for an extraction run.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Replace files that already exist at the destination.
    pub overwrite: bool,

    /// Silently skip members whose destination already exists. If both this
    /// and `overwrite` are set, `overwrite` wins.
    pub skip_existing: bool,

    /// Recreate the stored directory structure under the destination root.
    /// When disabled, every file lands in the root under its basename.
    pub preserve_dirs: bool,

    /// Act on deletion markers by removing the matching destination path.
    /// When disabled, deletion markers are ignored.
    pub allow_deletions: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            overwrite: false,
            skip_existing: false,
            preserve_dirs: true,
            allow_deletions: false,
        }
    }
}

/// Tallies of what an extraction run actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Files written, including zero-length ones.
    pub files_extracted: u64,

    /// Files passed over because their destination already existed.
    pub files_skipped: u64,

    /// Directories created.
    pub dirs_created: u64,

    /// Destination paths removed for deletion markers.
    pub deletions: u64,

    /// Decoded bytes delivered to files.
    pub bytes_written: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Not found in archive: `{0}`")]
    NotFoundInArchive(String),

    #[error("Member index {index} out of range; archive has {len} members")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Path already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Failed to create directory: {1}")]
    CreateDirFailed(#[source] std::io::Error, PathBuf),

    #[error("Failed to create file: {1}")]
    CreateFileFailed(#[source] std::io::Error, PathBuf),

    #[error("Failed to remove path: {1}")]
    RemoveFailed(#[source] std::io::Error, PathBuf),

    #[error("Invalid stored name `{1}`")]
    InvalidEntryPath(#[source] EntryPathError, String),

    #[error("Not an extractable file: `{0}`")]
    NotAFile(String),

    #[error("No stream data recorded for `{0}`")]
    NoStreamData(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Supplies destinations when extracting somewhere other than a filesystem
/// tree, e.g. into in-memory buffers or a network peer.
///
/// Same pairing contract as [`SinkProvider`]: every `open` that returns a
/// sink is followed by exactly one `close` for the same entry, and `Ok(None)`
/// skips the entry's bytes without error.
pub trait EntrySinkProvider {
    fn open(&mut self, entry: &ArchiveEntry) -> std::io::Result<Option<Sink>>;
    fn close(&mut self, entry: &ArchiveEntry, sink: Sink) -> std::io::Result<()>;
}

/// Drives a [`StreamDecoder`] according to an [`ArchiveIndex`].
#[derive(Debug)]
pub struct Extractor<D: StreamDecoder> {
    index: ArchiveIndex,
    decoder: D,
}

enum Planned {
    Dir(PathBuf),
    DirSkipped,
    EmptyFile {
        dest: PathBuf,
        modified: Option<SystemTime>,
        overwrite: bool,
    },
    EmptySkipped,
    Delete(PathBuf),
    DeleteNoop,
    Stream(StreamJob),
}

struct StreamJob {
    stream: usize,
    dest: PathBuf,
    modified: Option<SystemTime>,
    size: u64,
    overwrite: bool,
    skip: bool,
}

impl<D: StreamDecoder> Extractor<D> {
    pub fn new(index: ArchiveIndex, decoder: D) -> Extractor<D> {
        Extractor { index, decoder }
    }

    /// Build the index from a parsed header and pair it with a decoder.
    pub fn from_header(header: &ArchiveHeader, decoder: D) -> Result<Extractor<D>, BuildError> {
        Ok(Extractor {
            index: ArchiveIndex::build(header)?,
            decoder,
        })
    }

    #[inline(always)]
    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn into_inner(self) -> (ArchiveIndex, D) {
        (self.index, self.decoder)
    }

    /// Extract the selected members into `dest` on the filesystem.
    ///
    /// All validation and conflict resolution happens before the decoder is
    /// invoked; a selection or conflict error leaves the destination
    /// untouched by this call.
    pub fn extract(
        &mut self,
        selection: &Selection,
        dest: &Path,
        options: &ExtractOptions,
    ) -> Result<ExtractStats, ExtractError> {
        let members = resolve_selection(&self.index, selection)?;
        let mut stats = ExtractStats::default();

        let mut plan = Vec::with_capacity(members.len());
        let mut claimed = HashSet::new();
        for member in members {
            let entry = &self.index.entries()[member];
            plan.push(plan_member(entry, dest, options, &mut claimed)?);
        }

        let mut streams: Vec<StreamJob> = vec![];
        for action in plan {
            match action {
                Planned::Dir(path) => {
                    fs::create_dir_all(&path)
                        .map_err(|e| ExtractError::CreateDirFailed(e, path.clone()))?;
                    stats.dirs_created += 1;
                }
                Planned::DirSkipped | Planned::DeleteNoop => {}
                Planned::EmptyFile {
                    dest,
                    modified,
                    overwrite,
                } => {
                    write_empty_file(&dest, modified, overwrite)?;
                    stats.files_extracted += 1;
                }
                Planned::EmptySkipped => {
                    stats.files_skipped += 1;
                }
                Planned::Delete(path) => {
                    remove_existing(&path)?;
                    stats.deletions += 1;
                }
                Planned::Stream(job) => streams.push(job),
            }
        }

        if streams.iter().all(|job| job.skip) {
            stats.files_skipped += streams.len() as u64;
            return Ok(stats);
        }

        if streams.len() == 1 {
            let job = streams.remove(0);
            let mut sinks = FsSinks::new(streams, &mut stats);
            if let Some(mut sink) = sinks.open_job(&job)? {
                let result = self.decoder.decode_one(job.stream, &mut sink);
                sinks.close_job(&job, sink)?;
                result?;
            }
            return Ok(stats);
        }

        let indices: Vec<usize> = streams.iter().map(|job| job.stream).collect();
        let mut sinks = FsSinks::new(streams, &mut stats);
        self.decoder.decode_many(&indices, &mut sinks)?;

        Ok(stats)
    }

    /// Extract the selected members through caller-supplied sinks.
    ///
    /// Directories and deletion markers have no byte content and are passed
    /// over; empty files produce an open/close pair with no bytes in between.
    pub fn extract_with(
        &mut self,
        selection: &Selection,
        provider: &mut dyn EntrySinkProvider,
    ) -> Result<ExtractStats, ExtractError> {
        let members = resolve_selection(&self.index, selection)?;
        let mut stats = ExtractStats::default();

        let mut streamed: Vec<usize> = vec![];
        for member in members {
            let entry = &self.index.entries()[member];
            if entry.is_directory || entry.is_deleted {
                tracing::debug!(name = %entry.name, "no byte content, passing over");
                continue;
            }
            if entry.is_empty {
                match provider.open(entry).map_err(DecodeError::Io)? {
                    Some(sink) => {
                        provider.close(entry, sink).map_err(DecodeError::Io)?;
                        stats.files_extracted += 1;
                    }
                    None => stats.files_skipped += 1,
                }
                continue;
            }
            streamed.push(member);
        }

        let index = &self.index;
        let indices: Vec<usize> = streamed
            .iter()
            .map(|&member| {
                index.entries()[member]
                    .stream_index
                    .ok_or_else(|| ExtractError::NoStreamData(index.entries()[member].name.clone()))
            })
            .collect::<Result<_, _>>()?;

        if !indices.is_empty() {
            let mut adapter = EntrySinks {
                index,
                members: &streamed,
                provider,
                stats: &mut stats,
            };
            self.decoder.decode_many(&indices, &mut adapter)?;
        }

        Ok(stats)
    }

    /// Decode a single stream-bearing member into `dest`.
    ///
    /// Empty files succeed and write nothing. Directories and deletion
    /// markers are an error; they have no byte content to extract.
    pub fn extract_entry(
        &mut self,
        member: usize,
        dest: &mut dyn Write,
    ) -> Result<(), ExtractError> {
        let entry = self
            .index
            .entry(member)
            .ok_or(ExtractError::IndexOutOfRange {
                index: member,
                len: self.index.len(),
            })?;

        if entry.is_directory || entry.is_deleted {
            return Err(ExtractError::NotAFile(entry.name.clone()));
        }
        if entry.is_empty {
            return Ok(());
        }

        let stream = entry
            .stream_index
            .ok_or_else(|| ExtractError::NoStreamData(entry.name.clone()))?;
        self.decoder.decode_one(stream, dest)?;
        Ok(())
    }
}

/// Expand a selection into ascending, deduplicated member indices.
fn resolve_selection(
    index: &ArchiveIndex,
    selection: &Selection,
) -> Result<Vec<usize>, ExtractError> {
    let mut members = match selection {
        Selection::All => (0..index.len()).collect::<Vec<_>>(),
        Selection::Indices(indices) => {
            for &i in indices {
                if i >= index.len() {
                    return Err(ExtractError::IndexOutOfRange {
                        index: i,
                        len: index.len(),
                    });
                }
            }
            indices.clone()
        }
        Selection::Names { names, loose } => names
            .iter()
            .map(|name| {
                index
                    .find(name, *loose)
                    .ok_or_else(|| ExtractError::NotFoundInArchive(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    members.sort_unstable();
    members.dedup();
    Ok(members)
}

fn plan_member(
    entry: &ArchiveEntry,
    dest: &Path,
    options: &ExtractOptions,
    claimed: &mut HashSet<PathBuf>,
) -> Result<Planned, ExtractError> {
    let path = EntryPath::new(&entry.name)
        .map_err(|e| ExtractError::InvalidEntryPath(e, entry.name.clone()))?;
    let target = if options.preserve_dirs {
        dest.join(path.to_path_buf())
    } else {
        dest.join(path.flattened())
    };

    if entry.is_deleted {
        if options.allow_deletions && target.exists() {
            return Ok(Planned::Delete(target));
        }
        tracing::debug!(name = %entry.name, "deletion marker ignored");
        return Ok(Planned::DeleteNoop);
    }

    if entry.is_directory {
        if options.preserve_dirs {
            return Ok(Planned::Dir(target));
        }
        tracing::debug!(name = %entry.name, "directory passed over, structure not preserved");
        return Ok(Planned::DirSkipped);
    }

    // Conflict policy, settled before any decoding starts. Overwrite wins
    // when both knobs are set. A destination already claimed by an earlier
    // member in this plan counts as existing; flatten mode can fold two
    // stored names onto one basename.
    let exists = target.exists() || claimed.contains(&target);
    claimed.insert(target.clone());
    let (overwrite, skip) = if exists && options.overwrite {
        (true, false)
    } else if exists && options.skip_existing {
        tracing::debug!(name = %entry.name, path = %target.display(), "destination exists, skipping");
        (false, true)
    } else if exists {
        return Err(ExtractError::AlreadyExists(target));
    } else {
        (false, false)
    };

    if entry.is_empty {
        if skip {
            return Ok(Planned::EmptySkipped);
        }
        return Ok(Planned::EmptyFile {
            dest: target,
            modified: entry.modified,
            overwrite,
        });
    }

    let stream = entry
        .stream_index
        .ok_or_else(|| ExtractError::NoStreamData(entry.name.clone()))?;
    Ok(Planned::Stream(StreamJob {
        stream,
        dest: target,
        modified: entry.modified,
        size: entry.size.unwrap_or(0),
        overwrite,
        skip,
    }))
}

fn create_dest_file(path: &Path, overwrite: bool) -> Result<File, ExtractError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ExtractError::CreateDirFailed(e, parent.to_path_buf()))?;
    }
    let result = if overwrite {
        File::create(path)
    } else {
        OpenOptions::new().write(true).create_new(true).open(path)
    };
    result.map_err(|e| ExtractError::CreateFileFailed(e, path.to_path_buf()))
}

fn write_empty_file(
    path: &Path,
    modified: Option<SystemTime>,
    overwrite: bool,
) -> Result<(), ExtractError> {
    let file = create_dest_file(path, overwrite)?;
    if let Some(time) = modified {
        let _ = file.set_modified(time);
    }
    Ok(())
}

fn remove_existing(path: &Path) -> Result<(), ExtractError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| ExtractError::RemoveFailed(e, path.to_path_buf()))?;
    tracing::debug!(path = %path.display(), "removed for deletion marker");
    Ok(())
}

/// Filesystem-backed sink provider for the decode batch.
struct FsSinks<'a> {
    jobs: HashMap<usize, StreamJob>,
    stats: &'a mut ExtractStats,
}

impl<'a> FsSinks<'a> {
    fn new(jobs: Vec<StreamJob>, stats: &'a mut ExtractStats) -> FsSinks<'a> {
        FsSinks {
            jobs: jobs.into_iter().map(|job| (job.stream, job)).collect(),
            stats,
        }
    }

    fn open_job(&mut self, job: &StreamJob) -> Result<Option<Sink>, DecodeError> {
        if job.skip {
            self.stats.files_skipped += 1;
            return Ok(None);
        }
        let file = create_dest_file(&job.dest, job.overwrite).map_err(io_of_extract)?;
        Ok(Some(Box::new(BufWriter::new(file))))
    }

    fn close_job(&mut self, job: &StreamJob, mut sink: Sink) -> Result<(), DecodeError> {
        sink.flush()?;
        drop(sink);
        if let Some(time) = job.modified {
            if let Ok(file) = OpenOptions::new().write(true).open(&job.dest) {
                let _ = file.set_modified(time);
            }
        }
        tracing::trace!(stream = job.stream, path = %job.dest.display(), "stream delivered");
        self.stats.files_extracted += 1;
        self.stats.bytes_written += job.size;
        Ok(())
    }
}

impl SinkProvider for FsSinks<'_> {
    fn open(&mut self, stream_index: usize) -> Result<Option<Sink>, DecodeError> {
        let job = self
            .jobs
            .remove(&stream_index)
            .ok_or_else(|| unknown_stream(stream_index))?;
        let sink = self.open_job(&job)?;
        if sink.is_some() {
            self.jobs.insert(stream_index, job);
        }
        Ok(sink)
    }

    fn close(&mut self, stream_index: usize, sink: Sink) -> Result<(), DecodeError> {
        let job = self
            .jobs
            .remove(&stream_index)
            .ok_or_else(|| unknown_stream(stream_index))?;
        self.close_job(&job, sink)
    }
}

/// Adapts an [`EntrySinkProvider`] to the stream-indexed decoder interface.
struct EntrySinks<'a> {
    index: &'a ArchiveIndex,
    members: &'a [usize],
    provider: &'a mut dyn EntrySinkProvider,
    stats: &'a mut ExtractStats,
}

impl EntrySinks<'_> {
    fn entry_for(&self, stream_index: usize) -> Result<&ArchiveEntry, DecodeError> {
        self.members
            .iter()
            .map(|&member| &self.index.entries()[member])
            .find(|entry| entry.stream_index == Some(stream_index))
            .ok_or_else(|| unknown_stream(stream_index))
    }
}

impl SinkProvider for EntrySinks<'_> {
    fn open(&mut self, stream_index: usize) -> Result<Option<Sink>, DecodeError> {
        let entry = self.entry_for(stream_index)?.clone();
        match self.provider.open(&entry).map_err(DecodeError::Io)? {
            Some(sink) => Ok(Some(sink)),
            None => {
                self.stats.files_skipped += 1;
                Ok(None)
            }
        }
    }

    fn close(&mut self, stream_index: usize, sink: Sink) -> Result<(), DecodeError> {
        let entry = self.entry_for(stream_index)?.clone();
        self.provider.close(&entry, sink).map_err(DecodeError::Io)?;
        tracing::trace!(stream = stream_index, name = %entry.name, "stream delivered");
        self.stats.files_extracted += 1;
        self.stats.bytes_written += entry.size.unwrap_or(0);
        Ok(())
    }
}

fn unknown_stream(stream_index: usize) -> DecodeError {
    DecodeError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("stream {} was not part of this batch", stream_index),
    ))
}

fn io_of_extract(err: ExtractError) -> DecodeError {
    match err {
        ExtractError::Decode(e) => e,
        ExtractError::CreateDirFailed(e, _) | ExtractError::CreateFileFailed(e, _) => {
            DecodeError::Io(e)
        }
        other => DecodeError::Io(std::io::Error::other(other.to_string())),
    }
}
