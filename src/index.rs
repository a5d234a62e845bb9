//! Reconstruction of the logical member table from the parsed header.
//!
//! The container keeps two decoupled models: property arrays describing
//! *files* (names, emptiness, timestamps) and folder/substream descriptors
//! describing *streams* (the bytes that actually exist). The builder walks
//! both and binds them together, producing one fully-populated
//! [`ArchiveEntry`] per member.

use crate::header::{ArchiveHeader, Property, SubStreamsInfo};
use crate::record::ArchiveEntry;

/// Structural inconsistencies between the header's declared emptiness and its
/// declared stream layout.
///
/// Any of these aborts index construction for the whole archive; a half-built
/// index is unsafe to extract from.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Property array `{kind}` has {actual} slots, expected {expected}")]
    PropertyLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("No stream produced by decode unit {0}")]
    NoStreamInFolder(usize),

    #[error("Substream layout is truncated: {what} has {actual} slots, expected {expected}")]
    TruncatedSubstreams {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Stream layout and member emptiness disagree")]
    LayoutMismatch,
}

/// The immutable-after-build table of logical archive members.
///
/// Built once from an [`ArchiveHeader`], then read-only: no entry is added,
/// removed or mutated afterwards. Deletion markers stay in the table and are
/// surfaced to the extraction policy rather than silently dropped.
#[derive(Debug)]
pub struct ArchiveIndex {
    entries: Vec<ArchiveEntry>,
    num_streams: usize,
}

impl ArchiveIndex {
    /// Build the member table from the parsed header.
    pub fn build(header: &ArchiveHeader) -> Result<ArchiveIndex, BuildError> {
        let num_entries = header.num_entries;
        let mut entries = vec![ArchiveEntry::default(); num_entries];

        // Property arrays apply in the order they appeared on disk; there is
        // no canonical order across containers.
        for property in &header.properties {
            match property {
                Property::EmptyStreams(bits) => {
                    expect_len(property.kind(), num_entries, bits.len())?;
                    for (entry, &bit) in entries.iter_mut().zip(bits) {
                        entry.is_empty = bit;
                        // Provisional: an explicit empty-file vector may
                        // clear this again below.
                        entry.is_directory = bit;
                        if bit {
                            entry.size = Some(0);
                        }
                    }
                }
                Property::EmptyFiles(bits) => {
                    apply_to_empty(&mut entries, bits, property.kind(), |entry, bit| {
                        if bit {
                            entry.is_directory = false;
                        }
                    })?;
                }
                Property::Anti(bits) => {
                    apply_to_empty(&mut entries, bits, property.kind(), |entry, bit| {
                        if bit {
                            entry.is_deleted = true;
                        }
                    })?;
                }
                Property::ModifiedTimes(times) => {
                    expect_len(property.kind(), num_entries, times.len())?;
                    for (entry, time) in entries.iter_mut().zip(times) {
                        entry.modified = *time;
                    }
                }
                Property::Names(names) => {
                    expect_len(property.kind(), num_entries, names.len())?;
                    for (entry, name) in entries.iter_mut().zip(names) {
                        entry.name = name.clone();
                    }
                }
                Property::Attributes(attrs) => {
                    expect_len(property.kind(), num_entries, attrs.len())?;
                    for (entry, attr) in entries.iter_mut().zip(attrs) {
                        entry.attributes = *attr;
                    }
                }
            }
        }

        let mut num_streams = 0;

        if let Some(layout) = &header.layout {
            let substreams = layout.substreams.as_ref();
            if let Some(ss) = substreams {
                validate_substreams(ss, layout.folders.len())?;
            }

            let mut member = 0usize;
            let mut stream = 0usize;

            for (folder_index, folder) in layout.folders.iter().enumerate() {
                let count = match substreams {
                    Some(ss) => ss.counts[folder_index],
                    None => 1,
                };
                if count == 0 {
                    return Err(BuildError::NoStreamInFolder(folder_index));
                }

                for _ in 0..count {
                    let size = match substreams {
                        Some(ss) => ss.sizes[stream],
                        None => folder.unpack_size,
                    };
                    // The whole-folder digest is only sharp enough for a
                    // folder holding exactly one stream, and a per-stream
                    // digest always wins over it.
                    let sub_crc = substreams.and_then(|ss| ss.crcs.get(stream).copied().flatten());
                    let crc = if count == 1 {
                        sub_crc.or(folder.crc)
                    } else {
                        sub_crc
                    };

                    // Empty members consume no stream; skip to the next
                    // stream-bearing one.
                    while member < entries.len() && entries[member].is_empty {
                        member += 1;
                    }
                    if member == entries.len() {
                        return Err(BuildError::LayoutMismatch);
                    }

                    let entry = &mut entries[member];
                    entry.size = Some(size);
                    entry.crc = crc;
                    entry.stream_index = Some(stream);
                    member += 1;
                    stream += 1;
                }
            }

            if entries[member..].iter().any(|entry| !entry.is_empty) {
                return Err(BuildError::LayoutMismatch);
            }

            num_streams = stream;
        }

        tracing::debug!(
            entries = entries.len(),
            streams = num_streams,
            folders = header.layout.as_ref().map(|l| l.folders.len()).unwrap_or(0),
            "built archive index"
        );

        Ok(ArchiveIndex {
            entries,
            num_streams,
        })
    }

    #[inline(always)]
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    #[inline(always)]
    pub fn entry(&self, member: usize) -> Option<&ArchiveEntry> {
        self.entries.get(member)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of content streams the archive carries.
    #[inline(always)]
    pub fn num_streams(&self) -> usize {
        self.num_streams
    }

    /// First member whose stored name matches. In loose mode the basename
    /// matches too, so `"file.txt"` finds `"dir/file.txt"`.
    pub fn find(&self, name: &str, loose: bool) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.name == name || (loose && crate::path::basename_matches(&entry.name, name))
        })
    }

    /// Member index for each content stream, in ascending stream order.
    pub fn stream_entries(&self) -> Vec<usize> {
        let mut map = vec![0usize; self.num_streams];
        for (member, entry) in self.entries.iter().enumerate() {
            if let Some(stream) = entry.stream_index {
                map[stream] = member;
            }
        }
        map
    }
}

#[inline]
fn expect_len(kind: &'static str, expected: usize, actual: usize) -> Result<(), BuildError> {
    if expected != actual {
        return Err(BuildError::PropertyLength {
            kind,
            expected,
            actual,
        });
    }
    Ok(())
}

fn validate_substreams(ss: &SubStreamsInfo, num_folders: usize) -> Result<(), BuildError> {
    if ss.counts.len() < num_folders {
        return Err(BuildError::TruncatedSubstreams {
            what: "per-folder stream counts",
            expected: num_folders,
            actual: ss.counts.len(),
        });
    }
    let total: usize = ss.counts.iter().take(num_folders).sum();
    if ss.sizes.len() < total {
        return Err(BuildError::TruncatedSubstreams {
            what: "per-stream sizes",
            expected: total,
            actual: ss.sizes.len(),
        });
    }
    Ok(())
}

/// Two-cursor walk for the sparse property vectors.
///
/// The empty-file and anti vectors carry one bit per member *already flagged
/// empty*, consumed in member order: an outer cursor runs over all members
/// while the inner one advances only on empty ones. Keeping the inner cursor
/// in one place avoids the off-by-one mistakes inline indexing invites.
struct SparseBitCursor<'a> {
    bits: &'a [bool],
    next: usize,
}

impl<'a> SparseBitCursor<'a> {
    fn new(bits: &'a [bool]) -> Self {
        SparseBitCursor { bits, next: 0 }
    }

    fn next_for(&mut self, entry: &ArchiveEntry) -> Option<bool> {
        if !entry.is_empty {
            return None;
        }
        let bit = self.bits.get(self.next).copied();
        self.next += 1;
        bit
    }
}

fn apply_to_empty(
    entries: &mut [ArchiveEntry],
    bits: &[bool],
    kind: &'static str,
    mut apply: impl FnMut(&mut ArchiveEntry, bool),
) -> Result<(), BuildError> {
    let empty_members = entries.iter().filter(|entry| entry.is_empty).count();
    expect_len(kind, empty_members, bits.len())?;

    let mut cursor = SparseBitCursor::new(bits);
    for entry in entries.iter_mut() {
        if let Some(bit) = cursor.next_for(entry) {
            apply(entry, bit);
        }
    }
    Ok(())
}
