use std::time::SystemTime;

/// One logical archive member, reconstructed from the header's property
/// arrays and stream layout.
///
/// Entries are ordered by archive member position, and the position is the
/// member's identity for the whole life of the index. The table is built once
/// by [`ArchiveIndex::build`][crate::ArchiveIndex::build] and never mutated
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// The path as stored in the archive. May contain `/` or `\` separators;
    /// use [`EntryPath`][crate::EntryPath] before touching the filesystem.
    pub name: String,

    /// True if the member carries no data stream: a directory, a zero-byte
    /// file, or a deletion marker.
    pub is_empty: bool,

    /// True if the member is a directory. Implies `is_empty`.
    pub is_directory: bool,

    /// True if the member is an "anti" entry, a deletion marker left by an
    /// incremental update. Implies `is_empty`.
    pub is_deleted: bool,

    /// Uncompressed length in bytes. `Some(0)` for recognized empty members,
    /// `None` when the header never defined a size for this member.
    pub size: Option<u64>,

    /// CRC32 of the decompressed content, when the container recorded one.
    pub crc: Option<u32>,

    /// Last-modified timestamp, when the container recorded one.
    pub modified: Option<SystemTime>,

    /// Platform file-attribute bitmask. Opaque to this crate.
    pub attributes: Option<u32>,

    /// Index into the archive's flat sequence of content streams. Present
    /// exactly when `is_empty` is false and the header declared a stream
    /// layout; this is the join key to the decode service.
    pub stream_index: Option<usize>,
}

impl ArchiveEntry {
    /// True if this member is bound to a content stream.
    #[inline(always)]
    pub fn has_stream(&self) -> bool {
        self.stream_index.is_some()
    }

    /// True if this member is a zero-byte file: empty, but neither a
    /// directory nor a deletion marker.
    #[inline(always)]
    pub fn is_empty_file(&self) -> bool {
        self.is_empty && !self.is_directory && !self.is_deleted
    }
}
