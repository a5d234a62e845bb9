//! Already-decoded header structures, as handed over by the deserialization
//! collaborator.
//!
//! This crate never touches the container's bytes. Whatever parsed the binary
//! header hands us an [`ArchiveHeader`]: the member count, the property
//! arrays in the order they appeared on disk, and the content-stream layout
//! when the archive has one.

use std::time::SystemTime;

/// A single typed property array from the parsed header.
///
/// The container encodes each property kind independently and in no
/// guaranteed order, so the index builder applies them strictly in the order
/// they appear in [`ArchiveHeader::properties`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// One bit per member: true if the member has no data stream.
    EmptyStreams(Vec<bool>),

    /// Sparse: one bit per member already flagged empty, in member order.
    /// A set bit marks an explicit empty *file* rather than a directory.
    EmptyFiles(Vec<bool>),

    /// Sparse, same convention as [`Property::EmptyFiles`]. A set bit marks
    /// a deletion ("anti") member.
    Anti(Vec<bool>),

    /// One slot per member: last-modified timestamps.
    ModifiedTimes(Vec<Option<SystemTime>>),

    /// One name per member.
    Names(Vec<String>),

    /// One slot per member: platform attribute bitmasks.
    Attributes(Vec<Option<u32>>),
}

impl Property {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Property::EmptyStreams(_) => "empty-streams",
            Property::EmptyFiles(_) => "empty-files",
            Property::Anti(_) => "anti",
            Property::ModifiedTimes(_) => "modified-times",
            Property::Names(_) => "names",
            Property::Attributes(_) => "attributes",
        }
    }
}

/// One decode unit: a solid block of one or more logically concatenated
/// content streams sharing a single compression pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    /// Total decompressed size of the whole folder.
    pub unpack_size: u64,

    /// Whole-folder CRC32. Only meaningful when the folder holds exactly one
    /// stream.
    pub crc: Option<u32>,
}

/// How each folder was split into member streams.
///
/// When absent from [`ContentLayout`], every folder holds exactly one stream
/// sized by its total decompressed size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubStreamsInfo {
    /// Number of member streams per folder, in folder order.
    pub counts: Vec<usize>,

    /// Decompressed size of each individual stream, in global stream order.
    pub sizes: Vec<u64>,

    /// Per-stream CRC32 digests, in global stream order. May be shorter than
    /// the stream total; missing tail positions simply have no digest.
    pub crcs: Vec<Option<u32>>,
}

/// The content-stream layout section of the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    /// Decode units in stream order.
    pub folders: Vec<FolderInfo>,

    /// Substream split, when folders hold more than one stream each.
    pub substreams: Option<SubStreamsInfo>,
}

/// The fully parsed archive header.
///
/// Archives holding only directories and empty files legitimately have no
/// content layout at all; `layout` is `None` in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Number of archive members.
    pub num_entries: usize,

    /// Property arrays in the order they appeared in the header.
    pub properties: Vec<Property>,

    /// Content-stream layout, when the archive carries any stream data.
    pub layout: Option<ContentLayout>,
}
