//! Logical file index reconstruction and extraction orchestration for
//! 7z-style container archives.
//!
//! The container format stores file metadata as independent property arrays
//! and stores file bytes as solid compressed blocks, with nothing but
//! ordering conventions tying the two together. This crate rebuilds the
//! per-member view from a parsed header ([`ArchiveIndex::build`]) and drives
//! a decoding backend to extract members safely ([`Extractor`]).
//!
//! Parsing the binary header, the codecs themselves, and digest verification
//! live in collaborating crates; this one consumes an [`ArchiveHeader`] and a
//! [`StreamDecoder`].

mod decode;
mod extract;
mod header;
mod index;
mod path;
mod record;

pub use crate::decode::{DecodeError, Sink, SinkProvider, StreamDecoder};
pub use crate::extract::{
    EntrySinkProvider, ExtractError, ExtractOptions, ExtractStats, Extractor, Selection,
};
pub use crate::header::{ArchiveHeader, ContentLayout, FolderInfo, Property, SubStreamsInfo};
pub use crate::index::{ArchiveIndex, BuildError};
pub use crate::path::{EntryPath, EntryPathError};
pub use crate::record::ArchiveEntry;
