//! The boundary to the stream-decoding collaborator.
//!
//! Folders are solid compression blocks: their member streams can only be
//! produced front to back, and a decoder that has moved past a folder should
//! not be asked to revisit it. The contract below encodes that: batch
//! requests carry strictly ascending stream indices, and sinks are opened and
//! closed one at a time, in that order.

use std::io::Write;

/// Destination for one decoded content stream.
pub type Sink = Box<dyn Write>;

/// Errors surfaced by the decode collaborator.
///
/// These abort the current extraction call; the archive itself remains
/// usable and the caller may retry with a narrower selection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Corrupt stream data: {0}")]
    Corrupt(String),

    #[error("I/O failure while decoding")]
    Io(#[from] std::io::Error),
}

/// Supplies and finalizes sinks during a batched decode.
///
/// The decoder must call [`open`][SinkProvider::open] before producing a
/// stream's bytes and, for every `open` that returned a sink, call
/// [`close`][SinkProvider::close] exactly once afterwards. That pairing holds
/// on every exit path: if decoding a later stream in the batch fails, sinks
/// already opened must still have been closed.
pub trait SinkProvider {
    /// Open the destination for `stream_index`. Returning `Ok(None)` skips
    /// the stream without error; the decoder still decodes past its bytes.
    fn open(&mut self, stream_index: usize) -> Result<Option<Sink>, DecodeError>;

    /// Finalize the destination for `stream_index` after its bytes have been
    /// fully delivered.
    fn close(&mut self, stream_index: usize, sink: Sink) -> Result<(), DecodeError>;
}

/// The decode service: turns content-stream indices back into bytes.
///
/// Implementations own the archive's readable byte source and the codec
/// pipeline. This crate only ever drives them sequentially.
pub trait StreamDecoder {
    /// Decode exactly one content stream into `dest`.
    fn decode_one(&mut self, stream_index: usize, dest: &mut dyn Write) -> Result<(), DecodeError>;

    /// Decode a set of streams, in the order given.
    ///
    /// `stream_indices` must be strictly ascending. Any decode failure aborts
    /// the remainder of the batch and propagates unchanged.
    fn decode_many(
        &mut self,
        stream_indices: &[usize],
        sinks: &mut dyn SinkProvider,
    ) -> Result<(), DecodeError>;
}
