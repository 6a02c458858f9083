use thiserror::Error;

/// Caller-observable error kinds.
///
/// The first group maps one-to-one onto the status codes surfaced through
/// the public API; the second group is produced by the lower layers and is
/// converted (or recovered from) by the tile processor and the code-stream
/// state machine before it reaches a caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("bad marker 0x{0:04x}")]
  BadMarker(u32),
  #[error("corrupt packet header: {0}")]
  CorruptPacketHeader(&'static str),
  #[error("truncated packet header")]
  TruncatedPacketHeader,
  #[error("corrupt packet data")]
  CorruptPacketData,
  #[error("unsupported profile: {0}")]
  UnsupportedProfile(&'static str),
  #[error("out of memory")]
  OutOfMemory,
  #[error("i/o error: {0}")]
  Io(&'static str),
  #[error("invalid parameter: {0}")]
  InvalidParameter(&'static str),

  /// The backing stream callback failed or reported a short write.
  #[error("corrupt stream")]
  CorruptStream,
  /// Zero-byte read with outstanding demand. Sticky on the stream.
  #[error("end of stream")]
  EndOfStream,
  /// Unforgiving read of a sparse-buffer block that was never written.
  #[error("missing sparse block")]
  MissingSparseBlock,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
