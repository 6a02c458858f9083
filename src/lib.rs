//! JPEG 2000 Part-1 / Part-15 (HTJ2K) code-stream codec.
//!
//! The crate covers the code-stream layer only: marker parsing, tile
//! processing, packet (T2) and block (T1) coding, the wavelet transforms
//! and the component transforms. Container formats (JP2 boxes etc.) are
//! out of scope; feed it a raw code-stream.

#[macro_use]
extern crate bitflags;

#[macro_use]
mod event;

mod bio;
mod cio;
mod consts;
mod dwt;
mod error;
mod ht;
mod image;
mod j2k;
mod lane;
mod math;
mod mct;
mod mqc;
mod pi;
mod quantizer;
mod scheduler;
mod sparse_array;
mod t1;
mod t1_luts;
mod t2;
mod tcd;
mod tgt;
mod types;

pub use cio::{BufferedStream, IoStream, StreamIo};
pub use consts::CblkStyle;
pub use error::{Error, Result};
pub use event::EventManager;
pub use image::{ColorSpace, Image, ImageComponent, ImageComponentParams};
pub use math::{Line32, Point32, Rect32};
pub use sparse_array::SparseArray;
pub use types::{
  CacheStrategy, CodingParams, CustomMct, DecodeParameters, EncodeParameters, Poc,
  ProgressionOrder,
};

/// Magic bytes for a raw J2K code-stream.
pub const J2K_CODESTREAM_MAGIC: &[u8] = &[0xff, 0x4f, 0xff, 0x51];
/// Magic bytes for JP2 (RFC 3745) — recognised, not parsed here.
pub const JP2_RFC3745_MAGIC: &[u8] = &[
  0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20, 0x0d, 0x0a, 0x87, 0x0a,
];
pub const JP2_MAGIC: &[u8] = &[0x0d, 0x0a, 0x87, 0x0a];

/// Supported Jpeg 2000 wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum J2KFormat {
  JP2,
  J2K,
}

/// Detect the format from magic bytes.
pub fn detect_format(buf: &[u8]) -> Result<J2KFormat> {
  if buf.starts_with(JP2_RFC3745_MAGIC) || buf.starts_with(JP2_MAGIC) {
    Ok(J2KFormat::JP2)
  } else if buf.starts_with(J2K_CODESTREAM_MAGIC) {
    Ok(J2KFormat::J2K)
  } else {
    Err(Error::BadMarker(
      buf.first().copied().unwrap_or(0) as u32
    ))
  }
}

/// Header summary available without decoding any tile.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
  pub image: Image,
  pub tw: u32,
  pub th: u32,
  pub rsiz: u16,
}

/// Parse the main header of a code-stream.
pub fn read_header(data: &[u8], mgr: &mut EventManager) -> Result<HeaderInfo> {
  let mut stream = BufferedStream::from_bytes(data.to_vec());
  let mut dec = j2k::CodeStreamDecoder::new();
  dec.read_header(&mut stream, mgr)?;
  Ok(HeaderInfo {
    image: dec.image.clone(),
    tw: dec.cp.tw,
    th: dec.cp.th,
    rsiz: dec.cp.rsiz,
  })
}

/// Decompress a raw J2K code-stream into raster planes.
pub fn decompress(
  data: Vec<u8>,
  params: &DecodeParameters,
  mgr: &mut EventManager,
) -> Result<Image> {
  let mut stream = BufferedStream::from_bytes(data);
  let mut dec = j2k::CodeStreamDecoder::new();
  dec.read_header(&mut stream, mgr)?;
  dec.read_tile_parts(&mut stream, mgr)?;
  dec.decode_tiles(params, mgr)
}

/// Compress an image into a raw J2K code-stream.
pub fn compress(
  image: &Image,
  params: &EncodeParameters,
  mgr: &mut EventManager,
) -> Result<Vec<u8>> {
  let mut stream = BufferedStream::writer();
  let mut enc = j2k::CodeStreamEncoder::new(image, params)?;
  enc.encode(image, &mut stream, mgr)?;
  stream.into_bytes()
}

/// Compress to a caller-provided sink (for callback-backed streams).
pub fn compress_to(
  image: &Image,
  params: &EncodeParameters,
  stream: &mut BufferedStream,
  mgr: &mut EventManager,
) -> Result<u64> {
  let mut enc = j2k::CodeStreamEncoder::new(image, params)?;
  enc.encode(image, stream, mgr)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn magic_detection() {
    assert_eq!(detect_format(&[0xff, 0x4f, 0xff, 0x51, 0x00]).unwrap(), J2KFormat::J2K);
    assert_eq!(detect_format(JP2_RFC3745_MAGIC).unwrap(), J2KFormat::JP2);
    assert!(detect_format(&[0x00, 0x01]).is_err());
  }
}
