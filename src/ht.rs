//! High-throughput (Part-15) cleanup coder.
//!
//! One cleanup pass per code-block over three streams: a forward MagSgn
//! stream carrying magnitude suffixes and signs, a VLC stream carrying
//! significance patterns and Exp-Golomb exponent prefixes, and a MEL
//! run-length stream, stored byte-reversed at the tail of the segment.
//! Significance is coded per 1x2 vertical pair inside 2-row stripes.
//! Decoding runs the streams from both ends; a block whose streams do not
//! consume their signalled extents is rejected and left zero.

use crate::bio::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::math::uint_floorlog2;

/// MEL adaptive run-length encoder: 13 exponent states.
struct MelEncoder {
  bw: BitWriter,
  k: i32,
  run: u32,
}

impl MelEncoder {
  fn new() -> Self {
    Self {
      bw: BitWriter::new(),
      k: 0,
      run: 0,
    }
  }

  fn encode(&mut self, sig: bool) {
    if !sig {
      self.run += 1;
      if self.run == 1 << self.k {
        self.bw.putbit(0);
        self.k = (self.k + 1).min(12);
        self.run = 0;
      }
    } else {
      self.bw.putbit(1);
      if self.k > 0 {
        self.bw.write(self.run, self.k as u32);
      }
      self.run = 0;
      self.k = (self.k - 1).max(0);
    }
  }

  fn into_bytes(mut self) -> Vec<u8> {
    if self.run > 0 {
      // an over-long run is harmless: the decoder stops at the last pair
      self.bw.putbit(0);
    }
    self.bw.into_bytes()
  }
}

struct MelDecoder<'a> {
  br: BitReader<'a>,
  k: i32,
  run: u32,
  pending_one: bool,
}

impl<'a> MelDecoder<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self {
      br: BitReader::new(data),
      k: 0,
      run: 0,
      pending_one: false,
    }
  }

  fn decode(&mut self) -> Result<bool> {
    loop {
      if self.run > 0 {
        self.run -= 1;
        return Ok(false);
      }
      if self.pending_one {
        self.pending_one = false;
        self.k = (self.k - 1).max(0);
        return Ok(true);
      }
      if self.br.getbit()? == 0 {
        self.run = 1 << self.k;
        self.k = (self.k + 1).min(12);
      } else {
        self.run = if self.k > 0 { self.br.read(self.k as u32)? } else { 0 };
        self.pending_one = true;
      }
    }
  }

  fn bytes_read(&self) -> usize {
    self.br.bytes_read()
  }
}

#[derive(Debug, Default)]
pub(crate) struct HtEncodeResult {
  pub stream: Vec<u8>,
  pub numbps: u32,
  /// Distortion removed by the single cleanup pass.
  pub distortion: f64,
}

/// Encode one code-block with the HT cleanup coder.
pub(crate) fn encode_cblk(data: &[i32], w: usize, h: usize) -> HtEncodeResult {
  let max = data.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
  let numbps = if max == 0 { 0 } else { uint_floorlog2(max) + 1 };
  if numbps == 0 {
    return HtEncodeResult::default();
  }
  let mut magsgn = BitWriter::new();
  let mut vlc = BitWriter::new();
  let mut mel = MelEncoder::new();
  let mut distortion = 0f64;
  for y0 in (0..h).step_by(2) {
    for x in 0..w {
      let top = data[y0 * w + x];
      let bot = if y0 + 1 < h { data[(y0 + 1) * w + x] } else { 0 };
      let rho = (top != 0) as u32 | (((y0 + 1 < h && bot != 0) as u32) << 1);
      mel.encode(rho != 0);
      if rho == 0 {
        continue;
      }
      vlc.write(rho, 2);
      for &v in &[top, bot] {
        let mag = v.unsigned_abs();
        if mag == 0 {
          continue;
        }
        let u = uint_floorlog2(mag) + 1;
        vlc.putcommacode(u - 1);
        if u > 1 {
          magsgn.write(mag - (1 << (u - 1)), u - 1);
        }
        magsgn.putbit((v < 0) as u32);
        distortion += (mag as f64) * (mag as f64);
      }
    }
  }
  let magsgn = magsgn.into_bytes();
  let vlc = vlc.into_bytes();
  let mut mel = mel.into_bytes();
  mel.reverse();
  let mut stream = magsgn;
  stream.extend_from_slice(&vlc);
  stream.extend_from_slice(&mel);
  stream.extend_from_slice(&(vlc.len() as u16).to_be_bytes());
  stream.extend_from_slice(&(mel.len() as u16).to_be_bytes());
  HtEncodeResult {
    stream,
    numbps,
    distortion,
  }
}

/// Decode one HT code-block. Any inconsistency between the forward and
/// reverse parses rejects the whole block (the caller leaves it zero).
pub(crate) fn decode_cblk(stream: &[u8], numbps: u32, w: usize, h: usize) -> Result<Vec<i32>> {
  let mut out = vec![0i32; w * h];
  if numbps == 0 {
    return Ok(out);
  }
  if stream.len() < 4 {
    return Err(Error::CorruptPacketData);
  }
  let n = stream.len();
  let mel_len = u16::from_be_bytes([stream[n - 2], stream[n - 1]]) as usize;
  let vlc_len = u16::from_be_bytes([stream[n - 4], stream[n - 3]]) as usize;
  let body = n - 4;
  if mel_len + vlc_len > body {
    return Err(Error::CorruptPacketData);
  }
  let magsgn_len = body - mel_len - vlc_len;
  let magsgn_bytes = &stream[..magsgn_len];
  let vlc_bytes = &stream[magsgn_len..magsgn_len + vlc_len];
  let mut mel_bytes = stream[magsgn_len + vlc_len..body].to_vec();
  mel_bytes.reverse();

  let mut magsgn = BitReader::new(magsgn_bytes);
  let mut vlc = BitReader::new(vlc_bytes);
  let mut mel = MelDecoder::new(&mel_bytes);

  let map = |e: Error| {
    if e == Error::TruncatedPacketHeader {
      Error::CorruptPacketData
    } else {
      e
    }
  };

  for y0 in (0..h).step_by(2) {
    for x in 0..w {
      if !mel.decode().map_err(map)? {
        continue;
      }
      let rho = vlc.read(2).map_err(map)?;
      if rho == 0 {
        return Err(Error::CorruptPacketData);
      }
      for row in 0..2 {
        if rho & (1 << row) == 0 {
          continue;
        }
        let y = y0 + row;
        if y >= h {
          return Err(Error::CorruptPacketData);
        }
        let u = vlc.getcommacode().map_err(map)? + 1;
        if u > numbps {
          return Err(Error::CorruptPacketData);
        }
        let mut mag = 1u32 << (u - 1);
        if u > 1 {
          mag |= magsgn.read(u - 1).map_err(map)?;
        }
        let neg = magsgn.getbit().map_err(map)? != 0;
        out[y * w + x] = if neg { -(mag as i32) } else { mag as i32 };
      }
    }
  }
  // bidirectional consistency: every stream must end within its final
  // padding byte
  if magsgn.bytes_read() + 1 < magsgn_len
    || vlc.bytes_read() + 1 < vlc_len
    || mel.bytes_read() + 1 < mel_bytes.len()
  {
    return Err(Error::CorruptPacketData);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn block(w: usize, h: usize, seed: u32, sparsity: u32) -> Vec<i32> {
    (0..w * h)
      .map(|i| {
        let r = (i as u32).wrapping_mul(2654435761).wrapping_add(seed) >> 13;
        if r % sparsity != 0 {
          0
        } else {
          let v = (r % 1021) as i32;
          if r & 4 != 0 {
            -v
          } else {
            v
          }
        }
      })
      .collect()
  }

  fn round_trip(w: usize, h: usize, seed: u32, sparsity: u32) {
    let data = block(w, h, seed, sparsity);
    let enc = encode_cblk(&data, w, h);
    if data.iter().all(|&v| v == 0) {
      assert_eq!(enc.numbps, 0);
      return;
    }
    let dec = decode_cblk(&enc.stream, enc.numbps, w, h).unwrap();
    assert_eq!(dec, data, "{}x{} seed {}", w, h, seed);
  }

  #[test]
  fn dense_round_trip() {
    round_trip(16, 16, 3, 1);
    round_trip(32, 32, 5, 1);
  }

  #[test]
  fn sparse_round_trip() {
    round_trip(16, 16, 7, 5);
    round_trip(64, 64, 11, 17);
  }

  #[test]
  fn odd_height_round_trip() {
    round_trip(8, 7, 13, 2);
    round_trip(3, 1, 17, 1);
  }

  #[test]
  fn zero_block() {
    let enc = encode_cblk(&[0; 16], 4, 4);
    assert_eq!(enc.numbps, 0);
    assert!(enc.stream.is_empty());
  }

  #[test]
  fn corrupt_stream_rejected() {
    let data = block(16, 16, 19, 2);
    let enc = encode_cblk(&data, 16, 16);
    // lie about the stream split
    let mut bad = enc.stream.clone();
    let n = bad.len();
    bad[n - 1] = 0xff;
    bad[n - 2] = 0xff;
    assert!(decode_cblk(&bad, enc.numbps, 16, 16).is_err());

    // drop the tail of the MagSgn region: the forward parse runs dry
    let dec_ok = decode_cblk(&enc.stream, enc.numbps, 16, 16).unwrap();
    assert_eq!(dec_ok, data);
    let n = enc.stream.len();
    let mel_len = u16::from_be_bytes([enc.stream[n - 2], enc.stream[n - 1]]) as usize;
    let vlc_len = u16::from_be_bytes([enc.stream[n - 4], enc.stream[n - 3]]) as usize;
    let magsgn_len = n - 4 - mel_len - vlc_len;
    let mut cut = enc.stream.clone();
    cut.drain(magsgn_len - 2..magsgn_len);
    assert!(decode_cblk(&cut, enc.numbps, 16, 16).is_err());
  }
}
