/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2008, Jerome Fimes, Communications & Systemes <jerome.fimes@c-s.fr>
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions
 * are met:
 * 1. Redistributions of source code must retain the above copyright
 *    notice, this list of conditions and the following disclaimer.
 * 2. Redistributions in binary form must reproduce the above copyright
 *    notice, this list of conditions and the following disclaimer in the
 *    documentation and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS `AS IS'
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
 * ARE DISCLAIMED.  IN NO EVENT SHALL THE COPYRIGHT OWNER OR CONTRIBUTORS BE
 * LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR
 * CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF
 * SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS
 * INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN
 * CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

use byteorder::{BigEndian, ByteOrder};

use crate::consts::STREAM_BUFFER_SIZE;
use crate::error::{Error, Result};

/// Backing callback of a buffered stream.
///
/// `read` returning `Ok(0)` signals end of stream; any `Err` is recorded
/// as a sticky stream error by the wrapper.
pub trait StreamIo {
  fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
    Err(Error::Io("stream is not readable"))
  }

  fn write(&mut self, _buf: &[u8]) -> Result<usize> {
    Err(Error::Io("stream is not writable"))
  }

  fn seek(&mut self, _pos: u64) -> Result<()> {
    Err(Error::Io("stream is not seekable"))
  }

  /// Total length, when known. Used for tile-part sanity checks.
  fn length(&self) -> Option<u64> {
    None
  }
}

/// Adapter for anything `std::io`-shaped.
pub struct IoStream<T>(pub T);

impl<T: std::io::Read + std::io::Seek> StreamIo for IoStream<T> {
  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    self.0.read(buf).map_err(|_| Error::CorruptStream)
  }

  fn seek(&mut self, pos: u64) -> Result<()> {
    self
      .0
      .seek(std::io::SeekFrom::Start(pos))
      .map(|_| ())
      .map_err(|_| Error::CorruptStream)
  }

  fn length(&self) -> Option<u64> {
    None
  }
}

enum Backing {
  /// Memory-backed stream. Reads are zero-copy interior slices; writes
  /// append (or overwrite) directly, no scratch buffer involved.
  Memory(Vec<u8>),
  Io(Box<dyn StreamIo>),
}

/// Double-buffered byte source/sink with endian-aware accessors.
///
/// A seek whose target lies inside the currently buffered range is
/// resolved by cursor arithmetic; anything else goes back to the
/// callback and invalidates the buffer. End-of-stream and error are both
/// sticky.
pub struct BufferedStream {
  backing: Backing,
  buf: Vec<u8>,
  /// Absolute offset of `buf[0]` (read mode) or of the first pending
  /// byte (write mode).
  buf_off: u64,
  buf_len: usize,
  pos: u64,
  writing: bool,
  eos: bool,
  err: bool,
}

impl BufferedStream {
  /// Reader over a fully materialised code-stream.
  pub fn from_bytes(data: Vec<u8>) -> Self {
    Self {
      backing: Backing::Memory(data),
      buf: Vec::new(),
      buf_off: 0,
      buf_len: 0,
      pos: 0,
      writing: false,
      eos: false,
      err: false,
    }
  }

  /// Reader over a user callback.
  pub fn from_io(io: Box<dyn StreamIo>) -> Self {
    Self {
      backing: Backing::Io(io),
      buf: vec![0u8; STREAM_BUFFER_SIZE],
      buf_off: 0,
      buf_len: 0,
      pos: 0,
      writing: false,
      eos: false,
      err: false,
    }
  }

  /// In-memory sink.
  pub fn writer() -> Self {
    Self {
      backing: Backing::Memory(Vec::new()),
      buf: Vec::new(),
      buf_off: 0,
      buf_len: 0,
      pos: 0,
      writing: true,
      eos: false,
      err: false,
    }
  }

  /// Sink over a user callback.
  pub fn writer_io(io: Box<dyn StreamIo>) -> Self {
    Self {
      backing: Backing::Io(io),
      buf: Vec::with_capacity(STREAM_BUFFER_SIZE),
      buf_off: 0,
      buf_len: 0,
      pos: 0,
      writing: true,
      eos: false,
      err: false,
    }
  }

  pub fn tell(&self) -> u64 {
    self.pos
  }

  pub fn is_eos(&self) -> bool {
    self.eos
  }

  pub fn has_error(&self) -> bool {
    self.err
  }

  pub fn length(&self) -> Option<u64> {
    match &self.backing {
      Backing::Memory(data) => Some(data.len() as u64),
      Backing::Io(io) => io.length(),
    }
  }

  /// Bytes left until end of stream, when the length is known.
  pub fn remaining(&self) -> Option<u64> {
    self.length().map(|l| l.saturating_sub(self.pos))
  }

  fn fail<T>(&mut self, e: Error) -> Result<T> {
    if e == Error::EndOfStream {
      self.eos = true;
    } else {
      self.err = true;
    }
    Err(e)
  }

  /// Refill the scratch buffer from the callback at the current cursor.
  fn refill(&mut self) -> Result<()> {
    let io = match &mut self.backing {
      Backing::Io(io) => io,
      Backing::Memory(_) => unreachable!("memory streams never refill"),
    };
    let n = io.read(&mut self.buf[..])?;
    self.buf_off = self.pos;
    self.buf_len = n;
    if n == 0 {
      return Err(Error::EndOfStream);
    }
    Ok(())
  }

  pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
    if self.err {
      return Err(Error::CorruptStream);
    }
    if self.eos {
      return Err(Error::EndOfStream);
    }
    match &mut self.backing {
      Backing::Memory(data) => {
        let start = self.pos as usize;
        let end = start + out.len();
        if end > data.len() {
          return self.fail(Error::EndOfStream);
        }
        out.copy_from_slice(&data[start..end]);
        self.pos = end as u64;
        Ok(())
      }
      Backing::Io(_) => {
        let mut filled = 0usize;
        while filled < out.len() {
          let in_buf = self.pos.checked_sub(self.buf_off).map(|d| d as usize);
          match in_buf {
            Some(off) if off < self.buf_len => {
              let take = (self.buf_len - off).min(out.len() - filled);
              out[filled..filled + take].copy_from_slice(&self.buf[off..off + take]);
              filled += take;
              self.pos += take as u64;
            }
            _ => {
              if let Err(e) = self.refill() {
                return self.fail(e);
              }
            }
          }
        }
        Ok(())
      }
    }
  }

  /// Zero-copy read for memory-backed streams; buffered copy otherwise.
  pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; n];
    self.read_exact(&mut out)?;
    Ok(out)
  }

  /// Interior slice of a memory-backed stream, without copying.
  pub fn peek_slice(&self, n: usize) -> Option<&[u8]> {
    match &self.backing {
      Backing::Memory(data) => {
        let start = self.pos as usize;
        data.get(start..start + n)
      }
      Backing::Io(_) => None,
    }
  }

  pub fn read_u8(&mut self) -> Result<u8> {
    let mut b = [0u8; 1];
    self.read_exact(&mut b)?;
    Ok(b[0])
  }

  pub fn read_u16(&mut self) -> Result<u16> {
    let mut b = [0u8; 2];
    self.read_exact(&mut b)?;
    Ok(BigEndian::read_u16(&b))
  }

  pub fn read_u24(&mut self) -> Result<u32> {
    let mut b = [0u8; 3];
    self.read_exact(&mut b)?;
    Ok(BigEndian::read_u24(&b))
  }

  pub fn read_u32(&mut self) -> Result<u32> {
    let mut b = [0u8; 4];
    self.read_exact(&mut b)?;
    Ok(BigEndian::read_u32(&b))
  }

  pub fn read_u64(&mut self) -> Result<u64> {
    let mut b = [0u8; 8];
    self.read_exact(&mut b)?;
    Ok(BigEndian::read_u64(&b))
  }

  pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    if self.err {
      return Err(Error::CorruptStream);
    }
    debug_assert!(self.writing);
    match &mut self.backing {
      Backing::Memory(data) => {
        let start = self.pos as usize;
        if start > data.len() {
          data.resize(start, 0);
        }
        let overlap = (data.len() - start).min(bytes.len());
        data[start..start + overlap].copy_from_slice(&bytes[..overlap]);
        data.extend_from_slice(&bytes[overlap..]);
        self.pos += bytes.len() as u64;
        Ok(())
      }
      Backing::Io(_) => {
        self.buf.extend_from_slice(bytes);
        self.pos += bytes.len() as u64;
        if self.buf.len() >= STREAM_BUFFER_SIZE {
          self.flush()?;
        }
        Ok(())
      }
    }
  }

  pub fn write_u8(&mut self, v: u8) -> Result<()> {
    self.write_bytes(&[v])
  }

  pub fn write_u16(&mut self, v: u16) -> Result<()> {
    let mut b = [0u8; 2];
    BigEndian::write_u16(&mut b, v);
    self.write_bytes(&b)
  }

  pub fn write_u24(&mut self, v: u32) -> Result<()> {
    let mut b = [0u8; 3];
    BigEndian::write_u24(&mut b, v);
    self.write_bytes(&b)
  }

  pub fn write_u32(&mut self, v: u32) -> Result<()> {
    let mut b = [0u8; 4];
    BigEndian::write_u32(&mut b, v);
    self.write_bytes(&b)
  }

  pub fn write_u64(&mut self, v: u64) -> Result<()> {
    let mut b = [0u8; 8];
    BigEndian::write_u64(&mut b, v);
    self.write_bytes(&b)
  }

  pub fn flush(&mut self) -> Result<()> {
    if !self.writing {
      return Ok(());
    }
    if let Backing::Io(io) = &mut self.backing {
      let mut off = 0usize;
      while off < self.buf.len() {
        let n = match io.write(&self.buf[off..]) {
          Ok(0) | Err(_) => return self.fail(Error::CorruptStream),
          Ok(n) => n,
        };
        off += n;
      }
      self.buf.clear();
      self.buf_off = self.pos;
    }
    Ok(())
  }

  fn seek_backing(&mut self, pos: u64) -> Result<()> {
    let r = match &mut self.backing {
      Backing::Io(io) => io.seek(pos),
      Backing::Memory(_) => Ok(()),
    };
    if r.is_err() {
      return self.fail(Error::CorruptStream);
    }
    Ok(())
  }

  /// Absolute seek. For buffered callback streams a target inside the
  /// current window is pure cursor arithmetic.
  pub fn seek(&mut self, pos: u64) -> Result<()> {
    if self.err {
      return Err(Error::CorruptStream);
    }
    if matches!(self.backing, Backing::Memory(_)) {
      self.pos = pos;
      self.eos = false;
      return Ok(());
    }
    if self.writing {
      // pending bytes must land before the cursor moves
      if pos != self.pos {
        self.flush()?;
        self.seek_backing(pos)?;
        self.pos = pos;
        self.buf_off = pos;
      }
      return Ok(());
    }
    if pos >= self.buf_off && pos < self.buf_off + self.buf_len as u64 {
      self.pos = pos;
      return Ok(());
    }
    self.seek_backing(pos)?;
    self.buf_len = 0;
    self.buf_off = pos;
    self.pos = pos;
    self.eos = false;
    Ok(())
  }

  pub fn skip(&mut self, n: i64) -> Result<()> {
    let target = if n >= 0 {
      self.pos.checked_add(n as u64)
    } else {
      self.pos.checked_sub((-n) as u64)
    };
    match target {
      Some(t) => self.seek(t),
      None => self.fail(Error::InvalidParameter("seek out of range")),
    }
  }

  /// Consume the in-memory sink.
  pub fn into_bytes(mut self) -> Result<Vec<u8>> {
    self.flush()?;
    match self.backing {
      Backing::Memory(data) => Ok(data),
      Backing::Io(_) => Err(Error::InvalidParameter("stream is not memory backed")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip_scalars() {
    let mut w = BufferedStream::writer();
    w.write_u8(0xab).unwrap();
    w.write_u16(0x1234).unwrap();
    w.write_u24(0x00dead).unwrap();
    w.write_u32(0xdeadbeef).unwrap();
    w.write_u64(0x0102030405060708).unwrap();
    let bytes = w.into_bytes().unwrap();
    assert_eq!(bytes.len(), 1 + 2 + 3 + 4 + 8);
    // big-endian on the wire
    assert_eq!(&bytes[1..3], &[0x12, 0x34]);

    let mut r = BufferedStream::from_bytes(bytes);
    assert_eq!(r.read_u8().unwrap(), 0xab);
    assert_eq!(r.read_u16().unwrap(), 0x1234);
    assert_eq!(r.read_u24().unwrap(), 0x00dead);
    assert_eq!(r.read_u32().unwrap(), 0xdeadbeef);
    assert_eq!(r.read_u64().unwrap(), 0x0102030405060708);
    assert!(matches!(r.read_u8(), Err(Error::EndOfStream)));
    // end-of-stream is sticky
    assert!(r.is_eos());
  }

  #[test]
  fn seek_and_overwrite() {
    let mut w = BufferedStream::writer();
    w.write_u32(0).unwrap();
    w.write_u16(0xffff).unwrap();
    w.seek(0).unwrap();
    w.write_u32(0x11223344).unwrap();
    let bytes = w.into_bytes().unwrap();
    assert_eq!(bytes, vec![0x11, 0x22, 0x33, 0x44, 0xff, 0xff]);
  }

  #[test]
  fn buffered_io_reader() {
    struct Chunky(Vec<u8>, usize);
    impl StreamIo for Chunky {
      fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // hand out at most 3 bytes at a time
        let n = buf.len().min(3).min(self.0.len() - self.1);
        buf[..n].copy_from_slice(&self.0[self.1..self.1 + n]);
        self.1 += n;
        Ok(n)
      }
      fn seek(&mut self, pos: u64) -> Result<()> {
        self.1 = pos as usize;
        Ok(())
      }
    }
    let data: Vec<u8> = (0u8..32).collect();
    let mut r = BufferedStream::from_io(Box::new(Chunky(data, 0)));
    assert_eq!(r.read_u32().unwrap(), 0x00010203);
    r.seek(16).unwrap();
    assert_eq!(r.read_u16().unwrap(), 0x1011);
    r.seek(1).unwrap();
    assert_eq!(r.read_u8().unwrap(), 1);
    assert_eq!(r.tell(), 2);
  }
}
