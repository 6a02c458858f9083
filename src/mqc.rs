/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2001-2003, David Janssens
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

//! MQ binary arithmetic coder (ISO/IEC 15444-1 Annex C).

use crate::consts::{T1_CTXNO_AGG, T1_CTXNO_UNI, T1_NUMCTXS};

#[derive(Debug, Clone, Copy)]
struct State {
  qe: u32,
  nmps: u8,
  nlps: u8,
  switch: u8,
}

/// Probability table C-2: 47 states.
#[rustfmt::skip]
static STATES: [State; 47] = [
  State { qe: 0x5601, nmps: 1,  nlps: 1,  switch: 1 },
  State { qe: 0x3401, nmps: 2,  nlps: 6,  switch: 0 },
  State { qe: 0x1801, nmps: 3,  nlps: 9,  switch: 0 },
  State { qe: 0x0AC1, nmps: 4,  nlps: 12, switch: 0 },
  State { qe: 0x0521, nmps: 5,  nlps: 29, switch: 0 },
  State { qe: 0x0221, nmps: 38, nlps: 33, switch: 0 },
  State { qe: 0x5601, nmps: 7,  nlps: 6,  switch: 1 },
  State { qe: 0x5401, nmps: 8,  nlps: 14, switch: 0 },
  State { qe: 0x4801, nmps: 9,  nlps: 14, switch: 0 },
  State { qe: 0x3801, nmps: 10, nlps: 14, switch: 0 },
  State { qe: 0x3001, nmps: 11, nlps: 17, switch: 0 },
  State { qe: 0x2401, nmps: 12, nlps: 18, switch: 0 },
  State { qe: 0x1C01, nmps: 13, nlps: 20, switch: 0 },
  State { qe: 0x1601, nmps: 29, nlps: 21, switch: 0 },
  State { qe: 0x5601, nmps: 15, nlps: 14, switch: 1 },
  State { qe: 0x5401, nmps: 16, nlps: 14, switch: 0 },
  State { qe: 0x5101, nmps: 17, nlps: 15, switch: 0 },
  State { qe: 0x4801, nmps: 18, nlps: 16, switch: 0 },
  State { qe: 0x3801, nmps: 19, nlps: 17, switch: 0 },
  State { qe: 0x3401, nmps: 20, nlps: 18, switch: 0 },
  State { qe: 0x3001, nmps: 21, nlps: 19, switch: 0 },
  State { qe: 0x2801, nmps: 22, nlps: 19, switch: 0 },
  State { qe: 0x2401, nmps: 23, nlps: 20, switch: 0 },
  State { qe: 0x2201, nmps: 24, nlps: 21, switch: 0 },
  State { qe: 0x1C01, nmps: 25, nlps: 22, switch: 0 },
  State { qe: 0x1801, nmps: 26, nlps: 23, switch: 0 },
  State { qe: 0x1601, nmps: 27, nlps: 24, switch: 0 },
  State { qe: 0x1401, nmps: 28, nlps: 25, switch: 0 },
  State { qe: 0x1201, nmps: 29, nlps: 26, switch: 0 },
  State { qe: 0x1101, nmps: 30, nlps: 27, switch: 0 },
  State { qe: 0x0AC1, nmps: 31, nlps: 28, switch: 0 },
  State { qe: 0x09C1, nmps: 32, nlps: 29, switch: 0 },
  State { qe: 0x08A1, nmps: 33, nlps: 30, switch: 0 },
  State { qe: 0x0521, nmps: 34, nlps: 31, switch: 0 },
  State { qe: 0x0441, nmps: 35, nlps: 32, switch: 0 },
  State { qe: 0x02A1, nmps: 36, nlps: 33, switch: 0 },
  State { qe: 0x0221, nmps: 37, nlps: 34, switch: 0 },
  State { qe: 0x0141, nmps: 38, nlps: 35, switch: 0 },
  State { qe: 0x0111, nmps: 39, nlps: 36, switch: 0 },
  State { qe: 0x0085, nmps: 40, nlps: 37, switch: 0 },
  State { qe: 0x0049, nmps: 41, nlps: 38, switch: 0 },
  State { qe: 0x0025, nmps: 42, nlps: 39, switch: 0 },
  State { qe: 0x0015, nmps: 43, nlps: 40, switch: 0 },
  State { qe: 0x0009, nmps: 44, nlps: 41, switch: 0 },
  State { qe: 0x0005, nmps: 45, nlps: 42, switch: 0 },
  State { qe: 0x0001, nmps: 45, nlps: 43, switch: 0 },
  State { qe: 0x5601, nmps: 46, nlps: 46, switch: 0 },
];

/// Context word: `(state_index << 1) | mps`.
pub(crate) type CtxSet = [u8; T1_NUMCTXS];

pub(crate) fn reset_contexts(ctxs: &mut CtxSet) {
  for c in ctxs.iter_mut() {
    *c = 0;
  }
  // the uniform, run-length and first zero-coding contexts start skewed
  ctxs[T1_CTXNO_UNI as usize] = 46 << 1;
  ctxs[T1_CTXNO_AGG as usize] = 3 << 1;
  ctxs[0] = 4 << 1;
}

/// MQ encoder with carry propagation into the already-emitted bytes.
///
/// `out[0]` is a scratch byte standing in for the byte before the segment
/// start; it is skipped when the bytes are taken.
pub(crate) struct MqEncoder {
  c: u32,
  a: u32,
  ct: u32,
  out: Vec<u8>,
  pub ctxs: CtxSet,
}

impl MqEncoder {
  pub fn new() -> Self {
    let mut ctxs = [0u8; T1_NUMCTXS];
    reset_contexts(&mut ctxs);
    Self {
      c: 0,
      a: 0x8000,
      ct: 12,
      out: vec![0],
      ctxs,
    }
  }

  /// Start (or restart after a termination) an MQ segment continuing in
  /// the same output buffer.
  pub fn init(&mut self) {
    self.c = 0;
    self.a = 0x8000;
    self.ct = 12;
    if *self.out.last().unwrap_or(&0) == 0xff {
      self.ct = 13;
    }
  }

  pub fn reset_states(&mut self) {
    reset_contexts(&mut self.ctxs);
  }

  /// Bytes emitted so far (the pending register contents are not
  /// included; see `flush`/`erterm`).
  pub fn num_bytes(&self) -> usize {
    self.out.len() - 1
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.out[1..]
  }

  pub fn into_bytes(self) -> Vec<u8> {
    let mut out = self.out;
    out.remove(0);
    out
  }

  fn byteout(&mut self) {
    let last = *self.out.last().unwrap_or(&0);
    if last == 0xff {
      self.out.push((self.c >> 20) as u8);
      self.c &= 0xfffff;
      self.ct = 7;
    } else if self.c < 0x8000000 {
      self.out.push((self.c >> 19) as u8);
      self.c &= 0x7ffff;
      self.ct = 8;
    } else {
      // carry into the previous byte
      let idx = self.out.len() - 1;
      self.out[idx] = self.out[idx].wrapping_add(1);
      if self.out[idx] == 0xff {
        self.c &= 0x7ffffff;
        self.out.push((self.c >> 20) as u8);
        self.c &= 0xfffff;
        self.ct = 7;
      } else {
        self.out.push((self.c >> 19) as u8);
        self.c &= 0x7ffff;
        self.ct = 8;
      }
    }
  }

  fn renorm(&mut self) {
    loop {
      self.a <<= 1;
      self.c <<= 1;
      self.ct -= 1;
      if self.ct == 0 {
        self.byteout();
      }
      if self.a & 0x8000 != 0 {
        break;
      }
    }
  }

  pub fn encode(&mut self, d: u32, ctx: usize) {
    let word = self.ctxs[ctx];
    let idx = (word >> 1) as usize;
    let mps = (word & 1) as u32;
    let st = STATES[idx];
    if d == mps {
      self.a -= st.qe;
      if self.a & 0x8000 == 0 {
        if self.a < st.qe {
          self.a = st.qe;
        } else {
          self.c += st.qe;
        }
        self.ctxs[ctx] = (st.nmps << 1) | mps as u8;
        self.renorm();
      } else {
        self.c += st.qe;
      }
    } else {
      self.a -= st.qe;
      if self.a < st.qe {
        self.c += st.qe;
      } else {
        self.a = st.qe;
      }
      let new_mps = if st.switch == 1 { 1 - mps } else { mps };
      self.ctxs[ctx] = (st.nlps << 1) | new_mps as u8;
      self.renorm();
    }
  }

  /// Standard FLUSH termination.
  pub fn flush(&mut self) {
    // SETBITS
    let tempc = self.c + self.a;
    self.c |= 0xffff;
    if self.c >= tempc {
      self.c -= 0x8000;
    }
    self.c <<= self.ct;
    self.byteout();
    self.c <<= self.ct;
    self.byteout();
    if *self.out.last().unwrap_or(&0) == 0xff {
      self.out.pop();
    }
    self.init();
  }

  /// Enter raw (bypass) mode; bits go out unstuffed except for the
  /// 7-bit byte after an 0xFF.
  pub fn bypass_init(&mut self) {
    self.c = 0;
    self.ct = if *self.out.last().unwrap_or(&0) == 0xff {
      7
    } else {
      8
    };
  }

  pub fn bypass_put(&mut self, d: u32) {
    self.c = (self.c << 1) | (d & 1);
    self.ct -= 1;
    if self.ct == 0 {
      let byte = self.c as u8;
      self.out.push(byte);
      self.ct = if byte == 0xff { 7 } else { 8 };
      self.c = 0;
    }
  }

  /// Zero-pad the pending raw byte; a trailing 0xFF gets a zero byte so
  /// the following segment starts on a clean boundary.
  pub fn bypass_flush(&mut self) {
    let full = if *self.out.last().unwrap_or(&0) == 0xff {
      7
    } else {
      8
    };
    if self.ct < full {
      let byte = (self.c << self.ct) as u8;
      self.out.push(byte);
    }
    if *self.out.last().unwrap_or(&0) == 0xff {
      self.out.push(0);
    }
    self.init();
  }

  /// Predictable termination (ERTERM): pad so an error-resilient decoder
  /// can detect tampering.
  pub fn erterm(&mut self) {
    let mut k = 11i32 - self.ct as i32 + 1;
    while k > 0 {
      self.c <<= self.ct;
      self.ct = 0;
      self.byteout();
      k -= self.ct as i32;
    }
    if *self.out.last().unwrap_or(&0) != 0xff {
      self.byteout();
    }
    if *self.out.last().unwrap_or(&0) == 0xff {
      self.out.pop();
    }
    self.init();
  }
}

/// MQ decoder over one terminated segment.
pub(crate) struct MqDecoder<'a> {
  data: &'a [u8],
  /// Index of the last consumed byte.
  pos: usize,
  c: u32,
  a: u32,
  ct: u32,
  pub ctxs: CtxSet,
}

impl<'a> MqDecoder<'a> {
  pub fn new(data: &'a [u8], ctxs: CtxSet) -> Self {
    let mut dec = Self {
      data,
      pos: 0,
      c: 0,
      a: 0,
      ct: 0,
      ctxs,
    };
    dec.init(data);
    dec
  }

  /// Re-arm on a new segment, keeping context state.
  pub fn init(&mut self, data: &'a [u8]) {
    self.data = data;
    self.pos = 0;
    self.c = (*data.first().unwrap_or(&0xff) as u32) << 16;
    self.bytein();
    self.c <<= 7;
    self.ct -= 7;
    self.a = 0x8000;
  }

  fn bytein(&mut self) {
    let cur = self.data.get(self.pos).copied().unwrap_or(0xff);
    if cur == 0xff {
      let next = self.data.get(self.pos + 1).copied().unwrap_or(0xff);
      if next > 0x8f {
        // marker or end of data: feed 1-bits
        self.c += 0xff00;
        self.ct = 8;
      } else {
        self.pos += 1;
        self.c += (next as u32) << 9;
        self.ct = 7;
      }
    } else {
      self.pos += 1;
      let next = self.data.get(self.pos).copied().unwrap_or(0xff);
      self.c += (next as u32) << 8;
      self.ct = 8;
    }
  }

  fn renorm(&mut self) {
    loop {
      if self.ct == 0 {
        self.bytein();
      }
      self.a <<= 1;
      self.c <<= 1;
      self.ct -= 1;
      if self.a & 0x8000 != 0 {
        break;
      }
    }
  }

  pub fn decode(&mut self, ctx: usize) -> u32 {
    let word = self.ctxs[ctx];
    let idx = (word >> 1) as usize;
    let mps = (word & 1) as u32;
    let st = STATES[idx];
    self.a -= st.qe;
    let d;
    if (self.c >> 16) < st.qe {
      // LPS sub-interval at the bottom
      if self.a < st.qe {
        self.a = st.qe;
        d = mps;
        self.ctxs[ctx] = (st.nmps << 1) | mps as u8;
      } else {
        self.a = st.qe;
        d = 1 - mps;
        let new_mps = if st.switch == 1 { 1 - mps } else { mps };
        self.ctxs[ctx] = (st.nlps << 1) | new_mps as u8;
      }
      self.renorm();
    } else {
      self.c -= st.qe << 16;
      if self.a & 0x8000 == 0 {
        if self.a < st.qe {
          d = 1 - mps;
          let new_mps = if st.switch == 1 { 1 - mps } else { mps };
          self.ctxs[ctx] = (st.nlps << 1) | new_mps as u8;
        } else {
          d = mps;
          self.ctxs[ctx] = (st.nmps << 1) | mps as u8;
        }
        self.renorm();
      } else {
        d = mps;
      }
    }
    d
  }

  pub fn take_ctxs(&self) -> CtxSet {
    self.ctxs
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn round_trip(bits: &[(u32, usize)]) {
    let mut enc = MqEncoder::new();
    for &(d, ctx) in bits {
      enc.encode(d, ctx);
    }
    enc.flush();
    let bytes = enc.into_bytes();

    let mut ctxs = [0u8; T1_NUMCTXS];
    reset_contexts(&mut ctxs);
    let mut dec = MqDecoder::new(&bytes, ctxs);
    for (i, &(d, ctx)) in bits.iter().enumerate() {
      assert_eq!(dec.decode(ctx), d, "symbol {} of {}", i, bits.len());
    }
  }

  #[test]
  fn single_context_round_trip() {
    let bits: Vec<(u32, usize)> = (0..64).map(|i| (((i * 5) >> 2) & 1, 0)).collect();
    round_trip(&bits);
  }

  #[test]
  fn multi_context_round_trip() {
    let bits: Vec<(u32, usize)> = (0..257)
      .map(|i| ((((i * 7) / 3) & 1) as u32, (i * 11) % T1_NUMCTXS))
      .collect();
    round_trip(&bits);
  }

  #[test]
  fn skewed_stream_round_trip() {
    // long MPS runs exercise the carry path in byteout
    let mut bits: Vec<(u32, usize)> = vec![(0, 18); 300];
    bits.push((1, 18));
    bits.extend(vec![(0, 18); 300]);
    round_trip(&bits);
  }

  #[test]
  fn segment_restart_keeps_contexts() {
    let mut enc = MqEncoder::new();
    let first: Vec<(u32, usize)> = (0..40).map(|i| (i & 1, 5)).collect();
    for &(d, ctx) in &first {
      enc.encode(d, ctx);
    }
    enc.flush();
    let first_len = enc.num_bytes();
    let second: Vec<(u32, usize)> = (0..40).map(|i| ((i >> 1) & 1, 5)).collect();
    for &(d, ctx) in &second {
      enc.encode(d, ctx);
    }
    enc.flush();
    let bytes = enc.into_bytes();

    let mut ctxs = [0u8; T1_NUMCTXS];
    reset_contexts(&mut ctxs);
    let mut dec = MqDecoder::new(&bytes[..first_len], ctxs);
    for &(d, ctx) in &first {
      assert_eq!(dec.decode(ctx), d);
    }
    let carry = dec.take_ctxs();
    let mut dec = MqDecoder::new(&bytes[first_len..], carry);
    for &(d, ctx) in &second {
      assert_eq!(dec.decode(ctx), d);
    }
  }

  #[test]
  fn erterm_round_trip() {
    let mut enc = MqEncoder::new();
    let bits: Vec<(u32, usize)> = (0..50).map(|i| ((i / 3) & 1, 2)).collect();
    for &(d, ctx) in &bits {
      enc.encode(d, ctx);
    }
    enc.erterm();
    let bytes = enc.into_bytes();
    let mut ctxs = [0u8; T1_NUMCTXS];
    reset_contexts(&mut ctxs);
    let mut dec = MqDecoder::new(&bytes, ctxs);
    for &(d, ctx) in &bits {
      assert_eq!(dec.decode(ctx), d);
    }
  }
}
