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

//! Part-1 block coder: three context-modelled passes per bit-plane over
//! the MQ coder, with selective bypass, per-pass terminations and the
//! rate/distortion bookkeeping the rate allocator feeds on.

use crate::bio::BitReader;
use crate::consts::{CblkStyle, MAX_BIT_PLANES, T1_CTXNO_AGG, T1_CTXNO_UNI};
use crate::error::{Error, Result};
use crate::math::uint_floorlog2;
use crate::mqc::{reset_contexts, CtxSet, MqDecoder, MqEncoder};
use crate::t1_luts::*;

/// Upper bound on coding passes (3 per plane, minus two for the first).
pub(crate) const MAX_PASSES: u32 = 3 * MAX_BIT_PLANES - 2;

/// Bit-plane index from the top, 0 for the most significant plane.
#[inline]
pub(crate) fn pass_plane_from_top(passno: u32) -> u32 {
  if passno == 0 {
    0
  } else {
    1 + (passno - 1) / 3
  }
}

/// 0 = significance propagation, 1 = refinement, 2 = cleanup.
#[inline]
pub(crate) fn pass_type(passno: u32) -> u32 {
  if passno == 0 {
    2
  } else {
    (passno - 1) % 3
  }
}

/// Lazy mode bypasses the MQ coder for the significance and refinement
/// passes of every bit-plane after the fourth.
#[inline]
pub(crate) fn pass_is_raw(cblk_sty: CblkStyle, passno: u32) -> bool {
  cblk_sty.contains(CblkStyle::LAZY) && pass_type(passno) != 2 && pass_plane_from_top(passno) >= 4
}

/// Whether a termination fires after `passno`, ignoring the final pass.
#[inline]
fn pass_is_term_boundary(cblk_sty: CblkStyle, passno: u32) -> bool {
  if cblk_sty.contains(CblkStyle::TERMALL) {
    return true;
  }
  if cblk_sty.contains(CblkStyle::LAZY) {
    return pass_is_raw(cblk_sty, passno) != pass_is_raw(cblk_sty, passno + 1);
  }
  false
}

#[inline]
pub(crate) fn pass_is_term(cblk_sty: CblkStyle, passno: u32, total: u32) -> bool {
  passno + 1 == total || pass_is_term_boundary(cblk_sty, passno)
}

/// Number of passes the segment starting at `first_passno` can hold.
pub(crate) fn seg_max_passes(cblk_sty: CblkStyle, first_passno: u32) -> u32 {
  let mut p = first_passno;
  loop {
    if pass_is_term_boundary(cblk_sty, p) {
      return p - first_passno + 1;
    }
    p += 1;
    if p - first_passno >= MAX_PASSES {
      return MAX_PASSES;
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PassInfo {
  /// Cumulative compressed length up to the end of this pass; an upper
  /// bound for unterminated passes, exact at terminations.
  pub rate: u32,
  /// Cumulative distortion decrease in coefficient units.
  pub distortiondec: f64,
  pub term: bool,
}

#[derive(Debug, Default)]
pub(crate) struct T1EncodeResult {
  pub stream: Vec<u8>,
  pub passes: Vec<PassInfo>,
  pub numbps: u32,
}

/// Flag plane with a one-sample border.
struct T1Flags {
  w: usize,
  flags: Vec<u32>,
}

impl T1Flags {
  fn new(w: usize, h: usize) -> Self {
    Self {
      w,
      flags: vec![0u32; (w + 2) * (h + 2)],
    }
  }

  #[inline]
  fn idx(&self, x: usize, y: usize) -> usize {
    (y + 1) * (self.w + 2) + x + 1
  }

  #[inline]
  fn get(&self, x: usize, y: usize) -> u32 {
    self.flags[self.idx(x, y)]
  }

  #[inline]
  fn or(&mut self, x: usize, y: usize, bits: u32) {
    let i = self.idx(x, y);
    self.flags[i] |= bits;
  }

  /// Mark (x, y) significant and update the eight neighbours.
  fn set_sig(&mut self, x: usize, y: usize, neg: bool) {
    let stride = self.w + 2;
    let i = self.idx(x, y);
    self.flags[i] |= T1_SIG;
    // cardinal neighbours learn the sign too
    let sgn = if neg { T1_SGN_S } else { 0 };
    self.flags[i - stride] |= T1_SIG_S | sgn;
    let sgn = if neg { T1_SGN_N } else { 0 };
    self.flags[i + stride] |= T1_SIG_N | sgn;
    let sgn = if neg { T1_SGN_E } else { 0 };
    self.flags[i - 1] |= T1_SIG_E | sgn;
    let sgn = if neg { T1_SGN_W } else { 0 };
    self.flags[i + 1] |= T1_SIG_W | sgn;
    self.flags[i - stride - 1] |= T1_SIG_SE;
    self.flags[i - stride + 1] |= T1_SIG_SW;
    self.flags[i + stride - 1] |= T1_SIG_NE;
    self.flags[i + stride + 1] |= T1_SIG_NW;
  }

  fn clear_visit(&mut self) {
    for f in self.flags.iter_mut() {
      *f &= !T1_VISIT;
    }
  }
}

#[inline]
fn stripe_flags(flags: &T1Flags, x: usize, y: usize, y0: usize, h: usize, vsc: bool) -> u32 {
  let f = flags.get(x, y);
  if vsc && (y == y0 + 3 || y == h - 1) {
    f & T1_VSC_MASK
  } else {
    f
  }
}

/// Distortion decrease when a sample of magnitude `mag` turns significant
/// at plane `one`.
#[inline]
fn sig_dist(mag: u32, one: u32) -> f64 {
  let m = mag as f64;
  let r = 1.5 * one as f64;
  let after = m - r;
  m * m - after * after
}

#[inline]
fn ref_dist(one: u32) -> f64 {
  let o = one as f64;
  o * o * 0.5
}

enum Coder<'a, 'b> {
  Mq(&'a mut MqEncoder),
  Raw(&'a mut MqEncoder),
  MqDec(&'a mut MqDecoder<'b>),
  RawDec(&'a mut BitReader<'b>),
}

impl<'a, 'b> Coder<'a, 'b> {
  fn put(&mut self, d: u32, ctx: usize) -> Result<u32> {
    match self {
      Coder::Mq(mq) => {
        mq.encode(d, ctx);
        Ok(d)
      }
      Coder::Raw(mq) => {
        mq.bypass_put(d);
        Ok(d)
      }
      Coder::MqDec(dec) => Ok(dec.decode(ctx)),
      Coder::RawDec(br) => br.getbit().map_err(|_| Error::CorruptPacketData),
    }
  }

  fn is_decoder(&self) -> bool {
    matches!(self, Coder::MqDec(_) | Coder::RawDec(_))
  }

  fn is_raw(&self) -> bool {
    matches!(self, Coder::Raw(_) | Coder::RawDec(_))
  }
}

/// One significance-propagation pass, shared between encode and decode.
fn sigpass(
  coder: &mut Coder<'_, '_>,
  flags: &mut T1Flags,
  data: &mut [i32],
  w: usize,
  h: usize,
  one: u32,
  orient: u32,
  vsc: bool,
  dist: &mut f64,
) -> Result<()> {
  for y0 in (0..h).step_by(4) {
    for x in 0..w {
      for y in y0..(y0 + 4).min(h) {
        let f = flags.get(x, y);
        if f & T1_SIG != 0 || f & T1_SIG_OTH == 0 {
          continue;
        }
        let fv = stripe_flags(flags, x, y, y0, h, vsc);
        let i = y * w + x;
        let sym = if coder.is_decoder() {
          0
        } else {
          (data[i].unsigned_abs() & one != 0) as u32
        };
        let bit = if coder.is_raw() {
          coder.put(sym, 0)?
        } else {
          coder.put(sym, ctxno_zc(orient, fv))?
        };
        if bit != 0 {
          let neg = decode_or_encode_sign(coder, fv, data, i)?;
          if coder.is_decoder() {
            data[i] = if neg { -(one as i32) } else { one as i32 };
          }
          *dist += sig_dist(data[i].unsigned_abs(), one);
          flags.set_sig(x, y, neg);
        }
        flags.or(x, y, T1_VISIT);
      }
    }
  }
  Ok(())
}

/// Sign bit through the sign-context model (or raw). Returns the sign.
fn decode_or_encode_sign(
  coder: &mut Coder<'_, '_>,
  fv: u32,
  data: &mut [i32],
  i: usize,
) -> Result<bool> {
  if coder.is_raw() {
    let sym = if coder.is_decoder() {
      0
    } else {
      (data[i] < 0) as u32
    };
    Ok(coder.put(sym, 0)? != 0)
  } else {
    let (ctx, spb) = ctxno_sc(fv);
    let sym = if coder.is_decoder() {
      0
    } else {
      (data[i] < 0) as u32 ^ spb
    };
    Ok(coder.put(sym, ctx)? ^ spb != 0)
  }
}

/// One magnitude-refinement pass.
fn refpass(
  coder: &mut Coder<'_, '_>,
  flags: &mut T1Flags,
  data: &mut [i32],
  w: usize,
  h: usize,
  one: u32,
  vsc: bool,
  dist: &mut f64,
) -> Result<()> {
  for y0 in (0..h).step_by(4) {
    for x in 0..w {
      for y in y0..(y0 + 4).min(h) {
        let f = flags.get(x, y);
        if f & (T1_SIG | T1_VISIT) != T1_SIG {
          continue;
        }
        let fv = stripe_flags(flags, x, y, y0, h, vsc);
        let i = y * w + x;
        let sym = if coder.is_decoder() {
          0
        } else {
          (data[i].unsigned_abs() & one != 0) as u32
        };
        let bit = if coder.is_raw() {
          coder.put(sym, 0)?
        } else {
          coder.put(sym, ctxno_mag(fv))?
        };
        if coder.is_decoder() && bit != 0 {
          let mag = data[i].unsigned_abs() | one;
          data[i] = if data[i] < 0 { -(mag as i32) } else { mag as i32 };
        }
        flags.or(x, y, T1_REFINE);
        *dist += ref_dist(one);
      }
    }
  }
  Ok(())
}

/// One cleanup pass with run-length aggregation.
fn clnpass(
  coder: &mut Coder<'_, '_>,
  flags: &mut T1Flags,
  data: &mut [i32],
  w: usize,
  h: usize,
  one: u32,
  orient: u32,
  cblk_sty: CblkStyle,
  dist: &mut f64,
) -> Result<()> {
  let vsc = cblk_sty.contains(CblkStyle::VSC);
  for y0 in (0..h).step_by(4) {
    for x in 0..w {
      let full_stripe = y0 + 3 < h;
      let agg = full_stripe
        && (0..4).all(|k| {
          stripe_flags(flags, x, y0 + k, y0, h, vsc) & (T1_SIG | T1_VISIT | T1_SIG_OTH) == 0
        });
      let mut start = y0;
      if agg {
        let sym = if coder.is_decoder() {
          0
        } else {
          let r = (0..4)
            .position(|k| data[(y0 + k) * w + x].unsigned_abs() & one != 0)
            .map(|k| k as u32)
            .unwrap_or(4);
          (r < 4) as u32
        };
        let any = coder.put(sym, T1_CTXNO_AGG as usize)?;
        if any == 0 {
          continue;
        }
        let runlen = if coder.is_decoder() {
          (coder.put(0, T1_CTXNO_UNI as usize)? << 1) | coder.put(0, T1_CTXNO_UNI as usize)?
        } else {
          let r = (0..4)
            .position(|k| data[(y0 + k) * w + x].unsigned_abs() & one != 0)
            .unwrap_or(0) as u32;
          coder.put(r >> 1, T1_CTXNO_UNI as usize)?;
          coder.put(r & 1, T1_CTXNO_UNI as usize)?;
          r
        };
        // the sample that broke the run is significant by construction
        let y = y0 + runlen as usize;
        let i = y * w + x;
        let fv = stripe_flags(flags, x, y, y0, h, vsc);
        let neg = decode_or_encode_sign(coder, fv, data, i)?;
        if coder.is_decoder() {
          data[i] = if neg { -(one as i32) } else { one as i32 };
        }
        *dist += sig_dist(data[i].unsigned_abs(), one);
        flags.set_sig(x, y, neg);
        start = y + 1;
      }
      for y in start..(y0 + 4).min(h) {
        let f = flags.get(x, y);
        if f & (T1_SIG | T1_VISIT) != 0 {
          continue;
        }
        let fv = stripe_flags(flags, x, y, y0, h, vsc);
        let i = y * w + x;
        let sym = if coder.is_decoder() {
          0
        } else {
          (data[i].unsigned_abs() & one != 0) as u32
        };
        let bit = coder.put(sym, ctxno_zc(orient, fv))?;
        if bit != 0 {
          let neg = decode_or_encode_sign(coder, fv, data, i)?;
          if coder.is_decoder() {
            data[i] = if neg { -(one as i32) } else { one as i32 };
          }
          *dist += sig_dist(data[i].unsigned_abs(), one);
          flags.set_sig(x, y, neg);
        }
      }
    }
  }
  if cblk_sty.contains(CblkStyle::SEGMARK) {
    // segmentation symbol 1010
    for &s in &[1u32, 0, 1, 0] {
      let _ = coder.put(s, T1_CTXNO_UNI as usize)?;
    }
  }
  flags.clear_visit();
  Ok(())
}

/// Encode one code-block. `data` holds signed coefficients in raster
/// order; styles select terminations, bypass, causal contexts and the
/// segmentation symbol.
pub(crate) fn encode_cblk(
  data: &[i32],
  w: usize,
  h: usize,
  orient: u32,
  cblk_sty: CblkStyle,
) -> T1EncodeResult {
  let max = data.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
  let numbps = if max == 0 { 0 } else { uint_floorlog2(max) + 1 };
  if numbps == 0 {
    return T1EncodeResult::default();
  }
  let total = 3 * numbps - 2;
  let vsc = cblk_sty.contains(CblkStyle::VSC);
  let mut flags = T1Flags::new(w, h);
  let mut work = data.to_vec();
  let mut mq = MqEncoder::new();
  let mut passes = Vec::with_capacity(total as usize);
  let mut cumdist = 0f64;
  let mut prev_raw = false;
  // a termination re-arms whichever coder the next pass uses
  let mut prev_term = true;
  for passno in 0..total {
    let bpno = numbps - 1 - pass_plane_from_top(passno);
    let one = 1u32 << bpno;
    let raw = pass_is_raw(cblk_sty, passno);
    if raw && (!prev_raw || prev_term) {
      mq.bypass_init();
    }
    if cblk_sty.contains(CblkStyle::RESET) && !raw {
      mq.reset_states();
    }
    let mut dist = 0f64;
    {
      let mut coder = if raw { Coder::Raw(&mut mq) } else { Coder::Mq(&mut mq) };
      let r = match pass_type(passno) {
        0 => sigpass(&mut coder, &mut flags, &mut work, w, h, one, orient, vsc, &mut dist),
        1 => refpass(&mut coder, &mut flags, &mut work, w, h, one, vsc, &mut dist),
        _ => clnpass(&mut coder, &mut flags, &mut work, w, h, one, orient, cblk_sty, &mut dist),
      };
      debug_assert!(r.is_ok());
    }
    cumdist += dist;
    let term = pass_is_term(cblk_sty, passno, total);
    if term {
      if raw {
        mq.bypass_flush();
      } else if cblk_sty.contains(CblkStyle::PREDTERM) {
        mq.erterm();
      } else {
        mq.flush();
      }
    }
    let rate = if term {
      mq.num_bytes() as u32
    } else {
      mq.num_bytes() as u32 + 4
    };
    passes.push(PassInfo {
      rate,
      distortiondec: cumdist,
      term,
    });
    prev_raw = raw;
    prev_term = term;
  }
  // terminated rates are exact and MUST stay exact (they become segment
  // lengths); unterminated upper bounds are pulled back under the next
  // pass so truncation points never cross a termination boundary
  let total_len = mq.num_bytes() as u32;
  if let Some(last) = passes.last_mut() {
    last.rate = total_len;
  }
  for i in (0..passes.len().saturating_sub(1)).rev() {
    if !passes[i].term && passes[i].rate > passes[i + 1].rate {
      passes[i].rate = passes[i + 1].rate;
    }
  }
  T1EncodeResult {
    stream: mq.into_bytes(),
    passes,
    numbps,
  }
}

/// One decoded segment: its bytes and the number of passes it carries.
pub(crate) struct Segment<'a> {
  pub data: &'a [u8],
  pub numpasses: u32,
}

/// Decode one code-block from its terminated segments. Returns the
/// signed coefficients (exact bits, no midpoint bump) and the lowest
/// bit-plane fully represented by the decoded passes.
pub(crate) fn decode_cblk(
  segments: &[Segment<'_>],
  numbps: u32,
  orient: u32,
  cblk_sty: CblkStyle,
  w: usize,
  h: usize,
) -> Result<(Vec<i32>, u32)> {
  let mut data = vec![0i32; w * h];
  if numbps == 0 {
    return Ok((data, 0));
  }
  if numbps > MAX_BIT_PLANES {
    return Err(Error::CorruptPacketHeader("bit-plane count out of range"));
  }
  let total = 3 * numbps - 2;
  let vsc = cblk_sty.contains(CblkStyle::VSC);
  let mut flags = T1Flags::new(w, h);
  let mut ctxs: CtxSet = [0; crate::consts::T1_NUMCTXS];
  reset_contexts(&mut ctxs);
  let mut passno = 0u32;
  let mut last_plane = numbps;
  for seg in segments {
    if seg.numpasses == 0 {
      continue;
    }
    if passno >= total {
      break;
    }
    let raw = pass_is_raw(cblk_sty, passno);
    let npasses = seg.numpasses.min(total - passno);
    if raw {
      let mut br = BitReader::new(seg.data);
      for _ in 0..npasses {
        let bpno = numbps - 1 - pass_plane_from_top(passno);
        let one = 1u32 << bpno;
        let mut dist = 0f64;
        let mut coder = Coder::RawDec(&mut br);
        let r = match pass_type(passno) {
          0 => sigpass(&mut coder, &mut flags, &mut data, w, h, one, orient, vsc, &mut dist),
          _ => refpass(&mut coder, &mut flags, &mut data, w, h, one, vsc, &mut dist),
        };
        if r.is_err() {
          return Err(Error::CorruptPacketData);
        }
        last_plane = bpno;
        passno += 1;
      }
    } else {
      let mut dec = MqDecoder::new(seg.data, ctxs);
      for _ in 0..npasses {
        if cblk_sty.contains(CblkStyle::RESET) {
          reset_contexts(&mut dec.ctxs);
        }
        let bpno = numbps - 1 - pass_plane_from_top(passno);
        let one = 1u32 << bpno;
        let mut dist = 0f64;
        let mut coder = Coder::MqDec(&mut dec);
        let r = match pass_type(passno) {
          0 => sigpass(&mut coder, &mut flags, &mut data, w, h, one, orient, vsc, &mut dist),
          1 => refpass(&mut coder, &mut flags, &mut data, w, h, one, vsc, &mut dist),
          _ => clnpass(&mut coder, &mut flags, &mut data, w, h, one, orient, cblk_sty, &mut dist),
        };
        r?;
        last_plane = bpno;
        passno += 1;
      }
      ctxs = dec.take_ctxs();
    }
  }
  if last_plane == numbps {
    last_plane = 0;
  }
  Ok((data, last_plane))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn block(w: usize, h: usize, seed: u32) -> Vec<i32> {
    (0..w * h)
      .map(|i| {
        let v = ((i as u32).wrapping_mul(2654435761).wrapping_add(seed) >> 16) as i32 % 512;
        if i % 3 == 0 {
          -v
        } else {
          v
        }
      })
      .collect()
  }

  fn segments_for<'a>(res: &'a T1EncodeResult, cblk_sty: CblkStyle) -> Vec<Segment<'a>> {
    // slice the stream at terminated pass boundaries, as T2 would
    let mut segs = Vec::new();
    let mut start = 0u32;
    let mut first_pass = 0u32;
    for (i, p) in res.passes.iter().enumerate() {
      if p.term {
        segs.push(Segment {
          data: &res.stream[start as usize..p.rate as usize],
          numpasses: i as u32 + 1 - first_pass,
        });
        start = p.rate;
        first_pass = i as u32 + 1;
      }
    }
    let _ = cblk_sty;
    segs
  }

  fn round_trip(w: usize, h: usize, orient: u32, cblk_sty: CblkStyle, seed: u32) {
    let data = block(w, h, seed);
    let enc = encode_cblk(&data, w, h, orient, cblk_sty);
    assert!(enc.numbps > 0);
    let segs = segments_for(&enc, cblk_sty);
    let (dec, last_plane) = decode_cblk(&segs, enc.numbps, orient, cblk_sty, w, h).unwrap();
    assert_eq!(last_plane, 0);
    assert_eq!(dec, data, "style {:?}", cblk_sty);
  }

  #[test]
  fn plain_round_trip_all_orients() {
    for orient in 0..4 {
      round_trip(16, 16, orient, CblkStyle::empty(), 7 + orient);
    }
  }

  #[test]
  fn odd_sizes_round_trip() {
    round_trip(5, 13, 0, CblkStyle::empty(), 1);
    round_trip(1, 9, 2, CblkStyle::empty(), 2);
    round_trip(17, 3, 1, CblkStyle::empty(), 3);
  }

  #[test]
  fn termall_round_trip() {
    round_trip(16, 16, 0, CblkStyle::TERMALL, 11);
  }

  #[test]
  fn lazy_round_trip() {
    round_trip(32, 32, 0, CblkStyle::LAZY, 13);
  }

  #[test]
  fn lazy_termall_round_trip() {
    round_trip(16, 16, 3, CblkStyle::LAZY | CblkStyle::TERMALL, 17);
  }

  #[test]
  fn reset_and_segmark_round_trip() {
    round_trip(16, 16, 0, CblkStyle::RESET | CblkStyle::SEGMARK, 19);
  }

  #[test]
  fn vsc_round_trip() {
    round_trip(16, 16, 0, CblkStyle::VSC, 23);
  }

  #[test]
  fn predterm_round_trip() {
    round_trip(16, 16, 0, CblkStyle::PREDTERM | CblkStyle::TERMALL, 29);
  }

  #[test]
  fn all_zero_block() {
    let data = vec![0i32; 64];
    let enc = encode_cblk(&data, 8, 8, 0, CblkStyle::empty());
    assert_eq!(enc.numbps, 0);
    assert!(enc.stream.is_empty());
    assert!(enc.passes.is_empty());
  }

  #[test]
  fn truncated_decode_keeps_partial_planes() {
    let data = block(16, 16, 31);
    let enc = encode_cblk(&data, 16, 16, 0, CblkStyle::empty());
    // single unterminated-until-end segment: feed only the first layer's
    // worth of passes
    let keep_passes = 4.min(enc.passes.len() as u32);
    let keep_bytes = enc.passes[keep_passes as usize - 1].rate;
    let segs = [Segment {
      data: &enc.stream[..keep_bytes as usize],
      numpasses: keep_passes,
    }];
    let (dec, last_plane) = decode_cblk(&segs, enc.numbps, 0, CblkStyle::empty(), 16, 16).unwrap();
    assert!(last_plane > 0);
    // decoded planes must agree with the originals above the cut
    for (d, o) in dec.iter().zip(data.iter()) {
      let mask = !((1i32 << last_plane) - 1);
      if *d != 0 {
        assert_eq!(d.unsigned_abs() as i32 & mask, o.unsigned_abs() as i32 & mask);
      }
    }
  }

  #[test]
  fn pass_schedule() {
    assert_eq!(pass_type(0), 2);
    assert_eq!(pass_type(1), 0);
    assert_eq!(pass_type(2), 1);
    assert_eq!(pass_type(3), 2);
    assert_eq!(pass_plane_from_top(0), 0);
    assert_eq!(pass_plane_from_top(3), 1);
    assert_eq!(pass_plane_from_top(4), 2);
    let lazy = CblkStyle::LAZY;
    assert!(!pass_is_raw(lazy, 9));
    assert!(pass_is_raw(lazy, 10));
    assert!(pass_is_raw(lazy, 11));
    assert!(!pass_is_raw(lazy, 12));
    assert_eq!(seg_max_passes(lazy, 0), 10);
    assert_eq!(seg_max_passes(lazy, 10), 2);
    assert_eq!(seg_max_passes(lazy, 12), 1);
    assert_eq!(seg_max_passes(CblkStyle::TERMALL, 5), 1);
    assert_eq!(seg_max_passes(CblkStyle::empty(), 0), MAX_PASSES);
  }
}
