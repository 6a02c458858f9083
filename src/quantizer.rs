/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2006-2007, Parvatha Elangovan
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

use crate::consts::*;
use crate::dwt;
use crate::error::{Error, Result};
use crate::math::uint_floorlog2;
use crate::types::{StepSize, Tccp};

/// Subband gain: 0 for LL, 1 for HL/LH, 2 for HH when reversible;
/// the 9/7 path carries its energy in the step sizes instead.
pub(crate) fn band_gain(qmfbid: u32, orient: u32) -> u32 {
  if qmfbid == 0 {
    0
  } else {
    match orient {
      0 => 0,
      1 | 2 => 1,
      _ => 2,
    }
  }
}

/// Linear band index -> (resolution, orientation).
pub(crate) fn band_resno_orient(bandno: u32) -> (u32, u32) {
  if bandno == 0 {
    (0, 0)
  } else {
    ((bandno - 1) / 3 + 1, (bandno - 1) % 3 + 1)
  }
}

/// Effective step size for one band, resolving the derived scheme.
pub(crate) fn band_stepsize_raw(tccp: &Tccp, resno: u32, orient: u32) -> StepSize {
  let bandno = if resno == 0 { 0 } else { 3 * (resno - 1) + orient } as usize;
  if tccp.qntsty == QNTSTY_SIQNT {
    // one signalled pair, exponents follow the decomposition level
    let base = tccp.stepsizes[0];
    let shift = if resno == 0 { 0 } else { resno - 1 };
    StepSize {
      expn: base.expn.saturating_sub(shift),
      mant: base.mant,
    }
  } else {
    tccp.stepsizes[bandno.min(MAX_BANDS - 1)]
  }
}

/// Derived per-band values used by the block coder and the transforms.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BandQuant {
  /// Inverse-quantization step.
  pub stepsize: f32,
  /// Mb: maximum magnitude bit-planes for the band (Equation E-2).
  pub numbps: i32,
}

/// Step size and bit-plane budget for one band.
///
/// For HTJ2K irreversible decode the step is additionally scaled down by
/// `2^(30 - numbps)` to align with the HT fixed-point convention.
pub(crate) fn band_params(tccp: &Tccp, is_ht: bool, prec: u32, resno: u32, orient: u32) -> BandQuant {
  let gain = band_gain(tccp.qmfbid, orient);
  let numbps = prec + gain;
  let step = band_stepsize_raw(tccp, resno, orient);
  let mut stepsize =
    ((1.0 + step.mant as f64 / 2048.0) * 2f64.powi(numbps as i32 - step.expn as i32)) as f32;
  let band_numbps = tccp.roishift + (step.expn as i32 + tccp.numgbits as i32 - 1).max(0);
  if is_ht && tccp.qmfbid == 0 {
    let shift = 30 - band_numbps;
    if shift > 0 && shift < 31 {
      stepsize /= (1u64 << shift) as f32;
    }
  }
  BandQuant {
    stepsize,
    numbps: band_numbps,
  }
}

/// Fixed-point (13-bit) step size to (mantissa, exponent), 11-bit mantissa.
fn encode_stepsize(stepsize_fp: i32, numbps: i32) -> StepSize {
  let log = uint_floorlog2(stepsize_fp as u32) as i32;
  let p = log - 13;
  let n = 11 - log;
  let mant = (if n < 0 {
    (stepsize_fp >> -n) as u32
  } else {
    (stepsize_fp << n) as u32
  }) & 0x7ff;
  StepSize {
    expn: (numbps - p) as u32,
    mant,
  }
}

/// Encoder-side step sizes for every band of a component.
pub(crate) fn calc_explicit_stepsizes(tccp: &mut Tccp, prec: u32) {
  let numbands = 3 * tccp.numresolutions - 2;
  for bandno in 0..numbands {
    let (resno, orient) = band_resno_orient(bandno);
    let level = tccp.numresolutions - 1 - resno;
    let gain = band_gain(tccp.qmfbid, orient);
    let stepsize = if tccp.qntsty == QNTSTY_NOQNT {
      1.0
    } else {
      let norm = dwt::getnorm_real(level, orient);
      (1u64 << gain) as f64 / norm
    };
    tccp.stepsizes[bandno as usize] =
      encode_stepsize((stepsize * 8192.0).floor() as i32, (prec + gain) as i32);
  }
}

/// Maximum bit-plane count that may be signalled for a band.
pub(crate) fn max_bit_planes(tccp: &Tccp, resno: u32, orient: u32) -> u32 {
  let step = band_stepsize_raw(tccp, resno, orient);
  (step.expn + tccp.numgbits - 1).min(MAX_BIT_PLANES)
}

/// Serialise SQcd/SQcc: style byte then per-band step sizes.
pub(crate) fn write_sqcd(tccp: &Tccp) -> Vec<u8> {
  let mut out = Vec::new();
  out.push(tccp.qntsty | ((tccp.numgbits as u8) << 5));
  match tccp.qntsty {
    QNTSTY_NOQNT => {
      let numbands = 3 * tccp.numresolutions - 2;
      for bandno in 0..numbands as usize {
        out.push((tccp.stepsizes[bandno].expn << 3) as u8);
      }
    }
    QNTSTY_SIQNT => {
      let s = tccp.stepsizes[0];
      let v = ((s.expn << 11) | s.mant) as u16;
      out.extend_from_slice(&v.to_be_bytes());
    }
    _ => {
      let numbands = 3 * tccp.numresolutions - 2;
      for bandno in 0..numbands as usize {
        let s = tccp.stepsizes[bandno];
        let v = ((s.expn << 11) | s.mant) as u16;
        out.extend_from_slice(&v.to_be_bytes());
      }
    }
  }
  out
}

/// Parse SQcd/SQcc into the component parameters.
pub(crate) fn read_sqcd(tccp: &mut Tccp, data: &[u8]) -> Result<()> {
  if data.is_empty() {
    return Err(Error::BadMarker(0xff5c));
  }
  let sqcd = data[0];
  tccp.qntsty = sqcd & 0x1f;
  tccp.numgbits = (sqcd >> 5) as u32;
  let body = &data[1..];
  match tccp.qntsty {
    QNTSTY_NOQNT => {
      for (bandno, byte) in body.iter().enumerate() {
        if bandno >= MAX_BANDS {
          return Err(Error::BadMarker(0xff5c));
        }
        tccp.stepsizes[bandno] = StepSize {
          expn: (*byte >> 3) as u32,
          mant: 0,
        };
      }
    }
    QNTSTY_SIQNT => {
      if body.len() < 2 {
        return Err(Error::BadMarker(0xff5c));
      }
      let v = u16::from_be_bytes([body[0], body[1]]) as u32;
      tccp.stepsizes[0] = StepSize {
        expn: v >> 11,
        mant: v & 0x7ff,
      };
    }
    QNTSTY_SEQNT => {
      if body.len() % 2 != 0 {
        return Err(Error::BadMarker(0xff5c));
      }
      for (bandno, pair) in body.chunks(2).enumerate() {
        if bandno >= MAX_BANDS {
          return Err(Error::BadMarker(0xff5c));
        }
        let v = u16::from_be_bytes([pair[0], pair[1]]) as u32;
        tccp.stepsizes[bandno] = StepSize {
          expn: v >> 11,
          mant: v & 0x7ff,
        };
      }
    }
    _ => return Err(Error::BadMarker(0xff5c)),
  }
  Ok(())
}

/// Equality of the quantization signalling; used to skip tile-redundant
/// QCC segments on write.
pub(crate) fn sqcd_equal(a: &Tccp, b: &Tccp) -> bool {
  if a.qntsty != b.qntsty || a.numgbits != b.numgbits || a.numresolutions != b.numresolutions {
    return false;
  }
  let numbands = if a.qntsty == QNTSTY_SIQNT {
    1
  } else {
    (3 * a.numresolutions - 2) as usize
  };
  a.stepsizes[..numbands] == b.stepsizes[..numbands]
}

/// `Ccap[0]` for the CAP marker: Bp, the deepest magnitude bit-plane the
/// HT coder can produce, from the per-band exponent budget.
pub(crate) fn ht_cap_value(tccps: &[Tccp], prec: u32) -> u16 {
  let mut bp = 0u32;
  for tccp in tccps {
    let numbands = 3 * tccp.numresolutions - 2;
    for bandno in 0..numbands {
      let (resno, orient) = band_resno_orient(bandno);
      let q = band_params(tccp, true, prec, resno, orient);
      bp = bp.max(q.numbps.max(0) as u32);
    }
  }
  (bp.min(31)) as u16
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gains() {
    assert_eq!(band_gain(1, 0), 0);
    assert_eq!(band_gain(1, 1), 1);
    assert_eq!(band_gain(1, 2), 1);
    assert_eq!(band_gain(1, 3), 2);
    assert_eq!(band_gain(0, 3), 0);
  }

  #[test]
  fn band_index_mapping() {
    assert_eq!(band_resno_orient(0), (0, 0));
    assert_eq!(band_resno_orient(1), (1, 1));
    assert_eq!(band_resno_orient(3), (1, 3));
    assert_eq!(band_resno_orient(4), (2, 1));
  }

  #[test]
  fn noqnt_round_trip() {
    let mut tccp = Tccp::default();
    tccp.numresolutions = 3;
    tccp.qntsty = QNTSTY_NOQNT;
    calc_explicit_stepsizes(&mut tccp, 8);
    // reversible ranging: expn = prec + gain
    assert_eq!(tccp.stepsizes[0].expn, 8);
    assert_eq!(tccp.stepsizes[1].expn, 9);
    assert_eq!(tccp.stepsizes[3].expn, 10);

    let bytes = write_sqcd(&tccp);
    assert_eq!(bytes.len(), 1 + 7);
    let mut back = Tccp::default();
    back.numresolutions = 3;
    read_sqcd(&mut back, &bytes).unwrap();
    assert!(sqcd_equal(&tccp, &back));
    // unit step for the reversible path
    let q = band_params(&tccp, false, 8, 0, 0);
    assert!((q.stepsize - 1.0).abs() < 1e-6);
  }

  #[test]
  fn expounded_round_trip() {
    let mut tccp = Tccp::default();
    tccp.numresolutions = 4;
    tccp.qmfbid = 0;
    tccp.qntsty = QNTSTY_SEQNT;
    calc_explicit_stepsizes(&mut tccp, 10);
    let bytes = write_sqcd(&tccp);
    assert_eq!(bytes.len(), 1 + 2 * 10);
    let mut back = Tccp::default();
    back.numresolutions = 4;
    back.qmfbid = 0;
    read_sqcd(&mut back, &bytes).unwrap();
    assert!(sqcd_equal(&tccp, &back));
  }

  #[test]
  fn derived_exponents_step_down() {
    let mut tccp = Tccp::default();
    tccp.numresolutions = 4;
    tccp.qntsty = QNTSTY_SIQNT;
    tccp.stepsizes[0] = StepSize { expn: 12, mant: 0 };
    assert_eq!(band_stepsize_raw(&tccp, 0, 0).expn, 12);
    assert_eq!(band_stepsize_raw(&tccp, 1, 1).expn, 12);
    assert_eq!(band_stepsize_raw(&tccp, 2, 1).expn, 11);
    assert_eq!(band_stepsize_raw(&tccp, 3, 3).expn, 10);
  }

  #[test]
  fn cap_value_fits_five_bits() {
    let mut tccp = Tccp::default();
    tccp.numresolutions = 5;
    calc_explicit_stepsizes(&mut tccp, 12);
    let ccap = ht_cap_value(&[tccp], 12);
    assert!(ccap <= 31);
  }
}
