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

use crate::error::{Error, Result};
use crate::math::int_fix_mul;

/// Norms of the basis functions of the reversible MCT.
static MCT_NORMS: [f64; 3] = [1.732, 0.8292, 0.8292];
/// Norms of the basis functions of the irreversible MCT.
static MCT_NORMS_REAL: [f64; 3] = [1.732, 1.805, 1.573];

pub(crate) fn get_norms() -> &'static [f64; 3] {
  &MCT_NORMS
}

pub(crate) fn get_norms_real() -> &'static [f64; 3] {
  &MCT_NORMS_REAL
}

/// Forward reversible MCT (RCT).
pub(crate) fn encode(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
  for i in 0..c0.len().min(c1.len()).min(c2.len()) {
    let r = c0[i];
    let g = c1[i];
    let b = c2[i];
    let y = (r + g * 2 + b) >> 2;
    let u = b - g;
    let v = r - g;
    c0[i] = y;
    c1[i] = u;
    c2[i] = v;
  }
}

/// Inverse reversible MCT.
pub(crate) fn decode(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
  for i in 0..c0.len().min(c1.len()).min(c2.len()) {
    let y = c0[i];
    let u = c1[i];
    let v = c2[i];
    let g = y - ((u + v) >> 2);
    let r = v + g;
    let b = u + g;
    c0[i] = r;
    c1[i] = g;
    c2[i] = b;
  }
}

/// Forward irreversible MCT (ICT). Planes hold f32 bit patterns.
pub(crate) fn encode_real(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
  for i in 0..c0.len().min(c1.len()).min(c2.len()) {
    let r = f32::from_bits(c0[i] as u32);
    let g = f32::from_bits(c1[i] as u32);
    let b = f32::from_bits(c2[i] as u32);
    let y = 0.299f32 * r + 0.587f32 * g + 0.114f32 * b;
    let u = -0.16875f32 * r - 0.331260f32 * g + 0.5f32 * b;
    let v = 0.5f32 * r - 0.41869f32 * g - 0.08131f32 * b;
    c0[i] = y.to_bits() as i32;
    c1[i] = u.to_bits() as i32;
    c2[i] = v.to_bits() as i32;
  }
}

/// Inverse irreversible MCT.
pub(crate) fn decode_real(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
  for i in 0..c0.len().min(c1.len()).min(c2.len()) {
    let y = f32::from_bits(c0[i] as u32);
    let u = f32::from_bits(c1[i] as u32);
    let v = f32::from_bits(c2[i] as u32);
    let r = y + v * 1.402f32;
    let g = y - u * 0.34413f32 - v * 0.71414f32;
    let b = y + u * 1.772f32;
    c0[i] = r.to_bits() as i32;
    c1[i] = g.to_bits() as i32;
    c2[i] = b.to_bits() as i32;
  }
}

pub(crate) fn getnorm(compno: usize) -> f64 {
  MCT_NORMS[compno.min(2)]
}

pub(crate) fn getnorm_real(compno: usize) -> f64 {
  MCT_NORMS_REAL[compno.min(2)]
}

/// Forward custom MCT: integer samples through a fixed-point (13-bit)
/// matrix multiply. `matrix` is row-major `numcomps x numcomps`.
pub(crate) fn encode_custom(matrix: &[f32], planes: &mut [Vec<i32>], n: usize) -> Result<()> {
  let numcomps = planes.len();
  if matrix.len() != numcomps * numcomps {
    return Err(Error::InvalidParameter("custom MCT matrix size"));
  }
  let multiplier = (1i64 << 13) as f32;
  let fixed: Vec<i32> = matrix.iter().map(|m| (m * multiplier) as i32).collect();
  let mut current = vec![0i32; numcomps];
  for i in 0..n {
    for (j, plane) in planes.iter().enumerate() {
      current[j] = plane[i];
    }
    let mut m = fixed.iter();
    for plane in planes.iter_mut() {
      let mut acc = 0i32;
      for &c in current.iter() {
        // matrix entries are consumed row by row
        let coeff = *m.next().unwrap_or(&0);
        acc += int_fix_mul(coeff, c);
      }
      plane[i] = acc;
    }
  }
  Ok(())
}

/// Inverse custom MCT, in float.
pub(crate) fn decode_custom(matrix: &[f32], planes: &mut [Vec<i32>], n: usize) -> Result<()> {
  let numcomps = planes.len();
  if matrix.len() != numcomps * numcomps {
    return Err(Error::InvalidParameter("custom MCT matrix size"));
  }
  let mut current = vec![0f32; numcomps];
  for i in 0..n {
    for (j, plane) in planes.iter().enumerate() {
      current[j] = plane[i] as f32;
    }
    let mut m = matrix.iter();
    for plane in planes.iter_mut() {
      let mut acc = 0f32;
      for &c in current.iter() {
        acc += *m.next().unwrap_or(&0.0) * c;
      }
      plane[i] = acc.round() as i32;
    }
  }
  Ok(())
}

/// Column norms of a custom matrix, for the rate-distortion weights.
pub(crate) fn calculate_norms(matrix: &[f32], numcomps: usize) -> Vec<f64> {
  let mut norms = vec![0f64; numcomps];
  for (i, norm) in norms.iter_mut().enumerate() {
    let mut index = i;
    for _ in 0..numcomps {
      let v = matrix[index] as f64;
      *norm += v * v;
      index += numcomps;
    }
    *norm = norm.sqrt();
  }
  norms
}

/// DC level shift on encode: unsigned samples move to a symmetric range.
pub(crate) fn dc_shift_encode(data: &mut [i32], shift: i32) {
  for v in data.iter_mut() {
    *v -= shift;
  }
}

/// Inverse DC level shift with clamping into `[min, max]`.
pub(crate) fn dc_shift_decode(data: &mut [i32], shift: i32, min: i32, max: i32) {
  for v in data.iter_mut() {
    *v = (*v + shift).max(min).min(max);
  }
}

/// Inverse DC level shift for the irreversible path: float samples are
/// rounded to nearest before the shift and clamp.
pub(crate) fn dc_shift_decode_real(data: &mut [i32], shift: i32, min: i32, max: i32) {
  for v in data.iter_mut() {
    let f = f32::from_bits(*v as u32);
    *v = (f.round() as i32 + shift).max(min).min(max);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rct_fixed_point_example() {
    let mut c0 = vec![100i32];
    let mut c1 = vec![200i32];
    let mut c2 = vec![50i32];
    encode(&mut c0, &mut c1, &mut c2);
    assert_eq!((c0[0], c1[0], c2[0]), (137, -150, -100));
    decode(&mut c0, &mut c1, &mut c2);
    assert_eq!((c0[0], c1[0], c2[0]), (100, 200, 50));
  }

  #[test]
  fn rct_round_trip_exhaustive_corner() {
    let samples = [-128, -1, 0, 1, 127, 255, -255];
    for &r in &samples {
      for &g in &samples {
        for &b in &samples {
          let mut c0 = vec![r];
          let mut c1 = vec![g];
          let mut c2 = vec![b];
          encode(&mut c0, &mut c1, &mut c2);
          decode(&mut c0, &mut c1, &mut c2);
          assert_eq!((c0[0], c1[0], c2[0]), (r, g, b));
        }
      }
    }
  }

  #[test]
  fn ict_round_trip_close() {
    let mut c0 = vec![(100.0f32).to_bits() as i32];
    let mut c1 = vec![(200.0f32).to_bits() as i32];
    let mut c2 = vec![(50.0f32).to_bits() as i32];
    encode_real(&mut c0, &mut c1, &mut c2);
    decode_real(&mut c0, &mut c1, &mut c2);
    let r = f32::from_bits(c0[0] as u32);
    let g = f32::from_bits(c1[0] as u32);
    let b = f32::from_bits(c2[0] as u32);
    assert!((r - 100.0).abs() < 1e-3);
    assert!((g - 200.0).abs() < 1e-3);
    assert!((b - 50.0).abs() < 1e-3);
  }

  #[test]
  fn custom_identity_matrix() {
    let matrix = vec![1.0, 0.0, 0.0, 1.0];
    let mut planes = vec![vec![10, 20], vec![30, 40]];
    encode_custom(&matrix, &mut planes, 2).unwrap();
    assert_eq!(planes[0], vec![10, 20]);
    assert_eq!(planes[1], vec![30, 40]);
    decode_custom(&matrix, &mut planes, 2).unwrap();
    assert_eq!(planes[0], vec![10, 20]);
  }

  #[test]
  fn dc_shift() {
    let mut data = vec![0, 255];
    dc_shift_encode(&mut data, 128);
    assert_eq!(data, vec![-128, 127]);
    dc_shift_decode(&mut data, 128, 0, 255);
    assert_eq!(data, vec![0, 255]);

    let mut wild = vec![-300, 300];
    dc_shift_decode(&mut wild, 128, 0, 255);
    assert_eq!(wild, vec![0, 255]);
  }

  #[test]
  fn norms_match_transform_energy() {
    let id = vec![1.0f32, 0.0, 0.0, 1.0];
    assert_eq!(calculate_norms(&id, 2), vec![1.0, 1.0]);
  }
}
