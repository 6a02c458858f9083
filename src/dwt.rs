/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2001-2003, David Janssens
 * Copyright (c) 2017, IntoPix SA <contact@intopix.com>
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

//! Reversible 5/3 and irreversible 9/7 lifting transforms.
//!
//! Both passes work on the quadrant layout the tile processor keeps per
//! resolution: the low subband occupies the leading rows/columns, the high
//! subband the trailing ones. Four rows (or columns) go through the lane
//! kernels per outer iteration. Boundary handling is whole-sample
//! symmetric extension.

use crate::error::Result;
use crate::lane::{F32x4, I32x4};
use crate::math::Rect32;
use crate::sparse_array::SparseArray;

/// 9/7 lifting coefficients.
const ALPHA: f32 = -1.586134342;
const BETA: f32 = -0.052980118;
const GAMMA: f32 = 0.882911075;
const DELTA: f32 = 0.443506852;
const K: f32 = 1.230174105;
const INV_K: f32 = 0.812893066;
const TWO_OVER_K: f32 = 2.0 / K;
const K_OVER_2: f32 = K / 2.0;

/// Filter support of the windowed inverse.
pub(crate) const SUPPORT_53: u32 = 2;
pub(crate) const SUPPORT_97: u32 = 4;

/// One synthesis step: counts and parities for both axes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DwtLevel {
  pub sn_x: usize,
  pub dn_x: usize,
  pub cas_x: usize,
  pub sn_y: usize,
  pub dn_y: usize,
  pub cas_y: usize,
}

impl DwtLevel {
  pub fn w(&self) -> usize {
    self.sn_x + self.dn_x
  }

  pub fn h(&self) -> usize {
    self.sn_y + self.dn_y
  }
}

/// Synthesis steps from the per-resolution rectangles (lowest first).
/// Entry `l` reconstructs resolution `l + 1` from resolution `l`.
pub(crate) fn levels_from_res(rects: &[Rect32]) -> Vec<DwtLevel> {
  let mut levels = Vec::new();
  for r in 1..rects.len() {
    let prev = rects[r - 1];
    let cur = rects[r];
    levels.push(DwtLevel {
      sn_x: prev.width() as usize,
      dn_x: (cur.width() - prev.width()) as usize,
      cas_x: (cur.x0 & 1) as usize,
      sn_y: prev.height() as usize,
      dn_y: (cur.height() - prev.height()) as usize,
      cas_y: (cur.y0 & 1) as usize,
    });
  }
  levels
}

#[inline]
fn clampi(i: isize, n: usize) -> usize {
  if i < 0 {
    0
  } else if i as usize >= n {
    n - 1
  } else {
    i as usize
  }
}

// ---------------------------------------------------------------------------
// 5/3 lane kernels on an interleaved buffer: four lanes per position,
// low samples at positions 2i+cas, high samples at positions 2i+1-cas.
// ---------------------------------------------------------------------------

#[inline]
fn load_lo(s: &[i32], i: isize, sn: usize, cas: usize) -> I32x4 {
  I32x4::load(&s[(2 * clampi(i, sn) + cas) * 4..])
}

#[inline]
fn load_hi(s: &[i32], i: isize, dn: usize, cas: usize) -> I32x4 {
  I32x4::load(&s[(2 * clampi(i, dn) + 1 - cas) * 4..])
}

fn inv_lift_53(s: &mut [i32], sn: usize, dn: usize, cas: usize) {
  if sn == 0 && dn == 1 {
    for l in 0..4 {
      s[l] /= 2;
    }
    return;
  }
  if dn == 0 && sn <= 1 {
    return;
  }
  let o = cas as isize;
  let two = I32x4::set1(2);
  for i in 0..sn as isize {
    let h0 = load_hi(s, i - 1 + o, dn, cas);
    let h1 = load_hi(s, i + o, dn, cas);
    let idx = (2 * i as usize + cas) * 4;
    let v = I32x4::load(&s[idx..]).sub(h0.add(h1).add(two).shr::<2>());
    v.store(&mut s[idx..]);
  }
  for i in 0..dn as isize {
    let l0 = load_lo(s, i - o, sn, cas);
    let l1 = load_lo(s, i + 1 - o, sn, cas);
    let idx = (2 * i as usize + 1 - cas) * 4;
    let v = I32x4::load(&s[idx..]).add(l0.add(l1).shr::<1>());
    v.store(&mut s[idx..]);
  }
}

fn fwd_lift_53(s: &mut [i32], sn: usize, dn: usize, cas: usize) {
  if sn == 0 && dn == 1 {
    for l in 0..4 {
      s[l] *= 2;
    }
    return;
  }
  if dn == 0 && sn <= 1 {
    return;
  }
  let o = cas as isize;
  let two = I32x4::set1(2);
  for i in 0..dn as isize {
    let l0 = load_lo(s, i - o, sn, cas);
    let l1 = load_lo(s, i + 1 - o, sn, cas);
    let idx = (2 * i as usize + 1 - cas) * 4;
    let v = I32x4::load(&s[idx..]).sub(l0.add(l1).shr::<1>());
    v.store(&mut s[idx..]);
  }
  for i in 0..sn as isize {
    let h0 = load_hi(s, i - 1 + o, dn, cas);
    let h1 = load_hi(s, i + o, dn, cas);
    let idx = (2 * i as usize + cas) * 4;
    let v = I32x4::load(&s[idx..]).add(h0.add(h1).add(two).shr::<2>());
    v.store(&mut s[idx..]);
  }
}

// ---------------------------------------------------------------------------
// 9/7 lane kernels, same interleaved layout over f32.
// ---------------------------------------------------------------------------

#[inline]
fn load_lo_f(s: &[f32], i: isize, sn: usize, cas: usize) -> F32x4 {
  F32x4::load(&s[(2 * clampi(i, sn) + cas) * 4..])
}

#[inline]
fn load_hi_f(s: &[f32], i: isize, dn: usize, cas: usize) -> F32x4 {
  F32x4::load(&s[(2 * clampi(i, dn) + 1 - cas) * 4..])
}

fn scale_97(s: &mut [f32], sn: usize, dn: usize, cas: usize, lo_k: f32, hi_k: f32) {
  for i in 0..sn {
    let idx = (2 * i + cas) * 4;
    let v = F32x4::load(&s[idx..]).mul(F32x4::set1(lo_k));
    v.store(&mut s[idx..]);
  }
  for i in 0..dn {
    let idx = (2 * i + 1 - cas) * 4;
    let v = F32x4::load(&s[idx..]).mul(F32x4::set1(hi_k));
    v.store(&mut s[idx..]);
  }
}

/// One 9/7 lifting step over the low samples: `L(i) += k*(H(i-1+o)+H(i+o))`.
fn lift_lo_97(s: &mut [f32], sn: usize, dn: usize, cas: usize, k: f32) {
  let o = cas as isize;
  for i in 0..sn as isize {
    let h0 = load_hi_f(s, i - 1 + o, dn, cas);
    let h1 = load_hi_f(s, i + o, dn, cas);
    let idx = (2 * i as usize + cas) * 4;
    let v = h0.add(h1).fma(F32x4::set1(k), F32x4::load(&s[idx..]));
    v.store(&mut s[idx..]);
  }
}

/// One 9/7 lifting step over the high samples: `H(i) += k*(L(i-o)+L(i+1-o))`.
fn lift_hi_97(s: &mut [f32], sn: usize, dn: usize, cas: usize, k: f32) {
  let o = cas as isize;
  for i in 0..dn as isize {
    let l0 = load_lo_f(s, i - o, sn, cas);
    let l1 = load_lo_f(s, i + 1 - o, sn, cas);
    let idx = (2 * i as usize + 1 - cas) * 4;
    let v = l0.add(l1).fma(F32x4::set1(k), F32x4::load(&s[idx..]));
    v.store(&mut s[idx..]);
  }
}

fn inv_lift_97(s: &mut [f32], sn: usize, dn: usize, cas: usize) {
  if sn + dn == 0 {
    return;
  }
  scale_97(s, sn, dn, cas, K, TWO_OVER_K);
  if sn + dn > 1 {
    lift_lo_97(s, sn, dn, cas, -DELTA);
    lift_hi_97(s, sn, dn, cas, -GAMMA);
    lift_lo_97(s, sn, dn, cas, -BETA);
    lift_hi_97(s, sn, dn, cas, -ALPHA);
  }
}

fn fwd_lift_97(s: &mut [f32], sn: usize, dn: usize, cas: usize) {
  if sn + dn == 0 {
    return;
  }
  if sn + dn > 1 {
    lift_hi_97(s, sn, dn, cas, ALPHA);
    lift_lo_97(s, sn, dn, cas, BETA);
    lift_hi_97(s, sn, dn, cas, GAMMA);
    lift_lo_97(s, sn, dn, cas, DELTA);
  }
  scale_97(s, sn, dn, cas, INV_K, K_OVER_2);
}

// ---------------------------------------------------------------------------
// Gather/scatter between the plane and the interleaved lane scratch.
// ---------------------------------------------------------------------------

/// Gather 4 rows starting at `y`, interleaving the left (low) and right
/// (high) halves into lane scratch.
fn gather_rows(data: &[i32], stride: usize, y: usize, rows: usize, lvl: &DwtLevel, s: &mut [i32]) {
  for l in 0..4 {
    let row = y + l.min(rows - 1);
    let base = row * stride;
    for i in 0..lvl.sn_x {
      s[(2 * i + lvl.cas_x) * 4 + l] = data[base + i];
    }
    for i in 0..lvl.dn_x {
      s[(2 * i + 1 - lvl.cas_x) * 4 + l] = data[base + lvl.sn_x + i];
    }
  }
}

fn scatter_rows_spatial(
  data: &mut [i32],
  stride: usize,
  y: usize,
  rows: usize,
  rw: usize,
  s: &[i32],
) {
  for l in 0..rows {
    let base = (y + l) * stride;
    for p in 0..rw {
      data[base + p] = s[p * 4 + l];
    }
  }
}

/// Gather 4 rows of spatial samples (no interleave; already in order).
fn gather_rows_spatial(data: &[i32], stride: usize, y: usize, rows: usize, rw: usize, s: &mut [i32]) {
  for l in 0..4 {
    let row = y + l.min(rows - 1);
    let base = row * stride;
    for p in 0..rw {
      s[p * 4 + l] = data[base + p];
    }
  }
}

/// Scatter lifted rows back into the split (low | high) halves.
fn scatter_rows_split(data: &mut [i32], stride: usize, y: usize, rows: usize, lvl: &DwtLevel, s: &[i32]) {
  for l in 0..rows {
    let base = (y + l) * stride;
    for i in 0..lvl.sn_x {
      data[base + i] = s[(2 * i + lvl.cas_x) * 4 + l];
    }
    for i in 0..lvl.dn_x {
      data[base + lvl.sn_x + i] = s[(2 * i + 1 - lvl.cas_x) * 4 + l];
    }
  }
}

fn gather_cols(data: &[i32], stride: usize, x: usize, lanes: usize, lvl: &DwtLevel, s: &mut [i32]) {
  for l in 0..4 {
    let col = x + l.min(lanes - 1);
    for i in 0..lvl.sn_y {
      s[(2 * i + lvl.cas_y) * 4 + l] = data[i * stride + col];
    }
    for i in 0..lvl.dn_y {
      s[(2 * i + 1 - lvl.cas_y) * 4 + l] = data[(lvl.sn_y + i) * stride + col];
    }
  }
}

fn scatter_cols_spatial(data: &mut [i32], stride: usize, x: usize, lanes: usize, rh: usize, s: &[i32]) {
  for l in 0..lanes {
    for p in 0..rh {
      data[p * stride + x + l] = s[p * 4 + l];
    }
  }
}

fn gather_cols_spatial(data: &[i32], stride: usize, x: usize, lanes: usize, rh: usize, s: &mut [i32]) {
  for l in 0..4 {
    let col = x + l.min(lanes - 1);
    for p in 0..rh {
      s[p * 4 + l] = data[p * stride + col];
    }
  }
}

fn scatter_cols_split(data: &mut [i32], stride: usize, x: usize, lanes: usize, lvl: &DwtLevel, s: &[i32]) {
  for l in 0..lanes {
    let col = x + l;
    for i in 0..lvl.sn_y {
      data[i * stride + col] = s[(2 * i + lvl.cas_y) * 4 + l];
    }
    for i in 0..lvl.dn_y {
      data[(lvl.sn_y + i) * stride + col] = s[(2 * i + 1 - lvl.cas_y) * 4 + l];
    }
  }
}

fn bits_to_f32(s: &[i32], f: &mut [f32], n: usize) {
  for i in 0..n {
    f[i] = f32::from_bits(s[i] as u32);
  }
}

fn f32_to_bits(f: &[f32], s: &mut [i32], n: usize) {
  for i in 0..n {
    s[i] = f[i].to_bits() as i32;
  }
}

// ---------------------------------------------------------------------------
// Whole-tile transforms.
// ---------------------------------------------------------------------------

fn scratch_len(levels: &[DwtLevel]) -> usize {
  let m = levels.iter().map(|l| l.w().max(l.h())).max().unwrap_or(0);
  m * 4
}

/// Inverse transform, low resolution upward, in place.
pub(crate) fn decode_53(data: &mut [i32], stride: usize, levels: &[DwtLevel]) {
  let mut s = vec![0i32; scratch_len(levels)];
  for lvl in levels {
    let rw = lvl.w();
    let rh = lvl.h();
    let mut y = 0;
    while y < rh {
      let rows = (rh - y).min(4);
      gather_rows(data, stride, y, rows, lvl, &mut s);
      inv_lift_53(&mut s, lvl.sn_x, lvl.dn_x, lvl.cas_x);
      scatter_rows_spatial(data, stride, y, rows, rw, &s);
      y += rows;
    }
    let mut x = 0;
    while x < rw {
      let lanes = (rw - x).min(4);
      gather_cols(data, stride, x, lanes, lvl, &mut s);
      inv_lift_53(&mut s, lvl.sn_y, lvl.dn_y, lvl.cas_y);
      scatter_cols_spatial(data, stride, x, lanes, rh, &s);
      x += lanes;
    }
  }
}

/// Forward transform, highest resolution downward, in place.
pub(crate) fn encode_53(data: &mut [i32], stride: usize, levels: &[DwtLevel]) {
  let mut s = vec![0i32; scratch_len(levels)];
  for lvl in levels.iter().rev() {
    let rw = lvl.w();
    let rh = lvl.h();
    // analysis runs the synthesis order backwards: columns, then rows
    let mut x = 0;
    while x < rw {
      let lanes = (rw - x).min(4);
      gather_cols_spatial(data, stride, x, lanes, rh, &mut s);
      fwd_lift_53(&mut s, lvl.sn_y, lvl.dn_y, lvl.cas_y);
      scatter_cols_split(data, stride, x, lanes, lvl, &s);
      x += lanes;
    }
    let mut y = 0;
    while y < rh {
      let rows = (rh - y).min(4);
      gather_rows_spatial(data, stride, y, rows, rw, &mut s);
      fwd_lift_53(&mut s, lvl.sn_x, lvl.dn_x, lvl.cas_x);
      scatter_rows_split(data, stride, y, rows, lvl, &s);
      y += rows;
    }
  }
}

pub(crate) fn decode_97(data: &mut [i32], stride: usize, levels: &[DwtLevel]) {
  let len = scratch_len(levels);
  let mut s = vec![0i32; len];
  let mut f = vec![0f32; len];
  for lvl in levels {
    let rw = lvl.w();
    let rh = lvl.h();
    let mut y = 0;
    while y < rh {
      let rows = (rh - y).min(4);
      gather_rows(data, stride, y, rows, lvl, &mut s);
      bits_to_f32(&s, &mut f, rw * 4);
      inv_lift_97(&mut f, lvl.sn_x, lvl.dn_x, lvl.cas_x);
      f32_to_bits(&f, &mut s, rw * 4);
      scatter_rows_spatial(data, stride, y, rows, rw, &s);
      y += rows;
    }
    let mut x = 0;
    while x < rw {
      let lanes = (rw - x).min(4);
      gather_cols(data, stride, x, lanes, lvl, &mut s);
      bits_to_f32(&s, &mut f, rh * 4);
      inv_lift_97(&mut f, lvl.sn_y, lvl.dn_y, lvl.cas_y);
      f32_to_bits(&f, &mut s, rh * 4);
      scatter_cols_spatial(data, stride, x, lanes, rh, &s);
      x += lanes;
    }
  }
}

pub(crate) fn encode_97(data: &mut [i32], stride: usize, levels: &[DwtLevel]) {
  let len = scratch_len(levels);
  let mut s = vec![0i32; len];
  let mut f = vec![0f32; len];
  for lvl in levels.iter().rev() {
    let rw = lvl.w();
    let rh = lvl.h();
    let mut x = 0;
    while x < rw {
      let lanes = (rw - x).min(4);
      gather_cols_spatial(data, stride, x, lanes, rh, &mut s);
      bits_to_f32(&s, &mut f, rh * 4);
      fwd_lift_97(&mut f, lvl.sn_y, lvl.dn_y, lvl.cas_y);
      f32_to_bits(&f, &mut s, rh * 4);
      scatter_cols_split(data, stride, x, lanes, lvl, &s);
      x += lanes;
    }
    let mut y = 0;
    while y < rh {
      let rows = (rh - y).min(4);
      gather_rows_spatial(data, stride, y, rows, rw, &mut s);
      bits_to_f32(&s, &mut f, rw * 4);
      fwd_lift_97(&mut f, lvl.sn_x, lvl.dn_x, lvl.cas_x);
      f32_to_bits(&f, &mut s, rw * 4);
      scatter_rows_split(data, stride, y, rows, lvl, &s);
      y += rows;
    }
  }
}

// ---------------------------------------------------------------------------
// Windowed inverse over a sparse tile buffer.
// ---------------------------------------------------------------------------

/// Inverse transform restricted to a decode window, reading and writing a
/// sparse buffer in which only the window's code-blocks were materialised.
/// `res_rects` are the canvas rectangles of the decoded resolutions,
/// lowest first; `window` is a canvas rectangle at the top resolution.
pub(crate) fn decode_partial(
  sa: &mut SparseArray,
  res_rects: &[Rect32],
  window: Rect32,
  real: bool,
) -> Result<()> {
  let levels = levels_from_res(res_rects);
  if levels.is_empty() {
    return Ok(());
  }
  let support = if real { SUPPORT_97 } else { SUPPORT_53 };
  let numres = res_rects.len();
  let len = scratch_len(&levels);
  let mut s = vec![0i32; len];
  let mut f = vec![0f32; len];

  for (l, lvl) in levels.iter().enumerate() {
    let res = res_rects[l + 1];
    let rw = lvl.w();
    let rh = lvl.h();
    // window projected onto this resolution, relative coordinates,
    // padded by twice the filter support
    let shift = (numres - 2 - l) as u32;
    let win = window.rectceildivpow2(shift).intersection(&res);
    if win.is_empty() {
      continue;
    }
    let ox0 = (win.x0 - res.x0).saturating_sub(2 * support) as usize;
    let ox1 = ((win.x1 - res.x0) as usize + 2 * support as usize).min(rw);
    let oy0 = (win.y0 - res.y0).saturating_sub(2 * support) as usize;
    let oy1 = ((win.y1 - res.y0) as usize + 2 * support as usize).min(rh);

    // coefficient row intervals contributing to [oy0, oy1)
    let m = support as usize;
    let cy0 = (oy0 / 2).saturating_sub(m);
    let cy1 = (oy1 + 1) / 2 + m;
    let lo_rows = cy0.min(lvl.sn_y)..cy1.min(lvl.sn_y);
    let hi_rows = cy0.min(lvl.dn_y)..cy1.min(lvl.dn_y);

    // horizontal synthesis over the needed coefficient rows
    let rows: Vec<usize> = lo_rows
      .clone()
      .chain(hi_rows.clone().map(|r| lvl.sn_y + r))
      .collect();
    for &row in &rows {
      let area = Rect32::new(0, row as u32, rw as u32, row as u32 + 1);
      let mut line = vec![0i32; rw];
      sa.read(&area, &mut line, 1, rw as u32, true)?;
      for i in 0..lvl.sn_x {
        s[(2 * i + lvl.cas_x) * 4] = line[i];
      }
      for i in 0..lvl.dn_x {
        s[(2 * i + 1 - lvl.cas_x) * 4] = line[lvl.sn_x + i];
      }
      if real {
        bits_to_f32(&s, &mut f, rw * 4);
        inv_lift_97(&mut f, lvl.sn_x, lvl.dn_x, lvl.cas_x);
        f32_to_bits(&f, &mut s, rw * 4);
      } else {
        inv_lift_53(&mut s, lvl.sn_x, lvl.dn_x, lvl.cas_x);
      }
      for p in 0..rw {
        line[p] = s[p * 4];
      }
      sa.write(&area, &line, 1, rw as u32, true)?;
    }

    // vertical synthesis over the needed columns, writing back only the
    // rows inside the padded window
    let mut x = ox0;
    while x < ox1 {
      let lanes = (ox1 - x).min(4);
      for l4 in 0..4 {
        let col = (x + l4.min(lanes - 1)) as u32;
        let mut line = vec![0i32; rh];
        let area = Rect32::new(col, 0, col + 1, rh as u32);
        sa.read(&area, &mut line, 1, 1, true)?;
        for i in 0..lvl.sn_y {
          s[(2 * i + lvl.cas_y) * 4 + l4] = line[i];
        }
        for i in 0..lvl.dn_y {
          s[(2 * i + 1 - lvl.cas_y) * 4 + l4] = line[lvl.sn_y + i];
        }
      }
      if real {
        bits_to_f32(&s, &mut f, rh * 4);
        inv_lift_97(&mut f, lvl.sn_y, lvl.dn_y, lvl.cas_y);
        f32_to_bits(&f, &mut s, rh * 4);
      } else {
        inv_lift_53(&mut s, lvl.sn_y, lvl.dn_y, lvl.cas_y);
      }
      for l4 in 0..lanes {
        let col = (x + l4) as u32;
        let mut line = vec![0i32; oy1 - oy0];
        for p in oy0..oy1 {
          line[p - oy0] = s[p * 4 + l4];
        }
        let area = Rect32::new(col, oy0 as u32, col + 1, oy1 as u32);
        sa.write(&area, &line, 1, 1, true)?;
      }
      x += lanes;
    }
  }
  Ok(())
}

// ---------------------------------------------------------------------------
// Subband weights for the quantizer and the rate allocator.
// ---------------------------------------------------------------------------

/// L2 norms of the 5/3 basis functions, per orientation and level.
static DWT_NORMS: [[f64; 10]; 4] = [
  [1.000, 1.500, 2.750, 5.375, 10.68, 21.34, 42.67, 85.33, 170.7, 341.3],
  [1.038, 1.592, 2.919, 5.703, 11.33, 22.64, 45.25, 90.48, 180.9, 0.0],
  [1.038, 1.592, 2.919, 5.703, 11.33, 22.64, 45.25, 90.48, 180.9, 0.0],
  [0.7186, 0.9218, 1.586, 3.043, 6.019, 12.01, 24.00, 47.97, 95.93, 0.0],
];

/// L2 norms of the 9/7 basis functions.
static DWT_NORMS_REAL: [[f64; 10]; 4] = [
  [1.000, 1.965, 4.177, 8.403, 16.90, 33.84, 67.69, 135.3, 270.6, 540.9],
  [2.022, 3.989, 8.355, 17.04, 34.27, 68.63, 137.3, 274.6, 549.0, 0.0],
  [2.022, 3.989, 8.355, 17.04, 34.27, 68.63, 137.3, 274.6, 549.0, 0.0],
  [2.080, 3.865, 8.307, 17.18, 34.42, 68.59, 137.1, 274.2, 548.4, 0.0],
];

pub(crate) fn getnorm(level: u32, orient: u32) -> f64 {
  let level = (level as usize).min(if orient == 0 { 9 } else { 8 });
  DWT_NORMS[orient as usize][level]
}

pub(crate) fn getnorm_real(level: u32, orient: u32) -> f64 {
  let level = (level as usize).min(if orient == 0 { 9 } else { 8 });
  DWT_NORMS_REAL[orient as usize][level]
}

#[cfg(test)]
mod tests {
  use super::*;

  fn res_pyramid(rect: Rect32, numres: usize) -> Vec<Rect32> {
    (0..numres)
      .map(|r| rect.rectceildivpow2((numres - 1 - r) as u32))
      .collect()
  }

  fn pattern(w: usize, h: usize) -> Vec<i32> {
    (0..w * h)
      .map(|i| ((i * 7919) % 511) as i32 - 255)
      .collect()
  }

  #[test]
  fn reversible_round_trip_even() {
    for &(w, h, numres) in &[(16u32, 16u32, 3usize), (64, 32, 4), (33, 17, 3), (5, 9, 2), (1, 7, 2)] {
      let rect = Rect32::new(0, 0, w, h);
      let rects = res_pyramid(rect, numres);
      let levels = levels_from_res(&rects);
      let mut data = pattern(w as usize, h as usize);
      let orig = data.clone();
      encode_53(&mut data, w as usize, &levels);
      decode_53(&mut data, w as usize, &levels);
      assert_eq!(data, orig, "{}x{} numres {}", w, h, numres);
    }
  }

  #[test]
  fn reversible_round_trip_odd_origin() {
    // odd canvas origin flips the lifting parity
    let rect = Rect32::new(3, 5, 36, 26);
    let rects = res_pyramid(rect, 3);
    let levels = levels_from_res(&rects);
    let w = rect.width() as usize;
    let h = rect.height() as usize;
    let mut data = pattern(w, h);
    let orig = data.clone();
    encode_53(&mut data, w, &levels);
    decode_53(&mut data, w, &levels);
    assert_eq!(data, orig);
  }

  #[test]
  fn irreversible_round_trip_close() {
    let rect = Rect32::new(0, 0, 32, 24);
    let rects = res_pyramid(rect, 3);
    let levels = levels_from_res(&rects);
    let w = 32usize;
    let h = 24usize;
    let orig: Vec<f32> = (0..w * h).map(|i| ((i % 255) as f32) - 127.0).collect();
    let mut data: Vec<i32> = orig.iter().map(|v| v.to_bits() as i32).collect();
    encode_97(&mut data, w, &levels);
    decode_97(&mut data, w, &levels);
    for (a, b) in data.iter().zip(orig.iter()) {
      let a = f32::from_bits(*a as u32);
      assert!((a - b).abs() < 1e-2, "{} vs {}", a, b);
    }
  }

  #[test]
  fn partial_matches_full() {
    let rect = Rect32::new(0, 0, 64, 48);
    let rects = res_pyramid(rect, 4);
    let levels = levels_from_res(&rects);
    let w = 64usize;
    let h = 48usize;
    let mut data = pattern(w, h);
    encode_53(&mut data, w, &levels);

    // full inverse on a copy
    let mut full = data.clone();
    decode_53(&mut full, w, &levels);

    // windowed inverse through a sparse buffer
    let mut sa = SparseArray::new(w as u32, h as u32, 16, 16).unwrap();
    let all = Rect32::new(0, 0, w as u32, h as u32);
    sa.write(&all, &data, 1, w as u32, false).unwrap();
    let window = Rect32::new(20, 12, 40, 30);
    decode_partial(&mut sa, &rects, window, false).unwrap();

    let ww = window.width() as usize;
    let mut out = vec![0i32; ww * window.height() as usize];
    sa.read(&window, &mut out, 1, ww as u32, true).unwrap();
    for y in 0..window.height() as usize {
      for x in 0..ww {
        let fy = y + window.y0 as usize;
        let fx = x + window.x0 as usize;
        assert_eq!(out[y * ww + x], full[fy * w + fx], "at ({}, {})", fx, fy);
      }
    }
  }

  #[test]
  fn norms_monotone_in_level() {
    for orient in 0..4 {
      for level in 0..8 {
        assert!(getnorm_real(level + 1, orient) > getnorm_real(level, orient) * 0.9);
      }
    }
  }
}
