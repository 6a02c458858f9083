/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2001-2003, David Janssens
 * Copyright (c) 2008, 2011-2012, Centre National d'Etudes Spatiales (CNES), FR
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

//! Tile processor: canvas geometry of resolutions, bands, precincts and
//! code-blocks, plus the per-tile decode and encode pipelines gluing
//! T2 -> T1 -> DWT -> MCT together.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::consts::*;
use crate::dwt;
use crate::error::{Error, Result};
use crate::event::*;
use crate::ht;
use crate::image::{sample_range, Image};
use crate::math::{uint_ceildivpow2, uint_floordivpow2, Rect32};
use crate::mct;
use crate::quantizer;
use crate::scheduler::Scheduler;
use crate::sparse_array::SparseArray;
use crate::t1;
use crate::tgt::TagTree;
use crate::types::{CodingParams, MctMode, Tcp};

#[inline]
fn ceildiv_i64(a: i64, b: i64) -> i64 {
  (a + b - 1).div_euclid(b)
}

/// Band rectangle on the band's own grid (Equation B-15).
pub(crate) fn band_rect(tilec: Rect32, numres: u32, resno: u32, orient: u32) -> Rect32 {
  if resno == 0 {
    return tilec.rectceildivpow2(numres - 1);
  }
  let nb = numres - resno;
  let xob = (orient & 1) as i64;
  let yob = (orient >> 1) as i64;
  let off_x = (1i64 << (nb - 1)) * xob;
  let off_y = (1i64 << (nb - 1)) * yob;
  let d = 1i64 << nb;
  Rect32 {
    x0: ceildiv_i64(tilec.x0 as i64 - off_x, d).max(0) as u32,
    y0: ceildiv_i64(tilec.y0 as i64 - off_y, d).max(0) as u32,
    x1: ceildiv_i64(tilec.x1 as i64 - off_x, d).max(0) as u32,
    y1: ceildiv_i64(tilec.y1 as i64 - off_y, d).max(0) as u32,
  }
}

/// Project a half-open interval from the resolution grid onto a band
/// grid: band index k covers resolution sample 2k + parity.
#[inline]
fn res_to_band(a: u32, b: u32, parity: u32) -> (u32, u32) {
  let lo = ceildiv_i64(a as i64 - parity as i64, 2).max(0) as u32;
  let hi = ceildiv_i64(b as i64 - parity as i64, 2).max(0) as u32;
  (lo, hi)
}

// ---------------------------------------------------------------------------
// Per-tile structures. The cblk type parameter separates the decode and
// encode variants of the tree.
// ---------------------------------------------------------------------------

/// One codeword segment of a decoded block: pass capacity, signalled
/// length and the non-owning chunks into the tile's compressed bytes.
#[derive(Debug, Default, Clone)]
pub(crate) struct SegDec {
  pub numpasses: u32,
  pub maxpasses: u32,
  pub len: u32,
  pub chunks: SmallVec<[(u32, u32); 2]>,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct CblkDec {
  pub rect: Rect32,
  /// Included in some packet of an earlier layer.
  pub included: bool,
  /// Magnitude bit-planes signalled for this block.
  pub numbps: u32,
  pub numlenbits: u32,
  /// Total passes accumulated over all layers so far.
  pub numpasses: u32,
  pub segs: SmallVec<[SegDec; 2]>,
  /// Body ran past the tile-part: leave the samples zero.
  pub corrupt: bool,
  /// Outside the decode window: header parsed, body skipped.
  pub skip: bool,
  pub decoded: Option<(Vec<i32>, u32)>,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CblkLayer {
  pub numpasses: u32,
  pub start: u32,
  pub len: u32,
}

#[derive(Debug, Default)]
pub(crate) struct CblkEnc {
  pub rect: Rect32,
  pub data: Vec<i32>,
  pub stream: Vec<u8>,
  pub passes: Vec<t1::PassInfo>,
  pub numbps: u32,
  pub layers: SmallVec<[CblkLayer; 4]>,
  pub numpassesinlayers: u32,
  /// Lblock state while writing packet headers.
  pub numlenbits_enc: u32,
  /// Distortion weight of this block's band ((stepsize * basis norm)^2).
  pub weight: f64,
}

#[derive(Debug)]
pub(crate) struct Precinct<C> {
  /// Rectangle on the band grid.
  pub rect: Rect32,
  /// Code-block grid.
  pub cw: u32,
  pub ch: u32,
  pub cblks: Vec<C>,
  pub incltree: TagTree,
  pub imsbtree: TagTree,
}

#[derive(Debug)]
pub(crate) struct Band<C> {
  pub orient: u32,
  pub rect: Rect32,
  pub stepsize: f32,
  /// Mb of Equation E-2.
  pub numbps: u32,
  res_rect: Rect32,
  pdx: u32,
  pdy: u32,
  pub pw: u32,
  pub ph: u32,
  resno: u32,
  cblkw_exp: u32,
  cblkh_exp: u32,
  pub precincts: BTreeMap<u32, Precinct<C>>,
}

impl<C> Band<C> {
  pub fn is_empty(&self) -> bool {
    self.rect.is_empty()
  }

  /// Rectangle of precinct `precno` on the resolution grid.
  pub fn precinct_rect_on_res(&self, precno: u32) -> Rect32 {
    let pw = self.pw.max(1);
    let px = precno % pw;
    let py = precno / pw;
    let gx0 = uint_floordivpow2(self.res_rect.x0, self.pdx);
    let gy0 = uint_floordivpow2(self.res_rect.y0, self.pdy);
    let rx0 = ((gx0 + px) << self.pdx).max(self.res_rect.x0);
    let rx1 = (((gx0 + px + 1) as u64) << self.pdx).min(self.res_rect.x1 as u64) as u32;
    let ry0 = ((gy0 + py) << self.pdy).max(self.res_rect.y0);
    let ry1 = (((gy0 + py + 1) as u64) << self.pdy).min(self.res_rect.y1 as u64) as u32;
    if rx0 >= rx1 || ry0 >= ry1 {
      return Rect32::default();
    }
    Rect32::new(rx0, ry0, rx1, ry1)
  }

  /// Rectangle of precinct `precno` on the band grid.
  pub fn precinct_rect(&self, precno: u32) -> Rect32 {
    let r = self.precinct_rect_on_res(precno);
    if r.is_empty() {
      return r;
    }
    if self.resno == 0 {
      return r.intersection(&self.rect);
    }
    let (bx0, bx1) = res_to_band(r.x0, r.x1, self.orient & 1);
    let (by0, by1) = res_to_band(r.y0, r.y1, (self.orient >> 1) & 1);
    Rect32::new(bx0, by0, bx1, by1).intersection(&self.rect)
  }

  fn make_precinct(&self, precno: u32, make: &dyn Fn(Rect32) -> C) -> Precinct<C> {
    let rect = self.precinct_rect(precno);
    let (cw, ch) = if rect.is_empty() {
      (0, 0)
    } else {
      (
        uint_ceildivpow2(rect.x1, self.cblkw_exp) - uint_floordivpow2(rect.x0, self.cblkw_exp),
        uint_ceildivpow2(rect.y1, self.cblkh_exp) - uint_floordivpow2(rect.y0, self.cblkh_exp),
      )
    };
    let cx0 = uint_floordivpow2(rect.x0, self.cblkw_exp);
    let cy0 = uint_floordivpow2(rect.y0, self.cblkh_exp);
    let mut cblks = Vec::with_capacity((cw * ch) as usize);
    for j in 0..ch {
      for i in 0..cw {
        let cb = Rect32 {
          x0: ((cx0 + i) << self.cblkw_exp).max(rect.x0),
          y0: ((cy0 + j) << self.cblkh_exp).max(rect.y0),
          x1: (((cx0 + i + 1) as u64) << self.cblkw_exp).min(rect.x1 as u64) as u32,
          y1: (((cy0 + j + 1) as u64) << self.cblkh_exp).min(rect.y1 as u64) as u32,
        };
        cblks.push(make(cb));
      }
    }
    Precinct {
      rect,
      cw,
      ch,
      cblks,
      incltree: TagTree::new(cw, ch),
      imsbtree: TagTree::new(cw, ch),
    }
  }

  /// Precincts come to life on first reference during decode.
  pub fn precinct_entry(&mut self, precno: u32, make: &dyn Fn(Rect32) -> C) -> &mut Precinct<C> {
    if !self.precincts.contains_key(&precno) {
      let p = self.make_precinct(precno, make);
      self.precincts.insert(precno, p);
    }
    self.precincts.get_mut(&precno).expect("just inserted")
  }
}

#[derive(Debug)]
pub(crate) struct Resolution<C> {
  pub rect: Rect32,
  /// Precinct grid of the resolution.
  pub pw: u32,
  pub ph: u32,
  pub pdx: u32,
  pub pdy: u32,
  pub bands: SmallVec<[Band<C>; 3]>,
}

#[derive(Debug)]
pub(crate) struct TileComp<C> {
  pub rect: Rect32,
  pub numresolutions: u32,
  /// Resolutions actually decoded (after reduction).
  pub minimum_numresolutions: u32,
  pub resolutions: Vec<Resolution<C>>,
  pub data: Vec<i32>,
  /// Decode window on the top decoded resolution's canvas grid.
  pub window: Option<Rect32>,
}

impl<C> TileComp<C> {
  /// Extent of the highest decoded resolution.
  pub fn reduced_rect(&self) -> Rect32 {
    self
      .resolutions
      .get(self.minimum_numresolutions as usize - 1)
      .map(|r| r.rect)
      .unwrap_or_default()
  }

  pub fn stride(&self) -> usize {
    self.reduced_rect().width() as usize
  }

  /// Window projected onto resolution `resno`, padded by the filter
  /// support so boundary blocks still participate.
  pub fn res_window(&self, resno: u32, support: u32) -> Option<Rect32> {
    let win = self.window?;
    let shift = self.minimum_numresolutions - 1 - resno;
    let res = self.resolutions[resno as usize].rect;
    Some(win.rectceildivpow2(shift).grow(support).intersection(&res))
  }
}

#[derive(Debug)]
pub(crate) struct Tile<C> {
  pub tileno: u32,
  pub rect: Rect32,
  pub comps: Vec<TileComp<C>>,
  /// Tile-part bodies, concatenated; code-block chunks index into it.
  pub compressed: Vec<u8>,
  pub truncated: bool,
  /// Accumulated encode distortion, for the rate allocator.
  pub distortion: f64,
}

/// Offset of a block inside the quadrant layout of its resolution.
pub(crate) fn cblk_plane_offset(
  prev_res: Option<Rect32>,
  orient: u32,
  band_rect: Rect32,
  cblk: Rect32,
) -> (usize, usize) {
  let mut x = (cblk.x0 - band_rect.x0) as usize;
  let mut y = (cblk.y0 - band_rect.y0) as usize;
  if let Some(prev) = prev_res {
    if orient & 1 != 0 {
      x += prev.width() as usize;
    }
    if orient & 2 != 0 {
      y += prev.height() as usize;
    }
  }
  (x, y)
}

/// Build one tile's resolution/band/precinct skeleton.
fn build_tile<C>(
  image: &Image,
  cp: &CodingParams,
  tcp: &Tcp,
  tileno: u32,
  reduce: u32,
  window: Option<Rect32>,
  eager_precincts: bool,
  make: &dyn Fn(Rect32) -> C,
) -> Result<Tile<C>> {
  let p = tileno % cp.tw;
  let q = tileno / cp.tw;
  let rect = cp.tile_rect(Rect32::new(image.x0, image.y0, image.x1, image.y1), p, q);
  let mut comps = Vec::with_capacity(image.comps.len());
  for (compno, imgcomp) in image.comps.iter().enumerate() {
    let tccp = &tcp.tccps[compno];
    let numres = tccp.numresolutions;
    if reduce >= numres {
      return Err(Error::InvalidParameter(
        "resolution reduction leaves nothing to decode",
      ));
    }
    let tilec_rect = rect.rectceildiv(imgcomp.dx, imgcomp.dy);
    let mut resolutions = Vec::with_capacity(numres as usize);
    for resno in 0..numres {
      let level = numres - 1 - resno;
      let res_rect = tilec_rect.rectceildivpow2(level);
      let pdx = tccp.prcw_exp[resno as usize];
      let pdy = tccp.prch_exp[resno as usize];
      let pw = if res_rect.is_empty() {
        0
      } else {
        uint_ceildivpow2(res_rect.x1, pdx) - uint_floordivpow2(res_rect.x0, pdx)
      };
      let ph = if res_rect.is_empty() {
        0
      } else {
        uint_ceildivpow2(res_rect.y1, pdy) - uint_floordivpow2(res_rect.y0, pdy)
      };
      let orients: &[u32] = if resno == 0 { &[0] } else { &[1, 2, 3] };
      let mut bands = SmallVec::new();
      for &orient in orients {
        let brect = band_rect(tilec_rect, numres, resno, orient);
        let bq = quantizer::band_params(tccp, tcp.is_ht, imgcomp.prec, resno, orient);
        let cblkw_exp = tccp.cblkw.min(if resno == 0 { pdx } else { pdx.max(1) - 1 });
        let cblkh_exp = tccp.cblkh.min(if resno == 0 { pdy } else { pdy.max(1) - 1 });
        let mut band = Band {
          orient,
          rect: brect,
          stepsize: bq.stepsize,
          numbps: bq.numbps.max(0) as u32,
          res_rect,
          pdx,
          pdy,
          pw,
          ph,
          resno,
          cblkw_exp,
          cblkh_exp,
          precincts: BTreeMap::new(),
        };
        if eager_precincts && !band.is_empty() {
          for precno in 0..pw * ph {
            band.precinct_entry(precno, make);
          }
        }
        bands.push(band);
      }
      resolutions.push(Resolution {
        rect: res_rect,
        pw,
        ph,
        pdx,
        pdy,
        bands,
      });
    }
    let minimum = numres - reduce;
    let comp_window = window.map(|w| {
      let top = tilec_rect.rectceildivpow2(reduce);
      w.rectceildiv(imgcomp.dx, imgcomp.dy)
        .rectceildivpow2(reduce)
        .intersection(&top)
    });
    comps.push(TileComp {
      rect: tilec_rect,
      numresolutions: numres,
      minimum_numresolutions: minimum,
      resolutions,
      data: Vec::new(),
      window: comp_window,
    });
  }
  Ok(Tile {
    tileno,
    rect,
    comps,
    compressed: Vec::new(),
    truncated: false,
    distortion: 0.0,
  })
}

pub(crate) fn build_tile_dec(
  image: &Image,
  cp: &CodingParams,
  tcp: &Tcp,
  tileno: u32,
  reduce: u32,
  window: Option<Rect32>,
) -> Result<Tile<CblkDec>> {
  build_tile(image, cp, tcp, tileno, reduce, window, false, &|rect| CblkDec {
    rect,
    ..Default::default()
  })
}

pub(crate) fn build_tile_enc(
  image: &Image,
  cp: &CodingParams,
  tcp: &Tcp,
  tileno: u32,
) -> Result<Tile<CblkEnc>> {
  build_tile(image, cp, tcp, tileno, 0, None, true, &|rect| CblkEnc {
    rect,
    ..Default::default()
  })
}

// ---------------------------------------------------------------------------
// Decode pipeline.
// ---------------------------------------------------------------------------

impl Tile<CblkDec> {
  /// T1 + post-T1 + inverse DWT + inverse MCT + DC shift. Packet parsing
  /// must be complete before this runs; no worker touches the stream.
  pub fn decode(
    &mut self,
    tcp: &Tcp,
    image: &Image,
    sched: &Scheduler,
    mgr: &mut EventManager,
  ) -> Result<()> {
    let compressed = std::mem::take(&mut self.compressed);
    let numcomps = self.comps.len();
    for compno in 0..numcomps {
      self.decode_component(compno, tcp, sched, &compressed)?;
    }
    self.compressed = compressed;

    // multi-component transform over the first three components
    if tcp.mct != MctMode::None && numcomps >= 3 {
      let n = self.comps[0].data.len();
      let same = self.comps[1].data.len() == n && self.comps[2].data.len() == n;
      if !same {
        event_msg!(mgr, EVT_WARNING, "MCT skipped: component sizes differ within the tile");
      } else {
        match tcp.mct {
          MctMode::Array => {
            let (a, rest) = self.comps.split_at_mut(1);
            let (b, c) = rest.split_at_mut(1);
            if tcp.tccps[0].qmfbid == 1 {
              mct::decode(&mut a[0].data, &mut b[0].data, &mut c[0].data);
            } else {
              mct::decode_real(&mut a[0].data, &mut b[0].data, &mut c[0].data);
            }
          }
          MctMode::Custom => {
            if let Some(matrix) = &tcp.mct_decoding_matrix {
              let count = n;
              let mut planes: Vec<Vec<i32>> = self
                .comps
                .iter_mut()
                .map(|c| std::mem::take(&mut c.data))
                .collect();
              // the irreversible path carries float bit patterns; the
              // custom inverse works on integers
              if tcp.tccps[0].qmfbid == 0 {
                for plane in planes.iter_mut() {
                  for v in plane.iter_mut() {
                    *v = f32::from_bits(*v as u32).round() as i32;
                  }
                }
              }
              mct::decode_custom(matrix, &mut planes, count)?;
              if let Some(offsets) = &tcp.mct_offsets {
                for (plane, off) in planes.iter_mut().zip(offsets.iter()) {
                  for v in plane.iter_mut() {
                    *v += *off;
                  }
                }
              }
              for (comp, plane) in self.comps.iter_mut().zip(planes) {
                comp.data = plane;
              }
            }
          }
          MctMode::None => {}
        }
      }
    }

    // DC level shift, clamped into the component's representable range
    for (compno, comp) in self.comps.iter_mut().enumerate() {
      let tccp = &tcp.tccps[compno];
      let imgcomp = &image.comps[compno];
      let (min, max) = sample_range(imgcomp.prec, imgcomp.sgnd);
      let float_plane = tccp.qmfbid == 0 && tcp.mct != MctMode::Custom;
      if float_plane {
        mct::dc_shift_decode_real(&mut comp.data, tccp.dc_level_shift, min, max);
      } else {
        mct::dc_shift_decode(&mut comp.data, tccp.dc_level_shift, min, max);
      }
    }
    Ok(())
  }

  fn decode_component(
    &mut self,
    compno: usize,
    tcp: &Tcp,
    sched: &Scheduler,
    compressed: &[u8],
  ) -> Result<()> {
    let tccp = &tcp.tccps[compno];
    let real = tccp.qmfbid == 0;
    let is_ht = tcp.is_ht || tccp.cblk_sty.contains(CblkStyle::HT);
    let comp = &mut self.comps[compno];
    let reduced = comp.reduced_rect();
    let w = reduced.width() as usize;
    let h = reduced.height() as usize;
    if w == 0 || h == 0 {
      comp.data = Vec::new();
      return Ok(());
    }
    let windowed = comp.window.is_some();
    let mut sparse = if windowed {
      Some(SparseArray::new(w as u32, h as u32, 64, 64)?)
    } else {
      comp.data = vec![0i32; w * h];
      None
    };

    let roishift = tccp.roishift;
    let minimum = comp.minimum_numresolutions as usize;
    for resno in 0..minimum {
      let prev_res = if resno > 0 {
        Some(comp.resolutions[resno - 1].rect)
      } else {
        None
      };
      let nbands = comp.resolutions[resno].bands.len();
      for bandno in 0..nbands {
        let band = &comp.resolutions[resno].bands[bandno];
        if band.is_empty() {
          continue;
        }
        let orient = band.orient;
        let stepsize = band.stepsize;
        let band_rect = band.rect;
        let cblk_sty = tccp.cblk_sty;
        let band = &mut comp.resolutions[resno].bands[bandno];
        for (_, prec) in band.precincts.iter_mut() {
          // every block decodes independently
          sched.for_each_mut(&mut prec.cblks, |_, cblk| {
            decode_block(cblk, is_ht, orient, cblk_sty, compressed)
          })?;
        }
        // post-T1: scale, undo the ROI shift and place into the plane
        let band = &comp.resolutions[resno].bands[bandno];
        let mut writes: Vec<(Rect32, Vec<i32>)> = Vec::new();
        for (_, prec) in band.precincts.iter() {
          for cblk in prec.cblks.iter() {
            let (data, last_plane) = match &cblk.decoded {
              Some(d) => (&d.0, d.1),
              None => continue,
            };
            let bw = cblk.rect.width() as usize;
            let bh = cblk.rect.height() as usize;
            if bw == 0 || bh == 0 {
              continue;
            }
            let mut out = vec![0i32; bw * bh];
            for (o, v) in out.iter_mut().zip(data.iter()) {
              let mut mag = v.unsigned_abs();
              if mag != 0 && last_plane > 0 {
                mag += 1 << (last_plane - 1);
              }
              if roishift > 0 && mag >= (1u32 << roishift) {
                mag >>= roishift;
              }
              if mag == 0 {
                *o = 0;
              } else if real {
                let f = (mag as f32 + 0.5) * stepsize;
                let f = if *v < 0 { -f } else { f };
                *o = f.to_bits() as i32;
              } else {
                *o = if *v < 0 { -(mag as i32) } else { mag as i32 };
              }
            }
            let (x, y) = cblk_plane_offset(prev_res, orient, band_rect, cblk.rect);
            writes.push((
              Rect32::new(x as u32, y as u32, (x + bw) as u32, (y + bh) as u32),
              out,
            ));
          }
        }
        for (area, out) in writes {
          let bw = area.width();
          match &mut sparse {
            Some(sa) => sa.write(&area, &out, 1, bw, true)?,
            None => {
              for row in 0..area.height() as usize {
                let dst = (area.y0 as usize + row) * w + area.x0 as usize;
                comp.data[dst..dst + bw as usize]
                  .copy_from_slice(&out[row * bw as usize..(row + 1) * bw as usize]);
              }
            }
          }
        }
      }
    }

    // inverse wavelet
    let res_rects: Vec<Rect32> = comp.resolutions[..minimum].iter().map(|r| r.rect).collect();
    match &mut sparse {
      Some(sa) => {
        let win = comp.window.unwrap_or(reduced);
        dwt::decode_partial(sa, &res_rects, win, real)?;
        // materialise the window into the plane; untouched areas are zero
        comp.data = vec![0i32; w * h];
        let rel = Rect32::new(
          win.x0 - reduced.x0,
          win.y0 - reduced.y0,
          win.x1 - reduced.x0,
          win.y1 - reduced.y0,
        );
        if !rel.is_empty() {
          let mut out = vec![0i32; rel.area() as usize];
          sa.read(&rel, &mut out, 1, rel.width(), true)?;
          for row in 0..rel.height() as usize {
            let dst = (rel.y0 as usize + row) * w + rel.x0 as usize;
            comp.data[dst..dst + rel.width() as usize]
              .copy_from_slice(&out[row * rel.width() as usize..(row + 1) * rel.width() as usize]);
          }
        }
      }
      None => {
        let levels = dwt::levels_from_res(&res_rects);
        if real {
          dwt::decode_97(&mut comp.data, w, &levels);
        } else {
          dwt::decode_53(&mut comp.data, w, &levels);
        }
      }
    }
    Ok(())
  }

  /// Copy the reconstructed tile into the caller's image planes. The
  /// image components carry the (possibly reduced, possibly windowed)
  /// output geometry.
  pub fn update_image(&self, image: &mut Image) -> Result<()> {
    for (comp, imgcomp) in self.comps.iter().zip(image.comps.iter_mut()) {
      let reduced = comp.reduced_rect();
      let src_w = reduced.width() as usize;
      let dst = Rect32::new(
        imgcomp.x0,
        imgcomp.y0,
        imgcomp.x0 + imgcomp.w,
        imgcomp.y0 + imgcomp.h,
      );
      let overlap = reduced.intersection(&dst);
      if overlap.is_empty() || comp.data.is_empty() {
        continue;
      }
      let dst_w = imgcomp.w as usize;
      let data = imgcomp
        .data_mut()
        .ok_or(Error::InvalidParameter("image planes not allocated"))?;
      for row in 0..overlap.height() as usize {
        let sy = (overlap.y0 - reduced.y0) as usize + row;
        let sx = (overlap.x0 - reduced.x0) as usize;
        let dy = (overlap.y0 - dst.y0) as usize + row;
        let dx = (overlap.x0 - dst.x0) as usize;
        let n = overlap.width() as usize;
        data[dy * dst_w + dx..dy * dst_w + dx + n]
          .copy_from_slice(&comp.data[sy * src_w + sx..sy * src_w + sx + n]);
      }
    }
    for imgcomp in image.comps.iter_mut() {
      imgcomp.resno_decoded = self
        .comps
        .first()
        .map(|c| c.minimum_numresolutions - 1)
        .unwrap_or(0);
    }
    Ok(())
  }
}

fn decode_block(
  cblk: &mut CblkDec,
  is_ht: bool,
  orient: u32,
  cblk_sty: CblkStyle,
  compressed: &[u8],
) -> Result<()> {
  if !cblk.included || cblk.skip || cblk.corrupt {
    return Ok(());
  }
  let w = cblk.rect.width() as usize;
  let h = cblk.rect.height() as usize;
  if w == 0 || h == 0 {
    return Ok(());
  }
  // materialise segment bytes from the chunk list
  let mut seg_bytes: Vec<Vec<u8>> = Vec::with_capacity(cblk.segs.len());
  for seg in cblk.segs.iter() {
    let mut bytes = Vec::with_capacity(seg.len as usize);
    for &(off, len) in seg.chunks.iter() {
      let start = off as usize;
      let end = (off + len) as usize;
      if end > compressed.len() {
        cblk.corrupt = true;
        return Ok(());
      }
      bytes.extend_from_slice(&compressed[start..end]);
    }
    seg_bytes.push(bytes);
  }
  if is_ht {
    let mut stream = Vec::new();
    for b in &seg_bytes {
      stream.extend_from_slice(b);
    }
    match ht::decode_cblk(&stream, cblk.numbps, w, h) {
      Ok(data) => cblk.decoded = Some((data, 0)),
      Err(_) => {
        // a block that fails the bidirectional check contributes zeros
        cblk.corrupt = true;
      }
    }
    return Ok(());
  }
  let segments: Vec<t1::Segment<'_>> = cblk
    .segs
    .iter()
    .zip(seg_bytes.iter())
    .map(|(seg, bytes)| t1::Segment {
      data: &bytes[..],
      numpasses: seg.numpasses,
    })
    .collect();
  match t1::decode_cblk(&segments, cblk.numbps, orient, cblk_sty, w, h) {
    Ok((data, last_plane)) => cblk.decoded = Some((data, last_plane)),
    Err(_) => cblk.corrupt = true,
  }
  Ok(())
}

// ---------------------------------------------------------------------------
// Encode pipeline.
// ---------------------------------------------------------------------------

impl Tile<CblkEnc> {
  /// Image copy + DC shift + MCT + forward DWT + quantization + T1.
  pub fn encode(
    &mut self,
    tcp: &Tcp,
    image: &Image,
    sched: &Scheduler,
    _mgr: &mut EventManager,
  ) -> Result<()> {
    let numcomps = self.comps.len();
    // stage 1: per-component plane extraction with DC level shift
    for (compno, comp) in self.comps.iter_mut().enumerate() {
      let imgcomp = &image.comps[compno];
      let tccp = &tcp.tccps[compno];
      let w = comp.rect.width() as usize;
      let h = comp.rect.height() as usize;
      let src = imgcomp
        .data()
        .ok_or(Error::InvalidParameter("source image has no data"))?;
      let mut plane = vec![0i32; w * h];
      for row in 0..h {
        let sy = comp.rect.y0 as usize + row - imgcomp.y0 as usize;
        let sx = comp.rect.x0 as usize - imgcomp.x0 as usize;
        let s = &src[sy * imgcomp.w as usize + sx..sy * imgcomp.w as usize + sx + w];
        plane[row * w..(row + 1) * w].copy_from_slice(s);
      }
      mct::dc_shift_encode(&mut plane, tccp.dc_level_shift);
      comp.data = plane;
    }

    // stage 2: multi-component transform
    let real = tcp.tccps[0].qmfbid == 0;
    match tcp.mct {
      MctMode::Array if numcomps >= 3 => {
        if real {
          for comp in self.comps.iter_mut().take(3) {
            for v in comp.data.iter_mut() {
              *v = (*v as f32).to_bits() as i32;
            }
          }
          let (a, rest) = self.comps.split_at_mut(1);
          let (b, c) = rest.split_at_mut(1);
          mct::encode_real(&mut a[0].data, &mut b[0].data, &mut c[0].data);
          for comp in self.comps.iter_mut().skip(3) {
            for v in comp.data.iter_mut() {
              *v = (*v as f32).to_bits() as i32;
            }
          }
        } else {
          let (a, rest) = self.comps.split_at_mut(1);
          let (b, c) = rest.split_at_mut(1);
          mct::encode(&mut a[0].data, &mut b[0].data, &mut c[0].data);
        }
      }
      MctMode::Custom => {
        if let Some(matrix) = &tcp.mct_encoding_matrix {
          let n = self.comps[0].data.len();
          let mut planes: Vec<Vec<i32>> = self
            .comps
            .iter_mut()
            .map(|c| std::mem::take(&mut c.data))
            .collect();
          if let Some(offsets) = &tcp.mct_offsets {
            for (plane, off) in planes.iter_mut().zip(offsets.iter()) {
              for v in plane.iter_mut() {
                *v -= *off;
              }
            }
          }
          mct::encode_custom(matrix, &mut planes, n)?;
          for (comp, plane) in self.comps.iter_mut().zip(planes) {
            comp.data = plane;
          }
        }
        if real {
          for comp in self.comps.iter_mut() {
            for v in comp.data.iter_mut() {
              *v = (*v as f32).to_bits() as i32;
            }
          }
        }
      }
      _ => {
        if real {
          for comp in self.comps.iter_mut() {
            for v in comp.data.iter_mut() {
              *v = (*v as f32).to_bits() as i32;
            }
          }
        }
      }
    }

    // stage 3: forward wavelet per component
    sched.for_each_mut(&mut self.comps, |_, comp| {
      let res_rects: Vec<Rect32> = comp.resolutions.iter().map(|r| r.rect).collect();
      let levels = dwt::levels_from_res(&res_rects);
      let w = comp.rect.width() as usize;
      if w == 0 || comp.data.is_empty() {
        return Ok(());
      }
      if real {
        dwt::encode_97(&mut comp.data, w, &levels);
      } else {
        dwt::encode_53(&mut comp.data, w, &levels);
      }
      Ok(())
    })?;

    // stage 4 + 5: quantize into block buffers and entropy-code them
    let is_ht = tcp.is_ht;
    let mut tile_dist = 0f64;
    for (compno, comp) in self.comps.iter_mut().enumerate() {
      let tccp = &tcp.tccps[compno];
      let numres = comp.numresolutions;
      let plane_w = comp.rect.width() as usize;
      let mct_norm = match tcp.mct {
        MctMode::Array if compno < 3 => {
          if tccp.qmfbid == 1 {
            mct::getnorm(compno)
          } else {
            mct::getnorm_real(compno)
          }
        }
        _ => 1.0,
      };
      for resno in 0..numres as usize {
        let prev_res = if resno > 0 {
          Some(comp.resolutions[resno - 1].rect)
        } else {
          None
        };
        let level = numres - 1 - resno as u32;
        let nbands = comp.resolutions[resno].bands.len();
        for bandno in 0..nbands {
          let band = &comp.resolutions[resno].bands[bandno];
          if band.is_empty() {
            continue;
          }
          let orient = band.orient;
          let stepsize = band.stepsize as f64;
          let band_rect = band.rect;
          let basis = if tccp.qmfbid == 1 {
            dwt::getnorm(level, orient)
          } else {
            dwt::getnorm_real(level, orient)
          };
          let weight = (stepsize * basis * mct_norm) * (stepsize * basis * mct_norm);
          let roishift = tccp.roishift;
          let cblk_sty = tccp.cblk_sty;
          let qmfbid = tccp.qmfbid;
          // gather the block coefficients out of the plane
          let data_ref = &comp.data;
          let band = &comp.resolutions[resno].bands[bandno];
          let mut blocks: Vec<(u32, usize, Vec<i32>)> = Vec::new();
          for (&precno, prec) in band.precincts.iter() {
            for (cblkno, cblk) in prec.cblks.iter().enumerate() {
              let bw = cblk.rect.width() as usize;
              let bh = cblk.rect.height() as usize;
              if bw == 0 || bh == 0 {
                blocks.push((precno, cblkno, Vec::new()));
                continue;
              }
              let (x, y) = cblk_plane_offset(prev_res, orient, band_rect, cblk.rect);
              let mut data = vec![0i32; bw * bh];
              for row in 0..bh {
                let src = (y + row) * plane_w + x;
                for col in 0..bw {
                  let v = data_ref[src + col];
                  let q = if qmfbid == 1 {
                    v
                  } else {
                    let f = f32::from_bits(v as u32);
                    (f / stepsize as f32) as i32
                  };
                  data[row * bw + col] = q << roishift;
                }
              }
              blocks.push((precno, cblkno, data));
            }
          }
          let band = &mut comp.resolutions[resno].bands[bandno];
          for (precno, cblkno, data) in blocks {
            let prec = band.precincts.get_mut(&precno).expect("eagerly built");
            let cblk = &mut prec.cblks[cblkno];
            cblk.weight = weight;
            cblk.data = data;
          }
          for (_, prec) in band.precincts.iter_mut() {
            sched.for_each_mut(&mut prec.cblks, |_, cblk| {
              encode_block(cblk, is_ht, orient, cblk_sty)
            })?;
            for cblk in prec.cblks.iter() {
              tile_dist += cblk
                .passes
                .last()
                .map(|p| p.distortiondec * cblk.weight)
                .unwrap_or(0.0);
            }
          }
        }
      }
    }
    self.distortion = tile_dist;
    Ok(())
  }

  fn each_cblk_mut(&mut self, mut f: impl FnMut(&mut CblkEnc)) {
    for comp in self.comps.iter_mut() {
      for res in comp.resolutions.iter_mut() {
        for band in res.bands.iter_mut() {
          for (_, prec) in band.precincts.iter_mut() {
            for cblk in prec.cblks.iter_mut() {
              f(cblk);
            }
          }
        }
      }
    }
  }

  /// Distribute coding passes over quality layers: greedy inclusion by
  /// rate-distortion slope against a per-layer threshold found by
  /// bisection over the slope range.
  pub fn rate_allocate(&mut self, numlayers: u32, layer_budgets: &[Option<u64>]) {
    // slope range over all candidate passes
    let mut min_slope = f64::MAX;
    let mut max_slope = 0f64;
    self.each_cblk_mut(|cblk| {
      let mut prev_rate = 0u32;
      let mut prev_dist = 0f64;
      for p in cblk.passes.iter() {
        let dr = p.rate.saturating_sub(prev_rate) as f64;
        let dd = (p.distortiondec - prev_dist) * cblk.weight;
        if dr > 0.0 && dd > 0.0 {
          let s = dd / dr;
          min_slope = min_slope.min(s);
          max_slope = max_slope.max(s);
        }
        prev_rate = p.rate;
        prev_dist = p.distortiondec;
      }
    });

    for layno in 0..numlayers {
      let budget = layer_budgets.get(layno as usize).copied().flatten();
      let last = layno + 1 == numlayers;
      match budget {
        None => {
          self.make_layer(layno, 0.0, true, last);
        }
        Some(budget) => {
          let mut lo = min_slope.min(max_slope);
          let mut hi = max_slope.max(1.0);
          // when even the steepest threshold blows the budget, ship the
          // thinnest layer rather than an oversized one
          let mut good = hi;
          for _ in 0..48 {
            let th = (lo + hi) / 2.0;
            let bytes = self.make_layer(layno, th, false, last);
            if bytes > budget {
              lo = th;
            } else {
              good = th;
              hi = th;
            }
          }
          self.make_layer(layno, good, true, last);
        }
      }
    }
  }

  /// Select passes whose slope meets `threshold` into layer `layno`.
  /// Returns the body bytes the layer would add. `include_all` is forced
  /// by a zero threshold; the final layer always takes the remainder
  /// when no budget bound it.
  fn make_layer(&mut self, layno: u32, threshold: f64, final_: bool, _last: bool) -> u64 {
    let mut total = 0u64;
    self.each_cblk_mut(|cblk| {
      let first = cblk.numpassesinlayers;
      let mut n = first;
      let (mut last_rate, mut last_dist) = if first > 0 {
        let p = &cblk.passes[first as usize - 1];
        (p.rate, p.distortiondec)
      } else {
        (0, 0.0)
      };
      let (mut sel_rate, mut sel_dist) = (last_rate, last_dist);
      for (passno, p) in cblk.passes.iter().enumerate().skip(first as usize) {
        let dr = p.rate.saturating_sub(sel_rate) as f64;
        let dd = (p.distortiondec - sel_dist) * cblk.weight;
        if dr <= 0.0 {
          if dd > 0.0 {
            n = passno as u32 + 1;
            sel_rate = p.rate;
            sel_dist = p.distortiondec;
          }
          continue;
        }
        if threshold <= 0.0 || dd / dr >= threshold {
          n = passno as u32 + 1;
          sel_rate = p.rate;
          sel_dist = p.distortiondec;
        }
      }
      let start = last_rate;
      let len = if n > first {
        cblk.passes[n as usize - 1].rate - last_rate
      } else {
        0
      };
      total += len as u64;
      if final_ {
        while cblk.layers.len() <= layno as usize {
          cblk.layers.push(CblkLayer::default());
        }
        cblk.layers[layno as usize] = CblkLayer {
          numpasses: n - first,
          start,
          len,
        };
        cblk.numpassesinlayers = n;
      }
      let _ = last_dist;
    });
    total
  }

  /// Uncompressed size of the tile, the reference for ratio targets.
  pub fn uncompressed_size(&self, image: &Image) -> u64 {
    self
      .comps
      .iter()
      .zip(image.comps.iter())
      .map(|(c, ic)| c.rect.area() * ((ic.prec as u64 + 7) / 8))
      .sum()
  }
}

fn encode_block(cblk: &mut CblkEnc, is_ht: bool, orient: u32, cblk_sty: CblkStyle) -> Result<()> {
  let w = cblk.rect.width() as usize;
  let h = cblk.rect.height() as usize;
  if w == 0 || h == 0 || cblk.data.is_empty() {
    return Ok(());
  }
  if is_ht || cblk_sty.contains(CblkStyle::HT) {
    let r = ht::encode_cblk(&cblk.data, w, h);
    cblk.numbps = r.numbps;
    if r.numbps > 0 {
      cblk.passes = vec![t1::PassInfo {
        rate: r.stream.len() as u32,
        distortiondec: r.distortion,
        term: true,
      }];
    } else {
      cblk.passes = Vec::new();
    }
    cblk.stream = r.stream;
  } else {
    let r = t1::encode_cblk(&cblk.data, w, h, orient, cblk_sty);
    cblk.numbps = r.numbps;
    cblk.passes = r.passes;
    cblk.stream = r.stream;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::image::{ColorSpace, ImageComponentParams};

  fn gray_image(w: u32, h: u32) -> Image {
    let mut image = Image::new(
      Rect32::new(0, 0, w, h),
      ColorSpace::Gray,
      &[ImageComponentParams {
        dx: 1,
        dy: 1,
        prec: 8,
        ..Default::default()
      }],
    )
    .unwrap();
    image.update_component_bounds();
    image
  }

  fn basic_cp(w: u32, h: u32) -> CodingParams {
    CodingParams {
      tx0: 0,
      ty0: 0,
      tdx: w,
      tdy: h,
      tw: 1,
      th: 1,
      ..Default::default()
    }
  }

  #[test]
  fn band_rects_tile_the_resolution() {
    let tilec = Rect32::new(0, 0, 37, 29);
    let numres = 3;
    for resno in 1..numres {
      let cur = tilec.rectceildivpow2(numres - 1 - resno);
      let prev = tilec.rectceildivpow2(numres - resno);
      let hl = band_rect(tilec, numres, resno, 1);
      let lh = band_rect(tilec, numres, resno, 2);
      let hh = band_rect(tilec, numres, resno, 3);
      assert_eq!(prev.width() + hl.width(), cur.width());
      assert_eq!(prev.height() + lh.height(), cur.height());
      assert_eq!(hl.height(), prev.height());
      assert_eq!(lh.width(), prev.width());
      assert_eq!(hh.width(), hl.width());
      assert_eq!(hh.height(), lh.height());
    }
  }

  #[test]
  fn tile_structure_counts() {
    let image = gray_image(64, 64);
    let cp = basic_cp(64, 64);
    let mut tcp = Tcp::new(1);
    tcp.tccps[0].numresolutions = 3;
    tcp.tccps[0].cblkw = 4;
    tcp.tccps[0].cblkh = 4;
    let tile = build_tile_enc(&image, &cp, &tcp, 0).unwrap();
    let comp = &tile.comps[0];
    assert_eq!(comp.resolutions.len(), 3);
    assert_eq!(comp.resolutions[0].bands.len(), 1);
    assert_eq!(comp.resolutions[1].bands.len(), 3);
    // 64x64 tile, top resolution band 32x32, 16x16 nominal blocks
    let band = &comp.resolutions[2].bands[0];
    let prec = band.precincts.get(&0).unwrap();
    assert_eq!((prec.cw, prec.ch), (2, 2));
  }

  #[test]
  fn lazy_precinct_creation() {
    let image = gray_image(64, 64);
    let cp = basic_cp(64, 64);
    let mut tcp = Tcp::new(1);
    tcp.tccps[0].numresolutions = 2;
    let mut tile = build_tile_dec(&image, &cp, &tcp, 0, 0, None).unwrap();
    let band = &mut tile.comps[0].resolutions[0].bands[0];
    assert!(band.precincts.is_empty());
    band.precinct_entry(0, &|rect| CblkDec {
      rect,
      ..Default::default()
    });
    assert_eq!(band.precincts.len(), 1);
  }

  #[test]
  fn window_projection() {
    let image = gray_image(128, 128);
    let cp = basic_cp(128, 128);
    let mut tcp = Tcp::new(1);
    tcp.tccps[0].numresolutions = 3;
    let window = Rect32::new(32, 32, 64, 64);
    let tile = build_tile_dec(&image, &cp, &tcp, 0, 0, Some(window)).unwrap();
    let comp = &tile.comps[0];
    assert_eq!(comp.window, Some(window));
    let w0 = comp.res_window(0, 2).unwrap();
    // projected down two levels and padded by the filter support
    assert_eq!(w0, Rect32::new(6, 6, 18, 18));
  }
}
