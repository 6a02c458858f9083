/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2001-2003, David Janssens
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

//! Progression-order iterators over the (layer, resolution, component,
//! precinct) space, honouring POC partitions, subsampling and the tile
//! origin's precinct-grid alignment.

use std::collections::HashSet;

use crate::math::{uint64_ceildiv, uint64_ceildivpow2, uint64_floordivpow2, Rect32};
use crate::types::{Poc, ProgressionOrder, Tccp};

#[derive(Debug, Clone, Copy)]
pub(crate) struct PiResolution {
  /// log2 precinct dimensions at this resolution.
  pub pdx: u32,
  pub pdy: u32,
  /// Precinct grid dimensions.
  pub pw: u32,
  pub ph: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct PiComp {
  pub dx: u32,
  pub dy: u32,
  pub resolutions: Vec<PiResolution>,
}

impl PiComp {
  pub fn numresolutions(&self) -> u32 {
    self.resolutions.len() as u32
  }
}

/// Precinct grids for one component over a tile.
pub(crate) fn build_comp(tile: Rect32, dx: u32, dy: u32, tccp: &Tccp) -> PiComp {
  let numres = tccp.numresolutions;
  let mut resolutions = Vec::with_capacity(numres as usize);
  for resno in 0..numres {
    let level = numres - 1 - resno;
    let pdx = tccp.prcw_exp[resno as usize];
    let pdy = tccp.prch_exp[resno as usize];
    let trx0 = uint64_ceildiv(tile.x0 as u64, (dx as u64) << level);
    let trx1 = uint64_ceildiv(tile.x1 as u64, (dx as u64) << level);
    let try0 = uint64_ceildiv(tile.y0 as u64, (dy as u64) << level);
    let try1 = uint64_ceildiv(tile.y1 as u64, (dy as u64) << level);
    let pw = if trx0 == trx1 {
      0
    } else {
      (uint64_ceildivpow2(trx1, pdx) - uint64_floordivpow2(trx0, pdx)) as u32
    };
    let ph = if try0 == try1 {
      0
    } else {
      (uint64_ceildivpow2(try1, pdy) - uint64_floordivpow2(try0, pdy)) as u32
    };
    resolutions.push(PiResolution { pdx, pdy, pw, ph });
  }
  PiComp { dx, dy, resolutions }
}

/// One progression volume: a POC row, or the tile's default covering the
/// whole cube.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Progression {
  pub resno0: u32,
  pub resno1: u32,
  pub compno0: u32,
  pub compno1: u32,
  pub layno1: u32,
  pub prg: ProgressionOrder,
}

impl Progression {
  pub fn from_poc(poc: &Poc, numcomps: u32, maxres: u32, numlayers: u32) -> Self {
    Self {
      resno0: poc.resno0.min(maxres),
      resno1: poc.resno1.min(maxres),
      compno0: poc.compno0.min(numcomps),
      compno1: poc.compno1.min(numcomps),
      layno1: poc.layno1.min(numlayers),
      prg: poc.prg,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PiPacket {
  pub layno: u32,
  pub resno: u32,
  pub compno: u32,
  pub precno: u32,
}

/// Resumable iterator over packets; one instance per tile, spanning all
/// POC progressions with a shared inclusion set so the sub-cubes stay
/// disjoint.
pub(crate) struct PacketIter {
  comps: Vec<PiComp>,
  tile: Rect32,
  progressions: Vec<Progression>,
  prog_idx: usize,
  first: bool,
  // current position
  layno: u32,
  resno: u32,
  compno: u32,
  precno: u32,
  x: u64,
  y: u64,
  include: HashSet<u64>,
  maxres: u32,
  numcomps: u32,
  maxprec: u64,
}

impl PacketIter {
  pub fn new(
    tile: Rect32,
    comps: Vec<PiComp>,
    numlayers: u32,
    default_prg: ProgressionOrder,
    pocs: &[Poc],
  ) -> Self {
    let numcomps = comps.len() as u32;
    let maxres = comps.iter().map(|c| c.numresolutions()).max().unwrap_or(0);
    let maxprec = comps
      .iter()
      .flat_map(|c| c.resolutions.iter())
      .map(|r| r.pw as u64 * r.ph as u64)
      .max()
      .unwrap_or(0);
    let progressions = if pocs.is_empty() {
      vec![Progression {
        resno0: 0,
        resno1: maxres,
        compno0: 0,
        compno1: numcomps,
        layno1: numlayers,
        prg: default_prg,
      }]
    } else {
      pocs
        .iter()
        .map(|p| Progression::from_poc(p, numcomps, maxres, numlayers))
        .collect()
    };
    Self {
      comps,
      tile,
      progressions,
      prog_idx: 0,
      first: true,
      layno: 0,
      resno: 0,
      compno: 0,
      precno: 0,
      x: 0,
      y: 0,
      include: HashSet::new(),
      maxres,
      numcomps,
      maxprec: maxprec.max(1),
    }
  }

  pub fn progression_count(&self) -> usize {
    self.progressions.len()
  }

  /// Index of the progression the last yielded packet belongs to.
  pub fn current_progression(&self) -> usize {
    self.prog_idx
  }

  fn prog(&self) -> Progression {
    self.progressions[self.prog_idx]
  }

  fn num_precincts(&self, compno: u32, resno: u32) -> u32 {
    let comp = &self.comps[compno as usize];
    match comp.resolutions.get(resno as usize) {
      Some(r) => r.pw * r.ph,
      None => 0,
    }
  }

  fn mark_include(&mut self) -> bool {
    let key = ((self.layno as u64 * self.maxres as u64 + self.resno as u64)
      * self.numcomps as u64
      + self.compno as u64)
      * self.maxprec
      + self.precno as u64;
    self.include.insert(key)
  }

  /// Smallest canvas step covering every precinct grid; per component
  /// for CPRL, across every component otherwise.
  fn update_dxy(&self, only_comp: Option<u32>) -> (u64, u64) {
    let mut dx = 0u64;
    let mut dy = 0u64;
    for (compno, comp) in self.comps.iter().enumerate() {
      if let Some(c) = only_comp {
        if c as usize != compno {
          continue;
        }
      }
      let numres = comp.numresolutions();
      for (resno, res) in comp.resolutions.iter().enumerate() {
        let level = numres - 1 - resno as u32;
        let cdx = (comp.dx as u64) << (res.pdx + level);
        let cdy = (comp.dy as u64) << (res.pdy + level);
        dx = if dx == 0 { cdx } else { dx.min(cdx) };
        dy = if dy == 0 { cdy } else { dy.min(cdy) };
      }
    }
    (dx.max(1), dy.max(1))
  }

  /// Precinct-grid alignment of the current (x, y) for (compno, resno);
  /// yields the precinct index when the position starts a precinct.
  fn spatial_precno(&self) -> Option<u32> {
    let comp = &self.comps[self.compno as usize];
    let numres = comp.numresolutions();
    if self.resno >= numres {
      return None;
    }
    let res = &comp.resolutions[self.resno as usize];
    if res.pw == 0 || res.ph == 0 {
      return None;
    }
    let level = numres - 1 - self.resno;
    let dx = (comp.dx as u64) << level;
    let dy = (comp.dy as u64) << level;
    let trx0 = uint64_ceildiv(self.tile.x0 as u64, dx);
    let trx1 = uint64_ceildiv(self.tile.x1 as u64, dx);
    let try0 = uint64_ceildiv(self.tile.y0 as u64, dy);
    let try1 = uint64_ceildiv(self.tile.y1 as u64, dy);
    if trx0 == trx1 || try0 == try1 {
      return None;
    }
    // either the position lies on the canvas precinct grid, or it is the
    // tile origin and the resolution's origin is offset within its
    // precinct
    let ok_y = self.y % ((comp.dy as u64) << (res.pdy + level)) == 0
      || (self.y == self.tile.y0 as u64 && (try0 << level) % (1u64 << (res.pdy + level)) != 0);
    let ok_x = self.x % ((comp.dx as u64) << (res.pdx + level)) == 0
      || (self.x == self.tile.x0 as u64 && (trx0 << level) % (1u64 << (res.pdx + level)) != 0);
    if !ok_x || !ok_y {
      return None;
    }
    let prci =
      uint64_floordivpow2(uint64_ceildiv(self.x, dx), res.pdx) - uint64_floordivpow2(trx0, res.pdx);
    let prcj =
      uint64_floordivpow2(uint64_ceildiv(self.y, dy), res.pdy) - uint64_floordivpow2(try0, res.pdy);
    Some((prci + prcj * res.pw as u64) as u32)
  }

  pub fn next(&mut self) -> Option<PiPacket> {
    while self.prog_idx < self.progressions.len() {
      let got = match self.prog().prg {
        ProgressionOrder::Lrcp => self.next_lrcp(),
        ProgressionOrder::Rlcp => self.next_rlcp(),
        ProgressionOrder::Rpcl => self.next_spatial(ProgressionOrder::Rpcl),
        ProgressionOrder::Pcrl => self.next_spatial(ProgressionOrder::Pcrl),
        ProgressionOrder::Cprl => self.next_spatial(ProgressionOrder::Cprl),
      };
      match got {
        Some(pkt) => return Some(pkt),
        None => {
          self.prog_idx += 1;
          self.first = true;
        }
      }
    }
    None
  }

  fn next_lrcp(&mut self) -> Option<PiPacket> {
    let prog = self.prog();
    loop {
      if self.first {
        self.first = false;
        self.layno = 0;
        self.resno = prog.resno0;
        self.compno = prog.compno0;
        self.precno = 0;
      } else {
        self.precno += 1;
      }
      loop {
        if self.resno < self.comps.get(self.compno as usize).map(|c| c.numresolutions()).unwrap_or(0)
          && self.precno < self.num_precincts(self.compno, self.resno)
        {
          break;
        }
        self.precno = 0;
        self.compno += 1;
        if self.compno < prog.compno1 {
          continue;
        }
        self.compno = prog.compno0;
        self.resno += 1;
        if self.resno < prog.resno1 {
          continue;
        }
        self.resno = prog.resno0;
        self.layno += 1;
        if self.layno < prog.layno1 {
          continue;
        }
        return None;
      }
      if self.mark_include() {
        return Some(PiPacket {
          layno: self.layno,
          resno: self.resno,
          compno: self.compno,
          precno: self.precno,
        });
      }
    }
  }

  fn next_rlcp(&mut self) -> Option<PiPacket> {
    let prog = self.prog();
    loop {
      if self.first {
        self.first = false;
        self.resno = prog.resno0;
        self.layno = 0;
        self.compno = prog.compno0;
        self.precno = 0;
      } else {
        self.precno += 1;
      }
      loop {
        if self.resno < self.comps.get(self.compno as usize).map(|c| c.numresolutions()).unwrap_or(0)
          && self.precno < self.num_precincts(self.compno, self.resno)
        {
          break;
        }
        self.precno = 0;
        self.compno += 1;
        if self.compno < prog.compno1 {
          continue;
        }
        self.compno = prog.compno0;
        self.layno += 1;
        if self.layno < prog.layno1 {
          continue;
        }
        self.layno = 0;
        self.resno += 1;
        if self.resno < prog.resno1 {
          continue;
        }
        return None;
      }
      if self.mark_include() {
        return Some(PiPacket {
          layno: self.layno,
          resno: self.resno,
          compno: self.compno,
          precno: self.precno,
        });
      }
    }
  }

  /// The three position-driven orders share one odometer; only the axis
  /// nesting differs.
  fn next_spatial(&mut self, order: ProgressionOrder) -> Option<PiPacket> {
    let prog = self.prog();
    loop {
      if self.first {
        self.first = false;
        self.layno = 0;
        self.resno = prog.resno0;
        self.compno = prog.compno0;
        self.x = self.tile.x0 as u64;
        self.y = self.tile.y0 as u64;
      } else {
        self.layno += 1;
      }
      // cascade: layer is always innermost, then the order-specific axes
      'cascade: loop {
        if self.layno < prog.layno1 {
          break 'cascade;
        }
        self.layno = 0;
        match order {
          ProgressionOrder::Rpcl => {
            // R / y / x / C / L
            self.compno += 1;
            if self.compno < prog.compno1 {
              continue 'cascade;
            }
            self.compno = prog.compno0;
            let (dx, _) = self.update_dxy(None);
            self.x += dx - (self.x % dx);
            if self.x < self.tile.x1 as u64 {
              continue 'cascade;
            }
            self.x = self.tile.x0 as u64;
            let (_, dy) = self.update_dxy(None);
            self.y += dy - (self.y % dy);
            if self.y < self.tile.y1 as u64 {
              continue 'cascade;
            }
            self.y = self.tile.y0 as u64;
            self.resno += 1;
            if self.resno < prog.resno1 {
              continue 'cascade;
            }
            return None;
          }
          ProgressionOrder::Pcrl => {
            // y / x / C / R / L
            self.resno += 1;
            if self.resno < prog.resno1 {
              continue 'cascade;
            }
            self.resno = prog.resno0;
            self.compno += 1;
            if self.compno < prog.compno1 {
              continue 'cascade;
            }
            self.compno = prog.compno0;
            let (dx, _) = self.update_dxy(None);
            self.x += dx - (self.x % dx);
            if self.x < self.tile.x1 as u64 {
              continue 'cascade;
            }
            self.x = self.tile.x0 as u64;
            let (_, dy) = self.update_dxy(None);
            self.y += dy - (self.y % dy);
            if self.y < self.tile.y1 as u64 {
              continue 'cascade;
            }
            return None;
          }
          _ => {
            // CPRL: C / y / x / R / L
            self.resno += 1;
            if self.resno < prog.resno1 {
              continue 'cascade;
            }
            self.resno = prog.resno0;
            let (dx, _) = self.update_dxy(Some(self.compno));
            self.x += dx - (self.x % dx);
            if self.x < self.tile.x1 as u64 {
              continue 'cascade;
            }
            self.x = self.tile.x0 as u64;
            let (_, dy) = self.update_dxy(Some(self.compno));
            self.y += dy - (self.y % dy);
            if self.y < self.tile.y1 as u64 {
              continue 'cascade;
            }
            self.y = self.tile.y0 as u64;
            self.compno += 1;
            if self.compno < prog.compno1 {
              continue 'cascade;
            }
            return None;
          }
        }
      }
      if let Some(precno) = self.spatial_precno() {
        self.precno = precno;
        if self.mark_include() {
          return Some(PiPacket {
            layno: self.layno,
            resno: self.resno,
            compno: self.compno,
            precno: self.precno,
          });
        }
      } else {
        // nothing at this position for any layer: skip the layer axis
        self.layno = prog.layno1 - 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn simple_comps(numcomps: usize, numres: u32, tile: Rect32, prc_exp: u32) -> Vec<PiComp> {
    let mut tccp = Tccp::default();
    tccp.numresolutions = numres;
    for e in tccp.prcw_exp.iter_mut() {
      *e = prc_exp;
    }
    for e in tccp.prch_exp.iter_mut() {
      *e = prc_exp;
    }
    (0..numcomps).map(|_| build_comp(tile, 1, 1, &tccp)).collect()
  }

  fn collect(pi: &mut PacketIter) -> Vec<PiPacket> {
    let mut v = Vec::new();
    while let Some(p) = pi.next() {
      v.push(p);
    }
    v
  }

  /// Scenario from the tile-processor contract: 2 layers, 3 resolutions,
  /// 2 components, precinct counts 1/4/16 per resolution.
  #[test]
  fn lrcp_packet_order_and_count() {
    let tile = Rect32::new(0, 0, 256, 256);
    // resolutions are 64/128/256 wide; a 2^5 precinct at the top level
    // gives 16/16... choose exps so counts are 1, 4, 16
    let mut tccp = Tccp::default();
    tccp.numresolutions = 3;
    tccp.prcw_exp = [6; crate::consts::MAX_RESOLUTIONS];
    tccp.prch_exp = [6; crate::consts::MAX_RESOLUTIONS];
    let comps: Vec<PiComp> = (0..2).map(|_| build_comp(tile, 1, 1, &tccp)).collect();
    assert_eq!(comps[0].resolutions[0].pw, 1);
    assert_eq!(comps[0].resolutions[1].pw, 2);
    assert_eq!(comps[0].resolutions[2].pw, 4);

    let mut pi = PacketIter::new(tile, comps, 2, ProgressionOrder::Lrcp, &[]);
    let pkts = collect(&mut pi);
    assert_eq!(pkts.len(), 2 * (1 + 4 + 16) * 2);

    // first packets follow layer 0, res 0, comps, then res 1
    assert_eq!(pkts[0], PiPacket { layno: 0, resno: 0, compno: 0, precno: 0 });
    assert_eq!(pkts[1], PiPacket { layno: 0, resno: 0, compno: 1, precno: 0 });
    assert_eq!(pkts[2], PiPacket { layno: 0, resno: 1, compno: 0, precno: 0 });
    // second half starts layer 1
    assert_eq!(pkts[42].layno, 1);
  }

  #[test]
  fn every_order_visits_every_tuple_once() {
    let tile = Rect32::new(0, 0, 128, 96);
    let comps = simple_comps(3, 3, tile, 5);
    let expected: usize = {
      let per_comp: u32 = comps[0]
        .resolutions
        .iter()
        .map(|r| r.pw * r.ph)
        .sum();
      (per_comp * 3 * 2) as usize
    };
    for order in [
      ProgressionOrder::Lrcp,
      ProgressionOrder::Rlcp,
      ProgressionOrder::Rpcl,
      ProgressionOrder::Pcrl,
      ProgressionOrder::Cprl,
    ]
    .iter()
    {
      let mut pi = PacketIter::new(tile, comps.clone(), 2, *order, &[]);
      let pkts = collect(&mut pi);
      assert_eq!(pkts.len(), expected, "{:?}", order);
      let unique: HashSet<_> = pkts
        .iter()
        .map(|p| (p.layno, p.resno, p.compno, p.precno))
        .collect();
      assert_eq!(unique.len(), expected, "{:?}", order);
    }
  }

  #[test]
  fn poc_partitions_cover_the_cube_disjointly() {
    let tile = Rect32::new(0, 0, 64, 64);
    let comps = simple_comps(2, 2, tile, 5);
    let pocs = [
      Poc {
        resno0: 0,
        compno0: 0,
        layno1: 1,
        resno1: 1,
        compno1: 2,
        prg: ProgressionOrder::Lrcp,
      },
      Poc {
        resno0: 1,
        compno0: 0,
        layno1: 1,
        resno1: 2,
        compno1: 2,
        prg: ProgressionOrder::Rlcp,
      },
      Poc {
        resno0: 0,
        compno0: 0,
        layno1: 1,
        resno1: 2,
        compno1: 2,
        prg: ProgressionOrder::Lrcp,
      },
    ];
    let mut pi = PacketIter::new(tile, comps.clone(), 1, ProgressionOrder::Lrcp, &pocs);
    let pkts = collect(&mut pi);
    let per_comp: u32 = comps[0].resolutions.iter().map(|r| r.pw * r.ph).sum();
    assert_eq!(pkts.len(), (per_comp * 2) as usize);
    let unique: HashSet<_> = pkts
      .iter()
      .map(|p| (p.layno, p.resno, p.compno, p.precno))
      .collect();
    assert_eq!(unique.len(), pkts.len());
  }

  #[test]
  fn subsampled_component_alignment() {
    let tile = Rect32::new(0, 0, 100, 60);
    let mut tccp = Tccp::default();
    tccp.numresolutions = 2;
    tccp.prcw_exp = [4; crate::consts::MAX_RESOLUTIONS];
    tccp.prch_exp = [4; crate::consts::MAX_RESOLUTIONS];
    let comps = vec![
      build_comp(tile, 1, 1, &tccp),
      build_comp(tile, 2, 2, &tccp),
      build_comp(tile, 2, 2, &tccp),
    ];
    let expected: usize = comps
      .iter()
      .map(|c| c.resolutions.iter().map(|r| (r.pw * r.ph) as usize).sum::<usize>())
      .sum();
    for order in [ProgressionOrder::Rpcl, ProgressionOrder::Pcrl, ProgressionOrder::Cprl].iter() {
      let mut pi = PacketIter::new(tile, comps.clone(), 1, *order, &[]);
      let pkts = collect(&mut pi);
      assert_eq!(pkts.len(), expected, "{:?}", order);
    }
  }

  #[test]
  fn odd_tile_origin_alignment() {
    let tile = Rect32::new(13, 9, 77, 55);
    let comps = simple_comps(1, 3, tile, 3);
    let expected: usize = comps[0]
      .resolutions
      .iter()
      .map(|r| (r.pw * r.ph) as usize)
      .sum();
    for order in [ProgressionOrder::Rpcl, ProgressionOrder::Cprl].iter() {
      let mut pi = PacketIter::new(tile, comps.clone(), 1, *order, &[]);
      let pkts = collect(&mut pi);
      assert_eq!(pkts.len(), expected, "{:?}", order);
    }
  }
}
