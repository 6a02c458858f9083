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

//! Code-stream state machine: main-header and tile-part marker parsing,
//! marker emission, and the drive loop around the tile processor.

use std::collections::VecDeque;

use crate::cio::BufferedStream;
use crate::consts::*;
use crate::error::{Error, Result};
use crate::event::*;
use crate::image::{ColorSpace, Image, ImageComponentParams};
use crate::math::{uint_ceildiv, Rect32};
use crate::quantizer;
use crate::scheduler::Scheduler;
use crate::t2;
use crate::tcd;
use crate::types::*;

bitflags! {
  /// Decoder states; a marker is only legal in some of them.
  pub(crate) struct J2KState: u32 {
    const NONE = 0x0000;
    /// Expecting the SOC marker.
    const MHSOC = 0x0001;
    /// Expecting the SIZ marker.
    const MHSIZ = 0x0002;
    /// Inside the main header.
    const MH = 0x0004;
    /// Expecting a SOT (or EOC).
    const TPHSOT = 0x0008;
    /// Inside a tile-part header.
    const TPH = 0x0010;
    /// Past the EOC.
    const MT = 0x0020;
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum J2KMarker {
  SOC,
  SOT,
  SOD,
  EOC,
  CAP,
  SIZ,
  COD,
  COC,
  CPF,
  RGN,
  QCD,
  QCC,
  POC,
  TLM,
  PLM,
  PLT,
  PPM,
  PPT,
  SOP,
  EPH,
  CRG,
  COM,
  MCT,
  MCC,
  MCO,
  CBD,
  UNK(u16),
}

impl From<u16> for J2KMarker {
  fn from(num: u16) -> Self {
    match num {
      0xff4f => Self::SOC,
      0xff90 => Self::SOT,
      0xff93 => Self::SOD,
      0xffd9 => Self::EOC,
      0xff50 => Self::CAP,
      0xff51 => Self::SIZ,
      0xff52 => Self::COD,
      0xff53 => Self::COC,
      0xff59 => Self::CPF,
      0xff5e => Self::RGN,
      0xff5c => Self::QCD,
      0xff5d => Self::QCC,
      0xff5f => Self::POC,
      0xff55 => Self::TLM,
      0xff57 => Self::PLM,
      0xff58 => Self::PLT,
      0xff60 => Self::PPM,
      0xff61 => Self::PPT,
      0xff91 => Self::SOP,
      0xff92 => Self::EPH,
      0xff63 => Self::CRG,
      0xff64 => Self::COM,
      0xff74 => Self::MCT,
      0xff75 => Self::MCC,
      0xff77 => Self::MCO,
      0xff78 => Self::CBD,
      num => Self::UNK(num),
    }
  }
}

impl J2KMarker {
  pub fn as_u16(&self) -> u16 {
    match self {
      Self::SOC => 0xff4f,
      Self::SOT => 0xff90,
      Self::SOD => 0xff93,
      Self::EOC => 0xffd9,
      Self::CAP => 0xff50,
      Self::SIZ => 0xff51,
      Self::COD => 0xff52,
      Self::COC => 0xff53,
      Self::CPF => 0xff59,
      Self::RGN => 0xff5e,
      Self::QCD => 0xff5c,
      Self::QCC => 0xff5d,
      Self::POC => 0xff5f,
      Self::TLM => 0xff55,
      Self::PLM => 0xff57,
      Self::PLT => 0xff58,
      Self::PPM => 0xff60,
      Self::PPT => 0xff61,
      Self::SOP => 0xff91,
      Self::EPH => 0xff92,
      Self::CRG => 0xff63,
      Self::COM => 0xff64,
      Self::MCT => 0xff74,
      Self::MCC => 0xff75,
      Self::MCO => 0xff77,
      Self::CBD => 0xff78,
      Self::UNK(num) => *num,
    }
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, Self::UNK(_))
  }

  /// A delimiting marker carries no length field.
  pub fn is_delimiter(&self) -> bool {
    matches!(self, Self::SOC | Self::SOD | Self::EOC | Self::SOP | Self::EPH)
  }

  /// States in which this marker may legally appear.
  pub fn states(&self) -> J2KState {
    match self {
      Self::SOC => J2KState::MHSOC,
      Self::SIZ => J2KState::MHSIZ,
      Self::SOT => J2KState::TPHSOT,
      Self::SOD => J2KState::TPH,
      Self::EOC => J2KState::TPHSOT,
      Self::CAP | Self::CPF | Self::TLM | Self::PLM | Self::PPM | Self::CRG | Self::CBD => {
        J2KState::MH
      }
      Self::PLT | Self::PPT => J2KState::TPH,
      Self::COD | Self::COC | Self::QCD | Self::QCC | Self::RGN | Self::POC | Self::COM
      | Self::MCT | Self::MCC | Self::MCO => J2KState::MH | J2KState::TPH,
      Self::SOP | Self::EPH => J2KState::NONE,
      Self::UNK(_) => J2KState::MH | J2KState::TPH,
    }
  }
}

/// Per-tile bits gathered while scanning the code-stream.
#[derive(Debug, Default)]
struct TileBits {
  body: Vec<u8>,
  /// Packed packet headers accumulated from PPM entries.
  ppm_header: Vec<u8>,
  plt_markers: Vec<(u8, Vec<u8>)>,
  parts_read: u32,
  seen: bool,
}

impl TileBits {
  fn plt_lengths(&mut self, mgr: &mut EventManager) -> Vec<u32> {
    if self.plt_markers.is_empty() {
      return Vec::new();
    }
    self.plt_markers.sort_by_key(|(z, _)| *z);
    let mut lengths = Vec::new();
    let mut acc = 0u32;
    let mut pending = false;
    for (_, data) in &self.plt_markers {
      for &b in data {
        acc = (acc << 7) | (b & 0x7f) as u32;
        pending = true;
        if b & 0x80 == 0 {
          lengths.push(acc);
          acc = 0;
          pending = false;
        }
      }
    }
    if pending {
      event_msg!(mgr, EVT_WARNING, "PLT ends inside a length field");
    }
    lengths
  }
}

/// Code-stream decoder.
pub(crate) struct CodeStreamDecoder {
  pub cp: CodingParams,
  pub image: Image,
  state: J2KState,
  default_tcp: Tcp,
  tiles: Vec<TileBits>,
  /// TLM entries: (tile index or sequential, tile-part length).
  tlm: Vec<(Option<u32>, u32)>,
  cap_seen: bool,
  cod_seen: bool,
  qcd_seen: bool,
  /// Tile whose tile-part header is being parsed.
  cur_tileno: u32,
  /// End position of the current tile-part, from Psot.
  cur_part_end: Option<u64>,
  cur_sot_start: u64,
  numcomps: u32,
}

impl CodeStreamDecoder {
  pub fn new() -> Self {
    Self {
      cp: CodingParams::default(),
      image: Image::default(),
      state: J2KState::MHSOC,
      default_tcp: Tcp::default(),
      tiles: Vec::new(),
      tlm: Vec::new(),
      cap_seen: false,
      cod_seen: false,
      qcd_seen: false,
      cur_tileno: 0,
      cur_part_end: None,
      cur_sot_start: 0,
      numcomps: 0,
    }
  }

  /// Parse the main header: SOC SIZ ... up to (not including) the first
  /// tile-part.
  pub fn read_header(&mut self, stream: &mut BufferedStream, mgr: &mut EventManager) -> Result<()> {
    let soc = stream.read_u16()?;
    if J2KMarker::from(soc) != J2KMarker::SOC {
      event_msg!(mgr, EVT_ERROR, "expected SOC, found 0x{:04x}", soc);
      return Err(Error::BadMarker(soc as u32));
    }
    self.state = J2KState::MHSIZ;
    loop {
      let id = stream.read_u16()?;
      let marker = J2KMarker::from(id);
      if marker == J2KMarker::SOT {
        if !self.state.contains(J2KState::MH) {
          return Err(Error::BadMarker(id as u32));
        }
        self.finish_main_header(mgr)?;
        self.state = J2KState::TPHSOT;
        // rewind so the tile loop sees the SOT again
        stream.skip(-2)?;
        return Ok(());
      }
      if marker == J2KMarker::EOC {
        return Err(Error::BadMarker(id as u32));
      }
      if marker.is_delimiter() {
        return Err(Error::BadMarker(id as u32));
      }
      let len = stream.read_u16()?;
      if len < 2 {
        return Err(Error::BadMarker(id as u32));
      }
      let data = stream.read_vec(len as usize - 2)?;
      if marker.is_unknown() {
        event_msg!(mgr, EVT_WARNING, "unknown marker 0x{:04x} skipped", id);
        continue;
      }
      if !marker.states().intersects(self.state) {
        event_msg!(mgr, EVT_ERROR, "marker 0x{:04x} out of place", id);
        return Err(Error::BadMarker(id as u32));
      }
      self.dispatch_main(marker, &data, mgr)?;
    }
  }

  fn dispatch_main(&mut self, marker: J2KMarker, data: &[u8], mgr: &mut EventManager) -> Result<()> {
    match marker {
      J2KMarker::SIZ => self.read_siz(data, mgr),
      J2KMarker::CAP => self.read_cap(data, mgr),
      J2KMarker::COD => self.read_cod(data, None, mgr),
      J2KMarker::COC => self.read_coc(data, None, mgr),
      J2KMarker::QCD => self.read_qcd(data, None, mgr),
      J2KMarker::QCC => self.read_qcc(data, None, mgr),
      J2KMarker::RGN => self.read_rgn(data, None, mgr),
      J2KMarker::POC => self.read_poc(data, None, mgr),
      J2KMarker::TLM => self.read_tlm(data, mgr),
      J2KMarker::PLM | J2KMarker::CRG | J2KMarker::CPF | J2KMarker::MCC | J2KMarker::MCO
      | J2KMarker::CBD => {
        event_msg!(mgr, EVT_INFO, "marker 0x{:04x} noted and skipped", marker.as_u16());
        Ok(())
      }
      J2KMarker::MCT => self.read_mct(data, None, mgr),
      J2KMarker::PPM => self.read_ppm(data, mgr),
      J2KMarker::COM => {
        if data.len() >= 2 {
          let text = String::from_utf8_lossy(&data[2..]);
          event_msg!(mgr, EVT_INFO, "comment: {}", text);
        }
        Ok(())
      }
      _ => Err(Error::BadMarker(marker.as_u16() as u32)),
    }
  }

  fn finish_main_header(&mut self, mgr: &mut EventManager) -> Result<()> {
    if !self.cod_seen || !self.qcd_seen {
      event_msg!(mgr, EVT_ERROR, "main header lacks COD or QCD");
      return Err(Error::BadMarker(0xff52));
    }
    if self.default_tcp.is_ht && !self.cap_seen {
      event_msg!(mgr, EVT_ERROR, "HT code-blocks signalled without a CAP marker");
      return Err(Error::UnsupportedProfile("HT without CAP"));
    }
    // split the packed packet headers into per-SOD entries
    if self.cp.ppm {
      let mut markers = std::mem::take(&mut self.cp.ppm_markers);
      markers.sort_by_key(|(z, _)| *z);
      let mut merged = Vec::new();
      for (_, d) in markers {
        merged.extend_from_slice(&d);
      }
      let mut entries = VecDeque::new();
      let mut pos = 0usize;
      while pos + 4 <= merged.len() {
        let n = u32::from_be_bytes([
          merged[pos],
          merged[pos + 1],
          merged[pos + 2],
          merged[pos + 3],
        ]) as usize;
        pos += 4;
        let end = (pos + n).min(merged.len());
        entries.push_back(merged[pos..end].to_vec());
        pos = end;
      }
      self.cp.ppm_entries = entries;
    }
    Ok(())
  }

  fn read_siz(&mut self, data: &[u8], mgr: &mut EventManager) -> Result<()> {
    if data.len() < 36 {
      return Err(Error::BadMarker(0xff51));
    }
    let rd16 = |o: usize| u16::from_be_bytes([data[o], data[o + 1]]);
    let rd32 = |o: usize| u32::from_be_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);
    self.cp.rsiz = rd16(0);
    let x1 = rd32(2);
    let y1 = rd32(6);
    let x0 = rd32(10);
    let y0 = rd32(14);
    let tdx = rd32(18);
    let tdy = rd32(22);
    let tx0 = rd32(26);
    let ty0 = rd32(30);
    let numcomps = rd16(34) as u32;
    if numcomps == 0 || numcomps > MAX_COMPONENTS {
      event_msg!(mgr, EVT_ERROR, "SIZ: invalid component count {}", numcomps);
      return Err(Error::InvalidParameter("Csiz out of range"));
    }
    if x1 <= x0 || y1 <= y0 || tdx == 0 || tdy == 0 || tx0 > x0 || ty0 > y0 {
      return Err(Error::InvalidParameter("SIZ geometry"));
    }
    if data.len() < 36 + 3 * numcomps as usize {
      return Err(Error::BadMarker(0xff51));
    }
    let mut params = Vec::with_capacity(numcomps as usize);
    for c in 0..numcomps as usize {
      let ssiz = data[36 + 3 * c];
      let dx = data[37 + 3 * c] as u32;
      let dy = data[38 + 3 * c] as u32;
      let prec = (ssiz & 0x7f) as u32 + 1;
      if prec > MAX_PRECISION || dx == 0 || dx > 255 || dy == 0 || dy > 255 {
        event_msg!(mgr, EVT_ERROR, "SIZ: component {} out of range", c);
        return Err(Error::InvalidParameter("Ssiz/XRsiz/YRsiz"));
      }
      params.push(ImageComponentParams {
        dx,
        dy,
        prec,
        sgnd: ssiz & 0x80 != 0,
        ..Default::default()
      });
    }
    self.image = Image::new(Rect32::new(x0, y0, x1, y1), ColorSpace::Unknown, &params)?;
    self.image.update_component_bounds();
    self.numcomps = numcomps;
    self.cp.tx0 = tx0;
    self.cp.ty0 = ty0;
    self.cp.tdx = tdx;
    self.cp.tdy = tdy;
    self.cp.tw = uint_ceildiv(x1 - tx0, tdx);
    self.cp.th = uint_ceildiv(y1 - ty0, tdy);
    if self.cp.tw * self.cp.th > MAX_NUM_TILES {
      return Err(Error::InvalidParameter("tile grid too large"));
    }
    self.default_tcp = Tcp::new(numcomps as usize);
    for (tccp, comp) in self.default_tcp.tccps.iter_mut().zip(self.image.comps.iter()) {
      tccp.dc_level_shift = if comp.sgnd { 0 } else { 1 << (comp.prec - 1) };
    }
    self.cp.tcps = Vec::new();
    self.tiles = (0..self.cp.tw * self.cp.th).map(|_| TileBits::default()).collect();
    self.state = J2KState::MH;
    event_msg!(
      mgr,
      EVT_INFO,
      "image {}x{}, {} components, {}x{} tiles",
      x1 - x0,
      y1 - y0,
      numcomps,
      self.cp.tw,
      self.cp.th
    );
    Ok(())
  }

  fn read_cap(&mut self, data: &[u8], mgr: &mut EventManager) -> Result<()> {
    if data.len() < 4 {
      return Err(Error::BadMarker(0xff50));
    }
    let pcap = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let count = pcap.count_ones() as usize;
    if data.len() < 4 + 2 * count {
      return Err(Error::BadMarker(0xff50));
    }
    if pcap & PCAP_HT_BIT != 0 {
      let ccap0 = u16::from_be_bytes([data[4], data[5]]);
      event_msg!(mgr, EVT_INFO, "HTJ2K capability, Bp = {}", ccap0 & 0x1f);
    }
    self.cap_seen = true;
    Ok(())
  }

  fn tcp_for(&mut self, tileno: Option<u32>) -> &mut Tcp {
    match tileno {
      None => &mut self.default_tcp,
      Some(t) => &mut self.cp.tcps[t as usize],
    }
  }

  fn read_cod(&mut self, data: &[u8], tileno: Option<u32>, mgr: &mut EventManager) -> Result<()> {
    if tileno.is_none() {
      if self.cod_seen {
        event_msg!(mgr, EVT_ERROR, "COD appears twice in the main header");
        return Err(Error::BadMarker(0xff52));
      }
      self.cod_seen = true;
    }
    if data.len() < 10 {
      return Err(Error::BadMarker(0xff52));
    }
    let scod = data[0];
    let prg = ProgressionOrder::from_u8(data[1]).ok_or(Error::BadMarker(0xff52))?;
    let numlayers = u16::from_be_bytes([data[2], data[3]]) as u32;
    let mct_byte = data[4];
    let numres = data[5] as u32 + 1;
    let cblkw = data[6] as u32 + 2;
    let cblkh = data[7] as u32 + 2;
    let cblk_sty = CblkStyle::from_bits_truncate(data[8]);
    let qmfbid = data[9] as u32;
    if numres > MAX_RESOLUTIONS as u32
      || cblkw < CBLK_EXP_MIN
      || cblkw > CBLK_EXP_MAX
      || cblkh < CBLK_EXP_MIN
      || cblkh > CBLK_EXP_MAX
      || cblkw + cblkh > CBLK_EXP_SUM_MAX
      || numlayers == 0
      || qmfbid > 1
    {
      event_msg!(mgr, EVT_ERROR, "COD parameters out of range");
      return Err(Error::BadMarker(0xff52));
    }
    let mut prcw = [DEFAULT_PRECINCT_EXP; MAX_RESOLUTIONS];
    let mut prch = [DEFAULT_PRECINCT_EXP; MAX_RESOLUTIONS];
    if scod & CSTY_PRECINCTS != 0 {
      if data.len() < 10 + numres as usize {
        return Err(Error::BadMarker(0xff52));
      }
      for r in 0..numres as usize {
        let b = data[10 + r];
        prcw[r] = (b & 0x0f) as u32;
        prch[r] = (b >> 4) as u32;
      }
    }
    let is_ht = cblk_sty.contains(CblkStyle::HT);
    let tcp = self.tcp_for(tileno);
    tcp.csty = scod;
    tcp.prg = prg;
    tcp.numlayers = numlayers;
    tcp.mct = match mct_byte {
      0 => MctMode::None,
      1 => MctMode::Array,
      _ => MctMode::Custom,
    };
    tcp.is_ht = is_ht;
    tcp.cod_seen = true;
    for tccp in tcp.tccps.iter_mut() {
      tccp.csty = scod & CSTY_PRECINCTS;
      tccp.numresolutions = numres;
      tccp.cblkw = cblkw;
      tccp.cblkh = cblkh;
      tccp.cblk_sty = cblk_sty;
      tccp.qmfbid = qmfbid;
      tccp.prcw_exp = prcw;
      tccp.prch_exp = prch;
    }
    Ok(())
  }

  fn comp_index(&self, data: &[u8]) -> Result<(usize, usize)> {
    // (component, bytes consumed): one byte below 257 components
    if self.numcomps < 257 {
      if data.is_empty() {
        return Err(Error::BadMarker(0xff53));
      }
      Ok((data[0] as usize, 1))
    } else {
      if data.len() < 2 {
        return Err(Error::BadMarker(0xff53));
      }
      Ok((u16::from_be_bytes([data[0], data[1]]) as usize, 2))
    }
  }

  fn read_coc(&mut self, data: &[u8], tileno: Option<u32>, mgr: &mut EventManager) -> Result<()> {
    let (compno, used) = self.comp_index(data)?;
    if compno >= self.numcomps as usize {
      return Err(Error::BadMarker(0xff53));
    }
    let data = &data[used..];
    if data.len() < 6 {
      return Err(Error::BadMarker(0xff53));
    }
    let scoc = data[0];
    let numres = data[1] as u32 + 1;
    let cblkw = data[2] as u32 + 2;
    let cblkh = data[3] as u32 + 2;
    let cblk_sty = CblkStyle::from_bits_truncate(data[4]);
    let qmfbid = data[5] as u32;
    if numres > MAX_RESOLUTIONS as u32 || cblkw + cblkh > CBLK_EXP_SUM_MAX || qmfbid > 1 {
      event_msg!(mgr, EVT_ERROR, "COC parameters out of range");
      return Err(Error::BadMarker(0xff53));
    }
    let mut prcw = [DEFAULT_PRECINCT_EXP; MAX_RESOLUTIONS];
    let mut prch = [DEFAULT_PRECINCT_EXP; MAX_RESOLUTIONS];
    if scoc & CSTY_PRECINCTS != 0 {
      if data.len() < 6 + numres as usize {
        return Err(Error::BadMarker(0xff53));
      }
      for r in 0..numres as usize {
        let b = data[6 + r];
        prcw[r] = (b & 0x0f) as u32;
        prch[r] = (b >> 4) as u32;
      }
    }
    let tcp = self.tcp_for(tileno);
    let tccp = &mut tcp.tccps[compno];
    tccp.csty = scoc & CSTY_PRECINCTS;
    tccp.numresolutions = numres;
    tccp.cblkw = cblkw;
    tccp.cblkh = cblkh;
    tccp.cblk_sty = cblk_sty;
    tccp.qmfbid = qmfbid;
    tccp.prcw_exp = prcw;
    tccp.prch_exp = prch;
    Ok(())
  }

  fn read_qcd(&mut self, data: &[u8], tileno: Option<u32>, mgr: &mut EventManager) -> Result<()> {
    if tileno.is_none() {
      if self.qcd_seen {
        event_msg!(mgr, EVT_ERROR, "QCD appears twice in the main header");
        return Err(Error::BadMarker(0xff5c));
      }
      self.qcd_seen = true;
    }
    let tcp = self.tcp_for(tileno);
    let mut model = tcp.tccps[0].clone();
    quantizer::read_sqcd(&mut model, data)?;
    for tccp in tcp.tccps.iter_mut() {
      tccp.qntsty = model.qntsty;
      tccp.numgbits = model.numgbits;
      tccp.stepsizes = model.stepsizes;
    }
    tcp.qcd_seen = true;
    Ok(())
  }

  fn read_qcc(&mut self, data: &[u8], tileno: Option<u32>, _mgr: &mut EventManager) -> Result<()> {
    let (compno, used) = self.comp_index(data)?;
    if compno >= self.numcomps as usize {
      return Err(Error::BadMarker(0xff5d));
    }
    let tcp = self.tcp_for(tileno);
    quantizer::read_sqcd(&mut tcp.tccps[compno], &data[used..])?;
    Ok(())
  }

  fn read_rgn(&mut self, data: &[u8], tileno: Option<u32>, _mgr: &mut EventManager) -> Result<()> {
    let (compno, used) = self.comp_index(data)?;
    if compno >= self.numcomps as usize {
      return Err(Error::BadMarker(0xff5e));
    }
    let data = &data[used..];
    if data.len() < 2 {
      return Err(Error::BadMarker(0xff5e));
    }
    // Srgn 0 is the only defined style (implicit / maxshift)
    let roishift = data[1] as i32;
    let tcp = self.tcp_for(tileno);
    tcp.tccps[compno].roishift = roishift;
    Ok(())
  }

  fn read_poc(&mut self, data: &[u8], tileno: Option<u32>, _mgr: &mut EventManager) -> Result<()> {
    let comp_bytes = if self.numcomps < 257 { 1 } else { 2 };
    let entry = 1 + comp_bytes + 2 + 1 + comp_bytes + 1;
    if data.len() % entry != 0 || data.is_empty() {
      return Err(Error::BadMarker(0xff5f));
    }
    let count = data.len() / entry;
    if count > MAX_POCS {
      return Err(Error::BadMarker(0xff5f));
    }
    let rd_comp = |d: &[u8]| -> u32 {
      if comp_bytes == 1 {
        d[0] as u32
      } else {
        u16::from_be_bytes([d[0], d[1]]) as u32
      }
    };
    let mut pocs = Vec::with_capacity(count);
    for i in 0..count {
      let e = &data[i * entry..];
      let resno0 = e[0] as u32;
      let compno0 = rd_comp(&e[1..]);
      let o = 1 + comp_bytes;
      let layno1 = u16::from_be_bytes([e[o], e[o + 1]]) as u32;
      let resno1 = e[o + 2] as u32;
      let compno1 = rd_comp(&e[o + 3..]);
      let prg = ProgressionOrder::from_u8(e[o + 3 + comp_bytes]).ok_or(Error::BadMarker(0xff5f))?;
      pocs.push(Poc {
        resno0,
        compno0,
        layno1,
        resno1,
        compno1,
        prg,
      });
    }
    self.tcp_for(tileno).pocs = pocs;
    Ok(())
  }

  fn read_tlm(&mut self, data: &[u8], mgr: &mut EventManager) -> Result<()> {
    if data.len() < 2 {
      return Err(Error::BadMarker(0xff55));
    }
    let stlm = data[1];
    let st = ((stlm >> 4) & 0x3) as usize;
    let sp = if stlm & 0x40 != 0 { 4 } else { 2 };
    let entry = st + sp;
    let body = &data[2..];
    if st == 3 || entry == 0 || body.len() % entry != 0 {
      event_msg!(mgr, EVT_WARNING, "malformed TLM skipped");
      return Ok(());
    }
    for e in body.chunks(entry) {
      let tileno = match st {
        0 => None,
        1 => Some(e[0] as u32),
        _ => Some(u16::from_be_bytes([e[0], e[1]]) as u32),
      };
      let len = if sp == 2 {
        u16::from_be_bytes([e[st], e[st + 1]]) as u32
      } else {
        u32::from_be_bytes([e[st], e[st + 1], e[st + 2], e[st + 3]])
      };
      self.tlm.push((tileno, len));
    }
    Ok(())
  }

  fn read_mct(&mut self, data: &[u8], tileno: Option<u32>, mgr: &mut EventManager) -> Result<()> {
    // Imct(2) selects the record: 0 = inverse matrix (float32,
    // row-major), 1 = per-stage offsets (int32)
    if data.len() < 2 {
      return Err(Error::BadMarker(0xff74));
    }
    let imct = u16::from_be_bytes([data[0], data[1]]);
    let n = (data.len() - 2) / 4;
    let numcomps = self.numcomps as usize;
    match imct {
      0 => {
        if n != numcomps * numcomps {
          event_msg!(mgr, EVT_WARNING, "MCT matrix size mismatch, marker ignored");
          return Ok(());
        }
        let mut matrix = Vec::with_capacity(n);
        for i in 0..n {
          let o = 2 + i * 4;
          matrix.push(f32::from_bits(u32::from_be_bytes([
            data[o],
            data[o + 1],
            data[o + 2],
            data[o + 3],
          ])));
        }
        self.tcp_for(tileno).mct_decoding_matrix = Some(matrix);
      }
      1 => {
        if n != numcomps {
          event_msg!(mgr, EVT_WARNING, "MCT offset count mismatch, marker ignored");
          return Ok(());
        }
        let mut offsets = Vec::with_capacity(n);
        for i in 0..n {
          let o = 2 + i * 4;
          offsets.push(i32::from_be_bytes([
            data[o],
            data[o + 1],
            data[o + 2],
            data[o + 3],
          ]));
        }
        self.tcp_for(tileno).mct_offsets = Some(offsets);
      }
      _ => {
        event_msg!(mgr, EVT_WARNING, "unknown MCT record {} skipped", imct);
      }
    }
    Ok(())
  }

  fn read_ppm(&mut self, data: &[u8], _mgr: &mut EventManager) -> Result<()> {
    if data.is_empty() {
      return Err(Error::BadMarker(0xff60));
    }
    self.cp.ppm = true;
    self.cp.ppm_markers.push((data[0], data[1..].to_vec()));
    Ok(())
  }

  /// Scan all tile-parts, gathering bodies and tile-part header state.
  pub fn read_tile_parts(
    &mut self,
    stream: &mut BufferedStream,
    mgr: &mut EventManager,
  ) -> Result<()> {
    loop {
      let id = match stream.read_u16() {
        Ok(id) => id,
        Err(Error::EndOfStream) => {
          event_msg!(mgr, EVT_WARNING, "code-stream ends without EOC");
          return Ok(());
        }
        Err(e) => return Err(e),
      };
      let marker = J2KMarker::from(id);
      match marker {
        J2KMarker::EOC => {
          self.state = J2KState::MT;
          if !self.tlm.is_empty() {
            let parts_read: u32 = self.tiles.iter().map(|t| t.parts_read).sum();
            if parts_read as usize != self.tlm.len() {
              event_msg!(
                mgr,
                EVT_WARNING,
                "TLM lists {} tile-parts, {} were read",
                self.tlm.len(),
                parts_read
              );
            }
          }
          return Ok(());
        }
        J2KMarker::SOT => {
          if !self.state.contains(J2KState::TPHSOT) {
            return Err(Error::BadMarker(id as u32));
          }
          self.cur_sot_start = stream.tell() - 2;
          let len = stream.read_u16()?;
          let data = stream.read_vec(len as usize - 2)?;
          self.read_sot(&data, mgr)?;
          self.state = J2KState::TPH;
          self.read_tile_part_header(stream, mgr)?;
          self.state = J2KState::TPHSOT;
        }
        _ => {
          event_msg!(mgr, EVT_WARNING, "unexpected marker 0x{:04x} between tile-parts", id);
          let len = stream.read_u16()?;
          stream.skip(len as i64 - 2)?;
        }
      }
    }
  }

  fn read_sot(&mut self, data: &[u8], mgr: &mut EventManager) -> Result<()> {
    if data.len() < 8 {
      return Err(Error::BadMarker(0xff90));
    }
    let isot = u16::from_be_bytes([data[0], data[1]]) as u32;
    let psot = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
    let tpsot = data[6];
    let tnsot = data[7];
    if isot >= self.cp.tw * self.cp.th {
      event_msg!(mgr, EVT_ERROR, "SOT: tile index {} out of range", isot);
      return Err(Error::BadMarker(0xff90));
    }
    self.cur_tileno = isot;
    self.cur_part_end = if psot == 0 {
      None
    } else {
      Some(self.cur_sot_start + psot as u64)
    };
    // first tile-part inherits the main-header defaults
    while self.cp.tcps.len() <= isot as usize {
      let t = self.default_tcp.clone();
      self.cp.tcps.push(t);
    }
    let bits = &mut self.tiles[isot as usize];
    if !bits.seen {
      bits.seen = true;
    }
    let tcp = &mut self.cp.tcps[isot as usize];
    if tnsot != 0 {
      tcp.expected_tile_parts = tnsot as u32;
    }
    let _ = tpsot;
    Ok(())
  }

  fn read_tile_part_header(
    &mut self,
    stream: &mut BufferedStream,
    mgr: &mut EventManager,
  ) -> Result<()> {
    loop {
      let id = stream.read_u16()?;
      let marker = J2KMarker::from(id);
      if marker == J2KMarker::SOD {
        return self.read_sod(stream, mgr);
      }
      if marker.is_delimiter() {
        return Err(Error::BadMarker(id as u32));
      }
      let len = stream.read_u16()?;
      if len < 2 {
        return Err(Error::BadMarker(id as u32));
      }
      let data = stream.read_vec(len as usize - 2)?;
      if marker.is_unknown() {
        event_msg!(mgr, EVT_WARNING, "unknown marker 0x{:04x} in tile header", id);
        continue;
      }
      if !marker.states().intersects(J2KState::TPH) {
        event_msg!(mgr, EVT_ERROR, "marker 0x{:04x} illegal in a tile-part header", id);
        return Err(Error::BadMarker(id as u32));
      }
      let tileno = Some(self.cur_tileno);
      match marker {
        J2KMarker::COD => self.read_cod(&data, tileno, mgr)?,
        J2KMarker::COC => self.read_coc(&data, tileno, mgr)?,
        J2KMarker::QCD => self.read_qcd(&data, tileno, mgr)?,
        J2KMarker::QCC => self.read_qcc(&data, tileno, mgr)?,
        J2KMarker::RGN => self.read_rgn(&data, tileno, mgr)?,
        J2KMarker::POC => self.read_poc(&data, tileno, mgr)?,
        J2KMarker::MCT => self.read_mct(&data, tileno, mgr)?,
        J2KMarker::PPT => {
          if self.cp.ppm {
            event_msg!(mgr, EVT_ERROR, "PPT and PPM are mutually exclusive");
            return Err(Error::BadMarker(0xff61));
          }
          if data.is_empty() {
            return Err(Error::BadMarker(0xff61));
          }
          let tcp = &mut self.cp.tcps[self.cur_tileno as usize];
          tcp.ppt_markers.push((data[0], data[1..].to_vec()));
        }
        J2KMarker::PLT => {
          if data.is_empty() {
            return Err(Error::BadMarker(0xff58));
          }
          let bits = &mut self.tiles[self.cur_tileno as usize];
          bits.plt_markers.push((data[0], data[1..].to_vec()));
        }
        J2KMarker::COM => {}
        _ => {
          event_msg!(mgr, EVT_WARNING, "marker 0x{:04x} skipped in tile header", id);
        }
      }
    }
  }

  fn read_sod(&mut self, stream: &mut BufferedStream, mgr: &mut EventManager) -> Result<()> {
    let mut body_len = match self.cur_part_end {
      Some(end) => {
        let pos = stream.tell();
        if end < pos {
          event_msg!(mgr, EVT_ERROR, "Psot shorter than its tile-part header");
          return Err(Error::BadMarker(0xff93));
        }
        (end - pos) as usize
      }
      None => {
        // open-ended last tile-part: everything up to EOC
        let remaining = stream.remaining().unwrap_or(0);
        (remaining as usize).saturating_sub(2)
      }
    };
    if let Some(remaining) = stream.remaining() {
      if body_len > remaining as usize {
        event_msg!(mgr, EVT_WARNING, "tile-part body truncated");
        body_len = remaining as usize;
      }
    }
    let body = stream.read_vec(body_len)?;
    let tileno = self.cur_tileno as usize;
    if self.cp.ppm {
      if let Some(entry) = self.cp.ppm_entries.pop_front() {
        self.tiles[tileno].ppm_header.extend_from_slice(&entry);
      }
    }
    self.tiles[tileno].body.extend_from_slice(&body);
    self.tiles[tileno].parts_read += 1;
    self.cp.tcps[tileno].num_tile_parts_read += 1;
    Ok(())
  }

  /// Decode all gathered tiles into the output image.
  pub fn decode_tiles(
    &mut self,
    params: &DecodeParameters,
    mgr: &mut EventManager,
  ) -> Result<Image> {
    let reduce = params.reduce;
    let sched = Scheduler::new(params.num_threads)?;
    let mut out = self.image.clone();
    // output geometry: reduced and windowed
    let canvas = self.image.canvas();
    let window = params.window.map(|w| w.intersection(&canvas));
    for comp in out.comps.iter_mut() {
      let full = Rect32::new(comp.x0, comp.y0, comp.x0 + comp.w, comp.y0 + comp.h);
      let target = match window {
        Some(w) => w.rectceildiv(comp.dx, comp.dy).intersection(&full),
        None => full,
      };
      let r = target.rectceildivpow2(reduce);
      comp.x0 = r.x0;
      comp.y0 = r.y0;
      comp.w = r.width();
      comp.h = r.height();
      comp.factor = reduce;
      comp.alloc_data()?;
    }

    let numtiles = self.cp.tw * self.cp.th;
    for tileno in 0..numtiles {
      if !self.tiles[tileno as usize].seen {
        continue;
      }
      // window culling on the tile grid
      if let Some(w) = window {
        let rect = self.cp.tile_rect(canvas, tileno % self.cp.tw, tileno / self.cp.tw);
        if rect.intersection(&w).is_empty() {
          continue;
        }
      }
      self.decode_one_tile(tileno, reduce, window, params, &sched, &mut out, mgr)?;
      if params.cache == CacheStrategy::None {
        let bits = &mut self.tiles[tileno as usize];
        bits.body = Vec::new();
        bits.ppm_header = Vec::new();
      }
    }
    Ok(out)
  }

  fn decode_one_tile(
    &mut self,
    tileno: u32,
    reduce: u32,
    window: Option<Rect32>,
    params: &DecodeParameters,
    sched: &Scheduler,
    out: &mut Image,
    mgr: &mut EventManager,
  ) -> Result<()> {
    let tcp = &mut self.cp.tcps[tileno as usize];
    tcp.merge_ppt();
    let tcp = self.cp.tcps[tileno as usize].clone();
    let bits = &mut self.tiles[tileno as usize];
    let plt = bits.plt_lengths(mgr);
    let mut tile = tcd::build_tile_dec(&self.image, &self.cp, &tcp, tileno, reduce, window)?;
    tile.compressed = std::mem::take(&mut bits.body);
    let headers = if bits.ppm_header.is_empty() {
      None
    } else {
      Some(bits.ppm_header.clone())
    };
    let ppt = if tcp.ppt { Some(tcp.ppt_data.clone()) } else { None };
    let header_src = ppt.or(headers);
    let r = t2::decode_packets(
      &mut tile,
      &tcp,
      &self.image,
      header_src.as_deref(),
      &plt,
      params.layers,
      params.strict,
      mgr,
    );
    match r {
      Ok(()) => {}
      Err(e) => {
        if params.strict {
          return Err(e);
        }
        event_msg!(mgr, EVT_WARNING, "tile {}: {}; best-effort reconstruction", tileno, e);
      }
    }
    if tile.truncated {
      event_msg!(mgr, EVT_WARNING, "tile {} is truncated; missing blocks decode to zero", tileno);
    }
    tile.decode(&tcp, &self.image, sched, mgr)?;
    tile.update_image(out)?;
    // return the body to the cache slot
    self.tiles[tileno as usize].body = std::mem::take(&mut tile.compressed);
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// Encoder.
// ---------------------------------------------------------------------------

pub(crate) struct CodeStreamEncoder<'a> {
  params: &'a EncodeParameters,
  cp: CodingParams,
  tcp: Tcp,
  /// Collected (tileno, tile-part length) records for TLM.
  tlm_records: Vec<(u16, u32)>,
  tlm_pos: Option<u64>,
}

impl<'a> CodeStreamEncoder<'a> {
  pub fn new(image: &Image, params: &'a EncodeParameters) -> Result<Self> {
    let numcomps = image.comps.len();
    if numcomps == 0 {
      return Err(Error::InvalidParameter("image without components"));
    }
    if params.cblkw_exp < CBLK_EXP_MIN
      || params.cblkw_exp > CBLK_EXP_MAX
      || params.cblkh_exp < CBLK_EXP_MIN
      || params.cblkh_exp > CBLK_EXP_MAX
      || params.cblkw_exp + params.cblkh_exp > CBLK_EXP_SUM_MAX
    {
      return Err(Error::InvalidParameter("code-block exponents"));
    }
    if params.num_resolutions == 0 || params.num_resolutions > MAX_RESOLUTIONS as u32 {
      return Err(Error::InvalidParameter("resolution count"));
    }
    if params.numlayers == 0 || params.numlayers > MAX_LAYERS {
      return Err(Error::InvalidParameter("layer count"));
    }
    let canvas = image.canvas();
    let (tdx, tdy) = params
      .tile_size
      .unwrap_or((canvas.width(), canvas.height()));
    if tdx == 0 || tdy == 0 {
      return Err(Error::InvalidParameter("tile size"));
    }
    let (tx0, ty0) = params.tile_origin;
    if tx0 > canvas.x0 || ty0 > canvas.y0 {
      return Err(Error::InvalidParameter("tile origin"));
    }
    let tw = uint_ceildiv(canvas.x1 - tx0, tdx);
    let th = uint_ceildiv(canvas.y1 - ty0, tdy);
    if tw * th > MAX_NUM_TILES {
      return Err(Error::InvalidParameter("tile grid too large"));
    }

    let ht = params.cblk_style.contains(CblkStyle::HT);
    let mut rsiz = params.rsiz;
    if ht {
      rsiz |= PROFILE_HT;
    }
    let mut tcp = Tcp::new(numcomps);
    tcp.csty = (params.sop as u8 * CSTY_SOP)
      | (params.eph as u8 * CSTY_EPH)
      | (params.precincts.is_some() as u8 * CSTY_PRECINCTS);
    tcp.prg = params.prog;
    tcp.numlayers = params.numlayers;
    tcp.mct = if let Some(custom) = &params.custom_mct {
      if custom.encode_matrix.len() != numcomps * numcomps
        || custom.decode_matrix.len() != numcomps * numcomps
        || custom.offsets.len() != numcomps
      {
        return Err(Error::InvalidParameter("custom MCT dimensions"));
      }
      tcp.mct_encoding_matrix = Some(custom.encode_matrix.clone());
      tcp.mct_decoding_matrix = Some(custom.decode_matrix.clone());
      tcp.mct_offsets = Some(custom.offsets.clone());
      MctMode::Custom
    } else if params.mct && numcomps >= 3 {
      MctMode::Array
    } else {
      MctMode::None
    };
    tcp.is_ht = ht;
    tcp.pocs = params.progression_changes.clone();
    tcp.rates = params.rates.clone();
    for (compno, tccp) in tcp.tccps.iter_mut().enumerate() {
      let comp = &image.comps[compno];
      tccp.numresolutions = params.num_resolutions;
      tccp.cblkw = params.cblkw_exp;
      tccp.cblkh = params.cblkh_exp;
      tccp.cblk_sty = params.cblk_style;
      tccp.qmfbid = if params.irreversible { 0 } else { 1 };
      tccp.qntsty = if params.irreversible {
        QNTSTY_SEQNT
      } else {
        QNTSTY_NOQNT
      };
      tccp.numgbits = params.guard_bits;
      tccp.roishift = params.roishift;
      tccp.dc_level_shift = if comp.sgnd { 0 } else { 1 << (comp.prec - 1) };
      if let Some(prcs) = &params.precincts {
        tccp.csty |= CSTY_PRECINCTS;
        for r in 0..params.num_resolutions as usize {
          let (pw, ph) = prcs
            .get(r)
            .copied()
            .or_else(|| prcs.last().copied())
            .unwrap_or((DEFAULT_PRECINCT_EXP, DEFAULT_PRECINCT_EXP));
          tccp.prcw_exp[r] = pw;
          tccp.prch_exp[r] = ph;
        }
      }
      quantizer::calc_explicit_stepsizes(tccp, comp.prec);
    }

    let cp = CodingParams {
      tx0,
      ty0,
      tdx,
      tdy,
      tw,
      th,
      rsiz,
      comment: params.comment.clone(),
      write_tlm: params.write_tlm,
      write_plt: params.write_plt,
      ..Default::default()
    };
    Ok(Self {
      params,
      cp,
      tcp,
      tlm_records: Vec::new(),
      tlm_pos: None,
    })
  }

  fn write_segment(stream: &mut BufferedStream, marker: J2KMarker, body: &[u8]) -> Result<()> {
    stream.write_u16(marker.as_u16())?;
    stream.write_u16(body.len() as u16 + 2)?;
    stream.write_bytes(body)
  }

  fn write_siz(&self, image: &Image, stream: &mut BufferedStream) -> Result<()> {
    let mut b = Vec::with_capacity(38 + 3 * image.comps.len());
    b.extend_from_slice(&self.cp.rsiz.to_be_bytes());
    b.extend_from_slice(&image.x1.to_be_bytes());
    b.extend_from_slice(&image.y1.to_be_bytes());
    b.extend_from_slice(&image.x0.to_be_bytes());
    b.extend_from_slice(&image.y0.to_be_bytes());
    b.extend_from_slice(&self.cp.tdx.to_be_bytes());
    b.extend_from_slice(&self.cp.tdy.to_be_bytes());
    b.extend_from_slice(&self.cp.tx0.to_be_bytes());
    b.extend_from_slice(&self.cp.ty0.to_be_bytes());
    b.extend_from_slice(&(image.comps.len() as u16).to_be_bytes());
    for comp in image.comps.iter() {
      let ssiz = (comp.prec - 1) as u8 | if comp.sgnd { 0x80 } else { 0 };
      b.push(ssiz);
      b.push(comp.dx as u8);
      b.push(comp.dy as u8);
    }
    Self::write_segment(stream, J2KMarker::SIZ, &b)
  }

  fn write_cap(&self, image: &Image, stream: &mut BufferedStream) -> Result<()> {
    let mut b = Vec::with_capacity(6);
    b.extend_from_slice(&PCAP_HT_BIT.to_be_bytes());
    let prec = image.comps.iter().map(|c| c.prec).max().unwrap_or(8);
    let ccap0 = quantizer::ht_cap_value(&self.tcp.tccps, prec);
    b.extend_from_slice(&ccap0.to_be_bytes());
    Self::write_segment(stream, J2KMarker::CAP, &b)
  }

  fn write_cod(&self, stream: &mut BufferedStream) -> Result<()> {
    let tccp = &self.tcp.tccps[0];
    let mut b = Vec::new();
    b.push(self.tcp.csty);
    b.push(self.tcp.prg.as_u8());
    b.extend_from_slice(&(self.tcp.numlayers as u16).to_be_bytes());
    b.push(match self.tcp.mct {
      MctMode::None => 0,
      MctMode::Array => 1,
      MctMode::Custom => 2,
    });
    b.push((tccp.numresolutions - 1) as u8);
    b.push((tccp.cblkw - 2) as u8);
    b.push((tccp.cblkh - 2) as u8);
    b.push(tccp.cblk_sty.bits());
    b.push(tccp.qmfbid as u8);
    if self.tcp.csty & CSTY_PRECINCTS != 0 {
      for r in 0..tccp.numresolutions as usize {
        b.push(((tccp.prch_exp[r] << 4) | tccp.prcw_exp[r]) as u8);
      }
    }
    Self::write_segment(stream, J2KMarker::COD, &b)
  }

  fn write_qcd(&self, stream: &mut BufferedStream) -> Result<()> {
    let body = quantizer::write_sqcd(&self.tcp.tccps[0]);
    Self::write_segment(stream, J2KMarker::QCD, &body)
  }

  fn write_qcc_if_needed(&self, stream: &mut BufferedStream) -> Result<()> {
    // components share the tile defaults unless their quantization differs
    let base = &self.tcp.tccps[0];
    for (compno, tccp) in self.tcp.tccps.iter().enumerate().skip(1) {
      if quantizer::sqcd_equal(base, tccp) {
        continue;
      }
      let mut b = Vec::new();
      if self.tcp.tccps.len() < 257 {
        b.push(compno as u8);
      } else {
        b.extend_from_slice(&(compno as u16).to_be_bytes());
      }
      b.extend_from_slice(&quantizer::write_sqcd(tccp));
      Self::write_segment(stream, J2KMarker::QCC, &b)?;
    }
    Ok(())
  }

  fn write_rgn(&self, stream: &mut BufferedStream) -> Result<()> {
    if self.params.roishift == 0 {
      return Ok(());
    }
    for compno in 0..self.tcp.tccps.len() {
      let mut b = Vec::new();
      if self.tcp.tccps.len() < 257 {
        b.push(compno as u8);
      } else {
        b.extend_from_slice(&(compno as u16).to_be_bytes());
      }
      b.push(0); // Srgn: implicit
      b.push(self.params.roishift as u8);
      Self::write_segment(stream, J2KMarker::RGN, &b)?;
    }
    Ok(())
  }

  fn write_poc(&self, stream: &mut BufferedStream) -> Result<()> {
    if self.tcp.pocs.is_empty() {
      return Ok(());
    }
    let wide = self.tcp.tccps.len() >= 257;
    let mut b = Vec::new();
    for poc in &self.tcp.pocs {
      b.push(poc.resno0 as u8);
      if wide {
        b.extend_from_slice(&(poc.compno0 as u16).to_be_bytes());
      } else {
        b.push(poc.compno0 as u8);
      }
      b.extend_from_slice(&(poc.layno1 as u16).to_be_bytes());
      b.push(poc.resno1 as u8);
      if wide {
        b.extend_from_slice(&(poc.compno1 as u16).to_be_bytes());
      } else {
        b.push(poc.compno1 as u8);
      }
      b.push(poc.prg.as_u8());
    }
    Self::write_segment(stream, J2KMarker::POC, &b)
  }

  fn write_mct(&self, stream: &mut BufferedStream) -> Result<()> {
    let matrix = match &self.tcp.mct_decoding_matrix {
      Some(m) if self.tcp.mct == MctMode::Custom => m,
      _ => return Ok(()),
    };
    let mut b = Vec::with_capacity(2 + 4 * matrix.len());
    b.extend_from_slice(&0u16.to_be_bytes());
    for v in matrix {
      b.extend_from_slice(&v.to_bits().to_be_bytes());
    }
    Self::write_segment(stream, J2KMarker::MCT, &b)?;
    if let Some(offsets) = &self.tcp.mct_offsets {
      let mut b = Vec::with_capacity(2 + 4 * offsets.len());
      b.extend_from_slice(&1u16.to_be_bytes());
      for v in offsets {
        b.extend_from_slice(&v.to_be_bytes());
      }
      Self::write_segment(stream, J2KMarker::MCT, &b)?;
    }
    Ok(())
  }

  fn write_com(&self, stream: &mut BufferedStream) -> Result<()> {
    let text = self
      .cp
      .comment
      .clone()
      .unwrap_or_else(|| "Created by htj2k-rs".to_string());
    let mut b = Vec::with_capacity(2 + text.len());
    b.extend_from_slice(&1u16.to_be_bytes()); // Rcom: Latin-1
    b.extend_from_slice(text.as_bytes());
    Self::write_segment(stream, J2KMarker::COM, &b)
  }

  fn write_tlm_placeholder(
    &mut self,
    stream: &mut BufferedStream,
    num_parts: usize,
  ) -> Result<()> {
    if !self.cp.write_tlm {
      return Ok(());
    }
    self.tlm_pos = Some(stream.tell());
    let mut b = vec![0u8; 2 + 6 * num_parts];
    b[0] = 0; // Ztlm
    b[1] = 0x60; // ST = 2 bytes of tile index, SP = 4-byte lengths
    Self::write_segment(stream, J2KMarker::TLM, &b)
  }

  fn backpatch_tlm(&mut self, stream: &mut BufferedStream) -> Result<()> {
    let pos = match self.tlm_pos {
      Some(p) => p,
      None => return Ok(()),
    };
    let end = stream.tell();
    stream.seek(pos + 4 + 2)?;
    let records = std::mem::take(&mut self.tlm_records);
    for (tileno, len) in records {
      stream.write_u16(tileno)?;
      stream.write_u32(len)?;
    }
    stream.seek(end)
  }

  fn write_plt(stream: &mut BufferedStream, lengths: &[u32]) -> Result<()> {
    let mut b = vec![0u8]; // Zplt
    for &len in lengths {
      let mut tmp = [0u8; 5];
      let mut n = 0;
      let mut v = len;
      loop {
        tmp[n] = (v & 0x7f) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
          break;
        }
      }
      for i in (0..n).rev() {
        let cont = if i == 0 { 0 } else { 0x80 };
        b.push(tmp[i] | cont);
      }
    }
    Self::write_segment(stream, J2KMarker::PLT, &b)
  }

  /// Encode the whole image and return the number of bytes written.
  pub fn encode(
    &mut self,
    image: &Image,
    stream: &mut BufferedStream,
    mgr: &mut EventManager,
  ) -> Result<u64> {
    let start = stream.tell();
    stream.write_u16(J2KMarker::SOC.as_u16())?;
    self.write_siz(image, stream)?;
    if self.tcp.is_ht {
      self.write_cap(image, stream)?;
    }
    self.write_cod(stream)?;
    self.write_qcd(stream)?;
    self.write_qcc_if_needed(stream)?;
    self.write_rgn(stream)?;
    self.write_poc(stream)?;
    self.write_mct(stream)?;
    let parts_per_tile = self.tcp.pocs.len().max(1);
    let numtiles = (self.cp.tw * self.cp.th) as usize;
    self.write_tlm_placeholder(stream, numtiles * parts_per_tile)?;
    self.write_com(stream)?;

    let sched = Scheduler::new(self.params.num_threads)?;
    for tileno in 0..numtiles as u32 {
      self.encode_tile(tileno, image, stream, &sched, mgr)?;
    }
    stream.write_u16(J2KMarker::EOC.as_u16())?;
    self.backpatch_tlm(stream)?;
    stream.flush()?;
    Ok(stream.tell() - start)
  }

  fn encode_tile(
    &mut self,
    tileno: u32,
    image: &Image,
    stream: &mut BufferedStream,
    sched: &Scheduler,
    mgr: &mut EventManager,
  ) -> Result<()> {
    let mut tile = tcd::build_tile_enc(image, &self.cp, &self.tcp, tileno)?;
    tile.encode(&self.tcp, image, sched, mgr)?;

    // layer budgets from the per-layer compression ratios
    let raw = tile.uncompressed_size(image);
    let budgets: Vec<Option<u64>> = (0..self.tcp.numlayers)
      .map(|l| {
        let rate = self.tcp.rates.get(l as usize).copied().unwrap_or(0.0);
        if rate > 1.0 {
          Some(((raw as f64) / rate) as u64)
        } else {
          None
        }
      })
      .collect();
    tile.rate_allocate(self.tcp.numlayers, &budgets);

    let packets = t2::encode_packets(&mut tile, &self.tcp, image, self.tcp.numlayers)?;

    // one tile-part per progression slab
    let parts_per_tile = self.tcp.pocs.len().max(1);
    for part in 0..parts_per_tile {
      let part_packets: Vec<&t2::PacketOut> =
        packets.iter().filter(|p| p.prog == part).collect();
      let body_len: usize = part_packets.iter().map(|p| p.bytes.len()).sum();

      let mut tph = Vec::new();
      if self.cp.write_plt {
        let lengths: Vec<u32> = part_packets.iter().map(|p| p.bytes.len() as u32).collect();
        let mut plt_stream = BufferedStream::writer();
        Self::write_plt(&mut plt_stream, &lengths)?;
        tph.extend_from_slice(&plt_stream.into_bytes()?);
      }

      // Psot: SOT segment (12) + tile-part header markers + SOD (2) + body
      let psot = 12 + tph.len() as u32 + 2 + body_len as u32;
      let mut sot = Vec::with_capacity(8);
      sot.extend_from_slice(&(tileno as u16).to_be_bytes());
      sot.extend_from_slice(&psot.to_be_bytes());
      sot.push(part as u8);
      sot.push(parts_per_tile as u8);
      Self::write_segment(stream, J2KMarker::SOT, &sot)?;
      stream.write_bytes(&tph)?;
      stream.write_u16(J2KMarker::SOD.as_u16())?;
      for p in &part_packets {
        stream.write_bytes(&p.bytes)?;
      }
      self.tlm_records.push((tileno as u16, psot));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn marker_mapping_round_trip() {
    for &m in &[
      J2KMarker::SOC,
      J2KMarker::SIZ,
      J2KMarker::COD,
      J2KMarker::QCD,
      J2KMarker::SOT,
      J2KMarker::SOD,
      J2KMarker::EOC,
      J2KMarker::CAP,
      J2KMarker::PLT,
      J2KMarker::PPM,
      J2KMarker::PPT,
      J2KMarker::TLM,
    ] {
      assert_eq!(J2KMarker::from(m.as_u16()), m);
    }
    assert!(J2KMarker::from(0xff30).is_unknown());
  }

  #[test]
  fn marker_states() {
    assert_eq!(J2KMarker::SIZ.states(), J2KState::MHSIZ);
    assert!(J2KMarker::COD.states().contains(J2KState::MH));
    assert!(J2KMarker::COD.states().contains(J2KState::TPH));
    assert!(J2KMarker::PLT.states().contains(J2KState::TPH));
    assert!(!J2KMarker::PLT.states().contains(J2KState::MH));
    assert!(J2KMarker::PPM.states().contains(J2KState::MH));
  }
}
