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

//! T2: packet headers and bodies.
//!
//! Headers are bit-coded with the inclusion and zero-bit-plane tag trees,
//! the pass-count code and comma-coded length-bit increments; bodies are
//! appended as non-owning chunks into the tile's compressed byte region.

use crate::bio::{BitReader, BitWriter};
use crate::consts::*;
use crate::dwt;
use crate::error::{Error, Result};
use crate::event::*;
use crate::image::Image;
use crate::math::{uint_floorlog2, Rect32};
use crate::pi::{self, PacketIter, PiPacket};
use crate::t1;
use crate::tcd::{CblkDec, CblkEnc, SegDec, Tile};
use crate::types::Tcp;

const SOP_MARKER: [u8; 2] = [0xff, 0x91];
const EPH_MARKER: [u8; 2] = [0xff, 0x92];

/// One encoded packet, tagged with the progression that produced it so
/// the writer can split tile-parts along POC slabs.
#[derive(Debug)]
pub(crate) struct PacketOut {
  pub prog: usize,
  pub layno: u32,
  pub bytes: Vec<u8>,
}

fn packet_iter_for(tile_rect: Rect32, tcp: &Tcp, image: &Image, numlayers: u32) -> PacketIter {
  let comps: Vec<pi::PiComp> = image
    .comps
    .iter()
    .zip(tcp.tccps.iter())
    .map(|(c, tccp)| pi::build_comp(tile_rect, c.dx, c.dy, tccp))
    .collect();
  PacketIter::new(tile_rect, comps, numlayers, tcp.prg, &tcp.pocs)
}

// ---------------------------------------------------------------------------
// Encode.
// ---------------------------------------------------------------------------

/// Encode every packet of a tile in progression order.
pub(crate) fn encode_packets(
  tile: &mut Tile<CblkEnc>,
  tcp: &Tcp,
  image: &Image,
  numlayers: u32,
) -> Result<Vec<PacketOut>> {
  // seed the inclusion and zero-plane trees from the layer assignment
  for comp in tile.comps.iter_mut() {
    for res in comp.resolutions.iter_mut() {
      for band in res.bands.iter_mut() {
        let band_numbps = band.numbps;
        for (_, prec) in band.precincts.iter_mut() {
          prec.incltree.reset();
          prec.imsbtree.reset();
          for (cblkno, cblk) in prec.cblks.iter().enumerate() {
            let first_layer = cblk
              .layers
              .iter()
              .position(|l| l.numpasses > 0)
              .unwrap_or(numlayers as usize);
            prec.incltree.set_value(cblkno as u32, first_layer as i32);
            let imsb = band_numbps.saturating_sub(cblk.numbps);
            prec.imsbtree.set_value(cblkno as u32, imsb as i32);
          }
        }
      }
    }
  }

  let mut pi = packet_iter_for(tile.rect, tcp, image, numlayers);
  let mut out = Vec::new();
  let mut nsop = 0u16;
  while let Some(pkt) = pi.next() {
    let bytes = encode_one_packet(tile, tcp, &pkt, nsop)?;
    out.push(PacketOut {
      prog: pi.current_progression(),
      layno: pkt.layno,
      bytes,
    });
    nsop = nsop.wrapping_add(1);
  }
  Ok(out)
}

fn encode_one_packet(
  tile: &mut Tile<CblkEnc>,
  tcp: &Tcp,
  pkt: &PiPacket,
  nsop: u16,
) -> Result<Vec<u8>> {
  let comp = &mut tile.comps[pkt.compno as usize];
  if pkt.resno >= comp.minimum_numresolutions {
    return Ok(Vec::new());
  }
  let res = &mut comp.resolutions[pkt.resno as usize];
  let layno = pkt.layno as usize;

  // a packet is present when any block contributes to this layer
  let mut present = false;
  for band in res.bands.iter() {
    if band.is_empty() {
      continue;
    }
    if let Some(prec) = band.precincts.get(&pkt.precno) {
      for cblk in prec.cblks.iter() {
        if cblk.layers.get(layno).map(|l| l.numpasses > 0).unwrap_or(false) {
          present = true;
        }
      }
    }
  }

  let mut bio = BitWriter::new();
  bio.putbit(present as u32);
  let mut body: Vec<u8> = Vec::new();
  if present {
    for band in res.bands.iter_mut() {
      if band.is_empty() {
        continue;
      }
      let prec = match band.precincts.get_mut(&pkt.precno) {
        Some(p) => p,
        None => continue,
      };
      // split borrow: the trees and the block list live side by side
      let incltree = &mut prec.incltree;
      let imsbtree = &mut prec.imsbtree;
      for (cblkno, cblk) in prec.cblks.iter_mut().enumerate() {
        let layer = cblk.layers.get(layno).copied().unwrap_or_default();
        let included = layer.numpasses > 0;
        let first_before = cblk
          .layers
          .iter()
          .take(layno)
          .any(|l| l.numpasses > 0);
        if !first_before {
          incltree.encode(&mut bio, cblkno as u32, pkt.layno as i32 + 1);
        } else {
          bio.putbit(included as u32);
        }
        if !included {
          continue;
        }
        if !first_before {
          // newly included: signal the missing bit-planes and reset the
          // length-bit state
          imsbtree.encode(&mut bio, cblkno as u32, MAX_BIT_PLANES as i32 + 1);
          cblk.numlenbits_enc = 3;
        }
        bio.putnumpasses(layer.numpasses);

        // first pass index of this layer
        let first_pass: u32 = cblk
          .layers
          .iter()
          .take(layno)
          .map(|l| l.numpasses)
          .sum();
        let passes = &cblk.passes;
        // length-bit increment over the segments this layer touches
        let mut increment = 0i32;
        let mut nump = 0u32;
        let mut len = 0u32;
        let mut prev_rate = if first_pass > 0 {
          passes[first_pass as usize - 1].rate
        } else {
          0
        };
        for passno in first_pass..first_pass + layer.numpasses {
          let p = &passes[passno as usize];
          nump += 1;
          len += p.rate - prev_rate;
          prev_rate = p.rate;
          if p.term || passno + 1 == first_pass + layer.numpasses {
            increment = increment.max(
              uint_floorlog2(len.max(1)) as i32 + 1
                - (cblk.numlenbits_enc as i32 + uint_floorlog2(nump) as i32),
            );
            len = 0;
            nump = 0;
          }
        }
        bio.putcommacode(increment.max(0) as u32);
        cblk.numlenbits_enc += increment.max(0) as u32;
        // segment lengths
        let mut nump = 0u32;
        let mut len = 0u32;
        let mut prev_rate = if first_pass > 0 {
          passes[first_pass as usize - 1].rate
        } else {
          0
        };
        for passno in first_pass..first_pass + layer.numpasses {
          let p = &passes[passno as usize];
          nump += 1;
          len += p.rate - prev_rate;
          prev_rate = p.rate;
          if p.term || passno + 1 == first_pass + layer.numpasses {
            bio.write(len, cblk.numlenbits_enc + uint_floorlog2(nump));
            len = 0;
            nump = 0;
          }
        }
        // body bytes for this layer
        let start = layer.start as usize;
        let end = start + layer.len as usize;
        body.extend_from_slice(&cblk.stream[start..end.min(cblk.stream.len())]);
      }
    }
  }
  bio.flush();

  let mut bytes = Vec::new();
  if tcp.csty & CSTY_SOP != 0 {
    bytes.extend_from_slice(&SOP_MARKER);
    bytes.extend_from_slice(&4u16.to_be_bytes());
    bytes.extend_from_slice(&nsop.to_be_bytes());
  }
  bytes.extend_from_slice(bio.as_bytes());
  if tcp.csty & CSTY_EPH != 0 {
    bytes.extend_from_slice(&EPH_MARKER);
  }
  bytes.extend_from_slice(&body);
  Ok(bytes)
}

// ---------------------------------------------------------------------------
// Decode.
// ---------------------------------------------------------------------------

struct BodyItem {
  bandno: usize,
  precno: u32,
  cblkno: usize,
  segno: usize,
  len: u32,
}

/// Parse all packets of a tile. `headers` carries the packed PPM/PPT
/// stream when present; `plt` the signalled packet lengths (advisory).
pub(crate) fn decode_packets(
  tile: &mut Tile<CblkDec>,
  tcp: &Tcp,
  image: &Image,
  headers: Option<&[u8]>,
  plt: &[u32],
  max_layers: u32,
  strict: bool,
  mgr: &mut EventManager,
) -> Result<()> {
  let numlayers = if max_layers == 0 {
    tcp.numlayers
  } else {
    tcp.numlayers.min(max_layers)
  };
  let data = std::mem::take(&mut tile.compressed);
  let mut pi = packet_iter_for(tile.rect, tcp, image, tcp.numlayers);
  let mut pos = 0usize;
  let mut hdr_pos = 0usize;
  let mut pktno = 0usize;
  let support = if tcp.tccps[0].qmfbid == 0 {
    dwt::SUPPORT_97
  } else {
    dwt::SUPPORT_53
  };
  let mut result = Ok(());
  while let Some(pkt) = pi.next() {
    let plt_len = plt.get(pktno).copied();
    pktno += 1;

    let comp = &tile.comps[pkt.compno as usize];
    let skip_res = pkt.resno >= comp.minimum_numresolutions;
    let outside_window = !skip_res
      && match comp.res_window(pkt.resno, 4 * support) {
        Some(win) => {
          let res = &comp.resolutions[pkt.resno as usize];
          let band = &res.bands[0];
          band.precinct_rect_on_res(pkt.precno).intersection(&win).is_empty()
        }
        None => false,
      };
    let skip_layer = pkt.layno >= numlayers;
    let store = !(outside_window || skip_res || skip_layer);

    // a PLT entry lets the parser hop over packets it does not need
    // without touching their headers
    if (outside_window || skip_res) && headers.is_none() {
      if let Some(len) = plt_len {
        pos += len as usize;
        continue;
      }
    }

    let hdr_slice = match headers {
      Some(h) => &h[hdr_pos.min(h.len())..],
      None => &data[pos.min(data.len())..],
    };
    let parsed = parse_packet(tile, tcp, &pkt, hdr_slice, !store);
    let (hdr_len, items) = match parsed {
      Ok(v) => v,
      Err(e) => {
        if plt_len.is_some() && !strict {
          // with a PLT the corrupt packet is skipped and parsing goes on
          event_msg!(mgr, EVT_WARNING, "skipping corrupt packet {}", pktno - 1);
          pos += plt_len.unwrap_or(0) as usize;
          continue;
        }
        tile.truncated = true;
        result = Err(e);
        break;
      }
    };
    match headers {
      Some(_) => hdr_pos += hdr_len,
      None => pos += hdr_len,
    }

    // body: append non-owning chunks in declaration order
    let mut body_len = 0usize;
    let mut truncated_here = false;
    for item in items {
      let comp = &mut tile.comps[pkt.compno as usize];
      let res = &mut comp.resolutions[pkt.resno as usize];
      let band = &mut res.bands[item.bandno];
      let prec = band
        .precincts
        .get_mut(&item.precno)
        .expect("precinct created during header parse");
      let cblk = &mut prec.cblks[item.cblkno];
      let remaining = data.len().saturating_sub(pos);
      let take = (item.len as usize).min(remaining);
      if take < item.len as usize {
        // signalled length runs past the tile-part
        cblk.corrupt = true;
        tile.truncated = true;
        truncated_here = true;
      }
      if store && !cblk.skip && take > 0 {
        let seg = &mut cblk.segs[item.segno];
        seg.chunks.push((pos as u32, take as u32));
      }
      pos += take;
      body_len += item.len as usize;
    }
    if truncated_here {
      event_msg!(
        mgr,
        EVT_WARNING,
        "packet {} body runs past the tile-part; affected blocks decode to zero",
        pktno - 1
      );
      if strict {
        result = Err(Error::CorruptPacketData);
        break;
      }
    }

    if let Some(expect) = plt_len {
      let actual = match headers {
        Some(_) => body_len,
        None => hdr_len + body_len,
      };
      if actual != expect as usize {
        event_msg!(
          mgr,
          EVT_WARNING,
          "packet {} length {} disagrees with PLT entry {}; parsed length wins",
          pktno - 1,
          actual,
          expect
        );
      }
    }
  }
  tile.compressed = data;
  if strict {
    result
  } else {
    Ok(())
  }
}

/// Parse one packet header, creating precinct state on first touch.
/// Returns the consumed byte count and the body items in order.
fn parse_packet(
  tile: &mut Tile<CblkDec>,
  tcp: &Tcp,
  pkt: &PiPacket,
  src: &[u8],
  skip_blocks: bool,
) -> Result<(usize, Vec<BodyItem>)> {
  let tccp = &tcp.tccps[pkt.compno as usize];
  let is_ht = tcp.is_ht || tccp.cblk_sty.contains(CblkStyle::HT);
  let mut off = 0usize;
  if tcp.csty & CSTY_SOP != 0 && src.len() >= 6 && src[0..2] == SOP_MARKER {
    off += 6;
  }
  let mut bio = BitReader::new(&src[off..]);
  let mut items = Vec::new();
  let present = bio.getbit()? != 0;
  if present {
    let comp = &mut tile.comps[pkt.compno as usize];
    let res = &mut comp.resolutions[pkt.resno as usize];
    for (bandno, band) in res.bands.iter_mut().enumerate() {
      if band.is_empty() {
        continue;
      }
      let band_numbps = band.numbps;
      let prec = band.precinct_entry(pkt.precno, &|rect| CblkDec {
        rect,
        ..Default::default()
      });
      let incltree = &mut prec.incltree;
      let imsbtree = &mut prec.imsbtree;
      for (cblkno, cblk) in prec.cblks.iter_mut().enumerate() {
        let included;
        if !cblk.included {
          included = incltree.decode(&mut bio, cblkno as u32, pkt.layno as i32 + 1)?;
        } else {
          included = bio.getbit()? != 0;
        }
        if !included {
          continue;
        }
        if !cblk.included {
          // first inclusion: zero bit-plane count, tested upward
          let mut k = 0u32;
          while !imsbtree.decode(&mut bio, cblkno as u32, k as i32 + 1)? {
            k += 1;
            if k > MAX_BIT_PLANES {
              return Err(Error::CorruptPacketHeader("zero bit-plane runaway"));
            }
          }
          if k > band_numbps {
            return Err(Error::CorruptPacketHeader("more zero planes than bit-planes"));
          }
          cblk.included = true;
          cblk.numbps = band_numbps - k;
          cblk.numlenbits = 3;
          cblk.skip = skip_blocks;
        }
        let mut numpasses = bio.getnumpasses()?;
        let increment = bio.getcommacode()?;
        cblk.numlenbits += increment;
        if cblk.numlenbits > 32 {
          return Err(Error::CorruptPacketHeader("length bits out of range"));
        }
        // distribute the new passes over codeword segments
        while numpasses > 0 {
          let need_new = match cblk.segs.last() {
            Some(seg) => seg.numpasses >= seg.maxpasses,
            None => true,
          };
          if need_new {
            let maxpasses = if is_ht {
              1
            } else {
              t1::seg_max_passes(tccp.cblk_sty, cblk.numpasses)
            };
            cblk.segs.push(SegDec {
              numpasses: 0,
              maxpasses,
              len: 0,
              chunks: Default::default(),
            });
          }
          let segno = cblk.segs.len() - 1;
          let seg = &mut cblk.segs[segno];
          let np = numpasses.min(seg.maxpasses - seg.numpasses);
          let bits = cblk.numlenbits + uint_floorlog2(np);
          if bits > 32 {
            return Err(Error::CorruptPacketHeader("segment length bits out of range"));
          }
          let len = bio.read(bits)?;
          seg.numpasses += np;
          seg.len += len;
          cblk.numpasses += np;
          numpasses -= np;
          items.push(BodyItem {
            bandno,
            precno: pkt.precno,
            cblkno,
            segno,
            len,
          });
        }
      }
    }
  }
  bio.inalign()?;
  off += bio.bytes_read();
  if tcp.csty & CSTY_EPH != 0 {
    if src.len() >= off + 2 && src[off..off + 2] == EPH_MARKER {
      off += 2;
    } else {
      return Err(Error::CorruptPacketHeader("missing EPH marker"));
    }
  }
  Ok((off, items))
}

#[cfg(test)]
mod tests {
  // packet coding is exercised end to end through the code-stream tests;
  // the parts with subtle bit-level state get targeted coverage here
  use super::*;

  #[test]
  fn sop_and_eph_are_fixed_markers() {
    assert_eq!(SOP_MARKER, [0xff, 0x91]);
    assert_eq!(EPH_MARKER, [0xff, 0x92]);
  }
}
