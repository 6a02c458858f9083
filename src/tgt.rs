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

use crate::bio::{BitReader, BitWriter};
use crate::error::Result;

const NONE: u32 = u32::MAX;
/// Sentinel for "value not set yet"; larger than any signallable level.
const UNSET: i32 = 999;

#[derive(Debug, Clone)]
struct TagNode {
  parent: u32,
  value: i32,
  low: i32,
  known: bool,
}

impl Default for TagNode {
  fn default() -> Self {
    Self {
      parent: NONE,
      value: UNSET,
      low: 0,
      known: false,
    }
  }
}

/// Layered quadtree for inclusion and zero-bit-plane signalling.
///
/// One node per cell per level; leaves first, each level linked to the
/// 2x2-reduced level above it. The `low` bound is what the coder has
/// already communicated and is monotonically non-decreasing.
#[derive(Debug, Default, Clone)]
pub struct TagTree {
  numleafsh: u32,
  numleafsv: u32,
  nodes: Vec<TagNode>,
}

impl TagTree {
  pub fn new(numleafsh: u32, numleafsv: u32) -> Self {
    let mut tree = Self::default();
    tree.init(numleafsh, numleafsv);
    tree
  }

  /// Resize for a new leaf grid, reusing the allocation, and reset.
  pub fn init(&mut self, numleafsh: u32, numleafsv: u32) {
    if self.numleafsh != numleafsh || self.numleafsv != numleafsv || self.nodes.is_empty() {
      self.numleafsh = numleafsh;
      self.numleafsv = numleafsv;
      self.nodes.clear();
      if numleafsh == 0 || numleafsv == 0 {
        return;
      }
      // level dimensions, halving up to the single root
      let mut dims = vec![(numleafsh, numleafsv)];
      while dims.last().map(|&(w, h)| w * h > 1).unwrap_or(false) {
        let (w, h) = *dims.last().unwrap_or(&(1, 1));
        dims.push(((w + 1) / 2, (h + 1) / 2));
      }
      let mut level_base = Vec::with_capacity(dims.len());
      let mut total = 0u32;
      for &(w, h) in &dims {
        level_base.push(total);
        total += w * h;
      }
      self.nodes = vec![TagNode::default(); total as usize];
      for (lvl, &(w, h)) in dims.iter().enumerate() {
        if lvl + 1 == dims.len() {
          break;
        }
        let (nw, _) = dims[lvl + 1];
        for j in 0..h {
          for i in 0..w {
            let node = level_base[lvl] + j * w + i;
            let parent = level_base[lvl + 1] + (j / 2) * nw + i / 2;
            self.nodes[node as usize].parent = parent;
          }
        }
      }
    }
    self.reset();
  }

  pub fn reset(&mut self) {
    for node in &mut self.nodes {
      node.value = UNSET;
      node.low = 0;
      node.known = false;
    }
  }

  /// Lower a leaf's value; ancestors track the minimum of their children.
  pub fn set_value(&mut self, leafno: u32, value: i32) {
    let mut node = leafno;
    while node != NONE && self.nodes[node as usize].value > value {
      self.nodes[node as usize].value = value;
      node = self.nodes[node as usize].parent;
    }
  }

  fn path_to_root(&self, leafno: u32) -> Vec<u32> {
    let mut path = Vec::with_capacity(8);
    let mut node = leafno;
    while node != NONE {
      path.push(node);
      node = self.nodes[node as usize].parent;
    }
    path
  }

  /// Emit one bit per level per threshold step until the known bound
  /// reaches `threshold` on the leaf-to-root path.
  pub fn encode(&mut self, bio: &mut BitWriter, leafno: u32, threshold: i32) {
    let path = self.path_to_root(leafno);
    let mut low = 0i32;
    for &idx in path.iter().rev() {
      let node = &mut self.nodes[idx as usize];
      if low > node.low {
        node.low = low;
      } else {
        low = node.low;
      }
      while low < threshold {
        if low >= node.value {
          if !node.known {
            bio.putbit(1);
            node.known = true;
          }
          break;
        }
        bio.putbit(0);
        low += 1;
      }
      node.low = low;
    }
  }

  /// Symmetric decoder. Returns whether the leaf's value is below the
  /// threshold (i.e. the signalled condition fired).
  pub fn decode(&mut self, bio: &mut BitReader<'_>, leafno: u32, threshold: i32) -> Result<bool> {
    let path = self.path_to_root(leafno);
    let mut low = 0i32;
    for &idx in path.iter().rev() {
      let node = &mut self.nodes[idx as usize];
      if low > node.low {
        node.low = low;
      } else {
        low = node.low;
      }
      while low < threshold && low < node.value {
        if bio.getbit()? != 0 {
          node.value = low;
        } else {
          low += 1;
        }
      }
      node.low = low;
    }
    Ok(self.nodes[leafno as usize].value < threshold)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 4 leaves with values [2, 2, 0, 3], signalled threshold by threshold
  /// in scan order; the decoder must agree at every step.
  #[test]
  fn inclusion_thresholds() {
    let values = [2i32, 2, 0, 3];
    let mut enc = TagTree::new(2, 2);
    for (leaf, &v) in values.iter().enumerate() {
      enc.set_value(leaf as u32, v);
    }
    let mut bio = BitWriter::new();
    for t in 1..=3 {
      for leaf in 0..4 {
        enc.encode(&mut bio, leaf, t);
      }
    }
    let bytes = bio.into_bytes();

    let mut dec = TagTree::new(2, 2);
    let mut r = BitReader::new(&bytes);
    for t in 1..=3 {
      for leaf in 0..4u32 {
        let included = dec.decode(&mut r, leaf, t).unwrap();
        assert_eq!(included, values[leaf as usize] < t, "leaf {} threshold {}", leaf, t);
      }
    }
  }

  #[test]
  fn single_leaf() {
    let mut enc = TagTree::new(1, 1);
    enc.set_value(0, 5);
    let mut bio = BitWriter::new();
    for t in 1..=6 {
      enc.encode(&mut bio, 0, t);
    }
    let bytes = bio.into_bytes();
    let mut dec = TagTree::new(1, 1);
    let mut r = BitReader::new(&bytes);
    for t in 1..=6 {
      assert_eq!(dec.decode(&mut r, 0, t).unwrap(), 5 < t);
    }
  }

  #[test]
  fn wide_tree_round_trip() {
    let w = 5u32;
    let h = 3u32;
    let values: Vec<i32> = (0..w * h).map(|i| (i as i32 * 7) % 5).collect();
    let mut enc = TagTree::new(w, h);
    for (leaf, &v) in values.iter().enumerate() {
      enc.set_value(leaf as u32, v);
    }
    let mut bio = BitWriter::new();
    for t in 1..=5 {
      for leaf in 0..w * h {
        enc.encode(&mut bio, leaf, t);
      }
    }
    let bytes = bio.into_bytes();
    let mut dec = TagTree::new(w, h);
    let mut r = BitReader::new(&bytes);
    for t in 1..=5 {
      for leaf in 0..w * h {
        assert_eq!(dec.decode(&mut r, leaf, t).unwrap(), values[leaf as usize] < t);
      }
    }
  }

  #[test]
  fn init_reuses_and_resets() {
    let mut tree = TagTree::new(4, 4);
    tree.set_value(0, 1);
    tree.init(4, 4);
    let mut bio = BitWriter::new();
    tree.set_value(0, 0);
    tree.encode(&mut bio, 0, 1);
    // value 0 under threshold 1 signals immediately on every level
    assert!(!bio.into_bytes().is_empty());
  }
}
