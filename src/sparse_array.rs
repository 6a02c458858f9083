/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
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

use crate::error::{Error, Result};
use crate::math::{uint_ceildiv, Rect32};

/// Chunked 2-D i32 array with lazy block allocation.
///
/// Backs region-of-interest decode: only the blocks a decode window
/// actually touches are ever materialised, everything else reads as zero
/// (forgiving) or trips [`Error::MissingSparseBlock`].
#[derive(Debug, Clone)]
pub struct SparseArray {
  pub width: u32,
  pub height: u32,
  pub block_width: u32,
  pub block_height: u32,
  block_count_hor: u32,
  block_count_ver: u32,
  blocks: Vec<Option<Vec<i32>>>,
}

impl SparseArray {
  pub fn new(width: u32, height: u32, block_width: u32, block_height: u32) -> Result<Self> {
    if width == 0 || height == 0 || block_width == 0 || block_height == 0 {
      return Err(Error::InvalidParameter("sparse array dimensions"));
    }
    let block_count_hor = uint_ceildiv(width, block_width);
    let block_count_ver = uint_ceildiv(height, block_height);
    let total = block_count_hor
      .checked_mul(block_count_ver)
      .ok_or(Error::OutOfMemory)? as usize;
    Ok(Self {
      width,
      height,
      block_width,
      block_height,
      block_count_hor,
      block_count_ver,
      blocks: vec![None; total],
    })
  }

  fn block_index(&self, bx: u32, by: u32) -> usize {
    (by * self.block_count_hor + bx) as usize
  }

  fn is_region_valid(&self, area: &Rect32) -> bool {
    !(area.x0 >= self.width
      || area.x1 <= area.x0
      || area.x1 > self.width
      || area.y0 >= self.height
      || area.y1 <= area.y0
      || area.y1 > self.height)
  }

  /// Whether every block the region touches has been written.
  pub fn is_region_allocated(&self, area: &Rect32) -> bool {
    if !self.is_region_valid(area) {
      return false;
    }
    let bx0 = area.x0 / self.block_width;
    let bx1 = (area.x1 - 1) / self.block_width;
    let by0 = area.y0 / self.block_height;
    let by1 = (area.y1 - 1) / self.block_height;
    for by in by0..=by1 {
      for bx in bx0..=bx1 {
        if self.blocks[self.block_index(bx, by)].is_none() {
          return false;
        }
      }
    }
    true
  }

  pub fn read(
    &self,
    area: &Rect32,
    dest: &mut [i32],
    dest_col_stride: u32,
    dest_line_stride: u32,
    forgiving: bool,
  ) -> Result<()> {
    if !self.is_region_valid(area) {
      return if forgiving {
        Ok(())
      } else {
        Err(Error::InvalidParameter("sparse read outside bounds"))
      };
    }
    let bw = self.block_width;
    let bh = self.block_height;
    let mut y = area.y0;
    let mut block_y = area.y0 / bh;
    while y < area.y1 {
      let block_y_offset = if y == area.y0 { area.y0 % bh } else { 0 };
      let y_incr = (bh - block_y_offset).min(area.y1 - y);
      let mut x = area.x0;
      let mut block_x = area.x0 / bw;
      while x < area.x1 {
        let block_x_offset = if x == area.x0 { area.x0 % bw } else { 0 };
        let x_incr = (bw - block_x_offset).min(area.x1 - x);
        let block = &self.blocks[self.block_index(block_x, block_y)];
        match block {
          Some(data) => {
            for row in 0..y_incr {
              let src_base = ((block_y_offset + row) * bw + block_x_offset) as usize;
              let dst_base = ((y + row - area.y0) * dest_line_stride
                + (x - area.x0) * dest_col_stride) as usize;
              for k in 0..x_incr as usize {
                dest[dst_base + k * dest_col_stride as usize] = data[src_base + k];
              }
            }
          }
          None if forgiving => {
            for row in 0..y_incr {
              let dst_base = ((y + row - area.y0) * dest_line_stride
                + (x - area.x0) * dest_col_stride) as usize;
              for k in 0..x_incr as usize {
                dest[dst_base + k * dest_col_stride as usize] = 0;
              }
            }
          }
          None => return Err(Error::MissingSparseBlock),
        }
        block_x += 1;
        x += x_incr;
      }
      block_y += 1;
      y += y_incr;
    }
    Ok(())
  }

  pub fn write(
    &mut self,
    area: &Rect32,
    src: &[i32],
    src_col_stride: u32,
    src_line_stride: u32,
    forgiving: bool,
  ) -> Result<()> {
    if !self.is_region_valid(area) {
      return if forgiving {
        Ok(())
      } else {
        Err(Error::InvalidParameter("sparse write outside bounds"))
      };
    }
    let bw = self.block_width;
    let bh = self.block_height;
    let mut y = area.y0;
    let mut block_y = area.y0 / bh;
    while y < area.y1 {
      let block_y_offset = if y == area.y0 { area.y0 % bh } else { 0 };
      let y_incr = (bh - block_y_offset).min(area.y1 - y);
      let mut x = area.x0;
      let mut block_x = area.x0 / bw;
      while x < area.x1 {
        let block_x_offset = if x == area.x0 { area.x0 % bw } else { 0 };
        let x_incr = (bw - block_x_offset).min(area.x1 - x);
        let index = self.block_index(block_x, block_y);
        let data = self.blocks[index].get_or_insert_with(|| vec![0i32; (bw * bh) as usize]);
        for row in 0..y_incr {
          let dst_base = ((block_y_offset + row) * bw + block_x_offset) as usize;
          let src_base =
            ((y + row - area.y0) * src_line_stride + (x - area.x0) * src_col_stride) as usize;
          for k in 0..x_incr as usize {
            data[dst_base + k] = src[src_base + k * src_col_stride as usize];
          }
        }
        block_x += 1;
        x += x_incr;
      }
      block_y += 1;
      y += y_incr;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn write_then_read_round_trip() {
    let mut sa = SparseArray::new(100, 80, 16, 16).unwrap();
    let area = Rect32::new(5, 7, 45, 33);
    let w = area.width() as usize;
    let h = area.height() as usize;
    let src: Vec<i32> = (0..w * h).map(|i| i as i32 - 500).collect();
    sa.write(&area, &src, 1, w as u32, false).unwrap();

    let mut dst = vec![0i32; w * h];
    sa.read(&area, &mut dst, 1, w as u32, false).unwrap();
    assert_eq!(src, dst);
  }

  #[test]
  fn strided_round_trip() {
    let mut sa = SparseArray::new(64, 64, 8, 8).unwrap();
    let area = Rect32::new(0, 0, 10, 10);
    // column stride 2: interleaved plane
    let src: Vec<i32> = (0..200).collect();
    sa.write(&area, &src, 2, 20, false).unwrap();
    let mut dst = vec![0i32; 200];
    sa.read(&area, &mut dst, 2, 20, false).unwrap();
    for y in 0..10 {
      for x in 0..10 {
        assert_eq!(dst[y * 20 + x * 2], src[y * 20 + x * 2]);
      }
    }
  }

  #[test]
  fn forgiving_reads_zero() {
    let mut sa = SparseArray::new(64, 64, 16, 16).unwrap();
    // only touch the top-left block
    let area = Rect32::new(0, 0, 8, 8);
    let src = vec![7i32; 64];
    sa.write(&area, &src, 1, 8, false).unwrap();

    let far = Rect32::new(32, 32, 40, 40);
    let mut dst = vec![-1i32; 64];
    sa.read(&far, &mut dst, 1, 8, true).unwrap();
    assert!(dst.iter().all(|&v| v == 0));

    assert_eq!(sa.read(&far, &mut dst, 1, 8, false), Err(Error::MissingSparseBlock));
  }

  #[test]
  fn region_allocation_query() {
    let mut sa = SparseArray::new(64, 64, 16, 16).unwrap();
    let area = Rect32::new(0, 0, 20, 20);
    assert!(!sa.is_region_allocated(&area));
    let src = vec![1i32; 400];
    sa.write(&area, &src, 1, 20, false).unwrap();
    assert!(sa.is_region_allocated(&area));
  }
}
