/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2005, Herve Drolon, FreeImage Team
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

/// Divide and round up. `b` must be non-zero.
#[inline]
pub(crate) fn uint_ceildiv(a: u32, b: u32) -> u32 {
  (a as u64 + b as u64 - 1).wrapping_div(b as u64) as u32
}

#[inline]
pub(crate) fn uint64_ceildiv(a: u64, b: u64) -> u64 {
  (a + b - 1) / b
}

/// Divide by 2^b and round up.
#[inline]
pub(crate) fn uint_ceildivpow2(a: u32, b: u32) -> u32 {
  ((a as u64 + (1u64 << b) - 1) >> b) as u32
}

#[inline]
pub(crate) fn uint64_ceildivpow2(a: u64, b: u32) -> u64 {
  (a + (1u64 << b) - 1) >> b
}

/// Divide by 2^b and round down.
#[inline]
pub(crate) fn uint_floordivpow2(a: u32, b: u32) -> u32 {
  a >> b
}

#[inline]
pub(crate) fn uint64_floordivpow2(a: u64, b: u32) -> u64 {
  a >> b
}

/// Number of bits needed to represent `a` (0 for 0).
#[inline]
pub(crate) fn uint_floorlog2(a: u32) -> u32 {
  if a == 0 {
    0
  } else {
    31 - a.leading_zeros()
  }
}

/// Multiply two 13-bit fixed point numbers, rounding to nearest.
#[inline]
pub(crate) fn int_fix_mul(a: i32, b: i32) -> i32 {
  let mut temp = a as i64 * b as i64;
  temp += 4096;
  debug_assert!(temp >> 13 <= i32::MAX as i64);
  debug_assert!(temp >> 13 >= i32::MIN as i64);
  (temp >> 13) as i32
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Point32 {
  pub x: u32,
  pub y: u32,
}

impl Point32 {
  pub fn new(x: u32, y: u32) -> Self {
    Self { x, y }
  }
}

/// Horizontal interval `[x0, x1)`, used for interleaving bounds in the
/// wavelet kernels.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Line32 {
  pub x0: u32,
  pub x1: u32,
}

impl Line32 {
  pub fn new(x0: u32, x1: u32) -> Self {
    Self { x0, x1 }
  }

  pub fn length(&self) -> u32 {
    self.x1.saturating_sub(self.x0)
  }
}

/// Half-open rectangle `[x0, x1) x [y0, y1)` on the canvas reference grid.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Rect32 {
  pub x0: u32,
  pub y0: u32,
  pub x1: u32,
  pub y1: u32,
}

impl Rect32 {
  pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
    Self { x0, y0, x1, y1 }
  }

  pub fn width(&self) -> u32 {
    self.x1.saturating_sub(self.x0)
  }

  pub fn height(&self) -> u32 {
    self.y1.saturating_sub(self.y0)
  }

  pub fn area(&self) -> u64 {
    self.width() as u64 * self.height() as u64
  }

  pub fn is_empty(&self) -> bool {
    self.x0 >= self.x1 || self.y0 >= self.y1
  }

  pub fn contains(&self, p: Point32) -> bool {
    p.x >= self.x0 && p.x < self.x1 && p.y >= self.y0 && p.y < self.y1
  }

  pub fn intersection(&self, other: &Rect32) -> Rect32 {
    let r = Rect32 {
      x0: self.x0.max(other.x0),
      y0: self.y0.max(other.y0),
      x1: self.x1.min(other.x1),
      y1: self.y1.min(other.y1),
    };
    if r.is_empty() {
      Rect32::default()
    } else {
      r
    }
  }

  pub fn union(&self, other: &Rect32) -> Rect32 {
    if self.is_empty() {
      return *other;
    }
    if other.is_empty() {
      return *self;
    }
    Rect32 {
      x0: self.x0.min(other.x0),
      y0: self.y0.min(other.y0),
      x1: self.x1.max(other.x1),
      y1: self.y1.max(other.y1),
    }
  }

  /// Expand by `n` on every side, saturating at zero.
  pub fn grow(&self, n: u32) -> Rect32 {
    Rect32 {
      x0: self.x0.saturating_sub(n),
      y0: self.y0.saturating_sub(n),
      x1: self.x1.saturating_add(n),
      y1: self.y1.saturating_add(n),
    }
  }

  /// Project onto a subsampled grid: ceil-divide every edge by (dx, dy).
  pub fn rectceildiv(&self, dx: u32, dy: u32) -> Rect32 {
    Rect32 {
      x0: uint_ceildiv(self.x0, dx),
      y0: uint_ceildiv(self.y0, dy),
      x1: uint_ceildiv(self.x1, dx),
      y1: uint_ceildiv(self.y1, dy),
    }
  }

  /// Project onto the grid of a resolution `n` levels down.
  pub fn rectceildivpow2(&self, n: u32) -> Rect32 {
    Rect32 {
      x0: uint_ceildivpow2(self.x0, n),
      y0: uint_ceildivpow2(self.y0, n),
      x1: uint_ceildivpow2(self.x1, n),
      y1: uint_ceildivpow2(self.y1, n),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ceildiv() {
    assert_eq!(uint_ceildiv(0, 3), 0);
    assert_eq!(uint_ceildiv(1, 3), 1);
    assert_eq!(uint_ceildiv(3, 3), 1);
    assert_eq!(uint_ceildiv(4, 3), 2);
    assert_eq!(uint_ceildivpow2(17, 3), 3);
    assert_eq!(uint_floordivpow2(17, 3), 2);
  }

  #[test]
  fn floorlog2() {
    assert_eq!(uint_floorlog2(1), 0);
    assert_eq!(uint_floorlog2(2), 1);
    assert_eq!(uint_floorlog2(3), 1);
    assert_eq!(uint_floorlog2(1024), 10);
  }

  #[test]
  fn rect_ops() {
    let a = Rect32::new(0, 0, 16, 16);
    let b = Rect32::new(8, 8, 32, 32);
    assert_eq!(a.intersection(&b), Rect32::new(8, 8, 16, 16));
    assert_eq!(a.union(&b), Rect32::new(0, 0, 32, 32));
    assert_eq!(a.area(), 256);
    assert!(a.contains(Point32::new(15, 0)));
    assert!(!a.contains(Point32::new(16, 0)));
    assert_eq!(Rect32::new(3, 5, 9, 9).rectceildivpow2(1), Rect32::new(2, 3, 5, 5));
    assert!(b.intersection(&Rect32::new(0, 0, 4, 4)).is_empty());
  }
}
