/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
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

use crate::error::{Error, Result};
use crate::math::{uint_ceildiv, Rect32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
  /// Not specified in the code-stream.
  Unknown,
  Srgb,
  Gray,
  /// YCbCr as produced by the multi-component transform.
  Sycc,
  Eycc,
  Cmyk,
  Cie,
}

impl Default for ColorSpace {
  fn default() -> Self {
    ColorSpace::Unknown
  }
}

/// Parameters used to create an image component.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageComponentParams {
  pub dx: u32,
  pub dy: u32,
  pub w: u32,
  pub h: u32,
  pub x0: u32,
  pub y0: u32,
  pub prec: u32,
  pub sgnd: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ImageComponent {
  /// Subsampling factors with respect to the canvas grid.
  pub dx: u32,
  pub dy: u32,
  /// Extent of the component data, already subsampled.
  pub w: u32,
  pub h: u32,
  pub x0: u32,
  pub y0: u32,
  pub prec: u32,
  pub sgnd: bool,
  /// Highest resolution actually decoded for this component.
  pub resno_decoded: u32,
  /// 2^factor canvas pixels per decoded pixel (resolution reduction).
  pub factor: u32,
  pub alpha: bool,
  data: Option<Vec<i32>>,
}

impl ImageComponent {
  /// Copy the properties, not the data.
  pub fn copy_props(&mut self, other: &ImageComponent) {
    self.data = None;
    self.dx = other.dx;
    self.dy = other.dy;
    self.w = other.w;
    self.h = other.h;
    self.x0 = other.x0;
    self.y0 = other.y0;
    self.prec = other.prec;
    self.sgnd = other.sgnd;
    self.resno_decoded = other.resno_decoded;
    self.factor = other.factor;
    self.alpha = other.alpha;
  }

  pub fn alloc_data(&mut self) -> Result<()> {
    let len = (self.w as usize)
      .checked_mul(self.h as usize)
      .ok_or(Error::OutOfMemory)?;
    match &mut self.data {
      Some(data) if data.len() == len => data.iter_mut().for_each(|v| *v = 0),
      _ => self.data = Some(vec![0i32; len]),
    }
    Ok(())
  }

  pub fn clear_data(&mut self) {
    self.data = None;
  }

  pub fn data(&self) -> Option<&[i32]> {
    self.data.as_deref()
  }

  pub fn data_mut(&mut self) -> Option<&mut [i32]> {
    self.data.as_deref_mut()
  }

  pub fn set_data(&mut self, data: Vec<i32>) -> Result<()> {
    if data.len() != self.w as usize * self.h as usize {
      return Err(Error::InvalidParameter("component data size"));
    }
    self.data = Some(data);
    Ok(())
  }

  pub fn take_data(&mut self) -> Option<Vec<i32>> {
    self.data.take()
  }

  /// Clip sample values to the representable range for `precision`.
  pub fn clip(&mut self, precision: u32) {
    let signed = self.sgnd;
    if let Some(data) = self.data_mut() {
      let (min, max) = sample_range(precision, signed);
      for v in data.iter_mut() {
        *v = (*v).max(min).min(max);
      }
    }
  }
}

/// Allowed sample range: `[-(2^(p-1)), 2^(p-1)-1]` signed, `[0, 2^p-1]`
/// unsigned.
pub(crate) fn sample_range(precision: u32, signed: bool) -> (i32, i32) {
  let precision = precision.min(31);
  if signed {
    let max = (1i64 << (precision - 1)) - 1;
    ((-max - 1) as i32, max as i32)
  } else {
    (0, ((1i64 << precision) - 1) as i32)
  }
}

#[derive(Debug, Default, Clone)]
pub struct Image {
  /// Canvas bounds on the reference grid.
  pub x0: u32,
  pub y0: u32,
  pub x1: u32,
  pub y1: u32,
  pub color_space: ColorSpace,
  pub comps: Vec<ImageComponent>,
}

impl Image {
  pub fn new(
    canvas: Rect32,
    color_space: ColorSpace,
    comp_params: &[ImageComponentParams],
  ) -> Result<Self> {
    if comp_params.is_empty() {
      return Err(Error::InvalidParameter("an image needs at least one component"));
    }
    let comps = comp_params
      .iter()
      .map(|p| ImageComponent {
        dx: p.dx,
        dy: p.dy,
        w: p.w,
        h: p.h,
        x0: p.x0,
        y0: p.y0,
        prec: p.prec,
        sgnd: p.sgnd,
        ..Default::default()
      })
      .collect();
    Ok(Self {
      x0: canvas.x0,
      y0: canvas.y0,
      x1: canvas.x1,
      y1: canvas.y1,
      color_space,
      comps,
    })
  }

  pub fn numcomps(&self) -> u32 {
    self.comps.len() as u32
  }

  pub fn canvas(&self) -> Rect32 {
    Rect32::new(self.x0, self.y0, self.x1, self.y1)
  }

  /// Derive every component's extent from the canvas and its subsampling.
  pub fn update_component_bounds(&mut self) {
    let canvas = self.canvas();
    for comp in &mut self.comps {
      comp.x0 = uint_ceildiv(canvas.x0, comp.dx);
      comp.y0 = uint_ceildiv(canvas.y0, comp.dy);
      comp.w = uint_ceildiv(canvas.x1, comp.dx).saturating_sub(comp.x0);
      comp.h = uint_ceildiv(canvas.y1, comp.dy).saturating_sub(comp.y0);
    }
  }

  /// Allocate all component planes.
  pub fn alloc_data(&mut self) -> Result<()> {
    for comp in &mut self.comps {
      comp.alloc_data()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn component_bounds_follow_subsampling() {
    let mut image = Image::new(
      Rect32::new(1, 1, 17, 9),
      ColorSpace::Gray,
      &[ImageComponentParams {
        dx: 2,
        dy: 2,
        prec: 8,
        ..Default::default()
      }],
    )
    .unwrap();
    image.update_component_bounds();
    let c = &image.comps[0];
    assert_eq!((c.x0, c.y0), (1, 1));
    assert_eq!((c.w, c.h), (8, 4));
  }

  #[test]
  fn clip_limits() {
    assert_eq!(sample_range(8, false), (0, 255));
    assert_eq!(sample_range(8, true), (-128, 127));
    let mut comp = ImageComponent {
      w: 2,
      h: 1,
      prec: 8,
      sgnd: false,
      ..Default::default()
    };
    comp.set_data(vec![-5, 300]).unwrap();
    comp.clip(8);
    assert_eq!(comp.data().unwrap(), &[0, 255]);
  }
}
