//! Coding-parameter model: everything the markers configure.
//!
//! `CodingParams` lives for the life of a code-stream; each tile has a
//! `Tcp` whose tile-part markers may override the main-header values, and
//! each component within a tile a `Tccp`.

use std::collections::VecDeque;

use crate::consts::*;
use crate::math::Rect32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
  Lrcp,
  Rlcp,
  Rpcl,
  Pcrl,
  Cprl,
}

impl Default for ProgressionOrder {
  fn default() -> Self {
    ProgressionOrder::Lrcp
  }
}

impl ProgressionOrder {
  pub fn from_u8(v: u8) -> Option<Self> {
    match v {
      0 => Some(Self::Lrcp),
      1 => Some(Self::Rlcp),
      2 => Some(Self::Rpcl),
      3 => Some(Self::Pcrl),
      4 => Some(Self::Cprl),
      _ => None,
    }
  }

  pub fn as_u8(&self) -> u8 {
    match self {
      Self::Lrcp => 0,
      Self::Rlcp => 1,
      Self::Rpcl => 2,
      Self::Pcrl => 3,
      Self::Cprl => 4,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Lrcp => "LRCP",
      Self::Rlcp => "RLCP",
      Self::Rpcl => "RPCL",
      Self::Pcrl => "PCRL",
      Self::Cprl => "CPRL",
    }
  }
}

/// Quantization step size for one subband.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepSize {
  pub expn: u32,
  pub mant: u32,
}

/// One progression change from a POC marker.
#[derive(Debug, Clone, Copy)]
pub struct Poc {
  pub resno0: u32,
  pub compno0: u32,
  pub layno1: u32,
  pub resno1: u32,
  pub compno1: u32,
  pub prg: ProgressionOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MctMode {
  None,
  /// Standard RCT/ICT over the first three components.
  Array,
  /// Arbitrary matrix signalled by MCT/MCC markers.
  Custom,
}

impl Default for MctMode {
  fn default() -> Self {
    MctMode::None
  }
}

/// Tile-component coding parameters (COD/COC + QCD/QCC + RGN scope).
#[derive(Debug, Clone)]
pub struct Tccp {
  /// Component coding style; bit 0 means explicit precinct sizes.
  pub csty: u8,
  pub numresolutions: u32,
  /// log2 code-block width/height, in [2, 10], summing to at most 12.
  pub cblkw: u32,
  pub cblkh: u32,
  pub cblk_sty: CblkStyle,
  /// 1 = reversible 5/3, 0 = irreversible 9/7.
  pub qmfbid: u32,
  /// Per-resolution log2 precinct sizes.
  pub prcw_exp: [u32; MAX_RESOLUTIONS],
  pub prch_exp: [u32; MAX_RESOLUTIONS],
  pub qntsty: u8,
  pub numgbits: u32,
  pub stepsizes: [StepSize; MAX_BANDS],
  pub roishift: i32,
  pub dc_level_shift: i32,
}

impl Default for Tccp {
  fn default() -> Self {
    Self {
      csty: 0,
      numresolutions: 6,
      cblkw: 6,
      cblkh: 6,
      cblk_sty: CblkStyle::empty(),
      qmfbid: 1,
      prcw_exp: [DEFAULT_PRECINCT_EXP; MAX_RESOLUTIONS],
      prch_exp: [DEFAULT_PRECINCT_EXP; MAX_RESOLUTIONS],
      qntsty: QNTSTY_NOQNT,
      numgbits: 2,
      stepsizes: [StepSize::default(); MAX_BANDS],
      roishift: 0,
      dc_level_shift: 0,
    }
  }
}

/// Tile coding parameters.
#[derive(Debug, Clone, Default)]
pub struct Tcp {
  /// Scod coding style (precincts / SOP / EPH bits).
  pub csty: u8,
  pub prg: ProgressionOrder,
  pub numlayers: u32,
  pub mct: MctMode,
  /// Per-layer target compression ratios; 0 means "include everything".
  pub rates: Vec<f64>,
  pub pocs: Vec<Poc>,
  pub tccps: Vec<Tccp>,
  pub is_ht: bool,

  /// Custom MCT stage: row-major `numcomps x numcomps` matrices plus the
  /// per-stage offsets (the standard attaches offsets to the stage, not
  /// to components).
  pub mct_decoding_matrix: Option<Vec<f32>>,
  pub mct_encoding_matrix: Option<Vec<f32>>,
  pub mct_offsets: Option<Vec<i32>>,

  /// Packed packet headers from PPT marker segments, per Zppt index.
  pub ppt_markers: Vec<(u8, Vec<u8>)>,
  /// Merged PPT payload, consumed by the packet parser.
  pub ppt_data: Vec<u8>,
  pub ppt: bool,

  /// Decoder bookkeeping.
  pub cod_seen: bool,
  pub qcd_seen: bool,
  pub num_tile_parts_read: u32,
  /// TNsot when non-zero.
  pub expected_tile_parts: u32,
}

impl Tcp {
  pub fn new(numcomps: usize) -> Self {
    Self {
      numlayers: 1,
      tccps: vec![Tccp::default(); numcomps],
      ..Default::default()
    }
  }

  /// Merge accumulated PPT marker segments in Zppt order.
  pub fn merge_ppt(&mut self) {
    if self.ppt_markers.is_empty() {
      return;
    }
    self.ppt_markers.sort_by_key(|(z, _)| *z);
    let mut data = Vec::new();
    for (_, chunk) in self.ppt_markers.drain(..) {
      data.extend_from_slice(&chunk);
    }
    self.ppt_data = data;
    self.ppt = true;
  }
}

/// Whole code-stream coding parameters.
#[derive(Debug, Clone, Default)]
pub struct CodingParams {
  /// Tile grid origin and nominal tile size on the canvas.
  pub tx0: u32,
  pub ty0: u32,
  pub tdx: u32,
  pub tdy: u32,
  /// Tile grid dimensions.
  pub tw: u32,
  pub th: u32,
  pub rsiz: u16,
  pub tcps: Vec<Tcp>,

  /// Packed packet headers from the main header, per Zppm index.
  pub ppm_markers: Vec<(u8, Vec<u8>)>,
  /// Split PPM entries; each SOD with PPM active consumes the next one.
  pub ppm_entries: VecDeque<Vec<u8>>,
  pub ppm: bool,

  /// Encoder options.
  pub comment: Option<String>,
  pub write_tlm: bool,
  pub write_plt: bool,
}

impl CodingParams {
  pub fn num_tiles(&self) -> u32 {
    self.tw * self.th
  }

  /// Canvas rectangle of tile `(p, q)` clipped to the image area.
  pub fn tile_rect(&self, image: Rect32, p: u32, q: u32) -> Rect32 {
    let tx0 = (self.tx0 + p * self.tdx).max(image.x0);
    let ty0 = (self.ty0 + q * self.tdy).max(image.y0);
    let tx1 = (self.tx0 + (p + 1) * self.tdx).min(image.x1);
    let ty1 = (self.ty0 + (q + 1) * self.tdy).min(image.y1);
    Rect32::new(tx0, ty0, tx1, ty1)
  }

  pub fn is_ht(&self) -> bool {
    self.rsiz & PROFILE_HT != 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
  /// Release tile and block buffers as soon as a tile is done.
  None,
  ImagesOnly,
  /// Retain everything for random single-tile access.
  All,
}

impl Default for CacheStrategy {
  fn default() -> Self {
    CacheStrategy::None
  }
}

/// Decode-side options.
#[derive(Debug, Clone, Default)]
pub struct DecodeParameters {
  /// Discard this many of the top resolutions.
  pub reduce: u32,
  /// Cap on quality layers to decode; 0 means all.
  pub layers: u32,
  /// Decode window on the canvas grid.
  pub window: Option<Rect32>,
  /// Fail on recoverable defects instead of warning.
  pub strict: bool,
  pub cache: CacheStrategy,
  /// Worker threads; 0 or 1 runs inline.
  pub num_threads: usize,
}

/// Arbitrary-matrix multi-component transform stage.
#[derive(Debug, Clone)]
pub struct CustomMct {
  /// Row-major `numcomps x numcomps` forward matrix.
  pub encode_matrix: Vec<f32>,
  /// Row-major inverse matrix, signalled in the code-stream.
  pub decode_matrix: Vec<f32>,
  /// Per-stage offsets applied before the forward matrix.
  pub offsets: Vec<i32>,
}

/// Encode-side options.
#[derive(Debug, Clone)]
pub struct EncodeParameters {
  pub num_resolutions: u32,
  /// log2 code-block dimensions.
  pub cblkw_exp: u32,
  pub cblkh_exp: u32,
  pub prog: ProgressionOrder,
  pub numlayers: u32,
  /// Per-layer compression ratios (1.0 or 0.0 = lossless/everything).
  pub rates: Vec<f64>,
  /// 9/7 + ICT instead of 5/3 + RCT.
  pub irreversible: bool,
  /// Apply the multi-component transform when three colour components
  /// are present.
  pub mct: bool,
  /// Arbitrary-matrix MCT stage; overrides `mct` when set.
  pub custom_mct: Option<CustomMct>,
  /// Tile size on the canvas; `None` makes the whole image one tile.
  pub tile_size: Option<(u32, u32)>,
  pub tile_origin: (u32, u32),
  /// Explicit per-resolution precinct exponents, lowest resolution first.
  pub precincts: Option<Vec<(u32, u32)>>,
  pub cblk_style: CblkStyle,
  pub roishift: i32,
  pub guard_bits: u32,
  pub progression_changes: Vec<Poc>,
  pub sop: bool,
  pub eph: bool,
  pub comment: Option<String>,
  pub write_tlm: bool,
  pub write_plt: bool,
  pub rsiz: u16,
  /// Worker threads; 0 or 1 runs inline.
  pub num_threads: usize,
}

impl Default for EncodeParameters {
  fn default() -> Self {
    Self {
      num_resolutions: 6,
      cblkw_exp: 6,
      cblkh_exp: 6,
      prog: ProgressionOrder::Lrcp,
      numlayers: 1,
      rates: Vec::new(),
      irreversible: false,
      mct: true,
      custom_mct: None,
      tile_size: None,
      tile_origin: (0, 0),
      precincts: None,
      cblk_style: CblkStyle::empty(),
      roishift: 0,
      guard_bits: 2,
      progression_changes: Vec::new(),
      sop: false,
      eph: false,
      comment: None,
      write_tlm: false,
      write_plt: false,
      rsiz: PROFILE_NONE,
      num_threads: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tile_rect_clips_to_image() {
    let cp = CodingParams {
      tx0: 0,
      ty0: 0,
      tdx: 64,
      tdy: 64,
      tw: 2,
      th: 2,
      ..Default::default()
    };
    let image = Rect32::new(0, 0, 100, 70);
    assert_eq!(cp.tile_rect(image, 0, 0), Rect32::new(0, 0, 64, 64));
    assert_eq!(cp.tile_rect(image, 1, 1), Rect32::new(64, 64, 100, 70));
  }

  #[test]
  fn ppt_merge_order() {
    let mut tcp = Tcp::new(1);
    tcp.ppt_markers.push((1, vec![3, 4]));
    tcp.ppt_markers.push((0, vec![1, 2]));
    tcp.merge_ppt();
    assert_eq!(tcp.ppt_data, vec![1, 2, 3, 4]);
    assert!(tcp.ppt);
  }
}
