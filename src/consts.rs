//! Code-stream limits, profile words and per-block style bits.

/// Maximum number of image components (Csiz).
pub const MAX_COMPONENTS: u32 = 16384;
/// Maximum number of resolution levels per component.
pub const MAX_RESOLUTIONS: usize = 32;
/// Maximum number of quality layers.
pub const MAX_LAYERS: u32 = 65535;
/// Maximum number of tiles in the grid.
pub const MAX_NUM_TILES: u32 = 65535;
/// Maximum number of progression changes carried by a POC marker.
pub const MAX_POCS: usize = 32;
/// Highest magnitude bit-plane index that can be signalled.
pub const MAX_BIT_PLANES: u32 = 38;
/// Maximum precision of a component sample.
pub const MAX_PRECISION: u32 = 38;
/// Subband count for the deepest decomposition (3 * 32 + 1).
pub const MAX_BANDS: usize = 3 * MAX_RESOLUTIONS + 1;

/// Code-block exponent bounds: each of cblkw/cblkh in [2,10] and their sum
/// at most 12 (nominal block of at most 4096 samples).
pub const CBLK_EXP_MIN: u32 = 2;
pub const CBLK_EXP_MAX: u32 = 10;
pub const CBLK_EXP_SUM_MAX: u32 = 12;

/// Default scratch size of the buffered stream.
pub const STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Quantization styles (Sqcd/Sqcc low 5 bits).
pub const QNTSTY_NOQNT: u8 = 0;
pub const QNTSTY_SIQNT: u8 = 1;
pub const QNTSTY_SEQNT: u8 = 2;

/// Scod / Scoc coding-style bits.
pub const CSTY_PRECINCTS: u8 = 0x01;
pub const CSTY_SOP: u8 = 0x02;
pub const CSTY_EPH: u8 = 0x04;

/// Default log2 precinct size when none is signalled (maximal precincts).
pub const DEFAULT_PRECINCT_EXP: u32 = 15;

/// `Rsiz` profile words.
pub const PROFILE_NONE: u16 = 0x0000;
pub const PROFILE_CINEMA_2K: u16 = 0x0003;
pub const PROFILE_CINEMA_4K: u16 = 0x0004;
pub const PROFILE_IMF_2K: u16 = 0x0400;
pub const PROFILE_IMF_4K: u16 = 0x0401;
pub const PROFILE_IMF_8K: u16 = 0x0402;
/// Part-2 extension flag (bit 15).
pub const PROFILE_PART2: u16 = 0x8000;
/// Part-15 (high-throughput) capability flag.
pub const PROFILE_HT: u16 = 0x4000;

/// CAP marker: Pcap bit announcing a Part-15 Ccap entry.
pub const PCAP_HT_BIT: u32 = 1 << 17;

/// Number of MQ coder contexts used by the block coder.
pub const T1_NUMCTXS: usize = 19;
/// Context indices.
pub const T1_CTXNO_ZC: u8 = 0;
pub const T1_CTXNO_SC: u8 = 9;
pub const T1_CTXNO_MAG: u8 = 14;
pub const T1_CTXNO_AGG: u8 = 17;
pub const T1_CTXNO_UNI: u8 = 18;

/// Bit-planes coded with the MQ coder before the lazy mode may bypass it.
pub const T1_NUM_NON_BYPASS_PLANES: u32 = 4;

bitflags! {
  /// Code-block style bits (SPcod/SPcoc).
  #[derive(Default)]
  pub struct CblkStyle: u8 {
    /// Selective arithmetic coding bypass.
    const LAZY = 0x01;
    /// Reset context probabilities on each coding pass.
    const RESET = 0x02;
    /// Terminate after each coding pass.
    const TERMALL = 0x04;
    /// Vertically causal context formation.
    const VSC = 0x08;
    /// Predictable termination.
    const PREDTERM = 0x10;
    /// Segmentation symbol at the end of each cleanup pass.
    const SEGMARK = 0x20;
    /// Part-15 high-throughput block coding.
    const HT = 0x40;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn style_bits() {
    let sty = CblkStyle::LAZY | CblkStyle::SEGMARK;
    assert_eq!(sty.bits(), 0x21);
    assert!(!sty.contains(CblkStyle::HT));
  }
}
