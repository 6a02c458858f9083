//! End-to-end code-stream tests: compress with one set of parameters,
//! decompress, and check the reconstruction and the marker layout.

use htj2k::{
  compress, decompress, read_header, ColorSpace, DecodeParameters, EncodeParameters, EventManager,
  Image, ImageComponentParams, Poc, ProgressionOrder, Rect32,
};

fn gray_image(w: u32, h: u32, f: impl Fn(u32, u32) -> i32) -> Image {
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
  image.alloc_data().unwrap();
  let mut data = Vec::with_capacity((w * h) as usize);
  for y in 0..h {
    for x in 0..w {
      data.push(f(x, y));
    }
  }
  image.comps[0].set_data(data).unwrap();
  image
}

fn rgb_image(w: u32, h: u32) -> Image {
  let params = [ImageComponentParams {
    dx: 1,
    dy: 1,
    prec: 8,
    ..Default::default()
  }; 3];
  let mut image = Image::new(Rect32::new(0, 0, w, h), ColorSpace::Srgb, &params).unwrap();
  image.update_component_bounds();
  image.alloc_data().unwrap();
  for (c, comp) in image.comps.iter_mut().enumerate() {
    let data: Vec<i32> = (0..w * h)
      .map(|i| (((i * 31 + c as u32 * 97) % 256) as i32))
      .collect();
    comp.set_data(data).unwrap();
  }
  image
}

fn lossless_params() -> EncodeParameters {
  EncodeParameters::default()
}

fn mse(a: &[i32], b: &[i32]) -> f64 {
  assert_eq!(a.len(), b.len());
  a.iter()
    .zip(b.iter())
    .map(|(x, y)| {
      let d = (x - y) as f64;
      d * d
    })
    .sum::<f64>()
    / a.len() as f64
}

fn psnr(a: &[i32], b: &[i32], peak: f64) -> f64 {
  let m = mse(a, b);
  if m == 0.0 {
    f64::INFINITY
  } else {
    10.0 * (peak * peak / m).log10()
  }
}

/// Walk the marker structure of a code-stream, yielding (id, body).
fn walk_markers(data: &[u8]) -> Vec<(u16, Vec<u8>)> {
  let mut out = Vec::new();
  let rd16 = |o: usize| u16::from_be_bytes([data[o], data[o + 1]]);
  assert_eq!(rd16(0), 0xff4f, "SOC first");
  out.push((0xff4f, Vec::new()));
  let mut pos = 2usize;
  // (offset of the SOT marker, Psot) of the tile-part being walked
  let mut sot: Option<(usize, usize)> = None;
  loop {
    let marker_off = pos;
    let id = rd16(pos);
    pos += 2;
    match id {
      0xffd9 => {
        out.push((id, Vec::new()));
        break;
      }
      0xff93 => {
        let (off, psot) = sot.take().expect("SOD without SOT");
        let end = off + psot;
        out.push((id, data[pos..end].to_vec()));
        pos = end;
      }
      _ => {
        let len = rd16(pos) as usize;
        let body = data[pos + 2..pos + len].to_vec();
        if id == 0xff90 {
          let psot =
            u32::from_be_bytes([body[2], body[3], body[4], body[5]]) as usize;
          sot = Some((marker_off, psot));
        }
        out.push((id, body));
        pos += len;
      }
    }
  }
  out
}

fn plt_packet_count(markers: &[(u16, Vec<u8>)]) -> usize {
  let mut count = 0;
  for (id, body) in markers {
    if *id == 0xff58 {
      // Zplt byte, then one varint per packet
      for &b in &body[1..] {
        if b & 0x80 == 0 {
          count += 1;
        }
      }
    }
  }
  count
}

#[test]
fn minimal_lossless_monochrome() {
  // 16x16, all samples 127, one resolution, one packet
  let image = gray_image(16, 16, |_, _| 127);
  let mut params = lossless_params();
  params.num_resolutions = 1;
  params.cblkw_exp = 4;
  params.cblkh_exp = 4;
  params.write_plt = true;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();

  assert_eq!(&bytes[0..4], &[0xff, 0x4f, 0xff, 0x51]);
  // Csiz and Ssiz inside the SIZ segment
  assert_eq!(&bytes[40..42], &[0, 1]);
  assert_eq!(bytes[42], 7);

  let markers = walk_markers(&bytes);
  assert_eq!(plt_packet_count(&markers), 1, "exactly one packet");

  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn lossless_multi_resolution_gray() {
  let image = gray_image(67, 43, |x, y| ((x * 13 + y * 7) % 256) as i32);
  let mut params = lossless_params();
  params.num_resolutions = 4;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn lossless_rgb_with_rct() {
  let image = rgb_image(32, 32);
  let params = lossless_params();
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  for c in 0..3 {
    assert_eq!(
      out.comps[c].data().unwrap(),
      image.comps[c].data().unwrap(),
      "component {}",
      c
    );
  }
}

#[test]
fn irreversible_path_quality() {
  let image = gray_image(64, 64, |x, y| ((x + y) % 256) as i32);
  let mut params = lossless_params();
  params.irreversible = true;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  let p = psnr(
    out.comps[0].data().unwrap(),
    image.comps[0].data().unwrap(),
    255.0,
  );
  assert!(p > 35.0, "9/7 reconstruction too far off: {} dB", p);
}

#[test]
fn quality_layers_are_monotone() {
  let image = gray_image(64, 64, |x, y| (((x * x + y * 3) ^ (y * 5)) % 256) as i32);
  let mut params = lossless_params();
  params.irreversible = true;
  params.numlayers = 2;
  params.rates = vec![16.0, 0.0];
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();

  let full = decompress(bytes.clone(), &DecodeParameters::default(), &mut mgr).unwrap();
  let mut one_layer = DecodeParameters::default();
  one_layer.layers = 1;
  let partial = decompress(bytes, &one_layer, &mut mgr).unwrap();

  let p_full = psnr(
    full.comps[0].data().unwrap(),
    image.comps[0].data().unwrap(),
    255.0,
  );
  let p_partial = psnr(
    partial.comps[0].data().unwrap(),
    image.comps[0].data().unwrap(),
    255.0,
  );
  assert!(
    p_full >= p_partial,
    "more layers may not lower quality: {} vs {}",
    p_full,
    p_partial
  );
}

#[test]
fn packet_count_in_lrcp() {
  // 64x64, 3 resolutions, 2 layers, precincts 2^5: the packet count is
  // layers x sum of per-resolution precinct counts
  let image = gray_image(64, 64, |x, _| (x % 256) as i32);
  let mut params = lossless_params();
  params.num_resolutions = 3;
  params.numlayers = 2;
  params.precincts = Some(vec![(5, 5); 3]);
  params.cblkw_exp = 4;
  params.cblkh_exp = 4;
  params.write_plt = true;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let markers = walk_markers(&bytes);
  // res 0: 16x16 -> 1 precinct; res 1: 32x32 -> 1; res 2: 64x64 -> 4
  assert_eq!(plt_packet_count(&markers), 2 * (1 + 1 + 4));
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn tiled_image_round_trip() {
  let image = gray_image(70, 50, |x, y| ((x ^ y) % 256) as i32);
  let mut params = lossless_params();
  params.tile_size = Some((32, 32));
  params.num_resolutions = 3;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let info = read_header(&bytes, &mut mgr).unwrap();
  assert_eq!((info.tw, info.th), (3, 2));
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn block_styles_round_trip() {
  let image = gray_image(64, 64, |x, y| ((3 * x + 5 * y) % 256) as i32);
  // lazy, termall, lazy+termall, reset+causal, segmark, the lot
  for bits in &[0x01u8, 0x04, 0x05, 0x0a, 0x20, 0x2d] {
    let mut params = lossless_params();
    params.cblk_style = htj2k::CblkStyle::from_bits_truncate(*bits);
    let mut mgr = EventManager::new();
    let bytes = compress(&image, &params, &mut mgr).unwrap();
    let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
    assert_eq!(
      out.comps[0].data().unwrap(),
      image.comps[0].data().unwrap(),
      "style bits {:#04x}",
      bits
    );
  }
}

#[test]
fn ht_blocks_round_trip_with_cap() {
  let image = gray_image(48, 48, |x, y| ((x * y) % 256) as i32);
  let mut params = lossless_params();
  params.cblk_style = htj2k::CblkStyle::HT;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let markers = walk_markers(&bytes);
  assert!(
    markers.iter().any(|(id, _)| *id == 0xff50),
    "HT stream must carry a CAP marker"
  );
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn resolution_reduction() {
  let image = gray_image(64, 64, |x, y| ((x + 2 * y) % 256) as i32);
  let mut params = lossless_params();
  params.num_resolutions = 3;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let mut dp = DecodeParameters::default();
  dp.reduce = 1;
  let out = decompress(bytes, &dp, &mut mgr).unwrap();
  assert_eq!((out.comps[0].w, out.comps[0].h), (32, 32));
  assert_eq!(out.comps[0].factor, 1);
}

#[test]
fn window_decode_matches_full_decode() {
  let image = gray_image(128, 128, |x, y| ((x * 7 + y * 11) % 256) as i32);
  let mut params = lossless_params();
  params.num_resolutions = 3;
  params.precincts = Some(vec![(5, 5); 3]);
  params.cblkw_exp = 4;
  params.cblkh_exp = 4;
  params.write_plt = true;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();

  let full = decompress(bytes.clone(), &DecodeParameters::default(), &mut mgr).unwrap();
  let window = Rect32::new(16, 24, 56, 72);
  let mut dp = DecodeParameters::default();
  dp.window = Some(window);
  let out = decompress(bytes, &dp, &mut mgr).unwrap();

  assert_eq!(out.comps[0].w, window.width());
  assert_eq!(out.comps[0].h, window.height());
  let full_data = full.comps[0].data().unwrap();
  let win_data = out.comps[0].data().unwrap();
  for y in 0..window.height() {
    for x in 0..window.width() {
      let fx = (window.x0 + x) as usize;
      let fy = (window.y0 + y) as usize;
      assert_eq!(
        win_data[(y * window.width() + x) as usize],
        full_data[fy * 128 + fx],
        "window sample ({}, {})",
        x,
        y
      );
    }
  }
}

#[test]
fn truncated_tile_part_recovers() {
  let image = gray_image(64, 64, |x, y| ((x * 3 + y) % 256) as i32);
  let params = lossless_params();
  let mut mgr = EventManager::new();
  let mut bytes = compress(&image, &params, &mut mgr).unwrap();
  // chop a third of the stream: the tile-part body ends mid-packet
  let cut = bytes.len() * 2 / 3;
  bytes.truncate(cut);

  let mut mgr = EventManager::new();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!((out.comps[0].w, out.comps[0].h), (64, 64));
  assert!(mgr.warning_count() > 0, "truncation must be reported");
}

#[test]
fn strict_mode_rejects_truncation() {
  let image = gray_image(64, 64, |x, y| ((x + y) % 256) as i32);
  let params = lossless_params();
  let mut mgr = EventManager::new();
  let mut bytes = compress(&image, &params, &mut mgr).unwrap();
  let cut = bytes.len() * 2 / 3;
  bytes.truncate(cut);
  let mut dp = DecodeParameters::default();
  dp.strict = true;
  assert!(decompress(bytes, &dp, &mut mgr).is_err());
}

#[test]
fn poc_generates_tile_parts() {
  let image = gray_image(64, 64, |x, y| ((x * 5 + y * 3) % 256) as i32);
  let mut params = lossless_params();
  params.num_resolutions = 3;
  params.progression_changes = vec![
    Poc {
      resno0: 0,
      compno0: 0,
      layno1: 1,
      resno1: 1,
      compno1: 1,
      prg: ProgressionOrder::Lrcp,
    },
    Poc {
      resno0: 1,
      compno0: 0,
      layno1: 1,
      resno1: 3,
      compno1: 1,
      prg: ProgressionOrder::Rlcp,
    },
  ];
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let markers = walk_markers(&bytes);
  let sots = markers.iter().filter(|(id, _)| *id == 0xff90).count();
  assert_eq!(sots, 2, "one tile-part per progression slab");
  assert!(markers.iter().any(|(id, _)| *id == 0xff5f), "POC marker present");
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn tlm_written_and_stream_decodes() {
  let image = gray_image(64, 48, |x, y| ((x + y * 2) % 256) as i32);
  let mut params = lossless_params();
  params.tile_size = Some((32, 48));
  params.write_tlm = true;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let markers = walk_markers(&bytes);
  let tlm = markers.iter().find(|(id, _)| *id == 0xff55).expect("TLM present");
  // Ztlm, Stlm, then 6 bytes per tile-part
  assert_eq!(tlm.1.len(), 2 + 6 * 2);
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn subsampled_components_round_trip() {
  let mut image = Image::new(
    Rect32::new(0, 0, 64, 64),
    ColorSpace::Sycc,
    &[
      ImageComponentParams {
        dx: 1,
        dy: 1,
        prec: 8,
        ..Default::default()
      },
      ImageComponentParams {
        dx: 2,
        dy: 2,
        prec: 8,
        ..Default::default()
      },
      ImageComponentParams {
        dx: 2,
        dy: 2,
        prec: 8,
        ..Default::default()
      },
    ],
  )
  .unwrap();
  image.update_component_bounds();
  image.alloc_data().unwrap();
  for comp in image.comps.iter_mut() {
    let n = (comp.w * comp.h) as usize;
    let data: Vec<i32> = (0..n).map(|i| ((i * 17) % 256) as i32).collect();
    comp.set_data(data).unwrap();
  }
  let mut params = lossless_params();
  params.mct = false;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  for c in 0..3 {
    assert_eq!(
      out.comps[c].data().unwrap(),
      image.comps[c].data().unwrap(),
      "component {}",
      c
    );
  }
}

#[test]
fn roi_shift_round_trip() {
  let image = gray_image(32, 32, |x, y| ((x * 2 + y) % 256) as i32);
  let mut params = lossless_params();
  params.roishift = 3;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let markers = walk_markers(&bytes);
  assert!(markers.iter().any(|(id, _)| *id == 0xff5e), "RGN marker present");
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn sop_eph_round_trip() {
  let image = gray_image(48, 32, |x, y| ((x * y + 3) % 256) as i32);
  let mut params = lossless_params();
  params.sop = true;
  params.eph = true;
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}

#[test]
fn progression_orders_round_trip() {
  let image = gray_image(64, 64, |x, y| ((x * 3 ^ y) % 256) as i32);
  for prg in [
    ProgressionOrder::Lrcp,
    ProgressionOrder::Rlcp,
    ProgressionOrder::Rpcl,
    ProgressionOrder::Pcrl,
    ProgressionOrder::Cprl,
  ]
  .iter()
  {
    let mut params = lossless_params();
    params.prog = *prg;
    params.num_resolutions = 3;
    let mut mgr = EventManager::new();
    let bytes = compress(&image, &params, &mut mgr).unwrap();
    let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
    assert_eq!(
      out.comps[0].data().unwrap(),
      image.comps[0].data().unwrap(),
      "{:?}",
      prg
    );
  }
}

#[test]
fn sixteen_bit_round_trip() {
  let mut image = Image::new(
    Rect32::new(0, 0, 32, 32),
    ColorSpace::Gray,
    &[ImageComponentParams {
      dx: 1,
      dy: 1,
      prec: 16,
      ..Default::default()
    }],
  )
  .unwrap();
  image.update_component_bounds();
  image.alloc_data().unwrap();
  let data: Vec<i32> = (0..32 * 32).map(|i| (i * 61) % 65536).collect();
  image.comps[0].set_data(data).unwrap();
  let params = lossless_params();
  let mut mgr = EventManager::new();
  let bytes = compress(&image, &params, &mut mgr).unwrap();
  let out = decompress(bytes, &DecodeParameters::default(), &mut mgr).unwrap();
  assert_eq!(out.comps[0].data().unwrap(), image.comps[0].data().unwrap());
}
