// Copyright (c) 2025-2026, The rdtune contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Working-resolution management: downscaling, zero-filling and region
//! copies over whole frames.

use rayon::prelude::*;

use v_frame::frame::Frame;
use v_frame::pixel::{CastFromPrimitive, ChromaSampling, Pixel};
use v_frame::plane::Plane;

/// Border attached to the working copies owned by the tuner.
pub(crate) const TUNE_FRAME_PADDING: usize = 16;

/// Maps the downscale selector from the configuration onto the divisor
/// applied to both frame dimensions for the metric evaluation pass.
pub const fn scale_divisor(selector: u8) -> usize {
  match selector {
    0 => 1,
    1 => 2,
    2 => 4,
    _ => 2,
  }
}

/// Number of planes carrying picture data.
pub(crate) const fn plane_count(chroma_sampling: ChromaSampling) -> usize {
  match chroma_sampling {
    ChromaSampling::Cs400 => 1,
    _ => 3,
  }
}

/// Allocates a frame able to hold a `width`x`height` picture.
pub(crate) fn alloc_frame<T: Pixel>(
  width: usize, height: usize, chroma_sampling: ChromaSampling,
) -> Frame<T> {
  Frame::new_with_padding(width, height, chroma_sampling, TUNE_FRAME_PADDING)
}

/// Copies `src` into `dst` wholesale, padding included. Both frames must
/// share one buffer layout.
pub(crate) fn copy_frame<T: Pixel>(dst: &mut Frame<T>, src: &Frame<T>) {
  for (dst_plane, src_plane) in dst.planes.iter_mut().zip(src.planes.iter())
  {
    assert_eq!(dst_plane.cfg, src_plane.cfg);
    dst_plane.data.copy_from_slice(&src_plane.data);
  }
}

/// Overwrites every sample of the frame, padding included, with zero.
pub(crate) fn zero_frame<T: Pixel>(frame: &mut Frame<T>) {
  for plane in frame.planes.iter_mut() {
    plane.data.fill(T::cast_from(0u8));
  }
}

/// Copies the top-left `width`x`height` picture region from `src` to
/// `dst`, plane by plane at the chroma-adjusted dimensions. The frames
/// may have different buffer layouts as long as both cover the region.
pub(crate) fn copy_frame_region<T: Pixel>(
  dst: &mut Frame<T>, src: &Frame<T>, width: usize, height: usize,
  chroma_sampling: ChromaSampling,
) {
  let (ss_x, ss_y) = chroma_sampling.get_decimation().unwrap_or((0, 0));
  for (pli, (dst_plane, src_plane)) in
    dst.planes.iter_mut().zip(src.planes.iter()).enumerate()
  {
    if pli >= plane_count(chroma_sampling) {
      break;
    }
    let (w, h) = if pli == 0 {
      (width, height)
    } else {
      ((width + ss_x) >> ss_x, (height + ss_y) >> ss_y)
    };
    let dst_stride = dst_plane.cfg.stride;
    let src_stride = src_plane.cfg.stride;
    for (dst_row, src_row) in dst_plane
      .data_origin_mut()
      .chunks_mut(dst_stride)
      .zip(src_plane.data_origin().chunks(src_stride))
      .take(h)
    {
      dst_row[..w].copy_from_slice(&src_row[..w]);
    }
  }
}

/// Allocates a `width`x`height` frame holding the top-left region of
/// `src`, borders extended.
pub(crate) fn crop_frame<T: Pixel>(
  src: &Frame<T>, width: usize, height: usize,
  chroma_sampling: ChromaSampling,
) -> Frame<T> {
  let mut dst = alloc_frame(width, height, chroma_sampling);
  copy_frame_region(&mut dst, src, width, height, chroma_sampling);
  for plane in dst.planes.iter_mut().take(plane_count(chroma_sampling)) {
    plane.pad(width, height);
  }
  dst
}

/// Box-filters the `src_width`x`src_height` picture in `src` down to the
/// `dst_width`x`dst_height` region of `dst`. Boxes are `divisor` samples
/// on a side; partial boxes at the frame edge average the samples they
/// still cover.
pub(crate) fn downscale_plane<T: Pixel>(
  src: &Plane<T>, dst: &mut Plane<T>, src_width: usize, src_height: usize,
  dst_width: usize, dst_height: usize, divisor: usize,
) {
  debug_assert!(divisor > 0);
  debug_assert!(dst_width * divisor < src_width + divisor);
  debug_assert!(dst_height * divisor < src_height + divisor);

  let src_stride = src.cfg.stride;
  let src_data = src.data_origin();
  let dst_stride = dst.cfg.stride;
  let dst_data = dst.data_origin_mut();

  dst_data[..dst_height * dst_stride]
    .par_chunks_mut(dst_stride)
    .enumerate()
    .for_each(|(y, dst_row)| {
      for (x, dst_px) in dst_row[..dst_width].iter_mut().enumerate() {
        let x0 = x * divisor;
        let y0 = y * divisor;
        let x1 = (x0 + divisor).min(src_width);
        let y1 = (y0 + divisor).min(src_height);
        let count = ((x1 - x0) * (y1 - y0)) as u32;

        // Rounded integer average over the box.
        let mut sum = count / 2;
        for src_row in src_data[y0 * src_stride..]
          .chunks(src_stride)
          .take(y1 - y0)
        {
          for &px in &src_row[x0..x1] {
            sum += u32::cast_from(px);
          }
        }
        *dst_px = T::cast_from(sum / count);
      }
    });
}

/// Downscales the `width`x`height` picture in `src` by `divisor` into the
/// top-left region of `dst`, all planes, borders extended.
pub(crate) fn downscale_frame<T: Pixel>(
  src: &Frame<T>, dst: &mut Frame<T>, width: usize, height: usize,
  chroma_sampling: ChromaSampling, divisor: usize,
) {
  let dst_width = width / divisor;
  let dst_height = height / divisor;
  let (ss_x, ss_y) = chroma_sampling.get_decimation().unwrap_or((0, 0));

  for (pli, (src_plane, dst_plane)) in
    src.planes.iter().zip(dst.planes.iter_mut()).enumerate()
  {
    if pli >= plane_count(chroma_sampling) {
      break;
    }
    let (sw, sh, dw, dh) = if pli == 0 {
      (width, height, dst_width, dst_height)
    } else {
      (
        (width + ss_x) >> ss_x,
        (height + ss_y) >> ss_y,
        (dst_width + ss_x) >> ss_x,
        (dst_height + ss_y) >> ss_y,
      )
    };
    downscale_plane(src_plane, dst_plane, sw, sh, dw, dh, divisor);
    dst_plane.pad(dst_width, dst_height);
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn divisor_mapping() {
    assert_eq!(scale_divisor(0), 1);
    assert_eq!(scale_divisor(1), 2);
    assert_eq!(scale_divisor(2), 4);
    assert_eq!(scale_divisor(3), 2);
    assert_eq!(scale_divisor(255), 2);
  }

  #[test]
  fn box_filter_averages() {
    #[rustfmt::skip]
    let src = Plane::<u8>::from_slice(&[
      1, 3, 5, 7,
      9, 11, 13, 15,
      17, 19, 21, 23,
      25, 27, 29, 31,
    ], 4);
    let mut dst = Plane::<u8>::new(2, 2, 0, 0, 0, 0);
    downscale_plane(&src, &mut dst, 4, 4, 2, 2, 2);
    assert_eq!(dst.p(0, 0), 6);
    assert_eq!(dst.p(1, 0), 10);
    assert_eq!(dst.p(0, 1), 22);
    assert_eq!(dst.p(1, 1), 26);
  }

  #[test]
  fn box_filter_partial_edge() {
    // 5 wide: the last destination column only covers one source column.
    #[rustfmt::skip]
    let src = Plane::<u8>::from_slice(&[
      2, 4, 6, 8, 10,
      12, 14, 16, 18, 20,
    ], 5);
    let mut dst = Plane::<u8>::new(3, 1, 0, 0, 0, 0);
    downscale_plane(&src, &mut dst, 5, 2, 3, 1, 2);
    assert_eq!(dst.p(0, 0), 8);
    assert_eq!(dst.p(1, 0), 12);
    // (10 + 20 + 1) / 2
    assert_eq!(dst.p(2, 0), 15);
  }

  #[test]
  fn unit_divisor_copies() {
    let src = Plane::<u8>::from_slice(&[1, 2, 3, 4, 5, 6], 3);
    let mut dst = Plane::<u8>::new(3, 2, 0, 0, 0, 0);
    downscale_plane(&src, &mut dst, 3, 2, 3, 2, 1);
    for y in 0..2 {
      for x in 0..3 {
        assert_eq!(dst.p(x, y), src.p(x, y));
      }
    }
  }

  #[test]
  fn region_copy_respects_subsampling() {
    let mut src: Frame<u8> = alloc_frame(8, 8, ChromaSampling::Cs420);
    for plane in src.planes.iter_mut() {
      plane.data.fill(9);
    }
    let mut dst: Frame<u8> = alloc_frame(8, 8, ChromaSampling::Cs420);
    zero_frame(&mut dst);
    copy_frame_region(&mut dst, &src, 4, 4, ChromaSampling::Cs420);

    // Luma: a 4x4 corner was copied, the rest stays zero.
    assert_eq!(dst.planes[0].p(3, 3), 9);
    assert_eq!(dst.planes[0].p(4, 3), 0);
    assert_eq!(dst.planes[0].p(3, 4), 0);
    // Chroma: the copied corner is 2x2.
    assert_eq!(dst.planes[1].p(1, 1), 9);
    assert_eq!(dst.planes[1].p(2, 1), 0);
    assert_eq!(dst.planes[2].p(1, 1), 9);
  }

  #[test]
  fn whole_frame_copy_roundtrip() {
    let mut a: Frame<u16> = alloc_frame(12, 10, ChromaSampling::Cs420);
    for (i, px) in a.planes[0].data.iter_mut().enumerate() {
      *px = (i % 1024) as u16;
    }
    let mut b = a.clone();
    zero_frame(&mut b);
    assert_ne!(a, b);
    copy_frame(&mut b, &a);
    assert_eq!(a, b);
  }
}
