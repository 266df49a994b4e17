// Copyright (c) 2025-2026, The rdtune contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Reduces the per-pixel error map and the source/reconstruction pair
//! into one normalized multiplier per grid cell.

use itertools::izip;
use log::warn;
use rayon::prelude::*;

use v_frame::frame::Frame;
use v_frame::pixel::{CastFromPrimitive, ChromaSampling, Pixel};
use v_frame::plane::Plane;

use crate::grid::{WeightGrid, GRID_CELL_SIZE};
use crate::metric::DistortionMap;

/// Order of the per-block error norm. A 12th-order norm behaves like a
/// soft maximum: the worst pixels dominate without a single outlier
/// deciding the block on its own.
const NORM_ORDER: i32 = 12;

/// Noise floor under which a block carries no usable signal.
const WEIGHT_EPS: f64 = 0.01;

/// Caps on the MSE / perceptual-norm ratio.
const WEIGHT_CAP: f64 = 5.0;
const WEIGHT_CAP_EXPERIMENTAL: f64 = 2.5;

/// Raw-weight marker for blocks with no usable signal. Excluded from the
/// geometric mean, reset to a neutral multiplier afterwards.
pub(crate) const UNWEIGHTED: f64 = -1.0;

/// Post-normalization clamp ranges.
const WEIGHT_RANGE: (f64, f64) = (0.4, 2.5);
const WEIGHT_RANGE_EXPERIMENTAL: (f64, f64) = (0.1, 2.0);

/// Knobs of the raw-weight derivation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WeightParams {
  /// Downscale divisor; a grid cell covers `16 / divisor` working pixels
  /// on a side.
  pub divisor: usize,
  /// Working (downscaled) picture width.
  pub width: usize,
  /// Working (downscaled) picture height.
  pub height: usize,
  pub chroma_sampling: ChromaSampling,
  /// Constant added to capped weights before the log accumulation.
  pub bias: f64,
  pub experimental: bool,
}

fn plane_row<T: Pixel>(plane: &Plane<T>, y: usize) -> &[T] {
  let stride = plane.cfg.stride;
  &plane.data_origin()[y * stride..][..stride]
}

/// Raw weight of the cell at `(row, col)`: the capped ratio of the
/// block's MSE to its high-order perceptual error norm, or [`UNWEIGHTED`]
/// when either falls under the noise floor.
fn raw_block_weight<T: Pixel>(
  source: &Frame<T>, recon: &Frame<T>, map: &DistortionMap,
  params: &WeightParams, row: usize, col: usize,
) -> f64 {
  let block = GRID_CELL_SIZE / params.divisor;
  let x0 = col * block;
  let y0 = row * block;
  let x1 = ((col + 1) * block).min(params.width);
  let y1 = ((row + 1) * block).min(params.height);
  // Cells past the working picture hold no samples at all.
  if x0 >= x1 || y0 >= y1 {
    return UNWEIGHTED;
  }

  let mut norm_accum = 0f64;
  let mut sse = 0f64;
  let mut samples = 0u64;

  for y in y0..y1 {
    let map_row = &map.row(y)[x0..x1];
    let src_row = &plane_row(&source.planes[0], y)[x0..x1];
    let rec_row = &plane_row(&recon.planes[0], y)[x0..x1];
    for (&d, &s, &r) in izip!(map_row, src_row, rec_row) {
      norm_accum += f64::from(d).powi(NORM_ORDER);
      let diff = f64::from(i32::cast_from(s) - i32::cast_from(r));
      sse += diff * diff;
      samples += 1;
    }
  }

  if params.chroma_sampling != ChromaSampling::Cs400 {
    let (ss_x, ss_y) =
      params.chroma_sampling.get_decimation().unwrap_or((0, 0));
    let cw = (params.width + ss_x) >> ss_x;
    let ch = (params.height + ss_y) >> ss_y;
    let cx0 = x0 >> ss_x;
    let cy0 = y0 >> ss_y;
    // Bound by the block edge first, the picture edge second, so partial
    // cells cover exactly the co-located chroma region.
    let cx1 = (((col + 1) * block) >> ss_x).min(cw);
    let cy1 = (((row + 1) * block) >> ss_y).min(ch);

    for y in cy0..cy1 {
      let src_u = &plane_row(&source.planes[1], y)[cx0..cx1];
      let rec_u = &plane_row(&recon.planes[1], y)[cx0..cx1];
      let src_v = &plane_row(&source.planes[2], y)[cx0..cx1];
      let rec_v = &plane_row(&recon.planes[2], y)[cx0..cx1];
      for (&su, &ru, &sv, &rv) in izip!(src_u, rec_u, src_v, rec_v) {
        let diff_u = f64::from(i32::cast_from(su) - i32::cast_from(ru));
        let diff_v = f64::from(i32::cast_from(sv) - i32::cast_from(rv));
        sse += diff_u * diff_u + diff_v * diff_v;
        samples += 2;
      }
    }
  }

  debug_assert!(samples > 0);
  let norm = norm_accum.powf(1.0 / f64::from(NORM_ORDER));
  let mse = sse / samples as f64;
  if norm < WEIGHT_EPS || mse < WEIGHT_EPS {
    return UNWEIGHTED;
  }

  let cap = if params.experimental {
    WEIGHT_CAP_EXPERIMENTAL
  } else {
    WEIGHT_CAP
  };
  let mut weight = (mse / norm).min(cap);
  if !params.experimental {
    weight += params.bias;
  }
  weight
}

/// Recomputes every cell of `grid` from the working-resolution frame pair
/// and error map, then normalizes the result to a unit geometric mean and
/// clamps it.
pub(crate) fn fill_grid<T: Pixel>(
  grid: &mut WeightGrid, source: &Frame<T>, recon: &Frame<T>,
  map: &DistortionMap, params: &WeightParams,
) {
  let cols = grid.cols();
  let raw = grid.weights_mut();

  raw
    .par_chunks_mut(cols)
    .enumerate()
    .for_each(|(row, out_row)| {
      for (col, out) in out_row.iter_mut().enumerate() {
        *out = raw_block_weight(source, recon, map, params, row, col);
      }
    });

  // The log-domain reduction runs after every cell is in place, so the
  // parallel fill stays deterministic.
  let mut log_sum = 0f64;
  let mut valid = 0usize;
  for &weight in raw.iter() {
    if weight > 0.0 {
      log_sum += weight.ln();
      valid += 1;
    }
  }

  normalize(raw, log_sum, valid, params.experimental);
}

/// Divides every valid weight by the geometric mean of the valid set,
/// resets sentinels to the neutral multiplier, and clamps. Dividing
/// before clamping keeps the mean unbiased.
pub(crate) fn normalize(
  weights: &mut [f64], log_sum: f64, valid: usize, experimental: bool,
) {
  let (min, max) = if experimental {
    WEIGHT_RANGE_EXPERIMENTAL
  } else {
    WEIGHT_RANGE
  };

  if valid == 0 {
    // No block produced a usable weight, so there is no mean to divide
    // by. Fall back to neutral multipliers for the whole frame.
    warn!("every block is under the weight noise floor; using neutral weights");
    for weight in weights.iter_mut() {
      *weight = 1.0f64.clamp(min, max);
    }
    return;
  }

  let geom_mean = (log_sum / valid as f64).exp();
  for weight in weights.iter_mut() {
    let scaled = if *weight <= 0.0 { 1.0 } else { *weight / geom_mean };
    *weight = scaled.clamp(min, max);
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::scale::alloc_frame;

  fn fill_plane<T: Pixel>(plane: &mut Plane<T>, value: u16) {
    plane.data.fill(T::cast_from(value));
  }

  fn flat_frame<T: Pixel>(
    width: usize, height: usize, luma: u16, chroma: u16,
  ) -> Frame<T> {
    let mut frame = alloc_frame(width, height, ChromaSampling::Cs420);
    fill_plane(&mut frame.planes[0], luma);
    fill_plane(&mut frame.planes[1], chroma);
    fill_plane(&mut frame.planes[2], chroma);
    frame
  }

  fn flat_map(width: usize, height: usize, value: f32) -> DistortionMap {
    DistortionMap::from_values(vec![value; width * height], width, height)
  }

  fn params_16x16() -> WeightParams {
    WeightParams {
      divisor: 1,
      width: 16,
      height: 16,
      chroma_sampling: ChromaSampling::Cs420,
      bias: 0.3,
      experimental: false,
    }
  }

  #[test]
  fn worked_normalization_example() {
    let mut weights = [2.0, 2.0, UNWEIGHTED, 3.0];
    let log_sum = 2.0f64.ln() + 2.0f64.ln() + 3.0f64.ln();
    normalize(&mut weights, log_sum, 3, false);

    let expected = [0.8735804647362989, 0.8735804647362989, 1.0, 1.3103706971044482];
    for (got, want) in weights.iter().zip(expected.iter()) {
      assert!((got - want).abs() < 1e-12, "{got} != {want}");
    }
  }

  #[test]
  fn degenerate_frame_is_neutral() {
    let mut weights = [UNWEIGHTED; 6];
    normalize(&mut weights, 0.0, 0, false);
    assert_eq!(weights, [1.0; 6]);

    let mut weights = [UNWEIGHTED; 6];
    normalize(&mut weights, 0.0, 0, true);
    assert_eq!(weights, [1.0; 6]);
  }

  #[test]
  fn clamp_ranges() {
    // Geometric mean sqrt(2.5); 0.5 maps to ~0.316, 5.0 to ~3.162.
    let log_sum = 0.5f64.ln() + 5.0f64.ln();

    let mut weights = [0.5, 5.0];
    normalize(&mut weights, log_sum, 2, false);
    assert_eq!(weights[0], 0.4);
    assert_eq!(weights[1], 2.5);

    let mut weights = [0.5, 5.0];
    normalize(&mut weights, log_sum, 2, true);
    assert!((weights[0] - 0.31622776601683794).abs() < 1e-12);
    assert_eq!(weights[1], 2.0);
  }

  #[test]
  fn raw_weight_caps_the_ratio() {
    // Constant luma error of 4 against a mild error map: the MSE to
    // norm ratio overshoots the cap.
    let source = flat_frame::<u8>(16, 16, 100, 128);
    let recon = flat_frame::<u8>(16, 16, 96, 128);
    let map = flat_map(16, 16, 0.5);
    let weight =
      raw_block_weight(&source, &recon, &map, &params_16x16(), 0, 0);
    assert!((weight - 5.3).abs() < 1e-9);

    let mut params = params_16x16();
    params.experimental = true;
    let weight = raw_block_weight(&source, &recon, &map, &params, 0, 0);
    assert!((weight - 2.5).abs() < 1e-9);
  }

  #[test]
  fn raw_weight_uncapped_ratio() {
    // Error map of 2.0 yields a norm of 2 * 256^(1/12) ~= 3.1748; the
    // luma-only MSE over 384 samples is 4096 / 384 ~= 10.667.
    let source = flat_frame::<u8>(16, 16, 100, 128);
    let recon = flat_frame::<u8>(16, 16, 96, 128);
    let map = flat_map(16, 16, 2.0);
    let weight =
      raw_block_weight(&source, &recon, &map, &params_16x16(), 0, 0);
    assert!((weight - 3.659789466386328).abs() < 1e-9);
  }

  #[test]
  fn chroma_samples_every_position() {
    // Luma is identical, the error lives in chroma alone: both chroma
    // planes differ by 2 over the full 8x8 subsampled block. Visiting
    // every chroma sample once gives SSE 512 over 384 samples. A
    // stride-2 chroma walk would see a different density and fail here.
    let source = flat_frame::<u8>(16, 16, 100, 130);
    let recon = flat_frame::<u8>(16, 16, 100, 128);
    let map = flat_map(16, 16, 1.0);
    let weight =
      raw_block_weight(&source, &recon, &map, &params_16x16(), 0, 0);
    assert!((weight - 1.139947366596582).abs() < 1e-9);
  }

  #[test]
  fn quiet_blocks_are_unweighted() {
    // Perfect reconstruction: MSE under the noise floor.
    let source = flat_frame::<u8>(16, 16, 100, 128);
    let map = flat_map(16, 16, 2.0);
    let weight =
      raw_block_weight(&source, &source.clone(), &map, &params_16x16(), 0, 0);
    assert_eq!(weight, UNWEIGHTED);

    // Distortion the metric does not see: norm under the noise floor.
    let recon = flat_frame::<u8>(16, 16, 96, 128);
    let map = flat_map(16, 16, 0.0);
    let weight =
      raw_block_weight(&source, &recon, &map, &params_16x16(), 0, 0);
    assert_eq!(weight, UNWEIGHTED);
  }

  #[test]
  fn high_bit_depth_matches_narrow() {
    // The same picture expressed at 8 and at 10 bits (values scaled by
    // 4) must produce the same weight shape; only the MSE magnitude
    // scales, and both overshoot the cap here.
    let source8 = flat_frame::<u8>(16, 16, 100, 128);
    let recon8 = flat_frame::<u8>(16, 16, 92, 128);
    let source10 = flat_frame::<u16>(16, 16, 400, 512);
    let recon10 = flat_frame::<u16>(16, 16, 368, 512);
    let map = flat_map(16, 16, 0.5);
    let params = params_16x16();

    let w8 = raw_block_weight(&source8, &recon8, &map, &params, 0, 0);
    let w10 = raw_block_weight(&source10, &recon10, &map, &params, 0, 0);
    assert!((w8 - 5.3).abs() < 1e-9);
    assert_eq!(w8, w10);
  }

  #[test]
  fn partial_cells_count_their_own_samples() {
    // A 24x16 working picture: the second cell column is 8 pixels wide.
    let mut params = params_16x16();
    params.width = 24;
    let source = flat_frame::<u8>(24, 16, 100, 128);
    let recon = flat_frame::<u8>(24, 16, 96, 128);
    let map = flat_map(24, 16, 2.0);

    // Full cell: as in `raw_weight_uncapped_ratio`.
    let full = raw_block_weight(&source, &recon, &map, &params, 0, 0);
    assert!((full - 3.659789466386328).abs() < 1e-9);

    // Partial cell: 8x16 luma, 4x8 chroma per plane. The flat content
    // makes the MSE identical, but the norm shrinks with the sample
    // count: 2 * 128^(1/12).
    let partial = raw_block_weight(&source, &recon, &map, &params, 0, 1);
    let norm = 2.0 * 128f64.powf(1.0 / 12.0);
    let mse = (128.0 * 16.0) / (128.0 + 2.0 * 32.0);
    let expected = (mse / norm).min(5.0) + 0.3;
    assert!((partial - expected).abs() < 1e-9);
  }

  #[test]
  fn grid_fill_normalizes_to_unit_geometric_mean() {
    // Two cells with different error maps produce different raw
    // weights; after the fill the grid must be normalized and clamped.
    let source = flat_frame::<u8>(32, 16, 100, 128);
    let recon = flat_frame::<u8>(32, 16, 96, 128);
    let mut values = vec![2.0f32; 32 * 16];
    for row in values.chunks_mut(32) {
      for v in &mut row[16..] {
        *v = 4.0;
      }
    }
    let map = DistortionMap::from_values(values, 32, 16);

    let mut params = params_16x16();
    params.width = 32;
    let mut grid = WeightGrid::new(32, 16);
    fill_grid(&mut grid, &source, &recon, &map, &params);

    assert_eq!(grid.cols(), 2);
    assert_eq!(grid.rows(), 1);
    let product: f64 = grid.weights().iter().product();
    assert!((product - 1.0).abs() < 1e-9);
    assert!(grid.weight(0, 0) > grid.weight(0, 1));
  }

  #[test]
  fn grid_fill_degenerate_is_neutral() {
    let source = flat_frame::<u8>(32, 32, 100, 128);
    let map = flat_map(32, 32, 2.0);
    let mut grid = WeightGrid::new(32, 32);
    fill_grid(
      &mut grid,
      &source,
      &source.clone(),
      &map,
      &WeightParams { width: 32, height: 32, ..params_16x16() },
    );
    assert!(grid.weights().iter().all(|&w| w == 1.0));
  }
}
