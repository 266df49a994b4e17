// Copyright (c) 2025-2026, The rdtune contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Interface to the external perceptual distortion metric.

use thiserror::Error;

use v_frame::frame::Frame;
use v_frame::pixel::{ChromaSampling, Pixel};

use crate::api::{MatrixCoefficients, PixelRange, TuneConfig};

/// Everything the metric needs to know about a frame pair besides the
/// pixels: the true picture dimensions (planes may be padded beyond
/// them), sample format, color metadata and the metric tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricParams {
  /// Picture width in pixels.
  pub width: usize,
  /// Picture height in pixels.
  pub height: usize,
  /// Bit depth of the samples.
  pub bit_depth: usize,
  /// Chroma subsampling.
  pub chroma_sampling: ChromaSampling,
  /// Pixel value range.
  pub pixel_range: PixelRange,
  /// Matrix coefficients of the content.
  pub matrix_coefficients: MatrixCoefficients,
  /// Viewing intensity target in nits.
  pub intensity_target: f64,
  /// High-frequency asymmetry.
  pub hf_asymmetry: f64,
}

impl MetricParams {
  pub(crate) fn for_working_frame(
    config: &TuneConfig, width: usize, height: usize,
  ) -> Self {
    MetricParams {
      width,
      height,
      bit_depth: config.bit_depth,
      chroma_sampling: config.chroma_sampling,
      pixel_range: config.pixel_range,
      matrix_coefficients: config.matrix_coefficients,
      intensity_target: config.intensity_target,
      hf_asymmetry: config.hf_asymmetry,
    }
  }
}

/// Reasons a distortion map could not be produced.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum MetricError {
  /// The metric backend failed on this frame pair.
  #[error("distortion metric failed: {0}")]
  Backend(String),
  /// The produced map does not cover the working frame.
  #[error(
    "distortion map is {got_width}x{got_height}, expected {width}x{height}"
  )]
  BadShape {
    /// Expected width.
    width: usize,
    /// Expected height.
    height: usize,
    /// Width of the map the metric produced.
    got_width: usize,
    /// Height of the map the metric produced.
    got_height: usize,
  },
}

/// Per-pixel perceptual error map over the working-resolution luma plane,
/// row-major.
#[derive(Debug, Clone)]
pub struct DistortionMap {
  values: Box<[f32]>,
  width: usize,
  height: usize,
}

impl DistortionMap {
  /// Wraps a row-major buffer of per-pixel scores.
  ///
  /// # Panics
  ///
  /// Panics if `values.len() != width * height`.
  pub fn from_values(
    values: Vec<f32>, width: usize, height: usize,
  ) -> Self {
    assert_eq!(values.len(), width * height);
    DistortionMap { values: values.into_boxed_slice(), width, height }
  }

  /// Map width in pixels.
  pub fn width(&self) -> usize {
    self.width
  }

  /// Map height in pixels.
  pub fn height(&self) -> usize {
    self.height
  }

  /// One row of scores.
  pub fn row(&self, y: usize) -> &[f32] {
    &self.values[y * self.width..][..self.width]
  }
}

/// External perceptual distortion metric.
///
/// Implementations compare two same-sized frames and score every luma
/// pixel; the tuner treats the scores as an opaque oracle. A failure is
/// fatal for the frame being tuned.
pub trait DistortionOracle<T: Pixel> {
  /// Computes the per-pixel error map between `source` and `recon`.
  ///
  /// # Errors
  ///
  /// Returns [`MetricError`] if no map can be produced.
  fn compute_map(
    &mut self, source: &Frame<T>, recon: &Frame<T>, params: &MetricParams,
  ) -> Result<DistortionMap, MetricError>;
}
