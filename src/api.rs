// Copyright (c) 2025-2026, The rdtune contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

//! Configuration surface of the tuning pass.

use num_derive::FromPrimitive;
use thiserror::Error;

use v_frame::pixel::ChromaSampling;

/// Matrix coefficients used to derive luma and chroma from RGB.
///
/// Handed through to the distortion metric unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(C)]
pub enum MatrixCoefficients {
  /// Identity matrix
  Identity = 0,
  /// BT.709
  BT709,
  /// Unspecified, must be signaled or inferred outside of the bitstream.
  Unspecified,
  /// US FCC 73.628
  BT470M = 4,
  /// BT.470 System B, G (historical)
  BT470BG,
  /// BT.601-7 525 (SMPTE 170 M)
  ST170M,
  /// SMPTE 240 M
  ST240M,
  /// YCgCo
  YCgCo,
  /// BT.2020 non-constant luminance, BT.2100 YCbCr
  BT2020NonConstantLuminance,
  /// BT.2020 constant luminance
  BT2020ConstantLuminance,
  /// SMPTE ST 2085 YDzDx
  ST2085,
  /// Chromaticity-derived non-constant luminance
  ChromaticityDerivedNonConstantLuminance,
  /// Chromaticity-derived constant luminance
  ChromaticityDerivedConstantLuminance,
  /// BT.2020 ICtCp
  ICtCp,
}

impl Default for MatrixCoefficients {
  fn default() -> Self {
    MatrixCoefficients::Unspecified
  }
}

/// Allowed pixel value range.
///
/// Handed through to the distortion metric unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(C)]
pub enum PixelRange {
  /// Studio swing representation
  Limited,
  /// Full swing representation
  Full,
}

impl Default for PixelRange {
  fn default() -> Self {
    PixelRange::Limited
  }
}

/// Tuning goal of the perceptual pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(C)]
pub enum Tune {
  /// Standard perceptual tuning.
  Perceptual,
  /// Spend bits more freely on blocks the metric cares about.
  Lavish,
  /// In-development weight shaping.
  Experimental,
}

impl Default for Tune {
  fn default() -> Self {
    Tune::Perceptual
  }
}

impl Tune {
  /// Constant added to capped raw weights before they enter the
  /// geometric mean.
  pub(crate) const fn bias(self) -> f64 {
    match self {
      Tune::Perceptual => 0.3,
      Tune::Lavish | Tune::Experimental => 0.0,
    }
  }
}

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 1, <= 65535)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 1, <= 65535)")]
  InvalidHeight(usize),
  /// The bit depth is invalid.
  #[error("invalid bit depth {0} (expected 8, 10 or 12)")]
  InvalidBitDepth(usize),
  /// The RD multiplier percentage is invalid.
  #[error("invalid rdmult percentage {0} (expected > 0)")]
  InvalidRdMultPercent(u32),
  /// The metric intensity target is invalid.
  #[error("invalid intensity target {0} nits (expected > 0)")]
  InvalidIntensityTarget(f64),
  /// The metric high-frequency asymmetry is invalid.
  #[error("invalid hf asymmetry {0} (expected > 0)")]
  InvalidHfAsymmetry(f64),
}

/// Settings of the perceptual tuning pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneConfig {
  /// Width of the frames in pixels.
  pub width: usize,
  /// Height of the frames in pixels.
  pub height: usize,
  /// Bit depth.
  pub bit_depth: usize,
  /// Chroma subsampling.
  pub chroma_sampling: ChromaSampling,
  /// Pixel value range.
  pub pixel_range: PixelRange,
  /// Matrix coefficients of the content.
  pub matrix_coefficients: MatrixCoefficients,
  /// Tuning goal; selects the weight bias.
  pub tune: Tune,
  /// Raw downscale selector for the metric evaluation pass; see
  /// [`scale_divisor`] for the mapping onto a divisor.
  ///
  /// [`scale_divisor`]: crate::scale::scale_divisor
  pub resize_selector: u8,
  /// Viewing intensity target in nits, handed to the metric.
  pub intensity_target: f64,
  /// High-frequency asymmetry, handed to the metric.
  pub hf_asymmetry: f64,
  /// Percentage applied to the per-block log-mean weight before it
  /// scales the RD multiplier.
  pub rdmult_percent: u32,
  /// Selects the experimental weight cap and clamp range.
  pub experimental: bool,
}

impl Default for TuneConfig {
  fn default() -> Self {
    TuneConfig {
      width: 640,
      height: 480,
      bit_depth: 8,
      chroma_sampling: ChromaSampling::Cs420,
      pixel_range: PixelRange::Limited,
      matrix_coefficients: MatrixCoefficients::Unspecified,
      tune: Tune::Perceptual,
      resize_selector: 1,
      intensity_target: 80.0,
      hf_asymmetry: 1.0,
      rdmult_percent: 100,
      experimental: false,
    }
  }
}

impl TuneConfig {
  /// Checks that this configuration describes a frame the tuner can
  /// operate on.
  ///
  /// # Errors
  ///
  /// Returns the first constraint violated.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    if self.width == 0 || self.width > u16::MAX as usize {
      return Err(InvalidWidth(self.width));
    }
    if self.height == 0 || self.height > u16::MAX as usize {
      return Err(InvalidHeight(self.height));
    }
    if !matches!(self.bit_depth, 8 | 10 | 12) {
      return Err(InvalidBitDepth(self.bit_depth));
    }
    if self.rdmult_percent == 0 {
      return Err(InvalidRdMultPercent(self.rdmult_percent));
    }
    if !(self.intensity_target > 0.0) {
      return Err(InvalidIntensityTarget(self.intensity_target));
    }
    if !(self.hf_asymmetry > 0.0) {
      return Err(InvalidHfAsymmetry(self.hf_asymmetry));
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use num_traits::FromPrimitive;

  #[test]
  fn default_config_is_valid() {
    assert_eq!(TuneConfig::default().validate(), Ok(()));
  }

  #[test]
  fn dimension_bounds() {
    let config = TuneConfig { width: 0, ..Default::default() };
    assert_eq!(config.validate(), Err(InvalidConfig::InvalidWidth(0)));
    let config = TuneConfig { height: 100_000, ..Default::default() };
    assert_eq!(config.validate(), Err(InvalidConfig::InvalidHeight(100_000)));
  }

  #[test]
  fn bit_depth_bounds() {
    for bit_depth in [8, 10, 12] {
      let config = TuneConfig { bit_depth, ..Default::default() };
      assert_eq!(config.validate(), Ok(()));
    }
    let config = TuneConfig { bit_depth: 9, ..Default::default() };
    assert_eq!(config.validate(), Err(InvalidConfig::InvalidBitDepth(9)));
  }

  #[test]
  fn metric_knob_bounds() {
    let config = TuneConfig { rdmult_percent: 0, ..Default::default() };
    assert_eq!(config.validate(), Err(InvalidConfig::InvalidRdMultPercent(0)));
    let config = TuneConfig { hf_asymmetry: 0.0, ..Default::default() };
    assert!(config.validate().is_err());
    let config = TuneConfig { intensity_target: -1.0, ..Default::default() };
    assert!(config.validate().is_err());
  }

  #[test]
  fn tune_bias() {
    assert_eq!(Tune::Perceptual.bias(), 0.3);
    assert_eq!(Tune::Lavish.bias(), 0.0);
    assert_eq!(Tune::Experimental.bias(), 0.0);
  }

  #[test]
  fn matrix_coefficients_from_index() {
    assert_eq!(
      MatrixCoefficients::from_u32(1),
      Some(MatrixCoefficients::BT709)
    );
    // 3 is reserved and must not map to anything.
    assert_eq!(MatrixCoefficients::from_u32(3), None);
    assert_eq!(
      MatrixCoefficients::from_u32(4),
      Some(MatrixCoefficients::BT470M)
    );
  }
}
