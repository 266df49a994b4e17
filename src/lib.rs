// Copyright (c) 2025-2026, The rdtune contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Perceptual rate-distortion tuning for block-based video encoders.
//!
//! The tuner derives a per-block multiplier map that re-weights an
//! encoder's quantization and mode-decision cost function, so that
//! visually salient errors are penalized harder than raw MSE alone would
//! suggest. Ground truth comes from an external perceptual distortion
//! metric; the measurement encode comes from the host encoder. Both are
//! injected as traits.
//!
//! Per frame the flow is: capture the source, swap in a downscaled
//! stand-in, let the host run a trial encode at a fixed moderate
//! quantizer, score the downscaled source/reconstruction pair, aggregate
//! per-block perceptual error and MSE into normalized weights, restore
//! the source bit-for-bit, then answer per-block RD multiplier queries
//! during the real encode.
//!
//! ```
//! use rdtune::*;
//!
//! struct PerfectCodec;
//! impl FrameCodec<u8> for PerfectCodec {
//!   fn encode_frame(
//!     &mut self, source: &Frame<u8>, _qindex: u8,
//!   ) -> Result<Frame<u8>, EncodeError> {
//!     Ok(source.clone())
//!   }
//! }
//!
//! struct FlatOracle;
//! impl DistortionOracle<u8> for FlatOracle {
//!   fn compute_map(
//!     &mut self, _source: &Frame<u8>, _recon: &Frame<u8>,
//!     params: &MetricParams,
//!   ) -> Result<DistortionMap, MetricError> {
//!     Ok(DistortionMap::from_values(
//!       vec![0.0; params.width * params.height],
//!       params.width,
//!       params.height,
//!     ))
//!   }
//! }
//!
//! let config = TuneConfig { width: 64, height: 64, ..Default::default() };
//! let mut tuner = PerceptualTuner::<u8>::new(config).unwrap();
//! let mut frame = Frame::<u8>::new_with_padding(
//!   64,
//!   64,
//!   ChromaSampling::Cs420,
//!   16,
//! );
//!
//! tuner
//!   .run_trial_pass(&mut frame, &mut PerfectCodec, &mut FlatOracle)
//!   .unwrap();
//! assert!(tuner.ready());
//!
//! // A perfect reconstruction leaves every multiplier neutral.
//! let rdmult = tuner.scale_rdmult(
//!   BlockSize::BLOCK_16X16,
//!   BlockOffset { x: 0, y: 0 },
//!   1024,
//! );
//! assert_eq!(rdmult, 1024);
//! ```

pub mod api;
pub mod block;
pub mod grid;
pub mod metric;
pub mod scale;
pub mod tune;
mod weights;

pub use crate::api::{
  InvalidConfig, MatrixCoefficients, PixelRange, Tune, TuneConfig,
};
pub use crate::block::{BlockOffset, BlockSize, InvalidBlockSize};
pub use crate::grid::{WeightGrid, GRID_CELL_SIZE};
pub use crate::metric::{
  DistortionMap, DistortionOracle, MetricError, MetricParams,
};
pub use crate::scale::scale_divisor;
pub use crate::tune::{
  EncodeError, FrameCodec, PerceptualTuner, TuneError, TRIAL_QINDEX,
};

pub use v_frame::frame::Frame;
pub use v_frame::pixel::{ChromaSampling, Pixel};
pub use v_frame::plane::Plane;
