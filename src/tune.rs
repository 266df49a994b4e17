// Copyright (c) 2025-2026, The rdtune contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Per-frame sequencing of the tuning pass and the RD multiplier query.

use log::debug;
use thiserror::Error;

use v_frame::frame::Frame;
use v_frame::pixel::Pixel;

use crate::api::{InvalidConfig, TuneConfig};
use crate::block::{BlockOffset, BlockSize};
use crate::grid::WeightGrid;
use crate::metric::{DistortionOracle, MetricError, MetricParams};
use crate::scale::{self, scale_divisor};
use crate::weights::{self, WeightParams};

/// Quantizer index of the measurement encode. Moderate on purpose:
/// coarse enough to expose visible distortion, fine enough that the
/// reconstruction still tracks the source.
pub const TRIAL_QINDEX: u8 = 96;

/// Trial encode failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("trial encode failed: {0}")]
pub struct EncodeError(pub String);

/// Full encode pass over a source frame, producing its reconstruction.
///
/// The tuner drives one measurement encode per frame through this trait;
/// the host encoder provides the implementation.
pub trait FrameCodec<T: Pixel> {
  /// Encodes `source` at the given quantizer index and returns the
  /// in-loop reconstruction.
  ///
  /// # Errors
  ///
  /// Returns [`EncodeError`] if the encode cannot complete.
  fn encode_frame(
    &mut self, source: &Frame<T>, quantizer_index: u8,
  ) -> Result<Frame<T>, EncodeError>;
}

/// Fatal failures of the tuning pipeline. Each aborts the tuning of the
/// current frame; there is no retry path.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TuneError {
  /// The configuration is unusable.
  #[error("invalid configuration: {0}")]
  Config(#[from] InvalidConfig),
  /// A working frame cannot be allocated at these dimensions.
  #[error("cannot allocate a {width}x{height} working frame")]
  Allocation {
    /// Requested working width.
    width: usize,
    /// Requested working height.
    height: usize,
  },
  /// The distortion metric failed; no weight grid can be produced.
  #[error(transparent)]
  Metric(#[from] MetricError),
  /// The measurement encode failed.
  #[error(transparent)]
  Encode(#[from] EncodeError),
}

/// Per-session state of the perceptual tuning pass.
///
/// Owns the captured source, its downscaled copy and the weight grid.
/// Queries only scale the multiplier once a weight computation has
/// completed for the current frame; until then they pass the input
/// through untouched.
///
/// The per-frame sequence is strict: capture and swap the source, run the
/// measurement encode, compute the weights (which also restores the
/// source), then answer queries during the real encode. No state beyond
/// buffer reuse carries over to the next frame.
pub struct PerceptualTuner<T: Pixel> {
  config: TuneConfig,
  divisor: usize,
  scaled_width: usize,
  scaled_height: usize,
  source: Option<Frame<T>>,
  scaled_source: Option<Frame<T>>,
  grid: WeightGrid,
  ready: bool,
}

impl<T: Pixel> PerceptualTuner<T> {
  /// Validates the configuration and sets up an idle tuner.
  ///
  /// # Errors
  ///
  /// Returns [`TuneError::Config`] for an invalid configuration and
  /// [`TuneError::Allocation`] if the downscaled working frame would be
  /// empty.
  pub fn new(config: TuneConfig) -> Result<Self, TuneError> {
    config.validate()?;
    let divisor = scale_divisor(config.resize_selector);
    let scaled_width = config.width / divisor;
    let scaled_height = config.height / divisor;
    if scaled_width == 0 || scaled_height == 0 {
      return Err(TuneError::Allocation {
        width: scaled_width,
        height: scaled_height,
      });
    }
    let grid = WeightGrid::new(config.width, config.height);
    Ok(PerceptualTuner {
      config,
      divisor,
      scaled_width,
      scaled_height,
      source: None,
      scaled_source: None,
      grid,
      ready: false,
    })
  }

  /// The configuration this tuner was built with.
  pub fn config(&self) -> &TuneConfig {
    &self.config
  }

  /// Whether a weight grid exists for the current frame.
  pub fn ready(&self) -> bool {
    self.ready
  }

  /// The current weight grid. Neutral until a weight computation has
  /// completed.
  pub fn grid(&self) -> &WeightGrid {
    &self.grid
  }

  /// Captures the source and swaps the working frame for its downscaled
  /// stand-in ahead of the measurement encode. This is the frame
  /// boundary: the previous frame's grid stops answering queries here.
  ///
  /// The working frame afterwards holds the downscaled picture in its
  /// top-left corner over a zeroed background, at unchanged buffer
  /// dimensions.
  pub fn prepare_trial_source(&mut self, working: &mut Frame<T>) {
    debug_assert!(working.planes[0].cfg.width >= self.config.width);
    debug_assert!(working.planes[0].cfg.height >= self.config.height);

    self.ready = false;

    match self.source.as_mut() {
      Some(copy) => scale::copy_frame(copy, working),
      None => self.source = Some(working.clone()),
    }

    let (scaled_width, scaled_height) = (self.scaled_width, self.scaled_height);
    let chroma_sampling = self.config.chroma_sampling;
    let scaled = self.scaled_source.get_or_insert_with(|| {
      scale::alloc_frame(scaled_width, scaled_height, chroma_sampling)
    });
    scale::downscale_frame(
      working,
      scaled,
      self.config.width,
      self.config.height,
      chroma_sampling,
      self.divisor,
    );

    scale::zero_frame(working);
    scale::copy_frame_region(
      working,
      scaled,
      scaled_width,
      scaled_height,
      chroma_sampling,
    );
    debug!(
      "trial source ready: {}x{} at 1/{} resolution",
      scaled_width, scaled_height, self.divisor
    );
  }

  /// Restores the working frame from the captured source, scores the
  /// downscaled source/reconstruction pair with the metric and rebuilds
  /// the weight grid.
  ///
  /// `recon` is the reconstruction of the frame prepared by
  /// [`Self::prepare_trial_source`]; its top-left corner holds the
  /// reconstructed downscaled picture.
  ///
  /// # Errors
  ///
  /// Returns [`TuneError::Metric`] if the metric fails or produces a map
  /// of the wrong shape. The working frame is restored even on failure.
  ///
  /// # Panics
  ///
  /// Panics if no source was captured for this frame.
  pub fn compute_weights<O: DistortionOracle<T> + ?Sized>(
    &mut self, working: &mut Frame<T>, recon: &Frame<T>, oracle: &mut O,
  ) -> Result<(), TuneError> {
    let source = self
      .source
      .as_ref()
      .expect("no captured source; run prepare_trial_source first");
    scale::copy_frame(working, source);

    let scaled_source = self
      .scaled_source
      .as_ref()
      .expect("downscaled source is captured together with the source");

    // Scratch copy of the reconstructed stand-in; dropped on every exit
    // path below.
    let scaled_recon = scale::crop_frame(
      recon,
      self.scaled_width,
      self.scaled_height,
      self.config.chroma_sampling,
    );

    let params = MetricParams::for_working_frame(
      &self.config,
      self.scaled_width,
      self.scaled_height,
    );
    let map = oracle.compute_map(scaled_source, &scaled_recon, &params)?;
    if map.width() != self.scaled_width || map.height() != self.scaled_height
    {
      return Err(
        MetricError::BadShape {
          width: self.scaled_width,
          height: self.scaled_height,
          got_width: map.width(),
          got_height: map.height(),
        }
        .into(),
      );
    }

    let weight_params = WeightParams {
      divisor: self.divisor,
      width: self.scaled_width,
      height: self.scaled_height,
      chroma_sampling: self.config.chroma_sampling,
      bias: self.config.tune.bias(),
      experimental: self.config.experimental,
    };
    weights::fill_grid(
      &mut self.grid,
      scaled_source,
      &scaled_recon,
      &map,
      &weight_params,
    );
    self.ready = true;
    debug!(
      "weight grid rebuilt: {}x{} cells",
      self.grid.cols(),
      self.grid.rows()
    );
    Ok(())
  }

  /// Runs the whole per-frame measurement sequence: capture and swap the
  /// source, trial-encode it at [`TRIAL_QINDEX`], score the pair and
  /// rebuild the weight grid, restoring the source along the way.
  ///
  /// # Errors
  ///
  /// Propagates [`TuneError::Encode`] and [`TuneError::Metric`]; both
  /// are fatal for the frame.
  pub fn run_trial_pass<C, O>(
    &mut self, working: &mut Frame<T>, codec: &mut C, oracle: &mut O,
  ) -> Result<(), TuneError>
  where
    C: FrameCodec<T> + ?Sized,
    O: DistortionOracle<T> + ?Sized,
  {
    self.prepare_trial_source(working);
    let recon = codec.encode_frame(working, TRIAL_QINDEX)?;
    self.compute_weights(working, &recon, oracle)
  }

  /// Adjusted RD multiplier for a coding block.
  ///
  /// A pure read of the weight grid: the `ln` of every overlapped cell
  /// is averaged, scaled by the configured percentage, exponentiated and
  /// applied to `rdmult` with round-to-nearest. The result is never
  /// negative. Until a grid exists for the current frame, `rdmult` comes
  /// back unchanged.
  pub fn scale_rdmult(
    &self, bsize: BlockSize, offset: BlockOffset, rdmult: i64,
  ) -> i64 {
    if !self.ready {
      return rdmult;
    }
    let log_mean = match self.grid.log_mean(bsize, offset) {
      Some(mean) => mean,
      None => return rdmult,
    };
    let scale =
      (log_mean * f64::from(self.config.rdmult_percent) / 100.0).exp();
    ((rdmult as f64 * scale + 0.5) as i64).max(0)
  }
}
