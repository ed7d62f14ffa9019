// Copyright 2022-2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Controller connecting coding algorithms.

#[cfg(feature = "log")]
use log::debug;
#[cfg(feature = "log")]
use log::info;
#[cfg(feature = "log")]
use log::trace;
use md5::Digest;
use md5::Md5;

use crate::component::BitRepr;
use crate::component::ChannelAssignment;
use crate::component::Constant;
use crate::component::FixedLpc;
use crate::component::Frame;
use crate::component::FrameHeader;
use crate::component::FrameOffset;
use crate::component::Lpc;
use crate::component::QuantizedParameters;
use crate::component::Residual;
use crate::component::Stream;
use crate::component::StreamInfo;
use crate::component::SubFrame;
use crate::component::Verbatim;
use crate::config;
use crate::constant::fixed::ESTIMATOR_WARMUP;
use crate::constant::fixed::MAX_LPC_ORDER as MAX_FIXED_ORDER;
use crate::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use crate::constant::MAX_BITS_PER_SAMPLE;
use crate::constant::MAX_BLOCK_SIZE;
use crate::constant::MIN_BLOCK_SIZE;
use crate::error::verify_range;
use crate::error::verify_true;
use crate::error::EncodeError;
use crate::error::Verified;
use crate::error::VerifyError;
use crate::fixed;
use crate::lpc;
use crate::reusable;
use crate::reuse;
use crate::rice;
use crate::source::FrameBuf;
use crate::source::Source;
use crate::window;

/// Returns true if samples are all same.
///
/// # Examples
///
/// ```
/// # use flacenc_core::coding::is_constant;
/// assert!(is_constant(&[3, 3, 3]));
/// assert!(!is_constant(&[3, 3, 4]));
/// ```
pub fn is_constant<T: PartialEq>(samples: &[T]) -> bool {
    samples.windows(2).all(|w| w[0] == w[1])
}

/// Returns the number of trailing zero bits shared by all the samples.
///
/// The returned value is always smaller than `bits_per_sample`, so a
/// subframe keeps at least one bit per sample.
pub fn wasted_bits(samples: &[i32], bits_per_sample: usize) -> usize {
    let acc = samples.iter().fold(0i32, |acc, v| acc | v);
    std::cmp::min(acc.trailing_zeros() as usize, bits_per_sample - 1)
}

/// Constructs `Residual` component given the error signal.
///
/// `errors[..warmup_length]` are not coded and must be zeros.
pub fn encode_residual(config: &config::Prc, errors: &[i32], warmup_length: usize) -> Residual {
    let prc_p = rice::find_partitioned_rice_parameter(errors, warmup_length, config);
    Residual::from_parts(
        prc_p.method,
        prc_p.order as u8,
        errors.len(),
        warmup_length,
        prc_p.params,
        errors.to_owned(),
    )
}

/// Working memory for predictive coding.
#[derive(Default)]
struct PredictionBuffers {
    errors: Vec<i32>,
    windowed: Vec<f32>,
    autoc: Vec<f64>,
}

reusable!(PREDICTION_BUFFERS: PredictionBuffers);

/// Keeps the smallest subframe seen so far.
struct Minimizer {
    best: SubFrame,
    bits: usize,
}

impl Minimizer {
    fn new(baseline: SubFrame) -> Self {
        let bits = baseline.count_bits();
        Self {
            best: baseline,
            bits,
        }
    }

    fn offer(&mut self, candidate: SubFrame) {
        let bits = candidate.count_bits();
        if bits < self.bits {
            self.best = candidate;
            self.bits = bits;
        }
    }

    fn into_inner(self) -> SubFrame {
        self.best
    }
}

/// Makes a `FixedLpc` subframe of `order`, or `None` if the residual overflows.
fn fixed_subframe(
    config: &config::Prc,
    signal: &[i32],
    order: usize,
    bits_per_sample: usize,
    errors: &mut Vec<i32>,
) -> Option<SubFrame> {
    errors.resize(signal.len(), 0);
    if !fixed::fixed_residual(order, signal, errors) {
        #[cfg(feature = "log")]
        trace!(
            target: "flacenc_core::coding",
            "fixed order {order} skipped: residual overflow"
        );
        return None;
    }
    let residual = encode_residual(config, errors, order);
    let warm_up = heapless::Vec::from_slice(&signal[..order]).ok()?;
    Some(FixedLpc::from_parts(warm_up, residual, bits_per_sample as u8).into())
}

/// Tries fixed predictors and offers them to `minimizer`.
fn try_fixed(
    config: &config::SubFrameCoding,
    signal: &[i32],
    bits_per_sample: usize,
    buffers: &mut PredictionBuffers,
    minimizer: &mut Minimizer,
) {
    let max_order = std::cmp::min(MAX_FIXED_ORDER, signal.len() - 1);
    let orders = match config.qlpc.order_search {
        config::OrderSearch::Exhaustive => 0..=max_order,
        config::OrderSearch::Estimate => {
            if signal.len() <= ESTIMATOR_WARMUP {
                return;
            }
            let order = fixed::choose_fixed_order(signal, bits_per_sample).order;
            let order = std::cmp::min(order, max_order);
            order..=order
        }
    };
    for order in orders {
        if let Some(subframe) =
            fixed_subframe(&config.prc, signal, order, bits_per_sample, &mut buffers.errors)
        {
            minimizer.offer(subframe);
        }
    }
}

/// Quantizes LPC coefficients and makes an `Lpc` subframe.
fn lpc_subframe(
    config: &config::SubFrameCoding,
    signal: &[i32],
    coefs: &[f64],
    bits_per_sample: usize,
    errors: &mut Vec<i32>,
) -> Option<SubFrame> {
    let order = coefs.len();
    let precision = if config.qlpc.quant_precision == 0 {
        lpc::auto_precision(bits_per_sample, signal.len())
    } else {
        config.qlpc.quant_precision
    };
    let precision = lpc::limit_precision(precision, bits_per_sample, order);
    let params: QuantizedParameters = match lpc::quantize(coefs, precision) {
        Ok(params) => params,
        Err(_e) => {
            #[cfg(feature = "log")]
            trace!(target: "flacenc_core::coding", "LPC order {order} skipped: {_e}");
            return None;
        }
    };
    errors.resize(signal.len(), 0);
    if !lpc::compute_residual(&params, bits_per_sample, signal, errors) {
        #[cfg(feature = "log")]
        trace!(
            target: "flacenc_core::coding",
            "LPC order {order} skipped: residual overflow"
        );
        return None;
    }
    let residual = encode_residual(&config.prc, errors, order);
    let warm_up = heapless::Vec::from_slice(&signal[..order]).ok()?;
    Some(Lpc::from_parts(warm_up, params, residual, bits_per_sample as u8).into())
}

/// Tries LPC with each analysis window and offers the results to `minimizer`.
fn try_lpc(
    config: &config::SubFrameCoding,
    signal: &[i32],
    bits_per_sample: usize,
    buffers: &mut PredictionBuffers,
    minimizer: &mut Minimizer,
) {
    let max_order = config
        .qlpc
        .lpc_order
        .min(MAX_LPC_ORDER)
        .min(signal.len() - 1);
    if max_order == 0 {
        return;
    }
    buffers.autoc.resize(max_order + 1, 0.0);
    for w in &config.qlpc.windows {
        window::apply(w, signal, &mut buffers.windowed);
        lpc::auto_correlation(&buffers.windowed, max_order, &mut buffers.autoc);
        let candidates = lpc::levinson_durbin(&buffers.autoc, max_order);
        if candidates.max_order() == 0 {
            continue;
        }
        match config.qlpc.order_search {
            config::OrderSearch::Estimate => {
                let overhead = bits_per_sample
                    + if config.qlpc.quant_precision == 0 {
                        lpc::auto_precision(bits_per_sample, signal.len())
                    } else {
                        config.qlpc.quant_precision
                    };
                let order = lpc::best_order(candidates.errors(), signal.len(), overhead);
                if let Some(subframe) = lpc_subframe(
                    config,
                    signal,
                    candidates.coefs(order),
                    bits_per_sample,
                    &mut buffers.errors,
                ) {
                    minimizer.offer(subframe);
                }
            }
            config::OrderSearch::Exhaustive => {
                for order in 1..=candidates.max_order() {
                    if let Some(subframe) = lpc_subframe(
                        config,
                        signal,
                        candidates.coefs(order),
                        bits_per_sample,
                        &mut buffers.errors,
                    ) {
                        minimizer.offer(subframe);
                    }
                }
            }
        }
    }
}

/// Encodes without checking constant input or wasted bits.
fn encode_predictive(
    config: &config::SubFrameCoding,
    signal: &[i32],
    bits_per_sample: usize,
) -> SubFrame {
    let verbatim = Verbatim::from_samples(signal, bits_per_sample as u8).into();
    let mut minimizer = Minimizer::new(verbatim);
    reuse!(PREDICTION_BUFFERS, |buffers: &mut PredictionBuffers| {
        if config.use_fixed {
            try_fixed(config, signal, bits_per_sample, buffers, &mut minimizer);
        }
        if config.use_lpc {
            try_lpc(config, signal, bits_per_sample, buffers, &mut minimizer);
        }
    });
    minimizer.into_inner()
}

/// Finds the best method to encode the given samples, and returns `SubFrame`.
///
/// `bits_per_sample` is the width of `samples`, including the extra bit of
/// side channels.
///
/// # Panics
///
/// Panics if `samples` is empty.
///
/// # Examples
///
/// ```
/// # use flacenc_core::coding::encode_subframe;
/// # use flacenc_core::component::*;
/// # use flacenc_core::config;
/// let config = config::SubFrameCoding::default();
/// let ramp: Vec<i32> = (0..256).map(|t| 8 * t - 1024).collect();
/// let subframe = encode_subframe(&config, &ramp, 16);
/// assert_eq!(subframe.wasted_bits(), 3);
/// assert!(matches!(subframe, SubFrame::FixedLpc(_)));
/// ```
pub fn encode_subframe(
    config: &config::SubFrameCoding,
    samples: &[i32],
    bits_per_sample: usize,
) -> SubFrame {
    assert!(!samples.is_empty());
    if config.use_constant && is_constant(samples) {
        return Constant::from_parts(samples.len(), samples[0], bits_per_sample as u8).into();
    }
    let wasted = if config.use_wasted_bits {
        wasted_bits(samples, bits_per_sample)
    } else {
        0
    };
    if wasted == 0 {
        return encode_predictive(config, samples, bits_per_sample);
    }
    let shifted: Vec<i32> = samples.iter().map(|v| v >> wasted).collect();
    let mut ret = encode_predictive(config, &shifted, bits_per_sample - wasted);
    ret.set_wasted_bits(wasted);
    ret
}

/// Counts bits of a frame from its header and subframe sizes.
const fn frame_bits(header_bits: usize, subframe_bits: usize) -> usize {
    (header_bits + subframe_bits + 7) / 8 * 8 + 16
}

/// Helper struct holding working memory for stereo coding (mid-side).
struct StereoCodingHelper {
    midside_framebuf: FrameBuf,
}

impl Default for StereoCodingHelper {
    fn default() -> Self {
        Self {
            midside_framebuf: FrameBuf::with_size(2, 4096),
        }
    }
}

impl StereoCodingHelper {
    /// Tries left-side, right-side, and mid-side coding.
    fn apply(
        &mut self,
        config: &config::Encoder,
        framebuf: &FrameBuf,
        block_size: usize,
        bits_per_sample: usize,
        indep: Frame,
    ) -> Frame {
        let mut min_bits = indep.count_bits();
        let header_bits = indep.header().count_bits();

        if self.midside_framebuf.size() < block_size {
            self.midside_framebuf.resize(block_size);
        }
        for t in 0..block_size {
            let l = framebuf.channel_slice(0)[t];
            let r = framebuf.channel_slice(1)[t];
            self.midside_framebuf.channel_slice_mut(0)[t] = (l + r) >> 1;
            self.midside_framebuf.channel_slice_mut(1)[t] = l - r;
        }
        let mid = encode_subframe(
            &config.subframe_coding,
            &self.midside_framebuf.channel_slice(0)[..block_size],
            bits_per_sample,
        );
        let side = encode_subframe(
            &config.subframe_coding,
            &self.midside_framebuf.channel_slice(1)[..block_size],
            bits_per_sample + 1,
        );

        let (header, indep_subframes) = indep.into_parts();
        let [left, right]: [SubFrame; 2] = match indep_subframes.try_into() {
            Ok(pair) => pair,
            Err(subframes) => return Frame::from_parts(header, subframes),
        };
        let combinations = [
            (config.stereo_coding.use_leftside, ChannelAssignment::LeftSide, &left, &side),
            (config.stereo_coding.use_rightside, ChannelAssignment::RightSide, &side, &right),
            (config.stereo_coding.use_midside, ChannelAssignment::MidSide, &mid, &side),
        ];

        let mut selected = None;
        for (allowed, ch_info, sf0, sf1) in combinations {
            if !allowed {
                continue;
            }
            let bits = frame_bits(header_bits, sf0.count_bits() + sf1.count_bits());
            if bits < min_bits {
                min_bits = bits;
                selected = Some((ch_info, sf0.clone(), sf1.clone()));
            }
        }
        match selected {
            Some((ch_info, sf0, sf1)) => {
                #[cfg(feature = "log")]
                trace!(target: "flacenc_core::coding", "stereo mode {ch_info:?} selected");
                let mut header = header;
                header.reset_channel_assignment(ch_info);
                Frame::from_parts(header, vec![sf0, sf1])
            }
            None => Frame::from_parts(header, vec![left, right]),
        }
    }
}

reusable!(STEREO_CODING_HELPER: StereoCodingHelper);

/// Encodes the first `block_size` samples of `framebuf` into a `Frame`.
///
/// Stereo decorrelation is tried for two-channel input narrower than 32
/// bits, and the smallest frame is returned.
///
/// # Errors
///
/// Returns an error if `block_size` or the frame number is out of range, or
/// if `framebuf` doesn't match `stream_info`.
///
/// # Examples
///
/// ```
/// # use flacenc_core::*;
/// # use flacenc_core::component::*;
/// # use flacenc_core::error::Verify;
/// # use flacenc_core::source::FrameBuf;
/// let config = config::Encoder::default().into_verified().unwrap();
/// let info = StreamInfo::new(16000, 2, 16).unwrap();
/// let mut fb = FrameBuf::with_size(2, 64);
/// fb.fill_from_interleaved(&[5i32; 128]);
/// let frame = encode_fixed_size_frame(&config, &fb, 64, 0, &info).unwrap();
/// assert_eq!(frame.block_size(), 64);
/// assert!(matches!(frame.subframe(0), Some(SubFrame::Constant(_))));
/// ```
pub fn encode_fixed_size_frame(
    config: &Verified<config::Encoder>,
    framebuf: &FrameBuf,
    block_size: usize,
    frame_number: usize,
    stream_info: &StreamInfo,
) -> Result<Frame, EncodeError> {
    verify_range!("block_size", block_size, 1..=(framebuf.size().min(MAX_BLOCK_SIZE)))?;
    let channels = stream_info.channels();
    if framebuf.channels() != channels {
        return Err(VerifyError::new("framebuf.channels", "must match the stream").into());
    }
    if frame_number >= 1 << 31 {
        return Err(VerifyError::new("frame_number", "must fit in 31 bits").into());
    }
    let frame_number = frame_number as u32;
    let bits_per_sample = stream_info.bits_per_sample();
    let header = FrameHeader::new(
        block_size,
        ChannelAssignment::Independent(channels as u8),
        bits_per_sample,
        stream_info.sample_rate(),
        FrameOffset::Frame(frame_number),
    )?;
    Ok(encode_frame(config, framebuf, block_size, bits_per_sample, header))
}

fn encode_frame(
    config: &config::Encoder,
    framebuf: &FrameBuf,
    block_size: usize,
    bits_per_sample: usize,
    header: FrameHeader,
) -> Frame {
    let channels = framebuf.channels();
    let subframes = (0..channels)
        .map(|ch| {
            encode_subframe(
                &config.subframe_coding,
                &framebuf.channel_slice(ch)[..block_size],
                bits_per_sample,
            )
        })
        .collect();
    let ret = Frame::from_parts(header, subframes);

    let stereo = &config.stereo_coding;
    let any_stereo = stereo.use_leftside || stereo.use_rightside || stereo.use_midside;
    if channels == 2 && bits_per_sample < MAX_BITS_PER_SAMPLE && any_stereo {
        reuse!(STEREO_CODING_HELPER, |helper: &mut StereoCodingHelper| {
            helper.apply(config, framebuf, block_size, bits_per_sample, ret)
        })
    } else {
        ret
    }
}

/// Encoder entry function for fixed block-size encoding.
///
/// Blocks of `block_size` samples are read from `src` until it is exhausted.
/// The last block may be shorter. The MD5 signature and the total number of
/// samples in `STREAMINFO` are computed from the samples read, and both
/// block-size fields of `STREAMINFO` are set to `block_size`.
///
/// # Errors
///
/// Returns an error if `block_size` is invalid, or if `src` fails.
///
/// # Examples
///
/// ```
/// # use flacenc_core::*;
/// # use flacenc_core::error::Verify;
/// # use flacenc_core::source::MemSource;
/// let samples: Vec<i32> = (0..2000).map(|t| (t % 100) - 50).collect();
/// let src = MemSource::from_samples(&samples, 1, 16, 8000).unwrap();
/// let config = config::Encoder::default().into_verified().unwrap();
/// let stream = encode_with_fixed_block_size(&config, src, 512).unwrap();
/// assert_eq!(stream.frame_count(), 4);
/// assert_eq!(stream.stream_info().total_samples(), 2000);
/// assert_eq!(stream.frame(3).unwrap().block_size(), 464);
/// assert_eq!(stream.stream_info().min_block_size(), 512);
/// assert_eq!(stream.stream_info().max_block_size(), 512);
/// ```
pub fn encode_with_fixed_block_size<T: Source>(
    config: &Verified<config::Encoder>,
    mut src: T,
    block_size: usize,
) -> Result<Stream, EncodeError> {
    verify_range!("block_size", block_size, MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE)?;
    let mut stream = Stream::new(src.sample_rate(), src.channels(), src.bits_per_sample())?;
    let channels = src.channels();
    let bits_per_sample = src.bits_per_sample();
    let mut framebuf = FrameBuf::with_size(channels, block_size);

    #[cfg(feature = "log")]
    info!(
        target: "flacenc_core::coding",
        "encoding started: channels={channels}, bits_per_sample={bits_per_sample}, \
         sample_rate={}, block_size={block_size}",
        src.sample_rate()
    );

    let mut md5_context = Md5::new();
    let mut total_samples: usize = 0;
    let mut frame_number: usize = 0;
    loop {
        let read_samples = src.read_samples(&mut framebuf)?;
        if read_samples == 0 {
            break;
        }
        framebuf.update_md5(bits_per_sample, read_samples, &mut md5_context);
        let frame = encode_fixed_size_frame(
            config,
            &framebuf,
            read_samples,
            frame_number,
            stream.stream_info(),
        )?;
        #[cfg(feature = "log")]
        debug!(
            target: "flacenc_core::coding",
            "frame {frame_number}: {} samples, {} bytes",
            read_samples,
            frame.count_bits() / 8
        );
        stream.add_frame(frame);
        total_samples += read_samples;
        frame_number += 1;
    }
    let info = stream.stream_info_mut();
    info.set_block_sizes(block_size, block_size)?;
    info.set_total_samples(total_samples);
    info.set_md5_digest(&md5_context.finalize().into());

    #[cfg(feature = "log")]
    info!(
        target: "flacenc_core::coding",
        "encoding finished: frames={frame_number}, samples={total_samples}, bytes={}",
        stream.count_bits() / 8
    );
    Ok(stream)
}

#[cfg(test)]
#[allow(clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::error::Verify;
    use crate::source::MemSource;
    use crate::test_helper;
    use crate::window::Window;

    use rstest::rstest;

    fn verified(config: config::Encoder) -> Verified<config::Encoder> {
        config.into_verified().expect("config should be valid")
    }

    #[test]
    fn constant_detector() {
        let signal = vec![5; 64];
        assert!(is_constant(&signal));

        let signal = vec![-3; 192];
        assert!(is_constant(&signal));

        let mut signal = vec![-3; 192];
        signal[191] = 0;
        assert!(!is_constant(&signal));
    }

    #[test]
    fn wasted_bits_detection() {
        assert_eq!(wasted_bits(&[4, -8, 12, 0], 16), 2);
        assert_eq!(wasted_bits(&[4, -8, 13, 0], 16), 0);
        assert_eq!(wasted_bits(&[0, 0, 0], 16), 15);
        assert_eq!(wasted_bits(&[1 << 20], 8), 7);
    }

    #[test]
    fn constant_subframe_is_selected() {
        let config = config::SubFrameCoding::default();
        let subframe = encode_subframe(&config, &[-7; 300], 8);
        let SubFrame::Constant(c) = subframe else {
            panic!("constant subframe expected");
        };
        assert_eq!(c.dc_offset(), -7);
        assert_eq!(c.block_size(), 300);
    }

    #[test]
    fn verbatim_is_used_for_white_noise() {
        let mut config = config::SubFrameCoding::default();
        config.use_fixed = false;
        config.use_lpc = false;
        let signal = test_helper::constant_plus_noise(256, 0, 30000);
        let subframe = encode_subframe(&config, &signal, 16);
        assert!(matches!(subframe, SubFrame::Verbatim(_)));
    }

    #[test]
    fn short_blocks_are_encodable() {
        let config = config::SubFrameCoding::default();
        for len in 1..8 {
            let signal: Vec<i32> = (0..len).map(|t| t * t - 3).collect();
            let subframe = encode_subframe(&config, &signal, 16);
            subframe.verify().expect("subframe should be valid");
        }
    }

    #[test]
    fn lpc_beats_fixed_on_sinusoids() {
        let config = config::SubFrameCoding::default();
        let signal = test_helper::sinusoid_plus_noise(4096, 200, 20000.0, 4);
        let subframe = encode_subframe(&config, &signal, 16);
        assert!(matches!(subframe, SubFrame::Lpc(_)), "{subframe:?}");
        subframe.verify().expect("subframe should be valid");
    }

    #[test]
    fn exhaustive_search_is_never_worse() {
        let signal = test_helper::sinusoid_plus_noise(2048, 60, 12000.0, 50);
        let mut config = config::SubFrameCoding::default();
        let estimated = encode_subframe(&config, &signal, 16).count_bits();
        config.qlpc.order_search = config::OrderSearch::Exhaustive;
        let exhaustive = encode_subframe(&config, &signal, 16).count_bits();
        assert!(exhaustive <= estimated);
    }

    #[test]
    fn multiple_windows_are_never_worse() {
        let signal = test_helper::sinusoid_plus_noise(2048, 37, 9000.0, 300);
        let mut config = config::SubFrameCoding::default();
        let single = encode_subframe(&config, &signal, 16).count_bits();
        config.qlpc.windows.push(Window::Hann);
        config.qlpc.windows.push(Window::PartialTukey {
            p: 0.5,
            start: 0.0,
            end: 0.5,
        });
        let multi = encode_subframe(&config, &signal, 16).count_bits();
        assert!(multi <= single);
    }

    #[test]
    fn side_channel_is_chosen_for_correlated_input() {
        let config = verified(config::Encoder::default());
        let left = test_helper::sinusoid_plus_noise(1024, 50, 10000.0, 1000);
        let right: Vec<i32> = left.iter().map(|v| v + 3).collect();
        let mut fb = FrameBuf::with_size(2, 1024);
        fb.fill_from_interleaved(&test_helper::interleave(&[left, right]));
        let info = StreamInfo::new(44100, 2, 16).unwrap();
        let frame = encode_fixed_size_frame(&config, &fb, 1024, 0, &info).unwrap();
        assert!(!matches!(
            frame.header().channel_assignment(),
            ChannelAssignment::Independent(_)
        ));
        frame.verify().expect("frame should be valid");
    }

    #[test]
    fn stereo_coding_can_be_disabled() {
        let mut config = config::Encoder::default();
        config.stereo_coding.use_leftside = false;
        config.stereo_coding.use_rightside = false;
        config.stereo_coding.use_midside = false;
        let config = verified(config);
        let left = test_helper::sinusoid_plus_noise(512, 50, 10000.0, 10);
        let mut fb = FrameBuf::with_size(2, 512);
        fb.fill_from_interleaved(&test_helper::interleave(&[left.clone(), left]));
        let info = StreamInfo::new(44100, 2, 16).unwrap();
        let frame = encode_fixed_size_frame(&config, &fb, 512, 0, &info).unwrap();
        assert_eq!(
            frame.header().channel_assignment(),
            &ChannelAssignment::Independent(2)
        );
    }

    #[test]
    fn invalid_frame_requests_are_rejected() {
        let config = verified(config::Encoder::default());
        let fb = FrameBuf::with_size(2, 64);
        let info = StreamInfo::new(44100, 2, 16).unwrap();
        assert!(encode_fixed_size_frame(&config, &fb, 65, 0, &info).is_err());
        assert!(encode_fixed_size_frame(&config, &fb, 0, 0, &info).is_err());
        let mono = StreamInfo::new(44100, 1, 16).unwrap();
        assert!(encode_fixed_size_frame(&config, &fb, 64, 0, &mono).is_err());
        assert!(encode_fixed_size_frame(&config, &fb, 64, 1 << 31, &info).is_err());
        assert!(encode_fixed_size_frame(&config, &fb, 64, (1 << 31) - 1, &info).is_ok());
    }

    #[test]
    fn md5_invariance() {
        let channels = 2;
        let bits_per_sample = 24;
        let sample_rate = 16000;
        let block_size = 128;
        let constant = 23;
        let signal_len = 1000;
        let signal = test_helper::constant_plus_noise(signal_len * channels, constant, 0);
        let source =
            MemSource::from_samples(&signal, channels, bits_per_sample, sample_rate).unwrap();
        let config = verified(config::Encoder::default());
        let stream = encode_with_fixed_block_size(&config, source, block_size).unwrap();

        let mut context = Md5::new();
        for _ in 0..signal_len * channels {
            context.update([23u8, 0, 0]);
        }
        assert_eq!(stream.stream_info().md5_digest(), &<[u8; 16]>::from(context.finalize()));
        assert_eq!(stream.stream_info().total_samples(), signal_len);
        assert_eq!(stream.frame_count(), 8);
        assert_eq!(stream.frame(7).unwrap().block_size(), 1000 - 7 * 128);
    }

    #[rstest]
    fn integrity_with_claxon(
        #[values(1, 2, 3)] channels: usize,
        #[values(8, 16, 24)] bits_per_sample: usize,
        #[values(192, 1000)] block_size: usize,
    ) {
        let signal_len = 3001;
        let amplitude = (1 << (bits_per_sample - 2)) as f32;
        let signals: Vec<Vec<i32>> = (0..channels)
            .map(|ch| test_helper::sinusoid_plus_noise(signal_len, 40 + ch, amplitude, 3))
            .collect();
        let signal = test_helper::interleave(&signals);
        let source = MemSource::from_samples(&signal, channels, bits_per_sample, 44100).unwrap();
        // claxon doesn't decode escaped partitions.
        let mut config = config::Encoder::default();
        config.subframe_coding.prc.use_escape_code = false;
        let config = verified(config);
        test_helper::integrity_test(
            |s| encode_with_fixed_block_size(&config, s, block_size).expect("source error"),
            &source,
        );
    }

    #[rstest]
    fn integrity_with_escaped_partitions(#[values(16, 24)] bits_per_sample: usize) {
        let signal_len = 3001;
        let noise = 1 << (bits_per_sample - 2);
        let mut signal = test_helper::constant_plus_noise(signal_len * 2, 0, 2);
        let burst = test_helper::constant_plus_noise(400, 0, noise);
        signal[1000..1400].copy_from_slice(&burst);
        let source = MemSource::from_samples(&signal, 2, bits_per_sample, 44100).unwrap();
        let config = verified(config::Encoder::default());
        let stream = test_helper::parser_integrity_test(
            |s| encode_with_fixed_block_size(&config, s, 512).expect("source error"),
            &source,
        );
        assert_eq!(stream.stream_info().total_samples(), signal_len);
    }

    #[test]
    fn short_last_block_keeps_streaminfo_block_size() {
        let signal = test_helper::sinusoid_plus_noise(1025, 64, 3000.0, 8);
        let source = MemSource::from_samples(&signal, 1, 16, 8000).unwrap();
        let config = verified(config::Encoder::default());
        let stream = test_helper::integrity_test(
            |s| encode_with_fixed_block_size(&config, s, 256).expect("source error"),
            &source,
        );
        assert_eq!(stream.frame_count(), 5);
        assert_eq!(stream.frame(4).unwrap().block_size(), 1);
        assert_eq!(stream.stream_info().min_block_size(), 256);
        assert_eq!(stream.stream_info().max_block_size(), 256);
    }

    #[test]
    fn integrity_with_wasted_bits() {
        let signal: Vec<i32> = test_helper::sinusoid_plus_noise(4000, 31, 1500.0, 100)
            .into_iter()
            .map(|v| v * 16)
            .collect();
        let source = MemSource::from_samples(&signal, 2, 16, 48000).unwrap();
        let config = verified(config::Encoder::default());
        let stream = test_helper::integrity_test(
            |s| encode_with_fixed_block_size(&config, s, 1000).expect("source error"),
            &source,
        );
        for subframe in stream.frame(0).unwrap().subframes() {
            assert!(subframe.wasted_bits() >= 3);
        }
    }

    #[test]
    fn integrity_of_32bit_streams() {
        let signals: Vec<Vec<i32>> = (0..2)
            .map(|ch| {
                test_helper::sinusoid_plus_noise(2500, 30 + ch, 2.0e9, 1 << 20)
            })
            .collect();
        let mut signal = test_helper::interleave(&signals);
        signal[0] = i32::MIN;
        signal[1] = i32::MAX;
        let source = MemSource::from_samples(&signal, 2, 32, 96000).unwrap();
        let config = verified(config::Encoder::default());
        let stream = test_helper::parser_integrity_test(
            |s| encode_with_fixed_block_size(&config, s, 1024).expect("source error"),
            &source,
        );
        for frame in stream.frames() {
            assert_eq!(
                frame.header().channel_assignment(),
                &ChannelAssignment::Independent(2)
            );
        }
    }

    #[test]
    fn invalid_block_size_is_rejected() {
        let source = MemSource::from_samples(&[0; 64], 1, 16, 8000).unwrap();
        let config = verified(config::Encoder::default());
        assert!(matches!(
            encode_with_fixed_block_size(&config, source.clone(), 0),
            Err(EncodeError::Config(_))
        ));
        assert!(matches!(
            encode_with_fixed_block_size(&config, source, 15),
            Err(EncodeError::Config(_))
        ));
    }
}
