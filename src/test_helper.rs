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

#![allow(clippy::missing_panics_doc)]

use std::io::Write;

use nom::error::VerboseError;
use rand::distributions::Distribution;
use rand::distributions::Uniform;
use rand::Rng;
use rand::SeedableRng;
use tempfile::NamedTempFile;

use super::bitsink::ByteSink;
use super::component::parser;
use super::component::BitRepr;
use super::component::ChannelAssignment;
use super::component::Frame;
use super::component::FrameHeader;
use super::component::FrameOffset;
use super::component::PartitionParam;
use super::component::Residual;
use super::component::ResidualCodingMethod;
use super::component::Stream;
use super::component::StreamInfo;
use super::component::SubFrame;
use super::component::Verbatim;
use super::error::Verify;
use super::fixed;
use super::lpc;
use super::source::MemSource;
use super::source::Source;

#[macro_export]
macro_rules! assert_close {
    ($actual:expr, $expected:expr, rtol = $rtol:expr, atol = $atol:expr) => {{
        let actual = f64::from($actual);
        let expected = f64::from($expected);
        let err = (actual - expected).abs();
        #[allow(clippy::suboptimal_flops)]
        let tol = f64::from($rtol) * expected.abs() + f64::from($atol);
        assert!(err < tol, "{} is not close to {}", actual, expected);
    }};
    ($actual:expr, $expected:expr) => {{
        assert_close!($actual, $expected, rtol = 0.00001, atol = 0.00001);
    }};
}

#[macro_export]
macro_rules! assert_finite {
    ($result:expr) => {{
        for (i, &value) in $result.iter().enumerate() {
            assert!(
                value.is_normal() || value == 0.0,
                "{}-th element in a vector is not finite ({}), x={:?}.",
                i,
                value,
                $result
            );
        }
    }};
}

/// Generates `constant` plus uniform noise in `[-noise_width, noise_width]`.
pub fn constant_plus_noise(block_size: usize, constant: i32, noise_width: i32) -> Vec<i32> {
    let mut ret = vec![constant; block_size];
    if noise_width > 0 {
        let die = Uniform::from(-noise_width..=noise_width);
        let mut rng = rand::thread_rng();
        for v in &mut ret {
            *v = v.saturating_add(die.sample(&mut rng));
        }
    }
    ret
}

/// Generates a sinusoid with uniform noise in `[-noise_width, noise_width]`.
///
/// The noise is seeded so the signal is reproducible.
pub fn sinusoid_plus_noise(
    block_size: usize,
    period: usize,
    amplitude: f32,
    noise_width: i32,
) -> Vec<i32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(period as u64);
    let die = Uniform::from(-noise_width..=noise_width.max(0));
    let mut ret = Vec::with_capacity(block_size);
    for t in 0..block_size {
        let phase = 2.0 * std::f32::consts::PI * t as f32 / period as f32;
        let v = (amplitude * phase.sin()) as i32;
        ret.push(v + die.sample(&mut rng));
    }
    ret
}

/// Interleaves per-channel signals.
pub fn interleave(channels: &[Vec<i32>]) -> Vec<i32> {
    let len = channels[0].len();
    let mut ret = Vec::with_capacity(len * channels.len());
    for t in 0..len {
        for ch in channels {
            ret.push(ch[t]);
        }
    }
    ret
}

/// Serializes `stream` into a temporary file and returns the path.
fn write_to_tempfile(stream: &Stream) -> tempfile::TempPath {
    let mut file = NamedTempFile::new().expect("Failed to create temp file.");
    let mut sink = ByteSink::with_capacity(stream.count_bits());
    stream.write(&mut sink).expect("Bitstream formatting failed.");
    file.write_all(sink.as_slice()).expect("File write failed.");
    file.into_temp_path()
}

/// Runs an integrity test over the given encoding function.
///
/// This runs `encoder` function followed by `claxon`-based FLAC decoding, and
/// compares the waveforms of the original signal and reconstructed signal.
pub fn integrity_test<Enc>(encoder: Enc, src: &MemSource) -> Stream
where
    Enc: Fn(MemSource) -> Stream,
{
    let stream = encoder(src.clone());
    stream.verify().expect("Encoded stream should be valid.");

    let flac_path = write_to_tempfile(&stream);
    let mut reader = claxon::FlacReader::open(&flac_path).expect("claxon failed to open.");
    let streaminfo = reader.streaminfo();
    assert_eq!(streaminfo.channels as usize, src.channels());
    assert_eq!(streaminfo.sample_rate as usize, src.sample_rate());
    assert_eq!(streaminfo.bits_per_sample as usize, src.bits_per_sample());
    assert_eq!(streaminfo.samples, Some(src.len() as u64));

    let channels = src.channels();
    let loaded = reader
        .samples()
        .collect::<Result<Vec<i32>, _>>()
        .expect("claxon failed to decode.");
    assert_eq!(loaded.len(), src.as_slice().len());
    assert_samples_eq(&stream, &loaded, src.as_slice(), channels);
    stream
}

/// Same as [`integrity_test`] but decodes with the in-crate parser.
///
/// This also covers 32-bit streams that `claxon` doesn't support.
pub fn parser_integrity_test<Enc>(encoder: Enc, src: &MemSource) -> Stream
where
    Enc: Fn(MemSource) -> Stream,
{
    let stream = encoder(src.clone());
    stream.verify().expect("Encoded stream should be valid.");

    let bytes = stream.to_bytes();
    let (rest, decoded) =
        parser::stream::<VerboseError<&[u8]>>(&bytes).expect("Unexpected parse error.");
    assert!(rest.is_empty());
    let loaded = reconstruct(&decoded);
    assert_samples_eq(&stream, &loaded, src.as_slice(), src.channels());
    stream
}

fn assert_samples_eq(stream: &Stream, actual: &[i32], expected: &[i32], channels: usize) {
    let mut frame_starts = vec![];
    let mut offset = 0;
    for frame in stream.frames() {
        frame_starts.push(offset);
        offset += frame.block_size();
    }
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if a != e {
            let t = i / channels;
            let ch = i % channels;
            let head = frame_starts.partition_point(|s| *s <= t) - 1;
            panic!(
                "Failed at t={} of ch={} (block={}, in-block-t={})\n{:?}",
                t,
                ch,
                head,
                t - frame_starts[head],
                stream.frame(head).and_then(|f| f.subframe(ch))
            );
        }
    }
}

/// Decodes a subframe into `dest`.
fn reconstruct_subframe(subframe: &SubFrame, dest: &mut [i32]) {
    match subframe {
        SubFrame::Constant(c) => dest.fill(c.dc_offset()),
        SubFrame::Verbatim(c) => dest.copy_from_slice(c.samples()),
        SubFrame::FixedLpc(c) => {
            let order = c.order();
            dest[..order].copy_from_slice(c.warm_up());
            let residual: Vec<i32> = (0..dest.len()).map(|t| c.residual().residual(t)).collect();
            fixed::restore_signal(order, &residual, dest);
        }
        SubFrame::Lpc(c) => {
            let order = c.order();
            dest[..order].copy_from_slice(c.warm_up());
            let residual: Vec<i32> = (0..dest.len()).map(|t| c.residual().residual(t)).collect();
            lpc::restore_signal(c.parameters(), &residual, dest);
        }
    }
    let wasted = subframe.wasted_bits();
    if wasted > 0 {
        for v in dest.iter_mut() {
            *v <<= wasted;
        }
    }
}

/// Reconstructs interleaved samples from a [`Stream`].
///
/// Side channels are computed in `i64` as they can be 33 bits wide.
pub fn reconstruct(stream: &Stream) -> Vec<i32> {
    let channels = stream.stream_info().channels();
    let mut ret = Vec::with_capacity(stream.stream_info().total_samples() * channels);
    for frame in stream.frames() {
        let block_size = frame.block_size();
        let mut decoded = vec![vec![0i32; block_size]; channels];
        for (ch, dest) in decoded.iter_mut().enumerate() {
            let subframe = frame.subframe(ch).expect("Missing subframe.");
            reconstruct_subframe(subframe, dest);
        }
        let chs = *frame.header().channel_assignment();
        if !matches!(chs, ChannelAssignment::Independent(_)) {
            let (a, b) = decoded.split_at_mut(1);
            for (x, y) in a[0].iter_mut().zip(b[0].iter_mut()) {
                let (l, r) = match chs {
                    ChannelAssignment::LeftSide => (i64::from(*x), i64::from(*x) - i64::from(*y)),
                    ChannelAssignment::RightSide => (i64::from(*x) + i64::from(*y), i64::from(*y)),
                    _ => {
                        let side = i64::from(*y);
                        let mid = (i64::from(*x) << 1) | (side & 1);
                        ((mid + side) >> 1, (mid - side) >> 1)
                    }
                };
                *x = l as i32;
                *y = r as i32;
            }
        }
        for t in 0..block_size {
            for ch in &decoded {
                ret.push(ch[t]);
            }
        }
    }
    ret
}

/// Generates a random but valid [`Residual`] with four partitions.
pub fn make_random_residual<R: Rng>(mut rng: R, warmup_length: usize) -> Residual {
    // The shortest block (64) has 16 samples per partition.
    assert!(warmup_length < 16);
    let block_size = 4 * Uniform::from(16..=1024).sample(&mut rng);
    let partition_order: usize = 2;
    let nparts = 1usize << partition_order;
    let part_len = block_size / nparts;
    let method = if rng.gen_bool(0.5) {
        ResidualCodingMethod::Rice
    } else {
        ResidualCodingMethod::Rice2
    };

    let mut params = vec![];
    for p in 0..nparts {
        if p == 2 {
            params.push(PartitionParam::Escaped(12));
        } else {
            params.push(PartitionParam::Rice(rng.gen_range(0..=12)));
        }
    }
    let die = Uniform::from(-2048..=2047);
    let mut residuals = vec![];
    for t in 0..block_size {
        if t < warmup_length {
            residuals.push(0);
        } else if t / part_len == 0 {
            residuals.push(die.sample(&mut rng) / 16);
        } else {
            residuals.push(die.sample(&mut rng));
        }
    }
    Residual::new(
        method,
        partition_order,
        block_size,
        warmup_length,
        &params,
        &residuals,
    )
    .expect("Error in random construction of Residual")
}

/// Makes a frame with independent verbatim subframes.
///
/// `samples` are interleaved.
pub fn make_verbatim_frame(stream_info: &StreamInfo, samples: &[i32], frame_number: usize) -> Frame {
    let channels = stream_info.channels();
    let block_size = samples.len() / channels;
    let bits_per_sample = stream_info.bits_per_sample();
    let header = FrameHeader::new(
        block_size,
        ChannelAssignment::Independent(channels as u8),
        bits_per_sample,
        stream_info.sample_rate(),
        FrameOffset::Frame(frame_number as u32),
    )
    .expect("Invalid frame header");
    let subframes = (0..channels).map(|ch| {
        let signal: Vec<i32> = samples.iter().skip(ch).step_by(channels).copied().collect();
        Verbatim::new(&signal, bits_per_sample)
            .expect("Invalid verbatim subframe")
            .into()
    });
    Frame::new(header, subframes).expect("Invalid frame")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstruct_verbatim_frames() {
        let mut stream = Stream::new(8000, 2, 16).unwrap();
        let info = stream.stream_info().clone();
        let signal = interleave(&[
            constant_plus_noise(64, 100, 50),
            constant_plus_noise(64, -100, 50),
        ]);
        stream.add_frame(make_verbatim_frame(&info, &signal, 0));
        assert_eq!(reconstruct(&stream), signal);
    }

    #[test]
    fn sinusoid_is_reproducible() {
        let x = sinusoid_plus_noise(128, 32, 1000.0, 10);
        let y = sinusoid_plus_noise(128, 32, 1000.0, 10);
        assert_eq!(x, y);
        assert!(x.iter().all(|v| v.abs() <= 1010));
    }
}
