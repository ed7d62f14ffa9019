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

//! Module for input source handling.

use md5::Digest;
use md5::Md5;

use crate::constant::MAX_BITS_PER_SAMPLE;
use crate::constant::MAX_CHANNELS;
use crate::constant::MAX_SAMPLE_RATE;
use crate::constant::MIN_BITS_PER_SAMPLE;
use crate::error::verify_range;
use crate::error::SourceError;
use crate::error::SourceErrorReason;
use crate::error::verify_true;
use crate::error::Verify;
use crate::error::VerifyError;

/// Reorders interleaved samples into a channel-major buffer.
///
/// `dest` is treated as `channels` rows of `dest.len() / channels` samples.
/// Positions not covered by `interleaved` are filled with zeros.
pub fn deinterleave(interleaved: &[i32], channels: usize, dest: &mut [i32]) {
    let samples = dest.len() / channels;
    let src_samples = interleaved.len() / channels;
    for t in 0..samples {
        for ch in 0..channels {
            dest[samples * ch + t] = if t < src_samples {
                interleaved[channels * t + ch]
            } else {
                0i32
            }
        }
    }
}

/// Reusable buffer for multi-channel framed signals.
#[derive(Clone, Debug)]
pub struct FrameBuf {
    samples: Vec<i32>,
    channels: usize,
    size: usize,
    filled: usize,
}

impl FrameBuf {
    /// Constructs `FrameBuf` of the specified size.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::source::FrameBuf;
    /// let fb = FrameBuf::with_size(2, 1024);
    /// assert_eq!(fb.size(), 1024);
    /// assert_eq!(fb.channel_slice(1).len(), 1024);
    /// ```
    pub fn with_size(channels: usize, size: usize) -> Self {
        Self {
            samples: vec![0i32; size * channels],
            channels,
            size,
            filled: 0,
        }
    }

    /// Returns the capacity in the number of inter-channel samples.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of inter-channel samples read by the last fill.
    #[inline]
    pub const fn filled(&self) -> usize {
        self.filled
    }

    /// Resizes `FrameBuf`. Contents are invalidated.
    pub fn resize(&mut self, new_size: usize) {
        self.size = new_size;
        self.filled = 0;
        self.samples.resize(self.size * self.channels, 0i32);
    }

    /// Fills samples from the interleaved slice, and resets the rest to zero.
    pub fn fill_from_interleaved(&mut self, interleaved: &[i32]) {
        self.filled = std::cmp::min(interleaved.len() / self.channels, self.size);
        deinterleave(interleaved, self.channels, &mut self.samples);
    }

    /// Returns the number of channels.
    #[inline]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Returns samples from the given channel.
    #[inline]
    pub fn channel_slice(&self, ch: usize) -> &[i32] {
        &self.samples[ch * self.size..(ch + 1) * self.size]
    }

    /// Returns mutable samples from the given channel.
    #[inline]
    pub fn channel_slice_mut(&mut self, ch: usize) -> &mut [i32] {
        &mut self.samples[ch * self.size..(ch + 1) * self.size]
    }

    /// Feeds the first `len` samples to the MD5 context.
    ///
    /// Samples are serialized as interleaved little-endian signed integers
    /// with `ceil(bits_per_sample / 8)` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `bits_per_sample > 32`.
    pub fn update_md5(&self, bits_per_sample: usize, len: usize, context: &mut Md5) {
        let bytes_per_sample = (bits_per_sample + 7) / 8;
        assert!(bytes_per_sample <= 4);
        for t in 0..len {
            for ch in 0..self.channels {
                let bytes = self.channel_slice(ch)[t].to_le_bytes();
                context.update(&bytes[0..bytes_per_sample]);
            }
        }
    }
}

/// Trait representing the input stream for the encoder.
pub trait Source {
    /// Returns the number of channels.
    fn channels(&self) -> usize;
    /// Returns the number of bits per sample.
    fn bits_per_sample(&self) -> usize;
    /// Returns sampling rate in Hz.
    fn sample_rate(&self) -> usize;
    /// Reads the next block to `dest` and returns the number of samples read.
    ///
    /// Returning zero indicates the end of the stream. Samples in `dest`
    /// beyond the returned length are zero.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` doesn't match the source, or reading fails.
    fn read_samples(&mut self, dest: &mut FrameBuf) -> Result<usize, SourceError>;
    /// Returns length of source if it's defined.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Source with preloaded interleaved samples.
#[derive(Clone, Debug)]
pub struct MemSource {
    channels: usize,
    bits_per_sample: usize,
    sample_rate: usize,
    samples: Vec<i32>,
    read_head: usize,
}

impl MemSource {
    /// Constructs `MemSource` from interleaved samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream parameters are out of the supported
    /// range, or if `samples` is not a multiple of `channels`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::source::*;
    /// let src = MemSource::from_samples(&[0, 1, 2, 3, 4, 5], 2, 16, 8000).unwrap();
    /// assert_eq!(src.len(), 3);
    /// assert!(MemSource::from_samples(&[0, 1, 2], 2, 16, 8000).is_err());
    /// ```
    pub fn from_samples(
        samples: &[i32],
        channels: usize,
        bits_per_sample: usize,
        sample_rate: usize,
    ) -> Result<Self, VerifyError> {
        let ret = Self {
            channels,
            bits_per_sample,
            sample_rate,
            samples: samples.to_owned(),
            read_head: 0,
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Returns sample buffer as a raw (interleaved) slice.
    #[inline]
    pub fn as_slice(&self) -> &[i32] {
        &self.samples
    }

    /// Returns the number of inter-channel samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Returns true if the source has no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Moves the read head back to the beginning.
    pub fn rewind(&mut self) {
        self.read_head = 0;
    }
}

impl Verify for MemSource {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("channels", self.channels, 1..=MAX_CHANNELS)?;
        verify_range!(
            "bits_per_sample",
            self.bits_per_sample,
            MIN_BITS_PER_SAMPLE..=MAX_BITS_PER_SAMPLE
        )?;
        verify_range!("sample_rate", self.sample_rate, 1..=MAX_SAMPLE_RATE)?;
        verify_true!(
            "samples",
            self.samples.len() % self.channels == 0,
            "must be a multiple of the number of channels"
        )?;
        if self.bits_per_sample < MAX_BITS_PER_SAMPLE {
            let max = (1i64 << (self.bits_per_sample - 1)) - 1;
            let min = -(1i64 << (self.bits_per_sample - 1));
            verify_true!(
                "samples",
                self.samples
                    .iter()
                    .all(|v| (min..=max).contains(&i64::from(*v))),
                "must fit in `bits_per_sample`"
            )?;
        }
        Ok(())
    }
}

impl Source for MemSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn bits_per_sample(&self) -> usize {
        self.bits_per_sample
    }

    fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    fn read_samples(&mut self, dest: &mut FrameBuf) -> Result<usize, SourceError> {
        if dest.channels() != self.channels {
            return Err(SourceError::by_reason(SourceErrorReason::InvalidBuffer));
        }
        let to_read = dest.size() * self.channels;
        let begin = std::cmp::min(self.read_head * self.channels, self.samples.len());
        let end = std::cmp::min(begin + to_read, self.samples.len());
        let src = &self.samples[begin..end];

        dest.fill_from_interleaved(src);
        let read = src.len() / self.channels;
        self.read_head += read;
        Ok(read)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}
