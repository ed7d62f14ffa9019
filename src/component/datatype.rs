// Copyright 2022 Google LLC
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

use std::cmp::max;
use std::cmp::min;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use super::bitrepr::BitRepr;
use super::metadata::Application;
use super::metadata::CueSheet;
use super::metadata::Picture;
use super::metadata::SeekPoint;
use super::metadata::SeekTable;
use super::metadata::VorbisComment;
use crate::constant::fixed::MAX_LPC_ORDER as MAX_FIXED_ORDER;
use crate::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use crate::constant::rice::ESCAPE_4BIT;
use crate::constant::rice::ESCAPE_5BIT;
use crate::constant::rice::MAX_RICE_PARAMETER;
use crate::constant::rice::MAX_RICE_PARAMETER_4BIT;
use crate::constant::rice::RAW_BITS_WIDTH;
use crate::error::Verify;
use crate::error::VerifyError;
use crate::rice;

/// [`STREAM`](https://xiph.org/flac/format.html#stream) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stream {
    stream_info: StreamInfo,
    metadata: Vec<MetadataBlock>,
    frames: Vec<Frame>,
}

impl Stream {
    /// Constructs `Stream` with the given meta information.
    ///
    /// # Errors
    ///
    /// Returns error if an input argument is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let stream = Stream::new(16000, 1, 16).unwrap();
    /// assert_eq!(stream.stream_info().channels(), 1);
    /// assert_eq!(stream.frame_count(), 0);
    /// ```
    pub fn new(
        sample_rate: usize,
        channels: usize,
        bits_per_sample: usize,
    ) -> Result<Self, VerifyError> {
        Ok(Self::with_stream_info(StreamInfo::new(
            sample_rate,
            channels,
            bits_per_sample,
        )?))
    }

    /// Constructs `Stream` with the given `StreamInfo`.
    pub const fn with_stream_info(stream_info: StreamInfo) -> Self {
        Self {
            stream_info,
            metadata: vec![],
            frames: vec![],
        }
    }

    /// Returns a reference to [`StreamInfo`] associated with `self`.
    #[inline]
    pub const fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    /// Returns a mutable reference to [`StreamInfo`] associated with `self`.
    #[inline]
    pub fn stream_info_mut(&mut self) -> &mut StreamInfo {
        &mut self.stream_info
    }

    /// Appends [`Frame`] to this `Stream` and updates [`StreamInfo`].
    ///
    /// MD5 digest is not updated here. It is the responsibility of the
    /// caller who observes the input samples.
    pub fn add_frame(&mut self, frame: Frame) {
        self.stream_info.update_frame_info(&frame);
        self.frames.push(frame);
    }

    /// Appends a metadata block after the existing blocks.
    ///
    /// The last-block flags of the existing blocks are updated so only the
    /// new block has it set.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// # use flacenc_core::bitsink::*;
    /// let mut stream = Stream::new(16000, 1, 24).unwrap();
    /// stream.add_metadata_block(MetadataBlockData::Padding(4));
    /// let mut sink = ByteSink::new();
    /// stream.write(&mut sink).unwrap();
    /// let bytes = sink.as_slice();
    /// assert_eq!(bytes[4], 0x00); // STREAMINFO, not last
    /// assert_eq!(bytes[bytes.len() - 8], 0x81); // PADDING, last
    /// ```
    pub fn add_metadata_block(&mut self, data: MetadataBlockData) {
        if let Some(last) = self.metadata.last_mut() {
            last.is_last = false;
        }
        self.metadata.push(MetadataBlock::from_parts(true, data));
    }

    /// Returns metadata blocks except for `STREAMINFO`.
    pub fn metadata(&self) -> &[MetadataBlock] {
        &self.metadata
    }

    /// Sets the length of the first padding block in bytes.
    ///
    /// Returns false if there's no padding block in the stream.
    pub fn set_padding_len(&mut self, len: usize) -> bool {
        for block in &mut self.metadata {
            if let MetadataBlockData::Padding(ref mut n) = block.data {
                *n = len;
                return true;
            }
        }
        false
    }

    /// Resolves the target seek points using the frames in this stream.
    ///
    /// Each seek point added via [`SeekPoint::target`] is moved to the first
    /// sample of the frame containing the target, and gets the byte offset
    /// of that frame relative to the first frame. Targets beyond the end of
    /// the stream, and duplicated points, become placeholders that are
    /// sorted to the end.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let mut stream = Stream::new(16000, 1, 16).unwrap();
    /// stream.add_metadata_block(MetadataBlockData::SeekTable(
    ///     SeekTable::from_targets(&[0, 100])
    /// ));
    /// for n in 0..2 {
    ///     let header = FrameHeader::new(
    ///         64, ChannelAssignment::Independent(1), 16, 16000, FrameOffset::Frame(n)
    ///     ).unwrap();
    ///     let sf = Constant::new(64, 0, 16).unwrap();
    ///     stream.add_frame(Frame::new(header, [sf.into()].into_iter()).unwrap());
    /// }
    /// stream.fill_seek_table();
    /// let MetadataBlockData::SeekTable(ref table) = stream.metadata()[0].data() else {
    ///     panic!()
    /// };
    /// assert_eq!(table.points()[0].sample_number(), 0);
    /// assert_eq!(table.points()[1].sample_number(), 64);
    /// assert_eq!(table.points()[1].frame_samples(), 64);
    /// ```
    pub fn fill_seek_table(&mut self) {
        let mut frame_starts: Vec<(u64, u64, u16)> = Vec::with_capacity(self.frames.len());
        let mut sample = 0u64;
        let mut offset = 0u64;
        for frame in &self.frames {
            let block_size = frame.block_size();
            frame_starts.push((sample, offset, block_size as u16));
            sample += block_size as u64;
            offset += (frame.count_bits() / 8) as u64;
        }
        let total = sample;

        for block in &mut self.metadata {
            if let MetadataBlockData::SeekTable(ref mut table) = block.data {
                for point in table.points_mut() {
                    if point.is_placeholder() {
                        continue;
                    }
                    let target = point.sample_number();
                    if target >= total {
                        *point = SeekPoint::placeholder();
                        continue;
                    }
                    let idx = frame_starts.partition_point(|(s, _, _)| *s <= target) - 1;
                    let (s, o, n) = frame_starts[idx];
                    *point = SeekPoint::new(s, o, n);
                }
                table.normalize();
            }
        }
    }

    /// Returns [`Frame`] for the given frame number.
    pub fn frame(&self, n: usize) -> Option<&Frame> {
        self.frames.get(n)
    }

    /// Returns the number of [`Frame`]s in the stream.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns [`Frame`]s as a slice.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// [`METADATA_BLOCK`](https://xiph.org/flac/format.html#metadata_block) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetadataBlock {
    pub(crate) is_last: bool,
    pub(crate) data: MetadataBlockData,
}

impl MetadataBlock {
    pub(crate) const fn from_parts(is_last: bool, data: MetadataBlockData) -> Self {
        Self { is_last, data }
    }

    /// Returns true if this is the last metadata block of the stream.
    pub const fn is_last(&self) -> bool {
        self.is_last
    }

    /// Returns the content of this block.
    pub const fn data(&self) -> &MetadataBlockData {
        &self.data
    }
}

/// Enum that covers variants of `METADATA_BLOCK`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "data"))]
#[non_exhaustive]
pub enum MetadataBlockData {
    /// `STREAMINFO` block.
    StreamInfo(StreamInfo),
    /// `PADDING` block with its length in bytes.
    Padding(usize),
    /// `APPLICATION` block.
    Application(Application),
    /// `SEEKTABLE` block.
    SeekTable(SeekTable),
    /// `VORBIS_COMMENT` block.
    VorbisComment(VorbisComment),
    /// `CUESHEET` block.
    CueSheet(CueSheet),
    /// `PICTURE` block.
    Picture(Picture),
    /// Block with a type tag this crate doesn't interpret.
    Unknown {
        /// 7-bit metadata type tag.
        typetag: u8,
        /// Metadata content represented in `Vec<u8>`.
        data: Vec<u8>,
    },
}

impl MetadataBlockData {
    /// Constructs new `MetadataBlockData::Unknown` from the content.
    ///
    /// # Errors
    ///
    /// Emits errors when `tag` is a known tag or out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// assert!(MetadataBlockData::new_unknown(0x12, &[0x34, 0x56]).is_ok());
    /// assert!(MetadataBlockData::new_unknown(0x04, &[]).is_err());
    /// assert!(MetadataBlockData::new_unknown(0x7F, &[]).is_err());
    /// ```
    pub fn new_unknown(tag: u8, data: &[u8]) -> Result<Self, VerifyError> {
        let ret = Self::Unknown {
            typetag: tag,
            data: data.to_owned(),
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Returns the 7-bit block type written in the block header.
    pub const fn typetag(&self) -> u8 {
        match self {
            Self::StreamInfo(_) => 0,
            Self::Padding(_) => 1,
            Self::Application(_) => 2,
            Self::SeekTable(_) => 3,
            Self::VorbisComment(_) => 4,
            Self::CueSheet(_) => 5,
            Self::Picture(_) => 6,
            Self::Unknown { typetag, .. } => *typetag,
        }
    }

    /// Obtain inner [`StreamInfo`] if `self` contains `StreamInfo`.
    pub const fn as_stream_info(&self) -> Option<&StreamInfo> {
        if let Self::StreamInfo(ref info) = self {
            Some(info)
        } else {
            None
        }
    }
}

impl From<StreamInfo> for MetadataBlockData {
    fn from(value: StreamInfo) -> Self {
        Self::StreamInfo(value)
    }
}

/// [`METADATA_BLOCK_STREAM_INFO`](https://xiph.org/flac/format.html#metadata_block_streaminfo) component.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamInfo {
    min_block_size: u16, // 16 bits
    max_block_size: u16, // 16 bits
    min_frame_size: u32, // 24 bits, 0 for unknown
    max_frame_size: u32, // 24 bits, 0 for unknown
    sample_rate: u32,    // 20 bits
    channels: u8,        // 3 bits, biased by -1
    bits_per_sample: u8, // 5 bits, biased by -1
    total_samples: u64,  // 36 bits, 0 for unknown
    md5: [u8; 16],
}

impl StreamInfo {
    /// Constructs new `StreamInfo`.
    ///
    /// Block and frame sizes are initialized so the first call of
    /// [`update_frame_info`] overwrites both ends. MD5 digest is all-zero,
    /// indicating that the signature is not computed.
    ///
    /// [`update_frame_info`]: StreamInfo::update_frame_info
    ///
    /// # Errors
    ///
    /// Returns an error if an input argument is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let info = StreamInfo::new(16000, 2, 16).unwrap();
    /// assert_eq!(info.max_frame_size(), 0);
    /// assert!(StreamInfo::new(16000, 9, 16).is_err());
    /// ```
    pub fn new(
        sample_rate: usize,
        channels: usize,
        bits_per_sample: usize,
    ) -> Result<Self, VerifyError> {
        let ret = Self {
            min_block_size: u16::MAX,
            max_block_size: 0,
            min_frame_size: u32::MAX,
            max_frame_size: 0,
            sample_rate: sample_rate.try_into().unwrap_or(u32::MAX),
            channels: channels.try_into().unwrap_or(u8::MAX),
            bits_per_sample: bits_per_sample.try_into().unwrap_or(u8::MAX),
            total_samples: 0,
            md5: [0; 16],
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Updates block/ frame sizes and `total_samples` with the given [`Frame`].
    pub fn update_frame_info(&mut self, frame: &Frame) {
        let block_size = frame.block_size() as u16;
        self.min_block_size = min(block_size, self.min_block_size);
        self.max_block_size = max(block_size, self.max_block_size);
        let frame_bytes = (frame.count_bits() / 8) as u32;
        self.min_frame_size = min(frame_bytes, self.min_frame_size);
        self.max_frame_size = max(frame_bytes, self.max_frame_size);
        self.total_samples += u64::from(block_size);
    }

    /// Returns the minimum frame size in bytes (0 if unknown).
    #[inline]
    pub fn min_frame_size(&self) -> usize {
        if self.min_frame_size == u32::MAX {
            0
        } else {
            self.min_frame_size as usize
        }
    }

    /// Returns the maximum frame size in bytes (0 if unknown).
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size as usize
    }

    /// Returns the minimum block size in samples.
    #[inline]
    pub fn min_block_size(&self) -> usize {
        self.min_block_size as usize
    }

    /// Returns the maximum block size in samples.
    #[inline]
    pub fn max_block_size(&self) -> usize {
        self.max_block_size as usize
    }

    /// Returns sampling rate of the stream.
    #[inline]
    pub fn sample_rate(&self) -> usize {
        self.sample_rate as usize
    }

    /// Returns the number of channels of the stream.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels as usize
    }

    /// Returns bits-per-sample of the stream.
    #[inline]
    pub fn bits_per_sample(&self) -> usize {
        self.bits_per_sample as usize
    }

    /// Returns the number of inter-channel samples of the stream.
    #[inline]
    pub fn total_samples(&self) -> usize {
        self.total_samples as usize
    }

    /// Sets the number of inter-channel samples.
    #[inline]
    pub fn set_total_samples(&mut self, n: usize) {
        self.total_samples = n as u64;
    }

    /// Returns md5 digest of the input waveform.
    #[inline]
    pub fn md5_digest(&self) -> &[u8; 16] {
        &self.md5
    }

    /// Sets MD5 digest of the input waveform.
    pub fn set_md5_digest(&mut self, digest: &[u8; 16]) {
        self.md5.copy_from_slice(digest);
    }

    /// Resets the minimum/ maximum block sizes.
    ///
    /// # Errors
    ///
    /// Returns error when the values are not valid block sizes, or when
    /// `min_value > max_value`.
    pub fn set_block_sizes(&mut self, min_value: usize, max_value: usize) -> Result<(), VerifyError> {
        let (Ok(lo), Ok(hi)) = (u16::try_from(min_value), u16::try_from(max_value)) else {
            return Err(VerifyError::new("block_size", "must be a 16-bit integer"));
        };
        if lo > hi {
            return Err(VerifyError::new(
                "min_block_size",
                "must be smaller than `max_block_size`",
            ));
        }
        self.min_block_size = lo;
        self.max_block_size = hi;
        Ok(())
    }

    /// Resets the minimum/ maximum frame sizes.
    ///
    /// # Errors
    ///
    /// Returns error when the values exceed 24 bits, or when
    /// `min_value > max_value`.
    pub fn set_frame_sizes(&mut self, min_value: usize, max_value: usize) -> Result<(), VerifyError> {
        if max_value >= 1 << 24 {
            return Err(VerifyError::new("max_frame_size", "must fit in 24 bits"));
        }
        if min_value > max_value {
            return Err(VerifyError::new(
                "min_frame_size",
                "must be smaller than `max_frame_size`",
            ));
        }
        self.min_frame_size = min_value as u32;
        self.max_frame_size = max_value as u32;
        Ok(())
    }
}

/// [`FRAME`](https://xiph.org/flac/format.html#frame) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frame {
    header: FrameHeader,
    subframes: Vec<SubFrame>,
}

impl Frame {
    /// Constructs `Frame` from header and subframes.
    ///
    /// # Errors
    ///
    /// Emits error if the number of channels specified in `header` does not
    /// match the number of `subframes`, or if a subframe has a different
    /// block size.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let chs = ChannelAssignment::Independent(1);
    /// let header = FrameHeader::new(192, chs, 8, 44100, FrameOffset::Frame(0)).unwrap();
    /// let subframe = Constant::new(192, -1, 8).unwrap();
    /// let frame = Frame::new(header, [subframe.into()].into_iter()).unwrap();
    /// assert_eq!(frame.block_size(), 192);
    /// ```
    pub fn new<I>(header: FrameHeader, subframes: I) -> Result<Self, VerifyError>
    where
        I: Iterator<Item = SubFrame>,
    {
        let ret = Self::from_parts(header, subframes.collect());
        ret.verify()?;
        Ok(ret)
    }

    #[inline]
    pub(crate) fn from_parts(header: FrameHeader, subframes: Vec<SubFrame>) -> Self {
        Self { header, subframes }
    }

    /// Deconstructs frame and transfers ownership of the data structs.
    #[inline]
    pub fn into_parts(self) -> (FrameHeader, Vec<SubFrame>) {
        (self.header, self.subframes)
    }

    /// Returns a reference to [`FrameHeader`] of this frame.
    #[inline]
    pub const fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Returns [`SubFrame`] for the given channel.
    #[inline]
    pub fn subframe(&self, ch: usize) -> Option<&SubFrame> {
        self.subframes.get(ch)
    }

    /// Returns the number of [`SubFrame`]s in this `Frame`.
    #[inline]
    pub fn subframe_count(&self) -> usize {
        self.subframes.len()
    }

    /// Returns [`SubFrame`]s as a slice.
    #[inline]
    pub fn subframes(&self) -> &[SubFrame] {
        &self.subframes
    }

    /// Returns block size of this frame.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.header.block_size()
    }
}

/// Enum for channel assignment in `FRAME_HEADER`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "data"))]
pub enum ChannelAssignment {
    /// Channels are coded independently. The field is the channel count.
    Independent(u8),
    /// Left channel followed by the side (left - right) channel.
    LeftSide,
    /// Side (left - right) channel followed by the right channel.
    RightSide,
    /// Mid ((left + right) >> 1) channel followed by the side channel.
    MidSide,
}

impl ChannelAssignment {
    /// Constructs `ChannelAssignment` from the 4-bit tag.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// assert_eq!(ChannelAssignment::from_tag(5), Some(ChannelAssignment::Independent(6)));
    /// assert_eq!(ChannelAssignment::from_tag(10), Some(ChannelAssignment::MidSide));
    /// assert_eq!(ChannelAssignment::from_tag(11), None);
    /// ```
    #[inline]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0..=7 => Some(Self::Independent(tag + 1)),
            8 => Some(Self::LeftSide),
            9 => Some(Self::RightSide),
            10 => Some(Self::MidSide),
            _ => None,
        }
    }

    /// Returns the 4-bit tag.
    #[inline]
    pub const fn tag(&self) -> u8 {
        match *self {
            Self::Independent(n) => n.wrapping_sub(1),
            Self::LeftSide => 8,
            Self::RightSide => 9,
            Self::MidSide => 10,
        }
    }

    /// Returns 1 if the channel `ch` is a side channel, otherwise 0.
    ///
    /// Side channels need an extra bit per sample.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let rs = ChannelAssignment::RightSide;
    /// assert_eq!(rs.bits_per_sample_offset(0), 1);
    /// assert_eq!(rs.bits_per_sample_offset(1), 0);
    /// ```
    #[inline]
    pub const fn bits_per_sample_offset(&self, ch: usize) -> usize {
        let side = match *self {
            Self::Independent(_) => usize::MAX,
            Self::LeftSide | Self::MidSide => 1,
            Self::RightSide => 0,
        };
        (ch == side) as usize
    }

    /// Returns the number of channels.
    #[inline]
    pub const fn channels(&self) -> usize {
        if let Self::Independent(n) = *self {
            n as usize
        } else {
            2
        }
    }
}

/// Location of a frame either by a frame count or by a starting-sample number.
///
/// `Self::Frame` implies fixed-blocking mode, and `Self::StartSample` implies
/// variable-blocking mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameOffset {
    /// Number of the preceding frames (31 bits.)
    Frame(u32),
    /// Number of the preceding inter-channel samples (36 bits.)
    StartSample(u64),
}

/// Block size specifier in [`FrameHeader`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum BlockSizeSpec {
    /// `size == 192`.
    S192,
    /// `size == 576 * 2^n` where `n` in `0..=3`.
    Pow2Mul576(u8),
    /// `size - 1` stored in a byte after the header.
    ExtraByte(u8),
    /// `size - 1` stored in two bytes after the header.
    ExtraTwoBytes(u16),
    /// `size == 256 * 2^n` where `n` in `0..=7`.
    Pow2Mul256(u8),
}

impl BlockSizeSpec {
    /// Constructs `BlockSizeSpec` for the block size.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// assert_eq!(BlockSizeSpec::from_size(4096), BlockSizeSpec::Pow2Mul256(4));
    /// assert_eq!(BlockSizeSpec::from_size(1152), BlockSizeSpec::Pow2Mul576(1));
    /// assert_eq!(BlockSizeSpec::from_size(1000), BlockSizeSpec::ExtraTwoBytes(999));
    /// assert_eq!(BlockSizeSpec::from_size(100), BlockSizeSpec::ExtraByte(99));
    /// ```
    #[inline]
    pub fn from_size(size: u16) -> Self {
        if size == 192 {
            return Self::S192;
        }
        if size % 576 == 0 && (size / 576).is_power_of_two() && size / 576 <= 8 {
            return Self::Pow2Mul576((size / 576).trailing_zeros() as u8);
        }
        if size % 256 == 0 && (size / 256).is_power_of_two() {
            return Self::Pow2Mul256((size / 256).trailing_zeros() as u8);
        }
        if size <= 256 {
            Self::ExtraByte((size.max(1) - 1) as u8)
        } else {
            Self::ExtraTwoBytes(size - 1)
        }
    }

    /// Returns the number of extra bits after the fixed part of the header.
    #[inline]
    pub const fn count_extra_bits(self) -> usize {
        match self {
            Self::ExtraByte(_) => 8,
            Self::ExtraTwoBytes(_) => 16,
            Self::S192 | Self::Pow2Mul576(_) | Self::Pow2Mul256(_) => 0,
        }
    }

    /// Returns the block size.
    #[inline]
    pub const fn block_size(self) -> usize {
        match self {
            Self::S192 => 192,
            Self::Pow2Mul576(x) => 576 << x,
            Self::ExtraByte(x) => x as usize + 1,
            Self::ExtraTwoBytes(x) => x as usize + 1,
            Self::Pow2Mul256(x) => 256 << x,
        }
    }

    /// Returns the 4-bit tag.
    #[inline]
    pub const fn tag(self) -> u8 {
        match self {
            Self::S192 => 1,
            Self::Pow2Mul576(x) => 2 + x,
            Self::ExtraByte(_) => 6,
            Self::ExtraTwoBytes(_) => 7,
            Self::Pow2Mul256(x) => 8 + x,
        }
    }

    /// Reconstructs the spec from the tag and the trailing value.
    #[cfg(test)]
    pub(crate) fn from_tag_and_data(tag: u8, value: Option<usize>) -> Option<Self> {
        Some(match tag {
            1 => Self::S192,
            2..=5 => Self::Pow2Mul576(tag - 2),
            6 => Self::ExtraByte(value? as u8),
            7 => Self::ExtraTwoBytes(value? as u16),
            8..=15 => Self::Pow2Mul256(tag - 8),
            _ => return None,
        })
    }
}

/// Bits-per-sample specifier in [`FrameHeader`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum SampleSizeSpec {
    /// Use the value in `STREAMINFO`.
    Unspecified = 0,
    /// 8 bits.
    B8 = 1,
    /// 12 bits.
    B12 = 2,
    /// 16 bits.
    B16 = 4,
    /// 20 bits.
    B20 = 5,
    /// 24 bits.
    B24 = 6,
    /// 32 bits.
    B32 = 7,
}

impl SampleSizeSpec {
    /// Constructs `SampleSizeSpec` from the tag.
    #[inline]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Unspecified),
            1 => Some(Self::B8),
            2 => Some(Self::B12),
            4 => Some(Self::B16),
            5 => Some(Self::B20),
            6 => Some(Self::B24),
            7 => Some(Self::B32),
            _ => None,
        }
    }

    /// Returns the 3-bit tag.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Constructs `SampleSizeSpec` from the bits-per-sample value.
    ///
    /// Bit depths without a dedicated code map to `Unspecified`.
    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        match bits {
            8 => Self::B8,
            12 => Self::B12,
            16 => Self::B16,
            20 => Self::B20,
            24 => Self::B24,
            32 => Self::B32,
            _ => Self::Unspecified,
        }
    }

    /// Returns the bits-per-sample value if specified.
    #[inline]
    pub const fn bits(self) -> Option<usize> {
        match self {
            Self::Unspecified => None,
            Self::B8 => Some(8),
            Self::B12 => Some(12),
            Self::B16 => Some(16),
            Self::B20 => Some(20),
            Self::B24 => Some(24),
            Self::B32 => Some(32),
        }
    }
}

/// Sample rate specifier in [`FrameHeader`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum SampleRateSpec {
    /// Use the value in `STREAMINFO`.
    Unspecified,
    /// 88.2kHz.
    R88_2kHz,
    /// 176.4kHz.
    R176_4kHz,
    /// 192kHz.
    R192kHz,
    /// 8kHz.
    R8kHz,
    /// 16kHz.
    R16kHz,
    /// 22.05kHz.
    R22_05kHz,
    /// 24kHz.
    R24kHz,
    /// 32kHz.
    R32kHz,
    /// 44.1kHz.
    R44_1kHz,
    /// 48kHz.
    R48kHz,
    /// 96kHz.
    R96kHz,
    /// Rate in kHz stored in a byte after the header.
    KHz(u8),
    /// Rate in Hz stored in two bytes after the header.
    Hz(u16),
    /// Rate in tens of Hz stored in two bytes after the header.
    DaHz(u16),
}

impl SampleRateSpec {
    /// Constructs `SampleRateSpec` from frequency in Hz.
    ///
    /// Rates without a dedicated code are tried as `KHz`, `DaHz` and then
    /// `Hz`. Returns `Unspecified` when none of them fits.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// assert_eq!(SampleRateSpec::from_freq(44100), SampleRateSpec::R44_1kHz);
    /// assert_eq!(SampleRateSpec::from_freq(12000), SampleRateSpec::KHz(12));
    /// assert_eq!(SampleRateSpec::from_freq(11025), SampleRateSpec::Hz(11025));
    /// assert_eq!(SampleRateSpec::from_freq(100010), SampleRateSpec::DaHz(10001));
    /// assert_eq!(SampleRateSpec::from_freq(700001), SampleRateSpec::Unspecified);
    /// ```
    pub fn from_freq(freq: u32) -> Self {
        match freq {
            88_200 => Self::R88_2kHz,
            176_400 => Self::R176_4kHz,
            192_000 => Self::R192kHz,
            8_000 => Self::R8kHz,
            16_000 => Self::R16kHz,
            22_050 => Self::R22_05kHz,
            24_000 => Self::R24kHz,
            32_000 => Self::R32kHz,
            44_100 => Self::R44_1kHz,
            48_000 => Self::R48kHz,
            96_000 => Self::R96kHz,
            f if f % 1000 == 0 && f / 1000 <= 0xFF => Self::KHz((f / 1000) as u8),
            f if f % 10 == 0 && f / 10 <= 0xFFFF => Self::DaHz((f / 10) as u16),
            f if f <= 0xFFFF => Self::Hz(f as u16),
            _ => Self::Unspecified,
        }
    }

    /// Reconstructs the spec from the tag and the trailing value.
    #[cfg(test)]
    pub(crate) fn from_tag_and_data(tag: u8, value: Option<usize>) -> Option<Self> {
        Some(match tag {
            0 => Self::Unspecified,
            1 => Self::R88_2kHz,
            2 => Self::R176_4kHz,
            3 => Self::R192kHz,
            4 => Self::R8kHz,
            5 => Self::R16kHz,
            6 => Self::R22_05kHz,
            7 => Self::R24kHz,
            8 => Self::R32kHz,
            9 => Self::R44_1kHz,
            10 => Self::R48kHz,
            11 => Self::R96kHz,
            12 => Self::KHz(value? as u8),
            13 => Self::Hz(value? as u16),
            14 => Self::DaHz(value? as u16),
            _ => return None,
        })
    }

    /// Returns the number of extra bits after the fixed part of the header.
    #[inline]
    pub const fn count_extra_bits(self) -> usize {
        match self {
            Self::KHz(_) => 8,
            Self::DaHz(_) | Self::Hz(_) => 16,
            _ => 0,
        }
    }

    /// Returns the 4-bit tag.
    #[inline]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::R88_2kHz => 1,
            Self::R176_4kHz => 2,
            Self::R192kHz => 3,
            Self::R8kHz => 4,
            Self::R16kHz => 5,
            Self::R22_05kHz => 6,
            Self::R24kHz => 7,
            Self::R32kHz => 8,
            Self::R44_1kHz => 9,
            Self::R48kHz => 10,
            Self::R96kHz => 11,
            Self::KHz(_) => 12,
            Self::Hz(_) => 13,
            Self::DaHz(_) => 14,
        }
    }

    /// Returns the sample rate in Hz if specified.
    pub const fn freq(self) -> Option<u32> {
        Some(match self {
            Self::Unspecified => return None,
            Self::R88_2kHz => 88_200,
            Self::R176_4kHz => 176_400,
            Self::R192kHz => 192_000,
            Self::R8kHz => 8_000,
            Self::R16kHz => 16_000,
            Self::R22_05kHz => 22_050,
            Self::R24kHz => 24_000,
            Self::R32kHz => 32_000,
            Self::R44_1kHz => 44_100,
            Self::R48kHz => 48_000,
            Self::R96kHz => 96_000,
            Self::KHz(v) => v as u32 * 1000,
            Self::Hz(v) => v as u32,
            Self::DaHz(v) => v as u32 * 10,
        })
    }
}

/// [`FRAME_HEADER`](https://xiph.org/flac/format.html#frame_header) component.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameHeader {
    block_size_spec: BlockSizeSpec,
    channel_assignment: ChannelAssignment,
    sample_size_spec: SampleSizeSpec,
    sample_rate_spec: SampleRateSpec,
    offset: FrameOffset,
}

impl FrameHeader {
    #[inline]
    pub(crate) const fn from_specs(
        block_size_spec: BlockSizeSpec,
        channel_assignment: ChannelAssignment,
        sample_size_spec: SampleSizeSpec,
        sample_rate_spec: SampleRateSpec,
        offset: FrameOffset,
    ) -> Self {
        Self {
            block_size_spec,
            channel_assignment,
            sample_size_spec,
            sample_rate_spec,
            offset,
        }
    }

    /// Constructs a frame header.
    ///
    /// Bit depths and sample rates that have no code in the header are
    /// written as "unspecified", i.e. taken from `STREAMINFO`.
    ///
    /// # Errors
    ///
    /// Returns an error if `block_size` or `channel_assignment` is invalid,
    /// or if the offset doesn't fit in the variable-length field.
    pub fn new(
        block_size: usize,
        channel_assignment: ChannelAssignment,
        bits_per_sample: usize,
        sample_rate: usize,
        offset: FrameOffset,
    ) -> Result<Self, VerifyError> {
        if block_size == 0 {
            return Err(VerifyError::new("block_size", "must be positive"));
        }
        let block_size: u16 = block_size
            .try_into()
            .map_err(|_| VerifyError::new("block_size", "must be a 16-bit integer"))?;
        let ret = Self::from_specs(
            BlockSizeSpec::from_size(block_size),
            channel_assignment,
            SampleSizeSpec::from_bits(bits_per_sample),
            SampleRateSpec::from_freq(sample_rate.try_into().unwrap_or(u32::MAX)),
            offset,
        );
        ret.verify()?;
        Ok(ret)
    }

    /// Returns true if the header is for the variable-blocking stream.
    #[inline]
    pub const fn is_variable_blocking(&self) -> bool {
        matches!(self.offset, FrameOffset::StartSample(_))
    }

    /// Returns the frame offset.
    #[inline]
    pub const fn offset(&self) -> FrameOffset {
        self.offset
    }

    #[inline]
    pub(crate) const fn sample_rate_spec(&self) -> SampleRateSpec {
        self.sample_rate_spec
    }

    #[inline]
    pub(crate) const fn sample_size_spec(&self) -> SampleSizeSpec {
        self.sample_size_spec
    }

    #[inline]
    pub(crate) const fn block_size_spec(&self) -> BlockSizeSpec {
        self.block_size_spec
    }

    #[inline]
    pub(crate) fn reset_channel_assignment(&mut self, channel_assignment: ChannelAssignment) {
        self.channel_assignment = channel_assignment;
    }

    /// Returns the block size.
    #[inline]
    pub const fn block_size(&self) -> usize {
        self.block_size_spec.block_size()
    }

    /// Returns bits-per-sample if it is written in the header.
    #[inline]
    pub const fn bits_per_sample(&self) -> Option<usize> {
        self.sample_size_spec.bits()
    }

    /// Returns the channel assignment.
    #[inline]
    pub const fn channel_assignment(&self) -> &ChannelAssignment {
        &self.channel_assignment
    }
}

/// [`SUBFRAME`](https://xiph.org/flac/format.html#subframe) component.
#[derive(Clone, Debug)]
#[allow(clippy::large_enum_variant)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum SubFrame {
    /// `SUBFRAME_CONSTANT`.
    Constant(Constant),
    /// `SUBFRAME_VERBATIM`.
    Verbatim(Verbatim),
    /// `SUBFRAME_FIXED`.
    FixedLpc(FixedLpc),
    /// `SUBFRAME_LPC`.
    Lpc(Lpc),
}

impl SubFrame {
    /// Returns the number of wasted bits signaled in the subframe header.
    pub const fn wasted_bits(&self) -> usize {
        (match self {
            Self::Constant(c) => c.wasted_bits,
            Self::Verbatim(c) => c.wasted_bits,
            Self::FixedLpc(c) => c.wasted_bits,
            Self::Lpc(c) => c.wasted_bits,
        }) as usize
    }

    /// Returns the width of the samples stored in this subframe.
    pub const fn bits_per_sample(&self) -> usize {
        (match self {
            Self::Constant(c) => c.bits_per_sample,
            Self::Verbatim(c) => c.bits_per_sample,
            Self::FixedLpc(c) => c.bits_per_sample,
            Self::Lpc(c) => c.bits_per_sample,
        }) as usize
    }

    /// Sets the number of wasted bits.
    ///
    /// The samples in `self` must already be shifted right by `n` bits.
    pub(crate) fn set_wasted_bits(&mut self, n: usize) {
        let n = n as u8;
        match self {
            Self::Constant(c) => c.wasted_bits = n,
            Self::Verbatim(c) => c.wasted_bits = n,
            Self::FixedLpc(c) => c.wasted_bits = n,
            Self::Lpc(c) => c.wasted_bits = n,
        }
    }
}

impl From<Constant> for SubFrame {
    fn from(c: Constant) -> Self {
        Self::Constant(c)
    }
}

impl From<Verbatim> for SubFrame {
    fn from(c: Verbatim) -> Self {
        Self::Verbatim(c)
    }
}

impl From<FixedLpc> for SubFrame {
    fn from(c: FixedLpc) -> Self {
        Self::FixedLpc(c)
    }
}

impl From<Lpc> for SubFrame {
    fn from(c: Lpc) -> Self {
        Self::Lpc(c)
    }
}

/// [`SUBFRAME_CONSTANT`](https://xiph.org/flac/format.html#subframe_constant) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Constant {
    block_size: usize,
    dc_offset: i32,
    bits_per_sample: u8,
    wasted_bits: u8,
}

impl Constant {
    /// Constructs new `Constant`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dc_offset` doesn't fit in `bits_per_sample`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// assert!(Constant::new(64, 127, 8).is_ok());
    /// assert!(Constant::new(64, 128, 8).is_err());
    /// ```
    pub fn new(block_size: usize, dc_offset: i32, bits_per_sample: usize) -> Result<Self, VerifyError> {
        let ret = Self::from_parts(block_size, dc_offset, bits_per_sample as u8);
        ret.verify()?;
        Ok(ret)
    }

    #[inline]
    pub(crate) const fn from_parts(block_size: usize, dc_offset: i32, bits_per_sample: u8) -> Self {
        Self {
            block_size,
            dc_offset,
            bits_per_sample,
            wasted_bits: 0,
        }
    }

    /// Returns the block size.
    #[inline]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the constant value.
    #[inline]
    pub const fn dc_offset(&self) -> i32 {
        self.dc_offset
    }

    /// Returns the bits-per-sample.
    #[inline]
    pub const fn bits_per_sample(&self) -> usize {
        self.bits_per_sample as usize
    }

    /// Returns the number of wasted bits.
    #[inline]
    pub const fn wasted_bits(&self) -> usize {
        self.wasted_bits as usize
    }
}

/// [`SUBFRAME_VERBATIM`](https://xiph.org/flac/format.html#subframe_verbatim) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Verbatim {
    data: Vec<i32>,
    bits_per_sample: u8,
    wasted_bits: u8,
}

impl Verbatim {
    /// Constructs new `Verbatim`.
    ///
    /// # Errors
    ///
    /// Returns an error if a sample doesn't fit in `bits_per_sample`.
    pub fn new(samples: &[i32], bits_per_sample: usize) -> Result<Self, VerifyError> {
        let ret = Self::from_samples(samples, bits_per_sample as u8);
        ret.verify()?;
        Ok(ret)
    }

    pub(crate) fn from_samples(samples: &[i32], bits_per_sample: u8) -> Self {
        Self {
            data: Vec::from(samples),
            bits_per_sample,
            wasted_bits: 0,
        }
    }

    /// Bit count of a verbatim subframe, without constructing it.
    #[inline]
    pub(crate) const fn count_bits_from_metadata(
        block_size: usize,
        bits_per_sample: usize,
        wasted_bits: usize,
    ) -> usize {
        8 + wasted_bits + block_size * bits_per_sample
    }

    /// Returns the samples.
    #[inline]
    pub fn samples(&self) -> &[i32] {
        &self.data
    }

    /// Returns the bits-per-sample.
    #[inline]
    pub const fn bits_per_sample(&self) -> usize {
        self.bits_per_sample as usize
    }

    /// Returns the number of wasted bits.
    #[inline]
    pub const fn wasted_bits(&self) -> usize {
        self.wasted_bits as usize
    }
}

/// [`SUBFRAME_FIXED`](https://xiph.org/flac/format.html#subframe_fixed) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixedLpc {
    warm_up: heapless::Vec<i32, MAX_FIXED_ORDER>,
    residual: Residual,
    bits_per_sample: u8,
    wasted_bits: u8,
}

impl FixedLpc {
    /// Constructs new `FixedLpc`. The order is `warm_up.len()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is greater than 4, or if a warm-up
    /// sample doesn't fit in `bits_per_sample`.
    pub fn new(warm_up: &[i32], residual: Residual, bits_per_sample: usize) -> Result<Self, VerifyError> {
        let warm_up = heapless::Vec::from_slice(warm_up)
            .map_err(|()| VerifyError::new("warm_up", "must be shorter than (or equal to) 4"))?;
        let ret = Self::from_parts(warm_up, residual, bits_per_sample as u8);
        ret.verify()?;
        Ok(ret)
    }

    #[inline]
    pub(crate) const fn from_parts(
        warm_up: heapless::Vec<i32, MAX_FIXED_ORDER>,
        residual: Residual,
        bits_per_sample: u8,
    ) -> Self {
        Self {
            warm_up,
            residual,
            bits_per_sample,
            wasted_bits: 0,
        }
    }

    /// Returns the predictor order.
    #[inline]
    pub fn order(&self) -> usize {
        self.warm_up.len()
    }

    /// Returns the warm-up samples.
    #[inline]
    pub fn warm_up(&self) -> &[i32] {
        &self.warm_up
    }

    /// Returns the residual.
    #[inline]
    pub const fn residual(&self) -> &Residual {
        &self.residual
    }

    /// Returns the bits-per-sample.
    #[inline]
    pub const fn bits_per_sample(&self) -> usize {
        self.bits_per_sample as usize
    }

    /// Returns the number of wasted bits.
    #[inline]
    pub const fn wasted_bits(&self) -> usize {
        self.wasted_bits as usize
    }
}

/// [`SUBFRAME_LPC`](https://xiph.org/flac/format.html#subframe_lpc) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Lpc {
    parameters: QuantizedParameters,
    warm_up: heapless::Vec<i32, MAX_LPC_ORDER>,
    residual: Residual,
    bits_per_sample: u8,
    wasted_bits: u8,
}

impl Lpc {
    /// Constructs new `Lpc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of warm-up samples doesn't match the
    /// order of `parameters`, or if a warm-up sample doesn't fit.
    pub fn new(
        warm_up: &[i32],
        parameters: QuantizedParameters,
        residual: Residual,
        bits_per_sample: usize,
    ) -> Result<Self, VerifyError> {
        if warm_up.len() != parameters.order() {
            return Err(VerifyError::new("warm_up", "must have `order` elements"));
        }
        let warm_up = heapless::Vec::from_slice(warm_up)
            .map_err(|()| VerifyError::new("warm_up", "must be shorter than 33"))?;
        let ret = Self::from_parts(warm_up, parameters, residual, bits_per_sample as u8);
        ret.verify()?;
        Ok(ret)
    }

    #[inline]
    pub(crate) fn from_parts(
        warm_up: heapless::Vec<i32, MAX_LPC_ORDER>,
        parameters: QuantizedParameters,
        residual: Residual,
        bits_per_sample: u8,
    ) -> Self {
        debug_assert_eq!(warm_up.len(), parameters.order());
        Self {
            parameters,
            warm_up,
            residual,
            bits_per_sample,
            wasted_bits: 0,
        }
    }

    /// Returns the predictor order.
    #[inline]
    pub fn order(&self) -> usize {
        self.parameters.order()
    }

    /// Returns the warm-up samples.
    #[inline]
    pub fn warm_up(&self) -> &[i32] {
        &self.warm_up
    }

    /// Returns the quantized coefficients.
    #[inline]
    pub const fn parameters(&self) -> &QuantizedParameters {
        &self.parameters
    }

    /// Returns the residual.
    #[inline]
    pub const fn residual(&self) -> &Residual {
        &self.residual
    }

    /// Returns the bits-per-sample.
    #[inline]
    pub const fn bits_per_sample(&self) -> usize {
        self.bits_per_sample as usize
    }

    /// Returns the number of wasted bits.
    #[inline]
    pub const fn wasted_bits(&self) -> usize {
        self.wasted_bits as usize
    }
}

/// Quantized LPC coefficients.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QuantizedParameters {
    coefs: heapless::Vec<i16, MAX_LPC_ORDER>,
    shift: i8,
    precision: u8,
}

impl QuantizedParameters {
    /// Constructs `QuantizedParameters`.
    ///
    /// # Errors
    ///
    /// Returns an error if the order, the shift, or a coefficient is out of
    /// range for the precision.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let params = QuantizedParameters::new(&[7, -8], 3, 4).unwrap();
    /// assert_eq!(params.order(), 2);
    /// assert_eq!(params.dequantized(), vec![0.875, -1.0]);
    /// assert!(QuantizedParameters::new(&[8], 3, 4).is_err());
    /// ```
    pub fn new(coefs: &[i16], shift: i8, precision: usize) -> Result<Self, VerifyError> {
        let coefs = heapless::Vec::from_slice(coefs)
            .map_err(|()| VerifyError::new("coefs", "must be shorter than 33"))?;
        let ret = Self::from_parts(coefs, shift, precision);
        ret.verify()?;
        Ok(ret)
    }

    #[inline]
    pub(crate) fn from_parts(coefs: heapless::Vec<i16, MAX_LPC_ORDER>, shift: i8, precision: usize) -> Self {
        Self {
            coefs,
            shift,
            precision: precision as u8,
        }
    }

    /// Returns the predictor order.
    #[inline]
    pub fn order(&self) -> usize {
        self.coefs.len()
    }

    /// Returns the coefficient precision in bits.
    #[inline]
    pub const fn precision(&self) -> usize {
        self.precision as usize
    }

    /// Returns the right shift applied to the prediction.
    #[inline]
    pub const fn shift(&self) -> i8 {
        self.shift
    }

    /// Returns the coefficient at `idx` if `idx < order`.
    pub fn coefficient(&self, idx: usize) -> Option<i16> {
        self.coefs.get(idx).copied()
    }

    /// Returns the coefficients.
    #[inline]
    pub fn coefs(&self) -> &[i16] {
        &self.coefs
    }

    /// Returns the coefficients scaled back to real values.
    pub fn dequantized(&self) -> Vec<f32> {
        let scale = 2.0f32.powi(-i32::from(self.shift));
        self.coefs.iter().map(|c| f32::from(*c) * scale).collect()
    }
}

/// Coding method of [`Residual`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResidualCodingMethod {
    /// Partitioned Rice coding with 4-bit parameters.
    Rice,
    /// Partitioned Rice coding with 5-bit parameters.
    Rice2,
}

impl ResidualCodingMethod {
    /// Returns the 2-bit tag.
    #[inline]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Rice => 0,
            Self::Rice2 => 1,
        }
    }

    /// Constructs the method from the 2-bit tag.
    #[inline]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Rice),
            1 => Some(Self::Rice2),
            _ => None,
        }
    }

    /// Returns the width of the parameter field.
    #[inline]
    pub const fn parameter_bits(self) -> usize {
        match self {
            Self::Rice => 4,
            Self::Rice2 => 5,
        }
    }

    /// Returns the parameter value reserved for escaped partitions.
    #[inline]
    pub const fn escape_code(self) -> u8 {
        match self {
            Self::Rice => ESCAPE_4BIT,
            Self::Rice2 => ESCAPE_5BIT,
        }
    }

    /// Returns the largest usable Rice parameter.
    #[inline]
    pub const fn max_parameter(self) -> usize {
        match self {
            Self::Rice => MAX_RICE_PARAMETER_4BIT,
            Self::Rice2 => MAX_RICE_PARAMETER,
        }
    }
}

/// Coding of a residual partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PartitionParam {
    /// Rice-coded with the parameter.
    Rice(u8),
    /// Escaped; samples are stored in two's complement of the given width.
    Escaped(u8),
}

/// [`RESIDUAL`](https://xiph.org/flac/format.html#residual) component.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Residual {
    method: ResidualCodingMethod,
    partition_order: u8,
    block_size: usize,
    warmup_length: usize,
    params: Vec<PartitionParam>,
    // Zero-padded for warm-up samples.
    residuals: Vec<i32>,
    code_bits: usize,
}

impl Residual {
    /// Constructs `Residual`.
    ///
    /// `residuals` must have `block_size` elements where the first
    /// `warmup_length` elements are zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if the partitioning or a parameter is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let residual = Residual::new(
    ///     ResidualCodingMethod::Rice,
    ///     1,
    ///     16,
    ///     2,
    ///     &[PartitionParam::Rice(1), PartitionParam::Escaped(3)],
    ///     &[0, 0, 1, -1, 2, 0, 0, 1, 3, -4, 0, 0, 0, 1, 2, 3],
    /// ).unwrap();
    /// assert_eq!(residual.residual(9), -4);
    /// ```
    pub fn new(
        method: ResidualCodingMethod,
        partition_order: usize,
        block_size: usize,
        warmup_length: usize,
        params: &[PartitionParam],
        residuals: &[i32],
    ) -> Result<Self, VerifyError> {
        let ret = Self::from_parts(
            method,
            partition_order as u8,
            block_size,
            warmup_length,
            params.to_owned(),
            residuals.to_owned(),
        );
        ret.verify()?;
        Ok(ret)
    }

    #[inline]
    pub(crate) fn from_parts(
        method: ResidualCodingMethod,
        partition_order: u8,
        block_size: usize,
        warmup_length: usize,
        params: Vec<PartitionParam>,
        residuals: Vec<i32>,
    ) -> Self {
        let mut ret = Self {
            method,
            partition_order,
            block_size,
            warmup_length,
            params,
            residuals,
            code_bits: 0,
        };
        ret.code_bits = ret.compute_code_bits();
        ret
    }

    /// Counts bits by scanning all the residual samples.
    pub(crate) fn compute_code_bits(&self) -> usize {
        let field_bits = self.method.parameter_bits();
        let mut bits = 2 + 4;
        for (p, param) in self.params.iter().enumerate() {
            let range = self.partition_range(p);
            let len = range.len();
            bits += field_bits;
            bits += match *param {
                PartitionParam::Rice(k) => {
                    let k = k as usize;
                    let Some(part) = self.residuals.get(range) else {
                        continue;
                    };
                    part.iter()
                        .map(|v| (rice::encode_signbit(*v) >> k) as usize + 1 + k)
                        .sum()
                }
                PartitionParam::Escaped(w) => RAW_BITS_WIDTH + len * w as usize,
            };
        }
        bits
    }

    /// Returns the coding method.
    #[inline]
    pub const fn method(&self) -> ResidualCodingMethod {
        self.method
    }

    /// Returns the partition order.
    #[inline]
    pub const fn partition_order(&self) -> usize {
        self.partition_order as usize
    }

    /// Returns the residual sample at `t`.
    #[inline]
    pub fn residual(&self, t: usize) -> i32 {
        self.residuals[t]
    }

    /// Returns the range of samples coded in the partition `p`.
    ///
    /// The first partition excludes warm-up samples.
    #[inline]
    pub fn partition_range(&self, p: usize) -> Range<usize> {
        let part_len = self.block_size >> self.partition_order;
        let start = max(p * part_len, self.warmup_length);
        let end = (p + 1) * part_len;
        start..max(start, end)
    }

    #[inline]
    pub(crate) const fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub(crate) const fn warmup_length(&self) -> usize {
        self.warmup_length
    }

    #[inline]
    pub(crate) fn params(&self) -> &[PartitionParam] {
        &self.params
    }

    #[inline]
    pub(crate) fn residuals(&self) -> &[i32] {
        &self.residuals
    }

    #[inline]
    pub(crate) const fn code_bits(&self) -> usize {
        self.code_bits
    }
}
