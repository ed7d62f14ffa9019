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

use crate::bitsink::utf8like_bytesize;
use crate::bitsink::BitSink;
use crate::bitsink::ByteSink;
use crate::constant::metadata::BLOCK_HEADER_BITS;
use crate::constant::metadata::CUESHEET_CATALOG_BYTES;
use crate::constant::metadata::CUESHEET_INDEX_RESERVED_BITS;
use crate::constant::metadata::CUESHEET_RESERVED_BITS;
use crate::constant::metadata::CUESHEET_TRACK_RESERVED_BITS;
use crate::constant::metadata::MAX_BLOCK_BYTES;
use crate::constant::metadata::SEEK_POINT_BYTES;
use crate::constant::qlpc::PRECISION_BITS;
use crate::constant::qlpc::SHIFT_BITS;
use crate::constant::rice::RAW_BITS_WIDTH;
use crate::error::OutputError;
use crate::error::RangeError;
use crate::reusable;
use crate::reuse;
use crate::rice::encode_signbit;

use super::datatype::BlockSizeSpec;
use super::datatype::ChannelAssignment;
use super::datatype::Constant;
use super::datatype::FixedLpc;
use super::datatype::Frame;
use super::datatype::FrameHeader;
use super::datatype::FrameOffset;
use super::datatype::Lpc;
use super::datatype::MetadataBlock;
use super::datatype::MetadataBlockData;
use super::datatype::PartitionParam;
use super::datatype::Residual;
use super::datatype::SampleRateSpec;
use super::datatype::Stream;
use super::datatype::StreamInfo;
use super::datatype::SubFrame;
use super::datatype::Verbatim;
use super::metadata::Application;
use super::metadata::CueSheet;
use super::metadata::Picture;
use super::metadata::SeekTable;
use super::metadata::VorbisComment;

pub mod seal_bit_repr {
    pub trait Sealed {}
    impl Sealed for super::Stream {}
    impl Sealed for super::MetadataBlock {}
    impl Sealed for super::MetadataBlockData {}
    impl Sealed for super::StreamInfo {}
    impl Sealed for super::Application {}
    impl Sealed for super::SeekTable {}
    impl Sealed for super::VorbisComment {}
    impl Sealed for super::CueSheet {}
    impl Sealed for super::Picture {}
    impl Sealed for super::Frame {}
    impl Sealed for super::FrameHeader {}
    impl Sealed for super::ChannelAssignment {}
    impl Sealed for super::SubFrame {}
    impl Sealed for super::Constant {}
    impl Sealed for super::FixedLpc {}
    impl Sealed for super::Verbatim {}
    impl Sealed for super::Lpc {}
    impl Sealed for super::Residual {}
}

/// FLAC components that can be represented in a bit sequence.
pub trait BitRepr: seal_bit_repr::Sealed {
    /// Counts the number of bits required to store the component.
    fn count_bits(&self) -> usize;

    /// Writes the bit sequence to `BitSink`.
    ///
    /// # Errors
    ///
    /// This function returns error if `self` contains an invalid value that
    /// does not fit to FLAC's bitstream format, or if a `BitSink` method
    /// returned an error.
    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>>;

    /// Test utility for obtaining bits as a [`Vec`] of [`u8`].
    #[cfg(test)]
    fn to_bytes(&self) -> Vec<u8> {
        let mut sink = ByteSink::new();
        self.write(&mut sink).expect("No error expected");
        sink.into_inner()
    }

    /// Test utility for obtaining bits as eight-bit separated `String`.
    #[cfg(test)]
    fn to_bitstring(&self) -> String {
        let mut sink = ByteSink::new();
        self.write(&mut sink).expect("No error expected");
        sink.to_bitstring()
    }

    #[cfg(test)]
    /// Checks if the number of bits actually written equals to the expected number of bits.
    ///
    /// # Errors
    ///
    /// If the check passed i.e. the number of bits actually written is as same as the expected
    /// number, it returns `Ok(bits)`. Otherwise, it returns `Err((expected_bits, actual_bits))`.
    fn verify_bit_counter(&self) -> Result<usize, (usize, usize)> {
        let expected = self.count_bits();
        let mut sink = ByteSink::new();
        self.write(&mut sink).expect("No error expected");
        if expected == sink.len() {
            Ok(expected)
        } else {
            Err((expected, sink.len()))
        }
    }
}

/// Converts a length to the `u32` field used in metadata blocks.
fn len_u32(var: &str, len: usize) -> Result<u32, RangeError> {
    u32::try_from(len).map_err(|_| RangeError::from_display(var, "must fit in 32 bits", &len))
}

/// Writes `METADATA_BLOCK_HEADER`.
fn write_block_header<S: BitSink>(
    dest: &mut S,
    is_last: bool,
    typetag: u8,
    byte_len: usize,
) -> Result<(), OutputError<S>> {
    if typetag > 0x7E {
        return Err(RangeError::from_display("typetag", "must be less than 127", &typetag).into());
    }
    if byte_len > MAX_BLOCK_BYTES {
        return Err(
            RangeError::from_display("block length", "must fit in 24 bits", &byte_len).into(),
        );
    }
    dest.write(u8::from(is_last) << 7 | typetag)
        .map_err(OutputError::<S>::from_sink)?;
    dest.write_lsbs(byte_len as u32, 24)
        .map_err(OutputError::<S>::from_sink)
}

impl BitRepr for Stream {
    #[inline]
    fn count_bits(&self) -> usize {
        let mut ret = 32 + BLOCK_HEADER_BITS + self.stream_info().count_bits();
        for elem in self.metadata() {
            ret += elem.count_bits();
        }
        for frame in self.frames() {
            ret += frame.count_bits();
        }
        ret
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        dest.write_bytes_aligned(b"fLaC")
            .map_err(OutputError::<S>::from_sink)?;
        let info = self.stream_info();
        write_block_header(dest, self.metadata().is_empty(), 0, info.count_bits() / 8)?;
        info.write(dest)?;
        for elem in self.metadata() {
            elem.write(dest)?;
        }
        for frame in self.frames() {
            frame.write(dest)?;
        }
        Ok(())
    }
}

impl BitRepr for MetadataBlock {
    #[inline]
    fn count_bits(&self) -> usize {
        BLOCK_HEADER_BITS + self.data().count_bits()
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let data = self.data();
        write_block_header(dest, self.is_last(), data.typetag(), data.count_bits() / 8)?;
        data.write(dest)
    }
}

impl BitRepr for MetadataBlockData {
    /// Counts bits of the block content, excluding the block header.
    #[inline]
    fn count_bits(&self) -> usize {
        match self {
            Self::StreamInfo(info) => info.count_bits(),
            Self::Padding(n) => n * 8,
            Self::Application(app) => app.count_bits(),
            Self::SeekTable(table) => table.count_bits(),
            Self::VorbisComment(vc) => vc.count_bits(),
            Self::CueSheet(cs) => cs.count_bits(),
            Self::Picture(pic) => pic.count_bits(),
            Self::Unknown { data, .. } => data.len() * 8,
        }
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        match self {
            Self::StreamInfo(info) => info.write(dest),
            Self::Padding(n) => dest
                .write_zeros(n * 8)
                .map_err(OutputError::<S>::from_sink),
            Self::Application(app) => app.write(dest),
            Self::SeekTable(table) => table.write(dest),
            Self::VorbisComment(vc) => vc.write(dest),
            Self::CueSheet(cs) => cs.write(dest),
            Self::Picture(pic) => pic.write(dest),
            Self::Unknown { data, .. } => dest
                .write_bytes_aligned(data)
                .map(|_| ())
                .map_err(OutputError::<S>::from_sink),
        }
    }
}

impl BitRepr for StreamInfo {
    #[inline]
    fn count_bits(&self) -> usize {
        16 + 16 + 24 + 24 + 20 + 3 + 5 + 36 + 128
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        if self.total_samples() >> 36 != 0 {
            return Err(RangeError::from_display(
                "total_samples",
                "must fit in 36 bits",
                &self.total_samples(),
            )
            .into());
        }
        let fields: [(u64, usize); 8] = [
            (self.min_block_size() as u64, 16),
            (self.max_block_size() as u64, 16),
            (self.min_frame_size() as u64, 24),
            (self.max_frame_size() as u64, 24),
            (self.sample_rate() as u64, 20),
            (self.channels() as u64 - 1, 3),
            (self.bits_per_sample() as u64 - 1, 5),
            (self.total_samples() as u64, 36),
        ];
        for (v, bits) in fields {
            dest.write_lsbs(v, bits)
                .map_err(OutputError::<S>::from_sink)?;
        }
        dest.write_bytes_aligned(self.md5_digest())
            .map_err(OutputError::<S>::from_sink)?;
        Ok(())
    }
}

impl BitRepr for Application {
    fn count_bits(&self) -> usize {
        32 + self.data().len() * 8
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        dest.write_bytes_aligned(self.id())
            .and_then(|_| dest.write_bytes_aligned(self.data()))
            .map_err(OutputError::<S>::from_sink)?;
        Ok(())
    }
}

impl BitRepr for SeekTable {
    fn count_bits(&self) -> usize {
        self.points().len() * SEEK_POINT_BYTES * 8
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        for p in self.points() {
            dest.write(p.sample_number())
                .and_then(|()| dest.write(p.stream_offset()))
                .and_then(|()| dest.write(p.frame_samples()))
                .map_err(OutputError::<S>::from_sink)?;
        }
        Ok(())
    }
}

impl BitRepr for VorbisComment {
    fn count_bits(&self) -> usize {
        let entries: usize = self.comments().iter().map(|c| 4 + c.len()).sum();
        (4 + self.vendor().len() + 4 + entries) * 8
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        // Vorbis comments use little-endian lengths, unlike the rest of FLAC.
        let vendor_len = len_u32("vendor length", self.vendor().len())?;
        let count = len_u32("comment count", self.comments().len())?;
        dest.write_bytes_aligned(&vendor_len.to_le_bytes())
            .and_then(|_| dest.write_bytes_aligned(self.vendor().as_bytes()))
            .and_then(|_| dest.write_bytes_aligned(&count.to_le_bytes()))
            .map_err(OutputError::<S>::from_sink)?;
        for c in self.comments() {
            let len = len_u32("comment length", c.len())?;
            dest.write_bytes_aligned(&len.to_le_bytes())
                .and_then(|_| dest.write_bytes_aligned(c.as_bytes()))
                .map_err(OutputError::<S>::from_sink)?;
        }
        Ok(())
    }
}

impl BitRepr for CueSheet {
    fn count_bits(&self) -> usize {
        let header = CUESHEET_CATALOG_BYTES * 8 + 64 + 1 + CUESHEET_RESERVED_BITS + 8;
        let tracks: usize = self
            .tracks()
            .iter()
            .map(|t| {
                64 + 8 + 12 * 8 + 2 + CUESHEET_TRACK_RESERVED_BITS + 8
                    + t.indices().len() * (64 + 8 + CUESHEET_INDEX_RESERVED_BITS)
            })
            .sum();
        header + tracks
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let catalog = self.catalog();
        if catalog.len() > CUESHEET_CATALOG_BYTES {
            return Err(RangeError::from_display(
                "catalog",
                "must be shorter than 129 bytes",
                &catalog.len(),
            )
            .into());
        }
        let ntracks = u8::try_from(self.tracks().len()).map_err(|_| {
            RangeError::from_display("tracks", "must be less than 256", &self.tracks().len())
        })?;
        dest.write_bytes_aligned(catalog)
            .and_then(|_| dest.write_zeros((CUESHEET_CATALOG_BYTES - catalog.len()) * 8))
            .and_then(|()| dest.write(self.lead_in()))
            .and_then(|()| dest.write_lsbs(u8::from(self.is_cd()), 1))
            .and_then(|()| dest.write_zeros(CUESHEET_RESERVED_BITS))
            .and_then(|()| dest.write(ntracks))
            .map_err(OutputError::<S>::from_sink)?;
        for track in self.tracks() {
            let nindices = u8::try_from(track.indices().len()).map_err(|_| {
                RangeError::from_display("indices", "must be less than 256", &track.indices().len())
            })?;
            dest.write(track.offset())
                .and_then(|()| dest.write(track.number()))
                .and_then(|()| dest.write_bytes_aligned(track.isrc()))
                .and_then(|_| dest.write_lsbs(u8::from(!track.is_audio()), 1))
                .and_then(|()| dest.write_lsbs(u8::from(track.pre_emphasis()), 1))
                .and_then(|()| dest.write_zeros(CUESHEET_TRACK_RESERVED_BITS))
                .and_then(|()| dest.write(nindices))
                .map_err(OutputError::<S>::from_sink)?;
            for index in track.indices() {
                dest.write(index.offset())
                    .and_then(|()| dest.write(index.number()))
                    .and_then(|()| dest.write_zeros(CUESHEET_INDEX_RESERVED_BITS))
                    .map_err(OutputError::<S>::from_sink)?;
            }
        }
        Ok(())
    }
}

impl BitRepr for Picture {
    fn count_bits(&self) -> usize {
        (4 + 4 + self.mime().len() + 4 + self.description().len() + 16 + 4 + self.data().len()) * 8
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let mime_len = len_u32("mime", self.mime().len())?;
        let desc_len = len_u32("description", self.description().len())?;
        let data_len = len_u32("data", self.data().len())?;
        let (width, height, depth, colors) = self.dimensions();
        dest.write(self.picture_type().tag())
            .and_then(|()| dest.write(mime_len))
            .and_then(|()| dest.write_bytes_aligned(self.mime().as_bytes()))
            .and_then(|_| dest.write(desc_len))
            .and_then(|()| dest.write_bytes_aligned(self.description().as_bytes()))
            .and_then(|_| dest.write(width))
            .and_then(|()| dest.write(height))
            .and_then(|()| dest.write(depth))
            .and_then(|()| dest.write(colors))
            .and_then(|()| dest.write(data_len))
            .and_then(|()| dest.write_bytes_aligned(self.data()))
            .map_err(OutputError::<S>::from_sink)?;
        Ok(())
    }
}

reusable!(FRAME_BUFFER: ByteSink);

impl Frame {
    /// Writes the frame to `dest` only if the whole frame can be rendered.
    ///
    /// The frame is first rendered into a thread-local buffer, so a range
    /// error leaves `dest` untouched. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::Range` if a value doesn't fit in the format, or
    /// `OutputError::Sink` if `dest` fails while committing the bytes.
    pub fn write_checked<S: BitSink>(&self, dest: &mut S) -> Result<usize, OutputError<S>> {
        reuse!(FRAME_BUFFER, |buf: &mut ByteSink| {
            buf.clear();
            buf.reserve(self.count_bits());
            self.header()
                .write(buf)
                .map_err(OutputError::<S>::ignore_sink_error)?;
            for sub in self.subframes() {
                sub.write(buf)
                    .map_err(OutputError::<S>::ignore_sink_error)?;
            }
            buf.align_to_byte()
                .map_err(OutputError::<S>::from_infallible)?;
            let crc = buf.crc16();

            dest.write_bytes_aligned(buf.as_slice())
                .and_then(|_| dest.write(crc))
                .map_err(OutputError::<S>::from_sink)?;
            Ok(buf.as_slice().len() + 2)
        })
    }
}

impl BitRepr for Frame {
    #[inline]
    fn count_bits(&self) -> usize {
        let header = self.header().count_bits();
        let body: usize = self.subframes().iter().map(BitRepr::count_bits).sum();
        let aligned = (header + body + 7) & !7;
        aligned + 16
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        self.write_checked(dest).map(|_| ())
    }
}

impl BitRepr for ChannelAssignment {
    #[inline]
    fn count_bits(&self) -> usize {
        4
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        if let Self::Independent(ch) = *self {
            if !(1..=8).contains(&ch) {
                return Err(RangeError::from_display("#channel", "must be in 1..=8", &ch).into());
            }
        }
        dest.write_lsbs(self.tag(), 4)
            .map_err(OutputError::<S>::from_sink)
    }
}

impl FrameHeader {
    /// Writes the header fields before CRC-8.
    fn write_fields<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        // sync-code + reserved 1-bit + blocking strategy
        let sync = 0xFFF8u16 | u16::from(self.is_variable_blocking());
        dest.write(sync)
            .and_then(|()| {
                dest.write(self.block_size_spec().tag() << 4 | self.sample_rate_spec().tag())
            })
            .map_err(OutputError::<S>::from_sink)?;
        self.channel_assignment().write(dest)?;
        dest.write_lsbs(self.sample_size_spec().tag() << 1, 4)
            .map_err(OutputError::<S>::from_sink)?;

        match self.offset() {
            FrameOffset::Frame(n) => {
                if n >> 31 != 0 {
                    return Err(RangeError::from_display("frame number", "must fit in 31 bits", &n).into());
                }
                dest.write_utf8_u32(n)
            }
            FrameOffset::StartSample(n) => {
                if n >> 36 != 0 {
                    return Err(RangeError::from_display("sample number", "must fit in 36 bits", &n).into());
                }
                dest.write_utf8_u64(n)
            }
        }
        .map_err(OutputError::<S>::from_sink)?;

        match self.block_size_spec() {
            BlockSizeSpec::ExtraByte(v) => dest.write(v),
            BlockSizeSpec::ExtraTwoBytes(v) => dest.write(v),
            _ => Ok(()),
        }
        .map_err(OutputError::<S>::from_sink)?;
        match self.sample_rate_spec() {
            SampleRateSpec::KHz(v) => dest.write(v),
            SampleRateSpec::Hz(v) | SampleRateSpec::DaHz(v) => dest.write(v),
            _ => Ok(()),
        }
        .map_err(OutputError::<S>::from_sink)
    }
}

reusable!(HEADER_BUFFER: ByteSink);

impl BitRepr for FrameHeader {
    #[inline]
    fn count_bits(&self) -> usize {
        let number = match self.offset() {
            FrameOffset::Frame(n) => u64::from(n),
            FrameOffset::StartSample(n) => n,
        };
        32 + 8 * utf8like_bytesize(number)
            + self.block_size_spec().count_extra_bits()
            + self.sample_rate_spec().count_extra_bits()
            + 8
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        reuse!(HEADER_BUFFER, |buf: &mut ByteSink| {
            buf.clear();
            self.write_fields(buf)
                .map_err(OutputError::<S>::ignore_sink_error)?;
            let crc = buf.crc8();
            dest.write_bytes_aligned(buf.as_slice())
                .and_then(|_| dest.write(crc))
                .map_err(OutputError::<S>::from_sink)
        })
    }
}

/// Writes the subframe header: zero bit, 6-bit type, and wasted-bits flag
/// followed by the unary count.
#[inline]
fn write_subframe_header<S: BitSink>(
    dest: &mut S,
    typecode: u8,
    wasted_bits: usize,
) -> Result<(), OutputError<S>> {
    let head = typecode << 1 | u8::from(wasted_bits > 0);
    dest.write(head).map_err(OutputError::<S>::from_sink)?;
    if wasted_bits > 0 {
        dest.write_unary_zeros(wasted_bits - 1)
            .map_err(OutputError::<S>::from_sink)?;
    }
    Ok(())
}

impl BitRepr for SubFrame {
    #[inline]
    fn count_bits(&self) -> usize {
        match self {
            Self::Verbatim(c) => c.count_bits(),
            Self::Constant(c) => c.count_bits(),
            Self::FixedLpc(c) => c.count_bits(),
            Self::Lpc(c) => c.count_bits(),
        }
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        match self {
            Self::Verbatim(c) => c.write(dest),
            Self::Constant(c) => c.write(dest),
            Self::FixedLpc(c) => c.write(dest),
            Self::Lpc(c) => c.write(dest),
        }
    }
}

impl BitRepr for Constant {
    #[inline]
    fn count_bits(&self) -> usize {
        8 + self.wasted_bits() + self.bits_per_sample()
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        write_subframe_header(dest, 0x00, self.wasted_bits())?;
        dest.write_twoc(self.dc_offset(), self.bits_per_sample())
            .map_err(OutputError::<S>::from_sink)
    }
}

impl BitRepr for Verbatim {
    #[inline]
    fn count_bits(&self) -> usize {
        Self::count_bits_from_metadata(
            self.samples().len(),
            self.bits_per_sample(),
            self.wasted_bits(),
        )
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        write_subframe_header(dest, 0x01, self.wasted_bits())?;
        let bps = self.bits_per_sample();
        for v in self.samples() {
            dest.write_twoc(*v, bps)
                .map_err(OutputError::<S>::from_sink)?;
        }
        Ok(())
    }
}

impl BitRepr for FixedLpc {
    #[inline]
    fn count_bits(&self) -> usize {
        8 + self.wasted_bits()
            + self.bits_per_sample() * self.order()
            + self.residual().count_bits()
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        write_subframe_header(dest, 0x08 | self.order() as u8, self.wasted_bits())?;
        for v in self.warm_up() {
            dest.write_twoc(*v, self.bits_per_sample())
                .map_err(OutputError::<S>::from_sink)?;
        }
        self.residual().write(dest)
    }
}

impl BitRepr for Lpc {
    #[inline]
    fn count_bits(&self) -> usize {
        let params = self.parameters();
        8 + self.wasted_bits()
            + self.bits_per_sample() * self.order()
            + PRECISION_BITS
            + SHIFT_BITS
            + params.precision() * self.order()
            + self.residual().count_bits()
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let params = self.parameters();
        let precision = params.precision();
        if !(1..(1 << PRECISION_BITS)).contains(&precision) {
            return Err(RangeError::from_display("precision", "must be in 1..=15", &precision).into());
        }
        write_subframe_header(dest, 0x20 | (self.order() - 1) as u8, self.wasted_bits())?;
        for v in self.warm_up() {
            dest.write_twoc(*v, self.bits_per_sample())
                .map_err(OutputError::<S>::from_sink)?;
        }
        dest.write_lsbs((precision - 1) as u8, PRECISION_BITS)
            .and_then(|()| dest.write_twoc(params.shift(), SHIFT_BITS))
            .map_err(OutputError::<S>::from_sink)?;
        for c in params.coefs() {
            dest.write_twoc(*c, precision)
                .map_err(OutputError::<S>::from_sink)?;
        }
        self.residual().write(dest)
    }
}

impl BitRepr for Residual {
    #[inline]
    fn count_bits(&self) -> usize {
        self.code_bits()
    }

    /// Writes `Residual` to the [`BitSink`].
    ///
    /// This is the most inner-loop of the output part of the encoder.
    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let method = self.method();
        let field_bits = method.parameter_bits();
        dest.write_lsbs(method.tag(), 2)
            .and_then(|()| dest.write_lsbs(self.partition_order() as u8, 4))
            .map_err(OutputError::<S>::from_sink)?;

        let residuals = self.residuals();
        for (p, param) in self.params().iter().enumerate() {
            let range = self.partition_range(p);
            match *param {
                PartitionParam::Rice(k) => {
                    dest.write_lsbs(k, field_bits)
                        .map_err(OutputError::<S>::from_sink)?;
                    let k = k as usize;
                    let stop_bit = 1u32 << k;
                    for v in &residuals[range] {
                        let zz = encode_signbit(*v);
                        // quotient zeros, then the stop bit and remainder at once
                        dest.write_zeros((zz >> k) as usize)
                            .and_then(|()| dest.write_lsbs(zz | stop_bit, k + 1))
                            .map_err(OutputError::<S>::from_sink)?;
                    }
                }
                PartitionParam::Escaped(width) => {
                    dest.write_lsbs(method.escape_code(), field_bits)
                        .and_then(|()| dest.write_lsbs(width, RAW_BITS_WIDTH))
                        .map_err(OutputError::<S>::from_sink)?;
                    for v in &residuals[range] {
                        dest.write_twoc(*v, width as usize)
                            .map_err(OutputError::<S>::from_sink)?;
                    }
                }
            }
        }
        Ok(())
    }
}
