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

use crate::constant::fixed::MAX_LPC_ORDER as MAX_FIXED_ORDER;
use crate::constant::metadata::CUESHEET_LEAD_OUT_CD;
use crate::constant::metadata::MAX_BLOCK_BYTES;
use crate::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use crate::constant::qlpc::MAX_PRECISION as MAX_LPC_PRECISION;
use crate::constant::qlpc::MAX_SHIFT as MAX_LPC_SHIFT;
use crate::constant::qlpc::MIN_SHIFT as MIN_LPC_SHIFT;
use crate::constant::rice::MAX_PARTITION_ORDER;
use crate::constant::MAX_CHANNELS;
use crate::constant::MAX_SAMPLE_RATE;
use crate::error::verify_range;
use crate::error::verify_true;
use crate::error::Verify;
use crate::error::VerifyError;
use crate::rice;

use super::bitrepr::BitRepr;
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
use super::datatype::QuantizedParameters;
use super::datatype::Residual;
use super::datatype::Stream;
use super::datatype::StreamInfo;
use super::datatype::SubFrame;
use super::datatype::Verbatim;
use super::metadata::Application;
use super::metadata::CueSheet;
use super::metadata::Picture;
use super::metadata::SeekTable;
use super::metadata::VorbisComment;

// Some (internal) utility macros for value verification.
macro_rules! verify_block_size {
    ($varname:literal, $size:expr) => {
        verify_range!($varname, $size, 1..=(crate::constant::MAX_BLOCK_SIZE))
    };
}

macro_rules! verify_bps {
    ($varname:literal, $bps:expr) => {
        verify_range!(
            $varname,
            $bps,
            (crate::constant::MIN_BITS_PER_SAMPLE)..=(crate::constant::MAX_BITS_PER_SAMPLE)
        )
    };
}

// Subframes may be narrower than the stream due to wasted bits, and a side
// channel needs one extra bit.
macro_rules! verify_subframe_bps {
    ($varname:literal, $bps:expr, $wasted:expr) => {
        verify_range!($varname, $bps, 1..=(crate::constant::MAX_BITS_PER_SAMPLE + 1)).and_then(
            |()| {
                verify_true!(
                    $varname,
                    $bps + $wasted <= crate::constant::MAX_BITS_PER_SAMPLE + 1,
                    "must fit in the sample width together with the wasted bits"
                )
            },
        )
    };
}

macro_rules! verify_sample_range {
    ($varname:literal, $sample:expr, $bps:expr) => {{
        let min_sample = -(1i64 << ($bps as usize - 1));
        let max_sample = (1i64 << ($bps as usize - 1)) - 1;
        verify_range!($varname, i64::from($sample), min_sample..=max_sample)
    }};
}

fn subframe_block_size(sf: &SubFrame) -> usize {
    match sf {
        SubFrame::Constant(c) => c.block_size(),
        SubFrame::Verbatim(c) => c.samples().len(),
        SubFrame::FixedLpc(c) => c.residual().block_size(),
        SubFrame::Lpc(c) => c.residual().block_size(),
    }
}

impl Stream {
    fn verify_fixed_blocking_frames(&self) -> Result<(), VerifyError> {
        let block_size = self.frames()[0].block_size();
        let last = self.frame_count() - 1;
        for (i, frame) in self.frames().iter().enumerate() {
            verify_true!(
                "frames[{i}].header.offset",
                frame.header().offset() == FrameOffset::Frame(i as u32),
                "must be the frame number in fixed-blocking streams"
            )?;
            verify_true!(
                "frames[{i}].block_size",
                i == last || frame.block_size() == block_size,
                "must be the same for all frames except the last"
            )?;
        }
        Ok(())
    }

    fn verify_variable_blocking_frames(&self) -> Result<(), VerifyError> {
        let mut current = 0u64;
        for (i, frame) in self.frames().iter().enumerate() {
            verify_true!(
                "frames[{i}].header.offset",
                frame.header().offset() == FrameOffset::StartSample(current),
                "must be the sample number in variable-blocking streams"
            )?;
            current += frame.block_size() as u64;
        }
        Ok(())
    }
}

impl Verify for Stream {
    fn verify(&self) -> Result<(), VerifyError> {
        self.stream_info()
            .verify()
            .map_err(|e| e.within("stream_info"))?;
        let count = self.metadata().len();
        for (i, md) in self.metadata().iter().enumerate() {
            md.verify()
                .and_then(|()| {
                    verify_true!(
                        "is_last",
                        md.is_last() == (i + 1 == count),
                        "must be set only for the last metadata block"
                    )
                })
                .and_then(|()| {
                    verify_true!(
                        "data",
                        md.data().as_stream_info().is_none(),
                        "must not be STREAMINFO"
                    )
                })
                .map_err(|e| e.within(&format!("metadata[{i}]")))?;
        }

        let channels = self.stream_info().channels();
        for (i, frame) in self.frames().iter().enumerate() {
            frame
                .verify()
                .and_then(|()| {
                    verify_true!(
                        "subframes.len",
                        frame.subframe_count() == channels,
                        "must match the number of channels in STREAMINFO"
                    )
                })
                .map_err(|e| e.within(&format!("frames[{i}]")))?;
        }

        if self.frames().is_empty() {
            Ok(())
        } else if self.frames()[0].header().is_variable_blocking() {
            self.verify_variable_blocking_frames()
        } else {
            self.verify_fixed_blocking_frames()
        }
    }
}

impl Verify for MetadataBlock {
    fn verify(&self) -> Result<(), VerifyError> {
        self.data().verify().map_err(|e| e.within("data"))
    }
}

impl Verify for MetadataBlockData {
    fn verify(&self) -> Result<(), VerifyError> {
        match self {
            Self::StreamInfo(info) => info.verify(),
            Self::Padding(_) => Ok(()),
            Self::Application(app) => app.verify(),
            Self::SeekTable(table) => table.verify(),
            Self::VorbisComment(vc) => vc.verify(),
            Self::CueSheet(cs) => cs.verify(),
            Self::Picture(pic) => pic.verify(),
            Self::Unknown { typetag, .. } => {
                verify_range!("typetag", *typetag, 7..=126)
            }
        }?;
        verify_range!("byte_len", self.count_bits() / 8, ..=MAX_BLOCK_BYTES)
    }
}

impl Verify for StreamInfo {
    fn verify(&self) -> Result<(), VerifyError> {
        if self.total_samples() != 0 {
            verify_true!(
                "min_block_size",
                self.min_block_size() <= self.max_block_size(),
                "must be smaller than `max_block_size`"
            )?;
            verify_block_size!("min_block_size", self.min_block_size())?;
            verify_block_size!("max_block_size", self.max_block_size())?;
            verify_true!(
                "min_frame_size",
                self.min_frame_size() <= self.max_frame_size(),
                "must be smaller than `max_frame_size`"
            )?;
        }
        verify_range!("max_frame_size", self.max_frame_size(), ..(1usize << 24))?;
        verify_range!("total_samples", self.total_samples() as u64, ..(1u64 << 36))?;
        verify_range!("sample_rate", self.sample_rate(), 1..=MAX_SAMPLE_RATE)?;
        verify_range!("channels", self.channels(), 1..=MAX_CHANNELS)?;
        verify_bps!("bits_per_sample", self.bits_per_sample())
    }
}

impl Verify for Application {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("data.len", self.data().len() + 4, ..=MAX_BLOCK_BYTES)
    }
}

impl Verify for SeekTable {
    fn verify(&self) -> Result<(), VerifyError> {
        let points = self.points();
        for t in 1..points.len() {
            let prev = points[t - 1];
            let cur = points[t];
            verify_true!(
                "points[{t}]",
                cur.is_placeholder() || (!prev.is_placeholder() && prev.sample_number() < cur.sample_number()),
                "must be sorted in ascending order with placeholders at the end"
            )?;
        }
        Ok(())
    }
}

impl Verify for VorbisComment {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("vendor.len", self.vendor().len(), ..=(u32::MAX as usize))?;
        for (i, c) in self.comments().iter().enumerate() {
            let name_ok = c
                .split_once('=')
                .is_some_and(|(name, _)| super::metadata::is_valid_field_name(name));
            verify_true!(
                "comments[{i}]",
                name_ok,
                "must have the form of `NAME=value`"
            )?;
        }
        Ok(())
    }
}

impl Verify for CueSheet {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("catalog.len", self.catalog().len(), ..=(CueSheet::catalog_bytes()))?;
        verify_true!(
            "catalog",
            self.catalog().iter().all(|b| (0x20..=0x7E).contains(b)),
            "must be printable ASCII"
        )?;
        if self.is_cd() {
            verify_range!("lead_in", self.lead_in(), (2 * 44100)..)?;
        }
        let tracks = self.tracks();
        verify_range!("tracks.len", tracks.len(), 1..=(if self.is_cd() { 100 } else { 255 }))?;
        let lead_out = if self.is_cd() { CUESHEET_LEAD_OUT_CD } else { 255 };
        let last = tracks.len() - 1;
        for (i, track) in tracks.iter().enumerate() {
            verify_true!("tracks[{i}].number", track.number() != 0, "must not be zero")?;
            if i == last {
                verify_true!(
                    "tracks[{i}].number",
                    track.number() == lead_out,
                    "must be the lead-out track number"
                )?;
                continue;
            }
            verify_true!(
                "tracks[{i}].number",
                track.number() != lead_out,
                "must not be the lead-out track number"
            )?;
            if self.is_cd() {
                verify_true!(
                    "tracks[{i}].number",
                    track.number() <= 99,
                    "must be smaller than 100 for CD-DA"
                )?;
                verify_true!(
                    "tracks[{i}].offset",
                    track.offset() % 588 == 0,
                    "must be a multiple of 588 for CD-DA"
                )?;
            }
            verify_true!(
                "tracks[{i}].indices",
                !track.indices().is_empty(),
                "must not be empty"
            )?;
            for (j, index) in track.indices().iter().enumerate() {
                if self.is_cd() {
                    verify_true!(
                        "tracks[{i}].indices[{j}].offset",
                        index.offset() % 588 == 0,
                        "must be a multiple of 588 for CD-DA"
                    )?;
                }
                let expected_ok = if j == 0 {
                    index.number() <= 1
                } else {
                    index.number() == track.indices()[j - 1].number().wrapping_add(1)
                };
                verify_true!(
                    "tracks[{i}].indices[{j}].number",
                    expected_ok,
                    "must start from 0 or 1 and increase by one"
                )?;
            }
        }
        if self.is_cd() {
            verify_true!(
                "tracks[{last}].offset",
                tracks[last].offset() % 588 == 0,
                "must be a multiple of 588 for CD-DA"
            )?;
        }
        Ok(())
    }
}

impl Verify for Picture {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_true!(
            "mime",
            self.mime().bytes().all(|b| (0x20..=0x7E).contains(&b)),
            "must be printable ASCII"
        )?;
        verify_range!("data.len", self.data().len(), ..=MAX_BLOCK_BYTES)
    }
}

impl Verify for Frame {
    fn verify(&self) -> Result<(), VerifyError> {
        self.header().verify().map_err(|e| e.within("header"))?;
        let chs = self.header().channel_assignment();
        verify_true!(
            "subframes.len",
            self.subframe_count() == chs.channels(),
            "must match the channel assignment"
        )?;
        for (ch, sf) in self.subframes().iter().enumerate() {
            sf.verify()
                .and_then(|()| {
                    verify_true!(
                        "block_size",
                        subframe_block_size(sf) == self.block_size(),
                        "must be the same as the block size of the frame"
                    )
                })
                .and_then(|()| {
                    self.header().bits_per_sample().map_or(Ok(()), |bps| {
                        verify_true!(
                            "bits_per_sample",
                            sf.bits_per_sample() + sf.wasted_bits()
                                == bps + chs.bits_per_sample_offset(ch),
                            "must be consistent with the frame header"
                        )
                    })
                })
                .map_err(|e| e.within(&format!("subframe[{ch}]")))?;
        }
        Ok(())
    }
}

impl Verify for ChannelAssignment {
    fn verify(&self) -> Result<(), VerifyError> {
        match *self {
            Self::Independent(ch) => {
                verify_range!("Independent(ch)", ch as usize, 1..=MAX_CHANNELS)
            }
            Self::LeftSide | Self::RightSide | Self::MidSide => Ok(()),
        }
    }
}

impl Verify for FrameHeader {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_block_size!("block_size", self.block_size())?;
        match self.offset() {
            FrameOffset::Frame(n) => verify_range!("offset", n, ..(1u32 << 31)),
            FrameOffset::StartSample(n) => verify_range!("offset", n, ..(1u64 << 36)),
        }?;
        self.channel_assignment()
            .verify()
            .map_err(|e| e.within("channel_assignment"))
    }
}

impl Verify for SubFrame {
    fn verify(&self) -> Result<(), VerifyError> {
        match self {
            Self::Verbatim(c) => c.verify(),
            Self::Constant(c) => c.verify(),
            Self::FixedLpc(c) => c.verify(),
            Self::Lpc(c) => c.verify(),
        }
    }
}

impl Verify for Constant {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_block_size!("block_size", self.block_size())?;
        verify_subframe_bps!("bits_per_sample", self.bits_per_sample(), self.wasted_bits())?;
        verify_sample_range!("dc_offset", self.dc_offset(), self.bits_per_sample())
    }
}

impl Verify for Verbatim {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_block_size!("data.len", self.samples().len())?;
        verify_subframe_bps!("bits_per_sample", self.bits_per_sample(), self.wasted_bits())?;
        for (t, v) in self.samples().iter().enumerate() {
            verify_sample_range!("data[{t}]", *v, self.bits_per_sample())?;
        }
        Ok(())
    }
}

impl Verify for FixedLpc {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("order", self.order(), ..=MAX_FIXED_ORDER)?;
        verify_subframe_bps!("bits_per_sample", self.bits_per_sample(), self.wasted_bits())?;
        for (t, v) in self.warm_up().iter().enumerate() {
            verify_sample_range!("warm_up[{t}]", *v, self.bits_per_sample())?;
        }
        verify_true!(
            "residual.warmup_length",
            self.residual().warmup_length() == self.order(),
            "must be the same as the order"
        )?;
        self.residual()
            .verify()
            .map_err(|err| err.within("residual"))
    }
}

impl Verify for Lpc {
    fn verify(&self) -> Result<(), VerifyError> {
        self.parameters()
            .verify()
            .map_err(|err| err.within("parameters"))?;
        verify_subframe_bps!("bits_per_sample", self.bits_per_sample(), self.wasted_bits())?;
        for (t, v) in self.warm_up().iter().enumerate() {
            verify_sample_range!("warm_up[{t}]", *v, self.bits_per_sample())?;
        }
        verify_true!(
            "residual.warmup_length",
            self.residual().warmup_length() == self.order(),
            "must be the same as the order"
        )?;
        self.residual()
            .verify()
            .map_err(|err| err.within("residual"))
    }
}

impl Verify for QuantizedParameters {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("order", self.order(), 1..=MAX_LPC_ORDER)?;
        verify_range!("shift", self.shift(), MIN_LPC_SHIFT..=MAX_LPC_SHIFT)?;
        verify_range!("precision", self.precision(), 1..=MAX_LPC_PRECISION)?;
        let bound = 1i32 << (self.precision() - 1);
        for (i, c) in self.coefs().iter().enumerate() {
            let c = i32::from(*c);
            verify_true!(
                "coefs[{i}]",
                -bound <= c && c < bound,
                "must be representable with the precision"
            )?;
        }
        Ok(())
    }
}

impl Verify for Residual {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_block_size!("block_size", self.block_size())?;
        verify_range!("partition_order", self.partition_order(), ..=MAX_PARTITION_ORDER)?;
        verify_true!(
            "partition_order",
            rice::is_valid_partition_order(
                self.block_size(),
                self.warmup_length(),
                self.partition_order()
            ),
            "must divide the block, and leave samples after the warm-up"
        )?;
        verify_true!(
            "params.len",
            self.params().len() == 1 << self.partition_order(),
            "must be 2^partition_order"
        )?;
        verify_true!(
            "residuals.len",
            self.residuals().len() == self.block_size(),
            "must have the same length as the block size"
        )?;
        for t in 0..self.warmup_length() {
            verify_true!(
                "residuals[{t}]",
                self.residuals()[t] == 0,
                "must be zero for warmup samples"
            )?;
        }

        let max_param = self.method().max_parameter();
        for (p, param) in self.params().iter().enumerate() {
            match *param {
                PartitionParam::Rice(k) => {
                    verify_range!("params[{p}]", k as usize, ..=max_param)?;
                }
                PartitionParam::Escaped(w) => {
                    verify_range!("params[{p}]", w as usize, ..=31)?;
                    for t in self.partition_range(p) {
                        let v = self.residuals()[t];
                        let ok = if w == 0 {
                            v == 0
                        } else {
                            let bound = 1i64 << (w - 1);
                            (-bound..bound).contains(&i64::from(v))
                        };
                        verify_true!(
                            "residuals[{t}]",
                            ok,
                            "must be representable with the escaped width"
                        )?;
                    }
                }
            }
        }

        verify_true!(
            "code_bits",
            self.code_bits() == self.compute_code_bits(),
            "must be identical with the actual code length"
        )
    }
}
