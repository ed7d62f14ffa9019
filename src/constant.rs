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

//! Format and encoder constants.

#![allow(dead_code)] // it's okay if some FLAC-spec constants are not used.

// Top-level constants first, and then sub-modules. Constants that are used
// only in a specific sub-module or its caller should be placed in the
// corresponding submodule.

/// Minimum length of a block (16 in the format, 1 for the last block.)
pub const MIN_BLOCK_SIZE: usize = 16;

/// Maximum length of a block.
pub const MAX_BLOCK_SIZE: usize = 65535;

/// Maximum number of channels.
pub const MAX_CHANNELS: usize = 8;

/// Minimum bits-per-sample supported.
pub const MIN_BITS_PER_SAMPLE: usize = 4;

/// Maximum bits-per-sample supported.
pub const MAX_BITS_PER_SAMPLE: usize = 32;

/// Maximum sample rate that STREAMINFO can describe (20 bits.)
pub const MAX_SAMPLE_RATE: usize = (1 << 20) - 1;

/// Sub-module containing constants related to build-time information.
pub mod build_info {
    /// Vendor string recommended for `VORBIS_COMMENT` blocks.
    pub const VENDOR_STRING: &str = concat!("flacenc-core ", env!("CARGO_PKG_VERSION"));
}

/// Constants related to metadata blocks.
pub mod metadata {
    /// Bits used in the header of each metadata block.
    pub const BLOCK_HEADER_BITS: usize = 32;

    /// Maximum byte length of a metadata block (24-bit length field.)
    pub const MAX_BLOCK_BYTES: usize = (1 << 24) - 1;

    /// Byte length of a seek point.
    pub const SEEK_POINT_BYTES: usize = 18;

    /// Sample number of a placeholder seek point.
    pub const SEEK_POINT_PLACEHOLDER: u64 = u64::MAX;

    /// Byte length of the media catalog number in `CUESHEET`.
    pub const CUESHEET_CATALOG_BYTES: usize = 128;

    /// Number of reserved bits in the `CUESHEET` header.
    pub const CUESHEET_RESERVED_BITS: usize = 7 + 258 * 8;

    /// Byte length of ISRC in `CUESHEET` tracks.
    pub const CUESHEET_ISRC_BYTES: usize = 12;

    /// Number of reserved bits in `CUESHEET` tracks.
    pub const CUESHEET_TRACK_RESERVED_BITS: usize = 6 + 13 * 8;

    /// Number of reserved bits in `CUESHEET` track indices.
    pub const CUESHEET_INDEX_RESERVED_BITS: usize = 3 * 8;

    /// Track number of the lead-out track.
    pub const CUESHEET_LEAD_OUT_CD: u8 = 170;
}

/// Constants related to fixed-parameter LPC encoding.
pub mod fixed {
    /// Maximum order of fixed LPC supported.
    pub const MAX_LPC_ORDER: usize = 4;

    /// Number of warm-up samples the order estimator needs.
    pub const ESTIMATOR_WARMUP: usize = 4;
}

/// Constants related to quantized linear predictive coding (QLPC).
pub mod qlpc {
    /// The number of bits used for encoding shift bits of QLPC.
    pub const SHIFT_BITS: usize = 5;

    /// The number of bits used for encoding precision of QLPC.
    pub const PRECISION_BITS: usize = 4;

    /// Maximum order of LPC.
    pub const MAX_ORDER: usize = 32;

    /// Max number of bits (precision) for storing QLPC coefficients.
    pub const MAX_PRECISION: usize = 15;

    /// Min number of bits (precision) for storing QLPC coefficients.
    pub const MIN_PRECISION: usize = 5;

    /// Maximum shift parameter of QLPC defined by the format.
    pub const MAX_SHIFT: i8 = (1i8 << (SHIFT_BITS - 1)) - 1;

    /// Minimum shift parameter of QLPC in the bitstream format.
    ///
    /// The reference decoder doesn't support negative shifts, so the
    /// quantizer never emits them.
    pub const MIN_SHIFT: i8 = -(1i8 << (SHIFT_BITS - 1));

    /// Default LPC order for QLPC module.
    pub const DEFAULT_ORDER: usize = 8;

    /// Default alpha parameter for Tukey window.
    pub const DEFAULT_TUKEY_ALPHA: f32 = 0.5;
}

/// Constants related to partitioned rice coding (PRC).
pub mod rice {
    /// Maximum allowed value for the Rice parameters (5-bit method.)
    pub const MAX_RICE_PARAMETER: usize = 30;

    /// Largest parameter that the 4-bit method can carry.
    pub const MAX_RICE_PARAMETER_4BIT: usize = 14;

    /// Escape code for the 4-bit parameter method.
    pub const ESCAPE_4BIT: u8 = 0b1111;

    /// Escape code for the 5-bit parameter method.
    pub const ESCAPE_5BIT: u8 = 0b1_1111;

    /// Bits for the raw sample width of an escaped partition.
    pub const RAW_BITS_WIDTH: usize = 5;

    /// Maximum order of Rice parameter partitioning.
    pub const MAX_PARTITION_ORDER: usize = 15;

    /// Default maximum order of Rice parameter partitioning.
    pub const DEFAULT_MAX_PARTITION_ORDER: usize = 8;
}

