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

//! Optional metadata blocks that follow `STREAMINFO`.

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::constant::build_info::VENDOR_STRING;
use crate::constant::metadata::CUESHEET_CATALOG_BYTES;
use crate::constant::metadata::CUESHEET_ISRC_BYTES;
use crate::constant::metadata::SEEK_POINT_PLACEHOLDER;
use crate::error::Verify;
use crate::error::VerifyError;

/// [`METADATA_BLOCK_APPLICATION`](https://xiph.org/flac/format.html#metadata_block_application) component.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Application {
    id: [u8; 4],
    data: Vec<u8>,
}

impl Application {
    /// Constructs an application block with the registered 4-byte id.
    pub fn new(id: [u8; 4], data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_owned(),
        }
    }

    /// Returns the application id.
    pub const fn id(&self) -> &[u8; 4] {
        &self.id
    }

    /// Returns the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A point in [`SeekTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeekPoint {
    sample_number: u64,
    stream_offset: u64,
    frame_samples: u16,
}

impl SeekPoint {
    /// Constructs a resolved seek point.
    pub const fn new(sample_number: u64, stream_offset: u64, frame_samples: u16) -> Self {
        Self {
            sample_number,
            stream_offset,
            frame_samples,
        }
    }

    /// Constructs an unresolved point that targets the given sample.
    ///
    /// The point is resolved by [`Stream::fill_seek_table`].
    ///
    /// [`Stream::fill_seek_table`]: crate::component::Stream::fill_seek_table
    pub const fn target(sample_number: u64) -> Self {
        Self::new(sample_number, 0, 0)
    }

    /// Constructs a placeholder point.
    pub const fn placeholder() -> Self {
        Self::new(SEEK_POINT_PLACEHOLDER, 0, 0)
    }

    /// Returns true if `self` is a placeholder.
    pub const fn is_placeholder(&self) -> bool {
        self.sample_number == SEEK_POINT_PLACEHOLDER
    }

    /// Returns the first sample number of the target frame.
    pub const fn sample_number(&self) -> u64 {
        self.sample_number
    }

    /// Returns the byte offset of the target frame from the first frame.
    pub const fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// Returns the number of samples in the target frame.
    pub const fn frame_samples(&self) -> u16 {
        self.frame_samples
    }
}

/// [`METADATA_BLOCK_SEEKTABLE`](https://xiph.org/flac/format.html#metadata_block_seektable) component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeekTable {
    points: Vec<SeekPoint>,
}

impl SeekTable {
    /// Constructs a table from points.
    ///
    /// # Errors
    ///
    /// Returns an error if non-placeholder points are not strictly
    /// increasing, or if a placeholder precedes a regular point.
    pub fn new(points: &[SeekPoint]) -> Result<Self, VerifyError> {
        let ret = Self {
            points: points.to_owned(),
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Constructs a table of unresolved points from target sample numbers.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let table = SeekTable::from_targets(&[44100, 0, 44100]);
    /// assert_eq!(table.points().len(), 3);
    /// assert_eq!(table.points()[0].sample_number(), 0);
    /// assert!(table.points()[2].is_placeholder());
    /// ```
    pub fn from_targets(samples: &[u64]) -> Self {
        let mut ret = Self {
            points: samples.iter().map(|s| SeekPoint::target(*s)).collect(),
        };
        ret.normalize();
        ret
    }

    /// Constructs a table with `n` placeholders.
    pub fn with_placeholders(n: usize) -> Self {
        Self {
            points: vec![SeekPoint::placeholder(); n],
        }
    }

    /// Sorts points, and replaces duplicates with placeholders.
    ///
    /// The number of points is kept so the block size doesn't change.
    pub(crate) fn normalize(&mut self) {
        self.points.sort_by_key(SeekPoint::sample_number);
        let mut last_kept: Option<u64> = None;
        for p in &mut self.points {
            if p.is_placeholder() {
                continue;
            }
            if last_kept == Some(p.sample_number) {
                *p = SeekPoint::placeholder();
            } else {
                last_kept = Some(p.sample_number);
            }
        }
        self.points.sort_by_key(SeekPoint::sample_number);
    }

    /// Returns the points.
    pub fn points(&self) -> &[SeekPoint] {
        &self.points
    }

    pub(crate) fn points_mut(&mut self) -> &mut [SeekPoint] {
        &mut self.points
    }
}

/// [`METADATA_BLOCK_VORBIS_COMMENT`](https://xiph.org/flac/format.html#metadata_block_vorbis_comment) component.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VorbisComment {
    vendor: String,
    comments: Vec<String>,
}

impl Default for VorbisComment {
    fn default() -> Self {
        Self::new(VENDOR_STRING)
    }
}

impl VorbisComment {
    /// Constructs an empty comment block with the vendor string.
    pub fn new(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_owned(),
            comments: vec![],
        }
    }

    /// Appends a `NAME=value` field.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty, or contains characters other
    /// than printable ASCII except `=`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let mut vc = VorbisComment::new("test");
    /// vc.add_field("TITLE", "Weiß").unwrap();
    /// assert!(vc.add_field("A=B", "C").is_err());
    /// assert_eq!(vc.comments(), &["TITLE=Weiß".to_string()]);
    /// ```
    pub fn add_field(&mut self, name: &str, value: &str) -> Result<(), VerifyError> {
        if !is_valid_field_name(name) {
            return Err(VerifyError::new(
                "name",
                "must be a non-empty printable ASCII string without '='",
            ));
        }
        self.comments.push(format!("{name}={value}"));
        Ok(())
    }

    /// Returns the vendor string.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Returns comment entries in `NAME=value` form.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }
}

pub(crate) fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (0x20..=0x7D).contains(&b) && b != b'=')
}

/// Index point of [`CueTrack`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CueIndex {
    offset: u64,
    number: u8,
}

impl CueIndex {
    /// Constructs an index point. `offset` is relative to the track offset.
    pub const fn new(offset: u64, number: u8) -> Self {
        Self { offset, number }
    }

    /// Returns the offset in samples.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the index number.
    pub const fn number(&self) -> u8 {
        self.number
    }
}

/// Track of [`CueSheet`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CueTrack {
    offset: u64,
    number: u8,
    isrc: [u8; CUESHEET_ISRC_BYTES],
    is_audio: bool,
    pre_emphasis: bool,
    indices: Vec<CueIndex>,
}

impl CueTrack {
    /// Constructs an audio track without ISRC.
    pub fn new(offset: u64, number: u8, indices: &[CueIndex]) -> Self {
        Self {
            offset,
            number,
            isrc: [0u8; CUESHEET_ISRC_BYTES],
            is_audio: true,
            pre_emphasis: false,
            indices: indices.to_owned(),
        }
    }

    /// Sets ISRC. `isrc` must have 12 ASCII characters.
    ///
    /// # Errors
    ///
    /// Returns an error if the length or a character is invalid.
    pub fn set_isrc(&mut self, isrc: &str) -> Result<(), VerifyError> {
        let bytes = isrc.as_bytes();
        if bytes.len() != CUESHEET_ISRC_BYTES || !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return Err(VerifyError::new("isrc", "must be 12 alphanumeric characters"));
        }
        self.isrc.copy_from_slice(bytes);
        Ok(())
    }

    /// Sets the non-audio flag and the pre-emphasis flag.
    pub fn set_flags(&mut self, is_audio: bool, pre_emphasis: bool) {
        self.is_audio = is_audio;
        self.pre_emphasis = pre_emphasis;
    }

    /// Returns the offset in samples.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the track number.
    pub const fn number(&self) -> u8 {
        self.number
    }

    /// Returns ISRC bytes (all zeros if not set.)
    pub const fn isrc(&self) -> &[u8; CUESHEET_ISRC_BYTES] {
        &self.isrc
    }

    /// Returns true if this is an audio track.
    pub const fn is_audio(&self) -> bool {
        self.is_audio
    }

    /// Returns the pre-emphasis flag.
    pub const fn pre_emphasis(&self) -> bool {
        self.pre_emphasis
    }

    /// Returns the index points.
    pub fn indices(&self) -> &[CueIndex] {
        &self.indices
    }
}

/// [`METADATA_BLOCK_CUESHEET`](https://xiph.org/flac/format.html#metadata_block_cuesheet) component.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CueSheet {
    catalog: Vec<u8>,
    lead_in: u64,
    is_cd: bool,
    tracks: Vec<CueTrack>,
}

impl CueSheet {
    /// Constructs a cue sheet.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog number is too long, or the tracks
    /// violate the constraints of the format (including CD-DA ones when
    /// `is_cd` is set.)
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::component::*;
    /// let tracks = [
    ///     CueTrack::new(0, 1, &[CueIndex::new(0, 1)]),
    ///     CueTrack::new(588 * 100, 170, &[]),
    /// ];
    /// assert!(CueSheet::new("1234567890123", 88200, true, &tracks).is_ok());
    /// // lead-out track is missing
    /// assert!(CueSheet::new("", 0, false, &tracks[..1]).is_err());
    /// ```
    pub fn new(
        catalog: &str,
        lead_in: u64,
        is_cd: bool,
        tracks: &[CueTrack],
    ) -> Result<Self, VerifyError> {
        let ret = Self {
            catalog: catalog.as_bytes().to_owned(),
            lead_in,
            is_cd,
            tracks: tracks.to_owned(),
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Returns the media catalog number (without zero-padding.)
    pub fn catalog(&self) -> &[u8] {
        &self.catalog
    }

    /// Returns the number of lead-in samples.
    pub const fn lead_in(&self) -> u64 {
        self.lead_in
    }

    /// Returns true if the sheet corresponds to a CD.
    pub const fn is_cd(&self) -> bool {
        self.is_cd
    }

    /// Returns the tracks including the lead-out.
    pub fn tracks(&self) -> &[CueTrack] {
        &self.tracks
    }

    pub(crate) const fn catalog_bytes() -> usize {
        CUESHEET_CATALOG_BYTES
    }
}

/// Type of [`Picture`] following the ID3v2 APIC frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum PictureType {
    /// Other.
    Other = 0,
    /// 32x32 PNG file icon.
    FileIcon = 1,
    /// Other file icon.
    OtherFileIcon = 2,
    /// Front cover.
    FrontCover = 3,
    /// Back cover.
    BackCover = 4,
    /// Leaflet page.
    Leaflet = 5,
    /// Media label side.
    Media = 6,
    /// Lead artist or performer.
    LeadArtist = 7,
    /// Artist.
    Artist = 8,
    /// Conductor.
    Conductor = 9,
    /// Band or orchestra.
    Band = 10,
    /// Composer.
    Composer = 11,
    /// Lyricist.
    Lyricist = 12,
    /// Recording location.
    RecordingLocation = 13,
    /// During recording.
    DuringRecording = 14,
    /// During performance.
    DuringPerformance = 15,
    /// Movie or video screen capture.
    ScreenCapture = 16,
    /// A bright coloured fish.
    Fish = 17,
    /// Illustration.
    Illustration = 18,
    /// Band or artist logotype.
    BandLogo = 19,
    /// Publisher or studio logotype.
    PublisherLogo = 20,
}

impl PictureType {
    /// Returns `PictureType` for the 32-bit type field, or `None` if reserved.
    pub const fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => Self::Other,
            1 => Self::FileIcon,
            2 => Self::OtherFileIcon,
            3 => Self::FrontCover,
            4 => Self::BackCover,
            5 => Self::Leaflet,
            6 => Self::Media,
            7 => Self::LeadArtist,
            8 => Self::Artist,
            9 => Self::Conductor,
            10 => Self::Band,
            11 => Self::Composer,
            12 => Self::Lyricist,
            13 => Self::RecordingLocation,
            14 => Self::DuringRecording,
            15 => Self::DuringPerformance,
            16 => Self::ScreenCapture,
            17 => Self::Fish,
            18 => Self::Illustration,
            19 => Self::BandLogo,
            20 => Self::PublisherLogo,
            _ => return None,
        })
    }

    /// Returns the value of the 32-bit type field.
    pub const fn tag(self) -> u32 {
        self as u32
    }
}

/// [`METADATA_BLOCK_PICTURE`](https://xiph.org/flac/format.html#metadata_block_picture) component.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Picture {
    picture_type: PictureType,
    mime: String,
    description: String,
    width: u32,
    height: u32,
    depth: u32,
    colors: u32,
    data: Vec<u8>,
}

impl Picture {
    /// Constructs a picture block. Dimensions are initialized to zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if `mime` is not printable ASCII.
    pub fn new(
        picture_type: PictureType,
        mime: &str,
        description: &str,
        data: &[u8],
    ) -> Result<Self, VerifyError> {
        let ret = Self {
            picture_type,
            mime: mime.to_owned(),
            description: description.to_owned(),
            width: 0,
            height: 0,
            depth: 0,
            colors: 0,
            data: data.to_owned(),
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Sets width, height, color depth and the number of palette colors.
    pub fn set_dimensions(&mut self, width: u32, height: u32, depth: u32, colors: u32) {
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.colors = colors;
    }

    /// Returns the picture type.
    pub const fn picture_type(&self) -> PictureType {
        self.picture_type
    }

    /// Returns the MIME type string.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns `(width, height, depth, colors)`.
    pub const fn dimensions(&self) -> (u32, u32, u32, u32) {
        (self.width, self.height, self.depth, self.colors)
    }

    /// Returns the picture data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
