// Copyright 2024 Google LLC
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

//! Bitstream recognizers used for checking the encoder output.

use nom::bits::bits;
use nom::bits::streaming::tag as bit_tag;
use nom::bits::streaming::take as bit_take;
use nom::bytes::streaming::tag as byte_tag;
use nom::bytes::streaming::take as byte_take;
use nom::combinator::all_consuming;
use nom::combinator::map;
use nom::combinator::verify;
use nom::error::ErrorKind;
use nom::error::ParseError;
use nom::error_position;
use nom::multi::many_m_n;
use nom::multi::many_till;
use nom::number::streaming::be_u16;
use nom::number::streaming::be_u24;
use nom::number::streaming::be_u32;
use nom::number::streaming::be_u64;
use nom::number::streaming::be_u8;
use nom::number::streaming::le_u32;
use nom::IResult;
use nom::Offset;

use crate::bitsink::FRAME_CRC;
use crate::bitsink::HEADER_CRC;
use crate::component;
use crate::component::FrameOffset;
use crate::component::PartitionParam;
use crate::component::ResidualCodingMethod;
use crate::constant::metadata::CUESHEET_CATALOG_BYTES;
use crate::constant::metadata::CUESHEET_ISRC_BYTES;
use crate::constant::metadata::SEEK_POINT_BYTES;
use crate::constant::rice::RAW_BITS_WIDTH;
use crate::error::VerifyError;
use crate::rice::decode_signbit;

type BitInput<'a> = (&'a [u8], usize);

fn convert_bits_err<'a, E>(e: nom::Err<(&'a [u8], ErrorKind)>) -> nom::Err<E>
where
    E: ParseError<&'a [u8]>,
{
    e.map(|(inp, kind)| E::from_error_kind(inp, kind))
}

fn invalid<I, E: ParseError<I>>(input: I, kind: ErrorKind) -> nom::Err<E> {
    nom::Err::Error(error_position!(input, kind))
}

/// Recognizes [`component::Stream`].
pub fn stream<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::Stream, E>
where
    E: ParseError<&'a [u8]>,
{
    let (mut remaining_input, _) = byte_tag("fLaC")(input)?;
    let (i, stream_info_block) = metadata_block(remaining_input)?;
    remaining_input = i;
    let stream_info = stream_info_block
        .data()
        .as_stream_info()
        .ok_or_else(|| invalid(input, ErrorKind::Verify))?
        .clone();

    let mut stream = component::Stream::with_stream_info(stream_info.clone());
    let mut is_last = stream_info_block.is_last();
    while !is_last {
        let (i, b) = metadata_block(remaining_input)?;
        remaining_input = i;
        is_last = b.is_last();
        stream.add_metadata_block(b.data().clone());
    }

    let (remaining_input, (frames, _)) =
        many_till(frame(&stream_info, true), nom::combinator::eof)(remaining_input)?;
    for f in frames {
        stream.add_frame(f);
    }
    // `add_frame` accumulates counters; the parsed values are authoritative.
    *stream.stream_info_mut() = stream_info;
    Ok((remaining_input, stream))
}

/// Recognizes [`component::MetadataBlock`].
pub fn metadata_block<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::MetadataBlock, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, first_byte) = be_u8(input)?;
    let is_last = (first_byte >> 7) != 0;
    let block_type = first_byte & 0x7F;
    let (remaining_input, length) = be_u24(remaining_input)?;
    let (remaining_input, body) = byte_take(length)(remaining_input)?;

    let (_, data) = match block_type {
        0 => all_consuming(map(stream_info, component::MetadataBlockData::StreamInfo))(body)?,
        1 => (body, component::MetadataBlockData::Padding(body.len())),
        2 => all_consuming(map(application, component::MetadataBlockData::Application))(body)?,
        3 => all_consuming(map(seek_table, component::MetadataBlockData::SeekTable))(body)?,
        4 => all_consuming(map(
            vorbis_comment,
            component::MetadataBlockData::VorbisComment,
        ))(body)?,
        5 => all_consuming(map(cue_sheet, component::MetadataBlockData::CueSheet))(body)?,
        6 => all_consuming(map(picture, component::MetadataBlockData::Picture))(body)?,
        _ => (
            body,
            component::MetadataBlockData::new_unknown(block_type, body)
                .map_err(|_e| invalid(input, ErrorKind::TagBits))?,
        ),
    };
    Ok((
        remaining_input,
        component::MetadataBlock::from_parts(is_last, data),
    ))
}

/// Recognizes [`component::StreamInfo`].
pub fn stream_info<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::StreamInfo, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, min_block_size) = be_u16(input)?;
    let (remaining_input, max_block_size) = be_u16(remaining_input)?;
    let (remaining_input, min_frame_size) = be_u24(remaining_input)?;
    let (remaining_input, max_frame_size) = be_u24(remaining_input)?;
    let (remaining_input, (sample_rate, channels, bits_per_sample, total_samples)) =
        bits(|input| {
            let (remaining_input, sr): (_, usize) = bit_take(20usize)(input)?;
            let (remaining_input, ch): (_, usize) = bit_take(3usize)(remaining_input)?;
            let (remaining_input, bps): (_, usize) = bit_take(5usize)(remaining_input)?;
            let (remaining_input, total): (_, usize) = bit_take(36usize)(remaining_input)?;
            let ret: IResult<_, _, (BitInput<'a>, ErrorKind)> =
                Ok((remaining_input, (sr, ch + 1, bps + 1, total)));
            ret
        })(remaining_input)
        .map_err(convert_bits_err)?;
    let (remaining_input, md5) = byte_take(16usize)(remaining_input)?;
    let info_fn = || {
        let mut info = component::StreamInfo::new(sample_rate, channels, bits_per_sample)?;
        info.set_total_samples(total_samples);
        let mut digest = [0u8; 16];
        digest.copy_from_slice(md5);
        info.set_md5_digest(&digest);
        info.set_block_sizes(min_block_size as usize, max_block_size as usize)?;
        info.set_frame_sizes(min_frame_size as usize, max_frame_size as usize)?;
        let ret: Result<_, VerifyError> = Ok(info);
        ret
    };
    let info = info_fn().map_err(|_e| invalid(remaining_input, ErrorKind::Verify))?;
    Ok((remaining_input, info))
}

fn application<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::Application, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, id) = byte_take(4usize)(input)?;
    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(id);
    Ok((
        &remaining_input[remaining_input.len()..],
        component::Application::new(id_bytes, remaining_input),
    ))
}

fn seek_point<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::SeekPoint, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, sample_number) = be_u64(input)?;
    let (remaining_input, stream_offset) = be_u64(remaining_input)?;
    let (remaining_input, frame_samples) = be_u16(remaining_input)?;
    Ok((
        remaining_input,
        component::SeekPoint::new(sample_number, stream_offset, frame_samples),
    ))
}

fn seek_table<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::SeekTable, E>
where
    E: ParseError<&'a [u8]>,
{
    let count = input.len() / SEEK_POINT_BYTES;
    let (remaining_input, points) = many_m_n(count, count, seek_point)(input)?;
    let table = component::SeekTable::new(&points)
        .map_err(|_e| invalid(remaining_input, ErrorKind::Verify))?;
    Ok((remaining_input, table))
}

fn le_string<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], &'a str, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, len) = le_u32(input)?;
    let (remaining_input, bytes) = byte_take(len)(remaining_input)?;
    let s = std::str::from_utf8(bytes).map_err(|_e| invalid(input, ErrorKind::Char))?;
    Ok((remaining_input, s))
}

fn vorbis_comment<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::VorbisComment, E>
where
    E: ParseError<&'a [u8]>,
{
    let (mut remaining_input, vendor) = le_string(input)?;
    let (i, count) = le_u32(remaining_input)?;
    remaining_input = i;
    let mut ret = component::VorbisComment::new(vendor);
    for _ in 0..count {
        let (i, entry) = le_string(remaining_input)?;
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| invalid(remaining_input, ErrorKind::Verify))?;
        ret.add_field(name, value)
            .map_err(|_e| invalid(remaining_input, ErrorKind::Verify))?;
        remaining_input = i;
    }
    Ok((remaining_input, ret))
}

fn cue_index<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::CueIndex, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, offset) = be_u64(input)?;
    let (remaining_input, number) = be_u8(remaining_input)?;
    let (remaining_input, _reserved) = byte_take(3usize)(remaining_input)?;
    Ok((remaining_input, component::CueIndex::new(offset, number)))
}

fn cue_track<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::CueTrack, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, offset) = be_u64(input)?;
    let (remaining_input, number) = be_u8(remaining_input)?;
    let (remaining_input, isrc) = byte_take(CUESHEET_ISRC_BYTES)(remaining_input)?;
    let (remaining_input, flags) = be_u8(remaining_input)?;
    let (remaining_input, _reserved) = byte_take(13usize)(remaining_input)?;
    let (remaining_input, nindices) = be_u8(remaining_input)?;
    let nindices = nindices as usize;
    let (remaining_input, indices) = many_m_n(nindices, nindices, cue_index)(remaining_input)?;

    let mut track = component::CueTrack::new(offset, number, &indices);
    if isrc.iter().any(|b| *b != 0) {
        let isrc = std::str::from_utf8(isrc).map_err(|_e| invalid(input, ErrorKind::Char))?;
        track
            .set_isrc(isrc)
            .map_err(|_e| invalid(input, ErrorKind::Verify))?;
    }
    track.set_flags(flags & 0x80 == 0, flags & 0x40 != 0);
    Ok((remaining_input, track))
}

fn cue_sheet<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::CueSheet, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, catalog) = byte_take(CUESHEET_CATALOG_BYTES)(input)?;
    let (remaining_input, lead_in) = be_u64(remaining_input)?;
    let (remaining_input, flags) = be_u8(remaining_input)?;
    let (remaining_input, _reserved) = byte_take(258usize)(remaining_input)?;
    let (remaining_input, ntracks) = be_u8(remaining_input)?;
    let ntracks = ntracks as usize;
    let (remaining_input, tracks) = many_m_n(ntracks, ntracks, cue_track)(remaining_input)?;

    let catalog_len = catalog.iter().position(|b| *b == 0).unwrap_or(catalog.len());
    let catalog = std::str::from_utf8(&catalog[..catalog_len])
        .map_err(|_e| invalid(input, ErrorKind::Char))?;
    let sheet = component::CueSheet::new(catalog, lead_in, flags & 0x80 != 0, &tracks)
        .map_err(|_e| invalid(input, ErrorKind::Verify))?;
    Ok((remaining_input, sheet))
}

fn be_string<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], &'a str, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, len) = be_u32(input)?;
    let (remaining_input, bytes) = byte_take(len)(remaining_input)?;
    let s = std::str::from_utf8(bytes).map_err(|_e| invalid(input, ErrorKind::Char))?;
    Ok((remaining_input, s))
}

fn picture<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], component::Picture, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, typetag) = be_u32(input)?;
    let (remaining_input, mime) = be_string(remaining_input)?;
    let (remaining_input, description) = be_string(remaining_input)?;
    let (remaining_input, width) = be_u32(remaining_input)?;
    let (remaining_input, height) = be_u32(remaining_input)?;
    let (remaining_input, depth) = be_u32(remaining_input)?;
    let (remaining_input, colors) = be_u32(remaining_input)?;
    let (remaining_input, data_len) = be_u32(remaining_input)?;
    let (remaining_input, data) = byte_take(data_len)(remaining_input)?;

    let picture_type = component::PictureType::from_tag(typetag)
        .ok_or_else(|| invalid(input, ErrorKind::TagBits))?;
    let mut pic = component::Picture::new(picture_type, mime, description, data)
        .map_err(|_e| invalid(input, ErrorKind::Verify))?;
    pic.set_dimensions(width, height, depth, colors);
    Ok((remaining_input, pic))
}

/// Recognizes [`component::Frame`].
pub fn frame<'a, E>(
    stream_info: &component::StreamInfo,
    check_crc: bool,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], component::Frame, E>
where
    E: ParseError<&'a [u8]>,
{
    let channels_from_header = stream_info.channels();
    let bits_per_sample_from_header = stream_info.bits_per_sample();

    move |input| {
        let input_start = input;
        let (remaining_input, header) = frame_header(check_crc)(input)?;
        let channels = header.channel_assignment().channels();
        if channels != channels_from_header {
            return Err(invalid(remaining_input, ErrorKind::TagBits));
        }
        let block_size = header.block_size();
        let bits_per_sample = header
            .bits_per_sample()
            .unwrap_or(bits_per_sample_from_header);
        if bits_per_sample != bits_per_sample_from_header {
            return Err(invalid(remaining_input, ErrorKind::TagBits));
        }

        let assignment = header.channel_assignment().clone();
        let (remaining_input, subframes) = bits(|bit_input| {
            let mut bit_input = bit_input;
            let mut subframes = Vec::with_capacity(channels);
            for ch in 0..channels {
                let (i, sf) = subframe::<(BitInput<'a>, ErrorKind)>(
                    block_size,
                    bits_per_sample + assignment.bits_per_sample_offset(ch),
                )(bit_input)?;
                bit_input = i;
                subframes.push(sf);
            }
            let ret: IResult<BitInput<'a>, _, (BitInput<'a>, ErrorKind)> = Ok((bit_input, subframes));
            ret
        })(remaining_input)
        .map_err(convert_bits_err)?;

        let test_crc16 = check_crc.then(|| {
            let frame_bytes = &input_start[..input_start.offset(remaining_input)];
            FRAME_CRC.checksum(frame_bytes)
        });
        let (remaining_input, _) =
            verify(be_u16, |crc| test_crc16.map_or(true, |x| x == *crc))(remaining_input)?;

        Ok((
            remaining_input,
            component::Frame::from_parts(header, subframes),
        ))
    }
}

/// Recognizes [`component::FrameHeader`].
pub fn frame_header<'a, E>(
    check_crc: bool,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], component::FrameHeader, E>
where
    E: ParseError<&'a [u8]>,
{
    move |input| {
        let input_start = input;
        let (
            remaining_input,
            (blocking_type, block_size_tag, sample_rate_tag, channel_tag, sample_size_tag),
        ) = bits(|bit_input| {
            let (remaining_input, _sync) = bit_tag(0x7FFCu16, 15usize)(bit_input)?;
            let (remaining_input, blocking_type): (_, u8) = bit_take(1usize)(remaining_input)?;
            let (remaining_input, block_size_tag): (_, u8) = bit_take(4usize)(remaining_input)?;
            let (remaining_input, sample_rate_tag): (_, u8) = bit_take(4usize)(remaining_input)?;
            let (remaining_input, channel_tag): (_, u8) = bit_take(4usize)(remaining_input)?;
            let (remaining_input, sample_size_tag): (_, u8) = bit_take(3usize)(remaining_input)?;
            let (remaining_input, _reserved) = bit_tag(0u8, 1usize)(remaining_input)?;
            let ret: IResult<BitInput<'a>, _, (BitInput<'a>, ErrorKind)> = Ok((
                remaining_input,
                (
                    blocking_type,
                    block_size_tag,
                    sample_rate_tag,
                    channel_tag,
                    sample_size_tag,
                ),
            ));
            ret
        })(input)
        .map_err(convert_bits_err)?;

        let sample_size_spec = component::SampleSizeSpec::from_tag(sample_size_tag)
            .ok_or_else(|| invalid(remaining_input, ErrorKind::TagBits))?;
        let channel_assignment = component::ChannelAssignment::from_tag(channel_tag)
            .ok_or_else(|| invalid(remaining_input, ErrorKind::TagBits))?;
        let (remaining_input, offset) = if blocking_type == 0 {
            map(utf8_code, |x| FrameOffset::Frame(x as u32))(remaining_input)?
        } else {
            map(utf8_code, FrameOffset::StartSample)(remaining_input)?
        };

        let (remaining_input, block_size_data) = match block_size_tag {
            6 => map(be_u8, |x| Some(x as usize))(remaining_input)?,
            7 => map(be_u16, |x| Some(x as usize))(remaining_input)?,
            _ => (remaining_input, None),
        };
        let block_size_spec =
            component::BlockSizeSpec::from_tag_and_data(block_size_tag, block_size_data)
                .ok_or_else(|| invalid(remaining_input, ErrorKind::TagBits))?;

        let (remaining_input, sample_rate_data) = match sample_rate_tag {
            12 => map(be_u8, |x| Some(x as usize))(remaining_input)?,
            13 | 14 => map(be_u16, |x| Some(x as usize))(remaining_input)?,
            _ => (remaining_input, None),
        };
        let sample_rate_spec =
            component::SampleRateSpec::from_tag_and_data(sample_rate_tag, sample_rate_data)
                .ok_or_else(|| invalid(remaining_input, ErrorKind::TagBits))?;

        let test_crc8 = check_crc.then(|| {
            let header_bytes = &input_start[..input_start.offset(remaining_input)];
            HEADER_CRC.checksum(header_bytes)
        });
        let (remaining_input, _) =
            verify(be_u8, |crc| test_crc8.map_or(true, |x| x == *crc))(remaining_input)?;

        Ok((
            remaining_input,
            component::FrameHeader::from_specs(
                block_size_spec,
                channel_assignment,
                sample_size_spec,
                sample_rate_spec,
                offset,
            ),
        ))
    }
}

fn utf8_code<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], u64, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, head) = map(be_u8, u64::from)(input)?;

    let (tail_count, mut acc) = if head < 0x80 {
        (0usize, head & 0x7F)
    } else if head < 0xE0 {
        (1, head & 0x1F)
    } else if head < 0xF0 {
        (2, head & 0x0F)
    } else if head < 0xF8 {
        (3, head & 0x07)
    } else if head < 0xFC {
        (4, head & 0x03)
    } else if head < 0xFE {
        (5, head & 0x01)
    } else if head == 0xFE {
        (6, 0)
    } else {
        return Err(invalid(remaining_input, ErrorKind::TagBits));
    };

    let (remaining_input, tail): (_, &[u8]) = byte_take(tail_count)(remaining_input)?;
    for b in tail {
        acc = acc << 6 | u64::from(*b & 0x3F);
    }
    Ok((remaining_input, acc))
}

/// Recognizes [`component::SubFrame`].
///
/// `bits_per_sample` is the width of the channel including the extra bit for
/// side channels. Wasted bits signaled in the header are subtracted from it.
pub fn subframe<'a, E>(
    block_size: usize,
    bits_per_sample: usize,
) -> impl FnMut(BitInput<'a>) -> IResult<BitInput<'a>, component::SubFrame, E>
where
    E: ParseError<BitInput<'a>>,
{
    move |input| {
        let (remaining_input, _pad) = bit_tag(0u8, 1usize)(input)?;
        let (remaining_input, typetag): (_, u8) = bit_take(6usize)(remaining_input)?;
        let (remaining_input, wasted_flag): (_, u8) = bit_take(1usize)(remaining_input)?;
        let (remaining_input, wasted_bits) = if wasted_flag == 0 {
            (remaining_input, 0)
        } else {
            map(unary_code, |k| k + 1)(remaining_input)?
        };
        if wasted_bits >= bits_per_sample {
            return Err(invalid(remaining_input, ErrorKind::Verify));
        }
        let bps = bits_per_sample - wasted_bits;

        let (remaining_input, mut ret): (_, component::SubFrame) = match typetag {
            0x00 => {
                let (i, dc_offset) = raw_sample(bps)(remaining_input)?;
                (
                    i,
                    component::Constant::from_parts(block_size, dc_offset, bps as u8).into(),
                )
            }
            0x01 => {
                let (i, data) = raw_samples(bps, block_size)(remaining_input)?;
                (i, component::Verbatim::from_samples(&data, bps as u8).into())
            }
            0x08..=0x0C => {
                let order = (typetag - 0x08) as usize;
                let (i, warm_up) = raw_samples(bps, order)(remaining_input)?;
                let warm_up = heapless::Vec::from_slice(&warm_up)
                    .map_err(|()| invalid(remaining_input, ErrorKind::TooLarge))?;
                let (i, residual) = residual(block_size, order)(i)?;
                (
                    i,
                    component::FixedLpc::from_parts(warm_up, residual, bps as u8).into(),
                )
            }
            0x20..=0x3F => {
                let order = (typetag - 0x20) as usize + 1;
                let (i, warm_up) = raw_samples(bps, order)(remaining_input)?;
                let warm_up = heapless::Vec::from_slice(&warm_up)
                    .map_err(|()| invalid(remaining_input, ErrorKind::TooLarge))?;
                let (i, parameters) = quantized_parameters(order)(i)?;
                let (i, residual) = residual(block_size, order)(i)?;
                (
                    i,
                    component::Lpc::from_parts(warm_up, parameters, residual, bps as u8).into(),
                )
            }
            _ => return Err(invalid(remaining_input, ErrorKind::TagBits)),
        };
        ret.set_wasted_bits(wasted_bits);
        Ok((remaining_input, ret))
    }
}

/// Recognizes [`component::QuantizedParameters`].
pub fn quantized_parameters<'a, E>(
    order: usize,
) -> impl FnMut(BitInput<'a>) -> IResult<BitInput<'a>, component::QuantizedParameters, E>
where
    E: ParseError<BitInput<'a>>,
{
    move |input| {
        let (remaining_input, precision): (_, usize) =
            map(bit_take(4usize), |p: u8| p as usize + 1)(input)?;
        let (remaining_input, shift) = raw_sample(5)(remaining_input)?;
        let (remaining_input, coefs) = raw_samples(precision, order)(remaining_input)?;

        let coefs: Vec<i16> = coefs.into_iter().map(|x| x as i16).collect();
        let ret = component::QuantizedParameters::new(&coefs, shift as i8, precision)
            .map_err(|_e| invalid(input, ErrorKind::Verify))?;
        Ok((remaining_input, ret))
    }
}

/// Recognizes [`component::Residual`].
pub fn residual<'a, E>(
    block_size: usize,
    warmup_length: usize,
) -> impl FnMut(BitInput<'a>) -> IResult<BitInput<'a>, component::Residual, E>
where
    E: ParseError<BitInput<'a>>,
{
    move |input| {
        let (remaining_input, method_tag): (_, u8) = bit_take(2usize)(input)?;
        let method = ResidualCodingMethod::from_tag(method_tag)
            .ok_or_else(|| invalid(remaining_input, ErrorKind::TagBits))?;
        let (remaining_input, partition_order): (_, u8) = bit_take(4usize)(remaining_input)?;

        let partition_count = 1usize << partition_order;
        let partition_len = block_size >> partition_order;

        let mut params = Vec::with_capacity(partition_count);
        let mut residuals = vec![0i32; warmup_length.min(block_size)];
        let mut remaining_input = remaining_input;
        for p in 0..partition_count {
            let start = if p == 0 { warmup_length } else { p * partition_len };
            let end = (p + 1) * partition_len;
            let (i, param): (_, u8) = bit_take(method.parameter_bits())(remaining_input)?;
            remaining_input = i;
            if param == method.escape_code() {
                let (i, width): (_, usize) = bit_take(RAW_BITS_WIDTH)(remaining_input)?;
                remaining_input = i;
                if width == 0 {
                    residuals.resize(residuals.len() + end - start, 0);
                } else {
                    let (i, values) = raw_samples(width, end - start)(remaining_input)?;
                    remaining_input = i;
                    residuals.extend_from_slice(&values);
                }
                params.push(PartitionParam::Escaped(width as u8));
            } else {
                for _t in start..end {
                    let (i, q) = unary_code(remaining_input)?;
                    let (i, r): (_, u32) = bit_take(param as usize)(i)?;
                    remaining_input = i;
                    residuals.push(decode_signbit(((q as u32) << param) | r));
                }
                params.push(PartitionParam::Rice(param));
            }
        }

        Ok((
            remaining_input,
            component::Residual::from_parts(
                method,
                partition_order,
                block_size,
                warmup_length,
                params,
                residuals,
            ),
        ))
    }
}

const fn u_to_i(x: u64, bits: usize) -> i64 {
    let msb: u64 = 1u64 << (bits - 1);
    if x >= msb {
        x as i64 - (1i64 << bits)
    } else {
        x as i64
    }
}

fn raw_sample<'a, E>(bits_per_sample: usize) -> impl FnMut(BitInput<'a>) -> IResult<BitInput<'a>, i32, E>
where
    E: ParseError<BitInput<'a>>,
{
    move |input| {
        let (remaining_input, u): (_, u64) = bit_take(bits_per_sample)(input)?;
        Ok((remaining_input, u_to_i(u, bits_per_sample) as i32))
    }
}

/// Utility parser for reading a sequence of samples with an arbitrary bit-width.
fn raw_samples<'a, E>(
    bits_per_sample: usize,
    size: usize,
) -> impl FnMut(BitInput<'a>) -> IResult<BitInput<'a>, Vec<i32>, E>
where
    E: ParseError<BitInput<'a>>,
{
    move |input| {
        let mut remaining_input = input;
        let mut data = Vec::with_capacity(size);
        for _t in 0..size {
            let (i, v) = raw_sample(bits_per_sample)(remaining_input)?;
            remaining_input = i;
            data.push(v);
        }
        Ok((remaining_input, data))
    }
}

/// Recognizes unary-code of unsigned integers.
fn unary_code<'a, E>(input: BitInput<'a>) -> IResult<BitInput<'a>, usize, E>
where
    E: ParseError<BitInput<'a>>,
{
    let (remaining_input, ret) = nom::multi::many0_count(bit_tag(0u8, 1usize))(input)?;
    let (remaining_input, _) = bit_tag(1u8, 1usize)(remaining_input)?;
    Ok((remaining_input, ret))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bitsink::encode_to_utf8like;
    use crate::component::BitRepr;
    use crate::test_helper::make_random_residual;
    use crate::test_helper::make_verbatim_frame;

    use nom::error::VerboseError;
    use rand::distributions::Distribution;
    use rand::distributions::Uniform;
    use rstest::rstest;

    #[test]
    fn decoding_metadata_block_and_stream_info() {
        for is_last in [true, false] {
            let mut stream_info = component::StreamInfo::new(44100, 2, 24).unwrap();
            stream_info.set_block_sizes(128, 1024).unwrap();
            stream_info.set_frame_sizes(123, 4567).unwrap();
            let comp = component::MetadataBlock::from_parts(is_last, stream_info.into());

            let bytes = comp.to_bytes();
            let (remaining_input, decoded) =
                metadata_block::<VerboseError<&[u8]>>(&bytes).expect("Unexpected parse error");

            assert!(remaining_input.is_empty());
            assert_eq!(comp.to_bytes(), decoded.to_bytes());
        }
    }

    #[test]
    fn decoding_other_metadata_blocks() {
        let mut vc = component::VorbisComment::new("tester");
        vc.add_field("TITLE", "a=b").unwrap();
        let mut track = component::CueTrack::new(0, 1, &[component::CueIndex::new(0, 1)]);
        track.set_isrc("ABCDE1234567").unwrap();
        track.set_flags(false, true);
        let tracks = [track, component::CueTrack::new(588 * 10, 170, &[])];
        let mut pic =
            component::Picture::new(component::PictureType::Artist, "image/jpeg", "me", &[1, 2])
                .unwrap();
        pic.set_dimensions(3, 4, 24, 0);

        for data in [
            component::MetadataBlockData::Padding(5),
            component::MetadataBlockData::Application(component::Application::new(
                *b"test",
                &[0xAA, 0xBB],
            )),
            component::MetadataBlockData::SeekTable(component::SeekTable::from_targets(&[
                4096, 0, 4096,
            ])),
            component::MetadataBlockData::VorbisComment(vc),
            component::MetadataBlockData::CueSheet(
                component::CueSheet::new("12345", 88200, true, &tracks).unwrap(),
            ),
            component::MetadataBlockData::Picture(pic),
            component::MetadataBlockData::new_unknown(0x20, &[1, 2, 3]).unwrap(),
        ] {
            let comp = component::MetadataBlock::from_parts(true, data);
            let bytes = comp.to_bytes();
            let (remaining_input, decoded) =
                metadata_block::<VerboseError<&[u8]>>(&bytes).expect("Unexpected parse error");
            assert!(remaining_input.is_empty());
            assert_eq!(comp.to_bytes(), decoded.to_bytes());
        }
    }

    #[rstest]
    fn decoding_frame(#[values(1152, 1024, 17)] block_size: usize) {
        let stream_info = component::StreamInfo::new(65535, 2, 16).unwrap();
        let framebuf = vec![-1i32; block_size * 2];
        let comp = make_verbatim_frame(&stream_info, &framebuf, 0);

        let bytes = comp.to_bytes();
        let (remaining_input, decoded) = frame::<VerboseError<&[u8]>>(&stream_info, true)(&bytes)
            .expect("Unexpected parse error");

        assert!(remaining_input.is_empty());
        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[test]
    fn corrupted_frame_is_rejected() {
        let stream_info = component::StreamInfo::new(44100, 1, 16).unwrap();
        let comp = make_verbatim_frame(&stream_info, &[1, 2, 3, 4, 5, 6, 7, 8], 0);
        let mut bytes = comp.to_bytes();
        let n = bytes.len();
        bytes[n - 4] ^= 0x10;
        assert!(frame::<VerboseError<&[u8]>>(&stream_info, true)(&bytes).is_err());
        assert!(frame::<VerboseError<&[u8]>>(&stream_info, false)(&bytes).is_ok());
    }

    #[rstest]
    fn decoding_frame_header(
        #[values(192, 1152, 127, 298, 1024)] block_size: usize,
        #[values(8, 16, 24)] bits_per_sample: usize,
        #[values(88200, 3, 65535, 95900)] sample_rate: usize,
    ) {
        let stream_info = component::StreamInfo::new(sample_rate, 2, bits_per_sample).unwrap();
        let framebuf = vec![-1i32; block_size * 2];
        let frame = make_verbatim_frame(&stream_info, &framebuf, 0);
        let comp = frame.header().clone();

        let bytes = comp.to_bytes();
        let (_remaining_input, decoded) =
            frame_header::<VerboseError<&[u8]>>(true)(&bytes).expect("Unexpected parse error");

        assert_eq!(comp, decoded);
    }

    #[test]
    fn decoding_utf8_code() {
        for x in [
            0u64,
            76,
            195,
            256,
            257,
            1000,
            1023,
            1024,
            65535,
            65536,
            68000,
            68_719_476_735, // 2^36 - 1
        ] {
            let code = encode_to_utf8like(x).expect("encode error");
            let (remaining_input, y) =
                utf8_code::<VerboseError<&[u8]>>(&code).expect("decode error");
            assert!(remaining_input.is_empty());
            assert_eq!(x, y);
        }
    }

    #[test]
    fn decoding_constant_with_wasted_bits() {
        let mut rng = rand::thread_rng();
        let block_size = Uniform::from(64..=256).sample(&mut rng);
        let offset = Uniform::from(-1000..1000).sample(&mut rng);
        let mut comp: component::SubFrame = component::Constant::new(block_size, offset, 13)
            .expect("construction error")
            .into();
        comp.set_wasted_bits(3);
        let bytes = comp.to_bytes();

        let (_remaining_input, decoded) =
            subframe::<VerboseError<BitInput>>(block_size, 16)((&bytes, 0))
                .expect("Unexpected parse error");

        assert_eq!(decoded.wasted_bits(), 3);
        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[rstest]
    fn decoding_fixed_lpc(#[values(0, 1, 4)] order: usize) {
        let residual = make_random_residual(rand::thread_rng(), order);
        let warm_up = vec![-3i32; order];
        let comp: component::SubFrame = component::FixedLpc::new(&warm_up, residual, 16)
            .expect("construction error")
            .into();
        let bytes = comp.to_bytes();

        let block_size = match &comp {
            component::SubFrame::FixedLpc(f) => f.residual().block_size(),
            _ => unreachable!(),
        };
        let (_remaining_input, decoded) =
            subframe::<VerboseError<BitInput>>(block_size, 16)((&bytes, 0))
                .expect("Unexpected parse error");

        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[test]
    fn decoding_lpc() {
        let residual = make_random_residual(rand::thread_rng(), 3);
        let block_size = residual.block_size();
        let params = component::QuantizedParameters::new(&[7, -3, 1], 2, 5).unwrap();
        let comp: component::SubFrame = component::Lpc::new(&[10, -20, 30], params, residual, 12)
            .expect("construction error")
            .into();
        let bytes = comp.to_bytes();

        let (_remaining_input, decoded) =
            subframe::<VerboseError<BitInput>>(block_size, 12)((&bytes, 0))
                .expect("Unexpected parse error");

        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[test]
    fn decoding_verbatim() {
        let mut rng = rand::thread_rng();
        let block_size = Uniform::from(1..=128).sample(&mut rng);
        let samples: Vec<i32> = (0..block_size)
            .map(|_| Uniform::from(-2048..=2047).sample(&mut rng))
            .collect();

        let comp: component::SubFrame = component::Verbatim::new(&samples, 12).unwrap().into();
        let bytes = comp.to_bytes();
        let (_remaining_input, decoded) =
            subframe::<VerboseError<BitInput>>(block_size, 12)((&bytes, 0))
                .expect("Unexpected parse error");

        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[test]
    fn decoding_residual_with_escapes() {
        let comp = component::Residual::new(
            ResidualCodingMethod::Rice2,
            2,
            16,
            2,
            &[
                PartitionParam::Rice(20),
                PartitionParam::Escaped(0),
                PartitionParam::Escaped(9),
                PartitionParam::Rice(0),
            ],
            &[0, 0, 3, -700_000, 0, 0, 0, 0, 255, -256, 1, 0, 0, 1, -1, 0],
        )
        .unwrap();
        let bytes = comp.to_bytes();
        let (_remaining_input, decoded) =
            residual::<VerboseError<BitInput>>(16, 2)((&bytes, 0)).expect("Unexpected parse error");

        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[test]
    fn decoding_random_residual() {
        let comp = make_random_residual(rand::thread_rng(), 0);
        let bytes = comp.to_bytes();
        let (_remaining_input, decoded) = residual::<VerboseError<BitInput>>(
            comp.block_size(),
            comp.warmup_length(),
        )((&bytes, 0))
        .expect("Unexpected parse error");

        assert_eq!(comp.to_bytes(), decoded.to_bytes());
    }

    #[test]
    fn decoding_unary_code() {
        let (remaining_input, decoded) = unary_code::<VerboseError<BitInput>>((&[0x01], 0))
            .expect("Unexpected error from `unary_code`.");
        assert_eq!(decoded, 7);
        assert_eq!(remaining_input, ([].as_slice(), 0));

        let (remaining_input, decoded) = unary_code::<VerboseError<BitInput>>((&[0x80, 0x0F], 1))
            .expect("Unexpected error from `unary_code`.");
        assert_eq!(decoded, 11);
        assert_eq!(remaining_input, ([0x0F].as_slice(), 5));
    }

    #[test]
    fn unsigned_to_signed_conversion() {
        assert_eq!(127, u_to_i(127, 8));
        assert_eq!(-128, u_to_i(128, 8));
        assert_eq!(-1, u_to_i(0x1_FFFF_FFFF, 33));
    }
}
