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

//! Abstract interface for bit-based output.

use std::convert::Infallible;
use std::fmt;

const CRC_8_FLAC: crc::Algorithm<u8> = crc::CRC_8_SMBUS;
const CRC_16_FLAC: crc::Algorithm<u16> = crc::CRC_16_UMTS;

/// CRC-8 used for frame headers (polynomial 0x07, zero init.)
pub static HEADER_CRC: crc::Crc<u8, crc::Table<16>> =
    crc::Crc::<u8, crc::Table<16>>::new(&CRC_8_FLAC);

/// CRC-16 used for frame footers (polynomial 0x8005, zero init.)
pub static FRAME_CRC: crc::Crc<u16, crc::Table<16>> =
    crc::Crc::<u16, crc::Table<16>>::new(&CRC_16_FLAC);

/// Lookup table for the first byte of UTF-8-like codes.
const UTF8_HEADS: [u8; 7] = [0x00, 0xC0, 0xE0, 0xF0, 0xF8, 0xFC, 0xFE];

/// Maximum number of value bits a UTF-8-like code can carry.
pub const UTF8LIKE_MAX_BITS: usize = 36;

/// Trait for the bit-addressible unsigned integers.
///
/// This trait is sealed so a user cannot implement it. Currently, this trait
/// covers: [`u8`], [`u16`], [`u32`], and [`u64`].
pub trait Bits: seal_bits::Sealed {}

impl<T: seal_bits::Sealed> Bits for T {}

/// Trait for the signed integers that can be provided to bitsink.
///
/// This trait is sealed so a user cannot implement it. Currently, this trait
/// covers: [`i8`], [`i16`], [`i32`], and [`i64`].
pub trait SignedBits: seal_signed_bits::Sealed {}

impl<T: seal_signed_bits::Sealed> SignedBits for T {}

/// Encodes `val` into a UTF-8-like byte sequence.
///
/// Returns `None` if `val` needs more than [`UTF8LIKE_MAX_BITS`] bits.
///
/// # Examples
///
/// ```
/// use flacenc_core::bitsink::encode_to_utf8like;
/// assert_eq!(encode_to_utf8like(0x7F).unwrap().as_slice(), &[0x7F]);
/// assert_eq!(encode_to_utf8like(0x80).unwrap().as_slice(), &[0xC2, 0x80]);
/// assert!(encode_to_utf8like(1 << 36).is_none());
/// ```
pub fn encode_to_utf8like(val: u64) -> Option<heapless::Vec<u8, 7>> {
    let code_bits = (u64::BITS - val.leading_zeros()) as usize;
    let mut ret = heapless::Vec::new();
    if code_bits <= 7 {
        ret.push(val as u8).ok()?;
        return Some(ret);
    }
    if code_bits > UTF8LIKE_MAX_BITS {
        return None;
    }
    // an n-byte code carries 5n + 1 bits.
    let trailing_bytes = (code_bits - 2) / 5;
    let first_bits = 6 - trailing_bytes;
    let head = UTF8_HEADS[trailing_bytes] | (val >> (6 * trailing_bytes)) as u8 & ((1u8 << first_bits) - 1);
    ret.push(head).ok()?;
    for i in (0..trailing_bytes).rev() {
        ret.push(0x80 | ((val >> (6 * i)) & 0x3F) as u8).ok()?;
    }
    Some(ret)
}

/// Computes the number of bytes used by the UTF-8-like code of `val`.
pub const fn utf8like_bytesize(val: u64) -> usize {
    let code_bits = (u64::BITS - val.leading_zeros()) as usize;
    if code_bits <= 7 {
        1
    } else {
        1 + (code_bits - 2) / 5
    }
}

/// Storage-agnostic interface trait for bit-based output.
///
/// The encoder repeatedly generates arrays of code bits that are typically
/// smaller than a byte (8 bits).  Type implementing `BitSink` is used to
/// arrange those bits typically in bytes, and transfer them to the backend
/// storage. [`ByteSink`] is a standard implementation of `BitSink` that stores
/// code bits to a `Vec` of [`u8`]s.
///
/// Every writing method can fail, and the callers are expected to discard
/// the partially written unit (metadata block or frame) in that case.
pub trait BitSink: Sized {
    /// Error type that may happen while writing bits to `BitSink`.
    type Error: std::error::Error;

    /// Puts zeros to `BitSink` until the length aligns to the byte boundaries.
    ///
    /// # Returns
    ///
    /// The number of zeros put.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// use flacenc_core::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    ///
    /// sink.write_lsbs(0xFFu8, 3)?;
    /// assert_eq!(sink.len(), 3);
    ///
    /// let pads = sink.align_to_byte()?;
    /// assert_eq!(pads, 5);
    /// assert_eq!(sink.len(), 8);
    /// # Ok(())}
    /// ```
    fn align_to_byte(&mut self) -> Result<usize, Self::Error>;

    /// Returns true if the next bit will be written at a byte boundary.
    fn is_byte_aligned(&self) -> bool;

    /// Writes bytes after alignment, and returns padded bits.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// # use flacenc_core::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    ///
    /// sink.write_lsbs(0xFFu8, 3)?;
    /// sink.write_bytes_aligned(&[0xB7, 0x7D])?;
    ///
    /// assert_eq!(sink.to_bitstring(), "11100000_10110111_01111101");
    /// # Ok(())}
    /// ```
    #[inline]
    fn write_bytes_aligned(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let ret = self.align_to_byte()?;
        for b in bytes {
            self.write(*b)?;
        }
        Ok(ret)
    }

    /// Writes `n` LSBs to the sink.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// use flacenc_core::bitsink::{ByteSink, BitSink};
    ///
    /// let mut sink = ByteSink::new();
    /// sink.write_lsbs(0x0Fu8, 3)?;
    ///
    /// assert_eq!(sink.len(), 3);
    /// assert_eq!(sink.to_bitstring(), "111*****");
    /// # Ok(())}
    /// ```
    fn write_lsbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error>;

    /// Writes `n` MSBs to the sink.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    fn write_msbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error>;

    /// Writes all bits in `val: Bits`.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// use flacenc_core::bitsink::{ByteSink, BitSink};
    ///
    /// let mut sink = ByteSink::new();
    /// sink.write_msbs(0xF0u8, 3)?;
    /// sink.write(0x5555u16)?;
    ///
    /// assert_eq!(sink.to_bitstring(), "11101010_10101010_101*****");
    /// # Ok(())}
    /// ```
    #[inline]
    fn write<T: Bits>(&mut self, val: T) -> Result<(), Self::Error> {
        self.write_msbs(val, T::BITS)
    }

    /// Writes `val` in two's coplement format.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// use flacenc_core::bitsink::{ByteSink, BitSink};
    ///
    /// let mut sink = ByteSink::new();
    /// sink.write_msbs(0xF0u8, 3)?;
    ///
    /// // two's complement of 00011 in 11101
    /// sink.write_twoc(-3i32, 5)?;
    /// assert_eq!(sink.to_bitstring(), "11111101");
    /// # Ok(())}
    /// ```
    #[inline]
    fn write_twoc<T: SignedBits>(
        &mut self,
        val: T,
        bits_per_sample: usize,
    ) -> Result<(), Self::Error> {
        if bits_per_sample == 0 {
            return Ok(());
        }
        let val: i64 = val.into();
        let shifted = (val << (64 - bits_per_sample)) as u64;
        self.write_msbs(shifted, bits_per_sample)
    }

    /// Writes `n`-bits of zeros.
    ///
    /// A default implementation using `write_msbs` is provided. An impl can
    /// provide a faster short-cut for writing zeros.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    #[inline]
    fn write_zeros(&mut self, n: usize) -> Result<(), Self::Error> {
        let mut n = n;
        while n > 64 {
            self.write(0u64)?;
            n -= 64;
        }
        self.write_msbs(0u64, n)
    }

    /// Writes `val` in the unary code used for Rice quotients.
    ///
    /// The code is `val` zeros followed by a single one.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// use flacenc_core::bitsink::{ByteSink, BitSink};
    ///
    /// let mut sink = ByteSink::new();
    /// sink.write_unary_zeros(3)?;
    /// sink.write_unary_zeros(0)?;
    /// assert_eq!(sink.to_bitstring(), "00011***");
    /// # Ok(())}
    /// ```
    #[inline]
    fn write_unary_zeros(&mut self, val: usize) -> Result<(), Self::Error> {
        self.write_zeros(val)?;
        self.write_lsbs(1u8, 1)
    }

    /// Writes `val` in the UTF-8-like variable length code (up to 31 bits.)
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    #[inline]
    fn write_utf8_u32(&mut self, val: u32) -> Result<(), Self::Error> {
        self.write_utf8_u64(u64::from(val) & 0x7FFF_FFFF)
    }

    /// Writes `val` in the UTF-8-like variable length code (up to 36 bits.)
    ///
    /// Bits above the 36th are discarded, callers must check the range
    /// beforehand.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// use flacenc_core::bitsink::{ByteSink, BitSink};
    ///
    /// let mut sink = ByteSink::new();
    /// sink.write_utf8_u64(0x1234)?;
    /// assert_eq!(sink.as_slice(), &[0xE1, 0x88, 0xB4]);
    /// # Ok(())}
    /// ```
    #[inline]
    fn write_utf8_u64(&mut self, val: u64) -> Result<(), Self::Error> {
        debug_assert!(val >> UTF8LIKE_MAX_BITS == 0);
        let val = val & ((1u64 << UTF8LIKE_MAX_BITS) - 1);
        encode_to_utf8like(val).map_or(Ok(0), |bytes| self.write_bytes_aligned(&bytes))?;
        Ok(())
    }
}

/// `BitSink` implementation based on [`Vec`] of [`u8`]s.
///
/// Since this type store code bits in [`u8`]s, the internal buffer can directly
/// be written to, e.g. [`std::io::Write`] via [`write_all`] method.
///
/// `ByteSink` additionally tracks a CRC mark, so the checksums of the bytes
/// written after [`ByteSink::reset_crc`] can be obtained without copying.
///
/// [`write_all`]: std::io::Write::write_all
#[derive(Clone, Debug, Default)]
pub struct ByteSink {
    storage: Vec<u8>,
    bitlength: usize,
    crc_mark: usize,
}

impl ByteSink {
    /// Creates new `ByteSink` instance with the default capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::bitsink::*;
    /// let sink = ByteSink::new();
    /// let empty: [u8; 0] = [];
    /// assert_eq!(&empty, sink.as_slice());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates new `ByteSink` instance with the specified capacity (in bits).
    pub fn with_capacity(capacity_in_bits: usize) -> Self {
        Self {
            storage: Vec::with_capacity((capacity_in_bits >> 3) + 1),
            bitlength: 0usize,
            crc_mark: 0usize,
        }
    }

    /// Clears the vector, removing all values.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::bitsink::*;
    /// let mut sink = ByteSink::new();
    /// sink.write_lsbs(0xAAAAAAAAu32, 14);
    /// assert_eq!(sink.to_bitstring(), "10101010_101010**");
    /// sink.clear();
    /// assert_eq!(sink.to_bitstring(), "");
    /// ```
    pub fn clear(&mut self) {
        self.storage.clear();
        self.bitlength = 0;
        self.crc_mark = 0;
    }

    /// Returns the number of bits stored in the buffer.
    pub fn len(&self) -> usize {
        self.bitlength
    }

    /// Checks if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bitlength == 0
    }

    /// Reseerves capacity for at least `additional_in_bits` more bits.
    pub fn reserve(&mut self, additional_in_bits: usize) {
        self.storage.reserve((additional_in_bits >> 3) + 1);
    }

    /// Returns the remaining number of bits in the last byte.
    #[inline]
    const fn paddings(&self) -> usize {
        ((!self.bitlength).wrapping_add(1)) & 7
    }

    /// Starts a new CRC region at the current (byte-aligned) position.
    ///
    /// # Panics
    ///
    /// Panics if the sink is not byte-aligned.
    pub fn reset_crc(&mut self) {
        assert!(
            self.is_byte_aligned(),
            "CRC region must start at a byte boundary"
        );
        self.crc_mark = self.storage.len();
    }

    /// Returns the completed bytes written after the last CRC mark.
    fn crc_region(&self) -> &[u8] {
        debug_assert!(self.is_byte_aligned());
        let end = self.bitlength >> 3;
        &self.storage[self.crc_mark.min(end)..end]
    }

    /// Computes CRC-8 of the bytes written since the last [`reset_crc`].
    ///
    /// [`reset_crc`]: ByteSink::reset_crc
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::bitsink::*;
    /// let mut sink = ByteSink::new();
    /// sink.write_bytes_aligned(&[0xFF, 0xF8, 0x69, 0x18, 0x00, 0x00]);
    /// assert_eq!(sink.crc8(), 0xBF);
    /// ```
    pub fn crc8(&self) -> u8 {
        HEADER_CRC.checksum(self.crc_region())
    }

    /// Computes CRC-16 of the bytes written since the last [`reset_crc`].
    ///
    /// [`reset_crc`]: ByteSink::reset_crc
    pub fn crc16(&self) -> u16 {
        FRAME_CRC.checksum(self.crc_region())
    }

    /// Returns bits in a string.
    ///
    /// This function formats an internal buffer state to a human-readable
    /// string. Each byte is shown in eight characters joined by `'_'`, and the
    /// last bits of the last byte that are not yet filled are shown as `'*'`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::bitsink::*;
    /// let mut sink = ByteSink::new();
    /// sink.write_msbs(0x3456u16, 13);
    /// assert_eq!(sink.to_bitstring(), "00110100_01010***");
    /// ```
    pub fn to_bitstring(&self) -> String {
        let mut ret = String::new();
        for b in &self.storage {
            ret.push_str(&format!("{b:08b}"));
            ret.push('_');
        }
        ret.pop();

        for _t in 0..self.paddings() {
            ret.pop();
        }
        for _t in 0..self.paddings() {
            ret.push('*');
        }
        ret
    }

    /// Consumes `ByteSink` and returns the internal buffer.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.storage
    }

    /// Returns a reference to the internal bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage
    }
}

impl BitSink for ByteSink {
    type Error = Infallible;

    #[inline]
    fn align_to_byte(&mut self) -> Result<usize, Self::Error> {
        let r = self.paddings();
        self.bitlength += r;
        Ok(r)
    }

    #[inline]
    fn is_byte_aligned(&self) -> bool {
        self.bitlength & 7 == 0
    }

    #[inline]
    fn write_bytes_aligned(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let ret = self.align_to_byte()?;
        self.storage.extend_from_slice(bytes);
        self.bitlength += 8 * bytes.len();
        Ok(ret)
    }

    #[inline]
    fn write_msbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error> {
        if n == 0 {
            return Ok(());
        }
        debug_assert!(n <= T::BITS);
        let mut val: u64 = val.into();
        val <<= 64 - T::BITS;
        if n < 64 {
            // clear lsbs
            val &= !(u64::MAX >> n);
        }

        let r = self.paddings();
        self.bitlength += n;
        let mut n = n;
        if r != 0 {
            if let Some(last) = self.storage.last_mut() {
                *last |= (val >> (64 - r)) as u8;
            }
            if r >= n {
                return Ok(());
            }
            val <<= r;
            n -= r;
        }
        while n >= 8 {
            self.storage.push((val >> 56) as u8);
            val <<= 8;
            n -= 8;
        }
        if n > 0 {
            self.storage.push((val >> 56) as u8);
        }
        Ok(())
    }

    #[inline]
    fn write_lsbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error> {
        if n == 0 {
            return Ok(());
        }
        self.write_msbs(val << (T::BITS - n), n)
    }

    #[inline]
    fn write_zeros(&mut self, n: usize) -> Result<(), Self::Error> {
        let pad = self.paddings();
        if n <= pad {
            self.bitlength += n;
            return Ok(());
        }
        self.bitlength += pad;
        let n = n - pad;

        let bytes = (n + 7) >> 3;
        self.storage.resize(self.storage.len() + bytes, 0u8);
        self.bitlength += n;

        Ok(())
    }
}

/// Error emitted when [`LimitedSink`] runs out of its capacity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapacityError {
    capacity: usize,
    requested: usize,
}

impl std::error::Error for CapacityError {}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sink capacity exceeded: {} bits requested, capacity is {} bits.",
            self.requested, self.capacity
        )
    }
}

/// `BitSink` with a fixed capacity in bits.
///
/// This sink behaves as [`ByteSink`] until the capacity is reached, and then
/// rejects every write that does not fit. The bits of a rejected write are
/// not stored.
///
/// # Examples
///
/// ```
/// use flacenc_core::bitsink::{BitSink, LimitedSink};
///
/// let mut sink = LimitedSink::new(12);
/// assert!(sink.write(0xABu8).is_ok());
/// assert!(sink.write(0xCDu8).is_err());
/// assert_eq!(sink.len(), 8);
/// ```
#[derive(Clone, Debug)]
pub struct LimitedSink {
    inner: ByteSink,
    capacity: usize,
}

impl LimitedSink {
    /// Creates a new sink that can store up to `capacity_in_bits` bits.
    pub fn new(capacity_in_bits: usize) -> Self {
        Self {
            inner: ByteSink::with_capacity(capacity_in_bits),
            capacity: capacity_in_bits,
        }
    }

    /// Returns the number of bits stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Checks if the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the stored bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.inner.as_slice()
    }

    #[inline]
    fn reserve_bits(&self, n: usize) -> Result<(), CapacityError> {
        let requested = self.inner.len() + n;
        if requested > self.capacity {
            Err(CapacityError {
                capacity: self.capacity,
                requested,
            })
        } else {
            Ok(())
        }
    }
}

impl BitSink for LimitedSink {
    type Error = CapacityError;

    fn align_to_byte(&mut self) -> Result<usize, Self::Error> {
        self.reserve_bits(self.inner.paddings())?;
        self.inner.align_to_byte().map_err(|e| match e {})
    }

    fn is_byte_aligned(&self) -> bool {
        self.inner.is_byte_aligned()
    }

    fn write_bytes_aligned(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        self.reserve_bits(self.inner.paddings() + bytes.len() * 8)?;
        self.inner
            .write_bytes_aligned(bytes)
            .map_err(|e| match e {})
    }

    fn write_lsbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error> {
        self.reserve_bits(n)?;
        self.inner.write_lsbs(val, n).map_err(|e| match e {})
    }

    fn write_msbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error> {
        self.reserve_bits(n)?;
        self.inner.write_msbs(val, n).map_err(|e| match e {})
    }

    fn write_zeros(&mut self, n: usize) -> Result<(), Self::Error> {
        self.reserve_bits(n)?;
        self.inner.write_zeros(n).map_err(|e| match e {})
    }
}

mod seal_bits {
    use num_traits::PrimInt;
    use num_traits::ToBytes;

    pub trait Sealed: ToBytes + From<u8> + Into<u64> + PrimInt {
        /// The number of bits in the type.
        const BITS: usize = 1usize << Self::BITS_LOG2;
        /// `ilog2` of `Self::BITS`.
        const BITS_LOG2: usize = (std::mem::size_of::<Self>() * 8).ilog2() as usize;
    }

    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

mod seal_signed_bits {
    pub trait Sealed: Into<i64> {}

    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}
