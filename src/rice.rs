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

//! Functions for partitioned rice coding (PRC).

use crate::component::PartitionParam;
use crate::component::ResidualCodingMethod;
use crate::config;
use crate::constant::rice::MAX_PARTITION_ORDER;
use crate::constant::rice::MAX_RICE_PARAMETER;
use crate::constant::rice::RAW_BITS_WIDTH;
use crate::reusable;
use crate::reuse;

/// Bits for the method and partition-order fields.
const RESIDUAL_HEADER_BITS: usize = 2 + 4;

/// Statistics of a partition needed for finding the optimal parameter.
#[derive(Clone, Debug, PartialEq)]
struct PartitionStats {
    len: usize,
    /// `quotient_bits[p]` is the sum of unary-coded lengths with parameter
    /// `p`, including the terminating ones.
    quotient_bits: [u64; MAX_RICE_PARAMETER + 1],
    /// Width of two's complement needed for the raw samples.
    raw_bits: u32,
}

impl PartitionStats {
    fn from_signal(signal: &[i32], max_p: usize) -> Self {
        let mut quotient_bits = [0u64; MAX_RICE_PARAMETER + 1];
        let mut magnitude = 0u32;
        let mut nonzero = false;
        for v in signal {
            let zz = u64::from(encode_signbit(*v));
            for (p, acc) in quotient_bits.iter_mut().take(max_p + 1).enumerate() {
                *acc += (zz >> p) + 1;
            }
            magnitude |= (*v ^ (*v >> 31)) as u32;
            nonzero |= *v != 0;
        }
        let raw_bits = if nonzero {
            33 - magnitude.leading_zeros()
        } else {
            0
        };
        Self {
            len: signal.len(),
            quotient_bits,
            raw_bits,
        }
    }

    /// Total bits needed for rice coding with parameter `p`.
    #[inline]
    fn rice_bits(&self, p: usize) -> u64 {
        self.quotient_bits[p] + (self.len * p) as u64
    }

    /// Returns the cheapest parameter (smaller on ties) and its cost.
    fn minimizer(&self, max_p: usize) -> (usize, u64) {
        let mut best = (0, self.rice_bits(0));
        for p in 1..=max_p {
            let bits = self.rice_bits(p);
            if bits < best.1 {
                best = (p, bits);
            }
        }
        best
    }

    /// Finds the parameter and the bit count of this partition.
    fn choose(
        &self,
        method: ResidualCodingMethod,
        max_p: usize,
        use_escape: bool,
    ) -> (PartitionParam, u64) {
        let field_bits = method.parameter_bits() as u64;
        let (p, rice_bits) = self.minimizer(max_p);
        let rice_bits = rice_bits + field_bits;
        if use_escape && self.raw_bits < (1 << RAW_BITS_WIDTH) {
            let escaped_bits =
                field_bits + RAW_BITS_WIDTH as u64 + self.len as u64 * u64::from(self.raw_bits);
            if escaped_bits < rice_bits {
                return (
                    PartitionParam::Escaped(self.raw_bits as u8),
                    escaped_bits,
                );
            }
        }
        (PartitionParam::Rice(p as u8), rice_bits)
    }

    fn merge(&self, other: &Self, max_p: usize) -> Self {
        let mut quotient_bits = [0u64; MAX_RICE_PARAMETER + 1];
        for p in 0..=max_p {
            quotient_bits[p] = self.quotient_bits[p] + other.quotient_bits[p];
        }
        Self {
            len: self.len + other.len,
            quotient_bits,
            raw_bits: std::cmp::max(self.raw_bits, other.raw_bits),
        }
    }
}

/// Encodes the sign bit into its LSB (for Rice coding).
#[inline]
pub const fn encode_signbit(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

/// Recovers a sign bit from its LSB.
#[inline]
pub const fn decode_signbit(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

/// Returns true if the partition order is usable for the block.
///
/// Every partition must be non-empty after removing warm-up samples from the
/// first partition.
#[inline]
pub const fn is_valid_partition_order(block_size: usize, warmup_length: usize, order: usize) -> bool {
    order <= MAX_PARTITION_ORDER
        && block_size % (1 << order) == 0
        && (block_size >> order) > warmup_length
}

/// Finds the finest partition order available.
#[inline]
fn finest_partition_order(block_size: usize, warmup_length: usize, max_order: usize) -> usize {
    let mut order = std::cmp::min(max_order, MAX_PARTITION_ORDER);
    while order > 0 && !is_valid_partition_order(block_size, warmup_length, order) {
        order -= 1;
    }
    order
}

/// Parameter for PRC (partitioned Rice-coding).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrcParameter {
    /// Coding method, i.e. the width of the parameter field.
    pub method: ResidualCodingMethod,
    /// Partition order.
    pub order: usize,
    /// Parameters for each partition.
    pub params: Vec<PartitionParam>,
    /// Bits needed for the whole residual section.
    pub code_bits: usize,
}

/// Best parameters found for a single method.
struct Candidate {
    order: usize,
    params: Vec<PartitionParam>,
    bits: u64,
}

impl Candidate {
    const fn worst() -> Self {
        Self {
            order: 0,
            params: Vec::new(),
            bits: u64::MAX,
        }
    }
}

/// Helper object that holds pre-allocated buffer for PRC optimization.
#[derive(Default)]
struct PrcParameterFinder {
    stats: Vec<PartitionStats>,
    params: Vec<PartitionParam>,
}

impl PrcParameterFinder {
    fn find(&mut self, signal: &[i32], warmup_length: usize, config: &config::Prc) -> PrcParameter {
        let block_size = signal.len();
        debug_assert!(block_size > warmup_length);
        let max_p = std::cmp::min(config.max_parameter, MAX_RICE_PARAMETER);
        let mut order = finest_partition_order(block_size, warmup_length, config.max_partition_order);
        let mut nparts = 1usize << order;
        let part_size = block_size >> order;

        self.stats.clear();
        for i in 0..nparts {
            let start = std::cmp::max(i * part_size, warmup_length);
            let end = (i + 1) * part_size;
            self.stats
                .push(PartitionStats::from_signal(&signal[start..end], max_p));
        }

        let methods: &[ResidualCodingMethod] = if max_p > ResidualCodingMethod::Rice.max_parameter() {
            &[ResidualCodingMethod::Rice, ResidualCodingMethod::Rice2]
        } else {
            &[ResidualCodingMethod::Rice]
        };
        let mut best: [Candidate; 2] = [Candidate::worst(), Candidate::worst()];

        loop {
            for (cand, method) in best.iter_mut().zip(methods) {
                let method_max_p = std::cmp::min(max_p, method.max_parameter());
                self.params.clear();
                let mut bits = RESIDUAL_HEADER_BITS as u64;
                for st in &self.stats[..nparts] {
                    let (param, b) = st.choose(*method, method_max_p, config.use_escape_code);
                    self.params.push(param);
                    bits += b;
                }
                if bits < cand.bits {
                    cand.order = order;
                    cand.params.clone_from(&self.params);
                    cand.bits = bits;
                }
            }
            if nparts == 1 {
                break;
            }
            nparts /= 2;
            order -= 1;
            for i in 0..nparts {
                self.stats[i] = self.stats[2 * i].merge(&self.stats[2 * i + 1], max_p);
            }
        }

        let [rice, rice2] = best;
        let (method, cand) = if rice2.bits < rice.bits {
            (ResidualCodingMethod::Rice2, rice2)
        } else {
            (ResidualCodingMethod::Rice, rice)
        };
        PrcParameter {
            method,
            order: cand.order,
            params: cand.params,
            code_bits: cand.bits as usize,
        }
    }
}

reusable!(RICE_PARAMETER_FINDER: PrcParameterFinder);

/// Finds the optimal partitioning and Rice parameters for `signal`.
///
/// `signal[..warmup_length]` is not coded, and the first partition is
/// shorter by `warmup_length`. Each partition is either Rice-coded or, when
/// strictly cheaper and `config.use_escape_code` is set, escaped to raw
/// two's complement samples.
///
/// # Examples
///
/// ```
/// # use flacenc_core::config;
/// # use flacenc_core::rice::find_partitioned_rice_parameter;
/// let signal = [0i32; 64];
/// let prc = find_partitioned_rice_parameter(&signal, 2, &config::Prc::default());
/// assert_eq!(prc.order, 0);
/// ```
pub fn find_partitioned_rice_parameter(
    signal: &[i32],
    warmup_length: usize,
    config: &config::Prc,
) -> PrcParameter {
    reuse!(RICE_PARAMETER_FINDER, |finder: &mut PrcParameterFinder| {
        finder.find(signal, warmup_length, config)
    })
}
