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

//! Algorithms for quantized linear-prediction coding (QLPC).

use num_traits::AsPrimitive;
use seq_macro::seq;

use crate::component::QuantizedParameters;
use crate::constant::qlpc::MAX_ORDER;
use crate::constant::qlpc::MAX_PRECISION;
use crate::constant::qlpc::MAX_SHIFT;
use crate::constant::qlpc::MIN_PRECISION;
use crate::constant::qlpc::MIN_SHIFT;
use crate::error::QuantizeError;
use crate::fixed::Accumulator;

/// Computes auto-correlation coefficients for lags `0..=max_lag`.
///
/// Samples outside of `signal` are treated as zeros.
///
/// # Panics
///
/// Panics if `dest` is shorter than `max_lag + 1`.
pub fn auto_correlation(signal: &[f32], max_lag: usize, dest: &mut [f64]) {
    assert!(dest.len() > max_lag);
    for (lag, d) in dest.iter_mut().take(max_lag + 1).enumerate() {
        let mut acc = 0.0f64;
        if lag < signal.len() {
            for (x, y) in signal.iter().zip(signal[lag..].iter()) {
                acc += f64::from(*x) * f64::from(*y);
            }
        }
        *d = acc;
    }
}

/// LPC coefficients for every order up to the maximum achieved.
#[derive(Clone, Debug)]
pub struct LpcCandidates {
    coefs: [[f64; MAX_ORDER]; MAX_ORDER],
    errors: [f64; MAX_ORDER],
    max_order: usize,
}

impl LpcCandidates {
    /// Returns the maximum order computed.
    ///
    /// This can be smaller than the requested order when the recursion
    /// stopped early because the prediction error reached zero.
    pub const fn max_order(&self) -> usize {
        self.max_order
    }

    /// Returns the prediction coefficients of `order`.
    ///
    /// The coefficient at `j` is multiplied to the sample `j + 1` steps
    /// before the predicted one.
    pub fn coefs(&self, order: usize) -> &[f64] {
        &self.coefs[order - 1][..order]
    }

    /// Returns the residual energy of `order`.
    pub fn error(&self, order: usize) -> f64 {
        self.errors[order - 1]
    }

    /// Returns residual energies for orders `1..=max_order`.
    pub fn errors(&self) -> &[f64] {
        &self.errors[..self.max_order]
    }
}

/// Runs Levinson-Durbin recursion and returns LPC candidates.
///
/// If `autoc[0]` is zero (silent input), no candidate is returned.
///
/// # Panics
///
/// Panics if `max_order` exceeds `MAX_ORDER` or `autoc` has less than
/// `max_order + 1` elements.
pub fn levinson_durbin(autoc: &[f64], max_order: usize) -> LpcCandidates {
    assert!(max_order <= MAX_ORDER);
    assert!(autoc.len() > max_order);
    let mut ret = LpcCandidates {
        coefs: [[0.0; MAX_ORDER]; MAX_ORDER],
        errors: [0.0; MAX_ORDER],
        max_order: 0,
    };
    if autoc[0] == 0.0 {
        return ret;
    }

    let mut lpc = [0.0f64; MAX_ORDER];
    let mut err = autoc[0];
    for i in 0..max_order {
        // reflection coefficient
        let mut r = -autoc[i + 1];
        for j in 0..i {
            r -= lpc[j] * autoc[i - j];
        }
        r /= err;

        lpc[i] = r;
        let half = i >> 1;
        for j in 0..half {
            let tmp = lpc[j];
            lpc[j] += r * lpc[i - 1 - j];
            lpc[i - 1 - j] += r * tmp;
        }
        if i & 1 != 0 {
            lpc[half] += lpc[half] * r;
        }
        err *= 1.0 - r * r;

        for j in 0..=i {
            ret.coefs[i][j] = -lpc[j];
        }
        ret.errors[i] = err;
        ret.max_order = i + 1;

        if err == 0.0 {
            break;
        }
    }
    ret
}

/// Computes expected bits per residual sample from LPC error.
///
/// Negative errors (due to floating-point inaccuracies) map to a huge
/// sentinel so the order is never selected.
pub fn expected_bits_per_sample(lpc_error: f64, total_samples: usize) -> f64 {
    expected_bits_per_sample_with_scale(lpc_error, 0.5 / total_samples as f64)
}

#[inline]
fn expected_bits_per_sample_with_scale(lpc_error: f64, error_scale: f64) -> f64 {
    if lpc_error > 0.0 {
        (0.5 * (error_scale * lpc_error).log2()).max(0.0)
    } else if lpc_error < 0.0 {
        1e32
    } else {
        0.0
    }
}

/// Selects the order that minimizes the estimated total bits.
///
/// `errors[k]` is the residual energy of order `k + 1`. The returned order
/// is 1-based. Ties go to the lower order.
///
/// # Panics
///
/// Panics if `errors` is empty.
pub fn best_order(errors: &[f64], total_samples: usize, overhead_bits_per_order: usize) -> usize {
    assert!(!errors.is_empty());
    let error_scale = 0.5 / total_samples as f64;
    let mut best = 1;
    let mut best_bits = f64::MAX;
    for (idx, err) in errors.iter().enumerate() {
        let order = idx + 1;
        let bits = expected_bits_per_sample_with_scale(*err, error_scale)
            * total_samples.saturating_sub(order) as f64
            + (order * overhead_bits_per_order) as f64;
        if bits < best_bits {
            best = order;
            best_bits = bits;
        }
    }
    best
}

/// Returns the binary exponent `e` such that `x = m * 2^e`, `0.5 <= m < 1`.
fn frexp_exponent(x: f64) -> i32 {
    let biased = ((x.to_bits() >> 52) & 0x7FF) as i32;
    if biased == 0 {
        // subnormal; the precise value doesn't matter as shift is clamped.
        -1022
    } else {
        biased - 1022
    }
}

/// Quantizes LPC coefficients to `precision`-bit signed integers.
///
/// The shift is chosen so the largest coefficient uses the full precision,
/// and clamped to the encodable range. Rounding errors are fed back to the
/// next coefficient. When the required shift is negative, coefficients are
/// divided instead and the returned shift is zero.
///
/// # Errors
///
/// Returns [`QuantizeError`] when all coefficients are zero, or when the
/// required shift is below the representable minimum.
///
/// # Panics
///
/// Panics if `precision` is not in `2..=MAX_PRECISION` or `coefs` is empty.
///
/// # Examples
///
/// ```
/// # use flacenc_core::lpc::quantize;
/// let q = quantize(&[0.5, 0.25], 4).unwrap();
/// assert_eq!(q.coefs(), &[4, 2]);
/// assert_eq!(q.shift(), 3);
/// ```
pub fn quantize(coefs: &[f64], precision: usize) -> Result<QuantizedParameters, QuantizeError> {
    assert!((2..=MAX_PRECISION).contains(&precision));
    assert!(!coefs.is_empty() && coefs.len() <= MAX_ORDER);
    let bits = precision as i32 - 1;
    let qmax = (1i32 << bits) - 1;
    let qmin = -(1i32 << bits);

    let cmax = coefs.iter().fold(0.0f64, |acc, c| acc.max(c.abs()));
    if !(cmax > 0.0 && cmax.is_finite()) {
        return Err(QuantizeError::ZeroCoefficients);
    }
    let log2cmax = frexp_exponent(cmax) - 1;
    let mut shift = bits - log2cmax - 1;
    if shift > i32::from(MAX_SHIFT) {
        shift = i32::from(MAX_SHIFT);
    } else if shift < i32::from(MIN_SHIFT) {
        return Err(QuantizeError::ShiftUnderflow { required: shift });
    }

    let scale = if shift >= 0 {
        f64::from(1u32 << shift)
    } else {
        1.0 / f64::from(1u32 << -shift)
    };
    let mut q = heapless::Vec::<i16, MAX_ORDER>::new();
    let mut error = 0.0f64;
    for c in coefs {
        error += c * scale;
        let v = (error.round() as i32).clamp(qmin, qmax);
        error -= f64::from(v);
        let pushed = q.push(v as i16);
        debug_assert!(pushed.is_ok(), "more than MAX_ORDER coefficients");
    }
    Ok(QuantizedParameters::from_parts(
        q,
        shift.max(0) as i8,
        precision,
    ))
}

/// Heuristic coefficient precision for the given stream parameters.
///
/// # Examples
///
/// ```
/// # use flacenc_core::lpc::auto_precision;
/// assert_eq!(auto_precision(16, 4096), 13);
/// assert_eq!(auto_precision(16, 1152), 10);
/// assert_eq!(auto_precision(24, 4096), 15);
/// ```
pub fn auto_precision(bits_per_sample: usize, block_size: usize) -> usize {
    let ret = if bits_per_sample < 16 {
        std::cmp::max(MIN_PRECISION, 2 + bits_per_sample / 2)
    } else if bits_per_sample == 16 {
        match block_size {
            0..=192 => 7,
            193..=384 => 8,
            385..=576 => 9,
            577..=1152 => 10,
            1153..=2304 => 11,
            2305..=4608 => 12,
            _ => 13,
        }
    } else if block_size <= 384 {
        MAX_PRECISION - 2
    } else if block_size <= 1152 {
        MAX_PRECISION - 1
    } else {
        MAX_PRECISION
    };
    ret.min(MAX_PRECISION)
}

/// Limits `precision` so that decoders of narrow streams stay in 32 bits.
pub fn limit_precision(precision: usize, subframe_bps: usize, order: usize) -> usize {
    if subframe_bps <= 17 {
        let limit = 32usize.saturating_sub(subframe_bps + order.ilog2() as usize);
        precision.min(limit).max(MIN_PRECISION)
    } else {
        precision
    }
}

/// Number of bits required for `v` in two's complement representation.
fn signed_bits(v: i128) -> u32 {
    match v {
        0 => 0,
        -1 => 2,
        v if v > 0 => v.ilog2() + 2,
        v => (!v).ilog2() + 2,
    }
}

/// Returns the maximum absolute prediction value before the shift.
fn max_prediction_before_shift(subframe_bps: usize, coefs: &[i16]) -> i128 {
    let abs_sum: i128 = coefs.iter().map(|c| i128::from(c.unsigned_abs())).sum();
    (1i128 << (subframe_bps - 1)) * abs_sum
}

/// Bits required for the intermediate sum of predictions.
pub fn max_prediction_before_shift_bps(subframe_bps: usize, coefs: &[i16]) -> u32 {
    signed_bits(max_prediction_before_shift(subframe_bps, coefs))
}

/// Upper bound of bits required for the residual.
pub fn max_residual_bps(subframe_bps: usize, coefs: &[i16], shift: i8) -> u32 {
    let max_abs_sample = 1i128 << (subframe_bps - 1);
    let pred = max_prediction_before_shift(subframe_bps, coefs);
    // ceil-division
    let pred_after_shift = -((-pred) >> shift.max(0));
    signed_bits(max_abs_sample + pred_after_shift)
}

seq!(N in 1..=12 {
    #[inline]
    #[allow(clippy::identity_op)]
    fn residual_order~N<A: Accumulator>(coefs: &[i16], shift: usize, signal: &[i32], dest: &mut [i32]) {
        let c: [A; N] = std::array::from_fn(|j| <A as From<i16>>::from(coefs[j]));
        for t in N..signal.len() {
            let mut pred = A::zero();
            seq!(J in 0..N {
                pred = pred + c[J] * <A as From<i32>>::from(signal[t - 1 - J]);
            });
            dest[t] = (<A as From<i32>>::from(signal[t]) - (pred >> shift)).as_();
        }
    }
});

#[inline]
fn residual_generic<A: Accumulator>(coefs: &[i16], shift: usize, signal: &[i32], dest: &mut [i32]) {
    let order = coefs.len();
    for t in order..signal.len() {
        let mut pred = A::zero();
        for (j, c) in coefs.iter().enumerate() {
            pred = pred + <A as From<i16>>::from(*c) * <A as From<i32>>::from(signal[t - 1 - j]);
        }
        dest[t] = (<A as From<i32>>::from(signal[t]) - (pred >> shift)).as_();
    }
}

/// Computes QLPC residual using accumulator type `A`.
///
/// The caller must ensure the prediction fits in `A` and the residual fits
/// in `i32`.
pub fn residual_with<A: Accumulator>(coefs: &[i16], shift: i8, signal: &[i32], dest: &mut [i32]) {
    let shift = shift.max(0) as usize;
    seq!(N in 1..=12 {
        if coefs.len() == N {
            return residual_order~N::<A>(coefs, shift, signal, dest);
        }
    });
    residual_generic::<A>(coefs, shift, signal, dest);
}

/// Computes QLPC residual in 64 bits and checks that it fits in `i32`.
pub fn residual_checked(coefs: &[i16], shift: i8, signal: &[i32], dest: &mut [i32]) -> bool {
    let shift = shift.max(0);
    let order = coefs.len();
    for t in order..signal.len() {
        let mut pred = 0i64;
        for (j, c) in coefs.iter().enumerate() {
            pred += i64::from(*c) * i64::from(signal[t - 1 - j]);
        }
        let e = i64::from(signal[t]) - (pred >> shift);
        if e < i64::from(i32::MIN) || e > i64::from(i32::MAX) {
            return false;
        }
        dest[t] = e as i32;
    }
    true
}

/// Computes QLPC residual choosing the narrowest safe accumulator.
///
/// `dest[..order]` is filled with zeros. Returns false if the residual
/// doesn't fit in `i32`.
///
/// # Panics
///
/// Panics if `dest` is shorter than `signal`.
pub fn compute_residual(
    params: &QuantizedParameters,
    subframe_bps: usize,
    signal: &[i32],
    dest: &mut [i32],
) -> bool {
    assert!(dest.len() >= signal.len());
    let coefs = params.coefs();
    for p in dest.iter_mut().take(coefs.len().min(signal.len())) {
        *p = 0;
    }
    if max_residual_bps(subframe_bps, coefs, params.shift()) > 32 {
        residual_checked(coefs, params.shift(), signal, dest)
    } else if max_prediction_before_shift_bps(subframe_bps, coefs) <= 32 {
        residual_with::<i32>(coefs, params.shift(), signal, dest);
        true
    } else {
        residual_with::<i64>(coefs, params.shift(), signal, dest);
        true
    }
}

/// Restores signal from warm-up samples and QLPC residual.
///
/// `signal[..order]` must contain the warm-up samples.
pub fn restore_signal(params: &QuantizedParameters, residual: &[i32], signal: &mut [i32]) {
    let coefs = params.coefs();
    let shift = params.shift().max(0);
    for t in coefs.len()..signal.len() {
        let mut pred = 0i64;
        for (j, c) in coefs.iter().enumerate() {
            pred += i64::from(*c) * i64::from(signal[t - 1 - j]);
        }
        signal[t] = ((pred >> shift) + i64::from(residual[t])) as i32;
    }
}
