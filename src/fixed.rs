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

//! Fixed polynomial predictors (order 0 to 4).

use std::f64::consts::LN_2;

use num_traits::AsPrimitive;
use num_traits::PrimInt;
use num_traits::Signed;
use num_traits::Zero;

use crate::constant::fixed::ESTIMATOR_WARMUP;
use crate::constant::fixed::MAX_LPC_ORDER;

/// Prediction coefficients of the fixed predictors, most recent sample first.
const FIXED_COEFS: [&[i64]; MAX_LPC_ORDER + 1] =
    [&[], &[1], &[2, -1], &[3, -3, 1], &[4, -6, 4, -1]];

/// Integer types that can be used for computing predictions and errors.
///
/// Implemented for [`i32`] (narrow path) and [`i64`] (wide path). The
/// unsigned counterpart is used for accumulating absolute errors. This is
/// also used for QLPC residual computation in [`crate::lpc`].
pub trait Accumulator: seal_accumulator::Sealed {}

impl<T: seal_accumulator::Sealed> Accumulator for T {}

mod seal_accumulator {
    use super::*;

    pub trait Sealed: PrimInt + Signed + From<i32> + From<i16> + AsPrimitive<i32> {
        type Sum: PrimInt + AsPrimitive<f64> + AsPrimitive<u64>;

        fn unsigned_abs_sum(self) -> Self::Sum;
    }

    impl Sealed for i32 {
        type Sum = u32;

        #[inline]
        fn unsigned_abs_sum(self) -> u32 {
            self.unsigned_abs()
        }
    }

    impl Sealed for i64 {
        type Sum = u64;

        #[inline]
        fn unsigned_abs_sum(self) -> u64 {
            self.unsigned_abs()
        }
    }
}

/// Result of the fixed-order estimation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedEstimate {
    /// Selected order.
    pub order: usize,
    /// Estimated bits-per-sample of the residual for each order.
    pub bits_per_sample: [f32; MAX_LPC_ORDER + 1],
    /// Sum of absolute residuals for each order.
    pub total_errors: [u64; MAX_LPC_ORDER + 1],
}

/// Converts a sum of absolute errors to the estimated bits per sample.
#[inline]
fn error_to_bits(total_error: f64, n: usize) -> f32 {
    if total_error > 0.0 {
        ((LN_2 * total_error / n as f64).ln() / LN_2) as f32
    } else {
        0.0
    }
}

/// Finds the best fixed order for `signal` using accumulator type `A`.
///
/// `signal[..4]` is the warm-up history and the rest is the block to be
/// evaluated. The differences of each order are updated incrementally from
/// the per-order state seeded by the warm-up samples. Ties are broken in
/// favor of the lower order.
///
/// With `A = i32`, the caller must guarantee that
/// `bits_per_sample + ilog2(17 * n) < 32` holds (see [`choose_fixed_order`].)
///
/// # Panics
///
/// Panics if `signal` is shorter than the warm-up.
pub fn best_fixed_order<A: Accumulator>(signal: &[i32]) -> FixedEstimate {
    best_fixed_order_impl::<A>(signal, false)
}

/// Same as `best_fixed_order::<i64>` but rejects orders with a residual
/// that doesn't fit in `i32` (required for 32-bit sources.)
pub fn best_fixed_order_checked(signal: &[i32]) -> FixedEstimate {
    best_fixed_order_impl::<i64>(signal, true)
}

fn best_fixed_order_impl<A: Accumulator>(signal: &[i32], check_range: bool) -> FixedEstimate {
    assert!(signal.len() >= ESTIMATOR_WARMUP);
    let s = |i: usize| -> A { <A as From<i32>>::from(signal[i]) };
    let mut last = [
        s(3),
        s(3) - s(2),
        s(3) - s(2) - (s(2) - s(1)),
        s(3) - s(2) - (s(2) - s(1)) - (s(2) - s(1) - s(1) + s(0)),
    ];
    let mut totals = [<A as seal_accumulator::Sealed>::Sum::zero(); MAX_LPC_ORDER + 1];
    let mut overflow = [false; MAX_LPC_ORDER + 1];
    let lo = <A as From<i32>>::from(i32::MIN);
    let hi = <A as From<i32>>::from(i32::MAX);

    for &x in &signal[ESTIMATOR_WARMUP..] {
        let e0 = <A as From<i32>>::from(x);
        let e1 = e0 - last[0];
        let e2 = e1 - last[1];
        let e3 = e2 - last[2];
        let e4 = e3 - last[3];
        let errs = [e0, e1, e2, e3, e4];
        for (order, e) in errs.iter().enumerate() {
            totals[order] = totals[order] + e.unsigned_abs_sum();
            if check_range && (*e < lo || *e > hi) {
                overflow[order] = true;
            }
        }
        last = [e0, e1, e2, e3];
    }

    let n = signal.len() - ESTIMATOR_WARMUP;
    let mut order = 0;
    let mut total_errors = [0u64; MAX_LPC_ORDER + 1];
    let mut bits_per_sample = [0.0f32; MAX_LPC_ORDER + 1];
    for k in 0..=MAX_LPC_ORDER {
        total_errors[k] = totals[k].as_();
        bits_per_sample[k] = error_to_bits(totals[k].as_(), n);
        if !overflow[k] && total_errors[k] < total_errors[order] {
            order = k;
        }
    }
    FixedEstimate {
        order,
        bits_per_sample,
        total_errors,
    }
}

/// Chooses the best fixed order selecting the accumulator from `bits_per_sample`.
///
/// # Examples
///
/// ```
/// # use flacenc_core::fixed::choose_fixed_order;
/// let ramp: Vec<i32> = (0..64).map(|t| 3 * t - 20).collect();
/// assert_eq!(choose_fixed_order(&ramp, 16).order, 2);
/// ```
pub fn choose_fixed_order(signal: &[i32], bits_per_sample: usize) -> FixedEstimate {
    let n = signal.len().saturating_sub(ESTIMATOR_WARMUP).max(1);
    let sum_bits = bits_per_sample + (17 * n).ilog2() as usize;
    if bits_per_sample < 28 && sum_bits < 32 {
        best_fixed_order::<i32>(signal)
    } else if bits_per_sample < 28 {
        best_fixed_order::<i64>(signal)
    } else {
        best_fixed_order_checked(signal)
    }
}

/// Computes residual of the fixed predictor of `order`.
///
/// `dest[..order]` is filled with zeros (warm-up positions), and `dest[t]`
/// for `t >= order` stores `signal[t]` minus its prediction.
///
/// Returns false if some residual doesn't fit in `i32`. The contents of
/// `dest` are unspecified in that case.
///
/// # Panics
///
/// Panics if `order > 4` or `dest` is shorter than `signal`.
pub fn fixed_residual(order: usize, signal: &[i32], dest: &mut [i32]) -> bool {
    assert!(order <= MAX_LPC_ORDER);
    assert!(dest.len() >= signal.len());
    let coefs = FIXED_COEFS[order];
    let mut fits = true;
    for p in dest.iter_mut().take(order.min(signal.len())) {
        *p = 0;
    }
    for t in order..signal.len() {
        let mut pred = 0i64;
        for (j, c) in coefs.iter().enumerate() {
            pred += c * i64::from(signal[t - 1 - j]);
        }
        let e = i64::from(signal[t]) - pred;
        dest[t] = e as i32;
        fits &= i64::from(dest[t]) == e;
    }
    fits
}

/// Restores signal from warm-up samples and residual of a fixed predictor.
///
/// `signal[..order]` must contain the warm-up samples. `signal[t]` for
/// `t >= order` is overwritten using `residual[t]`.
pub fn restore_signal(order: usize, residual: &[i32], signal: &mut [i32]) {
    let coefs = FIXED_COEFS[order];
    for t in order..signal.len() {
        let mut pred = 0i64;
        for (j, c) in coefs.iter().enumerate() {
            pred += c * i64::from(signal[t - 1 - j]);
        }
        signal[t] = (pred + i64::from(residual[t])) as i32;
    }
}
