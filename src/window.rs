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

//! Apodization windows for LPC analysis.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::rc::Rc;

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::constant::qlpc::DEFAULT_TUKEY_ALPHA;
use crate::error::verify_range;
use crate::error::verify_true;
use crate::error::Verify;
use crate::error::VerifyError;

/// Analysis window descriptor.
///
/// This enum is `Serializable` and `Deserializable` because this will be
/// directly used in config structs.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
#[non_exhaustive]
pub enum Window {
    /// Triangular window touching zero at both ends.
    Bartlett,
    /// Bartlett-Hann window.
    BartlettHann,
    /// Three-term Blackman window.
    Blackman,
    /// Four-term Blackman-Harris window with 92dB side-lobe.
    BlackmanHarris4Term92Db,
    /// Connes window.
    Connes,
    /// Flat-top window.
    Flattop,
    /// Gaussian window with the standard deviation relative to the half length.
    Gauss { stddev: f32 },
    /// Hamming window.
    Hamming,
    /// Hann window.
    Hann,
    /// Four-term approximation of the Kaiser-Bessel window.
    KaiserBessel,
    /// Nuttall window.
    Nuttall,
    /// Rectangular window (no weighting.)
    Rectangle,
    /// Triangular window that does not reach zero at the ends.
    Triangle,
    /// Tukey window with the tapered fraction `p`.
    Tukey { p: f32 },
    /// Tukey window applied only on `[start, end)` (fractions of the length.)
    PartialTukey { p: f32, start: f32, end: f32 },
    /// Tukey windows applied outside `[start, end)`, zero inside.
    PunchoutTukey { p: f32, start: f32, end: f32 },
    /// Welch window.
    Welch,
}

impl Default for Window {
    fn default() -> Self {
        Self::Tukey {
            p: DEFAULT_TUKEY_ALPHA,
        }
    }
}

impl Eq for Window {}

impl Window {
    /// Key used for caching. Parameters are compared by their bit patterns.
    fn cache_key(&self) -> (u8, [u32; 3]) {
        match *self {
            Self::Bartlett => (0, [0; 3]),
            Self::BartlettHann => (1, [0; 3]),
            Self::Blackman => (2, [0; 3]),
            Self::BlackmanHarris4Term92Db => (3, [0; 3]),
            Self::Connes => (4, [0; 3]),
            Self::Flattop => (5, [0; 3]),
            Self::Gauss { stddev } => (6, [stddev.to_bits(), 0, 0]),
            Self::Hamming => (7, [0; 3]),
            Self::Hann => (8, [0; 3]),
            Self::KaiserBessel => (9, [0; 3]),
            Self::Nuttall => (10, [0; 3]),
            Self::Rectangle => (11, [0; 3]),
            Self::Triangle => (12, [0; 3]),
            Self::Tukey { p } => (13, [p.to_bits(), 0, 0]),
            Self::PartialTukey { p, start, end } => {
                (14, [p.to_bits(), start.to_bits(), end.to_bits()])
            }
            Self::PunchoutTukey { p, start, end } => {
                (15, [p.to_bits(), start.to_bits(), end.to_bits()])
            }
            Self::Welch => (16, [0; 3]),
        }
    }

    /// Returns true if `weights` is guaranteed to be symmetric.
    pub const fn is_symmetric(&self) -> bool {
        !matches!(self, Self::PartialTukey { .. } | Self::PunchoutTukey { .. })
    }

    /// Computes window weights for the block of length `len`.
    ///
    /// Symmetric windows are computed for the first half and mirrored, so
    /// `w[i] == w[len - 1 - i]` holds exactly.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacenc_core::window::Window;
    /// let w = Window::Hann.weights(5);
    /// assert_eq!(w, vec![0.0, 0.5, 1.0, 0.5, 0.0]);
    /// ```
    pub fn weights(&self, len: usize) -> Vec<f32> {
        if len <= 1 {
            return vec![1.0f32; len];
        }
        let mut ret: Vec<f32> = match *self {
            Self::Tukey { p } => tukey(len, f64::from(p)),
            Self::PartialTukey { p, start, end } => {
                partial_tukey(len, clamp_taper(p), f64::from(start), f64::from(end))
            }
            Self::PunchoutTukey { p, start, end } => {
                punchout_tukey(len, clamp_taper(p), f64::from(start), f64::from(end))
            }
            Self::Triangle => triangle(len),
            _ => {
                let n_max = (len - 1) as f64;
                (0..len)
                    .map(|n| self.cosine_sum_or_poly(n as f64, n_max) as f32)
                    .collect()
            }
        };
        if self.is_symmetric() {
            for n in len / 2..len {
                ret[n] = ret[len - 1 - n];
            }
        }
        ret
    }

    /// Evaluates the closed-form windows at `n` (of `0..=n_max`.)
    fn cosine_sum_or_poly(&self, n: f64, n_max: f64) -> f64 {
        let x = 2.0 * PI * n / n_max;
        let half = n_max / 2.0;
        match *self {
            Self::Bartlett => {
                if n <= half {
                    2.0 * n / n_max
                } else {
                    2.0 - 2.0 * n / n_max
                }
            }
            Self::BartlettHann => 0.48f64.mul_add(-(n / n_max - 0.5).abs(), 0.62) - 0.38 * x.cos(),
            Self::Blackman => cosine_sum(&[0.42, 0.5, 0.08], x),
            Self::BlackmanHarris4Term92Db => cosine_sum(&[0.35875, 0.48829, 0.14128, 0.01168], x),
            Self::Connes => {
                let k = (n - half) / half;
                let k = 1.0 - k * k;
                k * k
            }
            Self::Flattop => cosine_sum(
                &[0.215_578_95, 0.416_631_58, 0.277_263_158, 0.083_578_947, 0.006_947_368],
                x,
            ),
            Self::Gauss { stddev } => {
                let k = (n - half) / (f64::from(stddev) * half);
                (-0.5 * k * k).exp()
            }
            Self::Hamming => cosine_sum(&[0.54, 0.46], x),
            Self::Hann => cosine_sum(&[0.5, 0.5], x),
            Self::KaiserBessel => cosine_sum(&[0.402, 0.498, 0.098, 0.001], x),
            Self::Nuttall => cosine_sum(&[0.363_581_9, 0.489_177_5, 0.136_599_5, 0.010_641_1], x),
            Self::Welch => {
                let k = (n - half) / half;
                1.0 - k * k
            }
            Self::Rectangle
            | Self::Triangle
            | Self::Tukey { .. }
            | Self::PartialTukey { .. }
            | Self::PunchoutTukey { .. } => 1.0,
        }
    }
}

/// Evaluates `a0 - a1 cos(x) + a2 cos(2x) - a3 cos(3x) + ...`.
fn cosine_sum(coefs: &[f64], x: f64) -> f64 {
    let mut sign = 1.0;
    let mut acc = 0.0;
    for (k, a) in coefs.iter().enumerate() {
        acc += sign * a * (k as f64 * x).cos();
        sign = -sign;
    }
    acc
}

#[inline]
fn raised_cosine(i: f64, span: f64) -> f32 {
    0.5f64.mul_add(-(PI * i / span).cos(), 0.5) as f32
}

/// Out-of-range tapers of partial windows are clamped instead of degenerating.
fn clamp_taper(p: f32) -> f64 {
    if p <= 0.0 {
        0.05
    } else if p >= 1.0 {
        0.95
    } else {
        f64::from(p)
    }
}

fn triangle(len: usize) -> Vec<f32> {
    let denom = len as f64 + 1.0;
    (1..=len)
        .map(|n| {
            let m = if n <= (len + 1) / 2 { n } else { len - n + 1 };
            (2.0 * m as f64 / denom) as f32
        })
        .collect()
}

fn tukey(len: usize, p: f64) -> Vec<f32> {
    if p <= 0.0 {
        return vec![1.0f32; len];
    }
    if p >= 1.0 {
        return Window::Hann.weights(len);
    }
    let mut ret = vec![1.0f32; len];
    let np = (p / 2.0 * len as f64) as isize - 1;
    if np > 0 {
        let np = np as usize;
        for n in 0..=np {
            ret[n] = raised_cosine(n as f64, np as f64);
            ret[len - np - 1 + n] = raised_cosine((n + np) as f64, np as f64);
        }
    }
    ret
}

fn partial_tukey(len: usize, p: f64, start: f64, end: f64) -> Vec<f32> {
    let start_n = (start * len as f64) as usize;
    let end_n = ((end * len as f64) as usize).max(start_n);
    let np = (p / 2.0 * (end_n - start_n) as f64) as usize;
    let mut ret = vec![0.0f32; len];
    let mut n = start_n;
    let mut i = 1;
    while n < start_n + np && n < len {
        ret[n] = raised_cosine(i as f64, np as f64);
        n += 1;
        i += 1;
    }
    while n + np < end_n && n < len {
        ret[n] = 1.0;
        n += 1;
    }
    let mut i = np;
    while n < end_n && n < len {
        ret[n] = raised_cosine(i as f64, np as f64);
        n += 1;
        i = i.saturating_sub(1);
    }
    ret
}

fn punchout_tukey(len: usize, p: f64, start: f64, end: f64) -> Vec<f32> {
    let start_n = ((start * len as f64) as usize).min(len);
    let end_n = ((end * len as f64) as usize).clamp(start_n, len);
    let ns = (p / 2.0 * start_n as f64) as usize;
    let ne = (p / 2.0 * (len - end_n) as f64) as usize;
    let mut ret = vec![0.0f32; len];

    // left lobe on [0, start_n)
    for n in 0..start_n {
        ret[n] = if n < ns {
            raised_cosine((n + 1) as f64, ns as f64)
        } else if n + ns < start_n {
            1.0
        } else {
            raised_cosine((start_n - n) as f64, ns as f64)
        };
    }
    // right lobe on [end_n, len)
    for n in end_n..len {
        let k = n - end_n;
        ret[n] = if k < ne {
            raised_cosine((k + 1) as f64, ne as f64)
        } else if n + ne < len {
            1.0
        } else {
            raised_cosine((len - n) as f64, ne as f64)
        };
    }
    ret
}

impl Verify for Window {
    fn verify(&self) -> Result<(), VerifyError> {
        match *self {
            Self::Gauss { stddev } => {
                verify_true!("stddev", stddev.is_finite(), "must be finite")?;
                verify_range!("stddev", stddev, (0.0f32)..=(0.5f32))?;
                verify_true!("stddev", stddev > 0.0, "must be positive")
            }
            Self::Tukey { p } => verify_true!("p", p.is_finite(), "must be finite"),
            Self::PartialTukey { p, start, end } | Self::PunchoutTukey { p, start, end } => {
                verify_true!("p", p.is_finite(), "must be finite")?;
                verify_range!("start", start, (0.0f32)..=(1.0f32))?;
                verify_range!("end", end, (0.0f32)..=(1.0f32))?;
                verify_true!("end", start <= end, "must not be smaller than `start`")
            }
            _ => Ok(()),
        }
    }
}

type WindowMap = BTreeMap<(usize, (u8, [u32; 3])), Rc<[f32]>>;
thread_local! {
    static WINDOW_CACHE: RefCell<WindowMap> = RefCell::new(BTreeMap::new());
}

/// Returns (cached) window weights of length `size`.
pub fn get_window(window: &Window, size: usize) -> Rc<[f32]> {
    let key = (size, window.cache_key());
    WINDOW_CACHE.with(|caches| {
        let mut caches = caches.borrow_mut();
        Rc::clone(
            caches
                .entry(key)
                .or_insert_with(|| Rc::from(window.weights(size))),
        )
    })
}

/// Applies `window` to `signal` and stores the result into `dest`.
pub fn apply(window: &Window, signal: &[i32], dest: &mut Vec<f32>) {
    let weights = get_window(window, signal.len());
    dest.clear();
    dest.extend(
        signal
            .iter()
            .zip(weights.iter())
            .map(|(x, w)| *x as f32 * *w),
    );
}
