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

//! Encoder configuration structs.
//!
//! All structs are `Deserialize` (with the `serde` feature), and missing
//! fields are filled with the defaults. Use [`Verify::into_verified`] before
//! passing a config to the encoder.
//!
//! [`Verify::into_verified`]: crate::error::Verify::into_verified

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::constant::qlpc::DEFAULT_ORDER as QLPC_DEFAULT_ORDER;
use crate::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use crate::constant::qlpc::MAX_PRECISION as MAX_LPC_PRECISION;
use crate::constant::qlpc::MIN_PRECISION as MIN_LPC_PRECISION;
use crate::constant::rice::DEFAULT_MAX_PARTITION_ORDER;
use crate::constant::rice::MAX_PARTITION_ORDER;
use crate::constant::rice::MAX_RICE_PARAMETER;
use crate::constant::MAX_BLOCK_SIZE;
use crate::constant::MIN_BLOCK_SIZE;
use crate::error::verify_range;
use crate::error::verify_true;
use crate::error::Verify;
use crate::error::VerifyError;
use crate::window::Window;

/// Configuration for encoder.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct Encoder {
    /// Block size used by the fixed block-size encoder.
    pub block_size: usize,
    /// Configuration for stereo-coding module.
    pub stereo_coding: StereoCoding,
    /// Configuration for individual channels.
    pub subframe_coding: SubFrameCoding,
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            block_size: 4096,
            stereo_coding: StereoCoding::default(),
            subframe_coding: SubFrameCoding::default(),
        }
    }
}

impl Verify for Encoder {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("block_size", self.block_size, MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE)?;
        self.stereo_coding
            .verify()
            .map_err(|e| e.within("stereo_coding"))?;
        self.subframe_coding
            .verify()
            .map_err(|e| e.within("subframe_coding"))?;
        Ok(())
    }
}

/// Configuration for stereo coding algorithms.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct StereoCoding {
    /// If set to false, left-side coding will not be used.
    pub use_leftside: bool,
    /// If set to false, right-side coding will not be used.
    pub use_rightside: bool,
    /// If set to false, mid-side coding will not be used.
    pub use_midside: bool,
}

impl Default for StereoCoding {
    fn default() -> Self {
        Self {
            use_leftside: true,
            use_rightside: true,
            use_midside: true,
        }
    }
}

impl Verify for StereoCoding {
    fn verify(&self) -> Result<(), VerifyError> {
        Ok(())
    }
}

/// Configuration for sub-frame (individual channel) coding.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct SubFrameCoding {
    // Disabling verbatim coding is intentionally prohibited.
    /// If set to false, constant mode will not be used.
    pub use_constant: bool,
    /// If set to false, fixed-LPC mode will not be used.
    pub use_fixed: bool,
    /// If set to false, LPC mode will not be used.
    pub use_lpc: bool,
    /// If set to false, wasted bits are never shifted out.
    pub use_wasted_bits: bool,
    /// Configuration for quantized LPC encoder.
    pub qlpc: Qlpc,
    /// Configuration for partitioned Rice coding.
    pub prc: Prc,
}

impl Default for SubFrameCoding {
    fn default() -> Self {
        Self {
            use_constant: true,
            use_fixed: true,
            use_lpc: true,
            use_wasted_bits: true,
            qlpc: Qlpc::default(),
            prc: Prc::default(),
        }
    }
}

impl Verify for SubFrameCoding {
    fn verify(&self) -> Result<(), VerifyError> {
        self.qlpc.verify().map_err(|e| e.within("qlpc"))?;
        self.prc.verify().map_err(|e| e.within("prc"))?;
        Ok(())
    }
}

/// Configuration for partitioned-rice coding (PRC).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct Prc {
    /// Max value for the parameter of rice coding.
    ///
    /// Values larger than 14 enable the method with 5-bit parameters.
    pub max_parameter: usize,
    /// Max order of partitioning.
    pub max_partition_order: usize,
    /// If set, partitions can be stored as raw two's complement samples.
    pub use_escape_code: bool,
}

impl Default for Prc {
    fn default() -> Self {
        Self {
            max_parameter: MAX_RICE_PARAMETER,
            max_partition_order: DEFAULT_MAX_PARTITION_ORDER,
            use_escape_code: true,
        }
    }
}

impl Verify for Prc {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("max_parameter", self.max_parameter, ..=MAX_RICE_PARAMETER)?;
        verify_range!(
            "max_partition_order",
            self.max_partition_order,
            ..=MAX_PARTITION_ORDER
        )?;
        Ok(())
    }
}

/// Strategy for choosing the LPC order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[non_exhaustive]
pub enum OrderSearch {
    /// Picks the order from the prediction errors of Levinson-Durbin
    /// recursion.
    #[default]
    Estimate,
    /// Encodes with every order up to the maximum and keeps the smallest.
    Exhaustive,
}

/// Configuration for quantized linear-predictive coding (QLPC).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct Qlpc {
    /// Maximum LPC order.
    pub lpc_order: usize,
    /// Precision for quantized LPC coefficients. Zero selects it from the
    /// sample width and the block size.
    pub quant_precision: usize,
    /// How the order is chosen.
    pub order_search: OrderSearch,
    /// Window functions tried for LPC estimation.
    pub windows: Vec<Window>,
}

impl Default for Qlpc {
    fn default() -> Self {
        Self {
            lpc_order: QLPC_DEFAULT_ORDER,
            quant_precision: 0,
            order_search: OrderSearch::default(),
            windows: vec![Window::default()],
        }
    }
}

impl Verify for Qlpc {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("lpc_order", self.lpc_order, 1..=MAX_LPC_ORDER)?;
        if self.quant_precision != 0 {
            verify_range!(
                "quant_precision",
                self.quant_precision,
                MIN_LPC_PRECISION..=MAX_LPC_PRECISION
            )?;
        }
        verify_true!(
            "windows",
            !self.windows.is_empty(),
            "must contain at least one window"
        )?;
        for (i, w) in self.windows.iter().enumerate() {
            w.verify().map_err(|e| e.within(&format!("windows[{i}]")))?;
        }
        Ok(())
    }
}
