//! Stereo Width Effect
//!
//! Mid/side scaling of the first channel pair. Mono input passes through.

use serde::{Deserialize, Serialize};

use super::domain;
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Stereo width parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoWidthParams {
    /// 0 = mono, 1 = unchanged, > 1 = wider
    #[serde(alias = "width", alias = "width_factor")]
    pub factor: f32,
}

impl Default for StereoWidthParams {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl StereoWidthParams {
    pub fn validate(&self) -> Result<()> {
        domain::at_least("stereo_width", "factor", self.factor, 0.0)
    }

    pub fn describe(&self) -> String {
        if self.factor == 0.0 {
            "Converted to mono".to_string()
        } else if self.factor > 1.0 {
            format!("Widened stereo width by {:.0}%", (self.factor - 1.0) * 100.0)
        } else if self.factor < 1.0 {
            format!("Narrowed stereo width by {:.0}%", (1.0 - self.factor) * 100.0)
        } else {
            "Kept stereo width unchanged".to_string()
        }
    }
}

/// Apply the width change
pub fn apply_stereo_width(buffer: &AudioBuffer, params: &StereoWidthParams) -> Result<AudioBuffer> {
    params.validate()?;
    if buffer.num_channels() < 2 {
        return Ok(buffer.clone());
    }

    let mut channels = buffer.channels().to_vec();
    let (left, right) = channels.split_at_mut(1);
    for (l, r) in left[0].iter_mut().zip(right[0].iter_mut()) {
        let mid = (*l + *r) * 0.5;
        let side = (*l - *r) * 0.5 * params.factor;
        *l = mid + side;
        *r = mid - side;
    }
    buffer.with_channels(channels)
}
