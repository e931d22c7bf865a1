//! Parameter domain checks
//!
//! Every check rejects non-finite values and reports the offending field.
//! Values are never clamped into range.

use crate::error::{AudioChatError, Result};

pub(crate) fn finite(effect: &str, param: &str, value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AudioChatError::parameter(effect, param, value, "a finite number"))
    }
}

/// `min <= value <= max`
pub(crate) fn range(effect: &str, param: &str, value: f32, min: f32, max: f32) -> Result<()> {
    finite(effect, param, value)?;
    if value < min || value > max {
        return Err(AudioChatError::parameter(
            effect,
            param,
            value,
            format!("{} to {}", min, max),
        ));
    }
    Ok(())
}

/// `0 <= value <= 1`
pub(crate) fn unit(effect: &str, param: &str, value: f32) -> Result<()> {
    range(effect, param, value, 0.0, 1.0)
}

/// `value > 0`
pub(crate) fn positive(effect: &str, param: &str, value: f32) -> Result<()> {
    finite(effect, param, value)?;
    if value <= 0.0 {
        return Err(AudioChatError::parameter(effect, param, value, "> 0"));
    }
    Ok(())
}

/// `value >= min`
pub(crate) fn at_least(effect: &str, param: &str, value: f32, min: f32) -> Result<()> {
    finite(effect, param, value)?;
    if value < min {
        return Err(AudioChatError::parameter(
            effect,
            param,
            value,
            format!(">= {}", min),
        ));
    }
    Ok(())
}

/// `value <= max`
pub(crate) fn at_most(effect: &str, param: &str, value: f32, max: f32) -> Result<()> {
    finite(effect, param, value)?;
    if value > max {
        return Err(AudioChatError::parameter(
            effect,
            param,
            value,
            format!("<= {}", max),
        ));
    }
    Ok(())
}

/// Frequency strictly between 0 and Nyquist
pub(crate) fn below_nyquist(effect: &str, param: &str, hz: f32, sample_rate: u32) -> Result<()> {
    positive(effect, param, hz)?;
    let nyquist = sample_rate as f32 / 2.0;
    if hz >= nyquist {
        return Err(AudioChatError::parameter(
            effect,
            param,
            hz,
            format!("below Nyquist ({} Hz)", nyquist),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks() {
        assert!(range("eq", "low", 24.0, -24.0, 24.0).is_ok());
        assert!(range("eq", "low", 24.5, -24.0, 24.0).is_err());
        assert!(unit("reverb", "wet_level", f32::NAN).is_err());
        assert!(positive("delay", "time_s", 0.0).is_err());
        assert!(at_least("compression", "ratio", 1.0, 1.0).is_ok());
        assert!(at_most("compression", "threshold_db", 0.5, 0.0).is_err());
        assert!(below_nyquist("filter", "cutoff_low", 22050.0, 44100).is_err());
        assert!(below_nyquist("filter", "cutoff_low", 1000.0, 44100).is_ok());
    }

    #[test]
    fn test_error_names_field() {
        let err = positive("delay", "time_s", -1.0).unwrap_err();
        match err {
            AudioChatError::Parameter { effect, param, .. } => {
                assert_eq!(effect, "delay");
                assert_eq!(param, "time_s");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
