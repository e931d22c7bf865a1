//! Intent analysis for instructions
//!
//! Extracts structured intent from natural language: tokens, intensity,
//! mentioned effect kinds and explicit numeric values.

use serde::{Deserialize, Serialize};

use crate::dsp::EffectKind;

/// Analyzed intent from an instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Original instruction
    pub original: String,

    /// Lowercase instruction for matching
    pub prompt_lower: String,

    /// Lowercase words, punctuation stripped
    pub words: Vec<String>,

    /// Intensity modifier (0.0-1.0, 0.5 when unstated)
    pub intensity: f32,

    /// Effect kinds mentioned by name
    pub mentioned_effects: Vec<EffectKind>,

    /// Extracted parameters (e.g., "3dB", "1kHz", "4:1")
    pub extracted_params: Vec<ExtractedParam>,
}

/// A parameter extracted from natural language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParam {
    pub param_type: ParamType,
    pub value: f32,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Gain,
    Frequency,
    Ratio,
    Semitones,
    Percent,
}

impl Intent {
    /// Analyze an instruction and extract intent
    pub fn analyze(prompt: &str) -> Self {
        let prompt_lower = prompt.to_lowercase();
        let words = prompt_lower
            .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '-' || c == ':' || c == '%'))
            .map(|w| w.trim_matches(|c: char| c == '.' || c == '-' || c == ':'))
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let intensity = Self::extract_intensity(&prompt_lower);
        let mentioned_effects = Self::extract_effects(&words);
        let extracted_params = Self::extract_params(&prompt_lower);

        Self {
            original: prompt.to_string(),
            prompt_lower,
            words,
            intensity,
            mentioned_effects,
            extracted_params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Whole-word match on any of `words`
    pub fn has_word(&self, words: &[&str]) -> bool {
        self.words.iter().any(|w| words.contains(&w.as_str()))
    }

    /// Word-prefix match, so "distort" covers "distorted" and "distortion"
    pub fn has_stem(&self, stems: &[&str]) -> bool {
        self.words
            .iter()
            .any(|w| stems.iter().any(|s| w.starts_with(s)))
    }

    /// Substring match for multi-word phrases
    pub fn has_phrase(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.prompt_lower.contains(p))
    }

    /// Scale factor relative to the unstated (medium) intensity
    pub fn scale(&self) -> f32 {
        self.intensity / 0.5
    }

    pub fn param(&self, param_type: ParamType) -> Option<f32> {
        self.extracted_params
            .iter()
            .find(|p| p.param_type == param_type)
            .map(|p| p.value)
    }

    fn extract_intensity(prompt: &str) -> f32 {
        const INTENSITY_MODIFIERS: &[(&[&str], f32)] = &[
            // Small
            (
                &["a bit", "slightly", "a little", "a touch", "subtly"],
                0.3,
            ),
            // Medium (implicit)
            (&["some", "more"], 0.5),
            // Large
            (
                &["much", "a lot", "significantly", "considerably"],
                0.7,
            ),
            // Extreme
            (&["extremely", "very", "heavily", "drastically"], 0.9),
        ];

        for (modifiers, intensity) in INTENSITY_MODIFIERS {
            for modifier in *modifiers {
                if prompt.contains(modifier) {
                    return *intensity;
                }
            }
        }

        0.5
    }

    fn extract_effects(words: &[String]) -> Vec<EffectKind> {
        const EFFECT_KEYWORDS: &[(&str, EffectKind)] = &[
            ("eq", EffectKind::Eq),
            ("equalizer", EffectKind::Eq),
            ("equalize", EffectKind::Eq),
            ("compressor", EffectKind::Compression),
            ("compression", EffectKind::Compression),
            ("compress", EffectKind::Compression),
            ("reverb", EffectKind::Reverb),
            ("delay", EffectKind::Delay),
            ("echo", EffectKind::Delay),
            ("limiter", EffectKind::Limiter),
            ("limit", EffectKind::Limiter),
            ("gate", EffectKind::Gate),
            ("saturation", EffectKind::Distortion),
            ("distortion", EffectKind::Distortion),
            ("denoise", EffectKind::NoiseReduction),
            ("pitch", EffectKind::PitchShift),
            ("stereo", EffectKind::StereoWidth),
            ("filter", EffectKind::Filter),
            ("normalize", EffectKind::Normalize),
            ("stems", EffectKind::SourceSeparation),
        ];

        let mut effects = Vec::new();
        for (keyword, effect) in EFFECT_KEYWORDS {
            if words.iter().any(|w| w == keyword) && !effects.contains(effect) {
                effects.push(*effect);
            }
        }
        effects
    }

    fn extract_params(prompt: &str) -> Vec<ExtractedParam> {
        let mut params = Vec::new();

        if let Some(db) = Self::extract_db_value(prompt) {
            params.push(ExtractedParam {
                param_type: ParamType::Gain,
                value: db,
                unit: Some("dB".to_string()),
            });
        }

        if let Some(freq) = Self::extract_freq_value(prompt) {
            params.push(ExtractedParam {
                param_type: ParamType::Frequency,
                value: freq,
                unit: Some("Hz".to_string()),
            });
        }

        // e.g. "4:1"
        if let Some(ratio) = Self::extract_ratio_value(prompt) {
            params.push(ExtractedParam {
                param_type: ParamType::Ratio,
                value: ratio,
                unit: None,
            });
        }

        if let Some(semitones) = Self::extract_semitone_value(prompt) {
            params.push(ExtractedParam {
                param_type: ParamType::Semitones,
                value: semitones,
                unit: Some("st".to_string()),
            });
        }

        if let Some(percent) = Self::extract_percent_value(prompt) {
            params.push(ExtractedParam {
                param_type: ParamType::Percent,
                value: percent,
                unit: Some("%".to_string()),
            });
        }

        params
    }

    fn extract_db_value(prompt: &str) -> Option<f32> {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            let word = word.trim_end_matches([',', '.', ';']);
            // "3db", "-6db", "+4db"
            if let Some(num_part) = word.strip_suffix("db") {
                if let Ok(val) = num_part.parse::<f32>() {
                    return Some(val);
                }
            }
            // "3 db", "-6 db"
            if word == "db" && i > 0 {
                if let Ok(val) = words[i - 1].parse::<f32>() {
                    return Some(val);
                }
            }
        }
        None
    }

    fn extract_freq_value(prompt: &str) -> Option<f32> {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            let word = word.trim_end_matches([',', '.', ';']);
            // "1000hz", "1khz"
            if let Some(num_part) = word.strip_suffix("hz") {
                if let Some(num) = num_part.strip_suffix('k') {
                    if let Ok(val) = num.parse::<f32>() {
                        return Some(val * 1000.0);
                    }
                } else if let Ok(val) = num_part.parse::<f32>() {
                    return Some(val);
                }
            }
            // "1000 hz", "1 khz"
            if (word == "hz" || word == "khz") && i > 0 {
                if let Ok(val) = words[i - 1].parse::<f32>() {
                    return Some(if word == "khz" { val * 1000.0 } else { val });
                }
            }
        }
        None
    }

    fn extract_ratio_value(prompt: &str) -> Option<f32> {
        for word in prompt.split_whitespace() {
            let parts: Vec<&str> = word.trim_end_matches([',', '.']).split(':').collect();
            if parts.len() == 2 {
                if let (Ok(num), Ok(denom)) = (parts[0].parse::<f32>(), parts[1].parse::<f32>()) {
                    if denom == 1.0 {
                        return Some(num);
                    }
                }
            }
        }
        None
    }

    /// "3 semitones", "-2 semitone", "+5st"; negated by "down"/"lower"
    /// when the number itself is unsigned
    fn extract_semitone_value(prompt: &str) -> Option<f32> {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            let word = word.trim_end_matches([',', '.', ';']);
            let value = if let Some(num) = word.strip_suffix("st") {
                num.parse::<f32>().ok()
            } else if word.starts_with("semitone") && i > 0 {
                words[i - 1].parse::<f32>().ok()
            } else {
                None
            };
            if let Some(v) = value {
                let explicit_sign = word.starts_with(['-', '+'])
                    || (i > 0 && words[i - 1].starts_with(['-', '+']));
                let signed = if explicit_sign {
                    v
                } else if prompt.contains("down") || prompt.contains("lower") {
                    -v.abs()
                } else {
                    v
                };
                return Some(signed);
            }
        }
        None
    }

    /// "20%" or "20 percent"
    fn extract_percent_value(prompt: &str) -> Option<f32> {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            let word = word.trim_end_matches([',', '.', ';']);
            if let Some(num) = word.strip_suffix('%') {
                if let Ok(val) = num.parse::<f32>() {
                    return Some(val);
                }
            }
            if word == "percent" && i > 0 {
                if let Ok(val) = words[i - 1].parse::<f32>() {
                    return Some(val);
                }
            }
        }
        None
    }
}
