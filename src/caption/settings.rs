use serde::{Deserialize, Serialize};

use super::color::{self, Color};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Center,
    Left,
}

/// Caption styling and batching. Immutable for the duration of one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    pub font_size: u32,
    pub text_color: Color,
    pub font_weight: u32,
    pub font_family: String,
    /// Words shown on screen together.
    pub num_simultaneous_words: usize,
    /// Append words one at a time instead of laying out the batch up front.
    pub stream: bool,
    pub text_align: TextAlign,
    pub text_box_width_percent: u32,
    #[serde(deserialize_with = "color::deserialize_optional")]
    pub border_color: Option<Color>,
    pub border_width: Option<f64>,
    #[serde(deserialize_with = "color::deserialize_optional")]
    pub current_word_color: Option<Color>,
    #[serde(deserialize_with = "color::deserialize_optional")]
    pub current_word_background_color: Option<Color>,
    #[serde(deserialize_with = "color::deserialize_optional")]
    pub shadow_color: Option<Color>,
    pub shadow_blur: Option<f64>,
    pub fade_in_animation: bool,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            font_size: 80,
            text_color: Color::rgb(255, 255, 255),
            font_weight: 800,
            font_family: "Mulish".to_string(),
            num_simultaneous_words: 3,
            stream: false,
            text_align: TextAlign::Center,
            text_box_width_percent: 70,
            border_color: None,
            border_width: None,
            current_word_color: Some(Color::rgb(255, 165, 0)),
            current_word_background_color: None,
            shadow_color: Some(Color::rgb(0, 0, 0)),
            shadow_blur: Some(30.0),
            fade_in_animation: true,
        }
    }
}

impl CaptionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.num_simultaneous_words == 0 {
            return Err(Error::InvalidSettings(
                "num_simultaneous_words must be at least 1".into(),
            ));
        }
        if self.font_size == 0 {
            return Err(Error::InvalidSettings("font_size must be positive".into()));
        }
        if !(100..=900).contains(&self.font_weight) {
            return Err(Error::InvalidSettings(format!(
                "font_weight {} is outside 100..=900",
                self.font_weight
            )));
        }
        if !(1..=100).contains(&self.text_box_width_percent) {
            return Err(Error::InvalidSettings(format!(
                "text_box_width_percent {} is outside 1..=100",
                self.text_box_width_percent
            )));
        }
        for (name, value) in [
            ("border_width", self.border_width),
            ("shadow_blur", self.shadow_blur),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::InvalidSettings(format!(
                        "{name} must be a non-negative number"
                    )));
                }
            }
        }
        if self.font_family.trim().is_empty() {
            return Err(Error::InvalidSettings("font_family is empty".into()));
        }
        Ok(())
    }

    /// Opacity a word starts at before its fade-in ramp.
    pub fn initial_opacity(&self) -> f64 {
        if self.fade_in_animation {
            0.5
        } else {
            1.0
        }
    }

    pub fn bold(&self) -> bool {
        self.font_weight >= 600
    }
}
