use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// sRGB color with straight alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

const NAMED: &[(&str, (u8, u8, u8))] = &[
    ("black", (0, 0, 0)),
    ("white", (255, 255, 255)),
    ("red", (255, 0, 0)),
    ("green", (0, 128, 0)),
    ("lime", (0, 255, 0)),
    ("blue", (0, 0, 255)),
    ("yellow", (255, 255, 0)),
    ("orange", (255, 165, 0)),
    ("gold", (255, 215, 0)),
    ("purple", (128, 0, 128)),
    ("magenta", (255, 0, 255)),
    ("cyan", (0, 255, 255)),
    ("pink", (255, 192, 203)),
    ("gray", (128, 128, 128)),
    ("grey", (128, 128, 128)),
];

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// ASS color literal, `&HBBGGRR&`.
    pub fn ass(&self) -> String {
        format!("&H{:02X}{:02X}{:02X}&", self.b, self.g, self.r)
    }

    /// ASS transparency byte: 0 is opaque, 255 invisible.
    pub fn ass_alpha(&self) -> u8 {
        255 - self.a
    }

    /// Style-line color, `&HAABBGGRR`.
    pub fn ass_style(&self) -> String {
        format!(
            "&H{:02X}{:02X}{:02X}{:02X}",
            self.ass_alpha(),
            self.b,
            self.g,
            self.r
        )
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some((_, (r, g, b))) = NAMED.iter().find(|(name, _)| *name == lower) {
            return Ok(Color::rgb(*r, *g, *b));
        }
        let invalid = || Error::InvalidSettings(format!("unrecognised color {s:?}"));
        let hex = lower.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        match hex.len() {
            3 => {
                let short = |i: usize| {
                    u8::from_str_radix(&hex[i..i + 1], 16)
                        .map(|v| v * 17)
                        .map_err(|_| invalid())
                };
                Ok(Color::rgb(short(0)?, short(1)?, short(2)?))
            }
            6 => Ok(Color::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Color {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Optional color where an empty string means none.
pub(crate) fn deserialize_optional<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Color>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.trim().is_empty() => s.parse().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_hex_colors_parse() {
        assert_eq!("orange".parse::<Color>().unwrap(), Color::rgb(255, 165, 0));
        assert_eq!("White".parse::<Color>().unwrap(), Color::rgb(255, 255, 255));
        assert_eq!("#0f0".parse::<Color>().unwrap(), Color::rgb(0, 255, 0));
        assert_eq!("#102030".parse::<Color>().unwrap(), Color::rgb(16, 32, 48));
        assert_eq!(
            "#10203080".parse::<Color>().unwrap(),
            Color {
                r: 16,
                g: 32,
                b: 48,
                a: 128
            }
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("".parse::<Color>().is_err());
        assert!("#12".parse::<Color>().is_err());
        assert!("#gggggg".parse::<Color>().is_err());
        assert!("chartreuse-ish".parse::<Color>().is_err());
    }

    #[test]
    fn ass_literals_are_bgr() {
        let orange = Color::rgb(255, 165, 0);
        assert_eq!(orange.ass(), "&H00A5FF&");
        assert_eq!(orange.ass_style(), "&H0000A5FF");
    }
}
