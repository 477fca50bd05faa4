//! Compiles a [`Timeline`] into an Advanced SubStation Alpha script.
//!
//! The cue list is replayed against a small stage model. Whenever the clock
//! moves, the stage as it stood is written out as dialogue lines covering
//! the interval: a background box layer for the overlaid word, a glow layer
//! for the shadow, and the caption text itself.

use std::fmt::Write as _;

use super::color::Color;
use super::schedule::{Cue, Timeline};
use super::settings::{CaptionSettings, TextAlign};
use crate::layout::Layout;
use crate::metadata::Word;

const BOX_PADDING: f64 = 10.0;

#[derive(Debug, Clone)]
struct StageWord {
    index: usize,
    appeared_at: f64,
    fade: f64,
    lit: bool,
    overlay: bool,
}

#[derive(Debug, Default)]
struct Stage {
    words: Vec<StageWord>,
    visible: bool,
}

impl Stage {
    fn apply(&mut self, at: f64, cue: &Cue) {
        match *cue {
            Cue::ShowBatch { .. } => {
                self.words.clear();
                self.visible = true;
            }
            Cue::AppendWord { word, fade, .. } => self.words.push(StageWord {
                index: word,
                appeared_at: at,
                fade,
                lit: false,
                overlay: false,
            }),
            Cue::Highlight { word } => self.set(word, |w| w.lit = true),
            Cue::Unhighlight { word } => self.set(word, |w| w.lit = false),
            Cue::ShowOverlay { word } => self.set(word, |w| w.overlay = true),
            Cue::HideOverlay { word } => self.set(word, |w| w.overlay = false),
            Cue::RemoveBatch { .. } => {
                self.words.clear();
                self.visible = false;
            }
            Cue::ShowImage { .. } | Cue::Settle => {}
        }
    }

    fn set(&mut self, index: usize, f: impl FnOnce(&mut StageWord)) {
        if let Some(word) = self.words.iter_mut().find(|w| w.index == index) {
            f(word);
        }
    }
}

/// `h:mm:ss.cc`, the only precision ASS understands.
pub fn timestamp(seconds: f64) -> String {
    let cs = (seconds.max(0.0) * 100.0).round() as u64;
    format!(
        "{}:{:02}:{:02}.{:02}",
        cs / 360_000,
        (cs / 6000) % 60,
        (cs / 100) % 60,
        cs % 100
    )
}

fn escape(text: &str) -> String {
    text.replace('\\', "\u{FF3C}")
        .replace('{', "(")
        .replace('}', ")")
        .replace(['\n', '\r'], " ")
}

fn alpha_tag(opacity: f64) -> String {
    let transparency = ((1.0 - opacity.clamp(0.0, 1.0)) * 255.0).round() as u8;
    format!("&H{transparency:02X}&")
}

pub struct AssBuilder<'a> {
    words: &'a [Word],
    settings: &'a CaptionSettings,
    layout: Layout,
    title: Option<&'a str>,
}

impl<'a> AssBuilder<'a> {
    pub fn new(words: &'a [Word], settings: &'a CaptionSettings, layout: Layout) -> Self {
        Self {
            words,
            settings,
            layout,
            title: None,
        }
    }

    pub fn title(mut self, title: Option<&'a str>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    fn side_margin(&self) -> u32 {
        let percent = self.settings.text_box_width_percent.min(100);
        self.layout.width * (100 - percent) / 200
    }

    fn anchor(&self) -> String {
        let y = self.layout.caption.center();
        match self.settings.text_align {
            TextAlign::Center => format!("\\an5\\pos({},{y})", self.layout.width / 2),
            TextAlign::Left => format!("\\an4\\pos({},{y})", self.side_margin()),
        }
    }

    fn header(&self) -> String {
        let s = self.settings;
        let bold = if s.bold() { -1 } else { 0 };
        let margin = self.side_margin();
        let (outline_color, outline) = match (s.border_color, s.border_width) {
            (Some(color), Some(width)) if width > 0.0 => (color, width),
            _ => (Color::rgb(0, 0, 0), 0.0),
        };
        let glow = s.shadow_color.unwrap_or(Color::rgb(0, 0, 0));
        let glow_width = s.shadow_blur.unwrap_or(0.0) / 6.0;
        let box_color = s
            .current_word_background_color
            .unwrap_or(Color::rgb(0, 0, 0));
        let white = Color::rgb(255, 255, 255);

        let mut out = String::new();
        let _ = writeln!(out, "[Script Info]");
        let _ = writeln!(out, "ScriptType: v4.00+");
        let _ = writeln!(out, "PlayResX: {}", self.layout.width);
        let _ = writeln!(out, "PlayResY: {}", self.layout.height);
        let _ = writeln!(out, "WrapStyle: 0");
        let _ = writeln!(out, "ScaledBorderAndShadow: yes");
        let _ = writeln!(out);
        let _ = writeln!(out, "[V4+ Styles]");
        let _ = writeln!(out, "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding");
        let _ = writeln!(
            out,
            "Style: Caption,{font},{size},{fill},{fill},{outline_c},&H00000000,{bold},0,0,0,100,100,0,0,1,{outline},0,5,{margin},{margin},0,1",
            font = s.font_family,
            size = s.font_size,
            fill = s.text_color.ass_style(),
            outline_c = outline_color.ass_style(),
        );
        let _ = writeln!(
            out,
            "Style: Glow,{font},{size},{glow},{glow},{glow},&H00000000,{bold},0,0,0,100,100,0,0,1,{glow_width:.1},0,5,{margin},{margin},0,1",
            font = s.font_family,
            size = s.font_size,
            glow = glow.ass_style(),
        );
        let _ = writeln!(
            out,
            "Style: Box,{font},{size},&HFF000000,&HFF000000,{bg},{bg},{bold},0,0,0,100,100,0,0,3,{BOX_PADDING},0,5,{margin},{margin},0,1",
            font = s.font_family,
            size = s.font_size,
            bg = box_color.ass_style(),
        );
        let _ = writeln!(
            out,
            "Style: Header,{font},60,{fill},{fill},&H00000000,&H00000000,-1,0,0,0,100,100,0,0,1,0,0,5,0,0,0,1",
            font = s.font_family,
            fill = white.ass_style(),
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "[Events]");
        let _ = writeln!(
            out,
            "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text"
        );
        out
    }

    /// Opacity override for a word at `at`, continuing its ramp if unfinished.
    fn fade_tags(&self, word: &StageWord, at: f64) -> String {
        let start = self.settings.initial_opacity();
        if word.fade <= 0.0 || at >= word.appeared_at + word.fade {
            return String::new();
        }
        let progress = ((at - word.appeared_at) / word.fade).clamp(0.0, 1.0);
        let opacity = start + (1.0 - start) * progress;
        let remaining_ms = ((word.appeared_at + word.fade - at) * 1000.0).round() as u64;
        format!(
            "\\alpha{}\\t(0,{remaining_ms},\\alpha&H00&)",
            alpha_tag(opacity)
        )
    }

    fn join(&self, stage: &Stage, mut tags: impl FnMut(&StageWord) -> String) -> String {
        stage
            .words
            .iter()
            .map(|w| {
                let text = self
                    .words
                    .get(w.index)
                    .map(|word| escape(&word.text))
                    .unwrap_or_default();
                format!("{{{}}}{text}", tags(w))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn dialogue(out: &mut String, layer: u8, start: &str, end: &str, style: &str, text: &str) {
        let _ = writeln!(out, "Dialogue: {layer},{start},{end},{style},,0,0,0,,{text}");
    }

    fn emit(&self, out: &mut String, stage: &Stage, from: f64, to: f64) {
        if !stage.visible || stage.words.is_empty() {
            return;
        }
        let (start, end) = (timestamp(from), timestamp(to));
        if start == end {
            return;
        }
        let anchor = self.anchor();
        let s = self.settings;

        if let Some(bg) = s.current_word_background_color {
            if stage.words.iter().any(|w| w.overlay) {
                let text = self.join(stage, |w| {
                    if w.overlay {
                        format!("\\1a&HFF&\\3c{}\\3a&H{:02X}&", bg.ass(), bg.ass_alpha())
                    } else {
                        "\\alpha&HFF&".to_string()
                    }
                });
                Self::dialogue(out, 0, &start, &end, "Box", &format!("{{{anchor}}}{text}"));
            }
        }

        if let (Some(_), Some(blur)) = (s.shadow_color, s.shadow_blur) {
            if blur > 0.0 {
                let text = self.join(stage, |w| self.fade_tags(w, from));
                let blur_tag = format!("\\blur{:.1}", blur / 3.0);
                Self::dialogue(
                    out,
                    1,
                    &start,
                    &end,
                    "Glow",
                    &format!("{{{anchor}{blur_tag}}}{text}"),
                );
            }
        }

        let text = self.join(stage, |w| {
            let color = if w.lit {
                s.current_word_color.unwrap_or(s.text_color)
            } else {
                s.text_color
            };
            format!("\\1c{}{}", color.ass(), self.fade_tags(w, from))
        });
        Self::dialogue(out, 2, &start, &end, "Caption", &format!("{{{anchor}}}{text}"));
    }

    pub fn build(&self, timeline: &Timeline) -> String {
        let mut out = self.header();
        if let Some(title) = self.title {
            let pos = format!(
                "{{\\an5\\pos({},{})}}",
                self.layout.width / 2,
                self.layout.header.center()
            );
            Self::dialogue(
                &mut out,
                3,
                &timestamp(0.0),
                &timestamp(timeline.duration),
                "Header",
                &format!("{pos}{}", escape(title)),
            );
        }

        let mut stage = Stage::default();
        let mut cues = timeline.cues.iter().peekable();
        while let Some(first) = cues.next() {
            let now = first.at;
            stage.apply(now, &first.cue);
            while let Some(next) = cues.next_if(|c| c.at <= now) {
                stage.apply(now, &next.cue);
            }
            let until = cues.peek().map_or(timeline.duration, |c| c.at);
            self.emit(&mut out, &stage, now, until);
        }
        out
    }
}
