//! Caption and slideshow scheduling.
//!
//! Two routines share one clock: the image routine cycles backgrounds in
//! equal slots across the presentation, the caption routine walks word
//! batches and highlights each word while it is spoken. Every wait is a
//! state with a wake time; the [`Scheduler`] always resumes the routine
//! with the earliest wake time, so both stay on the same timeline.

use std::ops::Range;

use super::settings::CaptionSettings;
use crate::error::Result;
use crate::metadata::{validate_words, Word};

/// Seconds the slideshow keeps running past the last word.
pub const TAIL_PADDING: f64 = 0.5;
/// Seconds the final caption batch stays up after its last word.
pub const TRAILING_HOLD: f64 = 1.0;
/// Upper bound of a fade-in ramp.
pub const FADE_CAP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum Cue {
    ShowImage { index: usize },
    /// Opens an empty caption box for a batch.
    ShowBatch { batch: usize },
    /// Adds a word to its batch, ramping opacity up over `fade` seconds.
    AppendWord { batch: usize, word: usize, fade: f64 },
    /// Layout pass. Anything measured from text must come after this.
    Settle,
    Highlight { word: usize },
    ShowOverlay { word: usize },
    Unhighlight { word: usize },
    HideOverlay { word: usize },
    RemoveBatch { batch: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedCue {
    pub at: f64,
    pub cue: Cue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSlot {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSpan {
    pub index: usize,
    pub words: Range<usize>,
    pub shown_at: f64,
    pub removed_at: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightSpan {
    pub word: usize,
    pub start: f64,
    pub end: f64,
}

/// Splits `len` words into consecutive batches of at most `size`.
pub fn partition(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Equal, gapless slots covering `total` seconds. Empty when there are no images.
pub fn image_slots(total: f64, count: usize) -> Vec<ImageSlot> {
    if count == 0 {
        return Vec::new();
    }
    let duration = total / count as f64;
    (0..count)
        .map(|index| ImageSlot {
            index,
            start: total * index as f64 / count as f64,
            duration,
        })
        .collect()
}

/// Length of the slideshow for a word track.
pub fn presentation_duration(words: &[Word]) -> f64 {
    words.last().map(|w| w.end + TAIL_PADDING).unwrap_or(0.0)
}

fn gap(from_end: f64, to_start: Option<f64>) -> f64 {
    match to_start {
        Some(start) => (start - from_end).max(0.0),
        None => 0.0,
    }
}

/// Monotonic scheduling clock shared by all routines.
#[derive(Debug, Default)]
struct Clock {
    now: f64,
}

impl Clock {
    fn advance_to(&mut self, t: f64) -> f64 {
        if t > self.now {
            self.now = t;
        }
        self.now
    }
}

trait Routine {
    /// Time this routine wants to resume, or `None` once it has finished.
    fn wake_at(&self) -> Option<f64>;

    fn resume(&mut self, now: f64, out: &mut Vec<TimedCue>);
}

struct ImageRoutine {
    slots: Vec<ImageSlot>,
    next: usize,
    end: f64,
    done: bool,
}

impl ImageRoutine {
    fn new(total: f64, count: usize) -> Self {
        Self {
            slots: image_slots(total, count),
            next: 0,
            end: total,
            done: count == 0,
        }
    }
}

impl Routine for ImageRoutine {
    fn wake_at(&self) -> Option<f64> {
        if self.done {
            return None;
        }
        Some(self.slots.get(self.next).map_or(self.end, |slot| slot.start))
    }

    fn resume(&mut self, now: f64, out: &mut Vec<TimedCue>) {
        match self.slots.get(self.next) {
            Some(slot) => {
                out.push(TimedCue {
                    at: now,
                    cue: Cue::ShowImage { index: slot.index },
                });
                self.next += 1;
            }
            None => self.done = true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Waiting for the batch's first word.
    BatchWait,
    /// Waiting before word `k` of the batch lights up.
    WordGap(usize),
    /// Word `k` is lit; released when the hold elapses.
    WordHold(usize),
    /// Highlight pass is over; the batch stays up until its hold ends.
    BatchHold,
    Done,
}

struct CaptionRoutine<'a> {
    words: &'a [Word],
    settings: &'a CaptionSettings,
    batches: Vec<Range<usize>>,
    batch: usize,
    phase: Phase,
    wake: f64,
    batch_hold_until: f64,
}

impl<'a> CaptionRoutine<'a> {
    fn new(words: &'a [Word], settings: &'a CaptionSettings) -> Self {
        let batches = partition(words.len(), settings.num_simultaneous_words);
        let first_start = words.first().map_or(0.0, |w| w.start.max(0.0));
        Self {
            words,
            settings,
            phase: if batches.is_empty() {
                Phase::Done
            } else {
                Phase::BatchWait
            },
            batches,
            batch: 0,
            wake: first_start,
            batch_hold_until: 0.0,
        }
    }

    fn range(&self) -> Range<usize> {
        self.batches[self.batch].clone()
    }

    fn is_last_batch(&self) -> bool {
        self.batch + 1 == self.batches.len()
    }

    fn trailing(&self) -> f64 {
        if self.is_last_batch() {
            TRAILING_HOLD
        } else {
            0.0
        }
    }

    fn word_fade(&self, word: &Word) -> f64 {
        if self.settings.fade_in_animation {
            (word.duration() * 0.5).min(FADE_CAP)
        } else {
            0.0
        }
    }

    fn light(&self, now: f64, word: usize, out: &mut Vec<TimedCue>) {
        out.push(TimedCue {
            at: now,
            cue: Cue::Highlight { word },
        });
        if self.settings.current_word_background_color.is_some() {
            out.push(TimedCue {
                at: now,
                cue: Cue::Settle,
            });
            out.push(TimedCue {
                at: now,
                cue: Cue::ShowOverlay { word },
            });
        }
    }

    fn release(&self, now: f64, word: usize, out: &mut Vec<TimedCue>) {
        out.push(TimedCue {
            at: now,
            cue: Cue::Unhighlight { word },
        });
        if self.settings.current_word_background_color.is_some() {
            out.push(TimedCue {
                at: now,
                cue: Cue::HideOverlay { word },
            });
        }
    }

    fn show_batch(&mut self, now: f64, out: &mut Vec<TimedCue>) {
        let range = self.range();
        out.push(TimedCue {
            at: now,
            cue: Cue::ShowBatch { batch: self.batch },
        });
        if self.settings.stream {
            self.phase = Phase::WordGap(0);
            self.wake = now;
            return;
        }
        // The whole batch shares one opacity ramp keyed on its first word.
        let fade = self.word_fade(&self.words[range.start]);
        for word in range.clone() {
            out.push(TimedCue {
                at: now,
                cue: Cue::AppendWord {
                    batch: self.batch,
                    word,
                    fade,
                },
            });
        }
        out.push(TimedCue {
            at: now,
            cue: Cue::Settle,
        });
        let first = &self.words[range.start];
        let last = &self.words[range.end - 1];
        self.batch_hold_until = now + (last.end - first.start).max(0.0) + self.trailing();
        self.phase = Phase::WordGap(0);
        self.wake = now;
    }

    fn start_word(&mut self, now: f64, k: usize, out: &mut Vec<TimedCue>) {
        let index = self.range().start + k;
        let word = &self.words[index];
        if self.settings.stream {
            out.push(TimedCue {
                at: now,
                cue: Cue::AppendWord {
                    batch: self.batch,
                    word: index,
                    fade: self.word_fade(word),
                },
            });
        }
        self.light(now, index, out);
        self.phase = Phase::WordHold(k);
        self.wake = now + word.duration();
    }

    fn finish_word(&mut self, now: f64, k: usize, out: &mut Vec<TimedCue>) {
        let range = self.range();
        let index = range.start + k;
        self.release(now, index, out);
        if index + 1 < range.end {
            let next_start = self.words[index + 1].start;
            self.phase = Phase::WordGap(k + 1);
            self.wake = now + gap(self.words[index].end, Some(next_start));
        } else if self.settings.stream {
            self.phase = Phase::BatchHold;
            self.wake = now + self.trailing();
        } else {
            self.phase = Phase::BatchHold;
            self.wake = self.batch_hold_until.max(now);
        }
    }

    fn close_batch(&mut self, now: f64, out: &mut Vec<TimedCue>) {
        let range = self.range();
        out.push(TimedCue {
            at: now,
            cue: Cue::RemoveBatch { batch: self.batch },
        });
        let last_end = self.words[range.end - 1].end;
        let next_start = self.batches.get(self.batch + 1).map(|r| self.words[r.start].start);
        if next_start.is_none() {
            self.phase = Phase::Done;
            return;
        }
        self.batch += 1;
        self.phase = Phase::BatchWait;
        self.wake = now + gap(last_end, next_start);
    }
}

impl Routine for CaptionRoutine<'_> {
    fn wake_at(&self) -> Option<f64> {
        match self.phase {
            Phase::Done => None,
            _ => Some(self.wake),
        }
    }

    fn resume(&mut self, now: f64, out: &mut Vec<TimedCue>) {
        match self.phase {
            Phase::BatchWait => self.show_batch(now, out),
            Phase::WordGap(k) => self.start_word(now, k, out),
            Phase::WordHold(k) => self.finish_word(now, k, out),
            Phase::BatchHold => self.close_batch(now, out),
            Phase::Done => {}
        }
    }
}

/// Drives routines from a single clock until all have finished.
pub struct Scheduler<'a> {
    clock: Clock,
    presentation: f64,
    routines: Vec<Box<dyn Routine + 'a>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(words: &'a [Word], image_count: usize, settings: &'a CaptionSettings) -> Result<Self> {
        validate_words(words)?;
        settings.validate()?;
        let total = presentation_duration(words);
        Ok(Self {
            clock: Clock::default(),
            presentation: total,
            routines: vec![
                Box::new(ImageRoutine::new(total, image_count)),
                Box::new(CaptionRoutine::new(words, settings)),
            ],
        })
    }

    pub fn run(mut self) -> Timeline {
        let mut cues = Vec::new();
        loop {
            // Ties go to the earlier routine, keeping the order deterministic.
            let next = self
                .routines
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.wake_at().map(|t| (i, t)))
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            let Some((index, at)) = next else {
                break;
            };
            let now = self.clock.advance_to(at);
            self.routines[index].resume(now, &mut cues);
        }
        Timeline {
            cues,
            duration: self.clock.now,
            presentation: self.presentation,
        }
    }
}

/// Everything the renderer needs to know about when things happen.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub cues: Vec<TimedCue>,
    /// End of the last cue on either routine.
    pub duration: f64,
    /// Length of the slideshow: last word end plus [`TAIL_PADDING`].
    pub presentation: f64,
}

impl Timeline {
    pub fn build(words: &[Word], image_count: usize, settings: &CaptionSettings) -> Result<Self> {
        Ok(Scheduler::new(words, image_count, settings)?.run())
    }

    pub fn image_slots(&self) -> Vec<ImageSlot> {
        let count = self
            .cues
            .iter()
            .filter(|c| matches!(c.cue, Cue::ShowImage { .. }))
            .count();
        image_slots(self.presentation, count)
    }

    pub fn batches(&self) -> Vec<BatchSpan> {
        let mut spans: Vec<BatchSpan> = Vec::new();
        for c in &self.cues {
            match c.cue {
                Cue::ShowBatch { batch } => spans.push(BatchSpan {
                    index: batch,
                    words: 0..0,
                    shown_at: c.at,
                    removed_at: c.at,
                }),
                Cue::AppendWord { batch, word, .. } => {
                    if let Some(span) = spans.iter_mut().find(|s| s.index == batch) {
                        if span.words.is_empty() {
                            span.words = word..word + 1;
                        } else {
                            span.words.end = word + 1;
                        }
                    }
                }
                Cue::RemoveBatch { batch } => {
                    if let Some(span) = spans.iter_mut().find(|s| s.index == batch) {
                        span.removed_at = c.at;
                    }
                }
                _ => {}
            }
        }
        spans
    }

    pub fn highlights(&self) -> Vec<HighlightSpan> {
        let mut spans: Vec<HighlightSpan> = Vec::new();
        for c in &self.cues {
            match c.cue {
                Cue::Highlight { word } => spans.push(HighlightSpan {
                    word,
                    start: c.at,
                    end: c.at,
                }),
                Cue::Unhighlight { word } => {
                    if let Some(span) = spans.iter_mut().rev().find(|s| s.word == word) {
                        span.end = c.at;
                    }
                }
                _ => {}
            }
        }
        spans
    }
}
