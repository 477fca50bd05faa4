//! Word-synchronised captions: settings, scheduling and subtitle output.

pub mod ass;
pub mod color;
pub mod schedule;
pub mod settings;

pub use ass::AssBuilder;
pub use color::Color;
pub use schedule::{
    image_slots, partition, presentation_duration, BatchSpan, Cue, HighlightSpan, ImageSlot,
    Scheduler, TimedCue, Timeline, TRAILING_HOLD,
};
pub use settings::{CaptionSettings, TextAlign};
