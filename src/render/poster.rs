//! Media probing and poster-frame capture.

use std::path::Path;

use ffmpeg::util::frame::video::Video;
use ffmpeg::{format, media, rescale, software, Rescale};
use ffmpeg_next::{self as ffmpeg};
use image::codecs::jpeg;
use image::RgbImage;

use super::compose::init;
use crate::error::{Error, Result};

/// Container duration in seconds.
pub fn probe_duration(path: &Path) -> Result<f64> {
    init()?;
    let input = format::input(path)?;
    let duration = input.duration();
    if duration <= 0 {
        return Err(Error::Render(format!(
            "{} reports no duration",
            path.display()
        )));
    }
    Ok(duration as f64 * f64::from(rescale::TIME_BASE))
}

/// One second in, or the midpoint of anything shorter than two seconds.
pub fn poster_time(duration: f64) -> f64 {
    if duration >= 2.0 {
        1.0
    } else {
        (duration / 2.0).max(0.0)
    }
}

/// Copies packed RGB rows out of a frame whose lines may be padded.
fn rgb_image(frame: &Video) -> Result<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let stride = frame.stride(0);
    let row = width as usize * 3;
    let data = frame.data(0);
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        pixels.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| Error::Render("frame does not fit an RGB image".into()))
}

/// Whether a frame at `pts` seconds has reached `at`, allowing one tick.
fn covers(pts: f64, tick: f64, at: f64) -> bool {
    pts + tick >= at
}

/// Pulls decoded frames until one covers `at`. Frames before it are dropped.
fn drain_until(
    decoder: &mut ffmpeg::decoder::Video,
    scaler: &mut software::scaling::context::Context,
    time_base: f64,
    at: f64,
) -> Result<Option<RgbImage>> {
    let mut decoded = Video::empty();
    while decoder.receive_frame(&mut decoded).is_ok() {
        let pts = decoded.timestamp().unwrap_or(0) as f64 * time_base;
        if !covers(pts, time_base, at) {
            continue;
        }
        let mut rgb_frame = Video::empty();
        scaler.run(&decoded, &mut rgb_frame)?;
        return Ok(Some(rgb_image(&rgb_frame)?));
    }
    Ok(None)
}

/// Writes the first frame at or after `at` seconds as a JPEG.
///
/// Decoding stops at that frame; the rest of the file is never read.
pub fn capture_poster(video_path: &Path, at: f64, output_path: &Path) -> Result<()> {
    init()?;
    let mut input = format::input(video_path)?;

    let video_stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(Error::Ffmpeg(ffmpeg::Error::StreamNotFound))?;
    let video_stream_index = video_stream.index();
    let time_base: f64 = video_stream.time_base().into();
    let mut decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?
        .decoder()
        .video()?;

    let mut scaler = software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        software::scaling::Flags::BILINEAR,
    )?;

    let seek_to = ((at * 1000.0) as i64).rescale((1, 1000), rescale::TIME_BASE);
    input.seek(seek_to, ..seek_to)?;

    let mut poster = None;
    for (stream, packet) in input.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        poster = drain_until(&mut decoder, &mut scaler, time_base, at)?;
        if poster.is_some() {
            break;
        }
    }
    if poster.is_none() {
        decoder.send_eof()?;
        poster = drain_until(&mut decoder, &mut scaler, time_base, at)?;
    }

    let image = poster.ok_or_else(|| {
        Error::Render(format!("no frame at {at:.2}s in {}", video_path.display()))
    })?;

    let mut jpeg_data = Vec::new();
    jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, 90).encode(
        &image,
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    std::fs::write(output_path, jpeg_data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poster_is_one_second_in() {
        assert_eq!(poster_time(42.5), 1.0);
        assert_eq!(poster_time(2.0), 1.0);
        assert_eq!(poster_time(1.2), 0.6);
        assert_eq!(poster_time(0.0), 0.0);
    }

    #[test]
    fn frames_before_the_poster_time_are_skipped() {
        let tick = 1.0 / 15360.0;
        assert!(!covers(0.9, tick, 1.0));
        assert!(covers(1.0, tick, 1.0));
        assert!(covers(1.0 - tick / 2.0, tick, 1.0));
        assert!(covers(4.0, tick, 1.0));
    }

    /// 16-bit mono PCM silence.
    fn silent_wav(seconds: u32, rate: u32) -> Vec<u8> {
        let data_len = seconds * rate * 2;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&rate.to_le_bytes());
        wav.extend_from_slice(&(rate * 2).to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(44 + data_len as usize, 0);
        wav
    }

    #[test]
    #[ignore] // Requires ffmpeg with libx264 and libass
    fn poster_is_captured_from_a_rendered_video() {
        use crate::caption::{AssBuilder, CaptionSettings, Color, Timeline};
        use crate::layout::Layout;
        use crate::metadata::Word;
        use crate::render::Composition;

        let dir = tempfile::tempdir().unwrap();
        let words: Vec<Word> = (0..8)
            .map(|i| Word::new(format!("w{i}"), i as f64 * 0.5, i as f64 * 0.5 + 0.4))
            .collect();
        let settings = CaptionSettings::default();
        let layout = Layout::new(180, 320);
        let timeline = Timeline::build(&words, 0, &settings).unwrap();
        let subtitles = dir.path().join("clip.ass");
        std::fs::write(
            &subtitles,
            AssBuilder::new(&words, &settings, layout).build(&timeline),
        )
        .unwrap();
        let voiceover = dir.path().join("clip.wav");
        std::fs::write(&voiceover, silent_wav(5, 16_000)).unwrap();

        let composition = Composition {
            layout,
            fps: 15,
            duration: timeline.duration,
            background: Color::rgb(0, 0, 0),
            slides: Vec::new(),
            subtitles,
            fonts_dir: None,
            voiceover,
            music: None,
        };
        let video = dir.path().join("clip.mp4");
        crate::render::encode(&composition, &video).unwrap();

        let duration = probe_duration(&video).unwrap();
        assert!(duration > 3.0);
        let poster = dir.path().join("clip.jpg");
        capture_poster(&video, poster_time(duration), &poster).unwrap();
        let image = image::open(&poster).unwrap();
        assert_eq!((image.width(), image.height()), (180, 320));
    }

    #[test]
    fn probing_a_missing_file_fails() {
        assert!(probe_duration(Path::new("/nonexistent/video.mp4")).is_err());
    }
}
