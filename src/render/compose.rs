//! Frame composition and encoding with ffmpeg.
//!
//! Slides are composed with `image` and pushed through a filter graph that
//! burns in the caption script. The voiceover, optionally mixed with music,
//! is transcoded alongside and both streams are interleaved into one MP4.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ffmpeg::encoder;
use ffmpeg::util::frame::{audio::Audio, video::Video};
use ffmpeg_next::{
    self as ffmpeg, channel_layout, codec, decoder, filter, format, media, Dictionary, Packet,
    Rational,
};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::{debug, info};

use crate::caption::{Color, ImageSlot};
use crate::error::{Error, Result};
use crate::layout::Layout;

static INIT: OnceLock<std::result::Result<(), ffmpeg::Error>> = OnceLock::new();

pub(crate) fn init() -> Result<()> {
    (*INIT.get_or_init(ffmpeg::init)).map_err(Error::from)
}

/// Escapes a value for an option inside a filter graph description.
pub fn escape_filter_value(value: &str) -> String {
    let mut option = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option.push('\\');
        }
        option.push(c);
    }
    let mut graph = String::with_capacity(option.len());
    for c in option.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph.push('\\');
        }
        graph.push(c);
    }
    graph
}

fn path_value(path: &Path) -> String {
    escape_filter_value(&path.to_string_lossy())
}

/// Burns the caption script into the composed frames.
pub fn video_filter_spec(subtitles: &Path, fonts_dir: Option<&Path>) -> String {
    let mut spec = format!("[in]subtitles=filename={}", path_value(subtitles));
    if let Some(dir) = fonts_dir {
        spec.push_str(&format!(":fontsdir={}", path_value(dir)));
    }
    spec.push_str(",format=yuv420p[out]");
    spec
}

/// Voiceover, optionally with a quiet music bed that stops with the voice.
pub fn audio_filter_spec(music: Option<(&Path, f64)>, sample_rate: u32) -> String {
    match music {
        Some((path, volume)) => format!(
            "amovie={}:loop=0,volume={volume}[bgm];[in][bgm]amix=inputs=2:duration=first:normalize=0,asettb=1/{sample_rate}[out]",
            path_value(path)
        ),
        None => format!("[in]anull,asettb=1/{sample_rate}[out]"),
    }
}

/// Which slide is on screen at `t`. The last one stays up after its slot.
pub fn slide_at(slots: &[ImageSlot], t: f64) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .take_while(|(_, slot)| slot.start <= t)
        .last()
        .map(|(i, _)| i)
}

/// Full frame with `picture` covering the image band.
pub fn canvas(layout: &Layout, background: Color, picture: Option<&RgbImage>) -> RgbImage {
    let mut frame = RgbImage::from_pixel(
        layout.width,
        layout.height,
        Rgb([background.r, background.g, background.b]),
    );
    if let Some(picture) = picture {
        let fitted = if picture.dimensions() == (layout.width, layout.image.height) {
            picture.clone()
        } else {
            imageops::resize(
                &cover_crop(picture, layout.width, layout.image.height),
                layout.width,
                layout.image.height,
                FilterType::Triangle,
            )
        };
        imageops::overlay(&mut frame, &fitted, 0, layout.image.top as i64);
    }
    frame
}

/// Largest centred region of `picture` with the aspect ratio of `width`x`height`.
fn cover_crop(picture: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (pw, ph) = picture.dimensions();
    let target = width as f64 / height as f64;
    let (cw, ch) = if pw as f64 / ph as f64 > target {
        (((ph as f64) * target).round().max(1.0) as u32, ph)
    } else {
        (pw, ((pw as f64) / target).round().max(1.0) as u32)
    };
    imageops::crop_imm(picture, (pw - cw.min(pw)) / 2, (ph - ch.min(ph)) / 2, cw, ch).to_image()
}

/// Everything one encode needs.
#[derive(Debug, Clone)]
pub struct Composition {
    pub layout: Layout,
    pub fps: u32,
    pub duration: f64,
    pub background: Color,
    pub slides: Vec<(ImageSlot, PathBuf)>,
    pub subtitles: PathBuf,
    pub fonts_dir: Option<PathBuf>,
    pub voiceover: PathBuf,
    pub music: Option<(PathBuf, f64)>,
}

impl Composition {
    pub fn frame_count(&self) -> i64 {
        (self.duration * self.fps as f64).ceil() as i64
    }

    fn music(&self) -> Option<(&Path, f64)> {
        self.music.as_ref().map(|(path, volume)| (path.as_path(), *volume))
    }
}

struct VideoEncoder {
    output_stream_index: usize,
    encoder: encoder::Video,
    filter_graph: filter::Graph,
    time_base: Rational,
}

impl VideoEncoder {
    fn new(
        output: &mut format::context::Output,
        output_stream_index: usize,
        composition: &Composition,
    ) -> Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let time_base = Rational(1, composition.fps as i32);

        let codec = encoder::find(codec::Id::H264);
        let mut output_stream = output.add_stream(codec)?;
        let mut encoder = codec::context::Context::new_with_codec(
            codec.ok_or(Error::Ffmpeg(ffmpeg::Error::EncoderNotFound))?,
        )
        .encoder()
        .video()?;
        encoder.set_width(composition.layout.width);
        encoder.set_height(composition.layout.height);
        encoder.set_format(format::Pixel::YUV420P);
        encoder.set_frame_rate(Some(Rational(composition.fps as i32, 1)));
        encoder.set_time_base(time_base);
        output_stream.set_time_base(time_base);

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", "medium");
        opts.set("crf", "20");

        let opened_encoder = encoder.open_with(opts)?;
        output_stream.set_parameters(&opened_encoder);

        let filter_graph = Self::filter_graph(composition)?;

        Ok(Self {
            output_stream_index,
            encoder: opened_encoder,
            filter_graph,
            time_base,
        })
    }

    fn filter_graph(composition: &Composition) -> Result<filter::Graph> {
        let mut filter_graph = filter::Graph::new();

        let args = format!(
            "video_size={}x{}:pix_fmt=rgb24:time_base=1/{}:pixel_aspect=1/1",
            composition.layout.width, composition.layout.height, composition.fps
        );
        filter_graph.add(&find_filter("buffer")?, "in", &args)?;
        filter_graph.add(&find_filter("buffersink")?, "out", "")?;

        let spec = video_filter_spec(&composition.subtitles, composition.fonts_dir.as_deref());
        filter_graph.output("in", 0)?.input("out", 0)?.parse(&spec)?;
        filter_graph.validate()?;
        debug!(graph = %filter_graph.dump(), "video filter graph");

        Ok(filter_graph)
    }

    fn send_canvas(&mut self, canvas: &RgbImage, pts: i64) -> Result<()> {
        let (width, height) = canvas.dimensions();
        let mut frame = Video::new(format::Pixel::RGB24, width, height);
        let stride = frame.stride(0);
        let row = width as usize * 3;
        let data = frame.data_mut(0);
        for (y, line) in canvas.as_raw().chunks_exact(row).enumerate() {
            data[y * stride..y * stride + row].copy_from_slice(line);
        }
        frame.set_pts(Some(pts));
        graph_node(&mut self.filter_graph, "in")?
            .source()
            .add(&frame)?;
        Ok(())
    }

    fn flush_filter_graph(&mut self) -> Result<()> {
        graph_node(&mut self.filter_graph, "in")?.source().flush()?;
        Ok(())
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        let mut frame = Video::empty();
        while graph_node(&mut self.filter_graph, "out")?
            .sink()
            .frame(&mut frame)
            .is_ok()
        {
            self.encoder.send_frame(&frame)?;
            self.receive_and_process_encoded_packets(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn send_eof_to_encoder(&mut self) -> Result<()> {
        self.encoder.send_eof()?;
        Ok(())
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

struct AudioTranscoder {
    input: format::context::Input,
    input_stream_index: usize,
    input_time_base: Rational,
    output_stream_index: usize,
    decoder: decoder::Audio,
    encoder: encoder::Audio,
    filter_graph: filter::Graph,
    time_base: Rational,
    finished: bool,
}

impl AudioTranscoder {
    fn new(
        voiceover: &Path,
        output: &mut format::context::Output,
        output_stream_index: usize,
        music: Option<(&Path, f64)>,
    ) -> Result<Self> {
        let input = format::input(voiceover)?;
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let input_stream = input
            .streams()
            .best(media::Type::Audio)
            .ok_or(Error::Ffmpeg(ffmpeg::Error::StreamNotFound))?;
        let input_stream_index = input_stream.index();
        let input_time_base = input_stream.time_base();
        let decoder = codec::context::Context::from_parameters(input_stream.parameters())?
            .decoder()
            .audio()?;

        let codec = encoder::find(codec::Id::AAC)
            .ok_or(Error::Ffmpeg(ffmpeg::Error::EncoderNotFound))?
            .audio()?;
        let mut output_stream = output.add_stream(codec)?;
        let context = codec::context::Context::from_parameters(output_stream.parameters())?;
        let mut encoder = context.encoder().audio()?;

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let channel_layout = codec
            .channel_layouts()
            .map(|layouts| layouts.best(decoder.channel_layout().channels()))
            .unwrap_or(channel_layout::ChannelLayout::STEREO);
        let rate = decoder.rate();
        let time_base = Rational(1, rate as i32);

        encoder.set_channel_layout(channel_layout);
        encoder.set_rate(rate as i32);
        encoder.set_format(
            codec
                .formats()
                .and_then(|mut formats| formats.next())
                .ok_or_else(|| Error::Render("AAC encoder reports no sample format".into()))?,
        );
        encoder.set_bit_rate(192_000);
        encoder.set_time_base(time_base);
        output_stream.set_time_base(time_base);

        let opened_encoder = encoder.open_as(codec)?;
        output_stream.set_parameters(&opened_encoder);

        let spec = audio_filter_spec(music, rate);
        let filter_graph = Self::filter_graph(&spec, input_time_base, &decoder, &opened_encoder)?;

        Ok(Self {
            input,
            input_stream_index,
            input_time_base,
            output_stream_index,
            decoder,
            encoder: opened_encoder,
            filter_graph,
            time_base,
            finished: false,
        })
    }

    fn filter_graph(
        spec: &str,
        input_time_base: Rational,
        decoder: &codec::decoder::Audio,
        encoder: &codec::encoder::Audio,
    ) -> Result<filter::Graph> {
        let mut filter_graph = filter::Graph::new();

        let args = format!(
            "time_base={}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
            input_time_base,
            decoder.rate(),
            decoder.format().name(),
            decoder.channel_layout().bits()
        );

        filter_graph.add(&find_filter("abuffer")?, "in", &args)?;
        filter_graph.add(&find_filter("abuffersink")?, "out", "")?;

        {
            let mut out = graph_node(&mut filter_graph, "out")?;
            out.set_sample_format(encoder.format());
            out.set_channel_layout(encoder.channel_layout());
            out.set_sample_rate(encoder.rate());
        }

        filter_graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
        filter_graph.validate()?;
        debug!(graph = %filter_graph.dump(), "audio filter graph");

        if let Some(codec) = encoder.codec() {
            if !codec
                .capabilities()
                .contains(ffmpeg::codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE)
            {
                graph_node(&mut filter_graph, "out")?
                    .sink()
                    .set_frame_size(encoder.frame_size());
            }
        }

        Ok(filter_graph)
    }

    /// Transcodes voiceover packets until the input reaches `until` seconds.
    fn pump(
        &mut self,
        until: f64,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        while !self.finished {
            let Some((stream, packet)) = self.input.packets().next() else {
                self.finished = true;
                break;
            };
            if stream.index() != self.input_stream_index {
                continue;
            }
            let reached = packet
                .pts()
                .map(|pts| pts as f64 * f64::from(self.input_time_base) >= until)
                .unwrap_or(false);
            self.decoder.send_packet(&packet)?;
            self.receive_and_process_decoded_frames(output, output_stream_time_base)?;
            if reached {
                break;
            }
        }
        Ok(())
    }

    fn finish(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        self.pump(f64::INFINITY, output, output_stream_time_base)?;
        self.decoder.send_eof()?;
        self.receive_and_process_decoded_frames(output, output_stream_time_base)?;
        graph_node(&mut self.filter_graph, "in")?.source().flush()?;
        self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
        self.encoder.send_eof()?;
        self.receive_and_process_encoded_packets(output, output_stream_time_base)
    }

    fn receive_and_process_decoded_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        let mut frame = Audio::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = frame.timestamp();
            frame.set_pts(timestamp);
            graph_node(&mut self.filter_graph, "in")?
                .source()
                .add(&frame)?;
            self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        let mut frame = Audio::empty();
        while graph_node(&mut self.filter_graph, "out")?
            .sink()
            .frame(&mut frame)
            .is_ok()
        {
            self.encoder.send_frame(&frame)?;
            self.receive_and_process_encoded_packets(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

fn find_filter(name: &str) -> Result<filter::Filter> {
    filter::find(name).ok_or_else(|| Error::Render(format!("ffmpeg has no {name} filter")))
}

fn graph_node<'a>(graph: &'a mut filter::Graph, name: &str) -> Result<filter::Context<'a>> {
    graph
        .get(name)
        .ok_or_else(|| Error::Render(format!("filter graph has no {name} node")))
}

/// Encodes `composition` to `output_path`. Blocking.
pub fn encode(composition: &Composition, output_path: &Path) -> Result<()> {
    init()?;
    if let Some(dir) = output_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let blank = canvas(&composition.layout, composition.background, None);
    let mut canvases = Vec::with_capacity(composition.slides.len());
    for (_, path) in &composition.slides {
        let picture = image::open(path)?.to_rgb8();
        canvases.push(canvas(
            &composition.layout,
            composition.background,
            Some(&picture),
        ));
    }
    let slots: Vec<ImageSlot> = composition.slides.iter().map(|(s, _)| s.clone()).collect();

    let mut output = format::output(output_path)?;
    let mut video = VideoEncoder::new(&mut output, 0, composition)?;
    let mut audio =
        AudioTranscoder::new(&composition.voiceover, &mut output, 1, composition.music())?;

    let mut opts = Dictionary::new();
    opts.set("movflags", "+faststart");
    output.write_header_with(opts)?;
    format::context::output::dump(&output, 0, output_path.to_str());

    let stream_time_base = |output: &format::context::Output, index: usize| -> Result<Rational> {
        Ok(output
            .stream(index)
            .ok_or(Error::Ffmpeg(ffmpeg::Error::StreamNotFound))?
            .time_base())
    };
    let video_time_base = stream_time_base(&output, 0)?;
    let audio_time_base = stream_time_base(&output, 1)?;

    let frames = composition.frame_count();
    info!(frames, fps = composition.fps, "encoding video");
    for pts in 0..frames {
        let t = pts as f64 / composition.fps as f64;
        let current = slide_at(&slots, t).map_or(&blank, |i| &canvases[i]);
        video.send_canvas(current, pts)?;
        video.receive_and_process_filtered_frames(&mut output, video_time_base)?;
        audio.pump(t, &mut output, audio_time_base)?;
    }

    video.flush_filter_graph()?;
    video.receive_and_process_filtered_frames(&mut output, video_time_base)?;
    video.send_eof_to_encoder()?;
    video.receive_and_process_encoded_packets(&mut output, video_time_base)?;
    audio.finish(&mut output, audio_time_base)?;

    output.write_trailer()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_values_escape_both_levels() {
        assert_eq!(escape_filter_value("/tmp/a:b.ass"), r"/tmp/a\\:b.ass");
        assert_eq!(escape_filter_value("it's"), r"it\\\'s");
        assert_eq!(escape_filter_value("x[1],y;"), r"x\[1\]\,y\;");
        assert_eq!(escape_filter_value("/plain/path.ass"), "/plain/path.ass");
    }

    #[test]
    fn video_spec_burns_subtitles() {
        assert_eq!(
            video_filter_spec(Path::new("out/job.ass"), None),
            "[in]subtitles=filename=out/job.ass,format=yuv420p[out]"
        );
        assert_eq!(
            video_filter_spec(Path::new("a.ass"), Some(Path::new("fonts"))),
            "[in]subtitles=filename=a.ass:fontsdir=fonts,format=yuv420p[out]"
        );
    }

    #[test]
    fn audio_spec_mixes_music_under_voice() {
        assert_eq!(audio_filter_spec(None, 44100), "[in]anull,asettb=1/44100[out]");
        assert_eq!(
            audio_filter_spec(Some((Path::new("beat.mp3"), 0.1)), 44100),
            "amovie=beat.mp3:loop=0,volume=0.1[bgm];[in][bgm]amix=inputs=2:duration=first:normalize=0,asettb=1/44100[out]"
        );
    }

    fn slot(index: usize, start: f64, duration: f64) -> ImageSlot {
        ImageSlot {
            index,
            start,
            duration,
        }
    }

    #[test]
    fn last_slide_persists() {
        let slots = vec![slot(0, 0.0, 5.0), slot(1, 5.0, 5.0)];
        assert_eq!(slide_at(&slots, 0.0), Some(0));
        assert_eq!(slide_at(&slots, 4.99), Some(0));
        assert_eq!(slide_at(&slots, 5.0), Some(1));
        assert_eq!(slide_at(&slots, 11.0), Some(1));
        assert_eq!(slide_at(&[], 1.0), None);
    }

    #[test]
    fn picture_fills_only_the_image_band() {
        let layout = Layout::new(40, 80);
        let picture = RgbImage::from_pixel(10, 30, Rgb([255, 0, 0]));
        let frame = canvas(&layout, Color::rgb(0, 0, 0), Some(&picture));

        assert_eq!(frame.dimensions(), (40, 80));
        assert_eq!(frame.get_pixel(20, layout.image.center()), &Rgb([255, 0, 0]));
        assert_eq!(frame.get_pixel(20, 0), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(20, 79), &Rgb([0, 0, 0]));
    }

    #[test]
    fn cover_crop_keeps_band_aspect() {
        let tall = RgbImage::new(1024, 1792);
        let cropped = cover_crop(&tall, 1080, 960);
        assert_eq!(cropped.dimensions(), (1024, 910));
    }

    #[test]
    fn frame_count_rounds_up() {
        let composition = Composition {
            layout: Layout::shorts(),
            fps: 30,
            duration: 2.31,
            background: Color::rgb(0, 0, 0),
            slides: Vec::new(),
            subtitles: PathBuf::from("x.ass"),
            fonts_dir: None,
            voiceover: PathBuf::from("x.wav"),
            music: None,
        };
        assert_eq!(composition.frame_count(), 70);
    }
}
