//! Turns a metadata file into a captioned vertical video.

mod compose;
mod poster;
mod retry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

pub use compose::{
    audio_filter_spec, canvas, encode, escape_filter_value, slide_at, video_filter_spec,
    Composition,
};
pub use poster::{capture_poster, poster_time, probe_duration};
pub use retry::RetryPolicy;

use crate::caption::{AssBuilder, Color, Timeline};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::metadata::Metadata;

const BACKGROUND: Color = Color::rgb(0, 0, 0);

#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub metadata: PathBuf,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    pub music: Option<PathBuf>,
}

/// `out/<id>.mp4` for `public/<id>-metadata.json`.
pub fn default_output(metadata: &Path, output_dir: &Path) -> PathBuf {
    let stem = metadata
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let id = stem.strip_suffix("-metadata").unwrap_or(&stem);
    output_dir.join(format!("{id}.mp4"))
}

fn require_file(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::NotFound { path })
    }
}

/// Everything that can be decided before touching ffmpeg.
pub struct RenderPlan {
    pub timeline: Timeline,
    pub script: String,
    pub composition: Composition,
    pub output: PathBuf,
}

impl RenderPlan {
    /// Asset references resolve against the directory holding the metadata file.
    pub async fn prepare(config: &Config, request: &RenderRequest) -> Result<Self> {
        let metadata = Metadata::read(&request.metadata).await?;
        let asset_dir = request
            .metadata
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let timeline = Timeline::build(&metadata.words, metadata.images.len(), &config.captions)?;
        let layout = Layout::new(config.render.width, config.render.height);
        let title = request.title.as_deref().or(config.render.title.as_deref());
        let script = AssBuilder::new(&metadata.words, &config.captions, layout)
            .title(title)
            .build(&timeline);

        let slides = timeline
            .image_slots()
            .into_iter()
            .zip(metadata.image_paths(asset_dir))
            .map(|(slot, path)| Ok((slot, require_file(path)?)))
            .collect::<Result<Vec<_>>>()?;
        let music = request
            .music
            .clone()
            .or_else(|| config.render.music.clone())
            .map(require_file)
            .transpose()?
            .map(|path| (path, config.render.music_volume));

        let output = request
            .output
            .clone()
            .unwrap_or_else(|| default_output(&request.metadata, &config.paths.output_dir));

        let composition = Composition {
            layout,
            fps: config.render.fps,
            duration: timeline.duration,
            background: BACKGROUND,
            slides,
            subtitles: output.with_extension("ass"),
            fonts_dir: config.render.fonts_dir.clone(),
            voiceover: require_file(metadata.audio_path(asset_dir))?,
            music,
        };

        Ok(Self {
            timeline,
            script,
            composition,
            output,
        })
    }
}

/// Renders the video described by `request` and returns its path.
pub async fn render(config: &Config, request: &RenderRequest) -> Result<PathBuf> {
    let plan = RenderPlan::prepare(config, request).await?;
    if let Some(dir) = plan.output.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&plan.composition.subtitles, &plan.script).await?;
    info!(
        duration = plan.timeline.duration,
        images = plan.composition.slides.len(),
        output = %plan.output.display(),
        "rendering video"
    );

    let composition = Arc::new(plan.composition);
    let output = Arc::new(plan.output);
    RetryPolicy::from_config(&config.render)
        .run(|attempt| {
            let composition = Arc::clone(&composition);
            let output = Arc::clone(&output);
            async move {
                info!(attempt, "encoding");
                tokio::task::spawn_blocking(move || encode(&composition, &output))
                    .await
                    .map_err(|e| Error::Render(e.to_string()))?
            }
        })
        .await?;
    info!(path = %output.display(), "rendered video");

    let poster_path = output.with_extension("jpg");
    let video = Arc::clone(&output);
    let fallback = plan.timeline.duration;
    let poster = tokio::task::spawn_blocking({
        let poster_path = poster_path.clone();
        move || {
            let duration = probe_duration(&video).unwrap_or(fallback);
            capture_poster(&video, poster_time(duration), &poster_path)
        }
    })
    .await;
    match poster {
        Ok(Ok(())) => info!(path = %poster_path.display(), "poster frame written"),
        Ok(Err(e)) => warn!(error = %e, "poster frame capture failed"),
        Err(e) => warn!(error = %e, "poster frame capture panicked"),
    }

    Ok((*output).clone())
}
