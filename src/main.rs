use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shortsmith::assets::{create_assets, Services};
use shortsmith::config::{Config, Credentials, Flags};
use shortsmith::metadata::Job;
use shortsmith::render::{render, RenderRequest};
use shortsmith::upload::{self, oauth, Privacy, SlidesData, UploadAuth, UploadOptions};

#[derive(Parser)]
#[command(name = "shortsmith")]
#[command(about = "Turn a topic into a captioned vertical short", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to ./shortsmith.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate script, voiceover, word timings and images
    Assets(JobArgs),
    /// Render a metadata file into a video
    Render {
        #[arg(short, long)]
        metadata: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(long)]
        music: Option<PathBuf>,
    },
    /// Upload a video as a YouTube Short
    Upload {
        video: PathBuf,
        #[command(flatten)]
        args: UploadArgs,
    },
    /// Assets, render and optionally upload in one go
    Run {
        #[command(flatten)]
        job: JobArgs,
        #[arg(long)]
        upload: bool,
        #[command(flatten)]
        args: UploadArgs,
    },
}

#[derive(Args)]
struct JobArgs {
    #[arg(long)]
    topic: String,
    #[arg(long)]
    voice: String,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Comma-separated
    #[arg(long)]
    tags: Option<String>,
    /// private, public or unlisted
    #[arg(long)]
    privacy: Option<String>,
    /// Take title and description from the slides data file
    #[arg(long)]
    use_slides_data: bool,
    #[arg(long)]
    slides_path: Option<PathBuf>,
    #[arg(long)]
    client_secret: Option<PathBuf>,
}

impl UploadArgs {
    async fn options(&self, config: &Config) -> anyhow::Result<UploadOptions> {
        let mut options = if self.use_slides_data {
            let path = self
                .slides_path
                .clone()
                .unwrap_or_else(|| config.paths.slides_data.clone());
            let slides = SlidesData::load(&path)
                .await
                .with_context(|| format!("could not read slides data {}", path.display()))?;
            info!(path = %path.display(), "using slides data");
            slides.options(&config.upload)
        } else {
            UploadOptions::new(&config.upload)
        };

        if let Some(title) = &self.title {
            options.title = title.clone();
        }
        if let Some(description) = &self.description {
            options.description = Some(description.clone());
        }
        if let Some(tags) = &self.tags {
            options.tags = Some(upload::parse_tags(tags));
        }
        if let Some(privacy) = &self.privacy {
            match privacy.parse::<Privacy>() {
                Ok(p) => options.privacy = Some(p),
                Err(e) => warn!(error = %e, "ignoring --privacy"),
            }
        }
        Ok(options)
    }

    fn auth(&self, config: &Config) -> UploadAuth {
        UploadAuth {
            client_secret: self
                .client_secret
                .clone()
                .unwrap_or_else(|| config.paths.client_secret.clone()),
            token_dir: config
                .upload
                .token_dir
                .clone()
                .unwrap_or_else(oauth::default_token_dir),
        }
    }

    async fn upload(&self, config: &Config, video: &Path) -> anyhow::Result<()> {
        let options = self.options(config).await?;
        upload::upload_shorts(video, &options, &config.upload, &self.auth(config))
            .await
            .context("upload failed")?;
        Ok(())
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "shortsmith=debug"
    } else {
        "shortsmith=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn assets(config: &Config, job: &JobArgs) -> anyhow::Result<PathBuf> {
    let flags = Flags::from_env();
    let services = Services::from_credentials(config, &Credentials::from_env(), &flags)?;
    let job = Job::new(&job.topic, &job.voice);
    let metadata = create_assets(&job, config, &flags, &services)
        .await
        .with_context(|| format!("asset generation failed for job {}", job.id))?;
    Ok(metadata)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("could not load configuration")?;

    match cli.command {
        Command::Assets(job) => {
            let metadata = assets(&config, &job).await?;
            println!("{}", metadata.display());
        }
        Command::Render {
            metadata,
            output,
            title,
            music,
        } => {
            let request = RenderRequest {
                metadata,
                output,
                title,
                music,
            };
            let video = render(&config, &request).await.context("render failed")?;
            println!("{}", video.display());
        }
        Command::Upload { video, args } => args.upload(&config, &video).await?,
        Command::Run { job, upload, args } => {
            let metadata = assets(&config, &job).await?;
            let request = RenderRequest {
                metadata,
                ..Default::default()
            };
            let video = render(&config, &request).await.context("render failed")?;
            println!("{}", video.display());
            if upload {
                args.upload(&config, &video).await?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
