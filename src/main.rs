use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facemark::{config, provider, server, AnnotateOptions, DetectorService};
use log::info;

#[derive(Parser)]
#[command(name = "facemark")]
#[command(version, about = "Draw 68-point facial landmarks onto uploaded images")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the annotation endpoint
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
    /// Annotate a local image and write the result as JPEG
    Annotate {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        line_thickness: Option<NonZeroU32>,
        #[arg(long)]
        point_size: Option<u32>,
    },
    /// Download the model files and exit
    FetchModels,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            server::serve(cfg).await
        }
        Commands::Annotate {
            input,
            output,
            line_thickness,
            point_size,
        } => annotate_file(&cfg, &input, &output, line_thickness, point_size).await,
        Commands::FetchModels => {
            provider::ensure_models(&cfg)
                .await
                .context("provisioning models")?;
            info!("Models ready in {}", cfg.model_dir.display());
            Ok(())
        }
    }
}

async fn annotate_file(
    cfg: &config::Config,
    input: &std::path::Path,
    output: &std::path::Path,
    line_thickness: Option<NonZeroU32>,
    point_size: Option<u32>,
) -> Result<()> {
    provider::ensure_models(cfg)
        .await
        .context("provisioning models")?;

    let detector = DetectorService::new(
        &cfg.detector_model_path(),
        &cfg.landmark_model_path(),
        cfg.detector_options(),
    )
    .context("loading face detector")?;

    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let options = AnnotateOptions {
        style: cfg.render_style().with_overrides(line_thickness, point_size),
        backdrop: cfg.backdrop.into(),
        jpeg_quality: cfg.jpeg_quality,
    };

    let annotated = facemark::annotate(&detector, &bytes, &options)
        .with_context(|| format!("annotating {}", input.display()))?;
    std::fs::write(output, &annotated.jpeg)
        .with_context(|| format!("writing {}", output.display()))?;

    info!(
        "✓ {} face(s) annotated, written to {}",
        annotated.faces,
        output.display()
    );
    Ok(())
}
