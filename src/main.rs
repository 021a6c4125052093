// src/main.rs
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use region_edit::services::{
    ChatOcrClient, DetectionParams, EditService, HttpDetectionClient, HttpEditClient,
    RetryingEditService,
};
use region_edit::{
    Image, ImageStore, Picture, ProcessConfig, ProcessScope, Region, RegionProcessor,
    RegionSource, ServiceConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "region-edit",
    about = "Edit marked regions of an image with a generative edit service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one image and write the stitched result.
    Run {
        /// Source image.
        #[arg(short, long, value_name = "FILE")]
        image: PathBuf,

        /// JSON array of regions in percent coordinates. When omitted the
        /// regions come from --detector-url, or the whole image is edited.
        #[arg(short, long, value_name = "FILE")]
        regions: Option<PathBuf>,

        /// Output PNG.
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,

        /// Processing options as JSON.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Region detector endpoint used when no regions file is given.
        #[arg(long, value_name = "URL")]
        detector_url: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionInput {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    prompt: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    match Cli::parse().command {
        Command::Run {
            image,
            regions,
            out,
            config,
            detector_url,
        } => run(&image, regions.as_deref(), &out, config.as_deref(), detector_url).await,
    }
}

async fn run(
    image_path: &Path,
    regions_path: Option<&Path>,
    out: &Path,
    config_path: Option<&Path>,
    detector_url: Option<String>,
) -> anyhow::Result<()> {
    let process_config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ProcessConfig::from_json(&raw)?
        }
        None => ProcessConfig::default(),
    };
    let service_config = ServiceConfig::from_env()?;
    let ocr = ChatOcrClient::from_config(&service_config);
    if process_config.ocr_context && ocr.is_none() {
        bail!("ocrContext is enabled but REGION_EDIT_OCR_MODEL is not set");
    }

    let bytes = std::fs::read(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;
    let picture = Picture::from_bytes(&bytes)?;
    let name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let mut source = Image::new(name, picture);
    if let Some(path) = regions_path {
        source.regions = load_regions(path)?;
    }
    let image_id = source.id;

    let store = ImageStore::new(vec![source]);
    let editor: Arc<dyn EditService> = Arc::new(RetryingEditService::from_config(
        HttpEditClient::new(service_config.clone()),
        &service_config,
    ));
    let mut processor = RegionProcessor::new(store.clone(), editor);
    if let Some(ocr) = ocr {
        processor = processor.with_ocr(Arc::new(ocr));
    }

    if regions_path.is_none() {
        if let Some(url) = detector_url {
            processor = processor.with_detector(Arc::new(HttpDetectionClient::new(url)));
            let found = processor
                .detect_regions(image_id, &DetectionParams::default())
                .await?;
            info!("Detector found {} regions", found.len());
        }
    }

    let mut progress = store.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last = usize::MAX;
        while progress.changed().await.is_ok() {
            let done: usize = progress.borrow().iter().map(|i| i.completed_count()).sum();
            if done != last {
                info!("{} regions completed", done);
                last = done;
            }
        }
    });

    let cancel = CancellationToken::new();
    let run = processor.process(ProcessScope::All, &process_config, &cancel);
    tokio::pin!(run);
    let summary = tokio::select! {
        summary = &mut run => summary?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cancelling outstanding edits");
            cancel.cancel();
            run.await?
        }
    };
    watcher.abort();

    info!(
        "Submitted {}, completed {}, failed {}, reset {}",
        summary.submitted, summary.completed, summary.failed, summary.reset
    );
    if summary.cancelled {
        bail!("processing was cancelled");
    }

    let image = store.get(image_id)?;
    let result = image
        .final_result
        .as_ref()
        .or(image.full_ai_result.as_ref())
        .context("no edited result was produced")?;
    std::fs::write(out, result.to_png_bytes()?)
        .with_context(|| format!("writing {}", out.display()))?;
    info!("Wrote {}", out.display());
    Ok(())
}

fn load_regions(path: &Path) -> anyhow::Result<Vec<Region>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let inputs: Vec<RegionInput> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;

    inputs
        .into_iter()
        .map(|input| {
            let mut region = Region::new(
                input.x,
                input.y,
                input.width,
                input.height,
                RegionSource::Manual,
            );
            region.prompt = input.prompt;
            region.validate()?;
            Ok(region)
        })
        .collect()
}
