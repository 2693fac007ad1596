//! capture_dataset - record labeled training images from the camera.
//!
//! With `--name`, captures one batch and exits. Without it, prompts for a set
//! name before each batch until an empty name (or `q`) is entered.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use vision_relay::ingest::{open_source, FrameSource};
use vision_relay::{CancelToken, DatasetCapture, Preprocessor, RelayConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture batches of labeled grayscale training images from the camera"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "VISION_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Camera IP or URL. A bare IP becomes http://<ip>/capture.
    #[arg(long)]
    camera: Option<String>,

    /// Set name (file prefix). Prompts interactively when omitted.
    #[arg(long)]
    name: Option<String>,

    /// Images per batch.
    #[arg(long)]
    count: Option<u32>,

    /// Output directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pause between saved images, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let mut cfg = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(camera) = args.camera.as_deref() {
        cfg.set_camera(camera);
    }
    if let Some(count) = args.count {
        cfg.capture.batch_size = count;
    }
    if let Some(output) = args.output {
        cfg.capture.output_dir = output;
    }
    if let Some(ms) = args.interval_ms {
        cfg.capture.interval = Duration::from_millis(ms);
    }
    cfg.validate()?;

    let mut source = {
        let _stage = ui.stage("Open camera");
        open_source(&cfg.camera.url, cfg.camera.timeout)?
    };

    let capture = DatasetCapture::new(
        Preprocessor::new(cfg.model.shape, cfg.model.layout),
        cfg.capture.output_dir.clone(),
        cfg.capture.batch_size,
        cfg.capture.interval,
        cfg.camera.backoff,
    );
    log::info!(
        "capturing {}x{} grayscale images from {} into {}",
        cfg.model.shape.width,
        cfg.model.shape.height,
        source.describe(),
        capture.output_dir().display()
    );

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel()).context("error setting Ctrl-C handler")?;

    match args.name {
        Some(name) => {
            run_batch(&capture, &mut source, &name, &cancel, &ui)?;
        }
        None => loop {
            let Some(name) = prompt_set_name()? else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }
            if !run_batch(&capture, &mut source, &name, &cancel, &ui)? {
                break;
            }
        },
    }
    Ok(())
}

/// Returns false when the batch was interrupted.
fn run_batch(
    capture: &DatasetCapture,
    source: &mut Box<dyn FrameSource + Send>,
    name: &str,
    cancel: &CancelToken,
    ui: &ui::Ui,
) -> Result<bool> {
    log::info!(
        "starting batch of {} images for '{}'",
        capture.batch_size(),
        name
    );
    let progress = ui.batch(name, capture.batch_size());
    let report = capture.capture_batch(source, name, cancel, |count| progress.saved(count))?;
    progress.finish();

    if report.failed_fetches > 0 {
        log::warn!(
            "{} fetches failed during batch '{}'",
            report.failed_fetches,
            name
        );
    }
    if report.interrupted {
        log::warn!(
            "batch '{}' interrupted after {} images",
            name,
            report.saved.len()
        );
        return Ok(false);
    }
    log::info!("set '{}' saved ({} images)", name, report.saved.len());
    Ok(true)
}

fn prompt_set_name() -> Result<Option<String>> {
    eprint!("Set name for the next batch (e.g. Triangulo; empty or q to quit): ");
    std::io::stderr().flush().context("flush prompt")?;
    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read set name")?;
    let name = line.trim();
    if read == 0 || name.is_empty() || name.eq_ignore_ascii_case("q") {
        return Ok(None);
    }
    Ok(Some(name.to_string()))
}
