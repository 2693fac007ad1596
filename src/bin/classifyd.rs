//! classifyd - camera classification daemon
//!
//! This daemon:
//! 1. Opens the actuator link (serial, TCP, MQTT, or stdout)
//! 2. Loads the classifier and checks it against the label list
//! 3. Pulls frames from the camera, smoothing per-frame scores over K frames
//! 4. Writes `<label>\n` to the link each time the confident label changes
//! 5. Stops on Ctrl-C or `q` + Enter, releasing the link

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

use vision_relay::classify::{build_classifier, probe_output_len};
use vision_relay::ingest::open_source;
use vision_relay::{
    open_link, AcquisitionLoop, CancelToken, DebounceNotifier, DecisionResolver, Preprocessor,
    RelayConfig, SmoothingWindow,
};

#[allow(dead_code)]
#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Classify camera frames and announce debounced label changes"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "VISION_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Camera IP or URL. A bare IP becomes http://<ip>/capture.
    #[arg(long)]
    camera: Option<String>,

    /// Actuator link: serial device, tcp://host:port, mqtt://host/topic, or "-".
    #[arg(long)]
    link: Option<String>,

    /// ONNX model path (requires the backend-tract feature).
    #[arg(long)]
    model: Option<PathBuf>,

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
    if let Some(link) = args.link {
        cfg.link.target = link;
    }
    if let Some(model) = args.model {
        cfg.model.path = Some(model);
    }
    cfg.validate()?;
    let labels = cfg.label_map()?;

    // Opened first so every later setup failure exercises its release.
    let link = {
        let _stage = ui.stage("Open actuator link");
        open_link(&cfg.link)?
    };

    let classifier = {
        let _stage = ui.stage("Load classifier");
        let mut classifier = build_classifier(&cfg.model, &labels)?;
        probe_output_len(&mut classifier, cfg.model.layout, &labels)?;
        classifier
    };
    log::info!(
        "classifier '{}' ready: input {}, {} labels",
        classifier.name(),
        classifier.input_shape(),
        labels.len()
    );

    let source = open_source(&cfg.camera.url, cfg.camera.timeout)?;
    log::info!("camera: {}", source.describe());

    let cancel = CancelToken::new();
    install_cancel_handlers(&cancel)?;

    let mut pipeline = AcquisitionLoop::new(
        source,
        classifier,
        Preprocessor::new(cfg.model.shape, cfg.model.layout),
        SmoothingWindow::new(cfg.smoothing.window_size, labels.len())?,
        DecisionResolver::new(labels, cfg.smoothing.threshold),
        DebounceNotifier::new(link),
        cfg.camera.backoff,
    )?;

    log::info!("system ready. press q + Enter or Ctrl-C to stop");
    let result = pipeline.run(&cancel);

    let mut link = pipeline.into_notifier().into_link();
    if let Err(e) = link.flush() {
        log::warn!("final link flush failed: {}", e);
    }
    drop(link);
    log::info!("actuator link closed");

    let stats = result?;
    log::info!(
        "shutdown: iterations={} faults={} decisions={} sent={} suppressed={} transport_failures={}",
        stats.iterations,
        stats.faults,
        stats.decisions,
        stats.sent,
        stats.suppressed,
        stats.transport_failures
    );
    Ok(())
}

fn install_cancel_handlers(cancel: &CancelToken) -> Result<()> {
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel()).context("error setting Ctrl-C handler")?;

    let on_quit = cancel.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                log::info!("quit requested");
                on_quit.cancel();
                break;
            }
        }
    });
    Ok(())
}
