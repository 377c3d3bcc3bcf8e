//! camwatchd - network camera watcher daemon
//!
//! This daemon:
//! 1. Loads device and classifier configuration
//! 2. Builds the classifier, label map and notification queue shared by all devices
//! 3. Runs one event loop thread per active device
//! 4. Logs device health periodically until Ctrl-C, then stops every device

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use camwatch::detect::{LabelMap, RemoteClassifier, StubClassifier};
use camwatch::{
    spawn_devices, CamwatchConfig, ClassifierKind, ClassifierSettings, NotificationQueue,
    PipelineContext, SharedClassifier, WebhookNotifier,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch network cameras for motion and objects")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Run only the named device (repeatable).
    #[arg(long = "device", value_name = "NAME")]
    devices: Vec<String>,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CamwatchConfig::load_from(args.config.as_deref())?;
    cfg.retain_devices(&args.devices)?;

    if args.check {
        log::info!(
            "camwatchd: configuration ok ({} devices, classifier {:?})",
            cfg.devices.len(),
            cfg.classifier.kind
        );
        return Ok(());
    }
    if cfg.devices.is_empty() {
        return Err(anyhow!("no devices configured"));
    }

    let mut ctx = PipelineContext::from_config(&cfg);
    ctx.classifier = build_classifier(&cfg.classifier)?;
    if let Some(labels) = &cfg.classifier.labels {
        let labels = LabelMap::from_file(labels)?;
        log::info!("camwatchd: loaded {} labels", labels.len());
        ctx.labels = Arc::new(labels);
    }

    let notifications = NotificationQueue::spawn(Arc::new(WebhookNotifier::new()))?;
    ctx.notifier = notifications.notifier();

    let handles = spawn_devices(&cfg.devices, &ctx)?;
    drop(ctx);
    log::info!(
        "camwatchd running: {} devices, classifier {:?}, reconnect delay {:?}",
        handles.len(),
        cfg.classifier.kind,
        cfg.reconnect_delay
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                for handle in &handles {
                    let stats = handle.stats();
                    log::info!(
                        "camwatchd health: device={} state={:?} frames={} events={} reconnects={}",
                        handle.name(),
                        stats.state,
                        stats.frames_processed,
                        stats.events,
                        stats.reconnects
                    );
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping devices...");
    for handle in &handles {
        handle.cancel();
    }
    for handle in handles {
        handle.stop()?;
    }
    notifications.shutdown();
    log::info!("camwatchd stopped");
    Ok(())
}

/// One classifier instance serves every device; `predict` takes `&self`.
fn build_classifier(settings: &ClassifierSettings) -> Result<Option<SharedClassifier>> {
    let classifier: SharedClassifier = match settings.kind {
        ClassifierKind::None => return Ok(None),
        ClassifierKind::Stub => Arc::new(StubClassifier::default()),
        ClassifierKind::Remote => {
            let url = settings
                .url
                .as_deref()
                .ok_or_else(|| anyhow!("remote classifier requires a url"))?;
            Arc::new(RemoteClassifier::new(url)?)
        }
        ClassifierKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                let model = settings
                    .model
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract classifier requires a model path"))?;
                Arc::new(camwatch::detect::TractClassifier::new(
                    model,
                    settings.input_width,
                    settings.input_height,
                )?)
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "tract classifier requires the backend-tract feature"
                ));
            }
        }
    };
    classifier.warm_up()?;
    log::info!("camwatchd: classifier '{}' ready", classifier.name());
    Ok(Some(classifier))
}
