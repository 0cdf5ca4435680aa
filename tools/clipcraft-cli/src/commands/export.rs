//! Export a trimmed clip.
//!
//! The exporter publishes into `exports_dir`; the finished clip is copied
//! to the output path before the exporter is torn down, which revokes the
//! staged copy.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clipcraft_capture::backend::default_registry;
use clipcraft_common::config::AppConfig;
use clipcraft_model::clip::{format_timestamp, ClipRange};
use clipcraft_model::overlay::OverlaySpec;
use clipcraft_model::playback::PlaybackSettings;
use clipcraft_render::{ExportOutcome, ExportRequest, Exporter, ExporterConfig, FsArtifactStore};

use crate::SourceArgs;

pub struct ExportOptions {
    pub start: f64,
    pub end: Option<f64>,
    pub mute: bool,
    pub overlay: Option<String>,
    pub output: Option<PathBuf>,
}

pub async fn run(
    config: &AppConfig,
    args: SourceArgs,
    options: ExportOptions,
) -> anyhow::Result<()> {
    let exporter_config = ExporterConfig::from_app_config(config)?;
    let (source, metadata) = super::open(&args, exporter_config.timeouts.metadata).await?;

    let mut range = ClipRange::for_duration(metadata.duration_secs);
    range.set_start(options.start);
    if let Some(end) = options.end {
        range.set_end(end);
    }

    println!("Exporting {}", source.name());
    println!(
        "  Range: {} - {} ({:.2}s)",
        format_timestamp(range.start()),
        format_timestamp(range.end()),
        range.len_secs()
    );
    println!("  Audio: {}", if options.mute { "muted" } else { "on" });
    if let Some(text) = options.overlay.as_deref() {
        println!("  Caption: {text}");
    }

    let store = Arc::new(FsArtifactStore::new(&config.exports_dir));
    let exporter = Exporter::new(exporter_config, Arc::new(default_registry()), store);
    exporter.load_source(source)?;

    let mut status = exporter.subscribe();
    let printer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if current.state.is_active() {
                println!("  [{}] {}", current.state, current.message);
            }
        }
    });

    let request = ExportRequest {
        range,
        settings: PlaybackSettings::new(1.0, options.mute),
        overlay: options.overlay.map(OverlaySpec::new),
    };
    let outcome = exporter.export(request).await;
    printer.abort();

    match outcome {
        ExportOutcome::Done(info) => {
            let target = options
                .output
                .unwrap_or_else(|| PathBuf::from(&info.suggested_filename));
            std::fs::copy(&info.url, &target)
                .with_context(|| format!("Failed to save {}", target.display()))?;
            tracing::info!(
                from = %info.url,
                to = %target.display(),
                bytes = info.byte_size,
                "Clip saved"
            );

            let message = exporter.status().message;
            if message != "Done" {
                println!("{message}");
            }
            println!("Export complete: {}", target.display());
            println!("  Type: {}", info.mime_type);
            println!("  Size: {}", info.display_size());
            println!("  Duration: {:.2}s", info.duration_secs);
            println!("  Audio track: {}", if info.has_audio { "yes" } else { "no" });
            Ok(())
        }
        ExportOutcome::Failed(message) => anyhow::bail!(message),
        ExportOutcome::Rejected(reason) => anyhow::bail!("Export rejected: {reason:?}"),
    }
}
