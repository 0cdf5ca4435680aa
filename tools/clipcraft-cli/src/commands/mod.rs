pub mod check;
pub mod export;
pub mod info;

use std::time::Duration;

use anyhow::Context;
use clipcraft_capture::backend::{open_source, SyntheticConfig, SyntheticSource};
use clipcraft_capture::source::{MediaSource, SourceMetadata};

use crate::SourceArgs;

/// Open the requested source and wait for its metadata.
pub async fn open(
    args: &SourceArgs,
    timeout: Duration,
) -> anyhow::Result<(Box<dyn MediaSource>, SourceMetadata)> {
    let mut source: Box<dyn MediaSource> = match (&args.input, args.synthetic) {
        (_, Some(secs)) => Box::new(SyntheticSource::new(SyntheticConfig {
            duration_secs: secs,
            ..SyntheticConfig::default()
        })),
        (Some(path), None) => {
            open_source(path).with_context(|| format!("Failed to open {}", path.display()))?
        }
        (None, None) => anyhow::bail!("No input given (pass a file or --synthetic SECS)"),
    };

    let metadata = tokio::time::timeout(timeout, source.wait_metadata())
        .await
        .context("Timed out waiting for source metadata")??;
    if !metadata.is_loaded() {
        anyhow::bail!("Source reports no usable duration");
    }
    Ok((source, metadata))
}
