//! Show source information.

use clipcraft_common::config::AppConfig;
use clipcraft_model::clip::format_timestamp;

use crate::SourceArgs;

pub async fn run(config: &AppConfig, args: SourceArgs) -> anyhow::Result<()> {
    let (source, metadata) = super::open(&args, config.export.metadata_timeout()).await?;

    println!("Source: {}", source.name());
    println!(
        "  Duration: {} ({:.2}s)",
        format_timestamp(metadata.duration_secs),
        metadata.duration_secs
    );
    if metadata.width > 0 && metadata.height > 0 {
        println!("  Dimensions: {}x{}", metadata.width, metadata.height);
    } else {
        let (w, h) = metadata.dimensions_or(
            config.export.fallback_width,
            config.export.fallback_height,
        );
        println!("  Dimensions: unknown (exports at {w}x{h})");
    }

    Ok(())
}
