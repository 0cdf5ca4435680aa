//! List output types and whether this build can encode them.

use clipcraft_capture::backend::default_registry;
use clipcraft_capture::codec::{parse_preferences, select_codec};
use clipcraft_capture::pipeline::EncoderBackend;
use clipcraft_common::config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("ClipCraft Encoder Check");
    println!("{}", "=".repeat(50));

    let registry = default_registry();
    let names: Vec<&str> = registry.backends().map(|b| b.name()).collect();
    println!("Backends: {}", names.join(", "));
    println!();

    let candidates = parse_preferences(&config.export.codec_preferences)?;
    for candidate in &candidates {
        let status = if registry.is_type_supported(candidate) {
            "[OK]  "
        } else {
            "[--]  "
        };
        let audio = if candidate.supports_audio() {
            "video+audio"
        } else {
            "video only"
        };
        println!("{status}{candidate} ({audio}, .{})", candidate.extension());
    }

    println!();
    let chosen = select_codec(&candidates, &registry)?;
    if registry.is_type_supported(chosen) {
        println!("Exports will use: {chosen}");
    } else {
        println!("No configured output type is supported; exports will fail.");
    }

    Ok(())
}
