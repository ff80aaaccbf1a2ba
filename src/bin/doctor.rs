//! Configuration doctor: loads engine config and reports which speech
//! providers are usable.

use palaver::provider::ProviderKind;
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("palaver-doctor failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> palaver::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("palaver.toml"));

    let config = if path.exists() {
        println!("config: {}", path.display());
        palaver::EngineConfig::load(&path)?
    } else {
        println!("config: {} not found, using defaults", path.display());
        palaver::EngineConfig::default()
    };

    let gateway = palaver::ProviderGateway::from_config(&config.providers)?;
    let available = gateway.available();

    println!();
    for kind in ProviderKind::ALL {
        let status = if available.contains(&kind) {
            "configured"
        } else {
            "omitted (no credentials)"
        };
        println!("  {kind:<12} {status}");
    }

    println!();
    println!("default stt: {}", config.providers.default_stt);
    println!("default tts: {}", config.providers.default_tts);
    println!("stt fallback order: {:?}", gateway.stt_chain(None));
    println!("tts fallback order: {:?}", gateway.tts_chain(None));

    if available.is_empty() {
        println!();
        println!("warning: no providers configured; sessions cannot transcribe or speak");
    }
    Ok(())
}
