//! The reference embedder binary: loads a config file, brings up one
//! [`rale::Engine`], and drives its `tick()` loop until a signal requests
//! shutdown (spec.md §4.9, §6).
//!
//! Everything this binary does beyond that — argument parsing, log sink
//! configuration, the operator CLI, the HTTP admin surface, the watchdog
//! integration — is out of scope for the core (spec.md §1) and is not
//! reimplemented here; this is a minimal driver, not the product CLI.

use std::time::Duration;

use rale::{Config, Engine};

#[tokio::main]
async fn main() {
    env_logger_init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "rale.toml".to_string());
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    let mut engine = match Engine::init(config).await {
        Ok(e) => e,
        Err(e) => {
            log::error!("engine init failed: {e}");
            std::process::exit(1);
        }
    };

    log::info!("rale node started, role={:?}", engine.role());

    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.tick() {
                    log::warn!("tick error: {e}");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested");
                break;
            }
        }
    }

    engine.finit(Duration::from_secs(5)).await.ok();
}

/// Initializes the `log` facade's sink. The text log formatter itself is an
/// external collaborator (spec.md §1); this just wires up a reasonable
/// default so the binary is runnable standalone.
fn env_logger_init() {
    let _ = env_logger::try_init();
}
