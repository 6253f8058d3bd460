// =============================================================================
// CAPTURE RENDERER - Vulkan model viewer that records every presented frame
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  AppWindow (winit, pumped between frames)                       │
// │    └── Renderer                                                 │
// │          └── Vulkan Device + SwapchainResources                 │
// │                └── FrameScheduler (fences, semaphores)          │
// │                      └── FrameCapture → encoder threads → BMP   │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod app;
mod backend;
mod capture;
mod config;
mod error;
mod mesh;
mod renderer;
mod scheduler;
mod uniform;
mod window;

use anyhow::Result;
use config::Config;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Instant;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting capture renderer");

    let start = Instant::now();

    // Failures are reported, never turned into a failing exit status
    if let Err(e) = app::run(&config) {
        log::error!("Renderer stopped with an error: {:?}", e);
    }

    log::info!("Elapsed: {:.3} s", start.elapsed().as_secs_f64());
    Ok(())
}

/// Initialize logging, optionally redirecting all output to a log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG still wins over the default level
    builder.parse_default_env();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Capture Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}
