//! TSR Analyzer - tumor-stroma ratio analysis for Whole Slide Images.
//!
//! This binary wires the subcommands to the library.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image::RgbImage;
use tsr_analyzer::{
    config::{AnalyzeConfig, Cli, Command, ServeConfig, TilesConfig},
    error::SlideError,
    pipeline::AnalyzeRequest,
    render::{
        render_hotspot, render_overlay, render_tumor_front, save_png, DEFAULT_CELL_PIXELS,
    },
    server::{create_router, AppState, RouterConfig},
    slide::{open_slide, PyramidSource},
    tile::{DirectorySink, TileExtractor, TileGrid},
    tissue::TissueMask,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Tiles(config) => run_tiles(config),
        Command::Analyze(config) => run_analyze(config),
        Command::Serve(config) => run_serve(config).await,
    }
}

// =============================================================================
// Tiles Command
// =============================================================================

fn run_tiles(config: TilesConfig) -> ExitCode {
    let analysis = config.analysis.to_config();
    if let Err(e) = analysis.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let source = match open_slide(&config.slide) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to open {}: {}", config.slide.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mask = match TissueMask::detect(source.as_ref(), &analysis.tiling) {
        Ok(mask) => mask,
        Err(e) => {
            error!("Tissue detection failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if mask.is_empty() {
        warn!("No tissue found in {}", config.slide.display());
        return ExitCode::SUCCESS;
    }

    let extractor = match TileExtractor::new(source.as_ref(), &analysis.tiling) {
        Ok(extractor) => extractor,
        Err(e) => {
            error!("Failed to read slide properties: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let dimensions = source.dimensions(0).unwrap_or((0, 0));
    let grid = TileGrid::new(&mask, extractor.extract_size(), dimensions);

    let sink = match DirectorySink::create(&config.out) {
        Ok(sink) => sink,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match extractor.extract_to(&grid, &sink) {
        Ok(summary) => {
            info!(
                "Wrote {} tiles ({}px from {}px footprints) to {}",
                summary.tiles,
                summary.tile_size,
                summary.extract_size,
                config.out.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Tile extraction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Analyze Command
// =============================================================================

fn run_analyze(config: AnalyzeConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let analysis_config = config.analysis.to_config();
    let request = AnalyzeRequest {
        predictions: config.predictions.clone(),
        slide: config.slide.clone(),
        mpp: config.mpp,
        magnification: config.magnification,
        name: None,
        denoised_out: config.denoised_out.clone(),
        config: None,
    };

    let analysis = match request.run(&analysis_config) {
        Ok(analysis) => analysis,
        Err(e) => {
            error!("Analysis failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = &config.hotspot_png {
        let image = render_hotspot(
            &analysis.index,
            analysis.report.hotspot.as_ref(),
            DEFAULT_CELL_PIXELS,
        );
        if let Err(e) = save_png(&image, path) {
            error!("Failed to write hotspot image: {}", e);
            return ExitCode::FAILURE;
        }
        info!("Hotspot image written to {}", path.display());
    }

    let extract_size = analysis.grid.step() as u32;
    if let (Some(path), Some(slide)) = (&config.overlay_png, &config.slide) {
        let written = write_level_render(slide, path, |source, level| {
            render_overlay(source, &analysis.grid, extract_size, level)
        });
        if let Err(e) = written {
            error!("Failed to write overlay image: {}", e);
            return ExitCode::FAILURE;
        }
        info!("Overlay image written to {}", path.display());
    }

    if let (Some(path), Some(slide)) = (&config.tumor_front_png, &config.slide) {
        let written = write_level_render(slide, path, |source, level| {
            render_tumor_front(source, &analysis.grid, extract_size, level)
        });
        if let Err(e) = written {
            error!("Failed to write tumor front image: {}", e);
            return ExitCode::FAILURE;
        }
        info!("Tumor front image written to {}", path.display());
    }

    match serde_json::to_string_pretty(&analysis.report) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Render onto the lowest level of `slide` and save the result as PNG.
fn write_level_render(
    slide: &Path,
    path: &Path,
    render: impl FnOnce(&dyn PyramidSource, usize) -> Result<RgbImage, SlideError>,
) -> Result<(), String> {
    let source = open_slide(slide).map_err(|e| e.to_string())?;
    let level = source.level_count().saturating_sub(1);
    let image = render(source.as_ref(), level).map_err(|e| e.to_string())?;
    save_png(&image, path).map_err(|e| e.to_string())
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let defaults = config.analysis.to_config();
    info!("Configuration:");
    info!("  Max concurrent analyses: {}", config.max_concurrent);
    info!("  Data directory: {}", config.data_dir.display());
    info!(
        "  Hotspot: {} mm diameter, step {}, delta {}",
        defaults.hotspot.diameter_mm, defaults.hotspot.step, defaults.hotspot.delta
    );
    info!("  Component threshold: {}", defaults.denoise.component_threshold);

    let state = AppState::new(
        defaults,
        config.max_concurrent,
        config.data_dir.clone(),
    );
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();
    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/api/jobs", addr);
    info!("────────────────────────────────────────────────────────────────");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new();
    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    router_config.with_tracing(!config.no_tracing)
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tsr_analyzer=debug,tower_http=debug"
    } else {
        "tsr_analyzer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
