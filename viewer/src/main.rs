//! Viewer
//!
//! Opens a window, renders the demo scene until the window closes and tears
//! the renderer down. An optional argument names a TOML or RON config file.

mod demo;
mod window;

use log::{error, info, warn};
use present_engine::foundation::logging;
use present_engine::prelude::*;

use window::{GlfwWindow, WindowSignal};

/// Config from the optional path argument, and the load error if it failed
fn load_config() -> (RendererConfig, Option<String>) {
    let defaults = RendererConfig::new("Present Engine Viewer");
    match std::env::args().nth(1) {
        Some(path) => match RendererConfig::load_from_file(&path) {
            Ok(config) => (config, None),
            Err(e) => (defaults, Some(format!("Could not load {path}: {e}; using defaults"))),
        },
        None => (defaults, None),
    }
}

fn run(config: RendererConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (width, height) = config.initial_extent;
    let window = GlfwWindow::new(&config.application_name, width, height)?;
    let scene = demo::quad_scene()?;

    let mut renderer = create_renderer(window, config)?;
    renderer.initialize_device()?;
    renderer.bind_surface()?;
    renderer.bind_resources(&scene)?;

    let result = render_loop(&mut renderer, &scene);
    let stats = renderer.stats();
    renderer.destroy();
    info!(
        "Presented {} frame(s), dropped {}, {} swapchain recreation(s)",
        stats.frames_presented, stats.frames_dropped, stats.recreations
    );
    result
}

fn render_loop(renderer: &mut VulkanRenderer<GlfwWindow>, scene: &Scene) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let window = renderer.instance_mut().provider_mut();
        if window.should_close() {
            return Ok(());
        }
        let signals = window.poll();
        for signal in signals {
            match signal {
                WindowSignal::Resized(width, height) => renderer.request_resize(ResizeEvent { width, height }),
                WindowSignal::Close => return Ok(()),
            }
        }

        match renderer.render_frame(scene) {
            Ok(FrameOutcome::Skipped) => renderer.instance_mut().provider_mut().wait(),
            Ok(_) => {}
            Err(e) => {
                match e.phase() {
                    Some(phase) => error!("Fatal error during {phase}: {e}"),
                    None => error!("Fatal error: {e}"),
                }
                return Err(e.into());
            }
        }
    }
}

fn main() {
    let (config, load_error) = load_config();
    logging::init_with_level(logging::parse_level(&config.log_level).unwrap_or(log::LevelFilter::Info));
    if let Some(message) = load_error {
        warn!("{message}");
    }

    if let Err(e) = run(config) {
        error!("Viewer failed: {e}");
        std::process::exit(1);
    }
}
