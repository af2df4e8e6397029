// =============================================================================
// VOXEL-RENDERER - a triangle on raw Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, window title)                    │
// │    └── Renderer                                                 │
// │          └── Instance -> Surface -> Adapter -> Device           │
// │                └── Swapchain + Render Pass + Pipeline           │
// │                      └── Command Buffers + Sync objects         │
// └─────────────────────────────────────────────────────────────────┘
//
// Usage: voxel-renderer [path/to/config.toml]
//
// =============================================================================

mod backend;
mod config;
mod fps;
mod hot_reload;
mod renderer;
mod vertex;

use anyhow::{Context, Result};
use config::{Config, KeyBindings};
use fps::FrameTimer;
use hot_reload::ShaderWatcher;
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());

    // The logger itself is configured from the file, so load before logging
    // and report any problem once the logger is up
    let loaded = Config::load_from_path(&config_path);
    let default_debug = config::DebugConfig::default();
    init_logging(loaded.as_ref().map_or(&default_debug, |c| &c.debug))?;

    let config = match loaded {
        Ok(config) => {
            config.log_source(&config_path);
            config
        }
        Err(e) => {
            log::warn!("Failed to load {}: {:#}. Using defaults.", config_path, e);
            Config::default()
        }
    };

    log::info!("Starting voxel-renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging, optionally into a truncated log file
fn init_logging(config: &config::DebugConfig) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.log_file))?;

        writeln!(file, "=== voxel-renderer log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Log an error the app keeps running through; true on success
fn log_failure(what: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::error!("{}: {:#}", what, e);
            false
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    bindings: KeyBindings,

    // Declared before the window so Vulkan is torn down first
    renderer: Option<Renderer>,
    shader_watcher: Option<ShaderWatcher>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    frame_timer: FrameTimer,
}

impl App {
    fn new(config: Config) -> Self {
        let bindings = config.controls.bindings();
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            bindings,
            renderer: None,
            shader_watcher: None,
            window: None,
            is_fullscreen,
            frame_timer: FrameTimer::new(Instant::now()),
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;
        Ok(Arc::new(window))
    }

    /// Hot-reload is a convenience; failing to watch only logs
    fn start_shader_watcher(&mut self) {
        if !self.config.shaders.hot_reload {
            return;
        }

        match ShaderWatcher::new(&self.config.shaders.watch_dirs()) {
            Ok(watcher) => self.shader_watcher = Some(watcher),
            Err(e) => log::warn!("Shader hot-reload disabled: {:#}", e),
        }
    }

    fn reload_shaders(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            log_failure(
                "Shader reload failed, keeping previous pipeline",
                renderer.reload_shaders(),
            );
        }
    }

    fn redraw(&mut self) {
        let changed = self
            .shader_watcher
            .as_ref()
            .is_some_and(ShaderWatcher::take_changed);
        if changed {
            self.reload_shaders();
        }

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render_frame() {
            Ok(true) => self.update_fps(),
            Ok(false) => {}
            Err(e) => log::error!("Render error: {:?}", e),
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.request_recreate();
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let Some(sample) = self.frame_timer.tick(Instant::now()) {
            if let Some(window) = self.window.as_ref() {
                window.set_title(&sample.title(&self.config.window.title, self.is_fullscreen));
            }
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        if Some(key) == self.bindings.quit {
            log::info!("{:?} pressed, exiting...", key);
            event_loop.exit();
        } else if Some(key) == self.bindings.fullscreen {
            self.toggle_fullscreen();
        } else if Some(key) == self.bindings.reload_shaders {
            self.reload_shaders();
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(e) => {
                log::error!("{:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.start_shader_watcher();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.as_ref() {
                    log_failure("Failed to wait for GPU idle", renderer.wait_idle());
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.redraw(),

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear Vulkan down while the window still exists
        self.shader_watcher = None;
        self.renderer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_reported_not_swallowed() {
        assert!(log_failure("wait", Ok(())));
        assert!(!log_failure("wait", Err(anyhow::anyhow!("device lost"))));
    }
}
