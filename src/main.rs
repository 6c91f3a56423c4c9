// =============================================================================
// FRAME ENGINE - Clear-screen demo on top of the frame lifecycle core
// =============================================================================
//
// The binary is a thin winit shim. Everything GPU-related lives in the
// frame_engine library; this file only owns the window and the event loop.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input, resize)                       │
// │    └── Renderer                                                 │
// │          └── Device + Swapchain + Render passes                 │
// │                └── Command buffers (one per frame)              │
// │                      └── Synchronization (fence, semaphores)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. update(delta) - FPS counter, config hot reload
// 2. Acquire swapchain image
// 3. Record a clear of that image
// 4. Wait for previous frame, submit
// 5. Present rendered image to screen
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use frame_engine::{Config, ConfigWatcher, Renderer};
use frame_engine::backend::VulkanInstance;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting frame engine");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Configured level first, RUST_LOG on top of it
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_env(Env::default());
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer holds the surface
/// for the window, so it must go before the window does.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // GPU
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer<VulkanInstance>>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,
    watcher: Option<ConfigWatcher>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let watcher = match ConfigWatcher::new(frame_engine::config::DEFAULT_PATH) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Config hot reload disabled: {:#}", e);
                None
            }
        };

        let now = Instant::now();
        Self {
            renderer: None,
            window: None,
            config,
            watcher,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Per-tick bookkeeping before the frame is drawn.
    fn update(&mut self, delta_seconds: f32) {
        if let Some(config) = self.watcher.as_ref().and_then(ConfigWatcher::poll) {
            if config.graphics.clear_color != self.config.graphics.clear_color {
                log::info!("Clear color is now {:?}", config.graphics.clear_color);
            }
            self.config = config;
        }

        self.update_fps(delta_seconds);
    }

    fn update_fps(&mut self, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        event_loop.exit();
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

        // Create window with settings from config
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        // Bring the GPU up for it
        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        match Renderer::for_window(&*window, extent, &self.config.renderer_settings()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {}", e);
                event_loop.exit();
                return;
            }
        }

        self.last_frame_time = Instant::now();
        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let delta = now.duration_since(self.last_frame_time).as_secs_f32();
                self.last_frame_time = now;
                self.update(delta);

                let clear_color = self.config.clear_color();
                if let Some(ref mut renderer) = self.renderer {
                    if let Err(e) = renderer.render_frame(clear_color) {
                        log::error!("Render error: {}", e);
                        self.shutdown(event_loop);
                    }
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
