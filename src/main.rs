// =============================================================================
// VKPONG - Vulkan bring-up for a 2D game
// =============================================================================
//
// Opens a window, brings up Vulkan and draws one hard-coded triangle every
// frame until the window is closed.
//
// FRAME FLOW:
// 1. winit delivers window events (resize, keys, close)
// 2. Wait for the frame slot's fence
// 3. Acquire swapchain image
// 4. Record + submit the triangle draw
// 5. Present
//
// =============================================================================

mod backend;
mod config;
mod renderer;
mod vertex;

use anyhow::Result;
use config::Config;
use renderer::Renderer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Optional config path as the only argument
    let config = Config::load(std::env::args_os().nth(1).map(PathBuf::from));

    init_logging(&config);
    log::info!("Starting VkPong");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, frames in flight: {}",
        config.graphics.present_mode,
        config.frames_in_flight()
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Level from the config, overridable with RUST_LOG; optionally to a file
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();

    if config.debug.log_to_file {
        match std::fs::File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!(
                    "Failed to create log file {}: {}. Logging to stderr.",
                    config.debug.log_file.display(),
                    e
                );
            }
        }
    }

    builder.init();
}

// =============================================================================
// FPS TRACKING
// =============================================================================

/// Frame statistics, reported once per second
struct FpsCounter {
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    const REPORT_INTERVAL: Duration = Duration::from_secs(1);

    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Count a presented frame; returns (fps, frame time in ms) once per interval
    fn tick(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report);
        if elapsed < Self::REPORT_INTERVAL {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.frame_count = 0;
        self.last_report = now;
        Some((fps, frame_time * 1000.0))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // Declared before the window: the surface must go first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    quit_key: Option<KeyCode>,
    fullscreen_key: Option<KeyCode>,
    is_fullscreen: bool,

    fps: FpsCounter,

    /// Startup failure, reported as the process result
    fatal_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            quit_key: config.quit_key(),
            fullscreen_key: config.fullscreen_key(),
            is_fullscreen: config.window.fullscreen,
            config,
            renderer: None,
            window: None,
            fps: FpsCounter::new(Instant::now()),
            fatal_error: None,
        }
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
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
        // The Resized event that follows triggers swapchain recreation
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let (Some((fps, frame_ms)), Some(window)) = (self.fps.tick(Instant::now()), &self.window) {
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.config.window.title, fps, frame_ms
            ));
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Failed to wait for GPU on shutdown: {:?}", e);
            }
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(self.config.window.resizable)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.fatal_error = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                log::info!("Rendering on {}", renderer.gpu_name());
                self.renderer = Some(renderer);
            }
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                self.fatal_error = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("Render error: {:?}", e);
                        self.fatal_error = Some(e);
                        self.shutdown(event_loop);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };

                if Some(key) == self.quit_key {
                    log::info!("{:?} pressed, exiting...", key);
                    self.shutdown(event_loop);
                } else if Some(key) == self.fullscreen_key {
                    self.toggle_fullscreen();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down Vulkan while the window is still alive
        self.renderer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_reports_once_per_interval() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        for i in 1..60u64 {
            assert!(fps.tick(start + Duration::from_millis(i * 16)).is_none());
        }

        let (rate, frame_ms) = fps.tick(start + Duration::from_millis(1000)).unwrap();
        assert!((rate - 60.0).abs() < 0.01);
        assert!((frame_ms - 56.0).abs() < 0.01);

        // Counter restarts after a report
        assert!(fps.tick(start + Duration::from_millis(1016)).is_none());
    }

    #[test]
    fn app_resolves_default_bindings() {
        let app = App::new(Config::default());
        assert_eq!(app.quit_key, Some(KeyCode::Escape));
        assert_eq!(app.fullscreen_key, Some(KeyCode::F11));
        assert!(!app.is_fullscreen);
        assert!(app.renderer.is_none());
    }
}
