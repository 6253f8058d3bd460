// =============================================================================
// WINDOW - winit window driven by an explicit event pump
// =============================================================================
//
// The frame loop owns control flow, so instead of handing the thread to
// `EventLoop::run_app` we pump pending events between frames.

use anyhow::{Context, Result};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;

/// Largest framebuffer side we accept as a real size.
const MAX_EXTENT: u32 = 50_000;

/// How long a blocking pump waits before re-checking the window size.
const WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Zero (minimized) or absurd sizes are not usable for a swapchain.
pub fn is_valid_extent(width: u32, height: u32) -> bool {
    (1..=MAX_EXTENT).contains(&width) && (1..=MAX_EXTENT).contains(&height)
}

/// Event handler state, updated while events are pumped.
struct WindowState {
    attributes: Option<WindowAttributes>,
    created: Option<Window>,
    error: Option<anyhow::Error>,
    close_requested: bool,
    resized: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.attributes.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => self.created = Some(window),
            Err(e) => self.error = Some(anyhow::Error::new(e).context("Failed to create window")),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }
}

pub struct AppWindow {
    // Dropped before the event loop
    window: Window,
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl AppWindow {
    /// Open the window and pump until the platform has created it.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        let mut state = WindowState {
            attributes: Some(attributes),
            created: None,
            error: None,
            close_requested: false,
            resized: false,
        };

        let window = loop {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(WAIT_INTERVAL), &mut state)
            {
                anyhow::bail!("Event loop exited with code {} before the window opened", code);
            }
            if let Some(e) = state.error.take() {
                return Err(e);
            }
            if let Some(window) = state.created.take() {
                break window;
            }
        };

        log::info!(
            "Window: {}x{} ({})",
            config.width,
            config.height,
            config.title
        );

        Ok(Self {
            window,
            state,
            event_loop,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Process pending events without blocking.
    pub fn pump_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            self.state.close_requested = true;
        }
    }

    pub fn should_close(&mut self) -> bool {
        if !self.state.close_requested {
            self.pump_events();
        }
        self.state.close_requested
    }

    pub fn request_close(&mut self) {
        self.state.close_requested = true;
    }

    /// True once per resize.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    /// Framebuffer size, blocking while the window is minimized.
    ///
    /// Returns early with a 1x1 size if the window is closed meanwhile.
    pub fn wait_for_valid_size(&mut self) -> (u32, u32) {
        loop {
            let size = self.window.inner_size();
            if is_valid_extent(size.width, size.height) {
                return (size.width, size.height);
            }
            if self.state.close_requested {
                return (size.width.clamp(1, MAX_EXTENT), size.height.clamp(1, MAX_EXTENT));
            }
            self.pump(Some(WAIT_INTERVAL));
        }
    }
}
