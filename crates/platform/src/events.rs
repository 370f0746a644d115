//! Event pumping for a render loop that owns the main thread.
//!
//! The renderer drives the loop itself instead of living inside winit's
//! callbacks: each frame it polls pending events, and while the window is
//! minimized it blocks until something arrives. [`EventPump`] wraps the
//! winit event loop for that, and [`WindowState`] is the `ApplicationHandler`
//! that records what happened.

use std::time::Duration;

use tracing::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

use viewer_core::{Error, Result, WindowSection};

use crate::window::Window;

/// Window-side view of the frame loop.
pub trait FramebufferSource {
    /// Current framebuffer size in pixels; zero while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Returns whether the framebuffer was resized since the last call, and
    /// clears the flag.
    fn take_resized(&mut self) -> bool;

    /// Blocks until at least one window event has been processed.
    fn wait_events(&mut self);

    fn close_requested(&self) -> bool;
}

/// Records window lifecycle events as flags the render loop reads.
pub struct WindowState {
    section: WindowSection,
    window: Option<Window>,
    resized: bool,
    close_requested: bool,
    error: Option<Error>,
}

impl WindowState {
    pub fn new(section: WindowSection) -> Self {
        Self {
            section,
            window: None,
            resized: false,
            close_requested: false,
            error: None,
        }
    }

    #[inline]
    pub fn window(&self) -> Option<&Window> {
        self.window.as_ref()
    }

    /// Applies one window event to the recorded flags.
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Destroyed => {
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Framebuffer resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                self.resized = true;
            }
            _ => {}
        }
    }

    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    #[inline]
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match Window::new(event_loop, &self.section) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        self.handle_event(&event);
        if self.close_requested {
            event_loop.exit();
        }
    }
}

/// A winit event loop pumped on demand.
pub struct EventPump {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl EventPump {
    pub fn new(section: WindowSection) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;

        Ok(Self {
            event_loop,
            state: WindowState::new(section),
        })
    }

    /// Pumps events until the window exists.
    ///
    /// # Errors
    ///
    /// Fails if window creation fails or the loop exits first.
    pub fn wait_for_window(&mut self) -> Result<&Window> {
        while self.state.window.is_none() {
            if let Some(e) = self.state.error.take() {
                return Err(e);
            }
            if self.state.close_requested {
                break;
            }
            self.pump(Some(Duration::from_millis(10)));
        }

        if let Some(e) = self.state.error.take() {
            return Err(e);
        }
        self.state
            .window
            .as_ref()
            .ok_or_else(|| Error::Window("event loop exited before the window was created".into()))
    }

    #[inline]
    pub fn window(&self) -> Option<&Window> {
        self.state.window()
    }

    /// Processes pending events without blocking.
    pub fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            if code != 0 {
                warn!("Event loop exited with code {}", code);
            }
            self.state.close_requested = true;
        }
    }
}

impl FramebufferSource for EventPump {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.state
            .window()
            .map_or((0, 0), Window::framebuffer_size)
    }

    fn take_resized(&mut self) -> bool {
        self.state.take_resized()
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalSize;

    fn state() -> WindowState {
        WindowState::new(WindowSection {
            width: 800,
            height: 600,
            title: "test".to_string(),
        })
    }

    #[test]
    fn test_resize_flag_is_edge_triggered() {
        let mut state = state();
        assert!(!state.take_resized());

        state.handle_event(&WindowEvent::Resized(PhysicalSize::new(640, 480)));
        state.handle_event(&WindowEvent::Resized(PhysicalSize::new(320, 240)));

        assert!(state.take_resized());
        assert!(!state.take_resized());
    }

    #[test]
    fn test_close_requested_sticks() {
        let mut state = state();
        assert!(!state.close_requested());

        state.handle_event(&WindowEvent::CloseRequested);
        state.handle_event(&WindowEvent::Focused(true));

        assert!(state.close_requested());
        assert!(!state.take_resized());
    }

    #[test]
    fn test_no_window_before_resume() {
        assert!(state().window().is_none());
    }
}
