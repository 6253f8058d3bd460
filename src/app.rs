// =============================================================================
// APPLICATION - Wires window, renderer and frame scheduler together
// =============================================================================
//
// FRAME FLOW:
// 1. Pump window events (should_close)
// 2. Wait for this slot's fence, acquire a swapchain image
// 3. If the image was rendered before: wait for it, capture its content
// 4. Update uniforms, submit pre-recorded commands
// 5. Present, rebuild the swapchain if it went stale

use anyhow::Result;

use crate::backend::{AcquireOutcome, PresentOutcome};
use crate::capture::CaptureProgress;
use crate::config::Config;
use crate::renderer::Renderer;
use crate::scheduler::{FrameScheduler, FrameStatus, FrameTarget};
use crate::window::AppWindow;

/// Borrowed view of the renderer and window for one frame.
struct FrameContext<'a> {
    renderer: &'a mut Renderer,
    window: &'a mut AppWindow,
}

impl FrameTarget for FrameContext<'_> {
    fn image_count(&self) -> usize {
        self.renderer.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.renderer.wait_for_slot(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.renderer.acquire_image(slot)
    }

    fn capture_image(&mut self, image: usize) -> Result<()> {
        if self.renderer.capture_image(image)? == CaptureProgress::LimitReached {
            self.window.request_close();
        }
        Ok(())
    }

    fn update_uniforms(&mut self, image: usize) -> Result<()> {
        self.renderer.update_uniforms(image)
    }

    fn submit(&mut self, slot: usize, image: usize) -> Result<()> {
        self.renderer.submit(slot, image)
    }

    fn present(&mut self, slot: usize, image: usize) -> Result<PresentOutcome> {
        self.renderer.present(slot, image)
    }

    fn take_resized(&mut self) -> bool {
        self.window.take_resized()
    }

    fn rebuild(&mut self) -> Result<()> {
        let window = &mut *self.window;
        self.renderer
            .recreate_swapchain(&mut || window.wait_for_valid_size())
    }
}

/// Open the window, render until it closes, then wait for the GPU.
pub fn run(config: &Config) -> Result<()> {
    let mut window = AppWindow::new(&config.window)?;
    let mut renderer = Renderer::new(config, &mut window)?;
    let mut scheduler = FrameScheduler::new(renderer.frames_in_flight(), renderer.image_count());

    let mut skipped = 0u64;
    let mut rebuilds = 0u64;

    while !window.should_close() {
        let mut frame = FrameContext {
            renderer: &mut renderer,
            window: &mut window,
        };
        match scheduler.draw_frame(&mut frame)? {
            FrameStatus::Presented => {}
            FrameStatus::Rebuilt => rebuilds += 1,
            FrameStatus::Skipped => skipped += 1,
        }
    }

    renderer.wait_idle()?;
    log::info!(
        "Rendered {} frames, captured {} ({} swapchain rebuilds, {} skipped)",
        scheduler.frames_drawn(),
        renderer.frames_captured(),
        rebuilds,
        skipped
    );
    Ok(())
}
