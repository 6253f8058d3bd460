// =============================================================================
// FRAME SCHEDULER - acquire -> wait -> submit -> present, N frames in flight
// =============================================================================
//
// Each logical frame slot owns a fence and a pair of semaphores. A swapchain
// image remembers which slot last rendered to it; before that image is used
// again the owning slot's fence is waited on, and the previous content of the
// image is handed to the capture path.
//
// The GPU side lives behind `FrameTarget` so the ordering rules here can be
// exercised without a device.

use anyhow::Result;

use crate::backend::{AcquireOutcome, PresentOutcome};

/// What one iteration of the frame loop needs from the renderer.
pub trait FrameTarget {
    /// Number of presentable images in the current swapchain.
    fn image_count(&self) -> usize;

    /// Block until the last submission of `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next image, signalling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Called with the previous content of `image` before it is rendered again.
    fn capture_image(&mut self, image: usize) -> Result<()>;

    fn update_uniforms(&mut self, image: usize) -> Result<()>;

    /// Reset the slot's fence and submit the image's command buffer.
    fn submit(&mut self, slot: usize, image: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image: usize) -> Result<PresentOutcome>;

    /// Whether the window was resized since the last call.
    fn take_resized(&mut self) -> bool;

    /// Recreate everything derived from the swapchain.
    fn rebuild(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Rendering,
    /// Submitted and queued for presentation; GPU may still be busy.
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, then the swapchain was rebuilt.
    Rebuilt,
    /// Swapchain was out of date at acquire; nothing was drawn.
    Skipped,
}

pub struct FrameScheduler {
    slots: Vec<SlotState>,
    current_slot: usize,
    /// Slot that last submitted work for each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    frames_drawn: u64,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            slots: vec![SlotState::Idle; frames_in_flight.max(1)],
            current_slot: 0,
            images_in_flight: vec![None; image_count],
            frames_drawn: 0,
        }
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[cfg(test)]
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    #[cfg(test)]
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Run one iteration of the frame loop.
    pub fn draw_frame<T: FrameTarget>(&mut self, target: &mut T) -> Result<FrameStatus> {
        let slot = self.current_slot;

        target.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Acquiring;

        let (image, suboptimal) = match target.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index as usize, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date at acquire, rebuilding");
                self.slots[slot] = SlotState::Idle;
                self.rebuild(target)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        anyhow::ensure!(
            image < self.images_in_flight.len(),
            "Acquired image {} but the swapchain has {}",
            image,
            self.images_in_flight.len()
        );

        // Image still owned by an earlier frame: wait for it, then grab what
        // that frame left behind
        if let Some(owner) = self.images_in_flight[image] {
            target.wait_for_slot(owner)?;
            target.capture_image(image)?;
        }
        self.images_in_flight[image] = Some(slot);

        target.update_uniforms(image)?;

        self.slots[slot] = SlotState::Rendering;
        target.submit(slot, image)?;

        self.slots[slot] = SlotState::Presenting;
        let outcome = target.present(slot, image)?;
        let resized = target.take_resized();
        self.frames_drawn += 1;

        let status = if suboptimal || resized || outcome.needs_rebuild() {
            log::debug!(
                "Rebuilding swapchain (suboptimal: {}, resized: {}, present: {:?})",
                suboptimal,
                resized,
                outcome
            );
            self.rebuild(target)?;
            FrameStatus::Rebuilt
        } else {
            FrameStatus::Presented
        };

        self.current_slot = (self.current_slot + 1) % self.slots.len();
        Ok(status)
    }

    fn rebuild<T: FrameTarget>(&mut self, target: &mut T) -> Result<()> {
        target.rebuild()?;
        // The device was idle for the rebuild, nothing is in flight anymore
        self.images_in_flight = vec![None; target.image_count()];
        self.slots.fill(SlotState::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Capture(usize),
        Uniforms(usize),
        Submit(usize, usize),
        Present(usize, usize),
        Rebuild,
    }

    /// Fake GPU: a submission stays pending until its slot is waited on.
    struct MockTarget {
        image_count: usize,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        resized: bool,
        pending: Vec<Option<usize>>,
        events: Vec<Event>,
    }

    impl MockTarget {
        fn new(image_count: usize, slots: usize) -> Self {
            Self {
                image_count,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                resized: false,
                pending: vec![None; slots],
                events: Vec::new(),
            }
        }

        fn acquire_sequence(mut self, images: &[u32]) -> Self {
            self.acquires = images
                .iter()
                .map(|&image_index| AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                })
                .collect();
            self
        }

        fn captures(&self) -> Vec<usize> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Capture(image) => Some(*image),
                    _ => None,
                })
                .collect()
        }

        fn rebuilds(&self) -> usize {
            self.events.iter().filter(|e| **e == Event::Rebuild).count()
        }
    }

    impl FrameTarget for MockTarget {
        fn image_count(&self) -> usize {
            self.image_count
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.pending[slot] = None;
            self.events.push(Event::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.events.push(Event::Acquire(slot));
            Ok(self.acquires.pop_front().unwrap_or(AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: false,
            }))
        }

        fn capture_image(&mut self, image: usize) -> Result<()> {
            assert!(
                !self.pending.contains(&Some(image)),
                "captured image {} while it is still being rendered",
                image
            );
            self.events.push(Event::Capture(image));
            Ok(())
        }

        fn update_uniforms(&mut self, image: usize) -> Result<()> {
            self.events.push(Event::Uniforms(image));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: usize) -> Result<()> {
            assert!(self.pending[slot].is_none(), "slot {} resubmitted unfenced", slot);
            assert!(
                !self.pending.contains(&Some(image)),
                "image {} already has unfenced work",
                image
            );
            self.pending[slot] = Some(image);
            self.events.push(Event::Submit(slot, image));
            Ok(())
        }

        fn present(&mut self, slot: usize, image: usize) -> Result<PresentOutcome> {
            self.events.push(Event::Present(slot, image));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn rebuild(&mut self) -> Result<()> {
            self.pending.fill(None);
            self.events.push(Event::Rebuild);
            Ok(())
        }
    }

    #[test]
    fn one_frame_runs_in_order() {
        let mut target = MockTarget::new(3, 2).acquire_sequence(&[1]);
        let mut scheduler = FrameScheduler::new(2, 3);

        let status = scheduler.draw_frame(&mut target).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            target.events,
            vec![
                Event::Wait(0),
                Event::Acquire(0),
                Event::Uniforms(1),
                Event::Submit(0, 1),
                Event::Present(0, 1),
            ]
        );
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.image_owner(1), Some(0));
        assert_eq!(scheduler.slot_state(0), SlotState::Presenting);
    }

    #[test]
    fn slots_advance_modulo_frames_in_flight() {
        let mut target = MockTarget::new(3, 2).acquire_sequence(&[0, 1, 2, 0, 1]);
        let mut scheduler = FrameScheduler::new(2, 3);

        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(scheduler.current_slot());
            scheduler.draw_frame(&mut target).unwrap();
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(scheduler.frames_drawn(), 5);
    }

    #[test]
    fn adversarial_acquire_order_never_overlaps_an_image() {
        // Images come back out of order and repeat; the mock asserts on any
        // submission that targets an image with unfenced work
        let order = [0, 1, 1, 0, 2, 2, 2, 1, 0, 0, 1, 2, 1, 1, 0];
        let mut target = MockTarget::new(3, 2).acquire_sequence(&order);
        let mut scheduler = FrameScheduler::new(2, 3);

        for _ in 0..order.len() {
            scheduler.draw_frame(&mut target).unwrap();
        }
        assert_eq!(scheduler.frames_drawn(), order.len() as u64);
    }

    #[test]
    fn capture_only_happens_on_reuse() {
        let mut target = MockTarget::new(3, 2).acquire_sequence(&[0, 1, 2, 0, 1, 2]);
        let mut scheduler = FrameScheduler::new(2, 3);

        for _ in 0..3 {
            scheduler.draw_frame(&mut target).unwrap();
        }
        assert!(target.captures().is_empty());

        for _ in 0..3 {
            scheduler.draw_frame(&mut target).unwrap();
        }
        assert_eq!(target.captures(), vec![0, 1, 2]);
    }

    #[test]
    fn reused_image_waits_for_its_owner_first() {
        let mut target = MockTarget::new(2, 2).acquire_sequence(&[0, 0]);
        let mut scheduler = FrameScheduler::new(2, 2);

        scheduler.draw_frame(&mut target).unwrap();
        target.events.clear();
        scheduler.draw_frame(&mut target).unwrap();

        assert_eq!(
            &target.events[..4],
            &[
                Event::Wait(1),
                Event::Acquire(1),
                Event::Wait(0),
                Event::Capture(0),
            ]
        );
        assert_eq!(scheduler.image_owner(0), Some(1));
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_advancing() {
        let mut target = MockTarget::new(3, 2);
        target.acquires = VecDeque::from([
            AcquireOutcome::OutOfDate,
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false,
            },
        ]);
        let mut scheduler = FrameScheduler::new(2, 3);

        assert_eq!(scheduler.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(target.rebuilds(), 1);
        assert!(!target.events.iter().any(|e| matches!(e, Event::Submit(..))));

        assert_eq!(scheduler.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let mut target = MockTarget::new(3, 2);
        target.acquires = VecDeque::from([AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: true,
        }]);
        let mut scheduler = FrameScheduler::new(2, 3);

        assert_eq!(scheduler.draw_frame(&mut target).unwrap(), FrameStatus::Rebuilt);
        let present = target
            .events
            .iter()
            .position(|e| matches!(e, Event::Present(..)))
            .unwrap();
        let rebuild = target.events.iter().position(|e| *e == Event::Rebuild).unwrap();
        assert!(present < rebuild);
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn present_staleness_and_resize_trigger_rebuild() {
        let mut target = MockTarget::new(3, 2).acquire_sequence(&[0, 1, 2]);
        target.presents = VecDeque::from([PresentOutcome::OutOfDate, PresentOutcome::Suboptimal]);
        let mut scheduler = FrameScheduler::new(2, 3);

        assert_eq!(scheduler.draw_frame(&mut target).unwrap(), FrameStatus::Rebuilt);
        assert_eq!(scheduler.draw_frame(&mut target).unwrap(), FrameStatus::Rebuilt);

        target.resized = true;
        assert_eq!(scheduler.draw_frame(&mut target).unwrap(), FrameStatus::Rebuilt);
        assert!(!target.resized);
        assert_eq!(target.rebuilds(), 3);
    }

    #[test]
    fn rebuild_resets_image_tracking_to_new_count() {
        let mut target = MockTarget::new(3, 2).acquire_sequence(&[0, 1]);
        let mut scheduler = FrameScheduler::new(2, 3);
        scheduler.draw_frame(&mut target).unwrap();
        assert_eq!(scheduler.image_owner(0), Some(0));

        target.image_count = 4;
        target.resized = true;
        scheduler.draw_frame(&mut target).unwrap();

        for image in 0..4 {
            assert_eq!(scheduler.image_owner(image), None);
        }
        assert_eq!(scheduler.slot_state(0), SlotState::Idle);
    }

    #[test]
    fn out_of_range_image_is_an_error() {
        let mut target = MockTarget::new(2, 2).acquire_sequence(&[5]);
        let mut scheduler = FrameScheduler::new(2, 2);
        assert!(scheduler.draw_frame(&mut target).is_err());
    }
}
