//! Frame pacing and swapchain recreation.
//!
//! [`FramePacer`] owns the per-frame state machine and nothing else. The GPU
//! work is behind [`FrameBackend`] and the window behind
//! [`FramebufferSource`], so the ordering rules can be exercised without a
//! device:
//!
//! 1. wait for the slot's fence
//! 2. acquire an image (out-of-date: rebuild and stop here)
//! 3. reset the slot's fence
//! 4. record the slot's command buffer
//! 5. submit, signalling the fence
//! 6. present (stale or resized: rebuild)
//! 7. advance to the next slot
//!
//! The fence is only reset once the frame is certain to submit, so an early
//! return after step 2 leaves it signaled and the next wait returns at once.

use ash::vk;
use tracing::{debug, info};

use viewer_platform::FramebufferSource;
use viewer_rhi::RhiResult;
use viewer_rhi::swapchain::{Acquire, Present};

/// GPU side of a frame, addressed by frame-in-flight slot.
pub trait FrameBackend {
    /// Blocks until the slot's in-flight fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Acquires the next swapchain image, signalling the slot's
    /// image-available semaphore.
    fn acquire_next_image(&mut self, slot: usize) -> RhiResult<Acquire>;

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()>;

    /// Updates per-frame data and re-records the slot's command buffer to
    /// draw into `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Submits the slot's command buffer; signals the slot's fence when done.
    fn submit(&mut self, slot: usize) -> RhiResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<Present>;

    fn wait_idle(&mut self) -> RhiResult<()>;

    /// Rebuilds the swapchain and everything sized by it.
    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<()>;
}

/// What happened during one [`FramePacer::draw_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the presentation engine.
    Presented { image_index: u32, recreated: bool },
    /// The swapchain was out of date and has been rebuilt; no image reached
    /// the screen. Out of date at acquire means nothing was drawn either.
    SwapchainRecreated,
    /// The swapchain was out of date but the window closed while minimized.
    Skipped,
}

/// Cycles frame-in-flight slots and drives swapchain recreation.
#[derive(Debug)]
pub struct FramePacer {
    frames_in_flight: usize,
    frame_counter: u64,
    frames_presented: u64,
    recreations: u64,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame_counter: 0,
            frames_presented: 0,
            recreations: 0,
        }
    }

    /// Slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// Any error from the backend is fatal. A stale swapchain is reported
    /// through [`FrameOutcome`], never as an error.
    pub fn draw_frame<B, W>(&mut self, backend: &mut B, window: &mut W) -> RhiResult<FrameOutcome>
    where
        B: FrameBackend,
        W: FramebufferSource,
    {
        let slot = self.current_slot();

        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire_next_image(slot)? {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("Acquired suboptimal image {}", index);
                }
                index
            }
            Acquire::OutOfDate => {
                debug!("Swapchain out of date on acquire (frame {})", self.frame_counter);
                return Ok(if self.recreate(backend, window)? {
                    FrameOutcome::SwapchainRecreated
                } else {
                    FrameOutcome::Skipped
                });
            }
        };

        backend.reset_slot_fence(slot)?;
        backend.record(slot, image_index)?;
        backend.submit(slot)?;

        let present = backend.present(slot, image_index)?;
        let shown = present != Present::OutOfDate;
        if shown {
            self.frames_presented += 1;
        }

        let resized = window.take_resized();
        let recreated = if present.is_stale() || resized {
            debug!("Rebuilding after present: {:?}, resized: {}", present, resized);
            self.recreate(backend, window)?
        } else {
            false
        };

        // The slot was submitted either way, so it still advances.
        self.frame_counter += 1;

        Ok(match (shown, recreated) {
            (true, _) => FrameOutcome::Presented {
                image_index,
                recreated,
            },
            (false, true) => FrameOutcome::SwapchainRecreated,
            (false, false) => FrameOutcome::Skipped,
        })
    }

    /// Waits out a minimized window, then rebuilds. Returns `false` if the
    /// window closed first.
    fn recreate<B, W>(&mut self, backend: &mut B, window: &mut W) -> RhiResult<bool>
    where
        B: FrameBackend,
        W: FramebufferSource,
    {
        let (mut width, mut height) = window.framebuffer_size();
        while width == 0 || height == 0 {
            if window.close_requested() {
                info!("Window closed while minimized, skipping swapchain rebuild");
                return Ok(false);
            }
            window.wait_events();
            (width, height) = window.framebuffer_size();
        }

        backend.wait_idle()?;
        backend.rebuild_swapchain(vk::Extent2D { width, height })?;
        self.recreations += 1;

        info!(
            "Swapchain rebuilt at {}x{} (rebuild #{})",
            width, height, self.recreations
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use viewer_rhi::RhiError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        Rebuild(u32, u32),
    }

    /// Backend whose GPU finishes every submission immediately.
    struct MockBackend {
        fence_signaled: Vec<bool>,
        image_count: u32,
        next_image: u32,
        acquires: usize,
        presents: usize,
        out_of_date_acquires: HashSet<usize>,
        stale_presents: VecDeque<(usize, Present)>,
        acquire_error: Option<usize>,
        calls: Vec<Call>,
    }

    impl MockBackend {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                fence_signaled: vec![true; frames_in_flight],
                image_count: 3,
                next_image: 0,
                acquires: 0,
                presents: 0,
                out_of_date_acquires: HashSet::new(),
                stale_presents: VecDeque::new(),
                acquire_error: None,
                calls: Vec::new(),
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn rebuilds(&self) -> Vec<(u32, u32)> {
            self.calls
                .iter()
                .filter_map(|c| match *c {
                    Call::Rebuild(w, h) => Some((w, h)),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Wait(slot));
            if self.fence_signaled[slot] {
                Ok(())
            } else {
                // Nothing will ever signal it: a real wait would hang.
                Err(RhiError::FrameTimeout { timeout_ms: 0 })
            }
        }

        fn acquire_next_image(&mut self, slot: usize) -> RhiResult<Acquire> {
            self.calls.push(Call::Acquire(slot));
            let n = self.acquires;
            self.acquires += 1;

            if self.acquire_error == Some(n) {
                return Err(RhiError::SwapchainAcquire(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
            if self.out_of_date_acquires.contains(&n) {
                return Ok(Acquire::OutOfDate);
            }

            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquire::Image {
                index,
                suboptimal: false,
            })
        }

        fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Reset(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Submit(slot));
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<Present> {
            self.calls.push(Call::Present(slot, image_index));
            let n = self.presents;
            self.presents += 1;

            match self.stale_presents.front() {
                Some(&(at, result)) if at == n => {
                    self.stale_presents.pop_front();
                    Ok(result)
                }
                _ => Ok(Present::Optimal),
            }
        }

        fn wait_idle(&mut self) -> RhiResult<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }

        fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
            assert!(extent.width > 0 && extent.height > 0);
            self.calls.push(Call::Rebuild(extent.width, extent.height));
            self.next_image = 0;
            Ok(())
        }
    }

    struct MockWindow {
        size: (u32, u32),
        /// Sizes reported after each successive `wait_events`.
        pending_sizes: VecDeque<(u32, u32)>,
        resized: bool,
        close_requested: bool,
        close_after_waits: Option<usize>,
        waits: usize,
    }

    impl MockWindow {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                pending_sizes: VecDeque::new(),
                resized: false,
                close_requested: false,
                close_after_waits: None,
                waits: 0,
            }
        }
    }

    impl FramebufferSource for MockWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.size
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(size) = self.pending_sizes.pop_front() {
                self.size = size;
            }
            if self.close_after_waits == Some(self.waits) {
                self.close_requested = true;
            }
            assert!(self.waits < 100, "wait_events called without progress");
        }

        fn close_requested(&self) -> bool {
            self.close_requested
        }
    }

    fn run_frames(
        pacer: &mut FramePacer,
        backend: &mut MockBackend,
        window: &mut MockWindow,
        frames: usize,
    ) -> Vec<FrameOutcome> {
        (0..frames)
            .map(|_| pacer.draw_frame(backend, window).unwrap())
            .collect()
    }

    #[test]
    fn test_steady_state_cycles_slots() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(800, 600);

        let outcomes = run_frames(&mut pacer, &mut backend, &mut window, 4);

        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::Presented { image_index: 0, recreated: false },
                FrameOutcome::Presented { image_index: 1, recreated: false },
                FrameOutcome::Presented { image_index: 2, recreated: false },
                FrameOutcome::Presented { image_index: 0, recreated: false },
            ]
        );
        assert_eq!(
            &backend.calls[..6],
            &[
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(backend.calls[6], Call::Wait(1));
        assert_eq!(pacer.frame_counter(), 4);
        assert_eq!(pacer.frames_presented(), 4);
        assert_eq!(pacer.recreations(), 0);
        assert_eq!(pacer.current_slot(), 0);
    }

    #[test]
    fn test_fence_waited_before_slot_is_rerecorded() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.out_of_date_acquires.insert(3);
        backend.stale_presents.push_back((5, Present::Suboptimal));
        let mut window = MockWindow::new(800, 600);

        run_frames(&mut pacer, &mut backend, &mut window, 12);

        // Between two records of a slot there must be a wait on that slot
        // after the earlier submit.
        for slot in 0..2 {
            let mut submitted = false;
            for call in &backend.calls {
                match *call {
                    Call::Submit(s) if s == slot => submitted = true,
                    Call::Wait(s) if s == slot => submitted = false,
                    Call::Record(s, _) if s == slot => {
                        assert!(!submitted, "slot {} re-recorded without a fence wait", slot)
                    }
                    _ => {}
                }
            }
        }

        // Every reset is preceded by a wait on the same slot.
        for (i, call) in backend.calls.iter().enumerate() {
            if let Call::Reset(slot) = *call {
                assert_eq!(backend.calls[i - 2], Call::Wait(slot));
            }
        }
    }

    #[test]
    fn test_out_of_date_acquire_rebuilds_without_presenting() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.out_of_date_acquires.insert(10);
        let mut window = MockWindow::new(800, 600);

        run_frames(&mut pacer, &mut backend, &mut window, 10);
        let presents_before = backend.count(|c| matches!(c, Call::Present(..)));
        let slot = pacer.current_slot();

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::SwapchainRecreated);
        assert_eq!(
            backend.count(|c| matches!(c, Call::Present(..))),
            presents_before
        );
        assert_eq!(backend.rebuilds(), vec![(800, 600)]);
        assert!(backend.fence_signaled[slot]);
        assert_eq!(pacer.frame_counter(), 10);
        assert_eq!(pacer.recreations(), 1);

        // Frame 11 reuses the same slot and its fence is still signaled.
        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { recreated: false, .. }));
        assert_eq!(backend.rebuilds().len(), 1);
        assert_eq!(
            backend.calls.iter().filter(|c| **c == Call::Reset(slot)).count(),
            6
        );
    }

    #[test]
    fn test_minimized_window_blocks_until_restored() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(800, 600);

        run_frames(&mut pacer, &mut backend, &mut window, 2);

        window.size = (0, 0);
        window.resized = true;
        window.pending_sizes.extend([(0, 0), (800, 600)]);

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();

        assert!(matches!(outcome, FrameOutcome::Presented { recreated: true, .. }));
        assert_eq!(window.waits, 2);
        assert_eq!(backend.rebuilds(), vec![(800, 600)]);

        let idle = backend.calls.iter().position(|c| *c == Call::WaitIdle);
        let rebuild = backend
            .calls
            .iter()
            .position(|c| matches!(c, Call::Rebuild(..)));
        assert!(idle.unwrap() < rebuild.unwrap());
    }

    #[test]
    fn test_close_while_minimized_skips_rebuild() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.out_of_date_acquires.insert(0);
        let mut window = MockWindow::new(0, 0);
        window.close_after_waits = Some(3);

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(window.waits, 3);
        assert!(backend.rebuilds().is_empty());
        assert_eq!(backend.count(|c| *c == Call::WaitIdle), 0);
        assert_eq!(pacer.recreations(), 0);
    }

    #[test]
    fn test_suboptimal_present_rebuilds_after_presenting() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.stale_presents.push_back((0, Present::Suboptimal));
        let mut window = MockWindow::new(1024, 768);

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented { image_index: 0, recreated: true }
        );
        assert_eq!(backend.rebuilds(), vec![(1024, 768)]);
        assert_eq!(pacer.frame_counter(), 1);
        assert_eq!(pacer.frames_presented(), 1);
    }

    #[test]
    fn test_out_of_date_present_is_not_counted() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.stale_presents.push_back((0, Present::OutOfDate));
        let mut window = MockWindow::new(1024, 768);

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::SwapchainRecreated);
        assert_eq!(backend.rebuilds(), vec![(1024, 768)]);
        assert_eq!(pacer.frames_presented(), 0);
        assert_eq!(pacer.recreations(), 1);
        // The submitted slot is done with; the next frame uses the other one.
        assert_eq!(pacer.frame_counter(), 1);
        assert_eq!(pacer.current_slot(), 1);

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented { image_index: 0, recreated: false }
        );
        assert_eq!(pacer.frames_presented(), 1);
    }

    #[test]
    fn test_out_of_date_present_while_closing_minimized_is_skipped() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.stale_presents.push_back((0, Present::OutOfDate));
        let mut window = MockWindow::new(0, 0);
        window.close_requested = true;

        let outcome = pacer.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(backend.rebuilds().is_empty());
        assert_eq!(pacer.frames_presented(), 0);
    }

    #[test]
    fn test_resize_flag_is_consumed_once() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::new(640, 480);
        window.resized = true;

        let outcomes = run_frames(&mut pacer, &mut backend, &mut window, 3);

        assert!(matches!(outcomes[0], FrameOutcome::Presented { recreated: true, .. }));
        assert!(matches!(outcomes[1], FrameOutcome::Presented { recreated: false, .. }));
        assert!(matches!(outcomes[2], FrameOutcome::Presented { recreated: false, .. }));
        assert_eq!(backend.rebuilds(), vec![(640, 480)]);
    }

    #[test]
    fn test_acquire_error_is_fatal_and_keeps_fence() {
        let mut pacer = FramePacer::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_error = Some(0);
        let mut window = MockWindow::new(800, 600);

        let err = pacer.draw_frame(&mut backend, &mut window).unwrap_err();

        assert!(matches!(err, RhiError::SwapchainAcquire(_)));
        assert!(backend.fence_signaled[0]);
        assert_eq!(backend.count(|c| matches!(c, Call::Reset(_))), 0);
        assert_eq!(pacer.frame_counter(), 0);
    }

    #[test]
    fn test_single_slot_pacer() {
        let mut pacer = FramePacer::new(0);
        assert_eq!(pacer.frames_in_flight(), 1);

        let mut backend = MockBackend::new(1);
        let mut window = MockWindow::new(800, 600);
        run_frames(&mut pacer, &mut backend, &mut window, 3);

        assert!(backend.calls.iter().all(|c| match *c {
            Call::Wait(s) | Call::Acquire(s) | Call::Reset(s) | Call::Submit(s) => s == 0,
            _ => true,
        }));
    }
}
