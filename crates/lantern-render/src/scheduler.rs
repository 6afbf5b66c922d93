// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing.
//!
//! [`FrameScheduler`] owns the bookkeeping of the steady-state loop: which
//! frame slot is current, which slot last submitted work touching each
//! swapchain image, and whether the swapchain has to be rebuilt. The actual
//! GPU calls go through [`FrameBackend`], so the ordering rules can be
//! exercised without a device.
//!
//! Per frame, in order:
//!
//! ```text
//! 1. wait     current slot's in-flight fence
//! 2. acquire  next image (signals the slot's image-available semaphore)
//!             out-of-date -> rebuild, skip the frame, fence untouched
//! 3. hazard   image owned by another slot? wait on that slot's fence
//! 4. reset    current slot's fence
//! 5. update   uniform copy belonging to the acquired image
//! 6. submit   wait image-available, signal render-finished + fence
//! 7. present  wait render-finished; out-of-date / suboptimal / resized -> rebuild
//! 8. advance  slot = (slot + 1) % frames_in_flight
//! ```

use tracing::debug;

/// Result of asking the presentation engine for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// The image is ours once the slot's image-available semaphore fires.
    /// `suboptimal` images are still rendered; the swapchain is rebuilt after present.
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface. Nothing was signaled.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// What a call to [`FrameScheduler::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Work was submitted and the image queued for presentation.
    /// `recreated` is set when the swapchain was rebuilt right after.
    Presented { image: u32, recreated: bool },
    /// Acquisition found the swapchain stale; nothing was submitted.
    Skipped,
    /// The swapchain needs rebuilding but the surface has no area yet.
    Deferred,
}

/// GPU side of the frame loop.
///
/// Slots are indices in `0..frames_in_flight`, images are swapchain image
/// indices. Any `Err` is treated as fatal by the scheduler.
pub trait FrameBackend {
    type Error;

    /// Blocks until the fence of `slot` is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, Self::Error>;
    /// Puts the fence of `slot` back into the unsignaled state.
    fn reset_slot(&mut self, slot: usize) -> Result<(), Self::Error>;
    /// Refreshes time-varying data owned by `image` (and only by it).
    fn update_image(&mut self, image: u32) -> Result<(), Self::Error>;
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), Self::Error>;
    fn present(&mut self, slot: usize, image: u32) -> Result<Presented, Self::Error>;
    /// Drains the device and rebuilds every swapchain-dependent resource.
    ///
    /// Returns the new image count, or `None` when the surface is currently
    /// zero-sized and the rebuild must wait.
    fn recreate(&mut self) -> Result<Option<usize>, Self::Error>;
}

#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    current: usize,
    /// Slot whose fence last covered work on each swapchain image.
    image_owners: Vec<Option<usize>>,
    resize_pending: bool,
    stale: bool,
    frames_presented: u64,
    recreations: u64,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current: 0,
            image_owners: vec![None; image_count],
            resize_pending: false,
            stale: false,
            frames_presented: 0,
            recreations: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn image_owner(&self, image: u32) -> Option<usize> {
        self.image_owners.get(image as usize).copied().flatten()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// External resize notification; consumed after the next present.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    pub fn needs_recreate(&self) -> bool {
        self.stale
    }

    pub fn draw_frame<B: FrameBackend>(&mut self, gpu: &mut B) -> Result<FrameOutcome, B::Error> {
        if self.stale && !self.rebuild(gpu)? {
            return Ok(FrameOutcome::Deferred);
        }

        let slot = self.current;
        gpu.wait_for_slot(slot)?;

        let (image, suboptimal) = match gpu.acquire_image(slot)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                debug!("acquire: swapchain out of date (slot {slot})");
                // The fence stays signaled: nothing was submitted on this slot.
                self.stale = true;
                self.rebuild(gpu)?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        let idx = image as usize;
        if idx >= self.image_owners.len() {
            self.image_owners.resize(idx + 1, None);
        }
        // The presentation engine may hand images back out of submission order.
        if let Some(owner) = self.image_owners[idx] {
            if owner != slot {
                gpu.wait_for_slot(owner)?;
            }
        }
        self.image_owners[idx] = Some(slot);

        gpu.reset_slot(slot)?;
        gpu.update_image(image)?;
        gpu.submit(slot, image)?;
        let presented = gpu.present(slot, image)?;
        if presented != Presented::OutOfDate {
            self.frames_presented += 1;
        }
        self.current = (slot + 1) % self.frames_in_flight;

        let resized = std::mem::take(&mut self.resize_pending);
        let recreate = suboptimal || resized || presented != Presented::Optimal;
        if recreate {
            debug!(
                "present: rebuilding (acquire_suboptimal={suboptimal} resized={resized} present={presented:?})"
            );
            self.stale = true;
            self.rebuild(gpu)?;
        }

        Ok(FrameOutcome::Presented {
            image,
            recreated: recreate && !self.stale,
        })
    }

    fn rebuild<B: FrameBackend>(&mut self, gpu: &mut B) -> Result<bool, B::Error> {
        match gpu.recreate()? {
            Some(image_count) => {
                self.image_owners.clear();
                self.image_owners.resize(image_count, None);
                self.stale = false;
                // The new chain already reflects the latest framebuffer size.
                self.resize_pending = false;
                self.recreations += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Simulated device. Submitted work only completes when the CPU waits on
    /// its fence, which is the worst case the scheduler has to tolerate.
    struct SimGpu {
        frames_in_flight: usize,
        image_count: usize,
        fence_signaled: Vec<bool>,
        /// Submission generation covered by each slot's fence.
        pending_gen: Vec<Option<u64>>,
        completed: Vec<u64>,
        /// Last submission that used each image: (slot, generation).
        image_last_use: Vec<Option<(usize, u64)>>,
        next_gen: u64,
        next_image: usize,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<Presented>,
        recreate_script: VecDeque<Option<usize>>,
        fail_submit: bool,
        log: Vec<String>,
        max_in_flight: usize,
        updates: Vec<u32>,
        recreate_calls: usize,
    }

    #[derive(Debug, PartialEq)]
    struct SimError(&'static str);

    impl SimGpu {
        fn new(frames_in_flight: usize, image_count: usize) -> Self {
            Self {
                frames_in_flight,
                image_count,
                fence_signaled: vec![true; frames_in_flight],
                pending_gen: vec![None; frames_in_flight],
                completed: vec![0; frames_in_flight],
                image_last_use: vec![None; image_count],
                next_gen: 1,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                recreate_script: VecDeque::new(),
                fail_submit: false,
                log: Vec::new(),
                max_in_flight: 0,
                updates: Vec::new(),
                recreate_calls: 0,
            }
        }

        fn acquire_sequence(mut self, images: &[u32]) -> Self {
            self.acquire_script = images
                .iter()
                .map(|&index| Acquired::Image {
                    index,
                    suboptimal: false,
                })
                .collect();
            self
        }

        fn in_flight(&self) -> usize {
            self.pending_gen.iter().filter(|g| g.is_some()).count()
        }

        fn submissions(&self) -> Vec<&str> {
            self.log
                .iter()
                .filter(|l| l.starts_with("submit"))
                .map(String::as_str)
                .collect()
        }
    }

    impl FrameBackend for SimGpu {
        type Error = SimError;

        fn wait_for_slot(&mut self, slot: usize) -> Result<(), SimError> {
            self.log.push(format!("wait {slot}"));
            if let Some(gen) = self.pending_gen[slot].take() {
                self.completed[slot] = gen;
                self.fence_signaled[slot] = true;
            }
            if !self.fence_signaled[slot] {
                // Reset but never submitted: a real wait would hang forever.
                return Err(SimError("wait on a fence that can never signal"));
            }
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<Acquired, SimError> {
            let acquired = self.acquire_script.pop_front().unwrap_or_else(|| {
                let index = (self.next_image % self.image_count) as u32;
                self.next_image += 1;
                Acquired::Image {
                    index,
                    suboptimal: false,
                }
            });
            self.log.push(format!("acquire {slot} -> {acquired:?}"));
            Ok(acquired)
        }

        fn reset_slot(&mut self, slot: usize) -> Result<(), SimError> {
            assert!(self.pending_gen[slot].is_none(), "reset of a busy fence");
            self.fence_signaled[slot] = false;
            self.log.push(format!("reset {slot}"));
            Ok(())
        }

        fn update_image(&mut self, image: u32) -> Result<(), SimError> {
            if let Some((slot, gen)) = self.image_last_use[image as usize] {
                assert!(
                    self.completed[slot] >= gen,
                    "image {image} written while slot {slot} gen {gen} is still in flight"
                );
            }
            self.updates.push(image);
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: u32) -> Result<(), SimError> {
            if self.fail_submit {
                return Err(SimError("device lost"));
            }
            assert!(!self.fence_signaled[slot], "submit without fence reset");
            let gen = self.next_gen;
            self.next_gen += 1;
            self.pending_gen[slot] = Some(gen);
            self.image_last_use[image as usize] = Some((slot, gen));
            self.max_in_flight = self.max_in_flight.max(self.in_flight());
            assert!(self.in_flight() <= self.frames_in_flight);
            self.log.push(format!("submit {slot} {image}"));
            Ok(())
        }

        fn present(&mut self, _slot: usize, image: u32) -> Result<Presented, SimError> {
            self.log.push(format!("present {image}"));
            Ok(self.present_script.pop_front().unwrap_or(Presented::Optimal))
        }

        fn recreate(&mut self) -> Result<Option<usize>, SimError> {
            self.recreate_calls += 1;
            let result = self
                .recreate_script
                .pop_front()
                .unwrap_or(Some(self.image_count));
            if result.is_some() {
                // device_wait_idle
                for slot in 0..self.frames_in_flight {
                    if let Some(gen) = self.pending_gen[slot].take() {
                        self.completed[slot] = gen;
                        self.fence_signaled[slot] = true;
                    }
                }
                self.image_last_use = vec![None; self.image_count];
            }
            self.log.push(format!("recreate -> {result:?}"));
            Ok(result)
        }
    }

    #[test]
    fn slots_rotate_round_robin() {
        let mut gpu = SimGpu::new(2, 3);
        let mut sched = FrameScheduler::new(2, 3);

        for _ in 0..6 {
            let out = sched.draw_frame(&mut gpu).unwrap();
            assert!(matches!(out, FrameOutcome::Presented { recreated: false, .. }));
        }

        assert_eq!(
            gpu.submissions(),
            vec![
                "submit 0 0",
                "submit 1 1",
                "submit 0 2",
                "submit 1 0",
                "submit 0 1",
                "submit 1 2"
            ]
        );
        assert_eq!(sched.frames_presented(), 6);
        assert_eq!(sched.current_slot(), 0);
        assert_eq!(gpu.max_in_flight, 2);
    }

    #[test]
    fn image_returned_out_of_order_waits_on_its_owner() {
        // Frame 2 runs on slot 0 but gets image 1, which slot 1 just submitted.
        let mut gpu = SimGpu::new(2, 3).acquire_sequence(&[0, 1, 1]);
        let mut sched = FrameScheduler::new(2, 3);

        sched.draw_frame(&mut gpu).unwrap();
        sched.draw_frame(&mut gpu).unwrap();
        gpu.log.clear();
        sched.draw_frame(&mut gpu).unwrap();

        let reset = gpu.log.iter().position(|l| l == "reset 0").unwrap();
        let cross = gpu.log.iter().position(|l| l == "wait 1").unwrap();
        assert!(cross < reset, "owner wait must precede touching the image: {:?}", gpu.log);
        assert_eq!(sched.image_owner(1), Some(0));
        assert_eq!(gpu.updates, vec![0, 1, 1]);
    }

    #[test]
    fn same_slot_ownership_needs_no_extra_wait() {
        let mut gpu = SimGpu::new(1, 2).acquire_sequence(&[0, 0]);
        let mut sched = FrameScheduler::new(1, 2);

        sched.draw_frame(&mut gpu).unwrap();
        gpu.log.clear();
        sched.draw_frame(&mut gpu).unwrap();

        let waits = gpu.log.iter().filter(|l| l.starts_with("wait")).count();
        assert_eq!(waits, 1);
    }

    #[test]
    fn scrambled_acquire_order_never_breaks_the_bounds() {
        for frames_in_flight in 1..=3 {
            for image_count in 2..=4 {
                // Deterministic LCG stands in for a presentation engine with no ordering guarantee.
                let mut state = 0x2545_f491_u32 ^ (frames_in_flight * 31 + image_count) as u32;
                let order: Vec<u32> = (0..200)
                    .map(|_| {
                        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                        (state >> 16) % image_count as u32
                    })
                    .collect();

                let mut gpu = SimGpu::new(frames_in_flight, image_count).acquire_sequence(&order);
                let mut sched = FrameScheduler::new(frames_in_flight, image_count);
                for _ in 0..order.len() {
                    sched.draw_frame(&mut gpu).unwrap();
                }
                assert!(gpu.max_in_flight <= frames_in_flight);
                assert_eq!(gpu.updates.len(), order.len());
            }
        }
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_touching_the_fence() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.acquire_script.push_back(Acquired::OutOfDate);
        let mut sched = FrameScheduler::new(2, 3);

        let out = sched.draw_frame(&mut gpu).unwrap();

        assert_eq!(out, FrameOutcome::Skipped);
        assert_eq!(gpu.recreate_calls, 1);
        assert!(gpu.fence_signaled[0]);
        assert!(!gpu.log.iter().any(|l| l.starts_with("reset") || l.starts_with("submit")));
        assert_eq!(sched.current_slot(), 0);

        // The next frame proceeds on the same slot without hanging.
        let out = sched.draw_frame(&mut gpu).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { .. }));
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.acquire_script.push_back(Acquired::Image {
            index: 2,
            suboptimal: true,
        });
        let mut sched = FrameScheduler::new(2, 3);

        let out = sched.draw_frame(&mut gpu).unwrap();

        assert_eq!(
            out,
            FrameOutcome::Presented {
                image: 2,
                recreated: true
            }
        );
        let present = gpu.log.iter().position(|l| l == "present 2").unwrap();
        let rebuild = gpu.log.iter().position(|l| l.starts_with("recreate")).unwrap();
        assert!(present < rebuild);
        assert_eq!(sched.image_owner(2), None);
    }

    #[test]
    fn stale_present_results_trigger_a_rebuild() {
        for result in [Presented::Suboptimal, Presented::OutOfDate] {
            let mut gpu = SimGpu::new(2, 3);
            gpu.present_script.push_back(result);
            let mut sched = FrameScheduler::new(2, 3);

            let out = sched.draw_frame(&mut gpu).unwrap();
            assert!(matches!(out, FrameOutcome::Presented { recreated: true, .. }));
            assert_eq!(gpu.recreate_calls, 1);
            assert_eq!(sched.current_slot(), 1);
        }
    }

    #[test]
    fn resize_is_handled_at_the_present_boundary() {
        let mut gpu = SimGpu::new(2, 3);
        let mut sched = FrameScheduler::new(2, 3);

        sched.notify_resized();
        assert_eq!(gpu.recreate_calls, 0);
        let out = sched.draw_frame(&mut gpu).unwrap();

        assert!(matches!(out, FrameOutcome::Presented { recreated: true, .. }));
        assert!(gpu.log.last().unwrap().starts_with("recreate"));
        assert!(gpu.log.iter().any(|l| l.starts_with("submit")));

        let out = sched.draw_frame(&mut gpu).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { recreated: false, .. }));
    }

    #[test]
    fn resize_consumed_by_an_acquire_rebuild_is_not_repeated() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.acquire_script.push_back(Acquired::OutOfDate);
        let mut sched = FrameScheduler::new(2, 3);

        sched.notify_resized();
        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::Skipped);
        let out = sched.draw_frame(&mut gpu).unwrap();

        assert!(matches!(out, FrameOutcome::Presented { recreated: false, .. }));
        assert_eq!(gpu.recreate_calls, 1);
        assert_eq!(sched.recreations(), 1);
    }

    #[test]
    fn out_of_date_present_is_not_counted_as_presented() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.present_script
            .extend([Presented::OutOfDate, Presented::Suboptimal]);
        let mut sched = FrameScheduler::new(2, 3);

        sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(sched.frames_presented(), 0);
        sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(sched.frames_presented(), 1);
        sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(sched.frames_presented(), 2);
    }

    #[test]
    fn zero_sized_surface_defers_until_it_has_area() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.acquire_script.push_back(Acquired::OutOfDate);
        gpu.recreate_script.extend([None, None, Some(2)]);
        let mut sched = FrameScheduler::new(2, 3);

        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::Skipped);
        assert!(sched.needs_recreate());
        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::Deferred);
        let out = sched.draw_frame(&mut gpu).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { .. }));
        assert!(!sched.needs_recreate());
        assert_eq!(sched.recreations(), 1);
    }

    #[test]
    fn back_to_back_rebuilds_leave_the_same_image_set() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.present_script
            .extend([Presented::OutOfDate, Presented::OutOfDate]);
        let mut sched = FrameScheduler::new(2, 3);

        sched.draw_frame(&mut gpu).unwrap();
        let after_first: Vec<_> = (0..3).map(|i| sched.image_owner(i)).collect();
        sched.draw_frame(&mut gpu).unwrap();
        let after_second: Vec<_> = (0..3).map(|i| sched.image_owner(i)).collect();

        assert_eq!(after_first, vec![None; 3]);
        assert_eq!(after_first, after_second);
        assert_eq!(sched.recreations(), 2);
    }

    #[test]
    fn backend_failures_are_fatal() {
        let mut gpu = SimGpu::new(2, 3);
        gpu.fail_submit = true;
        let mut sched = FrameScheduler::new(2, 3);

        assert_eq!(sched.draw_frame(&mut gpu), Err(SimError("device lost")));
        assert_eq!(sched.frames_presented(), 0);
    }
}
