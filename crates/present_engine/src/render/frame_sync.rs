//! Per-frame synchronization: acquire, submit, present
//!
//! Each frame waits on "image available" before its commands run and
//! signals "render complete" for present to wait on. With one frame in
//! flight a single semaphore pair is shared by every frame and the CPU never
//! waits on a fence; frames are kept strictly sequential by the phase check
//! instead. With more frames in flight each slot gets its own pair and a
//! fence, and each swapchain image remembers the fence of the frame that
//! last rendered into it.

use std::time::{Duration, Instant};

use ash::vk;
use log::{debug, trace};

use crate::config::MAX_FRAMES_IN_FLIGHT;
use crate::render::backend::{GpuDevice, PresentationSurface};
use crate::render::error::{classify, PhaseExt, RenderError, RenderResult, SetupPhase};
use crate::render::swapchain::{PresentOutcome, SwapchainManager};

/// Synchronization objects for one frame slot
#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    image_available: vk::Semaphore,
    render_complete: vk::Semaphore,
    /// Null when frames are not pipelined
    in_flight: vk::Fence,
}

impl FrameSlot {
    fn new(device: &dyn GpuDevice, with_fence: bool) -> RenderResult<Self> {
        let phase = SetupPhase::SurfaceBinding;
        let image_available = device.create_semaphore().during(phase)?;
        let render_complete = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(classify(phase, e));
            }
        };
        let in_flight = if with_fence {
            match device.create_fence(true) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available);
                    device.destroy_semaphore(render_complete);
                    return Err(classify(phase, e));
                }
            }
        } else {
            vk::Fence::null()
        };
        Ok(Self {
            image_available,
            render_complete,
            in_flight,
        })
    }

    fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_complete);
        if self.in_flight != vk::Fence::null() {
            device.destroy_fence(self.in_flight);
        }
    }
}

/// Where the current frame is in its three-call cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// No frame in progress
    Idle,
    /// Image acquired, commands not yet submitted
    Acquired {
        /// Acquired image index
        image_index: u32,
    },
    /// Commands submitted, image not yet presented
    Submitted {
        /// Image being rendered
        image_index: u32,
    },
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames handed to the presentation engine
    pub frames_presented: u64,
    /// Frames abandoned because the swapchain went stale
    pub frames_dropped: u64,
    /// Acquires or presents that reported a suboptimal swapchain
    pub suboptimal: u64,
    /// Swapchain generations replaced
    pub recreations: u64,
    /// CPU time from `begin_frame` to the end of `end_frame`
    pub last_frame_time: Duration,
}

/// Orchestrates acquire, submit and present for one renderer
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    images_in_flight: Vec<vk::Fence>,
    current_slot: usize,
    phase: FramePhase,
    acquire_timeout_ns: u64,
    frame_started: Option<Instant>,
    stats: FrameStats,
}

impl FrameSynchronizer {
    /// Create synchronization objects for `frames_in_flight` slots
    pub fn new(
        device: &dyn GpuDevice,
        frames_in_flight: u32,
        image_count: u32,
        acquire_timeout_ns: u64,
    ) -> RenderResult<Self> {
        let frames = frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT) as usize;
        let pipelined = frames > 1;

        let mut slots = Vec::with_capacity(frames);
        for _ in 0..frames {
            match FrameSlot::new(device, pipelined) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    slots.iter().for_each(|s| s.destroy(device));
                    return Err(e);
                }
            }
        }
        debug!(
            "Created frame synchronizer: {frames} slot(s), {}",
            if pipelined { "fenced" } else { "single semaphore pair" }
        );

        Ok(Self {
            slots,
            images_in_flight: vec![vk::Fence::null(); image_count as usize],
            current_slot: 0,
            phase: FramePhase::Idle,
            acquire_timeout_ns,
            frame_started: None,
            stats: FrameStats::default(),
        })
    }

    /// Whether frames overlap on the GPU
    pub fn is_pipelined(&self) -> bool {
        self.slots.len() > 1
    }

    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frame counters
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Acquire the next image using the slot's "image available" semaphore
    ///
    /// On error the phase stays `Idle` and no semaphore is left pending.
    pub fn begin_frame<S: PresentationSurface>(
        &mut self,
        device: &dyn GpuDevice,
        swapchain: &SwapchainManager<S>,
    ) -> RenderResult<u32> {
        if self.phase != FramePhase::Idle {
            return Err(RenderError::invalid_state("begin_frame", self.phase));
        }
        let slot = self.slot()?;
        self.frame_started = Some(Instant::now());

        if self.is_pipelined() {
            device
                .wait_for_fence(slot.in_flight, u64::MAX)
                .during(SetupPhase::FrameLoop)?;
        }

        let acquired = swapchain.acquire_next(device, slot.image_available, self.acquire_timeout_ns)?;
        if acquired.suboptimal {
            self.stats.suboptimal += 1;
        }

        if self.is_pipelined() {
            let index = acquired.index as usize;
            if index >= self.images_in_flight.len() {
                self.images_in_flight.resize(index + 1, vk::Fence::null());
            }
            let previous = self.images_in_flight[index];
            if previous != vk::Fence::null() && previous != slot.in_flight {
                device.wait_for_fence(previous, u64::MAX).during(SetupPhase::FrameLoop)?;
            }
            self.images_in_flight[index] = slot.in_flight;
        }

        self.phase = FramePhase::Acquired {
            image_index: acquired.index,
        };
        Ok(acquired.index)
    }

    /// Submit the command buffer recorded for the acquired image
    pub fn submit(&mut self, device: &dyn GpuDevice, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let FramePhase::Acquired { image_index } = self.phase else {
            return Err(RenderError::invalid_state("submit", self.phase));
        };
        let slot = self.slot()?;

        if self.is_pipelined() {
            device.reset_fence(slot.in_flight).during(SetupPhase::FrameLoop)?;
        }

        let submitted = device.queue_submit(
            command_buffer,
            slot.image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            slot.render_complete,
            slot.in_flight,
        );
        if let Err(e) = submitted {
            self.phase = FramePhase::Idle;
            return Err(classify(SetupPhase::FrameLoop, e));
        }

        self.phase = FramePhase::Submitted { image_index };
        Ok(())
    }

    /// Present the image once "render complete" is signaled
    ///
    /// The frame ends whether or not present succeeds.
    pub fn end_frame<S: PresentationSurface>(
        &mut self,
        device: &dyn GpuDevice,
        swapchain: &SwapchainManager<S>,
        image_index: u32,
    ) -> RenderResult<PresentOutcome> {
        match self.phase {
            FramePhase::Submitted { image_index: submitted } if submitted == image_index => {}
            phase => return Err(RenderError::invalid_state("end_frame", phase)),
        }
        let slot = self.slot()?;

        let result = swapchain.present(device, image_index, slot.render_complete);
        self.phase = FramePhase::Idle;
        self.current_slot = (self.current_slot + 1) % self.slots.len();

        if let Some(started) = self.frame_started.take() {
            self.stats.last_frame_time = started.elapsed();
            trace!("Frame time: {:?}", self.stats.last_frame_time);
        }

        let outcome = result?;
        self.stats.frames_presented += 1;
        if outcome == PresentOutcome::Suboptimal {
            self.stats.suboptimal += 1;
        }
        Ok(outcome)
    }

    /// Count a frame lost to swapchain staleness
    pub fn record_dropped_frame(&mut self) {
        self.stats.frames_dropped += 1;
    }

    /// Reset per-image state after the swapchain was recreated
    ///
    /// Only valid while the device is idle.
    pub fn rebuild_for_swapchain(&mut self, image_count: u32) {
        self.images_in_flight = vec![vk::Fence::null(); image_count as usize];
        self.phase = FramePhase::Idle;
        self.frame_started = None;
        self.stats.recreations += 1;
    }

    /// Destroy every semaphore and fence; safe to call more than once
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
        self.images_in_flight.clear();
        self.phase = FramePhase::Idle;
    }

    fn slot(&self) -> RenderResult<FrameSlot> {
        self.slots
            .get(self.current_slot)
            .copied()
            .ok_or_else(|| RenderError::invalid_state("frame", "synchronizer destroyed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{Event, FakeDevice, FakeGpu, FakeSurface, Reply};
    use ash::vk::Handle;

    fn setup(frames: u32) -> (FakeGpu, FakeDevice, SwapchainManager<FakeSurface>, FrameSynchronizer) {
        let gpu = FakeGpu::new();
        let device = gpu.device(0);
        let mut swapchain = SwapchainManager::new(gpu.surface());
        swapchain.negotiate(&device).unwrap();
        swapchain
            .create(&device, vk::Extent2D { width: 800, height: 600 }, false)
            .unwrap();
        let sync = FrameSynchronizer::new(&device, frames, swapchain.image_count(), u64::MAX).unwrap();
        gpu.clear_events();
        (gpu, device, swapchain, sync)
    }

    fn run_frame(device: &FakeDevice, swapchain: &SwapchainManager<FakeSurface>, sync: &mut FrameSynchronizer) -> u32 {
        let index = sync.begin_frame(device, swapchain).unwrap();
        sync.submit(device, vk::CommandBuffer::from_raw(u64::from(index) + 1)).unwrap();
        sync.end_frame(device, swapchain, index).unwrap();
        index
    }

    #[test]
    fn test_single_pair_orders_acquire_submit_present() {
        let (gpu, device, swapchain, mut sync) = setup(1);
        assert!(!sync.is_pipelined());

        run_frame(&device, &swapchain, &mut sync);

        let events = gpu.events();
        let (acquire_signal, submit_wait, submit_signal, fence, present_wait) = match events.as_slice() {
            [Event::Acquire { signal, .. }, Event::Submit { wait, signal: done, fence, .. }, Event::Present { wait: pw, .. }] => {
                (*signal, *wait, *done, *fence, *pw)
            }
            other => panic!("unexpected events: {other:?}"),
        };
        assert_eq!(acquire_signal, submit_wait);
        assert_eq!(submit_signal, present_wait);
        assert_ne!(submit_wait, submit_signal);
        assert_eq!(fence, 0);
        assert_eq!(sync.stats().frames_presented, 1);
    }

    #[test]
    fn test_single_pair_is_shared_across_frames() {
        let (gpu, device, swapchain, mut sync) = setup(1);
        run_frame(&device, &swapchain, &mut sync);
        run_frame(&device, &swapchain, &mut sync);

        let signals: Vec<u64> = gpu
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Acquire { signal, .. } => Some(*signal),
                _ => None,
            })
            .collect();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0], signals[1]);
    }

    #[test]
    fn test_out_of_order_calls_are_rejected() {
        let (_gpu, device, swapchain, mut sync) = setup(1);
        let cb = vk::CommandBuffer::from_raw(1);

        assert!(matches!(sync.submit(&device, cb), Err(RenderError::InvalidState { .. })));
        assert!(matches!(
            sync.end_frame(&device, &swapchain, 0),
            Err(RenderError::InvalidState { .. })
        ));

        let index = sync.begin_frame(&device, &swapchain).unwrap();
        assert!(matches!(
            sync.begin_frame(&device, &swapchain),
            Err(RenderError::InvalidState { .. })
        ));
        sync.submit(&device, cb).unwrap();
        assert!(matches!(
            sync.end_frame(&device, &swapchain, index + 1),
            Err(RenderError::InvalidState { .. })
        ));
        sync.end_frame(&device, &swapchain, index).unwrap();
        assert_eq!(sync.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_failed_acquire_leaves_phase_idle() {
        let (gpu, device, swapchain, mut sync) = setup(1);
        gpu.state()
            .faults
            .acquire
            .push_back(Reply::Fail(vk::Result::ERROR_OUT_OF_DATE_KHR));

        assert!(matches!(sync.begin_frame(&device, &swapchain), Err(RenderError::OutOfDate)));
        assert_eq!(sync.phase(), FramePhase::Idle);
        run_frame(&device, &swapchain, &mut sync);
    }

    #[test]
    fn test_stale_present_still_ends_frame() {
        let (gpu, device, swapchain, mut sync) = setup(1);
        gpu.state()
            .faults
            .present
            .push_back(Reply::Fail(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let index = sync.begin_frame(&device, &swapchain).unwrap();
        sync.submit(&device, vk::CommandBuffer::from_raw(1)).unwrap();
        assert!(sync.end_frame(&device, &swapchain, index).unwrap_err().is_recoverable());
        assert_eq!(sync.phase(), FramePhase::Idle);
        assert_eq!(sync.stats().frames_presented, 0);
    }

    #[test]
    fn test_pipelined_slots_wait_on_their_fences() {
        let (gpu, device, swapchain, mut sync) = setup(2);
        assert!(sync.is_pipelined());

        for _ in 0..3 {
            run_frame(&device, &swapchain, &mut sync);
        }

        let events = gpu.events();
        let submits: Vec<(u64, u64)> = events
            .iter()
            .filter_map(|e| match e {
                Event::Submit { wait, fence, .. } => Some((*wait, *fence)),
                _ => None,
            })
            .collect();
        // Slots alternate, the third frame reuses the first slot
        assert_ne!(submits[0], submits[1]);
        assert_eq!(submits[0], submits[2]);
        assert!(submits.iter().all(|(_, fence)| *fence != 0));

        // Every submit is preceded by a reset of its own fence
        for (position, event) in events.iter().enumerate() {
            if let Event::Submit { fence, .. } = event {
                assert_eq!(events[position - 1], Event::ResetFence(*fence));
            }
        }
        // Each frame starts by waiting on its slot fence
        assert!(matches!(events[0], Event::WaitFence(f) if f == submits[0].1));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (gpu, device, mut swapchain, mut sync) = setup(3);
        run_frame(&device, &swapchain, &mut sync);

        sync.destroy(&device);
        sync.destroy(&device);
        swapchain.teardown(Some(&device));
        assert_eq!(gpu.live_objects(), 0);
        assert!(sync.begin_frame(&device, &swapchain).is_err());
    }
}
