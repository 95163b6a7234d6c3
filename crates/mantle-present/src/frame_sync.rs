// SPDX-License-Identifier: CEPL-1.0
//! The acquire → submit → present protocol.
//!
//! Two independent mappings keep the CPU from racing the GPU:
//!
//! - **slot → fence**: frame slots rotate round-robin; waiting on the slot's
//!   fence before acquiring bounds the CPU to `frames_in_flight` outstanding
//!   submissions.
//! - **image → fence**: the fence of the last frame that rendered to each chain
//!   image. The display may hand back an image whose previous frame belongs to
//!   a *different* slot (always possible when the chain has more images than
//!   there are slots), so `submit` waits on that fence too.
//!
//! ```text
//! slot:  Available --acquire--> Acquired --submit--> InFlight --acquire--> ...
//!                                                      (fence waited)
//! ```

use ash::vk;
use tracing::debug;

use crate::device::{PresentDevice, Submission};
use crate::error::{ChainError, ChainResult};

/// CPU frames allowed to have GPU work outstanding at once.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Result of asking for the next presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// Render into `index`. When `suboptimal`, the surface still accepts the
    /// image but the chain should be rebuilt after presenting it.
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    Ok,
    MustRebuild,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence observed signaled (or never used); free to acquire.
    Available,
    Acquired { image: u32 },
    /// Submitted and presented; the fence may still be pending.
    InFlight { image: u32 },
}

struct FrameSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    state: SlotState,
}

#[derive(Default)]
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    images_in_flight: Vec<Option<vk::Fence>>,
    current: usize,
    timeout_ns: u64,
}

impl FrameSynchronizer {
    pub fn new<D: PresentDevice>(
        device: &D,
        frames_in_flight: usize,
        image_count: usize,
        timeout_ns: u64,
    ) -> ChainResult<Self> {
        let mut sync = Self {
            slots: Vec::with_capacity(frames_in_flight),
            images_in_flight: vec![None; image_count],
            current: 0,
            timeout_ns,
        };
        for _ in 0..frames_in_flight.max(1) {
            if let Err(e) = sync.push_slot(device) {
                sync.destroy(device);
                return Err(e);
            }
        }
        debug!(
            "frame sync: {} slots over {} images",
            sync.slots.len(),
            image_count
        );
        Ok(sync)
    }

    fn push_slot<D: PresentDevice>(&mut self, device: &D) -> ChainResult<()> {
        let image_available = device
            .create_semaphore()
            .map_err(ChainError::create("image-available semaphore"))?;
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(ChainError::create("render-finished semaphore")(e));
            }
        };
        // Signaled so the first wait on each slot returns immediately.
        let in_flight = match device.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                device.destroy_semaphore(render_finished);
                device.destroy_semaphore(image_available);
                return Err(ChainError::create("in-flight fence")(e));
            }
        };
        self.slots.push(FrameSlot {
            image_available,
            render_finished,
            in_flight,
            state: SlotState::Available,
        });
        Ok(())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// `None` when `slot` is not below [`Self::frames_in_flight`].
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    /// Fence of the last frame that rendered into `image`, if any.
    pub fn image_fence(&self, image: u32) -> Option<vk::Fence> {
        self.images_in_flight.get(image as usize).copied().flatten()
    }

    fn wait<D: PresentDevice>(
        &self,
        device: &D,
        fence: vk::Fence,
        op: &'static str,
    ) -> ChainResult<()> {
        device
            .wait_for_fence(fence, self.timeout_ns)
            .map_err(|e| match e {
                vk::Result::TIMEOUT => ChainError::Timeout {
                    op,
                    timeout_ns: self.timeout_ns,
                },
                other => ChainError::frame(op)(other),
            })
    }

    pub fn acquire<D: PresentDevice>(
        &mut self,
        device: &D,
        swapchain: vk::SwapchainKHR,
    ) -> ChainResult<Acquired> {
        // 1) Bound the CPU: this slot's previous submission must be done.
        let fence = self.slots[self.current].in_flight;
        self.wait(device, fence, "wait for frame slot")?;
        let slot = &mut self.slots[self.current];
        slot.state = SlotState::Available;

        // 2) The semaphore is consumed by the GPU at submit, not waited here.
        match device.acquire_next_image(swapchain, self.timeout_ns, slot.image_available) {
            Ok((index, suboptimal)) => {
                slot.state = SlotState::Acquired { image: index };
                Ok(Acquired::Image { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(ChainError::Timeout {
                op: "acquire_next_image",
                timeout_ns: self.timeout_ns,
            }),
            Err(e) => Err(ChainError::frame("acquire_next_image")(e)),
        }
    }

    pub fn submit<D: PresentDevice>(
        &mut self,
        device: &D,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        command_buffer: vk::CommandBuffer,
    ) -> ChainResult<ChainStatus> {
        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            return Err(ChainError::ImageIndex {
                index: image_index,
                count: self.images_in_flight.len(),
            });
        }
        if self.slots[self.current].state != (SlotState::Acquired { image: image_index }) {
            return Err(ChainError::NotAcquired { index: image_index });
        }

        // 1) An older frame from another slot may still be rendering here.
        if let Some(previous) = self.images_in_flight[image] {
            self.wait(device, previous, "wait for image in flight")?;
        }

        // 2) From now on this image belongs to the current slot's fence.
        let slot = &self.slots[self.current];
        self.images_in_flight[image] = Some(slot.in_flight);

        // 3) Fences must be unsignaled before being armed again.
        device
            .reset_fence(slot.in_flight)
            .map_err(ChainError::frame("reset_fences"))?;
        let submission = Submission {
            wait_semaphore: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            command_buffer,
            signal_semaphore: slot.render_finished,
            fence: slot.in_flight,
        };
        device
            .submit_graphics(&submission)
            .map_err(ChainError::frame("queue_submit"))?;

        // 4) Present once rendering has finished.
        let presented = device.present(swapchain, image_index, slot.render_finished);

        // 5) Rotate regardless of what present reported.
        self.slots[self.current].state = SlotState::InFlight { image: image_index };
        self.current = (self.current + 1) % self.slots.len();

        match presented {
            Ok(false) => Ok(ChainStatus::Ok),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(ChainStatus::MustRebuild),
            Err(e) => Err(ChainError::frame("queue_present")(e)),
        }
    }

    pub fn destroy<D: PresentDevice>(&mut self, device: &D) {
        for slot in self.slots.drain(..) {
            device.destroy_semaphore(slot.render_finished);
            device.destroy_semaphore(slot.image_available);
            device.destroy_fence(slot.in_flight);
        }
        self.images_in_flight.clear();
        self.current = 0;
    }
}
