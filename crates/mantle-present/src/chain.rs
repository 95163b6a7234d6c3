// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};

use crate::depth::{pick_depth_format, DepthAttachments};
use crate::device::PresentDevice;
use crate::error::{ChainError, ChainResult};
use crate::frame_sync::{Acquired, ChainStatus, FrameSynchronizer, FRAMES_IN_FLIGHT};
use crate::framebuffer::FramebufferSet;
use crate::image_chain::ImageChain;
use crate::render_pass::{ChainRenderPass, RenderPassDesc};

/// Knobs the frame loop hands to the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentConfig {
    /// Upper bound for every fence wait and acquire. `u64::MAX` waits forever.
    pub timeout_ns: u64,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            timeout_ns: u64::MAX,
        }
    }
}

impl PresentConfig {
    /// `None` means wait forever.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        let timeout_ns = timeout
            .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX);
        Self { timeout_ns }
    }
}

/// Presentable images, depth attachments, render pass, framebuffers and the
/// frame synchronizer for one surface configuration.
///
/// Everything is torn down by [`PresentationChain::teardown`] in reverse
/// dependency order; `Drop` only calls it after the device goes idle.
pub struct PresentationChain<D: PresentDevice> {
    device: Arc<D>,
    config: PresentConfig,
    images: ImageChain,
    render_pass: ChainRenderPass,
    depth: DepthAttachments,
    framebuffers: FramebufferSet,
    sync: FrameSynchronizer,
}

impl<D: PresentDevice> PresentationChain<D> {
    pub fn new(device: Arc<D>, window: vk::Extent2D, config: PresentConfig) -> ChainResult<Self> {
        Self::build(device, window, config, vk::SwapchainKHR::null())
    }

    /// Tears this chain down and builds its replacement, handing the old image
    /// chain to the display subsystem as the recreation hint. The old chain is
    /// released once the new one is live (or has failed to build).
    pub fn recreate(mut self, window: vk::Extent2D) -> ChainResult<Self> {
        self.device
            .wait_idle()
            .map_err(ChainError::frame("device_wait_idle"))?;

        let retired = self.retire();
        let device = Arc::clone(&self.device);
        let config = self.config;
        drop(self);

        let rebuilt = Self::build(device, window, config, retired.handle());
        retired.release();
        rebuilt
    }

    fn build(
        device: Arc<D>,
        window: vk::Extent2D,
        config: PresentConfig,
        previous: vk::SwapchainKHR,
    ) -> ChainResult<Self> {
        // Anything built before a failing step is torn down by `Drop`.
        let mut chain = Self {
            device,
            config,
            images: ImageChain::default(),
            render_pass: ChainRenderPass::default(),
            depth: DepthAttachments::default(),
            framebuffers: FramebufferSet::default(),
            sync: FrameSynchronizer::default(),
        };
        let device = &*chain.device;

        // STRICT ORDER:
        // 1) image chain + color views
        // 2) render pass (needs color + depth formats)
        // 3) depth attachments at the chain extent
        // 4) framebuffers binding (color view, depth view) pairs
        // 5) frame slots + image table
        chain.images = ImageChain::build(device, window, previous)?;
        let depth_format = pick_depth_format(device)?;
        chain.render_pass = ChainRenderPass::build(device, chain.images.format(), depth_format)?;
        chain.depth =
            DepthAttachments::build(device, depth_format, chain.images.extent(), chain.images.len())?;
        chain.framebuffers = FramebufferSet::build(
            device,
            chain.render_pass.handle(),
            chain.images.views(),
            (0..chain.depth.len()).map(|i| chain.depth.view(i)),
            chain.images.extent(),
        )?;
        chain.sync = FrameSynchronizer::new(
            device,
            FRAMES_IN_FLIGHT,
            chain.images.len(),
            config.timeout_ns,
        )?;

        let extent = chain.extent();
        info!(
            "presentation chain ready ({}x{}, {} images, {} frames in flight)",
            extent.width,
            extent.height,
            chain.image_count(),
            chain.sync.frames_in_flight()
        );
        Ok(chain)
    }

    /// Blocks on the current slot's fence, then asks for the next image.
    pub fn acquire_next_image(&mut self) -> ChainResult<Acquired> {
        self.sync.acquire(&*self.device, self.images.handle())
    }

    /// Submits `command_buffer` for `image_index` and presents it.
    pub fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> ChainResult<ChainStatus> {
        self.sync
            .submit(&*self.device, self.images.handle(), image_index, command_buffer)
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.images.handle()
    }

    /// `None` when `index` is not below [`Self::image_count`]; the same holds
    /// for [`Self::image_view`] and [`Self::image`].
    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize)
    }

    pub fn image_view(&self, index: u32) -> Option<vk::ImageView> {
        self.images.views().get(index as usize).copied()
    }

    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.images.image(index as usize)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub fn render_pass_desc(&self) -> &RenderPassDesc {
        self.render_pass.desc()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.images.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn color_format(&self) -> vk::Format {
        self.images.format()
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth.format()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.images.config().present_mode
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    pub fn current_frame(&self) -> usize {
        self.sync.current_slot()
    }

    pub fn sync(&self) -> &FrameSynchronizer {
        &self.sync
    }

    pub fn config(&self) -> PresentConfig {
        self.config
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Same color and depth formats: pipelines built for one work with the other.
    pub fn is_format_compatible_with(&self, other: &Self) -> bool {
        self.render_pass_desc()
            .is_compatible_with(other.render_pass_desc())
    }

    /// Everything except the image chain handle, which is returned for use as
    /// the recreation hint.
    fn retire(&mut self) -> RetiredChain<D> {
        let device = &*self.device;
        self.framebuffers.destroy(device);
        self.depth.destroy(device);
        self.render_pass.destroy(device);
        let swapchain = self.images.retire(device);
        self.sync.destroy(device);
        RetiredChain {
            device: Arc::clone(&self.device),
            swapchain,
        }
    }

    // STRICT TEARDOWN ORDER:
    // - framebuffers before the render pass and before any view they bind
    // - depth: view, then image, then memory
    // - render pass
    // - color views (images are not ours)
    // - frame slots
    // - the image chain handle itself, on release
    // Safe to call repeatedly; every step skips what is already gone.
    fn teardown(&mut self) {
        self.retire().release();
    }
}

impl<D: PresentDevice> Drop for PresentationChain<D> {
    fn drop(&mut self) {
        // Nothing may still be reading from what we are about to free.
        self.device.wait_idle().ok();
        self.teardown();
        debug!("presentation chain destroyed");
    }
}

/// An image chain whose dependents are gone, kept only as a recreation hint.
#[must_use = "a retired chain must be released once its replacement is live"]
struct RetiredChain<D: PresentDevice> {
    device: Arc<D>,
    swapchain: vk::SwapchainKHR,
}

impl<D: PresentDevice> RetiredChain<D> {
    fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    fn release(mut self) {
        self.destroy();
    }

    fn destroy(&mut self) {
        let swapchain = std::mem::replace(&mut self.swapchain, vk::SwapchainKHR::null());
        if swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(swapchain);
        }
    }
}

impl<D: PresentDevice> Drop for RetiredChain<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
