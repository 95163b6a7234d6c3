// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info};

use crate::device::{ChainRequest, ImageSharing, PresentDevice};
use crate::error::{ChainError, ChainResult};
use crate::surface::{self, SurfaceConfig};

/// The presentable images and one color view per image. The images belong to
/// the display subsystem; only the views and the chain handle are ours.
#[derive(Default)]
pub struct ImageChain {
    swapchain: vk::SwapchainKHR,
    config: SurfaceConfig,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl ImageChain {
    /// `previous` is the recreation hint (null on first build). It stays owned
    /// by the caller, who must destroy it once this chain is live.
    pub fn build<D: PresentDevice>(
        device: &D,
        window: vk::Extent2D,
        previous: vk::SwapchainKHR,
    ) -> ChainResult<Self> {
        let support = device
            .surface_support()
            .map_err(ChainError::query("surface support"))?;
        let selected = surface::select(&support, window);

        let request = ChainRequest {
            min_image_count: selected.image_count,
            surface_format: selected.surface_format,
            present_mode: selected.present_mode,
            extent: selected.extent,
            sharing: ImageSharing::for_families(device.queue_families()),
            pre_transform: support.capabilities.current_transform,
            old_swapchain: previous,
        };

        info!(
            "format: {} / {}, present_mode: {}, extent: {}x{}, images(min={} → picked={}), sharing: {:?}",
            surface::format_name(request.surface_format.format),
            surface::color_space_name(request.surface_format.color_space),
            surface::present_mode_name(request.present_mode),
            request.extent.width,
            request.extent.height,
            support.capabilities.min_image_count,
            request.min_image_count,
            request.sharing,
        );

        let swapchain = device
            .create_swapchain(&request)
            .map_err(ChainError::create("image chain"))?;

        // We only asked for a minimum; the implementation may hand back more.
        let images = match device.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(swapchain);
                return Err(ChainError::query("chain images")(e));
            }
        };

        let mut chain = Self {
            swapchain,
            config: SurfaceConfig {
                image_count: images.len() as u32,
                ..selected
            },
            images,
            views: Vec::new(),
        };

        if let Err(e) = chain.create_views(device) {
            chain.destroy(device);
            return Err(e);
        }
        debug!("image chain ready with {} images", chain.images.len());
        Ok(chain)
    }

    fn create_views<D: PresentDevice>(&mut self, device: &D) -> ChainResult<()> {
        self.views.reserve(self.images.len());
        for &image in &self.images {
            let view = device
                .create_image_view(
                    image,
                    self.config.surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                )
                .map_err(ChainError::create("chain image view"))?;
            self.views.push(view);
        }
        Ok(())
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, index: usize) -> Option<vk::Image> {
        self.images.get(index).copied()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Destroys the views but keeps the chain handle alive so it can serve as
    /// the recreation hint. Returns that handle.
    pub fn retire<D: PresentDevice>(&mut self, device: &D) -> vk::SwapchainKHR {
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        self.images.clear();
        std::mem::replace(&mut self.swapchain, vk::SwapchainKHR::null())
    }

    pub fn destroy<D: PresentDevice>(&mut self, device: &D) {
        let swapchain = self.retire(device);
        if swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain(swapchain);
        }
    }
}
