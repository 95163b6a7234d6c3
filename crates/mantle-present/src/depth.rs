// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info};

use crate::device::PresentDevice;
use crate::error::{ChainError, ChainResult};
use crate::surface::format_name;

/// Priority order for the depth attachment format.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn pick_depth_format<D: PresentDevice>(device: &D) -> ChainResult<vk::Format> {
    device
        .find_supported_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .ok_or_else(|| ChainError::NoDepthFormat {
            candidates: DEPTH_CANDIDATES.to_vec(),
        })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

struct DepthImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// One depth image per chain image, all in the same format and extent.
#[derive(Default)]
pub struct DepthAttachments {
    format: vk::Format,
    images: Vec<DepthImage>,
}

impl DepthAttachments {
    pub fn build<D: PresentDevice>(
        device: &D,
        format: vk::Format,
        extent: vk::Extent2D,
        count: usize,
    ) -> ChainResult<Self> {
        info!("depth format: {}", format_name(format));
        let mut attachments = Self {
            format,
            images: Vec::with_capacity(count),
        };
        for _ in 0..count {
            if let Err(e) = attachments.push_one(device, extent) {
                attachments.destroy(device);
                return Err(e);
            }
        }
        debug!("{} depth attachments at {}x{}", count, extent.width, extent.height);
        Ok(attachments)
    }

    fn push_one<D: PresentDevice>(&mut self, device: &D, extent: vk::Extent2D) -> ChainResult<()> {
        let (image, memory) = device
            .create_attachment_image(
                extent,
                self.format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .map_err(ChainError::create("depth image"))?;
        let aspect = if has_stencil(self.format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };
        let view = match device.create_image_view(image, self.format, aspect) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image);
                device.free_memory(memory);
                return Err(ChainError::create("depth image view")(e));
            }
        };
        self.images.push(DepthImage {
            image,
            memory,
            view,
        });
        Ok(())
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// # Panics
    ///
    /// If `index` is not below [`Self::len`].
    pub fn view(&self, index: usize) -> vk::ImageView {
        self.images[index].view
    }

    // view → image → memory, per attachment
    pub fn destroy<D: PresentDevice>(&mut self, device: &D) {
        for depth in self.images.drain(..) {
            device.destroy_image_view(depth.view);
            device.destroy_image(depth.image);
            device.free_memory(depth.memory);
        }
    }
}
