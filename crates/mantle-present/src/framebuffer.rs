// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::PresentDevice;
use crate::error::{ChainError, ChainResult};

/// One framebuffer per chain index: `[color view, depth view]`.
#[derive(Default)]
pub struct FramebufferSet {
    framebuffers: Vec<vk::Framebuffer>,
}

impl FramebufferSet {
    pub fn build<D: PresentDevice>(
        device: &D,
        render_pass: vk::RenderPass,
        color_views: &[vk::ImageView],
        depth_views: impl IntoIterator<Item = vk::ImageView>,
        extent: vk::Extent2D,
    ) -> ChainResult<Self> {
        let mut set = Self {
            framebuffers: Vec::with_capacity(color_views.len()),
        };
        for (&color, depth) in color_views.iter().zip(depth_views) {
            match device.create_framebuffer(render_pass, &[color, depth], extent) {
                Ok(fb) => set.framebuffers.push(fb),
                Err(e) => {
                    set.destroy(device);
                    return Err(ChainError::create("framebuffer")(e));
                }
            }
        }
        Ok(set)
    }

    pub fn get(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn destroy<D: PresentDevice>(&mut self, device: &D) {
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb);
        }
    }
}
