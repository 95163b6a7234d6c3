// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::PresentDevice;
use crate::error::{ChainError, ChainResult};

pub const COLOR_ATTACHMENT: u32 = 0;
pub const DEPTH_ATTACHMENT: u32 = 1;

/// Plain-value description of the chain's render pass: one color attachment
/// that ends up presentable, one depth attachment that is thrown away, a
/// single graphics subpass and one external dependency.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderPassDesc {
    pub attachments: [vk::AttachmentDescription; 2],
    pub color_ref: vk::AttachmentReference,
    pub depth_ref: vk::AttachmentReference,
    pub dependency: vk::SubpassDependency,
}

impl RenderPassDesc {
    pub fn new(color_format: vk::Format, depth_format: vk::Format) -> Self {
        let color = vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        // Depth is not read after the frame.
        let depth = vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        };

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        // Attachment clears must not race the previous user of the swap image.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: stages,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };

        Self {
            attachments: [color, depth],
            color_ref: vk::AttachmentReference {
                attachment: COLOR_ATTACHMENT,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            depth_ref: vk::AttachmentReference {
                attachment: DEPTH_ATTACHMENT,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
            dependency,
        }
    }

    pub fn color_format(&self) -> vk::Format {
        self.attachments[COLOR_ATTACHMENT as usize].format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.attachments[DEPTH_ATTACHMENT as usize].format
    }

    /// Pipelines built against one pass can be reused with the other.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.color_format() == other.color_format() && self.depth_format() == other.depth_format()
    }
}

#[derive(Default)]
pub struct ChainRenderPass {
    handle: vk::RenderPass,
    desc: RenderPassDesc,
}

impl ChainRenderPass {
    pub fn build<D: PresentDevice>(
        device: &D,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> ChainResult<Self> {
        let desc = RenderPassDesc::new(color_format, depth_format);
        let handle = device
            .create_render_pass(&desc)
            .map_err(ChainError::create("render pass"))?;
        Ok(Self { handle, desc })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    pub fn destroy<D: PresentDevice>(&mut self, device: &D) {
        let handle = std::mem::replace(&mut self.handle, vk::RenderPass::null());
        if handle != vk::RenderPass::null() {
            device.destroy_render_pass(handle);
        }
    }
}
