// SPDX-License-Identifier: CEPL-1.0
//! Vulkan presentation chain: the images the window shows, the depth buffers
//! and render pass that go with them, and the acquire/submit/present protocol
//! that keeps the CPU from racing the GPU.
#![deny(unsafe_op_in_unsafe_fn)]

mod chain;
mod context;
mod depth;
mod device;
mod error;
mod frame_sync;
mod framebuffer;
mod image_chain;
mod presenter;
mod render_pass;
mod renderer;
pub mod surface;

pub use chain::{PresentConfig, PresentationChain};
pub use context::VkContext;
pub use depth::{has_stencil, pick_depth_format, DepthAttachments, DEPTH_CANDIDATES};
pub use device::{
    ChainRequest, ImageSharing, PresentDevice, QueueFamilies, Submission, SurfaceSupport,
};
pub use error::{ChainError, ChainResult};
pub use frame_sync::{Acquired, ChainStatus, FrameSynchronizer, SlotState, FRAMES_IN_FLIGHT};
pub use framebuffer::FramebufferSet;
pub use image_chain::ImageChain;
pub use presenter::{Frame, Presenter, Rebuilt};
pub use render_pass::{ChainRenderPass, RenderPassDesc, COLOR_ATTACHMENT, DEPTH_ATTACHMENT};
pub use renderer::VkRenderer;
pub use surface::SurfaceConfig;

// Re-exported so callers can name handles without depending on ash directly.
pub use ash::vk;
