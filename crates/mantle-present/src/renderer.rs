// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use mantle_render::{FrameOutcome, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::chain::PresentConfig;
use crate::context::VkContext;
use crate::presenter::{Presenter, Rebuilt};
use crate::surface::{format_name, present_mode_name};

const DEFAULT_CLEAR: [f32; 4] = [0.02, 0.02, 0.04, 1.0];

struct CommandResources {
    pool: vk::CommandPool,
    bufs: Vec<vk::CommandBuffer>,
}

/// Clears every chain image to a solid color through the chain's render pass.
pub struct VkRenderer {
    presenter: Presenter<VkContext>,
    context: Arc<VkContext>,
    commands: CommandResources,
    clear: [f32; 4],
}

fn extent_of(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

unsafe fn create_command_pool(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    Ok(unsafe { device.create_command_pool(&pool_info, None) }.context("create_command_pool")?)
}

impl VkRenderer {
    /// Same as [`Renderer::new`] with an explicit wait bound for the chain.
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: PresentConfig,
    ) -> Result<Self> {
        let context = Arc::new(VkContext::new(window, display)?);
        let pool = unsafe { create_command_pool(context.device(), context.graphics_family()) }?;
        let commands = CommandResources {
            pool,
            bufs: Vec::new(),
        };
        // From here on `Drop` releases the pool.
        let presenter = match Presenter::new(Arc::clone(&context), extent_of(size), config) {
            Ok(p) => p,
            Err(e) => {
                unsafe { context.device().destroy_command_pool(pool, None) };
                return Err(e).context("build presentation chain");
            }
        };

        let mut renderer = Self {
            presenter,
            context,
            commands,
            clear: DEFAULT_CLEAR,
        };
        renderer.handle_rebuild()?;
        if let Some(chain) = renderer.presenter.chain() {
            let extent = chain.extent();
            info!(
                "Vulkan presentation ready ({}x{}, {} / {}, {})",
                extent.width,
                extent.height,
                format_name(chain.color_format()),
                format_name(chain.depth_format()),
                present_mode_name(chain.present_mode())
            );
        }
        Ok(renderer)
    }

    /// Aspect ratio of the current chain extent, if one is live.
    pub fn aspect_ratio(&self) -> Option<f32> {
        self.presenter.chain().map(|c| c.aspect_ratio())
    }

    fn handle_rebuild(&mut self) -> Result<()> {
        let Some(Rebuilt { pipelines_stale }) = self.presenter.take_rebuild_notice() else {
            return Ok(());
        };
        if pipelines_stale {
            debug!("vk: render pass formats changed");
        }
        unsafe {
            self.resize_command_buffers()?;
            self.record_commands()
        }
    }

    unsafe fn resize_command_buffers(&mut self) -> Result<()> {
        let want = self
            .presenter
            .chain()
            .map(|c| c.image_count())
            .unwrap_or(0);
        if want == self.commands.bufs.len() {
            return Ok(());
        }
        let device = self.context.device();
        if !self.commands.bufs.is_empty() {
            unsafe { device.free_command_buffers(self.commands.pool, &self.commands.bufs) };
            self.commands.bufs.clear();
        }
        if want == 0 {
            return Ok(());
        }
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.commands.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: want as u32,
            ..Default::default()
        };
        self.commands.bufs = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")?;
        debug!("vk: {want} command buffers");
        Ok(())
    }

    unsafe fn record_one_command(&self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let Some(chain) = self.presenter.chain() else {
            return Ok(());
        };
        let device = self.context.device();

        // reset + begin
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            device.begin_command_buffer(cmd, &begin)?;
        }

        // body: color + depth clear through the chain's render pass
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: chain.render_pass(),
            framebuffer: chain
                .framebuffer(image_index)
                .with_context(|| format!("no framebuffer for image {image_index}"))?,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: chain.extent(),
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cmd);

            // end
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    unsafe fn record_commands(&self) -> Result<()> {
        for (i, &cmd) in self.commands.bufs.iter().enumerate() {
            unsafe { self.record_one_command(cmd, i as u32) }
                .with_context(|| format!("record command buffer {i}"))?;
        }
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_config(window, display, size, PresentConfig::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.presenter
            .resize(extent_of(size))
            .context("resize presentation chain")?;
        self.handle_rebuild()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.clear = rgba;
        // Buffers may still be pending on the GPU.
        self.presenter
            .wait_idle()
            .context("wait before re-recording commands")?;
        unsafe { self.record_commands() }.inspect_err(|e| {
            warn!("vk: command buffers keep the previous clear color: {e:#}");
        })
    }

    // STRICT PER-FRAME ORDER:
    // 1) begin_frame: slot fence wait, then acquire
    // 2) pick up a rebuild that happened on the way (re-record)
    // 3) end_frame: image fence wait, submit, present
    fn render(&mut self) -> Result<FrameOutcome> {
        let Some(frame) = self.presenter.begin_frame().context("begin frame")? else {
            self.handle_rebuild()?;
            return Ok(FrameOutcome::Skipped);
        };
        self.handle_rebuild()?;

        let cmd = *self
            .commands
            .bufs
            .get(frame.image_index as usize)
            .with_context(|| format!("no command buffer for image {}", frame.image_index))?;
        self.presenter.end_frame(frame, cmd).context("end frame")?;
        self.handle_rebuild()?;
        Ok(FrameOutcome::Presented)
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            device.device_wait_idle().ok();
            if !self.commands.bufs.is_empty() {
                device.free_command_buffers(self.commands.pool, &self.commands.bufs);
            }
            device.destroy_command_pool(self.commands.pool, None);
        }
    }
}
