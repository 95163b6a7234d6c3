// SPDX-License-Identifier: CEPL-1.0
//! Owns the presentation chain on behalf of a frame loop.
//!
//! The presenter keeps staleness out of the caller's way: an out-of-date or
//! suboptimal chain is rebuilt here, a zero-sized window pauses presentation,
//! and the caller only learns that something changed through a one-shot
//! [`Rebuilt`] notice.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::chain::{PresentConfig, PresentationChain};
use crate::device::PresentDevice;
use crate::error::{ChainError, ChainResult};
use crate::frame_sync::{Acquired, ChainStatus};

/// Reported once after the chain has been (re)built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rebuilt {
    /// Color or depth format changed (or this is the first build), so
    /// anything created against the old render pass must be rebuilt too.
    pub pipelines_stale: bool,
}

/// An acquired image waiting for its command buffer.
#[must_use = "an acquired frame must be handed back to end_frame"]
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub image_index: u32,
    pub framebuffer: vk::Framebuffer,
}

pub struct Presenter<D: PresentDevice> {
    device: Arc<D>,
    config: PresentConfig,
    window: vk::Extent2D,
    chain: Option<PresentationChain<D>>,
    paused: bool,
    rebuild_pending: bool,
    notice: Option<Rebuilt>,
}

fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

impl<D: PresentDevice> Presenter<D> {
    /// Builds the chain right away unless the window is zero-sized.
    pub fn new(device: Arc<D>, window: vk::Extent2D, config: PresentConfig) -> ChainResult<Self> {
        let mut presenter = Self {
            device,
            config,
            window,
            chain: None,
            paused: is_zero(window),
            rebuild_pending: false,
            notice: None,
        };
        if presenter.paused {
            info!("window is {}x{} → paused", window.width, window.height);
        } else {
            presenter.rebuild()?;
        }
        Ok(presenter)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn window(&self) -> vk::Extent2D {
        self.window
    }

    pub fn chain(&self) -> Option<&PresentationChain<D>> {
        self.chain.as_ref()
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Blocks until the GPU has finished everything submitted so far.
    pub fn wait_idle(&self) -> ChainResult<()> {
        self.device
            .wait_idle()
            .map_err(ChainError::frame("device_wait_idle"))
    }

    /// Returns and clears the pending rebuild notice.
    pub fn take_rebuild_notice(&mut self) -> Option<Rebuilt> {
        self.notice.take()
    }

    pub fn resize(&mut self, window: vk::Extent2D) -> ChainResult<()> {
        self.window = window;
        if is_zero(window) {
            if !self.paused {
                info!("resize to {}x{} → paused", window.width, window.height);
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("resize to {}x{} → resumed", window.width, window.height);
        }
        self.paused = false;
        self.rebuild()
    }

    /// `None` while paused or when the chain had to be rebuilt before an image
    /// could be acquired; the caller simply skips this frame.
    pub fn begin_frame(&mut self) -> ChainResult<Option<Frame>> {
        if self.paused {
            return Ok(None);
        }
        if self.rebuild_pending || self.chain.is_none() {
            self.rebuild()?;
        }
        let Some(chain) = self.chain.as_mut() else {
            return Ok(None);
        };

        match chain.acquire_next_image()? {
            Acquired::Image { index, suboptimal } => {
                let framebuffer = chain.framebuffer(index).ok_or(ChainError::ImageIndex {
                    index,
                    count: chain.image_count(),
                })?;
                if suboptimal {
                    debug!("acquire reported suboptimal; rebuilding after present");
                    self.rebuild_pending = true;
                }
                Ok(Some(Frame {
                    image_index: index,
                    framebuffer,
                }))
            }
            Acquired::OutOfDate => {
                debug!("acquire reported out of date; rebuilding");
                self.rebuild()?;
                Ok(None)
            }
        }
    }

    /// Submits and presents `frame`. A stale chain is rebuilt before returning.
    pub fn end_frame(&mut self, frame: Frame, command_buffer: vk::CommandBuffer) -> ChainResult<()> {
        let Some(chain) = self.chain.as_mut() else {
            warn!("end_frame without a chain; dropping frame {}", frame.image_index);
            return Ok(());
        };
        let status = chain.submit(command_buffer, frame.image_index)?;
        if status == ChainStatus::MustRebuild || self.rebuild_pending {
            if self.paused {
                self.rebuild_pending = true;
            } else {
                self.rebuild()?;
            }
        }
        Ok(())
    }

    fn rebuild(&mut self) -> ChainResult<()> {
        if is_zero(self.window) {
            self.paused = true;
            return Ok(());
        }
        self.rebuild_pending = false;

        let (rebuilt, pipelines_stale) = match self.chain.take() {
            None => (
                PresentationChain::new(Arc::clone(&self.device), self.window, self.config)?,
                true,
            ),
            Some(old) => {
                let old_desc = *old.render_pass_desc();
                let new = old.recreate(self.window)?;
                let stale = !old_desc.is_compatible_with(new.render_pass_desc());
                (new, stale)
            }
        };
        if pipelines_stale {
            debug!("render pass formats changed; pipelines are stale");
        }
        self.chain = Some(rebuilt);

        // Unclaimed notices accumulate staleness.
        let earlier = self.notice.map(|n| n.pipelines_stale).unwrap_or(false);
        self.notice = Some(Rebuilt {
            pipelines_stale: pipelines_stale || earlier,
        });
        Ok(())
    }
}
