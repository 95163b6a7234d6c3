// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mantle_core::init_tracing;
use mantle_platform::render_size;
use mantle_present::{ChainError, VkRenderer};
use mantle_render::{FrameOutcome, RenderSize, Renderer};
use tracing::{error, info};

use mantle_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use config::{load_cfg, AppCfg, UnfocusedPolicy, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Exit after presenting this many frames (0 = run until closed)
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

struct App {
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    cfg: AppCfg,
    frame_limit: u64,
    presented: u64,
    fatal: Option<anyhow::Error>,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,

    focused: bool,
    next_frame_deadline: Option<Instant>,
}

impl App {
    fn new(cfg: AppCfg, frame_limit: u64) -> Self {
        Self {
            window: None,
            renderer: None,
            render_size: RenderSize::new(1, 1),
            cfg,
            frame_limit,
            presented: 0,
            fatal: None,
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
            focused: true,
            next_frame_deadline: None,
        }
    }

    fn paused(&self) -> bool {
        self.render_size.is_empty()
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop, fatal: Option<anyhow::Error>) {
        if let Some(e) = fatal {
            self.fatal.get_or_insert(e);
        }
        self.exiting = true;
        // Renderer before window: the surface must not outlive its window.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop.create_window(Window::default_attributes().with_title("mantle"))?;
        self.render_size = render_size(window.inner_size());

        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?;
        let dh = window.display_handle().map_err(|e| anyhow!("{e}"))?;
        let mut renderer = VkRenderer::with_config(
            &wh,
            &dh,
            self.render_size,
            self.cfg.render.present_config(),
        )?;
        renderer
            .set_clear_color(self.cfg.render.clear_color)
            .context("apply configured clear color")?;
        info!(
            "vsync cfg = {}, fence timeout = {} ms",
            self.cfg.render.vsync, self.cfg.render.fence_timeout_ms
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.render() {
            Ok(FrameOutcome::Presented) => {
                // count only frames that were actually presented
                self.frames = self.frames.saturating_add(1);
                self.presented += 1;
                if self.frame_limit > 0 && self.presented >= self.frame_limit {
                    info!("presented {} frames; exiting", self.presented);
                    self.shutdown(event_loop, None);
                }
            }
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => {
                let lost = e
                    .downcast_ref::<ChainError>()
                    .is_some_and(ChainError::is_device_lost);
                if lost {
                    error!("device lost: {e:#}");
                } else {
                    error!("render error: {e:#}");
                }
                self.shutdown(event_loop, Some(e));
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("vk init failed: {e:#}");
                self.shutdown(event_loop, Some(e));
                return;
            }
        }

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        info!("resumed → paused={}", self.paused());
        if !self.paused() {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop, None);
            }

            WindowEvent::Resized(new_size) => {
                let was_paused = self.paused();
                self.render_size = render_size(new_size);
                info!(
                    "Resized → {}x{} (paused {} → {})",
                    self.render_size.width,
                    self.render_size.height,
                    was_paused,
                    self.paused()
                );

                // The renderer pauses itself on a zero-sized window.
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.render_size) {
                        error!("resize failed: {e:#}");
                        self.shutdown(event_loop, Some(e));
                        return;
                    }
                }
                if !self.paused() {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({})", focused);
                    if focused {
                        self.next_frame_deadline = None;
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused() {
                    return;
                }
                self.redraw(event_loop);
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused() {
            // window-size=0 → sleep until the next event
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // 1) Decide target FPS for this frame (0 means "no cap here")
        let target_fps = match (self.focused, self.cfg.render.unfocused) {
            (false, UnfocusedPolicy::Throttle) => self.cfg.render.unfocused_fps,
            _ => 0,
        };

        if target_fps == 0 {
            event_loop.set_control_flow(if self.cfg.render.vsync {
                ControlFlow::Wait
            } else {
                ControlFlow::Poll
            });
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        } else {
            // 2) Throttled path: one redraw per deadline
            let now = Instant::now();
            let frame_dt = Duration::from_nanos(1_000_000_000u64 / u64::from(target_fps.max(1)));
            match self.next_frame_deadline {
                Some(deadline) if now < deadline => {
                    event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
                }
                _ => {
                    let next = now + frame_dt;
                    self.next_frame_deadline = Some(next);
                    event_loop.set_control_flow(ControlFlow::WaitUntil(next));
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }
        }

        // 3) FPS counter
        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            let aspect = self
                .renderer
                .as_ref()
                .and_then(VkRenderer::aspect_ratio)
                .unwrap_or(0.0);
            info!("fps ~ {} (aspect {:.3})", self.frames, aspect);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
