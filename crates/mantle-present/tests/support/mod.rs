// SPDX-License-Identifier: CEPL-1.0
//! A [`PresentDevice`] with no GPU behind it.
//!
//! GPU work completes on a simulated clock: a submission started at `t`
//! signals its fence at `t + latency`, and waiting on a fence moves the clock
//! forward to that point. Every object is counted so tests can check for leaks,
//! and destroying something another live object still depends on is recorded
//! as a violation. Semaphores are binary: a wait with no pending signal, or a
//! second signal before the first is consumed, is a violation too.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use mantle_present::vk::{self, Handle};
use mantle_present::{
    ChainRequest, PresentDevice, QueueFamilies, RenderPassDesc, Submission, SurfaceSupport,
};

type VkResult<T> = Result<T, vk::Result>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    ImageView,
    Image,
    Memory,
    RenderPass,
    Framebuffer,
    Semaphore,
    Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    /// Signals once the clock reaches this point; `None` never signals.
    Pending(Option<u64>),
    Signaled,
}

/// One frame of GPU work on one chain image.
#[derive(Clone, Copy, Debug)]
pub struct BusyWindow {
    pub image: u32,
    pub start: u64,
    /// `u64::MAX` when the GPU is hung.
    pub end: u64,
}

struct ChainState {
    images: Vec<vk::Image>,
    next: usize,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<u64, Kind>,

    support: SurfaceSupport,
    families: Option<QueueFamilies>,
    depth_formats: Vec<vk::Format>,
    image_count: Option<usize>,

    chains: HashMap<u64, ChainState>,
    requests: Vec<ChainRequest>,
    view_image: HashMap<u64, u64>,
    view_aspect: HashMap<u64, vk::ImageAspectFlags>,
    framebuffer_refs: HashMap<u64, (u64, Vec<u64>)>,
    image_memory: HashMap<u64, u64>,
    render_passes: HashMap<u64, RenderPassDesc>,

    clock: u64,
    latency: u64,
    hung: bool,
    fences: HashMap<u64, FenceState>,
    pending_submit: Option<(vk::Fence, u64, u64)>,
    busy: Vec<BusyWindow>,
    max_outstanding: usize,

    signaled_semaphores: HashSet<u64>,
    acquire_signals: Vec<vk::Semaphore>,
    submissions: Vec<Submission>,
    present_waits: Vec<vk::Semaphore>,

    acquire_script: VecDeque<u32>,
    acquire_faults: VecDeque<vk::Result>,
    suboptimal_acquires: u32,
    present_results: VecDeque<VkResult<bool>>,
    fail_create: Option<Kind>,

    wait_idle_calls: u32,
    violations: Vec<String>,
}

pub struct FakeDevice {
    state: RefCell<State>,
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

pub fn srgb() -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevice {
    /// 800x600 surface, 2..=8 images, sRGB, FIFO + MAILBOX, D32 depth, one
    /// queue family, GPU latency of 10 ticks.
    pub fn new() -> Self {
        let support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: extent(800, 600),
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![srgb()],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        Self {
            state: RefCell::new(State {
                support,
                depth_formats: vec![vk::Format::D32_SFLOAT],
                latency: 10,
                ..Default::default()
            }),
        }
    }

    // --- configuration ------------------------------------------------------

    pub fn set_current_extent(&self, e: vk::Extent2D) {
        self.state.borrow_mut().support.capabilities.current_extent = e;
    }

    pub fn edit_support(&self, f: impl FnOnce(&mut SurfaceSupport)) {
        f(&mut self.state.borrow_mut().support);
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().support.formats = formats;
    }

    pub fn set_depth_formats(&self, formats: Vec<vk::Format>) {
        self.state.borrow_mut().depth_formats = formats;
    }

    pub fn set_families(&self, graphics: u32, present: u32) {
        self.state.borrow_mut().families = Some(QueueFamilies { graphics, present });
    }

    /// Number of images the display hands back, whatever was requested.
    pub fn force_image_count(&self, count: usize) {
        self.state.borrow_mut().image_count = Some(count);
    }

    pub fn set_latency(&self, ticks: u64) {
        self.state.borrow_mut().latency = ticks;
    }

    /// Submissions from now on never complete.
    pub fn hang_gpu(&self) {
        self.state.borrow_mut().hung = true;
    }

    /// Image indices returned by the next acquires (round-robin afterwards).
    pub fn script_acquires(&self, order: &[u32]) {
        self.state.borrow_mut().acquire_script.extend(order.iter().copied());
    }

    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.state.borrow_mut().acquire_faults.push_back(result);
    }

    pub fn suboptimal_next_acquires(&self, count: u32) {
        self.state.borrow_mut().suboptimal_acquires = count;
    }

    /// `Ok(true)` = suboptimal, `Err(..)` = failure.
    pub fn next_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_results.push_back(result);
    }

    pub fn fail_next_create(&self, kind: Kind) {
        self.state.borrow_mut().fail_create = Some(kind);
    }

    // --- inspection ---------------------------------------------------------

    pub fn live(&self, kind: Kind) -> usize {
        self.state.borrow().live.values().filter(|&&k| k == kind).count()
    }

    pub fn total_live(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.state.borrow().live.contains_key(&raw)
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn requests(&self) -> Vec<ChainRequest> {
        self.state.borrow().requests.clone()
    }

    pub fn view_aspect(&self, view: vk::ImageView) -> Option<vk::ImageAspectFlags> {
        self.state.borrow().view_aspect.get(&view.as_raw()).copied()
    }

    pub fn busy_windows(&self) -> Vec<BusyWindow> {
        self.state.borrow().busy.clone()
    }

    /// Most GPU submissions ever outstanding at once.
    pub fn max_outstanding(&self) -> usize {
        self.state.borrow().max_outstanding
    }

    pub fn wait_idle_calls(&self) -> u32 {
        self.state.borrow().wait_idle_calls
    }

    /// Semaphore each successful acquire signaled, in order.
    pub fn acquire_signals(&self) -> Vec<vk::Semaphore> {
        self.state.borrow().acquire_signals.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.borrow().submissions.clone()
    }

    /// Semaphore each present waited on, in order.
    pub fn present_waits(&self) -> Vec<vk::Semaphore> {
        self.state.borrow().present_waits.clone()
    }

    pub fn clock(&self) -> u64 {
        self.state.borrow().clock
    }

    /// Pairs of busy windows on the same image that overlap in time.
    pub fn overlaps(&self) -> Vec<(BusyWindow, BusyWindow)> {
        let busy = self.busy_windows();
        let mut out = Vec::new();
        for (i, a) in busy.iter().enumerate() {
            for b in &busy[i + 1..] {
                if a.image == b.image && a.start < b.end && b.start < a.end {
                    out.push((*a, *b));
                }
            }
        }
        out
    }
}

impl State {
    fn alloc(&mut self, kind: Kind) -> VkResult<u64> {
        if self.fail_create == Some(kind) {
            self.fail_create = None;
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        self.next_handle += 1;
        let raw = 0x1000 + self.next_handle;
        self.live.insert(raw, kind);
        Ok(raw)
    }

    fn release(&mut self, raw: u64, kind: Kind) {
        if raw == 0 {
            self.violations.push(format!("destroyed a null {kind:?}"));
            return;
        }
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            Some(k) => self
                .violations
                .push(format!("destroyed {raw:#x} as {kind:?} but it is a {k:?}")),
            None => self
                .violations
                .push(format!("destroyed {kind:?} {raw:#x} twice or never created")),
        }
    }

    fn signal(&mut self, semaphore: vk::Semaphore, op: &str) {
        let raw = semaphore.as_raw();
        if self.live.get(&raw) != Some(&Kind::Semaphore) {
            self.violations
                .push(format!("{op} signals dead semaphore {raw:#x}"));
        } else if !self.signaled_semaphores.insert(raw) {
            self.violations
                .push(format!("{op} signals semaphore {raw:#x} that is already signaled"));
        }
    }

    fn consume(&mut self, semaphore: vk::Semaphore, op: &str) {
        let raw = semaphore.as_raw();
        if !self.signaled_semaphores.remove(&raw) {
            self.violations
                .push(format!("{op} waits on semaphore {raw:#x} with no pending signal"));
        }
    }

    fn fence_done(&self, raw: u64) -> bool {
        match self.fences.get(&raw) {
            Some(FenceState::Signaled) => true,
            Some(FenceState::Pending(Some(at))) => *at <= self.clock,
            _ => false,
        }
    }

    fn outstanding(&self) -> usize {
        self.fences
            .iter()
            .filter(|(raw, s)| matches!(s, FenceState::Pending(_)) && !self.fence_done(**raw))
            .count()
    }
}

impl PresentDevice for FakeDevice {
    fn surface_support(&self) -> VkResult<SurfaceSupport> {
        Ok(self.state.borrow().support.clone())
    }

    fn queue_families(&self) -> QueueFamilies {
        self.state.borrow().families.unwrap_or(QueueFamilies {
            graphics: 0,
            present: 0,
        })
    }

    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        _tiling: vk::ImageTiling,
        _features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        let s = self.state.borrow();
        candidates
            .iter()
            .copied()
            .find(|f| s.depth_formats.contains(f))
    }

    fn create_swapchain(&self, request: &ChainRequest) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state.borrow_mut();
        let old = request.old_swapchain.as_raw();
        if old != 0 && s.live.get(&old) != Some(&Kind::Swapchain) {
            s.violations
                .push(format!("recreation hint {old:#x} is not a live chain"));
        }
        s.requests.push(*request);
        let raw = s.alloc(Kind::Swapchain)?;
        let count = s.image_count.unwrap_or(request.min_image_count as usize);
        let images = (0..count)
            .map(|i| vk::Image::from_raw(0xA000_0000 + raw * 16 + i as u64))
            .collect();
        s.chains.insert(raw, ChainState { images, next: 0 });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let s = self.state.borrow();
        s.chains
            .get(&swapchain.as_raw())
            .map(|c| c.images.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        let raw = swapchain.as_raw();
        if let Some(chain) = s.chains.remove(&raw) {
            let images: Vec<u64> = chain.images.iter().map(|i| i.as_raw()).collect();
            let dangling = s
                .view_image
                .iter()
                .filter(|(view, image)| images.contains(*image) && s.live.contains_key(*view))
                .count();
            if dangling > 0 {
                s.violations
                    .push(format!("chain {raw:#x} destroyed with {dangling} live views"));
            }
        }
        s.release(raw, Kind::Swapchain);
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::ImageView)?;
        s.view_image.insert(raw, image.as_raw());
        s.view_aspect.insert(raw, aspect);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.borrow_mut();
        let raw = view.as_raw();
        let used = s
            .framebuffer_refs
            .iter()
            .any(|(fb, (_, views))| views.contains(&raw) && s.live.contains_key(fb));
        if used {
            s.violations
                .push(format!("view {raw:#x} destroyed while a framebuffer uses it"));
        }
        s.release(raw, Kind::ImageView);
    }

    fn create_attachment_image(
        &self,
        _extent: vk::Extent2D,
        _format: vk::Format,
        _usage: vk::ImageUsageFlags,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        let mut s = self.state.borrow_mut();
        let image = s.alloc(Kind::Image)?;
        let memory = match s.alloc(Kind::Memory) {
            Ok(m) => m,
            Err(e) => {
                s.release(image, Kind::Image);
                return Err(e);
            }
        };
        s.image_memory.insert(image, memory);
        Ok((vk::Image::from_raw(image), vk::DeviceMemory::from_raw(memory)))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut s = self.state.borrow_mut();
        let raw = image.as_raw();
        let viewed = s
            .view_image
            .iter()
            .any(|(view, img)| *img == raw && s.live.contains_key(view));
        if viewed {
            s.violations
                .push(format!("image {raw:#x} destroyed before its view"));
        }
        s.release(raw, Kind::Image);
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.state.borrow_mut();
        let raw = memory.as_raw();
        let bound = s
            .image_memory
            .iter()
            .any(|(img, mem)| *mem == raw && s.live.contains_key(img));
        if bound {
            s.violations
                .push(format!("memory {raw:#x} freed before its image"));
        }
        s.release(raw, Kind::Memory);
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::RenderPass)?;
        s.render_passes.insert(raw, *desc);
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.state.borrow_mut();
        let raw = render_pass.as_raw();
        let used = s
            .framebuffer_refs
            .iter()
            .any(|(fb, (rp, _))| *rp == raw && s.live.contains_key(fb));
        if used {
            s.violations
                .push(format!("render pass {raw:#x} destroyed before its framebuffers"));
        }
        s.release(raw, Kind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.state.borrow_mut();
        let rp = render_pass.as_raw();
        if s.live.get(&rp) != Some(&Kind::RenderPass) {
            s.violations
                .push(format!("framebuffer built on dead render pass {rp:#x}"));
        }
        for view in attachments {
            if s.live.get(&view.as_raw()) != Some(&Kind::ImageView) {
                s.violations
                    .push(format!("framebuffer binds dead view {:#x}", view.as_raw()));
            }
        }
        let raw = s.alloc(Kind::Framebuffer)?;
        let views = attachments.iter().map(|v| v.as_raw()).collect();
        s.framebuffer_refs.insert(raw, (rp, views));
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state
            .borrow_mut()
            .release(framebuffer.as_raw(), Kind::Framebuffer);
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let raw = self.state.borrow_mut().alloc(Kind::Semaphore)?;
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.borrow_mut();
        let raw = semaphore.as_raw();
        s.signaled_semaphores.remove(&raw);
        s.release(raw, Kind::Semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::Fence)?;
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        s.fences.insert(raw, state);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        if !s.fence_done(raw) && matches!(s.fences.get(&raw), Some(FenceState::Pending(_))) {
            s.violations
                .push(format!("fence {raw:#x} destroyed while GPU work is pending"));
        }
        s.fences.remove(&raw);
        s.release(raw, Kind::Fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        match s.fences.get(&raw).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending(Some(at))) => {
                let needed = at.saturating_sub(s.clock);
                if timeout_ns != u64::MAX && needed > timeout_ns {
                    s.clock = s.clock.saturating_add(timeout_ns);
                    return Err(vk::Result::TIMEOUT);
                }
                s.clock = s.clock.max(at);
                s.fences.insert(raw, FenceState::Signaled);
                Ok(())
            }
            Some(FenceState::Pending(None)) | Some(FenceState::Unsignaled) => {
                if timeout_ns == u64::MAX {
                    s.violations
                        .push(format!("unbounded wait on fence {raw:#x} that never signals"));
                }
                Err(vk::Result::TIMEOUT)
            }
            None => {
                s.violations.push(format!("wait on unknown fence {raw:#x}"));
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        if matches!(s.fences.get(&raw), Some(FenceState::Pending(_))) && !s.fence_done(raw) {
            s.violations
                .push(format!("fence {raw:#x} reset while GPU work is pending"));
        }
        s.fences.insert(raw, FenceState::Unsignaled);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        s.clock += 1;
        if let Some(fault) = s.acquire_faults.pop_front() {
            return Err(fault);
        }
        let scripted = s.acquire_script.pop_front();
        let suboptimal = if s.suboptimal_acquires > 0 {
            s.suboptimal_acquires -= 1;
            true
        } else {
            false
        };
        let chain = s
            .chains
            .get_mut(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let len = chain.images.len();
        let index = match scripted {
            Some(i) => i as usize % len,
            None => {
                let i = chain.next % len;
                chain.next += 1;
                i
            }
        };
        // Only an image actually handed out signals the semaphore.
        s.signal(signal, "acquire");
        s.acquire_signals.push(signal);
        Ok((index as u32, suboptimal))
    }

    fn submit_graphics(&self, submission: &Submission) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let raw = submission.fence.as_raw();
        if s.fences.get(&raw) != Some(&FenceState::Unsignaled) {
            s.violations
                .push(format!("submit arms fence {raw:#x} that was not reset"));
        }
        if submission.wait_stage != vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT {
            s.violations.push(format!(
                "submit waits at {:?} instead of color attachment output",
                submission.wait_stage
            ));
        }
        s.consume(submission.wait_semaphore, "submit");
        s.signal(submission.signal_semaphore, "submit");
        s.submissions.push(*submission);
        let start = s.clock;
        let end = if s.hung { None } else { Some(start + s.latency) };
        s.fences.insert(raw, FenceState::Pending(end));
        s.pending_submit = Some((submission.fence, start, end.unwrap_or(u64::MAX)));
        let outstanding = s.outstanding();
        s.max_outstanding = s.max_outstanding.max(outstanding);
        Ok(())
    }

    fn present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.consume(wait, "present");
        s.present_waits.push(wait);
        if let Some((_, start, end)) = s.pending_submit.take() {
            s.busy.push(BusyWindow {
                image: image_index,
                start,
                end,
            });
        }
        s.present_results.pop_front().unwrap_or(Ok(false))
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.wait_idle_calls += 1;
        let mut latest = s.clock;
        let mut hung = false;
        for state in s.fences.values() {
            match state {
                FenceState::Pending(Some(at)) => latest = latest.max(*at),
                FenceState::Pending(None) => hung = true,
                _ => {}
            }
        }
        if hung {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        s.clock = latest;
        for state in s.fences.values_mut() {
            if matches!(state, FenceState::Pending(_)) {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }
}
