// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use mantle_render::RenderSize;
use winit::dpi::PhysicalSize;

/// Window size in physical pixels, as the presentation chain wants it.
pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}
