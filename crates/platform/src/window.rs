//! Window wrapper and Vulkan surface plumbing.
//!
//! The [`Window`] records resize events behind a flag that the render
//! loop drains once per frame, which keeps swapchain rebuilds off the
//! hot path of winit's event delivery.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use raytracer_core::{Error, Result};

/// Resizable window with a pending-resize flag.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        info!("Window created: {width}x{height}");

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            resized: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Records a new framebuffer size and raises the resize flag.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.resized = true;
        debug!("Window resized: {width}x{height}");
    }

    /// True between a [`resize`](Self::resize) call and the next
    /// [`reset_resized_flag`](Self::reset_resized_flag).
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Lowered by the render loop once it has consumed the new size.
    pub fn reset_resized_flag(&mut self) {
        self.resized = false;
    }

    /// A zero-area framebuffer, as reported while minimized. Rendering
    /// pauses until the window regains a usable extent.
    pub fn is_degenerate(&self) -> bool {
        degenerate_extent(self.width, self.height)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Raw display handle, needed to enumerate surface extensions before
    /// the Vulkan instance exists.
    pub fn display_handle(
        &self,
    ) -> std::result::Result<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError>
    {
        self.window.display_handle()
    }

    /// Creates the presentation surface for this window.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {e}")))?;

        // SAFETY: both handles come from a live winit window, and the
        // surface is released exactly once, in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("surface creation failed: {e}")))?
        };

        info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }
}

/// Owns a `vk::SurfaceKHR` together with the loader that can destroy it
/// and answer capability queries.
///
/// The Vulkan instance must outlive this value.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created from the same instance as the
        // loader and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// True when either dimension is zero, meaning there is nothing to
/// render to. Minimized windows report 0x0 on most platforms.
#[inline]
fn degenerate_extent(width: u32, height: u32) -> bool {
    width == 0 || height == 0
}

/// Instance extensions the display backend needs for surface creation.
///
/// The returned pointers reference static strings owned by the Vulkan
/// loader and stay valid for the life of the process.
pub fn get_required_extensions(
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<Vec<*const i8>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Vulkan(format!("extension enumeration failed: {e}")))?;

    Ok(extensions.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_extents_are_detected() {
        assert!(degenerate_extent(0, 0));
        assert!(degenerate_extent(0, 600));
        assert!(degenerate_extent(800, 0));
        assert!(!degenerate_extent(800, 600));
        assert!(!degenerate_extent(1, 1));
    }
}
