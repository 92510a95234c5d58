//! Frame driver and surface recreation controller.
//!
//! [`Renderer`] owns every Vulkan resource and runs the per-frame
//! protocol: wait for the frame slot, acquire a swapchain image, record
//! the three-pass render pass instance, submit, present, advance.
//! Swapchain invalidation and window resizes both funnel into a single
//! recreation routine.

use std::mem::ManuallyDrop;
use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use raytracer_platform::{Surface, Window, get_required_extensions};
use raytracer_rhi::buffer::{Buffer, BufferUsage};
use raytracer_rhi::command::CommandPool;
use raytracer_rhi::device::Device;
use raytracer_rhi::instance::Instance;
use raytracer_rhi::pass_graph::{Framebuffer, PassGraph};
use raytracer_rhi::physical_device::select_physical_device;
use raytracer_rhi::swapchain::Swapchain;
use raytracer_rhi::{RhiError, RhiResult};
use raytracer_scene::{Camera, demo_scene, scene_bytes};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::attachments::{AttachmentSet, OFFSCREEN_COLOR_FORMAT, needs_rebuild};
use crate::frame_slots::FrameSlots;
use crate::ping_pong;
use crate::sequencer::PassSequencer;
use crate::ubo::GlobalUbo;

/// How the frame driver throttles CPU submission relative to the GPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThrottlePolicy {
    /// Wait for the present queue to go idle after every present, so
    /// each frame fully retires before the next one begins.
    #[default]
    WaitIdle,
    /// Rely on the frame-slot fences alone; up to `frames_in_flight`
    /// frames are recorded ahead of the GPU.
    Pipelined,
}

/// Renderer construction parameters.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Number of frame slots (CPU frames recorded ahead of the GPU).
    pub frames_in_flight: usize,
    /// Post-present throttling behavior.
    pub throttle: ThrottlePolicy,
    /// Rays traced per pixel per frame, forwarded to the shaders.
    pub rays_per_pixel: u32,
    /// Enable Vulkan validation layers.
    pub enable_validation: bool,
    /// Directory holding the compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            throttle: ThrottlePolicy::default(),
            rays_per_pixel: 1,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("assets/shaders"),
        }
    }
}

/// Index of the framebuffer serving a (swapchain image, parity) pair.
///
/// Framebuffers are stored two per image: even parity first, then odd.
#[inline]
fn framebuffer_index(image_index: u32, parity: usize) -> usize {
    image_index as usize * 2 + parity
}

/// Main renderer owning all Vulkan resources.
///
/// Vulkan teardown must run child-before-parent, so the `Drop` impl
/// drains the GPU and then releases everything in an explicit order
/// instead of relying on field declaration order. Every field sits in
/// [`ManuallyDrop`] to make that possible.
pub struct Renderer {
    // Listed parent-first; Drop releases them back to front.
    /// Instance, outlives everything created from it.
    instance: ManuallyDrop<Instance>,
    /// Logical device, released after every device resource.
    device: ManuallyDrop<Arc<Device>>,
    /// Window surface (destroyed after the swapchain, before the device).
    surface: ManuallyDrop<Surface>,
    /// Swapchain (destroyed after the framebuffers referencing its views).
    swapchain: ManuallyDrop<Swapchain>,
    /// The three-subpass render pass shared by all pipelines.
    pass_graph: ManuallyDrop<PassGraph>,
    /// Offscreen trace and accumulation targets.
    attachments: ManuallyDrop<AttachmentSet>,
    /// Two framebuffers per swapchain image, one per frame parity.
    framebuffers: Vec<Framebuffer>,
    /// Pipelines and descriptor layouts for the three passes.
    sequencer: ManuallyDrop<PassSequencer>,
    /// Device-local sphere data, uploaded once at startup.
    scene_buffer: ManuallyDrop<Buffer>,
    /// Command pool the frame slots record from.
    command_pool: ManuallyDrop<CommandPool>,
    /// Per-frame slot ring.
    frame_slots: ManuallyDrop<FrameSlots>,

    // Frame state
    /// Monotonic frame counter; drives parity selection and the
    /// accumulation weight in the shaders.
    frame_number: u64,
    /// Post-present throttling behavior.
    throttle: ThrottlePolicy,
    /// Rays traced per pixel.
    rays_per_pixel: u32,
    /// Flag indicating the window was resized since the last frame.
    window_resized: bool,
    /// Last reported window width.
    width: u32,
    /// Last reported window height.
    height: u32,
}

impl Renderer {
    /// Brings up the whole Vulkan stack against the given window.
    ///
    /// Builds the full steady state: instance, device, swapchain, pass
    /// graph, offscreen attachments, framebuffers, pipelines, the sphere
    /// scene buffer, and the frame slot ring.
    ///
    /// # Errors
    ///
    /// Fails if no suitable GPU is found or any resource creation step
    /// errors out.
    pub fn new(window: &Window, config: RendererConfig) -> RhiResult<Self> {
        let width = window.width();
        let height = window.height();

        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let display_handle = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let surface_extensions = get_required_extensions(display_handle.as_raw())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let instance = Instance::new(config.enable_validation, &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;

        let pass_graph = PassGraph::new(device.clone(), OFFSCREEN_COLOR_FORMAT, swapchain.format())?;

        let attachments = AttachmentSet::new(device.clone(), swapchain.extent())?;

        let framebuffers =
            Self::create_framebuffers(&device, &pass_graph, &attachments, &swapchain)?;

        let sequencer = PassSequencer::new(device.clone(), &pass_graph, &config.shader_dir)?;

        let graphics_family = device.queue_families().graphics_family.unwrap();
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let spheres = demo_scene();
        let scene_buffer = Buffer::new_device_local_with_data(
            device.clone(),
            BufferUsage::Storage,
            scene_bytes(&spheres),
            &command_pool,
        )?;

        let frame_slots = FrameSlots::new(device.clone(), &command_pool, config.frames_in_flight)?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight, {} spheres",
            swapchain.image_count(),
            config.frames_in_flight,
            spheres.len()
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            swapchain: ManuallyDrop::new(swapchain),
            pass_graph: ManuallyDrop::new(pass_graph),
            attachments: ManuallyDrop::new(attachments),
            framebuffers,
            sequencer: ManuallyDrop::new(sequencer),
            scene_buffer: ManuallyDrop::new(scene_buffer),
            command_pool: ManuallyDrop::new(command_pool),
            frame_slots: ManuallyDrop::new(frame_slots),
            frame_number: 0,
            throttle: config.throttle,
            rays_per_pixel: config.rays_per_pixel,
            window_resized: false,
            width,
            height,
        })
    }

    /// Creates one framebuffer per (swapchain image, parity) pair.
    ///
    /// The two parities bind the accumulation images in swapped order,
    /// so the same render pass serves every frame.
    fn create_framebuffers(
        device: &Arc<Device>,
        pass_graph: &PassGraph,
        attachments: &AttachmentSet,
        swapchain: &Swapchain,
    ) -> RhiResult<Vec<Framebuffer>> {
        let extent = swapchain.extent();
        let image_count = swapchain.image_count() as usize;
        let mut framebuffers = Vec::with_capacity(image_count * 2);

        for image_index in 0..image_count {
            let display_view = swapchain.image_view(image_index);
            for parity in 0..2 {
                let views = attachments.framebuffer_views(parity, display_view);
                framebuffers.push(Framebuffer::new(
                    device.clone(),
                    pass_graph.handle(),
                    &views,
                    extent,
                )?);
            }
        }

        debug!(
            "Created {} framebuffers ({} images x 2 parities)",
            framebuffers.len(),
            image_count
        );

        Ok(framebuffers)
    }

    /// Records a new window size for the next frame to act on.
    ///
    /// The actual recreation happens at the start of the next frame.
    /// Zero dimensions are stored as-is: rendering pauses until the
    /// window reports a usable extent again.
    pub fn on_window_resized(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }

        debug!(
            "Window resized: {}x{} -> {}x{}",
            self.width, self.height, width, height
        );
        self.width = width;
        self.height = height;
        self.window_resized = true;
    }

    /// Returns the aspect ratio of the current swapchain extent.
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.width() as f32 / self.swapchain.height() as f32
    }

    /// Rebuilds the surface-dependent resources for the current window
    /// extent.
    ///
    /// `force` distinguishes surface invalidation (out-of-date or
    /// suboptimal results, which always rebuild) from the resize flag,
    /// which is a no-op when the swapchain extent is unchanged. While
    /// the window reports a zero dimension the rebuild is deferred and
    /// frames keep being skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FormatMismatch`] if the surface negotiates a
    /// different image format, or another error if recreation fails.
    fn recreate_surface(&mut self, force: bool) -> RhiResult<()> {
        self.window_resized = false;

        if self.width == 0 || self.height == 0 {
            debug!("Surface extent degenerate, deferring recreation");
            return Ok(());
        }

        let requested = vk::Extent2D {
            width: self.width,
            height: self.height,
        };
        if !force && !needs_rebuild(self.swapchain.extent(), requested) {
            debug!("Surface extent unchanged, skipping recreation");
            return Ok(());
        }

        // Drains the device before touching any in-use resource.
        self.swapchain
            .recreate(&self.instance, self.surface.handle(), self.width, self.height)?;

        self.attachments.resize(self.swapchain.extent())?;

        // Old framebuffers must go before their attachment views do.
        self.framebuffers.clear();
        self.framebuffers = Self::create_framebuffers(
            &self.device,
            &self.pass_graph,
            &self.attachments,
            &self.swapchain,
        )?;

        // A present that died out-of-date may leave a semaphore wait
        // dangling; fresh semaphores sidestep that.
        self.frame_slots.reset_semaphores()?;

        info!(
            "Surface resources recreated: {}x{}",
            self.swapchain.width(),
            self.swapchain.height()
        );

        Ok(())
    }

    /// Renders one frame using the given camera.
    ///
    /// Transient surface states (out-of-date, suboptimal, resize) are
    /// absorbed here by recreating the surface resources; only fatal
    /// errors surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan operation fails, including a
    /// surface format change during recreation.
    pub fn render_frame(&mut self, camera: &Camera) -> RhiResult<()> {
        // A zero-sized surface cannot be rendered to; skip frames until
        // the window reports a usable extent again.
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        if self.window_resized {
            debug!("Resize flagged, recreating surface resources before acquire");
            self.recreate_surface(false)?;
        }

        self.frame_slots.wait_current()?;

        let Some(acquire_suboptimal) = self.frame_slots.acquire_image(&self.swapchain)? else {
            // Nothing was acquired and nothing was submitted: abandon
            // the frame without advancing the counter or the slot.
            debug!(
                "Acquire reported out of date, abandoning frame {}",
                self.frame_number
            );
            self.recreate_surface(true)?;
            return Ok(());
        };

        let extent = self.swapchain.extent();
        let ubo = GlobalUbo::new(
            camera,
            extent.width,
            extent.height,
            self.rays_per_pixel,
            self.frame_number,
        );

        let slot = self.frame_slots.begin_recording()?;
        slot.write_global_ubo(&ubo)?;

        let parity = ping_pong::parity(self.frame_number);
        let targets = ping_pong::frame_targets(self.frame_number);
        let framebuffer =
            &self.framebuffers[framebuffer_index(self.frame_slots.image_index(), parity)];

        self.sequencer.record_frame(
            slot,
            framebuffer,
            &self.attachments,
            targets,
            &self.scene_buffer,
        )?;

        self.frame_slots.end_recording()?;
        self.frame_slots.submit()?;

        let present_invalidated = self.frame_slots.present(&self.swapchain)?;

        if self.throttle == ThrottlePolicy::WaitIdle {
            self.device.wait_present_queue_idle()?;
        }

        // The frame was submitted, so it counts even when the surface
        // turned stale at present.
        self.frame_number += 1;
        self.frame_slots.next_frame();

        if acquire_suboptimal || present_invalidated {
            debug!("Surface stale after present, recreating");
            self.recreate_surface(true)?;
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still references it.
        if let Err(e) = self.device.wait_idle() {
            error!("Device idle wait failed during teardown: {:?}", e);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.frame_slots);
            ManuallyDrop::drop(&mut self.sequencer);
            ManuallyDrop::drop(&mut self.scene_buffer);
            self.framebuffers.clear();
            ManuallyDrop::drop(&mut self.attachments);
            ManuallyDrop::drop(&mut self.pass_graph);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framebuffer_index_layout() {
        // Two framebuffers per image: even parity first.
        assert_eq!(framebuffer_index(0, 0), 0);
        assert_eq!(framebuffer_index(0, 1), 1);
        assert_eq!(framebuffer_index(1, 0), 2);
        assert_eq!(framebuffer_index(1, 1), 3);
        assert_eq!(framebuffer_index(2, 1), 5);
    }

    #[test]
    fn test_renderer_config_default() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(config.throttle, ThrottlePolicy::WaitIdle);
        assert_eq!(config.rays_per_pixel, 1);
        assert_eq!(config.shader_dir, PathBuf::from("assets/shaders"));
    }
}
