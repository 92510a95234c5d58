//! Swapchain creation, acquisition, and presentation.
//!
//! Out-of-date and suboptimal surfaces are reported as recreation signals
//! rather than errors: [`Swapchain::acquire_next_image`] returns `None`
//! when no image could be acquired, and [`Swapchain::present`] returns
//! `true` when the swapchain should be rebuilt after the frame. Only
//! genuine device failures surface as [`RhiError`].
//!
//! Recreation keeps the negotiated image format stable. The render pass
//! and every pipeline were built against the original format, so a
//! surface that renegotiates to a different one is a hard error.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::RhiError;
use crate::instance::Instance;

/// What the surface offers for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries capabilities, formats, and present modes for one surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface offers {} formats and {} present modes",
            formats.len(),
            present_modes.len()
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// A surface with no formats or no present modes cannot host a swapchain.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The presentable image chain for one window surface.
///
/// Owns the image views; the images themselves belong to the swapchain
/// and go away with it. All methods are called from the frame driver's
/// single thread.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Builds a swapchain for the surface at the requested size.
    ///
    /// Prefers a B8G8R8A8_SRGB image in the SRGB_NONLINEAR color space and
    /// the MAILBOX present mode, falling back to whatever the surface
    /// offers. Images are created for COLOR_ATTACHMENT use only.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<Self, RhiError> {
        Self::build(
            instance,
            device,
            surface,
            width,
            height,
            vk::SwapchainKHR::null(),
        )
    }

    fn build(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self, RhiError> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Surface offers no formats or no present modes".to_string(),
            ));
        }

        let surface_format = select_surface_format(&support.formats);
        let present_mode = select_present_mode(&support.present_modes);
        let extent = select_extent(&support.capabilities, width, height);
        let image_count = select_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, {:?} / {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        // Images cross queue families only when graphics and present differ.
        let families = device.queue_families();
        let graphics_family = families.graphics_family.unwrap();
        let present_family = families.present_family.unwrap();
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) = if graphics_family == present_family {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        } else {
            debug!(
                "Swapchain shared between queue families {graphics_family} and {present_family}"
            );
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        let image_views = make_image_views(&device, &images, surface_format.format)?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Rebuilds the swapchain at a new size, retiring the old one.
    ///
    /// Waits for the device to go idle, then hands the driver the previous
    /// handle so it can recycle resources. Fails with
    /// [`RhiError::FormatMismatch`] if the surface negotiates a different
    /// image format than before; in that case the old swapchain is kept
    /// and destroyed normally on drop.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<(), RhiError> {
        self.device.wait_idle()?;

        info!("Recreating swapchain at {width}x{height}");

        self.destroy_image_views();

        let retired = self.swapchain;
        let mut replacement = Self::build(
            instance,
            self.device.clone(),
            surface,
            width,
            height,
            retired,
        )?;

        if replacement.format != self.format {
            // replacement drops here, releasing its views and handle
            return Err(RhiError::FormatMismatch(format!(
                "surface renegotiated {:?} as {:?} during swapchain recreation",
                self.format, replacement.format
            )));
        }

        unsafe {
            self.swapchain_loader.destroy_swapchain(retired, None);
        }

        self.swapchain = replacement.swapchain;
        self.images = std::mem::take(&mut replacement.images);
        self.image_views = std::mem::take(&mut replacement.image_views);
        self.format = replacement.format;
        self.extent = replacement.extent;

        // The handle now lives in self; null it out so replacement's Drop
        // does not free it a second time.
        replacement.swapchain = vk::SwapchainKHR::null();

        Ok(())
    }

    /// Acquires the next presentable image, signaling `semaphore` when the
    /// image is ready to be written.
    ///
    /// Returns `Ok(None)` when the surface is out of date and nothing was
    /// acquired; the caller recreates the swapchain and skips the frame.
    /// Otherwise yields the image index and whether the swapchain is
    /// suboptimal and should be rebuilt after the frame completes.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<Option<(u32, bool)>, RhiError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(Some((image_index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date at acquire");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues image `image_index` for presentation after `wait_semaphore`
    /// signals.
    ///
    /// Returns `true` when the swapchain came back suboptimal or out of
    /// date and should be recreated before the next frame.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, RhiError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date at present");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the view of swapchain image `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index` is not below [`image_count`](Self::image_count).
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    fn destroy_image_views(&mut self) {
        for &view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(view, None);
            }
        }
        self.image_views.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();

        // Null after a recreate moved the handle into the surviving value.
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            debug!(
                "Swapchain destroyed ({}x{})",
                self.extent.width, self.extent.height
            );
        }
    }
}

/// Picks B8G8R8A8_SRGB in the sRGB color space when offered, then the
/// UNORM variant, then whatever comes first.
fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let in_srgb_space = |f: &&vk::SurfaceFormatKHR| -> bool {
        f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    };

    if let Some(&format) = formats
        .iter()
        .filter(in_srgb_space)
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
    {
        return format;
    }

    if let Some(&format) = formats
        .iter()
        .filter(in_srgb_space)
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
    {
        warn!("B8G8R8A8_SRGB unavailable, using B8G8R8A8_UNORM");
        return format;
    }

    warn!("Using first offered surface format {:?}", formats[0].format);
    formats[0]
}

/// MAILBOX when offered, otherwise FIFO, which every driver must support.
fn select_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Resolves the swapchain size.
///
/// Most surfaces report a fixed current extent and that wins. A surface
/// reporting `u32::MAX` lets the application choose, clamped to the
/// surface limits.
fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image above the minimum keeps acquisition from stalling; a
/// `max_image_count` of zero means the surface imposes no ceiling.
fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

fn make_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>, RhiError> {
    images
        .iter()
        .map(|&image| {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );

            let view = unsafe { device.handle().create_image_view(&create_info, None)? };
            Ok(view)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn format_selection_prefers_bgra_srgb() {
        let offered = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let picked = select_surface_format(&offered);
        assert_eq!(picked.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn format_selection_falls_back_to_unorm_then_first() {
        let offered = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&offered).format,
            vk::Format::B8G8R8A8_UNORM
        );

        let only_odd = [surface_format(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        assert_eq!(
            select_surface_format(&only_odd).format,
            vk::Format::R16G16B16A16_SFLOAT
        );
    }

    #[test]
    fn present_mode_prefers_mailbox_over_fifo() {
        let with_mailbox = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            select_present_mode(&with_mailbox),
            vk::PresentModeKHR::MAILBOX
        );

        let without = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(select_present_mode(&without), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_takes_fixed_surface_value() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            ..Default::default()
        };
        let extent = select_extent(&capabilities, 640, 480);
        assert_eq!((extent.width, extent.height), (1600, 900));
    }

    #[test]
    fn extent_clamps_when_surface_leaves_it_open() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 200,
                height: 200,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let too_big = select_extent(&capabilities, 4000, 4000);
        assert_eq!((too_big.width, too_big.height), (1920, 1080));

        let too_small = select_extent(&capabilities, 10, 10);
        assert_eq!((too_small.width, too_small.height), (200, 200));

        let in_range = select_extent(&capabilities, 1024, 768);
        assert_eq!((in_range.width, in_range.height), (1024, 768));
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(select_image_count(&capped), 3);

        let roomy = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(select_image_count(&roomy), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&unbounded), 3);
    }

    #[test]
    fn adequacy_needs_formats_and_present_modes() {
        let base = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(base.is_adequate());

        let mut no_formats = base.clone();
        no_formats.formats.clear();
        assert!(!no_formats.is_adequate());

        let mut no_modes = base;
        no_modes.present_modes.clear();
        assert!(!no_modes.is_adequate());
    }
}
