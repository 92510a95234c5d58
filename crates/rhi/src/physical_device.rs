//! GPU enumeration and selection.
//!
//! Every Vulkan-capable device is inspected for the queue families, the
//! swapchain extension, and the API baseline this renderer needs; the
//! survivors are scored and the best one wins. Discrete GPUs outrank
//! integrated ones by a wide margin.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;
use crate::swapchain::SwapchainSupportDetails;

/// Queue family indices resolved for a particular device and surface.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyIndices {
    /// Family with `QUEUE_GRAPHICS_BIT`.
    pub graphics_family: Option<u32>,
    /// Family that can present to the target surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// True when both a graphics and a present family were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// The resolved family indices with duplicates removed, for building
    /// the logical device's queue create infos.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics_family, self.present_family]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Everything queried up front about the selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// The physical device handle.
    pub device: vk::PhysicalDevice,
    /// Core properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported feature bits.
    pub features: vk::PhysicalDeviceFeatures,
    /// Heap layout and memory types.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families resolved against the target surface.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// The device name reported by the driver.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// The device type as a display string.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// The supported Vulkan version as (major, minor, patch).
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Total bytes across all device-local heaps.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the highest-scoring GPU that can drive the given surface.
///
/// A device qualifies when it has graphics and present queue families,
/// exposes `VK_KHR_swapchain` with at least one format and present mode
/// for the surface, and reports Vulkan 1.2 or newer.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when nothing qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| {
            let info = evaluate_device(instance, device, surface, surface_loader)?;
            let score = score_device(&info);
            debug!(
                "GPU candidate '{}' ({}), score {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            Some((info, score))
        })
        .max_by_key(|(_, score)| *score);

    match best {
        Some((info, score)) => {
            let (major, minor, patch) = info.api_version();
            info!(
                "Selected GPU '{}' ({}), Vulkan {}.{}.{}, score {}",
                info.device_name(),
                info.device_type_name(),
                major,
                minor,
                patch,
                score
            );
            Ok(info)
        }
        None => {
            warn!("No GPU satisfies the renderer's requirements");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

/// Queries one device and returns its info when it qualifies.
fn evaluate_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let info = PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families: resolve_queue_families(instance, device, surface, surface_loader),
    };

    if !info.queue_families.is_complete() {
        debug!("GPU '{}' rejected: queue families", info.device_name());
        return None;
    }
    if !has_swapchain_extension(instance, device) {
        debug!("GPU '{}' rejected: no VK_KHR_swapchain", info.device_name());
        return None;
    }
    match SwapchainSupportDetails::query(device, surface, surface_loader) {
        Ok(support) if support.is_adequate() => {}
        _ => {
            debug!("GPU '{}' rejected: surface support", info.device_name());
            return None;
        }
    }
    // Standard version encodings compare monotonically.
    if properties.api_version < vk::API_VERSION_1_2 {
        debug!("GPU '{}' rejected: Vulkan 1.2 baseline", info.device_name());
        return None;
    }

    Some(info)
}

fn has_swapchain_extension(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };

    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::khr::swapchain::NAME
    })
}

/// Walks the device's queue families and records the first graphics
/// family and the first family that can present to `surface`.
fn resolve_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let index = index as u32;

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(index);
        }

        if indices.present_family.is_none() {
            let presentable = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            };
            if presentable {
                indices.present_family = Some(index);
            }
        }
    }

    indices
}

/// Ranks a qualifying device. Device class dominates; image dimension
/// limits and VRAM break ties within a class.
fn score_device(info: &PhysicalDeviceInfo) -> u32 {
    let class = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;

    class + info.properties.limits.max_image_dimension2_d + vram_mb.min(16_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_indices_are_incomplete() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn indices_complete_only_with_both_families() {
        let both = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert!(both.is_complete());

        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!graphics_only.is_complete());

        let present_only = QueueFamilyIndices {
            graphics_family: None,
            present_family: Some(2),
        };
        assert!(!present_only.is_complete());
    }

    #[test]
    fn unique_families_keeps_distinct_indices() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn unique_families_merges_shared_index() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(3),
            present_family: Some(3),
        };
        assert_eq!(indices.unique_families(), vec![3]);
    }
}
