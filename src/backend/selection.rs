// Physical device selection
//
// Everything here works on plain data gathered from the driver so the
// scoring rules can be exercised without a GPU.

use ash::vk;
use std::ffi::CStr;

/// Queue families a device must provide for us to render and present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Both families, once complete
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }
}

/// Find graphics and present families.
///
/// A family that can do both wins over a split pair.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let graphics =
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = supports_present(index);

        if graphics && present {
            return QueueFamilyIndices {
                graphics: Some(index),
                present: Some(index),
            };
        }

        if graphics && indices.graphics.is_none() {
            indices.graphics = Some(index);
        }
        if present && indices.present.is_none() {
            indices.present = Some(index);
        }
    }

    indices
}

/// What a device must offer beyond the queue families
#[derive(Debug, Clone, Copy)]
pub struct DeviceRequirements {
    pub geometry_shader: bool,
}

/// The facts about one physical device that its score depends on
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
    pub queue_families: QueueFamilyIndices,
    pub extensions_supported: bool,
    pub swapchain_adequate: bool,
}

/// Score a device; 0 means unusable.
pub fn rate_device_suitability(profile: &DeviceProfile, requirements: &DeviceRequirements) -> u32 {
    if requirements.geometry_shader && !profile.geometry_shader {
        return 0;
    }
    if !profile.queue_families.is_complete() {
        return 0;
    }
    if !profile.extensions_supported || !profile.swapchain_adequate {
        return 0;
    }

    let type_score: u32 = match profile.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        _ => 0,
    };

    type_score.saturating_add(profile.max_image_dimension_2d)
}

/// Index of the best-scoring device. Ties go to the later device.
pub fn select_best(scores: &[u32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > 0)
        .max_by_key(|(_, score)| **score)
        .map(|(index, _)| index)
}

/// Names from `required` that do not appear in `available`
pub fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

/// Read a fixed-size, NUL-terminated driver string
pub fn driver_string(raw: &[std::os::raw::c_char]) -> &CStr {
    // Vulkan guarantees these arrays are NUL-terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn profile(device_type: vk::PhysicalDeviceType, max_dim: u32) -> DeviceProfile {
        DeviceProfile {
            name: "test".to_string(),
            device_type,
            max_image_dimension_2d: max_dim,
            geometry_shader: true,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions_supported: true,
            swapchain_adequate: true,
        }
    }

    const STRICT: DeviceRequirements = DeviceRequirements { geometry_shader: true };

    #[test]
    fn prefers_shared_graphics_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = find_queue_families(&families, |i| i != 0);
        assert_eq!(indices.resolved(), Some((2, 2)));
    }

    #[test]
    fn falls_back_to_split_families() {
        let families = [family(vk::QueueFlags::TRANSFER), family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |i| i == 0);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn incomplete_without_presentation() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| false);
        assert_eq!(indices.graphics, Some(0));
        assert!(!indices.is_complete());
        assert_eq!(indices.resolved(), None);
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = find_queue_families(&[empty], |_| true);
        assert_eq!(indices.graphics, None);
    }

    #[test]
    fn device_type_dominates_small_dimension_gaps() {
        let discrete = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        let integrated = profile(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        let cpu = profile(vk::PhysicalDeviceType::CPU, 16384);

        assert_eq!(rate_device_suitability(&discrete, &STRICT), 17384);
        assert_eq!(rate_device_suitability(&integrated, &STRICT), 16884);
        assert_eq!(rate_device_suitability(&cpu, &STRICT), 16384);
    }

    #[test]
    fn max_image_dimension_breaks_ties() {
        let small = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let large = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        assert!(rate_device_suitability(&large, &STRICT) > rate_device_suitability(&small, &STRICT));
    }

    #[test]
    fn missing_geometry_shader_is_unsuitable_only_when_required() {
        let mut device = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        device.geometry_shader = false;

        assert_eq!(rate_device_suitability(&device, &STRICT), 0);
        let relaxed = DeviceRequirements { geometry_shader: false };
        assert_eq!(rate_device_suitability(&device, &relaxed), 5096);
    }

    #[test]
    fn unsuitable_devices_score_zero() {
        let mut no_present = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        no_present.queue_families.present = None;
        assert_eq!(rate_device_suitability(&no_present, &STRICT), 0);

        let mut no_swapchain_ext = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        no_swapchain_ext.extensions_supported = false;
        assert_eq!(rate_device_suitability(&no_swapchain_ext, &STRICT), 0);

        let mut no_formats = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        no_formats.swapchain_adequate = false;
        assert_eq!(rate_device_suitability(&no_formats, &STRICT), 0);
    }

    #[test]
    fn select_best_picks_highest_nonzero() {
        assert_eq!(select_best(&[500, 17384, 1000]), Some(1));
        assert_eq!(select_best(&[0, 0]), None);
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn select_best_ties_go_to_later_device() {
        assert_eq!(select_best(&[900, 900, 100]), Some(1));
    }

    #[test]
    fn missing_names_reports_only_absent() {
        let required = [c"VK_LAYER_KHRONOS_validation", c"VK_LAYER_extra"];
        let available = [c"VK_LAYER_KHRONOS_validation", c"VK_LAYER_other"];
        assert_eq!(missing_names(&required, &available), vec![c"VK_LAYER_extra"]);
        assert!(missing_names(&required[..1], &available).is_empty());
    }

    #[test]
    fn driver_string_stops_at_nul() {
        let mut raw = [0 as std::os::raw::c_char; 16];
        for (dst, src) in raw.iter_mut().zip(b"llvmpipe") {
            *dst = *src as std::os::raw::c_char;
        }
        assert_eq!(driver_string(&raw), c"llvmpipe");
    }
}
