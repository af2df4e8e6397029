// Adapter - physical device (GPU) selection
//
// A device qualifies when it can draw, can present to our surface and
// supports swapchains. Among those, the device type decides.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;

use super::{Surface, VulkanInstance};
use crate::config::PowerPreference;

/// Queue families used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, one queue gets created per entry
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub struct Adapter {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub properties: vk::PhysicalDeviceProperties,
    pub name: String,
}

impl Adapter {
    pub fn select(
        instance: &VulkanInstance,
        surface: &Surface,
        preference: PowerPreference,
    ) -> Result<Self> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut candidates = Vec::with_capacity(devices.len());
        for device in devices {
            let Some(candidate) = Self::evaluate(instance, surface, device)? else {
                continue;
            };

            let score = score_adapter(candidate.properties.device_type, preference);
            log::debug!("Candidate GPU '{}' scored {}", candidate.name, score);
            candidates.push((score, candidate));
        }

        let adapter = pick_best(candidates).context("No suitable GPU found")?;

        let version = adapter.properties.api_version;
        log::info!("Selected GPU: {} ({:?})", adapter.name, adapter.properties.device_type);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version)
        );
        log::debug!("Queue families: {:?}", adapter.queue_families);

        Ok(adapter)
    }

    /// Check one device, `None` if it can't be used
    fn evaluate(
        instance: &VulkanInstance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<Self>> {
        let properties = unsafe { instance.instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };

        let mut present_support = Vec::with_capacity(families.len());
        for index in 0..families.len() as u32 {
            present_support.push(surface.supports_present(device, index)?);
        }

        let Some(queue_families) =
            find_queue_families(&families, |index| present_support[index as usize])
        else {
            log::debug!("Skipping GPU '{}': no graphics + present queues", name);
            return Ok(None);
        };

        if !Self::supports_swapchain(instance, device)? {
            log::debug!("Skipping GPU '{}': VK_KHR_swapchain unsupported", name);
            return Ok(None);
        }

        if surface.formats(device)?.is_empty() || surface.present_modes(device)?.is_empty() {
            log::debug!("Skipping GPU '{}': surface has no formats or present modes", name);
            return Ok(None);
        }

        Ok(Some(Self {
            physical_device: device,
            queue_families,
            properties,
            name,
        }))
    }

    fn supports_swapchain(instance: &VulkanInstance, device: vk::PhysicalDevice) -> Result<bool> {
        let extensions = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(device)
        }
        .context("Failed to enumerate device extensions")?;

        Ok(has_extension(&extensions, khr::Swapchain::name()))
    }
}

pub fn has_extension(extensions: &[vk::ExtensionProperties], wanted: &CStr) -> bool {
    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == wanted
    })
}

/// Highest score wins; ties keep the earliest candidate
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (u32, T)>) -> Option<T> {
    let mut best: Option<(u32, T)> = None;
    for (score, candidate) in candidates {
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Rank a device type; higher is better
pub fn score_adapter(device_type: vk::PhysicalDeviceType, preference: PowerPreference) -> u32 {
    let (discrete, integrated) = match preference {
        PowerPreference::HighPerformance => (1000, 100),
        PowerPreference::LowPower => (100, 1000),
    };

    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 5,
        _ => 1,
    }
}

/// Pick graphics and present families, preferring one family that does both
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let is_graphics = |props: &vk::QueueFamilyProperties| {
        props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    };

    let indexed = || families.iter().enumerate().map(|(i, props)| (i as u32, props));

    if let Some((index, _)) =
        indexed().find(|(index, props)| is_graphics(props) && supports_present(*index))
    {
        return Some(QueueFamilies {
            graphics: index,
            present: index,
        });
    }

    let graphics = indexed().find(|(_, props)| is_graphics(props))?.0;
    let present = indexed()
        .find(|(index, props)| props.queue_count > 0 && supports_present(*index))?
        .0;

    Some(QueueFamilies { graphics, present })
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

    #[test]
    fn high_performance_prefers_discrete() {
        let pref = PowerPreference::HighPerformance;
        let discrete = score_adapter(vk::PhysicalDeviceType::DISCRETE_GPU, pref);
        let integrated = score_adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, pref);
        let virt = score_adapter(vk::PhysicalDeviceType::VIRTUAL_GPU, pref);
        let cpu = score_adapter(vk::PhysicalDeviceType::CPU, pref);
        let other = score_adapter(vk::PhysicalDeviceType::OTHER, pref);

        assert!(discrete > integrated);
        assert!(integrated > virt);
        assert!(virt > cpu);
        assert!(cpu > other);
    }

    #[test]
    fn low_power_prefers_integrated() {
        let pref = PowerPreference::LowPower;
        assert!(
            score_adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, pref)
                > score_adapter(vk::PhysicalDeviceType::DISCRETE_GPU, pref)
        );
    }

    #[test]
    fn shared_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 0 draws but can't present; family 2 does both
        let found = find_queue_families(&families, |i| i != 0).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 2, present: 2 });
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn split_families_when_nothing_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let found = find_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn no_graphics_or_no_present_is_rejected() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert_eq!(find_queue_families(&compute_only, |_| true), None);

        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(find_queue_families(&graphics, |_| false), None);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS,
                queue_count: 0,
                ..Default::default()
            },
            family(vk::QueueFlags::GRAPHICS),
        ];
        let found = find_queue_families(&families, |_| true).unwrap();
        assert_eq!(found.graphics, 1);
    }

    #[test]
    fn best_score_wins_and_ties_keep_first() {
        let scored = [(100, "integrated"), (1000, "discrete"), (5, "cpu")];
        assert_eq!(pick_best(scored), Some("discrete"));
        assert_eq!(pick_best([(1000, "first"), (1000, "second")]), Some("first"));
        assert_eq!(pick_best(Vec::<(u32, &str)>::new()), None);
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.bytes()) {
            *dst = src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn swapchain_extension_is_found_by_name() {
        let listed = [extension("VK_KHR_maintenance1"), extension("VK_KHR_swapchain")];
        assert!(has_extension(&listed, khr::Swapchain::name()));

        // A prefix of the name is not a match
        let prefix = [extension("VK_KHR_swap")];
        assert!(!has_extension(&prefix, khr::Swapchain::name()));
        assert!(!has_extension(&[], khr::Swapchain::name()));
    }
}
