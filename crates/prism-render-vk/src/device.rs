// SPDX-License-Identifier: CEPL-1.0
//! Instance, diagnostics, physical-device selection, logical device + queues.
//!
//! Creation order is instance -> surface -> device, because queue-family
//! discovery tests presentation against the surface. Destruction is the
//! reverse and is driven by the owner (see `renderer.rs`).

use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::khr::swapchain;
use ash::{vk, Entry, Instance};
use prism_render::DevicePolicy;
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CallExt, VkError, VkResult};
use crate::surface::SurfaceBinding;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback-data struct for the
    // duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vk {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vk {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vk {:?}] {}", types, msg);
    } else {
        tracing::trace!("[vk {:?}] {}", types, msg);
    }
    vk::FALSE
}

/// Optional capability table. Absent when validation is off or the
/// extension is missing; nothing else depends on it.
struct Diagnostics {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    diagnostics: Option<Diagnostics>,
}

impl InstanceContext {
    /// # Safety
    /// `display` must be a valid display handle for the lifetime of the
    /// instance.
    pub unsafe fn new(display: RawDisplayHandle, validation: bool) -> anyhow::Result<Self> {
        use anyhow::Context;

        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .context("enumerate_required_extensions")?
            .to_vec();

        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .call("vkEnumerateInstanceExtensionProperties")?;
        let has_debug_utils = available_exts
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(debug_utils::NAME));
        let has_layer = unsafe { entry.enumerate_instance_layer_properties() }
            .call("vkEnumerateInstanceLayerProperties")?
            .iter()
            .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER));

        let diagnostics = validation && has_debug_utils;
        if validation && !has_layer {
            warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        if diagnostics {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layers = if validation && has_layer {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: c"prism".as_ptr(),
            p_engine_name: c"prism".as_ptr(),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;

        let diagnostics = if diagnostics {
            let loader = debug_utils::Instance::new(&entry, &instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
                Ok(messenger) => Some(Diagnostics { loader, messenger }),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };
        info!(
            "vk: instance created (validation={}, diagnostics={})",
            !layers.is_empty(),
            diagnostics.is_some()
        );

        Ok(Self {
            entry,
            instance,
            diagnostics,
        })
    }

    pub fn has_diagnostics(&self) -> bool {
        self.diagnostics.is_some()
    }

    /// Destroys the messenger and the instance. Everything created from the
    /// instance must already be gone.
    pub unsafe fn destroy(&mut self) {
        if let Some(d) = self.diagnostics.take() {
            unsafe { d.loader.destroy_debug_utils_messenger(d.messenger, None) };
        }
        unsafe { self.instance.destroy_instance(None) };
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FamilySupport {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Single pass. A family with both capabilities wins outright; otherwise the
/// first present-capable and first graphics-capable families are used.
pub fn find_queue_families(families: &[FamilySupport]) -> VkResult<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, f) in families.iter().enumerate() {
        let i = i as u32;
        if f.graphics && f.present {
            return Ok(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if f.present && present.is_none() {
            present = Some(i);
        }
        if f.graphics && graphics.is_none() {
            graphics = Some(i);
        }
    }
    match (graphics, present) {
        (Some(graphics), Some(present)) => Ok(QueueFamilies { graphics, present }),
        (None, _) => Err(VkError::NoSuitableQueueFamily("graphics")),
        (_, None) => Err(VkError::NoSuitableQueueFamily("present")),
    }
}

fn is_gpu(t: vk::PhysicalDeviceType) -> bool {
    t == vk::PhysicalDeviceType::DISCRETE_GPU || t == vk::PhysicalDeviceType::INTEGRATED_GPU
}

pub fn pick_physical_device(
    types: &[vk::PhysicalDeviceType],
    policy: DevicePolicy,
) -> Option<usize> {
    match policy {
        DevicePolicy::FirstGpu => types.iter().position(|&t| is_gpu(t)),
        DevicePolicy::PreferDiscrete => types
            .iter()
            .position(|&t| t == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| types.iter().position(|&t| is_gpu(t))),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct QueueHandle {
    pub queue: vk::Queue,
    pub family: u32,
}

pub struct DeviceContext {
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub graphics: QueueHandle,
    pub present: QueueHandle,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub anisotropy: bool,
}

impl DeviceContext {
    pub unsafe fn new(
        ctx: &InstanceContext,
        surface: &SurfaceBinding,
        policy: DevicePolicy,
    ) -> VkResult<Self> {
        let instance = &ctx.instance;
        let candidates =
            unsafe { instance.enumerate_physical_devices() }.call("vkEnumeratePhysicalDevices")?;
        let types: Vec<_> = candidates
            .iter()
            .map(|&pd| unsafe { instance.get_physical_device_properties(pd) }.device_type)
            .collect();
        let idx = pick_physical_device(&types, policy).ok_or(VkError::NoSuitableDevice)?;
        let physical = candidates[idx];
        let properties = unsafe { instance.get_physical_device_properties(physical) };

        let qprops = unsafe { instance.get_physical_device_queue_family_properties(physical) };
        let mut support = Vec::with_capacity(qprops.len());
        for (i, q) in qprops.iter().enumerate() {
            support.push(FamilySupport {
                graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: unsafe { surface.supports_present(physical, i as u32) }?,
            });
        }
        let families = find_queue_families(&support)?;

        let priority = [1.0f32];
        let queue_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priority.as_ptr(),
                ..Default::default()
            })
            .collect();

        let supported = unsafe { instance.get_physical_device_features(physical) };
        let anisotropy = supported.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            ..Default::default()
        };
        let extensions = [swapchain::NAME.as_ptr()];
        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = unsafe { instance.create_device(physical, &create_info, None) }
            .call("vkCreateDevice")?;

        let graphics = QueueHandle {
            queue: unsafe { device.get_device_queue(families.graphics, 0) },
            family: families.graphics,
        };
        let present = QueueHandle {
            queue: unsafe { device.get_device_queue(families.present, 0) },
            family: families.present,
        };
        let swapchain_loader = swapchain::Device::new(instance, &device);
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical) };

        let name = properties
            .device_name_as_c_str()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "vk: device `{}` ({:?}), graphics family {}, present family {}",
            name, properties.device_type, families.graphics, families.present
        );

        Ok(Self {
            physical,
            device,
            swapchain_loader,
            graphics,
            present,
            properties,
            memory_properties,
            anisotropy,
        })
    }

    pub fn families(&self) -> QueueFamilies {
        QueueFamilies {
            graphics: self.graphics.family,
            present: self.present.family,
        }
    }

    pub fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }.call("vkDeviceWaitIdle")
    }

    pub unsafe fn destroy(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}
