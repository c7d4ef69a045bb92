// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::device::InstanceContext;
use crate::error::{CallExt, VkError, VkResult};

#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct SurfaceBinding {
    pub loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl SurfaceBinding {
    /// # Safety
    /// The window behind `window` must outlive the binding.
    pub unsafe fn new(
        ctx: &InstanceContext,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<Self> {
        let loader = surface::Instance::new(&ctx.entry, &ctx.instance);
        let surface =
            unsafe { ash_window::create_surface(&ctx.entry, &ctx.instance, display, window, None) }
                .call("vkCreateSurfaceKHR")?;
        Ok(Self { loader, surface })
    }

    pub unsafe fn supports_present(
        &self,
        physical: vk::PhysicalDevice,
        family: u32,
    ) -> VkResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical, family, self.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub unsafe fn capabilities(
        &self,
        physical: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical, self.surface)
        }
        .map_err(|e| VkError::SurfaceIncompatible(format!("capabilities query: {e}")))
    }

    /// Capabilities, formats and present modes. Any failure here means the
    /// surface can't be presented to.
    pub unsafe fn query(&self, physical: vk::PhysicalDevice) -> VkResult<SurfaceSupport> {
        let capabilities = unsafe { self.capabilities(physical) }?;
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(physical, self.surface)
        }
        .map_err(|e| VkError::SurfaceIncompatible(format!("format query: {e}")))?;
        let present_modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical, self.surface)
        }
        .map_err(|e| VkError::SurfaceIncompatible(format!("present mode query: {e}")))?;
        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub unsafe fn destroy(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
        self.surface = vk::SurfaceKHR::null();
    }
}
