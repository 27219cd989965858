// Surface - the window's presentation target
//
// Created from raw window/display handles through ash-window so any
// windowing library can hand us a window. Owned by VulkanDevice; outlives
// every swapchain built on it.

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::gpu::SurfaceSupport;

pub struct Surface {
    loader: khr::Surface,
    handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(
        entry: &Entry,
        instance: &Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> VkResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)
        }?;
        let loader = khr::Surface::new(entry, instance);

        Ok(Self { loader, handle })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> VkResult<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )
        }
    }

    /// Capabilities, formats and present modes in one snapshot
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> VkResult<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.handle)?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// # Safety
    /// No swapchain may still exist on this surface.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.handle, None);
    }
}
